// SPDX-License-Identifier: Apache-2.0
//! Per-team fog of war.
//!
//! Visibility is reference-counted so overlapping sight circles compose:
//! every cell-rect occupation change adds or removes one count over a
//! Chebyshev radius. EXPLORED is monotone: once a team has seen a cell it
//! never drops back to HIDDEN. Detector entities additionally stamp a
//! detection count, which is what reveals invisible units.

use crate::fixed::IVec2;

/// Visibility level of one cell for one team.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum FogLevel {
    /// Never seen.
    #[default]
    Hidden = 0,
    /// Seen before, not currently visible.
    Explored = 1,
    /// Currently inside some friendly sight radius.
    Visible = 2,
}

#[derive(Clone, Copy, Debug, Default)]
struct FogCell {
    visible: u16,
    detected: u16,
    explored: bool,
}

/// One team's visibility grid.
#[derive(Clone, Debug)]
pub struct FogGrid {
    width: i32,
    height: i32,
    cells: Vec<FogCell>,
}

impl FogGrid {
    /// A fully hidden grid.
    #[must_use]
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            cells: vec![FogCell::default(); (width * height) as usize],
        }
    }

    fn index(&self, cell: IVec2) -> usize {
        (cell.y * self.width + cell.x) as usize
    }

    /// Level of a cell.
    #[must_use]
    pub fn level(&self, cell: IVec2) -> FogLevel {
        let fog = self.cells[self.index(cell)];
        if fog.visible > 0 {
            FogLevel::Visible
        } else if fog.explored {
            FogLevel::Explored
        } else {
            FogLevel::Hidden
        }
    }

    /// Whether a cell currently carries detection.
    #[must_use]
    pub fn is_detected(&self, cell: IVec2) -> bool {
        self.cells[self.index(cell)].detected > 0
    }

    /// Whether any cell of a rect is at least explored.
    #[must_use]
    pub fn is_rect_revealed(&self, origin: IVec2, size: i32) -> bool {
        for y in origin.y..origin.y + size {
            for x in origin.x..origin.x + size {
                if self.level(IVec2::new(x, y)) != FogLevel::Hidden {
                    return true;
                }
            }
        }
        false
    }

    /// Add or remove one sight stamp for an entity footprint.
    ///
    /// Covers all cells within Chebyshev distance `sight` of the
    /// `size`-rect rooted at `origin`. With `increment` the cells also
    /// become explored; decrement never clears exploration.
    pub fn update(
        &mut self,
        origin: IVec2,
        size: i32,
        sight: i32,
        increment: bool,
        detection: bool,
    ) {
        for y in origin.y - sight..origin.y + size + sight {
            for x in origin.x - sight..origin.x + size + sight {
                if x < 0 || y < 0 || x >= self.width || y >= self.height {
                    continue;
                }
                let index = self.index(IVec2::new(x, y));
                let fog = &mut self.cells[index];
                if increment {
                    fog.visible += 1;
                    fog.explored = true;
                    if detection {
                        fog.detected += 1;
                    }
                } else {
                    fog.visible = fog.visible.saturating_sub(1);
                    if detection {
                        fog.detected = fog.detected.saturating_sub(1);
                    }
                }
            }
        }
    }

    /// Canonical byte per cell for the checksum stream, row-major.
    pub fn serialize_levels(&self, out: &mut Vec<u8>) {
        for y in 0..self.height {
            for x in 0..self.width {
                out.push(self.level(IVec2::new(x, y)) as u8);
            }
        }
    }
}
