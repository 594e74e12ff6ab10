// SPDX-License-Identifier: Apache-2.0
//! Tile grid and cell occupancy.
//!
//! The map couples a read-mostly tile grid (sprite, auto-tile frame,
//! elevation) with two mutable cell layers recording which entity owns each
//! cell. All iteration is row-major and every query that feeds the simulation
//! is order-explicit.

use crate::fixed::{IVec2, Rect};
use crate::id_array::{EntityId, ID_NULL};
use crate::noise::Noise;
use crate::rng::Lcg;

/// Tile sprite index: open sand, first variant.
pub const TILE_SPRITE_SAND1: u16 = 0;
/// Tile sprite index: open sand, second variant.
pub const TILE_SPRITE_SAND2: u16 = 1;
/// Tile sprite index: open sand, third variant.
pub const TILE_SPRITE_SAND3: u16 = 2;
/// Tile sprite index: water; never walkable.
pub const TILE_SPRITE_WATER: u16 = 3;
/// Tile sprite index: highland.
pub const TILE_SPRITE_HIGHLAND: u16 = 4;

/// Noise sample below which a tile becomes water.
const NOISE_WATER_THRESHOLD: i8 = -48;
/// Noise sample at or above which a tile becomes highland.
const NOISE_HIGHLAND_THRESHOLD: i8 = 48;

/// One tile of the grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tile {
    /// Sprite index.
    pub sprite: u16,
    /// Auto-tile frame derived from same-elevation neighbors.
    pub frame: u8,
    /// Elevation step.
    pub elevation: u8,
}

/// Overlapping occupancy layers per tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum CellLayer {
    /// Units, buildings, mines, terrain props.
    Ground = 0,
    /// Airborne occupancy.
    Sky = 1,
}

/// Number of [`CellLayer`] variants.
pub const CELL_LAYER_COUNT: usize = 2;

/// What occupies a cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CellKind {
    /// Nothing.
    #[default]
    Empty,
    /// A unit.
    Unit,
    /// A miner commuting to or from a goldmine.
    Miner,
    /// A building.
    Building,
    /// A goldmine.
    Goldmine,
    /// A terrain prop; `1..=5` selects the variant. Props are owned by the
    /// map itself and carry [`ID_NULL`].
    Decoration(u8),
}

impl CellKind {
    /// Canonical byte used by the checksum stream.
    #[must_use]
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Empty => 0,
            Self::Unit => 1,
            Self::Miner => 2,
            Self::Building => 3,
            Self::Goldmine => 4,
            Self::Decoration(n) => 4 + n,
        }
    }
}

/// One occupancy record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cell {
    /// Occupant category.
    pub kind: CellKind,
    /// Owning entity, or [`ID_NULL`].
    pub id: EntityId,
}

impl Cell {
    /// The empty cell.
    pub const EMPTY: Self = Self {
        kind: CellKind::Empty,
        id: ID_NULL,
    };
}

/// Map dimension presets, a match setting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum MapSize {
    /// 64 x 64 tiles.
    #[default]
    Small = 0,
    /// 96 x 96 tiles.
    Medium = 1,
    /// 128 x 128 tiles.
    Large = 2,
}

impl MapSize {
    /// Side length in tiles.
    #[must_use]
    pub fn tiles(self) -> u32 {
        match self {
            Self::Small => 64,
            Self::Medium => 96,
            Self::Large => 128,
        }
    }

    /// Decode from a settings byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Self::Medium,
            2 => Self::Large,
            _ => Self::Small,
        }
    }
}

/// Tile grid plus occupancy layers.
#[derive(Clone, Debug)]
pub struct Map {
    /// Width in tiles.
    pub width: i32,
    /// Height in tiles.
    pub height: i32,
    tiles: Vec<Tile>,
    cells: [Vec<Cell>; CELL_LAYER_COUNT],
}

/// Output of [`map_init`].
#[derive(Clone, Debug)]
pub struct MapInit {
    /// The generated map.
    pub map: Map,
    /// One town-hall anchor per player slot, in player-id order.
    pub player_spawns: Vec<IVec2>,
    /// Goldmine origin cells.
    pub goldmine_cells: Vec<IVec2>,
}

/// Footprint of a player spawn area.
const SPAWN_SIZE: i32 = 4;
/// Footprint of a goldmine.
const GOLDMINE_SIZE: i32 = 3;

impl Map {
    fn index(&self, cell: IVec2) -> usize {
        (cell.y * self.width + cell.x) as usize
    }

    /// Whether a cell coordinate lies on the map.
    #[must_use]
    pub fn is_in_bounds(&self, cell: IVec2) -> bool {
        cell.x >= 0 && cell.y >= 0 && cell.x < self.width && cell.y < self.height
    }

    /// Whether a whole rect lies on the map.
    #[must_use]
    pub fn is_rect_in_bounds(&self, rect: &Rect) -> bool {
        rect.x >= 0
            && rect.y >= 0
            && rect.x + rect.w <= self.width
            && rect.y + rect.h <= self.height
    }

    /// Tile under a cell.
    #[must_use]
    pub fn tile(&self, cell: IVec2) -> Tile {
        self.tiles[self.index(cell)]
    }

    /// Occupancy record at a cell.
    #[must_use]
    pub fn cell(&self, layer: CellLayer, cell: IVec2) -> Cell {
        self.cells[layer as usize][self.index(cell)]
    }

    /// Whether ground movement may ever cross this tile.
    #[must_use]
    pub fn is_tile_walkable(&self, cell: IVec2) -> bool {
        self.tile(cell).sprite != TILE_SPRITE_WATER
    }

    /// Overwrite every cell of a rect on a layer.
    pub fn set_cell_rect(&mut self, layer: CellLayer, origin: IVec2, size: i32, value: Cell) {
        for y in origin.y..origin.y + size {
            for x in origin.x..origin.x + size {
                let index = self.index(IVec2::new(x, y));
                self.cells[layer as usize][index] = value;
            }
        }
    }

    /// Whether any ground cell of the rect is occupied.
    ///
    /// Cells inside the same-sized rect rooted at `ignoring_origin` are
    /// skipped (an entity never blocks itself mid-step). With
    /// `include_decorations` false, terrain props do not count as occupancy;
    /// water always does.
    #[must_use]
    pub fn is_cell_rect_occupied(
        &self,
        origin: IVec2,
        size: i32,
        ignoring_origin: IVec2,
        include_decorations: bool,
    ) -> bool {
        let ignore = Rect::square(ignoring_origin, size);
        for y in origin.y..origin.y + size {
            for x in origin.x..origin.x + size {
                let cell = IVec2::new(x, y);
                if !self.is_in_bounds(cell) {
                    return true;
                }
                if ignoring_origin != IVec2::NONE && ignore.has_point(cell) {
                    continue;
                }
                if !self.is_tile_walkable(cell) {
                    return true;
                }
                match self.cell(CellLayer::Ground, cell).kind {
                    CellKind::Empty => {}
                    CellKind::Decoration(_) => {
                        if include_decorations {
                            return true;
                        }
                    }
                    _ => return true,
                }
            }
        }
        false
    }

    /// Whether a rect on the path plane is blocked.
    ///
    /// Miner cells are passable by default (commuters re-block each other
    /// dynamically); the `mining` flag makes them blocking so that miners do
    /// not path head-on into each other's lanes.
    #[must_use]
    pub fn is_cell_rect_blocked(
        &self,
        origin: IVec2,
        size: i32,
        ignoring_origin: IVec2,
        mining: bool,
    ) -> bool {
        let ignore = Rect::square(ignoring_origin, size);
        for y in origin.y..origin.y + size {
            for x in origin.x..origin.x + size {
                let cell = IVec2::new(x, y);
                if !self.is_in_bounds(cell) {
                    return true;
                }
                if ignoring_origin != IVec2::NONE && ignore.has_point(cell) {
                    continue;
                }
                if !self.is_tile_walkable(cell) {
                    return true;
                }
                match self.cell(CellLayer::Ground, cell).kind {
                    CellKind::Empty => {}
                    CellKind::Miner => {
                        if mining {
                            return true;
                        }
                    }
                    _ => return true,
                }
            }
        }
        false
    }

    /// Whether every ground cell of the rect is owned by exactly `id`.
    #[must_use]
    pub fn is_cell_rect_equal_to(&self, origin: IVec2, size: i32, id: EntityId) -> bool {
        for y in origin.y..origin.y + size {
            for x in origin.x..origin.x + size {
                let cell = IVec2::new(x, y);
                if !self.is_in_bounds(cell) || self.cell(CellLayer::Ground, cell).id != id {
                    return false;
                }
            }
        }
        true
    }

    /// Whether every tile of the rect shares one elevation and is walkable.
    #[must_use]
    pub fn is_cell_rect_flat(&self, origin: IVec2, size: i32) -> bool {
        if !self.is_rect_in_bounds(&Rect::square(origin, size)) {
            return false;
        }
        let elevation = self.tile(origin).elevation;
        for y in origin.y..origin.y + size {
            for x in origin.x..origin.x + size {
                let cell = IVec2::new(x, y);
                if !self.is_tile_walkable(cell) || self.tile(cell).elevation != elevation {
                    return false;
                }
            }
        }
        true
    }

    /// Standing cells for a `from_size` rect around a `around_size` rect,
    /// clockwise starting from north of the target's center.
    fn ring_around_rect(&self, around: IVec2, around_size: i32, from_size: i32) -> Vec<IVec2> {
        let left = around.x - from_size;
        let top = around.y - from_size;
        let right = around.x + around_size;
        let bottom = around.y + around_size;

        let mut ring = Vec::new();
        // Top edge, left to right; then right edge, bottom edge (right to
        // left), left edge (bottom to top).
        for x in left..=right {
            ring.push(IVec2::new(x, top));
        }
        for y in top + 1..=bottom {
            ring.push(IVec2::new(right, y));
        }
        for x in (left..right).rev() {
            ring.push(IVec2::new(x, bottom));
        }
        for y in (top + 1..bottom).rev() {
            ring.push(IVec2::new(left, y));
        }

        // Rotate so iteration starts at the cell north of the target center;
        // ties between equally-near cells then resolve clockwise from north.
        let center_x = around.x + (around_size - from_size) / 2;
        let start = ring
            .iter()
            .position(|c| c.y == top && c.x >= center_x)
            .unwrap_or(0);
        ring.rotate_left(start);
        ring
    }

    /// The ring cell nearest to `from` (Manhattan, ties clockwise from
    /// north) where a `from_size` rect fits unblocked, skipping
    /// `ignore_cell`. Falls back to the nearest in-bounds ring cell when the
    /// whole ring is blocked, letting the caller's pathfinder report failure.
    #[must_use]
    pub fn nearest_cell_around_rect(
        &self,
        from: IVec2,
        from_size: i32,
        around: IVec2,
        around_size: i32,
        mining: bool,
        ignore_cell: IVec2,
    ) -> IVec2 {
        let ring = self.ring_around_rect(around, around_size, from_size);

        let mut best: Option<(i32, IVec2)> = None;
        let mut fallback: Option<(i32, IVec2)> = None;
        for cell in ring {
            if !self.is_rect_in_bounds(&Rect::square(cell, from_size)) || cell == ignore_cell {
                continue;
            }
            let distance = IVec2::manhattan_distance(from, cell);
            if fallback.is_none_or(|(d, _)| distance < d) {
                fallback = Some((distance, cell));
            }
            if self.is_cell_rect_blocked(cell, from_size, from, mining) {
                continue;
            }
            if best.is_none_or(|(d, _)| distance < d) {
                best = Some((distance, cell));
            }
        }

        best.or(fallback).map_or(from, |(_, cell)| cell)
    }
}

/// Build a map from a noise buffer plus the simulation RNG, yielding the
/// grid, player spawn anchors, and goldmine cells. Deterministic given the
/// same inputs; RNG call order is fixed row-major then feature order.
#[must_use]
pub fn map_init(noise: &Noise, lcg: &mut Lcg) -> MapInit {
    let width = noise.width as i32;
    let height = noise.height as i32;
    let area = (width * height) as usize;

    let mut tiles = Vec::with_capacity(area);
    for y in 0..noise.height {
        for x in 0..noise.width {
            let sample = noise.at(x, y);
            let tile = if sample < NOISE_WATER_THRESHOLD {
                Tile {
                    sprite: TILE_SPRITE_WATER,
                    frame: 0,
                    elevation: 0,
                }
            } else if sample >= NOISE_HIGHLAND_THRESHOLD {
                Tile {
                    sprite: TILE_SPRITE_HIGHLAND,
                    frame: 0,
                    elevation: 1,
                }
            } else {
                Tile {
                    sprite: TILE_SPRITE_SAND1 + lcg.next_range(0, 2) as u16,
                    frame: 0,
                    elevation: 0,
                }
            };
            tiles.push(tile);
        }
    }

    let mut map = Map {
        width,
        height,
        tiles,
        cells: [vec![Cell::EMPTY; area], vec![Cell::EMPTY; area]],
    };

    // Auto-tile pass: frame encodes which cardinal neighbors share the
    // tile's elevation (N=1, E=2, S=4, W=8).
    for y in 0..height {
        for x in 0..width {
            let cell = IVec2::new(x, y);
            let elevation = map.tile(cell).elevation;
            let mut frame = 0u8;
            for (bit, step) in [
                (1u8, IVec2::new(0, -1)),
                (2, IVec2::new(1, 0)),
                (4, IVec2::new(0, 1)),
                (8, IVec2::new(-1, 0)),
            ] {
                let neighbor = cell + step;
                if !map.is_in_bounds(neighbor) || map.tile(neighbor).elevation == elevation {
                    frame |= bit;
                }
            }
            let index = map.index(cell);
            map.tiles[index].frame = frame;
        }
    }

    // Player spawns: one flat area per quadrant, jittered off a fixed anchor.
    let margin = width / 8;
    let anchors = [
        IVec2::new(margin, margin),
        IVec2::new(width - margin - SPAWN_SIZE, height - margin - SPAWN_SIZE),
        IVec2::new(width - margin - SPAWN_SIZE, margin),
        IVec2::new(margin, height - margin - SPAWN_SIZE),
    ];
    let mut player_spawns = Vec::with_capacity(anchors.len());
    for anchor in anchors {
        let jitter = IVec2::new(lcg.next_range(-2, 2), lcg.next_range(-2, 2));
        player_spawns.push(find_flat_area_near(&map, anchor + jitter, SPAWN_SIZE));
    }

    // One goldmine near each spawn, offset toward the map center, plus a few
    // contested extras.
    let mut goldmine_cells: Vec<IVec2> = Vec::new();
    let center = IVec2::new(width / 2, height / 2);
    for spawn in &player_spawns {
        let toward = IVec2::new(
            (center.x - spawn.x).signum() * lcg.next_range(5, 8),
            (center.y - spawn.y).signum() * lcg.next_range(5, 8),
        );
        let cell = find_flat_area_near(&map, *spawn + toward, GOLDMINE_SIZE);
        if !overlaps_feature(cell, GOLDMINE_SIZE, &player_spawns, &goldmine_cells) {
            goldmine_cells.push(cell);
        }
    }
    let extra_mines = (width * height) / 2048;
    for _ in 0..extra_mines {
        let candidate = IVec2::new(
            lcg.next_range(2, width - GOLDMINE_SIZE - 2),
            lcg.next_range(2, height - GOLDMINE_SIZE - 2),
        );
        let cell = find_flat_area_near(&map, candidate, GOLDMINE_SIZE);
        if !overlaps_feature(cell, GOLDMINE_SIZE, &player_spawns, &goldmine_cells) {
            goldmine_cells.push(cell);
        }
    }

    // Terrain props.
    let decoration_count = (width * height) / 128;
    for _ in 0..decoration_count {
        let cell = IVec2::new(
            lcg.next_range(0, width - 1),
            lcg.next_range(0, height - 1),
        );
        let variant = lcg.next_range(1, 5) as u8;
        if map.is_tile_walkable(cell)
            && map.cell(CellLayer::Ground, cell).kind == CellKind::Empty
            && !overlaps_feature(cell, 1, &player_spawns, &goldmine_cells)
        {
            let index = map.index(cell);
            map.cells[CellLayer::Ground as usize][index] = Cell {
                kind: CellKind::Decoration(variant),
                id: ID_NULL,
            };
        }
    }

    MapInit {
        map,
        player_spawns,
        goldmine_cells,
    }
}

/// Nearest origin to `near` where a flat `size` x `size` rect fits, searched
/// in expanding square rings (deterministic scan order). Falls back to the
/// clamped anchor when nothing flat exists nearby.
fn find_flat_area_near(map: &Map, near: IVec2, size: i32) -> IVec2 {
    let clamped = IVec2::new(
        near.x.clamp(0, map.width - size),
        near.y.clamp(0, map.height - size),
    );
    for radius in 0..map.width.max(map.height) {
        for y in clamped.y - radius..=clamped.y + radius {
            for x in clamped.x - radius..=clamped.x + radius {
                if (y - clamped.y).abs() != radius && (x - clamped.x).abs() != radius {
                    continue;
                }
                let origin = IVec2::new(x, y);
                if map.is_cell_rect_flat(origin, size) {
                    return origin;
                }
            }
        }
    }
    clamped
}

/// Whether a rect comes too close to an existing spawn or goldmine.
fn overlaps_feature(
    origin: IVec2,
    size: i32,
    spawns: &[IVec2],
    goldmines: &[IVec2],
) -> bool {
    let rect = Rect::new(origin.x - 1, origin.y - 1, size + 2, size + 2);
    spawns
        .iter()
        .map(|s| Rect::square(*s, SPAWN_SIZE))
        .chain(goldmines.iter().map(|g| Rect::square(*g, GOLDMINE_SIZE)))
        .any(|feature| rect.intersects(&feature))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_map() -> Map {
        let noise = Noise::zeroed(32, 32);
        map_init(&noise, &mut Lcg::new(1)).map
    }

    #[test]
    fn init_yields_spawns_and_mines() {
        let noise = Noise::zeroed(64, 64);
        let init = map_init(&noise, &mut Lcg::new(42));
        assert_eq!(init.player_spawns.len(), 4);
        assert!(!init.goldmine_cells.is_empty());
        for spawn in &init.player_spawns {
            assert!(init.map.is_cell_rect_flat(*spawn, SPAWN_SIZE));
        }
    }

    #[test]
    fn occupancy_respects_ignore_rect() {
        let mut map = flat_map();
        map.set_cell_rect(
            CellLayer::Ground,
            IVec2::new(5, 5),
            1,
            Cell {
                kind: CellKind::Unit,
                id: 3,
            },
        );
        assert!(map.is_cell_rect_occupied(IVec2::new(5, 5), 1, IVec2::NONE, true));
        assert!(!map.is_cell_rect_occupied(IVec2::new(5, 5), 1, IVec2::new(5, 5), true));
    }

    #[test]
    fn decorations_block_only_when_included() {
        let mut map = flat_map();
        let cell = IVec2::new(8, 8);
        let index = (cell.y * map.width + cell.x) as usize;
        map.cells[CellLayer::Ground as usize][index] = Cell {
            kind: CellKind::Decoration(2),
            id: ID_NULL,
        };
        assert!(map.is_cell_rect_occupied(cell, 1, IVec2::NONE, true));
        assert!(!map.is_cell_rect_occupied(cell, 1, IVec2::NONE, false));
    }

    #[test]
    fn miner_cells_block_only_miners() {
        let mut map = flat_map();
        let cell = IVec2::new(9, 9);
        map.set_cell_rect(
            CellLayer::Ground,
            cell,
            1,
            Cell {
                kind: CellKind::Miner,
                id: 7,
            },
        );
        assert!(!map.is_cell_rect_blocked(cell, 1, IVec2::NONE, false));
        assert!(map.is_cell_rect_blocked(cell, 1, IVec2::NONE, true));
    }

    #[test]
    fn nearest_ring_cell_prefers_north_on_ties() {
        let map = flat_map();
        // Source sits exactly on the target, so every ring cell ties on
        // nothing; nearest is measured from the target origin itself.
        let cell = map.nearest_cell_around_rect(
            IVec2::new(10, 10),
            1,
            IVec2::new(10, 10),
            1,
            false,
            IVec2::NONE,
        );
        assert_eq!(cell, IVec2::new(10, 9));
    }

    #[test]
    fn nearest_ring_cell_skips_occupied() {
        let mut map = flat_map();
        map.set_cell_rect(
            CellLayer::Ground,
            IVec2::new(10, 9),
            1,
            Cell {
                kind: CellKind::Building,
                id: 1,
            },
        );
        let cell = map.nearest_cell_around_rect(
            IVec2::new(10, 8),
            1,
            IVec2::new(10, 10),
            1,
            false,
            IVec2::NONE,
        );
        assert_ne!(cell, IVec2::new(10, 9));
        assert_eq!(IVec2::chebyshev_distance(cell, IVec2::new(10, 10)), 1);
    }

    #[test]
    fn rect_equality_check() {
        let mut map = flat_map();
        map.set_cell_rect(
            CellLayer::Ground,
            IVec2::new(3, 3),
            2,
            Cell {
                kind: CellKind::Building,
                id: 12,
            },
        );
        assert!(map.is_cell_rect_equal_to(IVec2::new(3, 3), 2, 12));
        assert!(!map.is_cell_rect_equal_to(IVec2::new(3, 3), 3, 12));
    }
}
