// SPDX-License-Identifier: Apache-2.0
//! A* pathfinding on the 8-connected cell grid.
//!
//! Step cost and heuristic are both Chebyshev distance, so diagonal and
//! cardinal moves cost the same. Ties between equal-f nodes break on
//! insertion order via a `(f, sequence)` min-heap key; that ordering is part
//! of the determinism contract and must match across peers.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rustc_hash::FxHashMap;

use crate::fixed::{IVec2, DIRECTION_IVEC2};
use crate::map::Map;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct OpenNode {
    f: i32,
    sequence: u32,
    cell: IVec2,
}

impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the smallest (f, sequence)
        // surfaces first.
        other
            .f
            .cmp(&self.f)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Find a path from `from` to `to` for an entity of the given footprint.
///
/// The resulting cells exclude the start; an empty path means no route. The
/// origin rect never blocks itself, and `mining` additionally treats miner
/// cells as blocking.
pub fn pathfind(
    map: &Map,
    from: IVec2,
    to: IVec2,
    cell_size: i32,
    mining: bool,
    out_path: &mut Vec<IVec2>,
) {
    out_path.clear();
    if from == to || !map.is_in_bounds(to) {
        return;
    }

    let mut open = BinaryHeap::new();
    let mut g_score: FxHashMap<(i32, i32), i32> = FxHashMap::default();
    let mut came_from: FxHashMap<(i32, i32), IVec2> = FxHashMap::default();
    let mut sequence = 0u32;

    g_score.insert((from.x, from.y), 0);
    open.push(OpenNode {
        f: IVec2::chebyshev_distance(from, to),
        sequence,
        cell: from,
    });

    while let Some(node) = open.pop() {
        let current = node.cell;
        if current == to {
            let mut cell = to;
            while cell != from {
                out_path.push(cell);
                cell = came_from[&(cell.x, cell.y)];
            }
            out_path.reverse();
            return;
        }

        let current_g = g_score[&(current.x, current.y)];
        if node.f - IVec2::chebyshev_distance(current, to) > current_g {
            // Stale heap entry; a cheaper route already expanded this cell.
            continue;
        }

        for step in DIRECTION_IVEC2 {
            let neighbor = current + step;
            if !map.is_in_bounds(neighbor) {
                continue;
            }
            if map.is_cell_rect_blocked(neighbor, cell_size, from, mining) {
                continue;
            }

            let tentative = current_g + 1;
            let entry = g_score.entry((neighbor.x, neighbor.y)).or_insert(i32::MAX);
            if tentative < *entry {
                *entry = tentative;
                came_from.insert((neighbor.x, neighbor.y), current);
                sequence += 1;
                open.push(OpenNode {
                    f: tentative + IVec2::chebyshev_distance(neighbor, to),
                    sequence,
                    cell: neighbor,
                });
            }
        }
    }
    // Open set exhausted without reaching the target: out_path stays empty.
}
