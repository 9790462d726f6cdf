//! Uniform spatial grid for short-range repulsion.
//!
//! Particles are bucketed into square cells of the repulsion cut-off
//! distance, so any pair closer than the cut-off lies in the same or in an
//! adjacent cell. Each cell is paired with itself and four forward
//! neighbours, which visits every adjacent cell pair exactly once.
//!
//! Buckets are kept as a sorted list rather than a hash map: iteration order
//! must not depend on hashing, or the force sums would differ from run to
//! run. Buffers are reused across rebuilds.

use phylo_force_core::Vec2;

type CellKey = (i32, i32);

const FORWARD_NEIGHBOURS: [CellKey; 4] = [(1, 0), (1, 1), (0, 1), (-1, 1)];

#[derive(Debug, Clone, Copy)]
struct CellSpan {
    key: CellKey,
    start: usize,
    end: usize,
}

#[derive(Debug, Clone)]
pub struct SpatialGrid {
    cell_size: f32,
    entries: Vec<(CellKey, u32)>,
    cells: Vec<CellSpan>,
}

impl SpatialGrid {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size: cell_size.max(f32::EPSILON),
            entries: Vec::new(),
            cells: Vec::new(),
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn set_cell_size(&mut self, cell_size: f32) {
        self.cell_size = cell_size.max(f32::EPSILON);
    }

    /// Number of occupied cells after the last rebuild.
    pub fn occupied_cells(&self) -> usize {
        self.cells.len()
    }

    fn key_of(&self, p: Vec2) -> CellKey {
        // `as` saturates and maps NaN to 0.
        (
            (p.x / self.cell_size).floor() as i32,
            (p.y / self.cell_size).floor() as i32,
        )
    }

    pub fn rebuild(&mut self, positions: &[Vec2]) {
        self.entries.clear();
        self.cells.clear();
        for (i, &p) in positions.iter().enumerate() {
            let key = self.key_of(p);
            self.entries.push((key, i as u32));
        }
        self.entries.sort_unstable();

        let mut start = 0;
        while start < self.entries.len() {
            let key = self.entries[start].0;
            let mut end = start + 1;
            while end < self.entries.len() && self.entries[end].0 == key {
                end += 1;
            }
            self.cells.push(CellSpan { key, start, end });
            start = end;
        }
    }

    fn find(&self, key: CellKey) -> Option<&CellSpan> {
        self.cells
            .binary_search_by(|cell| cell.key.cmp(&key))
            .ok()
            .map(|i| &self.cells[i])
    }

    /// Calls `f` once for every pair of particles in the same or adjacent cells.
    pub fn for_each_pair<F: FnMut(usize, usize)>(&self, mut f: F) {
        for cell in &self.cells {
            let members = &self.entries[cell.start..cell.end];
            for (k, &(_, a)) in members.iter().enumerate() {
                for &(_, b) in &members[k + 1..] {
                    f(a as usize, b as usize);
                }
            }

            for (dx, dy) in FORWARD_NEIGHBOURS {
                // Saturated keys have no neighbour past the edge.
                let (Some(x), Some(y)) = (cell.key.0.checked_add(dx), cell.key.1.checked_add(dy))
                else {
                    continue;
                };
                let Some(other) = self.find((x, y)) else {
                    continue;
                };
                let neighbours = &self.entries[other.start..other.end];
                for &(_, a) in members {
                    for &(_, b) in neighbours {
                        f(a as usize, b as usize);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn pairs(grid: &SpatialGrid) -> BTreeSet<(usize, usize)> {
        let mut out = BTreeSet::new();
        grid.for_each_pair(|a, b| {
            assert!(out.insert((a.min(b), a.max(b))), "pair visited twice");
        });
        out
    }

    #[test]
    fn test_close_pairs_are_all_visited() {
        let positions: Vec<Vec2> = (0..40)
            .map(|i| Vec2::new((i * 37 % 23) as f32 * 3.0, (i * 11 % 17) as f32 * 3.0))
            .collect();
        let mut grid = SpatialGrid::new(10.0);
        grid.rebuild(&positions);
        let visited = pairs(&grid);

        for i in 0..positions.len() {
            for j in (i + 1)..positions.len() {
                if (positions[i] - positions[j]).length() < 10.0 {
                    assert!(visited.contains(&(i, j)), "missed close pair {i} {j}");
                }
            }
        }
    }

    #[test]
    fn test_far_cells_are_not_paired() {
        let mut grid = SpatialGrid::new(1.0);
        grid.rebuild(&[Vec2::new(0.0, 0.0), Vec2::new(5.0, 5.0)]);
        assert_eq!(grid.occupied_cells(), 2);
        assert!(pairs(&grid).is_empty());
    }

    #[test]
    fn test_negative_coordinates() {
        let mut grid = SpatialGrid::new(1.0);
        grid.rebuild(&[Vec2::new(-0.5, -0.5), Vec2::new(0.5, 0.5), Vec2::new(0.5, -0.5)]);
        assert_eq!(pairs(&grid).len(), 3);
    }

    #[test]
    fn test_far_away_particles_do_not_overflow_keys() {
        let mut grid = SpatialGrid::new(1.0);
        grid.rebuild(&[
            Vec2::new(1e12, 1e12),
            Vec2::new(1e12 + 0.5, 1e12),
            Vec2::new(-1e12, -1e12),
            Vec2::new(0.0, 1e12),
            Vec2::new(1e12, -1e12),
        ]);
        // Everything past the i32 range lands in the edge cells.
        let visited = pairs(&grid);
        assert!(visited.contains(&(0, 1)));
        assert!(!visited.contains(&(0, 2)));
    }
}
