use nalgebra::Point3;
use thiserror::Error;

use crate::engine::parallel::SyncCell;

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum GridError {
    #[error("neighbour grid cell size {cell_size} does not fit 3 cells on every axis")]
    CellTooLarge { cell_size: f64 },
}

/// Uniform cell grid over fractional space with reflected halo cells.
///
/// The box is partitioned into `c_x × c_y × c_z` interior cells plus one halo
/// layer on each face. Halo cells store no particles; an alias table
/// redirects them to their periodic image, so the 3×3×3 neighbourhood of any
/// interior cell can be enumerated with 27 fixed linear offsets and no
/// modular arithmetic in the hot loop.
///
/// The grid works purely in fractional coordinates and is therefore
/// independent of the box matrix; only the cell *counts* (chosen by the
/// packing from the box heights and the interaction range) matter.
#[derive(Debug, Clone)]
pub struct NeighbourGrid {
    cell_counts: [usize; 3],
    dims: [usize; 3],
    alias: Vec<u32>,
    cells: Vec<SyncCell<Vec<usize>>>,
    neighbour_offsets: [isize; 27],
}

impl NeighbourGrid {
    /// Builds a grid for a box with the given heights, with cells no smaller
    /// than `cell_size` along each axis.
    pub fn new(heights: &[f64; 3], cell_size: f64) -> Result<Self, GridError> {
        let mut counts = [0usize; 3];
        for (count, height) in counts.iter_mut().zip(heights) {
            let cells = (height / cell_size).floor();
            if cells < 3.0 {
                return Err(GridError::CellTooLarge { cell_size });
            }
            *count = cells as usize;
        }
        Ok(Self::with_cell_counts(counts))
    }

    /// Builds a grid directly from per-axis interior cell counts.
    ///
    /// Periodic correctness of the reflected halo requires at least 3 cells
    /// per axis; this is the caller's obligation (checked in debug builds).
    pub fn with_cell_counts(cell_counts: [usize; 3]) -> Self {
        debug_assert!(cell_counts.iter().all(|&c| c >= 3));
        let dims = [cell_counts[0] + 2, cell_counts[1] + 2, cell_counts[2] + 2];
        let total = dims[0] * dims[1] * dims[2];
        let mut grid = Self {
            cell_counts,
            dims,
            alias: Vec::with_capacity(total),
            cells: Vec::new(),
            neighbour_offsets: [0; 27],
        };
        grid.cells.resize_with(total, || SyncCell::new(Vec::new()));
        grid.rebuild_alias_table();
        grid.rebuild_neighbour_offsets();
        grid
    }

    pub fn cell_counts(&self) -> [usize; 3] {
        self.cell_counts
    }

    /// Interior cell coordinates (0-based, halo excluded) of a fractional
    /// position. Positions outside [0, 1)³ are a programming error.
    pub fn cell_coordinates(&self, position: &Point3<f64>) -> [usize; 3] {
        let mut coords = [0usize; 3];
        for axis in 0..3 {
            let x = position[axis];
            assert!(
                (0.0..1.0).contains(&x),
                "fractional coordinate {x} outside [0, 1)"
            );
            let count = self.cell_counts[axis];
            coords[axis] = ((x * count as f64) as usize).min(count - 1);
        }
        coords
    }

    /// Linear index (halo included) of the cell containing a position.
    pub fn cell_index(&self, position: &Point3<f64>) -> usize {
        let coords = self.cell_coordinates(position);
        ((coords[2] + 1) * self.dims[1] + coords[1] + 1) * self.dims[0] + coords[0] + 1
    }

    pub fn add(&mut self, idx: usize, position: &Point3<f64>) {
        let cell = self.cell_index(position);
        self.cells[cell].get_mut().push(idx);
    }

    pub fn remove(&mut self, idx: usize, position: &Point3<f64>) {
        let cell = self.cell_index(position);
        let bucket = self.cells[cell].get_mut();
        if let Some(found) = bucket.iter().position(|&p| p == idx) {
            bucket.swap_remove(found);
        } else {
            debug_assert!(false, "particle {idx} not present in its cell");
        }
    }

    /// Shared-access twin of [`add`](Self::add), used by the domain-parallel
    /// sweep with an already computed cell index.
    ///
    /// # Safety
    ///
    /// The caller must hold logical exclusivity over this cell (single-thread
    /// use or the domain-decomposition protocol).
    pub(crate) unsafe fn add_to_cell(&self, cell: usize, idx: usize) {
        (*self.cells[cell].get()).push(idx);
    }

    /// Shared-access twin of [`remove`](Self::remove).
    ///
    /// # Safety
    ///
    /// Same contract as [`add_to_cell`](Self::add_to_cell).
    pub(crate) unsafe fn remove_from_cell(&self, cell: usize, idx: usize) {
        let bucket = &mut *self.cells[cell].get();
        if let Some(found) = bucket.iter().position(|&p| p == idx) {
            bucket.swap_remove(found);
        } else {
            debug_assert!(false, "particle {idx} not present in its cell");
        }
    }

    /// Calls `f` for every particle index in the 27-cell neighbourhood of
    /// `cell`, allocation-free. Each particle appears exactly once.
    pub fn for_each_neighbour(&self, cell: usize, mut f: impl FnMut(usize)) {
        for offset in self.neighbour_offsets {
            let target = (cell as isize + offset) as usize;
            let storage = self.alias[target] as usize;
            // Read-only view; exclusivity per the shared-access contract.
            let bucket = unsafe { &*self.cells[storage].get() };
            for &idx in bucket {
                f(idx);
            }
        }
    }

    /// Allocating convenience wrapper around
    /// [`for_each_neighbour`](Self::for_each_neighbour).
    pub fn neighbours(&self, position: &Point3<f64>) -> Vec<usize> {
        let mut result = Vec::new();
        self.for_each_neighbour(self.cell_index(position), |idx| result.push(idx));
        result
    }

    /// Recomputes the cell layout for new box heights and clears all buckets;
    /// the caller must re-insert every particle. When the per-axis counts are
    /// unchanged the buckets are only cleared, never re-allocated.
    pub fn resize(&mut self, heights: &[f64; 3], cell_size: f64) -> Result<(), GridError> {
        let mut counts = [0usize; 3];
        for (count, height) in counts.iter_mut().zip(heights) {
            let cells = (height / cell_size).floor();
            if cells < 3.0 {
                return Err(GridError::CellTooLarge { cell_size });
            }
            *count = cells as usize;
        }

        if counts == self.cell_counts {
            self.clear();
            return Ok(());
        }

        self.cell_counts = counts;
        self.dims = [counts[0] + 2, counts[1] + 2, counts[2] + 2];
        let total = self.dims[0] * self.dims[1] * self.dims[2];
        for cell in &mut self.cells {
            cell.get_mut().clear();
        }
        self.cells.resize_with(total, || SyncCell::new(Vec::new()));
        self.rebuild_alias_table();
        self.rebuild_neighbour_offsets();
        Ok(())
    }

    pub fn clear(&mut self) {
        for cell in &mut self.cells {
            cell.get_mut().clear();
        }
    }

    fn rebuild_alias_table(&mut self) {
        let total = self.dims[0] * self.dims[1] * self.dims[2];
        self.alias.clear();
        self.alias.reserve(total);
        for linear in 0..total {
            let mut remainder = linear;
            let mut coords = [0usize; 3];
            for (axis, coord) in coords.iter_mut().enumerate() {
                *coord = remainder % self.dims[axis];
                remainder /= self.dims[axis];
            }
            // halo coordinate 0 aliases the last interior layer, halo c+1
            // aliases the first one
            for (axis, coord) in coords.iter_mut().enumerate() {
                let count = self.cell_counts[axis];
                if *coord == 0 {
                    *coord = count;
                } else if *coord == count + 1 {
                    *coord = 1;
                }
            }
            let storage = (coords[2] * self.dims[1] + coords[1]) * self.dims[0] + coords[0];
            self.alias.push(storage as u32);
        }
    }

    fn rebuild_neighbour_offsets(&mut self) {
        let mut offsets = [0isize; 27];
        let mut next = 0;
        for dz in -1isize..=1 {
            for dy in -1isize..=1 {
                for dx in -1isize..=1 {
                    offsets[next] =
                        (dz * self.dims[1] as isize + dy) * self.dims[0] as isize + dx;
                    next += 1;
                }
            }
        }
        self.neighbour_offsets = offsets;
    }
}
