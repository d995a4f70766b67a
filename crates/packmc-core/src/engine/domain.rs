use nalgebra::{Point3, Vector3};
use thiserror::Error;

use crate::engine::packing::Packing;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DomainError {
    #[error("domain decomposition requires a neighbour grid, but the interaction range does not fit one")]
    NoNeighbourGrid,
    #[error("domain divisions must all be positive")]
    ZeroDivisions,
    #[error("region along axis {axis} spans {cells} neighbour-grid cells; at least 3 are required")]
    RegionTooNarrow { axis: usize, cells: usize },
}

/// Half-open interval on the unit torus.
///
/// `begin == end` denotes the empty interval, except for the whole-axis
/// interval [0, 1) used on undivided axes.
#[derive(Debug, Clone, Copy, PartialEq)]
struct AxisInterval {
    begin: f64,
    end: f64,
}

impl AxisInterval {
    const FULL: Self = Self { begin: 0.0, end: 1.0 };

    fn contains(&self, x: f64) -> bool {
        if self.begin < self.end {
            self.begin <= x && x < self.end
        } else if self.begin > self.end {
            x >= self.begin || x < self.end
        } else {
            false
        }
    }
}

/// The interior sub-region of a decomposition region within which a move
/// cannot affect particles of any other region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveDomain {
    intervals: [AxisInterval; 3],
}

impl ActiveDomain {
    /// Whether a fractional position lies inside the active domain.
    pub fn contains(&self, position: &Point3<f64>) -> bool {
        self.intervals
            .iter()
            .zip(position.iter())
            .all(|(interval, &x)| interval.contains(x))
    }
}

/// Per-sweep partition of the box into `K_x × K_y × K_z` regions.
///
/// Regions are fractional slabs shifted by a random per-sweep origin, with
/// boundaries snapped to neighbour-grid cell boundaries. The snapping is
/// load-bearing: it makes every grid bucket belong to exactly one region, so
/// the concurrent region workers of a cycle touch disjoint buckets. Each
/// particle is bucketed into exactly one region through its grid cell; the
/// active domain contracts each divided axis by one grid cell (≥ the
/// interaction range) on both faces.
#[derive(Debug)]
pub struct DomainDecomposition {
    divisions: [usize; 3],
    active: Vec<ActiveDomain>,
    buckets: Vec<Vec<usize>>,
}

impl DomainDecomposition {
    pub fn new(
        packing: &Packing,
        divisions: [usize; 3],
        origin: &Vector3<f64>,
    ) -> Result<Self, DomainError> {
        if divisions.contains(&0) {
            return Err(DomainError::ZeroDivisions);
        }
        let cell_counts = packing
            .neighbour_grid_cell_counts()
            .ok_or(DomainError::NoNeighbourGrid)?;

        let mut axis_intervals: [Vec<AxisInterval>; 3] = Default::default();
        let mut cell_region: [Vec<usize>; 3] = Default::default();
        for axis in 0..3 {
            let (intervals, regions) =
                Self::divide_axis(axis, cell_counts[axis], divisions[axis], origin[axis])?;
            axis_intervals[axis] = intervals;
            cell_region[axis] = regions;
        }

        let num_domains = divisions[0] * divisions[1] * divisions[2];
        let mut active = Vec::with_capacity(num_domains);
        for ix in 0..divisions[0] {
            for iy in 0..divisions[1] {
                for iz in 0..divisions[2] {
                    active.push(ActiveDomain {
                        intervals: [
                            axis_intervals[0][ix],
                            axis_intervals[1][iy],
                            axis_intervals[2][iz],
                        ],
                    });
                }
            }
        }

        let mut buckets = vec![Vec::new(); num_domains];
        for idx in 0..packing.len() {
            let position = *packing.shape(idx).position();
            let mut flat = 0;
            for axis in 0..3 {
                let count = cell_counts[axis];
                let cell = ((position[axis] * count as f64) as usize).min(count - 1);
                flat = flat * divisions[axis] + cell_region[axis][cell];
            }
            buckets[flat].push(idx);
        }

        Ok(Self {
            divisions,
            active,
            buckets,
        })
    }

    /// Splits one axis into `k` regions and returns, per region, the active
    /// interval, together with the cell-to-region lookup.
    fn divide_axis(
        axis: usize,
        cells: usize,
        k: usize,
        origin: f64,
    ) -> Result<(Vec<AxisInterval>, Vec<usize>), DomainError> {
        if k == 1 {
            return Ok((vec![AxisInterval::FULL], vec![0; cells]));
        }

        let mut boundaries = Vec::with_capacity(k);
        for region in 0..k {
            let fraction = region as f64 / k as f64 + origin;
            boundaries.push(((fraction * cells as f64).round() as usize) % cells);
        }

        let mut intervals = Vec::with_capacity(k);
        let mut cell_region = vec![0usize; cells];
        for region in 0..k {
            let begin = boundaries[region];
            let end = boundaries[(region + 1) % k];
            let width = (end + cells - begin) % cells;
            // one cell is shaved off each face below, so a 2-cell region
            // would leave an always-empty active interval
            if width < 3 {
                return Err(DomainError::RegionTooNarrow { axis, cells: width });
            }
            for offset in 0..width {
                cell_region[(begin + offset) % cells] = region;
            }
            intervals.push(AxisInterval {
                begin: ((begin + 1) % cells) as f64 / cells as f64,
                end: ((end + cells - 1) % cells) as f64 / cells as f64,
            });
        }
        Ok((intervals, cell_region))
    }

    pub fn num_domains(&self) -> usize {
        self.divisions[0] * self.divisions[1] * self.divisions[2]
    }

    pub fn divisions(&self) -> [usize; 3] {
        self.divisions
    }

    /// Indices of the particles bucketed into the region with the given
    /// flattened index.
    pub fn particles_in_region(&self, flat_index: usize) -> &[usize] {
        &self.buckets[flat_index]
    }

    pub fn active_domain(&self, flat_index: usize) -> &ActiveDomain {
        &self.active[flat_index]
    }
}
