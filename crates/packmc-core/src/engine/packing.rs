use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use itertools::Itertools;
use nalgebra::{Matrix3, Point3, Rotation3, Vector3};
use thiserror::Error;
use tracing::debug;

use crate::core::boundary::BoundaryConditions;
use crate::core::interaction::Interaction;
use crate::core::shape::{fold_fractional, Shape};
use crate::core::triclinic::{BoxError, TriclinicBox};
use crate::engine::domain::ActiveDomain;
use crate::engine::neighbour_grid::NeighbourGrid;
use crate::engine::parallel::SyncCell;
use crate::engine::snapshot::{PackingSnapshot, ParticleState};

#[derive(Debug, Error)]
pub enum PackingError {
    #[error("packing must contain at least one shape")]
    Empty,
    #[error("interaction range radius must be positive and finite, got {0}")]
    InvalidRange(f64),
    #[error(transparent)]
    Box(#[from] BoxError),
    #[error("snapshot holds {found} particles, packing holds {expected}")]
    SnapshotMismatch { expected: usize, found: usize },
}

/// Outcome of a single-particle trial.
///
/// `Rejected` is the infinite-ΔE sentinel: the move violated its active
/// domain, or created a hard overlap in an overlap-free packing. A
/// `Candidate` has finite soft energy and overlap-count changes; the driver
/// decides, then either commits it with [`Packing::accept_move`] or simply
/// drops it; trials never mutate the packing.
#[derive(Debug)]
pub enum TrialResult {
    Rejected,
    Candidate(TrialMove),
}

/// The undo-free pending record of a trial: the would-be new particle state
/// together with the energy and overlap deltas it was scored with.
#[derive(Debug, Clone)]
pub struct TrialMove {
    particle: usize,
    new_shape: Shape,
    energy_delta: f64,
    overlap_delta: i64,
}

impl TrialMove {
    pub fn particle(&self) -> usize {
        self.particle
    }

    /// Soft-part energy change of the move.
    pub fn energy_delta(&self) -> f64 {
        self.energy_delta
    }

    /// Change in the number of overlapping pairs.
    pub fn overlap_delta(&self) -> i64 {
        self.overlap_delta
    }
}

/// Result of a box-scaling trial; the scaling is already applied and must be
/// resolved with [`Packing::accept_scaling`] or [`Packing::revert_scaling`].
#[derive(Debug, Clone, Copy)]
pub struct ScalingTrial {
    pub energy_delta: f64,
    pub overlap_delta: i64,
}

struct ScalingUndo {
    bx: TriclinicBox,
    grid: GridUndo,
    overlap_count: i64,
}

/// The grid lives in fractional space, so a scaling move only touches it
/// when the cell counts change; otherwise layout and contents carry over
/// untouched.
enum GridUndo {
    Unchanged,
    Replaced(Option<NeighbourGrid>),
}

/// N shapes in a periodic triclinic box, with the machinery that makes trial
/// moves O(neighbours): a neighbour grid, a cached count of overlapping
/// pairs, and per-particle interaction centres.
///
/// The grid is optional. When the interaction range does not admit three
/// cells per axis (small or strongly compressed boxes), pair enumeration
/// falls back to all pairs; domain decomposition then refuses to construct.
///
/// # Invariants
///
/// Outside an unresolved scaling trial: every fractional position lies in
/// [0, 1)³; the grid holds exactly the indices 0..N, each in the cell of its
/// position; `overlap_count` equals the number of unordered overlapping
/// pairs under the current state.
pub struct Packing {
    shapes: Vec<SyncCell<Shape>>,
    bx: TriclinicBox,
    bc: Box<dyn BoundaryConditions>,
    grid: Option<NeighbourGrid>,
    overlap_count: AtomicI64,
    centres: Vec<Vector3<f64>>,
    total_range: f64,
    scaling_undo: Option<ScalingUndo>,
    grid_rebuilds: u64,
    neighbour_queries: AtomicU64,
    neighbours_seen: AtomicU64,
}

impl Packing {
    /// Assembles a packing and computes its initial overlap count.
    ///
    /// Positions are folded into the fundamental cell. Overlapping initial
    /// configurations are legal; they are what the overlap-relaxation mode
    /// exists for.
    pub fn new(
        bx: TriclinicBox,
        shapes: Vec<Shape>,
        mut bc: Box<dyn BoundaryConditions>,
        interaction: &dyn Interaction,
    ) -> Result<Self, PackingError> {
        if shapes.is_empty() {
            return Err(PackingError::Empty);
        }
        let total_range = interaction.total_range_radius();
        if !total_range.is_finite() || total_range <= 0.0 {
            return Err(PackingError::InvalidRange(total_range));
        }
        bc.set_box(&bx);

        let shapes = shapes
            .into_iter()
            .map(|s| SyncCell::new(Shape::new(fold_fractional(s.position()), *s.orientation())))
            .collect();

        let mut packing = Self {
            shapes,
            bx,
            bc,
            grid: None,
            overlap_count: AtomicI64::new(0),
            centres: interaction.interaction_centres(),
            total_range,
            scaling_undo: None,
            grid_rebuilds: 0,
            neighbour_queries: AtomicU64::new(0),
            neighbours_seen: AtomicU64::new(0),
        };
        let counts = packing.desired_cell_counts();
        packing.install_grid(counts);
        packing.grid_rebuilds = 0;
        let overlaps = packing.count_overlap_pairs(interaction, false);
        packing.overlap_count.store(overlaps, Ordering::Relaxed);
        debug!(
            particles = packing.len(),
            overlaps,
            grid = ?packing.neighbour_grid_cell_counts(),
            "packing assembled"
        );
        Ok(packing)
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Copies out the state of one particle.
    pub fn shape(&self, idx: usize) -> Shape {
        *self.shape_ref(idx)
    }

    pub fn triclinic_box(&self) -> &TriclinicBox {
        &self.bx
    }

    pub fn volume(&self) -> f64 {
        self.bx.volume()
    }

    /// Number density N / V.
    pub fn number_density(&self) -> f64 {
        self.len() as f64 / self.volume()
    }

    /// Cached number of unordered overlapping pairs.
    pub fn overlap_count(&self) -> usize {
        self.overlap_count.load(Ordering::Relaxed).max(0) as usize
    }

    pub fn neighbour_grid_cell_counts(&self) -> Option<[usize; 3]> {
        self.grid.as_ref().map(|g| g.cell_counts())
    }

    /// Proposes a translation by `delta` (absolute units) of particle `idx`.
    pub fn try_translation(
        &self,
        idx: usize,
        delta: &Vector3<f64>,
        interaction: &dyn Interaction,
        active: Option<&ActiveDomain>,
    ) -> TrialResult {
        self.try_move(idx, delta, &Rotation3::identity(), interaction, active)
    }

    /// Proposes replacing the orientation of `idx` with `rotation · R_idx`.
    pub fn try_rotation(
        &self,
        idx: usize,
        rotation: &Rotation3<f64>,
        interaction: &dyn Interaction,
    ) -> TrialResult {
        self.try_move(idx, &Vector3::zeros(), rotation, interaction, None)
    }

    /// Proposes a combined translation and rotation; cheaper than two trials.
    ///
    /// With an active domain, the move is rejected outright unless the
    /// particle starts *and* ends inside it: margin particles are frozen for
    /// the sweep, which is what keeps every neighbour query of the parallel
    /// phase inside its own region.
    pub fn try_move(
        &self,
        idx: usize,
        delta: &Vector3<f64>,
        rotation: &Rotation3<f64>,
        interaction: &dyn Interaction,
        active: Option<&ActiveDomain>,
    ) -> TrialResult {
        debug_assert!(idx < self.len());
        let old = *self.shape_ref(idx);
        if let Some(domain) = active {
            if !domain.contains(old.position()) {
                return TrialResult::Rejected;
            }
        }
        let new_position = fold_fractional(&(old.position() + self.bx.fractional_vector(delta)));
        if let Some(domain) = active {
            if !domain.contains(&new_position) {
                return TrialResult::Rejected;
            }
        }
        let new_shape = Shape::new(new_position, rotation * old.orientation());
        self.evaluate_move(idx, &old, new_shape, interaction)
    }

    fn evaluate_move(
        &self,
        idx: usize,
        old: &Shape,
        new_shape: Shape,
        interaction: &dyn Interaction,
    ) -> TrialResult {
        let hard = interaction.has_hard_part();
        let soft = interaction.has_soft_part();
        let overlap_free = self.overlap_count.load(Ordering::Relaxed) == 0;

        // Scan the new neighbourhood first: in the overlap-free fast path a
        // hard overlap rejects before the old neighbourhood is ever touched.
        let mut new_overlaps = 0i64;
        let mut new_energy = 0.0;
        let mut rejected = false;
        self.for_each_candidate(new_shape.position(), |j| {
            if j == idx || rejected {
                return;
            }
            let other = self.shape_ref(j);
            if hard && self.pair_overlaps(&new_shape, other, interaction) {
                if overlap_free {
                    rejected = true;
                    return;
                }
                new_overlaps += 1;
            }
            if soft {
                new_energy += self.pair_energy(&new_shape, other, interaction);
            }
        });
        if rejected {
            return TrialResult::Rejected;
        }

        let mut old_overlaps = 0i64;
        let mut old_energy = 0.0;
        let count_old_overlaps = hard && !overlap_free;
        if count_old_overlaps || soft {
            self.for_each_candidate(old.position(), |j| {
                if j == idx {
                    return;
                }
                let other = self.shape_ref(j);
                if count_old_overlaps && self.pair_overlaps(old, other, interaction) {
                    old_overlaps += 1;
                }
                if soft {
                    old_energy += self.pair_energy(old, other, interaction);
                }
            });
        }

        TrialResult::Candidate(TrialMove {
            particle: idx,
            new_shape,
            energy_delta: new_energy - old_energy,
            overlap_delta: new_overlaps - old_overlaps,
        })
    }

    /// Commits a candidate move: writes the particle, moves its grid cell
    /// membership, and applies the overlap-count delta.
    pub fn accept_move(&mut self, mv: &TrialMove) {
        // Exclusive access makes the shared twin trivially sound.
        unsafe { self.accept_move_shared(mv) }
    }

    /// Shared-access twin of [`accept_move`](Self::accept_move), used by the
    /// domain-parallel sweep.
    ///
    /// # Safety
    ///
    /// The caller must hold logical exclusivity over this particle and the
    /// grid cells of its old and new positions: single-threaded use, or the
    /// domain-decomposition protocol (the move was gated on the active
    /// domain of the calling worker's region).
    pub(crate) unsafe fn accept_move_shared(&self, mv: &TrialMove) {
        let shape = &mut *self.shapes[mv.particle].get();
        if let Some(grid) = &self.grid {
            let old_cell = grid.cell_index(shape.position());
            let new_cell = grid.cell_index(mv.new_shape.position());
            if old_cell != new_cell {
                grid.remove_from_cell(old_cell, mv.particle);
                grid.add_to_cell(new_cell, mv.particle);
            }
        }
        *shape = mv.new_shape;
        self.overlap_count
            .fetch_add(mv.overlap_delta, Ordering::Relaxed);
    }

    /// Applies a multiplicative box update, preserving fractional positions.
    ///
    /// The previous box, grid (layout *and* contents) and overlap count are
    /// kept in an undo record; exactly one of
    /// [`accept_scaling`](Self::accept_scaling) /
    /// [`revert_scaling`](Self::revert_scaling) must follow before the next
    /// scaling trial.
    pub fn try_scaling(
        &mut self,
        multiplier: &Matrix3<f64>,
        interaction: &dyn Interaction,
    ) -> Result<ScalingTrial, PackingError> {
        debug_assert!(
            self.scaling_undo.is_none(),
            "unresolved scaling trial pending"
        );
        let soft = interaction.has_soft_part();
        let old_count = self.overlap_count.load(Ordering::Relaxed);
        let old_energy = if soft {
            self.compute_total_energy(interaction)
        } else {
            0.0
        };

        let new_box = self.bx.transformed(multiplier)?;
        let old_box = std::mem::replace(&mut self.bx, new_box);
        self.bc.set_box(&self.bx);
        let new_counts = self.desired_cell_counts();
        let grid_undo = if new_counts == self.neighbour_grid_cell_counts() {
            GridUndo::Unchanged
        } else {
            let old_grid = self.grid.take();
            self.install_grid(new_counts);
            GridUndo::Replaced(old_grid)
        };

        let new_count = self.count_overlap_pairs(interaction, old_count == 0);
        let new_energy = if soft {
            self.compute_total_energy(interaction)
        } else {
            0.0
        };
        self.overlap_count.store(new_count, Ordering::Relaxed);
        self.scaling_undo = Some(ScalingUndo {
            bx: old_box,
            grid: grid_undo,
            overlap_count: old_count,
        });

        Ok(ScalingTrial {
            energy_delta: new_energy - old_energy,
            overlap_delta: new_count - old_count,
        })
    }

    /// Restores the box, the neighbour grid (exact layout and contents) and
    /// the overlap count of the state before the pending scaling trial.
    pub fn revert_scaling(&mut self) {
        let undo = self
            .scaling_undo
            .take()
            .expect("no scaling trial to revert");
        self.bx = undo.bx;
        self.bc.set_box(&self.bx);
        if let GridUndo::Replaced(grid) = undo.grid {
            self.grid = grid;
        }
        self.overlap_count
            .store(undo.overlap_count, Ordering::Relaxed);
    }

    /// Discards the undo record of the pending scaling trial.
    pub fn accept_scaling(&mut self) {
        self.scaling_undo = None;
    }

    /// Recomputes the total soft energy from scratch.
    pub fn compute_total_energy(&self, interaction: &dyn Interaction) -> f64 {
        if !interaction.has_soft_part() {
            return 0.0;
        }
        let mut energy = 0.0;
        self.for_each_pair(|i, j| {
            energy += self.pair_energy(self.shape_ref(i), self.shape_ref(j), interaction);
            false
        });
        energy
    }

    /// Counts overlapping pairs from scratch (the N²-or-grid scan that the
    /// cached counter replaces in the hot path).
    pub fn count_overlaps(&self, interaction: &dyn Interaction) -> usize {
        self.count_overlap_pairs(interaction, false).max(0) as usize
    }

    fn count_overlap_pairs(&self, interaction: &dyn Interaction, stop_at_first: bool) -> i64 {
        if !interaction.has_hard_part() {
            return 0;
        }
        let mut count = 0i64;
        self.for_each_pair(|i, j| {
            if self.pair_overlaps(self.shape_ref(i), self.shape_ref(j), interaction) {
                count += 1;
                if stop_at_first {
                    return true;
                }
            }
            false
        });
        count
    }

    /// Calls `visit` on every unordered pair that can possibly interact;
    /// stops early when `visit` returns true.
    fn for_each_pair(&self, mut visit: impl FnMut(usize, usize) -> bool) {
        match &self.grid {
            Some(grid) => {
                let mut stop = false;
                for i in 0..self.len() {
                    if stop {
                        break;
                    }
                    let cell = grid.cell_index(self.shape_ref(i).position());
                    grid.for_each_neighbour(cell, |j| {
                        if j > i && !stop {
                            stop = visit(i, j);
                        }
                    });
                }
            }
            None => {
                for (i, j) in (0..self.len()).tuple_combinations() {
                    if visit(i, j) {
                        break;
                    }
                }
            }
        }
    }

    fn for_each_candidate(&self, position: &Point3<f64>, mut f: impl FnMut(usize)) {
        let mut seen = 0u64;
        match &self.grid {
            Some(grid) => grid.for_each_neighbour(grid.cell_index(position), |j| {
                seen += 1;
                f(j);
            }),
            None => {
                for j in 0..self.len() {
                    seen += 1;
                    f(j);
                }
            }
        }
        self.neighbour_queries.fetch_add(1, Ordering::Relaxed);
        self.neighbours_seen.fetch_add(seen, Ordering::Relaxed);
    }

    fn pair_overlaps(&self, a: &Shape, b: &Shape, interaction: &dyn Interaction) -> bool {
        let pos_a = self.bx.to_absolute(a.position());
        let pos_b = self.bx.to_absolute(b.position());
        if self.bc.distance2(&pos_a, &pos_b) > self.total_range * self.total_range {
            return false;
        }
        if self.centres.is_empty() {
            return interaction.overlap_between(
                &pos_a,
                a.orientation(),
                0,
                &pos_b,
                b.orientation(),
                0,
                &*self.bc,
            );
        }
        for (idx_a, centre_a) in self.centres.iter().enumerate() {
            let centre_pos_a = pos_a + a.orientation() * centre_a;
            for (idx_b, centre_b) in self.centres.iter().enumerate() {
                let centre_pos_b = pos_b + b.orientation() * centre_b;
                if interaction.overlap_between(
                    &centre_pos_a,
                    a.orientation(),
                    idx_a,
                    &centre_pos_b,
                    b.orientation(),
                    idx_b,
                    &*self.bc,
                ) {
                    return true;
                }
            }
        }
        false
    }

    fn pair_energy(&self, a: &Shape, b: &Shape, interaction: &dyn Interaction) -> f64 {
        let pos_a = self.bx.to_absolute(a.position());
        let pos_b = self.bx.to_absolute(b.position());
        if self.bc.distance2(&pos_a, &pos_b) > self.total_range * self.total_range {
            return 0.0;
        }
        if self.centres.is_empty() {
            return interaction.energy_between(
                &pos_a,
                a.orientation(),
                0,
                &pos_b,
                b.orientation(),
                0,
                &*self.bc,
            );
        }
        let mut energy = 0.0;
        for (idx_a, centre_a) in self.centres.iter().enumerate() {
            let centre_pos_a = pos_a + a.orientation() * centre_a;
            for (idx_b, centre_b) in self.centres.iter().enumerate() {
                let centre_pos_b = pos_b + b.orientation() * centre_b;
                energy += interaction.energy_between(
                    &centre_pos_a,
                    a.orientation(),
                    idx_a,
                    &centre_pos_b,
                    b.orientation(),
                    idx_b,
                    &*self.bc,
                );
            }
        }
        energy
    }

    /// Picks the grid cell counts for the current box: ⌊height / range⌋ per
    /// axis, capped so a small system does not pay for millions of empty
    /// cells, and `None` (all-pairs fallback) below 3 cells on any axis.
    fn desired_cell_counts(&self) -> Option<[usize; 3]> {
        let cap = ((4 * self.len()) as f64).cbrt().ceil().max(3.0) as usize;
        let heights = self.bx.heights();
        let mut counts = [0usize; 3];
        for axis in 0..3 {
            let cells = (heights[axis] / self.total_range).floor();
            if cells < 3.0 {
                return None;
            }
            counts[axis] = (cells as usize).min(cap);
        }
        Some(counts)
    }

    fn install_grid(&mut self, counts: Option<[usize; 3]>) {
        self.grid = counts.map(NeighbourGrid::with_cell_counts);
        if let Some(grid) = self.grid.as_mut() {
            for (idx, slot) in self.shapes.iter().enumerate() {
                // iteration holds no other reference into the slot
                grid.add(idx, unsafe { (*slot.get()).position() });
            }
        }
        self.grid_rebuilds += 1;
    }

    /// Number of neighbour-grid rebuilds since the last counter reset.
    pub fn neighbour_grid_rebuilds(&self) -> u64 {
        self.grid_rebuilds
    }

    /// Mean number of particles enumerated per neighbour query.
    pub fn average_number_of_neighbours(&self) -> f64 {
        let queries = self.neighbour_queries.load(Ordering::Relaxed);
        if queries == 0 {
            return 0.0;
        }
        self.neighbours_seen.load(Ordering::Relaxed) as f64 / queries as f64
    }

    pub fn reset_counters(&mut self) {
        self.grid_rebuilds = 0;
        self.neighbour_queries.store(0, Ordering::Relaxed);
        self.neighbours_seen.store(0, Ordering::Relaxed);
    }

    /// Captures positions, orientations and the box; auxiliary entries are
    /// the driver's to add.
    pub fn snapshot(&self) -> PackingSnapshot {
        PackingSnapshot {
            box_matrix: *self.bx.matrix(),
            particles: (0..self.len())
                .map(|i| {
                    let shape = self.shape_ref(i);
                    ParticleState {
                        position: *shape.position(),
                        orientation: *shape.orientation().matrix(),
                    }
                })
                .collect(),
            aux: Default::default(),
        }
    }

    /// Reinstates a snapshot: box, particle states, grid and overlap count.
    pub fn restore(
        &mut self,
        snapshot: &PackingSnapshot,
        interaction: &dyn Interaction,
    ) -> Result<(), PackingError> {
        if snapshot.particles.len() != self.len() {
            return Err(PackingError::SnapshotMismatch {
                expected: self.len(),
                found: snapshot.particles.len(),
            });
        }
        let bx = TriclinicBox::from_matrix(snapshot.box_matrix)?;
        self.bx = bx;
        self.bc.set_box(&self.bx);
        for (slot, state) in self.shapes.iter_mut().zip(&snapshot.particles) {
            *slot.get_mut() = Shape::new(
                fold_fractional(&state.position),
                Rotation3::from_matrix_unchecked(state.orientation),
            );
        }
        self.scaling_undo = None;
        let counts = self.desired_cell_counts();
        self.install_grid(counts);
        let overlaps = self.count_overlap_pairs(interaction, false);
        self.overlap_count.store(overlaps, Ordering::Relaxed);
        Ok(())
    }

    fn shape_ref(&self, idx: usize) -> &Shape {
        // Read-only view; exclusivity per the shared-access contract of the
        // domain-parallel sweep.
        unsafe { &*self.shapes[idx].get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::boundary::PeriodicBoundaryConditions;
    use crate::shapes::central::LennardJonesInteraction;
    use crate::shapes::sphere::SphereTraits;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn periodic(bx: &TriclinicBox) -> Box<dyn BoundaryConditions> {
        Box::new(PeriodicBoundaryConditions::new(bx))
    }

    fn pair_packing(positions: [[f64; 3]; 2], interaction: &dyn Interaction) -> Packing {
        let bx = TriclinicBox::cubic(10.0).unwrap();
        let shapes = positions
            .iter()
            .map(|p| Shape::at(Point3::new(p[0], p[1], p[2])))
            .collect();
        Packing::new(bx, shapes, periodic(&bx), interaction).unwrap()
    }

    #[test]
    fn construction_counts_initial_overlaps() {
        let traits = SphereTraits::hard(0.5);
        let apart = pair_packing([[0.1, 0.5, 0.5], [0.5, 0.5, 0.5]], &traits);
        assert_eq!(apart.overlap_count(), 0);
        let touching = pair_packing([[0.1, 0.5, 0.5], [0.15, 0.5, 0.5]], &traits);
        assert_eq!(touching.overlap_count(), 1);
        assert_eq!(touching.count_overlaps(&traits), 1);
    }

    #[test]
    fn overlapping_translation_is_rejected_and_leaves_no_trace() {
        let traits = SphereTraits::hard(0.5);
        let packing = pair_packing([[0.1, 0.5, 0.5], [0.5, 0.5, 0.5]], &traits);
        let before = packing.snapshot();
        // moving particle 0 by 3.5 absolute units puts it 0.5 from particle 1
        let result =
            packing.try_translation(0, &Vector3::new(3.5, 0.0, 0.0), &traits, None);
        assert!(matches!(result, TrialResult::Rejected));
        assert_eq!(packing.snapshot(), before);
        assert_eq!(packing.overlap_count(), 0);
    }

    #[test]
    fn candidate_moves_mutate_nothing_until_accepted() {
        let traits = SphereTraits::hard(0.5);
        let packing = pair_packing([[0.1, 0.5, 0.5], [0.5, 0.5, 0.5]], &traits);
        let before = packing.snapshot();
        let result = packing.try_translation(0, &Vector3::new(1.0, 0.0, 0.0), &traits, None);
        let TrialResult::Candidate(mv) = result else {
            panic!("expected a candidate");
        };
        assert_eq!(mv.energy_delta(), 0.0);
        assert_eq!(mv.overlap_delta(), 0);
        // dropping the candidate is the revert
        assert_eq!(packing.snapshot(), before);
    }

    #[test]
    fn accepted_moves_update_particle_grid_and_count() {
        let traits = SphereTraits::hard(0.5);
        let mut packing = pair_packing([[0.1, 0.5, 0.5], [0.5, 0.5, 0.5]], &traits);
        let TrialResult::Candidate(mv) =
            packing.try_translation(0, &Vector3::new(1.0, 0.0, 0.0), &traits, None)
        else {
            panic!("expected a candidate");
        };
        packing.accept_move(&mv);
        let moved = packing.shape(0);
        assert!((moved.position().x - 0.2).abs() < 1e-12);
        assert_eq!(packing.overlap_count(), packing.count_overlaps(&traits));
    }

    #[test]
    fn full_box_translation_returns_to_the_start() {
        let traits = SphereTraits::hard(0.5);
        let packing = pair_packing([[0.1, 0.5, 0.5], [0.5, 0.5, 0.5]], &traits);
        let before = packing.shape(0);
        let TrialResult::Candidate(mv) =
            packing.try_translation(0, &Vector3::new(10.0, -10.0, 0.0), &traits, None)
        else {
            panic!("expected a candidate");
        };
        assert_eq!(mv.energy_delta(), 0.0);
        assert_eq!(mv.overlap_delta(), 0);
        assert!((mv.new_shape.position() - before.position()).norm() < 1e-12);
    }

    #[test]
    fn lennard_jones_delta_matches_the_potential() {
        let traits = SphereTraits::soft(0.5, Box::new(LennardJonesInteraction::new(1.0, 1.0)));
        let packing = pair_packing([[0.1, 0.5, 0.5], [0.25, 0.5, 0.5]], &traits);
        // particles 1.5 apart; move particle 1 to 1.2 away
        let TrialResult::Candidate(mv) =
            packing.try_translation(1, &Vector3::new(-0.3, 0.0, 0.0), &traits, None)
        else {
            panic!("expected a candidate");
        };
        let expected = crate::core::potentials::lennard_jones(1.2 * 1.2, 1.0, 1.0)
            - crate::core::potentials::lennard_jones(1.5 * 1.5, 1.0, 1.0);
        assert!((mv.energy_delta() - expected).abs() < 1e-12);
        assert_eq!(mv.overlap_delta(), 0);
    }

    #[test]
    fn random_walk_preserves_the_cached_invariants() {
        let traits = SphereTraits::hard(0.5);
        let bx = TriclinicBox::cubic(8.0).unwrap();
        let mut shapes = Vec::new();
        for i in 0..4 {
            for j in 0..4 {
                for k in 0..4 {
                    shapes.push(Shape::at(Point3::new(
                        (i as f64 + 0.5) / 4.0,
                        (j as f64 + 0.5) / 4.0,
                        (k as f64 + 0.5) / 4.0,
                    )));
                }
            }
        }
        let mut packing = Packing::new(bx, shapes, periodic(&bx), &traits).unwrap();
        let mut rng = StdRng::seed_from_u64(31337);
        let mut accepted = 0;
        for _ in 0..2000 {
            let idx = rng.gen_range(0..packing.len());
            let delta = Vector3::new(
                rng.gen_range(-0.8..0.8),
                rng.gen_range(-0.8..0.8),
                rng.gen_range(-0.8..0.8),
            );
            if let TrialResult::Candidate(mv) =
                packing.try_translation(idx, &delta, &traits, None)
            {
                if mv.overlap_delta() <= 0 {
                    packing.accept_move(&mv);
                    accepted += 1;
                }
            }
        }
        assert!(accepted > 0);
        // positions folded, grid membership consistent, cached count exact
        for i in 0..packing.len() {
            let position = packing.shape(i).position().coords;
            assert!(position.iter().all(|&x| (0.0..1.0).contains(&x)));
        }
        assert_eq!(packing.overlap_count(), packing.count_overlaps(&traits));
        // every particle is stored in the grid cell of its own position
        for i in 0..packing.len() {
            let shape = packing.shape(i);
            let mut found = false;
            packing.for_each_candidate(shape.position(), |j| found |= j == i);
            assert!(found, "particle {i} missing from its own neighbourhood");
        }
    }

    #[test]
    fn unit_scaling_changes_nothing_and_reverts_exactly() {
        let traits = SphereTraits::soft(0.5, Box::new(LennardJonesInteraction::new(1.0, 1.0)));
        let mut packing = pair_packing([[0.1, 0.5, 0.5], [0.3, 0.5, 0.5]], &traits);
        let before = packing.snapshot();
        let trial = packing.try_scaling(&Matrix3::identity(), &traits).unwrap();
        assert!(trial.energy_delta.abs() < 1e-9);
        assert_eq!(trial.overlap_delta, 0);
        packing.revert_scaling();
        assert_eq!(packing.snapshot(), before);
    }

    #[test]
    fn scaling_revert_restores_grid_layout_and_contents() {
        let traits = SphereTraits::hard(0.5);
        let mut packing = pair_packing([[0.1, 0.5, 0.5], [0.9, 0.5, 0.5]], &traits);
        let counts_before = packing.neighbour_grid_cell_counts();
        assert!(counts_before.is_some());
        let neighbours_before = {
            let shape = packing.shape(0);
            let mut seen = Vec::new();
            packing.for_each_candidate(shape.position(), |j| seen.push(j));
            seen
        };
        // down to a 2.5-unit box: no grid fits a range-1 interaction
        let multiplier = Matrix3::from_diagonal_element(0.25);
        packing.try_scaling(&multiplier, &traits).unwrap();
        assert_eq!(packing.neighbour_grid_cell_counts(), None);
        packing.revert_scaling();
        assert_eq!(packing.neighbour_grid_cell_counts(), counts_before);
        let shape = packing.shape(0);
        let mut seen = Vec::new();
        packing.for_each_candidate(shape.position(), |j| seen.push(j));
        assert_eq!(seen, neighbours_before);
    }

    #[test]
    fn scaling_within_the_same_cell_counts_leaves_the_grid_alone() {
        let traits = SphereTraits::hard(0.5);
        let mut packing = pair_packing([[0.1, 0.5, 0.5], [0.9, 0.5, 0.5]], &traits);
        let rebuilds_before = packing.neighbour_grid_rebuilds();
        let trial = packing
            .try_scaling(&Matrix3::from_diagonal_element(1.01), &traits)
            .unwrap();
        assert_eq!(trial.overlap_delta, 0);
        packing.accept_scaling();
        assert_eq!(packing.neighbour_grid_rebuilds(), rebuilds_before);
        assert_eq!(packing.overlap_count(), packing.count_overlaps(&traits));
    }

    #[test]
    fn compression_below_three_cells_drops_to_all_pairs() {
        let traits = SphereTraits::hard(0.5);
        let mut packing = pair_packing([[0.1, 0.5, 0.5], [0.6, 0.5, 0.5]], &traits);
        assert!(packing.neighbour_grid_cell_counts().is_some());
        let multiplier = Matrix3::from_diagonal_element(0.25);
        let trial = packing.try_scaling(&multiplier, &traits).unwrap();
        assert!(packing.neighbour_grid_cell_counts().is_none());
        // 2.5-unit box, spheres 1.25 apart: still no overlap
        assert_eq!(trial.overlap_delta, 0);
        packing.accept_scaling();
        assert_eq!(packing.overlap_count(), packing.count_overlaps(&traits));
    }

    #[test]
    fn snapshot_restore_round_trips() {
        let traits = SphereTraits::hard(0.5);
        let mut packing = pair_packing([[0.1, 0.5, 0.5], [0.6, 0.5, 0.5]], &traits);
        let snapshot = packing.snapshot();
        let TrialResult::Candidate(mv) =
            packing.try_translation(0, &Vector3::new(1.0, 1.0, 0.0), &traits, None)
        else {
            panic!("expected a candidate");
        };
        packing.accept_move(&mv);
        assert_ne!(packing.snapshot(), snapshot);
        packing.restore(&snapshot, &traits).unwrap();
        assert_eq!(packing.snapshot(), snapshot);
        assert_eq!(packing.overlap_count(), 0);
    }

    #[test]
    fn mismatched_snapshots_are_refused() {
        let traits = SphereTraits::hard(0.5);
        let mut packing = pair_packing([[0.1, 0.5, 0.5], [0.6, 0.5, 0.5]], &traits);
        let mut snapshot = packing.snapshot();
        snapshot.particles.pop();
        assert!(matches!(
            packing.restore(&snapshot, &traits),
            Err(PackingError::SnapshotMismatch {
                expected: 2,
                found: 1
            })
        ));
    }

    #[test]
    fn empty_packings_are_refused() {
        let bx = TriclinicBox::cubic(10.0).unwrap();
        let traits = SphereTraits::hard(0.5);
        assert!(matches!(
            Packing::new(bx, Vec::new(), periodic(&bx), &traits),
            Err(PackingError::Empty)
        ));
    }
}
