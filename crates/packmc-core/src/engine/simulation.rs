use std::cmp::Ordering as CmpOrdering;
use std::time::Instant;

use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::core::interaction::Interaction;
use crate::engine::counters::{CounterSlot, MoveCounter};
use crate::engine::domain::{ActiveDomain, DomainDecomposition};
use crate::engine::interrupt::InterruptFlag;
use crate::engine::packing::{Packing, PackingError, TrialResult};
use crate::engine::sampling;
use crate::engine::scaler::BoxScaler;
use crate::engine::snapshot::{PackingSnapshot, SnapshotError};
use crate::observables::ObservablesCollector;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("step sizes must be positive (translation {translation}, rotation {rotation}, scaling {scaling})")]
    NonPositiveStepSize {
        translation: f64,
        rotation: f64,
        scaling: f64,
    },
    #[error("temperature must be positive, got {0}")]
    NonPositiveTemperature(f64),
    #[error("pressure must be positive, got {0}")]
    NonPositivePressure(f64),
    #[error("domain divisions must all be positive")]
    ZeroDomainDivisions,
    #[error("{domains} domains requested but only {threads} worker threads are available")]
    TooManyDomains { domains: usize, threads: usize },
    #[error("domain decomposition requires a neighbour grid, but the interaction range does not fit one")]
    NoNeighbourGridForDomains,
    #[error("domain division is incompatible with the neighbour grid: axis {axis} has {cells} cells for {divisions} divisions (at least 3 per region are required)")]
    IncompatibleDivisions {
        axis: usize,
        cells: usize,
        divisions: usize,
    },
    #[error("averaging and snapshot cadences must be positive")]
    InvalidCadence,
    #[error(transparent)]
    Packing(#[from] PackingError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// The Monte Carlo driver.
///
/// Actual moves are scored by [`Packing`]; this type checks the Metropolis
/// criterion, accepts or rejects, adapts step sizes, orchestrates the
/// domain-parallel particle phase, and feeds the observables collector.
///
/// Two runs with the same seed, domain layout and interaction produce
/// identical trajectories: every region owns one RNG seeded from
/// `seed + flat_region_index`, whichever worker thread happens to drive it.
pub struct Simulation {
    packing: Packing,
    temperature: f64,
    pressure: f64,
    translation_step: f64,
    rotation_step: f64,
    scaling_step: f64,
    box_scaler: Box<dyn BoxScaler>,
    domain_divisions: [usize; 3],
    num_domains: usize,
    all_particles: Vec<usize>,
    rngs: Vec<StdRng>,
    move_counter: MoveCounter,
    scaling_counter: MoveCounter,
    move_microseconds: f64,
    scaling_microseconds: f64,
    decomposition_microseconds: f64,
    total_microseconds: f64,
    should_adjust_step_size: bool,
    relaxation_mode: bool,
    performed_cycles: usize,
    total_cycles: usize,
    interrupt: InterruptFlag,
    total_energy: f64,
}

impl Simulation {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        packing: Packing,
        translation_step: f64,
        rotation_step: f64,
        scaling_step: f64,
        seed: u64,
        box_scaler: Box<dyn BoxScaler>,
        domain_divisions: [usize; 3],
        interrupt: InterruptFlag,
    ) -> Result<Self, SimulationError> {
        if translation_step <= 0.0 || rotation_step <= 0.0 || scaling_step <= 0.0 {
            return Err(SimulationError::NonPositiveStepSize {
                translation: translation_step,
                rotation: rotation_step,
                scaling: scaling_step,
            });
        }
        if domain_divisions.contains(&0) {
            return Err(SimulationError::ZeroDomainDivisions);
        }
        let num_domains = domain_divisions.iter().product();
        let threads = rayon::current_num_threads();
        if num_domains > threads {
            return Err(SimulationError::TooManyDomains {
                domains: num_domains,
                threads,
            });
        }
        if num_domains > 1 {
            let cell_counts = packing
                .neighbour_grid_cell_counts()
                .ok_or(SimulationError::NoNeighbourGridForDomains)?;
            // regions contract by one cell per face, so anything under 3
            // cells leaves an empty active domain
            for axis in 0..3 {
                if cell_counts[axis] < 3 * domain_divisions[axis] {
                    return Err(SimulationError::IncompatibleDivisions {
                        axis,
                        cells: cell_counts[axis],
                        divisions: domain_divisions[axis],
                    });
                }
            }
        }

        let rngs = (0..num_domains)
            .map(|i| StdRng::seed_from_u64(seed + i as u64))
            .collect();
        let all_particles = (0..packing.len()).collect();
        Ok(Self {
            packing,
            temperature: 0.0,
            pressure: 0.0,
            translation_step,
            rotation_step,
            scaling_step,
            box_scaler,
            domain_divisions,
            num_domains,
            all_particles,
            rngs,
            move_counter: MoveCounter::new(num_domains),
            scaling_counter: MoveCounter::new(1),
            move_microseconds: 0.0,
            scaling_microseconds: 0.0,
            decomposition_microseconds: 0.0,
            total_microseconds: 0.0,
            should_adjust_step_size: false,
            relaxation_mode: false,
            performed_cycles: 0,
            total_cycles: 0,
            interrupt,
            total_energy: 0.0,
        })
    }

    /// Standard NpT integration: a thermalisation phase with adaptive step
    /// control, then an averaging phase on frozen step sizes.
    #[instrument(skip_all, name = "integrate")]
    #[allow(clippy::too_many_arguments)]
    pub fn integrate(
        &mut self,
        temperature: f64,
        pressure: f64,
        thermalisation_cycles: usize,
        averaging_cycles: usize,
        averaging_every: usize,
        snapshot_every: usize,
        interaction: &dyn Interaction,
        collector: &mut dyn ObservablesCollector,
        cycle_offset: usize,
    ) -> Result<(), SimulationError> {
        if averaging_every == 0 || snapshot_every == 0 {
            return Err(SimulationError::InvalidCadence);
        }
        self.begin_run(temperature, pressure, interaction, collector, cycle_offset)?;
        let run_start = Instant::now();

        self.relaxation_mode = false;
        self.should_adjust_step_size = true;
        info!("starting thermalisation ({thermalisation_cycles} cycles)");
        let mut completed = true;
        for i in 0..thermalisation_cycles {
            if self.interrupt.is_interrupted() {
                warn!("interrupted during thermalisation after {i} cycles");
                completed = false;
                break;
            }
            self.perform_cycle(interaction);
            if (i + 1) % snapshot_every == 0 {
                collector.add_snapshot(&self.packing, self.total_cycles);
            }
            if (i + 1) % 100 == 0 {
                info!(
                    "performed {} cycles; {}",
                    i + 1,
                    collector.generate_inline_observables_string(&self.packing)
                );
            }
        }

        if completed {
            self.should_adjust_step_size = false;
            info!("starting averaging ({averaging_cycles} cycles)");
            for i in 0..averaging_cycles {
                if self.interrupt.is_interrupted() {
                    warn!("interrupted during averaging after {i} cycles");
                    break;
                }
                self.perform_cycle(interaction);
                if (i + 1) % snapshot_every == 0 {
                    collector.add_snapshot(&self.packing, self.total_cycles);
                }
                if (i + 1) % averaging_every == 0 {
                    collector.add_averaging_values(&self.packing);
                }
                if (i + 1) % 100 == 0 {
                    info!(
                        "performed {} cycles; {}",
                        i + 1,
                        collector.generate_inline_observables_string(&self.packing)
                    );
                }
            }
        }

        self.total_microseconds += microseconds_since(run_start);
        Ok(())
    }

    /// Soft-to-hard overlap relaxation: runs until the packing is
    /// overlap-free, accepting every move that strictly decreases the
    /// overlap count and applying the usual Metropolis rule otherwise.
    #[instrument(skip_all, name = "relax_overlaps")]
    pub fn relax_overlaps(
        &mut self,
        temperature: f64,
        pressure: f64,
        snapshot_every: usize,
        interaction: &dyn Interaction,
        collector: &mut dyn ObservablesCollector,
        cycle_offset: usize,
    ) -> Result<(), SimulationError> {
        if snapshot_every == 0 {
            return Err(SimulationError::InvalidCadence);
        }
        self.begin_run(temperature, pressure, interaction, collector, cycle_offset)?;
        let run_start = Instant::now();

        self.relaxation_mode = true;
        self.should_adjust_step_size = true;
        info!(
            "starting overlap relaxation; {} overlapping pairs",
            self.packing.overlap_count()
        );
        let mut i = 0usize;
        while self.packing.overlap_count() > 0 {
            if self.interrupt.is_interrupted() {
                warn!("interrupted during overlap relaxation after {i} cycles");
                break;
            }
            self.perform_cycle(interaction);
            i += 1;
            if i % snapshot_every == 0 {
                collector.add_snapshot(&self.packing, self.total_cycles);
            }
            if i % 100 == 0 {
                info!(
                    "performed {} cycles; {} overlapping pairs; {}",
                    i,
                    self.packing.overlap_count(),
                    collector.generate_inline_observables_string(&self.packing)
                );
            }
        }
        if self.packing.overlap_count() == 0 {
            info!("overlap relaxation finished after {i} cycles");
        }
        self.relaxation_mode = false;

        self.total_microseconds += microseconds_since(run_start);
        Ok(())
    }

    fn begin_run(
        &mut self,
        temperature: f64,
        pressure: f64,
        interaction: &dyn Interaction,
        collector: &mut dyn ObservablesCollector,
        cycle_offset: usize,
    ) -> Result<(), SimulationError> {
        if temperature <= 0.0 {
            return Err(SimulationError::NonPositiveTemperature(temperature));
        }
        if pressure <= 0.0 {
            return Err(SimulationError::NonPositivePressure(pressure));
        }
        self.temperature = temperature;
        self.pressure = pressure;
        self.move_counter.reset();
        self.scaling_counter.reset();
        self.packing.reset_counters();
        self.move_microseconds = 0.0;
        self.scaling_microseconds = 0.0;
        self.decomposition_microseconds = 0.0;
        self.performed_cycles = 0;
        self.total_cycles = cycle_offset;
        self.total_energy = self.packing.compute_total_energy(interaction);
        collector.clear_values();
        Ok(())
    }

    fn perform_cycle(&mut self, interaction: &dyn Interaction) {
        let start = Instant::now();
        if self.num_domains == 1 {
            self.perform_serial_sweep(interaction);
        } else {
            self.perform_domain_sweep(interaction);
        }
        self.total_energy += self.move_counter.drain_energy_delta();
        self.move_microseconds += microseconds_since(start);

        let start = Instant::now();
        let scaled = self.try_scaling_move(interaction);
        self.scaling_counter.increment(0, scaled);
        self.scaling_microseconds += microseconds_since(start);

        #[cfg(feature = "overlap-sanitizer")]
        assert_eq!(
            self.packing.overlap_count(),
            self.packing.count_overlaps(interaction),
            "cached overlap count diverged from a from-scratch pair scan"
        );

        if self.should_adjust_step_size {
            self.evaluate_counters();
        }
        self.performed_cycles += 1;
        self.total_cycles += 1;
    }

    fn perform_serial_sweep(&mut self, interaction: &dyn Interaction) {
        for _ in 0..self.packing.len() {
            Self::perform_single_move(
                &self.packing,
                interaction,
                &self.all_particles,
                None,
                &mut self.rngs[0],
                self.translation_step,
                self.rotation_step,
                self.temperature,
                self.relaxation_mode,
                self.move_counter.slot_mut(0),
            );
        }
    }

    fn perform_domain_sweep(&mut self, interaction: &dyn Interaction) {
        let start = Instant::now();
        let origin = Vector3::new(
            self.rngs[0].gen::<f64>(),
            self.rngs[0].gen::<f64>(),
            self.rngs[0].gen::<f64>(),
        );
        let decomposition =
            match DomainDecomposition::new(&self.packing, self.domain_divisions, &origin) {
                Ok(decomposition) => decomposition,
                Err(error) => {
                    // counted as rejections, per the failed-trial rule
                    warn!("domain decomposition refused ({error}); skipping the particle phase");
                    for _ in 0..self.packing.len() {
                        self.move_counter.increment(0, false);
                    }
                    return;
                }
            };
        self.decomposition_microseconds += microseconds_since(start);

        let moves_per_domain = self.packing.len().div_ceil(self.num_domains);
        let packing = &self.packing;
        let decomposition = &decomposition;
        let translation_step = self.translation_step;
        let rotation_step = self.rotation_step;
        let temperature = self.temperature;
        let relaxation = self.relaxation_mode;

        self.rngs
            .par_iter_mut()
            .zip(self.move_counter.slots_mut().par_iter_mut())
            .enumerate()
            .for_each(|(region, (rng, slot))| {
                let particles = decomposition.particles_in_region(region);
                let active = decomposition.active_domain(region);
                for _ in 0..moves_per_domain {
                    Self::perform_single_move(
                        packing,
                        interaction,
                        particles,
                        Some(active),
                        rng,
                        translation_step,
                        rotation_step,
                        temperature,
                        relaxation,
                        slot,
                    );
                }
            });
    }

    #[allow(clippy::too_many_arguments)]
    fn perform_single_move(
        packing: &Packing,
        interaction: &dyn Interaction,
        particles: &[usize],
        active: Option<&ActiveDomain>,
        rng: &mut StdRng,
        translation_step: f64,
        rotation_step: f64,
        temperature: f64,
        relaxation: bool,
        slot: &mut CounterSlot,
    ) -> bool {
        if particles.is_empty() {
            slot.increment(false);
            return false;
        }
        let idx = particles[rng.gen_range(0..particles.len())];
        let translation = sampling::random_translation(rng, translation_step);
        let rotation = sampling::random_rotation(rng, rotation_step);

        let accepted = match packing.try_move(idx, &translation, &rotation, interaction, active) {
            TrialResult::Rejected => false,
            TrialResult::Candidate(mv) => {
                let accept = Self::accepts(
                    rng,
                    temperature,
                    relaxation,
                    mv.energy_delta(),
                    mv.overlap_delta(),
                );
                if accept {
                    // Safety: this worker owns the particle's region; the
                    // trial was gated on the region's active domain (or the
                    // sweep is single-threaded).
                    unsafe { packing.accept_move_shared(&mv) };
                    slot.add_energy(mv.energy_delta());
                }
                accept
            }
        };
        slot.increment(accepted);
        accepted
    }

    fn accepts(
        rng: &mut StdRng,
        temperature: f64,
        relaxation: bool,
        energy_delta: f64,
        overlap_delta: i64,
    ) -> bool {
        if relaxation {
            match overlap_delta.cmp(&0) {
                CmpOrdering::Less => true,
                CmpOrdering::Greater => false,
                CmpOrdering::Equal => {
                    rng.gen::<f64>() <= (-energy_delta / temperature).exp()
                }
            }
        } else if overlap_delta > 0 {
            false
        } else {
            rng.gen::<f64>() <= (-energy_delta / temperature).exp()
        }
    }

    fn try_scaling_move(&mut self, interaction: &dyn Interaction) -> bool {
        let multiplier = self.box_scaler.sample_scaling(
            self.packing.triclinic_box(),
            self.scaling_step,
            &mut self.rngs[0],
        );
        let factor = multiplier.determinant();
        debug_assert!(factor > 0.0);
        let old_volume = self.packing.volume();

        let trial = match self.packing.try_scaling(&multiplier, interaction) {
            Ok(trial) => trial,
            Err(error) => {
                warn!("scaling move failed ({error}); counted as rejected");
                return false;
            }
        };
        // a box that can no longer host the grid would break the next
        // decomposition; reject the move instead
        if self.num_domains > 1 && !self.divisions_fit_the_grid() {
            self.packing.revert_scaling();
            return false;
        }

        let delta_volume = old_volume * (factor - 1.0);
        let exponent = self.packing.len() as f64 * factor.ln()
            - trial.energy_delta / self.temperature
            - self.pressure * delta_volume / self.temperature;
        let accepted = if self.relaxation_mode {
            match trial.overlap_delta.cmp(&0) {
                CmpOrdering::Less => true,
                CmpOrdering::Greater => false,
                CmpOrdering::Equal => self.rngs[0].gen::<f64>() <= exponent.exp(),
            }
        } else if trial.overlap_delta > 0 {
            false
        } else {
            self.rngs[0].gen::<f64>() <= exponent.exp()
        };

        if accepted {
            self.packing.accept_scaling();
            self.total_energy += trial.energy_delta;
        } else {
            self.packing.revert_scaling();
        }
        accepted
    }

    fn divisions_fit_the_grid(&self) -> bool {
        match self.packing.neighbour_grid_cell_counts() {
            Some(cells) => (0..3).all(|axis| cells[axis] >= 3 * self.domain_divisions[axis]),
            None => false,
        }
    }

    fn evaluate_counters(&mut self) {
        let n = self.packing.len() as u64;
        if self.move_counter.moves_since_evaluation() >= 100 * n {
            let rate = self.move_counter.current_rate();
            self.move_counter.reset_current();
            if rate > 0.2 {
                // translations and rotations stay coupled; the translation
                // step may grow up to the box, never beyond
                let heights = self.packing.triclinic_box().heights();
                let min_height = heights.iter().copied().fold(f64::INFINITY, f64::min);
                if self.translation_step * 1.1 <= min_height {
                    self.translation_step *= 1.1;
                    self.rotation_step *= 1.1;
                    info!(
                        rate,
                        translation_step = self.translation_step,
                        rotation_step = self.rotation_step,
                        "particle move rate high, steps increased"
                    );
                }
            } else if rate < 0.1 {
                self.translation_step /= 1.1;
                self.rotation_step /= 1.1;
                info!(
                    rate,
                    translation_step = self.translation_step,
                    rotation_step = self.rotation_step,
                    "particle move rate low, steps decreased"
                );
            }
        }

        if self.scaling_counter.moves_since_evaluation() >= 100 {
            let rate = self.scaling_counter.current_rate();
            self.scaling_counter.reset_current();
            if rate > 0.2 {
                self.scaling_step *= 1.1;
                info!(rate, scaling_step = self.scaling_step, "scaling rate high, step increased");
            } else if rate < 0.1 {
                self.scaling_step /= 1.1;
                info!(rate, scaling_step = self.scaling_step, "scaling rate low, step decreased");
            }
        }
    }

    pub fn packing(&self) -> &Packing {
        &self.packing
    }

    /// Ratio of accepted to all particle moves.
    pub fn move_acceptance_rate(&self) -> f64 {
        self.move_counter.rate()
    }

    /// Ratio of accepted to all scaling moves.
    pub fn scaling_acceptance_rate(&self) -> f64 {
        self.scaling_counter.rate()
    }

    pub fn move_microseconds(&self) -> f64 {
        self.move_microseconds
    }

    pub fn scaling_microseconds(&self) -> f64 {
        self.scaling_microseconds
    }

    pub fn domain_decomposition_microseconds(&self) -> f64 {
        self.decomposition_microseconds
    }

    pub fn total_microseconds(&self) -> f64 {
        self.total_microseconds
    }

    pub fn current_translation_step(&self) -> f64 {
        self.translation_step
    }

    pub fn current_rotation_step(&self) -> f64 {
        self.rotation_step
    }

    pub fn current_scaling_step(&self) -> f64 {
        self.scaling_step
    }

    /// Cycles performed by this driver instance, not counting the offset.
    pub fn performed_cycles(&self) -> usize {
        self.performed_cycles
    }

    /// Total cycle count including the offset of a resumed run.
    pub fn total_cycles(&self) -> usize {
        self.total_cycles
    }

    pub fn was_interrupted(&self) -> bool {
        self.interrupt.is_interrupted()
    }

    /// Running total of the soft energy, maintained from accepted-move
    /// deltas.
    pub fn total_energy(&self) -> f64 {
        self.total_energy
    }

    /// Packing snapshot plus step sizes and the cycle count as auxiliary
    /// entries.
    pub fn snapshot(&self) -> PackingSnapshot {
        let mut snapshot = self.packing.snapshot();
        snapshot
            .aux
            .insert("translation_step".into(), self.translation_step.to_string());
        snapshot
            .aux
            .insert("rotation_step".into(), self.rotation_step.to_string());
        snapshot
            .aux
            .insert("scaling_step".into(), self.scaling_step.to_string());
        snapshot
            .aux
            .insert("cycles".into(), self.total_cycles.to_string());
        snapshot
    }

    /// Reinstates a snapshot: packing state, step sizes, cycle count.
    pub fn restore_snapshot(
        &mut self,
        snapshot: &PackingSnapshot,
        interaction: &dyn Interaction,
    ) -> Result<(), SimulationError> {
        self.packing.restore(snapshot, interaction)?;
        if let Some(value) = snapshot.aux.get("translation_step") {
            self.translation_step = parse_aux(value)?;
        }
        if let Some(value) = snapshot.aux.get("rotation_step") {
            self.rotation_step = parse_aux(value)?;
        }
        if let Some(value) = snapshot.aux.get("scaling_step") {
            self.scaling_step = parse_aux(value)?;
        }
        if let Some(value) = snapshot.aux.get("cycles") {
            self.total_cycles = value
                .parse()
                .map_err(|_| SnapshotError::InvalidNumber { line: 0 })
                .map_err(SimulationError::Snapshot)?;
        }
        Ok(())
    }
}

fn parse_aux(value: &str) -> Result<f64, SimulationError> {
    value
        .parse()
        .map_err(|_| SimulationError::Snapshot(SnapshotError::InvalidNumber { line: 0 }))
}

fn microseconds_since(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1e6
}
