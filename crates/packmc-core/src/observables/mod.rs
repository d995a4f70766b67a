use std::fmt;
use std::io;

use crate::engine::packing::Packing;

/// A measured value with its standard error.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Quantity {
    pub value: f64,
    pub error: f64,
}

impl Quantity {
    /// Mean and standard error of the mean of a sample set.
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        if samples.len() < 2 {
            return Self {
                value: mean,
                error: 0.0,
            };
        }
        let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
        Self {
            value: mean,
            error: (variance / n).sqrt(),
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ± {}", self.value, self.error)
    }
}

/// Observable collection interface consumed by the simulation driver.
///
/// The driver borrows the collector for the duration of a run and calls it
/// at the configured cadences; it never retains a reference across calls.
pub trait ObservablesCollector {
    /// Records a snapshot-style observable at the given cycle number.
    fn add_snapshot(&mut self, packing: &Packing, cycle: usize);

    /// Records values that enter the averaging-phase means.
    fn add_averaging_values(&mut self, packing: &Packing);

    /// Drops all recorded values; called when a run starts.
    fn clear_values(&mut self);

    /// One-line summary for periodic progress logging.
    fn generate_inline_observables_string(&self, packing: &Packing) -> String;

    /// Writes all recorded snapshots, optionally preceded by a header line.
    fn print_snapshots(&self, out: &mut dyn io::Write, header: bool) -> io::Result<()>;
}

/// Collects the number density N / V.
#[derive(Debug, Clone, Default)]
pub struct DensityCollector {
    averaging_values: Vec<f64>,
    snapshots: Vec<(usize, f64)>,
}

impl DensityCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn average_density(&self) -> Quantity {
        Quantity::from_samples(&self.averaging_values)
    }

    pub fn snapshots(&self) -> &[(usize, f64)] {
        &self.snapshots
    }
}

impl ObservablesCollector for DensityCollector {
    fn add_snapshot(&mut self, packing: &Packing, cycle: usize) {
        self.snapshots.push((cycle, packing.number_density()));
    }

    fn add_averaging_values(&mut self, packing: &Packing) {
        self.averaging_values.push(packing.number_density());
    }

    fn clear_values(&mut self) {
        self.averaging_values.clear();
        self.snapshots.clear();
    }

    fn generate_inline_observables_string(&self, packing: &Packing) -> String {
        let mut line = format!("density = {:.6}", packing.number_density());
        let overlaps = packing.overlap_count();
        if overlaps > 0 {
            line.push_str(&format!(", overlaps = {overlaps}"));
        }
        line
    }

    fn print_snapshots(&self, out: &mut dyn io::Write, header: bool) -> io::Result<()> {
        if header {
            writeln!(out, "cycle density")?;
        }
        for (cycle, density) in &self.snapshots {
            writeln!(out, "{cycle} {density}")?;
        }
        Ok(())
    }
}
