pub mod counters;
pub mod domain;
pub mod interrupt;
pub mod neighbour_grid;
pub(crate) mod parallel;
pub mod packing;
pub mod sampling;
pub mod scaler;
pub mod simulation;
pub mod snapshot;
