//! # packmc Core Library
//!
//! An isothermal-isobaric (NpT) Monte Carlo engine for dense packings of
//! rigid, anisotropic hard (and optionally soft-core) particles in a
//! periodic, possibly triclinic, 3D box.
//!
//! ## Architectural Philosophy
//!
//! The library is designed with a strict layered architecture to ensure a
//! clear separation of concerns, making it modular, testable, and extensible.
//!
//! - **[`core`]: The Foundation.** Contains stateless geometric primitives
//!   (`TriclinicBox`, `Shape`), the boundary-condition service, the
//!   overlap-oracle abstraction (`Interaction`), and pure pair potentials.
//!
//! - **[`engine`]: The Logic Core.** This stateful layer orchestrates the
//!   sampling process. It includes the high-performance data structures that
//!   make dense configurations tractable (`NeighbourGrid` with reflected-cell
//!   aliasing, `Packing` with cached overlap counts and candidate-move
//!   trials, `DomainDecomposition` for detailed-balance-preserving
//!   parallelism) and the Metropolis `Simulation` driver with adaptive step
//!   control.
//!
//! - **Collaborators.** [`shapes`], [`observables`], and [`lattice`] supply
//!   the concrete geometries, the observable collector, and the initial
//!   arrangement that the engine consumes purely through its interfaces.

pub mod core;
pub mod engine;
pub mod lattice;
pub mod observables;
pub mod shapes;
