pub mod boundary;
pub mod interaction;
pub mod potentials;
pub mod shape;
pub mod triclinic;
