pub mod central;
pub mod kmer;
pub mod sphere;
pub mod spherocylinder;
