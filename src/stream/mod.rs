// src/stream/mod.rs
// Per-turn text reassembly

pub mod normalize;
pub mod reassembler;

pub use normalize::normalize;
pub use reassembler::{Reassembler, is_metadata_noise};
