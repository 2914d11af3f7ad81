//! The single-threaded, SIMD group-probed map variant.

mod group;
mod map;

pub use map::DenseMap;
