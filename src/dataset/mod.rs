mod batcher;
mod sample;
mod symbols;

pub use batcher::*;
pub use sample::*;
pub use symbols::*;
