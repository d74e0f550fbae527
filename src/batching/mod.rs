pub mod batcher;
pub mod padding;
