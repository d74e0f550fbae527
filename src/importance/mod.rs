pub mod aggregator;
pub mod metrics;
pub mod normalize;
pub mod report;
