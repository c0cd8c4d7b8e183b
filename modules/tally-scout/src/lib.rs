pub mod audit;
pub mod backup;
pub mod classifier;
pub mod cutoff;
pub mod dataset;
pub mod fetcher;
mod files;
pub mod filters;
pub mod memo;
pub mod merge;
pub mod pipeline;
pub mod report;
pub mod rescore;
pub mod stats;
pub mod tabular;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;
