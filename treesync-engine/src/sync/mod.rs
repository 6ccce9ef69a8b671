pub mod apply;
pub mod backoff;
pub mod moves;
pub mod patch;
pub mod paths;
pub mod processor;
pub mod report;
