//! Analysis modules.
//!
//! The windowed aggregator ranks categories per trailing window, the
//! bucket functions build trend series, and `stats` computes the headline
//! numbers and auxiliary series shown around the charts.

pub mod aggregator;
pub mod buckets;
pub mod stats;

pub use aggregator::*;
pub use buckets::*;
pub use stats::*;
