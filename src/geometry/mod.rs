//! Metric terms and mass matrices, stored in a shared [`MetricArena`].

pub mod arena;
pub mod mass;
pub mod metrics;

pub use arena::{MetricArena, MetricSpan};
pub use metrics::MetricEngine;
