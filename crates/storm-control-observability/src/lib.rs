//! Structured logging and the Prometheus metrics exporter: the ambient
//! observability stack the core control plane is deliberately silent
//! about.

pub mod exporter;
pub mod logging;
pub mod metrics;

pub use metrics::StormControlCollector;
