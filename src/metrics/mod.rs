//! Metrics export.
//!
//! Per-certificate gauges can be pushed to a Prometheus Push Gateway after
//! a scan.
//!
//! # Submodules
//!
//! - `prom` - Prometheus metrics integration

pub mod prom;
