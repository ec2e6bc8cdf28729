//! Cortex, an external placement decision engine for OpenStack schedulers.
//!
//! Nova, Cinder and Manila delegate candidate-host ranking to this service:
//! they send the admissible hosts together with their own baseline weights,
//! and Cortex returns a re-ranked list. Rankings are produced by configurable
//! scheduling pipelines whose steps read precomputed features; features are
//! maintained by a dependency-ordered graph of extractors that re-run when
//! fresh telemetry or inventory arrives on the trigger bus.

pub mod api;
pub mod config;
pub mod decisions;
pub mod extractors;
pub mod features;
pub mod graph;
pub mod monitor;
pub mod scheduling;
pub mod triggers;
