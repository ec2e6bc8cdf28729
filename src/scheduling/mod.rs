//! Scheduling pipelines: ordered chains of filters and weighers that turn a
//! request plus candidate hosts into a ranked host list.

pub mod activation;
pub mod pipeline;
pub mod requests;
pub mod scope;
pub mod step;
pub mod steps;

pub use pipeline::{PipelineOutcome, SchedulingPipeline, StepTrace};
pub use requests::{FlavorSpec, HostCandidate, RequestFlags, SchedulingDomain, SchedulingRequest};
pub use step::{SchedulingStep, StepOutcome, StepResult, StepStatistic};
