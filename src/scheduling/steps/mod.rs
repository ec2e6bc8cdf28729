//! Built-in scheduling steps.

pub mod avoid_contended_hosts;
pub mod avoid_noisy_projects;
pub mod balance_utilization;
pub mod filter_correct_az;
pub mod filter_has_capacity;

use anyhow::{bail, Result};

use super::step::SchedulingStep;

/// Resolve a configured step name to its built-in implementation. Unknown
/// names are configuration-fatal.
pub fn build_step(name: &str) -> Result<Box<dyn SchedulingStep>> {
    match name {
        avoid_contended_hosts::NAME => Ok(Box::new(avoid_contended_hosts::AvoidContendedHostsStep::new())),
        avoid_noisy_projects::NAME => Ok(Box::new(avoid_noisy_projects::AvoidNoisyProjectsStep::new())),
        balance_utilization::NAME => Ok(Box::new(balance_utilization::BalanceUtilizationStep::new())),
        filter_correct_az::NAME => Ok(Box::new(filter_correct_az::FilterCorrectAzStep::new())),
        filter_has_capacity::NAME => Ok(Box::new(filter_has_capacity::FilterHasCapacityStep::new())),
        other => bail!("unknown scheduling step '{other}'"),
    }
}
