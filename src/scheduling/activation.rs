//! Activation arithmetic: the single fusion point between steps.
//!
//! Each step produces an activation per host; the pipeline folds it into
//! the running weight through `tanh`, bounding any one step's contribution
//! to ±1 so no step can dominate the ranking.

use std::collections::HashMap;

/// Activation that keeps a host in the candidate set without nudging it.
pub const NO_EFFECT: f64 = 0.0;

/// Fold a step's activations into the running weights.
///
/// Hosts absent from `activations` are removed (filter semantics); hosts
/// absent from `weights` are ignored, since a step cannot introduce a host
/// that is not already a candidate.
pub fn combine(
    weights: &HashMap<String, f64>,
    activations: &HashMap<String, f64>,
) -> HashMap<String, f64> {
    activations
        .iter()
        .filter_map(|(host, activation)| {
            weights
                .get(host)
                .map(|weight| (host.clone(), weight + activation.tanh()))
        })
        .collect()
}

/// Linearly map `value` from `[lower, upper]` into the activation range
/// `[activation_lower, activation_upper]`, clamped to that range. Degenerate
/// bounds yield no effect.
pub fn min_max_scale(
    value: f64,
    lower: f64,
    upper: f64,
    activation_lower: f64,
    activation_upper: f64,
) -> f64 {
    if lower == upper || activation_lower == activation_upper {
        return NO_EFFECT;
    }
    let t = (value - lower) / (upper - lower);
    let raw = activation_lower + t * (activation_upper - activation_lower);
    raw.clamp(
        activation_lower.min(activation_upper),
        activation_lower.max(activation_upper),
    )
}
