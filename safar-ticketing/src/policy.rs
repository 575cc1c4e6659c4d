//! Fee policy selection. Pure functions over a fetched policy slice and a
//! signed hours-until-departure figure (positive = before departure).

use safar_shared::models::{CancellationPolicy, PolicyCategory, PolicyCondition};

/// Hours after departure during which "late cancellation" policies still
/// apply instead of falling through to the no-show fallback.
pub const POST_DEPARTURE_GRACE_HOURS: f64 = -12.0;

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyDecision {
    pub policy: Option<CancellationPolicy>,
    pub fee_amount: i64,
}

impl PolicyDecision {
    fn none() -> Self {
        Self {
            policy: None,
            fee_amount: 0,
        }
    }

    fn from_policy(policy: &CancellationPolicy) -> Self {
        Self {
            fee_amount: policy.fee_amount,
            policy: Some(policy.clone()),
        }
    }
}

/// Whether a policy applies at the given hours-until-departure. A policy
/// without a trigger matches unconditionally.
pub fn policy_matches(policy: &CancellationPolicy, hours_until_departure: f64) -> bool {
    if !policy.is_active {
        return false;
    }
    let Some(trigger) = policy.hours_trigger else {
        return true;
    };
    let trigger = trigger as f64;
    match policy.condition {
        Some(PolicyCondition::LessThan) => {
            hours_until_departure < trigger && hours_until_departure > POST_DEPARTURE_GRACE_HOURS
        }
        Some(PolicyCondition::GreaterThan) => hours_until_departure > trigger,
        None => true,
    }
}

/// Select the matching policy with the strictly highest fee. Equal fees
/// are broken by lowest policy id so the outcome never depends on fetch
/// order.
pub fn select_policy(
    hours_until_departure: f64,
    policies: &[CancellationPolicy],
) -> PolicyDecision {
    let mut best: Option<&CancellationPolicy> = None;
    for policy in policies
        .iter()
        .filter(|p| policy_matches(p, hours_until_departure))
    {
        best = match best {
            None => Some(policy),
            Some(current)
                if policy.fee_amount > current.fee_amount
                    || (policy.fee_amount == current.fee_amount && policy.id < current.id) =>
            {
                Some(policy)
            }
            Some(current) => Some(current),
        };
    }
    best.map(PolicyDecision::from_policy)
        .unwrap_or_else(PolicyDecision::none)
}

/// `select_policy` plus the cancellation fallback: a cancellation at or
/// after departure with no matching policy takes the first active NO_SHOW
/// policy instead. Otherwise the fee resolves to zero, which is a valid
/// outcome, not an error.
pub fn select_with_fallback(
    category: PolicyCategory,
    hours_until_departure: f64,
    policies: &[CancellationPolicy],
    no_show_policies: &[CancellationPolicy],
) -> PolicyDecision {
    let decision = select_policy(hours_until_departure, policies);
    if decision.policy.is_some() {
        return decision;
    }
    if category == PolicyCategory::Cancellation && hours_until_departure <= 0.0 {
        if let Some(fallback) = first_active(no_show_policies) {
            return PolicyDecision::from_policy(fallback);
        }
    }
    PolicyDecision::none()
}

/// First active policy by lowest id.
pub fn first_active(policies: &[CancellationPolicy]) -> Option<&CancellationPolicy> {
    policies
        .iter()
        .filter(|p| p.is_active)
        .min_by_key(|p| p.id)
}
