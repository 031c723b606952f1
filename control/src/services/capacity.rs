use serde::{Deserialize, Serialize};

use crate::error::ControlError;
use crate::model::{Dimension, ResourceLimit, ResourceLimits, ResourceUsage};

/// Result of a capacity check for a single dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capacity {
    Allowed,
    Denied(String),
}

/// Limit for one dimension as submitted by an operator.
///
/// Selecting `Unlimited` normalizes both the limit and the overallocation to
/// zero before anything is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum DimensionLimit {
    Unlimited,
    Limited { limit: i64, overallocate: i64 },
}

impl DimensionLimit {
    pub fn normalize(self) -> ResourceLimit {
        match self {
            DimensionLimit::Unlimited => ResourceLimit::default(),
            DimensionLimit::Limited {
                limit,
                overallocate,
            } => ResourceLimit {
                limit,
                overallocate,
            },
        }
    }
}

/// Check whether `delta` more units of `dimension` fit on a node.
///
/// Denied when the dimension is finite and
/// `usage + delta > limit * (1 + overallocate / 100)`.
pub fn check(
    limits: &ResourceLimits,
    usage: &ResourceUsage,
    dimension: Dimension,
    delta: i64,
) -> Capacity {
    let limit = limits.get(dimension);
    if limit.is_unlimited() {
        return Capacity::Allowed;
    }

    let proposed = usage.get(dimension).saturating_add(delta);
    // Integer form of proposed <= limit * (100 + overallocate) / 100
    let ceiling = (limit.limit as i128) * (100 + limit.overallocate as i128);
    if (proposed as i128) * 100 <= ceiling {
        Capacity::Allowed
    } else {
        Capacity::Denied(format!(
            "requested {} would bring usage to {} of {} allowed",
            delta,
            proposed,
            ceiling / 100
        ))
    }
}

/// Check every dimension of a claim, failing on the first denial.
pub fn check_all(
    limits: &ResourceLimits,
    usage: &ResourceUsage,
    claim: &ResourceUsage,
) -> Result<(), ControlError> {
    for dimension in Dimension::ALL {
        if let Capacity::Denied(reason) = check(limits, usage, dimension, claim.get(dimension)) {
            return Err(ControlError::capacity_denied(dimension, reason));
        }
    }
    Ok(())
}

/// Validate a submitted limit before it is normalized and stored.
pub fn validate_limit(dimension: Dimension, limit: DimensionLimit) -> Result<(), ControlError> {
    if let DimensionLimit::Limited {
        limit,
        overallocate,
    } = limit
    {
        if limit < 0 {
            return Err(ControlError::invalid(
                "limit",
                format!("{} limit must not be negative", dimension),
            ));
        }
        if !(-1..=100).contains(&overallocate) {
            return Err(ControlError::invalid(
                "overallocate",
                format!("{} overallocate must be between -1 and 100", dimension),
            ));
        }
    }
    Ok(())
}
