//! Resize decision engine
//!
//! Given a usage sample and the policy of one volume, decide whether the
//! volume needs to grow and to what size. The increment is clamped in a
//! fixed order: `minStep`, then `maxStep`, then the target is capped at
//! `limit`, so `limit` is always the ceiling.

use super::quantity::{GIB, QuantityError, Step, parse_quantity};
use crate::crd::{ResizeConfiguration, VolumeUsageSample};

pub const DEFAULT_USAGE_THRESHOLD: u8 = 80;
pub const DEFAULT_STEP: Step = Step::Percent(20);
/// Floor applied to percentage steps when `minStep` is unset
pub const DEFAULT_MIN_STEP: u64 = 2 * GIB;
/// Ceiling applied to percentage steps when `maxStep` is unset
pub const DEFAULT_MAX_STEP: u64 = 500 * GIB;

/// Parsed, defaulted policy for one volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizePolicy {
    pub usage_threshold: u8,
    pub min_available: Option<u64>,
    pub step: Step,
    pub min_step: Option<u64>,
    pub max_step: Option<u64>,
    pub limit: Option<u64>,
}

impl Default for ResizePolicy {
    fn default() -> Self {
        Self {
            usage_threshold: DEFAULT_USAGE_THRESHOLD,
            min_available: None,
            step: DEFAULT_STEP,
            min_step: Some(DEFAULT_MIN_STEP),
            max_step: Some(DEFAULT_MAX_STEP),
            limit: None,
        }
    }
}

impl ResizePolicy {
    /// Resolve a configuration into a policy, applying defaults
    ///
    /// Percentage steps get the default min/max step when those are unset;
    /// absolute steps are only clamped by explicitly configured bounds.
    pub fn from_config(config: &ResizeConfiguration) -> Result<Self, QuantityError> {
        let triggers = config.triggers.as_ref();
        let expansion = config.expansion.as_ref();

        let usage_threshold = triggers
            .and_then(|t| t.usage_threshold)
            .and_then(|t| u8::try_from(t).ok())
            .filter(|t| (1..=99).contains(t))
            .unwrap_or(DEFAULT_USAGE_THRESHOLD);

        let min_available = parse_opt(triggers.and_then(|t| t.min_available.as_deref()))?;

        let step = match expansion.and_then(|e| e.step.as_deref()) {
            Some(s) => s.parse::<Step>()?,
            None => DEFAULT_STEP,
        };

        let mut min_step = parse_opt(expansion.and_then(|e| e.min_step.as_deref()))?;
        let mut max_step = parse_opt(expansion.and_then(|e| e.max_step.as_deref()))?;
        if step.is_percent() {
            min_step = min_step.or(Some(DEFAULT_MIN_STEP));
            max_step = max_step.or(Some(DEFAULT_MAX_STEP));
        }

        // limit of zero means unset
        let limit = parse_opt(expansion.and_then(|e| e.limit.as_deref()))?.filter(|l| *l > 0);

        Ok(Self {
            usage_threshold,
            min_available,
            step,
            min_step,
            max_step,
            limit,
        })
    }

    /// Increment for a volume of `current` bytes, after minStep and maxStep
    pub fn increment(&self, current: u64) -> u64 {
        let raw = match self.step {
            Step::Percent(pct) => {
                let grown = u128::from(current) * u128::from(pct) / 100;
                u64::try_from(grown).unwrap_or(u64::MAX)
            }
            Step::Absolute(bytes) => bytes,
        };
        let raw = match self.min_step {
            Some(min) => raw.max(min),
            None => raw,
        };
        match self.max_step {
            Some(max) => raw.min(max),
            None => raw,
        }
    }

    /// Target size for a volume of `current` bytes; never below `current`
    pub fn target(&self, current: u64) -> u64 {
        let target = current.saturating_add(self.increment(current));
        match self.limit {
            Some(limit) => target.min(limit).max(current),
            None => target,
        }
    }
}

fn parse_opt(value: Option<&str>) -> Result<Option<u64>, QuantityError> {
    value.map(parse_quantity).transpose()
}

/// Why a volume needs to grow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    UsageThreshold { percent_used: i32, threshold: u8 },
    MinAvailable { available: u64, min_available: u64 },
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::UsageThreshold {
                percent_used,
                threshold,
            } => write!(f, "usage {}% above threshold {}%", percent_used, threshold),
            Trigger::MinAvailable {
                available,
                min_available,
            } => write!(
                f,
                "available {} bytes below minimum {} bytes",
                available, min_available
            ),
        }
    }
}

/// Evaluate the triggers against a sample. Either condition is sufficient.
pub fn evaluate_trigger(sample: &VolumeUsageSample, policy: &ResizePolicy) -> Option<Trigger> {
    if sample.percent_used > i32::from(policy.usage_threshold) {
        return Some(Trigger::UsageThreshold {
            percent_used: sample.percent_used,
            threshold: policy.usage_threshold,
        });
    }
    let available = u64::try_from(sample.available_bytes).unwrap_or(0);
    match policy.min_available {
        Some(min_available) if available < min_available => Some(Trigger::MinAvailable {
            available,
            min_available,
        }),
        _ => None,
    }
}

/// Outcome of the sizing step for one volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SizingDecision {
    /// No trigger fired
    Hold,
    /// Triggered, but the limit leaves no room to grow
    AtLimit { current: u64, limit: u64 },
    /// Grow from `current` to `target`
    Grow {
        current: u64,
        target: u64,
        trigger: Trigger,
    },
}

/// Decide whether and how far a volume of `current` bytes should grow
pub fn decide(current: u64, sample: &VolumeUsageSample, policy: &ResizePolicy) -> SizingDecision {
    let Some(trigger) = evaluate_trigger(sample, policy) else {
        return SizingDecision::Hold;
    };

    let target = policy.target(current);
    if target <= current {
        return SizingDecision::AtLimit {
            current,
            limit: policy.limit.unwrap_or(current),
        };
    }

    SizingDecision::Grow {
        current,
        target,
        trigger,
    }
}
