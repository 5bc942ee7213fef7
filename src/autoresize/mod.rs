//! Automatic volume resize policy
//!
//! Each volume slot goes through the same pipeline: the decision engine
//! sizes it, the WAL safety gate and the rate limiter may veto it, and the
//! actuator submits what is left. Everything up to the actuator is pure.

pub mod actuator;
pub mod cycle;
pub mod decision;
pub mod quantity;
pub mod rate_limit;
pub mod volume;
pub mod wal_safety;

use chrono::{DateTime, Utc};

use crate::crd::{AutoResizeEvent, BlockReason, ResizeConfiguration, VolumeUsageSample, WalHealthStatus};
use actuator::ClaimState;
use decision::{ResizePolicy, SizingDecision, Trigger};
use quantity::QuantityError;
use rate_limit::Budget;
use volume::{VolumeKey, VolumeRole};
use wal_safety::GateDecision;

pub use actuator::{Expansion, Notification, PvcResizer, VolumeResizer};
pub use cycle::{ClaimInfo, ClusterSnapshot, CycleOutcome, CyclePlan, SlotDecision};
pub use quantity::{format_quantity, parse_quantity};

/// Everything needed to decide on one volume in one cycle
#[derive(Debug, Clone)]
pub struct VolumeInput<'a> {
    pub key: &'a VolumeKey,
    pub config: &'a ResizeConfiguration,
    pub sample: Option<&'a VolumeUsageSample>,
    pub claim: Option<&'a ClaimState>,
    pub has_dedicated_wal: bool,
    pub wal_health: Option<&'a WalHealthStatus>,
    pub events: &'a [AutoResizeEvent],
    pub now: DateTime<Utc>,
}

/// Why nothing happens to a volume this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleReason {
    Disabled,
    NoSample,
    StaleSample,
    NoClaim,
    ResizeInProgress,
    NotTriggered,
}

impl IdleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdleReason::Disabled => "disabled",
            IdleReason::NoSample => "no-sample",
            IdleReason::StaleSample => "stale-sample",
            IdleReason::NoClaim => "no-claim",
            IdleReason::ResizeInProgress => "resize-in-progress",
            IdleReason::NotTriggered => "not-triggered",
        }
    }
}

/// Decision for one volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeOutcome {
    Idle(IdleReason),
    /// Triggered, but already at the configured limit
    AtLimit { current: u64, limit: u64 },
    /// Triggered and vetoed by policy
    Blocked {
        reason: BlockReason,
        message: String,
        budget: Budget,
    },
    /// Triggered and permitted
    Expand {
        current: u64,
        target: u64,
        trigger: Trigger,
        budget: Budget,
        /// WAL checks ran against last known health
        stale_wal_health: bool,
    },
}

/// Run one volume through sizing, the WAL safety gate and the rate limiter
pub fn evaluate_volume(input: &VolumeInput<'_>) -> Result<VolumeOutcome, QuantityError> {
    if !input.config.enabled {
        return Ok(VolumeOutcome::Idle(IdleReason::Disabled));
    }
    let Some(sample) = input.sample else {
        return Ok(VolumeOutcome::Idle(IdleReason::NoSample));
    };
    if sample.stale {
        return Ok(VolumeOutcome::Idle(IdleReason::StaleSample));
    }
    let Some(claim) = input.claim else {
        return Ok(VolumeOutcome::Idle(IdleReason::NoClaim));
    };
    if claim.resizing {
        return Ok(VolumeOutcome::Idle(IdleReason::ResizeInProgress));
    }

    let policy = ResizePolicy::from_config(input.config)?;
    let (current, target, trigger) = match decision::decide(claim.current_size(), sample, &policy) {
        SizingDecision::Hold => return Ok(VolumeOutcome::Idle(IdleReason::NotTriggered)),
        SizingDecision::AtLimit { current, limit } => {
            return Ok(VolumeOutcome::AtLimit { current, limit });
        }
        SizingDecision::Grow {
            current,
            target,
            trigger,
        } => (current, target, trigger),
    };

    let budget = rate_limit::check_budget(
        input.events,
        &claim.resize_history,
        input.key,
        input.config.max_actions_per_day(),
        input.now,
    );

    let stale_wal_health = match wal_safety::evaluate(
        &input.key.role,
        input.has_dedicated_wal,
        input.config.wal_safety_policy(),
        input.wal_health,
    ) {
        GateDecision::Deny { reason, message } => {
            return Ok(VolumeOutcome::Blocked {
                reason,
                message,
                budget,
            });
        }
        GateDecision::Permit { stale } => stale,
        GateDecision::Bypassed => false,
    };

    if let Budget::Exhausted { used, max } = budget {
        return Ok(VolumeOutcome::Blocked {
            reason: BlockReason::RateLimitExceeded,
            message: format!(
                "{} successful resizes in the last {}h, maxActionsPerDay is {}",
                used,
                rate_limit::RATE_LIMIT_WINDOW_HOURS,
                max
            ),
            budget,
        });
    }

    Ok(VolumeOutcome::Expand {
        current,
        target,
        trigger,
        budget,
        stale_wal_health,
    })
}

/// Whether expanding this volume should raise a WAL risk warning
pub fn alerts_wal_risk(config: &ResizeConfiguration, role: &VolumeRole, has_dedicated_wal: bool) -> bool {
    role.carries_wal(has_dedicated_wal)
        && config
            .wal_safety_policy()
            .and_then(|p| p.alert_on_resize)
            .unwrap_or(true)
}
