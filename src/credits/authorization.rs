use chrono::{DateTime, Utc};

use super::ApplicableCaps;
use crate::models::{CapPeriod, CreditPool, PoolKind};

/// Why a pool cannot absorb an estimated cost.
///
/// Variants are listed in evaluation order; the first failing check wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpendDenial {
    DailyLimitExceeded { limit: i64, used: i64 },
    WeeklyLimitExceeded { limit: i64, used: i64 },
    MonthlyLimitExceeded { limit: i64, used: i64 },
    AllocationExceeded { remaining: i64 },
    InsufficientBalance { pool_kind: PoolKind, balance: i64 },
    NotClassMember,
}

impl SpendDenial {
    fn for_period(period: CapPeriod, limit: i64, used: i64) -> Self {
        match period {
            CapPeriod::Daily => Self::DailyLimitExceeded { limit, used },
            CapPeriod::Weekly => Self::WeeklyLimitExceeded { limit, used },
            CapPeriod::Monthly => Self::MonthlyLimitExceeded { limit, used },
        }
    }

    /// Machine-readable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DailyLimitExceeded { .. } => "daily_limit_exceeded",
            Self::WeeklyLimitExceeded { .. } => "weekly_limit_exceeded",
            Self::MonthlyLimitExceeded { .. } => "monthly_limit_exceeded",
            Self::AllocationExceeded { .. } => "allocation_exceeded",
            Self::InsufficientBalance { pool_kind, .. } => match pool_kind {
                PoolKind::Personal => "insufficient_credits",
                PoolKind::Organization => "insufficient_organization_credits",
                PoolKind::Class => "insufficient_class_credits",
            },
            Self::NotClassMember => "not_class_member",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::DailyLimitExceeded { .. } => {
                "Daily spending limit reached. It resets at midnight UTC.".to_string()
            }
            Self::WeeklyLimitExceeded { .. } => {
                "Weekly spending limit reached. It resets on Monday.".to_string()
            }
            Self::MonthlyLimitExceeded { .. } => {
                "Monthly spending limit reached. It resets on the 1st.".to_string()
            }
            Self::AllocationExceeded { .. } => {
                "This class has used its credit allocation.".to_string()
            }
            Self::InsufficientBalance { pool_kind, .. } => match pool_kind {
                PoolKind::Personal => "Not enough credits for this request.".to_string(),
                PoolKind::Organization => {
                    "Your organization does not have enough credits for this request.".to_string()
                }
                PoolKind::Class => {
                    "This class does not have enough credits for this request.".to_string()
                }
            },
            Self::NotClassMember => "You are not a member of this class.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpendDecision {
    Allowed,
    Denied(SpendDenial),
}

/// Check whether `pool` can absorb `estimated_cost` under `caps`.
///
/// Periodic caps and the class allocation all apply together, so the most
/// restrictive one decides. Lapsed cap windows count as unused.
pub fn can_spend(
    pool: &CreditPool,
    caps: &ApplicableCaps,
    estimated_cost: i64,
    now: DateTime<Utc>,
) -> SpendDecision {
    for period in CapPeriod::ALL {
        if let Some(cap) = caps.periodic.get(period) {
            let used = cap.effective_used(now);
            if used.saturating_add(estimated_cost) > cap.limit_microcents {
                return SpendDecision::Denied(SpendDenial::for_period(
                    period,
                    cap.limit_microcents,
                    used,
                ));
            }
        }
    }

    if let Some(allocation) = caps.allocation {
        let remaining = allocation.remaining();
        if remaining < estimated_cost {
            return SpendDecision::Denied(SpendDenial::AllocationExceeded { remaining });
        }
    }

    if pool.balance_microcents < estimated_cost {
        return SpendDecision::Denied(SpendDenial::InsufficientBalance {
            pool_kind: pool.kind(),
            balance: pool.balance_microcents,
        });
    }

    if !caps.class_member {
        return SpendDecision::Denied(SpendDenial::NotClassMember);
    }

    SpendDecision::Allowed
}
