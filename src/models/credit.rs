//! Credit pools and periodic spend caps.

use std::fmt;

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    Personal,
    Organization,
    Class,
}

impl PoolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Organization => "organization",
            Self::Class => "class",
        }
    }
}

impl std::str::FromStr for PoolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "personal" => Ok(Self::Personal),
            "organization" => Ok(Self::Organization),
            "class" => Ok(Self::Class),
            _ => Err(format!("Invalid pool kind: {}", s)),
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a credit pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PoolRef {
    Personal { user_id: Uuid },
    Organization { org_id: Uuid },
    Class { org_id: Uuid, class_id: Uuid },
}

impl PoolRef {
    pub fn kind(&self) -> PoolKind {
        match self {
            Self::Personal { .. } => PoolKind::Personal,
            Self::Organization { .. } => PoolKind::Organization,
            Self::Class { .. } => PoolKind::Class,
        }
    }

    /// The entity that owns the pool row: user, organization or class.
    pub fn owner_id(&self) -> Uuid {
        match self {
            Self::Personal { user_id } => *user_id,
            Self::Organization { org_id } => *org_id,
            Self::Class { class_id, .. } => *class_id,
        }
    }
}

/// Class allocation ceiling: a class may spend at most `allocated` in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassAllocation {
    pub allocated_microcents: i64,
    pub used_microcents: i64,
}

impl ClassAllocation {
    pub fn remaining(&self) -> i64 {
        self.allocated_microcents.saturating_sub(self.used_microcents)
    }
}

/// A credit pool as read from the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditPool {
    pub pool: PoolRef,
    /// Spendable balance, never negative
    pub balance_microcents: i64,
    /// Present for class pools only
    pub allocation: Option<ClassAllocation>,
    /// Pricing cohort of the pool's owner
    pub cohort: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl CreditPool {
    pub fn kind(&self) -> PoolKind {
        self.pool.kind()
    }
}

/// Whose caps apply to a spend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CapOwner {
    /// Guardian caps on a user's personal spending
    User { user_id: Uuid },
    /// Caps on a student's spending from an organization pool
    OrgMember { org_id: Uuid, user_id: Uuid },
    /// Caps on a student's spending from a class pool
    ClassMember { class_id: Uuid, user_id: Uuid },
}

impl CapOwner {
    /// Storage key for the cap row.
    pub fn key(&self) -> String {
        match self {
            Self::User { user_id } => format!("user:{user_id}"),
            Self::OrgMember { org_id, user_id } => format!("org_member:{org_id}:{user_id}"),
            Self::ClassMember { class_id, user_id } => {
                format!("class_member:{class_id}:{user_id}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapPeriod {
    Daily,
    Weekly,
    Monthly,
}

impl CapPeriod {
    pub const ALL: [CapPeriod; 3] = [CapPeriod::Daily, CapPeriod::Weekly, CapPeriod::Monthly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    /// Start of the next window strictly after `now`, in UTC.
    ///
    /// Daily windows start at midnight, weekly windows on Monday and monthly
    /// windows on the first of the month.
    pub fn next_reset(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();
        let next: NaiveDate = match self {
            Self::Daily => today + Days::new(1),
            Self::Weekly => {
                let days = 7 - u64::from(today.weekday().num_days_from_monday());
                today + Days::new(days)
            }
            Self::Monthly => {
                let first = today.with_day(1).unwrap_or(today);
                first
                    .checked_add_months(Months::new(1))
                    .unwrap_or(NaiveDate::MAX)
            }
        };
        next.and_time(NaiveTime::MIN).and_utc()
    }
}

impl fmt::Display for CapPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One periodic cap. `used` only counts while `now < reset_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodCap {
    pub limit_microcents: i64,
    pub used_microcents: i64,
    /// None until the first spend in a window
    pub reset_at: Option<DateTime<Utc>>,
}

impl PeriodCap {
    pub fn new(limit_microcents: i64) -> Self {
        Self {
            limit_microcents,
            used_microcents: 0,
            reset_at: None,
        }
    }

    fn window_open(&self, now: DateTime<Utc>) -> bool {
        self.reset_at.is_some_and(|reset_at| now < reset_at)
    }

    /// Spend counted in the current window, 0 once it has lapsed.
    pub fn effective_used(&self, now: DateTime<Utc>) -> i64 {
        if self.window_open(now) {
            self.used_microcents
        } else {
            0
        }
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> i64 {
        self.limit_microcents
            .saturating_sub(self.effective_used(now))
            .max(0)
    }

    /// Add spend, rolling the window over first when it has lapsed.
    pub fn record_spend(&mut self, period: CapPeriod, amount: i64, now: DateTime<Utc>) {
        if !self.window_open(now) {
            self.used_microcents = 0;
            self.reset_at = Some(period.next_reset(now));
        }
        self.used_microcents = self.used_microcents.saturating_add(amount);
    }
}

/// Daily, weekly and monthly caps for one cap owner. Absent caps are unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendCaps {
    pub daily: Option<PeriodCap>,
    pub weekly: Option<PeriodCap>,
    pub monthly: Option<PeriodCap>,
}

impl SpendCaps {
    pub fn get(&self, period: CapPeriod) -> Option<&PeriodCap> {
        match period {
            CapPeriod::Daily => self.daily.as_ref(),
            CapPeriod::Weekly => self.weekly.as_ref(),
            CapPeriod::Monthly => self.monthly.as_ref(),
        }
    }

    pub fn get_mut(&mut self, period: CapPeriod) -> Option<&mut PeriodCap> {
        match period {
            CapPeriod::Daily => self.daily.as_mut(),
            CapPeriod::Weekly => self.weekly.as_mut(),
            CapPeriod::Monthly => self.monthly.as_mut(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.daily.is_none() && self.weekly.is_none() && self.monthly.is_none()
    }

    /// Advance every configured cap by `amount`.
    pub fn record_spend(&mut self, amount: i64, now: DateTime<Utc>) {
        for period in CapPeriod::ALL {
            if let Some(cap) = self.get_mut(period) {
                cap.record_spend(period, amount, now);
            }
        }
    }
}
