use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use uuid::Uuid;

use crate::{
    db::{
        DbError,
        repos::{SupervisionRepo, UsageRepo},
    },
    models::SupervisionSettings,
    observability::metrics,
    pricing::microcents_to_dollars,
};

const MINUTES_PER_DAY: i32 = 24 * 60;

/// A guardian veto issued before any spend is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisionDenial {
    QuietHours { start_minute: u16, end_minute: u16 },
    DailyCeilingReached { ceiling: i64, spent: i64 },
}

impl SupervisionDenial {
    pub fn code(&self) -> &'static str {
        match self {
            Self::QuietHours { .. } => "quiet_hours",
            Self::DailyCeilingReached { .. } => "daily_ceiling_reached",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::QuietHours {
                start_minute,
                end_minute,
            } => format!(
                "Generation is paused during quiet hours ({} to {}).",
                format_minute(*start_minute),
                format_minute(*end_minute)
            ),
            Self::DailyCeilingReached { ceiling, .. } => format!(
                "Today's spending ceiling of ${:.2} has been reached.",
                microcents_to_dollars(*ceiling)
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precheck {
    /// `supervised` turns on metadata extraction for the request
    Allowed { supervised: bool },
    Denied(SupervisionDenial),
}

/// Guardian precheck. Cheap, read-only, and always the first check a
/// request goes through.
#[derive(Clone)]
pub struct SupervisionPolicy {
    settings: Arc<dyn SupervisionRepo>,
    usage: Arc<dyn UsageRepo>,
}

impl SupervisionPolicy {
    pub fn new(settings: Arc<dyn SupervisionRepo>, usage: Arc<dyn UsageRepo>) -> Self {
        Self { settings, usage }
    }

    pub async fn precheck(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Precheck, DbError> {
        let Some(settings) = self
            .settings
            .get_settings(user_id)
            .await?
            .filter(|s| s.enabled)
        else {
            return Ok(Precheck::Allowed { supervised: false });
        };

        let outcome = self.evaluate(&settings, now).await?;
        let result = match outcome {
            Precheck::Allowed { .. } => "allowed",
            Precheck::Denied(denial) => {
                tracing::info!(
                    user_id = %user_id,
                    reason = denial.code(),
                    "Supervision precheck denied request"
                );
                denial.code()
            }
        };
        metrics::record_supervision_check(result);
        Ok(outcome)
    }

    async fn evaluate(
        &self,
        settings: &SupervisionSettings,
        now: DateTime<Utc>,
    ) -> Result<Precheck, DbError> {
        if let (Some(start), Some(end)) = (settings.quiet_start_minute, settings.quiet_end_minute)
            && in_quiet_hours(start, end, local_minute(now, settings.utc_offset_minutes))
        {
            return Ok(Precheck::Denied(SupervisionDenial::QuietHours {
                start_minute: start,
                end_minute: end,
            }));
        }

        if let Some(ceiling) = settings.daily_ceiling_microcents {
            let since = local_day_start(now, settings.utc_offset_minutes);
            let spent = self.usage.user_spend_since(settings.user_id, since).await?;
            if spent >= ceiling {
                return Ok(Precheck::Denied(SupervisionDenial::DailyCeilingReached {
                    ceiling,
                    spent,
                }));
            }
        }

        Ok(Precheck::Allowed { supervised: true })
    }
}

/// Minute of the local day for a UTC instant.
pub fn local_minute(now: DateTime<Utc>, utc_offset_minutes: i32) -> u16 {
    let utc_minute = (now.hour() * 60 + now.minute()) as i32;
    (utc_minute + utc_offset_minutes).rem_euclid(MINUTES_PER_DAY) as u16
}

/// Whether `minute` falls in `[start, end)`. The window wraps midnight when
/// `start > end`. `start == end` is an empty window.
pub fn in_quiet_hours(start: u16, end: u16, minute: u16) -> bool {
    match start.cmp(&end) {
        std::cmp::Ordering::Less => start <= minute && minute < end,
        std::cmp::Ordering::Greater => minute >= start || minute < end,
        std::cmp::Ordering::Equal => false,
    }
}

/// UTC instant of the most recent local midnight.
pub fn local_day_start(now: DateTime<Utc>, utc_offset_minutes: i32) -> DateTime<Utc> {
    let offset = Duration::minutes(i64::from(utc_offset_minutes));
    let local = now + offset;
    local.date_naive().and_time(NaiveTime::MIN).and_utc() - offset
}

fn format_minute(minute: u16) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rstest::rstest;

    use super::*;
    use crate::{
        db::tests::create_test_db,
        models::{CreateUser, DebitStatus, NewUsageRecord, PoolKind},
    };

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, h, m, 0).unwrap()
    }

    #[rstest]
    #[case(9 * 60, 17 * 60, 12 * 60, true)]
    #[case(9 * 60, 17 * 60, 17 * 60, false)]
    #[case(9 * 60, 17 * 60, 9 * 60, true)]
    #[case(21 * 60, 7 * 60, 23 * 60, true)]
    #[case(21 * 60, 7 * 60, 3 * 60, true)]
    #[case(21 * 60, 7 * 60, 7 * 60, false)]
    #[case(21 * 60, 7 * 60, 12 * 60, false)]
    #[case(8 * 60, 8 * 60, 8 * 60, false)]
    fn test_quiet_hours_window(
        #[case] start: u16,
        #[case] end: u16,
        #[case] minute: u16,
        #[case] expected: bool,
    ) {
        assert_eq!(in_quiet_hours(start, end, minute), expected);
    }

    #[rstest]
    #[case(at(12, 30), 0, 750)]
    #[case(at(2, 0), -300, 21 * 60)]
    #[case(at(22, 15), 120, 15)]
    fn test_local_minute(#[case] now: DateTime<Utc>, #[case] offset: i32, #[case] expected: u16) {
        assert_eq!(local_minute(now, offset), expected);
    }

    #[test]
    fn test_local_day_start_with_negative_offset() {
        // 02:00 UTC is 21:00 the previous day at UTC-5
        let start = local_day_start(at(2, 0), -300);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 3, 5, 0, 0).unwrap());
    }

    async fn setup(settings: impl FnOnce(Uuid) -> SupervisionSettings) -> (SupervisionPolicy, crate::db::DbPool, Uuid) {
        let db = create_test_db().await;
        let user_id = db.users().create(CreateUser::default()).await.unwrap().id;
        db.supervision().upsert_settings(&settings(user_id)).await.unwrap();
        (SupervisionPolicy::new(db.supervision(), db.usage()), db, user_id)
    }

    #[tokio::test]
    async fn test_unsupervised_user_is_allowed() {
        let (policy, _db, user_id) = setup(SupervisionSettings::disabled).await;
        assert_eq!(
            policy.precheck(user_id, at(3, 0)).await.unwrap(),
            Precheck::Allowed { supervised: false }
        );
    }

    #[tokio::test]
    async fn test_quiet_hours_deny() {
        let (policy, _db, user_id) = setup(|user_id| SupervisionSettings {
            enabled: true,
            quiet_start_minute: Some(21 * 60),
            quiet_end_minute: Some(7 * 60),
            ..SupervisionSettings::disabled(user_id)
        })
        .await;

        let denied = policy.precheck(user_id, at(23, 0)).await.unwrap();
        assert!(matches!(
            denied,
            Precheck::Denied(SupervisionDenial::QuietHours { .. })
        ));
        assert_eq!(
            policy.precheck(user_id, at(12, 0)).await.unwrap(),
            Precheck::Allowed { supervised: true }
        );
    }

    #[tokio::test]
    async fn test_daily_ceiling_counts_today_only() {
        let (policy, db, user_id) = setup(|user_id| SupervisionSettings {
            enabled: true,
            daily_ceiling_microcents: Some(1_000),
            ..SupervisionSettings::disabled(user_id)
        })
        .await;

        let record = |request_id: &str, cost, created_at| NewUsageRecord {
            request_id: request_id.to_string(),
            pool_kind: PoolKind::Personal,
            pool_id: user_id,
            user_id,
            model: "m".into(),
            input_tokens: 1,
            output_tokens: 1,
            cost_microcents: cost,
            co2_grams: 0.0,
            debit_status: DebitStatus::Debited,
            created_at,
        };
        db.usage()
            .record(record("yesterday", 5_000, at(0, 0) - Duration::hours(1)))
            .await
            .unwrap();
        db.usage().record(record("today", 999, at(8, 0))).await.unwrap();

        assert_eq!(
            policy.precheck(user_id, at(12, 0)).await.unwrap(),
            Precheck::Allowed { supervised: true }
        );

        db.usage().record(record("more", 1, at(9, 0))).await.unwrap();
        assert_eq!(
            policy.precheck(user_id, at(12, 0)).await.unwrap(),
            Precheck::Denied(SupervisionDenial::DailyCeilingReached {
                ceiling: 1_000,
                spent: 1_000
            })
        );
    }

    #[test]
    fn test_denial_messages() {
        let quiet = SupervisionDenial::QuietHours {
            start_minute: 21 * 60,
            end_minute: 7 * 60 + 30,
        };
        assert_eq!(quiet.message(), "Generation is paused during quiet hours (21:00 to 07:30).");
        let ceiling = SupervisionDenial::DailyCeilingReached {
            ceiling: 2_500_000,
            spent: 2_600_000,
        };
        assert!(ceiling.message().contains("$2.50"));
    }
}
