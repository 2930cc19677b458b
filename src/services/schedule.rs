use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveTime, Utc};
use chrono_tz::Tz;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::{
    entities::schedule_rule::{self, Model as ScheduleRuleModel},
    entities::store_override::{self, Model as StoreOverrideModel, SINGLETON_ID},
    errors::ServiceError,
    events::{Event, EventSender},
};

const WEEKDAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

const DEFAULT_MANUAL_REASON: &str = "closed by the operator";
const DEFAULT_EXCEPTIONAL_REASON: &str = "exceptionally closed today";

/// Outcome of a storefront gate check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreOpenStatus {
    pub open: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StoreOpenStatus {
    fn open() -> Self {
        Self {
            open: true,
            reason: None,
        }
    }

    fn closed(reason: impl Into<String>) -> Self {
        Self {
            open: false,
            reason: Some(reason.into()),
        }
    }
}

fn format_time(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

/// Decide whether the storefront is accepting orders at `now`.
///
/// Precedence, first match wins: manual override, exceptional closure, then a
/// forward walk over the weekly rules starting at today. All comparisons
/// happen in the store's fixed time zone `tz`; the caller's clock is
/// irrelevant. Pure and deterministic for a given `now`.
pub fn evaluate(
    rules: &[ScheduleRuleModel],
    store_override: &StoreOverrideModel,
    now: DateTime<Utc>,
    tz: Tz,
) -> StoreOpenStatus {
    if store_override.manual_closed {
        return StoreOpenStatus::closed(
            store_override
                .manual_message
                .clone()
                .unwrap_or_else(|| DEFAULT_MANUAL_REASON.to_string()),
        );
    }

    if store_override.closed_today {
        return StoreOpenStatus::closed(
            store_override
                .closed_today_reason
                .clone()
                .unwrap_or_else(|| DEFAULT_EXCEPTIONAL_REASON.to_string()),
        );
    }

    let local = now.with_timezone(&tz);
    let today = local.weekday().num_days_from_monday() as i16;
    let now_time = local.time();

    // Walk today plus the following week. Offset 7 is today's weekday again:
    // it only matters when today's window has already passed and no earlier
    // day is open.
    for offset in 0..=7i16 {
        let weekday = (today + offset) % 7;
        let Some(rule) = rules.iter().find(|r| r.weekday == weekday) else {
            continue;
        };
        if !rule.is_open {
            continue;
        }

        let opens = format_time(rule.opens_at);
        if offset == 0 {
            if now_time < rule.opens_at {
                return StoreOpenStatus::closed(format!("opens today at {opens}"));
            }
            if now_time <= rule.closes_at {
                return StoreOpenStatus::open();
            }
            // Past closing: keep walking to the next open day.
            continue;
        }
        if offset == 1 {
            return StoreOpenStatus::closed(format!("opens tomorrow at {opens}"));
        }
        return StoreOpenStatus::closed(format!(
            "opens on {} at {}",
            WEEKDAY_NAMES[weekday as usize], opens
        ));
    }

    StoreOpenStatus::closed("closed indefinitely")
}

/// Operator payload for one weekday of the weekly schedule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleRuleUpdate {
    pub weekday: i16,
    pub is_open: bool,
    /// "HH:MM" in the store time zone
    pub opens_at: String,
    pub closes_at: String,
}

/// Operator payload for the override switches.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OverrideUpdate {
    pub manual_closed: bool,
    #[serde(default)]
    pub manual_message: Option<String>,
    pub closed_today: bool,
    #[serde(default)]
    pub closed_today_reason: Option<String>,
}

fn parse_hhmm(raw: &str) -> Result<NaiveTime, ServiceError> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| ServiceError::ValidationError(format!("Invalid time of day: {raw}")))
}

/// Store-hours service: persists the weekly rules and override switches and
/// answers the storefront gate.
#[derive(Clone)]
pub struct ScheduleService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    tz: Tz,
}

impl ScheduleService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender, tz: Tz) -> Self {
        Self {
            db,
            event_sender,
            tz,
        }
    }

    /// Storefront gate: evaluates the schedule against the current instant.
    #[instrument(skip(self))]
    pub async fn current_status(&self) -> Result<StoreOpenStatus, ServiceError> {
        let rules = self.list_rules().await?;
        let store_override = self.get_override().await?;
        Ok(evaluate(&rules, &store_override, Utc::now(), self.tz))
    }

    #[instrument(skip(self))]
    pub async fn list_rules(&self) -> Result<Vec<ScheduleRuleModel>, ServiceError> {
        let rules = schedule_rule::Entity::find()
            .order_by_asc(schedule_rule::Column::Weekday)
            .all(&*self.db)
            .await?;
        Ok(rules)
    }

    /// The override singleton; a neutral row is assumed until an operator
    /// first touches the switches.
    #[instrument(skip(self))]
    pub async fn get_override(&self) -> Result<StoreOverrideModel, ServiceError> {
        let row = store_override::Entity::find_by_id(SINGLETON_ID)
            .one(&*self.db)
            .await?;
        Ok(row.unwrap_or_else(StoreOverrideModel::inactive))
    }

    /// Replace the weekly schedule. Rules arrive per weekday and are
    /// validated before any write; a `StoreConfig` change event is emitted so
    /// storefront banners refresh.
    #[instrument(skip(self, updates), fields(count = updates.len()))]
    pub async fn upsert_rules(
        &self,
        updates: Vec<ScheduleRuleUpdate>,
    ) -> Result<Vec<ScheduleRuleModel>, ServiceError> {
        let mut parsed = Vec::with_capacity(updates.len());
        for update in &updates {
            if !(0..=6).contains(&update.weekday) {
                return Err(ServiceError::ValidationError(format!(
                    "Weekday must be 0-6, got {}",
                    update.weekday
                )));
            }
            let opens_at = parse_hhmm(&update.opens_at)?;
            let closes_at = parse_hhmm(&update.closes_at)?;
            if update.is_open && closes_at <= opens_at {
                return Err(ServiceError::ValidationError(format!(
                    "Closing time must be after opening time on {}",
                    WEEKDAY_NAMES[update.weekday as usize]
                )));
            }
            parsed.push((update, opens_at, closes_at));
        }

        let now = Utc::now();
        let mut saved = Vec::with_capacity(parsed.len());
        for (update, opens_at, closes_at) in parsed {
            let existing = schedule_rule::Entity::find_by_id(update.weekday)
                .one(&*self.db)
                .await?;

            let model = match existing {
                Some(rule) => {
                    let mut active: schedule_rule::ActiveModel = rule.into();
                    active.is_open = Set(update.is_open);
                    active.opens_at = Set(opens_at);
                    active.closes_at = Set(closes_at);
                    active.updated_at = Set(now);
                    active.update(&*self.db).await?
                }
                None => {
                    let active = schedule_rule::ActiveModel {
                        weekday: Set(update.weekday),
                        is_open: Set(update.is_open),
                        opens_at: Set(opens_at),
                        closes_at: Set(closes_at),
                        updated_at: Set(now),
                    };
                    active.insert(&*self.db).await?
                }
            };
            saved.push(model);
        }

        if let Err(e) = self.event_sender.send(Event::ScheduleChanged).await {
            warn!(error = %e, "Failed to send schedule changed event");
        }

        Ok(saved)
    }

    /// Flip the override switches. Overrides win over the weekly schedule
    /// until an operator clears them.
    #[instrument(skip(self, update))]
    pub async fn set_override(
        &self,
        update: OverrideUpdate,
    ) -> Result<StoreOverrideModel, ServiceError> {
        let now = Utc::now();
        let existing = store_override::Entity::find_by_id(SINGLETON_ID)
            .one(&*self.db)
            .await?;

        let model = match existing {
            Some(row) => {
                let mut active: store_override::ActiveModel = row.into();
                active.manual_closed = Set(update.manual_closed);
                active.manual_message = Set(update.manual_message);
                active.closed_today = Set(update.closed_today);
                active.closed_today_reason = Set(update.closed_today_reason);
                active.updated_at = Set(now);
                active.update(&*self.db).await?
            }
            None => {
                let active = store_override::ActiveModel {
                    id: Set(SINGLETON_ID),
                    manual_closed: Set(update.manual_closed),
                    manual_message: Set(update.manual_message),
                    closed_today: Set(update.closed_today),
                    closed_today_reason: Set(update.closed_today_reason),
                    updated_at: Set(now),
                };
                active.insert(&*self.db).await?
            }
        };

        if let Err(e) = self.event_sender.send(Event::OverrideChanged).await {
            warn!(error = %e, "Failed to send override changed event");
        }

        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // Fixed offset zone (-03, no DST since 2019) keeps the expectations exact.
    const TZ: Tz = chrono_tz::America::Sao_Paulo;

    fn rule(weekday: i16, is_open: bool, opens: (u32, u32), closes: (u32, u32)) -> ScheduleRuleModel {
        ScheduleRuleModel {
            weekday,
            is_open,
            opens_at: NaiveTime::from_hms_opt(opens.0, opens.1, 0).unwrap(),
            closes_at: NaiveTime::from_hms_opt(closes.0, closes.1, 0).unwrap(),
            updated_at: Utc::now(),
        }
    }

    fn week(open_days: &[i16]) -> Vec<ScheduleRuleModel> {
        (0..7)
            .map(|d| rule(d, open_days.contains(&d), (11, 0), (22, 0)))
            .collect()
    }

    fn no_override() -> StoreOverrideModel {
        StoreOverrideModel::inactive()
    }

    /// Local store wall-clock instant converted back to UTC.
    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        TZ.with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn open_within_todays_window() {
        // 2026-08-05 is a Wednesday (weekday 2)
        let status = evaluate(&week(&[2]), &no_override(), local(2026, 8, 5, 12, 0), TZ);
        assert!(status.open);
        assert!(status.reason.is_none());
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let rules = week(&[2]);
        let at_open = evaluate(&rules, &no_override(), local(2026, 8, 5, 11, 0), TZ);
        let at_close = evaluate(&rules, &no_override(), local(2026, 8, 5, 22, 0), TZ);
        assert!(at_open.open);
        assert!(at_close.open);
    }

    #[test]
    fn before_opening_reports_today() {
        let status = evaluate(&week(&[2]), &no_override(), local(2026, 8, 5, 9, 30), TZ);
        assert!(!status.open);
        assert_eq!(status.reason.as_deref(), Some("opens today at 11:00"));
    }

    #[test]
    fn closed_sunday_points_at_monday() {
        // 2026-08-09 is a Sunday; Monday opens at 11:00 and is tomorrow.
        let status = evaluate(&week(&[0]), &no_override(), local(2026, 8, 9, 10, 0), TZ);
        assert!(!status.open);
        assert_eq!(status.reason.as_deref(), Some("opens tomorrow at 11:00"));
    }

    #[test]
    fn distant_day_is_named() {
        // Wednesday, only Saturday (weekday 5) is open.
        let status = evaluate(&week(&[5]), &no_override(), local(2026, 8, 5, 12, 0), TZ);
        assert!(!status.open);
        assert_eq!(status.reason.as_deref(), Some("opens on Saturday at 11:00"));
    }

    #[test]
    fn past_closing_walks_to_next_open_day() {
        // Wednesday 23:00, open Wednesday and Friday: Friday wins.
        let status = evaluate(&week(&[2, 4]), &no_override(), local(2026, 8, 5, 23, 0), TZ);
        assert!(!status.open);
        assert_eq!(status.reason.as_deref(), Some("opens on Friday at 11:00"));
    }

    #[test]
    fn past_closing_with_single_open_day_wraps_to_next_week() {
        let status = evaluate(&week(&[2]), &no_override(), local(2026, 8, 5, 23, 0), TZ);
        assert!(!status.open);
        assert_eq!(status.reason.as_deref(), Some("opens on Wednesday at 11:00"));
    }

    #[test]
    fn all_days_closed_is_indefinite() {
        let status = evaluate(&week(&[]), &no_override(), local(2026, 8, 5, 12, 0), TZ);
        assert!(!status.open);
        assert_eq!(status.reason.as_deref(), Some("closed indefinitely"));
    }

    #[test]
    fn missing_rules_are_treated_as_closed() {
        let status = evaluate(&[], &no_override(), local(2026, 8, 5, 12, 0), TZ);
        assert!(!status.open);
        assert_eq!(status.reason.as_deref(), Some("closed indefinitely"));
    }

    #[test]
    fn manual_override_beats_open_schedule() {
        let mut ov = no_override();
        ov.manual_closed = true;
        ov.manual_message = Some("back next week".into());
        let status = evaluate(&week(&[0, 1, 2, 3, 4, 5, 6]), &ov, local(2026, 8, 5, 12, 0), TZ);
        assert!(!status.open);
        assert_eq!(status.reason.as_deref(), Some("back next week"));
    }

    #[test]
    fn manual_override_without_message_uses_default() {
        let mut ov = no_override();
        ov.manual_closed = true;
        let status = evaluate(&week(&[2]), &ov, local(2026, 8, 5, 12, 0), TZ);
        assert_eq!(status.reason.as_deref(), Some(DEFAULT_MANUAL_REASON));
    }

    #[test]
    fn exceptional_closure_beats_schedule_but_not_manual() {
        let mut ov = no_override();
        ov.closed_today = true;
        ov.closed_today_reason = Some("private event".into());
        let status = evaluate(&week(&[2]), &ov, local(2026, 8, 5, 12, 0), TZ);
        assert!(!status.open);
        assert_eq!(status.reason.as_deref(), Some("private event"));

        ov.manual_closed = true;
        ov.manual_message = Some("renovation".into());
        let status = evaluate(&week(&[2]), &ov, local(2026, 8, 5, 12, 0), TZ);
        assert_eq!(status.reason.as_deref(), Some("renovation"));
    }

    #[test]
    fn evaluation_uses_store_zone_not_utc() {
        // 2026-08-06 01:00 UTC is still Wednesday 22:00 in São Paulo: the
        // store is open at its closing minute even though UTC already rolled
        // into Thursday.
        let now = Utc.with_ymd_and_hms(2026, 8, 6, 1, 0, 0).unwrap();
        let status = evaluate(&week(&[2]), &no_override(), now, TZ);
        assert!(status.open);
    }

    #[test]
    fn parse_hhmm_accepts_both_precisions() {
        assert_eq!(
            parse_hhmm("09:30").unwrap(),
            NaiveTime::from_hms_opt(9, 30, 0).unwrap()
        );
        assert_eq!(
            parse_hhmm("09:30:15").unwrap(),
            NaiveTime::from_hms_opt(9, 30, 15).unwrap()
        );
        assert!(parse_hhmm("25:00").is_err());
    }
}
