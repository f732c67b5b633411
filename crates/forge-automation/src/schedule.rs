//! Cron scheduling
//!
//! Computes cron occurrences in a configured timezone and guarantees each
//! occurrence is dispatched at most once, even under concurrent evaluators
//! or after a restart (given a seeded ledger).

use crate::dispatch::Dispatcher;
use crate::execution::{WorkflowExecution, WorkflowSource};
use crate::triggers::Stimulus;
use crate::workflow::{TriggerConfig, TriggerType};
use crate::{AutomationError, Result};
use chrono::{DateTime, Datelike, Duration, LocalResult, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use forge_core::WorkflowId;
use tokio::sync::RwLock;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

/// One field of a cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CronField {
    Any,
    Values(BTreeSet<u32>),
}

impl CronField {
    fn matches(&self, value: u32) -> bool {
        match self {
            CronField::Any => true,
            CronField::Values(values) => values.contains(&value),
        }
    }

    /// Parse one field: `*`, `*/n`, `a`, `a-b`, `a-b/n`, and comma lists.
    fn parse(spec: &str, min: u32, max: u32) -> Option<Self> {
        if spec == "*" {
            return Some(CronField::Any);
        }

        let mut values = BTreeSet::new();
        for item in spec.split(',') {
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => (range, step.parse::<u32>().ok()?),
                None => (item, 1),
            };
            if step == 0 {
                return None;
            }

            let (lo, hi) = if range == "*" {
                (min, max)
            } else if let Some((a, b)) = range.split_once('-') {
                (a.parse().ok()?, b.parse().ok()?)
            } else {
                let v: u32 = range.parse().ok()?;
                (v, v)
            };

            if lo < min || hi > max || lo > hi {
                return None;
            }
            for v in (lo..=hi).step_by(step as usize) {
                values.insert(v);
            }
        }

        if values.is_empty() {
            None
        } else {
            Some(CronField::Values(values))
        }
    }
}

/// A parsed five-field cron expression bound to a timezone.
///
/// Fields: minute, hour, day-of-month, month, day-of-week (0 = Sunday,
/// 7 accepted as Sunday). When both day fields are restricted, both must
/// match.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
    tz: Tz,
}

// Search bound for the next occurrence: two years of minutes.
const MAX_SCAN_MINUTES: u32 = 2 * 366 * 24 * 60;

impl CronSchedule {
    pub fn parse(expression: &str, timezone: &str) -> Result<Self> {
        let tz: Tz = timezone.parse().map_err(|_| {
            AutomationError::InvalidTriggerConfig(format!("unknown timezone: {}", timezone))
        })?;

        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(AutomationError::InvalidTriggerConfig(format!(
                "cron expression must have 5 fields, got {}: '{}'",
                parts.len(),
                expression
            )));
        }

        let field = |spec: &str, min: u32, max: u32, name: &str| {
            CronField::parse(spec, min, max).ok_or_else(|| {
                AutomationError::InvalidTriggerConfig(format!(
                    "invalid cron {} field: '{}'",
                    name, spec
                ))
            })
        };

        let day_of_week = match field(parts[4], 0, 7, "day-of-week")? {
            CronField::Values(values) => {
                // 7 is an alias for Sunday.
                CronField::Values(values.into_iter().map(|v| v % 7).collect())
            }
            any => any,
        };

        Ok(Self {
            minute: field(parts[0], 0, 59, "minute")?,
            hour: field(parts[1], 0, 23, "hour")?,
            day_of_month: field(parts[2], 1, 31, "day-of-month")?,
            month: field(parts[3], 1, 12, "month")?,
            day_of_week,
            tz,
        })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    fn day_matches(&self, local: &DateTime<Tz>) -> bool {
        self.month.matches(local.month())
            && self.day_of_month.matches(local.day())
            && self
                .day_of_week
                .matches(local.weekday().num_days_from_sunday())
    }

    /// Does this instant (truncated to the minute, in the schedule's
    /// timezone) fall on a cron occurrence?
    pub fn matches(&self, instant: DateTime<Utc>) -> bool {
        let local = instant.with_timezone(&self.tz);
        self.day_matches(&local)
            && self.hour.matches(local.hour())
            && self.minute.matches(local.minute())
    }

    /// The first occurrence strictly after `after`, or `None` if no
    /// occurrence exists within the search horizon.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut local = (after + Duration::minutes(1))
            .with_timezone(&self.tz)
            .with_second(0)?
            .with_nanosecond(0)?;

        let mut scanned: u32 = 0;
        while scanned < MAX_SCAN_MINUTES {
            if !self.day_matches(&local) {
                // Skip ahead to the next local midnight.
                let next_day = local.date_naive().succ_opt()?;
                let midnight = next_day.and_hms_opt(0, 0, 0)?;
                local = match self.tz.from_local_datetime(&midnight) {
                    LocalResult::Single(dt) => dt,
                    LocalResult::Ambiguous(first, _) => first,
                    // Midnight lost to a DST gap: fall into the next hour.
                    LocalResult::None => self
                        .tz
                        .from_local_datetime(&next_day.and_hms_opt(1, 0, 0)?)
                        .earliest()?,
                };
                scanned += 24 * 60;
                continue;
            }

            if self.hour.matches(local.hour()) && self.minute.matches(local.minute()) {
                return Some(local.with_timezone(&Utc));
            }

            local = local + Duration::minutes(1);
            scanned += 1;
        }

        None
    }
}

/// Time source, injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Tracks the last fired occurrence per workflow so a single occurrence is
/// dispatched at most once. `claim` is a check-and-set under one write
/// lock, so concurrent evaluators cannot both win the same occurrence.
#[derive(Default)]
pub struct OccurrenceLedger {
    fired: RwLock<HashMap<WorkflowId, DateTime<Utc>>>,
}

impl OccurrenceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the ledger, e.g. from persisted execution records on startup.
    pub async fn seed(&self, workflow_id: WorkflowId, last_fired: DateTime<Utc>) {
        let mut fired = self.fired.write().await;
        let entry = fired.entry(workflow_id).or_insert(last_fired);
        if *entry < last_fired {
            *entry = last_fired;
        }
    }

    pub async fn last_fired(&self, workflow_id: WorkflowId) -> Option<DateTime<Utc>> {
        self.fired.read().await.get(&workflow_id).copied()
    }

    /// Claim an occurrence for dispatch. Returns `false` if this or a later
    /// occurrence was already claimed for the workflow.
    pub async fn claim(&self, workflow_id: WorkflowId, occurrence: DateTime<Utc>) -> bool {
        let mut fired = self.fired.write().await;
        match fired.get(&workflow_id) {
            Some(last) if *last >= occurrence => false,
            _ => {
                fired.insert(workflow_id, occurrence);
                true
            }
        }
    }
}

/// Poll-loop service that fires due cron occurrences through the dispatcher.
pub struct ScheduleRunner {
    workflows: Arc<dyn WorkflowSource>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    ledger: Arc<OccurrenceLedger>,
    poll_interval: std::time::Duration,
    running: Arc<RwLock<bool>>,
}

impl ScheduleRunner {
    pub fn new(
        workflows: Arc<dyn WorkflowSource>,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            workflows,
            dispatcher,
            clock,
            ledger: Arc::new(OccurrenceLedger::new()),
            poll_interval: std::time::Duration::from_secs(30),
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn with_poll_interval(mut self, interval: std::time::Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn ledger(&self) -> Arc<OccurrenceLedger> {
        self.ledger.clone()
    }

    /// Run the poll loop until `stop` is called.
    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("Schedule runner already running");
                return;
            }
            *running = true;
        }

        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "Starting schedule runner"
        );

        let start = Instant::now() + std::time::Duration::from_secs(1);
        let mut interval = interval_at(start, self.poll_interval);

        loop {
            interval.tick().await;

            if !*self.running.read().await {
                break;
            }

            if let Err(e) = self.tick().await {
                error!(error = %e, "Error evaluating schedules");
            }
        }

        info!("Schedule runner stopped");
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        info!("Stopping schedule runner");
    }

    /// Evaluate all enabled SCHEDULE workflows once and dispatch any due,
    /// unclaimed occurrence. Exposed for tests and for hosts that drive
    /// their own loop.
    pub async fn tick(&self) -> Result<Vec<WorkflowExecution>> {
        let now = self.clock.now();
        let workflows = self.workflows.list_enabled(TriggerType::Schedule).await?;
        let mut started = Vec::new();

        debug!(count = workflows.len(), "Evaluating schedule workflows");

        for workflow in workflows {
            let TriggerConfig::Schedule { cron, timezone } = &workflow.trigger else {
                continue;
            };

            let schedule = match CronSchedule::parse(cron, timezone) {
                Ok(schedule) => schedule,
                Err(e) => {
                    // Workflows are validated before enablement; an
                    // unparseable cron here means stale data. Skip it.
                    warn!(workflow_id = %workflow.id, error = %e, "Skipping schedule with invalid cron");
                    continue;
                }
            };

            let baseline = match self.ledger.last_fired(workflow.id).await {
                Some(last) => last,
                None => workflow.last_run_at.unwrap_or_else(|| {
                    now - Duration::from_std(self.poll_interval)
                        .unwrap_or_else(|_| Duration::seconds(60))
                }),
            };

            let Some(first_due) = schedule.next_after(baseline) else {
                continue;
            };
            if first_due > now {
                continue;
            }

            // Only the most recent due occurrence fires; missed ones are
            // not caught up. The walk terminates because occurrences are
            // strictly increasing and bounded by `now`.
            let mut due = first_due;
            while let Some(next) = schedule.next_after(due) {
                if next > now {
                    break;
                }
                due = next;
            }

            if !self.ledger.claim(workflow.id, due).await {
                debug!(
                    workflow_id = %workflow.id,
                    occurrence = %due,
                    "Occurrence already dispatched, skipping"
                );
                continue;
            }

            match self
                .dispatcher
                .execute_for(&workflow, Stimulus::Schedule { occurrence: due })
                .await
            {
                Ok(Some(execution)) => {
                    info!(
                        workflow_id = %workflow.id,
                        execution_id = %execution.id,
                        occurrence = %due,
                        "Dispatched scheduled workflow"
                    );
                    started.push(execution);
                }
                Ok(None) => {
                    debug!(workflow_id = %workflow.id, "Schedule occurrence did not match conditions");
                }
                Err(e) => {
                    error!(workflow_id = %workflow.id, error = %e, "Scheduled dispatch failed");
                }
            }
        }

        Ok(started)
    }
}
