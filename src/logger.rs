//! Run and step bookkeeping for daily import jobs.
//!
//! A [`RunLogger`] tracks one run at a time and, within it, one step at a
//! time. Records live in memory only; persisting them (for example through
//! [`crate::molgenis::BulkImporter`]) is up to the caller.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::clock::Clock;

pub const DEFAULT_LOG_NAME: &str = "rdtools-daily-import";

#[derive(Debug, Error, PartialEq)]
pub enum LoggerError {
    #[error("cannot {operation}: {reason}")]
    InvalidState {
        operation: &'static str,
        reason: &'static str,
    },
}

/// Logger behaviour, fixed at construction.
#[derive(Debug, Clone)]
pub struct LoggerOptions {
    pub name: String,
    pub database_name: String,
    /// Suppress all console output.
    pub silent: bool,
    /// Prefix console output with `[HH:MM:SS.mmm]`.
    pub print_with_time: bool,
}

impl Default for LoggerOptions {
    fn default() -> Self {
        Self {
            name: DEFAULT_LOG_NAME.to_string(),
            database_name: String::new(),
            silent: false,
            print_with_time: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub identifier: String,
    pub name: String,
    pub date: NaiveDate,
    pub database_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub elapsed_time: Option<f64>,
    #[serde(skip)]
    pub steps: Vec<u64>,
    /// Comma-joined step identifiers, frozen when the run stops.
    #[serde(rename = "steps")]
    pub steps_summary: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub identifier: u64,
    #[serde(skip)]
    pub sequence: u32,
    pub date: NaiveDate,
    pub name: String,
    pub step: String,
    pub database_table: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub elapsed_time: Option<f64>,
    pub status: Option<StepStatus>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    NotStarted,
    Running,
    Stopped,
}

pub struct RunLogger {
    options: LoggerOptions,
    clock: Clock,
    state: RunState,
    run: Option<RunRecord>,
    current_step: Option<StepRecord>,
    steps: Vec<StepRecord>,
}

impl RunLogger {
    pub fn new(options: LoggerOptions, clock: Clock) -> Self {
        Self {
            options,
            clock,
            state: RunState::NotStarted,
            run: None,
            current_step: None,
            steps: Vec::new(),
        }
    }

    pub fn options(&self) -> &LoggerOptions {
        &self.options
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }

    /// The current or most recently stopped run.
    pub fn run(&self) -> Option<&RunRecord> {
        self.run.as_ref()
    }

    /// Completed steps of the current or most recent run, in completion order.
    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    pub fn current_step(&self) -> Option<&StepRecord> {
        self.current_step.as_ref()
    }

    pub fn start_run(&mut self, name: &str, database_name: &str) -> Result<&RunRecord, LoggerError> {
        if self.state == RunState::Running {
            return Err(LoggerError::InvalidState {
                operation: "start run",
                reason: "a run is already in progress",
            });
        }

        let started = self.clock.now();
        let date = started.date_naive();
        self.steps.clear();
        self.current_step = None;
        self.state = RunState::Running;

        info!(run = %name, database = %database_name, "run started");
        self.emit(&format!(
            "{}: log started at {}",
            name,
            started.format("%H:%M:%S")
        ));

        Ok(&*self.run.insert(RunRecord {
            identifier: date.format("%Y-%m-%d").to_string(),
            name: name.to_string(),
            date,
            database_name: database_name.to_string(),
            start_time: started.with_timezone(&Utc),
            end_time: None,
            elapsed_time: None,
            steps: Vec::new(),
            steps_summary: None,
            comment: None,
        }))
    }

    /// Start a run using the name and database from [`LoggerOptions`].
    pub fn start(&mut self) -> Result<&RunRecord, LoggerError> {
        let name = self.options.name.clone();
        let database_name = self.options.database_name.clone();
        self.start_run(&name, &database_name)
    }

    pub fn stop_run(&mut self) -> Result<&RunRecord, LoggerError> {
        if self.state != RunState::Running {
            return Err(LoggerError::InvalidState {
                operation: "stop run",
                reason: "no run is in progress",
            });
        }
        if self.current_step.is_some() {
            return Err(LoggerError::InvalidState {
                operation: "stop run",
                reason: "a step is still in progress",
            });
        }

        let now = self.clock.now_utc();
        let Some(run) = self.run.as_mut() else {
            return Err(LoggerError::InvalidState {
                operation: "stop run",
                reason: "no run is in progress",
            });
        };
        let (end, elapsed) = stop_times(run.start_time, now);
        run.end_time = Some(end);
        run.elapsed_time = Some(elapsed);
        run.steps_summary = Some(
            run.steps
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(","),
        );
        self.state = RunState::Stopped;

        let name = run.name.clone();
        info!(run = %name, elapsed_secs = elapsed, steps = self.steps.len(), "run stopped");
        self.emit(&format!(
            "{}: log stopped (elapsed time: {} seconds)",
            name, elapsed
        ));

        self.run.as_ref().ok_or(LoggerError::InvalidState {
            operation: "stop run",
            reason: "no run is in progress",
        })
    }

    pub fn set_run_comment(&mut self, comment: impl Into<String>) -> Result<(), LoggerError> {
        match self.run.as_mut() {
            Some(run) if self.state == RunState::Running => {
                run.comment = Some(comment.into());
                Ok(())
            }
            _ => Err(LoggerError::InvalidState {
                operation: "set run comment",
                reason: "no run is in progress",
            }),
        }
    }

    pub fn start_step(
        &mut self,
        step_type: &str,
        name: &str,
        table_name: Option<&str>,
    ) -> Result<&StepRecord, LoggerError> {
        if self.state != RunState::Running {
            return Err(LoggerError::InvalidState {
                operation: "start step",
                reason: "no run is in progress",
            });
        }
        if self.current_step.is_some() {
            return Err(LoggerError::InvalidState {
                operation: "start step",
                reason: "a step is already in progress",
            });
        }

        let started = self.clock.now();
        let date = started.date_naive();
        let sequence = self.steps.len() as u32 + 1;

        debug!(step = %name, sequence, "step started");
        self.emit(&format!("{}: starting step {}", self.run_name(), name));

        Ok(&*self.current_step.insert(StepRecord {
            identifier: step_identifier(date, sequence),
            sequence,
            date,
            name: name.to_string(),
            step: step_type.to_string(),
            database_table: table_name.map(str::to_string),
            start_time: started.with_timezone(&Utc),
            end_time: None,
            elapsed_time: None,
            status: None,
            comment: None,
        }))
    }

    pub fn stop_step(&mut self) -> Result<&StepRecord, LoggerError> {
        self.stop_step_with(StepStatus::Success, None)
    }

    pub fn stop_step_with(
        &mut self,
        status: StepStatus,
        comment: Option<String>,
    ) -> Result<&StepRecord, LoggerError> {
        let Some(mut step) = self.current_step.take() else {
            return Err(LoggerError::InvalidState {
                operation: "stop step",
                reason: "no step is in progress",
            });
        };

        let (end, elapsed) = stop_times(step.start_time, self.clock.now_utc());
        step.end_time = Some(end);
        step.elapsed_time = Some(elapsed);
        step.status = Some(status);
        step.comment = comment;

        if let Some(run) = self.run.as_mut() {
            run.steps.push(step.identifier);
        }

        debug!(step = %step.name, ?status, elapsed_secs = elapsed, "step stopped");
        self.emit(&format!(
            "{}: finished step {} in {} seconds",
            self.run_name(),
            step.name,
            elapsed
        ));

        self.steps.push(step);
        self.steps.last().ok_or(LoggerError::InvalidState {
            operation: "stop step",
            reason: "no step is in progress",
        })
    }

    /// The console line for `message`, or `None` when silenced.
    pub fn render(&self, message: &str) -> Option<String> {
        if self.options.silent {
            return None;
        }
        if self.options.print_with_time {
            Some(self.clock.line(&[&message]))
        } else {
            Some(message.to_string())
        }
    }

    fn emit(&self, message: &str) {
        if let Some(line) = self.render(message) {
            println!("{}", line);
        }
    }

    fn run_name(&self) -> &str {
        self.run
            .as_ref()
            .map(|r| r.name.as_str())
            .unwrap_or(&self.options.name)
    }
}

/// `YYYYMMDD` followed by the decimal sequence number, read as one integer.
pub fn step_identifier(date: NaiveDate, sequence: u32) -> u64 {
    let date_part =
        date.year() as u64 * 10_000 + date.month() as u64 * 100 + date.day() as u64;
    let mut shift = 10u64;
    while shift <= sequence as u64 {
        shift *= 10;
    }
    date_part * shift + sequence as u64
}

/// End time clamped to `start`, and elapsed seconds between the two.
fn stop_times(start: DateTime<Utc>, now: DateTime<Utc>) -> (DateTime<Utc>, f64) {
    let end = now.max(start);
    let elapsed = (end - start)
        .num_microseconds()
        .map(|us| us as f64 / 1_000_000.0)
        .unwrap_or_else(|| (end - start).num_seconds() as f64);
    (end, elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::ManualTime;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn logger_at(now: DateTime<Utc>) -> (RunLogger, Arc<ManualTime>) {
        let time = ManualTime::at(now);
        let clock = Clock::with_source(chrono_tz::Europe::Amsterdam, time.clone());
        let options = LoggerOptions {
            silent: true,
            database_name: "cosas".to_string(),
            ..LoggerOptions::default()
        };
        (RunLogger::new(options, clock), time)
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 14, 11, 0, 0).unwrap()
    }

    #[test]
    fn test_full_run_records_steps_in_completion_order() {
        let (mut logger, time) = logger_at(noon());
        logger.start_run("daily-import", "cosas").unwrap();

        for name in ["fetch-patients", "fetch-analyses", "import-variants"] {
            logger.start_step("retrieve", name, Some("cosas_patients")).unwrap();
            time.advance_millis(250);
            logger.stop_step().unwrap();
        }

        time.advance_millis(500);
        let run = logger.stop_run().unwrap();

        assert_eq!(run.steps, vec![202403141, 202403142, 202403143]);
        assert_eq!(
            run.steps_summary.as_deref(),
            Some("202403141,202403142,202403143")
        );
        assert_eq!(run.elapsed_time, Some(1.25));
        assert_eq!(run.identifier, "2024-03-14");

        let names: Vec<_> = logger.steps().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["fetch-patients", "fetch-analyses", "import-variants"]);
    }

    #[test]
    fn test_stop_before_start_is_invalid() {
        let (mut logger, _) = logger_at(noon());
        assert!(matches!(
            logger.stop_step(),
            Err(LoggerError::InvalidState { .. })
        ));
        assert!(matches!(
            logger.stop_run(),
            Err(LoggerError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_step_requires_running_run() {
        let (mut logger, _) = logger_at(noon());
        assert!(logger.start_step("retrieve", "x", None).is_err());
    }

    #[test]
    fn test_double_start_run_is_invalid() {
        let (mut logger, _) = logger_at(noon());
        logger.start().unwrap();
        assert!(logger.start().is_err());
    }

    #[test]
    fn test_second_start_step_keeps_running_step() {
        let (mut logger, time) = logger_at(noon());
        logger.start().unwrap();
        let first_start = logger.start_step("retrieve", "first", None).unwrap().start_time;

        time.advance_millis(1_000);
        let err = logger.start_step("retrieve", "second", None).unwrap_err();
        assert!(matches!(err, LoggerError::InvalidState { .. }));

        let current = logger.current_step().unwrap();
        assert_eq!(current.name, "first");
        assert_eq!(current.start_time, first_start);
    }

    #[test]
    fn test_stop_run_with_open_step_is_invalid() {
        let (mut logger, _) = logger_at(noon());
        logger.start().unwrap();
        logger.start_step("retrieve", "open", None).unwrap();
        assert!(logger.stop_run().is_err());
        assert!(logger.is_running());
    }

    #[test]
    fn test_sequence_restarts_for_each_run() {
        let (mut logger, _) = logger_at(noon());

        let mut identifiers = Vec::new();
        for _ in 0..2 {
            logger.start().unwrap();
            for seq in 1..=3u32 {
                let step = logger.start_step("transform", "step", None).unwrap();
                assert_eq!(step.sequence, seq);
                logger.stop_step().unwrap();
            }
            identifiers.push(logger.stop_run().unwrap().steps.clone());
        }

        assert_eq!(identifiers[0], identifiers[1]);
    }

    #[test]
    fn test_elapsed_never_negative() {
        let (mut logger, time) = logger_at(noon());
        logger.start().unwrap();
        logger.start_step("retrieve", "skewed", None).unwrap();
        time.advance_millis(-2_000);
        let step = logger.stop_step().unwrap();

        assert_eq!(step.elapsed_time, Some(0.0));
        assert!(step.end_time.unwrap() >= step.start_time);
    }

    #[test]
    fn test_stop_step_with_status_and_comment() {
        let (mut logger, _) = logger_at(noon());
        logger.start().unwrap();
        logger.start_step("import", "import-variants", Some("alissa_variants")).unwrap();
        let step = logger
            .stop_step_with(StepStatus::Failed, Some("upstream returned 500".into()))
            .unwrap();

        assert_eq!(step.status, Some(StepStatus::Failed));
        assert_eq!(step.comment.as_deref(), Some("upstream returned 500"));
        assert_eq!(step.database_table.as_deref(), Some("alissa_variants"));
    }

    #[test]
    fn test_step_identifier_concatenates_date_and_sequence() {
        let date = NaiveDate::from_ymd_opt(2023, 12, 1).unwrap();
        assert_eq!(step_identifier(date, 1), 202312011);
        assert_eq!(step_identifier(date, 9), 202312019);
        assert_eq!(step_identifier(date, 10), 2023120110);
        assert_eq!(step_identifier(date, 123), 20231201123);
    }

    #[test]
    fn test_date_follows_configured_timezone() {
        // 23:30 UTC is already the next day in Amsterdam
        let late = Utc.with_ymd_and_hms(2024, 3, 14, 23, 30, 0).unwrap();
        let (mut logger, _) = logger_at(late);
        logger.start().unwrap();
        let step = logger.start_step("retrieve", "late", None).unwrap();
        assert_eq!(step.identifier, 202403151);
    }

    #[test]
    fn test_render_honours_flags() {
        let time = ManualTime::at(noon());
        let clock = Clock::with_source(chrono_tz::UTC, time);

        let plain = RunLogger::new(
            LoggerOptions {
                print_with_time: false,
                ..LoggerOptions::default()
            },
            clock.clone(),
        );
        assert_eq!(plain.render("hello").as_deref(), Some("hello"));

        let stamped = RunLogger::new(LoggerOptions::default(), clock.clone());
        assert_eq!(
            stamped.render("hello").as_deref(),
            Some("[11:00:00.000] hello")
        );

        let silent = RunLogger::new(
            LoggerOptions {
                silent: true,
                ..LoggerOptions::default()
            },
            clock,
        );
        assert_eq!(silent.render("hello"), None);
    }

    #[test]
    fn test_records_serialize_with_display_steps() {
        let (mut logger, _) = logger_at(noon());
        logger.start().unwrap();
        logger.start_step("retrieve", "a", None).unwrap();
        logger.stop_step().unwrap();
        let run = logger.stop_run().unwrap();

        let json = serde_json::to_value(run).unwrap();
        assert_eq!(json["steps"], "202403141");
        assert_eq!(json["databaseName"], "cosas");
    }
}
