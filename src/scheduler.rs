//! Review scheduling.
//!
//! Everything here is a pure function of its inputs and the calendar date
//! handed in by a [`Clock`]. Nothing touches storage.

use chrono::{Duration, Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{ProgressRecord, ProgressStatus, Topic};

pub trait Clock {
    fn today(&self) -> NaiveDate;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewInterval {
    Urgent,
    Short,
    Medium,
    Long,
}

/// Thresholds and interval lengths. These are product numbers, not
/// technical constraints; `Default` is the current policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SchedulePolicy {
    pub urgent_days: i64,
    pub short_days: i64,
    pub medium_days: i64,
    pub long_days: i64,
    /// Accuracy strictly below this goes to the short interval.
    pub weak_accuracy: f64,
    /// Accuracy strictly below this (and not weak) goes to the medium interval.
    pub solid_accuracy: f64,
    /// Difficulty at or above this goes to the short interval.
    pub hard_difficulty: u8,
    /// Diagnosis scores strictly below this flag the topic as urgent.
    pub diagnosis_pass: f64,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            urgent_days: 2,
            short_days: 7,
            medium_days: 14,
            long_days: 30,
            weak_accuracy: 70.0,
            solid_accuracy: 85.0,
            hard_difficulty: 4,
            diagnosis_pass: 75.0,
        }
    }
}

impl SchedulePolicy {
    pub fn days(&self, interval: ReviewInterval) -> i64 {
        match interval {
            ReviewInterval::Urgent => self.urgent_days,
            ReviewInterval::Short => self.short_days,
            ReviewInterval::Medium => self.medium_days,
            ReviewInterval::Long => self.long_days,
        }
    }

    pub fn classify(&self, difficulty: u8, accuracy_pct: f64, urgent: bool) -> Result<ReviewInterval> {
        validate_difficulty(difficulty)?;
        validate_percentage("accuracy_pct", accuracy_pct)?;

        let interval = if urgent {
            ReviewInterval::Urgent
        } else if accuracy_pct < self.weak_accuracy || difficulty >= self.hard_difficulty {
            ReviewInterval::Short
        } else if accuracy_pct < self.solid_accuracy {
            ReviewInterval::Medium
        } else {
            ReviewInterval::Long
        };
        Ok(interval)
    }

    pub fn next_review(
        &self,
        difficulty: u8,
        accuracy_pct: f64,
        urgent: bool,
        today: NaiveDate,
    ) -> Result<NaiveDate> {
        let interval = self.classify(difficulty, accuracy_pct, urgent)?;
        days_after(today, self.days(interval))
    }
}

// Dates near the end of chrono's calendar have no room for the interval
fn days_after(today: NaiveDate, days: i64) -> Result<NaiveDate> {
    Duration::try_days(days)
        .and_then(|offset| today.checked_add_signed(offset))
        .ok_or_else(|| Error::invalid("today", today, "a date with room for the interval"))
}

/// Next review date under the default policy.
pub fn compute_next_review(
    difficulty: u8,
    accuracy_pct: f64,
    urgent: bool,
    today: NaiveDate,
) -> Result<NaiveDate> {
    SchedulePolicy::default().next_review(difficulty, accuracy_pct, urgent, today)
}

fn validate_difficulty(difficulty: u8) -> Result<()> {
    if (1..=5).contains(&difficulty) {
        Ok(())
    } else {
        Err(Error::invalid("difficulty", difficulty, "1..=5"))
    }
}

// NaN fails the range check too
pub(crate) fn validate_percentage(field: &'static str, value: f64) -> Result<()> {
    if (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::invalid(field, value, "0..=100"))
    }
}

/// Result of a targeted diagnosis against one topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DiagnosisOutcome {
    /// Score at or above the pass mark. Nothing is written.
    Confirmed,
    /// Existing record narrowed to urgent.
    Flagged(ProgressRecord),
    /// No record existed; a minimal urgent one was created.
    FlaggedNew(ProgressRecord),
}

impl DiagnosisOutcome {
    pub fn record(&self) -> Option<&ProgressRecord> {
        match self {
            DiagnosisOutcome::Confirmed => None,
            DiagnosisOutcome::Flagged(r) | DiagnosisOutcome::FlaggedNew(r) => Some(r),
        }
    }
}

pub struct Scheduler<C: Clock = SystemClock> {
    clock: C,
    policy: SchedulePolicy,
}

impl<C: Clock> Scheduler<C> {
    pub fn new(clock: C) -> Self {
        Self::with_policy(clock, SchedulePolicy::default())
    }

    pub fn with_policy(clock: C, policy: SchedulePolicy) -> Self {
        Self { clock, policy }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn compute_next_review(
        &self,
        difficulty: u8,
        accuracy_pct: f64,
        urgent: bool,
    ) -> Result<NaiveDate> {
        self.policy
            .next_review(difficulty, accuracy_pct, urgent, self.clock.today())
    }

    /// A study or review session. Recomputes everything and clears the
    /// urgency flag; any previous record is superseded.
    pub fn study(&self, topic: &Topic, difficulty: u8, accuracy_pct: f64) -> Result<ProgressRecord> {
        let today = self.clock.today();
        let next_review_on = self
            .policy
            .next_review(difficulty, accuracy_pct, false, today)?;

        Ok(ProgressRecord {
            topic_id: topic.topic_id,
            status: ProgressStatus::Completed,
            difficulty,
            accuracy_pct,
            completed_on: Some(today),
            next_review_on,
            week_tag: topic.week_tag.clone(),
            urgent_flag: false,
        })
    }

    /// A mock-exam style diagnosis. Only the urgency flag and the review
    /// date change; the fields describing the last study session are kept.
    pub fn diagnose(
        &self,
        existing: Option<ProgressRecord>,
        topic: &Topic,
        score: f64,
    ) -> Result<DiagnosisOutcome> {
        validate_percentage("diagnosis score", score)?;
        if score >= self.policy.diagnosis_pass {
            return Ok(DiagnosisOutcome::Confirmed);
        }

        let next_review_on = days_after(self.clock.today(), self.policy.urgent_days)?;
        let outcome = match existing {
            Some(mut record) => {
                record.urgent_flag = true;
                record.next_review_on = next_review_on;
                DiagnosisOutcome::Flagged(record)
            }
            None => DiagnosisOutcome::FlaggedNew(ProgressRecord {
                topic_id: topic.topic_id,
                status: ProgressStatus::NotStarted,
                difficulty: 0,
                accuracy_pct: 0.0,
                completed_on: None,
                next_review_on,
                week_tag: topic.week_tag.clone(),
                urgent_flag: true,
            }),
        };
        Ok(outcome)
    }
}
