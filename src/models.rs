use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// A syllabus entry. The id comes from the syllabus and never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub topic_id: i64,
    pub area: String,
    pub title: String,
    pub week_tag: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressStatus {
    NotStarted,
    Completed,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::NotStarted => "not_started",
            ProgressStatus::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "not_started" | "not-started" => Some(ProgressStatus::NotStarted),
            "completed" | "done" => Some(ProgressStatus::Completed),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProgressStatus::NotStarted => "Not started",
            ProgressStatus::Completed => "Completed",
        }
    }
}

/// Latest known state of one topic. There is at most one per `topic_id`;
/// every write replaces the previous record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub topic_id: i64,
    pub status: ProgressStatus,
    /// 1..=5, or 0 when the topic was diagnosed but never studied.
    pub difficulty: u8,
    pub accuracy_pct: f64,
    pub completed_on: Option<NaiveDate>,
    pub next_review_on: NaiveDate,
    pub week_tag: String,
    pub urgent_flag: bool,
}

impl ProgressRecord {
    pub fn is_due(&self, as_of: NaiveDate) -> bool {
        self.next_review_on <= as_of
    }

    pub fn days_overdue(&self, as_of: NaiveDate) -> i64 {
        (as_of - self.next_review_on).num_days().max(0)
    }

    pub fn difficulty_label(&self) -> &'static str {
        match self.difficulty {
            1 => "Very easy",
            2 => "Easy",
            3 => "Moderate",
            4 => "Hard",
            5 => "Very hard",
            _ => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicWithProgress {
    pub topic: Topic,
    pub progress: Option<ProgressRecord>,
}

impl TopicWithProgress {
    pub fn status(&self) -> ProgressStatus {
        self.progress
            .as_ref()
            .map(|p| p.status)
            .unwrap_or(ProgressStatus::NotStarted)
    }
}

// A syllabus week with how many of its topics have been studied
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Week {
    pub week_tag: String,
    pub topic_count: i64,
    pub completed: i64,
}

impl Week {
    pub fn completion_pct(&self) -> f64 {
        if self.topic_count == 0 {
            0.0
        } else {
            (self.completed as f64 / self.topic_count as f64) * 100.0
        }
    }
}

// A due record joined with its syllabus entry, if the syllabus still has it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DueReview {
    pub progress: ProgressRecord,
    pub topic: Option<Topic>,
    pub days_overdue: i64,
}

// One row of the speed-drill log. Reporting only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrillEntry {
    pub id: i64,
    pub drilled_on: NaiveDate,
    pub topic_id: Option<i64>,
    pub accuracy_pct: f64,
    pub elapsed_minutes: f64,
    pub question_count: u32,
}

impl DrillEntry {
    pub fn minutes_per_question(&self) -> f64 {
        if self.question_count == 0 {
            0.0
        } else {
            self.elapsed_minutes / self.question_count as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekPerformance {
    pub week_tag: String,
    pub completed: usize,
    pub mean_accuracy: f64,
    pub mean_difficulty: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub completed: usize,
    pub mean_accuracy: Option<f64>,
    pub due: usize,
    pub urgent: usize,
    pub by_week: Vec<WeekPerformance>,
}

impl Summary {
    /// Only completed records count towards accuracy and difficulty means.
    /// Diagnosis-only records still count as due and urgent.
    pub fn from_records(records: &[ProgressRecord], as_of: NaiveDate) -> Self {
        let completed: Vec<&ProgressRecord> = records
            .iter()
            .filter(|r| r.status == ProgressStatus::Completed)
            .collect();

        let mean_accuracy = if completed.is_empty() {
            None
        } else {
            Some(completed.iter().map(|r| r.accuracy_pct).sum::<f64>() / completed.len() as f64)
        };

        let mut weeks: BTreeMap<&str, Vec<&ProgressRecord>> = BTreeMap::new();
        for record in &completed {
            weeks.entry(record.week_tag.as_str()).or_default().push(record);
        }

        // Syllabus order: a week sorts by its lowest topic id, as in `list_weeks`
        let mut weeks: Vec<(&str, Vec<&ProgressRecord>)> = weeks.into_iter().collect();
        weeks.sort_by_key(|(_, rows)| rows.iter().map(|r| r.topic_id).min());

        let by_week = weeks
            .into_iter()
            .map(|(week_tag, rows)| {
                let n = rows.len() as f64;
                WeekPerformance {
                    week_tag: week_tag.to_string(),
                    completed: rows.len(),
                    mean_accuracy: rows.iter().map(|r| r.accuracy_pct).sum::<f64>() / n,
                    mean_difficulty: rows.iter().map(|r| r.difficulty as f64).sum::<f64>() / n,
                }
            })
            .collect();

        Summary {
            completed: completed.len(),
            mean_accuracy,
            due: records.iter().filter(|r| r.is_due(as_of)).count(),
            urgent: records.iter().filter(|r| r.urgent_flag).count(),
            by_week,
        }
    }
}

// JSON output wrapper for CLI
#[derive(Debug, Serialize)]
pub struct JsonOutput<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> JsonOutput<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
