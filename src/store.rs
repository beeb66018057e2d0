use chrono::NaiveDate;
use std::path::Path;

use crate::error::Result;
use crate::models::{ProgressRecord, Topic};

/// Durable mapping from topic id to its latest progress record.
///
/// Implementations must make `upsert` atomic: a concurrent reader sees either
/// the previous record or the new one, never a mix.
pub trait ProgressStore {
    fn get(&self, topic_id: i64) -> Result<Option<ProgressRecord>>;

    /// Replace-or-insert keyed on `topic_id`.
    fn upsert(&self, record: &ProgressRecord) -> Result<()>;

    /// Records with `next_review_on <= as_of`, in no particular order.
    fn get_due(&self, as_of: NaiveDate) -> Result<Vec<ProgressRecord>>;

    fn get_all(&self) -> Result<Vec<ProgressRecord>>;
}

pub trait Syllabus {
    fn topic_by_id(&self, topic_id: i64) -> Result<Option<Topic>>;

    fn topics_in_week(&self, week_tag: &str) -> Result<Vec<Topic>>;
}

/// Reads a syllabus export: a JSON array of `{topic_id, area, title, week_tag}`.
pub fn read_topics_json<P: AsRef<Path>>(path: P) -> Result<Vec<Topic>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}
