use chrono::NaiveDate;
use tracing::{info, warn};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{DrillEntry, DueReview, ProgressRecord, Summary, Topic, TopicWithProgress};
use crate::scheduler::{
    validate_percentage, Clock, DiagnosisOutcome, SchedulePolicy, Scheduler, SystemClock,
};
use crate::store::{ProgressStore, Syllabus};

/// Ties a store handle to the scheduler. The store is borrowed, so the
/// caller decides how long a connection lives.
pub struct Tracker<'a, S, C: Clock = SystemClock> {
    store: &'a S,
    scheduler: Scheduler<C>,
}

impl<'a, S, C> Tracker<'a, S, C>
where
    S: ProgressStore + Syllabus,
    C: Clock,
{
    pub fn new(store: &'a S, clock: C) -> Self {
        Self::with_policy(store, clock, SchedulePolicy::default())
    }

    pub fn with_policy(store: &'a S, clock: C, policy: SchedulePolicy) -> Self {
        Self {
            store,
            scheduler: Scheduler::with_policy(clock, policy),
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.scheduler.today()
    }

    fn topic(&self, topic_id: i64) -> Result<Topic> {
        self.store
            .topic_by_id(topic_id)?
            .ok_or(Error::TopicNotFound(topic_id))
    }

    /// The current record, or `RecordNotFound` if the topic was never touched.
    pub fn progress(&self, topic_id: i64) -> Result<ProgressRecord> {
        self.store
            .get(topic_id)?
            .ok_or(Error::RecordNotFound(topic_id))
    }

    /// Record a study or review session and reschedule the topic.
    pub fn record_study(
        &self,
        topic_id: i64,
        difficulty: u8,
        accuracy_pct: f64,
    ) -> Result<ProgressRecord> {
        let topic = self.topic(topic_id)?;
        let record = self.scheduler.study(&topic, difficulty, accuracy_pct)?;
        self.store.upsert(&record)?;

        info!(
            topic_id,
            difficulty,
            accuracy_pct,
            next_review_on = %record.next_review_on,
            "recorded study session"
        );
        Ok(record)
    }

    /// Apply a diagnosis score from an external exam.
    pub fn apply_diagnosis(&self, topic_id: i64, score: f64) -> Result<DiagnosisOutcome> {
        let topic = self.topic(topic_id)?;
        let existing = self.store.get(topic_id)?;
        if existing.is_none() {
            warn!(
                topic_id,
                score,
                error = %Error::RecordNotFound(topic_id),
                "diagnosis for a topic that was never studied"
            );
        }

        let outcome = self.scheduler.diagnose(existing, &topic, score)?;
        match outcome.record() {
            Some(record) => {
                self.store.upsert(record)?;
                info!(
                    topic_id,
                    score,
                    next_review_on = %record.next_review_on,
                    "topic flagged as urgent"
                );
            }
            None => info!(topic_id, score, "diagnosis confirmed topic"),
        }
        Ok(outcome)
    }

    /// Due records, urgent first, then the longest overdue.
    pub fn due_reviews(&self, as_of: Option<NaiveDate>) -> Result<Vec<DueReview>> {
        let as_of = as_of.unwrap_or_else(|| self.today());
        let mut records = self.store.get_due(as_of)?;
        records.sort_by(|a, b| {
            b.urgent_flag
                .cmp(&a.urgent_flag)
                .then(a.next_review_on.cmp(&b.next_review_on))
                .then(a.topic_id.cmp(&b.topic_id))
        });

        records
            .into_iter()
            .map(|progress| {
                let topic = self.store.topic_by_id(progress.topic_id)?;
                let days_overdue = progress.days_overdue(as_of);
                Ok(DueReview {
                    progress,
                    topic,
                    days_overdue,
                })
            })
            .collect()
    }

    pub fn week_overview(&self, week_tag: &str) -> Result<Vec<TopicWithProgress>> {
        self.store
            .topics_in_week(week_tag)?
            .into_iter()
            .map(|topic| {
                let progress = self.store.get(topic.topic_id)?;
                Ok(TopicWithProgress { topic, progress })
            })
            .collect()
    }

    pub fn summary(&self, as_of: Option<NaiveDate>) -> Result<Summary> {
        let as_of = as_of.unwrap_or_else(|| self.today());
        let records = self.store.get_all()?;
        Ok(Summary::from_records(&records, as_of))
    }
}

// The drill log lives only in the SQLite store
impl<'a, C: Clock> Tracker<'a, Database, C> {
    pub fn log_drill(
        &self,
        topic_id: Option<i64>,
        accuracy_pct: f64,
        elapsed_minutes: f64,
        question_count: u32,
    ) -> Result<DrillEntry> {
        validate_percentage("accuracy_pct", accuracy_pct)?;
        if !(elapsed_minutes.is_finite() && elapsed_minutes > 0.0) {
            return Err(Error::invalid("elapsed_minutes", elapsed_minutes, "> 0"));
        }
        if question_count == 0 {
            return Err(Error::invalid("question_count", question_count, ">= 1"));
        }
        if let Some(id) = topic_id {
            self.topic(id)?;
        }

        let drilled_on = self.today();
        let id = self.store.log_drill(
            drilled_on,
            topic_id,
            accuracy_pct,
            elapsed_minutes,
            question_count,
        )?;
        info!(id, ?topic_id, accuracy_pct, "logged speed drill");

        Ok(DrillEntry {
            id,
            drilled_on,
            topic_id,
            accuracy_pct,
            elapsed_minutes,
            question_count,
        })
    }

    pub fn recent_drills(&self, limit: usize) -> Result<Vec<DrillEntry>> {
        Ok(self.store.list_drills(limit)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProgressStatus;
    use crate::scheduler::FixedClock;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn setup_db() -> Database {
        let db = Database::open(":memory:").expect("Failed to create in-memory database");
        db.init().expect("Failed to initialize database");
        for (id, week) in [(1, "S1"), (2, "S1"), (3, "S1"), (5, "S2"), (6, "S2")] {
            db.add_topic(&Topic {
                topic_id: id,
                area: "Surgery".to_string(),
                title: format!("Lesson {}", id),
                week_tag: week.to_string(),
            })
            .unwrap();
        }
        db
    }

    fn tracker_on(db: &Database, today: NaiveDate) -> Tracker<'_, Database, FixedClock> {
        Tracker::new(db, FixedClock(today))
    }

    mod study_tests {
        use super::*;

        #[test]
        fn first_study_creates_record() {
            let db = setup_db();
            let tracker = tracker_on(&db, date(2024, 1, 1));

            let record = tracker.record_study(5, 3, 80.0).unwrap();
            assert_eq!(record.next_review_on, date(2024, 1, 15));
            assert_eq!(record.week_tag, "S2");
            assert_eq!(db.get_progress(5).unwrap(), Some(record));
        }

        #[test]
        fn hard_topic_scheduled_in_a_week() {
            let db = setup_db();
            let record = tracker_on(&db, date(2024, 1, 1))
                .record_study(5, 5, 95.0)
                .unwrap();
            assert_eq!(record.next_review_on, date(2024, 1, 8));
        }

        #[test]
        fn second_study_replaces_first() {
            let db = setup_db();
            tracker_on(&db, date(2024, 1, 1))
                .record_study(5, 4, 60.0)
                .unwrap();
            tracker_on(&db, date(2024, 1, 8))
                .record_study(5, 2, 90.0)
                .unwrap();

            let all = db.list_progress().unwrap();
            assert_eq!(all.len(), 1);
            assert_eq!(all[0].difficulty, 2);
            assert_eq!(all[0].accuracy_pct, 90.0);
            assert_eq!(all[0].completed_on, Some(date(2024, 1, 8)));
            assert_eq!(all[0].next_review_on, date(2024, 2, 7));
        }

        #[test]
        fn unknown_topic_is_rejected() {
            let db = setup_db();
            let err = tracker_on(&db, date(2024, 1, 1))
                .record_study(99, 3, 80.0)
                .unwrap_err();
            assert!(matches!(err, Error::TopicNotFound(99)));
        }

        #[test]
        fn invalid_input_writes_nothing() {
            let db = setup_db();
            let tracker = tracker_on(&db, date(2024, 1, 1));

            let err = tracker.record_study(5, 6, 80.0).unwrap_err();
            assert!(matches!(err, Error::InvalidArgument { .. }));
            assert!(db.get_progress(5).unwrap().is_none());
        }

        #[test]
        fn study_clears_urgency() {
            let db = setup_db();
            tracker_on(&db, date(2024, 1, 1))
                .record_study(5, 2, 90.0)
                .unwrap();
            tracker_on(&db, date(2024, 1, 2))
                .apply_diagnosis(5, 40.0)
                .unwrap();
            assert!(db.get_progress(5).unwrap().unwrap().urgent_flag);

            let record = tracker_on(&db, date(2024, 1, 4))
                .record_study(5, 2, 90.0)
                .unwrap();
            assert!(!record.urgent_flag);
            assert_eq!(record.next_review_on, date(2024, 2, 3));
        }
    }

    mod diagnosis_tests {
        use super::*;

        #[test]
        fn low_score_flags_existing_record() {
            let db = setup_db();
            let studied = tracker_on(&db, date(2023, 12, 1))
                .record_study(5, 2, 92.0)
                .unwrap();

            let outcome = tracker_on(&db, date(2024, 1, 1))
                .apply_diagnosis(5, 50.0)
                .unwrap();
            assert!(matches!(outcome, DiagnosisOutcome::Flagged(_)));

            let stored = db.get_progress(5).unwrap().unwrap();
            assert!(stored.urgent_flag);
            assert_eq!(stored.next_review_on, date(2024, 1, 3));
            assert_eq!(stored.difficulty, studied.difficulty);
            assert_eq!(stored.accuracy_pct, studied.accuracy_pct);
            assert_eq!(stored.completed_on, studied.completed_on);
        }

        #[test]
        fn passing_score_leaves_record_untouched() {
            let db = setup_db();
            let studied = tracker_on(&db, date(2023, 12, 1))
                .record_study(5, 2, 92.0)
                .unwrap();

            let outcome = tracker_on(&db, date(2024, 1, 1))
                .apply_diagnosis(5, 90.0)
                .unwrap();
            assert_eq!(outcome, DiagnosisOutcome::Confirmed);
            assert_eq!(db.get_progress(5).unwrap(), Some(studied));
        }

        #[test]
        fn never_studied_topic_gets_minimal_record() {
            let db = setup_db();
            let outcome = tracker_on(&db, date(2024, 1, 1))
                .apply_diagnosis(6, 30.0)
                .unwrap();
            assert!(matches!(outcome, DiagnosisOutcome::FlaggedNew(_)));

            let stored = db.get_progress(6).unwrap().unwrap();
            assert_eq!(stored.status, ProgressStatus::NotStarted);
            assert_eq!(stored.difficulty, 0);
            assert_eq!(stored.accuracy_pct, 0.0);
            assert!(stored.completed_on.is_none());
            assert!(stored.urgent_flag);
            assert_eq!(stored.next_review_on, date(2024, 1, 3));
        }

        #[test]
        fn never_studied_topic_passing_score_writes_nothing() {
            let db = setup_db();
            tracker_on(&db, date(2024, 1, 1))
                .apply_diagnosis(6, 88.0)
                .unwrap();
            assert!(db.get_progress(6).unwrap().is_none());
        }

        #[test]
        fn out_of_range_score_is_rejected() {
            let db = setup_db();
            let err = tracker_on(&db, date(2024, 1, 1))
                .apply_diagnosis(5, 120.0)
                .unwrap_err();
            assert!(err.is_recoverable());
        }
    }

    mod due_tests {
        use super::*;

        fn seed(db: &Database) {
            // next reviews: topic 1 -> 01-01, topic 2 -> 01-05, topic 3 -> 01-10
            tracker_on(db, date(2023, 12, 25)).record_study(1, 5, 90.0).unwrap();
            tracker_on(db, date(2023, 12, 22)).record_study(2, 3, 80.0).unwrap();
            tracker_on(db, date(2023, 12, 11)).record_study(3, 1, 95.0).unwrap();
        }

        #[test]
        fn due_reviews_returns_records_up_to_as_of() {
            let db = setup_db();
            seed(&db);

            let due = tracker_on(&db, date(2024, 1, 5))
                .due_reviews(None)
                .unwrap();
            let ids: Vec<i64> = due.iter().map(|d| d.progress.topic_id).collect();
            assert_eq!(ids, vec![1, 2]);
            assert_eq!(due[0].days_overdue, 4);
            assert_eq!(due[0].topic.as_ref().unwrap().title, "Lesson 1");
        }

        #[test]
        fn explicit_as_of_overrides_clock() {
            let db = setup_db();
            seed(&db);

            let due = tracker_on(&db, date(2024, 1, 5))
                .due_reviews(Some(date(2024, 1, 1)))
                .unwrap();
            assert_eq!(due.len(), 1);
        }

        #[test]
        fn urgent_records_sort_first() {
            let db = setup_db();
            seed(&db);
            tracker_on(&db, date(2024, 1, 2)).apply_diagnosis(3, 20.0).unwrap();

            let due = tracker_on(&db, date(2024, 1, 10))
                .due_reviews(None)
                .unwrap();
            let ids: Vec<i64> = due.iter().map(|d| d.progress.topic_id).collect();
            assert_eq!(ids, vec![3, 1, 2]);
        }

        #[test]
        fn nothing_due() {
            let db = setup_db();
            seed(&db);
            let due = tracker_on(&db, date(2023, 12, 31))
                .due_reviews(None)
                .unwrap();
            assert!(due.is_empty());
        }
    }

    mod report_tests {
        use super::*;

        #[test]
        fn week_overview_marks_unstudied_topics() {
            let db = setup_db();
            tracker_on(&db, date(2024, 1, 1)).record_study(2, 3, 80.0).unwrap();

            let week = tracker_on(&db, date(2024, 1, 1))
                .week_overview("S1")
                .unwrap();
            assert_eq!(week.len(), 3);
            assert_eq!(week[0].status(), ProgressStatus::NotStarted);
            assert_eq!(week[1].status(), ProgressStatus::Completed);
            assert!(week[2].progress.is_none());
        }

        #[test]
        fn summary_excludes_missing_and_diagnosis_only_records() {
            let db = setup_db();
            let tracker = tracker_on(&db, date(2024, 1, 1));
            tracker.record_study(1, 2, 90.0).unwrap();
            tracker.record_study(5, 4, 60.0).unwrap();
            tracker.apply_diagnosis(6, 10.0).unwrap();

            let summary = tracker.summary(None).unwrap();
            assert_eq!(summary.completed, 2);
            assert_eq!(summary.mean_accuracy, Some(75.0));
            assert_eq!(summary.urgent, 1);
            assert_eq!(summary.due, 0);

            let later = tracker.summary(Some(date(2024, 1, 3))).unwrap();
            assert_eq!(later.due, 1);
        }

        #[test]
        fn progress_lookup_reports_missing_record() {
            let db = setup_db();
            let err = tracker_on(&db, date(2024, 1, 1)).progress(3).unwrap_err();
            assert!(matches!(err, Error::RecordNotFound(3)));
        }
    }

    mod drill_tests {
        use super::*;

        #[test]
        fn log_drill_stamps_today() {
            let db = setup_db();
            let tracker = tracker_on(&db, date(2024, 2, 2));

            let entry = tracker.log_drill(Some(1), 72.5, 40.0, 25).unwrap();
            assert_eq!(entry.drilled_on, date(2024, 2, 2));

            let drills = tracker.recent_drills(5).unwrap();
            assert_eq!(drills, vec![entry]);
        }

        #[test]
        fn log_drill_does_not_touch_progress() {
            let db = setup_db();
            let tracker = tracker_on(&db, date(2024, 2, 2));
            tracker.log_drill(Some(1), 20.0, 10.0, 10).unwrap();

            assert!(db.get_progress(1).unwrap().is_none());
        }

        #[test]
        fn log_drill_validates_input() {
            let db = setup_db();
            let tracker = tracker_on(&db, date(2024, 2, 2));

            assert!(tracker.log_drill(None, 101.0, 10.0, 10).is_err());
            assert!(tracker.log_drill(None, 50.0, 0.0, 10).is_err());
            assert!(tracker.log_drill(None, 50.0, 10.0, 0).is_err());
            assert!(matches!(
                tracker.log_drill(Some(404), 50.0, 10.0, 10),
                Err(Error::TopicNotFound(404))
            ));
            assert!(tracker.recent_drills(5).unwrap().is_empty());
        }
    }

    mod storage_failure_tests {
        use super::*;

        // Reads go to a real database; every write fails
        struct ReadOnlyStore(Database);

        impl ProgressStore for ReadOnlyStore {
            fn get(&self, topic_id: i64) -> Result<Option<ProgressRecord>> {
                self.0.get(topic_id)
            }

            fn upsert(&self, _record: &ProgressRecord) -> Result<()> {
                Err(Error::StorageUnavailable(rusqlite::Error::InvalidQuery))
            }

            fn get_due(&self, as_of: NaiveDate) -> Result<Vec<ProgressRecord>> {
                self.0.get_due(as_of)
            }

            fn get_all(&self) -> Result<Vec<ProgressRecord>> {
                self.0.get_all()
            }
        }

        impl Syllabus for ReadOnlyStore {
            fn topic_by_id(&self, topic_id: i64) -> Result<Option<Topic>> {
                self.0.topic_by_id(topic_id)
            }

            fn topics_in_week(&self, week_tag: &str) -> Result<Vec<Topic>> {
                self.0.topics_in_week(week_tag)
            }
        }

        #[test]
        fn uninitialized_database_reports_storage_unavailable() {
            let db = Database::open(":memory:").unwrap();
            let tracker = tracker_on(&db, date(2024, 1, 1));

            let err = tracker.record_study(5, 3, 80.0).unwrap_err();
            assert!(matches!(err, Error::StorageUnavailable(_)));
            assert!(!err.is_recoverable());

            assert!(matches!(
                tracker.due_reviews(None),
                Err(Error::StorageUnavailable(_))
            ));
        }

        #[test]
        fn failed_write_surfaces_and_leaves_record_unchanged() {
            let db = setup_db();
            let before = tracker_on(&db, date(2024, 1, 1))
                .record_study(5, 2, 92.0)
                .unwrap();

            let store = ReadOnlyStore(db);
            let tracker = Tracker::new(&store, FixedClock(date(2024, 2, 1)));

            assert!(matches!(
                tracker.record_study(5, 5, 40.0),
                Err(Error::StorageUnavailable(_))
            ));
            assert!(matches!(
                tracker.apply_diagnosis(5, 30.0),
                Err(Error::StorageUnavailable(_))
            ));
            assert_eq!(store.0.get_progress(5).unwrap(), Some(before));
        }
    }
}
