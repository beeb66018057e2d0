use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use tracing::{debug, error};

use medflow::config::Config;
use medflow::db::Database;
use medflow::logging;
use medflow::models::{JsonOutput, Topic};
use medflow::scheduler::{Clock, DiagnosisOutcome, FixedClock, SystemClock};
use medflow::store::read_topics_json;
use medflow::tracker::Tracker;

#[derive(Parser)]
#[command(name = "medflow")]
#[command(about = "A spaced-repetition review planner for syllabus-driven study")]
#[command(version)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Treat this date (YYYY-MM-DD) as today
    #[arg(long, global = true)]
    today: Option<NaiveDate>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Manage syllabus topics
    #[command(subcommand)]
    Topic(TopicCommands),

    /// List syllabus weeks with completion counts
    Weeks,

    /// Show every topic of a week and whether it has been studied
    Week {
        /// Week tag, e.g. S1
        tag: String,
    },

    /// Record a completed study or review session
    Study {
        /// Topic ID
        id: i64,

        /// Perceived difficulty, 1 (easy) to 5 (hard)
        #[arg(long, short)]
        difficulty: u8,

        /// Percentage of practice questions answered correctly
        #[arg(long, short)]
        accuracy: f64,
    },

    /// Apply a mock-exam score to a topic
    Diagnose {
        /// Topic ID
        id: i64,

        /// Score on the topic, 0 to 100
        #[arg(long, short)]
        score: f64,
    },

    /// List topics due for review
    Due {
        /// Reference date instead of today
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },

    /// Show study statistics
    Stats,

    /// Log and list timed question drills
    #[command(subcommand)]
    Drill(DrillCommands),
}

#[derive(Subcommand)]
enum TopicCommands {
    /// List topics
    List {
        /// Filter by week tag
        #[arg(long, short)]
        week: Option<String>,
    },

    /// Add or replace a topic
    Add {
        /// Syllabus topic ID
        id: i64,

        /// Subject area
        #[arg(long, short)]
        area: String,

        /// Lesson title
        #[arg(long, short)]
        title: String,

        /// Week tag
        #[arg(long, short)]
        week: String,
    },

    /// Show a topic and its progress
    Show {
        /// Topic ID
        id: i64,
    },

    /// Import topics from a JSON array
    Import {
        /// Path to the JSON file
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum DrillCommands {
    /// Record a drill
    Add {
        /// Percentage answered correctly
        #[arg(long, short)]
        accuracy: f64,

        /// Minutes spent
        #[arg(long, short)]
        minutes: f64,

        /// Number of questions
        #[arg(long, short)]
        questions: u32,

        /// Topic the drill covered, if any
        #[arg(long, short)]
        topic: Option<i64>,
    },

    /// List recent drills
    List {
        /// Maximum number of drills to show
        #[arg(long, short, default_value_t = 10)]
        limit: usize,
    },
}

fn main() {
    let cli = Cli::parse();
    let config = Config::from_env();
    logging::init_tracing(&config.log_filter);

    let json = cli.json;
    if let Err(e) = run(cli, &config) {
        if is_rejected_input(e.as_ref()) {
            debug!(error = %e, "command rejected its input");
        } else {
            error!(error = %e, "command failed");
        }

        if json {
            println!("{}", error_envelope(e.as_ref()));
        } else {
            eprintln!("Error: {}", e);
        }
        std::process::exit(1);
    }
}

/// Bad arguments or unknown ids, as opposed to storage or file failures.
fn is_rejected_input(err: &(dyn Error + 'static)) -> bool {
    err.downcast_ref::<medflow::Error>()
        .map(medflow::Error::is_recoverable)
        .unwrap_or(false)
}

fn error_envelope(err: &dyn Error) -> String {
    serde_json::to_string(&JsonOutput::<()>::err(err.to_string()))
        .unwrap_or_else(|_| r#"{"success":false,"data":null,"error":null}"#.to_string())
}

fn run(cli: Cli, config: &Config) -> Result<(), Box<dyn Error>> {
    let db = Database::open(&config.db_path)?;
    let today = cli.today.unwrap_or_else(|| SystemClock.today());
    let tracker = Tracker::new(&db, FixedClock(today));

    match cli.command {
        Commands::Init => {
            db.init()?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::<()>::ok(()))?);
            } else {
                println!("Database initialized at: {}", config.db_path.display());
            }
        }

        Commands::Topic(topic_cmd) => match topic_cmd {
            TopicCommands::List { week } => {
                let topics = db.list_topics(week.as_deref())?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&topics))?);
                } else if topics.is_empty() {
                    println!("No topics found.");
                } else {
                    println!("{:<6} {:<6} {:<20} TITLE", "ID", "WEEK", "AREA");
                    println!("{}", "-".repeat(70));
                    for topic in topics {
                        println!(
                            "{:<6} {:<6} {:<20} {}",
                            topic.topic_id,
                            topic.week_tag,
                            truncate(&topic.area, 18),
                            truncate(&topic.title, 36)
                        );
                    }
                }
            }

            TopicCommands::Add {
                id,
                area,
                title,
                week,
            } => {
                let topic = Topic {
                    topic_id: id,
                    area,
                    title,
                    week_tag: week,
                };
                db.add_topic(&topic)?;

                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&topic))?);
                } else {
                    println!("Saved topic '{}' with ID: {}", topic.title, topic.topic_id);
                }
            }

            TopicCommands::Show { id } => {
                if let Some(topic) = db.get_topic(id)? {
                    let progress = db.get_progress(id)?;

                    if cli.json {
                        println!(
                            "{}",
                            serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                                "topic": topic,
                                "progress": progress
                            })))?
                        );
                    } else {
                        println!("Topic: {}", topic.title);
                        println!("ID: {}", topic.topic_id);
                        println!("Area: {}", topic.area);
                        println!("Week: {}", topic.week_tag);

                        println!();
                        println!("--- Progress ---");
                        match progress {
                            Some(p) => {
                                println!("Status: {}", p.status.label());
                                println!(
                                    "Difficulty: {} ({})",
                                    p.difficulty_label(),
                                    p.difficulty
                                );
                                println!("Accuracy: {:.1}%", p.accuracy_pct);
                                if let Some(done) = &p.completed_on {
                                    println!("Last studied: {}", done);
                                }
                                println!("Next review: {}", p.next_review_on);
                                if p.urgent_flag {
                                    println!("Flagged urgent by a diagnosis");
                                }
                            }
                            None => println!("Status: Not started"),
                        }
                    }
                } else if cli.json {
                    println!(
                        "{}",
                        serde_json::to_string(&JsonOutput::<()>::err("Topic not found"))?
                    );
                } else {
                    println!("Topic not found.");
                }
            }

            TopicCommands::Import { path } => {
                let topics = read_topics_json(&path)?;
                let count = db.import_topics(&topics)?;

                if cli.json {
                    println!(
                        "{}",
                        serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                            "imported": count
                        })))?
                    );
                } else {
                    println!("Imported {} topics from {}.", count, path.display());
                }
            }
        },

        Commands::Weeks => {
            let weeks = db.list_weeks()?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&weeks))?);
            } else if weeks.is_empty() {
                println!("No weeks found. Import a syllabus first!");
            } else {
                println!("{:<8} {:<8} {:<10} DONE", "WEEK", "TOPICS", "COMPLETED");
                println!("{}", "-".repeat(40));
                for week in weeks {
                    println!(
                        "{:<8} {:<8} {:<10} {:.0}%",
                        week.week_tag,
                        week.topic_count,
                        week.completed,
                        week.completion_pct()
                    );
                }
            }
        }

        Commands::Week { tag } => {
            let entries = tracker.week_overview(&tag)?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&entries))?);
            } else if entries.is_empty() {
                println!("No topics in week {}.", tag);
            } else {
                println!("=== Week {} ===", tag);
                println!("{:<6} {:<36} {:<12} NEXT REVIEW", "ID", "TITLE", "STATUS");
                println!("{}", "-".repeat(70));
                for entry in entries {
                    let next = entry
                        .progress
                        .as_ref()
                        .map(|p| p.next_review_on.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:<6} {:<36} {:<12} {}",
                        entry.topic.topic_id,
                        truncate(&entry.topic.title, 34),
                        entry.status().label(),
                        next
                    );
                }
            }
        }

        Commands::Study {
            id,
            difficulty,
            accuracy,
        } => {
            let record = tracker.record_study(id, difficulty, accuracy)?;

            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&record))?);
            } else {
                println!("Study recorded for topic {}.", id);
                println!("Next review scheduled: {}", record.next_review_on);
            }
        }

        Commands::Diagnose { id, score } => {
            let outcome = tracker.apply_diagnosis(id, score)?;

            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&outcome))?);
            } else {
                match outcome {
                    DiagnosisOutcome::Confirmed => {
                        println!("Score {:.0} confirms topic {}. Schedule unchanged.", score, id);
                    }
                    DiagnosisOutcome::Flagged(record) | DiagnosisOutcome::FlaggedNew(record) => {
                        println!("Topic {} flagged as urgent.", id);
                        println!("Review by: {}", record.next_review_on);
                    }
                }
            }
        }

        Commands::Due { as_of } => {
            let due = tracker.due_reviews(as_of)?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&due))?);
            } else if due.is_empty() {
                println!("Nothing due. You are on top of the forgetting curve!");
            } else {
                println!("{:<6} {:<6} {:<32} {:<8} {:<11} OVERDUE", "ID", "WEEK", "TITLE", "ACC", "DUE");
                println!("{}", "-".repeat(80));
                for item in due {
                    let title = item
                        .topic
                        .as_ref()
                        .map(|t| t.title.as_str())
                        .unwrap_or("?");
                    let marker = if item.progress.urgent_flag { "!" } else { "" };
                    println!(
                        "{:<6} {:<6} {:<32} {:<8} {:<11} {}d{}",
                        item.progress.topic_id,
                        item.progress.week_tag,
                        truncate(title, 30),
                        format!("{:.0}%", item.progress.accuracy_pct),
                        item.progress.next_review_on,
                        item.days_overdue,
                        marker
                    );
                }
            }
        }

        Commands::Stats => {
            let summary = tracker.summary(None)?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&summary))?);
            } else {
                println!("=== Study Statistics ===");
                println!("Topics completed: {}", summary.completed);
                match summary.mean_accuracy {
                    Some(acc) => println!("Average accuracy: {:.1}%", acc),
                    None => println!("Average accuracy: -"),
                }
                println!("Due for review: {}", summary.due);
                println!("Flagged urgent: {}", summary.urgent);

                if !summary.by_week.is_empty() {
                    println!();
                    println!("{:<8} {:<10} {:<10} DIFFICULTY", "WEEK", "COMPLETED", "ACCURACY");
                    for week in &summary.by_week {
                        println!(
                            "{:<8} {:<10} {:<10} {:.1}",
                            week.week_tag,
                            week.completed,
                            format!("{:.1}%", week.mean_accuracy),
                            week.mean_difficulty
                        );
                    }
                }
            }
        }

        Commands::Drill(drill_cmd) => match drill_cmd {
            DrillCommands::Add {
                accuracy,
                minutes,
                questions,
                topic,
            } => {
                let entry = tracker.log_drill(topic, accuracy, minutes, questions)?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&entry))?);
                } else {
                    println!(
                        "Drill logged: {} questions in {:.0} min ({:.1} min/question).",
                        entry.question_count,
                        entry.elapsed_minutes,
                        entry.minutes_per_question()
                    );
                }
            }

            DrillCommands::List { limit } => {
                let drills = tracker.recent_drills(limit)?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&drills))?);
                } else if drills.is_empty() {
                    println!("No drills logged.");
                } else {
                    println!("{:<11} {:<6} {:<8} {:<10} MIN/Q", "DATE", "TOPIC", "ACC", "QUESTIONS");
                    println!("{}", "-".repeat(50));
                    for d in drills {
                        let topic = d
                            .topic_id
                            .map(|id| id.to_string())
                            .unwrap_or_else(|| "-".to_string());
                        println!(
                            "{:<11} {:<6} {:<8} {:<10} {:.1}",
                            d.drilled_on,
                            topic,
                            format!("{:.0}%", d.accuracy_pct),
                            d.question_count,
                            d.minutes_per_question()
                        );
                    }
                }
            }
        },
    }

    Ok(())
}

// Counts chars, not bytes: titles carry accents
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
