use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod config;
mod db;
mod error;
mod import;
mod memory;
mod models;
mod notify;
mod pipeline;
mod report;
mod risk;
mod stats;
mod store;
mod validate;

use config::Config;
use db::PgStore;
use error::Failure;
use memory::{MemorySink, MemoryStore};
use models::{NewMember, Role};
use pipeline::Pipeline;
use report::Queries;
use store::{LogSink, StudentDirectory};

#[derive(Parser)]
#[command(name = "dropout-early-warning")]
#[command(about = "Student engagement tracking and dropout risk alerts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo members and engagement history
    Seed,
    /// Add or update a student, mentor or admin
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, value_parser = parse_role, default_value = "student")]
        role: Role,
        #[arg(long)]
        course: Option<String>,
        #[arg(long)]
        year: Option<i32>,
    },
    /// Submit one engagement event and print the risk outcome
    Submit {
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        event_type: String,
        /// Event payload as JSON, e.g. '{"status":"absent"}'
        #[arg(long)]
        data: String,
    },
    /// Submit events from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Show a student's profile and event history
    Profile {
        #[arg(long)]
        student: Uuid,
    },
    /// List students ordered by risk
    Dashboard {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print institution-wide statistics as JSON
    Overview,
    /// Generate a markdown report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Run a CSV through the pipeline in memory, without a database
    Simulate {
        #[arg(long)]
        csv: PathBuf,
        /// Mentor email to register before the run; repeatable
        #[arg(long)]
        mentor: Vec<String>,
    },
}

fn parse_role(value: &str) -> Result<Role, String> {
    Role::parse(value).ok_or_else(|| format!("unknown role `{value}`"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let command = match cli.command {
        Commands::Simulate { csv, mentor } => return simulate(&csv, mentor).await,
        other => other,
    };

    let config = Config::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    let store = Arc::new(PgStore::new(pool.clone()));
    let result = run(command, &store).await;
    pool.close().await;

    match result {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(err) => Err(err),
    }
}

/// Returns `Ok(false)` when a submission was rejected.
async fn run(command: Commands, store: &Arc<PgStore>) -> anyhow::Result<bool> {
    let pipeline = Pipeline::with_store(store.clone(), Arc::new(LogSink));
    let queries = Queries {
        directory: store.as_ref(),
        events: store.as_ref(),
        profiles: store.as_ref(),
    };

    match command {
        Commands::InitDb => {
            db::init_db(store.pool()).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(store, &pipeline).await?;
            println!("Seed data inserted.");
        }
        Commands::Register {
            name,
            email,
            role,
            course,
            year,
        } => {
            let member = store
                .register(NewMember {
                    name,
                    email,
                    role,
                    course,
                    year,
                })
                .await?;
            println!("Registered {} {} ({}).", member.role, member.email, member.id);
        }
        Commands::Submit {
            student,
            event_type,
            data,
        } => {
            let event_data: serde_json::Value =
                serde_json::from_str(&data).context("--data must be valid JSON")?;
            match pipeline.submit_event(student, &event_type, event_data).await {
                Ok(outcome) => println!("{}", serde_json::to_string_pretty(&outcome)?),
                Err(err) => {
                    tracing::warn!(kind = err.kind(), "submission rejected");
                    println!("{}", serde_json::to_string_pretty(&Failure::from(&err))?);
                    return Ok(false);
                }
            }
        }
        Commands::Import { csv } => {
            let summary = import::import_csv(store.as_ref(), &pipeline, &csv).await?;
            println!(
                "Submitted {} events from {} ({} rejected, {} mentor alerts).",
                summary.submitted,
                csv.display(),
                summary.rejected,
                summary.mentor_alerts
            );
        }
        Commands::Profile { student } => match queries.student_detail(student).await {
            Ok(detail) => println!("{}", serde_json::to_string_pretty(&detail)?),
            Err(err) if err.is_validation() => {
                println!("{}", serde_json::to_string_pretty(&Failure::from(&err))?);
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        },
        Commands::Dashboard { limit } => {
            let (entries, summary) = queries.students_by_risk().await?;
            if entries.is_empty() {
                println!("No students registered.");
                return Ok(true);
            }

            println!(
                "{} students: {} high, {} medium, {} low risk",
                entries.len(),
                summary.high,
                summary.medium,
                summary.low
            );
            print_ranking(&entries, limit);
        }
        Commands::Overview => {
            let overview = queries.institution_overview().await?;
            println!("{}", serde_json::to_string_pretty(&overview)?);
        }
        Commands::Report { out, limit } => {
            let overview = queries.institution_overview().await?;
            let (ranking, _) = queries.students_by_risk().await?;
            let report = report::build_report(Utc::now(), &overview, &ranking, limit);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Simulate { .. } => anyhow::bail!("simulate does not use the database"),
    }

    Ok(true)
}

async fn simulate(csv: &std::path::Path, mentors: Vec<String>) -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::default());
    for email in mentors {
        store
            .register(NewMember {
                name: email.clone(),
                email,
                role: Role::Mentor,
                course: None,
                year: None,
            })
            .await?;
    }

    let pipeline = Pipeline::with_store(store.clone(), sink.clone());
    let summary = import::import_csv(store.as_ref(), &pipeline, csv).await?;
    println!(
        "Simulated {} events ({} rejected): {} student notifications, {} mentor alerts.",
        summary.submitted,
        summary.rejected,
        sink.student_notifications().len(),
        sink.mentor_alerts().len()
    );

    let queries = Queries {
        directory: store.as_ref(),
        events: store.as_ref(),
        profiles: store.as_ref(),
    };
    let (entries, _) = queries.students_by_risk().await?;
    print_ranking(&entries, entries.len());
    Ok(())
}

fn print_ranking(entries: &[models::StudentRiskEntry], limit: usize) {
    for entry in entries.iter().take(limit) {
        println!(
            "- {} ({}) {} risk: {}",
            entry.student.name, entry.student.email, entry.risk_level, entry.risk_reason
        );
    }
}
