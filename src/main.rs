use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{warn, Level};

mod aggregator;
mod audit;
mod categorizer;
mod config;
mod db;
mod error;
mod grading;
mod models;
mod report;
mod resolver;
mod sequencer;
mod store;
mod tracks;
mod transcript;
mod verification;

use audit::{AuditEngine, AuditOptions, ImportRequest};
use config::EngineConfig;
use db::PgStore;
use models::{ReferenceData, SemesterMapping};
use store::{AuditStore, MemoryStore};
use verification::CommitResult;

#[derive(Parser)]
#[command(name = "degree-audit")]
#[command(about = "Degree audit engine for Group Scholar transcripts", long_about = None)]
struct Cli {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    database_url: Option<String>,
    /// JSON file overriding the default engine policy
    #[arg(long, global = true)]
    policy: Option<PathBuf>,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load reference data for the CS, BA and CE programmes
    Seed,
    /// Import a transcript CSV for one student
    Import {
        #[arg(long)]
        student: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        major: String,
        #[arg(long)]
        cohort: i32,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Show how a transcript's semesters would be sequenced, without storing
    Sequence {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Resolve the category of one course for a major
    Categorize {
        #[arg(long)]
        code: String,
        #[arg(long)]
        major: String,
    },
    /// Print the semester mappings behind a verification token
    Review {
        #[arg(long)]
        token: String,
    },
    /// Approve pending semester mappings, optionally with edits
    Verify {
        #[arg(long)]
        token: String,
        /// JSON array of edited semester mappings
        #[arg(long)]
        mappings: Option<PathBuf>,
    },
    /// Reject pending semester mappings
    Reject {
        #[arg(long)]
        token: String,
    },
    /// Category progress, group rollups and graduation outlook
    Progress {
        #[arg(long)]
        student: String,
        #[arg(long)]
        include_planned: bool,
        #[arg(long)]
        allow_unverified: bool,
        #[arg(long)]
        json: bool,
    },
    /// Ranked list of outstanding requirements
    Remaining {
        #[arg(long)]
        student: String,
        #[arg(long)]
        allow_unverified: bool,
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown audit report
    Report {
        #[arg(long)]
        student: String,
        #[arg(long)]
        include_planned: bool,
        #[arg(long)]
        allow_unverified: bool,
        #[arg(long, default_value = "audit.md")]
        out: PathBuf,
    },
}

async fn pg_engine(
    database_url: Option<&str>,
    config: EngineConfig,
) -> anyhow::Result<AuditEngine<PgStore>> {
    let url = database_url.context("DATABASE_URL must be set to a production Postgres instance")?;
    let pool = db::connect(url).await?;
    Ok(AuditEngine::new(PgStore::new(pool), config))
}

async fn lookup_reference(database_url: Option<&str>) -> anyhow::Result<ReferenceData> {
    match database_url {
        Some(url) => {
            let pool = db::connect(url).await?;
            Ok(PgStore::new(pool).load_reference().await?)
        }
        None => {
            warn!("DATABASE_URL not set; using the built-in seed rules");
            Ok(MemoryStore::with_reference(db::seed_reference())
                .load_reference()
                .await?)
        }
    }
}

fn read_edits(path: &Path) -> anyhow::Result<Vec<SemesterMapping>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    verification::parse_edits(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn report_commit(result: CommitResult, token: &str) -> anyhow::Result<()> {
    match result {
        CommitResult::Success => {
            println!("Verification {token} committed.");
            Ok(())
        }
        CommitResult::StaleVerification => bail!("verification {token} is stale or unknown"),
        CommitResult::AlreadyFinalized => bail!("verification {token} was already finalized"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    config::init_tracing(cli.log_json, Level::INFO);

    let engine_config = match &cli.policy {
        Some(path) => EngineConfig::from_path(path)?,
        None => EngineConfig::default(),
    };
    let database_url = cli.database_url.as_deref();

    match cli.command {
        Commands::InitDb => {
            let url = database_url.context("DATABASE_URL must be set to a production Postgres instance")?;
            db::init_db(&db::connect(url).await?).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let url = database_url.context("DATABASE_URL must be set to a production Postgres instance")?;
            db::seed(&db::connect(url).await?).await?;
            println!("Seed data inserted.");
        }
        Commands::Import {
            student,
            name,
            major,
            cohort,
            csv,
        } => {
            let transcript = transcript::read_transcript(&csv)?;
            let engine = pg_engine(database_url, engine_config).await?;
            let outcome = engine
                .import_transcript(
                    ImportRequest {
                        student_id: student,
                        full_name: name,
                        major_code: major,
                        cohort_year: cohort,
                    },
                    &transcript,
                )
                .await?;

            println!(
                "Imported {} semesters for {} (math track {}, capstone {}).",
                outcome.mappings.len(),
                outcome.student_id,
                outcome.math_track,
                outcome.capstone_option
            );
            let stats = &outcome.statistics;
            println!(
                "{} of {} courses passed ({:.1} of {:.1} credits).",
                stats.courses_passed, stats.courses_total, stats.credits_passed, stats.credits_taken
            );
            for semester in &outcome.semesters {
                println!(
                    "  {}: {:.1} attempted, {:.1} passed, GPA {}",
                    semester.source_label,
                    semester.credits_attempted,
                    semester.credits_passed,
                    semester
                        .semester_gpa
                        .map(|gpa| format!("{gpa:.2}"))
                        .unwrap_or_else(|| "-".to_string())
                );
            }
            for warning in &outcome.warnings {
                println!("- {warning}");
            }
            if let Some(token) = &outcome.verification_token {
                println!("Semester mappings need review. Verification token: {token}");
            }
        }
        Commands::Sequence { csv } => {
            let transcript = transcript::read_transcript(&csv)?;
            let outcome = sequencer::sequence(&transcript.semesters, &engine_config);
            println!("{}", serde_json::to_string_pretty(&outcome.mappings)?);
            for warning in transcript.warnings.iter().chain(&outcome.warnings) {
                println!("- {warning}");
            }
            if outcome.needs_verification {
                println!("Needs verification before audit.");
            }
        }
        Commands::Categorize { code, major } => {
            let reference = lookup_reference(database_url).await?;
            let code = categorizer::resolve_alias(&categorizer::normalize_code(&code), &reference);
            let category = categorizer::categorize(&code, &major, &reference.rules, &engine_config);
            println!(
                "{code} -> {category} ({})",
                engine_config.parent_category(&category)
            );
        }
        Commands::Review { token } => {
            let engine = pg_engine(database_url, engine_config).await?;
            let record = engine.verification(&token).await?;
            println!(
                "Verification for {} is {}.",
                record.student_id,
                record.status.as_str()
            );
            let mappings = record
                .updated_mappings
                .as_ref()
                .unwrap_or(&record.original_mappings);
            println!("{}", serde_json::to_string_pretty(mappings)?);
        }
        Commands::Verify { token, mappings } => {
            let edits = mappings.as_deref().map(read_edits).transpose()?;
            let engine = pg_engine(database_url, engine_config).await?;
            let result = engine.submit_verification(&token, edits.as_deref()).await?;
            report_commit(result, &token)?;
        }
        Commands::Reject { token } => {
            let engine = pg_engine(database_url, engine_config).await?;
            let result = engine.reject_verification(&token).await?;
            report_commit(result, &token)?;
        }
        Commands::Progress {
            student,
            include_planned,
            allow_unverified,
            json,
        } => {
            let engine = pg_engine(database_url, engine_config).await?;
            let options = AuditOptions {
                include_planned,
                allow_unverified,
            };
            let progress = engine.compute_progress(&student, options).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&progress)?);
                return Ok(());
            }
            for category in &progress.categories {
                println!(
                    "- {} / {}{}: {:.1}/{:.1} credits, {}/{} courses ({:.0}%)",
                    category.parent_category,
                    category.category_name,
                    category
                        .sub_category
                        .as_deref()
                        .map(|sub| format!(" [{sub}]"))
                        .unwrap_or_default(),
                    category.credits_completed,
                    category.credits_required,
                    category.courses_completed,
                    category.courses_required,
                    category.progress_percentage
                );
            }
            let graduation = &progress.graduation;
            println!(
                "Overall {:.1}% ({} of {} requirements met){}",
                graduation.overall_percentage,
                graduation.requirements_completed,
                graduation.requirements_completed + graduation.requirements_remaining,
                if graduation.on_track { ", on track" } else { "" }
            );
            for warning in &progress.warnings {
                println!("- {warning}");
            }
        }
        Commands::Remaining {
            student,
            allow_unverified,
            json,
        } => {
            let engine = pg_engine(database_url, engine_config).await?;
            let options = AuditOptions {
                include_planned: false,
                allow_unverified,
            };
            let remaining = engine.compute_remaining(&student, options).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&remaining)?);
                return Ok(());
            }
            if remaining.is_empty() {
                println!("No outstanding requirements.");
            }
            for entry in &remaining {
                println!(
                    "{:>3} {} {} {} ({})",
                    entry.priority_order,
                    entry.requirement_type,
                    entry.course_code.as_deref().unwrap_or("-"),
                    entry.course_title,
                    entry.category_name
                );
            }
        }
        Commands::Report {
            student,
            include_planned,
            allow_unverified,
            out,
        } => {
            let engine = pg_engine(database_url, engine_config).await?;
            let options = AuditOptions {
                include_planned,
                allow_unverified,
            };
            let audit = engine.audit(&student, options).await?;
            let report = report::build_report(&audit, chrono::Utc::now().date_naive());
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
