//! Fable CLI - manuscript generation, review and translation
//!
//! Usage:
//!   fable write <project.json>             Generate every pending chapter
//!   fable review <project.json>            Review the full manuscript
//!   fable translate <project.json> --to fr Translate every unit

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fable_core::{
    AttributeValue, Chapter, EntityType, FableConfig, JobKind, Project, WorldEntity,
};
use fable_gateway::CompletionClient;
use fable_jobs::{JobHandle, JobSupervisor, ProgressEvent};
use fable_store::{MemoryStore, RecordStore};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "fable")]
#[command(author, version, about = "LLM-driven long-form manuscript pipeline")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file
    #[arg(long, default_value = "fable.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate every pending chapter of a project
    Write {
        /// Project description file (JSON)
        project: PathBuf,

        /// Directory for the generated units
        #[arg(short, long, default_value = "out")]
        output: PathBuf,
    },

    /// Run the full-manuscript review and print the verdict
    Review {
        /// Project description file (JSON)
        project: PathBuf,
    },

    /// Translate every unit into a target locale
    Translate {
        /// Project description file (JSON)
        project: PathBuf,

        /// Target locale tag
        #[arg(long = "to")]
        target_locale: String,

        /// Directory for the translated units
        #[arg(short, long, default_value = "out")]
        output: PathBuf,
    },
}

/// On-disk project description
#[derive(Debug, Deserialize)]
struct ProjectFile {
    title: String,
    #[serde(default = "default_locale")]
    locale: String,
    #[serde(default)]
    chapters: Vec<ChapterFile>,
    #[serde(default)]
    entities: Vec<EntityFile>,
}

fn default_locale() -> String {
    "en".to_string()
}

#[derive(Debug, Deserialize)]
struct ChapterFile {
    number: i32,
    title: String,
    #[serde(default)]
    plan: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct EntityFile {
    name: String,
    entity_type: EntityType,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    attributes: HashMap<String, AttributeValue>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = FableConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load {:?}", cli.config))?;

    match cli.command {
        Commands::Write { project, output } => cmd_write(project, output, config).await,
        Commands::Review { project } => cmd_review(project, config).await,
        Commands::Translate {
            project,
            target_locale,
            output,
        } => cmd_translate(project, target_locale, output, config).await,
    }
}

async fn cmd_write(project_path: PathBuf, output: PathBuf, config: FableConfig) -> Result<()> {
    let (store, supervisor, project_id) = setup(&project_path, &config).await?;

    let handle = supervisor.start(project_id, JobKind::Generation).await?;
    drain_events(handle).await?;

    tokio::fs::create_dir_all(&output).await?;
    let mut chapters = store.list_chapters(project_id).await?;
    chapters.sort_by_key(|c| fable_core::unit_order(c.number));
    for chapter in &chapters {
        let path = output.join(format!("unit-{:03}.md", chapter.number));
        tokio::fs::write(&path, format!("# {}\n\n{}\n", chapter.title, chapter.content)).await?;
        println!("  {} ({} words)", path.display(), chapter.word_count);
    }

    if let Some(meter) = store.get_usage(project_id).await? {
        println!(
            "Done: {} units, {} tokens over {} completion calls",
            chapters.len(),
            meter.total.total(),
            meter.steps
        );
    }
    Ok(())
}

async fn cmd_review(project_path: PathBuf, config: FableConfig) -> Result<()> {
    let (store, supervisor, project_id) = setup(&project_path, &config).await?;

    let handle = supervisor.start(project_id, JobKind::Review).await?;
    let job_id = handle.job_id;
    drain_events(handle).await?;

    let outputs = store.list_unit_outputs(job_id).await?;
    let verdict = outputs
        .get(&0)
        .context("review job left no verdict")?;
    // Already JSON; re-indent for the terminal
    let pretty: serde_json::Value = serde_json::from_str(verdict)?;
    println!("{}", serde_json::to_string_pretty(&pretty)?);
    Ok(())
}

async fn cmd_translate(
    project_path: PathBuf,
    target_locale: String,
    output: PathBuf,
    config: FableConfig,
) -> Result<()> {
    let (store, supervisor, project_id) = setup(&project_path, &config).await?;

    let handle = supervisor
        .start(project_id, JobKind::Translation { target_locale })
        .await?;
    let job_id = handle.job_id;
    drain_events(handle).await?;

    tokio::fs::create_dir_all(&output).await?;
    for (unit, text) in store.list_unit_outputs(job_id).await? {
        let path = output.join(format!("unit-{:03}.md", unit));
        tokio::fs::write(&path, text).await?;
        println!("  {}", path.display());
    }
    Ok(())
}

/// Load the project file, seed the store and build the supervisor
async fn setup(
    project_path: &Path,
    config: &FableConfig,
) -> Result<(MemoryStore, JobSupervisor<MemoryStore>, Uuid)> {
    let content = tokio::fs::read_to_string(project_path)
        .await
        .with_context(|| format!("Failed to read {:?}", project_path))?;
    let file: ProjectFile =
        serde_json::from_str(&content).context("Failed to parse project JSON")?;

    let store = MemoryStore::new();
    let project = Project::new(&file.title, &file.locale);
    store.upsert_project(&project).await?;

    for entry in &file.chapters {
        let mut chapter =
            Chapter::new(project.id, entry.number, &entry.title).with_plan(&entry.plan);
        if !entry.content.is_empty() {
            chapter.set_content(&entry.content);
        }
        store.upsert_chapter(&chapter).await?;
    }
    for entry in file.entities {
        let mut entity = WorldEntity::new(project.id, &entry.name, entry.entity_type);
        if let Some(status) = entry.status {
            entity.status = status;
        }
        for (key, value) in entry.attributes {
            entity.attributes.insert(key, value);
        }
        store.upsert_entity(&entity).await?;
    }

    println!(
        "Loaded \"{}\": {} units, {} entities",
        file.title,
        file.chapters.len(),
        store.list_entities(project.id).await?.len()
    );

    let backend = Arc::new(CompletionClient::from_config(&config.model)?);
    let supervisor = JobSupervisor::new(store.clone(), backend, config.clone());
    Ok((store, supervisor, project.id))
}

/// Print progress events until the job finishes
async fn drain_events(mut handle: JobHandle) -> Result<()> {
    loop {
        match handle.events.recv().await {
            Ok(ProgressEvent::Started { total, .. }) => {
                println!("Job {} started: {} units", handle.job_id, total);
            }
            Ok(ProgressEvent::Progress {
                unit,
                current,
                total,
                ..
            }) => {
                println!("  [{}/{}] unit {}", current, total, unit);
            }
            Ok(ProgressEvent::UnitSkipped { unit, message, .. }) => {
                println!("  unit {} skipped: {}", unit, message);
            }
            Ok(ProgressEvent::Completed { skipped_units, .. }) => {
                if skipped_units.is_empty() {
                    println!("Job completed");
                } else {
                    println!("Job completed, skipped units: {:?}", skipped_units);
                }
                return Ok(());
            }
            Ok(ProgressEvent::Failed { message, .. }) => {
                anyhow::bail!("job failed: {}", message);
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                anyhow::bail!("job worker exited without a terminal event");
            }
        }
    }
}
