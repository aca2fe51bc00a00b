use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use treemerge_core::config::Settings;
use treemerge_core::inputs::{load_tree, BatchManifest};
use treemerge_core::logging::{init_logging, log_report};
use treemerge_engine::{MergeEngine, MergeOutcome, MergeScenario, MergeStatistics};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "treemerge", about = "Structured merge of source files and trees")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the settings file
    #[arg(long, default_value = ".treemerge/settings.json", global = true)]
    config: PathBuf,

    /// How merge results are printed
    #[arg(long, value_enum, default_value_t = Format::Text, global = true)]
    format: Format,

    /// Write a JSON run report to this path
    #[arg(long, global = true)]
    report: Option<PathBuf>,

    /// Emit choice nodes instead of conflicts
    #[arg(long, global = true)]
    conditional: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge two or three revisions of a file
    Merge {
        #[arg(long)]
        left: PathBuf,
        /// Common ancestor; two-way merge when omitted
        #[arg(long)]
        base: Option<PathBuf>,
        #[arg(long)]
        right: PathBuf,
        /// Write the result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Merge any number of variants into one tree with choice nodes
    Nway {
        #[arg(num_args = 2.., required = true)]
        files: Vec<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Merge every scenario listed in a JSON manifest
    Batch {
        manifest: PathBuf,
        /// Directory for the merged results, one file per scenario
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Manage the settings file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a settings file with the default values
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Print the effective settings
    Show,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

/// Summary of one CLI run, written with `--report`.
#[derive(Debug, Serialize)]
struct MergeReport {
    run_id: Uuid,
    command: &'static str,
    started: DateTime<Utc>,
    finished: DateTime<Utc>,
    scenarios: Vec<ScenarioReport>,
    statistics: MergeStatistics,
}

#[derive(Debug, Serialize)]
struct ScenarioReport {
    name: String,
    conflicts: usize,
    operations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl MergeReport {
    fn new(command: &'static str) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            command,
            started: now,
            finished: now,
            scenarios: Vec::new(),
            statistics: MergeStatistics::default(),
        }
    }

    fn record(&mut self, name: String, outcome: &MergeOutcome) {
        self.scenarios.push(ScenarioReport {
            name,
            conflicts: outcome.statistics.conflicts,
            operations: outcome.operations.len(),
            error: None,
        });
        self.statistics.absorb(outcome.statistics.clone());
    }

    fn record_failure(&mut self, name: String, error: &anyhow::Error) {
        self.statistics.errors.push(format!("{name}: {error:#}"));
        self.scenarios.push(ScenarioReport {
            name,
            conflicts: 0,
            operations: 0,
            error: Some(format!("{error:#}")),
        });
    }

    fn finish(&mut self, path: Option<&Path>) -> anyhow::Result<()> {
        self.finished = Utc::now();
        log_report(
            self.run_id,
            self.command,
            self.scenarios.len(),
            self.scenarios.iter().map(|s| s.conflicts).sum(),
            self.statistics.errors.len(),
        );
        let Some(path) = path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("writing report to {}", path.display()))?;
        tracing::info!(run_id = %self.run_id, path = %path.display(), "report written");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    if let Commands::Config { action } = &cli.command {
        return cmd_config(&cli, action).map(|_| ExitCode::SUCCESS);
    }

    let mut settings = Settings::load_or_default(&cli.config)?;
    if cli.conditional {
        settings.merge.conditional_merge = true;
    }

    let _guard = init_logging(&settings.logging)?;
    let engine = settings.engine()?;

    let conflicts = match &cli.command {
        Commands::Merge {
            left,
            base,
            right,
            output,
        } => cmd_merge(&cli, &engine, left, base.as_deref(), right, output.as_deref())?,
        Commands::Nway { files, output } => cmd_nway(&cli, &engine, files, output.as_deref())?,
        Commands::Batch { manifest, out_dir } => {
            cmd_batch(&cli, &settings, engine, manifest, out_dir.as_deref()).await?
        }
        Commands::Config { .. } => 0,
    };

    // Same convention as diff3: exit status 1 when conflicts remain
    Ok(if conflicts > 0 {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

fn cmd_config(cli: &Cli, action: &ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init { force } => {
            if cli.config.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    cli.config.display()
                );
            }
            Settings::default().save(&cli.config)?;
            println!("Wrote default settings to {}", cli.config.display());
        }
        ConfigAction::Show => {
            let settings = Settings::load_or_default(&cli.config)?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
    }
    Ok(())
}

fn cmd_merge(
    cli: &Cli,
    engine: &MergeEngine,
    left: &Path,
    base: Option<&Path>,
    right: &Path,
    output: Option<&Path>,
) -> anyhow::Result<usize> {
    let mut report = MergeReport::new("merge");

    let left_tree = load_tree(left)?;
    let right_tree = load_tree(right)?;
    let scenario = match base {
        Some(base) => MergeScenario::three_way(left_tree, load_tree(base)?, right_tree),
        None => MergeScenario::two_way(left_tree, right_tree),
    };

    let outcome = engine.merge(&scenario)?;
    emit(cli.format, &outcome, output)?;

    report.record(left.display().to_string(), &outcome);
    report.finish(cli.report.as_deref())?;
    Ok(outcome.statistics.conflicts)
}

fn cmd_nway(
    cli: &Cli,
    engine: &MergeEngine,
    files: &[PathBuf],
    output: Option<&Path>,
) -> anyhow::Result<usize> {
    let mut report = MergeReport::new("nway");

    let inputs = files
        .iter()
        .map(|f| load_tree(f))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let outcome = engine.merge_nway(inputs)?;
    emit(cli.format, &outcome, output)?;

    let name = files
        .iter()
        .map(|f| f.display().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    report.record(name, &outcome);
    report.finish(cli.report.as_deref())?;
    Ok(outcome.statistics.conflicts)
}

async fn cmd_batch(
    cli: &Cli,
    settings: &Settings,
    engine: MergeEngine,
    manifest: &Path,
    out_dir: Option<&Path>,
) -> anyhow::Result<usize> {
    let mut report = MergeReport::new("batch");
    let manifest = BatchManifest::load(manifest)?;
    tracing::info!(
        scenarios = manifest.scenarios.len(),
        concurrency = settings.batch.concurrency,
        "starting batch"
    );

    let engine = Arc::new(engine);
    let permits = Arc::new(Semaphore::new(settings.batch.concurrency.max(1)));
    let mut handles: Vec<BatchTask> = Vec::with_capacity(manifest.scenarios.len());

    for entry in manifest.scenarios {
        let engine = engine.clone();
        let permit = permits.clone().acquire_owned().await?;
        let name = entry.display_name();
        let handle = tokio::task::spawn_blocking(move || -> anyhow::Result<MergeOutcome> {
            let _permit = permit;
            let scenario = entry.load_scenario()?;
            Ok(engine.merge(&scenario)?)
        });
        handles.push((name, handle));
    }

    let merged = drain_batch(handles, settings.batch.fail_fast, &mut report).await;

    if let Some(dir) = out_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;
    }

    let mut conflicts = 0;
    for (name, outcome) in &merged {
        conflicts += outcome.statistics.conflicts;
        if let Some(dir) = out_dir {
            let path = dir.join(output_file_name(name, cli.format));
            emit(cli.format, outcome, Some(path.as_path()))?;
        } else if cli.format == Format::Text {
            println!("{name}: {} conflict(s)", outcome.statistics.conflicts);
        }
    }

    if cli.format == Format::Json && out_dir.is_none() {
        report.finished = Utc::now();
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    report.finish(cli.report.as_deref())?;

    let failed = report.statistics.errors.len();
    if failed > 0 {
        anyhow::bail!("{failed} scenario(s) failed");
    }
    Ok(conflicts)
}

type BatchTask = (String, JoinHandle<anyhow::Result<MergeOutcome>>);

/// Awaits the scenario tasks in manifest order and records each result in
/// `report`. A task that panics fails its own scenario only. With
/// `fail_fast`, the first failure aborts every task that has not started yet.
async fn drain_batch(
    tasks: Vec<BatchTask>,
    fail_fast: bool,
    report: &mut MergeReport,
) -> Vec<(String, MergeOutcome)> {
    let mut merged = Vec::with_capacity(tasks.len());
    let mut pending = tasks.into_iter();

    while let Some((name, handle)) = pending.next() {
        let result = handle
            .await
            .unwrap_or_else(|e| Err(anyhow::anyhow!("merge task failed: {e}")));
        match result {
            Ok(outcome) => {
                report.record(name.clone(), &outcome);
                merged.push((name, outcome));
            }
            Err(e) => {
                tracing::error!(scenario = %name, error = %e, "scenario failed");
                report.record_failure(name, &e);
                if fail_fast {
                    let rest: Vec<BatchTask> = pending.by_ref().collect();
                    tracing::warn!(skipped = rest.len(), "fail-fast: dropping remaining scenarios");
                    for (_, handle) in &rest {
                        handle.abort();
                    }
                    // Tasks already running cannot be aborted; wait for them.
                    for (_, handle) in rest {
                        let _ = handle.await;
                    }
                    break;
                }
            }
        }
    }
    merged
}

fn output_file_name(name: &str, format: Format) -> String {
    let stem: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    match format {
        Format::Text => format!("{stem}.merged"),
        Format::Json => format!("{stem}.json"),
    }
}

fn emit(format: Format, outcome: &MergeOutcome, output: Option<&Path>) -> anyhow::Result<()> {
    let content = match format {
        Format::Text => outcome.render(),
        Format::Json => serde_json::to_string_pretty(outcome)?,
    };
    match output {
        Some(path) => std::fs::write(path, content)
            .with_context(|| format!("writing {}", path.display()))?,
        None => println!("{content}"),
    }
    Ok(())
}
