use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eltflow_core::{
    Config, ConfigSource, EnvVariableStore, LiteralSource, PartitionKey, RunReport, TaskState,
    VariableSource,
};
use eltflow_dag::{build_from_source, PipelineGraph};
use eltflow_engine::{Collaborators, Executor, RunOptions};
use eltflow_sql::{BoundQuery, PartitionTableBuilder, PartitionViewBuilder, SqlTemplates};
use eltflow_warehouse::{
    describe_parameter, BigQueryWarehouse, GcsObjectStore, LocalObjectStore, MockObjectStore,
    MockWarehouse, ObjectStore,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "eltflow.toml";

/// eltflow - partitioned ELT pipelines from object storage into BigQuery
#[derive(Parser)]
#[command(name = "eltflow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: eltflow.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Take project, datasets and partitions from ELTFLOW_* variables
    #[arg(long, global = true)]
    from_env: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and assemble the pipeline graph
    Validate,

    /// Show the tasks of the pipeline in execution order
    Plan {
        #[arg(short, long, value_enum, default_value_t = PlanFormat::Text)]
        format: PlanFormat,
    },

    /// Print the SQL for one partition
    Render {
        /// Partition key (e.g. "USA")
        partition: String,

        /// Render the reporting view instead of the partition table
        #[arg(long)]
        view: bool,
    },

    /// Execute the pipeline
    Run {
        /// Use in-memory adapters instead of BigQuery
        #[arg(long)]
        dry_run: bool,

        /// Output file for the run report
        #[arg(short, long, default_value = "report.json")]
        output: PathBuf,

        /// Also write a markdown report
        #[arg(short, long)]
        markdown: Option<PathBuf>,

        /// Mark a task skipped without running it (repeatable)
        #[arg(long = "skip", value_name = "TASK")]
        skip: Vec<String>,

        /// Dry runs only: resolve source objects under this directory
        /// (`<root>/<bucket>/<object>`)
        #[arg(long, requires = "dry_run")]
        local_root: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PlanFormat {
    Text,
    Json,
    Dot,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A missing .env is fine; it may set RUST_LOG, so load it first
    let _ = dotenvy::dotenv();
    init_tracing(log_filter(cli.verbose));

    let (config, graph) = load_pipeline(&cli)?;

    if cli.verbose {
        eprintln!(
            "{} {} ({} tasks, {} edges)",
            "Pipeline".cyan(),
            graph.dag_id(),
            graph.node_count(),
            graph.edge_count()
        );
    }

    match cli.command {
        Commands::Validate => validate_command(&config, &graph),
        Commands::Plan { format } => plan_command(&config, &graph, format),
        Commands::Render { partition, view } => render_command(&config, &partition, view),
        Commands::Run {
            dry_run,
            output,
            markdown,
            skip,
            local_root,
        } => {
            run_command(
                &config,
                &graph,
                RunArgs {
                    dry_run,
                    output: &output,
                    markdown: markdown.as_deref(),
                    skip,
                    local_root,
                },
            )
            .await
        }
    }
}

/// `RUST_LOG` overrides the default level
fn log_filter(verbose: bool) -> EnvFilter {
    let default = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Log to stderr
fn init_tracing(filter: EnvFilter) {
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Load the configuration from the chosen source and assemble the graph
fn load_pipeline(cli: &Cli) -> Result<(Config, PipelineGraph)> {
    let path = cli.config.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));

    let source: Box<dyn ConfigSource> = if cli.from_env {
        let base = if path.exists() {
            Config::from_file(&path)?
        } else {
            if cli.verbose {
                eprintln!("{}", "No config file found, using defaults as the base".yellow());
            }
            Config::default()
        };
        Box::new(VariableSource::new(base, EnvVariableStore::default()))
    } else {
        if !path.exists() {
            anyhow::bail!(
                "Config file not found at {}. Pass --config or use --from-env.",
                path.display()
            );
        }
        Box::new(LiteralSource::File(path.clone()))
    };

    tracing::debug!(source = source.name(), path = %path.display(), "loading configuration");

    build_from_source(source.as_ref()).context("failed to build pipeline")
}

/// Validate command - config and graph are already checked by the time we get here
fn validate_command(config: &Config, graph: &PipelineGraph) -> Result<()> {
    println!("{}", "✓ Configuration is valid".green().bold());
    println!();
    println!("{} {}", "DAG:".bold(), graph.dag_id());
    if !config.pipeline.description.is_empty() {
        println!("{} {}", "Description:".bold(), config.pipeline.description);
    }
    if !config.pipeline.tags.is_empty() {
        println!("{} {}", "Tags:".bold(), config.pipeline.tags.join(", "));
    }
    println!("{} {}", "Project:".bold(), config.warehouse.project_id);
    println!("{} {}", "Source:".bold(), config.source.object_ref());
    println!(
        "{} {}",
        "Partitions:".bold(),
        graph
            .partition_chains()
            .iter()
            .map(|(p, _)| p.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("{} {}", "Tasks:".bold(), graph.node_count());
    println!("{} {}", "Dependencies:".bold(), graph.edge_count());
    println!("{} {}", "Fingerprint:".bold(), graph.fingerprint());
    Ok(())
}

fn plan_json(config: &Config, graph: &PipelineGraph) -> serde_json::Value {
    serde_json::json!({
        "dag_id": graph.dag_id(),
        "description": config.pipeline.description,
        "tags": config.pipeline.tags,
        "fingerprint": graph.fingerprint(),
        "nodes": graph.nodes(),
        "edges": graph.edges(),
    })
}

/// Plan command - print the graph in the requested format
fn plan_command(config: &Config, graph: &PipelineGraph, format: PlanFormat) -> Result<()> {
    match format {
        PlanFormat::Dot => print!("{}", graph.to_dot()),
        PlanFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&plan_json(config, graph))?);
        }
        PlanFormat::Text => {
            let order = graph
                .topological_sort()
                .ok_or_else(|| anyhow::anyhow!("graph '{}' contains a cycle", graph.dag_id()))?;

            println!("{} {}", "Plan for".bold(), graph.dag_id().green());
            println!();
            for (i, id) in order.iter().enumerate() {
                let Some(node) = graph.node(id) else {
                    continue;
                };
                let parents = graph.parents(id);
                let after = if parents.is_empty() {
                    String::new()
                } else {
                    let names: Vec<&str> = parents.iter().map(|p| p.as_str()).collect();
                    format!(" after {}", names.join(", ")).dimmed().to_string()
                };
                println!("  {:>2}. {} [{}]{}", i + 1, id.cyan(), node.kind(), after);
            }
        }
    }
    Ok(())
}

/// Render command - show the statement a partition task would run
fn render_command(config: &Config, partition: &str, view: bool) -> Result<()> {
    let key = PartitionKey::new(partition)?;
    if !config.partitions.keys.iter().any(|k| k.eq_ignore_ascii_case(partition)) {
        eprintln!(
            "{} '{}' is not one of the configured partitions",
            "⚠ Warning:".yellow(),
            partition
        );
    }

    let template_dir = config.template_dir();
    let templates = Arc::new(SqlTemplates::from_config(&config.templates, template_dir.as_deref())?);

    let (target, query) = if view {
        let builder = PartitionViewBuilder::from_config(config, templates);
        (builder.destination(&key), builder.build(&key)?)
    } else {
        let builder = PartitionTableBuilder::from_config(config, templates);
        (builder.destination(&key), builder.build(&key)?)
    };

    println!("{} {}", "--".dimmed(), target.to_string().dimmed());
    println!("{}", query.sql);
    print_parameters(&query);
    Ok(())
}

fn print_parameters(query: &BoundQuery) {
    if query.parameters.is_empty() {
        return;
    }
    println!();
    println!("{}", "Parameters:".bold());
    for parameter in &query.parameters {
        println!("  {}", describe_parameter(&parameter.name, &parameter.value));
    }
}

struct RunArgs<'a> {
    dry_run: bool,
    output: &'a Path,
    markdown: Option<&'a Path>,
    skip: Vec<String>,
    local_root: Option<PathBuf>,
}

/// Run command - execute the graph and write the report
async fn run_command(config: &Config, graph: &PipelineGraph, args: RunArgs<'_>) -> Result<()> {
    let collaborators = if args.dry_run {
        let store: Arc<dyn ObjectStore> = match &args.local_root {
            Some(root) => Arc::new(LocalObjectStore::new(root)),
            None => Arc::new(MockObjectStore::with_objects([&config.source.object_ref()])),
        };
        let warehouse = Arc::new(MockWarehouse::new());
        Collaborators::new(store, warehouse.clone(), warehouse)
    } else {
        // the sensor must watch the bucket the load job reads from
        let store: Arc<dyn ObjectStore> = Arc::new(
            GcsObjectStore::with_adc()
                .await
                .context("failed to connect to Cloud Storage")?,
        );
        let warehouse = Arc::new(
            BigQueryWarehouse::with_adc(&config.warehouse.project_id)
                .await
                .context("failed to connect to BigQuery")?,
        );
        Collaborators::new(store, warehouse.clone(), warehouse)
    };

    eprintln!(
        "{} {} {}",
        "Running".cyan(),
        graph.dag_id(),
        if args.dry_run { "(dry run)".yellow().to_string() } else { String::new() }
    );

    let options = RunOptions::from_config(config).with_skip(args.skip);
    let report = Executor::new(collaborators, options).run(graph).await?;

    report.save_to_file(args.output)?;
    eprintln!("{} {}", "Report saved to:".green(), args.output.display());

    if let Some(path) = args.markdown {
        std::fs::write(path, report.to_markdown())?;
        eprintln!("{} {}", "Markdown report saved to:".green(), path.display());
    }

    print_report_summary(&report);

    if report.has_failures() {
        std::process::exit(1);
    }

    Ok(())
}

fn print_report_summary(report: &RunReport) {
    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{} {}", "Run".bold().bright_blue(), report.run_id.bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    for task in &report.tasks {
        let state = task.state.to_string();
        let state = match task.state {
            TaskState::Success => state.green(),
            TaskState::Failed => state.red().bold(),
            TaskState::UpstreamFailed => state.yellow(),
            TaskState::Skipped => state.dimmed(),
            TaskState::Pending | TaskState::Running => state.normal(),
        };
        print!("  {:<28} {:<16}", task.task_id, state);
        if task.attempts > 1 {
            print!(" {} attempts", task.attempts);
        }
        if let Some(rows) = task.rows_loaded {
            print!(" {} rows", rows);
        }
        println!();
        if let Some(error) = &task.error {
            println!("      {}", error.red());
        }
    }

    let summary = &report.summary;
    println!();
    println!(
        "{} total, {} succeeded, {} failed, {} upstream failed, {} skipped",
        summary.total,
        summary.succeeded.to_string().green(),
        summary.failed.to_string().red(),
        summary.upstream_failed.to_string().yellow(),
        summary.skipped
    );

    if report.has_failures() {
        println!("{}", "✗ Run failed".red().bold());
    } else {
        println!("{}", "✓ Run succeeded".green().bold());
    }
    println!("{}", "=".repeat(60).bright_blue());
}
