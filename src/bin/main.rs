//! Mimir CLI - validate configurations, run inquiries, serve the API
//!
//! Usage:
//!   mimir validate [--configs <dir>] [--secrets <dir>] [--no-secrets]
//!   mimir query -m <metric> [-m ...] [-d <dimension> ...] [--dry-run]
//!   mimir describe <name> [metric|dimension|source]
//!   mimir list {sources|metrics|dimensions}
//!   mimir create {metric|dimension}
//!   mimir init [<dir>]
//!   mimir serve [--port <port>]

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mimir::catalog::FileConfigLoader;
use mimir::engine::{Engine, CONFIGS_PATH_VAR, SECRETS_PATH_VAR};
use mimir::error::MimirResult;
use mimir::model::Granularity;
use mimir::planner::InquiryRequest;

#[derive(Parser)]
#[command(name = "mimir")]
#[command(about = "Mimir - A semantic layer for data analytics")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration files
    Validate {
        /// Path to the configs directory
        #[arg(short, long, default_value = "configs")]
        configs: PathBuf,

        /// Path to the secrets directory
        #[arg(short, long, default_value = "secrets")]
        secrets: PathBuf,

        /// Skip secrets and connection validation
        #[arg(long)]
        no_secrets: bool,
    },

    /// Run an inquiry against the engine
    Query {
        /// Metric to query (repeatable)
        #[arg(short, long = "metric", required = true)]
        metrics: Vec<String>,

        /// Dimension to group by (repeatable)
        #[arg(short, long = "dimension")]
        dimensions: Vec<String>,

        /// Time granularity (TIME, DATE, MONTH or YEAR)
        #[arg(short, long)]
        granularity: Option<String>,

        /// Start date in YYYY-MM-DD format
        #[arg(long)]
        start_date: Option<String>,

        /// End date in YYYY-MM-DD format (inclusive)
        #[arg(long)]
        end_date: Option<String>,

        /// SQL WHERE clause to apply
        #[arg(short = 'f', long = "filter")]
        global_filter: Option<String>,

        /// Column list to order the results by
        #[arg(short, long)]
        order_by: Option<String>,

        /// Compile and print the federated SQL without executing it
        #[arg(long)]
        dry_run: bool,

        /// Path to the configs directory
        #[arg(short, long, default_value = "configs")]
        configs: PathBuf,

        /// Path to the secrets directory
        #[arg(short, long, default_value = "secrets")]
        secrets: PathBuf,
    },

    /// Describe a single definition
    Describe {
        /// Name of the definition
        name: String,

        /// Kind of definition (metric, dimension or source)
        #[arg(default_value = "metric")]
        kind: String,

        /// Path to the configs directory
        #[arg(short, long, default_value = "configs")]
        configs: PathBuf,
    },

    /// Initialize a new project directory structure
    Init {
        /// The project directory to create
        #[arg(default_value = ".")]
        project: PathBuf,
    },

    /// List available definitions
    #[command(subcommand)]
    List(ListCommands),

    /// Create new definitions interactively
    #[command(subcommand)]
    Create(CreateCommands),

    /// Serve the HTTP API
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = 8090)]
        port: u16,

        /// Path to the configs directory (defaults to $CONFIGS_PATH)
        #[arg(short, long)]
        configs: Option<PathBuf>,

        /// Path to the secrets directory (defaults to $SECRETS_PATH)
        #[arg(short, long)]
        secrets: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ListCommands {
    /// List all sources
    Sources {
        #[arg(short, long, default_value = "configs")]
        configs: PathBuf,
    },
    /// List all metrics
    Metrics {
        #[arg(short, long, default_value = "configs")]
        configs: PathBuf,
    },
    /// List all dimensions
    Dimensions {
        #[arg(short, long, default_value = "configs")]
        configs: PathBuf,
    },
}

#[derive(Subcommand)]
enum CreateCommands {
    /// Create a new metric definition
    Metric {
        #[arg(short, long, default_value = "configs")]
        configs: PathBuf,
    },
    /// Create a new dimension definition
    Dimension {
        #[arg(short, long, default_value = "configs")]
        configs: PathBuf,
    },
}

fn offline_engine(configs: &PathBuf) -> Engine {
    Engine::new(
        Arc::new(FileConfigLoader::new(configs, None::<PathBuf>)),
        false,
    )
}

fn connected_engine(configs: &PathBuf, secrets: &PathBuf) -> Engine {
    Engine::new(
        Arc::new(FileConfigLoader::new(configs, Some(secrets))),
        true,
    )
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Validate {
            configs,
            secrets,
            no_secrets,
        } => cmd_validate(configs, secrets, no_secrets),
        Commands::Query {
            metrics,
            dimensions,
            granularity,
            start_date,
            end_date,
            global_filter,
            order_by,
            dry_run,
            configs,
            secrets,
        } => {
            let request = InquiryRequest {
                metrics,
                dimensions,
                start_date,
                end_date,
                granularity: None,
                global_filter,
                order_by,
                client_sql: None,
            };
            cmd_query(request, granularity, dry_run, configs, secrets).await
        }
        Commands::Describe {
            name,
            kind,
            configs,
        } => cmd_describe(name, kind, configs),
        Commands::Init { project } => cmd_init(project),
        Commands::List(command) => cmd_list(command),
        Commands::Create(command) => cmd_create(command),
        Commands::Serve {
            port,
            configs,
            secrets,
        } => cmd_serve(port, configs, secrets).await,
    }
}

fn fail(err: impl std::fmt::Display) -> ExitCode {
    eprintln!("Error: {err}");
    ExitCode::FAILURE
}

fn cmd_validate(configs: PathBuf, secrets: PathBuf, no_secrets: bool) -> ExitCode {
    println!("Validating configs in: {}", configs.display());
    let engine = if no_secrets {
        println!("Skipping secrets and connection validation.");
        offline_engine(&configs)
    } else {
        println!("Using secrets from: {}", secrets.display());
        connected_engine(&configs, &secrets)
    };

    let report = || -> MimirResult<(usize, usize, usize)> {
        let sources = engine.catalog().get_sources()?;
        let metrics = engine.catalog().get_metrics()?;
        let dimensions = engine.catalog().get_dimensions()?;
        Ok((sources.len(), metrics.len(), dimensions.len()))
    };

    match report() {
        Ok((sources, metrics, dimensions)) => {
            println!("All configurations are valid.");
            println!("Found {sources} sources, {metrics} metrics, and {dimensions} dimensions.");
            ExitCode::SUCCESS
        }
        Err(err) => fail(format!("invalid configuration found: {err}")),
    }
}

async fn cmd_query(
    mut request: InquiryRequest,
    granularity: Option<String>,
    dry_run: bool,
    configs: PathBuf,
    secrets: PathBuf,
) -> ExitCode {
    if let Some(symbol) = granularity {
        request.granularity = match Granularity::parse(&symbol) {
            Ok(granularity) => Some(granularity),
            Err(err) => return fail(err),
        };
    }

    let engine = connected_engine(&configs, &secrets);
    println!("Building inquiry...");
    let inquiry = match engine.inquiry(&request) {
        Ok(inquiry) => inquiry,
        Err(err) => return fail(err),
    };

    if dry_run {
        println!("Compiling query...");
        return match inquiry.compile() {
            Ok(sql) => {
                println!("{sql}");
                ExitCode::SUCCESS
            }
            Err(err) => fail(err),
        };
    }

    println!("Dispatching inquiry...");
    match inquiry.dispatch().await {
        Ok(table) => {
            if table.num_rows() == 0 {
                println!("Query returned no results.");
                return ExitCode::SUCCESS;
            }
            match arrow::util::pretty::pretty_format_batches(&table.batches) {
                Ok(rendered) => println!("{rendered}"),
                Err(err) => return fail(err),
            }
            ExitCode::SUCCESS
        }
        Err(err) => fail(err),
    }
}

fn cmd_describe(name: String, kind: String, configs: PathBuf) -> ExitCode {
    let engine = offline_engine(&configs);
    let catalog = engine.catalog();

    let fields: MimirResult<Vec<(&'static str, String)>> = match kind.as_str() {
        "metric" => catalog.get_metric(&name).map(|metric| {
            vec![
                ("name", metric.name.clone()),
                ("source", metric.source_name().to_string()),
                ("sql", metric.sql.clone()),
                ("description", metric.description.clone().unwrap_or_default()),
                (
                    "required_dimensions",
                    metric.required_dimensions.join(", "),
                ),
            ]
        }),
        "dimension" => catalog.get_dimension(&name).map(|dimension| {
            vec![
                ("name", dimension.name.clone()),
                ("source_name", dimension.source_name.clone()),
                ("sql", dimension.sql.clone().unwrap_or_default()),
                (
                    "description",
                    dimension.description.clone().unwrap_or_default(),
                ),
            ]
        }),
        "source" => catalog.get_source(&name).map(|source| {
            vec![
                ("name", source.name.clone()),
                ("sql", source.sql.clone()),
                ("time_col", source.time_col.clone()),
                ("time_col_alias", source.time_col_alias.clone()),
                ("connection_name", source.connection_name.clone()),
                ("local_dimensions", source.local_dimensions.join(", ")),
                ("source_dimensions", source.source_dimensions.join(", ")),
            ]
        }),
        other => return fail(format!("invalid definition type: {other}")),
    };

    match fields {
        Ok(fields) => {
            println!("{}: {name}", capitalize(&kind));
            for (field, value) in fields {
                if !value.is_empty() {
                    println!("  {field}: {value}");
                }
            }
            ExitCode::SUCCESS
        }
        Err(err) => fail(err),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn cmd_init(project: PathBuf) -> ExitCode {
    if project.is_file() {
        return fail(format!(
            "project path '{}' exists and is a file",
            project.display()
        ));
    }

    println!("Initializing mimir project in '{}'...", project.display());
    let dirs = [
        project.join("configs").join("metrics"),
        project.join("configs").join("dimensions"),
        project.join("configs").join("sources"),
        project.join("secrets"),
    ];
    for dir in dirs {
        if let Err(err) = std::fs::create_dir_all(&dir) {
            return fail(err);
        }
        println!("  Created {}/", dir.display());
    }
    println!("Project initialized successfully.");
    ExitCode::SUCCESS
}

fn cmd_list(command: ListCommands) -> ExitCode {
    match command {
        ListCommands::Sources { configs } => {
            let engine = offline_engine(&configs);
            match engine.catalog().get_sources() {
                Ok(sources) => {
                    println!("{:<24} {:<16} DESCRIPTION", "NAME", "TIME COLUMN");
                    for source in sources {
                        println!(
                            "{:<24} {:<16} {}",
                            source.name,
                            source.time_col,
                            source.description.clone().unwrap_or_default()
                        );
                    }
                    ExitCode::SUCCESS
                }
                Err(err) => fail(err),
            }
        }
        ListCommands::Metrics { configs } => {
            let engine = offline_engine(&configs);
            match engine.catalog().get_metrics() {
                Ok(metrics) => {
                    println!("{:<24} {:<16} DESCRIPTION", "NAME", "SOURCE");
                    for metric in metrics {
                        println!(
                            "{:<24} {:<16} {}",
                            metric.name,
                            metric.source_name(),
                            metric.description.clone().unwrap_or_default()
                        );
                    }
                    ExitCode::SUCCESS
                }
                Err(err) => fail(err),
            }
        }
        ListCommands::Dimensions { configs } => {
            let engine = offline_engine(&configs);
            match engine.catalog().get_dimensions() {
                Ok(dimensions) => {
                    println!("{:<24} {:<16} DESCRIPTION", "NAME", "SOURCE");
                    for dimension in dimensions {
                        println!(
                            "{:<24} {:<16} {}",
                            dimension.name,
                            dimension.source_name,
                            dimension.description.clone().unwrap_or_default()
                        );
                    }
                    ExitCode::SUCCESS
                }
                Err(err) => fail(err),
            }
        }
    }
}

fn prompt(label: &str) -> std::io::Result<String> {
    print!("{label}: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn cmd_create(command: CreateCommands) -> ExitCode {
    let (kind_folder, configs) = match &command {
        CreateCommands::Metric { configs } => ("metrics", configs.clone()),
        CreateCommands::Dimension { configs } => ("dimensions", configs.clone()),
    };
    let kind = kind_folder.trim_end_matches('s');
    println!("Creating a new {kind}...");

    let gather = || -> std::io::Result<serde_json::Value> {
        let name = prompt(&format!("{} name", capitalize(kind)))?;
        let source_name = prompt("Source name")?;
        let sql = prompt("SQL expression (e.g. SUM(amount))")?;
        let description = prompt("Description")?;
        Ok(serde_json::json!({
            "name": name,
            "source_name": source_name,
            "sql": format!("SELECT {sql} AS {name}"),
            "description": description,
        }))
    };

    let definition = match gather() {
        Ok(definition) => definition,
        Err(err) => return fail(err),
    };
    let name = definition["name"].as_str().unwrap_or_default().to_string();
    if name.is_empty() {
        return fail("a name is required");
    }

    let path = configs.join(kind_folder).join(format!("{name}.yaml"));
    let write = || -> MimirResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let yaml = serde_yaml::to_string(&definition)
            .map_err(|e| mimir::MimirError::config(e.to_string()))?;
        std::fs::write(&path, yaml)?;
        Ok(())
    };
    match write() {
        Ok(()) => {
            println!("{} '{name}' created at {}", capitalize(kind), path.display());
            ExitCode::SUCCESS
        }
        Err(err) => fail(err),
    }
}

async fn cmd_serve(port: u16, configs: Option<PathBuf>, secrets: Option<PathBuf>) -> ExitCode {
    let engine = match (configs, secrets) {
        (Some(configs), Some(secrets)) => connected_engine(&configs, &secrets),
        (configs, secrets) => {
            // Fall back to the environment for whichever side is missing.
            let configs = configs
                .map(|p| Ok(p.display().to_string()))
                .unwrap_or_else(|| std::env::var(CONFIGS_PATH_VAR));
            let secrets = secrets
                .map(|p| Ok(p.display().to_string()))
                .unwrap_or_else(|| std::env::var(SECRETS_PATH_VAR));
            match (configs, secrets) {
                (Ok(configs), Ok(secrets)) => {
                    connected_engine(&PathBuf::from(configs), &PathBuf::from(secrets))
                }
                _ => {
                    return fail(format!(
                        "set {CONFIGS_PATH_VAR} and {SECRETS_PATH_VAR} or pass --configs/--secrets"
                    ))
                }
            }
        }
    };

    match mimir::server::serve(Arc::new(engine), port).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => fail(err),
    }
}
