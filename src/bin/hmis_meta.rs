use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use hmis_metadata::app::{self, App};
use hmis_metadata::cache::MetadataCache;
use hmis_metadata::client::Dhis2HttpClient;
use hmis_metadata::config::{ConfigLoader, ResolvedConfig};
use hmis_metadata::error::HmisError;
use hmis_metadata::instance::Dhis2;
use hmis_metadata::output::{JsonOutput, OutputMode};

#[derive(Parser)]
#[command(name = "hmis-meta")]
#[command(about = "Inspect DHIS2 metadata: org-unit trees, data sets and data elements")]
#[command(version, author)]
struct Cli {
    /// Path to the JSON config file (defaults to ./hmis.json)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Load org units from the on-disk cache when present
    #[arg(long, global = true)]
    cached: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Load all metadata catalogs and report their sizes")]
    Metadata,
    #[command(about = "Show the ancestor path of an organisation unit")]
    Ancestors(NameArgs),
    #[command(about = "Show an organisation unit with its group-set attributes")]
    Orgunit(NameArgs),
    #[command(about = "Resolve a category option combo of a data element")]
    Combo(ComboArgs),
    #[command(about = "Show a data set and its data elements")]
    Dataset(NameArgs),
    #[command(about = "Manage the metadata cache")]
    Cache(CacheArgs),
}

#[derive(Args)]
struct NameArgs {
    name: String,
}

#[derive(Args)]
struct ComboArgs {
    element: String,

    #[arg(required = true)]
    options: Vec<String>,
}

#[derive(Args)]
struct CacheArgs {
    #[command(subcommand)]
    command: CacheCommand,
}

#[derive(Subcommand)]
enum CacheCommand {
    #[command(about = "Delete the cached org-unit snapshot")]
    Clear,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<HmisError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HmisError) -> u8 {
    match error {
        HmisError::NotFound { .. } | HmisError::MissingConfig => 2,
        HmisError::Transport { .. }
        | HmisError::Connection { .. }
        | HmisError::Payload { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };
    match cli.command {
        Commands::Cache(args) => {
            let cache_dir = ConfigLoader::resolve_cache_dir(cli.config.as_deref())?;
            run_cache(args, cache_dir, output_mode)
        }
        command => {
            let config = ConfigLoader::resolve(cli.config.as_deref())?;
            let app = build_app(&config, cli.cached)?;
            run_command(command, &app, &config, output_mode)
        }
    }
}

fn run_cache(
    args: CacheArgs,
    cache_dir: Utf8PathBuf,
    output_mode: OutputMode,
) -> miette::Result<()> {
    match args.command {
        CacheCommand::Clear => {
            let cache = MetadataCache::new(cache_dir);
            let result = app::clear_cache(&cache)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_cache_clear(&result).into_diagnostic()?,
                OutputMode::Text => {
                    if result.cleared {
                        println!("removed {}", result.path);
                    } else {
                        println!("no cache at {}", result.path);
                    }
                }
            }
        }
    }
    Ok(())
}

fn run_command(
    command: Commands,
    app: &App<Dhis2HttpClient>,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    match command {
        Commands::Metadata => {
            let result = app.metadata()?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_metadata(&result).into_diagnostic()?,
                OutputMode::Text => {
                    println!("server: {}", result.server_url);
                    println!("org units: {}", result.org_units);
                    println!("data sets: {}", result.data_sets);
                    println!("data elements: {}", result.data_elements);
                }
            }
        }
        Commands::Ancestors(args) => {
            let result = app.ancestors(&args.name)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_ancestors(&result).into_diagnostic()?,
                OutputMode::Text => {
                    let mut path = result.ancestors.clone();
                    path.push(result.name.clone());
                    println!("{}", path.join(" / "));
                }
            }
        }
        Commands::Orgunit(args) => {
            let result = app.org_unit(&args.name)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_org_unit(&result).into_diagnostic()?,
                OutputMode::Text => {
                    println!("{} ({})", result.name, result.id);
                    println!("  path: {}", result.ancestors.join(" / "));
                    for (group_set, group) in &result.attributes {
                        println!("  {group_set}: {group}");
                    }
                    if !result.free_groups.is_empty() {
                        println!("  groups: {}", result.free_groups.join(", "));
                    }
                }
            }
        }
        Commands::Combo(args) => {
            let result = app.combo(&args.element, &args.options)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_combo(&result).into_diagnostic()?,
                OutputMode::Text => {
                    println!(
                        "{}: {} ({})",
                        result.data_element_name, result.combo.name, result.combo.id
                    );
                }
            }
        }
        Commands::Dataset(args) => {
            let result = app.data_set(&args.name)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_data_set(&result).into_diagnostic()?,
                OutputMode::Text => {
                    println!("{} ({})", result.name, result.id);
                    for element in &result.data_elements {
                        println!("  {} ({})", element.name, element.id);
                    }
                }
            }
        }
        Commands::Cache(args) => run_cache(args, config.cache_dir.clone(), output_mode)?,
    }
    Ok(())
}

fn build_app(config: &ResolvedConfig, cached: bool) -> Result<App<Dhis2HttpClient>, HmisError> {
    let instance = Dhis2::from_config(config, cached)?;
    Ok(App::new(instance))
}
