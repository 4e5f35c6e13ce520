//! codelex command line
//!
//! Verb-noun surface over the library: repository and graph lifecycle,
//! exports, SPARQL queries and system inspection. Exit code 0 on success;
//! non-zero codes follow the error taxonomy.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use codelex::progress::{CancellationToken, ProgressUpdate};
use codelex::schema::RepoId;
use codelex::{Config, ErrorKind, QueryOutcome, ResultFormat, System};
use comfy_table::Table;
use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "codelex", version, about = "Semantic code knowledge base")]
struct Cli {
    /// Base directory for all state
    #[arg(long, global = true, default_value = ".codelex")]
    root: PathBuf,

    /// Print progress updates
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Track, update and inspect repositories
    Repo {
        #[command(subcommand)]
        command: RepoCommand,
    },
    /// Build, rebuild and remove graphs
    Graph {
        #[command(subcommand)]
        command: GraphCommand,
    },
    /// Emit artifacts from ingested graphs
    Export {
        #[command(subcommand)]
        command: ExportCommand,
    },
    /// Run a SPARQL query
    Query {
        /// SPARQL 1.1 SELECT, ASK or CONSTRUCT text
        sparql: String,
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
        /// Per-call timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// System inspection
    System {
        #[command(subcommand)]
        command: SystemCommand,
    },
}

#[derive(Subcommand)]
enum RepoCommand {
    /// Clone a repository and discover its versions
    Add {
        /// Repository identifier, org/name
        repo: String,
        /// Clone URL override (defaults to GitHub)
        #[arg(long)]
        url: Option<String>,
    },
    /// Fetch the remote and report new versions
    Update { repo: String },
    /// Delete checkouts and all graphs of a repository
    Remove {
        repo: String,
        #[arg(long)]
        force: bool,
    },
    List,
    Show { repo: String },
}

#[derive(Subcommand)]
enum GraphCommand {
    /// Ingest one version (latest when omitted)
    Add {
        repo: String,
        version: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Nuclear rebuild of one version's graphs
    Update { repo: String, version: String },
    /// Remove one version's graphs, or all graphs when version is omitted
    Remove {
        repo: String,
        version: Option<String>,
        #[arg(long)]
        force: bool,
    },
    List { repo: Option<String> },
    Show {
        repo: String,
        version: Option<String>,
    },
}

#[derive(Subcommand)]
enum ExportCommand {
    /// Line-delimited JSON records with a string table
    Compact {
        repo: String,
        version: String,
        /// Output path (defaults under {root}/exports/)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Hierarchical text tree: module, class, function
    Outline {
        repo: String,
        version: String,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum SystemCommand {
    /// Store and repository overview
    Status,
    /// Effective configuration
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

fn main() {
    match run() {
        Ok(()) => {}
        Err(e) => {
            eprintln!("error: {}", e);
            let code = match e.downcast_ref::<codelex::CodelexError>() {
                Some(err) => {
                    for suggestion in err.suggestions() {
                        eprintln!("  hint: {}", suggestion);
                    }
                    err.kind().exit_code()
                }
                None => 1,
            };
            std::process::exit(code);
        }
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load_or_default(&cli.root)?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(config.log_level.as_filter())
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let verbose = cli.verbose;
    let observer = move |update: &ProgressUpdate| {
        if verbose {
            match update.percent {
                Some(pct) => eprintln!(
                    "[{}] {:>5.1}% {}",
                    update.stage.as_str(),
                    pct,
                    update.message
                ),
                None => eprintln!("[{}] {}", update.stage.as_str(), update.message),
            }
        }
    };

    let system = System::open(config)?;
    let cancel = CancellationToken::new();

    match cli.command {
        Command::Repo { command } => run_repo(&system, command, &observer)?,
        Command::Graph { command } => run_graph(&system, command, &cancel, &observer)?,
        Command::Export { command } => run_export(&system, command)?,
        Command::Query {
            sparql,
            format,
            timeout,
        } => {
            let timeout =
                Duration::from_secs(timeout.unwrap_or(system.config.query_timeout_seconds));
            let outcome = system.engine().query(&sparql, timeout).map_err(|e| {
                let kind = match &e {
                    codelex::SparqlError::UpdateForm => ErrorKind::Security,
                    codelex::SparqlError::Syntax(_) => ErrorKind::Validation,
                    _ => ErrorKind::Store,
                };
                codelex::CodelexError::new(kind, e.to_string())
            })?;
            print_query_outcome(&outcome, format);
        }
        Command::System { command } => run_system(&system, command)?,
    }
    Ok(())
}

fn run_repo(
    system: &System,
    command: RepoCommand,
    observer: &dyn codelex::ProgressObserver,
) -> anyhow::Result<()> {
    match command {
        RepoCommand::Add { repo, url } => {
            let repo = RepoId::parse(&repo)?;
            let record = system.repos.add(&repo, url.as_deref(), observer)?;
            println!(
                "added {} ({} releases: {})",
                repo,
                record.releases.len(),
                record.releases.join(", ")
            );
        }
        RepoCommand::Update { repo } => {
            let repo = RepoId::parse(&repo)?;
            let update = system.repos.update(&repo, observer)?;
            if update.new_versions.is_empty() {
                println!("{} is up to date", repo);
            } else {
                println!("new versions: {}", update.new_versions.join(", "));
            }
        }
        RepoCommand::Remove { repo, force } => {
            let repo = RepoId::parse(&repo)?;
            let confirm = confirm_if_needed(system, &repo, force)?;
            system.repos.remove(&repo, force, confirm.as_deref())?;
            println!("removed {}", repo);
        }
        RepoCommand::List => {
            let records = system.repos.list()?;
            let mut table = Table::new();
            table.set_header(["repository", "status", "releases", "updated"]);
            for record in records {
                table.add_row([
                    format!("{}/{}", record.org, record.name),
                    format!("{:?}", record.status).to_lowercase(),
                    record.releases.len().to_string(),
                    record.updated_at.clone(),
                ]);
            }
            println!("{table}");
        }
        RepoCommand::Show { repo } => {
            let repo = RepoId::parse(&repo)?;
            let record = system.repos.show(&repo)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
    }
    Ok(())
}

fn run_graph(
    system: &System,
    command: GraphCommand,
    cancel: &CancellationToken,
    observer: &dyn codelex::ProgressObserver,
) -> anyhow::Result<()> {
    match command {
        GraphCommand::Add {
            repo,
            version,
            force,
        } => {
            let repo = RepoId::parse(&repo)?;
            let report = system
                .graphs
                .add(&repo, version.as_deref(), force, cancel, observer)?;
            print_report(&report);
        }
        GraphCommand::Update { repo, version } => {
            let repo = RepoId::parse(&repo)?;
            let report = system.graphs.update(&repo, &version, cancel, observer)?;
            print_report(&report);
        }
        GraphCommand::Remove {
            repo,
            version,
            force,
        } => {
            let repo = RepoId::parse(&repo)?;
            let confirm = confirm_if_needed(system, &repo, force)?;
            system
                .graphs
                .remove(&repo, version.as_deref(), force, confirm.as_deref())?;
            println!("removed graphs for {}", repo);
        }
        GraphCommand::List { repo } => {
            let repo = repo.map(|r| RepoId::parse(&r)).transpose()?;
            let infos = system.graphs.list(repo.as_ref());
            let mut table = Table::new();
            table.set_header(["graph", "triples"]);
            for info in infos {
                table.add_row([info.uri, info.triples.to_string()]);
            }
            println!("{table}");
        }
        GraphCommand::Show { repo, version } => {
            let repo = RepoId::parse(&repo)?;
            let infos = system.graphs.show(&repo, version.as_deref())?;
            for info in infos {
                println!("{:>8}  {}", info.triples, info.uri);
            }
        }
    }
    Ok(())
}

fn run_export(system: &System, command: ExportCommand) -> anyhow::Result<()> {
    match command {
        ExportCommand::Compact {
            repo,
            version,
            output,
        } => {
            let repo = RepoId::parse(&repo)?;
            let record = system.repos.show(&repo)?;
            let path = output.unwrap_or_else(|| {
                codelex::export::default_destination(
                    &system.config.exports_dir(),
                    &repo,
                    &version,
                    "jsonl",
                )
            });
            let exporter = system.compact_exporter();
            let mut stats = codelex::CompactStats::default();
            codelex::export::export_to_file(&path, |out| {
                stats = exporter.export(&repo, &version, &record.releases, out)?;
                Ok(())
            })?;
            println!(
                "exported {} functions, {} classes, {} modules to {}",
                stats.functions_exported,
                stats.classes_exported,
                stats.modules_exported,
                path.display()
            );
        }
        ExportCommand::Outline {
            repo,
            version,
            output,
        } => {
            let repo = RepoId::parse(&repo)?;
            system.repos.show(&repo)?;
            let path = output.unwrap_or_else(|| {
                codelex::export::default_destination(
                    &system.config.exports_dir(),
                    &repo,
                    &version,
                    "txt",
                )
            });
            let exporter = system.outline_exporter();
            codelex::export::export_to_file(&path, |out| exporter.export(&repo, &version, out))?;
            println!("exported outline to {}", path.display());
        }
    }
    Ok(())
}

fn run_system(system: &System, command: SystemCommand) -> anyhow::Result<()> {
    match command {
        SystemCommand::Status => {
            let repos = system.repos.list()?;
            println!("storage root: {}", system.config.storage_root.display());
            println!("repositories: {}", repos.len());
            println!("graphs: {}", system.store.list_graphs(None).len());
            println!("triples: {}", system.store.total_triples());
        }
        SystemCommand::Config => {
            println!("{}", serde_json::to_string_pretty(&system.config)?);
        }
    }
    Ok(())
}

/// Interactive confirmation for destructive operations: the user types the
/// org/name identifier back.
fn confirm_if_needed(
    system: &System,
    repo: &RepoId,
    force: bool,
) -> anyhow::Result<Option<String>> {
    if force || !system.config.require_confirmation_for_destructive {
        return Ok(None);
    }
    eprint!("this is destructive; type '{}' to confirm: ", repo);
    std::io::stderr().flush().ok();
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("reading confirmation")?;
    Ok(Some(line.trim().to_string()))
}

fn print_report(report: &codelex::BuildReport) {
    println!(
        "built {}: {} functions, {} classes, {} modules, {} files ({} skipped), {} commits, {} change events in {} ms",
        report.version,
        report.functions,
        report.classes,
        report.modules,
        report.files,
        report.skipped_files,
        report.commits,
        report.events,
        report.duration_ms
    );
    for warning in &report.warnings {
        eprintln!("warning: {}", warning);
    }
}

fn print_query_outcome(outcome: &QueryOutcome, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", outcome.serialize(ResultFormat::Json)),
        OutputFormat::Csv => print!("{}", outcome.serialize(ResultFormat::Csv)),
        OutputFormat::Table => match outcome {
            QueryOutcome::Boolean(value) => println!("{}", value),
            QueryOutcome::Solutions { variables, rows } => {
                let mut table = Table::new();
                table.set_header(variables.clone());
                for row in rows {
                    let cells: Vec<String> = variables
                        .iter()
                        .map(|v| row.get(v).map(|t| t.to_string()).unwrap_or_default())
                        .collect();
                    table.add_row(cells);
                }
                println!("{table}");
            }
            QueryOutcome::Graph(triples) => {
                for triple in triples {
                    println!("{}", triple);
                }
            }
        },
    }
}
