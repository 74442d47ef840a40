//! busprobe - message bus application discovery and introspection
//!
//! The main entry point for busprobe, handling:
//! - Connection search by pid, connection name, or application name
//! - Proxy tree construction and printing
//! - Listing introspectable connections
//! - Configuration inspection

use bp_common::error::{format_error_human, StructuredError};
use bp_common::{Error, OutputFormat, Result, SCHEMA_VERSION};
use bp_core::bus::{self, Bus, BusSelector};
use bp_core::config::{load_config, ConfigOptions, ResolvedConfig};
use bp_core::exit_codes::ExitCode;
use bp_core::log_event;
use bp_core::logging::{event_names, init_logging, LogConfig, LogFormat, LogLevel, Stage};
use bp_core::{BusAddress, ProbeContext, SearchCriteria};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// busprobe - find applications on a message bus and inspect their object trees
#[derive(Parser)]
#[command(name = "busprobe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Override config directory
    #[arg(long, global = true, env = "BUSPROBE_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "json")]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Bus to search: session, system, or a bus address
    #[arg(long, global = true)]
    bus: Option<String>,

    /// Search timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the single connection matching the search criteria
    Find(SearchArgs),

    /// Find an application and print its object tree
    Tree(TreeArgs),

    /// List every connection exposing the introspection interface
    List(ListArgs),

    /// Configuration management
    Config(ConfigArgs),

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },

    /// Print version information
    Version,
}

#[derive(Args, Debug)]
struct SearchArgs {
    /// Pid of the application (or of its launcher)
    #[arg(long)]
    pid: Option<u32>,

    /// Exact connection name
    #[arg(long)]
    connection_name: Option<String>,

    /// Type name of the application's root object
    #[arg(long)]
    app_name: Option<String>,

    /// Object path exposing the introspection interface
    #[arg(long)]
    object_path: Option<String>,

    /// Process name; resolved to a single pid before searching
    #[arg(long, conflicts_with = "pid")]
    process_name: Option<String>,

    /// Additional criteria as key=value
    #[arg(long = "criteria", value_name = "KEY=VALUE")]
    criteria: Vec<String>,
}

#[derive(Args, Debug)]
struct TreeArgs {
    #[command(flatten)]
    search: SearchArgs,

    /// Stop descending after this many levels
    #[arg(long)]
    max_depth: Option<usize>,
}

#[derive(Args, Debug)]
struct ListArgs {
    /// Object path to search for
    #[arg(long)]
    object_path: Option<String>,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.global.quiet {
        LogLevel::Error
    } else {
        match cli.global.verbose {
            0 => LogLevel::Warn,
            1 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    };
    let log_format = match cli.global.format {
        OutputFormat::Json => LogFormat::Jsonl,
        _ => LogFormat::Human,
    };
    init_logging(&LogConfig::from_env(Some(log_level), Some(log_format)));
    tracing::debug!(
        target: event_names::RUN_STARTED,
        stage = %Stage::Init,
        version = env!("CARGO_PKG_VERSION"),
        "busprobe starting"
    );

    let result = match &cli.command {
        Commands::Find(args) => run_find(&cli.global, args),
        Commands::Tree(args) => run_tree(&cli.global, args),
        Commands::List(args) => run_list(&cli.global, args),
        Commands::Config(args) => match args.command {
            ConfigCommands::Show => run_config_show(&cli.global),
        },
        Commands::Completions { shell } => {
            clap_complete::generate(
                *shell,
                &mut Cli::command(),
                "busprobe",
                &mut std::io::stdout(),
            );
            Ok(())
        }
        Commands::Version => {
            print_version(&cli.global);
            Ok(())
        }
    };

    let exit_code = match result {
        Ok(()) => ExitCode::Found,
        Err(e) => report_error(&cli.global, &e),
    };
    std::process::exit(exit_code.as_i32());
}

// ============================================================================
// Command implementations
// ============================================================================

fn run_find(global: &GlobalOpts, args: &SearchArgs) -> Result<()> {
    let criteria = criteria_from_args(args)?;
    let resolved = resolve_config(global)?;
    let ctx = ProbeContext::new(resolved.config.clone());
    let bus = connect(global, &ctx)?;
    let search = ctx.search(Arc::clone(&bus)).with_timeout(search_timeout(global, &ctx));

    let criteria = with_process_name(&search, args, criteria)?
        .or_object_path(ctx.config().search.object_path.as_str());
    let connection = search.find(&criteria, None)?;
    let address = BusAddress::new(
        Arc::clone(&bus),
        connection.clone(),
        criteria.object_path(),
        Arc::clone(ctx.versions()),
    );
    let pid = address.owner_pid().ok();

    match global.format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "schema_version": SCHEMA_VERSION,
                "run_id": ctx.log().run_id,
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "bus": bus.selector().to_string(),
                "criteria": &criteria,
                "connection": connection,
                "object_path": criteria.object_path(),
                "pid": pid,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Md => {
            println!("# busprobe find");
            println!();
            println!("- criteria: {}", criteria);
            println!("- address: {}", address);
            if let Some(pid) = pid {
                println!("- pid: {}", pid);
            }
        }
        OutputFormat::Exitcode => {}
    }
    Ok(())
}

fn run_tree(global: &GlobalOpts, args: &TreeArgs) -> Result<()> {
    let criteria = criteria_from_args(&args.search)?;
    let resolved = resolve_config(global)?;
    let ctx = ProbeContext::new(resolved.config.clone());
    let bus = connect(global, &ctx)?;
    let search = ctx.search(bus).with_timeout(search_timeout(global, &ctx));

    let criteria = with_process_name(&search, &args.search, criteria)?
        .or_object_path(ctx.config().search.object_path.as_str());
    let app = search.get_proxy_object_for_existing_process(criteria, None, &ctx.proxy_builder())?;
    log_event!(
        ctx.log(),
        INFO,
        event_names::RUN_FINISHED,
        Stage::Render,
        "proxy tree built",
        address = %app.address(),
        type_name = %app.type_name()
    );

    match global.format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "schema_version": SCHEMA_VERSION,
                "run_id": ctx.log().run_id,
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "connection": app.address().connection(),
                "pid": app.process_pid().ok(),
                "tree": app.snapshot(args.max_depth)?,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Md => {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            app.print_tree(&mut out, args.max_depth)?;
        }
        OutputFormat::Exitcode => {}
    }
    Ok(())
}

fn run_list(global: &GlobalOpts, args: &ListArgs) -> Result<()> {
    let resolved = resolve_config(global)?;
    let ctx = ProbeContext::new(resolved.config.clone());
    let bus = connect(global, &ctx)?;
    let object_path = args
        .object_path
        .clone()
        .unwrap_or_else(|| ctx.config().search.object_path.clone());
    let connections = ctx.search(Arc::clone(&bus)).find_all(&object_path)?;

    match global.format {
        OutputFormat::Json => {
            let entries: Vec<_> = connections
                .iter()
                .map(|(connection, pid)| serde_json::json!({ "connection": connection, "pid": pid }))
                .collect();
            let output = serde_json::json!({
                "schema_version": SCHEMA_VERSION,
                "run_id": ctx.log().run_id,
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "bus": bus.selector().to_string(),
                "object_path": object_path,
                "connections": entries,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Md => {
            println!("# busprobe list");
            println!();
            if connections.is_empty() {
                println!("No introspectable connections on the {} bus.", bus.selector());
            }
            for (connection, pid) in &connections {
                println!("- {} (pid {})", connection, pid);
            }
        }
        OutputFormat::Exitcode => {}
    }
    Ok(())
}

/// Display the current configuration (including defaults if no file present).
fn run_config_show(global: &GlobalOpts) -> Result<()> {
    let resolved = resolve_config(global)?;
    let snapshot = resolved.snapshot();

    match global.format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "schema_version": SCHEMA_VERSION,
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "source": {
                    "path": snapshot.config_path.as_ref().map(|p| p.display().to_string()),
                    "hash": &snapshot.config_hash,
                    "using_defaults": snapshot.config_path.is_none(),
                    "config_dir": snapshot.config_dir.display().to_string(),
                },
                "config": &snapshot.config,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Md => {
            println!("# busprobe configuration");
            println!();
            match &snapshot.config_path {
                Some(path) => println!("Source: {}", path.display()),
                None => println!("Source: built-in defaults"),
            }
            println!();
            let rendered = toml::to_string_pretty(&snapshot.config)
                .map_err(|e| Error::Config(e.to_string()))?;
            println!("```toml\n{}```", rendered);
        }
        OutputFormat::Exitcode => {}
    }
    Ok(())
}

fn print_version(global: &GlobalOpts) {
    let version_info = serde_json::json!({
        "schema_version": SCHEMA_VERSION,
        "busprobe_version": env!("CARGO_PKG_VERSION"),
        "rust_version": env!("CARGO_PKG_RUST_VERSION"),
    });

    match global.format {
        OutputFormat::Json => println!("{}", version_info),
        OutputFormat::Exitcode => {}
        OutputFormat::Md => {
            println!("busprobe {}", env!("CARGO_PKG_VERSION"));
            println!("schema version: {}", SCHEMA_VERSION);
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn criteria_from_args(args: &SearchArgs) -> Result<SearchCriteria> {
    let pairs = args
        .criteria
        .iter()
        .map(|pair| {
            pair.split_once('=').ok_or_else(|| {
                Error::Config(format!("criteria must look like key=value, got '{}'", pair))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let mut criteria = SearchCriteria::from_pairs(pairs)?;

    if let Some(pid) = args.pid {
        criteria = criteria.with_pid(pid);
    }
    if let Some(name) = &args.connection_name {
        criteria = criteria.with_connection_name(name.as_str());
    }
    if let Some(name) = &args.app_name {
        criteria = criteria.with_application_name(name.as_str());
    }
    if let Some(path) = &args.object_path {
        criteria = criteria.with_object_path(path.as_str());
    }
    Ok(criteria)
}

fn with_process_name(
    search: &bp_core::ConnectionSearch,
    args: &SearchArgs,
    criteria: SearchCriteria,
) -> Result<SearchCriteria> {
    match &args.process_name {
        Some(name) => Ok(criteria.with_pid(search.pid_for_process_name(name)?)),
        None => Ok(criteria),
    }
}

fn resolve_config(global: &GlobalOpts) -> Result<ResolvedConfig> {
    let options = ConfigOptions {
        config_dir: global.config_dir.clone(),
        config_path: None,
    };
    let resolved = load_config(&options).map_err(|e| {
        tracing::warn!(
            target: event_names::CONFIG_ERROR,
            stage = %Stage::Init,
            error = %e,
            "configuration rejected"
        );
        Error::from(e)
    })?;
    match &resolved.config_path {
        Some(path) => tracing::debug!(
            target: event_names::CONFIG_LOADED,
            stage = %Stage::Init,
            path = %path.display(),
            hash = ?resolved.config_hash,
            "configuration loaded"
        ),
        None => tracing::debug!(
            target: event_names::CONFIG_DEFAULT_USED,
            stage = %Stage::Init,
            config_dir = %resolved.config_dir.display(),
            "no configuration file, using defaults"
        ),
    }
    Ok(resolved)
}

fn connect(global: &GlobalOpts, ctx: &ProbeContext) -> Result<Arc<dyn Bus>> {
    let selector = match &global.bus {
        Some(bus) => bus.parse::<BusSelector>().unwrap_or_default(),
        None => ctx.config().bus_selector(),
    };
    Ok(bus::connect(&selector)?)
}

fn search_timeout(global: &GlobalOpts, ctx: &ProbeContext) -> Duration {
    global
        .timeout
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or_else(|| ctx.config().search_timeout())
}

fn report_error(global: &GlobalOpts, err: &Error) -> ExitCode {
    let code = ExitCode::for_error(err);
    match global.format {
        OutputFormat::Json => {
            let structured =
                StructuredError::from(err).with_context("exit_code", code.code_name());
            eprintln!("{}", structured.to_json_pretty());
        }
        OutputFormat::Md => {
            eprintln!("{}", format_error_human(err, std::io::stderr().is_terminal()));
        }
        OutputFormat::Exitcode => {}
    }
    code
}
