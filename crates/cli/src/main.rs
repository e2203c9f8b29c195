use std::{fs::OpenOptions, path::PathBuf, sync::Mutex};

use {
    anyhow::Context,
    clap::{Args, Parser, Subcommand},
    scriptgate_config::GatewayConfig,
    scriptgate_gateway::manifest::ManifestStore,
    tracing::info,
    tracing_subscriber::{
        EnvFilter, fmt, fmt::writer::BoxMakeWriter, layer::SubscriberExt, util::SubscriberInitExt,
    },
};

#[derive(Parser)]
#[command(name = "scriptgate", version, about = "scriptgate: script-backed API gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (TOML, YAML or JSON). Discovered when omitted.
    #[arg(long, global = true, env = "SCRIPTGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides `log.level`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    #[command(flatten)]
    overrides: Overrides,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (default).
    Serve,
    /// Load config and manifest and report the operations found.
    Check,
}

/// Command-line values that win over the config file.
#[derive(Args)]
struct Overrides {
    /// Listen address. Overrides `server.bind`.
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Listen port. Overrides `server.port`.
    #[arg(long, global = true)]
    port: Option<u16>,
    /// Deployment root. Overrides `scripts.root`.
    #[arg(long, global = true)]
    root: Option<PathBuf>,
}

impl Overrides {
    fn apply(&self, config: &mut GatewayConfig) {
        if let Some(bind) = &self.bind {
            config.server.bind.clone_from(bind);
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(root) = &self.root {
            config.scripts.root.clone_from(root);
        }
    }
}

fn init_telemetry(cli: &Cli, config: &GatewayConfig) -> anyhow::Result<()> {
    let level = cli.log_level.as_deref().unwrap_or(&config.log.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (writer, ansi) = match &config.log.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        },
        None => (BoxMakeWriter::new(std::io::stdout), true),
    };

    if cli.json_logs || config.log.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(writer),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_ansi(ansi)
                    .with_writer(writer),
            )
            .init();
    }
    Ok(())
}

/// One line of `check` output per manifest entry.
#[derive(Debug, PartialEq)]
struct EntryReport {
    name: String,
    problem: Option<String>,
}

async fn check_deployment(config: &GatewayConfig) -> anyhow::Result<Vec<EntryReport>> {
    let store = ManifestStore::new(config.scripts.manifest_path());
    let manifest = store
        .load()
        .await
        .with_context(|| format!("failed to load manifest {}", store.path().display()))?;

    let root = &config.scripts.root;
    let missing_include = config
        .scripts
        .includes
        .iter()
        .find(|p| !root.join(p).is_file());
    if let Some(include) = missing_include {
        anyhow::bail!("shared include not found: {}", root.join(include).display());
    }

    let reports = manifest
        .names()
        .map(|name| {
            let problem = match manifest.resolve(name) {
                Ok(entry) => entry
                    .includes
                    .iter()
                    .chain(std::iter::once(&entry.script))
                    .find(|p| !root.join(p).is_file())
                    .map(|p| format!("file not found: {}", p.display())),
                Err(e) => Some(e.to_string()),
            };
            EntryReport {
                name: name.to_string(),
                problem,
            }
        })
        .collect();
    Ok(reports)
}

async fn run_check(config: &GatewayConfig) -> anyhow::Result<()> {
    let reports = check_deployment(config).await?;
    let mut failures = 0;
    for report in &reports {
        match &report.problem {
            None => println!("ok     {}", report.name),
            Some(problem) => {
                failures += 1;
                println!("error  {}: {problem}", report.name);
            },
        }
    }
    println!("{} operations, {failures} with errors", reports.len());
    if failures > 0 {
        anyhow::bail!("{failures} misconfigured operations");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = scriptgate_config::load_from(cli.config.as_deref())?;
    cli.overrides.apply(&mut config);
    init_telemetry(&cli, &config)?;

    info!(version = env!("CARGO_PKG_VERSION"), "scriptgate starting");

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => scriptgate_gateway::start_gateway(config).await,
        Commands::Check => run_check(&config).await,
    }
}
