//! awesh response engine.
//!
//! Listens on a Unix socket for requests from the terminal frontend, asks the
//! configured model for a completion and acts on it: runs commands, applies
//! file edits or passes text through.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use awesh_backend::exit_codes;
use awesh_backend::io::boundary::ShellBoundary;
use awesh_backend::io::config::{
    BackendConfig, default_config_path, expand_home, load_config, write_config,
};
use awesh_backend::io::prompt::{PromptEngine, load_system_prompt};
use awesh_backend::io::providers::HttpProviders;
use awesh_backend::logging;
use awesh_backend::server;
use awesh_backend::session::SessionDeps;
use awesh_backend::settings::Settings;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "awesh-backend",
    version,
    about = "AI response engine for the awesh shell"
)]
struct Cli {
    /// Config file (default: ~/.config/awesh/backend.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Socket path, overriding the config file.
    #[arg(long, global = true)]
    socket: Option<PathBuf>,
    /// Start with debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve frontend requests on the Unix socket (default).
    Serve,
    /// Load and validate the config, then print a summary.
    CheckConfig,
    /// Write a default config file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    let code = match run(Cli::parse()) {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<()> {
    let config_path = match cli.config.clone() {
        Some(path) => path,
        None => default_config_path().context("cannot resolve home directory for config")?,
    };
    match cli.command {
        Some(Command::InitConfig { force }) => cmd_init_config(&config_path, force),
        Some(Command::CheckConfig) => {
            let config = resolve_config(&cli, &config_path)?;
            cmd_check_config(&config_path, &config);
            Ok(())
        }
        Some(Command::Serve) | None => {
            let config = resolve_config(&cli, &config_path)?;
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("build runtime")?
                .block_on(cmd_serve(config))
        }
    }
}

/// File, then environment, then command-line flags.
fn resolve_config(cli: &Cli, path: &Path) -> Result<BackendConfig> {
    let mut config = load_config(path)?;
    config.apply_env_overrides(|key| std::env::var(key).ok());
    if let Some(socket) = &cli.socket {
        config.paths.socket = socket.clone();
    }
    if cli.verbose {
        config.verbose = true;
    }
    config
        .validate()
        .with_context(|| format!("invalid settings after overrides ({})", path.display()))?;
    Ok(config)
}

fn cmd_init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &BackendConfig::default())?;
    println!("wrote {}", path.display());
    Ok(())
}

fn cmd_check_config(path: &Path, config: &BackendConfig) {
    println!("config: {}", path.display());
    println!("provider: {} ({})", config.model.provider, config.model.model);
    println!("socket: {}", expand_home(&config.paths.socket).display());
    println!("backups: {}", expand_home(&config.paths.backup_dir).display());
}

async fn cmd_serve(config: BackendConfig) -> Result<()> {
    let log = logging::init(config.verbose);
    let prompts = PromptEngine::new();
    let system_prompt = load_system_prompt(
        &prompts,
        &expand_home(&config.paths.system_prompt),
        config.limits.max_goal_iterations,
    )?;
    let socket = expand_home(&config.paths.socket);
    let listener = server::bind(&socket)?;

    let deps = SessionDeps {
        settings: Arc::new(Settings::new(
            config.model.provider.clone(),
            config.verbose,
            Some(log),
        )),
        prompts: Arc::new(prompts),
        providers: Arc::new(HttpProviders::new(config.model.clone(), system_prompt)),
        boundary: Arc::new(ShellBoundary::new(config.limits.output_limit_bytes)),
        config: Arc::new(config),
    };

    server::serve(listener, &socket, deps, async {
        if tokio::signal::ctrl_c().await.is_err() {
            futures::future::pending::<()>().await;
        }
    })
    .await
}
