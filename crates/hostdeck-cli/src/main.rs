//! hostdeck — deploy static sites into versioned storage.
//!
//! # Usage
//!
//! ```text
//! hostdeck --app-id blog --url https://blog.example.com deploy --bundle site.tar.gz
//! hostdeck --app-id blog --url https://blog.example.com build --tarball src.tar.gz
//! hostdeck --app-id blog versions list
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

use commands::AppArgs;

#[derive(Parser)]
#[command(
    name = "hostdeck",
    about = "hostdeck — multi-tenant static hosting deployer",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to hostdeck.toml. Defaults apply when the file does not exist.
    #[arg(short, long, global = true, default_value = "hostdeck.toml")]
    config: PathBuf,

    #[command(flatten)]
    app: AppArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy a prebuilt bundle (a gzipped tar with one top-level directory).
    Deploy(commands::deploy::DeployArgs),
    /// Build a source tarball with its manifest's engine and deploy the output.
    Build(commands::build::BuildArgs),
    /// Inspect and clean up versions.
    Versions {
        #[command(subcommand)]
        action: commands::versions::VersionsAction,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,hostdeck=debug")),
        )
        .init();

    let cli = Cli::parse();
    let env = commands::Env::open(&cli.config)?;
    let ctx = cli.app.context();

    match cli.command {
        Commands::Deploy(args) => commands::deploy::run(&env, &ctx, args).await,
        Commands::Build(args) => commands::build::run(&env, &ctx, args).await,
        Commands::Versions { action } => commands::versions::run(&env, &ctx, action).await,
    }
}
