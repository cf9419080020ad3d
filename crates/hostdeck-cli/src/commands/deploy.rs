use std::path::PathBuf;

use clap::Args;
use hostdeck_bundle::{BundleDeployer, FileBundle, SourceBundle};
use hostdeck_core::{DeployContext, VersionStatus};
use tracing::info;

use super::{Env, TrafficArgs, report};

#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Path to the bundle archive.
    #[arg(short, long)]
    pub bundle: PathBuf,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(short, long)]
    pub message: Option<String>,
    /// Source commit; a commit can only be deployed once.
    #[arg(long)]
    pub commit: Option<String>,
    #[command(flatten)]
    pub traffic: TrafficArgs,
}

pub async fn run(env: &Env, ctx: &DeployContext, args: DeployArgs) -> anyhow::Result<()> {
    info!(app_id = %ctx.app_id(), bundle = %args.bundle.display(), "deploying bundle");

    let mut bundle = SourceBundle::new(FileBundle::new(&args.bundle));
    bundle.name = args.name;
    bundle.message = args.message;
    bundle.commit = args.commit;
    bundle.traffic = args.traffic.options();

    let deployer = BundleDeployer::new(env.versions.clone(), env.config.deploy.clone());
    let version = deployer.deploy(&bundle, ctx).await?;
    if version.status == VersionStatus::TimedOut {
        println!("Deployment stopped early");
    }
    report(&version)
}
