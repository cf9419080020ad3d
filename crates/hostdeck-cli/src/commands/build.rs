use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use hostdeck_build::{BuildRequest, BuildSource, Builder, SystemRunner};
use hostdeck_core::DeployContext;
use tracing::info;

use super::{Env, TrafficArgs, report};

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Source tarball on local disk.
    #[arg(short, long, required_unless_present = "staged", conflicts_with = "staged")]
    pub tarball: Option<PathBuf>,
    /// Key of an uploaded tarball in the staging bucket, relative to the app.
    #[arg(long)]
    pub staged: Option<String>,
    /// Build into an existing (or pre-assigned) version id.
    #[arg(long)]
    pub version_id: Option<String>,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(short, long)]
    pub message: Option<String>,
    #[arg(long)]
    pub commit: Option<String>,
    /// Extra environment for build tools, as KEY=VALUE.
    #[arg(short = 'e', long = "build-env", value_parser = parse_env_pair)]
    pub build_env: Vec<(String, String)>,
    /// Keep the result as a draft instead of routing all traffic to it.
    #[arg(long)]
    pub draft: bool,
    #[command(flatten)]
    pub traffic: TrafficArgs,
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

pub async fn run(env: &Env, ctx: &DeployContext, args: BuildArgs) -> anyhow::Result<()> {
    let source = match (args.tarball, args.staged) {
        (Some(path), _) => BuildSource::Local(path),
        (None, Some(key)) => BuildSource::Staged(key),
        (None, None) => anyhow::bail!("either --tarball or --staged is required"),
    };
    info!(app_id = %ctx.app_id(), ?source, "building");

    let mut request = BuildRequest::new(source);
    request.version_id = args.version_id;
    request.name = args.name;
    request.message = args.message;
    request.commit = args.commit;
    request.env = args.build_env;
    if let Some(env) = args.traffic.target_env {
        request.traffic.environment = Some(env);
    }
    request.traffic.force_all_traffic = !args.draft || args.traffic.force_all_traffic;

    let builder = Builder::new(env.versions.clone(), Arc::new(SystemRunner), &env.config)
        .context("setting up builder")?;
    let version = builder.build(&request, ctx).await?;
    report(&version)
}
