use std::cmp::Reverse;

use clap::Subcommand;
use hostdeck_core::{DeployContext, ListOptions, Version};

use super::Env;

#[derive(Subcommand, Debug)]
pub enum VersionsAction {
    /// List versions, newest first.
    List {
        /// Only show completed versions.
        #[arg(long)]
        complete: bool,
        /// Output format: text or json.
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Delete one version, or every version of the app.
    Delete {
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        version_id: Option<String>,
        #[arg(long)]
        all: bool,
    },
    /// Delete the oldest versions that receive no traffic.
    Prune {
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,
    },
}

fn newest_first(mut versions: Vec<Version>) -> Vec<Version> {
    versions.sort_by_key(|v| Reverse((v.created_at, v.version_num)));
    versions
}

pub async fn run(env: &Env, ctx: &DeployContext, action: VersionsAction) -> anyhow::Result<()> {
    let app_id = ctx.app_id();
    match action {
        VersionsAction::List { complete, format } => {
            let options = ListOptions {
                exclude_incomplete: complete,
            };
            let versions = newest_first(env.versions.list(app_id, options).await?);
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&versions)?);
                return Ok(());
            }
            if versions.is_empty() {
                println!("No versions for {app_id}");
            }
            for v in &versions {
                println!(
                    "{:>4}  {}  {:<9}  {:>6} files  {}",
                    v.version_num,
                    v.version_id,
                    v.status.as_str(),
                    v.file_count,
                    v.name
                );
            }
            Ok(())
        }
        VersionsAction::Delete { version_id, all } => {
            if all {
                let removed = env.versions.delete_all(app_id).await?;
                println!("Deleted {removed} versions of {app_id}");
            } else if let Some(version_id) = version_id {
                env.versions.delete(app_id, &version_id).await?;
                println!("Deleted {version_id}");
            }
            Ok(())
        }
        VersionsAction::Prune { count } => {
            let deleted = env.versions.delete_oldest(app_id, count).await?;
            for version_id in &deleted {
                println!("Deleted {version_id}");
            }
            println!("Pruned {} of {count} requested", deleted.len());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostdeck_core::{Manifest, VersionStatus};

    fn version(id: &str, num: u32, created_at: u64) -> Version {
        Version {
            version_id: id.to_string(),
            app_id: "app".to_string(),
            version_num: num,
            name: format!("v{num}"),
            message: None,
            commit: None,
            user_id: None,
            manifest: Manifest::default(),
            status: VersionStatus::Complete,
            error: None,
            file_count: 0,
            duration_ms: None,
            preview_url: None,
            created_at,
        }
    }

    #[test]
    fn list_order_is_newest_first() {
        let versions = vec![version("a", 1, 100), version("b", 2, 200), version("c", 3, 200)];
        let ids: Vec<String> = newest_first(versions)
            .into_iter()
            .map(|v| v.version_id)
            .collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }
}
