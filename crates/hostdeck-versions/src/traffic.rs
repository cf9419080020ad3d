//! Traffic routing decisions.
//!
//! Everything here is pure: callers apply the resulting plan through the
//! database and registry.

use std::collections::HashSet;

use hostdeck_core::{DeployContext, TrafficRule, TrafficRules, Version};

/// Caller options for finalizing a completed version.
#[derive(Debug, Clone, Default)]
pub struct TrafficOptions {
    /// Route all traffic to the new version even when traffic control is on.
    pub force_all_traffic: bool,
    /// Environment to route instead of the first configured one.
    pub environment: Option<String>,
}

/// What completing a version does to routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrafficPlan {
    /// Routing is untouched; the version is reachable via its preview URL.
    Draft { preview_url: String },
    /// `rules` replace the routing of `environment`.
    Live {
        environment: String,
        rules: Vec<TrafficRule>,
        preview_url: String,
    },
}

impl TrafficPlan {
    pub fn preview_url(&self) -> &str {
        match self {
            TrafficPlan::Draft { preview_url } | TrafficPlan::Live { preview_url, .. } => {
                preview_url
            }
        }
    }
}

pub fn draft_preview_url(app_url: &str, version_id: &str) -> String {
    format!("{app_url}?_version={version_id}")
}

/// Decide how a version that just completed is exposed.
///
/// Apps without traffic control always take the new version live.
pub fn plan_traffic(ctx: &DeployContext, version_id: &str, options: &TrafficOptions) -> TrafficPlan {
    let app = &ctx.virtual_app;
    let force = options.force_all_traffic || !app.traffic_control_enabled;

    if !force {
        return TrafficPlan::Draft {
            preview_url: draft_preview_url(&app.url, version_id),
        };
    }

    let environment = options
        .environment
        .clone()
        .unwrap_or_else(|| ctx.target_environment());

    TrafficPlan::Live {
        environment,
        rules: vec![TrafficRule::all(version_id)],
        preview_url: app.url.clone(),
    }
}

/// Pick up to `count` versions to prune, oldest created first.
///
/// Versions referenced by a rule in any environment are never picked, nor
/// are versions still being deployed.
pub fn oldest_unreferenced(versions: &[Version], rules: &TrafficRules, count: usize) -> Vec<String> {
    let referenced: HashSet<&str> = rules
        .values()
        .flatten()
        .map(|rule| rule.version_id.as_str())
        .collect();

    let mut candidates: Vec<&Version> = versions
        .iter()
        .filter(|v| v.status.is_terminal())
        .filter(|v| !referenced.contains(v.version_id.as_str()))
        .collect();
    candidates.sort_by_key(|v| (v.created_at, v.version_num));

    candidates
        .into_iter()
        .take(count)
        .map(|v| v.version_id.clone())
        .collect()
}
