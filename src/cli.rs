use clap::{ArgAction, Parser};
use std::path::{Path, PathBuf};

use crate::config::{default_config_path, FleetConfig};
use crate::fleet::LoadBalancingStrategy;
use crate::manager::FleetSummary;

#[derive(Parser, Debug)]
#[command(name = "fleetguard")]
#[command(about = "Route, health-check, autoscale and fail over a multi-region server fleet")]
#[command(version)]
pub struct Args {
    /// Path to the fleet file (YAML or JSON). Defaults to ~/.fleetguard/fleet.yaml
    pub fleet_file: Option<PathBuf>,

    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Dry-run mode: validate the fleet file and show the fleet without running
    #[arg(long)]
    pub dry_run: bool,

    /// Override the load balancing strategy from the fleet file
    #[arg(long, value_name = "STRATEGY")]
    pub strategy: Option<LoadBalancingStrategy>,

    /// Path to a .env file
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    /// Seconds between fleet status log lines
    #[arg(long, default_value = "60")]
    pub status_interval: u64,

    /// Log fleet status as JSON instead of a summary line
    #[arg(long)]
    pub json: bool,
}

impl Args {
    /// The fleet file to load
    pub fn fleet_path(&self) -> PathBuf {
        self.fleet_file.clone().unwrap_or_else(default_config_path)
    }
}

// ============================================================================
// SBIO: Pure display logic (no I/O - returns formatted strings)
// ============================================================================

/// Format a dry-run output showing the fleet layout.
/// Pure function - returns a formatted string.
pub fn format_dry_run(config: &FleetConfig, path: &Path) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "fleetguard v{} - Dry Run Mode\n\n",
        env!("CARGO_PKG_VERSION")
    ));
    output.push_str(&format!("Fleet file: {}\n\n", path.display()));

    output.push_str(&format!(
        "Routing: {} (session affinity: {}, ttl: {}s)\n",
        config.routing.strategy,
        if config.routing.session_affinity { "on" } else { "off" },
        config.routing.affinity_ttl_secs
    ));
    output.push_str(&format!(
        "Health: every {}s, timeout {}ms, unhealthy after {} failures\n\n",
        config.health.interval_secs,
        config.health.timeout_ms,
        config.health.max_consecutive_failures
    ));

    // Regions section
    output.push_str(&format!(
        "Regions ({}, {} servers):\n",
        config.regions.len(),
        config.server_count()
    ));
    for region in &config.regions {
        output.push_str(&format!(
            "  [{}] {} ({:.2}, {:.2}) priority {}\n",
            region.name,
            if region.continent.is_empty() { "-" } else { region.continent.as_str() },
            region.latitude,
            region.longitude,
            region.priority
        ));
        for server in &region.servers {
            output.push_str(&format!(
                "    - {} {}:{} weight {} capacity {}{}\n",
                server.id,
                server.endpoint,
                server.port,
                server.weight,
                server.capacity,
                if server.probe { "" } else { " (no probe)" }
            ));
        }
    }

    if !config.scaling_policies.is_empty() {
        output.push_str(&format!(
            "\nScaling Policies ({}):\n",
            config.scaling_policies.len()
        ));
        for policy in &config.scaling_policies {
            output.push_str(&format!(
                "  {}: up >{}% / down <{}%, {}-{} instances, cooldown {}s\n",
                policy.region,
                policy.scale_up_threshold,
                policy.scale_down_threshold,
                policy.min_instances,
                policy.max_instances,
                policy.cooldown_secs
            ));
        }
    }

    if !config.failover_policies.is_empty() {
        output.push_str(&format!(
            "\nFailover Policies ({}):\n",
            config.failover_policies.len()
        ));
        for policy in &config.failover_policies {
            output.push_str(&format!(
                "  {}: {} -> {} below {}% ({})\n",
                policy.name,
                policy.primary_region,
                policy.secondary_region,
                policy.health_threshold,
                if policy.automatic { "automatic" } else { "manual" }
            ));
        }
    }

    if !config.deployments.is_empty() {
        output.push_str(&format!("\nDeployments ({}):\n", config.deployments.len()));
        for deployment in &config.deployments {
            output.push_str(&format!(
                "  {} [{}]: {}\n",
                deployment.name,
                deployment.strategy,
                deployment.active_regions.join(", ")
            ));
        }
    }

    output.push_str("\nValidation: PASSED\n");
    output.push_str("Ready to start fleet. Remove --dry-run to execute.\n");

    output
}

/// One-line fleet status for periodic logging
pub fn format_fleet_summary(summary: &FleetSummary) -> String {
    format!(
        "{}/{} servers healthy in {} regions, utilization {}%, avg {}ms, {} sessions, \
         {} scaling events, {}/{} policies failed over",
        summary.stats.healthy_servers,
        summary.stats.total_servers,
        summary.stats.total_regions,
        summary.stats.utilization,
        summary.stats.avg_response_ms,
        summary.stats.active_sessions,
        summary.scaling.total_events,
        summary.failed_over,
        summary.failover_policies
    )
}
