use std::path::PathBuf;
use std::str::FromStr;

use amiclean_core::{CleanupConfig, RawConfig};
use amiclean_engine::{CandidateImage, CleanupPlan, GroupReport};
use amiclean_persist::{PlanRecord, PlanStore, SqliteStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "amicleanctl", version, about = "Plan cleanup of unused AMIs and orphaned snapshots")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compute and print a cleanup plan
    Plan {
        #[command(flatten)]
        args: PlanArgs,
        /// Also list retained and unmatched images
        #[arg(long = "full-report", action = ArgAction::SetTrue)]
        full_report: bool,
        /// Only print orphaned snapshots
        #[arg(long = "orphans-only", action = ArgAction::SetTrue)]
        orphans_only: bool,
        /// Store the plan in the local journal
        #[arg(long = "record", action = ArgAction::SetTrue)]
        record: bool,
    },
    /// Print ids to deregister and delete, one per line
    Ids {
        #[command(flatten)]
        args: PlanArgs,
    },
    /// Show recently recorded plans
    History {
        #[arg(long = "limit", default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Args, Debug)]
struct PlanArgs {
    /// Inventory file (AWS CLI describe-* output, JSON or YAML); repeatable
    #[arg(short = 'i', long = "inventory", required = true)]
    inventory: Vec<PathBuf>,

    /// Config file (YAML or JSON); flags override its values
    #[arg(long = "config", env = "AMICLEAN_CONFIG")]
    config: Option<PathBuf>,

    /// Grouping mode: tags or name
    #[arg(long = "mapping-key", env = "AMICLEAN_MAPPING_KEY")]
    mapping_key: Option<String>,

    /// Tag keys (tags mode) or name substrings (name mode), comma separated
    #[arg(long = "mapping-values", env = "AMICLEAN_MAPPING_VALUES", value_delimiter = ',')]
    mapping_values: Option<Vec<String>>,

    /// Tags mode: only group images carrying every mapping key
    #[arg(long = "require-all-keys", action = ArgAction::SetTrue)]
    require_all_keys: bool,

    /// Mapping values whose groups are never cleaned, comma separated
    #[arg(long = "excluded-mapping-values", value_delimiter = ',')]
    excluded_values: Option<Vec<String>>,

    /// Most recent images to keep per group
    #[arg(long = "keep-previous", env = "AMICLEAN_KEEP_PREVIOUS", allow_negative_numbers = true)]
    keep_previous: Option<i64>,

    /// Never select images younger than this many days
    #[arg(long = "ami-min-days", env = "AMICLEAN_AMI_MIN_DAYS", allow_negative_numbers = true)]
    min_age_days: Option<i64>,

    /// Select exactly these image ids instead of grouping, comma separated
    #[arg(long = "from-ids", value_delimiter = ',')]
    from_ids: Option<Vec<String>>,

    /// Skip orphaned snapshot detection
    #[arg(long = "skip-orphans", action = ArgAction::SetTrue)]
    skip_orphans: bool,

    /// Only consider snapshots owned by this account
    #[arg(long = "owner-id", env = "AMICLEAN_OWNER_ID")]
    owner_id: Option<String>,

    /// Plan even when instance or autoscaling inventories were not supplied
    #[arg(long = "allow-missing-usage", action = ArgAction::SetTrue)]
    allow_missing_usage: bool,
}

impl PlanArgs {
    fn raw(&self) -> RawConfig {
        RawConfig {
            mapping_key: self.mapping_key.clone(),
            mapping_values: self.mapping_values.clone(),
            require_all_keys: self.require_all_keys.then_some(true),
            excluded_values: self.excluded_values.clone(),
            keep_previous: self.keep_previous,
            min_age_days: self.min_age_days,
            from_ids: self.from_ids.clone(),
            check_orphans: self.skip_orphans.then_some(false),
            owner_id: self.owner_id.clone(),
        }
    }

    /// Validated before any inventory is read.
    fn config(&self) -> Result<CleanupConfig> {
        let file = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
                serde_yaml::from_str::<RawConfig>(&text).with_context(|| format!("decoding config {}", path.display()))?
            }
            None => RawConfig::default(),
        };
        Ok(CleanupConfig::try_from(file.merge(self.raw()))?)
    }

    fn run(&self) -> Result<CleanupPlan> {
        let cfg = self.config()?;
        info!(mode = ?cfg.mapping.mode, values = ?cfg.mapping.values, keep_previous = cfg.keep_previous, "config resolved");
        let loaded = amiclean_inventory::load_paths(&self.inventory)?;
        loaded.coverage.check(self.allow_missing_usage)?;
        if cfg.check_orphans && !loaded.coverage.snapshots {
            info!("no Snapshots section loaded; orphan detection has nothing to inspect");
        }
        Ok(amiclean_engine::plan(&loaded.inventory, &cfg, Utc::now())?)
    }
}

fn init_tracing() {
    let env = std::env::var("AMICLEAN_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("AMICLEAN_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid AMICLEAN_METRICS_ADDR; expected host:port");
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Plan { args, full_report, orphans_only, record } => {
            let plan = args.run()?;
            match cli.output {
                Output::Human if orphans_only => print_orphans(&plan),
                Output::Human => print_plan(&plan, full_report),
                Output::Json if orphans_only => println!("{}", serde_json::to_string_pretty(&plan.orphans)?),
                Output::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
            }
            if record {
                let rec = PlanRecord::new(&plan, plan.image_ids().len(), plan.snapshot_ids().len())?;
                SqliteStore::open_default()?.record(&rec)?;
                info!(id = %rec.id, "plan recorded");
            }
        }
        Commands::Ids { args } => {
            let plan = args.run()?;
            if plan.is_empty() {
                info!("nothing to clean up");
            }
            match cli.output {
                Output::Human => {
                    for id in plan.image_ids() { println!("{}", id); }
                    for id in plan.snapshot_ids() { println!("{}", id); }
                }
                Output::Json => {
                    #[derive(serde::Serialize)]
                    struct Ids { images: Vec<String>, snapshots: Vec<String> }
                    println!("{}", serde_json::to_string_pretty(&Ids { images: plan.image_ids(), snapshots: plan.snapshot_ids() })?);
                }
            }
        }
        Commands::History { limit } => {
            let rows = SqliteStore::open_default()?.recent(limit)?;
            match cli.output {
                Output::Human => {
                    println!("{:<36}  {:<8}  {:>6}  {:>9}", "ID", "AGE", "IMAGES", "SNAPSHOTS");
                    let now = Utc::now();
                    for r in rows {
                        let when = DateTime::<Utc>::from_timestamp(r.ts, 0);
                        println!("{:<36}  {:<8}  {:>6}  {:>9}", r.id, render_age(when, now), r.image_count, r.snapshot_count);
                    }
                }
                Output::Json => {
                    let out: Vec<serde_json::Value> = rows
                        .into_iter()
                        .map(|r| {
                            let body = serde_json::from_str::<serde_json::Value>(&r.body).unwrap_or(serde_json::Value::Null);
                            serde_json::json!({ "id": r.id, "ts": r.ts, "images": r.image_count, "snapshots": r.snapshot_count, "plan": body })
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&out)?);
                }
            }
        }
    }

    Ok(())
}

fn print_plan(plan: &CleanupPlan, full: bool) {
    let now = plan.generated_at;
    if plan.forced.is_empty() {
        println!("{:<28} {:>6} {:>10} {:>11}", "GROUP", "TOTAL", "PROTECTED", "CANDIDATES");
        for g in plan.groups.iter().chain(std::iter::once(&plan.unmatched)) {
            println!("{:<28} {:>6} {:>10} {:>11}", g.key.to_string(), g.total, g.protected, g.candidate_count);
        }
        println!();
    }
    let candidates: Vec<(&str, &CandidateImage)> = plan
        .groups
        .iter()
        .flat_map(|g| g.candidates.iter().map(move |c| (group_label(g), c)))
        .chain(plan.forced.iter().map(|c| ("<from-ids>", c)))
        .collect();
    if candidates.is_empty() {
        println!("no images to deregister");
    } else {
        println!("{:<22} {:<36} {:<8} {:<20} SNAPSHOTS", "IMAGE", "NAME", "AGE", "GROUP");
        for (group, c) in candidates {
            println!("{:<22} {:<36} {:<8} {:<20} {}", c.id, c.name, render_age(c.creation_date, now), group, c.snapshot_ids.join(","));
        }
    }
    if full {
        println!();
        println!("{:<22} {:<36} {:<8} {:<20} STATUS", "IMAGE", "NAME", "AGE", "GROUP");
        for g in plan.groups.iter().chain(std::iter::once(&plan.unmatched)) {
            let status = if g.key.is_unmatched() { "unmatched" } else { "retained" };
            for c in &g.retained {
                println!("{:<22} {:<36} {:<8} {:<20} {}", c.id, c.name, render_age(c.creation_date, now), group_label(g), status);
            }
        }
    }
    println!();
    print_orphans(plan);
    println!();
    println!("{} image(s) to deregister, {} snapshot(s) to delete", plan.image_ids().len(), plan.snapshot_ids().len());
}

fn print_orphans(plan: &CleanupPlan) {
    if plan.orphans.is_empty() {
        println!("no orphaned snapshots");
        return;
    }
    println!("{:<24} {:<22} {:>8}", "SNAPSHOT", "ORIGIN IMAGE", "SIZE GiB");
    for o in &plan.orphans {
        println!("{:<24} {:<22} {:>8}", o.snapshot_id, o.image_id, o.volume_size);
    }
    let total: u64 = plan.orphans.iter().map(|o| o.volume_size).sum();
    println!("{} orphaned snapshot(s), {} GiB", plan.orphans.len(), total);
}

fn group_label(g: &GroupReport) -> &str { g.key.as_str().unwrap_or("<unmatched>") }

fn render_age(created: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(created) = created else { return "-".to_string() };
    let mut secs = (now - created).num_seconds().max(0) as u64;
    let days = secs / 86_400; secs %= 86_400;
    let hours = secs / 3600; secs %= 3600;
    let mins = secs / 60; secs %= 60;
    if days > 0 { format!("{}d{}h", days, hours) }
    else if hours > 0 { format!("{}h{}m", hours, mins) }
    else if mins > 0 { format!("{}m", mins) }
    else { format!("{}s", secs) }
}
