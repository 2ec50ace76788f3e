use std::error::Error;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Instant;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use millboard_bridge::state::{JobsView, LeadTimePageView, LeadTimesView, Overview, PairsView, StockView};
use millboard_bridge::{Gateway, OperationResult, ViewOperation, ViewRequest, ViewResponse};
use millboard_pipeline::export::write_pairs_csv;
use millboard_pipeline::lead_time_browser::FilterChange;
use millboard_pipeline::query::run_query;
use millboard_pipeline::{
    Controller, ControllerStatus, Field, FieldFilter, FileStore, HttpDashboardApi, Page,
    Predicate, ProcessingOutcome, QuerySpec, SortSpec, Stage, SyncConfig, SystemClock, Urgency,
};

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "millboard", about = "Manufacturing ETL dashboard in the terminal")]
struct Cli {
    /// Dashboard API base URL (overrides MILLBOARD_API_BASE_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Directory holding the persisted snapshot (overrides MILLBOARD_CACHE_DIR)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Output as JSON instead of formatted text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the pipeline phase and data freshness
    Status,
    /// Refresh the snapshot if the cache has expired
    Refresh {
        /// Skip the TTL check
        #[arg(long)]
        force: bool,
    },
    /// Signal that the ETL run finished successfully
    Complete,
    /// Signal that the ETL run failed
    Fail { reason: String },
    /// Clear all persisted state
    Reset,
    /// Retry the initial refresh after a connection error
    Retry,
    /// Render one dashboard view
    View(ViewArgs),
    /// Keep the snapshot fresh in the background until Ctrl-C
    Watch,
    /// Write parallelization pairs to a CSV file
    ExportPairs {
        path: PathBuf,
        /// Only pairs whose item codes contain this text
        #[arg(long)]
        search: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ViewKind {
    Overview,
    Jobs,
    LeadTimes,
    Pairs,
    Stock,
}

#[derive(Args)]
struct ViewArgs {
    #[arg(value_enum)]
    kind: ViewKind,

    #[arg(long)]
    search: Option<String>,

    /// field=value, field>=n or field<=n (repeatable)
    #[arg(long = "filter")]
    filters: Vec<String>,

    /// Sort field, descending unless --asc
    #[arg(long)]
    sort: Option<String>,

    #[arg(long)]
    asc: bool,

    #[arg(long, default_value_t = 1)]
    page: usize,

    #[arg(long)]
    page_size: Option<usize>,

    /// Stage group for jobs; server-side stage filter with --live
    #[arg(long)]
    stage: Option<String>,

    /// Server-side urgency filter with --live
    #[arg(long)]
    urgency: Option<String>,

    /// Fetch lead times page by page from the API
    #[arg(long)]
    live: bool,
}

fn parse_field(name: &str) -> Result<Field, String> {
    serde_json::from_value(Value::String(name.trim().to_string()))
        .map_err(|_| format!("unknown field '{}'", name.trim()))
}

/// `field=value`, `field>=n` or `field<=n`.
fn parse_filter(raw: &str) -> Result<FieldFilter, String> {
    let threshold = |op: &str| -> Option<Result<(Field, f64), String>> {
        let (name, value) = raw.split_once(op)?;
        Some(parse_field(name).and_then(|field| {
            value
                .trim()
                .parse::<f64>()
                .map(|n| (field, n))
                .map_err(|_| format!("'{}' is not a number", value.trim()))
        }))
    };
    if let Some(parsed) = threshold(">=") {
        let (field, n) = parsed?;
        return Ok(FieldFilter::at_least(field, n));
    }
    if let Some(parsed) = threshold("<=") {
        let (field, n) = parsed?;
        return Ok(FieldFilter::at_most(field, n));
    }
    match raw.split_once('=') {
        Some((name, value)) => Ok(FieldFilter::equals(parse_field(name)?, value.trim())),
        None => Err(format!("filter '{raw}' must look like field=value, field>=n or field<=n")),
    }
}

impl ViewArgs {
    fn sort_spec(&self) -> Result<Option<SortSpec>, String> {
        self.sort
            .as_deref()
            .map(|name| {
                let field = parse_field(name)?;
                Ok(if self.asc {
                    SortSpec::asc(field)
                } else {
                    SortSpec::desc(field)
                })
            })
            .transpose()
    }

    fn query(&self, config: &SyncConfig) -> Result<QuerySpec, String> {
        let mut spec = QuerySpec {
            search: self.search.clone(),
            sort: self.sort_spec()?,
            page: self.page,
            page_size: self.page_size.unwrap_or(config.default_page_size),
            ..QuerySpec::default()
        };
        for raw in &self.filters {
            spec.filters.push(parse_filter(raw)?);
        }
        Ok(spec)
    }

    /// Live lead-time filters. Stage and urgency go to the server; the
    /// rest narrow the loaded page.
    fn filter_changes(&self) -> Result<Vec<FilterChange>, String> {
        let mut changes = vec![
            FilterChange::Search(self.search.clone()),
            FilterChange::Stage(self.stage.as_deref().map(Stage::from_raw)),
            FilterChange::Urgency(self.urgency.as_deref().map(Urgency::from_raw)),
        ];
        for raw in &self.filters {
            let filter = parse_filter(raw)?;
            let change = match (filter.field, filter.predicate) {
                (Field::Category, Predicate::Equals(v)) => {
                    FilterChange::Category(Some(v))
                }
                (Field::Priority, Predicate::Equals(v)) => {
                    FilterChange::Priority(Some(v))
                }
                (Field::EfficiencyGain, Predicate::AtLeast(n)) => {
                    FilterChange::MinEfficiency(Some(n))
                }
                _ => {
                    return Err(format!(
                        "live lead times support category=, priority= and efficiency_gain>= (got '{raw}')"
                    ))
                }
            };
            changes.push(change);
        }
        Ok(changes)
    }

    fn operation(&self, config: &SyncConfig) -> Result<ViewOperation, String> {
        Ok(match self.kind {
            ViewKind::Overview => ViewOperation::Overview,
            ViewKind::Jobs => ViewOperation::Jobs {
                query: self.query(config)?,
                stage_group: self.stage.as_deref().map(Stage::from_raw),
            },
            ViewKind::LeadTimes if self.live => ViewOperation::LeadTimePage {
                filters: self.filter_changes()?,
                sort: self.sort_spec()?,
                page: self.page,
                page_size: self.page_size,
            },
            ViewKind::LeadTimes => ViewOperation::LeadTimes {
                query: self.query(config)?,
            },
            ViewKind::Pairs => ViewOperation::Pairs {
                query: self.query(config)?,
            },
            ViewKind::Stock => ViewOperation::Stock {
                query: self.query(config)?,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Human-readable output
// ---------------------------------------------------------------------------

const RULE_WIDTH: usize = 72;

fn print_header(title: &str) {
    let bar = "\u{2550}".repeat(RULE_WIDTH - 2);
    println!();
    println!("  \u{2554}{bar}\u{2557}");
    println!("  \u{2551}{:^width$}\u{2551}", format!("MILLBOARD \u{00b7} {title}"), width = RULE_WIDTH - 2);
    println!("  \u{255a}{bar}\u{255d}");
    println!();
}

fn print_rule() {
    println!("  {:\u{2500}<width$}", "", width = RULE_WIDTH);
}

fn print_banner(response: &ViewResponse) {
    if let Some(banner) = &response.banner {
        println!("  {banner}");
        println!();
    }
}

fn clip(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let kept: String = text.chars().take(width.saturating_sub(1)).collect();
        format!("{kept}\u{2026}")
    }
}

fn print_page_footer<R>(page: &Page<R>) {
    println!(
        "  page {}/{}  \u{00b7}  {} of {} records match",
        page.page, page.total_pages, page.total_matching, page.total_records
    );
}

fn print_status(status: &ControllerStatus) {
    let fmt_time = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "never".into())
    };
    println!("  phase          {}", status.phase);
    println!("  etl completed  {}", status.pipeline.etl_completed);
    println!("  last updated   {}", fmt_time(status.pipeline.last_updated));
    println!("  snapshot from  {}", fmt_time(status.captured_at));
    println!("  stale          {}", status.stale);
    if !status.degraded.is_empty() {
        let names: Vec<&str> = status.degraded.iter().map(|e| e.as_str()).collect();
        println!("  degraded       {}", names.join(", "));
    }
    if let Some(error) = &status.last_error {
        println!("  last error     {error}");
    }
}

fn print_overview(overview: &Overview) {
    let s = &overview.summary;
    println!(
        "  {} jobs  \u{00b7}  {} unique items  \u{00b7}  {} critical",
        overview.jobs.total_jobs, overview.jobs.unique_items, overview.jobs.critical_jobs
    );
    println!(
        "  stock: {} out of stock  \u{00b7}  {} shortage  \u{00b7}  {} adequate  \u{00b7}  {} excess",
        s.stock.out_of_stock, s.stock.shortage, s.stock.adequate, s.stock.excess
    );
    println!(
        "  machines: {} overloaded  \u{00b7}  {} high  \u{00b7}  {} medium  \u{00b7}  {} available",
        s.machines.overloaded, s.machines.high_load, s.machines.medium_load, s.machines.available
    );
    println!(
        "  lead times: {} items  \u{00b7}  {:.1} days saved  \u{00b7}  {:.1}% avg gain",
        overview.lead_times.total_items,
        overview.lead_times.total_time_saved_days,
        overview.lead_times.avg_efficiency_gain_pct
    );
    println!(
        "  pairs: {}/{} runnable  \u{00b7}  {:.1} days saved  \u{00b7}  top gain {:.1}%",
        overview.parallelization.parallelizable_pairs,
        overview.parallelization.total_pairs_analyzed,
        overview.parallelization.total_time_savings_days,
        overview.parallelization.top_efficiency_gain_pct
    );
    println!();
    print_rule();
    for share in &overview.jobs.by_stage {
        if share.count > 0 {
            println!("  {:<12} {:>6}  {:>5.1}%", share.label, share.count, share.pct);
        }
    }
    print_rule();
    if overview.partial {
        println!("  some endpoints were unavailable; figures are partial");
    }
    if overview.records_dropped > 0 {
        println!("  {} malformed records dropped", overview.records_dropped);
    }
    if overview.records_duplicated > 0 {
        println!("  {} duplicate records merged", overview.records_duplicated);
    }
}

fn print_jobs(view: &JobsView) {
    print_rule();
    for job in &view.page.items {
        let icon = match job.urgency {
            Urgency::Critical => "!!",
            Urgency::High => "! ",
            _ => "  ",
        };
        println!(
            "  {} {:<14} {:<11} {:<20} {:>8.0}  {}",
            icon,
            clip(&job.item_code, 14),
            job.stage.as_str(),
            clip(&job.process, 20),
            job.quantity,
            job.urgency
        );
    }
    print_rule();
    print_page_footer(&view.page);
    if !view.stage_groups.is_empty() {
        println!();
        for group in &view.stage_groups {
            let breakdown: Vec<String> = group
                .urgency_breakdown
                .iter()
                .map(|(label, count)| format!("{label} {count}"))
                .collect();
            println!(
                "  {:<11} {:>4} jobs  qty {:>8.0}  ({})",
                group.stage.as_str(),
                group.job_count,
                group.total_quantity,
                breakdown.join(", ")
            );
        }
    }
}

fn print_lead_time_rows(rows: &[millboard_pipeline::LeadTimeRecord]) {
    print_rule();
    for row in rows {
        println!(
            "  {:<14} {:>7.1}d {:>7.1}d {:>6.1}d {:>6.1}%  {:<10} {}",
            clip(&row.item_code, 14),
            row.serial_lead_time_days,
            row.parallelized_lead_time_days,
            row.time_saved_days(),
            row.efficiency_gain_pct(),
            clip(&row.category, 10),
            row.priority
        );
    }
    print_rule();
}

fn print_lead_times(view: &LeadTimesView) {
    print_lead_time_rows(&view.page.items);
    print_page_footer(&view.page);
    println!(
        "  {:.1} days saved across {} items  \u{00b7}  {:.1}% avg gain",
        view.metrics.total_time_saved_days, view.metrics.total_items, view.metrics.avg_efficiency_gain_pct
    );
    for task in &view.tasks {
        println!(
            "    {:<14} {:?} complexity, {} resource{}",
            clip(&task.item_code, 14),
            task.complexity,
            task.resource_requirement,
            if task.resource_requirement == 1 { "" } else { "s" }
        );
    }
}

fn print_lead_time_page(page: &LeadTimePageView) {
    print_lead_time_rows(&page.view.rows);
    println!(
        "  page {}/{}  \u{00b7}  {} shown of {} loaded  \u{00b7}  {} on server",
        page.view.page,
        page.view.total_pages,
        page.view.rows.len(),
        page.view.loaded,
        page.view.server_total
    );
}

fn print_pairs(view: &PairsView) {
    print_rule();
    for pair in &view.page.items {
        println!(
            "  {} {:<12} + {:<12} {:>6.1}d \u{2192} {:>6.1}d  {:>5.1}%{}",
            if pair.can_run_parallel { "\u{2713}" } else { "\u{2717}" },
            clip(&pair.item_a.item_code, 12),
            clip(&pair.item_b.item_code, 12),
            pair.sequential_time_days,
            pair.parallel_time_days,
            pair.efficiency_gain_pct(),
            if pair.has_conflicts() { "  (conflicts)" } else { "" }
        );
    }
    print_rule();
    print_page_footer(&view.page);
    println!(
        "  {} runnable pairs  \u{00b7}  {:.1} days saved",
        view.metrics.parallelizable_pairs, view.metrics.total_time_savings_days
    );
}

fn print_stock(view: &StockView) {
    print_rule();
    for row in &view.page.items {
        println!("  {:<20} {}", clip(&row.item_code, 20), row.stock_adequacy.as_str());
    }
    print_rule();
    print_page_footer(&view.page);
    println!(
        "  {} out of stock  \u{00b7}  {} shortage  \u{00b7}  {} adequate  \u{00b7}  {} excess",
        view.metrics.out_of_stock, view.metrics.shortage, view.metrics.adequate, view.metrics.excess
    );
}

fn print_human(title: &str, response: &ViewResponse, elapsed_ms: u128) {
    print_header(title);
    print_banner(response);
    match &response.result {
        OperationResult::Status(status) => print_status(status),
        OperationResult::Overview(overview) => print_overview(overview),
        OperationResult::Jobs(view) => print_jobs(view),
        OperationResult::LeadTimes(view) => print_lead_times(view),
        OperationResult::LeadTimePage(page) => print_lead_time_page(page),
        OperationResult::Pairs(view) => print_pairs(view),
        OperationResult::Stock(view) => print_stock(view),
        OperationResult::Transition { phase } => println!("  phase is now {phase}"),
        OperationResult::Refreshed { report } => println!("  {report:?}"),
        OperationResult::Cleared => println!("  local state cleared"),
    }
    println!();
    println!("  \u{23f1}  {}ms  \u{00b7}  phase {}", elapsed_ms, response.phase);
    println!();
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn send(gateway: &mut Gateway, operation: ViewOperation) -> Result<ViewResponse, Box<dyn Error>> {
    let request = ViewRequest {
        request_id: format!("cli-{}", gateway.audit_log.len() + 1),
        operation,
        context: Some("cli".into()),
    };
    gateway.validate_operation(&request.operation)?;
    Ok(gateway.process(&request).await?)
}

fn emit(json: bool, title: &str, response: &ViewResponse, started: Instant) -> Result<(), Box<dyn Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(response)?);
    } else {
        print_human(title, response, started.elapsed().as_millis());
    }
    Ok(())
}

async fn watch(gateway: &mut Gateway, json: bool) -> Result<(), Box<dyn Error>> {
    let controller = gateway.controller().clone();
    let handle = controller.spawn_auto_refresh();
    let mut ticker = tokio::time::interval(controller.config().refresh_period);
    log::info!(
        "watching period_ms={} phase={}",
        controller.config().refresh_period.as_millis(),
        controller.phase()
    );
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let started = Instant::now();
                let response = send(gateway, ViewOperation::Status).await?;
                emit(json, "Watch", &response, started)?;
            }
        }
    }
    handle.shutdown().await;
    log::info!("watch stopped");
    Ok(())
}

fn export_pairs(controller: &Controller, path: &Path, search: Option<String>) -> Result<usize, Box<dyn Error>> {
    let snapshot = controller
        .snapshot()
        .ok_or("no data loaded; complete an ETL run first")?;
    let mut spec = QuerySpec::default().page(1, usize::MAX);
    spec.search = search;
    let selected = run_query(&snapshot.pairs, &spec);
    let file = File::create(path)?;
    Ok(write_pairs_csv(BufWriter::new(file), &selected.items)?)
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let mut config = SyncConfig::from_env();
    if let Some(url) = cli.api_url {
        config.api_base_url = url;
    }
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = dir;
    }

    let store = FileStore::open(&config.cache_dir)?;
    let api = HttpDashboardApi::new(config.api_base_url.clone(), config.request_timeout);
    let controller = Controller::new(config.clone(), Arc::new(api), Arc::new(store), Arc::new(SystemClock));

    let started = Instant::now();
    let phase = controller.start().await;
    log::debug!("started phase={phase} elapsed_ms={}", started.elapsed().as_millis());
    let mut gateway = Gateway::new(controller);

    let (title, operation) = match cli.command {
        Command::Status => ("Status", ViewOperation::Status),
        Command::Refresh { force } => ("Refresh", ViewOperation::Refresh { force }),
        Command::Complete => {
            send(&mut gateway, ViewOperation::BeginProcessing).await?;
            (
                "ETL Complete",
                ViewOperation::CompleteProcessing {
                    outcome: ProcessingOutcome::Succeeded,
                },
            )
        }
        Command::Fail { reason } => (
            "ETL Failed",
            ViewOperation::CompleteProcessing {
                outcome: ProcessingOutcome::Failed(reason),
            },
        ),
        Command::Reset => ("Reset", ViewOperation::Reset),
        Command::Retry => ("Retry", ViewOperation::Retry),
        Command::View(args) => {
            let title = match args.kind {
                ViewKind::Overview => "Overview",
                ViewKind::Jobs => "Jobs",
                ViewKind::LeadTimes => "Lead Times",
                ViewKind::Pairs => "Parallelization Pairs",
                ViewKind::Stock => "Stock vs Demand",
            };
            (title, args.operation(&config)?)
        }
        Command::Watch => return watch(&mut gateway, cli.json).await,
        Command::ExportPairs { path, search } => {
            let rows = export_pairs(gateway.controller(), &path, search)?;
            log::info!("exported rows={rows} path={}", path.display());
            if cli.json {
                println!("{}", serde_json::json!({ "rows": rows, "path": path }));
            } else {
                println!("  {rows} pairs written to {}", path.display());
            }
            return Ok(());
        }
    };

    let response = send(&mut gateway, operation).await?;
    emit(cli.json, title, &response, started)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
