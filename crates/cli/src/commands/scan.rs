//! One fetch-normalize-detect cycle from the command line, optionally sized
//! into stake plans for an account.

use crate::runtime;
use anyhow::{Context, Result};
use arbys_core::config_loader::DEFAULT_CONFIG_PATH;
use arbys_core::{AppConfig, BetHistoryStore, BetRecord, Opportunity};
use arbys_staking::{
    AccountHealthCache, AccountHealthManager, AllocationRequest, InMemoryBetStore, StakeAllocator,
    StakePlan,
};
use clap::Args;
use rust_decimal::{Decimal, RoundingStrategy};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Arguments for the scan command.
#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Sport to scan (defaults to `fetch.default_sport`)
    #[arg(long)]
    pub sport: Option<String>,

    /// Minimum profit in percent (defaults to `detector.min_profit_pct`)
    #[arg(long)]
    pub min_profit_pct: Option<Decimal>,

    /// Maximum number of opportunities to print
    #[arg(long, default_value_t = 20)]
    pub limit: usize,

    /// Bankroll to size stakes against; no stake plans without it
    #[arg(long)]
    pub bankroll: Option<Decimal>,

    /// Account whose health drives rounding and caps
    #[arg(long, default_value = "default")]
    pub account: String,

    /// JSON file with the account's bet history (array of bet records)
    #[arg(long)]
    pub history: Option<PathBuf>,

    /// Fixes the stake jitter for reproducible output
    #[arg(long)]
    pub seed: Option<u64>,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

async fn load_history(store: &InMemoryBetStore, path: &Path) -> Result<usize> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading bet history {}", path.display()))?;
    let bets: Vec<BetRecord> =
        serde_json::from_str(&text).with_context(|| format!("parsing bet history {}", path.display()))?;
    let count = bets.len();
    for bet in bets {
        store.record_bet(bet).await?;
    }
    Ok(count)
}

async fn build_allocator(config: &AppConfig, history: Option<&Path>) -> Result<StakeAllocator> {
    let store = Arc::new(InMemoryBetStore::new());
    if let Some(path) = history {
        let count = load_history(&store, path).await?;
        tracing::info!(bets = count, path = %path.display(), "Loaded bet history");
    }
    let manager = AccountHealthManager::new(store, &config.health);
    let cache = AccountHealthCache::new(Arc::new(manager), &config.health);
    Ok(StakeAllocator::new(Arc::new(cache), config.allocator.clone()))
}

fn cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn render_opportunity(rank: usize, opp: &Opportunity, plan: Option<&StakePlan>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "#{rank:<3} {}  +{}%  risk={}  starts {}",
        opp.event_name(),
        cents(opp.profit_pct),
        opp.risk_level,
        opp.start_time.format("%Y-%m-%d %H:%M UTC")
    );
    for leg in &opp.legs {
        let _ = writeln!(out, "     {:<5} {:>7}  {}", leg.outcome, leg.odds(), leg.provider_id());
    }
    for warning in &opp.risk_warnings {
        let _ = writeln!(out, "     risk: {warning}");
    }

    if let Some(plan) = plan {
        if plan.is_empty() {
            let _ = writeln!(out, "     stakes: none");
        } else {
            let legs: Vec<String> = plan
                .stakes
                .iter()
                .map(|s| format!("{} {} @ {}", s.outcome, s.stake, s.provider_id))
                .collect();
            let _ = writeln!(
                out,
                "     stakes: {} | total {} profit {} ({})",
                legs.join(", "),
                plan.total_stake,
                cents(plan.guaranteed_profit),
                plan.rounding
            );
        }
        for warning in &plan.warnings {
            let _ = writeln!(out, "     warning: {warning}");
        }
    }
    out
}

/// Runs the scan command.
///
/// # Errors
/// Returns an error if configuration is invalid, a provider cannot be built,
/// no provider is enabled or an allocation request is malformed.
pub async fn run_scan(args: ScanArgs) -> Result<()> {
    let config = runtime::load_config(&args.config)?;
    let pipeline = runtime::build_pipeline(&config)?;
    let sport = args
        .sport
        .clone()
        .unwrap_or_else(|| config.fetch.default_sport.clone());
    let min_profit_pct = args
        .min_profit_pct
        .unwrap_or_else(|| pipeline.default_min_profit_pct());

    let cancel = runtime::cancel_on_ctrl_c();
    let report = pipeline.scan(&sport, min_profit_pct, &cancel).await?;
    let shown: Vec<&Opportunity> = report.opportunities.iter().take(args.limit).collect();

    let mut plans = Vec::new();
    if let Some(bankroll) = args.bankroll {
        let allocator = build_allocator(&config, args.history.as_deref()).await?;
        for opp in &shown {
            let mut request = AllocationRequest::new(bankroll, &args.account);
            if let Some(seed) = args.seed {
                request = request.with_jitter_seed(seed);
            }
            plans.push(allocator.allocate(opp, &request).await?);
        }
    }

    if args.json {
        let errors: Vec<_> = report
            .snapshot
            .errors
            .iter()
            .map(|f| serde_json::json!({"provider": f.provider, "message": f.error.to_string()}))
            .collect();
        let body = serde_json::json!({
            "sport": sport,
            "min_profit_pct": min_profit_pct,
            "as_of": report.as_of,
            "summary": report.summary,
            "errors": errors,
            "skipped": report.skipped.len(),
            "opportunities": shown,
            "stake_plans": plans,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    println!(
        "Scan {sport}: {} providers ok, {} offers, {} errors, {} skipped, {}ms",
        report.snapshot.succeeded().len(),
        report.snapshot.offers.len(),
        report.snapshot.errors.len(),
        report.skipped.len(),
        report.snapshot.elapsed_ms
    );
    for failure in &report.snapshot.errors {
        println!("  ! {}: {}", failure.provider, failure.error);
    }
    println!(
        "{} events, {} arbitrageable, {} at or above {min_profit_pct}%",
        report.summary.events_scanned,
        report.summary.arbitrage_events,
        report.opportunities.len()
    );

    for (idx, opp) in shown.iter().enumerate() {
        print!("{}", render_opportunity(idx + 1, opp, plans.get(idx)));
    }
    Ok(())
}
