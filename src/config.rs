use rayon::ThreadPoolBuilder;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::{info, warn};

static RAYON_INIT: OnceLock<()> = OnceLock::new();

pub fn init_cpu_parallelism() {
    RAYON_INIT.get_or_init(|| {
        let num_threads = num_cpus::get().max(1);
        match ThreadPoolBuilder::new().num_threads(num_threads).build_global() {
            Ok(_) => info!(
                "Initialized Rayon thread pool with {} threads (all logical CPU cores)",
                num_threads
            ),
            Err(e) => warn!(
                "Rayon thread pool already initialized or unavailable ({}). Using existing configuration.",
                e
            ),
        }
    });
}

/// On average there are 252 trading days in a year.
pub const TRADING_DAYS: f64 = 252.0;

/// Simulated terminal prices per Monte Carlo VaR run.
pub const DEFAULT_MC_ITERATIONS: usize = 100_000;

/// Terminal prices drawn per parallel chunk. Fixed so that a seeded run does not
/// depend on the number of worker threads.
pub const MC_CHUNK_SIZE: usize = 8_192;

/// Random portfolios drawn by the sampler.
pub const DEFAULT_NUM_PORTFOLIOS: usize = 10_000;

pub const DEFAULT_CONFIDENCE: f64 = 0.99;
pub const DEFAULT_HORIZON_DAYS: u32 = 1;

/// Investment value used by the VaR commands ($1M).
pub const DEFAULT_INVESTMENT: f64 = 1_000_000.0;

/// Annual risk-free rate subtracted in Sharpe ratios. Zero gives plain return/volatility.
pub const DEFAULT_RISK_FREE_RATE: f64 = 0.0;

/// Decimal places used when displaying optimal weights.
pub const WEIGHT_DISPLAY_DECIMALS: i32 = 3;

// ── Solver Settings ─────────────────────────────────────────────────────────
pub const SOLVER_MAX_ITERATIONS: usize = 1_000;
/// Stop once the objective improves by less than this between iterations.
pub const SOLVER_FTOL: f64 = 1e-10;
/// Stop once the projected step is shorter than this.
pub const SOLVER_XTOL: f64 = 1e-9;
pub const SOLVER_INITIAL_STEP: f64 = 0.1;
/// Central-difference step for numerical gradients.
pub const SOLVER_GRADIENT_EPS: f64 = 1e-7;

pub const DEFAULT_START_DATE: &str = "2020-01-01";
pub const DEFAULT_END_DATE: &str = "2026-01-01";

/// Symbol used by the VaR commands when none is given.
pub const DEFAULT_VAR_SYMBOL: &str = "C";

/// Default symbols for portfolio optimization when none are specified.
pub const DEFAULT_PORTFOLIO_SYMBOLS: &[&str] = &[
    "MOTHERSON.NS", "RVNL.NS", "JPPOWER.NS", "HINDCOPPER.NS", "BEL.NS", "ITC.NS",
];

pub const SUMMARY_FILE_NAME: &str = "markowitz_summary.txt";
pub const SAMPLES_FILE_NAME: &str = "random_portfolios.json";

fn env_path(name: &str, default: &str) -> PathBuf {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

/// Directory holding cached chart responses (`QUANTLAB_CACHE_DIR`, default `.cache`).
pub fn cache_dir() -> PathBuf {
    env_path("QUANTLAB_CACHE_DIR", ".cache")
}

/// Directory for summaries and exports (`QUANTLAB_RESULTS_DIR`, default `results`).
pub fn results_dir() -> PathBuf {
    env_path("QUANTLAB_RESULTS_DIR", "results")
}

pub fn fetch_attempts() -> usize {
    std::env::var("QUANTLAB_FETCH_ATTEMPTS")
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .map(|v| v.clamp(1, 8))
        .unwrap_or(3)
}

pub fn cache_ttl_secs() -> u64 {
    std::env::var("QUANTLAB_CACHE_TTL_SECS")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(86_400)
}
