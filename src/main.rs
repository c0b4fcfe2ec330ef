mod bonds;
mod config;
mod data;
mod error;
mod optimizer;
mod portfolio;
mod report;
mod returns;
mod tvm;
mod var;

use clap::{CommandFactory, Parser};
use data::DateRange;
use optimizer::SolverConfig;
use portfolio::{PortfolioOptions, SamplerConfig};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use var::{MonteCarloConfig, VarMethod, VarOptions};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "quantlab: Value-at-Risk, Markowitz portfolio optimization and fixed-income calculators",
    after_help = "EXAMPLES:
    # Parametric one-day 99% VaR of $1M in Citigroup
    cargo run --release -- --var C

    # Monte Carlo VaR with a fixed seed over a 10-day horizon
    cargo run --release -- --var-mc C --horizon 10 --seed 42

    # Max-Sharpe portfolio with a summary file and plot export
    cargo run --release -- --portfolio AAPL,MSFT,NVDA --summary --export-samples

    # Future values and bond prices
    cargo run --release -- --tvm --principal 1000 --rate 0.05 --years 10
    cargo run --release -- --bond --coupon-rate 0.06 --rate 0.05 --years 5"
)]
struct Args {
    /// Future value of a cash amount with discrete and continuous compounding
    #[arg(long)]
    tvm: bool,

    /// Price a zero-coupon and a coupon bond
    #[arg(long)]
    bond: bool,

    /// Parametric VaR for a symbol (default: C)
    #[arg(long, num_args = 0..=1, default_missing_value = "", value_name = "SYMBOL")]
    var: Option<String>,

    /// Monte Carlo VaR for a symbol (default: C)
    #[arg(long, num_args = 0..=1, default_missing_value = "", value_name = "SYMBOL")]
    var_mc: Option<String>,

    /// Run the portfolio optimizer on comma-separated symbols (default: built-in NSE basket)
    #[arg(long, num_args = 0..=1, default_missing_value = "", value_name = "A,B,C")]
    portfolio: Option<String>,

    /// Start date of the price history (YYYY-MM-DD)
    #[arg(long, default_value = config::DEFAULT_START_DATE)]
    start: String,

    /// End date of the price history (YYYY-MM-DD)
    #[arg(long, default_value = config::DEFAULT_END_DATE)]
    end: String,

    /// VaR confidence level in (0, 1)
    #[arg(long, default_value_t = config::DEFAULT_CONFIDENCE)]
    confidence: f64,

    /// VaR horizon in trading days
    #[arg(long, default_value_t = config::DEFAULT_HORIZON_DAYS)]
    horizon: u32,

    /// Position value for VaR
    #[arg(long, default_value_t = config::DEFAULT_INVESTMENT)]
    investment: f64,

    /// Monte Carlo simulations
    #[arg(long, default_value_t = config::DEFAULT_MC_ITERATIONS)]
    iterations: usize,

    /// Random portfolios drawn before optimizing
    #[arg(long, default_value_t = config::DEFAULT_NUM_PORTFOLIOS)]
    portfolios: usize,

    /// Seed for Monte Carlo VaR and the portfolio sampler
    #[arg(long)]
    seed: Option<u64>,

    /// Annual risk-free rate used in Sharpe ratios
    #[arg(long, default_value_t = config::DEFAULT_RISK_FREE_RATE)]
    risk_free_rate: f64,

    /// Trading days per year used for annualization
    #[arg(long, default_value_t = config::TRADING_DAYS)]
    trading_days: f64,

    /// Write the portfolio run summary to the results directory
    #[arg(long)]
    summary: bool,

    /// Export random portfolios and the optimum as JSON (default: results/random_portfolios.json)
    #[arg(long, num_args = 0..=1, default_missing_value = "", value_name = "PATH")]
    export_samples: Option<String>,

    /// Principal or present value for --tvm and --bond
    #[arg(long, default_value_t = 1000.0)]
    principal: f64,

    /// Annual interest / discount rate as a decimal
    #[arg(long, default_value_t = 0.05)]
    rate: f64,

    /// Annual coupon rate as a decimal for --bond
    #[arg(long, default_value_t = 0.06)]
    coupon_rate: f64,

    /// Years for --tvm and bond maturity for --bond
    #[arg(long, default_value_t = 10)]
    years: u32,
}

fn symbol_or_default(arg: &str) -> String {
    let symbol = arg.trim();
    if symbol.is_empty() {
        config::DEFAULT_VAR_SYMBOL.to_string()
    } else {
        symbol.to_uppercase()
    }
}

fn parse_symbols(arg: &str) -> Vec<String> {
    let symbols: Vec<String> = arg
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    if symbols.is_empty() {
        config::DEFAULT_PORTFOLIO_SYMBOLS.iter().map(|s| s.to_string()).collect()
    } else {
        symbols
    }
}

fn var_options(args: &Args, symbol: &str, method: VarMethod, range: DateRange) -> VarOptions {
    VarOptions {
        symbol: symbol_or_default(symbol),
        range,
        investment: args.investment,
        confidence: args.confidence,
        horizon: args.horizon,
        method,
        monte_carlo: MonteCarloConfig {
            iterations: args.iterations,
            seed: args.seed,
            ..MonteCarloConfig::default()
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    config::init_cpu_parallelism();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("quantlab=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    let args = Args::parse();

    if args.tvm {
        match tvm::future_values(args.principal, args.rate, args.years as f64) {
            Ok(fv) => report::print_future_values(&fv),
            Err(e) => error!("Time value calculation failed: {}", e),
        }
        return Ok(());
    }

    if args.bond {
        let priced = bonds::ZeroCouponBond::new(args.principal, args.years, args.rate).and_then(|zero| {
            bonds::CouponBond::new(args.principal, args.years, args.rate, args.coupon_rate)
                .map(|coupon| (zero, coupon))
        });
        match priced {
            Ok((zero, coupon)) => report::print_bonds(&zero, &coupon, args.coupon_rate),
            Err(e) => error!("Bond pricing failed: {}", e),
        }
        return Ok(());
    }

    let range = DateRange::parse(&args.start, &args.end)?;

    if let Some(ref symbol) = args.var {
        match var::run_var_analysis(&var_options(&args, symbol, VarMethod::Parametric, range)).await {
            Ok(_) => info!("VaR analysis completed."),
            Err(e) => error!("VaR analysis failed: {:#}", e),
        }
        return Ok(());
    }

    if let Some(ref symbol) = args.var_mc {
        match var::run_var_analysis(&var_options(&args, symbol, VarMethod::MonteCarlo, range)).await {
            Ok(_) => info!("Monte Carlo VaR analysis completed."),
            Err(e) => error!("Monte Carlo VaR analysis failed: {:#}", e),
        }
        return Ok(());
    }

    if let Some(ref symbols_str) = args.portfolio {
        let export_samples = args.export_samples.as_deref().map(|p| {
            if p.trim().is_empty() {
                portfolio::default_samples_path()
            } else {
                PathBuf::from(p)
            }
        });
        let options = PortfolioOptions {
            symbols: parse_symbols(symbols_str),
            range,
            sampler: SamplerConfig {
                num_portfolios: args.portfolios,
                periods_per_year: args.trading_days,
                risk_free_rate: args.risk_free_rate,
            },
            solver: SolverConfig::default(),
            seed: args.seed,
            write_summary: args.summary,
            export_samples,
        };
        match portfolio::run_portfolio_optimization(&options).await {
            Ok(_) => info!("Portfolio optimization completed."),
            Err(e) => error!("Portfolio optimization failed: {:#}", e),
        }
        return Ok(());
    }

    Args::command().print_help()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_symbols() {
        assert_eq!(parse_symbols(" aapl, msft ,,nvda"), vec!["AAPL", "MSFT", "NVDA"]);
        assert_eq!(parse_symbols("").len(), config::DEFAULT_PORTFOLIO_SYMBOLS.len());
        assert_eq!(symbol_or_default(""), "C");
        assert_eq!(symbol_or_default("spy"), "SPY");
    }

    #[test]
    fn test_cli_flags() {
        let args = Args::try_parse_from(["quantlab", "--var-mc", "--seed", "7", "--horizon", "5"]).unwrap();
        assert_eq!(args.var_mc.as_deref(), Some(""));
        assert_eq!(args.seed, Some(7));
        assert_eq!(args.horizon, 5);
        assert_eq!(args.iterations, config::DEFAULT_MC_ITERATIONS);

        let args = Args::try_parse_from(["quantlab", "--portfolio", "A,B", "--export-samples", "out.json"]).unwrap();
        assert_eq!(args.portfolio.as_deref(), Some("A,B"));
        assert_eq!(args.export_samples.as_deref(), Some("out.json"));
        Args::command().debug_assert();
    }
}
