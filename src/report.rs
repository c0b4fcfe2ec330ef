use crate::bonds::{CouponBond, ZeroCouponBond};
use crate::portfolio::{OptimalPortfolio, PortfolioSampleSet};
use crate::returns::ReturnStatistics;
use crate::tvm::FutureValues;
use crate::var::{MonteCarloVar, RiskParameters};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

// ──────────────────────────────────────────────────────────────────────────────
// Boxed Console Reports
// ──────────────────────────────────────────────────────────────────────────────

const MIN_BOX_WIDTH: usize = 58;

/// Lays out a ╔═╗ box wide enough for its longest line, with a ╠═╣ rule
/// between sections.
fn render_box(title: &str, sections: &[Vec<String>]) -> Vec<String> {
    let width = sections
        .iter()
        .flatten()
        .map(|l| l.chars().count())
        .chain(std::iter::once(title.chars().count()))
        .fold(MIN_BOX_WIDTH, usize::max);
    let rule = "═".repeat(width + 4);
    let row = |text: &str| format!("║  {}{}  ║", text, " ".repeat(width - text.chars().count()));

    let mut out = vec![format!("╔{}╗", rule), row(title)];
    for section in sections {
        out.push(format!("╠{}╣", rule));
        out.extend(section.iter().map(|l| row(l)));
    }
    out.push(format!("╚{}╝", rule));
    out
}

fn print_box(title: &str, sections: &[Vec<String>]) {
    println!();
    for line in render_box(title, sections) {
        println!("{}", line);
    }
}

fn risk_lines(symbol: &str, params: &RiskParameters) -> Vec<String> {
    vec![
        format!("Symbol                 : {}", symbol),
        format!("Investment             : ${:.2}", params.investment()),
        format!("Daily mean (mu)        : {:+.6}", params.mu()),
        format!("Daily std dev (sigma)  : {:.6}", params.sigma()),
        format!("Confidence             : {:.2}%", params.confidence() * 100.0),
        format!("Horizon                : {} day(s)", params.horizon()),
    ]
}

pub fn print_parametric_var(symbol: &str, params: &RiskParameters, var: f64) {
    print_box(
        "Parametric Value at Risk",
        &[
            risk_lines(symbol, params),
            vec![format!("Value at Risk          : ${:.2}", var)],
        ],
    );
}

pub fn print_monte_carlo_var(symbol: &str, params: &RiskParameters, result: &MonteCarloVar) {
    print_box(
        "Monte Carlo Value at Risk",
        &[
            risk_lines(symbol, params),
            vec![
                format!("Simulations            : {}", result.iterations),
                format!("Seed                   : {}", result.seed),
                format!("Tail percentile price  : ${:.2}", result.percentile_price),
                format!("Value at Risk          : ${:.2}", result.var),
            ],
        ],
    );
}

pub fn print_future_values(fv: &FutureValues) {
    print_box(
        "Time Value of Money",
        &[
            vec![
                format!("Amount                 : ${:.2}", fv.present_value),
                format!("Rate                   : {:.2}%", fv.rate * 100.0),
                format!("Years                  : {}", fv.time),
            ],
            vec![
                format!("FV (discrete)          : ${:.2}", fv.discrete),
                format!("FV (continuous)        : ${:.2}", fv.continuous),
                format!("PV if due (discrete)   : ${:.2}", fv.discounted_discrete),
                format!("PV if due (continuous) : ${:.2}", fv.discounted_continuous),
            ],
        ],
    );
}

pub fn print_bonds(zero: &ZeroCouponBond, coupon: &CouponBond, coupon_rate: f64) {
    print_box(
        "Bond Pricing",
        &[
            vec![format!("Maturity               : {} year(s)", zero.maturity())],
            vec![
                format!("Zero-coupon PV         : ${:.2}", zero.price()),
                format!(
                    "Zero-coupon PV (cont.) : ${:.2}",
                    zero.present_value_continuous(zero.maturity())
                ),
            ],
            vec![
                format!("Coupon rate            : {:.2}%", coupon_rate * 100.0),
                format!("Coupon bond PV         : ${:.2}", coupon.price()),
                format!(
                    "Coupon bond PV (cont.) : ${:.2}",
                    coupon.present_value_continuous(coupon.maturity())
                ),
            ],
        ],
    );
}

pub fn return_statistics_lines(symbols: &[String], annual: &ReturnStatistics) -> Vec<String> {
    let mut lines = vec!["Annualized mean returns:".to_string()];
    for (sym, mean) in symbols.iter().zip(&annual.means) {
        lines.push(format!("  {:<14} {:>+8.4}", sym, mean));
    }
    lines.push("Annualized covariance:".to_string());
    for (sym, row) in symbols.iter().zip(&annual.covariance) {
        let cells: Vec<String> = row.iter().map(|c| format!("{:>8.4}", c)).collect();
        lines.push(format!("  {:<14} {}", sym, cells.join(" ")));
    }
    lines
}

pub fn print_return_statistics(symbols: &[String], annual: &ReturnStatistics) {
    print_box("Return Statistics", &[return_statistics_lines(symbols, annual)]);
}

pub fn optimal_portfolio_lines(optimum: &OptimalPortfolio) -> Vec<String> {
    let mut lines = vec!["Optimal portfolio:".to_string()];
    for (sym, w) in optimum.symbols.iter().zip(optimum.display_weights()) {
        lines.push(format!("  {:<14} {:>6.3}", sym, w));
    }
    lines.push(format!(
        "Expected return, volatility and Sharpe ratio: [{:.4}, {:.4}, {:.4}]",
        optimum.stats.expected_return, optimum.stats.volatility, optimum.stats.sharpe
    ));
    lines
}

pub fn print_optimal_portfolio(optimum: &OptimalPortfolio) {
    let mut sorted: Vec<(&String, f64)> =
        optimum.symbols.iter().zip(optimum.display_weights()).collect();
    sorted.sort_by(|a, b| b.1.total_cmp(&a.1));

    print_box(
        "Max-Sharpe Portfolio",
        &[
            vec![
                format!(
                    "Expected Annual Return : {:>+7.2}%",
                    optimum.stats.expected_return * 100.0
                ),
                format!("Expected Annual Vol    : {:>7.2}%", optimum.stats.volatility * 100.0),
                format!("Sharpe Ratio           : {:>7.3}", optimum.stats.sharpe),
            ],
            vec![format!("{:<14} {:>8}", "Symbol", "Weight")],
            sorted
                .into_iter()
                .map(|(sym, w)| format!("{:<14} {:>7.1}%", sym, w * 100.0))
                .collect(),
        ],
    );
}

// ──────────────────────────────────────────────────────────────────────────────
// Summary File
// ──────────────────────────────────────────────────────────────────────────────

/// Line-oriented run summary, truncated when created.
pub struct SummaryWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl SummaryWriter {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating results directory {}", parent.display()))?;
        }
        let file = File::create(path)
            .with_context(|| format!("creating summary file {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_lines(&mut self, lines: &[String]) -> Result<()> {
        for line in lines {
            writeln!(self.out, "{}", line)?;
        }
        self.out.flush()?;
        Ok(())
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Plot Export
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct SamplePoint<'a> {
    volatility: f64,
    expected_return: f64,
    sharpe: f64,
    weights: &'a [f64],
}

#[derive(Serialize)]
struct SampleExport<'a> {
    symbols: &'a [String],
    risk_free_rate: f64,
    samples: Vec<SamplePoint<'a>>,
    optimum: &'a OptimalPortfolio,
}

/// Writes the random portfolio cloud and the optimum as JSON for plotting.
pub fn export_samples_json(
    path: &Path,
    samples: &PortfolioSampleSet,
    optimum: &OptimalPortfolio,
    risk_free_rate: f64,
) -> Result<()> {
    let export = SampleExport {
        symbols: &optimum.symbols,
        risk_free_rate,
        samples: samples
            .samples
            .iter()
            .map(|s| SamplePoint {
                volatility: s.volatility,
                expected_return: s.expected_return,
                sharpe: s.sharpe(risk_free_rate),
                weights: &s.weights,
            })
            .collect(),
        optimum,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer(&mut out, &export)?;
    out.flush()?;
    info!("Exported {} portfolios to {}", samples.len(), path.display());
    Ok(())
}
