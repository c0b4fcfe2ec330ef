use crate::config::{
    DEFAULT_NUM_PORTFOLIOS, DEFAULT_RISK_FREE_RATE, SAMPLES_FILE_NAME, SUMMARY_FILE_NAME,
    TRADING_DAYS, WEIGHT_DISPLAY_DECIMALS, results_dir,
};
use crate::data::{self, DateRange};
use crate::error::{AnalysisError, Result};
use crate::optimizer::{
    ConstrainedOptimizer, EqualityConstraint, Method, Problem, ProjectedGradient, SolverConfig,
};
use crate::report::{self, SummaryWriter};
use crate::returns::{ReturnMatrix, ReturnStatistics};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

// ──────────────────────────────────────────────────────────────────────────────
// Configuration
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct SamplerConfig {
    /// Number of random portfolios to draw.
    pub num_portfolios: usize,
    /// Trading periods per year used to annualize per-period statistics.
    pub periods_per_year: f64,
    /// Annual risk-free rate subtracted in the Sharpe ratio.
    pub risk_free_rate: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            num_portfolios: DEFAULT_NUM_PORTFOLIOS,
            periods_per_year: TRADING_DAYS,
            risk_free_rate: DEFAULT_RISK_FREE_RATE,
        }
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Data Structures
// ──────────────────────────────────────────────────────────────────────────────

/// Annualized return, volatility and Sharpe ratio of one weight vector.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PortfolioStats {
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe: f64,
}

/// One randomly drawn portfolio.
#[derive(Clone, Debug, Serialize)]
pub struct PortfolioSample {
    pub weights: Vec<f64>,
    pub expected_return: f64,
    pub volatility: f64,
}

impl PortfolioSample {
    pub fn sharpe(&self, risk_free_rate: f64) -> f64 {
        sharpe_ratio(self.expected_return, self.volatility, risk_free_rate)
    }
}

/// Independently drawn portfolios; order carries no meaning.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PortfolioSampleSet {
    pub samples: Vec<PortfolioSample>,
}

impl PortfolioSampleSet {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Sample with the highest finite Sharpe ratio.
    pub fn best_by_sharpe(&self, risk_free_rate: f64) -> Option<&PortfolioSample> {
        self.samples
            .iter()
            .filter(|s| s.sharpe(risk_free_rate).is_finite())
            .max_by(|a, b| a.sharpe(risk_free_rate).total_cmp(&b.sharpe(risk_free_rate)))
    }
}

/// Max-Sharpe portfolio found by the constrained solver.
#[derive(Clone, Debug, Serialize)]
pub struct OptimalPortfolio {
    pub symbols: Vec<String>,
    /// Full-precision solver weights; see [`OptimalPortfolio::display_weights`].
    pub weights: Vec<f64>,
    pub stats: PortfolioStats,
    pub iterations: usize,
}

impl OptimalPortfolio {
    /// Weights rounded for display.
    pub fn display_weights(&self) -> Vec<f64> {
        round_weights(&self.weights, WEIGHT_DISPLAY_DECIMALS)
    }
}

pub fn round_weights(weights: &[f64], decimals: i32) -> Vec<f64> {
    let scale = 10f64.powi(decimals);
    weights.iter().map(|w| (w * scale).round() / scale).collect()
}

// ──────────────────────────────────────────────────────────────────────────────
// Portfolio Return / Variance Helpers
// ──────────────────────────────────────────────────────────────────────────────

fn portfolio_return(weights: &[f64], means: &[f64]) -> f64 {
    weights.iter().zip(means.iter()).map(|(w, r)| w * r).sum()
}

fn portfolio_variance(weights: &[f64], cov: &[Vec<f64>]) -> f64 {
    let n = weights.len();
    let mut var = 0.0;
    for i in 0..n {
        for j in 0..n {
            var += weights[i] * weights[j] * cov[i][j];
        }
    }
    var
}

fn sharpe_ratio(expected_return: f64, volatility: f64, risk_free_rate: f64) -> f64 {
    (expected_return - risk_free_rate) / volatility
}

/// Return and volatility of `weights` against already annualized statistics.
pub fn statistics(weights: &[f64], annual: &ReturnStatistics, risk_free_rate: f64) -> PortfolioStats {
    let expected_return = portfolio_return(weights, &annual.means);
    // Rounding can push a PSD quadratic form a hair below zero.
    let volatility = portfolio_variance(weights, &annual.covariance).max(0.0).sqrt();
    PortfolioStats {
        expected_return,
        volatility,
        sharpe: sharpe_ratio(expected_return, volatility, risk_free_rate),
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Sampler: Random Weight Vectors
// ──────────────────────────────────────────────────────────────────────────────

/// Draws `n` uniform(0,1) values and normalizes them by their sum.
///
/// This is a flat Dirichlet draw, which is not uniform over the simplex surface;
/// the shape of the resulting frontier cloud depends on it.
pub fn generate_random_weights<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Vec<f64> {
    loop {
        let raw: Vec<f64> = (0..n).map(|_| rng.r#gen::<f64>()).collect();
        let sum: f64 = raw.iter().sum();
        if sum > 0.0 {
            return raw.iter().map(|v| v / sum).collect();
        }
    }
}

/// Draws `config.num_portfolios` random portfolios over the assets of `returns`.
pub fn generate_portfolios<R: Rng + ?Sized>(
    returns: &ReturnMatrix,
    config: &SamplerConfig,
    rng: &mut R,
) -> Result<PortfolioSampleSet> {
    let n = returns.num_assets();
    if n < 1 {
        return Err(AnalysisError::invalid_input("at least one asset is required"));
    }
    if config.num_portfolios < 1 {
        return Err(AnalysisError::invalid_input("at least one portfolio must be drawn"));
    }
    if returns.num_observations() < 2 {
        return Err(AnalysisError::invalid_input(format!(
            "covariance needs at least 2 return observations, got {}",
            returns.num_observations()
        )));
    }

    let annual = returns.statistics()?.annualized(config.periods_per_year);

    let samples = (0..config.num_portfolios)
        .map(|_| {
            let weights = generate_random_weights(n, rng);
            let stats = statistics(&weights, &annual, config.risk_free_rate);
            PortfolioSample {
                weights,
                expected_return: stats.expected_return,
                volatility: stats.volatility,
            }
        })
        .collect();

    Ok(PortfolioSampleSet { samples })
}

// ──────────────────────────────────────────────────────────────────────────────
// Optimizer Driver: Maximum Sharpe Ratio
// ──────────────────────────────────────────────────────────────────────────────

/// Finds the max-Sharpe weights subject to `sum(w) = 1` and `0 <= w_i <= 1`.
///
/// The solver starts from the best-Sharpe sample when `samples` has one, otherwise
/// from equal weights.
pub fn optimize_portfolio(
    returns: &ReturnMatrix,
    samples: Option<&PortfolioSampleSet>,
    config: &SamplerConfig,
    solver: &dyn ConstrainedOptimizer,
) -> Result<OptimalPortfolio> {
    let n = returns.num_assets();
    if n < 1 {
        return Err(AnalysisError::invalid_input("at least one asset is required"));
    }
    let annual = returns.statistics()?.annualized(config.periods_per_year);
    let rf = config.risk_free_rate;

    let x0 = samples
        .and_then(|s| s.best_by_sharpe(rf))
        .map(|s| s.weights.clone())
        .unwrap_or_else(|| vec![1.0 / n as f64; n]);

    let problem = Problem {
        objective: Box::new(|w: &[f64]| {
            let stats = statistics(w, &annual, rf);
            if stats.volatility > 1e-12 {
                -stats.sharpe
            } else {
                f64::INFINITY
            }
        }),
        x0,
        bounds: vec![(0.0, 1.0); n],
        equality: EqualityConstraint::SumTo(1.0),
        method: Method::ProjectedGradient,
    };

    info!("Optimizing max-Sharpe portfolio over {} assets...", n);
    let solution = solver.minimize(&problem)?;
    if !solution.converged {
        return Err(AnalysisError::did_not_converge(solution.iterations, solution.message));
    }

    let stats = statistics(&solution.x, &annual, rf);
    info!(
        "Optimum after {} iterations (objective {:.6}): return={:.4}, vol={:.4}, sharpe={:.4}",
        solution.iterations, solution.fun, stats.expected_return, stats.volatility, stats.sharpe
    );

    Ok(OptimalPortfolio {
        symbols: returns.symbols().to_vec(),
        weights: solution.x,
        stats,
        iterations: solution.iterations,
    })
}

// ──────────────────────────────────────────────────────────────────────────────
// Top-Level Command: Run Portfolio Optimization
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct PortfolioOptions {
    pub symbols: Vec<String>,
    pub range: DateRange,
    pub sampler: SamplerConfig,
    pub solver: SolverConfig,
    pub seed: Option<u64>,
    /// Write the run summary under the results directory.
    pub write_summary: bool,
    /// Export the sample cloud and optimum as JSON for plotting.
    pub export_samples: Option<PathBuf>,
}

/// Full pipeline: fetch prices → returns → random portfolios → optimum → report.
pub async fn run_portfolio_optimization(options: &PortfolioOptions) -> anyhow::Result<OptimalPortfolio> {
    info!(
        "=== Markowitz Portfolio Optimizer ===\n  Assets: {:?}\n  Range: {} .. {}\n  Portfolios: {}",
        options.symbols, options.range.start, options.range.end, options.sampler.num_portfolios
    );

    let mut summary = if options.write_summary {
        let path = results_dir().join(SUMMARY_FILE_NAME);
        let mut writer = SummaryWriter::create(&path)?;
        writer.write_lines(&[
            "Markowitz Portfolio Analysis Summary".to_string(),
            "===============================".to_string(),
            format!("Stocks: {:?}", options.symbols),
            format!("Start: {}", options.range.start),
            format!("End: {}", options.range.end),
            String::new(),
        ])?;
        Some(writer)
    } else {
        None
    };

    // Step 1: Prices and returns
    let series = data::fetch_many(&options.symbols, &options.range).await?;
    let returns = ReturnMatrix::from_series(&series)?;
    info!(
        "Aligned {} assets on {} common return observations",
        returns.num_assets(),
        returns.num_observations()
    );

    let annual = returns.statistics()?.annualized(options.sampler.periods_per_year);
    report::print_return_statistics(returns.symbols(), &annual);
    if let Some(writer) = summary.as_mut() {
        writer.write_lines(&report::return_statistics_lines(returns.symbols(), &annual))?;
    }

    // Step 2: Random portfolios
    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let samples = generate_portfolios(&returns, &options.sampler, &mut rng)?;
    if let Some(best) = samples.best_by_sharpe(options.sampler.risk_free_rate) {
        info!(
            "Best of {} random portfolios: sharpe={:.4}",
            samples.len(),
            best.sharpe(options.sampler.risk_free_rate)
        );
    } else {
        warn!("No random portfolio had a finite Sharpe ratio; starting from equal weights");
    }

    // Step 3: Optimize
    let solver = ProjectedGradient::new(options.solver.clone());
    let optimum = optimize_portfolio(&returns, Some(&samples), &options.sampler, &solver)?;

    // Step 4: Report
    report::print_optimal_portfolio(&optimum);
    if let Some(writer) = summary.as_mut() {
        writer.write_lines(&report::optimal_portfolio_lines(&optimum))?;
    }
    if let Some(path) = &options.export_samples {
        report::export_samples_json(path, &samples, &optimum, options.sampler.risk_free_rate)?;
        if let Some(writer) = summary.as_mut() {
            writer.write_lines(&[format!("Saved random portfolios to: {}", path.display())])?;
        }
    }
    if let Some(writer) = summary.as_mut() {
        writer.write_lines(&["Analysis complete.".to_string()])?;
        info!("Summary written to {}", writer.path().display());
    }

    Ok(optimum)
}

/// Default export location for the sample cloud.
pub fn default_samples_path() -> PathBuf {
    results_dir().join(SAMPLES_FILE_NAME)
}

// ──────────────────────────────────────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::mock_series;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    fn mock_returns(n: usize) -> ReturnMatrix {
        let drifts = [0.0008, 0.0002, 0.0005, -0.0001, 0.0003];
        let series: Vec<_> = (0..n)
            .map(|i| mock_series(&format!("S{}", i), 250, drifts[i % drifts.len()], 100 + i as u64))
            .collect();
        ReturnMatrix::from_series(&series).unwrap()
    }

    fn config(num_portfolios: usize) -> SamplerConfig {
        SamplerConfig {
            num_portfolios,
            ..SamplerConfig::default()
        }
    }

    #[test]
    fn test_weights_sum_to_one() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            let w = generate_random_weights(5, &mut rng);
            let sum: f64 = w.iter().sum();
            assert!((sum - 1.0).abs() < 1e-10, "Weights should sum to 1.0, got {}", sum);
            assert!(w.iter().all(|&v| (0.0..=1.0).contains(&v)));
        }
    }

    #[test]
    fn test_sampler_output_invariants() {
        let returns = mock_returns(4);
        let mut rng = StdRng::seed_from_u64(7);
        let set = generate_portfolios(&returns, &config(2_000), &mut rng).unwrap();
        assert_eq!(set.len(), 2_000);
        for s in &set.samples {
            assert_eq!(s.weights.len(), 4);
            assert!((s.weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
            assert!(s.weights.iter().all(|&w| (0.0..=1.0).contains(&w)));
            assert!(s.volatility >= 0.0);
        }
    }

    #[test]
    fn test_sampler_annualizes() {
        let returns = mock_returns(2);
        let daily = returns.statistics().unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let set = generate_portfolios(&returns, &config(1), &mut rng).unwrap();
        let s = &set.samples[0];
        let expected_ret = 252.0 * portfolio_return(&s.weights, &daily.means);
        let expected_vol = (252.0 * portfolio_variance(&s.weights, &daily.covariance)).sqrt();
        assert_abs_diff_eq!(s.expected_return, expected_ret, epsilon = 1e-12);
        assert_abs_diff_eq!(s.volatility, expected_vol, epsilon = 1e-12);
    }

    #[test]
    fn test_sampler_rejects_bad_input() {
        let mut rng = StdRng::seed_from_u64(0);
        let returns = mock_returns(2);
        assert!(matches!(
            generate_portfolios(&returns, &config(0), &mut rng),
            Err(AnalysisError::InvalidInput { .. })
        ));

        let empty = ReturnMatrix::from_columns(vec![], vec![]).unwrap();
        assert!(matches!(
            generate_portfolios(&empty, &config(10), &mut rng),
            Err(AnalysisError::InvalidInput { .. })
        ));

        let short = ReturnMatrix::from_columns(vec!["A".into(), "B".into()], vec![vec![0.01], vec![0.02]]).unwrap();
        assert!(matches!(
            generate_portfolios(&short, &config(10), &mut rng),
            Err(AnalysisError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_single_asset_always_full_weight() {
        let returns = mock_returns(1);
        let mut rng = StdRng::seed_from_u64(11);
        for m in [1, 10, 500] {
            let set = generate_portfolios(&returns, &config(m), &mut rng).unwrap();
            assert!(set.samples.iter().all(|s| s.weights == vec![1.0]));
        }
        let optimum =
            optimize_portfolio(&returns, None, &config(1), &ProjectedGradient::default()).unwrap();
        assert_eq!(optimum.display_weights(), vec![1.0]);
        assert_abs_diff_eq!(optimum.weights[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_optimizer_beats_random_samples() {
        let returns = mock_returns(4);
        let mut rng = StdRng::seed_from_u64(21);
        let cfg = config(3_000);
        let set = generate_portfolios(&returns, &cfg, &mut rng).unwrap();
        let best_sample = set
            .samples
            .iter()
            .map(|s| s.sharpe(cfg.risk_free_rate))
            .filter(|v| v.is_finite())
            .fold(f64::NEG_INFINITY, f64::max);

        let optimum = optimize_portfolio(&returns, Some(&set), &cfg, &ProjectedGradient::default()).unwrap();
        assert!((optimum.weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(optimum.weights.iter().all(|&w| (0.0..=1.0).contains(&w)));
        assert!(
            optimum.stats.sharpe >= best_sample - 1e-12,
            "optimum {} below best sample {}",
            optimum.stats.sharpe,
            best_sample
        );
    }

    #[test]
    fn test_optimizer_from_equal_weights() {
        let returns = mock_returns(3);
        let cfg = config(1);
        let equal = statistics(&[1.0 / 3.0; 3], &returns.statistics().unwrap().annualized(252.0), 0.0);
        let optimum = optimize_portfolio(&returns, None, &cfg, &ProjectedGradient::default()).unwrap();
        assert!(optimum.stats.sharpe >= equal.sharpe - 1e-12);
        assert_eq!(optimum.symbols, vec!["S0", "S1", "S2"]);
    }

    #[test]
    fn test_non_convergence_surfaces_error() {
        let returns = mock_returns(3);
        let solver = ProjectedGradient::new(SolverConfig {
            max_iterations: 1,
            initial_step: 1e-3,
            ftol: 0.0,
            xtol: 0.0,
            ..SolverConfig::default()
        });
        let result = optimize_portfolio(&returns, None, &config(1), &solver);
        assert!(matches!(
            result,
            Err(AnalysisError::OptimizationDidNotConverge { iterations: 1, .. })
        ));
    }

    #[test]
    fn test_round_weights() {
        assert_eq!(round_weights(&[0.12345, 0.87655], 3), vec![0.123, 0.877]);
    }

    proptest! {
        #[test]
        fn prop_random_weights_on_simplex(n in 1usize..12, seed in any::<u64>()) {
            let mut rng = StdRng::seed_from_u64(seed);
            let w = generate_random_weights(n, &mut rng);
            prop_assert_eq!(w.len(), n);
            prop_assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-9);
            prop_assert!(w.iter().all(|&v| (0.0..=1.0).contains(&v)));
        }
    }
}
