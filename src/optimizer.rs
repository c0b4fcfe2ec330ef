//! Constrained minimization behind a small solver interface.
//!
//! Callers describe a [`Problem`] (objective, initial guess, box bounds and one
//! linear budget constraint) and hand it to any [`ConstrainedOptimizer`]. The
//! bundled [`ProjectedGradient`] solver handles exactly this constraint shape.

use crate::config::{
    SOLVER_FTOL, SOLVER_GRADIENT_EPS, SOLVER_INITIAL_STEP, SOLVER_MAX_ITERATIONS, SOLVER_XTOL,
};
use crate::error::{AnalysisError, Result};
use tracing::debug;

pub type Objective<'a> = Box<dyn Fn(&[f64]) -> f64 + 'a>;

/// Equality constraint on the decision vector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EqualityConstraint {
    /// `sum(x) - budget = 0`
    SumTo(f64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    ProjectedGradient,
}

pub struct Problem<'a> {
    pub objective: Objective<'a>,
    pub x0: Vec<f64>,
    pub bounds: Vec<(f64, f64)>,
    pub equality: EqualityConstraint,
    pub method: Method,
}

#[derive(Clone, Debug)]
pub struct Solution {
    pub x: Vec<f64>,
    pub converged: bool,
    pub fun: f64,
    pub iterations: usize,
    pub message: String,
}

pub trait ConstrainedOptimizer {
    /// Minimizes `problem.objective`. An ill-posed problem is an error; a solver
    /// that runs out of budget returns `converged: false`.
    fn minimize(&self, problem: &Problem<'_>) -> Result<Solution>;
}

#[derive(Clone, Debug)]
pub struct SolverConfig {
    pub max_iterations: usize,
    pub ftol: f64,
    pub xtol: f64,
    pub initial_step: f64,
    pub gradient_eps: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: SOLVER_MAX_ITERATIONS,
            ftol: SOLVER_FTOL,
            xtol: SOLVER_XTOL,
            initial_step: SOLVER_INITIAL_STEP,
            gradient_eps: SOLVER_GRADIENT_EPS,
        }
    }
}

/// Euclidean projection onto `{x : lo_i <= x_i <= hi_i, sum(x) = budget}`.
///
/// The projection is `x_i = clamp(v_i - tau, lo_i, hi_i)` for the `tau` that meets
/// the budget; `tau` is bracketed by bisection, then solved exactly on the free
/// coordinates.
pub fn project_onto_budget(v: &[f64], bounds: &[(f64, f64)], budget: f64) -> Vec<f64> {
    let place = |tau: f64| -> Vec<f64> {
        v.iter()
            .zip(bounds)
            .map(|(&vi, &(lo, hi))| (vi - tau).clamp(lo, hi))
            .collect()
    };
    let total = |x: &[f64]| x.iter().sum::<f64>();

    let mut tau_lo = v
        .iter()
        .zip(bounds)
        .map(|(&vi, &(_, hi))| vi - hi)
        .fold(f64::INFINITY, f64::min);
    let mut tau_hi = v
        .iter()
        .zip(bounds)
        .map(|(&vi, &(lo, _))| vi - lo)
        .fold(f64::NEG_INFINITY, f64::max);

    for _ in 0..200 {
        let mid = 0.5 * (tau_lo + tau_hi);
        if mid <= tau_lo || mid >= tau_hi {
            break;
        }
        if total(&place(mid)) > budget {
            tau_lo = mid;
        } else {
            tau_hi = mid;
        }
    }

    let tau = 0.5 * (tau_lo + tau_hi);
    let mut x = place(tau);

    // Exact solve on the coordinates strictly inside their bounds.
    let free: Vec<usize> = (0..x.len())
        .filter(|&i| x[i] > bounds[i].0 && x[i] < bounds[i].1)
        .collect();
    if !free.is_empty() {
        let pinned: f64 = (0..x.len())
            .filter(|i| !free.contains(i))
            .map(|i| x[i])
            .sum();
        let free_v: f64 = free.iter().map(|&i| v[i]).sum();
        let tau_exact = (free_v - (budget - pinned)) / free.len() as f64;
        for &i in &free {
            x[i] = (v[i] - tau_exact).clamp(bounds[i].0, bounds[i].1);
        }
    }
    x
}

fn numerical_gradient(f: &dyn Fn(&[f64]) -> f64, x: &[f64], eps: f64) -> Vec<f64> {
    let mut probe = x.to_vec();
    (0..x.len())
        .map(|i| {
            let orig = probe[i];
            probe[i] = orig + eps;
            let up = f(&probe);
            probe[i] = orig - eps;
            let down = f(&probe);
            probe[i] = orig;
            let g = (up - down) / (2.0 * eps);
            if g.is_finite() { g } else { 0.0 }
        })
        .collect()
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
}

/// Projected gradient descent with Armijo backtracking and central-difference gradients.
#[derive(Clone, Debug, Default)]
pub struct ProjectedGradient {
    pub config: SolverConfig,
}

impl ProjectedGradient {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    fn validate(problem: &Problem<'_>) -> Result<f64> {
        if problem.method != Method::ProjectedGradient {
            return Err(AnalysisError::invalid_input(format!(
                "unsupported method {:?}",
                problem.method
            )));
        }
        if problem.x0.is_empty() {
            return Err(AnalysisError::invalid_input("empty initial guess"));
        }
        if problem.x0.len() != problem.bounds.len() {
            return Err(AnalysisError::invalid_input(format!(
                "initial guess has {} entries but {} bounds were given",
                problem.x0.len(),
                problem.bounds.len()
            )));
        }
        if let Some((lo, hi)) = problem.bounds.iter().find(|(lo, hi)| !(lo <= hi)) {
            return Err(AnalysisError::invalid_input(format!(
                "invalid bound [{}, {}]",
                lo, hi
            )));
        }
        let EqualityConstraint::SumTo(budget) = problem.equality;
        let min_sum: f64 = problem.bounds.iter().map(|b| b.0).sum();
        let max_sum: f64 = problem.bounds.iter().map(|b| b.1).sum();
        if !(min_sum <= budget && budget <= max_sum) {
            return Err(AnalysisError::invalid_input(format!(
                "budget {} unreachable within bounds (sum range [{}, {}])",
                budget, min_sum, max_sum
            )));
        }
        Ok(budget)
    }
}

impl ConstrainedOptimizer for ProjectedGradient {
    fn minimize(&self, problem: &Problem<'_>) -> Result<Solution> {
        let budget = Self::validate(problem)?;
        let cfg = &self.config;
        let f = problem.objective.as_ref();
        let project = |v: &[f64]| project_onto_budget(v, &problem.bounds, budget);

        let mut x = project(&problem.x0);
        let mut fx = f(&x);
        if !fx.is_finite() {
            return Err(AnalysisError::invalid_input(
                "objective is not finite at the initial guess",
            ));
        }

        let mut step = cfg.initial_step;
        for iteration in 1..=cfg.max_iterations {
            let grad = numerical_gradient(f, &x, cfg.gradient_eps);

            let accepted = loop {
                let target: Vec<f64> = x.iter().zip(&grad).map(|(xi, gi)| xi - step * gi).collect();
                let candidate = project(&target);
                let moved = distance(&candidate, &x);
                if moved < cfg.xtol {
                    break None;
                }
                let fc = f(&candidate);
                if fc.is_finite() && fc <= fx - 1e-4 / step * moved * moved {
                    break Some((candidate, fc, moved));
                }
                step *= 0.5;
                if step < 1e-16 {
                    break None;
                }
            };

            let Some((candidate, fc, moved)) = accepted else {
                debug!("Solver stationary after {} iterations (f={:.6})", iteration, fx);
                return Ok(Solution {
                    x,
                    converged: true,
                    fun: fx,
                    iterations: iteration,
                    message: "projected gradient step below tolerance".to_string(),
                });
            };

            let improvement = fx - fc;
            x = candidate;
            fx = fc;
            step = (step * 2.0).min(1e3);

            if improvement < cfg.ftol * fx.abs().max(1.0) {
                debug!(
                    "Solver converged after {} iterations (f={:.6}, last move {:.2e})",
                    iteration, fx, moved
                );
                return Ok(Solution {
                    x,
                    converged: true,
                    fun: fx,
                    iterations: iteration,
                    message: "objective change below tolerance".to_string(),
                });
            }
        }

        Ok(Solution {
            x,
            converged: false,
            fun: fx,
            iterations: cfg.max_iterations,
            message: "iteration limit reached".to_string(),
        })
    }
}
