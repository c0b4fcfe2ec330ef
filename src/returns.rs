use crate::data::PriceSeries;
use crate::error::{AnalysisError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Log returns of consecutive prices: `ln(p[i+1] / p[i])`.
///
/// The first observation only anchors the first return. Non-positive prices yield
/// non-finite entries here; statistics reject them later.
pub fn log_returns(prices: &[f64]) -> Result<Vec<f64>> {
    if prices.len() < 2 {
        return Err(AnalysisError::insufficient_data(2, prices.len()));
    }
    Ok(prices.windows(2).map(|w| (w[1] / w[0]).ln()).collect())
}

fn ensure_finite(context: &str, values: &[f64]) -> Result<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(i) => Err(AnalysisError::invalid_input(format!(
            "{}: non-finite return at index {} (non-positive price in the source series?)",
            context, i
        ))),
        None => Ok(()),
    }
}

fn mean_of(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Log-return series for one instrument.
#[derive(Clone, Debug)]
pub struct ReturnSeries {
    symbol: String,
    values: Vec<f64>,
}

impl ReturnSeries {
    pub fn from_prices(series: &PriceSeries) -> Result<Self> {
        Ok(Self {
            symbol: series.symbol().to_string(),
            values: log_returns(&series.prices())?,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    #[cfg(test)]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn mean(&self) -> Result<f64> {
        if self.values.is_empty() {
            return Err(AnalysisError::insufficient_data(1, 0));
        }
        ensure_finite(&self.symbol, &self.values)?;
        Ok(mean_of(&self.values))
    }

    /// Sample standard deviation (n − 1 denominator).
    pub fn std_dev(&self) -> Result<f64> {
        let n = self.values.len();
        if n < 2 {
            return Err(AnalysisError::insufficient_data(2, n));
        }
        ensure_finite(&self.symbol, &self.values)?;
        let mean = mean_of(&self.values);
        let variance = self.values.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0);
        Ok(variance.sqrt())
    }
}

/// Per-period mean returns and sample covariance across assets.
#[derive(Clone, Debug, PartialEq)]
pub struct ReturnStatistics {
    pub means: Vec<f64>,
    pub covariance: Vec<Vec<f64>>,
}

impl ReturnStatistics {
    pub fn num_assets(&self) -> usize {
        self.means.len()
    }

    /// Scales means and covariance by `periods_per_year`.
    pub fn annualized(&self, periods_per_year: f64) -> Self {
        Self {
            means: self.means.iter().map(|m| m * periods_per_year).collect(),
            covariance: self
                .covariance
                .iter()
                .map(|row| row.iter().map(|c| c * periods_per_year).collect())
                .collect(),
        }
    }
}

/// Log returns of several assets over a shared set of timestamps.
#[derive(Clone, Debug)]
pub struct ReturnMatrix {
    symbols: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl ReturnMatrix {
    /// Aligns the series on the timestamps they all share, then takes log returns.
    pub fn from_series(series: &[PriceSeries]) -> Result<Self> {
        if series.is_empty() {
            return Err(AnalysisError::invalid_input("no price series to align"));
        }
        if let Some(empty) = series.iter().find(|s| s.is_empty()) {
            return Err(AnalysisError::no_data(empty.symbol()));
        }

        let mut common: HashSet<DateTime<Utc>> =
            series[0].points().iter().map(|p| p.date).collect();
        for s in &series[1..] {
            let dates: HashSet<DateTime<Utc>> = s.points().iter().map(|p| p.date).collect();
            common.retain(|d| dates.contains(d));
        }

        let symbols = series.iter().map(|s| s.symbol().to_string()).collect();
        let columns = series
            .iter()
            .map(|s| {
                let aligned: Vec<f64> = s
                    .points()
                    .iter()
                    .filter(|p| common.contains(&p.date))
                    .map(|p| p.price)
                    .collect();
                log_returns(&aligned)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { symbols, columns })
    }

    #[cfg(test)]
    pub fn from_columns(symbols: Vec<String>, columns: Vec<Vec<f64>>) -> Result<Self> {
        if symbols.len() != columns.len() {
            return Err(AnalysisError::invalid_input(format!(
                "{} symbols but {} return columns",
                symbols.len(),
                columns.len()
            )));
        }
        if let Some(first) = columns.first() {
            if columns.iter().any(|c| c.len() != first.len()) {
                return Err(AnalysisError::invalid_input(
                    "return columns must have equal length",
                ));
            }
        }
        Ok(Self { symbols, columns })
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn columns(&self) -> &[Vec<f64>] {
        &self.columns
    }

    pub fn num_assets(&self) -> usize {
        self.columns.len()
    }

    pub fn num_observations(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    /// Mean per column and the sample covariance matrix (n − 1 denominator).
    pub fn statistics(&self) -> Result<ReturnStatistics> {
        let n_obs = self.num_observations();
        if n_obs < 2 {
            return Err(AnalysisError::insufficient_data(2, n_obs));
        }
        for (symbol, column) in self.symbols.iter().zip(&self.columns) {
            ensure_finite(symbol, column)?;
        }

        let n = self.columns.len();
        let means: Vec<f64> = self.columns.iter().map(|c| mean_of(c)).collect();

        let mut cov = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in i..n {
                let sum: f64 = self.columns[i]
                    .iter()
                    .zip(&self.columns[j])
                    .map(|(a, b)| (a - means[i]) * (b - means[j]))
                    .sum();
                let covariance = sum / (n_obs as f64 - 1.0);
                cov[i][j] = covariance;
                cov[j][i] = covariance;
            }
        }

        Ok(ReturnStatistics {
            means,
            covariance: cov,
        })
    }
}
