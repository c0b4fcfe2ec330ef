//! Time value of money with discrete and continuous compounding.
//!
//! Rates are annual decimals (0.05 = 5%) and time is in years.

use crate::error::{AnalysisError, Result};

fn check_amount(value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(AnalysisError::invalid_input(format!("amount must be finite, got {}", value)))
    }
}

fn check_time(time: f64) -> Result<()> {
    if time.is_finite() && time >= 0.0 {
        Ok(())
    } else {
        Err(AnalysisError::invalid_input(format!("time must be non-negative, got {}", time)))
    }
}

fn check_discrete_rate(rate: f64) -> Result<()> {
    if rate.is_finite() && rate > -1.0 {
        Ok(())
    } else {
        Err(AnalysisError::invalid_input(format!(
            "discrete rate must be greater than -100%, got {}",
            rate
        )))
    }
}

fn check_continuous_rate(rate: f64) -> Result<()> {
    if rate.is_finite() {
        Ok(())
    } else {
        Err(AnalysisError::invalid_input(format!("rate must be finite, got {}", rate)))
    }
}

/// `pv * (1 + r)^t`
pub fn future_discrete_value(present_value: f64, rate: f64, time: f64) -> Result<f64> {
    check_amount(present_value)?;
    check_discrete_rate(rate)?;
    check_time(time)?;
    Ok(present_value * (1.0 + rate).powf(time))
}

/// `pv * e^(r t)`
pub fn future_continuous_value(present_value: f64, rate: f64, time: f64) -> Result<f64> {
    check_amount(present_value)?;
    check_continuous_rate(rate)?;
    check_time(time)?;
    Ok(present_value * (rate * time).exp())
}

/// `fv / (1 + r)^t`
pub fn present_discrete_value(future_value: f64, rate: f64, time: f64) -> Result<f64> {
    check_amount(future_value)?;
    check_discrete_rate(rate)?;
    check_time(time)?;
    Ok(future_value / (1.0 + rate).powf(time))
}

/// `fv * e^(-r t)`
pub fn present_continuous_value(future_value: f64, rate: f64, time: f64) -> Result<f64> {
    check_amount(future_value)?;
    check_continuous_rate(rate)?;
    check_time(time)?;
    Ok(future_value * (-rate * time).exp())
}

/// Both compounding conventions for one cash amount, compounded forward and
/// discounted back.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FutureValues {
    pub present_value: f64,
    pub rate: f64,
    pub time: f64,
    pub discrete: f64,
    pub continuous: f64,
    /// Value today of the same amount received after `time` years.
    pub discounted_discrete: f64,
    pub discounted_continuous: f64,
}

pub fn future_values(present_value: f64, rate: f64, time: f64) -> Result<FutureValues> {
    Ok(FutureValues {
        present_value,
        rate,
        time,
        discrete: future_discrete_value(present_value, rate, time)?,
        continuous: future_continuous_value(present_value, rate, time)?,
        discounted_discrete: present_discrete_value(present_value, rate, time)?,
        discounted_continuous: present_continuous_value(present_value, rate, time)?,
    })
}
