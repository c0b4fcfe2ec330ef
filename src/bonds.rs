//! Present values of plain bonds with annual compounding or continuous discounting.

use crate::error::{AnalysisError, Result};

fn validate(principal: f64, rate: f64) -> Result<()> {
    if !(principal.is_finite() && principal > 0.0) {
        return Err(AnalysisError::invalid_input(format!(
            "principal must be positive, got {}",
            principal
        )));
    }
    if !(rate.is_finite() && rate > -1.0) {
        return Err(AnalysisError::invalid_input(format!(
            "rate must be greater than -100%, got {}",
            rate
        )));
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ZeroCouponBond {
    principal: f64,
    maturity: u32,
    rate: f64,
}

impl ZeroCouponBond {
    pub fn new(principal: f64, maturity: u32, rate: f64) -> Result<Self> {
        validate(principal, rate)?;
        Ok(Self { principal, maturity, rate })
    }

    pub fn maturity(&self) -> u32 {
        self.maturity
    }

    /// `P / (1 + r)^period`
    pub fn present_value(&self, period: u32) -> f64 {
        self.principal / (1.0 + self.rate).powi(period as i32)
    }

    /// `P * e^(-r * period)`
    pub fn present_value_continuous(&self, period: u32) -> f64 {
        self.principal * (-self.rate * period as f64).exp()
    }

    /// Price today, discounting over the full maturity.
    pub fn price(&self) -> f64 {
        self.present_value(self.maturity)
    }
}

/// Bond paying `principal * coupon_rate` at the end of each year plus the
/// principal at maturity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CouponBond {
    principal: f64,
    maturity: u32,
    rate: f64,
    coupon_rate: f64,
}

impl CouponBond {
    pub fn new(principal: f64, maturity: u32, rate: f64, coupon_rate: f64) -> Result<Self> {
        validate(principal, rate)?;
        if !(coupon_rate.is_finite() && coupon_rate >= 0.0) {
            return Err(AnalysisError::invalid_input(format!(
                "coupon rate must be non-negative, got {}",
                coupon_rate
            )));
        }
        Ok(Self {
            principal,
            maturity,
            rate,
            coupon_rate,
        })
    }

    pub fn maturity(&self) -> u32 {
        self.maturity
    }

    fn coupon(&self) -> f64 {
        self.principal * self.coupon_rate
    }

    pub fn present_value(&self, period: u32) -> f64 {
        let discount = |t: u32| (1.0 + self.rate).powi(t as i32);
        let coupons: f64 = (1..=period).map(|t| self.coupon() / discount(t)).sum();
        coupons + self.principal / discount(period)
    }

    pub fn present_value_continuous(&self, period: u32) -> f64 {
        let discount = |t: u32| (-self.rate * t as f64).exp();
        let coupons: f64 = (1..=period).map(|t| self.coupon() * discount(t)).sum();
        coupons + self.principal * discount(period)
    }

    pub fn price(&self) -> f64 {
        self.present_value(self.maturity)
    }
}
