use super::{checked_product, MarketSnapshot, PricedPosition, PricingStrategy};
use crate::catalog::{ContractTerms, Instrument, InstrumentKind, OptionKind, OptionTerms};
use crate::error::{MarketField, PricingError};
use crate::types::{Sensitivities, Timestamp};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use std::f64::consts::PI;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Per-unit first-order greeks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Greeks {
    pub delta: f64,
    /// Sensitivity to a unit (1.0 = 100 vol points) change in volatility
    pub vega: f64,
}

/// Black–Scholes closed form for European options on a non-dividend-paying underlying
#[derive(Debug, Clone, Copy)]
pub struct BlackScholesModel {
    pub spot: f64,
    pub strike: f64,
    /// Time to expiry in years
    pub time_to_expiry: f64,
    /// Continuously-compounded risk-free rate
    pub rate: f64,
    pub volatility: f64,
}

impl BlackScholesModel {
    fn d1_d2(&self) -> (f64, f64) {
        let vol_sqrt_t = self.volatility * self.time_to_expiry.sqrt();
        let d1 = ((self.spot / self.strike).ln()
            + (self.rate + 0.5 * self.volatility * self.volatility) * self.time_to_expiry)
            / vol_sqrt_t;
        (d1, d1 - vol_sqrt_t)
    }

    pub fn price(&self, kind: OptionKind) -> f64 {
        let (d1, d2) = self.d1_d2();
        let discount = (-self.rate * self.time_to_expiry).exp();
        match kind {
            OptionKind::Call => self.spot * norm_cdf(d1) - self.strike * discount * norm_cdf(d2),
            OptionKind::Put => self.strike * discount * norm_cdf(-d2) - self.spot * norm_cdf(-d1),
        }
    }

    pub fn greeks(&self, kind: OptionKind) -> Greeks {
        let (d1, _) = self.d1_d2();
        let delta = match kind {
            OptionKind::Call => norm_cdf(d1),
            OptionKind::Put => norm_cdf(d1) - 1.0,
        };
        Greeks { delta, vega: self.spot * norm_pdf(d1) * self.time_to_expiry.sqrt() }
    }
}

/// Standard normal CDF
fn norm_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / 2.0_f64.sqrt()))
}

/// Standard normal density
fn norm_pdf(x: f64) -> f64 {
    (-(x * x) / 2.0).exp() / (2.0 * PI).sqrt()
}

/// Abramowitz & Stegun 7.1.26, max error 1.5e-7
fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();

    sign * y
}

/// Option strategy backed by [`BlackScholesModel`]
#[derive(Debug, Clone, Copy)]
pub struct BlackScholesStrategy {
    day_count_basis: f64,
    price_scale: u32,
}

impl BlackScholesStrategy {
    pub fn new(day_count_basis: f64, price_scale: u32) -> Self {
        Self { day_count_basis, price_scale }
    }

    fn year_fraction(&self, from: Timestamp, to: Timestamp) -> f64 {
        (to - from).num_milliseconds() as f64 / (self.day_count_basis * MILLIS_PER_DAY)
    }

    fn round(&self, value: Decimal) -> Decimal {
        value.round_dp_with_strategy(self.price_scale, RoundingStrategy::MidpointAwayFromZero)
    }

    fn intrinsic(&self, terms: &OptionTerms, spot: Decimal) -> Result<Decimal, PricingError> {
        let payoff = match terms.kind {
            OptionKind::Call => spot.checked_sub(terms.strike),
            OptionKind::Put => terms.strike.checked_sub(spot),
        }
        .ok_or_else(|| PricingError::InvalidContractTerms(format!("intrinsic value at spot {spot} overflows")))?;
        Ok(self.round(payoff.max(Decimal::ZERO)))
    }
}

impl PricingStrategy for BlackScholesStrategy {
    fn kind(&self) -> InstrumentKind {
        InstrumentKind::Option
    }

    fn price(
        &self,
        instrument: &Instrument,
        quantity: Decimal,
        market: &MarketSnapshot,
    ) -> Result<PricedPosition, PricingError> {
        let terms = match &instrument.terms {
            ContractTerms::Option(terms) => terms,
            _ => {
                return Err(PricingError::InvalidContractTerms(format!(
                    "{} is not an option",
                    instrument.instrument_id
                )))
            }
        };
        if terms.strike <= Decimal::ZERO {
            return Err(PricingError::InvalidContractTerms(format!(
                "strike must be positive, got {}",
                terms.strike
            )));
        }
        if terms.multiplier <= Decimal::ZERO {
            return Err(PricingError::InvalidContractTerms(format!(
                "multiplier must be positive, got {}",
                terms.multiplier
            )));
        }

        let underlying = market.underlying.as_ref().ok_or_else(|| PricingError::MissingMarketData {
            instrument_id: terms.underlying_id.clone(),
            field: MarketField::Price,
        })?;
        let valuation_time = market.valuation_time().unwrap_or(underlying.as_of);
        let as_of = market.as_of().unwrap_or(valuation_time);
        let units = checked_product(quantity, terms.multiplier)?;

        let time_to_expiry = self.year_fraction(valuation_time, terms.expiry);
        if time_to_expiry <= 0.0 {
            let unit_intrinsic = self.intrinsic(terms, underlying.price)?;
            return Err(PricingError::ExpiredContract {
                intrinsic_value: checked_product(unit_intrinsic, units)?,
                unit_intrinsic,
            });
        }

        let volatility = market
            .own
            .as_ref()
            .and_then(|quote| quote.implied_volatility)
            .or(underlying.implied_volatility)
            .ok_or_else(|| PricingError::MissingMarketData {
                instrument_id: instrument.instrument_id.clone(),
                field: MarketField::ImpliedVolatility,
            })?;
        if !volatility.is_finite() || volatility <= 0.0 {
            return Err(PricingError::InvalidContractTerms(format!(
                "volatility must be positive, got {volatility}"
            )));
        }

        let rate = market.rate.as_ref().ok_or_else(|| PricingError::MissingMarketData {
            instrument_id: instrument.instrument_id.clone(),
            field: MarketField::RiskFreeRate,
        })?;

        let spot = underlying.price.to_f64().unwrap_or(0.0);
        if spot <= 0.0 {
            return Err(PricingError::InvalidContractTerms(format!(
                "underlying price must be positive, got {}",
                underlying.price
            )));
        }

        let model = BlackScholesModel {
            spot,
            strike: terms.strike.to_f64().unwrap_or(0.0),
            time_to_expiry,
            rate: rate.price.to_f64().unwrap_or(0.0),
            volatility,
        };
        let unit_price = Decimal::from_f64(model.price(terms.kind))
            .map(|price| self.round(price))
            .ok_or_else(|| {
                PricingError::InvalidContractTerms(format!(
                    "model price for {} is not finite",
                    instrument.instrument_id
                ))
            })?;
        let greeks = model.greeks(terms.kind);
        let units_f64 = units.to_f64().unwrap_or(0.0);

        Ok(PricedPosition {
            market_value: checked_product(unit_price, units)?,
            unit_price,
            sensitivities: Sensitivities { delta: greeks.delta * units_f64, vega: greeks.vega * units_f64 },
            as_of,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Quote;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;

    fn quote(id: &str, price: Decimal, vol: Option<f64>, as_of: Timestamp) -> Option<Arc<Quote>> {
        Some(Arc::new(Quote { instrument_id: id.to_string(), price, implied_volatility: vol, as_of }))
    }

    fn option(kind: OptionKind, strike: i64, expiry: Timestamp) -> Instrument {
        Instrument {
            instrument_id: "AAPL-OPT".to_string(),
            terms: ContractTerms::Option(OptionTerms {
                underlying_id: "AAPL".to_string(),
                strike: Decimal::from(strike),
                expiry,
                kind,
                multiplier: Decimal::from(100),
            }),
            version: 1,
        }
    }

    fn market(spot: i64, vol: Option<f64>, now: Timestamp) -> MarketSnapshot {
        MarketSnapshot {
            own: None,
            underlying: quote("AAPL", Decimal::from(spot), vol, now),
            rate: quote("USD-RFR", Decimal::new(2, 2), None, Timestamp::MIN_UTC),
        }
    }

    #[test]
    fn test_model_reference_values() {
        let model =
            BlackScholesModel { spot: 100.0, strike: 100.0, time_to_expiry: 1.0, rate: 0.05, volatility: 0.2 };
        assert!((model.price(OptionKind::Call) - 10.4506).abs() < 1e-3);
        assert!((model.price(OptionKind::Put) - 5.5735).abs() < 1e-3);

        let call = model.greeks(OptionKind::Call);
        let put = model.greeks(OptionKind::Put);
        assert!((call.delta - put.delta - 1.0).abs() < 1e-9);
        assert!((call.vega - 37.524).abs() < 1e-2);
        assert_eq!(call.vega, put.vega);
    }

    #[test]
    fn test_put_call_parity() {
        let model =
            BlackScholesModel { spot: 151.0, strike: 150.0, time_to_expiry: 0.25, rate: 0.02, volatility: 0.25 };
        let lhs = model.price(OptionKind::Call) - model.price(OptionKind::Put);
        let rhs = 151.0 - 150.0 * (-0.02_f64 * 0.25).exp();
        assert!((lhs - rhs).abs() < 1e-5);
    }

    #[test]
    fn test_strategy_call_and_put() {
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 15, 0, 0).unwrap();
        let strategy = BlackScholesStrategy::new(365.0, 4);
        let market = market(151, Some(0.25), now);

        let call = strategy
            .price(&option(OptionKind::Call, 150, now + Duration::days(30)), Decimal::ONE, &market)
            .unwrap();
        let unit_delta = call.sensitivities.delta / 100.0;
        assert!(unit_delta > 0.0 && unit_delta < 1.0);
        assert!(call.sensitivities.vega > 0.0);
        assert_eq!(call.market_value, call.unit_price * Decimal::from(100));
        assert_eq!(call.unit_price.round_dp(4), call.unit_price);
        assert_eq!(call.as_of, now);

        let put = strategy
            .price(&option(OptionKind::Put, 150, now + Duration::days(30)), Decimal::from(-2), &market)
            .unwrap();
        let unit_delta = put.sensitivities.delta / -200.0;
        assert!(unit_delta > -1.0 && unit_delta < 0.0);
        assert!(put.market_value < Decimal::ZERO);
    }

    #[test]
    fn test_strategy_missing_volatility() {
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 15, 0, 0).unwrap();
        let strategy = BlackScholesStrategy::new(365.0, 4);
        let err = strategy
            .price(&option(OptionKind::Call, 150, now + Duration::days(30)), Decimal::ONE, &market(151, None, now))
            .unwrap_err();
        assert_eq!(
            err,
            PricingError::MissingMarketData {
                instrument_id: "AAPL-OPT".to_string(),
                field: MarketField::ImpliedVolatility
            }
        );
    }

    #[test]
    fn test_own_volatility_preferred() {
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 15, 0, 0).unwrap();
        let strategy = BlackScholesStrategy::new(365.0, 4);
        let instrument = option(OptionKind::Call, 150, now + Duration::days(30));

        let low = strategy.price(&instrument, Decimal::ONE, &market(151, Some(0.2), now)).unwrap();
        let mut with_own = market(151, Some(0.2), now);
        with_own.own = quote("AAPL-OPT", Decimal::from(5), Some(0.4), now);
        let high = strategy.price(&instrument, Decimal::ONE, &with_own).unwrap();
        assert!(high.unit_price > low.unit_price);
    }

    #[test]
    fn test_strategy_invalid_terms() {
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 15, 0, 0).unwrap();
        let strategy = BlackScholesStrategy::new(365.0, 4);

        let err = strategy
            .price(&option(OptionKind::Call, 0, now + Duration::days(30)), Decimal::ONE, &market(151, Some(0.25), now))
            .unwrap_err();
        assert!(matches!(err, PricingError::InvalidContractTerms(_)));

        let err = strategy
            .price(&option(OptionKind::Call, 150, now + Duration::days(30)), Decimal::ONE, &market(151, Some(0.0), now))
            .unwrap_err();
        assert!(matches!(err, PricingError::InvalidContractTerms(_)));
    }

    #[test]
    fn test_expired_contract_values_intrinsic() {
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 15, 0, 0).unwrap();
        let strategy = BlackScholesStrategy::new(365.0, 4);

        let err = strategy
            .price(&option(OptionKind::Call, 150, now), Decimal::from(2), &market(155, Some(0.25), now))
            .unwrap_err();
        assert_eq!(
            err,
            PricingError::ExpiredContract { intrinsic_value: Decimal::from(1000), unit_intrinsic: Decimal::from(5) }
        );

        let err = strategy
            .price(&option(OptionKind::Put, 150, now - Duration::days(1)), Decimal::ONE, &market(155, Some(0.25), now))
            .unwrap_err();
        assert_eq!(err, PricingError::ExpiredContract { intrinsic_value: Decimal::ZERO, unit_intrinsic: Decimal::ZERO });
    }

    #[test]
    fn test_overflowing_quantity_is_a_pricing_failure() {
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 15, 0, 0).unwrap();
        let strategy = BlackScholesStrategy::new(365.0, 4);
        let huge = Decimal::MAX / Decimal::from(10);

        let err = strategy
            .price(&option(OptionKind::Call, 150, now + Duration::days(30)), huge, &market(151, Some(0.25), now))
            .unwrap_err();
        assert!(matches!(err, PricingError::InvalidContractTerms(_)));

        let err = strategy
            .price(&option(OptionKind::Call, 150, now), huge, &market(155, Some(0.25), now))
            .unwrap_err();
        assert!(matches!(err, PricingError::InvalidContractTerms(_)));
    }
}
