use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::CalcError;

/// One rung of the duration-based discount ladder: rentals of at least
/// `min_days` earn `percent` off the undiscounted total.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountTier {
    pub min_days: u32,
    pub percent: Decimal,
}

/// Data-driven rental pricing. Tier boundaries and percentages come from
/// configuration, so the policy is testable without any model in the loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RatePolicy {
    tiers: Vec<DiscountTier>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentalQuote {
    pub base_rate: Decimal,
    pub duration_days: u32,
    pub discount_percent: Decimal,
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub total: Decimal,
}

impl RatePolicy {
    /// Tiers must carry non-decreasing percentages as duration grows;
    /// anything else silently inverts the "longer is cheaper per day"
    /// promise made to customers.
    pub fn new(mut tiers: Vec<DiscountTier>) -> Result<Self, CalcError> {
        tiers.sort_by_key(|tier| tier.min_days);

        let hundred = Decimal::from(100u32);
        let mut previous = Decimal::ZERO;
        for tier in &tiers {
            if tier.percent < Decimal::ZERO || tier.percent > hundred {
                return Err(CalcError::InvalidArgument(format!(
                    "discount percent {} for tier >= {} days is outside 0..=100",
                    tier.percent, tier.min_days
                )));
            }
            if tier.percent < previous {
                return Err(CalcError::InvalidArgument(format!(
                    "discount must not decrease with duration (tier >= {} days drops to {})",
                    tier.min_days, tier.percent
                )));
            }
            previous = tier.percent;
        }

        Ok(Self { tiers })
    }

    /// Default ladder: 7+ days 10 %, 14+ days 15 %, 30+ days 20 %.
    pub fn standard() -> Self {
        Self {
            tiers: vec![
                DiscountTier { min_days: 7, percent: Decimal::from(10u32) },
                DiscountTier { min_days: 14, percent: Decimal::from(15u32) },
                DiscountTier { min_days: 30, percent: Decimal::from(20u32) },
            ],
        }
    }

    pub fn discount_for(&self, duration_days: u32) -> Decimal {
        self.tiers
            .iter()
            .rev()
            .find(|tier| duration_days >= tier.min_days)
            .map(|tier| tier.percent)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn quote(&self, base_rate: Decimal, duration_days: u32) -> Result<RentalQuote, CalcError> {
        if duration_days == 0 {
            return Err(CalcError::InvalidArgument(
                "rental duration must be at least one day".to_string(),
            ));
        }
        if base_rate <= Decimal::ZERO {
            return Err(CalcError::InvalidArgument(format!(
                "base rate must be positive, got {base_rate}"
            )));
        }

        let discount_percent = self.discount_for(duration_days);
        let subtotal = base_rate * Decimal::from(duration_days);
        let discount_amount = subtotal * discount_percent / Decimal::from(100u32);
        let total = subtotal - discount_amount;

        Ok(RentalQuote { base_rate, duration_days, discount_percent, subtotal, discount_amount, total })
    }
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{DiscountTier, RatePolicy};
    use crate::calc::CalcError;

    fn rate(value: i64) -> Decimal {
        Decimal::from(value)
    }

    #[test]
    fn quote_applies_formula_across_tier_boundaries() {
        let policy = RatePolicy::standard();

        let cases: &[(u32, i64)] = &[(1, 0), (6, 0), (7, 10), (13, 10), (14, 15), (29, 15), (30, 20), (45, 20)];
        for (days, expected_pct) in cases {
            let quote = policy.quote(rate(500), *days).expect("valid quote");
            assert_eq!(quote.discount_percent, Decimal::from(*expected_pct), "{days} days");

            let subtotal = rate(500) * Decimal::from(*days);
            let expected_total =
                subtotal - subtotal * Decimal::from(*expected_pct) / Decimal::from(100u32);
            assert_eq!(quote.total, expected_total, "{days} days");
        }
    }

    #[test]
    fn ten_day_rental_earns_ten_percent() {
        let quote = RatePolicy::standard().quote(rate(800), 10).expect("valid quote");

        assert_eq!(quote.subtotal, rate(8_000));
        assert_eq!(quote.discount_amount, rate(800));
        assert_eq!(quote.total, rate(7_200));
    }

    #[test]
    fn discount_is_monotonically_non_decreasing() {
        let policy = RatePolicy::standard();
        let mut previous = Decimal::ZERO;
        for days in 1..=60 {
            let current = policy.discount_for(days);
            assert!(current >= previous, "discount dropped at {days} days");
            previous = current;
        }
    }

    #[test]
    fn zero_duration_is_rejected() {
        let result = RatePolicy::standard().quote(rate(500), 0);
        assert!(matches!(result, Err(CalcError::InvalidArgument(_))));
    }

    #[test]
    fn non_positive_rate_is_rejected() {
        let result = RatePolicy::standard().quote(Decimal::ZERO, 5);
        assert!(matches!(result, Err(CalcError::InvalidArgument(_))));
    }

    #[test]
    fn decreasing_tier_table_is_rejected() {
        let result = RatePolicy::new(vec![
            DiscountTier { min_days: 7, percent: Decimal::from(15u32) },
            DiscountTier { min_days: 14, percent: Decimal::from(10u32) },
        ]);
        assert!(matches!(result, Err(CalcError::InvalidArgument(_))));
    }

    #[test]
    fn empty_tier_table_means_no_discount() {
        let policy = RatePolicy::new(Vec::new()).expect("empty table is valid");
        let quote = policy.quote(rate(100), 40).expect("valid quote");
        assert_eq!(quote.discount_percent, Decimal::ZERO);
        assert_eq!(quote.total, rate(4_000));
    }
}
