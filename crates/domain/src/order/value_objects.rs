//! Value objects for the order domain.

use serde::{Deserialize, Serialize};

use super::OrderError;

/// Money amount represented in cents to avoid floating point issues.
///
/// On the wire an amount is a decimal number with two-decimal semantics
/// (`20.0` for twenty units), matching the catalog and notification services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "f64", try_from = "f64")]
pub struct Money {
    /// Amount in cents (e.g., 1000 = $10.00)
    cents: i64,
}

impl Money {
    /// Creates a new Money amount from cents.
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Creates a Money amount from a decimal value, rounding to the nearest cent.
    pub fn from_decimal(amount: f64) -> Result<Self, OrderError> {
        if !amount.is_finite() {
            return Err(OrderError::InvalidAmount(amount.to_string()));
        }
        let cents = (amount * 100.0).round();
        // i64::MAX rounds up to 2^63 as f64, which does not fit.
        if cents.abs() >= i64::MAX as f64 {
            return Err(OrderError::InvalidAmount(amount.to_string()));
        }
        Ok(Self {
            cents: cents as i64,
        })
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self { cents: 0 }
    }

    /// Returns the amount in cents.
    pub fn cents(&self) -> i64 {
        self.cents
    }

    /// Returns the amount as a decimal value.
    pub fn to_decimal(&self) -> f64 {
        self.cents as f64 / 100.0
    }

    /// Returns the dollar portion (whole number).
    pub fn dollars(&self) -> i64 {
        self.cents / 100
    }

    /// Returns the cents portion (remainder after dollars).
    pub fn cents_part(&self) -> i64 {
        self.cents.abs() % 100
    }

    pub fn is_zero(&self) -> bool {
        self.cents == 0
    }

    pub fn is_negative(&self) -> bool {
        self.cents < 0
    }

    /// Multiplies by a quantity, failing if the result leaves the `i64` cent range.
    pub fn checked_multiply(&self, quantity: u32) -> Result<Money, OrderError> {
        self.cents
            .checked_mul(i64::from(quantity))
            .map(Money::from_cents)
            .ok_or_else(|| OrderError::InvalidAmount(format!("{self} x {quantity}")))
    }

    pub fn checked_add(&self, rhs: Money) -> Result<Money, OrderError> {
        self.cents
            .checked_add(rhs.cents)
            .map(Money::from_cents)
            .ok_or_else(|| OrderError::InvalidAmount(format!("{self} + {rhs}")))
    }

    /// Sums amounts, failing on overflow instead of wrapping.
    pub fn checked_sum<I>(amounts: I) -> Result<Money, OrderError>
    where
        I: IntoIterator<Item = Money>,
    {
        amounts
            .into_iter()
            .try_fold(Money::zero(), |acc, amount| acc.checked_add(amount))
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.cents < 0 {
            write!(f, "-{}.{:02}", self.dollars().abs(), self.cents_part())
        } else {
            write!(f, "{}.{:02}", self.dollars(), self.cents_part())
        }
    }
}

impl From<Money> for f64 {
    fn from(money: Money) -> Self {
        money.to_decimal()
    }
}

impl TryFrom<f64> for Money {
    type Error = OrderError;

    fn try_from(amount: f64) -> Result<Self, Self::Error> {
        Money::from_decimal(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_from_cents() {
        let money = Money::from_cents(1234);
        assert_eq!(money.cents(), 1234);
        assert_eq!(money.dollars(), 12);
        assert_eq!(money.cents_part(), 34);
    }

    #[test]
    fn test_money_from_decimal_rounds_to_cent() {
        assert_eq!(Money::from_decimal(10.0).unwrap().cents(), 1000);
        assert_eq!(Money::from_decimal(0.1 + 0.2).unwrap().cents(), 30);
        assert_eq!(Money::from_decimal(19.999).unwrap().cents(), 2000);
    }

    #[test]
    fn test_money_from_decimal_rejects_non_finite() {
        assert!(Money::from_decimal(f64::NAN).is_err());
        assert!(Money::from_decimal(f64::INFINITY).is_err());
    }

    #[test]
    fn test_money_display() {
        assert_eq!(Money::from_cents(1234).to_string(), "12.34");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
        assert_eq!(Money::from_cents(-1234).to_string(), "-12.34");
    }

    #[test]
    fn test_money_wire_format_is_decimal() {
        let json = serde_json::to_string(&Money::from_cents(2000)).unwrap();
        assert_eq!(json, "20.0");
        let parsed: Money = serde_json::from_str("10.5").unwrap();
        assert_eq!(parsed.cents(), 1050);
        let parsed: Money = serde_json::from_str("3").unwrap();
        assert_eq!(parsed.cents(), 300);
    }

    #[test]
    fn test_money_from_decimal_rejects_out_of_range() {
        assert!(Money::from_decimal(2f64.powi(61)).is_err());
        assert!(Money::from_decimal(-(2f64.powi(61))).is_err());
        assert!(Money::from_decimal(5e16).is_ok());
    }

    #[test]
    fn test_money_arithmetic() {
        let a = Money::from_cents(1000);
        let b = Money::from_cents(500);

        assert_eq!(a.checked_add(b).unwrap().cents(), 1500);
        assert_eq!(a.checked_multiply(3).unwrap().cents(), 3000);
        assert_eq!(Money::checked_sum([a, b, b]).unwrap().cents(), 2000);
        assert_eq!(Money::checked_sum([]).unwrap(), Money::zero());
    }

    #[test]
    fn test_money_arithmetic_reports_overflow() {
        let huge = Money::from_decimal(5e16).unwrap();

        assert!(matches!(
            huge.checked_multiply(2),
            Err(OrderError::InvalidAmount(_))
        ));
        assert!(Money::from_cents(i64::MAX).checked_add(Money::from_cents(1)).is_err());
        assert!(Money::checked_sum([huge, huge]).is_err());
    }
}
