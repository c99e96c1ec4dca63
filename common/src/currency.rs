use crate::config::{CONTRACT_TAX_DENOMINATOR, CONTRACT_TAX_NUMERATOR};
use primitive_types::U256;
use serde::de::Error as SerdeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{
    fmt::{Display, Error, Formatter},
    iter::Sum,
    ops::{Add, AddAssign, Sub},
    str::FromStr,
};

// Amount of base units, the smallest denomination of the network currency.
// Balances routinely exceed 64 bits, so amounts are 256-bit wide.
// Arithmetic saturates at the bounds instead of wrapping: the real supply
// never comes close to either end of the range.
#[derive(Eq, PartialEq, PartialOrd, Ord, Hash, Clone, Copy, Debug, Default)]
pub struct Currency(U256);

impl Currency {
    pub fn zero() -> Self {
        Currency(U256::zero())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_add(&self, rhs: &Currency) -> Option<Currency> {
        self.0.checked_add(rhs.0).map(Currency)
    }

    pub fn checked_sub(&self, rhs: &Currency) -> Option<Currency> {
        self.0.checked_sub(rhs.0).map(Currency)
    }

    pub fn saturating_sub(&self, rhs: &Currency) -> Currency {
        Currency(self.0.saturating_sub(rhs.0))
    }

    pub fn mul_u64(&self, rhs: u64) -> Currency {
        Currency(
            self.0
                .checked_mul(U256::from(rhs))
                .unwrap_or(U256::MAX),
        )
    }

    // Multiply by a rational factor, rounding down
    pub fn mul_frac(&self, numerator: u64, denominator: u64) -> Currency {
        debug_assert!(denominator != 0);
        Currency(
            self.0
                .checked_mul(U256::from(numerator))
                .unwrap_or(U256::MAX)
                / U256::from(denominator),
        )
    }

    pub fn div_u64(&self, rhs: u64) -> Currency {
        debug_assert!(rhs != 0);
        Currency(self.0 / U256::from(rhs))
    }

    // Integer division by another amount, None when the divisor is zero
    pub fn checked_div(&self, rhs: &Currency) -> Option<Currency> {
        self.0.checked_div(rhs.0).map(Currency)
    }

    // Clamp to u64, saturating on overflow
    pub fn as_u64(&self) -> u64 {
        if self.0 > U256::from(u64::MAX) {
            u64::MAX
        } else {
            self.0.low_u64()
        }
    }
}

impl From<u64> for Currency {
    fn from(value: u64) -> Self {
        Currency(U256::from(value))
    }
}

impl Add for Currency {
    type Output = Currency;

    fn add(self, rhs: Currency) -> Currency {
        Currency(self.0.checked_add(rhs.0).unwrap_or(U256::MAX))
    }
}

impl AddAssign for Currency {
    fn add_assign(&mut self, rhs: Currency) {
        *self = *self + rhs;
    }
}

impl Sub for Currency {
    type Output = Currency;

    fn sub(self, rhs: Currency) -> Currency {
        Currency(self.0.saturating_sub(rhs.0))
    }
}

impl Sum for Currency {
    fn sum<I: Iterator<Item = Currency>>(iter: I) -> Currency {
        iter.fold(Currency::zero(), |acc, c| acc + c)
    }
}

impl Display for Currency {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Currency {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        U256::from_dec_str(s)
            .map(Currency)
            .map_err(|_| "Invalid currency amount")
    }
}

// Stored and transmitted as a stringified big integer
impl Serialize for Currency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Currency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Currency::from_str(&value).map_err(SerdeError::custom)
    }
}

// Levy collected by the network on a contract payout, rounded down
pub fn contract_tax(payout: &Currency) -> Currency {
    payout.mul_frac(CONTRACT_TAX_NUMERATOR, CONTRACT_TAX_DENOMINATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_round_trip() {
        let amount = Currency::from(123456789u64).mul_u64(1_000_000_000);
        let back: Currency = amount.to_string().parse().unwrap();
        assert_eq!(amount, back);
    }

    #[test]
    fn test_serde_as_string() {
        let amount = Currency::from(42u64);
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"42\"");
        let back: Currency = serde_json::from_str(&json).unwrap();
        assert_eq!(amount, back);
    }

    #[test]
    fn test_mul_frac_rounds_down() {
        // 10 * 33 / 100 = 3.3 -> 3
        let amount = Currency::from(10u64);
        assert_eq!(amount.mul_frac(33, 100), Currency::from(3u64));
    }

    #[test]
    fn test_sub_saturates() {
        let small = Currency::from(5u64);
        let big = Currency::from(10u64);
        assert_eq!(small - big, Currency::zero());
    }

    #[test]
    fn test_contract_tax() {
        // 3.9% of 1000 is 39
        assert_eq!(contract_tax(&Currency::from(1000u64)), Currency::from(39u64));
        // rounds down below the denomination
        assert_eq!(contract_tax(&Currency::from(10u64)), Currency::zero());
    }
}
