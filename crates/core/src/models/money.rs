//! Money and quantity value types
//!
//! Both are fixed-point integers so that totals can be summed and compared
//! exactly. `Money` counts minor currency units (e.g. paisa), `Quantity`
//! counts thousandths of a grocery unit.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An amount of money in minor currency units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(pub i64);

impl Money {
    pub const ZERO: Money = Money(0);

    /// Amount from whole major units (e.g. taka); `None` if it does not fit
    pub fn checked_major(units: i64) -> Option<Self> {
        units.checked_mul(100).map(Money)
    }

    #[cfg(test)]
    pub(crate) fn major(units: i64) -> Self {
        Money(units * 100)
    }

    pub fn minor(&self) -> i64 {
        self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// `self × quantity`, rounded half-up to the nearest minor unit.
    /// `None` if the result does not fit in an `i64`.
    pub fn checked_times(&self, quantity: Quantity) -> Option<Money> {
        let product = i128::from(self.0) * i128::from(quantity.0);
        i64::try_from(div_round_half_up(product, i128::from(Quantity::SCALE)))
            .ok()
            .map(Money)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl FromStr for Money {
    type Err = String;

    /// Parses "120", "120.5", "120.50" and tolerates a leading currency
    /// word or symbol and thousands separators ("Tk 1,200").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s
            .trim()
            .chars()
            .skip_while(|c| !c.is_ascii_digit() && *c != '-' && *c != '.')
            .filter(|c| *c != ',')
            .collect();
        let minor = parse_fixed(cleaned.trim(), 2).ok_or_else(|| format!("invalid amount: {s:?}"))?;
        Ok(Money(minor))
    }
}

/// A grocery quantity in thousandths of a unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(pub i64);

impl Quantity {
    pub const SCALE: i64 = 1000;

    pub fn whole(units: i64) -> Self {
        Quantity(units * Self::SCALE)
    }

    pub fn milli(&self) -> i64 {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / Self::SCALE;
        let frac = (self.0 % Self::SCALE).abs();
        if frac == 0 {
            write!(f, "{}", whole)
        } else {
            let digits = format!("{:03}", frac);
            write!(f, "{}.{}", whole, digits.trim_end_matches('0'))
        }
    }
}

impl FromStr for Quantity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed(s.trim(), 3)
            .map(Quantity)
            .ok_or_else(|| format!("invalid quantity: {s:?}"))
    }
}

/// Integer division rounding half away from zero (half-up for non-negatives)
pub(crate) fn div_round_half_up(numerator: i128, denominator: i128) -> i128 {
    debug_assert!(denominator > 0);
    if numerator >= 0 {
        (2 * numerator + denominator) / (2 * denominator)
    } else {
        -((2 * -numerator + denominator) / (2 * denominator))
    }
}

/// Parse a decimal string into a fixed-point integer with `scale` fractional digits.
/// Extra fractional digits are rejected rather than rounded.
fn parse_fixed(s: &str, scale: u32) -> Option<i64> {
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, f),
        None => (digits, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if frac_part.len() > scale as usize
        || !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }

    let int_value: i64 = if int_part.is_empty() { 0 } else { int_part.parse().ok()? };
    let padded = format!("{:0<width$}", frac_part, width = scale as usize);
    let frac_value: i64 = if padded.is_empty() { 0 } else { padded.parse().ok()? };
    let value = int_value
        .checked_mul(10_i64.pow(scale))?
        .checked_add(frac_value)?;
    Some(if negative { -value } else { value })
}
