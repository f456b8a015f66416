//! Kubernetes resource quantities
//!
//! Parses the quantity grammar used for CPU and memory ("200m", "1.5", "2Gi",
//! "512M", "1e3") into an exact milli-unit count so quantities can be compared
//! and subtracted without floating point drift.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

const BINARY_SUFFIXES: &[(&str, u32)] = &[
    ("Ki", 1),
    ("Mi", 2),
    ("Gi", 3),
    ("Ti", 4),
    ("Pi", 5),
    ("Ei", 6),
];

const DECIMAL_SUFFIXES: &[(&str, u32)] = &[
    ("k", 1),
    ("M", 2),
    ("G", 3),
    ("T", 4),
    ("P", 5),
    ("E", 6),
];

/// Maximum number of significant digits accepted in the numeric part
const MAX_DIGITS: usize = 18;

/// A resource quantity stored as thousandths of the base unit
#[derive(Debug, Clone)]
pub struct Quantity {
    millis: i128,
    raw: Option<String>,
}

impl Quantity {
    /// Build a quantity from thousandths of a unit (e.g. millicores)
    pub fn from_millis(millis: i128) -> Self {
        Self { millis, raw: None }
    }

    /// Build a quantity from whole units (cores, bytes)
    pub fn from_units(units: i128) -> Self {
        Self::from_millis(units * 1000)
    }

    pub fn millis(&self) -> i128 {
        self.millis
    }

    /// Whole units, rounded up
    pub fn units_ceil(&self) -> i128 {
        let whole = self.millis.div_euclid(1000);
        if self.millis.rem_euclid(1000) == 0 {
            whole
        } else {
            whole + 1
        }
    }

    pub fn is_zero(&self) -> bool {
        self.millis == 0
    }

    /// Subtraction that forgets the original spelling
    pub fn saturating_sub(&self, other: &Quantity) -> Quantity {
        Quantity::from_millis((self.millis - other.millis).max(0))
    }

    pub fn parse(input: &str) -> Result<Self, String> {
        let s = input.trim();
        if s.is_empty() {
            return Err("quantity cannot be empty".to_string());
        }

        let (number, suffix) = split_number(s);
        if number.is_empty() {
            return Err(format!("{}: invalid quantity", input));
        }

        let (mantissa, scale) = parse_decimal(number)
            .ok_or_else(|| format!("{}: invalid quantity", input))?;

        // millis = mantissa * 10^-scale * multiplier * 1000
        let (num, den): (i128, i128) = match suffix {
            "" => (1000, 1),
            "m" => (1, 1),
            s => {
                if let Some((_, power)) = BINARY_SUFFIXES.iter().find(|(name, _)| *name == s) {
                    (1024i128.pow(*power) * 1000, 1)
                } else if let Some((_, power)) = DECIMAL_SUFFIXES.iter().find(|(name, _)| *name == s)
                {
                    (1000i128.pow(*power) * 1000, 1)
                } else if let Some(exp) = s
                    .strip_prefix(|c: char| c == 'e' || c == 'E')
                    .and_then(|rest| rest.parse::<i32>().ok())
                {
                    if !(-3..=18).contains(&exp) {
                        return Err(format!("{}: quantity exponent out of range", input));
                    }
                    (10i128.pow((exp + 3) as u32), 1)
                } else {
                    return Err(format!("{}: unknown quantity suffix \"{}\"", input, s));
                }
            }
        };

        let numerator = mantissa
            .checked_mul(num)
            .ok_or_else(|| format!("{}: quantity is too large", input))?;
        let denominator = den * 10i128.pow(scale);

        // Fractions of a milli round up, matching the API server
        let mut millis = numerator / denominator;
        if numerator % denominator != 0 && numerator > 0 {
            millis += 1;
        }

        Ok(Self {
            millis,
            raw: Some(s.to_string()),
        })
    }
}

/// Split "1.5Gi" into ("1.5", "Gi")
fn split_number(s: &str) -> (&str, &str) {
    let mut end = 0;
    for (i, c) in s.char_indices() {
        let sign = (c == '+' || c == '-') && i == 0;
        if c.is_ascii_digit() || c == '.' || sign {
            end = i + c.len_utf8();
        } else {
            break;
        }
    }
    (&s[..end], &s[end..])
}

/// Parse a decimal literal into (mantissa, number of fractional digits)
fn parse_decimal(number: &str) -> Option<(i128, u32)> {
    let (negative, digits) = match number.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, number.strip_prefix('+').unwrap_or(number)),
    };

    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, f),
        None => (digits, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.chars().all(|c| c.is_ascii_digit()) || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }
    if int_part.len() + frac_part.len() > MAX_DIGITS {
        return None;
    }

    let combined = format!("{}{}", int_part, frac_part);
    let mantissa: i128 = combined.parse().ok()?;
    let mantissa = if negative { -mantissa } else { mantissa };

    Some((mantissa, frac_part.len() as u32))
}

impl FromStr for Quantity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.millis == other.millis
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.millis.cmp(&other.millis)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(raw) = &self.raw {
            return write!(f, "{}", raw);
        }

        if self.millis % 1000 != 0 {
            return write!(f, "{}m", self.millis);
        }

        let units = self.millis / 1000;
        if units != 0 {
            for (name, power) in BINARY_SUFFIXES.iter().rev() {
                let factor = 1024i128.pow(*power);
                if units % factor == 0 {
                    return write!(f, "{}{}", units / factor, name);
                }
            }
        }

        write!(f, "{}", units)
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Quantity::parse(&raw).map_err(serde::de::Error::custom)
    }
}

impl TryFrom<&k8s_openapi::apimachinery::pkg::api::resource::Quantity> for Quantity {
    type Error = String;

    fn try_from(
        q: &k8s_openapi::apimachinery::pkg::api::resource::Quantity,
    ) -> Result<Self, Self::Error> {
        Quantity::parse(&q.0)
    }
}
