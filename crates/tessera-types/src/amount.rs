use crate::error::TypesError;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub const FIL_DECIMALS: u32 = 18;
pub const ATTO_PER_FIL: u128 = 1_000_000_000_000_000_000; // 10^18

/// A FIL amount held in attoFIL.
///
/// Human-readable formats carry it as a decimal FIL string (`"0.25"`), binary
/// formats as the raw attoFIL integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FilAmount(u128);

impl FilAmount {
    pub const ZERO: Self = Self(0);

    pub fn from_fil(fil: f64) -> Self {
        if !fil.is_finite() || fil <= 0.0 {
            return Self::ZERO;
        }
        Self((fil * ATTO_PER_FIL as f64) as u128)
    }

    pub fn from_atto(atto: u128) -> Self {
        Self(atto)
    }

    pub fn to_fil(&self) -> f64 {
        self.0 as f64 / ATTO_PER_FIL as f64
    }

    pub fn to_atto(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(&self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(&self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn checked_mul(&self, factor: u128) -> Option<Self> {
        self.0.checked_mul(factor).map(Self)
    }

    pub fn saturating_add(&self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(&self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Exact decimal rendering in FIL, trailing zeros trimmed.
    pub fn to_decimal_string(&self) -> String {
        let whole = self.0 / ATTO_PER_FIL;
        let frac = self.0 % ATTO_PER_FIL;
        if frac == 0 {
            return whole.to_string();
        }
        let digits = format!("{:018}", frac);
        format!("{}.{}", whole, digits.trim_end_matches('0'))
    }
}

impl fmt::Display for FilAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} FIL", self.to_decimal_string())
    }
}

impl FromStr for FilAmount {
    type Err = TypesError;

    /// Parses `"1.5"`, `"1.5 FIL"` or `".25"` exactly, up to 18 decimals.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let number = trimmed.strip_suffix("FIL").map(str::trim_end).unwrap_or(trimmed);
        let (whole, frac) = number.split_once('.').unwrap_or((number, ""));

        let invalid = || TypesError::InvalidAmount(s.to_string());
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if frac.len() > FIL_DECIMALS as usize {
            return Err(invalid());
        }
        if !whole.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let frac_atto: u128 = if frac.is_empty() {
            0
        } else {
            let digits: u128 = frac.parse().map_err(|_| invalid())?;
            digits * 10u128.pow(FIL_DECIMALS - frac.len() as u32)
        };

        whole
            .checked_mul(ATTO_PER_FIL)
            .and_then(|w| w.checked_add(frac_atto))
            .map(Self)
            .ok_or_else(invalid)
    }
}

impl Serialize for FilAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_decimal_string())
        } else {
            serializer.serialize_u128(self.0)
        }
    }
}

struct FilAmountVisitor;

impl<'de> Visitor<'de> for FilAmountVisitor {
    type Value = FilAmount;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a FIL amount")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<FilAmount, E> {
        FilAmount::from_str(v).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<FilAmount, E> {
        Ok(FilAmount(v as u128 * ATTO_PER_FIL))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<FilAmount, E> {
        u64::try_from(v)
            .map(|v| FilAmount(v as u128 * ATTO_PER_FIL))
            .map_err(|_| E::custom("negative FIL amount"))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<FilAmount, E> {
        Ok(FilAmount::from_fil(v))
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> Result<FilAmount, E> {
        Ok(FilAmount(v))
    }
}

impl<'de> Deserialize<'de> for FilAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            deserializer.deserialize_any(FilAmountVisitor)
        } else {
            deserializer.deserialize_u128(FilAmountVisitor)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        assert_eq!(FilAmount::from_str("1").unwrap().to_atto(), ATTO_PER_FIL);
        assert_eq!(FilAmount::from_str("1.5 FIL").unwrap().to_atto(), 1_500_000_000_000_000_000);
        assert_eq!(FilAmount::from_str(".25").unwrap().to_string(), "0.25 FIL");
        assert_eq!(FilAmount::from_atto(1).to_decimal_string(), "0.000000000000000001");
        assert!(FilAmount::from_str("").is_err());
        assert!(FilAmount::from_str("1.2.3").is_err());
        assert!(FilAmount::from_str("-1").is_err());
        assert!(FilAmount::from_str("0.0000000000000000001").is_err());
    }

    #[test]
    fn test_arithmetic() {
        let a = FilAmount::from_fil(1.0);
        let b = FilAmount::from_atto(5);
        assert_eq!(a.checked_add(b).unwrap().to_atto(), ATTO_PER_FIL + 5);
        assert!(b.checked_sub(a).is_none());
        assert_eq!(b.saturating_sub(a), FilAmount::ZERO);
        assert_eq!(b.checked_mul(3).unwrap().to_atto(), 15);
        assert_eq!(FilAmount::from_fil(-2.0), FilAmount::ZERO);
    }

    #[test]
    fn test_serde_forms() {
        let amount = FilAmount::from_str("0.125").unwrap();
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"0.125\"");
        assert_eq!(serde_json::from_str::<FilAmount>(&json).unwrap(), amount);
        assert_eq!(serde_json::from_str::<FilAmount>("2").unwrap(), FilAmount::from_fil(2.0));

        let bin = bincode::serialize(&amount).unwrap();
        assert_eq!(bincode::deserialize::<FilAmount>(&bin).unwrap(), amount);
    }
}
