//! Core identifiers and amounts shared by every component.

use num_bigint::BigUint;
use num_traits::Zero;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::CascadeError;

// ═══════════════════════════════════════════════════════════════════════════════
// Artifact Identity
// ═══════════════════════════════════════════════════════════════════════════════

/// An artifact is addressed by its origin namespace and a handle unique within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactId {
    pub origin: String,
    pub local_id: u64,
}

impl ArtifactId {
    pub fn new(origin: impl Into<String>, local_id: u64) -> Self {
        Self {
            origin: origin.into(),
            local_id,
        }
    }

    /// Parse the textual local id used by the store and the HTTP paths.
    pub fn parse(origin: impl Into<String>, local_id: &str) -> crate::error::Result<Self> {
        let local_id = local_id.parse::<u64>().map_err(|_| {
            CascadeError::invalid_input(format!("Invalid local id: {}", local_id))
        })?;
        Ok(Self::new(origin, local_id))
    }

    pub fn local_id_text(&self) -> String {
        self.local_id.to_string()
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.origin, self.local_id)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Amount
// ═══════════════════════════════════════════════════════════════════════════════

/// Basis points in one whole (100%).
pub const BPS_DENOMINATOR: u32 = 10_000;

/// A non-negative amount in the smallest currency unit.
///
/// Serialized and stored as a canonical decimal string so repeated additions
/// never drift.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(BigUint);

impl Amount {
    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    pub fn from_u64(value: u64) -> Self {
        Self(BigUint::from(value))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }

    /// `self * bps / 10000`, truncated toward zero.
    pub fn scale_bps(&self, bps: u32) -> Self {
        Self(&self.0 * BigUint::from(bps) / BigUint::from(BPS_DENOMINATOR))
    }

    /// `self - other`, or zero when `other` is larger.
    pub fn saturating_sub(&self, other: &Amount) -> Self {
        if other.0 >= self.0 {
            Self::zero()
        } else {
            Self(&self.0 - &other.0)
        }
    }
}

impl From<BigUint> for Amount {
    fn from(value: BigUint) -> Self {
        Self(value)
    }
}

impl std::ops::Add<&Amount> for Amount {
    type Output = Amount;

    fn add(self, rhs: &Amount) -> Amount {
        Amount(self.0 + &rhs.0)
    }
}

impl std::ops::AddAssign<&Amount> for Amount {
    fn add_assign(&mut self, rhs: &Amount) {
        self.0 += &rhs.0;
    }
}

impl<'a> std::iter::Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Amount>>(iter: I) -> Self {
        iter.fold(Amount::zero(), |acc, a| acc + a)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = CascadeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CascadeError::invalid_input(format!("Invalid amount: {:?}", s)));
        }
        s.parse::<BigUint>()
            .map(Self)
            .map_err(|_| CascadeError::invalid_input(format!("Invalid amount: {:?}", s)))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AmountVisitor;

        impl<'de> de::Visitor<'de> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a decimal string or unsigned integer")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
                Ok(Amount::from_u64(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
                v.parse::<Amount>().map_err(|e| E::custom(e.user_message().to_string()))
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_parse_canonical() {
        let a: Amount = "0005000".parse().unwrap();
        assert_eq!(a.to_string(), "5000");
        assert!("".parse::<Amount>().is_err());
        assert!("-1".parse::<Amount>().is_err());
        assert!("1_000".parse::<Amount>().is_err());
        assert!("1.5".parse::<Amount>().is_err());
    }

    #[test]
    fn test_amount_beyond_u128() {
        let big = "340282366920938463463374607431768211456000";
        let a: Amount = big.parse().unwrap();
        let doubled = a.clone() + &a;
        assert_eq!(doubled.to_string(), "680564733841876926926749214863536422912000");
    }

    #[test]
    fn test_scale_bps_truncates() {
        assert_eq!(Amount::from_u64(999).scale_bps(1000).to_string(), "99");
        assert_eq!(Amount::from_u64(5).scale_bps(650).to_string(), "0");
    }

    #[test]
    fn test_amount_json() {
        let a: Amount = serde_json::from_str("\"12345678901234567890123\"").unwrap();
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"12345678901234567890123\"");
        let b: Amount = serde_json::from_str("42").unwrap();
        assert_eq!(b, Amount::from_u64(42));
    }

    #[test]
    fn test_artifact_parse() {
        let id = ArtifactId::parse("0xrepo", "17").unwrap();
        assert_eq!(id.to_string(), "0xrepo:17");
        assert!(ArtifactId::parse("0xrepo", "abc").is_err());
        assert!(ArtifactId::parse("0xrepo", "-3").is_err());
    }
}
