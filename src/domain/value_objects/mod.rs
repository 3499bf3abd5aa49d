//! Value Objects for the storefront domain

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// SKU (Stock Keeping Unit) value object
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sku(String);

impl Sku {
    pub fn new(value: impl Into<String>) -> Result<Self, SkuError> {
        let value = value.into().trim().to_uppercase();
        if value.is_empty() { return Err(SkuError::Empty); }
        if value.len() > 50 { return Err(SkuError::TooLong); }
        Ok(Self(value))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl TryFrom<String> for Sku {
    type Error = SkuError;
    fn try_from(value: String) -> Result<Self, Self::Error> { Self::new(value) }
}

impl From<Sku> for String {
    fn from(sku: Sku) -> Self { sku.0 }
}

impl fmt::Display for Sku {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum SkuError { Empty, TooLong }
impl std::error::Error for SkuError {}
impl fmt::Display for SkuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self { Self::Empty => write!(f, "SKU empty"), Self::TooLong => write!(f, "SKU longer than 50 characters") }
    }
}

/// Money value object. Amounts are kept at full precision and rounded to cents
/// only where a rate is applied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money { amount: Decimal, currency: String }

impl Money {
    pub fn new(amount: Decimal, currency: &str) -> Self { Self { amount, currency: currency.to_uppercase() } }
    pub fn usd(amount: Decimal) -> Self { Self::new(amount, "USD") }
    pub fn zero(currency: &str) -> Self { Self::new(Decimal::ZERO, currency) }
    pub fn amount(&self) -> Decimal { self.amount }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn is_zero(&self) -> bool { self.amount.is_zero() }
    pub fn is_negative(&self) -> bool { self.amount.is_sign_negative() && !self.amount.is_zero() }

    pub fn add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.same_currency(other)?;
        Ok(Money::new(self.amount + other.amount, &self.currency))
    }

    pub fn subtract(&self, other: &Money) -> Result<Money, MoneyError> {
        self.same_currency(other)?;
        Ok(Money::new(self.amount - other.amount, &self.currency))
    }

    pub fn multiply(&self, qty: u32) -> Money { Money::new(self.amount * Decimal::from(qty), &self.currency) }

    /// `self * rate`, rounded half-even to two decimal places.
    pub fn percent(&self, rate: Decimal) -> Money { Money::new((self.amount * rate).round_dp(2), &self.currency) }

    fn same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch { expected: self.currency.clone(), got: other.currency.clone() });
        }
        Ok(())
    }
}

impl Default for Money { fn default() -> Self { Self::zero("USD") } }

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{} {}", self.amount.round_dp(2), self.currency) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum MoneyError { CurrencyMismatch { expected: String, got: String } }
impl std::error::Error for MoneyError {}
impl fmt::Display for MoneyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self { Self::CurrencyMismatch { expected, got } => write!(f, "Currency mismatch: expected {expected}, got {got}") }
    }
}

/// Quantity value object
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(u32);

impl Quantity {
    pub fn new(value: u32) -> Self { Self(value) }
    pub fn value(&self) -> u32 { self.0 }
    pub fn add(&self, other: u32) -> Self { Self(self.0.saturating_add(other)) }
    pub fn subtract(&self, other: u32) -> Option<Self> { self.0.checked_sub(other).map(Self) }
}

/// URL handle derived from a display name: lower-case ASCII alphanumerics
/// joined by single dashes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Slug(String);

impl Slug {
    pub fn from_name(name: &str) -> Option<Self> {
        let mut out = String::with_capacity(name.len());
        for word in name.split(|c: char| !c.is_ascii_alphanumeric()).filter(|w| !w.is_empty()) {
            if !out.is_empty() { out.push('-'); }
            out.push_str(&word.to_ascii_lowercase());
        }
        if out.is_empty() { None } else { Some(Self(out)) }
    }

    /// The n-th alternative used when the plain slug is taken: `name-2`, `name-3`, ...
    pub fn with_suffix(&self, n: u32) -> Self { Self(format!("{}-{}", self.0, n)) }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Identifies the store a record belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let mut chars = value.chars();
        let first_ok = chars.next().is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        let rest_ok = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        (first_ok && rest_ok && value.len() <= 63).then(|| Self(value.to_string()))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl TryFrom<String> for TenantId {
    type Error = String;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid tenant id '{value}'"))
    }
}

impl From<TenantId> for String {
    fn from(t: TenantId) -> Self { t.0 }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_sku() { let sku = Sku::new(" tee-red-m ").unwrap(); assert_eq!(sku.as_str(), "TEE-RED-M"); }
    #[test]
    fn test_sku_rejects_blank() { assert_eq!(Sku::new("   "), Err(SkuError::Empty)); }
    #[test]
    fn test_money_add() {
        let a = Money::usd(Decimal::new(100, 0));
        let b = Money::usd(Decimal::new(50, 0));
        assert_eq!(a.add(&b).unwrap().amount(), Decimal::new(150, 0));
        assert!(a.add(&Money::zero("EUR")).is_err());
    }
    #[test]
    fn test_money_percent_rounds_to_cents() {
        let m = Money::usd(Decimal::new(1999, 2));
        assert_eq!(m.percent(Decimal::new(75, 3)).amount(), Decimal::new(150, 2));
    }
    #[test]
    fn test_quantity() {
        assert_eq!(Quantity::new(u32::MAX).add(5).value(), u32::MAX);
        assert_eq!(Quantity::new(3).subtract(2), Some(Quantity::new(1)));
        assert_eq!(Quantity::new(1).subtract(2), None);
    }
    #[test]
    fn test_slug() {
        assert_eq!(Slug::from_name("  Summer Dress -- Blue! ").unwrap().as_str(), "summer-dress-blue");
        assert!(Slug::from_name("!!!").is_none());
        assert_eq!(Slug::from_name("Hat").unwrap().with_suffix(2).as_str(), "hat-2");
    }
    #[test]
    fn test_tenant_id() {
        assert!(TenantId::parse("acme-store").is_some());
        assert!(TenantId::parse("-acme").is_none());
        assert!(TenantId::parse("Acme").is_none());
        assert!(TenantId::parse("").is_none());
    }
}
