use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PriceError {
    #[error("price text '{0}' does not start with a number")]
    NotANumber(String),
    #[error("price text '{0}' is too large")]
    OutOfRange(String),
}

fn leading_digits() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\s*([0-9]+)").unwrap())
}

/// Reads the whole-currency amount from the page's price text. Only the
/// leading digits count, so `"165,"` or `"165 €"` both give 165. The text
/// is passed through as rendered; there is no locale handling.
pub fn parse_price(text: &str) -> Result<u64, PriceError> {
    let digits = leading_digits()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| PriceError::NotANumber(text.to_string()))?;

    digits
        .as_str()
        .parse::<u64>()
        .map_err(|_| PriceError::OutOfRange(text.to_string()))
}

/// Price per unit held in thousandths, rounded half-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PerUnitPrice {
    thousandths: u128,
}

impl PerUnitPrice {
    pub fn compute(price: u64, pack_count: u32) -> Self {
        debug_assert!(pack_count > 0, "pack count is validated by the catalog");
        let count = u128::from(pack_count.max(1));
        let scaled = u128::from(price) * 2000 + count;
        Self {
            thousandths: scaled / (2 * count),
        }
    }
}

impl fmt::Display for PerUnitPrice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.thousandths / 1000, self.thousandths % 1000)
    }
}

/// A successfully read price for one product in one run.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceQuote {
    pub raw_text: String,
    pub price: u64,
    pub per_unit: PerUnitPrice,
}

impl PriceQuote {
    pub fn from_raw(raw_text: String, pack_count: u32) -> Result<Self, PriceError> {
        let price = parse_price(&raw_text)?;
        Ok(Self {
            per_unit: PerUnitPrice::compute(price, pack_count),
            raw_text,
            price,
        })
    }
}
