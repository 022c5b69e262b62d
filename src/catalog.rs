use serde::Deserialize;
use std::collections::HashSet;
use thiserror::Error;
use url::Url;

/// One trackable listing. Loaded from the settings file, never persisted.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Product {
    pub name: String,
    pub pack_count: u32,
    pub url: String,
    #[serde(default)]
    pub alert: Option<PriceAlert>,
}

/// Notify when the parsed price is at or below `threshold`.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct PriceAlert {
    pub threshold: u64,
}

impl Product {
    pub fn alert_triggered(&self, price: u64) -> bool {
        self.alert.is_some_and(|alert| price <= alert.threshold)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum CatalogError {
    #[error("product #{index} has an empty name")]
    EmptyName { index: usize },
    #[error("product '{name}' has a pack count of zero")]
    ZeroPackCount { name: String },
    #[error("product '{name}' has an invalid url '{url}': {reason}")]
    InvalidUrl {
        name: String,
        url: String,
        reason: String,
    },
    #[error("product '{name}' appears more than once")]
    DuplicateName { name: String },
}

/// Ordered, immutable list of products visited on every run.
#[derive(Debug, Clone)]
pub struct Catalog {
    products: Vec<Product>,
}

impl Catalog {
    pub fn new(products: Vec<Product>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();

        for (index, product) in products.iter().enumerate() {
            if product.name.trim().is_empty() {
                return Err(CatalogError::EmptyName { index });
            }
            if product.pack_count == 0 {
                return Err(CatalogError::ZeroPackCount {
                    name: product.name.clone(),
                });
            }
            validate_url(product)?;
            if !seen.insert(product.name.as_str()) {
                return Err(CatalogError::DuplicateName {
                    name: product.name.clone(),
                });
            }
        }

        Ok(Self { products })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Product> {
        self.products.iter()
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn alerting(&self) -> impl Iterator<Item = &Product> {
        self.products.iter().filter(|p| p.alert.is_some())
    }
}

fn validate_url(product: &Product) -> Result<(), CatalogError> {
    let invalid = |reason: String| CatalogError::InvalidUrl {
        name: product.name.clone(),
        url: product.url.clone(),
        reason,
    };

    let parsed = Url::parse(&product.url).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(format!("unsupported scheme '{}'", other))),
    }
}
