use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Selected option ids per step id. Insertion order is preserved: the
/// first `included_selections` entries of a step are the ones displayed as
/// covered by the base price (see `pricing::option_price_preview`).
pub type Selections = HashMap<u32, Vec<u32>>;

/// A single selectable ingredient or variant within a step.
///
/// Prices are integer minor currency units (cents). `price_extra` is the
/// option's intrinsic surcharge — a premium ingredient costs its premium
/// whether or not its slot was covered by the included quota.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MenuOption {
    pub id: u32,
    pub name: String,
    pub price_extra: i64,
    pub is_available: bool,
}

impl MenuOption {
    pub fn new(id: u32, name: impl Into<String>, price_extra: i64) -> Self {
        Self {
            id,
            name: name.into(),
            price_extra,
            is_available: true,
        }
    }

    pub fn unavailable(mut self) -> Self {
        self.is_available = false;
        self
    }
}

/// One configuration stage of a product ("Base", "Proteína", "Toppings").
///
/// `max_selections == Some(1)` selects single-choice replace semantics;
/// `None` means any count up to the catalog size. `included_selections`
/// slots are covered by the base price; each selection beyond that pays
/// `price_per_extra` on top of its own `price_extra`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigStep {
    pub id: u32,
    pub label: String,
    pub order: u32,
    pub min_selections: u32,
    pub max_selections: Option<u32>,
    pub included_selections: u32,
    pub price_per_extra: i64,
    pub options: Vec<MenuOption>,
}

impl ConfigStep {
    pub fn is_single_select(&self) -> bool {
        self.max_selections == Some(1)
    }

    pub fn find_option(&self, id: u32) -> Option<&MenuOption> {
        self.options.iter().find(|o| o.id == id)
    }
}

/// A configurable product. Steps are traversed strictly in ascending
/// `order`; a product with zero steps prices at exactly `base_price`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Product {
    pub id: u32,
    pub name: String,
    pub slug: String,
    pub base_price: i64,
    pub steps: Vec<ConfigStep>,
}

/// Lightweight listing entry for menu browsing and intent grounding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProductSummary {
    pub slug: String,
    pub name: String,
    pub base_price: i64,
}

/// Read access to the product catalog.
///
/// Reads return steps sorted ascending by `order` and carry only the
/// currently available options — unavailable ones are never offered.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Resolve a product by its stable external identifier. `None` when the
    /// slug is unknown (deleted products included).
    async fn get_product_by_slug(&self, slug: &str) -> Result<Option<Product>>;

    /// All currently orderable products.
    async fn list_products(&self) -> Result<Vec<ProductSummary>>;
}

/// In-memory implementation of `ProductCatalog`.
pub struct InMemoryProductCatalog {
    products: Arc<DashMap<String, Product>>,
}

impl InMemoryProductCatalog {
    pub fn new() -> Self {
        Self {
            products: Arc::new(DashMap::new()),
        }
    }

    pub fn insert(&self, product: Product) {
        self.products.insert(product.slug.clone(), product);
    }

    pub fn remove(&self, slug: &str) {
        self.products.remove(slug);
    }
}

impl Default for InMemoryProductCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProductCatalog for InMemoryProductCatalog {
    async fn get_product_by_slug(&self, slug: &str) -> Result<Option<Product>> {
        let Some(entry) = self.products.get(slug) else {
            return Ok(None);
        };

        let mut product = entry.clone();
        for step in &mut product.steps {
            step.options.retain(|o| o.is_available);
        }
        product.steps.sort_by_key(|s| s.order);
        Ok(Some(product))
    }

    async fn list_products(&self) -> Result<Vec<ProductSummary>> {
        let mut summaries: Vec<ProductSummary> = self
            .products
            .iter()
            .map(|entry| ProductSummary {
                slug: entry.slug.clone(),
                name: entry.name.clone(),
                base_price: entry.base_price,
            })
            .collect();
        summaries.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(summaries)
    }
}
