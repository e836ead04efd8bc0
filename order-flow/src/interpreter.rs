use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::catalog::{MenuOption, ProductSummary};
use crate::error::Result;

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^\p{L}\p{N}\s]+").expect("non-word pattern is valid")
});

/// What an idle-mode message is asking for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    /// Begin configuring a product. `product_slug` is `None` when the user
    /// wants to order but named nothing resolvable.
    StartBuilder { product_slug: Option<String> },
    BrowseMenu,
    Other,
}

/// Maps free text onto catalog entities.
///
/// Implementations may call out to a language model; callers must treat
/// every error as "understood nothing" and degrade to clarification, so
/// an interpreter outage never takes the conversation down.
#[async_trait]
pub trait SelectionInterpreter: Send + Sync {
    /// Option ids of `options` the text refers to. Order reflects mention
    /// order where the implementation can tell.
    async fn match_selections(&self, text: &str, options: &[MenuOption]) -> Result<Vec<u32>>;

    /// Classify an idle-mode message against the current menu.
    async fn classify_intent(&self, text: &str, products: &[ProductSummary]) -> Result<Intent>;
}

/// Lowercase, strip punctuation, collapse runs of whitespace.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped = NON_WORD.replace_all(&lowered, " ");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Options whose name appears verbatim (case-insensitively) in the text.
/// Returned in catalog order, which callers treat as authoritative over
/// interpreter guesses.
pub fn direct_matches(text: &str, options: &[MenuOption]) -> Vec<u32> {
    let normalized = normalize(text);
    options
        .iter()
        .filter(|o| o.is_available && normalized.contains(&normalize(&o.name)))
        .map(|o| o.id)
        .collect()
}

/// True when any whitespace token of the normalized text equals one of
/// the keywords.
pub fn contains_keyword(text: &str, keywords: &[String]) -> bool {
    let normalized = normalize(text);
    normalized
        .split_whitespace()
        .any(|token| keywords.iter().any(|k| k == token))
}

/// True when the whole normalized text equals one of the keywords.
pub fn equals_keyword(text: &str, keywords: &[String]) -> bool {
    let normalized = normalize(text);
    keywords.iter().any(|k| *k == normalized)
}

const START_TOKENS: [&str; 6] = ["order", "pedido", "pedir", "quiero", "armar", "build"];

/// Deterministic interpreter used when no language model is configured
/// and as the always-on first pass in front of one.
pub struct KeywordInterpreter;

#[async_trait]
impl SelectionInterpreter for KeywordInterpreter {
    async fn match_selections(&self, text: &str, options: &[MenuOption]) -> Result<Vec<u32>> {
        Ok(direct_matches(text, options))
    }

    async fn classify_intent(&self, text: &str, products: &[ProductSummary]) -> Result<Intent> {
        let normalized = normalize(text);

        for product in products {
            if normalized.contains(&normalize(&product.name))
                || normalized
                    .split_whitespace()
                    .any(|token| token == product.slug)
            {
                return Ok(Intent::StartBuilder {
                    product_slug: Some(product.slug.clone()),
                });
            }
        }

        if normalized
            .split_whitespace()
            .any(|token| token == "menu" || token == "menú" || token == "carta")
        {
            return Ok(Intent::BrowseMenu);
        }

        if normalized
            .split_whitespace()
            .any(|token| START_TOKENS.contains(&token))
        {
            return Ok(Intent::StartBuilder { product_slug: None });
        }

        Ok(Intent::Other)
    }
}
