use async_trait::async_trait;
use order_flow::{FlowError, Intent, MenuOption, ProductSummary, Result, SelectionInterpreter};
use rig::agent::Agent;
use rig::client::CompletionClient;
use rig::completion::Chat;
use rig::providers::openrouter;
use serde::Deserialize;
use tracing::debug;

const MODEL: &str = "openai/gpt-4o-mini";

const SELECTION_PROMPT: &str = r#"You match a restaurant customer's chat message against a list of menu options.

You receive the message and the candidate options as JSON. Decide which options the customer is asking for. Mentions may be partial, misspelled, in Spanish or in English.

Respond with ONLY this JSON, nothing else:
{"option_ids": [1, 2]}

List ids in the order the customer mentioned them. If nothing matches, respond with {"option_ids": []}.
Never use ids that are not in the candidate list. Do not mix text and JSON."#;

const INTENT_PROMPT: &str = r#"You classify a customer's chat message for a restaurant ordering bot.

You receive the message and the product list as JSON.

Respond with ONLY one of these JSON shapes, nothing else:
{"intent": "start_builder", "product_slug": "bowl"}
{"intent": "start_builder", "product_slug": null}
{"intent": "browse_menu"}
{"intent": "other"}

Use "start_builder" with a slug when the customer wants a specific product, with null when they want to order but named none, "browse_menu" when they ask what there is, "other" for anything else. Only use slugs present in the product list. Do not mix text and JSON."#;

#[derive(Debug, Deserialize)]
struct SelectionResponse {
    option_ids: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    intent: String,
    #[serde(default)]
    product_slug: Option<String>,
}

/// LLM-backed interpreter over an OpenRouter agent. Every provider or
/// parse failure maps to `FlowError::Interpreter`, which the engine
/// downgrades to "understood nothing".
pub struct RigInterpreter {
    api_key: String,
}

impl RigInterpreter {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENROUTER_API_KEY not set"))?;
        Ok(Self { api_key })
    }

    fn agent(&self, preamble: &str) -> Agent<openrouter::CompletionModel> {
        openrouter::Client::new(&self.api_key)
            .agent(MODEL)
            .preamble(preamble)
            .build()
    }

    async fn chat(&self, preamble: &str, prompt: String) -> Result<String> {
        self.agent(preamble)
            .chat(prompt.as_str(), vec![])
            .await
            .map_err(|e| FlowError::Interpreter(e.to_string()))
    }
}

#[async_trait]
impl SelectionInterpreter for RigInterpreter {
    async fn match_selections(&self, text: &str, options: &[MenuOption]) -> Result<Vec<u32>> {
        if options.is_empty() {
            return Ok(Vec::new());
        }

        let candidates: Vec<serde_json::Value> = options
            .iter()
            .filter(|o| o.is_available)
            .map(|o| serde_json::json!({ "id": o.id, "name": o.name }))
            .collect();
        let prompt = format!(
            "Message: {text}\nCandidates: {}",
            serde_json::to_string(&candidates)?
        );

        let raw = self.chat(SELECTION_PROMPT, prompt).await?;
        let parsed: SelectionResponse = serde_json::from_str(clean_json(&raw)).map_err(|e| {
            FlowError::Interpreter(format!("bad selection response: {e}; raw: {raw}"))
        })?;

        let ids = validate_ids(parsed.option_ids, options);
        debug!(?ids, "llm selection match");
        Ok(ids)
    }

    async fn classify_intent(&self, text: &str, products: &[ProductSummary]) -> Result<Intent> {
        let listing: Vec<serde_json::Value> = products
            .iter()
            .map(|p| serde_json::json!({ "slug": p.slug, "name": p.name }))
            .collect();
        let prompt = format!(
            "Message: {text}\nProducts: {}",
            serde_json::to_string(&listing)?
        );

        let raw = self.chat(INTENT_PROMPT, prompt).await?;
        let parsed: IntentResponse = serde_json::from_str(clean_json(&raw))
            .map_err(|e| FlowError::Interpreter(format!("bad intent response: {e}; raw: {raw}")))?;

        Ok(intent_from_response(parsed, products))
    }
}

/// Strip the markdown code fences some models wrap around JSON.
fn clean_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix("```json").unwrap_or(trimmed);
    let trimmed = trimmed.strip_prefix("```").unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix("```").unwrap_or(trimmed);
    trimmed.trim()
}

/// Keep model order while dropping hallucinated ids and duplicates.
fn validate_ids(proposed: Vec<u32>, options: &[MenuOption]) -> Vec<u32> {
    let mut ids = Vec::new();
    for id in proposed {
        if options.iter().any(|o| o.id == id && o.is_available) && !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

fn intent_from_response(parsed: IntentResponse, products: &[ProductSummary]) -> Intent {
    match parsed.intent.as_str() {
        "start_builder" => {
            let product_slug = parsed
                .product_slug
                .filter(|slug| products.iter().any(|p| &p.slug == slug));
            Intent::StartBuilder { product_slug }
        }
        "browse_menu" => Intent::BrowseMenu,
        _ => Intent::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Vec<MenuOption> {
        vec![
            MenuOption::new(1, "Pollo", 0),
            MenuOption::new(2, "Carne", 1500),
            MenuOption::new(3, "Camarones", 2500).unavailable(),
        ]
    }

    #[test]
    fn fenced_json_is_cleaned() {
        assert_eq!(
            clean_json("```json\n{\"option_ids\": [1]}\n```"),
            "{\"option_ids\": [1]}"
        );
        assert_eq!(clean_json("```\n{\"intent\": \"other\"}\n```"), "{\"intent\": \"other\"}");
        assert_eq!(clean_json("  {\"option_ids\": []}  "), "{\"option_ids\": []}");
    }

    #[test]
    fn hallucinated_unavailable_and_duplicate_ids_are_dropped() {
        assert_eq!(validate_ids(vec![2, 99, 2, 3, 1], &options()), vec![2, 1]);
    }

    #[test]
    fn unknown_slug_downgrades_to_unnamed_start() {
        let products = vec![ProductSummary {
            slug: "bowl".to_string(),
            name: "Bowl de la Casa".to_string(),
            base_price: 9500,
        }];

        let intent = intent_from_response(
            IntentResponse {
                intent: "start_builder".to_string(),
                product_slug: Some("pizza".to_string()),
            },
            &products,
        );
        assert_eq!(intent, Intent::StartBuilder { product_slug: None });

        let intent = intent_from_response(
            IntentResponse {
                intent: "start_builder".to_string(),
                product_slug: Some("bowl".to_string()),
            },
            &products,
        );
        assert_eq!(
            intent,
            Intent::StartBuilder {
                product_slug: Some("bowl".to_string())
            }
        );
    }

    #[test]
    fn unrecognized_intent_label_is_other() {
        let intent = intent_from_response(
            IntentResponse {
                intent: "buy_stocks".to_string(),
                product_slug: None,
            },
            &[],
        );
        assert_eq!(intent, Intent::Other);
    }
}
