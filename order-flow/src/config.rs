use serde::{Deserialize, Serialize};

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|w| w.to_string()).collect()
}

/// Tunable policy knobs for the conversation flow.
///
/// Keyword lists are matched against normalized input (lowercased,
/// punctuation stripped), so entries should be lowercase and accent-free
/// variants should be listed alongside accented ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// When true, an explicit "done" on a step below `min_selections` keeps
    /// the user on that step instead of advancing. Default false: an
    /// explicit done always advances.
    pub done_enforces_minimum: bool,
    /// Quiet window after the first buffered message before a flush fires.
    pub debounce_window_ms: i64,
    /// Inactivity horizon after which a session is discarded on next contact.
    pub session_ttl_secs: i64,
    pub cancel_keywords: Vec<String>,
    pub done_keywords: Vec<String>,
    pub confirm_keywords: Vec<String>,
    pub pickup_keywords: Vec<String>,
    pub delivery_keywords: Vec<String>,
    pub greeting_keywords: Vec<String>,
    pub menu_keywords: Vec<String>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            done_enforces_minimum: false,
            debounce_window_ms: 3000,
            session_ttl_secs: 1800,
            cancel_keywords: words(&["cancelar", "cancel", "salir", "exit"]),
            done_keywords: words(&["listo", "done", "siguiente", "next", "ya"]),
            confirm_keywords: words(&["confirmar", "confirm", "si", "sí", "yes"]),
            pickup_keywords: words(&["recoger", "pickup", "recojo"]),
            delivery_keywords: words(&["domicilio", "delivery", "envio", "envío"]),
            greeting_keywords: words(&["hola", "hello", "hi", "buenas"]),
            menu_keywords: words(&["menu", "menú", "carta"]),
        }
    }
}
