use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;

use crate::catalog::Selections;
use crate::error::Result;

/// Progress through a product's configuration steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuilderSession {
    pub product_slug: String,
    pub step_index: usize,
    #[serde(with = "selections_serde")]
    pub selections: Selections,
}

impl BuilderSession {
    pub fn new(product_slug: impl Into<String>) -> Self {
        Self {
            product_slug: product_slug.into(),
            step_index: 0,
            selections: Selections::new(),
        }
    }
}

/// Position within the post-builder form.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStage {
    CollectName,
    CollectDelivery,
    ShowSummary,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    Pickup,
    Delivery,
}

impl fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMethod::Pickup => write!(f, "Recoger en tienda"),
            DeliveryMethod::Delivery => write!(f, "Domicilio"),
        }
    }
}

/// Finalized configuration moving through checkout. `total_price` is
/// frozen at builder completion and never recomputed, so later catalog
/// edits cannot shift an in-flight order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckoutSession {
    pub product_slug: String,
    #[serde(with = "selections_serde")]
    pub selections: Selections,
    pub total_price: i64,
    pub stage: CheckoutStage,
    pub customer_name: Option<String>,
    pub delivery_method: Option<DeliveryMethod>,
}

impl CheckoutSession {
    pub fn new(product_slug: impl Into<String>, selections: Selections, total_price: i64) -> Self {
        Self {
            product_slug: product_slug.into(),
            selections,
            total_price,
            stage: CheckoutStage::CollectName,
            customer_name: None,
            delivery_method: None,
        }
    }
}

/// What the conversation is currently doing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ConversationMode {
    #[default]
    Idle,
    Building(BuilderSession),
    Checkout(CheckoutSession),
}

/// Full per-user conversation state: the current mode plus the message
/// buffer used for debounced input aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub user_id: String,
    pub mode: ConversationMode,
    pub buffer: Vec<String>,
    pub buffer_deadline: Option<DateTime<Utc>>,
    pub last_activity: DateTime<Utc>,
}

impl SessionState {
    pub fn fresh(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            mode: ConversationMode::Idle,
            buffer: Vec::new(),
            buffer_deadline: None,
            last_activity: Utc::now(),
        }
    }

    /// True while the flush scheduled for this session has not yet come due.
    pub fn buffer_open(&self, now: DateTime<Utc>) -> bool {
        self.buffer_deadline.is_some_and(|deadline| now < deadline)
    }

    /// Add a message and (re)arm the flush deadline. Messages already
    /// buffered are kept: if a previous window lapsed without its flush
    /// draining it (process restart), re-arming folds them into the new
    /// window instead of dropping them.
    pub fn buffer_arm(&mut self, text: impl Into<String>, deadline: DateTime<Utc>) {
        self.buffer.push(text.into());
        self.buffer_deadline = Some(deadline);
    }

    /// Append to an open buffer. The deadline is left untouched:
    /// follow-up messages ride the window opened by the first one.
    pub fn buffer_push(&mut self, text: impl Into<String>) {
        self.buffer.push(text.into());
    }

    /// Drain the buffer into one space-joined utterance, closing the
    /// window. `None` when nothing was buffered.
    pub fn buffer_take(&mut self) -> Option<String> {
        self.buffer_deadline = None;
        if self.buffer.is_empty() {
            return None;
        }
        let joined = self.buffer.join(" ");
        self.buffer.clear();
        Some(joined)
    }

    pub fn buffer_clear(&mut self) {
        self.buffer.clear();
        self.buffer_deadline = None;
    }

    pub fn expired(&self, now: DateTime<Utc>, ttl_secs: i64) -> bool {
        now - self.last_activity > Duration::seconds(ttl_secs)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }

    /// Drop all progress and return to idle.
    pub fn reset(&mut self) {
        self.mode = ConversationMode::Idle;
        self.buffer_clear();
    }
}

/// Trait for storing and retrieving conversation sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch the session for a user, creating a fresh idle one on miss.
    async fn get(&self, user_id: &str) -> Result<SessionState>;
    async fn save(&self, state: SessionState) -> Result<()>;
    async fn delete(&self, user_id: &str) -> Result<()>;
}

/// In-memory implementation of SessionStore.
pub struct InMemorySessionStore {
    sessions: Arc<DashMap<String, SessionState>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, user_id: &str) -> Result<SessionState> {
        Ok(self
            .sessions
            .get(user_id)
            .map(|entry| entry.clone())
            .unwrap_or_else(|| SessionState::fresh(user_id)))
    }

    async fn save(&self, state: SessionState) -> Result<()> {
        self.sessions.insert(state.user_id.clone(), state);
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<()> {
        self.sessions.remove(user_id);
        Ok(())
    }
}

/// Postgres-backed implementation of SessionStore. State is stored as a
/// JSONB document keyed by user id, so schema migrations are limited to
/// this one table.
pub struct PostgresSessionStore {
    pool: sqlx::PgPool,
}

impl PostgresSessionStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS order_sessions (
                user_id TEXT PRIMARY KEY,
                state JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn get(&self, user_id: &str) -> Result<SessionState> {
        let row = sqlx::query_as::<_, (serde_json::Value,)>(
            "SELECT state FROM order_sessions WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((value,)) => Ok(serde_json::from_value(value)?),
            None => Ok(SessionState::fresh(user_id)),
        }
    }

    async fn save(&self, state: SessionState) -> Result<()> {
        let value = serde_json::to_value(&state)?;
        sqlx::query(
            "INSERT INTO order_sessions (user_id, state, updated_at)
             VALUES ($1, $2, now())
             ON CONFLICT (user_id)
             DO UPDATE SET state = EXCLUDED.state, updated_at = now()",
        )
        .bind(&state.user_id)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM order_sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// JSON object keys are strings, and the internally tagged
/// `ConversationMode` deserializes through serde's buffered content,
/// which skips `serde_json`'s string-to-integer key coercion. The
/// step-id keys are therefore converted explicitly on both sides.
mod selections_serde {
    use std::collections::HashMap;

    use serde::de::{Deserialize, Deserializer, Error};
    use serde::ser::{Serialize, Serializer};

    use crate::catalog::Selections;

    pub fn serialize<S>(selections: &Selections, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let by_string: HashMap<String, &Vec<u32>> = selections
            .iter()
            .map(|(step_id, ids)| (step_id.to_string(), ids))
            .collect();
        by_string.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Selections, D::Error>
    where
        D: Deserializer<'de>,
    {
        let by_string: HashMap<String, Vec<u32>> = HashMap::deserialize(deserializer)?;
        by_string
            .into_iter()
            .map(|(step_id, ids)| {
                step_id
                    .parse::<u32>()
                    .map(|step_id| (step_id, ids))
                    .map_err(Error::custom)
            })
            .collect()
    }
}
