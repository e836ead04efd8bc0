//! OrderEngine – ties the debounce buffer, the two flow controllers and
//! the collaborators into one load → turn → save pipeline per user.
//!
//! `handle_inbound` only parks messages (or answers the fast path); the
//! actual conversational turn runs in `flush`, which re-reads the session
//! so late-arriving messages in the same window are folded into one turn.
//! Both entry points hold a per-user lock across their read-modify-write,
//! so one user's turns never interleave. Collaborator failures never
//! escape as errors: every expected failure class degrades to a
//! conversational reply.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{error, info, warn};

use crate::builder::{BuilderFlow, BuilderTurn, step_intro_reply};
use crate::catalog::{ProductCatalog, ProductSummary, Selections};
use crate::checkout::{CheckoutFlow, CheckoutTurn, OrderSink};
use crate::config::FlowConfig;
use crate::debounce::FlushScheduler;
use crate::error::Result;
use crate::interpreter::{Intent, SelectionInterpreter, equals_keyword};
use crate::pricing::format_price;
use crate::reply::{BotReply, ListRow, ReplySender};
use crate::session::{
    BuilderSession, CheckoutSession, ConversationMode, SessionState, SessionStore,
};

/// How `handle_inbound` disposed of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundDisposition {
    /// Answered immediately on the fast path.
    Answered,
    /// Parked in the debounce buffer; the scheduled flush will answer.
    Buffered,
}

/// Entry point for inbound chat messages.
#[derive(Clone)]
pub struct OrderEngine {
    store: Arc<dyn SessionStore>,
    catalog: Arc<dyn ProductCatalog>,
    interpreter: Arc<dyn SelectionInterpreter>,
    outbound: Arc<dyn ReplySender>,
    builder: BuilderFlow,
    checkout: CheckoutFlow,
    scheduler: FlushScheduler,
    config: FlowConfig,
    turn_locks: Arc<DashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl OrderEngine {
    pub fn new(
        store: Arc<dyn SessionStore>,
        catalog: Arc<dyn ProductCatalog>,
        interpreter: Arc<dyn SelectionInterpreter>,
        orders: Arc<dyn OrderSink>,
        outbound: Arc<dyn ReplySender>,
        config: FlowConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            interpreter: interpreter.clone(),
            outbound,
            builder: BuilderFlow::new(interpreter, config.clone()),
            checkout: CheckoutFlow::new(orders, config.clone()),
            scheduler: FlushScheduler::new(config.debounce_window_ms),
            config,
            turn_locks: Arc::new(DashMap::new()),
        }
    }

    /// One lock per user, held by `handle_inbound` and `flush` across
    /// their read-modify-write. Same-user turns stay strictly
    /// sequential; distinct users proceed in parallel.
    fn turn_lock(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.turn_locks.entry(user_id.to_string()).or_default().clone()
    }

    /// Accept one inbound message: answer it on the fast path, or buffer
    /// it and make sure a flush is coming.
    pub async fn handle_inbound(&self, user_id: &str, text: &str) -> Result<InboundDisposition> {
        let lock = self.turn_lock(user_id);
        let _turn = lock.lock().await;

        let now = Utc::now();
        let mut state = match self.store.get(user_id).await {
            Ok(state) => state,
            Err(err) => {
                warn!(error = %err, user_id = %user_id, "session read failed");
                self.send_reply(user_id, retry_reply()).await;
                return Ok(InboundDisposition::Answered);
            }
        };

        // Greeting/menu shortcuts skip the debounce window, but only while
        // idle: mid-flow, every word may be part of an ingredient list.
        if matches!(state.mode, ConversationMode::Idle) && self.is_fast_path(text) {
            state.buffer_clear();
            state.touch(now);
            let reply = self.fast_path_reply(text).await;
            if !self.save_with_retry(state).await {
                warn!(user_id = %user_id, "fast path state not persisted");
            }
            self.send_reply(user_id, reply).await;
            return Ok(InboundDisposition::Answered);
        }

        if state.buffer_open(now) {
            state.buffer_push(text);
            if !self.save_with_retry(state).await {
                self.send_reply(user_id, retry_reply()).await;
                return Ok(InboundDisposition::Answered);
            }
            return Ok(InboundDisposition::Buffered);
        }

        let deadline = self.scheduler.next_deadline(now);
        state.buffer_arm(text, deadline);
        if !self.save_with_retry(state).await {
            self.send_reply(user_id, retry_reply()).await;
            return Ok(InboundDisposition::Answered);
        }

        let engine = self.clone();
        let user = user_id.to_string();
        self.scheduler.schedule_at(user_id, deadline, move || async move {
            if let Err(err) = engine.flush(&user).await {
                error!(error = %err, user_id = %user, "debounce flush failed");
            }
        });
        Ok(InboundDisposition::Buffered)
    }

    /// Close the debounce window for a user: drain whatever is buffered
    /// now, run one turn over the aggregate, persist, reply.
    pub async fn flush(&self, user_id: &str) -> Result<()> {
        let lock = self.turn_lock(user_id);
        let _turn = lock.lock().await;

        // Re-read at fire time; the buffer may have grown since scheduling.
        let mut state = match self.store.get(user_id).await {
            Ok(state) => state,
            Err(err) => {
                warn!(error = %err, user_id = %user_id, "session read failed at flush");
                self.send_reply(user_id, retry_reply()).await;
                return Ok(());
            }
        };

        let Some(text) = state.buffer_take() else {
            // Drained by a fast path or a competing flush.
            return Ok(());
        };

        let mut reply = self.run_turn(&mut state, &text).await;
        if !self.save_with_retry(state).await {
            // The turn's outcome was not persisted; asking the user to
            // resend beats replying as if it had been.
            reply = retry_reply();
        }
        self.send_reply(user_id, reply).await;
        Ok(())
    }

    /// One conversational turn over aggregated text. Infallible: every
    /// failure inside maps to a mode transition plus a reply.
    async fn run_turn(&self, state: &mut SessionState, text: &str) -> BotReply {
        let now = Utc::now();
        if !matches!(state.mode, ConversationMode::Idle)
            && state.expired(now, self.config.session_ttl_secs)
        {
            info!(user_id = %state.user_id, "session expired, starting fresh");
            state.reset();
        }
        state.touch(now);

        let mode = std::mem::take(&mut state.mode);
        let (mode, reply) = match mode {
            ConversationMode::Idle => self.idle_turn(text).await,
            ConversationMode::Building(session) => self.building_turn(session, text).await,
            ConversationMode::Checkout(session) => self.checkout_turn(session, text).await,
        };
        state.mode = mode;
        reply
    }

    async fn idle_turn(&self, text: &str) -> (ConversationMode, BotReply) {
        let products = self.list_products_degraded().await;
        let intent = match self.interpreter.classify_intent(text, &products).await {
            Ok(intent) => intent,
            Err(err) => {
                warn!(error = %err, "intent classification failed");
                Intent::Other
            }
        };

        match intent {
            Intent::StartBuilder {
                product_slug: Some(slug),
            } => self.start_builder(&slug, &products).await,
            Intent::StartBuilder { product_slug: None } | Intent::BrowseMenu => {
                (ConversationMode::Idle, menu_reply(&products))
            }
            Intent::Other => (ConversationMode::Idle, greeting_reply()),
        }
    }

    async fn start_builder(
        &self,
        slug: &str,
        products: &[ProductSummary],
    ) -> (ConversationMode, BotReply) {
        match self.catalog.get_product_by_slug(slug).await {
            Ok(Some(product)) => {
                if product.steps.is_empty() {
                    // Nothing to configure, go straight to checkout.
                    let checkout = CheckoutSession::new(
                        product.slug.clone(),
                        Selections::new(),
                        product.base_price,
                    );
                    let reply = BotReply::text(format!(
                        "¡{}! Total: {}.\n¿A nombre de quién va el pedido?",
                        product.name,
                        format_price(product.base_price)
                    ));
                    return (ConversationMode::Checkout(checkout), reply);
                }

                let session = BuilderSession::new(product.slug.clone());
                let reply = step_intro_reply(&product, 0, &session.selections).with_preamble(
                    format!(
                        "Vamos a armar tu {} ({} base).",
                        product.name,
                        format_price(product.base_price)
                    ),
                );
                (ConversationMode::Building(session), reply)
            }
            Ok(None) => (
                ConversationMode::Idle,
                menu_reply(products).with_preamble("No encontré ese producto en el menú de hoy."),
            ),
            Err(err) => {
                warn!(error = %err, slug = %slug, "catalog read failed");
                (ConversationMode::Idle, transient_reply())
            }
        }
    }

    async fn building_turn(
        &self,
        session: BuilderSession,
        text: &str,
    ) -> (ConversationMode, BotReply) {
        let product = match self.catalog.get_product_by_slug(&session.product_slug).await {
            Ok(Some(product)) => product,
            Ok(None) => {
                info!(slug = %session.product_slug, "product vanished mid-builder, clearing session");
                return (
                    ConversationMode::Idle,
                    BotReply::text(
                        "Ese producto ya no está disponible, así que cancelé el pedido. Escribe \"menú\" para ver lo de hoy.",
                    ),
                );
            }
            Err(err) => {
                warn!(error = %err, "catalog read failed, keeping builder session");
                return (ConversationMode::Building(session), transient_reply());
            }
        };

        let mut session = session;
        match self.builder.advance(&mut session, &product, text).await {
            Ok(BuilderTurn::Continue(reply)) => (ConversationMode::Building(session), reply),
            Ok(BuilderTurn::Completed { checkout, reply }) => {
                (ConversationMode::Checkout(checkout), reply)
            }
            Ok(BuilderTurn::Cancelled(reply)) => (ConversationMode::Idle, reply),
            Err(err) => {
                error!(error = %err, "builder session corrupted, resetting");
                (ConversationMode::Idle, corrupted_reply())
            }
        }
    }

    async fn checkout_turn(
        &self,
        session: CheckoutSession,
        text: &str,
    ) -> (ConversationMode, BotReply) {
        let product = match self.catalog.get_product_by_slug(&session.product_slug).await {
            Ok(Some(product)) => product,
            Ok(None) => {
                info!(slug = %session.product_slug, "product vanished mid-checkout, clearing session");
                return (
                    ConversationMode::Idle,
                    BotReply::text(
                        "Ese producto ya no está disponible, así que cancelé el pedido. Escribe \"menú\" para ver lo de hoy.",
                    ),
                );
            }
            Err(err) => {
                warn!(error = %err, "catalog read failed, keeping checkout session");
                return (ConversationMode::Checkout(session), transient_reply());
            }
        };

        let mut session = session;
        match self.checkout.advance(&mut session, &product, text).await {
            Ok(CheckoutTurn::Continue(reply)) => (ConversationMode::Checkout(session), reply),
            Ok(CheckoutTurn::Confirmed { order, reply }) => {
                info!(reference = %order.reference, total = order.total_price, "order confirmed");
                (ConversationMode::Idle, reply)
            }
            Ok(CheckoutTurn::Cancelled(reply)) => (ConversationMode::Idle, reply),
            Err(err) => {
                error!(error = %err, "checkout session corrupted, resetting");
                (ConversationMode::Idle, corrupted_reply())
            }
        }
    }

    fn is_fast_path(&self, text: &str) -> bool {
        equals_keyword(text, &self.config.greeting_keywords)
            || equals_keyword(text, &self.config.menu_keywords)
    }

    async fn fast_path_reply(&self, text: &str) -> BotReply {
        if equals_keyword(text, &self.config.menu_keywords) {
            menu_reply(&self.list_products_degraded().await)
        } else {
            greeting_reply()
        }
    }

    async fn list_products_degraded(&self) -> Vec<ProductSummary> {
        match self.catalog.list_products().await {
            Ok(products) => products,
            Err(err) => {
                warn!(error = %err, "catalog listing failed");
                Vec::new()
            }
        }
    }

    /// Save, retrying once. `false` means the state is not persisted and
    /// the caller should surface a recoverable reply.
    async fn save_with_retry(&self, state: SessionState) -> bool {
        let user_id = state.user_id.clone();
        match self.store.save(state.clone()).await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, user_id = %user_id, "session save failed, retrying once");
                match self.store.save(state).await {
                    Ok(()) => true,
                    Err(err) => {
                        error!(error = %err, user_id = %user_id, "session save retry failed");
                        false
                    }
                }
            }
        }
    }

    async fn send_reply(&self, user_id: &str, reply: BotReply) {
        if let Err(err) = self.outbound.send(user_id, reply).await {
            warn!(error = %err, user_id = %user_id, "outbound send failed");
        }
    }
}

fn menu_reply(products: &[ProductSummary]) -> BotReply {
    if products.is_empty() {
        return BotReply::text("Estamos actualizando el menú, vuelve en un momento.");
    }
    let rows = products
        .iter()
        .map(|p| {
            ListRow::new(p.slug.clone(), p.name.clone())
                .with_description(format_price(p.base_price))
        })
        .collect();
    BotReply::list(
        "Esto es lo que tenemos hoy. Dime cuál se te antoja:",
        "Menú",
        rows,
    )
}

fn greeting_reply() -> BotReply {
    BotReply::text(
        "¡Hola! Soy el asistente de pedidos. Dime qué se te antoja o escribe \"menú\" para ver lo de hoy.",
    )
}

fn retry_reply() -> BotReply {
    BotReply::text("Tuve un problema guardando tu mensaje. ¿Me lo mandas de nuevo?")
}

fn transient_reply() -> BotReply {
    BotReply::text("Tuve un problema consultando el menú. Intenta de nuevo en un momento.")
}

fn corrupted_reply() -> BotReply {
    BotReply::text("Algo salió mal con tu pedido y tuve que reiniciarlo. ¿Empezamos de nuevo?")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ConfigStep, InMemoryProductCatalog, MenuOption, Product};
    use crate::checkout::InMemoryOrderSink;
    use crate::error::FlowError;
    use crate::interpreter::KeywordInterpreter;
    use crate::session::InMemorySessionStore;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::Mutex;

    struct RecordingSender {
        sent: Mutex<Vec<(String, BotReply)>>,
    }

    impl RecordingSender {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
            }
        }

        fn replies(&self) -> Vec<(String, BotReply)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReplySender for RecordingSender {
        async fn send(&self, user_id: &str, reply: BotReply) -> Result<()> {
            self.sent.lock().unwrap().push((user_id.to_string(), reply));
            Ok(())
        }
    }

    struct FailingSaveStore {
        inner: InMemorySessionStore,
    }

    #[async_trait]
    impl SessionStore for FailingSaveStore {
        async fn get(&self, user_id: &str) -> Result<SessionState> {
            self.inner.get(user_id).await
        }

        async fn save(&self, _state: SessionState) -> Result<()> {
            Err(FlowError::Storage("disk full".to_string()))
        }

        async fn delete(&self, user_id: &str) -> Result<()> {
            self.inner.delete(user_id).await
        }
    }

    /// Always classifies the message as an order for one fixed slug.
    struct FixedSlugInterpreter {
        slug: &'static str,
    }

    #[async_trait]
    impl SelectionInterpreter for FixedSlugInterpreter {
        async fn match_selections(&self, _text: &str, _options: &[MenuOption]) -> Result<Vec<u32>> {
            Ok(Vec::new())
        }

        async fn classify_intent(&self, _text: &str, _products: &[ProductSummary]) -> Result<Intent> {
            Ok(Intent::StartBuilder {
                product_slug: Some(self.slug.to_string()),
            })
        }
    }

    fn bowl() -> Product {
        Product {
            id: 1,
            name: "Bowl de la Casa".to_string(),
            slug: "bowl".to_string(),
            base_price: 9500,
            steps: vec![
                ConfigStep {
                    id: 1,
                    label: "Base".to_string(),
                    order: 1,
                    min_selections: 1,
                    max_selections: Some(1),
                    included_selections: 1,
                    price_per_extra: 0,
                    options: vec![
                        MenuOption::new(1, "Arroz blanco", 0),
                        MenuOption::new(2, "Quinoa", 800),
                    ],
                },
                ConfigStep {
                    id: 2,
                    label: "Proteína".to_string(),
                    order: 2,
                    min_selections: 1,
                    max_selections: Some(1),
                    included_selections: 1,
                    price_per_extra: 0,
                    options: vec![
                        MenuOption::new(10, "Pollo", 0),
                        MenuOption::new(11, "Carne", 1500),
                    ],
                },
            ],
        }
    }

    struct Harness {
        engine: OrderEngine,
        store: Arc<InMemorySessionStore>,
        catalog: Arc<InMemoryProductCatalog>,
        orders: Arc<InMemoryOrderSink>,
        outbound: Arc<RecordingSender>,
    }

    /// Engine with a window long enough that no timer flush can fire
    /// during a test; flushes are driven manually.
    fn harness() -> Harness {
        let store = Arc::new(InMemorySessionStore::new());
        let catalog = Arc::new(InMemoryProductCatalog::new());
        catalog.insert(bowl());
        let orders = Arc::new(InMemoryOrderSink::new());
        let outbound = Arc::new(RecordingSender::new());
        let config = FlowConfig {
            debounce_window_ms: 600_000,
            ..FlowConfig::default()
        };
        let engine = OrderEngine::new(
            store.clone(),
            catalog.clone(),
            Arc::new(KeywordInterpreter),
            orders.clone(),
            outbound.clone(),
            config,
        );
        Harness {
            engine,
            store,
            catalog,
            orders,
            outbound,
        }
    }

    #[tokio::test]
    async fn greeting_is_answered_immediately_when_idle() {
        let h = harness();

        let disposition = h.engine.handle_inbound("u1", "hola").await.unwrap();

        assert_eq!(disposition, InboundDisposition::Answered);
        let replies = h.outbound.replies();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].1.body().contains("asistente de pedidos"));
    }

    #[tokio::test]
    async fn menu_fast_path_lists_products() {
        let h = harness();

        h.engine.handle_inbound("u1", "menú").await.unwrap();

        let replies = h.outbound.replies();
        match &replies[0].1 {
            BotReply::List { rows, .. } => {
                assert_eq!(rows[0].id, "bowl");
                assert_eq!(rows[0].description.as_deref(), Some("$95.00"));
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fast_path_clears_a_pending_buffer() {
        let h = harness();

        let first = h.engine.handle_inbound("u1", "quiero un bowl").await.unwrap();
        assert_eq!(first, InboundDisposition::Buffered);

        h.engine.handle_inbound("u1", "hola").await.unwrap();
        // The scheduled flush now finds nothing to do.
        h.engine.flush("u1").await.unwrap();

        assert_eq!(h.outbound.replies().len(), 1);
        let state = h.store.get("u1").await.unwrap();
        assert!(state.buffer.is_empty());
    }

    #[tokio::test]
    async fn greeting_mid_builder_is_buffered_not_fast_pathed() {
        let h = harness();
        let mut state = SessionState::fresh("u1");
        state.mode = ConversationMode::Building(BuilderSession::new("bowl"));
        h.store.save(state).await.unwrap();

        let disposition = h.engine.handle_inbound("u1", "hola").await.unwrap();

        assert_eq!(disposition, InboundDisposition::Buffered);
        assert!(h.outbound.replies().is_empty());
    }

    #[tokio::test]
    async fn flush_aggregates_buffered_messages_into_one_turn() {
        let h = harness();
        let mut state = SessionState::fresh("u1");
        state.mode = ConversationMode::Building(BuilderSession::new("bowl"));
        h.store.save(state).await.unwrap();

        h.engine.handle_inbound("u1", "arroz").await.unwrap();
        h.engine.handle_inbound("u1", "blanco").await.unwrap();
        h.engine.flush("u1").await.unwrap();

        // "arroz" + "blanco" only match as the joined "arroz blanco".
        assert_eq!(h.outbound.replies().len(), 1);
        let state = h.store.get("u1").await.unwrap();
        match state.mode {
            ConversationMode::Building(session) => {
                assert_eq!(session.selections.get(&1), Some(&vec![1]));
                assert_eq!(session.step_index, 1);
            }
            other => panic!("unexpected mode: {other:?}"),
        }
    }

    #[tokio::test]
    async fn flush_with_empty_buffer_is_a_noop() {
        let h = harness();
        h.engine.flush("nobody").await.unwrap();
        assert!(h.outbound.replies().is_empty());
    }

    #[tokio::test]
    async fn expired_session_starts_fresh_on_next_turn() {
        let h = harness();
        let mut state = SessionState::fresh("u1");
        state.mode = ConversationMode::Building(BuilderSession::new("bowl"));
        state.last_activity = Utc::now() - Duration::hours(2);
        h.store.save(state).await.unwrap();

        h.engine.handle_inbound("u1", "gracias").await.unwrap();
        h.engine.flush("u1").await.unwrap();

        let state = h.store.get("u1").await.unwrap();
        assert_eq!(state.mode, ConversationMode::Idle);
    }

    #[tokio::test]
    async fn vanished_product_clears_the_session() {
        let h = harness();
        let mut state = SessionState::fresh("u1");
        state.mode = ConversationMode::Building(BuilderSession::new("bowl"));
        h.store.save(state).await.unwrap();
        h.catalog.remove("bowl");

        h.engine.handle_inbound("u1", "quinoa").await.unwrap();
        h.engine.flush("u1").await.unwrap();

        let replies = h.outbound.replies();
        assert!(replies[0].1.body().contains("ya no está disponible"));
        let state = h.store.get("u1").await.unwrap();
        assert_eq!(state.mode, ConversationMode::Idle);
    }

    #[tokio::test]
    async fn failed_save_surfaces_a_recoverable_reply() {
        let inner = InMemorySessionStore::new();
        let mut state = SessionState::fresh("u1");
        state.buffer_arm("quiero un bowl", Utc::now() + Duration::seconds(30));
        inner.save(state).await.unwrap();

        let outbound = Arc::new(RecordingSender::new());
        let catalog = Arc::new(InMemoryProductCatalog::new());
        catalog.insert(bowl());
        let engine = OrderEngine::new(
            Arc::new(FailingSaveStore { inner }),
            catalog,
            Arc::new(KeywordInterpreter),
            Arc::new(InMemoryOrderSink::new()),
            outbound.clone(),
            FlowConfig::default(),
        );

        engine.flush("u1").await.unwrap();

        let replies = outbound.replies();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].1.body().contains("¿Me lo mandas de nuevo?"));
    }

    #[tokio::test]
    async fn idle_order_intent_enters_the_builder() {
        let h = harness();

        h.engine.handle_inbound("u1", "quiero un bowl de la casa").await.unwrap();
        h.engine.flush("u1").await.unwrap();

        let replies = h.outbound.replies();
        assert!(replies[0].1.body().contains("Vamos a armar tu Bowl de la Casa"));
        let state = h.store.get("u1").await.unwrap();
        assert!(matches!(state.mode, ConversationMode::Building(_)));
    }

    #[tokio::test]
    async fn unknown_product_intent_answers_with_the_menu() {
        let store = Arc::new(InMemorySessionStore::new());
        let catalog = Arc::new(InMemoryProductCatalog::new());
        catalog.insert(bowl());
        let outbound = Arc::new(RecordingSender::new());
        let engine = OrderEngine::new(
            store.clone(),
            catalog,
            Arc::new(FixedSlugInterpreter { slug: "fantasma" }),
            Arc::new(InMemoryOrderSink::new()),
            outbound.clone(),
            FlowConfig {
                debounce_window_ms: 600_000,
                ..FlowConfig::default()
            },
        );

        engine.handle_inbound("u1", "quiero el especial de ayer").await.unwrap();
        engine.flush("u1").await.unwrap();

        let replies = outbound.replies();
        assert!(replies[0].1.body().contains("No encontré ese producto"));
        match &replies[0].1 {
            BotReply::List { rows, .. } => assert_eq!(rows[0].id, "bowl"),
            other => panic!("unexpected reply: {other:?}"),
        }
        let state = store.get("u1").await.unwrap();
        assert_eq!(state.mode, ConversationMode::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn simultaneous_messages_all_land_in_one_buffer() {
        let h = harness();
        let mut state = SessionState::fresh("u1");
        state.mode = ConversationMode::Building(BuilderSession::new("bowl"));
        h.store.save(state).await.unwrap();

        let words = ["arroz", "pollo", "aguacate", "elote", "queso", "frijoles"];
        let mut tasks = Vec::new();
        for word in words {
            let engine = h.engine.clone();
            tasks.push(tokio::spawn(async move {
                engine.handle_inbound("u1", word).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // No interleaving read-modify-write may overwrite another's push.
        let state = h.store.get("u1").await.unwrap();
        assert_eq!(state.buffer.len(), words.len());
        assert!(h.outbound.replies().is_empty());
    }

    #[tokio::test]
    async fn full_conversation_reaches_a_confirmed_order() {
        let h = harness();
        let user = "573001112233";

        for text in [
            "quiero un bowl",
            "quinoa",
            "carne",
            "Valentina",
            "recoger",
            "confirmar",
        ] {
            h.engine.handle_inbound(user, text).await.unwrap();
            h.engine.flush(user).await.unwrap();
        }

        let orders = h.orders.orders();
        assert_eq!(orders.len(), 1);
        // base 9500 + quinoa 800 + carne 1500
        assert_eq!(orders[0].total_price, 11800);
        assert_eq!(orders[0].customer_name, "Valentina");

        let state = h.store.get(user).await.unwrap();
        assert_eq!(state.mode, ConversationMode::Idle);
        let last = h.outbound.replies().pop().unwrap();
        assert!(last.1.body().contains("confirmado"));
    }
}
