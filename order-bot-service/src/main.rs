mod interpreter;
mod menu;
mod outbound;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::{Next, from_fn},
    response::Json,
    routing::{get, post},
};
use order_flow::{
    BotReply, FlowConfig, InMemoryOrderSink, InMemoryProductCatalog, InMemorySessionStore,
    InboundDisposition, KeywordInterpreter, OrderDescriptor, OrderEngine, PostgresSessionStore,
    SelectionInterpreter, SessionState, SessionStore,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{Instrument, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::interpreter::RigInterpreter;
use crate::outbound::BufferedReplySender;

#[derive(Clone)]
struct AppState {
    engine: OrderEngine,
    store: Arc<dyn SessionStore>,
    orders: Arc<InMemoryOrderSink>,
    outbound: Arc<BufferedReplySender>,
}

#[derive(Debug, Deserialize)]
struct InboundMessage {
    user_id: String,
    text: String,
}

#[derive(Debug, Serialize)]
struct InboundAck {
    disposition: String,
}

/// Initialize structured JSON tracing based on environment variables
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "order_bot_service=debug,order_flow=debug,tower_http=debug".into());

    match log_format.as_str() {
        "pretty" => {
            // Human-readable logging for development
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        _ => {
            // Structured JSON logging for production
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true),
                )
                .init();
        }
    }
}

/// Middleware to add correlation ID to all requests
async fn correlation_id_middleware(
    mut request: Request<axum::body::Body>,
    next: Next,
) -> axum::response::Response {
    let correlation_id = Uuid::new_v4().to_string();

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        request.headers_mut().insert("x-correlation-id", value);
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    next.run(request).instrument(span).await
}

async fn select_session_store() -> Arc<dyn SessionStore> {
    if let Ok(database_url) = std::env::var("DATABASE_URL") {
        info!("Using PostgreSQL session storage");
        match PostgresSessionStore::connect(&database_url).await {
            Ok(store) => return Arc::new(store),
            Err(e) => {
                error!(
                    "Failed to connect to PostgreSQL: {}. Falling back to in-memory storage.",
                    e
                );
            }
        }
    } else {
        info!("Using in-memory session storage (set DATABASE_URL to use PostgreSQL)");
    }
    Arc::new(InMemorySessionStore::new())
}

fn select_interpreter() -> Arc<dyn SelectionInterpreter> {
    match RigInterpreter::from_env() {
        Ok(rig) => {
            info!("Using LLM selection interpreter");
            Arc::new(rig)
        }
        Err(e) => {
            info!(
                "LLM interpreter unavailable ({}), using keyword matching only",
                e
            );
            Arc::new(KeywordInterpreter)
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let store = select_session_store().await;
    let interpreter = select_interpreter();

    let catalog = Arc::new(InMemoryProductCatalog::new());
    menu::seed_menu(&catalog);

    let orders = Arc::new(InMemoryOrderSink::new());
    let outbound = Arc::new(BufferedReplySender::new());

    let engine = OrderEngine::new(
        store.clone(),
        catalog,
        interpreter,
        orders.clone(),
        outbound.clone(),
        FlowConfig::default(),
    );

    let app_state = AppState {
        engine,
        store,
        orders,
        outbound,
    };

    // Build the router with correlation ID middleware
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/webhook/message", post(receive_message))
        .route("/replies/{user_id}", get(drain_replies))
        .route("/session/{user_id}", get(get_session))
        .route("/orders", get(list_orders))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(from_fn(correlation_id_middleware)),
        )
        .with_state(app_state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();

    info!("Server running on http://{addr}");

    axum::serve(listener, app).await.unwrap();
}

async fn health_check() -> &'static str {
    "OK"
}

/// Inbound webhook: one chat message in, an ack out. The reply itself
/// goes through the engine's outbound sender, usually after the debounce
/// window closes.
async fn receive_message(
    State(state): State<AppState>,
    Json(message): Json<InboundMessage>,
) -> Result<Json<InboundAck>, StatusCode> {
    if message.user_id.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    info!(
        user_id = %message.user_id,
        text_length = message.text.len(),
        "Inbound message received"
    );

    match state
        .engine
        .handle_inbound(&message.user_id, &message.text)
        .await
    {
        Ok(disposition) => {
            let disposition = match disposition {
                InboundDisposition::Answered => "answered",
                InboundDisposition::Buffered => "buffered",
            };
            Ok(Json(InboundAck {
                disposition: disposition.to_string(),
            }))
        }
        Err(e) => {
            error!(
                user_id = %message.user_id,
                error = %e,
                "Failed to handle inbound message"
            );
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn drain_replies(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<Vec<BotReply>> {
    Json(state.outbound.drain(&user_id))
}

async fn get_session(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<SessionState>, StatusCode> {
    match state.store.get(&user_id).await {
        Ok(session) => Ok(Json(session)),
        Err(e) => {
            error!(user_id = %user_id, error = %e, "Failed to get session");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn list_orders(State(state): State<AppState>) -> Json<Vec<OrderDescriptor>> {
    Json(state.orders.orders())
}
