pub mod builder;
pub mod catalog;
pub mod checkout;
pub mod config;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod interpreter;
pub mod pricing;
pub mod reply;
pub mod session;

// Re-export commonly used types
pub use builder::{BuilderFlow, BuilderTurn};
pub use catalog::{
    ConfigStep, InMemoryProductCatalog, MenuOption, Product, ProductCatalog, ProductSummary,
    Selections,
};
pub use checkout::{
    CheckoutFlow, CheckoutTurn, InMemoryOrderSink, OrderDescriptor, OrderLine, OrderSink,
};
pub use config::FlowConfig;
pub use debounce::FlushScheduler;
pub use engine::{InboundDisposition, OrderEngine};
pub use error::{FlowError, Result};
pub use interpreter::{Intent, KeywordInterpreter, SelectionInterpreter};
pub use pricing::{compute_total, format_price, option_price_preview, step_cost};
pub use reply::{BotReply, ListRow, ReplyButton, ReplySender};
pub use session::{
    BuilderSession, CheckoutSession, CheckoutStage, ConversationMode, DeliveryMethod,
    InMemorySessionStore, PostgresSessionStore, SessionState, SessionStore,
};
