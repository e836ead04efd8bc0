use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::catalog::{Product, Selections};
use crate::config::FlowConfig;
use crate::error::{FlowError, Result};
use crate::interpreter::contains_keyword;
use crate::pricing::{format_price, step_cost};
use crate::reply::{BotReply, ReplyButton};
use crate::session::{CheckoutSession, CheckoutStage, DeliveryMethod};

/// One summary line of a finalized order: a step and what was picked in
/// it, with that step's cost contribution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderLine {
    pub step_label: String,
    pub option_names: Vec<String>,
    pub line_total: i64,
}

/// A confirmed order, ready for persistence. `total_price` is the value
/// frozen at builder completion, not a recomputation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderDescriptor {
    pub reference: String,
    pub customer_name: String,
    pub delivery_method: DeliveryMethod,
    pub product_name: String,
    pub lines: Vec<OrderLine>,
    pub total_price: i64,
    pub created_at: DateTime<Utc>,
}

/// Write-side persistence for confirmed orders. The flow treats a
/// failure as "ask the user to retry", never as a state-machine error.
#[async_trait]
pub trait OrderSink: Send + Sync {
    async fn submit(&self, order: OrderDescriptor) -> Result<()>;
}

/// In-memory implementation of OrderSink, keyed by order reference.
pub struct InMemoryOrderSink {
    orders: Arc<DashMap<String, OrderDescriptor>>,
}

impl InMemoryOrderSink {
    pub fn new() -> Self {
        Self {
            orders: Arc::new(DashMap::new()),
        }
    }

    pub fn orders(&self) -> Vec<OrderDescriptor> {
        self.orders.iter().map(|entry| entry.clone()).collect()
    }
}

impl Default for InMemoryOrderSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderSink for InMemoryOrderSink {
    async fn submit(&self, order: OrderDescriptor) -> Result<()> {
        self.orders.insert(order.reference.clone(), order);
        Ok(())
    }
}

/// Outcome of one checkout turn.
#[derive(Debug)]
pub enum CheckoutTurn {
    Continue(BotReply),
    Confirmed {
        order: OrderDescriptor,
        reply: BotReply,
    },
    Cancelled(BotReply),
}

/// Linear form filler: name, delivery method, summary confirmation.
#[derive(Clone)]
pub struct CheckoutFlow {
    orders: Arc<dyn OrderSink>,
    config: FlowConfig,
}

impl CheckoutFlow {
    pub fn new(orders: Arc<dyn OrderSink>, config: FlowConfig) -> Self {
        Self { orders, config }
    }

    pub async fn advance(
        &self,
        session: &mut CheckoutSession,
        product: &Product,
        text: &str,
    ) -> Result<CheckoutTurn> {
        // Cancel is honored at every stage, not just the summary.
        if contains_keyword(text, &self.config.cancel_keywords) {
            return Ok(CheckoutTurn::Cancelled(BotReply::text(
                "Pedido cancelado. Escríbeme \"menú\" cuando quieras empezar de nuevo.",
            )));
        }

        match session.stage {
            CheckoutStage::CollectName => {
                let name = text.trim();
                if name.chars().count() < 2 {
                    return Ok(CheckoutTurn::Continue(BotReply::text(
                        "¿Me repites tu nombre? Necesito al menos 2 letras.",
                    )));
                }
                session.customer_name = Some(name.to_string());
                session.stage = CheckoutStage::CollectDelivery;
                Ok(CheckoutTurn::Continue(delivery_prompt(name)))
            }
            CheckoutStage::CollectDelivery => {
                let Some(method) = self.classify_delivery(text) else {
                    return Ok(CheckoutTurn::Continue(BotReply::buttons(
                        "No te entendí. ¿Recoges en tienda o enviamos a domicilio?",
                        delivery_buttons(),
                    )));
                };
                session.delivery_method = Some(method);
                session.stage = CheckoutStage::ShowSummary;
                Ok(CheckoutTurn::Continue(summary_reply(product, session)))
            }
            CheckoutStage::ShowSummary => {
                if !contains_keyword(text, &self.config.confirm_keywords) {
                    return Ok(CheckoutTurn::Continue(BotReply::buttons(
                        "¿Confirmamos el pedido?",
                        confirm_buttons(),
                    )));
                }

                let order = build_order(session, product)?;
                if let Err(err) = self.orders.submit(order.clone()).await {
                    error!(error = %err, reference = %order.reference, "order submission failed");
                    return Ok(CheckoutTurn::Continue(BotReply::buttons(
                        "No pude registrar tu pedido. Intenta confirmar de nuevo en un momento.",
                        confirm_buttons(),
                    )));
                }

                let reply = BotReply::text(format!(
                    "✅ ¡Pedido {} confirmado, {}! Total: {}. Entrega: {}.",
                    order.reference,
                    order.customer_name,
                    format_price(order.total_price),
                    order.delivery_method
                ));
                Ok(CheckoutTurn::Confirmed { order, reply })
            }
        }
    }

    fn classify_delivery(&self, text: &str) -> Option<DeliveryMethod> {
        if contains_keyword(text, &self.config.pickup_keywords) {
            return Some(DeliveryMethod::Pickup);
        }
        if contains_keyword(text, &self.config.delivery_keywords) {
            return Some(DeliveryMethod::Delivery);
        }
        None
    }
}

fn delivery_prompt(name: &str) -> BotReply {
    BotReply::buttons(
        format!("Gracias, {name}. ¿Cómo entregamos tu pedido?"),
        delivery_buttons(),
    )
}

fn delivery_buttons() -> Vec<ReplyButton> {
    vec![
        ReplyButton::new("pickup", "Recoger en tienda"),
        ReplyButton::new("delivery", "A domicilio"),
    ]
}

fn confirm_buttons() -> Vec<ReplyButton> {
    vec![
        ReplyButton::new("confirmar", "Confirmar"),
        ReplyButton::new("cancelar", "Cancelar"),
    ]
}

fn summary_reply(product: &Product, session: &CheckoutSession) -> BotReply {
    let mut lines = vec![format!(
        "Resumen: {} ({} base).",
        product.name,
        format_price(product.base_price)
    )];
    for line in build_order_lines(product, &session.selections) {
        let cost = if line.line_total == 0 {
            "incluido".to_string()
        } else {
            format!("+{}", format_price(line.line_total))
        };
        lines.push(format!(
            "• {}: {} ({cost})",
            line.step_label,
            line.option_names.join(", ")
        ));
    }
    if let Some(name) = &session.customer_name {
        lines.push(format!("A nombre de: {name}."));
    }
    if let Some(method) = session.delivery_method {
        lines.push(format!("Entrega: {method}."));
    }
    lines.push(format!("Total: {}.", format_price(session.total_price)));
    BotReply::buttons(lines.join("\n"), confirm_buttons())
}

/// One line per step that has selections, pricing each with the same
/// rule the total used.
pub fn build_order_lines(product: &Product, selections: &Selections) -> Vec<OrderLine> {
    product
        .steps
        .iter()
        .filter_map(|step| {
            let ids = selections.get(&step.id)?;
            let option_names: Vec<String> = ids
                .iter()
                .filter_map(|id| step.find_option(*id))
                .map(|o| o.name.clone())
                .collect();
            if option_names.is_empty() {
                return None;
            }
            Some(OrderLine {
                step_label: step.label.clone(),
                option_names,
                line_total: step_cost(step, ids),
            })
        })
        .collect()
}

fn build_order(session: &CheckoutSession, product: &Product) -> Result<OrderDescriptor> {
    let customer_name = session
        .customer_name
        .clone()
        .ok_or_else(|| FlowError::InvalidState("summary stage without customer name".into()))?;
    let delivery_method = session
        .delivery_method
        .ok_or_else(|| FlowError::InvalidState("summary stage without delivery method".into()))?;

    Ok(OrderDescriptor {
        reference: order_reference(),
        customer_name,
        delivery_method,
        product_name: product.name.clone(),
        lines: build_order_lines(product, &session.selections),
        total_price: session.total_price,
        created_at: Utc::now(),
    })
}

fn order_reference() -> String {
    format!("ORD-{:08X}", rand::random::<u32>())
}
