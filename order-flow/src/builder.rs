use std::sync::Arc;

use tracing::warn;

use crate::catalog::{ConfigStep, Product, Selections};
use crate::config::FlowConfig;
use crate::error::{FlowError, Result};
use crate::interpreter::{SelectionInterpreter, contains_keyword, direct_matches, equals_keyword};
use crate::pricing::{compute_total, format_price, option_price_preview};
use crate::reply::{BotReply, ListRow};
use crate::session::{BuilderSession, CheckoutSession};

/// Outcome of one builder turn.
#[derive(Debug)]
pub enum BuilderTurn {
    /// Still configuring: either the same step (clarification, partial
    /// selection) or the next one.
    Continue(BotReply),
    /// Final step closed. Selections and total are frozen into the
    /// checkout session; the builder session is finished.
    Completed {
        checkout: CheckoutSession,
        reply: BotReply,
    },
    Cancelled(BotReply),
}

/// Step-by-step product configuration over free-text input.
///
/// Holds no per-user state: the session is read and mutated by the
/// caller, which owns persistence. Interpreter failures degrade to "no
/// match" so a turn never fails for conversational reasons; the only
/// `Err` is a corrupted session (step index out of range), which the
/// caller must treat as fatal for that session.
#[derive(Clone)]
pub struct BuilderFlow {
    interpreter: Arc<dyn SelectionInterpreter>,
    config: FlowConfig,
}

impl BuilderFlow {
    pub fn new(interpreter: Arc<dyn SelectionInterpreter>, config: FlowConfig) -> Self {
        Self {
            interpreter,
            config,
        }
    }

    pub async fn advance(
        &self,
        session: &mut BuilderSession,
        product: &Product,
        text: &str,
    ) -> Result<BuilderTurn> {
        // Cancel wins over everything, including done detection.
        if contains_keyword(text, &self.config.cancel_keywords) {
            return Ok(BuilderTurn::Cancelled(BotReply::text(
                "Pedido cancelado. Escríbeme \"menú\" cuando quieras empezar de nuevo.",
            )));
        }

        let step = product.steps.get(session.step_index).ok_or_else(|| {
            FlowError::InvalidState(format!(
                "step index {} out of range for product '{}' ({} steps)",
                session.step_index,
                product.slug,
                product.steps.len()
            ))
        })?;

        let explicit_done = equals_keyword(text, &self.config.done_keywords);
        let mut limit_note = None;

        if !explicit_done {
            let matched = self.interpret(text, step).await;
            if matched.is_empty() {
                if !text.trim().is_empty() {
                    return Ok(BuilderTurn::Continue(clarification_reply(step, session)));
                }
            } else {
                limit_note = apply_selection(session, step, &matched);
            }
        }

        let selected = session
            .selections
            .get(&step.id)
            .map(Vec::len)
            .unwrap_or(0);

        if explicit_done
            && self.config.done_enforces_minimum
            && (selected as u32) < step.min_selections
        {
            return Ok(BuilderTurn::Continue(minimum_reply(step, session, selected)));
        }

        let should_advance = explicit_done || (step.is_single_select() && selected > 0);
        if !should_advance {
            return Ok(BuilderTurn::Continue(stay_reply(step, session, limit_note)));
        }

        if session.step_index + 1 < product.steps.len() {
            session.step_index += 1;
            return Ok(BuilderTurn::Continue(step_intro_reply(
                product,
                session.step_index,
                &session.selections,
            )));
        }

        let total = compute_total(product, &session.selections);
        let checkout = CheckoutSession::new(
            product.slug.clone(),
            session.selections.clone(),
            total,
        );
        let reply = BotReply::text(format!(
            "¡{} armado! Total: {}.\n¿A nombre de quién va el pedido?",
            product.name,
            format_price(total)
        ));
        Ok(BuilderTurn::Completed { checkout, reply })
    }

    /// Direct name matches first, then interpreter results, deduplicated.
    /// Interpreter ids outside the step are discarded; an interpreter
    /// error is downgraded to "nothing matched".
    async fn interpret(&self, text: &str, step: &ConfigStep) -> Vec<u32> {
        let mut matched = direct_matches(text, &step.options);

        match self.interpreter.match_selections(text, &step.options).await {
            Ok(ids) => {
                for id in ids {
                    if step.find_option(id).is_some() && !matched.contains(&id) {
                        matched.push(id);
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, step = %step.label, "selection interpreter failed, keeping direct matches");
            }
        }

        matched
    }
}

fn clarification_reply(step: &ConfigStep, session: &BuilderSession) -> BotReply {
    let current = current_ids(session, step);
    let mut body = format!("No encontré eso en {}.", step.label);
    body.push('\n');
    body.push_str(&selections_line(step, &current));
    body.push_str("\nElige de la lista o escribe \"listo\" para continuar.");
    BotReply::list(body, step.label.clone(), option_rows(step, &current))
}

fn stay_reply(step: &ConfigStep, session: &BuilderSession, limit_note: Option<String>) -> BotReply {
    let current = current_ids(session, step);
    let mut lines = Vec::new();
    if let Some(note) = limit_note {
        lines.push(note);
    }
    lines.push(selections_line(step, &current));
    if let Some(max) = step.max_selections {
        let remaining = (max as usize).saturating_sub(current.len());
        lines.push(format!("Puedes elegir {remaining} más."));
    }
    lines.push("Escribe \"listo\" para continuar.".to_string());
    BotReply::list(lines.join("\n"), step.label.clone(), option_rows(step, &current))
}

/// Mutates the step's selection list for one batch of matched ids.
/// Returns a user-facing note when the max-selection cap dropped some of
/// them.
fn apply_selection(
    session: &mut BuilderSession,
    step: &ConfigStep,
    matched: &[u32],
) -> Option<String> {
    let entry = session.selections.entry(step.id).or_default();

    if step.is_single_select() {
        // A fresh match overwrites: the last mention wins.
        if let Some(last) = matched.last() {
            *entry = vec![*last];
        }
        return None;
    }

    let mut dropped = Vec::new();
    for id in matched {
        if let Some(pos) = entry.iter().position(|e| e == id) {
            // Re-mentioning an ingredient deselects it.
            entry.remove(pos);
        } else if step
            .max_selections
            .is_none_or(|max| (entry.len() as u32) < max)
        {
            entry.push(*id);
        } else {
            dropped.push(*id);
        }
    }

    if dropped.is_empty() {
        return None;
    }
    let names: Vec<String> = dropped
        .iter()
        .filter_map(|id| step.find_option(*id))
        .map(|o| o.name.clone())
        .collect();
    Some(format!(
        "{} admite máximo {} opciones; quité de tu mensaje: {}.",
        step.label,
        step.max_selections.unwrap_or(0),
        names.join(", ")
    ))
}

fn minimum_reply(step: &ConfigStep, session: &BuilderSession, selected: usize) -> BotReply {
    let current = current_ids(session, step);
    let body = format!(
        "{} necesita al menos {} selección(es) y llevas {}.",
        step.label, step.min_selections, selected
    );
    BotReply::list(body, step.label.clone(), option_rows(step, &current))
}

/// Prompt introducing the step at `step_index`, with live price previews.
pub(crate) fn step_intro_reply(
    product: &Product,
    step_index: usize,
    selections: &Selections,
) -> BotReply {
    let step = &product.steps[step_index];
    let current = selections.get(&step.id).cloned().unwrap_or_default();

    let mut body = format!(
        "Paso {}/{} — {}.",
        step_index + 1,
        product.steps.len(),
        step.label
    );
    if step.is_single_select() {
        body.push_str("\nElige una opción.");
    } else {
        match step.max_selections {
            Some(max) => body.push_str(&format!(
                "\nElige hasta {max}; escribe \"listo\" cuando termines."
            )),
            None => body.push_str("\nElige las que quieras; escribe \"listo\" cuando termines."),
        }
    }
    BotReply::list(body, step.label.clone(), option_rows(step, &current))
}

fn current_ids(session: &BuilderSession, step: &ConfigStep) -> Vec<u32> {
    session.selections.get(&step.id).cloned().unwrap_or_default()
}

fn option_rows(step: &ConfigStep, current: &[u32]) -> Vec<ListRow> {
    step.options
        .iter()
        .map(|option| {
            let title = if current.contains(&option.id) {
                format!("✓ {}", option.name)
            } else {
                option.name.clone()
            };
            let preview = option_price_preview(step, current, option);
            let description = if preview == 0 {
                "Incluido".to_string()
            } else {
                format!("+{}", format_price(preview))
            };
            ListRow::new(option.id.to_string(), title).with_description(description)
        })
        .collect()
}

fn selections_line(step: &ConfigStep, current: &[u32]) -> String {
    if current.is_empty() {
        return "Aún no llevas nada en este paso.".to_string();
    }
    let names: Vec<String> = current
        .iter()
        .filter_map(|id| step.find_option(*id))
        .map(|o| o.name.clone())
        .collect();
    format!("Llevas: {}.", names.join(", "))
}
