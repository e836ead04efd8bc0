use crate::catalog::{ConfigStep, MenuOption, Product, Selections};

/// Billing policy: the included quota is count-based. A step's first
/// `included_selections` picks are slot-free, every pick beyond that pays
/// `price_per_extra`, and an option's intrinsic `price_extra` is charged
/// regardless of quota. An alternative order-index policy (early picks free
/// of both surcharges) exists in the wild; this module implements only the
/// count-based variant.
pub const INCLUDED_SLOT_POLICY: &str = "count-based, intrinsic always charged";

/// Total price in minor units for a product under the given selections.
///
/// Deterministic and side-effect free. Steps absent from `selections`
/// contribute nothing; ids that do not resolve within their step are
/// treated as absent.
pub fn compute_total(product: &Product, selections: &Selections) -> i64 {
    let steps_total: i64 = product
        .steps
        .iter()
        .map(|step| match selections.get(&step.id) {
            Some(ids) => step_cost(step, ids),
            None => 0,
        })
        .sum();
    product.base_price + steps_total
}

/// Cost contribution of one step.
///
/// Ids not found in the step (stale after a catalog edit) are dropped
/// before any counting, so they neither occupy an included slot nor
/// carry a surcharge.
pub fn step_cost(step: &ConfigStep, selected_ids: &[u32]) -> i64 {
    let found: Vec<&MenuOption> = selected_ids
        .iter()
        .filter_map(|id| step.find_option(*id))
        .collect();

    let extra_count = found.len().saturating_sub(step.included_selections as usize) as i64;
    let slot_surcharge = extra_count * step.price_per_extra;
    let intrinsic: i64 = found.iter().map(|o| o.price_extra).sum();

    slot_surcharge + intrinsic
}

/// Price displayed next to an option in a step prompt.
///
/// Display-only and insertion-order-based: for a selected option, the
/// first `included_selections` picks (by insertion order) show as
/// slot-free, later ones show the combined surcharge. For an unselected
/// option the slot surcharge appears once no included slots remain. This
/// intentionally differs from `step_cost`, which bills by count alone;
/// the two must not be conflated.
pub fn option_price_preview(step: &ConfigStep, current: &[u32], option: &MenuOption) -> i64 {
    let found: Vec<u32> = current
        .iter()
        .copied()
        .filter(|id| step.find_option(*id).is_some())
        .collect();
    let included = step.included_selections as usize;

    match found.iter().position(|id| *id == option.id) {
        Some(pos) if pos < included => option.price_extra,
        Some(_) => step.price_per_extra + option.price_extra,
        None if found.len() < included => option.price_extra,
        None => step.price_per_extra + option.price_extra,
    }
}

/// Render minor units as a user-facing amount, e.g. `13550` -> `"$135.50"`.
pub fn format_price(cents: i64) -> String {
    format!("${}.{:02}", cents / 100, cents % 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn step(id: u32, included: u32, price_per_extra: i64, options: Vec<MenuOption>) -> ConfigStep {
        ConfigStep {
            id,
            label: format!("Step {id}"),
            order: id,
            min_selections: 0,
            max_selections: None,
            included_selections: included,
            price_per_extra,
            options,
        }
    }

    fn regular_premium_product() -> Product {
        Product {
            id: 1,
            name: "Test".to_string(),
            slug: "test".to_string(),
            base_price: 100,
            steps: vec![step(
                1,
                1,
                10,
                vec![
                    MenuOption::new(1, "Regular", 0),
                    MenuOption::new(2, "Premium", 20),
                ],
            )],
        }
    }

    #[test]
    fn premium_beyond_quota_pays_slot_and_intrinsic() {
        let product = regular_premium_product();
        let selections = HashMap::from([(1, vec![1, 2])]);
        assert_eq!(compute_total(&product, &selections), 130);
    }

    #[test]
    fn single_pick_within_quota_is_base_price() {
        let product = regular_premium_product();
        let selections = HashMap::from([(1, vec![1])]);
        assert_eq!(compute_total(&product, &selections), 100);
    }

    #[test]
    fn multi_step_costs_accumulate() {
        let product = Product {
            id: 1,
            name: "Test".to_string(),
            slug: "test".to_string(),
            base_price: 100,
            steps: vec![
                step(
                    1,
                    1,
                    10,
                    vec![MenuOption::new(1, "A", 0), MenuOption::new(2, "B", 0)],
                ),
                step(2, 0, 50, vec![MenuOption::new(3, "C", 0)]),
            ],
        };
        let selections = HashMap::from([(1, vec![1, 2]), (2, vec![3])]);
        assert_eq!(compute_total(&product, &selections), 160);
    }

    #[test]
    fn no_steps_prices_at_base() {
        let product = Product {
            id: 1,
            name: "Plain".to_string(),
            slug: "plain".to_string(),
            base_price: 4200,
            steps: vec![],
        };
        assert_eq!(compute_total(&product, &HashMap::new()), 4200);
    }

    #[test]
    fn quota_covered_zero_surcharge_picks_cost_nothing() {
        let product = Product {
            id: 1,
            name: "Test".to_string(),
            slug: "test".to_string(),
            base_price: 100,
            steps: vec![step(
                1,
                2,
                10,
                vec![MenuOption::new(1, "A", 0), MenuOption::new(2, "B", 0)],
            )],
        };
        let selections = HashMap::from([(1, vec![1, 2])]);
        assert_eq!(compute_total(&product, &selections), 100);
    }

    #[test]
    fn adding_a_selection_never_lowers_the_total() {
        let product = regular_premium_product();
        let one = HashMap::from([(1, vec![1])]);
        let two = HashMap::from([(1, vec![1, 2])]);
        assert!(compute_total(&product, &two) >= compute_total(&product, &one));
    }

    #[test]
    fn stale_ids_neither_count_nor_charge() {
        let product = regular_premium_product();
        // 99 resolves to nothing: Premium stays inside the quota.
        let selections = HashMap::from([(1, vec![99, 2])]);
        assert_eq!(compute_total(&product, &selections), 120);
    }

    #[test]
    fn missing_step_entry_contributes_nothing() {
        let product = regular_premium_product();
        let selections = HashMap::from([(77, vec![1])]);
        assert_eq!(compute_total(&product, &selections), 100);
    }

    #[test]
    fn preview_uses_insertion_order_not_count() {
        let s = step(
            1,
            1,
            10,
            vec![
                MenuOption::new(1, "Regular", 0),
                MenuOption::new(2, "Premium", 20),
            ],
        );
        let current = vec![2, 1];

        // Premium was picked first: previewed as slot-free, intrinsic only.
        assert_eq!(option_price_preview(&s, &current, &s.options[1]), 20);
        // Regular landed past the quota: previewed with the slot surcharge.
        assert_eq!(option_price_preview(&s, &current, &s.options[0]), 10);
        // Billed total is count-based and does not match that split.
        assert_eq!(step_cost(&s, &current), 30);
    }

    #[test]
    fn preview_for_unselected_depends_on_remaining_slots() {
        let s = step(
            1,
            1,
            10,
            vec![
                MenuOption::new(1, "Regular", 0),
                MenuOption::new(2, "Premium", 20),
            ],
        );

        assert_eq!(option_price_preview(&s, &[], &s.options[1]), 20);
        assert_eq!(option_price_preview(&s, &[1], &s.options[1]), 30);
    }

    #[test]
    fn price_formatting_pads_cents() {
        assert_eq!(format_price(13550), "$135.50");
        assert_eq!(format_price(100), "$1.00");
        assert_eq!(format_price(5), "$0.05");
    }
}
