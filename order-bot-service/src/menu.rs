use order_flow::{ConfigStep, InMemoryProductCatalog, MenuOption, Product};

/// Demo catalog: a build-your-own bowl that exercises included-slot
/// accounting, premium surcharges and an unavailable option, plus a
/// burger that is mostly single-select steps.
pub fn seed_menu(catalog: &InMemoryProductCatalog) {
    catalog.insert(bowl_de_la_casa());
    catalog.insert(burger_clasica());
}

fn bowl_de_la_casa() -> Product {
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
                    MenuOption::new(2, "Arroz integral", 0),
                    MenuOption::new(3, "Quinoa", 800),
                    MenuOption::new(4, "Mixta", 0),
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
                    MenuOption::new(12, "Tofu", 0),
                    MenuOption::new(13, "Camarones", 2500),
                ],
            },
            ConfigStep {
                id: 3,
                label: "Toppings".to_string(),
                order: 3,
                min_selections: 0,
                max_selections: Some(4),
                included_selections: 2,
                price_per_extra: 1000,
                options: vec![
                    MenuOption::new(20, "Aguacate", 1200),
                    MenuOption::new(21, "Elote", 0),
                    MenuOption::new(22, "Pico de gallo", 0),
                    MenuOption::new(23, "Queso", 500),
                    MenuOption::new(24, "Frijoles", 0),
                    MenuOption::new(25, "Plátano maduro", 0),
                    MenuOption::new(26, "Champiñones", 0).unavailable(),
                ],
            },
            ConfigStep {
                id: 4,
                label: "Salsa".to_string(),
                order: 4,
                min_selections: 0,
                max_selections: None,
                included_selections: 1,
                price_per_extra: 500,
                options: vec![
                    MenuOption::new(30, "Chipotle", 0),
                    MenuOption::new(31, "Cilantro-limón", 0),
                    MenuOption::new(32, "Ajo", 0),
                ],
            },
        ],
    }
}

fn burger_clasica() -> Product {
    Product {
        id: 2,
        name: "Burger Clásica".to_string(),
        slug: "burger".to_string(),
        base_price: 8900,
        steps: vec![
            ConfigStep {
                id: 1,
                label: "Pan".to_string(),
                order: 1,
                min_selections: 1,
                max_selections: Some(1),
                included_selections: 1,
                price_per_extra: 0,
                options: vec![
                    MenuOption::new(1, "Brioche", 0),
                    MenuOption::new(2, "Integral", 0),
                ],
            },
            ConfigStep {
                id: 2,
                label: "Término".to_string(),
                order: 2,
                min_selections: 1,
                max_selections: Some(1),
                included_selections: 1,
                price_per_extra: 0,
                options: vec![
                    MenuOption::new(10, "Medio", 0),
                    MenuOption::new(11, "Tres cuartos", 0),
                    MenuOption::new(12, "Bien cocido", 0),
                ],
            },
            ConfigStep {
                id: 3,
                label: "Extras".to_string(),
                order: 3,
                min_selections: 0,
                max_selections: Some(3),
                included_selections: 0,
                price_per_extra: 700,
                options: vec![
                    MenuOption::new(20, "Tocino", 900),
                    MenuOption::new(21, "Queso extra", 500),
                    MenuOption::new(22, "Aros de cebolla", 0),
                ],
            },
        ],
    }
}
