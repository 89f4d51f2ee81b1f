//! # Demo Catalog Loader
//!
//! Fills a database with the Galletas Kati catalog for development.
//!
//! ## Usage
//! ```bash
//! cargo run -p dulce-db --bin seed
//!
//! # Specify database path
//! cargo run -p dulce-db --bin seed -- --db ./data/dulce.db
//! ```
//!
//! ## Loaded Data
//! - Cookie categories and products (prices in CLP, some on sale)
//! - A welcome coupon and a free shipping coupon
//! - The shop's bank account for transfer payments
//! - Knowledge base articles and FAQs for the support assistant

use chrono::{Duration, Utc};
use std::env;
use uuid::Uuid;

use dulce_core::coupon::{DiscountCoupon, DiscountType};
use dulce_core::order::Actor;
use dulce_core::support::{Faq, KnowledgeBaseArticle};
use dulce_core::transfer::{AccountType, BankAccount};
use dulce_db::{Database, DbConfig, NewProduct};

/// (category name, slug, [(product, price, stock, sale price)])
const CATALOG: &[(&str, &str, &[(&str, i64, i64, Option<i64>)])] = &[
    (
        "Galletas Clásicas",
        "clasicas",
        &[
            ("Chips de Chocolate", 6000, 40, None),
            ("Avena y Pasas", 5500, 30, None),
            ("Mantequilla", 5000, 25, Some(4500)),
            ("Doble Chocolate", 6500, 20, None),
        ],
    ),
    (
        "Galletas Rellenas",
        "rellenas",
        &[
            ("Rellena de Manjar", 7000, 15, None),
            ("Rellena de Nutella", 7500, 12, Some(6900)),
            ("Red Velvet con Queso Crema", 8000, 8, None),
        ],
    ),
    (
        "Cajas de Regalo",
        "cajas",
        &[
            ("Caja Surtida 12 unidades", 15000, 10, None),
            ("Caja Surtida 24 unidades", 27000, 6, Some(24900)),
            ("Caja Cumpleaños", 18000, 4, None),
        ],
    ),
    (
        "Sin Gluten",
        "sin-gluten",
        &[
            ("Almendra Sin Gluten", 7000, 10, None),
            ("Coco Sin Gluten", 6800, 3, None),
        ],
    ),
];

/// (title, keywords, content)
const ARTICLES: &[(&str, &str, &str)] = &[
    (
        "Tiempos y costos de envío",
        "envio,despacho,pedido,demora,llega",
        "Despachamos en 2 a 5 días hábiles. El envío cuesta $3.000 y es gratis desde $15.000.",
    ),
    (
        "Pagar por transferencia",
        "pago,transferencia,banco,comprobante",
        "Transfiere el total del pedido y registra el comprobante en Mis Pedidos.",
    ),
    (
        "Alergias e ingredientes",
        "alergia,gluten,ingredientes,nueces",
        "Todas las galletas se hornean en una cocina que usa frutos secos y gluten.",
    ),
];

/// (question, answer)
const FAQS: &[(&str, &str)] = &[
    ("¿Cuánto demora mi pedido?", "Entre 2 y 5 días hábiles en la Región Metropolitana."),
    ("¿Hacen envíos a regiones?", "Sí, a Valparaíso, Biobío y Coquimbo."),
    ("¿Puedo pagar con transferencia?", "Sí, los datos bancarios aparecen al confirmar el pedido."),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    let mut db_path = String::from("./dulce_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Dulce Bias demo catalog loader");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./dulce_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🍪 Dulce Bias demo catalog loader");
    println!("=================================");
    println!("Database: {}", db_path);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.catalog().list_available(None).await?;
    if !existing.is_empty() {
        println!("⚠ Database already has {} products", existing.len());
        println!("  Skipping seed to avoid duplicates.");
        return Ok(());
    }

    let seeder = Actor::system();
    let iva = db.catalog().tax_configurations().await?.into_iter().next();
    let mut loaded = 0;

    for (category_name, category_slug, products) in CATALOG {
        let category = db.catalog().insert_category(category_name, category_slug, None).await?;

        for (index, (name, price, stock, sale)) in products.iter().enumerate() {
            let mut product = NewProduct::new(*name, slugify(name), *price, *stock);
            product.category_id = Some(category.id.clone());
            product.featured = index == 0;
            product.weight_grams = Some(250);
            product.tax_configuration_id = iva.as_ref().map(|t| t.id.clone());
            if let Some(sale_price) = sale {
                product.is_on_sale = true;
                product.discount_price = Some(*sale_price);
            }

            if let Err(e) = db.catalog().insert_product(product, &seeder).await {
                eprintln!("Failed to insert {}: {}", name, e);
                continue;
            }
            loaded += 1;
        }
    }
    println!("✓ Loaded {} products", loaded);

    let now = Utc::now();
    for (code, kind, value, minimum) in [
        ("BIENVENIDA10", DiscountType::Percentage, 10, 0),
        ("ENVIOGRATIS", DiscountType::FreeShipping, 0, 10_000),
    ] {
        db.coupons()
            .insert(&DiscountCoupon {
                id: Uuid::new_v4().to_string(),
                code: code.to_string(),
                description: None,
                discount_type: kind,
                discount_value: value,
                minimum_order_amount: minimum,
                maximum_discount_amount: None,
                max_uses: Some(100),
                current_uses: 0,
                valid_from: now,
                valid_until: now + Duration::days(90),
                is_active: true,
            })
            .await?;
    }
    println!("✓ Loaded coupons");

    db.transfers()
        .insert_account(&BankAccount {
            id: Uuid::new_v4().to_string(),
            bank_name: "BancoEstado".to_string(),
            account_type: AccountType::Vista,
            account_number: "12345678".to_string(),
            account_holder: "Dulce Bias SpA".to_string(),
            rut: "76.543.210-K".to_string(),
            email: "pagos@dulcebias.cl".to_string(),
            is_active: true,
        })
        .await?;
    println!("✓ Loaded bank account");

    for (title, keywords, content) in ARTICLES {
        db.support()
            .insert_article(&KnowledgeBaseArticle {
                id: Uuid::new_v4().to_string(),
                category_id: None,
                title: title.to_string(),
                content: content.to_string(),
                keywords: keywords.to_string(),
                embedding_vector: None,
                times_used: 0,
                is_active: true,
                created_at: now,
            })
            .await?;
    }
    for (index, (question, answer)) in FAQS.iter().enumerate() {
        db.support()
            .insert_faq(&Faq {
                id: Uuid::new_v4().to_string(),
                category_id: None,
                question: question.to_string(),
                answer: answer.to_string(),
                helpful_votes: 0,
                not_helpful_votes: 0,
                is_active: true,
                sort_order: index as i64,
            })
            .await?;
    }
    println!("✓ Loaded {} articles and {} FAQs", ARTICLES.len(), FAQS.len());

    println!();
    let results = db.catalog().search("chocolate", 10).await?;
    println!("  Search 'chocolate': {} results", results.len());
    println!();
    println!("✓ Seed complete!");

    Ok(())
}

/// Lowercase ASCII slug; accented vowels lose their accent.
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        let c = match c {
            'á' | 'Á' => 'a',
            'é' | 'É' => 'e',
            'í' | 'Í' => 'i',
            'ó' | 'Ó' => 'o',
            'ú' | 'Ú' | 'ü' => 'u',
            'ñ' | 'Ñ' => 'n',
            c => c.to_ascii_lowercase(),
        };
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}
