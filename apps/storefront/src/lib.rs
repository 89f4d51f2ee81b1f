//! # Dulce Bias Storefront
//!
//! Application layer over `dulce-db`: the services a web frontend calls,
//! event notifications, and the background queue worker.
//!
//! ## Module Organization
//! ```text
//! dulce_storefront/
//! ├── lib.rs          ◄─── You are here (Storefront handle, tracing setup)
//! ├── config.rs       ◄─── storefront.toml + DULCE_* overrides
//! ├── error.rs        ◄─── ApiError / ErrorCode returned by services
//! ├── services/
//! │   ├── catalog.rs  ◄─── Listing, search, stock admin
//! │   ├── cart.rs     ◄─── User carts and session carts
//! │   ├── checkout.rs ◄─── Order creation + confirmations
//! │   ├── orders.rs   ◄─── Status changes, cancellation, audits
//! │   ├── payments.rs ◄─── Bank transfer claims and decisions
//! │   ├── support.rs  ◄─── Tickets, assistant, FAQs
//! │   └── inbox.rs    ◄─── In-app notifications and preferences
//! └── notify/
//!     ├── dispatch.rs ◄─── Notifier (event → queued notification)
//!     ├── sender.rs   ◄─── ChannelSender trait, simulated senders
//!     └── worker.rs   ◄─── QueueWorker (send, retry)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dulce_storefront::{Storefront, StorefrontConfig};
//!
//! let sf = Storefront::open(StorefrontConfig::load_or_default(None)).await?;
//! let cart = sf.cart().add("user-1", &product_id, 2).await?;
//! let placed = sf.checkout().user_checkout("user-1", address, None).await?;
//! ```

pub mod config;
pub mod error;
pub mod notify;
pub mod services;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use dulce_db::{Database, DbResult, LowStock};

pub use config::StorefrontConfig;
pub use error::{ApiError, ApiResult, ConfigError, ErrorCode};
pub use notify::{Notifier, QueueWorker, QueueWorkerHandle, Senders};

use services::{
    CartService, CatalogService, CheckoutService, InboxService, OrderService, PaymentService,
    SupportService,
};

/// Shared handle to the database and configuration.
///
/// Cheap to clone; services are created per call.
#[derive(Clone)]
pub struct Storefront {
    db: Database,
    config: Arc<StorefrontConfig>,
}

impl Storefront {
    /// Opens (and migrates) the configured database.
    pub async fn open(config: StorefrontConfig) -> DbResult<Self> {
        let db = Database::new(config.db_config()).await?;
        info!(path = %config.database.path.display(), "Storefront database ready");
        Ok(Storefront::new(db, config))
    }

    pub fn new(db: Database, config: StorefrontConfig) -> Self {
        Storefront {
            db,
            config: Arc::new(config),
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &StorefrontConfig {
        &self.config
    }

    pub fn notifier(&self) -> Notifier {
        Notifier::new(self.db.clone(), self.config.clone())
    }

    /// Worker over this storefront's queue. Spawn `run()` on the runtime.
    pub fn queue_worker(&self, senders: Senders) -> (QueueWorker, QueueWorkerHandle) {
        QueueWorker::new(self.db.clone(), self.config.clone(), senders)
    }

    // =========================================================================
    // Services
    // =========================================================================

    pub fn catalog(&self) -> CatalogService {
        CatalogService::new(self.db.clone(), self.config.clone())
    }

    pub fn cart(&self) -> CartService {
        CartService::new(self.db.clone(), self.config.clone())
    }

    pub fn checkout(&self) -> CheckoutService {
        CheckoutService::new(self.db.clone(), self.config.clone())
    }

    pub fn orders(&self) -> OrderService {
        OrderService::new(self.db.clone(), self.config.clone())
    }

    pub fn payments(&self) -> PaymentService {
        PaymentService::new(self.db.clone(), self.config.clone())
    }

    pub fn support(&self) -> SupportService {
        SupportService::new(self.db.clone(), self.config.clone())
    }

    pub fn inbox(&self) -> InboxService {
        InboxService::new(self.db.clone())
    }

    /// Queues stock alerts for every listed product at or below the
    /// critical level. Returns how many notifications were queued.
    pub async fn stock_alert_sweep(&self) -> DbResult<usize> {
        let products = self
            .db
            .stock()
            .alerts(&self.config.stock_thresholds())
            .await?;
        let low: Vec<LowStock> = products
            .into_iter()
            .map(|p| LowStock {
                product_id: p.id,
                product_name: p.name,
                stock: p.stock,
            })
            .collect();

        info!(products = low.len(), "Stock alert sweep");
        Ok(self.notifier().stock_alerts(&low).await)
    }
}

/// Initializes the tracing subscriber for structured logging.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=dulce=trace` - Show trace for dulce crates only
/// - Default: `info,dulce=debug,sqlx=warn`
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dulce=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
