use std::sync::Arc;
use std::time::Duration;

use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};

use super::{DonationStore, HoldingStore, InventoryStore, MemoryStore, PgStore, UserStore};
use crate::config::DatabaseConfig;
use crate::error::AppResult;

pub type DbPool = DatabaseConnection;

/// One backend shared behind every store trait
#[derive(Clone)]
pub struct Stores {
    pub inventory: Arc<dyn InventoryStore>,
    pub holdings: Arc<dyn HoldingStore>,
    pub users: Arc<dyn UserStore>,
    pub donations: Arc<dyn DonationStore>,
}

impl Stores {
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: InventoryStore + HoldingStore + UserStore + DonationStore + 'static,
    {
        Self {
            inventory: backend.clone(),
            holdings: backend.clone(),
            users: backend.clone(),
            donations: backend,
        }
    }

    pub fn in_memory() -> Self {
        Self::from_backend(Arc::new(MemoryStore::new()))
    }
}

pub async fn create_pool(config: &DatabaseConfig) -> AppResult<DbPool> {
    let mut opts = ConnectOptions::new(config.url.clone());
    opts.max_connections(config.max_connections)
        .connect_timeout(Duration::from_secs(10))
        .sqlx_logging(false);
    let pool = Database::connect(opts).await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &DbPool) -> AppResult<()> {
    Migrator::up(pool, None).await?;
    Ok(())
}

/// `memory://` selects the in-process store, anything else is a Postgres url
pub async fn open_stores(config: &DatabaseConfig) -> AppResult<Stores> {
    if config.is_memory() {
        log::warn!("Using in-memory store, data is lost on restart");
        return Ok(Stores::in_memory());
    }
    let pool = create_pool(config).await?;
    run_migrations(&pool).await?;
    log::info!("Database migrations applied");
    Ok(Stores::from_backend(Arc::new(PgStore::new(pool))))
}
