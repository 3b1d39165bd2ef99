pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod models;
pub mod notify;
pub mod reconciler;
pub mod store;
pub mod watchlist;

use std::sync::Arc;
use tokio::sync::Mutex;

use notify::{LogNotifier, Notifier};
use reconciler::Reconciler;
use store::PgSeatStore;
use watchlist::WatchList;

pub type AppReconciler = Reconciler<PgSeatStore>;

// Shared state for the whole application
pub struct AppState {
    pub reconciler: Arc<Mutex<AppReconciler>>,
    pub store: PgSeatStore,
    pub config: config::Config,
}

impl AppState {
    pub async fn new(config: config::Config) -> anyhow::Result<Arc<Self>> {
        let db = database::Database::new(&config.database.url, config.database.pool_size).await?;

        db.run_migrations().await?;

        let store = PgSeatStore::new(db, config.session.user_email.clone());
        let watchlist = WatchList::load(&config.session.watchlist_path);
        let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

        let reconciler = Reconciler::start(store.clone(), watchlist, notifier).await?;

        Ok(Arc::new(Self {
            reconciler: Arc::new(Mutex::new(reconciler)),
            store,
            config,
        }))
    }
}
