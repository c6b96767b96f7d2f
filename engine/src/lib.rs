//! # Paddock Engine
//!
//! Offline-first record sync for a farm management app.
//!
//! Every write lands in a local SQLite store first and is visible to readers
//! immediately. The server is reconciled opportunistically: a single-record
//! push right after each write when the device is online, and full two-way
//! passes on start-up, on reconnect and on request.
//!
//! ## Components
//!
//! - [`Store`] - durable per-kind tables, queries and a change feed
//! - [`Remote`] - the server's REST surface ([`HttpRemote`], or [`MemoryRemote`] in tests)
//! - [`Connectivity`] - advisory online flag with transition events
//! - [`Gateway`] - the only write path for application code
//! - [`SyncEngine`] - full push/pull passes
//!
//! ## Records
//!
//! Seven kinds implement [`Entity`]: animals and their daily reports, crops
//! with their expenses, income and reminders, and land plots. Each stored
//! record is a [`Record<T>`] carrying the local id, the server id once known,
//! the `synced` flag and a revision counter.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use paddock_engine::{Animal, AnimalType, EngineConfig, Paddock, Report};
//! use chrono::NaiveDate;
//!
//! # async fn run() -> paddock_engine::Result<()> {
//! let paddock = Paddock::open(EngineConfig::from_env()?).await?;
//!
//! let bessie = paddock.gateway.create(Animal::new("Bessie", AnimalType::Cow)).await?;
//! let day = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
//! paddock.gateway.create(Report::new(bessie, day).with_milk(12.0)).await?;
//!
//! let outcome = paddock.engine.sync_all().await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connectivity;
pub mod error;
pub mod gateway;
pub mod model;
pub mod reconcile;
pub mod remote;
pub mod store;
pub mod sync;

// Re-export main types at crate root
pub use config::{ConfigError, EngineConfig, SyncOrder};
pub use connectivity::{Connectivity, ConnectivityEvents, ConnectivityMonitor, Transition};
pub use error::{Error, RemoteError, RemoteResult, Result};
pub use gateway::Gateway;
pub use model::{
    Animal, AnimalPatch, AnimalType, AttributeValue, Attributes, Crop, CropPatch, CropStatus,
    Entity, EntityKind, Expense, ExpenseCosts, ExpensePatch, Income, IncomePatch, LandPlot,
    LandPlotPatch, Link, LocalId, Record, Reminder, ReminderPatch, ReminderType, Report,
    ReportPatch, ServerId,
};
pub use remote::{HttpRemote, ListFilter, MemoryRemote, Remote, RemoteRecord};
pub use store::{ChangeKind, DailyTotals, Filter, Order, Store, StoreChange};
pub use sync::{
    PullCounts, PushCounts, SyncEngine, SyncIssue, SyncOptions, SyncOutcome, SyncPhase,
    SyncReport, SyncState, SyncStatus,
};

use std::sync::Arc;

/// Store, engine and gateway wired together from one [`EngineConfig`].
#[derive(Debug)]
pub struct Paddock {
    pub engine: SyncEngine,
    pub gateway: Gateway,
    pub connectivity: ConnectivityMonitor,
}

impl Paddock {
    /// Open the configured store and an HTTP client for the configured server.
    ///
    /// The device is assumed online until the platform reports otherwise
    /// through [`ConnectivityMonitor::set_online`].
    pub async fn open(config: EngineConfig) -> Result<Self> {
        let store = Store::open_or_memory(config.database_path.as_deref()).await?;
        let remote = HttpRemote::from_config(&config)
            .map_err(|err| ConfigError::HttpClient(err.to_string()))?;
        Ok(Self::assemble(store, Arc::new(remote), &config))
    }

    /// Wire an already opened store to any [`Remote`].
    pub fn assemble(store: Store, remote: Arc<dyn Remote>, config: &EngineConfig) -> Self {
        let connectivity = ConnectivityMonitor::online();
        let engine = SyncEngine::new(
            store,
            remote,
            Arc::new(connectivity.clone()),
            SyncOptions::from(config),
        );
        let gateway = Gateway::new(&engine);
        Self {
            engine,
            gateway,
            connectivity,
        }
    }
}
