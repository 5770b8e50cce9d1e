//! Navigation history store.
//!
//! Records visits to content items as a forest of views (each view may name
//! the view it was reached from), accumulates per-view dwell time, and
//! answers analytics over the result: views per item, views per weekday and
//! root-to-leaf navigation paths.

pub mod analytics;
pub mod config;
pub mod db;
pub mod error;
mod store;
pub mod utils;

pub use analytics::{
    AnalyticsField, AnalyticsReport, AnalyticsRequest, Calendar, NavigationPath, PageViewCount,
    WeekdayBucket,
};
pub use config::StoreConfig;
pub use db::{
    Database, DatabaseTagCleanup, DeleteOutcome, ImportEntry, Item, ItemKey, Tag, TagCleanup,
    View, ViewId,
};
pub use error::{HistoryError, HistoryResult};
pub use store::HistoryStore;
pub use utils::logging::init_logging;

/// Load configuration, initialize logging and open the store.
pub fn open_from_config_file(path: impl AsRef<std::path::Path>) -> HistoryResult<HistoryStore> {
    let config = StoreConfig::load(path)?;
    init_logging(config.level_filter());
    log::info!("Opening navigation history at {}", config.database_path.display());
    HistoryStore::open(&config)
}
