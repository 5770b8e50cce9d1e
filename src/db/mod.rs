pub mod connection;
pub mod helpers;
mod migrations;
pub mod models;
pub mod repositories;

pub use connection::{Database, SchemaMigrationFailed, WorkerUnavailable};
pub use helpers::TimestampOutOfRange;
pub use models::{ImportEntry, Item, ItemKey, Tag, View, ViewId};
pub use repositories::{DatabaseTagCleanup, DeleteOutcome, DwellUpdate, TagCleanup};
