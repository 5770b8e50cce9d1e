pub mod items;
pub mod tags;
pub mod views;

pub use items::ItemRepository;
pub use tags::{DatabaseTagCleanup, TagCleanup, TagRepository};
pub use views::{DeleteOutcome, DwellUpdate, ViewRepository};
