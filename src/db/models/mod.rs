pub mod item;
pub mod tag;
pub mod view;

pub use item::{normalize_title, Item, ItemKey};
pub use tag::Tag;
pub use view::{ImportEntry, View, ViewId};
