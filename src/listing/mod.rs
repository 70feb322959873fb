mod detail;
mod live;
mod store;

pub use detail::BusinessDetail;
pub use live::{ListingMirror, MirrorView, spawn_listing_mirror};
pub use store::{Facets, ListingStore};
