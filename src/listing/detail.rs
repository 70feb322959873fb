use crate::directory::Directory;
use crate::error::DirectoryError;
use crate::model::{BusinessListing, ChangeEvent};
use crate::notify::{Subscription, Topic};

/// State of a single-business page.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum BusinessDetail {
    #[default]
    Loading,
    Found(BusinessListing),
    NotFound,
}

impl BusinessDetail {
    /// Subscribe to the row, then fetch it. The returned subscription feeds
    /// [`BusinessDetail::apply`].
    pub async fn open(
        directory: &Directory,
        id: &str,
    ) -> Result<(Self, Subscription), DirectoryError> {
        let subscription = directory.subscribe(Topic::Listing(id.to_string())).await?;
        let detail = match directory.fetch_business(id).await? {
            Some(listing) => BusinessDetail::Found(listing),
            None => BusinessDetail::NotFound,
        };
        Ok((detail, subscription))
    }

    /// Fold a change for business `id` into the state. Events for other rows
    /// are ignored. Returns whether the state changed.
    pub fn apply(&mut self, id: &str, event: &ChangeEvent) -> bool {
        if event.listing_id() != id {
            return false;
        }
        let next = match event {
            ChangeEvent::Insert { row } | ChangeEvent::Update { row } => {
                BusinessDetail::Found(row.clone())
            }
            ChangeEvent::Delete { .. } => BusinessDetail::NotFound,
        };
        if *self == next {
            return false;
        }
        *self = next;
        true
    }

    pub fn listing(&self) -> Option<&BusinessListing> {
        match self {
            BusinessDetail::Found(listing) => Some(listing),
            _ => None,
        }
    }
}
