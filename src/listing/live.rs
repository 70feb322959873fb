use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::directory::Directory;
use crate::error::DirectoryError;
use crate::filter::FilterState;
use crate::model::BusinessListing;
use crate::notify::{Subscription, SubscriptionError, Topic};
use crate::observability::*;
use crate::pipeline;

use super::store::{Facets, ListingStore};

/// What the listing page shows: the filtered, sorted sequence plus the
/// sidebar options drawn from the whole snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MirrorView {
    pub listings: Vec<BusinessListing>,
    pub facets: Facets,
    /// Listings in the snapshot before filtering.
    pub total: usize,
}

/// Handle to a running listing mirror. Dropping it stops the task; call
/// [`ListingMirror::shutdown`] to also wait for the subscription to be
/// released.
pub struct ListingMirror {
    view: watch::Receiver<Arc<MirrorView>>,
    guard: DropGuard,
    handle: JoinHandle<()>,
}

impl ListingMirror {
    /// Receiver that changes every time the displayed sequence is recomputed.
    pub fn view(&self) -> watch::Receiver<Arc<MirrorView>> {
        self.view.clone()
    }

    pub fn current(&self) -> Arc<MirrorView> {
        self.view.borrow().clone()
    }

    pub async fn shutdown(self) {
        let ListingMirror { guard, handle, .. } = self;
        drop(guard);
        if let Err(e) = handle.await {
            warn!("listing mirror task failed: {e}");
        }
    }
}

/// Subscribe to listing changes, load the snapshot, and keep the displayed
/// sequence current on every change event or filter change.
///
/// The subscription is taken before the load so no change between the two is
/// missed. A failed initial load starts from an empty snapshot; a failed
/// subscription is returned to the caller.
pub async fn spawn_listing_mirror(
    directory: Directory,
    filters: watch::Receiver<FilterState>,
) -> Result<ListingMirror, DirectoryError> {
    let subscription = directory.subscribe(Topic::AllListings).await?;
    let mut store = ListingStore::default();
    directory.load_listings(&mut store).await;

    let (view_tx, view_rx) = watch::channel(Arc::new(render(&store, &filters.borrow())));
    let cancel = CancellationToken::new();
    let task = MirrorTask {
        directory,
        store,
        filters,
        view: view_tx,
    };
    let handle = tokio::spawn(task.run(subscription, cancel.clone()));
    info!("listing mirror started");

    Ok(ListingMirror {
        view: view_rx,
        guard: cancel.drop_guard(),
        handle,
    })
}

struct MirrorTask {
    directory: Directory,
    store: ListingStore,
    filters: watch::Receiver<FilterState>,
    view: watch::Sender<Arc<MirrorView>>,
}

impl MirrorTask {
    async fn run(mut self, mut subscription: Subscription, shutdown: CancellationToken) {
        let mut filters_open = true;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("listing mirror received shutdown signal");
                    break;
                }
                event = subscription.recv() => match event {
                    Ok(event) => {
                        metrics::counter!(CHANGE_EVENTS_TOTAL, "kind" => event.kind_label())
                            .increment(1);
                        debug!(id = event.listing_id(), kind = event.kind_label(), "change event");
                        if self.store.apply(&event) {
                            self.publish();
                        }
                    }
                    Err(SubscriptionError::Lagged(missed)) => {
                        warn!("listing mirror missed {missed} change events, reloading");
                        metrics::counter!(SUBSCRIBER_LAG_TOTAL).increment(1);
                        self.directory.load_listings(&mut self.store).await;
                        self.publish();
                    }
                    Err(SubscriptionError::Closed) => {
                        warn!("change feed closed, listing mirror stopping");
                        break;
                    }
                },
                changed = self.filters.changed(), if filters_open => {
                    if changed.is_ok() {
                        self.publish();
                    } else {
                        // Filter owner went away; keep serving the last selection
                        filters_open = false;
                    }
                }
            }
        }
        subscription.unsubscribe();
        info!("listing mirror stopped");
    }

    fn publish(&self) {
        let view = render(&self.store, &self.filters.borrow());
        metrics::gauge!(LISTINGS_MIRRORED).set(view.total as f64);
        metrics::gauge!(LISTINGS_DISPLAYED).set(view.listings.len() as f64);
        self.view.send_replace(Arc::new(view));
    }
}

fn render(store: &ListingStore, filters: &FilterState) -> MirrorView {
    MirrorView {
        listings: pipeline::apply(store.snapshot(), filters),
        facets: store.facets(),
        total: store.len(),
    }
}
