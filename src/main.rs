use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bizdir::backend::PgBackend;
use bizdir::config::Config;
use bizdir::directory::Directory;
use bizdir::listing::spawn_listing_mirror;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env();
    bizdir::observability::init(config.metrics_port);

    let backend = Arc::new(PgBackend::connect(&config.database_url).await?);
    if config.apply_schema {
        backend.ensure_schema().await?;
    }
    if let Some(user) = config.user.clone() {
        info!("signed in as {}", user.email);
        backend.sign_in(user).await;
    }

    let filters = config.initial_filters();
    info!("bizdir mirroring listings");
    info!("  call_timeout: {:?}", config.call_timeout);
    info!("  occupancy: {:?}", config.occupancy);
    info!("  sort: {}", filters.sort);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let directory = Directory::from_config(backend, &config);
    // Sender held for the life of the process; filters stay at their startup values
    let (_filters_tx, filters_rx) = watch::channel(filters);
    let mirror = spawn_listing_mirror(directory, filters_rx).await?;
    let mut view = mirror.view();

    // Graceful shutdown on SIGTERM/ctrl-c: stop the mirror, release its subscription
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    let mut feed_lost = false;
    loop {
        let current = view.borrow_and_update().clone();
        info!(
            "showing {} of {} listings",
            current.listings.len(),
            current.total
        );
        for listing in &current.listings {
            info!(
                "  {} [{}] {:.1} {} ({})",
                listing.name,
                listing.category.join(", "),
                listing.rating,
                listing.price_range,
                listing.location
            );
        }

        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    error!("listing mirror stopped: change feed lost");
                    feed_lost = true;
                    break;
                }
            }
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    mirror.shutdown().await;
    if feed_lost {
        return Err("change feed lost".into());
    }
    info!("bizdir stopped");
    Ok(())
}
