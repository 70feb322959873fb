use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use serde::Deserialize;
use tokio::sync::{RwLock, mpsc};
use tokio_postgres::error::SqlState;
use tokio_postgres::types::FromSql;
use tokio_postgres::{AsyncMessage, Client, NoTls, Row};
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::notify::{NotifyHub, Subscription, Topic};

use super::{Backend, BackendError};

/// NOTIFY channel carrying JSON-encoded [`ChangeNotice`]s for `businesses`.
pub const LISTINGS_CHANNEL: &str = "bizdir_businesses";

/// Partial unique index backing slot uniqueness.
pub const SLOT_UNIQUE_INDEX: &str = "reservations_active_slot";

/// Idempotent schema: tables, the slot constraint, and the change trigger.
///
/// The trigger sends ids only. NOTIFY rejects payloads of 8000 bytes or more,
/// and a rejected payload aborts the write that fired the trigger.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS businesses (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    image       TEXT NOT NULL DEFAULT '',
    category    TEXT[] NOT NULL,
    rating      DOUBLE PRECISION NOT NULL CHECK (rating >= 0 AND rating <= 5),
    price_range TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    location    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY,
    email      TEXT NOT NULL,
    full_name  TEXT NOT NULL DEFAULT '',
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS reservations (
    id               TEXT PRIMARY KEY,
    business_id      TEXT NOT NULL REFERENCES businesses (id) ON DELETE CASCADE,
    user_id          TEXT NOT NULL,
    reservation_date DATE NOT NULL,
    reservation_time TEXT NOT NULL CHECK (reservation_time ~ '^[0-2][0-9]:[0-5][0-9]$'),
    status           TEXT NOT NULL DEFAULT 'pending'
                     CHECK (status IN ('pending', 'confirmed', 'cancelled')),
    created_at       TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE UNIQUE INDEX IF NOT EXISTS reservations_active_slot
    ON reservations (business_id, reservation_date, reservation_time)
    WHERE status <> 'cancelled';

CREATE INDEX IF NOT EXISTS reservations_user ON reservations (user_id);

CREATE OR REPLACE FUNCTION bizdir_notify_business() RETURNS trigger AS $$
BEGIN
    IF TG_OP = 'DELETE' THEN
        PERFORM pg_notify('bizdir_businesses',
            json_build_object('kind', 'delete', 'id', OLD.id)::text);
        RETURN OLD;
    END IF;
    PERFORM pg_notify('bizdir_businesses',
        json_build_object('kind', lower(TG_OP), 'id', NEW.id)::text);
    RETURN NEW;
END
$$ LANGUAGE plpgsql;

DROP TRIGGER IF EXISTS businesses_notify ON businesses;
CREATE TRIGGER businesses_notify
    AFTER INSERT OR UPDATE OR DELETE ON businesses
    FOR EACH ROW EXECUTE FUNCTION bizdir_notify_business();
"#;

const LISTING_COLUMNS: &str = "id, name, image, category, rating, price_range, description, location";
const RESERVATION_COLUMNS: &str =
    "id, business_id, user_id, reservation_date, reservation_time, status";

/// Backend over a Postgres database with the [`SCHEMA`] applied.
///
/// One connection. Its driver task decodes NOTIFY payloads and hands them to
/// a forwarder task, which refetches the row and publishes into the
/// [`NotifyHub`], so every [`Subscription`] shares the single `LISTEN`. When
/// the connection ends the hub is closed and every subscriber sees
/// [`SubscriptionError::Closed`](crate::notify::SubscriptionError::Closed).
pub struct PgBackend {
    client: Arc<Client>,
    notify: Arc<NotifyHub>,
    session: RwLock<Option<UserIdentity>>,
}

impl PgBackend {
    /// `url` is a libpq-style connection string or `postgres://` URL.
    pub async fn connect(url: &str) -> Result<Self, BackendError> {
        let (client, mut connection) = tokio_postgres::connect(url, NoTls)
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let stream = stream::poll_fn(move |cx| connection.poll_message(cx));
            futures::pin_mut!(stream);
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(AsyncMessage::Notification(n)) => {
                        if let Some(notice) = decode_for_channel(n.channel(), n.payload()) {
                            let _ = tx.send(notice);
                        }
                    }
                    Ok(AsyncMessage::Notice(notice)) => debug!("postgres notice: {notice}"),
                    Ok(_) => {}
                    Err(e) => {
                        error!("postgres connection error: {e}");
                        break;
                    }
                }
            }
            info!("postgres connection closed");
        });

        let client = Arc::new(client);
        let notify = Arc::new(NotifyHub::new());
        // Weak, so dropping the backend still closes the connection
        let weak = Arc::downgrade(&client);
        tokio::spawn(forward_notices(rx, notify.clone(), move |id: String| {
            let weak = weak.clone();
            async move {
                let client = weak
                    .upgrade()
                    .ok_or_else(|| BackendError::Unavailable("postgres client dropped".into()))?;
                select_listing(&client, &id).await
            }
        }));

        client
            .batch_execute(&format!("LISTEN {LISTINGS_CHANNEL}"))
            .await
            .map_err(classify)?;

        Ok(Self {
            client,
            notify,
            session: RwLock::new(None),
        })
    }

    pub async fn ensure_schema(&self) -> Result<(), BackendError> {
        self.client.batch_execute(SCHEMA).await.map_err(classify)?;
        info!("schema ensured");
        Ok(())
    }

    /// Record who is signed in. Credentials are the auth provider's concern.
    pub async fn sign_in(&self, identity: UserIdentity) {
        *self.session.write().await = Some(identity);
    }

    pub async fn sign_out(&self) {
        *self.session.write().await = None;
    }
}

/// Payload of a `bizdir_businesses` notification. Rows are refetched by id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChangeNotice {
    Insert { id: String },
    Update { id: String },
    Delete { id: String },
}

/// Decode a `bizdir_businesses` payload.
pub fn decode_notification(payload: &str) -> Result<ChangeNotice, serde_json::Error> {
    serde_json::from_str(payload)
}

fn decode_for_channel(channel: &str, payload: &str) -> Option<ChangeNotice> {
    if channel != LISTINGS_CHANNEL {
        debug!("ignoring notification on {channel}");
        return None;
    }
    match decode_notification(payload) {
        Ok(notice) => Some(notice),
        Err(e) => {
            warn!("dropping malformed change notice: {e}");
            metrics::counter!(crate::observability::CHANGE_EVENTS_DROPPED_TOTAL).increment(1);
            None
        }
    }
}

/// Turn notices into change events in arrival order, then close the hub once
/// the driver hangs up.
async fn forward_notices<F, Fut>(
    mut notices: mpsc::UnboundedReceiver<ChangeNotice>,
    hub: Arc<NotifyHub>,
    fetch: F,
) where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<Option<BusinessListing>, BackendError>>,
{
    while let Some(notice) = notices.recv().await {
        let (id, inserted) = match notice {
            ChangeNotice::Delete { id } => {
                hub.publish(&ChangeEvent::Delete { id });
                continue;
            }
            ChangeNotice::Insert { id } => (id, true),
            ChangeNotice::Update { id } => (id, false),
        };
        match fetch(id.clone()).await {
            Ok(Some(row)) if inserted => hub.publish(&ChangeEvent::Insert { row }),
            Ok(Some(row)) => hub.publish(&ChangeEvent::Update { row }),
            // Deleted again before the refetch; its delete notice follows
            Ok(None) => debug!("listing {id} gone before refetch"),
            Err(e) => {
                warn!("dropping change for listing {id}: {e}");
                metrics::counter!(crate::observability::CHANGE_EVENTS_DROPPED_TOTAL).increment(1);
            }
        }
    }
    hub.close_all();
    warn!("change feed closed");
}

async fn select_listing(client: &Client, id: &str) -> Result<Option<BusinessListing>, BackendError> {
    let row = client
        .query_opt(
            &format!("SELECT {LISTING_COLUMNS} FROM businesses WHERE id = $1"),
            &[&id],
        )
        .await
        .map_err(classify)?;
    row.as_ref().map(listing_from_row).transpose()
}

/// Map driver errors onto backend errors, keeping the constraint that fired.
fn classify(e: tokio_postgres::Error) -> BackendError {
    let Some(db) = e.as_db_error() else {
        return BackendError::Unavailable(e.to_string());
    };
    let code = db.code();
    if *code == SqlState::UNIQUE_VIOLATION {
        if db.constraint() == Some(SLOT_UNIQUE_INDEX) {
            return BackendError::SlotTaken;
        }
        return BackendError::Duplicate(db.constraint().unwrap_or("unique key").to_string());
    }
    if *code == SqlState::FOREIGN_KEY_VIOLATION {
        return BackendError::MissingReference(db.message().to_string());
    }
    BackendError::Rejected(db.message().to_string())
}

fn col<'a, T: FromSql<'a>>(row: &'a Row, name: &str) -> Result<T, BackendError> {
    row.try_get(name)
        .map_err(|e| BackendError::Malformed(format!("{name}: {e}")))
}

fn listing_from_row(row: &Row) -> Result<BusinessListing, BackendError> {
    // Older rows stored a single text tag
    let category = match row.try_get::<_, Vec<String>>("category") {
        Ok(tags) => CategoryField::Many(tags),
        Err(_) => CategoryField::One(col(row, "category")?),
    };
    let raw = RawListing {
        id: col(row, "id")?,
        name: col(row, "name")?,
        image: col(row, "image")?,
        category,
        rating: col(row, "rating")?,
        price_range: col(row, "price_range")?,
        description: col(row, "description")?,
        location: col(row, "location")?,
    };
    BusinessListing::try_from(raw).map_err(|e| BackendError::Malformed(e.to_string()))
}

fn reservation_from_row(row: &Row) -> Result<ReservationSlot, BackendError> {
    let id: &str = col(row, "id")?;
    let time: &str = col(row, "reservation_time")?;
    let status: &str = col(row, "status")?;
    Ok(ReservationSlot {
        id: Ulid::from_string(id).map_err(|e| BackendError::Malformed(format!("id {id}: {e}")))?,
        business_id: col(row, "business_id")?,
        user_id: col(row, "user_id")?,
        reservation_date: col(row, "reservation_date")?,
        reservation_time: time
            .parse()
            .map_err(|e: TimeLabelError| BackendError::Malformed(e.to_string()))?,
        status: status
            .parse()
            .map_err(|e: StatusError| BackendError::Malformed(e.to_string()))?,
    })
}

#[async_trait]
impl Backend for PgBackend {
    async fn fetch_listings(&self) -> Result<Vec<BusinessListing>, BackendError> {
        let rows = self
            .client
            .query(&format!("SELECT {LISTING_COLUMNS} FROM businesses"), &[])
            .await
            .map_err(classify)?;
        let mut listings = Vec::with_capacity(rows.len());
        for row in &rows {
            match listing_from_row(row) {
                Ok(listing) => listings.push(listing),
                Err(e) => warn!("skipping listing row: {e}"),
            }
        }
        Ok(listings)
    }

    async fn fetch_listing(&self, id: &str) -> Result<Option<BusinessListing>, BackendError> {
        select_listing(&self.client, id).await
    }

    async fn fetch_reservations(
        &self,
        business_id: &str,
    ) -> Result<Vec<ReservationSlot>, BackendError> {
        let rows = self
            .client
            .query(
                &format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE business_id = $1"),
                &[&business_id],
            )
            .await
            .map_err(classify)?;
        rows.iter().map(reservation_from_row).collect()
    }

    async fn reservation_history(
        &self,
        user_id: &str,
    ) -> Result<Vec<ReservationHistoryEntry>, BackendError> {
        let rows = self
            .client
            .query(
                "SELECT r.id, r.business_id, r.user_id, r.reservation_date, \
                        r.reservation_time, r.status, \
                        b.name AS business_name, b.image AS business_image \
                 FROM reservations r \
                 LEFT JOIN businesses b ON b.id = r.business_id \
                 WHERE r.user_id = $1 \
                 ORDER BY r.reservation_date DESC, r.reservation_time DESC",
                &[&user_id],
            )
            .await
            .map_err(classify)?;
        rows.iter()
            .map(|row| {
                Ok(ReservationHistoryEntry {
                    reservation: reservation_from_row(row)?,
                    business_name: col(row, "business_name")?,
                    business_image: col(row, "business_image")?,
                })
            })
            .collect()
    }

    async fn insert_reservation(
        &self,
        reservation: NewReservation,
    ) -> Result<ReservationSlot, BackendError> {
        let id = Ulid::new().to_string();
        let time = reservation.reservation_time.to_string();
        let status = reservation.status.as_str();
        let row = self
            .client
            .query_one(
                &format!(
                    "INSERT INTO reservations \
                     (id, business_id, user_id, reservation_date, reservation_time, status) \
                     VALUES ($1, $2, $3, $4, $5, $6) RETURNING {RESERVATION_COLUMNS}"
                ),
                &[
                    &id,
                    &reservation.business_id,
                    &reservation.user_id,
                    &reservation.reservation_date,
                    &time,
                    &status,
                ],
            )
            .await
            .map_err(classify)?;
        reservation_from_row(&row)
    }

    async fn insert_profile(&self, profile: UserProfile) -> Result<UserProfile, BackendError> {
        let row = self
            .client
            .query_one(
                "INSERT INTO users (id, email, full_name) VALUES ($1, $2, $3) \
                 RETURNING id, email, full_name",
                &[&profile.id, &profile.email, &profile.full_name],
            )
            .await
            .map_err(classify)?;
        Ok(UserProfile {
            id: col(&row, "id")?,
            email: col(&row, "email")?,
            full_name: col(&row, "full_name")?,
        })
    }

    async fn subscribe(&self, topic: Topic) -> Result<Subscription, BackendError> {
        if self.client.is_closed() || self.notify.is_closed() {
            return Err(BackendError::Unavailable("postgres connection closed".into()));
        }
        Ok(self.notify.subscribe(topic))
    }

    async fn current_user(&self) -> Result<Option<UserIdentity>, BackendError> {
        Ok(self.session.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::SubscriptionError;

    fn listing(id: &str) -> BusinessListing {
        BusinessListing {
            id: id.into(),
            name: format!("Listing {id}"),
            image: String::new(),
            category: vec!["Restaurants".into()],
            rating: 4.6,
            price_range: "1만원대".into(),
            description: "x".repeat(9000),
            location: "Downtown".into(),
        }
    }

    #[test]
    fn decode_id_only_payloads() {
        assert_eq!(
            decode_notification(r#"{"kind":"update","id":"b1"}"#).unwrap(),
            ChangeNotice::Update { id: "b1".into() }
        );
        assert_eq!(
            decode_notification(r#"{"kind":"insert","id":"b2"}"#).unwrap(),
            ChangeNotice::Insert { id: "b2".into() }
        );
        assert_eq!(
            decode_notification(r#"{"kind":"delete","id":"b1"}"#).unwrap(),
            ChangeNotice::Delete { id: "b1".into() }
        );
    }

    #[test]
    fn decode_rejects_unknown_kind() {
        assert!(decode_notification(r#"{"kind":"truncate","id":"b1"}"#).is_err());
        assert!(decode_notification(r#"{"kind":"update"}"#).is_err());
        assert!(decode_notification("not json").is_err());
    }

    #[test]
    fn decode_only_listing_channel() {
        assert!(decode_for_channel("other_channel", r#"{"kind":"delete","id":"x"}"#).is_none());
        assert!(decode_for_channel(LISTINGS_CHANNEL, "garbage").is_none());
        assert_eq!(
            decode_for_channel(LISTINGS_CHANNEL, r#"{"kind":"delete","id":"y"}"#),
            Some(ChangeNotice::Delete { id: "y".into() })
        );
    }

    #[tokio::test]
    async fn forwarder_refetches_rows_then_closes_hub() {
        let hub = Arc::new(NotifyHub::new());
        let mut sub = hub.subscribe(Topic::AllListings);

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(ChangeNotice::Insert { id: "b1".into() }).unwrap();
        tx.send(ChangeNotice::Update { id: "gone".into() }).unwrap();
        tx.send(ChangeNotice::Update { id: "broken".into() }).unwrap();
        tx.send(ChangeNotice::Delete { id: "b2".into() }).unwrap();
        // connection driver exits
        drop(tx);

        forward_notices(rx, hub.clone(), |id: String| async move {
            match id.as_str() {
                "b1" => Ok(Some(listing("b1"))),
                "broken" => Err(BackendError::Malformed("rating".into())),
                _ => Ok(None),
            }
        })
        .await;

        // large rows arrive whole through the refetch
        let event = sub.recv().await.unwrap();
        assert!(matches!(&event, ChangeEvent::Insert { row } if row.description.len() == 9000));
        assert_eq!(sub.recv().await, Ok(ChangeEvent::Delete { id: "b2".into() }));
        assert_eq!(sub.recv().await, Err(SubscriptionError::Closed));
        assert!(!hub.has_topic(&Topic::AllListings));
    }

    #[test]
    fn schema_declares_partial_slot_index() {
        assert!(SCHEMA.contains(&format!("CREATE UNIQUE INDEX IF NOT EXISTS {SLOT_UNIQUE_INDEX}")));
        assert!(SCHEMA.contains("WHERE status <> 'cancelled'"));
        assert!(SCHEMA.contains(&format!("pg_notify('{LISTINGS_CHANNEL}'")));
    }

    #[test]
    fn trigger_payload_carries_ids_only() {
        assert!(!SCHEMA.contains("row_to_json"));
        assert!(SCHEMA.contains("json_build_object('kind', lower(TG_OP), 'id', NEW.id)"));
    }
}
