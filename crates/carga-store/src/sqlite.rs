//! SQLite-based store implementation

use async_trait::async_trait;
use carga_api::{
    ChatMessage, Profile, TrackingPoint, TrackingSample, TrackingSessionRecord, TrackingSummary,
    UserRole,
};
use carga_util::{ShipmentId, UserId};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    ChangeEvent, ChangeFeed, NewChatMessage, NewTrackingPoint, StoreError, StoreResult,
    TrackingStore,
};

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
    feed: ChangeFeed,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::with_connection(Connection::open(path)?, ChangeFeed::default())
    }

    /// Open a store that publishes into an existing feed
    pub fn open_with_feed(path: impl AsRef<Path>, feed: ChangeFeed) -> StoreResult<Self> {
        Self::with_connection(Connection::open(path)?, feed)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, ChangeFeed::default())
    }

    fn with_connection(conn: Connection, feed: ChangeFeed) -> StoreResult<Self> {
        let store = Self {
            conn: Mutex::new(conn),
            feed,
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            r#"
            -- Tracking points (append-only)
            CREATE TABLE IF NOT EXISTS shipment_tracking (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                shipment_id TEXT NOT NULL,
                transporter_id TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                accuracy REAL,
                speed REAL,
                heading REAL,
                recorded_at TEXT NOT NULL
            );

            -- Tracking columns of externally owned shipments
            CREATE TABLE IF NOT EXISTS shipments (
                shipment_id TEXT PRIMARY KEY,
                tracking_enabled INTEGER NOT NULL DEFAULT 0,
                current_latitude REAL,
                current_longitude REAL,
                last_location_update TEXT,
                tracking_started_at TEXT
            );

            CREATE TABLE IF NOT EXISTS tracking_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                shipment_id TEXT NOT NULL,
                transporter_user_id TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                started_at TEXT NOT NULL,
                ended_at TEXT
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                shipment_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS profiles (
                user_id TEXT PRIMARY KEY,
                full_name TEXT NOT NULL,
                phone TEXT,
                role_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_tracking_shipment_time
                ON shipment_tracking(shipment_id, recorded_at);
            CREATE INDEX IF NOT EXISTS idx_sessions_active
                ON tracking_sessions(shipment_id, transporter_user_id, is_active);
            CREATE INDEX IF NOT EXISTS idx_messages_shipment_time
                ON messages(shipment_id, created_at);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }

    fn read_summary(conn: &Connection, shipment_id: &ShipmentId) -> StoreResult<Option<TrackingSummary>> {
        let summary = conn
            .query_row(
                "SELECT shipment_id, tracking_enabled, current_latitude, current_longitude,
                        last_location_update, tracking_started_at
                 FROM shipments WHERE shipment_id = ?",
                [shipment_id.as_str()],
                summary_from_row,
            )
            .optional()?;
        Ok(summary)
    }

    fn read_session(conn: &Connection, id: i64) -> StoreResult<TrackingSessionRecord> {
        let record = conn.query_row(
            "SELECT id, shipment_id, transporter_user_id, is_active, started_at, ended_at
             FROM tracking_sessions WHERE id = ?",
            [id],
            session_from_row,
        )?;
        Ok(record)
    }

    fn publish_summary(&self, summary: Option<TrackingSummary>) {
        if let Some(summary) = summary {
            self.feed.publish(ChangeEvent::ShipmentUpdated(summary));
        }
    }
}

/// Fixed-width UTC timestamps, so text order matches time order
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(idx, &raw)
}

fn optional_timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_timestamp(idx, &s)).transpose()
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn point_from_row(row: &Row<'_>) -> rusqlite::Result<TrackingPoint> {
    Ok(TrackingPoint {
        id: row.get(0)?,
        shipment_id: ShipmentId::new(row.get::<_, String>(1)?),
        transporter_id: UserId::new(row.get::<_, String>(2)?),
        sample: TrackingSample {
            latitude: row.get(3)?,
            longitude: row.get(4)?,
            accuracy: row.get(5)?,
            speed: row.get(6)?,
            heading: row.get(7)?,
        },
        recorded_at: timestamp_column(row, 8)?,
    })
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<TrackingSummary> {
    Ok(TrackingSummary {
        shipment_id: ShipmentId::new(row.get::<_, String>(0)?),
        tracking_enabled: row.get(1)?,
        current_latitude: row.get(2)?,
        current_longitude: row.get(3)?,
        last_location_update: optional_timestamp_column(row, 4)?,
        tracking_started_at: optional_timestamp_column(row, 5)?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<TrackingSessionRecord> {
    Ok(TrackingSessionRecord {
        id: row.get(0)?,
        shipment_id: ShipmentId::new(row.get::<_, String>(1)?),
        transporter_id: UserId::new(row.get::<_, String>(2)?),
        is_active: row.get(3)?,
        started_at: timestamp_column(row, 4)?,
        ended_at: optional_timestamp_column(row, 5)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.get(0)?,
        shipment_id: ShipmentId::new(row.get::<_, String>(1)?),
        sender_id: UserId::new(row.get::<_, String>(2)?),
        content: row.get(3)?,
        created_at: timestamp_column(row, 4)?,
    })
}

#[async_trait]
impl TrackingStore for SqliteStore {
    async fn insert_tracking_point(&self, point: NewTrackingPoint) -> StoreResult<TrackingPoint> {
        let recorded_at = point.recorded_at.unwrap_or_else(carga_util::now);
        let sample = point.sample;

        let id = {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO shipment_tracking
                    (shipment_id, transporter_id, latitude, longitude, accuracy, speed, heading, recorded_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    point.shipment_id.as_str(),
                    point.transporter_id.as_str(),
                    sample.latitude,
                    sample.longitude,
                    sample.accuracy,
                    sample.speed,
                    sample.heading,
                    format_timestamp(&recorded_at),
                ],
            )?;
            conn.last_insert_rowid()
        };

        let inserted = TrackingPoint {
            id,
            shipment_id: point.shipment_id,
            transporter_id: point.transporter_id,
            sample,
            recorded_at,
        };
        debug!(shipment_id = %inserted.shipment_id, point_id = id, "Tracking point inserted");

        self.feed
            .publish(ChangeEvent::TrackingPointInserted(inserted.clone()));
        Ok(inserted)
    }

    async fn list_tracking_points(&self, shipment_id: &ShipmentId) -> StoreResult<Vec<TrackingPoint>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT id, shipment_id, transporter_id, latitude, longitude, accuracy, speed, heading, recorded_at
             FROM shipment_tracking
             WHERE shipment_id = ?
             ORDER BY recorded_at ASC, id ASC",
        )?;

        let points = stmt
            .query_map([shipment_id.as_str()], point_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(points)
    }

    async fn enable_tracking(
        &self,
        shipment_id: &ShipmentId,
        sample: &TrackingSample,
        at: DateTime<Utc>,
    ) -> StoreResult<TrackingSummary> {
        let summary = {
            let conn = self.conn.lock().unwrap();
            let ts = format_timestamp(&at);

            conn.execute(
                "INSERT INTO shipments
                    (shipment_id, tracking_enabled, current_latitude, current_longitude,
                     last_location_update, tracking_started_at)
                 VALUES (?1, 1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(shipment_id) DO UPDATE SET
                    tracking_enabled = 1,
                    current_latitude = excluded.current_latitude,
                    current_longitude = excluded.current_longitude,
                    last_location_update = excluded.last_location_update,
                    tracking_started_at = excluded.tracking_started_at",
                params![shipment_id.as_str(), sample.latitude, sample.longitude, ts],
            )?;

            Self::read_summary(&conn, shipment_id)?
        };

        debug!(shipment_id = %shipment_id, "Tracking enabled");
        self.publish_summary(summary.clone());

        summary.ok_or_else(|| StoreError::NotFound(format!("shipment {}", shipment_id)))
    }

    async fn update_current_location(
        &self,
        shipment_id: &ShipmentId,
        sample: &TrackingSample,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let summary = {
            let conn = self.conn.lock().unwrap();

            conn.execute(
                "INSERT OR IGNORE INTO shipments (shipment_id) VALUES (?)",
                [shipment_id.as_str()],
            )?;

            let changed = conn.execute(
                "UPDATE shipments
                 SET current_latitude = ?2, current_longitude = ?3, last_location_update = ?4
                 WHERE shipment_id = ?1
                   AND (last_location_update IS NULL OR last_location_update <= ?4)",
                params![
                    shipment_id.as_str(),
                    sample.latitude,
                    sample.longitude,
                    format_timestamp(&at)
                ],
            )?;

            if changed == 0 {
                None
            } else {
                Self::read_summary(&conn, shipment_id)?
            }
        };

        match summary {
            Some(summary) => {
                debug!(shipment_id = %shipment_id, "Current location updated");
                self.publish_summary(Some(summary));
                Ok(true)
            }
            None => {
                debug!(shipment_id = %shipment_id, "Skipped stale location update");
                Ok(false)
            }
        }
    }

    async fn disable_tracking(&self, shipment_id: &ShipmentId) -> StoreResult<()> {
        let summary = {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO shipments (shipment_id, tracking_enabled) VALUES (?, 0)
                 ON CONFLICT(shipment_id) DO UPDATE SET tracking_enabled = 0",
                [shipment_id.as_str()],
            )?;
            Self::read_summary(&conn, shipment_id)?
        };

        debug!(shipment_id = %shipment_id, "Tracking disabled");
        self.publish_summary(summary);
        Ok(())
    }

    async fn get_tracking_summary(&self, shipment_id: &ShipmentId) -> StoreResult<Option<TrackingSummary>> {
        let conn = self.conn.lock().unwrap();
        Self::read_summary(&conn, shipment_id)
    }

    async fn open_tracking_session(
        &self,
        shipment_id: &ShipmentId,
        transporter_id: &UserId,
    ) -> StoreResult<TrackingSessionRecord> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT INTO tracking_sessions (shipment_id, transporter_user_id, is_active, started_at)
             VALUES (?, ?, 1, ?)",
            params![
                shipment_id.as_str(),
                transporter_id.as_str(),
                format_timestamp(&carga_util::now())
            ],
        )?;

        let record = Self::read_session(&conn, conn.last_insert_rowid())?;
        debug!(shipment_id = %shipment_id, session_record = record.id, "Tracking session opened");
        Ok(record)
    }

    async fn close_tracking_session(
        &self,
        shipment_id: &ShipmentId,
        transporter_id: &UserId,
    ) -> StoreResult<Option<TrackingSessionRecord>> {
        let conn = self.conn.lock().unwrap();

        let latest: Option<i64> = conn
            .query_row(
                "SELECT id FROM tracking_sessions
                 WHERE shipment_id = ? AND transporter_user_id = ? AND is_active = 1
                 ORDER BY started_at DESC, id DESC
                 LIMIT 1",
                params![shipment_id.as_str(), transporter_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        let Some(id) = latest else {
            debug!(shipment_id = %shipment_id, "No active session record to close");
            return Ok(None);
        };

        conn.execute(
            "UPDATE tracking_sessions SET is_active = 0, ended_at = ? WHERE id = ?",
            params![format_timestamp(&carga_util::now()), id],
        )?;

        let record = Self::read_session(&conn, id)?;
        debug!(shipment_id = %shipment_id, session_record = id, "Tracking session closed");
        Ok(Some(record))
    }

    async fn list_tracking_sessions(&self, shipment_id: &ShipmentId) -> StoreResult<Vec<TrackingSessionRecord>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT id, shipment_id, transporter_user_id, is_active, started_at, ended_at
             FROM tracking_sessions
             WHERE shipment_id = ?
             ORDER BY started_at ASC, id ASC",
        )?;

        let records = stmt
            .query_map([shipment_id.as_str()], session_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    async fn close_stale_sessions(&self) -> StoreResult<usize> {
        let (closed, summaries) = {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction()?;

            let shipment_ids: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT shipment_id FROM shipments WHERE tracking_enabled = 1
                     UNION
                     SELECT shipment_id FROM tracking_sessions WHERE is_active = 1",
                )?;
                let ids = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                ids
            };

            let closed = tx.execute(
                "UPDATE tracking_sessions SET is_active = 0, ended_at = ? WHERE is_active = 1",
                [format_timestamp(&carga_util::now())],
            )?;

            for id in &shipment_ids {
                tx.execute(
                    "INSERT INTO shipments (shipment_id, tracking_enabled) VALUES (?, 0)
                     ON CONFLICT(shipment_id) DO UPDATE SET tracking_enabled = 0",
                    [id.as_str()],
                )?;
            }
            tx.commit()?;

            let mut summaries = Vec::with_capacity(shipment_ids.len());
            for id in shipment_ids {
                if let Some(summary) = Self::read_summary(&conn, &ShipmentId::new(id))? {
                    summaries.push(summary);
                }
            }
            (closed, summaries)
        };

        if closed > 0 || !summaries.is_empty() {
            info!(
                sessions = closed,
                shipments = summaries.len(),
                "Closed stale tracking sessions"
            );
        }

        for summary in summaries {
            self.publish_summary(Some(summary));
        }
        Ok(closed)
    }

    async fn insert_message(&self, message: NewChatMessage) -> StoreResult<ChatMessage> {
        let created_at = carga_util::now();

        let id = {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO messages (shipment_id, sender_id, content, created_at)
                 VALUES (?, ?, ?, ?)",
                params![
                    message.shipment_id.as_str(),
                    message.sender_id.as_str(),
                    message.content,
                    format_timestamp(&created_at),
                ],
            )?;
            conn.last_insert_rowid()
        };

        let inserted = ChatMessage {
            id,
            shipment_id: message.shipment_id,
            sender_id: message.sender_id,
            content: message.content,
            created_at,
        };
        debug!(shipment_id = %inserted.shipment_id, message_id = id, "Message inserted");

        self.feed.publish(ChangeEvent::MessageInserted(inserted.clone()));
        Ok(inserted)
    }

    async fn list_messages(&self, shipment_id: &ShipmentId) -> StoreResult<Vec<ChatMessage>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT id, shipment_id, sender_id, content, created_at
             FROM messages
             WHERE shipment_id = ?
             ORDER BY created_at ASC, id ASC",
        )?;

        let messages = stmt
            .query_map([shipment_id.as_str()], message_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    async fn upsert_profile(&self, profile: &Profile) -> StoreResult<()> {
        let role_json = serde_json::to_string(&profile.role)?;
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT INTO profiles (user_id, full_name, phone, role_json, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                full_name = excluded.full_name,
                phone = excluded.phone,
                role_json = excluded.role_json,
                updated_at = excluded.updated_at",
            params![
                profile.user_id.as_str(),
                profile.full_name,
                profile.phone,
                role_json,
                format_timestamp(&carga_util::now()),
            ],
        )?;

        debug!(user_id = %profile.user_id, "Profile saved");
        Ok(())
    }

    async fn get_profile(&self, user_id: &UserId) -> StoreResult<Option<Profile>> {
        let row = {
            let conn = self.conn.lock().unwrap();
            conn.query_row(
                "SELECT full_name, phone, role_json FROM profiles WHERE user_id = ?",
                [user_id.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?
        };

        let Some((full_name, phone, role_json)) = row else {
            return Ok(None);
        };

        let role: UserRole = serde_json::from_str(&role_json)?;
        Ok(Some(Profile {
            user_id: user_id.clone(),
            full_name,
            phone,
            role,
        }))
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.feed.subscribe()
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}
