//! Vigie persistence: three independent key/value entries in SQLite.
//! Keep code tiny and predictable.
//!
//! Load is tolerant (missing/corrupt values become empty defaults); saves
//! return errors for the caller to log and swallow, so a storage fault
//! never blocks the notification path.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use metrics::{counter, histogram};
use tracing::warn;
use vigie_core::{Notification, OrderId};

pub const KEY_NOTIFICATIONS: &str = "notifications";
pub const KEY_SEEN: &str = "seen_orders";
pub const KEY_STATUSES: &str = "last_statuses";

/// Everything the engine reloads at startup.
#[derive(Debug, Clone, Default)]
pub struct PersistedState {
    pub notifications: Vec<Notification>,
    pub seen: Vec<OrderId>,
    /// `[order_id, status_label]` pairs, the wire layout of the statuses key.
    pub last_statuses: Vec<(OrderId, String)>,
}

pub trait Store: Send + Sync {
    /// Never fails: each key degrades to its empty default independently.
    fn load(&self) -> PersistedState;
    fn save_notifications(&self, items: &[Notification]) -> Result<()>;
    fn save_seen(&self, ids: &[OrderId]) -> Result<()>;
    fn save_statuses(&self, pairs: &[(OrderId, String)]) -> Result<()>;
}

/// SQLite-backed store. Simple, synchronous; one writer per client session.
pub struct SqliteStore {
    db: std::sync::Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("VIGIE_DB_PATH").unwrap_or_else(|_| default_db_path());
        Self::open(&path)
    }

    pub fn open(path: &str) -> Result<Self> {
        let started = std::time::Instant::now();
        let db = rusqlite::Connection::open(path)
            .with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", &"WAL").ok();
        db.pragma_update(None, "synchronous", &"NORMAL").ok();
        db.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )
        .context("creating kv table")?;
        let me = Self { db: std::sync::Mutex::new(db) };
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(me)
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let started = std::time::Instant::now();
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare("SELECT value FROM kv WHERE key = ?1")?;
        let mut rows = stmt.query([key])?;
        let out = match rows.next()? {
            Some(row) => Some(row.get::<_, String>(0)?),
            None => None,
        };
        histogram!("persist_get_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(out)
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let started = std::time::Instant::now();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO kv(key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )
        .with_context(|| format!("writing kv key {}", key))?;
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_put_total", 1u64);
        Ok(())
    }

    /// Read one key and decode it, substituting the default on any failure.
    fn load_key<T: serde::de::DeserializeOwned + Default>(&self, key: &str) -> T {
        match self.get(key) {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(v) => v,
                Err(e) => {
                    warn!(key, error = %e, "corrupt persisted value; using default");
                    counter!("persist_corrupt_total", 1u64);
                    T::default()
                }
            },
            Ok(None) => T::default(),
            Err(e) => {
                warn!(key, error = %e, "reading persisted value failed; using default");
                T::default()
            }
        }
    }
}

impl Store for SqliteStore {
    fn load(&self) -> PersistedState {
        PersistedState {
            notifications: self.load_key(KEY_NOTIFICATIONS),
            seen: self.load_key(KEY_SEEN),
            last_statuses: self.load_key(KEY_STATUSES),
        }
    }

    fn save_notifications(&self, items: &[Notification]) -> Result<()> {
        let raw = serde_json::to_string(items).context("serializing notifications")?;
        self.put(KEY_NOTIFICATIONS, &raw)
    }

    fn save_seen(&self, ids: &[OrderId]) -> Result<()> {
        let raw = serde_json::to_string(ids).context("serializing seen orders")?;
        self.put(KEY_SEEN, &raw)
    }

    fn save_statuses(&self, pairs: &[(OrderId, String)]) -> Result<()> {
        let raw = serde_json::to_string(pairs).context("serializing last statuses")?;
        self.put(KEY_STATUSES, &raw)
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemStore {
    state: std::sync::Mutex<PersistedState>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemStore {
    fn load(&self) -> PersistedState {
        self.state.lock().unwrap().clone()
    }

    fn save_notifications(&self, items: &[Notification]) -> Result<()> {
        self.state.lock().unwrap().notifications = items.to_vec();
        Ok(())
    }

    fn save_seen(&self, ids: &[OrderId]) -> Result<()> {
        self.state.lock().unwrap().seen = ids.to_vec();
        Ok(())
    }

    fn save_statuses(&self, pairs: &[(OrderId, String)]) -> Result<()> {
        self.state.lock().unwrap().last_statuses = pairs.to_vec();
        Ok(())
    }
}

fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".vigie");
        let _ = std::fs::create_dir_all(&p);
        p.push("vigie.db");
        return p.to_string_lossy().to_string();
    }
    // Fallback to current directory
    "vigie.db".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vigie_core::{Notification, OrderRecord};

    fn temp_db() -> String {
        let dir = std::env::temp_dir();
        let f = format!(
            "vigie-test-{}.db",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        );
        dir.join(f).to_string_lossy().to_string()
    }

    fn notif(order_id: &str) -> Notification {
        let rec = OrderRecord {
            id: order_id.into(),
            status_raw: "pending".into(),
            status_label: None,
            customer_name: None,
            order_number: None,
            location: None,
            created_at: None,
            updated_at: None,
        };
        Notification::arrival(&rec, rec.status_text(), Utc::now())
    }

    #[test]
    fn round_trips_all_three_keys() {
        let path = temp_db();
        let s = SqliteStore::open(&path).unwrap();
        s.save_notifications(&[notif("1"), notif("2")]).unwrap();
        s.save_seen(&["1".to_string()]).unwrap();
        s.save_statuses(&[("1".to_string(), "En attente".to_string())]).unwrap();

        let loaded = s.load();
        assert_eq!(loaded.notifications.len(), 2);
        assert_eq!(loaded.notifications[0].order_id, "1");
        assert_eq!(loaded.seen, vec!["1".to_string()]);
        assert_eq!(loaded.last_statuses, vec![("1".to_string(), "En attente".to_string())]);
    }

    #[test]
    fn empty_db_loads_defaults() {
        let s = SqliteStore::open(&temp_db()).unwrap();
        let loaded = s.load();
        assert!(loaded.notifications.is_empty());
        assert!(loaded.seen.is_empty());
        assert!(loaded.last_statuses.is_empty());
    }

    #[test]
    fn corrupt_value_degrades_to_default() {
        let path = temp_db();
        let s = SqliteStore::open(&path).unwrap();
        s.put(KEY_NOTIFICATIONS, "{not json").unwrap();
        s.save_seen(&["7".to_string()]).unwrap();
        let loaded = s.load();
        // Only the corrupt key degrades; the others load normally.
        assert!(loaded.notifications.is_empty());
        assert_eq!(loaded.seen, vec!["7".to_string()]);
    }

    #[test]
    fn saves_overwrite_in_place() {
        let s = SqliteStore::open(&temp_db()).unwrap();
        s.save_seen(&["1".to_string(), "2".to_string()]).unwrap();
        s.save_seen(&["3".to_string()]).unwrap();
        assert_eq!(s.load().seen, vec!["3".to_string()]);
    }
}
