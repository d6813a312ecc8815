//! Durable signal store backed by SQLite.
//!
//! The store owns the canonical signal rows and emits an insert/update
//! event for every committed mutation on a broadcast channel. Events
//! carry the full post-mutation row and are sent while the connection
//! lock is still held, so per-row events always arrive in commit order.
//! Cross-row ordering is not guaranteed and must not be relied upon.

use crate::error::{AppError, Result};
use crate::types::{NewSignal, Prediction, Signal, SignalEvent, SignalResult};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

/// Capacity of the mutation event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Query filter for signal lookups. Results are always ordered by
/// `timestamp` descending.
#[derive(Debug, Clone, Default)]
pub struct SignalFilter {
    /// Inclusive minimum confidence score.
    pub min_confidence: f64,
    /// Restrict to these result states; `None` matches any result.
    pub result_in: Option<Vec<SignalResult>>,
    /// Maximum number of rows returned.
    pub limit: Option<u32>,
}

impl SignalFilter {
    /// Filter matching only resolved signals (WIN or LOSS).
    pub fn resolved() -> Self {
        Self {
            min_confidence: 0.0,
            result_in: Some(vec![SignalResult::Win, SignalResult::Loss]),
            limit: None,
        }
    }

    /// Filter for the bounded recent view at a confidence threshold.
    pub fn recent(min_confidence: f64, limit: u32) -> Self {
        Self {
            min_confidence,
            result_in: None,
            limit: Some(limit),
        }
    }
}

/// Durable store of signal rows with a subscribable mutation stream.
pub struct SignalStore {
    conn: Mutex<Connection>,
    events: broadcast::Sender<SignalEvent>,
}

impl SignalStore {
    /// Open (or create) a signal store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let conn = Connection::open(path)?;
        let store = Self::with_connection(conn)?;
        info!("Signal store initialized");
        Ok(store)
    }

    /// Create an in-memory signal store (for testing).
    pub fn new_in_memory() -> Result<Arc<Self>> {
        let conn = Connection::open_in_memory()?;
        let store = Self::with_connection(conn)?;
        debug!("In-memory signal store initialized");
        Ok(store)
    }

    fn with_connection(conn: Connection) -> Result<Arc<Self>> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let store = Arc::new(Self {
            conn: Mutex::new(conn),
            events,
        });
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS signals (
                id TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                prediction TEXT NOT NULL,
                confidence_score REAL NOT NULL,
                open_price REAL NOT NULL,
                close_price REAL,
                result TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_signals_timestamp ON signals(timestamp DESC)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_signals_result ON signals(result)",
            [],
        )?;

        Ok(())
    }

    /// Subscribe to the mutation event stream. Each committed mutation
    /// produces at most one event carrying the full post-mutation row.
    pub fn subscribe(&self) -> broadcast::Receiver<SignalEvent> {
        self.events.subscribe()
    }

    /// Insert a new pending signal.
    ///
    /// Malformed payloads (confidence outside [0, 100], non-positive
    /// price) are a producer defect and rejected here; they never become
    /// a committed row.
    pub fn insert(&self, new: NewSignal) -> Result<Signal> {
        if !new.confidence_score.is_finite() || !(0.0..=100.0).contains(&new.confidence_score) {
            return Err(AppError::BadRequest(format!(
                "confidence_score {} outside [0, 100]",
                new.confidence_score
            )));
        }
        if !new.open_price.is_finite() || new.open_price <= 0.0 {
            return Err(AppError::BadRequest(format!(
                "open_price {} is not a positive number",
                new.open_price
            )));
        }

        let now = chrono::Utc::now().timestamp_millis();
        let signal = Signal {
            id: Uuid::new_v4(),
            created_at: now,
            timestamp: new.timestamp.unwrap_or(now),
            symbol: new.symbol,
            timeframe: new.timeframe,
            prediction: new.prediction,
            confidence_score: new.confidence_score,
            open_price: new.open_price,
            close_price: None,
            result: Some(SignalResult::Pending),
        };

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO signals
             (id, created_at, timestamp, symbol, timeframe, prediction,
              confidence_score, open_price, close_price, result)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9)",
            params![
                signal.id.to_string(),
                signal.created_at,
                signal.timestamp,
                signal.symbol,
                signal.timeframe,
                signal.prediction.as_str(),
                signal.confidence_score,
                signal.open_price,
                SignalResult::Pending.as_str(),
            ],
        )?;

        debug!(
            "Inserted signal {} ({} conf {:.1})",
            signal.id,
            signal.prediction.as_str(),
            signal.confidence_score
        );

        // Emit under the lock so per-row event order matches commit order.
        let _ = self.events.send(SignalEvent::Insert(signal.clone()));

        Ok(signal)
    }

    /// Resolve a pending signal with its realized close price.
    ///
    /// The WIN/LOSS outcome is derived from the stored prediction and
    /// open price. Resolution happens exactly once; resolving an already
    /// resolved signal is a conflict.
    pub fn resolve(&self, id: Uuid, close_price: f64) -> Result<Signal> {
        if !close_price.is_finite() || close_price <= 0.0 {
            return Err(AppError::BadRequest(format!(
                "close_price {} is not a positive number",
                close_price
            )));
        }

        let conn = self.conn.lock().unwrap();
        let mut signal = Self::fetch(&conn, id)?;

        if signal.is_resolved() {
            return Err(AppError::Conflict(format!(
                "signal {} is already resolved",
                id
            )));
        }

        let result = signal.prediction.outcome(signal.open_price, close_price);
        signal.close_price = Some(close_price);
        signal.result = Some(result);

        conn.execute(
            "UPDATE signals SET close_price = ?1, result = ?2 WHERE id = ?3",
            params![close_price, result.as_str(), id.to_string()],
        )?;

        debug!("Resolved signal {} as {}", id, result.as_str());

        let _ = self.events.send(SignalEvent::Update(signal.clone()));

        Ok(signal)
    }

    /// Get a single signal by id.
    pub fn get(&self, id: Uuid) -> Result<Signal> {
        let conn = self.conn.lock().unwrap();
        Self::fetch(&conn, id)
    }

    /// Query signals ordered by timestamp descending.
    pub fn query(&self, filter: &SignalFilter) -> Result<Vec<Signal>> {
        let mut sql = String::from(
            "SELECT id, created_at, timestamp, symbol, timeframe, prediction,
                    confidence_score, open_price, close_price, result
             FROM signals WHERE confidence_score >= ?1",
        );

        if let Some(results) = &filter.result_in {
            if results.is_empty() {
                return Ok(Vec::new());
            }
            // Result values come from a closed enum, safe to inline.
            let list: Vec<String> = results.iter().map(|r| format!("'{}'", r.as_str())).collect();
            sql.push_str(&format!(" AND result IN ({})", list.join(", ")));
        }

        sql.push_str(" ORDER BY timestamp DESC");

        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![filter.min_confidence], Self::row_to_signal)?;

        let mut signals = Vec::new();
        for row in rows {
            signals.push(row?);
        }
        Ok(signals)
    }

    fn fetch(conn: &Connection, id: Uuid) -> Result<Signal> {
        conn.query_row(
            "SELECT id, created_at, timestamp, symbol, timeframe, prediction,
                    confidence_score, open_price, close_price, result
             FROM signals WHERE id = ?1",
            params![id.to_string()],
            Self::row_to_signal,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                AppError::NotFound(format!("signal {} not found", id))
            }
            other => AppError::Sqlite(other),
        })
    }

    fn row_to_signal(row: &rusqlite::Row<'_>) -> rusqlite::Result<Signal> {
        let id_text: String = row.get(0)?;
        let id = Uuid::parse_str(&id_text).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;

        let prediction_text: String = row.get(5)?;
        let prediction = Prediction::from_str(&prediction_text).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(5, "prediction".to_string(), rusqlite::types::Type::Text)
        })?;

        let result_text: Option<String> = row.get(9)?;
        let result = match result_text {
            Some(text) => Some(SignalResult::from_str(&text).ok_or_else(|| {
                rusqlite::Error::InvalidColumnType(9, "result".to_string(), rusqlite::types::Type::Text)
            })?),
            None => None,
        };

        Ok(Signal {
            id,
            created_at: row.get(1)?,
            timestamp: row.get(2)?,
            symbol: row.get(3)?,
            timeframe: row.get(4)?,
            prediction,
            confidence_score: row.get(6)?,
            open_price: row.get(7)?,
            close_price: row.get(8)?,
            result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Prediction;

    fn new_signal(confidence: f64, prediction: Prediction) -> NewSignal {
        NewSignal {
            timestamp: None,
            symbol: "BTC/USDT".to_string(),
            timeframe: "M1".to_string(),
            prediction,
            confidence_score: confidence,
            open_price: 50_000.0,
        }
    }

    #[test]
    fn test_insert_and_get_roundtrip() {
        let store = SignalStore::new_in_memory().unwrap();
        let inserted = store.insert(new_signal(82.0, Prediction::Call)).unwrap();

        let fetched = store.get(inserted.id).unwrap();
        assert_eq!(fetched, inserted);
        assert_eq!(fetched.result, Some(SignalResult::Pending));
        assert!(fetched.close_price.is_none());
    }

    #[test]
    fn test_insert_rejects_out_of_range_confidence() {
        let store = SignalStore::new_in_memory().unwrap();

        assert!(store.insert(new_signal(101.0, Prediction::Call)).is_err());
        assert!(store.insert(new_signal(-0.5, Prediction::Call)).is_err());
        assert!(store.insert(new_signal(f64::NAN, Prediction::Call)).is_err());
    }

    #[test]
    fn test_resolve_call_win() {
        let store = SignalStore::new_in_memory().unwrap();
        let signal = store.insert(new_signal(82.0, Prediction::Call)).unwrap();

        let resolved = store.resolve(signal.id, 50_100.0).unwrap();
        assert_eq!(resolved.result, Some(SignalResult::Win));
        assert_eq!(resolved.close_price, Some(50_100.0));
    }

    #[test]
    fn test_resolve_put_win_and_loss() {
        let store = SignalStore::new_in_memory().unwrap();

        let put = store.insert(new_signal(82.0, Prediction::Put)).unwrap();
        let resolved = store.resolve(put.id, 49_900.0).unwrap();
        assert_eq!(resolved.result, Some(SignalResult::Win));

        let put = store.insert(new_signal(82.0, Prediction::Put)).unwrap();
        let resolved = store.resolve(put.id, 50_100.0).unwrap();
        assert_eq!(resolved.result, Some(SignalResult::Loss));
    }

    #[test]
    fn test_resolve_is_exactly_once() {
        let store = SignalStore::new_in_memory().unwrap();
        let signal = store.insert(new_signal(82.0, Prediction::Call)).unwrap();

        store.resolve(signal.id, 50_100.0).unwrap();
        let second = store.resolve(signal.id, 49_000.0);
        assert!(matches!(second, Err(AppError::Conflict(_))));

        // Resolved row stays immutable.
        let fetched = store.get(signal.id).unwrap();
        assert_eq!(fetched.result, Some(SignalResult::Win));
        assert_eq!(fetched.close_price, Some(50_100.0));
    }

    #[test]
    fn test_resolve_missing_signal() {
        let store = SignalStore::new_in_memory().unwrap();
        let missing = store.resolve(Uuid::new_v4(), 50_000.0);
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_query_min_confidence_is_inclusive() {
        let store = SignalStore::new_in_memory().unwrap();
        store.insert(new_signal(75.0, Prediction::Call)).unwrap();
        store.insert(new_signal(74.9, Prediction::Call)).unwrap();

        let matched = store
            .query(&SignalFilter::recent(75.0, 10))
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].confidence_score, 75.0);
    }

    #[test]
    fn test_query_orders_newest_first_and_limits() {
        let store = SignalStore::new_in_memory().unwrap();
        for i in 0..5 {
            let mut signal = new_signal(80.0, Prediction::Call);
            signal.timestamp = Some(1_000 + i);
            store.insert(signal).unwrap();
        }

        let signals = store.query(&SignalFilter::recent(0.0, 3)).unwrap();
        assert_eq!(signals.len(), 3);
        assert_eq!(signals[0].timestamp, 1_004);
        assert_eq!(signals[1].timestamp, 1_003);
        assert_eq!(signals[2].timestamp, 1_002);
    }

    #[test]
    fn test_query_result_filter() {
        let store = SignalStore::new_in_memory().unwrap();
        let a = store.insert(new_signal(80.0, Prediction::Call)).unwrap();
        let b = store.insert(new_signal(85.0, Prediction::Put)).unwrap();
        store.insert(new_signal(90.0, Prediction::Call)).unwrap();

        store.resolve(a.id, 50_100.0).unwrap();
        store.resolve(b.id, 50_100.0).unwrap();

        let resolved = store.query(&SignalFilter::resolved()).unwrap();
        assert_eq!(resolved.len(), 2);
        assert!(resolved.iter().all(|s| s.is_resolved()));
    }

    #[tokio::test]
    async fn test_events_in_commit_order_per_row() {
        let store = SignalStore::new_in_memory().unwrap();
        let mut events = store.subscribe();

        let signal = store.insert(new_signal(82.0, Prediction::Call)).unwrap();
        store.resolve(signal.id, 50_100.0).unwrap();

        let first = events.recv().await.unwrap();
        assert!(matches!(first, SignalEvent::Insert(ref s) if s.id == signal.id));

        let second = events.recv().await.unwrap();
        match second {
            SignalEvent::Update(s) => {
                assert_eq!(s.id, signal.id);
                assert_eq!(s.result, Some(SignalResult::Win));
            }
            other => panic!("expected update event, got {:?}", other),
        }
    }
}
