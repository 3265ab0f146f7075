use crate::prelude::{CoreError, CoreResult};
use crate::recorder::record::{DetectionRecord, NewDetectionRecord};
use crate::recorder::sink::{RecordSink, SinkError};
use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{params, Connection, ErrorCode};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Local append-only `detections` table.
#[derive(Clone)]
pub struct SqliteSink {
    conn: Arc<Mutex<Connection>>,
    label: String,
}

impl SqliteSink {
    pub fn open<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path_ref = path.as_ref();
        let conn = Connection::open(path_ref).map_err(|err| {
            CoreError::Sink(format!("opening {}: {}", path_ref.display(), err))
        })?;
        Self::with_connection(conn, path_ref.display().to_string())
    }

    pub fn open_in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|err| CoreError::Sink(format!("opening in-memory db: {}", err)))?;
        Self::with_connection(conn, ":memory:".to_string())
    }

    fn with_connection(conn: Connection, label: String) -> CoreResult<Self> {
        let journal: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(|err| CoreError::Sink(format!("enabling WAL: {}", err)))?;
        debug!("sqlite journal mode for {}: {}", label, journal);
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS detections (
              id TEXT PRIMARY KEY,
              created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
              action TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_detections_created ON detections(created_at);
            "#,
        )
        .map_err(|err| CoreError::Sink(format!("creating schema: {}", err)))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            label,
        })
    }

    /// Most recent records, newest first.
    pub fn recent(&self, limit: usize) -> CoreResult<Vec<DetectionRecord>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| CoreError::Internal("sqlite connection poisoned".into()))?;
        let mut stmt = conn
            .prepare(
                "SELECT id, created_at, action FROM detections ORDER BY created_at DESC, rowid DESC LIMIT ?1",
            )
            .map_err(|err| CoreError::Sink(err.to_string()))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|err| CoreError::Sink(err.to_string()))?;

        let mut records = Vec::new();
        for row in rows {
            let (id, created_at, action) = row.map_err(|err| CoreError::Sink(err.to_string()))?;
            records.push(DetectionRecord {
                id: Uuid::parse_str(&id)
                    .map_err(|err| CoreError::Sink(format!("corrupt id {}: {}", id, err)))?,
                created_at: parse_timestamp(&created_at).map_err(CoreError::Sink)?,
                action,
            });
        }
        Ok(records)
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| format!("corrupt created_at {}: {}", raw, err))
}

fn classify(err: rusqlite::Error) -> SinkError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ) =>
        {
            SinkError::transient(err.to_string())
        }
        _ => SinkError::permanent(err.to_string()),
    }
}

impl RecordSink for SqliteSink {
    async fn insert(&self, record: NewDetectionRecord) -> Result<DetectionRecord, SinkError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<DetectionRecord, SinkError> {
            let conn = conn
                .lock()
                .map_err(|_| SinkError::permanent("sqlite connection poisoned"))?;
            let created_at: String = conn
                .query_row(
                    "INSERT INTO detections(id, action) VALUES (?1, ?2) RETURNING created_at",
                    params![record.id.to_string(), record.action],
                    |row| row.get(0),
                )
                .map_err(classify)?;
            Ok(DetectionRecord {
                id: record.id,
                created_at: parse_timestamp(&created_at).map_err(SinkError::permanent)?,
                action: record.action,
            })
        })
        .await
        .map_err(|err| SinkError::transient(format!("sqlite worker failed: {}", err)))?
    }

    fn describe(&self) -> String {
        format!("sqlite {}", self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_record(action: &str) -> NewDetectionRecord {
        NewDetectionRecord {
            id: Uuid::new_v4(),
            action: action.to_string(),
        }
    }

    #[tokio::test]
    async fn insert_assigns_created_at_and_reads_back() {
        let sink = SqliteSink::open_in_memory().unwrap();
        let stored = sink.insert(new_record("coffee-cup detected")).await.unwrap();
        assert_eq!(stored.action, "coffee-cup detected");

        let recent = sink.recent(10).unwrap();
        assert_eq!(recent, vec![stored]);
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.db");
        {
            let sink = SqliteSink::open(&path).unwrap();
            sink.insert(new_record("coffee-cup detected")).await.unwrap();
            sink.insert(new_record("mug detected")).await.unwrap();
        }
        let reopened = SqliteSink::open(&path).unwrap();
        assert_eq!(reopened.recent(10).unwrap().len(), 2);
        assert_eq!(reopened.recent(1).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_id_is_permanent_failure() {
        let sink = SqliteSink::open_in_memory().unwrap();
        let record = new_record("coffee-cup detected");
        sink.insert(record.clone()).await.unwrap();
        let err = sink.insert(record).await.unwrap_err();
        assert!(!err.transient);
    }
}
