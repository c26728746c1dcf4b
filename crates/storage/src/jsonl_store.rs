//! JSON-lines event file.
//!
//! One serialized event per line. The file is only ever opened for append, so
//! earlier lines are never rewritten.

use std::path::{Path, PathBuf};

use edflow_core::{Event, Time};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{EventStore, Result, StoreError};

/// Append-only JSON-lines event store.
#[derive(Debug, Clone)]
pub struct JsonLinesEventStore {
    path: PathBuf,
}

impl JsonLinesEventStore {
    /// Open (or prepare) the file at `path`, creating parent directories.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        Ok(Self { path })
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_lines(&self) -> Result<Vec<Event>> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut events = Vec::new();
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let event: Event =
                serde_json::from_str(line).map_err(|source| StoreError::Corrupt { line: i + 1, source })?;
            events.push(event);
        }
        events.sort_by_key(Event::order_key);
        Ok(events)
    }
}

#[async_trait::async_trait]
impl EventStore for JsonLinesEventStore {
    async fn append_batch(&mut self, events: &[Event]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut buf = String::new();
        for event in events {
            buf.push_str(&serde_json::to_string(event)?);
            buf.push('\n');
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path).await?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;

        debug!("Appended {} events to {}", events.len(), self.path.display());
        Ok(())
    }

    async fn read_since(&self, from: Time) -> Result<Vec<Event>> {
        let mut events = self.read_lines().await?;
        events.retain(|e| e.timestamp >= from);
        Ok(events)
    }

    async fn read_all(&self) -> Result<Vec<Event>> {
        self.read_lines().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use edflow_core::{EventKind, EventLog, PatientId};

    fn t(minute: i64) -> Time {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn arrival(minute: i64, id: &str) -> Event {
        Event::agent(t(minute), EventKind::Arrival { patient: PatientId::new(id) })
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonLinesEventStore::new(dir.path().join("run/events.jsonl")).await.unwrap();

        let mut log = EventLog::new();
        log.append(arrival(0, "P1"));
        log.append(arrival(30, "P2"));
        store.append_batch(&log.iter().cloned().collect::<Vec<_>>()).await.unwrap();
        log.append(arrival(90, "P3"));
        store.append_batch(&log.since(t(90)).cloned().collect::<Vec<_>>()).await.unwrap();

        let all = store.read_all().await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![1, 2, 3]);

        let recent = store.read_since(t(30)).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind.patient(), Some(&PatientId::new("P2")));
    }

    #[tokio::test]
    async fn test_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLinesEventStore::new(dir.path().join("none.jsonl")).await.unwrap();
        assert!(store.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_line_reports_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let mut store = JsonLinesEventStore::new(&path).await.unwrap();
        store.append_batch(&[arrival(0, "P1")]).await.unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).await.unwrap();
        file.write_all(b"{not json}\n").await.unwrap();

        match store.read_all().await {
            Err(StoreError::Corrupt { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected corrupt line, got {:?}", other.map(|v| v.len())),
        }
    }
}
