//! Append-only event log.
//!
//! Events are written one per line, prefixed with the `EVENT_JSON ` sentinel
//! so they can share a file with ordinary log output and still be parsed
//! back out. Appends are serialized through a single async mutex; queries
//! re-read the file and return the newest events first.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::domain::ShieldEvent;
use crate::error::ShieldResult;

/// Marker prefixing every event line in the log file.
pub const EVENT_SENTINEL: &str = "EVENT_JSON ";

/// File-backed, append-only store of decision events.
///
/// Records are never rewritten or deleted; a crash can at worst lose the
/// line being written.
pub struct EventLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event. Writers queue on the mutex so concurrent appends
    /// never interleave within a line.
    pub async fn append(&self, event: &ShieldEvent) -> ShieldResult<()> {
        let json = serde_json::to_string(event)?;
        let mut line = String::with_capacity(EVENT_SENTINEL.len() + json.len() + 1);
        line.push_str(EVENT_SENTINEL);
        line.push_str(&json);
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// The most recent `limit` events, newest first.
    ///
    /// A missing log file reads as an empty log. Lines without the sentinel
    /// and sentinel lines that fail to parse are skipped.
    pub async fn query(&self, limit: usize) -> ShieldResult<Vec<ShieldEvent>> {
        let file = match fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    path = %self.path.display(),
                    "Event log file not found, returning no events"
                );
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            let Some(idx) = line.find(EVENT_SENTINEL) else {
                continue;
            };
            let payload = line[idx + EVENT_SENTINEL.len()..].trim();
            match serde_json::from_str::<ShieldEvent>(payload) {
                Ok(event) => events.push(event),
                // Malformed entries are skipped rather than failing the query.
                Err(_) => continue,
            }
        }

        if events.len() > limit {
            events.drain(..events.len() - limit);
        }
        events.reverse();
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventType;
    use std::sync::Arc;

    fn log_in(dir: &tempfile::TempDir) -> EventLog {
        EventLog::new(dir.path().join("shield.log"))
    }

    #[tokio::test]
    async fn test_append_and_query_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);

        let event = ShieldEvent::new(EventType::Block, "blocked prompt preview")
            .with_meta("detector", "prompt_injection")
            .with_meta("reason", "prompt_injection_detected");
        log.append(&event).await.unwrap();

        let events = log.query(10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Block);
        assert_eq!(events[0].preview, "blocked prompt preview");
        assert_eq!(events[0].metadata["detector"], "prompt_injection");
    }

    #[tokio::test]
    async fn test_query_returns_newest_first_up_to_limit() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);

        for i in 0..5 {
            log.append(&ShieldEvent::new(EventType::Success, format!("event {}", i)))
                .await
                .unwrap();
        }

        let events = log.query(3).await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].preview, "event 4");
        assert_eq!(events[1].preview, "event 3");
        assert_eq!(events[2].preview, "event 2");
    }

    #[tokio::test]
    async fn test_missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        let events = log.query(10).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_query_skips_non_event_and_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shield.log");
        let valid = serde_json::to_string(&ShieldEvent::new(EventType::Redact, "kept")).unwrap();
        std::fs::write(
            &path,
            format!(
                "plain log line without sentinel\n\
                 EVENT_JSON {{not valid json\n\
                 2025-01-05T10:00:00Z INFO shield: EVENT_JSON {}\n",
                valid
            ),
        )
        .unwrap();

        let log = EventLog::new(path);
        let events = log.query(10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].preview, "kept");
    }

    #[tokio::test]
    async fn test_concurrent_appends_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(log_in(&dir));

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let log = log.clone();
                tokio::spawn(async move {
                    log.append(&ShieldEvent::new(EventType::Success, format!("c{}", i)))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let events = log.query(100).await.unwrap();
        assert_eq!(events.len(), 10);
    }
}
