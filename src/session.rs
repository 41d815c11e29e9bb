//! Durable session snapshots
//!
//! One JSON entry per assignment slug bridges an interrupted session: the
//! server identities of confirmed-uploaded clips plus the studio state and
//! a timestamp. Entries older than the validity window, and entries that
//! fail to parse, are discarded rather than surfaced as errors.

use crate::director::StudioState;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// How long a saved session stays restorable.
const SESSION_VALIDITY_HOURS: i64 = 24;

/// What survives a reload: identities, phase, and when it was written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub recording_ids: Vec<String>,
    pub state: StudioState,
    pub timestamp: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn new(recording_ids: Vec<String>, state: StudioState) -> Self {
        Self {
            recording_ids,
            state,
            timestamp: Utc::now(),
        }
    }

    /// Whether this snapshot is still within the validity window.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.timestamp) < Duration::hours(SESSION_VALIDITY_HOURS)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to access session storage: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode session snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Filesystem-backed store, one file per assignment slug.
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Store under the platform config directory.
    pub fn new() -> Result<Self, SessionError> {
        let base = dirs::config_dir().ok_or_else(|| {
            SessionError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no config directory available",
            ))
        })?;
        Ok(Self::with_dir(base.join("signstudio").join("sessions")))
    }

    /// Store rooted at an explicit directory.
    pub fn with_dir(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn entry_path(&self, slug: &str) -> PathBuf {
        // Slugs are URL path segments; keep only filename-safe characters
        let safe: String = slug
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }

    /// Persist the snapshot for a slug, replacing any previous entry.
    pub fn save(&self, slug: &str, snapshot: &SessionSnapshot) -> Result<(), SessionError> {
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string(snapshot)?;
        fs::write(self.entry_path(slug), json)?;
        debug!(slug, count = snapshot.recording_ids.len(), "Session snapshot saved");
        Ok(())
    }

    /// Load a still-valid snapshot for a slug.
    ///
    /// Missing, unreadable, corrupt, and expired entries all yield `None`;
    /// anything unusable is removed so it is not re-examined next time.
    pub fn load(&self, slug: &str) -> Option<SessionSnapshot> {
        let path = self.entry_path(slug);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return None,
        };

        let snapshot: SessionSnapshot = match serde_json::from_str(&raw) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(slug, "Discarding corrupt session snapshot: {}", e);
                remove_entry(&path);
                return None;
            }
        };

        if !snapshot.is_valid(Utc::now()) {
            debug!(slug, "Discarding expired session snapshot");
            remove_entry(&path);
            return None;
        }
        Some(snapshot)
    }

    /// Remove the entry for a slug, if any.
    pub fn clear(&self, slug: &str) {
        remove_entry(&self.entry_path(slug));
    }
}

fn remove_entry(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove session entry {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, SessionStore) {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::with_dir(dir.path().join("sessions"));
        (dir, store)
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let (_dir, store) = store();
        let snapshot = SessionSnapshot::new(
            vec!["rec-1".into(), "rec-2".into()],
            StudioState::Complete,
        );
        store.save("hello-sign", &snapshot).unwrap();

        let loaded = store.load("hello-sign").expect("snapshot should load");
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn test_load_missing_entry() {
        let (_dir, store) = store();
        assert!(store.load("nothing-here").is_none());
    }

    #[test]
    fn test_corrupt_entry_is_discarded() {
        let (_dir, store) = store();
        fs::create_dir_all(&store.dir).unwrap();
        let path = store.entry_path("broken");
        fs::write(&path, "{not json").unwrap();

        assert!(store.load("broken").is_none());
        // Entry removed so it will not be re-examined
        assert!(!path.exists());
    }

    #[test]
    fn test_validity_window() {
        let snapshot = SessionSnapshot::new(vec!["rec-1".into()], StudioState::Complete);
        let now = snapshot.timestamp;
        assert!(snapshot.is_valid(now + Duration::hours(1)));
        assert!(!snapshot.is_valid(now + Duration::hours(25)));
    }

    #[test]
    fn test_expired_entry_is_discarded() {
        let (_dir, store) = store();
        let snapshot = SessionSnapshot {
            recording_ids: vec!["rec-1".into()],
            state: StudioState::Complete,
            timestamp: Utc::now() - Duration::hours(25),
        };
        store.save("stale", &snapshot).unwrap();

        assert!(store.load("stale").is_none());
        assert!(!store.entry_path("stale").exists());
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let snapshot = SessionSnapshot::new(vec!["rec-1".into()], StudioState::Complete);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("recordingIds"));
        assert!(json.contains("\"state\":\"complete\""));
        assert!(json.contains("timestamp"));
    }

    #[test]
    fn test_clear_removes_entry() {
        let (_dir, store) = store();
        let snapshot = SessionSnapshot::new(vec![], StudioState::Brief);
        store.save("gone", &snapshot).unwrap();
        store.clear("gone");
        assert!(store.load("gone").is_none());

        // Clearing an absent entry is a no-op
        store.clear("gone");
    }

    #[test]
    fn test_slug_sanitized_for_filesystem() {
        let (_dir, store) = store();
        let path = store.entry_path("../escape/attempt");
        assert!(path.starts_with(&store.dir));
        assert!(!path.to_string_lossy().contains(".."));
    }
}
