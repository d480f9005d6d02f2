//! Durable "last seen suggestion" cursor.
//!
//! Persisted as `{"last_id": <int>}`. A missing, unreadable, or malformed file
//! loads as [`Cursor::Unseeded`]; the caller never sees a load error.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::io::atomic_write;

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// Highest suggestion id already handed to the presentation layer.
///
/// `Unseeded` orders below every `Seen` value, so `max` keeps the cursor
/// monotonic across seeding and advancing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Cursor {
    Unseeded,
    Seen(i64),
}

impl Cursor {
    pub fn last_id(&self) -> Option<i64> {
        match self {
            Cursor::Unseeded => None,
            Cursor::Seen(id) => Some(*id),
        }
    }

    /// True when a record with `id` has not been delivered yet.
    pub fn admits(&self, id: i64) -> bool {
        match self {
            Cursor::Unseeded => true,
            Cursor::Seen(last) => id > *last,
        }
    }

    /// Move forward to `id`; never moves backwards.
    pub fn advanced_to(self, id: i64) -> Cursor {
        self.max(Cursor::Seen(id))
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cursor::Unseeded => f.write_str("unseeded"),
            Cursor::Seen(id) => write!(f, "{id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// CursorStore
// ---------------------------------------------------------------------------

pub trait CursorStore: Send + Sync {
    /// Never fails; anything unusable loads as `Unseeded`.
    fn load(&self) -> Cursor;

    fn save(&self, cursor: Cursor) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CursorFile {
    last_id: i64,
}

/// JSON file store, written atomically.
#[derive(Debug, Clone)]
pub struct JsonCursorStore {
    path: PathBuf,
}

impl JsonCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CursorStore for JsonCursorStore {
    fn load(&self) -> Cursor {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Cursor::Unseeded,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "cursor file unreadable; starting unseeded");
                return Cursor::Unseeded;
            }
        };
        match serde_json::from_str::<CursorFile>(&data) {
            Ok(f) if f.last_id >= 0 => Cursor::Seen(f.last_id),
            Ok(f) => {
                tracing::warn!(last_id = f.last_id, "negative cursor in state file; starting unseeded");
                Cursor::Unseeded
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "malformed cursor file; starting unseeded");
                Cursor::Unseeded
            }
        }
    }

    /// Saving `Unseeded` is a no-op: there is nothing durable to record.
    fn save(&self, cursor: Cursor) -> Result<()> {
        let Some(last_id) = cursor.last_id() else {
            return Ok(());
        };
        let data = serde_json::to_vec(&CursorFile { last_id })?;
        atomic_write(&self.path, &data)
    }
}
