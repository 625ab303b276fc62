//! Signed-in party and its on-disk record.
//!
//! The session is an explicit value handed to whatever needs the acting
//! party. [`SessionStore`] persists it with atomic writes and a schema
//! version so an interrupted write never leaves a half-written file.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::message::{ConversationKey, SenderRole};

/// Current schema version for the session file.
const CURRENT_SCHEMA_VERSION: u32 = 1;

const SESSION_FILE: &str = "session.json";

/// Error type for session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid session data: {0}")]
    InvalidData(String),

    #[error("Unsupported schema version: {0} (max supported: {1})")]
    UnsupportedSchema(u32, u32),

    #[error("Not signed in")]
    Anonymous,
}

/// A marketplace party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub role: SenderRole,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: SenderRole) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: None,
            role,
        }
    }

    /// Direct-thread key between this party and `other`.
    ///
    /// Users are always the initiator of a direct thread; vendors and admins
    /// answer on the vendor side.
    pub fn direct_key(&self, other: &str, agent_id: Option<String>) -> ConversationKey {
        match self.role {
            SenderRole::User => ConversationKey::direct(self.id.clone(), other, agent_id),
            SenderRole::Vendor | SenderRole::Admin => {
                ConversationKey::direct(other, self.id.clone(), agent_id)
            }
        }
    }
}

/// Who is signed in, if anyone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    user: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signed_in_at: Option<DateTime<Utc>>,
}

impl Session {
    /// An anonymous session.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn login(&mut self, user: User) {
        self.user = Some(user);
        self.signed_in_at = Some(Utc::now());
    }

    pub fn logout(&mut self) {
        self.user = None;
        self.signed_in_at = None;
    }

    /// The signed-in party.
    pub fn current(&self) -> Option<&User> {
        self.user.as_ref()
    }

    /// The signed-in party, or [`SessionError::Anonymous`].
    pub fn require(&self) -> Result<&User, SessionError> {
        self.current().ok_or(SessionError::Anonymous)
    }

    pub fn signed_in_at(&self) -> Option<DateTime<Utc>> {
        self.signed_in_at
    }
}

/// On-disk format with schema versioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionFile {
    schema_version: u32,
    #[serde(flatten)]
    session: Session,
}

/// Persists the session under an app directory.
pub struct SessionStore {
    base_path: PathBuf,
}

impl SessionStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.base_path.join(SESSION_FILE)
    }

    /// Load the session. A missing file is an anonymous session.
    pub fn load(&self) -> Result<Session, SessionError> {
        let path = self.path();
        if !path.exists() {
            return Ok(Session::anonymous());
        }

        let content = fs::read_to_string(&path)?;

        let raw: serde_json::Value = serde_json::from_str(&content)?;
        let version_u64 = raw
            .get("schema_version")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| SessionError::InvalidData("missing schema_version".to_string()))?;
        let version = u32::try_from(version_u64)
            .map_err(|_| SessionError::InvalidData("schema_version too large".to_string()))?;

        if version > CURRENT_SCHEMA_VERSION {
            return Err(SessionError::UnsupportedSchema(
                version,
                CURRENT_SCHEMA_VERSION,
            ));
        }

        let file: SessionFile = serde_json::from_value(raw)?;
        Ok(file.session)
    }

    /// Load the session, treating an unreadable file as anonymous.
    pub fn load_or_anonymous(&self) -> Session {
        match self.load() {
            Ok(session) => session,
            Err(e) => {
                warn!(path = %self.path().display(), error = %e, "Ignoring unreadable session");
                Session::anonymous()
            }
        }
    }

    /// Save the session. An anonymous session removes the file.
    pub fn save(&self, session: &Session) -> Result<(), SessionError> {
        if session.current().is_none() {
            return self.clear();
        }

        fs::create_dir_all(&self.base_path)?;
        let file = SessionFile {
            schema_version: CURRENT_SCHEMA_VERSION,
            session: session.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        atomic_write(&self.path(), json.as_bytes())?;
        Ok(())
    }

    /// Remove the stored session.
    pub fn clear(&self) -> Result<(), SessionError> {
        let path = self.path();
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

/// Write content atomically using temp file + fsync + rename.
fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let pid = std::process::id();

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    let tmp_path = path.with_file_name(format!("{file_name}.{timestamp}.{pid}.tmp"));

    let result = (|| {
        let mut file = File::create(&tmp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }

    result
}
