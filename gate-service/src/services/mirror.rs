//! Client-local mirror of the session token, its owner and expiry.
//!
//! The mirror is a fast path only. It never carries the two-factor flag, and
//! the "verified at" stamp seeds progress display without authorizing anything.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorEntry {
    pub token: String,
    /// Admin the session was issued to. Absent in mirrors written before it was recorded.
    pub owner: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
}

impl MirrorEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

pub trait SessionMirror: Send + Sync {
    fn load(&self) -> anyhow::Result<Option<MirrorEntry>>;

    fn store(&self, entry: &MirrorEntry) -> anyhow::Result<()>;

    fn record_verified_at(&self, at: DateTime<Utc>) -> anyhow::Result<()>;

    fn verified_at(&self) -> anyhow::Result<Option<DateTime<Utc>>>;

    /// Remove every mirrored key.
    fn clear(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MirrorFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    session_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_owner: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_expiry: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    verified_at: Option<DateTime<Utc>>,
}

impl MirrorFile {
    fn entry(&self) -> Option<MirrorEntry> {
        match (&self.session_token, self.session_expiry) {
            (Some(token), Some(expires_at)) => Some(MirrorEntry {
                token: token.clone(),
                owner: self.session_owner,
                expires_at,
            }),
            _ => None,
        }
    }
}

/// Process-local mirror, one per console.
#[derive(Debug, Default)]
pub struct MemoryMirror {
    inner: Mutex<MirrorFile>,
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionMirror for MemoryMirror {
    fn load(&self) -> anyhow::Result<Option<MirrorEntry>> {
        Ok(self.inner.lock().unwrap_or_else(PoisonError::into_inner).entry())
    }

    fn store(&self, entry: &MirrorEntry) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.session_token = Some(entry.token.clone());
        inner.session_owner = entry.owner;
        inner.session_expiry = Some(entry.expires_at);
        Ok(())
    }

    fn record_verified_at(&self, at: DateTime<Utc>) -> anyhow::Result<()> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .verified_at = Some(at);
        Ok(())
    }

    fn verified_at(&self) -> anyhow::Result<Option<DateTime<Utc>>> {
        Ok(self.inner.lock().unwrap_or_else(PoisonError::into_inner).verified_at)
    }

    fn clear(&self) -> anyhow::Result<()> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = MirrorFile::default();
        Ok(())
    }
}

/// Mirror persisted as a small JSON document, replaced atomically on write.
#[derive(Debug)]
pub struct FileMirror {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileMirror {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> anyhow::Result<MirrorFile> {
        match std::fs::read(&self.path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(file) => Ok(file),
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "Discarding unreadable session mirror"
                    );
                    Ok(MirrorFile::default())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MirrorFile::default()),
            Err(e) => Err(e).with_context(|| format!("reading {}", self.path.display())),
        }
    }

    fn write(&self, file: &MirrorFile) -> anyhow::Result<()> {
        let tmp = self.path.with_extension("tmp");
        let bytes = serde_json::to_vec(file)?;
        std::fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut MirrorFile)) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = self.read()?;
        f(&mut file);
        self.write(&file)
    }
}

impl SessionMirror for FileMirror {
    fn load(&self) -> anyhow::Result<Option<MirrorEntry>> {
        Ok(self.read()?.entry())
    }

    fn store(&self, entry: &MirrorEntry) -> anyhow::Result<()> {
        self.update(|file| {
            file.session_token = Some(entry.token.clone());
            file.session_owner = entry.owner;
            file.session_expiry = Some(entry.expires_at);
        })
    }

    fn record_verified_at(&self, at: DateTime<Utc>) -> anyhow::Result<()> {
        self.update(|file| file.verified_at = Some(at))
    }

    fn verified_at(&self) -> anyhow::Result<Option<DateTime<Utc>>> {
        Ok(self.read()?.verified_at)
    }

    fn clear(&self) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", self.path.display())),
        }
    }
}
