// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::session::Session;

const SESSION_FILE: &str = "session.yaml";
const INDEX_FILE: &str = ".index.yaml";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no session matches '{0}'")]
    NotFound(String),
    #[error("'{0}' matches more than one session; use a longer prefix")]
    AmbiguousPrefix(String),
    #[error("session data is missing or unreadable: {0}")]
    Unreadable(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crash-safe YAML persistence of sessions.
///
/// Layout under the store root:
///
/// ```text
/// sessions/
///   .index.yaml                # { uuid: dirname } map
///   2026-08-01_a1b2c3d4/
///     session.yaml
/// ```
///
/// Writers go through a sibling `.tmp` file followed by a rename, so a
/// reader sees either the prior version or the new one, never a torn file.
/// A torn or missing `session.yaml` makes the session unreadable as a
/// whole.  The index is a cache: when missing or corrupt it is rebuilt by
/// scanning the session directories.
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at the default per-user sessions directory.
    pub fn default_location() -> Self {
        Self::new(nils_config::sessions_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist a session snapshot.  Creates the directory on first save;
    /// idempotent for unchanged sessions.
    pub fn save(&self, session: &Session) -> Result<(), StoreError> {
        let dir = self.root.join(session.dir_name());
        std::fs::create_dir_all(&dir)?;

        let yaml = serde_yaml::to_string(session)
            .map_err(|e| StoreError::Unreadable(format!("serialize: {e}")))?;
        write_atomic(&dir.join(SESSION_FILE), yaml.as_bytes())?;

        let mut index = self.read_index();
        let dirname = session.dir_name();
        if index.get(&session.id.to_string()) != Some(&dirname) {
            index.insert(session.id.to_string(), dirname);
            self.write_index(&index)?;
        }
        debug!(id = %session.id, "session saved");
        Ok(())
    }

    /// Load a session by full UUID.
    pub fn load(&self, id: Uuid) -> Result<Session, StoreError> {
        let index = self.ensure_index();
        let dirname = index
            .get(&id.to_string())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        self.load_dir(dirname)
    }

    /// Resolve a UUID prefix to the unique matching session.
    ///
    /// Errors when zero or more than one session matches.
    pub fn find_by_prefix(&self, prefix: &str) -> Result<Session, StoreError> {
        let needle = prefix.trim().to_lowercase();
        let index = self.ensure_index();
        let matches: Vec<&String> = index
            .iter()
            .filter(|(id, _)| id.starts_with(&needle))
            .map(|(_, dirname)| dirname)
            .collect();
        match matches.as_slice() {
            [] => Err(StoreError::NotFound(prefix.to_string())),
            [dirname] => self.load_dir(dirname),
            _ => Err(StoreError::AmbiguousPrefix(prefix.to_string())),
        }
    }

    /// The session with the highest `updated_at`, if any is readable.
    pub fn latest(&self) -> Result<Session, StoreError> {
        let index = self.ensure_index();
        let mut best: Option<Session> = None;
        for dirname in index.values() {
            match self.load_dir(dirname) {
                Ok(s) => {
                    if best.as_ref().map(|b| s.updated_at > b.updated_at).unwrap_or(true) {
                        best = Some(s);
                    }
                }
                Err(e) => warn!(dir = %dirname, error = %e, "skipping unreadable session"),
            }
        }
        best.ok_or_else(|| StoreError::NotFound("latest".into()))
    }

    /// All readable sessions, newest first.
    pub fn list(&self) -> Vec<Session> {
        let index = self.ensure_index();
        let mut sessions: Vec<Session> = index
            .values()
            .filter_map(|dirname| self.load_dir(dirname).ok())
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions
    }

    /// Remove a session directory and its index entry.
    pub fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let mut index = self.ensure_index();
        let dirname = index
            .remove(&id.to_string())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        std::fs::remove_dir_all(self.root.join(dirname))?;
        self.write_index(&index)?;
        Ok(())
    }

    fn load_dir(&self, dirname: &str) -> Result<Session, StoreError> {
        let path = self.root.join(dirname).join(SESSION_FILE);
        let text = std::fs::read_to_string(&path)
            .map_err(|e| StoreError::Unreadable(format!("{}: {e}", path.display())))?;
        serde_yaml::from_str(&text)
            .map_err(|e| StoreError::Unreadable(format!("{}: {e}", path.display())))
    }

    /// Read the index, rebuilding it by scan when missing or corrupt.
    fn ensure_index(&self) -> BTreeMap<String, String> {
        let path = self.root.join(INDEX_FILE);
        if let Ok(text) = std::fs::read_to_string(&path) {
            if let Ok(index) = serde_yaml::from_str(&text) {
                return index;
            }
            warn!(path = %path.display(), "corrupt session index, rebuilding");
        }
        let rebuilt = self.rebuild_index();
        if let Err(e) = self.write_index(&rebuilt) {
            warn!(error = %e, "could not persist rebuilt index");
        }
        rebuilt
    }

    fn read_index(&self) -> BTreeMap<String, String> {
        self.ensure_index()
    }

    fn rebuild_index(&self) -> BTreeMap<String, String> {
        let mut index = BTreeMap::new();
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return index;
        };
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let dirname = entry.file_name().to_string_lossy().to_string();
            match self.load_dir(&dirname) {
                Ok(session) => {
                    index.insert(session.id.to_string(), dirname);
                }
                Err(e) => warn!(dir = %dirname, error = %e, "skipping during index rebuild"),
            }
        }
        index
    }

    fn write_index(&self, index: &BTreeMap<String, String>) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.root)?;
        let yaml = serde_yaml::to_string(index)
            .map_err(|e| StoreError::Unreadable(format!("serialize index: {e}")))?;
        write_atomic(&self.root.join(INDEX_FILE), yaml.as_bytes())
    }
}

/// Write to a sibling `.tmp` file, then rename over the destination.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
