/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

const KEY_TOKEN: &str = "auth_token";
const KEY_SAVED: &str = "saved_ids_json";
const KEY_FOLLOWING: &str = "following_ids_json";

pub fn default_data_dir() -> Result<PathBuf> {
    if let Ok(v) = std::env::var("FEEDSYNC_DATA_DIR") {
        return Ok(PathBuf::from(v));
    }
    let proj = ProjectDirs::from("net", "feedsync", "Feedsync")
        .context("unable to determine platform data dir")?;
    Ok(proj.data_local_dir().to_path_buf())
}

/// Key/value table backing the session across restarts.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create data dir: {}", dir.display()))?;
        }
        let conn = Connection::open(&path).with_context(|| format!("open db: {}", path.display()))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS local_meta (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self { path })
    }

    pub fn get_local_meta(&self, key: &str) -> Result<Option<String>> {
        let conn = Connection::open(&self.path)?;
        conn.query_row(
            "SELECT value FROM local_meta WHERE key=?1",
            params![key],
            |r| r.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn set_local_meta(&self, key: &str, value: &str) -> Result<()> {
        let conn = Connection::open(&self.path)?;
        conn.execute(
            "INSERT OR REPLACE INTO local_meta(key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn delete_local_meta(&self, key: &str) -> Result<()> {
        let conn = Connection::open(&self.path)?;
        conn.execute("DELETE FROM local_meta WHERE key=?1", params![key])?;
        Ok(())
    }
}

/// Credentials plus the locally remembered saved items and followed
/// authors. Updates hit memory first; persistence errors are returned to the
/// caller but never undo the in-memory change.
#[derive(Debug, Default)]
pub struct ClientSessionState {
    token: RwLock<Option<String>>,
    saved: RwLock<HashSet<String>>,
    following: RwLock<HashSet<String>>,
    store: Option<SessionStore>,
}

impl ClientSessionState {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::load(SessionStore::open(db_path)?)
    }

    pub fn load(store: SessionStore) -> Result<Self> {
        let token = store.get_local_meta(KEY_TOKEN)?.filter(|t| !t.trim().is_empty());
        let saved = read_id_set(&store, KEY_SAVED)?;
        let following = read_id_set(&store, KEY_FOLLOWING)?;
        Ok(Self {
            token: RwLock::new(token),
            saved: RwLock::new(saved),
            following: RwLock::new(following),
            store: Some(store),
        })
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().unwrap().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.read().unwrap().is_some()
    }

    pub fn set_token(&self, token: Option<String>) -> Result<()> {
        let token = token.filter(|t| !t.trim().is_empty());
        *self.token.write().unwrap() = token.clone();
        let Some(store) = &self.store else {
            return Ok(());
        };
        match token {
            Some(t) => store.set_local_meta(KEY_TOKEN, &t),
            None => store.delete_local_meta(KEY_TOKEN),
        }
    }

    /// Drops the token and the per-account follow list.
    pub fn logout(&self) -> Result<()> {
        self.following.write().unwrap().clear();
        self.persist_set(KEY_FOLLOWING, &self.following)?;
        self.set_token(None)
    }

    pub fn is_saved(&self, item_id: &str) -> bool {
        self.saved.read().unwrap().contains(item_id)
    }

    pub fn set_saved(&self, item_id: &str, saved: bool) -> Result<()> {
        update_set(&self.saved, item_id, saved);
        self.persist_set(KEY_SAVED, &self.saved)
    }

    pub fn is_following(&self, author_id: &str) -> bool {
        self.following.read().unwrap().contains(author_id)
    }

    pub fn set_following(&self, author_id: &str, following: bool) -> Result<()> {
        update_set(&self.following, author_id, following);
        self.persist_set(KEY_FOLLOWING, &self.following)
    }

    pub fn replace_following(&self, ids: impl IntoIterator<Item = String>) -> Result<()> {
        *self.following.write().unwrap() = ids.into_iter().filter(|s| !s.is_empty()).collect();
        self.persist_set(KEY_FOLLOWING, &self.following)
    }

    pub fn following_count(&self) -> usize {
        self.following.read().unwrap().len()
    }

    fn persist_set(&self, key: &str, set: &RwLock<HashSet<String>>) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let sorted: BTreeSet<String> = set.read().unwrap().iter().cloned().collect();
        store.set_local_meta(key, &serde_json::to_string(&sorted)?)
    }
}

fn update_set(set: &RwLock<HashSet<String>>, id: &str, present: bool) {
    let mut g = set.write().unwrap();
    if present {
        g.insert(id.to_string());
    } else {
        g.remove(id);
    }
}

fn read_id_set(store: &SessionStore, key: &str) -> Result<HashSet<String>> {
    let Some(raw) = store.get_local_meta(key)? else {
        return Ok(HashSet::new());
    };
    // Corrupt entries read as empty.
    Ok(serde_json::from_str::<Vec<String>>(&raw)
        .map(|v| v.into_iter().collect())
        .unwrap_or_default())
}
