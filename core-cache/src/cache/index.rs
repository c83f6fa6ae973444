//! Persistent content index.
//!
//! Maps cache keys to the small integer ids used in span file names and
//! records each key's discovered content length. Stored as JSON next to the
//! span files and rewritten atomically (temp file + rename).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::Path;
use tokio::fs;

pub const INDEX_FILE_NAME: &str = "cached_content_index.json";
const INDEX_TEMP_FILE_NAME: &str = "cached_content_index.json.tmp";
const INDEX_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    contents: Vec<IndexEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    id: u32,
    key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    length: Option<u64>,
}

#[derive(Debug, Clone)]
struct ContentEntry {
    id: u32,
    length: Option<u64>,
}

/// In-memory view of the content index.
#[derive(Debug, Default)]
pub struct ContentIndex {
    by_key: HashMap<String, ContentEntry>,
    by_id: HashMap<u32, String>,
    next_id: u32,
    dirty: bool,
}

impl ContentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the index from `dir`. A missing file yields an empty index.
    ///
    /// # Errors
    ///
    /// Returns `InvalidData` if the file exists but cannot be parsed.
    pub async fn load(dir: &Path) -> io::Result<Self> {
        let bytes = match fs::read(dir.join(INDEX_FILE_NAME)).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(err) => return Err(err),
        };

        let file: IndexFile = serde_json::from_slice(&bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if file.version != INDEX_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported index version {}", file.version),
            ));
        }

        let mut index = Self::new();
        for entry in file.contents {
            if index.by_id.contains_key(&entry.id) || index.by_key.contains_key(&entry.key) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("duplicate index entry for id {}", entry.id),
                ));
            }
            index.next_id = index.next_id.max(entry.id.saturating_add(1));
            index.by_id.insert(entry.id, entry.key.clone());
            index.by_key.insert(
                entry.key,
                ContentEntry {
                    id: entry.id,
                    length: entry.length,
                },
            );
        }
        Ok(index)
    }

    /// Id of `key`, allocating one if needed.
    pub fn get_or_add(&mut self, key: &str) -> u32 {
        if let Some(entry) = self.by_key.get(key) {
            return entry.id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.by_id.insert(id, key.to_string());
        self.by_key
            .insert(key.to_string(), ContentEntry { id, length: None });
        self.dirty = true;
        id
    }

    pub fn id(&self, key: &str) -> Option<u32> {
        self.by_key.get(key).map(|entry| entry.id)
    }

    pub fn key_for_id(&self, id: u32) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    pub fn content_length(&self, key: &str) -> Option<u64> {
        self.by_key.get(key).and_then(|entry| entry.length)
    }

    pub fn set_content_length(&mut self, key: &str, length: u64) {
        self.get_or_add(key);
        if let Some(entry) = self.by_key.get_mut(key) {
            if entry.length != Some(length) {
                entry.length = Some(length);
                self.dirty = true;
            }
        }
    }

    /// Removes `key`. Its id is never reused.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.by_key.remove(key) {
            Some(entry) => {
                self.by_id.remove(&entry.id);
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.by_key.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Returns whether the index changed since the last call.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        let mut contents: Vec<IndexEntry> = self
            .by_key
            .iter()
            .map(|(key, entry)| IndexEntry {
                id: entry.id,
                key: key.clone(),
                length: entry.length,
            })
            .collect();
        contents.sort_by_key(|entry| entry.id);

        serde_json::to_vec_pretty(&IndexFile {
            version: INDEX_VERSION,
            contents,
        })
    }

    /// Atomically replaces the index file in `dir` with `bytes`.
    pub async fn write(dir: &Path, bytes: &[u8]) -> io::Result<()> {
        let temp = dir.join(INDEX_TEMP_FILE_NAME);
        fs::write(&temp, bytes).await?;
        if let Err(err) = fs::rename(&temp, dir.join(INDEX_FILE_NAME)).await {
            let _ = fs::remove_file(&temp).await;
            return Err(err);
        }
        Ok(())
    }
}
