// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Key, KeyValueBucket, KeyValueStore, StoreError, StoreOutcome, check_key};

/// File holding every sorted index of a bucket
const INDEX_FILE: &str = ".indexes.json";

type Indexes = HashMap<String, HashMap<String, f64>>;

/// Persists each bucket as a directory and each key as a file inside it.
/// Keys containing `/` become nested directories.
#[derive(Clone)]
pub struct FileStore {
    root: PathBuf,
    connection_id: u64,
    /// Buckets opened so far. Arc so that we only ever have one map here after clone.
    active_dirs: Arc<Mutex<HashMap<PathBuf, Directory>>>,
}

impl FileStore {
    pub(super) fn new<P: Into<PathBuf>>(root_dir: P) -> Self {
        FileStore {
            root: root_dir.into(),
            connection_id: rand::random::<u64>(),
            active_dirs: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    /// A "bucket" is a directory
    async fn get_or_create_bucket(
        &self,
        bucket_name: &str,
    ) -> Result<Box<dyn KeyValueBucket>, StoreError> {
        check_key(bucket_name)?;
        let p = self.root.join(bucket_name);
        if let Some(dir) = self.active_dirs.lock().get(&p) {
            return Ok(Box::new(dir.clone()));
        };

        if p.exists() {
            if !p.is_dir() {
                return Err(StoreError::FilesystemError(
                    "Bucket name is not a directory".to_string(),
                ));
            }
        } else {
            fs::create_dir_all(&p).map_err(to_fs_err)?;
        }
        let dir = Directory::new(p.clone());
        self.active_dirs.lock().insert(p, dir.clone());
        Ok(Box::new(dir))
    }

    fn connection_id(&self) -> u64 {
        self.connection_id
    }

    fn shutdown(&self) {
        self.active_dirs.lock().clear();
    }
}

#[derive(Clone)]
pub struct Directory {
    p: PathBuf,
    /// Serializes read-modify-write of the index file
    index_lock: Arc<Mutex<()>>,
}

impl Directory {
    fn new(p: PathBuf) -> Self {
        Directory {
            p,
            index_lock: Arc::new(Mutex::new(())),
        }
    }

    fn key_path(&self, key: &Key) -> Result<PathBuf, StoreError> {
        check_key(key.as_ref())?;
        Ok(self.p.join(key.as_ref()))
    }

    fn index_path(&self) -> PathBuf {
        self.p.join(INDEX_FILE)
    }

    fn read_indexes(&self) -> Result<Indexes, StoreError> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(Indexes::new());
        }
        let data = fs::read(&path)
            .with_context(|| path.display().to_string())
            .map_err(a_to_fs_err)?;
        Ok(serde_json::from_slice(&data)?)
    }

    fn write_indexes(&self, indexes: &Indexes) -> Result<(), StoreError> {
        let path = self.index_path();
        let data = serde_json::to_vec(indexes)?;
        fs::write(&path, data)
            .with_context(|| path.display().to_string())
            .map_err(a_to_fs_err)
    }

    /// Walks the bucket directory, returning every key file below it.
    fn collect_files(&self, dir: &Path, out: &mut Vec<(Key, PathBuf)>) -> Result<(), StoreError> {
        let contents = fs::read_dir(dir)
            .with_context(|| dir.display().to_string())
            .map_err(a_to_fs_err)?;
        for entry in contents {
            let entry = entry.map_err(to_fs_err)?;
            let path = entry.path();
            if path.is_dir() {
                self.collect_files(&path, out)?;
                continue;
            }
            if entry.file_name() == INDEX_FILE {
                continue;
            }
            let key = match path.strip_prefix(&self.p) {
                Ok(rel) => rel.to_string_lossy().to_string(),
                Err(err) => {
                    tracing::error!(
                        error = %err,
                        path = %path.display(),
                        bucket = %self.p.display(),
                        "FileStore path not in bucket. Skipping entry."
                    );
                    continue;
                }
            };
            out.push((Key::new(key), path));
        }
        Ok(())
    }
}

impl fmt::Display for Directory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.p.display())
    }
}

#[async_trait]
impl KeyValueBucket for Directory {
    /// Write a file to the directory
    async fn insert(&self, key: &Key, value: bytes::Bytes) -> Result<StoreOutcome, StoreError> {
        let full_path = self.key_path(key)?;
        let existed = full_path.exists();
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).map_err(to_fs_err)?;
        }
        let str_path = full_path.display().to_string();
        fs::write(&full_path, &value)
            .context(str_path)
            .map_err(a_to_fs_err)?;
        Ok(if existed {
            StoreOutcome::Updated
        } else {
            StoreOutcome::Created
        })
    }

    /// Read a file from the directory
    async fn get(&self, key: &Key) -> Result<Option<bytes::Bytes>, StoreError> {
        let full_path = self.key_path(key)?;
        if !full_path.is_file() {
            return Ok(None);
        }
        let str_path = full_path.display().to_string();
        let data: bytes::Bytes = fs::read(&full_path)
            .context(str_path)
            .map_err(a_to_fs_err)?
            .into();
        Ok(Some(data))
    }

    /// Delete a file from the directory
    async fn delete(&self, key: &Key) -> Result<bool, StoreError> {
        let full_path = self.key_path(key)?;
        if !full_path.is_file() {
            return Ok(false);
        }
        let str_path = full_path.display().to_string();
        fs::remove_file(&full_path)
            .context(str_path)
            .map_err(a_to_fs_err)?;
        Ok(true)
    }

    async fn keys(&self) -> Result<Vec<Key>, StoreError> {
        let mut files = Vec::new();
        self.collect_files(&self.p, &mut files)?;
        Ok(files.into_iter().map(|(key, _)| key).collect())
    }

    async fn entries(&self) -> Result<HashMap<Key, bytes::Bytes>, StoreError> {
        let mut files = Vec::new();
        self.collect_files(&self.p, &mut files)?;
        let mut out = HashMap::with_capacity(files.len());
        for (key, path) in files {
            let data: bytes::Bytes = fs::read(&path)
                .with_context(|| path.display().to_string())
                .map_err(a_to_fs_err)?
                .into();
            out.insert(key, data);
        }
        Ok(out)
    }

    async fn index_add(&self, index: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let _guard = self.index_lock.lock();
        let mut indexes = self.read_indexes()?;
        indexes
            .entry(index.to_string())
            .or_default()
            .insert(member.to_string(), score);
        self.write_indexes(&indexes)
    }

    async fn index_remove(&self, index: &str, member: &str) -> Result<(), StoreError> {
        let _guard = self.index_lock.lock();
        let mut indexes = self.read_indexes()?;
        let Some(members) = indexes.get_mut(index) else {
            return Ok(());
        };
        members.remove(member);
        if members.is_empty() {
            indexes.remove(index);
        }
        self.write_indexes(&indexes)
    }

    async fn index_range(
        &self,
        index: &str,
        start: usize,
        stop: Option<usize>,
    ) -> Result<Vec<String>, StoreError> {
        let indexes = {
            let _guard = self.index_lock.lock();
            self.read_indexes()?
        };
        Ok(indexes
            .get(index)
            .map(|members| super::ranked(members, start, stop))
            .unwrap_or_default())
    }

    async fn index_len(&self, index: &str) -> Result<usize, StoreError> {
        let indexes = {
            let _guard = self.index_lock.lock();
            self.read_indexes()?
        };
        Ok(indexes.get(index).map(|m| m.len()).unwrap_or(0))
    }
}

// For anyhow preserve the context
fn a_to_fs_err(err: anyhow::Error) -> StoreError {
    StoreError::FilesystemError(format!("{err:#}"))
}

fn to_fs_err<E: std::error::Error>(err: E) -> StoreError {
    StoreError::FilesystemError(err.to_string())
}
