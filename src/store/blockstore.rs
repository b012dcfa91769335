//! Durable per-node block store.
//!
//! In-memory state is authoritative for the process lifetime; every mutation
//! commits to memory first and then persists to disk, and persistence
//! failures are logged rather than propagated. The whole store sits behind
//! one readers-writer lock, and disk writes happen while holding the
//! exclusive half -- payloads are bounded by the datagram limit, so the hold
//! times stay short.
//!
//! Disk layout under the storage root:
//!   `metadata/<filename>.meta`  serialized `FileMetadata`
//!   `blocks/<block_id>.blk`     serialized `FileBlock`
//! Startup recovery scans `metadata/` and then loads every referenced block;
//! a missing block file just leaves a hole that reads skip over.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::store::{FileBlock, FileMetadata};
use crate::utils::{unix_millis, ShoalError};

use tokio::fs;
use tokio::sync::RwLock;

struct FileEntry {
    meta: FileMetadata,
    /// True while a merge round involving this file is in flight (as
    /// coordinator or as collect responder). Appends stay permitted; they
    /// are simply not part of the already-taken merge snapshot.
    merging: bool,
}

#[derive(Default)]
struct StoreInner {
    files: HashMap<String, FileEntry>,
    blocks: HashMap<u64, FileBlock>,
}

pub struct BlockStore {
    /// My log line prefix.
    me: String,

    root: PathBuf,
    inner: RwLock<StoreInner>,
}

impl BlockStore {
    /// Opens the store rooted at `root`, creating the directory layout and
    /// running the crash-recovery scan.
    pub async fn new_and_setup(me: String, root: &Path) -> Result<Self, ShoalError> {
        fs::create_dir_all(root.join("metadata")).await?;
        fs::create_dir_all(root.join("blocks")).await?;

        let store = BlockStore {
            me,
            root: root.to_path_buf(),
            inner: RwLock::new(StoreInner::default()),
        };
        store.recover().await?;
        Ok(store)
    }

    async fn recover(&self) -> Result<(), ShoalError> {
        let mut inner = self.inner.write().await;
        let mut dir = fs::read_dir(self.root.join("metadata")).await?;
        while let Some(entry) = dir.next_entry().await? {
            if entry.path().extension().and_then(|e| e.to_str()) != Some("meta") {
                continue;
            }
            let bytes = match fs::read(entry.path()).await {
                Ok(b) => b,
                Err(e) => {
                    pf_warn!(self.me; "skipping unreadable metadata {:?}: {}", entry.path(), e);
                    continue;
                }
            };
            let meta = match FileMetadata::from_bytes(&bytes) {
                Ok(m) => m,
                Err(e) => {
                    pf_warn!(self.me; "skipping corrupt metadata {:?}: {}", entry.path(), e);
                    continue;
                }
            };

            for block_id in &meta.block_ids {
                if inner.blocks.contains_key(block_id) {
                    continue;
                }
                match fs::read(self.block_path(*block_id)).await {
                    Ok(bytes) => match FileBlock::from_bytes(&bytes) {
                        Ok(block) => {
                            inner.blocks.insert(*block_id, block);
                        }
                        Err(e) => {
                            pf_warn!(self.me; "corrupt block {}: {}", block_id, e);
                        }
                    },
                    Err(_) => {
                        // partial write tolerated: reads will skip the hole
                        pf_warn!(self.me; "missing block file {} for '{}'", block_id, meta.filename);
                    }
                }
            }
            inner.files.insert(
                meta.filename.clone(),
                FileEntry {
                    meta,
                    merging: false,
                },
            );
        }
        if !inner.files.is_empty() {
            pf_info!(self.me; "recovered {} file(s) from disk", inner.files.len());
        }
        Ok(())
    }

    /// Creates a new file. Returns false if the filename is taken or
    /// invalid. Non-empty initial data becomes a single block authored by
    /// `client_id` with sequence number 0.
    pub async fn create(&self, filename: &str, data: &[u8], client_id: &str) -> bool {
        let now_ms = unix_millis();
        let initial = if data.is_empty() {
            None
        } else {
            Some(FileBlock::build(client_id, 0, now_ms, data.to_vec()))
        };
        self.create_inner(filename, initial, now_ms).await
    }

    /// Creates a new file whose initial content is an already-built block
    /// (replica-side implicit create: the block keeps its original id so
    /// every replica agrees on it).
    pub async fn create_with_block(&self, filename: &str, block: FileBlock) -> bool {
        self.create_inner(filename, Some(block), unix_millis()).await
    }

    async fn create_inner(&self, filename: &str, initial: Option<FileBlock>, now_ms: u64) -> bool {
        if !valid_filename(filename) {
            pf_warn!(self.me; "rejecting invalid filename '{}'", filename);
            return false;
        }

        let mut inner = self.inner.write().await;
        if inner.files.contains_key(filename) {
            return false;
        }

        let mut meta = FileMetadata::fresh(filename, now_ms);
        if let Some(block) = initial {
            meta.block_ids.push(block.block_id);
            meta.total_size = block.len() as u64;
            self.persist_block(&block).await;
            inner.blocks.insert(block.block_id, block);
        }
        self.persist_meta(&meta).await;
        inner.files.insert(
            filename.to_string(),
            FileEntry {
                meta,
                merging: false,
            },
        );
        true
    }

    /// Appends a block to an existing file. Returns false if the file is
    /// unknown. Re-delivery of an already-listed block id is a no-op apart
    /// from filling in missing block bytes, so replicate retries and merge
    /// back-fill cannot double-append.
    pub async fn append_block(&self, filename: &str, block: FileBlock) -> bool {
        let mut inner = self.inner.write().await;
        let duplicate = match inner.files.get(filename) {
            Some(entry) => entry.meta.block_ids.contains(&block.block_id),
            None => return false,
        };

        if duplicate {
            if !inner.blocks.contains_key(&block.block_id) {
                self.persist_block(&block).await;
                inner.blocks.insert(block.block_id, block);
            }
            return true;
        }

        let entry = inner.files.get_mut(filename).unwrap();
        entry.meta.block_ids.push(block.block_id);
        entry.meta.total_size += block.len() as u64;
        entry.meta.version += 1;
        entry.meta.last_modified_ms = unix_millis();
        let meta = entry.meta.clone();
        self.persist_block(&block).await;
        inner.blocks.insert(block.block_id, block);
        self.persist_meta(&meta).await;
        true
    }

    pub async fn has_file(&self, filename: &str) -> bool {
        self.inner.read().await.files.contains_key(filename)
    }

    pub async fn metadata(&self, filename: &str) -> Option<FileMetadata> {
        self.inner
            .read()
            .await
            .files
            .get(filename)
            .map(|e| e.meta.clone())
    }

    /// Assembles the file's bytes in block-id order. Missing blocks are
    /// skipped. `None` if the file is unknown.
    pub async fn get(&self, filename: &str) -> Option<Vec<u8>> {
        let inner = self.inner.read().await;
        let entry = inner.files.get(filename)?;
        let mut data = Vec::with_capacity(entry.meta.total_size as usize);
        for id in &entry.meta.block_ids {
            if let Some(block) = inner.blocks.get(id) {
                data.extend_from_slice(&block.data);
            }
        }
        Some(data)
    }

    /// The file's present blocks in block-id order.
    pub async fn get_blocks(&self, filename: &str) -> Vec<FileBlock> {
        let inner = self.inner.read().await;
        let Some(entry) = inner.files.get(filename) else {
            return Vec::new();
        };
        entry
            .meta
            .block_ids
            .iter()
            .filter_map(|id| inner.blocks.get(id).cloned())
            .collect()
    }

    pub async fn list_files(&self) -> Vec<String> {
        self.inner.read().await.files.keys().cloned().collect()
    }

    /// Atomically replaces the file's block list with `merged` (already in
    /// the deterministic merge order), recomputing size and bumping the
    /// version. Returns the new version, or `None` if the file is unknown.
    pub async fn merge(&self, filename: &str, merged: Vec<FileBlock>) -> Option<u32> {
        let mut inner = self.inner.write().await;
        let entry = inner.files.get_mut(filename)?;

        let old_ids: Vec<u64> = entry.meta.block_ids.drain(..).collect();
        entry.meta.block_ids = merged.iter().map(|b| b.block_id).collect();
        entry.meta.total_size = merged.iter().map(|b| b.len() as u64).sum();
        entry.meta.version += 1;
        entry.meta.last_modified_ms = unix_millis();
        entry.merging = false;
        let meta = entry.meta.clone();

        for id in old_ids {
            if !meta.block_ids.contains(&id) {
                inner.blocks.remove(&id);
            }
        }
        for block in merged {
            self.persist_block(&block).await;
            inner.blocks.insert(block.block_id, block);
        }
        self.persist_meta(&meta).await;
        Some(meta.version)
    }

    /// Installs a coordinator-ordered block-id list verbatim (MERGE_UPDATE
    /// at a non-coordinator replica). Ids whose blocks are not yet local
    /// stay listed; later replicate fan-out fills them in.
    pub async fn apply_merge_update(&self, filename: &str, ids: Vec<u64>, version: u32) -> bool {
        let mut inner = self.inner.write().await;
        if !inner.files.contains_key(filename) {
            return false;
        }
        let present: u64 = ids
            .iter()
            .filter_map(|id| inner.blocks.get(id))
            .map(|b| b.len() as u64)
            .sum();

        let entry = inner.files.get_mut(filename).unwrap();
        entry.meta.block_ids = ids;
        entry.meta.version = version;
        entry.meta.last_modified_ms = unix_millis();
        entry.meta.total_size = present;
        entry.merging = false;
        let meta = entry.meta.clone();
        self.persist_meta(&meta).await;
        true
    }

    /// Flags / unflags an in-flight merge round. Returns false if the file
    /// is unknown.
    pub async fn set_merging(&self, filename: &str, merging: bool) -> bool {
        let mut inner = self.inner.write().await;
        match inner.files.get_mut(filename) {
            Some(entry) => {
                entry.merging = merging;
                true
            }
            None => false,
        }
    }

    pub async fn is_merging(&self, filename: &str) -> bool {
        self.inner
            .read()
            .await
            .files
            .get(filename)
            .is_some_and(|e| e.merging)
    }

    /// Removes a file, its blocks, and their on-disk images.
    pub async fn delete(&self, filename: &str) -> bool {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.files.remove(filename) else {
            return false;
        };
        for id in &entry.meta.block_ids {
            inner.blocks.remove(id);
            let _ = fs::remove_file(self.block_path(*id)).await;
        }
        let _ = fs::remove_file(self.meta_path(filename)).await;
        true
    }

    /// Wipes everything, memory and disk (used when rejoining the cluster
    /// so stale replicas cannot resurrect).
    pub async fn clear_all(&self) {
        let mut inner = self.inner.write().await;
        inner.files.clear();
        inner.blocks.clear();
        for sub in ["metadata", "blocks"] {
            let dir = self.root.join(sub);
            let _ = fs::remove_dir_all(&dir).await;
            if let Err(e) = fs::create_dir_all(&dir).await {
                pf_error!(self.me; "failed to recreate {:?}: {}", dir, e);
            }
        }
    }

    /// Replica-side install of a complete file shipped from another node.
    /// Overwrites any previous entry under the same name.
    pub async fn store_file(&self, meta: FileMetadata, blocks: Vec<FileBlock>) -> bool {
        if !valid_filename(&meta.filename) {
            pf_warn!(self.me; "rejecting invalid filename '{}'", meta.filename);
            return false;
        }
        let mut inner = self.inner.write().await;
        self.persist_meta(&meta).await;
        for block in blocks {
            self.persist_block(&block).await;
            inner.blocks.insert(block.block_id, block);
        }
        inner.files.insert(
            meta.filename.clone(),
            FileEntry {
                meta,
                merging: false,
            },
        );
        true
    }

    fn meta_path(&self, filename: &str) -> PathBuf {
        self.root.join("metadata").join(format!("{}.meta", filename))
    }

    fn block_path(&self, block_id: u64) -> PathBuf {
        self.root.join("blocks").join(format!("{}.blk", block_id))
    }

    async fn persist_meta(&self, meta: &FileMetadata) {
        if let Err(e) = fs::write(self.meta_path(&meta.filename), meta.to_bytes()).await {
            pf_warn!(self.me; "failed to persist metadata for '{}': {}", meta.filename, e);
        }
    }

    async fn persist_block(&self, block: &FileBlock) {
        if let Err(e) = fs::write(self.block_path(block.block_id), block.to_bytes()).await {
            pf_warn!(self.me; "failed to persist block {}: {}", block.block_id, e);
        }
    }
}

/// Filenames become path components under the storage root, so path
/// separators and traversal are rejected outright.
fn valid_filename(filename: &str) -> bool {
    !filename.is_empty()
        && filename.len() <= 255
        && !filename.contains('/')
        && !filename.contains('\\')
        && filename != "."
        && filename != ".."
}
