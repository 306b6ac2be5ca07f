//! Logstore — a collection of top-level [`Log`]s, and [`Journal`], its
//! encrypted-at-rest owner-scoped specialization (§3, §4.3).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use ed25519_dalek::SigningKey;
use tracing::debug;

use crate::crypto;
use crate::error::OplogError;
use crate::log::Log;
use crate::op::Model;

// ---------------------------------------------------------------------------
// BlobStore
// ---------------------------------------------------------------------------

/// The opaque content-addressed blob store the journal stores dataset
/// payloads in. The core never inspects blob content; it only needs a place
/// to put bytes and get a path back.
///
/// Mirrors the teacher's treatment of a workspace backend as an injected
/// capability rather than an owned resource.
pub trait BlobStore {
    /// Store `bytes`, returning a content path the caller can later pass to
    /// [`Self::get`].
    ///
    /// # Errors
    /// Implementation-defined; typically I/O.
    fn put(&mut self, bytes: &[u8]) -> Result<String, OplogError>;

    /// Retrieve previously-stored bytes by path.
    ///
    /// # Errors
    /// [`OplogError::NotFound`] if no blob exists at `path`.
    fn get(&self, path: &str) -> Result<Vec<u8>, OplogError>;
}

/// An in-memory [`BlobStore`] for tests and small deployments.
#[derive(Debug, Default)]
pub struct MemBlobStore {
    blobs: HashMap<String, Vec<u8>>,
}

impl BlobStore for MemBlobStore {
    fn put(&mut self, bytes: &[u8]) -> Result<String, OplogError> {
        let path = format!("/mem/{}", crypto::hash(bytes));
        self.blobs.insert(path.clone(), bytes.to_vec());
        Ok(path)
    }

    fn get(&self, path: &str) -> Result<Vec<u8>, OplogError> {
        self.blobs.get(path).cloned().ok_or_else(|| OplogError::NotFound {
            what: "blob".to_owned(),
            id: path.to_owned(),
        })
    }
}

// ---------------------------------------------------------------------------
// Logstore
// ---------------------------------------------------------------------------

/// A collection of top-level [`Log`]s (every top-level log has
/// `model() == Model::User`).
#[derive(Debug, Default, Clone)]
pub struct Logstore {
    top_level: Vec<Log>,
}

impl Logstore {
    /// An empty logstore.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Top-level logs, paginated. `limit == -1` returns all remaining.
    #[must_use]
    pub fn logs(&self, offset: usize, limit: i64) -> &[Log] {
        if offset >= self.top_level.len() {
            return &[];
        }
        let remaining = &self.top_level[offset..];
        if limit < 0 {
            remaining
        } else {
            let take = usize::try_from(limit).unwrap_or(0).min(remaining.len());
            &remaining[..take]
        }
    }

    /// Recursive DFS for a log with the given id, anywhere in the tree.
    ///
    /// # Errors
    /// Propagates `Log::id` failures.
    pub fn get(&self, id: &str) -> std::io::Result<Option<&Log>> {
        for log in &self.top_level {
            if let Some(found) = log.log_by_id(id)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Find the top-level log of `model` whose first op's `author_id` matches.
    #[must_use]
    pub fn get_author(&self, model: Model, author_id: &str) -> Option<&Log> {
        self.top_level
            .iter()
            .find(|l| l.model() == model && l.ops()[0].author_id == author_id)
    }

    /// Descend from the top level by name, one segment per level.
    ///
    /// # Errors
    /// [`OplogError::NotFound`] if any segment doesn't match or is removed.
    pub fn head_ref(&self, names: &[&str]) -> Result<&Log, OplogError> {
        let (first, rest) = names.split_first().ok_or_else(|| OplogError::NotFound {
            what: "log path".to_owned(),
            id: String::new(),
        })?;
        let top = self
            .top_level
            .iter()
            .find(|l| l.name() == *first)
            .ok_or_else(|| OplogError::NotFound {
                what: "log".to_owned(),
                id: (*first).to_owned(),
            })?;
        if top.is_removed() {
            return Err(OplogError::NotFound {
                what: "log".to_owned(),
                id: (*first).to_owned(),
            });
        }
        top.head_ref(rest)
    }

    /// Merge `incoming` into the store (§4.3). Rejects an incoming log with
    /// an empty id. Three cases, in order: an exact id match merges in
    /// place; otherwise a top-level log from the same author merges (handles
    /// a peer re-initializing its journal under a new top-level id); failing
    /// both, `incoming` is appended as a new top-level log.
    ///
    /// # Errors
    /// [`OplogError::InvalidName`] if `incoming`'s id is empty; otherwise
    /// propagates `Log::id`/`Log::merge` I/O failures wrapped as
    /// [`OplogError::Io`].
    pub fn merge_log(&mut self, incoming: Log) -> Result<(), OplogError> {
        let incoming_id = incoming.id()?;
        if incoming_id.is_empty() {
            return Err(OplogError::InvalidName {
                name: String::new(),
                reason: "log has an empty id".to_owned(),
            });
        }
        for existing in &mut self.top_level {
            if existing.id()? == incoming_id {
                debug!(target: "oplog::logstore", log_id = %incoming_id, "merge_log: matched by id");
                existing.merge(&incoming)?;
                return Ok(());
            }
        }
        let incoming_author = incoming.ops()[0].author_id.clone();
        for existing in &mut self.top_level {
            if existing.model() == Model::User && existing.ops()[0].author_id == incoming_author {
                debug!(target: "oplog::logstore", author = %incoming_author, "merge_log: matched by author, re-initialized journal");
                existing.merge(&incoming)?;
                return Ok(());
            }
        }
        debug!(target: "oplog::logstore", log_id = %incoming_id, "merge_log: appended as new top-level log");
        self.top_level.push(incoming);
        Ok(())
    }

    /// Remove the log reached by `names` from the store. For a single
    /// segment this drops a top-level log; for multiple segments it descends
    /// to the parent and retain-filters the matching child by id, leaving
    /// every ancestor on the path otherwise untouched.
    ///
    /// # Errors
    /// [`OplogError::NotFound`] if the path doesn't resolve.
    pub fn remove_log(&mut self, names: &[&str]) -> Result<(), OplogError> {
        self.head_ref(names)?; // validate it exists and isn't already removed
        let (last, parent_names) = names.split_last().ok_or_else(|| OplogError::NotFound {
            what: "log path".to_owned(),
            id: String::new(),
        })?;

        let Some((parent_first, parent_rest)) = parent_names.split_first() else {
            let id_to_remove = self
                .top_level
                .iter()
                .find(|l| l.name() == *last)
                .and_then(|l| l.id().ok())
                .ok_or_else(|| OplogError::NotFound {
                    what: "log".to_owned(),
                    id: (*last).to_owned(),
                })?;
            self.top_level.retain(|l| l.id().ok().as_deref() != Some(id_to_remove.as_str()));
            return Ok(());
        };

        let parent = self
            .top_level
            .iter_mut()
            .find(|l| l.name() == *parent_first)
            .ok_or_else(|| OplogError::NotFound {
                what: "log".to_owned(),
                id: (*parent_first).to_owned(),
            })?;
        let parent = descend_mut(parent, parent_rest)?;
        let id_to_remove = parent
            .children()
            .iter()
            .find(|c| c.name() == *last)
            .and_then(|c| c.id().ok())
            .ok_or_else(|| OplogError::NotFound {
                what: "log".to_owned(),
                id: (*last).to_owned(),
            })?;
        parent
            .children_mut()
            .retain(|c| c.id().ok().as_deref() != Some(id_to_remove.as_str()));
        Ok(())
    }

    /// Replace the entire store with a single top-level log (bulk load).
    pub fn replace_all(&mut self, log: Log) {
        self.top_level = vec![log];
    }

    /// Append a log directly as a new top-level entry, bypassing merge
    /// routing. Used by [`Journal`] bootstrap (`WriteDatasetInit`'s owner
    /// user-log creation).
    pub fn push_top_level(&mut self, log: Log) {
        self.top_level.push(log);
    }

    /// All top-level logs.
    #[must_use]
    pub fn top_level(&self) -> &[Log] {
        &self.top_level
    }

    /// Mutable access to a top-level log by id, for in-place append paths.
    ///
    /// # Errors
    /// Propagates `Log::id` failures.
    pub fn top_level_mut(&mut self, id: &str) -> std::io::Result<Option<&mut Log>> {
        for log in &mut self.top_level {
            if log.id()? == id {
                return Ok(Some(log));
            }
        }
        Ok(None)
    }

    /// Mutable access to a top-level log of `model` authored by `author_id`.
    pub fn top_level_mut_by_author(&mut self, model: Model, author_id: &str) -> Option<&mut Log> {
        self.top_level
            .iter_mut()
            .find(|l| l.model() == model && l.ops()[0].author_id == author_id)
    }

    /// Mutable access to any log in the tree by id (dataset- or
    /// branch-level), via recursive search.
    ///
    /// # Errors
    /// Propagates `Log::id` failures.
    pub fn get_mut(&mut self, id: &str) -> std::io::Result<Option<&mut Log>> {
        for log in &mut self.top_level {
            if let Some(found) = find_mut(log, id)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Populate `log`'s children with the descendant subtree stored under
    /// the same id (§4.3). Used to fill a sparse log — one fetched or
    /// received with its own ops but no children — back in from whatever
    /// local tree is actually on hand.
    ///
    /// # Errors
    /// [`OplogError::NotFound`] if no log with `log`'s id exists in the
    /// store.
    pub fn descendants(&self, log: &mut Log) -> Result<(), OplogError> {
        let id = log.id()?;
        let found = self.get(&id)?.ok_or_else(|| OplogError::NotFound {
            what: "log".to_owned(),
            id: id.clone(),
        })?;
        *log.children_mut() = found.children().to_vec();
        Ok(())
    }

    /// Build the sparse-ancestors + all-descendants replication shape for
    /// the dataset log with id `init_id` (§4.3): the owning user log,
    /// pruned of every child but the one on the path to `init_id`, whose
    /// dataset child is in turn populated with its full descendant subtree
    /// via [`Self::descendants`]. This is the standard push/pull wire shape.
    ///
    /// # Errors
    /// [`OplogError::NotFound`] if no dataset log with id `init_id` exists
    /// under any top-level user log.
    pub fn sparse_log(&self, init_id: &str) -> Result<Log, OplogError> {
        for user in &self.top_level {
            if user.model() != Model::User {
                continue;
            }
            let Some(dataset) = user
                .children()
                .iter()
                .find(|c| c.id().ok().as_deref() == Some(init_id))
            else {
                continue;
            };

            let mut sparse_dataset = Log::new(dataset.ops()[0].clone());
            for op in &dataset.ops()[1..] {
                sparse_dataset.append(op.clone());
            }
            self.descendants(&mut sparse_dataset)?;

            let mut sparse_user = Log::new(user.ops()[0].clone());
            for op in &user.ops()[1..] {
                sparse_user.append(op.clone());
            }
            sparse_user.add_child(sparse_dataset)?;
            return Ok(sparse_user);
        }
        Err(OplogError::NotFound {
            what: "dataset".to_owned(),
            id: init_id.to_owned(),
        })
    }
}

fn descend_mut<'a>(log: &'a mut Log, names: &[&str]) -> Result<&'a mut Log, OplogError> {
    let mut current = log;
    for name in names {
        let idx = current
            .children()
            .iter()
            .position(|c| c.name() == *name)
            .ok_or_else(|| OplogError::NotFound {
                what: "log".to_owned(),
                id: (*name).to_owned(),
            })?;
        current = &mut current.children_mut()[idx];
    }
    Ok(current)
}

fn find_mut<'a>(log: &'a mut Log, id: &str) -> std::io::Result<Option<&'a mut Log>> {
    if log.id()? == id {
        return Ok(Some(log));
    }
    for child in log.children_mut() {
        if let Some(found) = find_mut(child, id)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

/// An owner-scoped, encrypted-at-rest [`Logstore`].
///
/// Persistence uses AES-256-GCM keyed by the hex-encoded MD5 of the owner's
/// raw private-key bytes (§4.3, §6).
pub struct Journal {
    store: Logstore,
    private_key_bytes: [u8; 32],
    path: PathBuf,
}

impl Journal {
    /// Open (or initialize, if `path` doesn't exist) a journal at `path`,
    /// owned by `signing_key`.
    ///
    /// # Errors
    /// [`OplogError::Io`] on filesystem failure;
    /// [`OplogError::CorruptJournal`]/[`OplogError::CryptoError`] if the file
    /// exists but cannot be decrypted or decoded.
    pub fn open(path: impl Into<PathBuf>, signing_key: &SigningKey) -> Result<Self, OplogError> {
        let path = path.into();
        let private_key_bytes = signing_key.to_bytes();
        let store = if path.exists() {
            let sealed = fs::read(&path)?;
            let plaintext = crypto::open(&private_key_bytes, &sealed)?;
            Self::decode_store(&plaintext)?
        } else {
            Logstore::new()
        };
        Ok(Self {
            store,
            private_key_bytes,
            path,
        })
    }

    /// Borrow the underlying store.
    #[must_use]
    pub const fn store(&self) -> &Logstore {
        &self.store
    }

    /// Mutably borrow the underlying store.
    pub fn store_mut(&mut self) -> &mut Logstore {
        &mut self.store
    }

    /// Encrypt and write the current store to `path` (§6 on-disk format:
    /// `nonce(12) || AES-256-GCM(book bytes)`).
    ///
    /// # Errors
    /// [`OplogError::CryptoError`] if sealing fails; [`OplogError::Io`] on
    /// filesystem failure.
    pub fn persist(&self) -> Result<(), OplogError> {
        let encoded = Self::encode_store(&self.store)?;
        let sealed = crypto::seal(&self.private_key_bytes, &encoded)?;
        fs::write(&self.path, sealed)?;
        debug!(target: "oplog::logstore", path = %self.path.display(), "journal persisted");
        Ok(())
    }

    fn encode_store(store: &Logstore) -> Result<Vec<u8>, OplogError> {
        let mut buf = Vec::new();
        let count = u32::try_from(store.top_level().len())
            .map_err(|_| OplogError::CryptoError { detail: "too many top-level logs".to_owned() })?;
        crate::wire::write_u32(&mut buf, count).map_err(OplogError::from)?;
        for log in store.top_level() {
            let log_bytes = log.to_bytes().map_err(OplogError::from)?;
            crate::wire::write_bytes(&mut buf, &log_bytes).map_err(OplogError::from)?;
        }
        Ok(buf)
    }

    fn decode_store(bytes: &[u8]) -> Result<Logstore, OplogError> {
        let mut cur = std::io::Cursor::new(bytes);
        let count = crate::wire::read_u32(&mut cur).map_err(|e| OplogError::CorruptJournal {
            detail: e.to_string(),
        })?;
        let mut store = Logstore::new();
        for _ in 0..count {
            let log_bytes = crate::wire::read_bytes(&mut cur).map_err(|e| OplogError::CorruptJournal {
                detail: e.to_string(),
            })?;
            let log = Log::from_bytes(&log_bytes).map_err(|e| OplogError::CorruptJournal {
                detail: e.to_string(),
            })?;
            store.push_top_level(log);
        }
        Ok(store)
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("path", &self.path)
            .field("top_level_count", &self.store.top_level().len())
            .finish_non_exhaustive()
    }
}

/// True if `path` names an existing file on disk. Small helper kept here
/// rather than inlined at call sites that need to distinguish "fresh
/// journal" from "corrupt journal" without a full open.
#[must_use]
pub fn journal_exists(path: &Path) -> bool {
    path.exists()
}
