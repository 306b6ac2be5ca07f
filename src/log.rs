//! Log — an ordered, signed sequence of [`Op`]s with optional children (§3, §4.2).
//!
//! A `Log`'s identity is fixed at creation (the hash of its init op) and never
//! changes. [`Log::merge`] is the CRDT core: longest-ops-wins at each level,
//! recursive per matching child.

use std::io::{self, Cursor};

use ed25519_dalek::{SigningKey, VerifyingKey};
use tracing::debug;

use crate::crypto;
use crate::error::OplogError;
use crate::op::{Model, Op, OpType};
use crate::wire;

/// An ordered, signed sequence of [`Op`]s, possibly with named children (§3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Log {
    ops: Vec<Op>,
    children: Vec<Log>,
    signature: Vec<u8>,
    /// Id of the enclosing log, if any. Non-owning: set by [`Log::add_child`]
    /// or re-derived top-down on deserialization, never by the child itself.
    parent_id: Option<String>,
}

impl Log {
    /// Start a new log from its init op.
    ///
    /// # Panics
    /// Panics (debug builds) if `init_op.op_type` is not [`OpType::Init`];
    /// production builds proceed but `id()`/`model()` will reflect whatever
    /// op was passed, which violates the §3 invariant that `ops[0]` is the
    /// init op.
    #[must_use]
    pub fn new(init_op: Op) -> Self {
        debug_assert!(matches!(init_op.op_type, OpType::Init));
        Self {
            ops: vec![init_op],
            children: Vec::new(),
            signature: Vec::new(),
            parent_id: None,
        }
    }

    /// The log's stable identity: the hash of its init op.
    ///
    /// # Errors
    /// Propagates [`Op::hash`] failures.
    pub fn id(&self) -> io::Result<String> {
        self.ops[0].hash()
    }

    /// The entity kind this log represents, from its init op.
    #[must_use]
    pub fn model(&self) -> Model {
        self.ops[0].model
    }

    /// Id of the enclosing log, if any.
    #[must_use]
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    /// The most recent `Init`/`Amend` op of this log's own model carrying a
    /// non-empty name; empty string if none.
    #[must_use]
    pub fn name(&self) -> &str {
        self.ops
            .iter()
            .rev()
            .find(|op| {
                op.model == self.model()
                    && matches!(op.op_type, OpType::Init | OpType::Amend)
                    && !op.name.is_empty()
            })
            .map_or("", |op| op.name.as_str())
    }

    /// The first op whose `author_id` is non-empty.
    #[must_use]
    pub fn author_id(&self) -> &str {
        self.ops
            .iter()
            .find(|op| !op.author_id.is_empty())
            .map_or("", |op| op.author_id.as_str())
    }

    /// The log's ops, in append order.
    #[must_use]
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// The log's children, in append order.
    #[must_use]
    pub fn children(&self) -> &[Log] {
        &self.children
    }

    /// Mutable access to children, needed by [`crate::logstore`] to populate
    /// a sparsely-fetched log with its descendants.
    pub fn children_mut(&mut self) -> &mut Vec<Log> {
        &mut self.children
    }

    /// The most recently appended op.
    ///
    /// # Panics
    /// Never, in practice: a `Log` always has at least its init op.
    #[must_use]
    pub fn head(&self) -> &Op {
        self.ops.last().expect("a Log always has at least its init op")
    }

    /// True if any op sharing this log's own model is a `Remove`.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.ops
            .iter()
            .any(|op| op.model == self.model() && matches!(op.op_type, OpType::Remove))
    }

    /// Append an op to this log.
    pub fn append(&mut self, op: Op) {
        self.ops.push(op);
    }

    /// Add `child` under this log, setting its `parent_id`. If a child with
    /// the same id already exists, the longer-`ops` side wins (the merge
    /// dedup path); a freshly-added child otherwise is inserted as-is.
    ///
    /// # Errors
    /// Propagates `id()` failures from either log.
    pub fn add_child(&mut self, mut child: Log) -> io::Result<()> {
        let self_id = self.id()?;
        child.parent_id = Some(self_id);
        let child_id = child.id()?;
        if let Some(existing) = self.find_child_mut(&child_id)? {
            if child.ops.len() > existing.ops.len() {
                *existing = child;
            }
            return Ok(());
        }
        self.children.push(child);
        Ok(())
    }

    fn find_child_mut(&mut self, id: &str) -> io::Result<Option<&mut Log>> {
        for child in &mut self.children {
            if child.id()? == id {
                return Ok(Some(child));
            }
        }
        Ok(None)
    }

    /// Recursive depth-first search for a log with the given id (may return
    /// a removed log, unlike [`Self::head_ref`]).
    ///
    /// # Errors
    /// Propagates `id()` failures encountered while searching.
    pub fn log_by_id(&self, id: &str) -> io::Result<Option<&Log>> {
        if self.id()? == id {
            return Ok(Some(self));
        }
        for child in &self.children {
            if let Some(found) = child.log_by_id(id)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Traverse children by name, one path segment per level. Never returns
    /// a log whose own model has been logically removed.
    ///
    /// # Errors
    /// [`OplogError::NotFound`] if any segment doesn't match or the matched
    /// log is removed.
    pub fn head_ref(&self, names: &[&str]) -> Result<&Log, OplogError> {
        let mut current = self;
        for name in names {
            let next = current
                .children
                .iter()
                .find(|c| c.name() == *name)
                .ok_or_else(|| OplogError::NotFound {
                    what: "log".to_owned(),
                    id: name.to_string(),
                })?;
            if next.is_removed() {
                return Err(OplogError::NotFound {
                    what: "log".to_owned(),
                    id: name.to_string(),
                });
            }
            current = next;
        }
        Ok(current)
    }

    /// Bytes signed by [`Self::sign`]/[`Self::verify`]: the MD5 digest of the
    /// concatenation of every op's `op_ref`, in order (§4.2 — weak by design,
    /// preserved for wire compatibility).
    #[must_use]
    pub fn signing_bytes(&self) -> [u8; 16] {
        let mut concatenated = String::new();
        for op in &self.ops {
            concatenated.push_str(&op.op_ref);
        }
        crypto::md5_digest(concatenated.as_bytes())
    }

    /// Sign this log's current op sequence, replacing any existing signature.
    pub fn sign(&mut self, key: &SigningKey) {
        self.signature = crypto::sign(key, &self.signing_bytes()).to_vec();
    }

    /// Verify this log's signature against `public_key`.
    ///
    /// # Errors
    /// [`OplogError::InvalidSignature`] if verification fails.
    pub fn verify(&self, public_key: &VerifyingKey) -> Result<(), OplogError> {
        let id = self.id().unwrap_or_default();
        crypto::verify(public_key, &self.signing_bytes(), &self.signature, &id)
    }

    /// Merge `other` into `self` in place (§4.2, the CRDT core).
    ///
    /// `self` and `other` must share the same init op (same log identity);
    /// callers (typically [`crate::logstore::Logstore::merge_log`]) are
    /// responsible for routing by id before calling this.
    ///
    /// # Errors
    /// Propagates `id()` failures encountered while matching children.
    pub fn merge(&mut self, other: &Log) -> io::Result<()> {
        if other.ops.len() > self.ops.len() {
            debug!(
                target: "oplog::log",
                self_len = self.ops.len(),
                other_len = other.ops.len(),
                "merge: adopting longer op sequence"
            );
            self.ops.clone_from(&other.ops);
            self.signature.clone_from(&other.signature);
        }
        for other_child in &other.children {
            let other_child_id = other_child.id()?;
            let existing = self.find_child_mut(&other_child_id)?;
            if let Some(existing) = existing {
                existing.merge(other_child)?;
            } else {
                self.add_child(other_child.clone())?;
            }
        }
        Ok(())
    }

    /// Serialize bottom-up: children, then name, author id, signature, ops
    /// (§4.2). `name`/`author_id` are cached fields written for fast lookup
    /// without replaying ops, but are re-derived (not trusted) on read.
    ///
    /// # Errors
    /// Propagates `id()`/`to_canonical_bytes()` failures.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        wire::write_u32(&mut buf, u32::try_from(self.children.len()).map_err(|_| {
            io::Error::other("too many children for wire format")
        })?)?;
        for child in &self.children {
            let child_bytes = child.to_bytes()?;
            wire::write_bytes(&mut buf, &child_bytes)?;
        }
        wire::write_str(&mut buf, self.name())?;
        wire::write_str(&mut buf, self.author_id())?;
        wire::write_bytes(&mut buf, &self.signature)?;
        wire::write_u32(&mut buf, u32::try_from(self.ops.len()).map_err(|_| {
            io::Error::other("too many ops for wire format")
        })?)?;
        for op in &self.ops {
            let op_bytes = op.to_canonical_bytes()?;
            wire::write_bytes(&mut buf, &op_bytes)?;
        }
        Ok(buf)
    }

    /// Deserialize a log tree; re-derives every child's `parent_id` top-down
    /// as it is built.
    ///
    /// # Errors
    /// Returns an error if the bytes are truncated, malformed, or a log with
    /// zero ops is encountered.
    pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        let mut cur = Cursor::new(bytes);
        let log = Self::read_from(&mut cur)?;
        Ok(log)
    }

    fn read_from(cur: &mut Cursor<&[u8]>) -> io::Result<Self> {
        let child_count = wire::read_u32(cur)?;
        let mut children = Vec::with_capacity(child_count as usize);
        for _ in 0..child_count {
            let child_bytes = wire::read_bytes(cur)?;
            children.push(Self::from_bytes(&child_bytes)?);
        }
        let _name = wire::read_str(cur)?; // cached; re-derived below
        let _author_id = wire::read_str(cur)?;
        let signature = wire::read_bytes(cur)?;
        let op_count = wire::read_u32(cur)?;
        if op_count == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "a Log must have at least one op",
            ));
        }
        let mut ops = Vec::with_capacity(op_count as usize);
        for _ in 0..op_count {
            let op_bytes = wire::read_bytes(cur)?;
            ops.push(Op::from_canonical_bytes(&op_bytes)?);
        }
        let mut log = Self {
            ops,
            children,
            signature,
            parent_id: None,
        };
        let id = log.id()?;
        for child in &mut log.children {
            child.parent_id = Some(id.clone());
        }
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(op_type: OpType, model: Model, name: &str, author: &str, op_ref: &str) -> Op {
        Op {
            op_type,
            model,
            op_ref: op_ref.to_owned(),
            prev: String::new(),
            relations: vec![],
            name: name.to_owned(),
            author_id: author.to_owned(),
            timestamp: 0,
            size: 0,
            note: String::new(),
        }
    }

    #[test]
    fn id_is_stable_hash_of_init_op() {
        let log = Log::new(op(OpType::Init, Model::User, "b5", "PID_B5", ""));
        let id1 = log.id().unwrap();
        let id2 = log.id().unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn name_tracks_latest_init_or_amend() {
        let mut log = Log::new(op(OpType::Init, Model::Dataset, "airport_codes", "a1", ""));
        assert_eq!(log.name(), "airport_codes");
        log.append(op(OpType::Amend, Model::Dataset, "iata_airport_codes", "a1", ""));
        assert_eq!(log.name(), "iata_airport_codes");
    }

    #[test]
    fn is_removed_after_remove_op_of_own_model() {
        let mut log = Log::new(op(OpType::Init, Model::Dataset, "x", "a1", ""));
        assert!(!log.is_removed());
        log.append(op(OpType::Remove, Model::Dataset, "", "a1", ""));
        assert!(log.is_removed());
    }

    #[test]
    fn merge_longest_prefix_wins() {
        let mut a = Log::new(op(OpType::Init, Model::Branch, "main", "a1", ""));
        a.append(op(OpType::Init, Model::Commit, "", "a1", "QmV1"));

        let mut b = Log::new(op(OpType::Init, Model::Branch, "main", "a1", ""));
        b.append(op(OpType::Init, Model::Commit, "", "a1", "QmV1"));
        b.append(op(OpType::Init, Model::Commit, "", "a1", "QmV2"));

        a.merge(&b).unwrap();
        assert_eq!(a.ops().len(), 3);
    }

    #[test]
    fn merge_keeps_longer_side_when_it_is_self() {
        let mut a = Log::new(op(OpType::Init, Model::Branch, "main", "a1", ""));
        a.append(op(OpType::Init, Model::Commit, "", "a1", "QmV1"));
        a.append(op(OpType::Init, Model::Commit, "", "a1", "QmV2"));

        let b = Log::new(op(OpType::Init, Model::Branch, "main", "a1", ""));

        a.merge(&b).unwrap();
        assert_eq!(a.ops().len(), 3, "self is already longer, must not shrink");
    }

    #[test]
    fn merge_is_idempotent() {
        let mut a = Log::new(op(OpType::Init, Model::Branch, "main", "a1", ""));
        a.append(op(OpType::Init, Model::Commit, "", "a1", "QmV1"));
        let b = a.clone();

        a.merge(&b).unwrap();
        let once = a.clone();
        a.merge(&b).unwrap();
        assert_eq!(a, once);
    }

    #[test]
    fn merge_recurses_into_matching_children() {
        let mut a = Log::new(op(OpType::Init, Model::User, "b5", "a1", ""));
        let ds_a = Log::new(op(OpType::Init, Model::Dataset, "ds", "a1", ""));
        a.add_child(ds_a).unwrap();

        let mut b = Log::new(op(OpType::Init, Model::User, "b5", "a1", ""));
        let mut ds_b = Log::new(op(OpType::Init, Model::Dataset, "ds", "a1", ""));
        ds_b.append(op(OpType::Amend, Model::Dataset, "ds_renamed", "a1", ""));
        b.add_child(ds_b).unwrap();

        a.merge(&b).unwrap();
        assert_eq!(a.children()[0].name(), "ds_renamed");
    }

    #[test]
    fn merge_adds_unmatched_children() {
        let mut a = Log::new(op(OpType::Init, Model::User, "b5", "a1", ""));
        let mut b = Log::new(op(OpType::Init, Model::User, "b5", "a1", ""));
        let ds = Log::new(op(OpType::Init, Model::Dataset, "ds", "a1", ""));
        b.add_child(ds).unwrap();

        a.merge(&b).unwrap();
        assert_eq!(a.children().len(), 1);
    }

    #[test]
    fn head_ref_skips_removed_logs() {
        let mut root = Log::new(op(OpType::Init, Model::User, "b5", "a1", ""));
        let mut ds = Log::new(op(OpType::Init, Model::Dataset, "ds", "a1", ""));
        ds.append(op(OpType::Remove, Model::Dataset, "", "a1", ""));
        root.add_child(ds).unwrap();

        assert!(root.head_ref(&["ds"]).is_err());
    }

    #[test]
    fn head_ref_finds_nested_path() {
        let mut root = Log::new(op(OpType::Init, Model::User, "b5", "a1", ""));
        let mut ds = Log::new(op(OpType::Init, Model::Dataset, "ds", "a1", ""));
        let branch = Log::new(op(OpType::Init, Model::Branch, "main", "a1", ""));
        ds.add_child(branch).unwrap();
        root.add_child(ds).unwrap();

        let found = root.head_ref(&["ds", "main"]).unwrap();
        assert_eq!(found.name(), "main");
    }

    #[test]
    fn sign_verify_round_trip() {
        let key = crypto::generate_signing_key();
        let mut log = Log::new(op(OpType::Init, Model::Dataset, "ds", "a1", "QmV1"));
        log.sign(&key);
        assert!(log.verify(&key.verifying_key()).is_ok());
    }

    #[test]
    fn verify_fails_with_wrong_key() {
        let key = crypto::generate_signing_key();
        let other = crypto::generate_signing_key();
        let mut log = Log::new(op(OpType::Init, Model::Dataset, "ds", "a1", "QmV1"));
        log.sign(&key);
        assert!(log.verify(&other.verifying_key()).is_err());
    }

    #[test]
    fn bytes_round_trip_preserves_ops_and_children() {
        let mut root = Log::new(op(OpType::Init, Model::User, "b5", "a1", ""));
        let ds = Log::new(op(OpType::Init, Model::Dataset, "ds", "a1", ""));
        root.add_child(ds).unwrap();
        root.sign(&crypto::generate_signing_key());

        let bytes = root.to_bytes().unwrap();
        let parsed = Log::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.ops(), root.ops());
        assert_eq!(parsed.children().len(), 1);
    }

    #[test]
    fn bytes_round_trip_rederives_parent_id() {
        let mut root = Log::new(op(OpType::Init, Model::User, "b5", "a1", ""));
        let ds = Log::new(op(OpType::Init, Model::Dataset, "ds", "a1", ""));
        root.add_child(ds).unwrap();

        let bytes = root.to_bytes().unwrap();
        let parsed = Log::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.children()[0].parent_id(), Some(parsed.id().unwrap().as_str()));
    }
}
