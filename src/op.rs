//! Operation — the atomic, content-addressed record of a single change (§3, §4.1).
//!
//! Each [`Op`] hashes to a stable identity: lowercase base32 of the BLAKE2b-256
//! of its canonical binary encoding (§6). The encoding is a from-scratch
//! length-prefixed writer ([`crate::wire`]) rather than a generated `FlatBuffers`
//! reader, matching the spec's "any byte-identical encoder" allowance.

use std::io::{self, Cursor};

use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::wire;

// ---------------------------------------------------------------------------
// OpType
// ---------------------------------------------------------------------------

/// The kind of mutation an [`Op`] records (§6: wire values `Init=0x01`,
/// `Amend=0x02`, `Remove=0x03`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpType {
    /// First op establishing a new log.
    Init,
    /// Modifies the most recent same-model op's fields (e.g. rename).
    Amend,
    /// Logically deletes; the log remains reachable by id but not by name.
    Remove,
}

impl OpType {
    const fn wire_byte(self) -> u8 {
        match self {
            Self::Init => 0x01,
            Self::Amend => 0x02,
            Self::Remove => 0x03,
        }
    }

    fn from_wire_byte(b: u8) -> io::Result<Self> {
        match b {
            0x01 => Ok(Self::Init),
            0x02 => Ok(Self::Amend),
            0x03 => Ok(Self::Remove),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown op type byte {other:#04x}"),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// The entity kind an [`Op`] targets (§6 wire numbering, fixed and must not
/// be renumbered).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Model {
    /// A peer's top-level identity log.
    User,
    /// A dataset, owned by exactly one user log.
    Dataset,
    /// A named line of commits under a dataset; exactly one, named `"main"`.
    Branch,
    /// A snapshot of dataset content at a point in the branch's history.
    Commit,
    /// Marks visibility of a contiguous range of commits at a remote address.
    Push,
    /// A standalone transform/run record, optionally preceding a commit.
    Run,
    /// An access-control record (reserved; no write-path method emits it yet).
    Acl,
}

impl Model {
    const fn wire_value(self) -> u32 {
        match self {
            Self::User => 0,
            Self::Dataset => 1,
            Self::Branch => 2,
            Self::Commit => 3,
            Self::Push => 4,
            Self::Run => 5,
            Self::Acl => 6,
        }
    }

    fn from_wire_value(v: u32) -> io::Result<Self> {
        match v {
            0 => Ok(Self::User),
            1 => Ok(Self::Dataset),
            2 => Ok(Self::Branch),
            3 => Ok(Self::Commit),
            4 => Ok(Self::Push),
            5 => Ok(Self::Run),
            6 => Ok(Self::Acl),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown model tag {other}"),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Op
// ---------------------------------------------------------------------------

/// An immutable atomic record of a single action (§3).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Op {
    /// The kind of mutation.
    pub op_type: OpType,
    /// The entity kind targeted.
    pub model: Model,
    /// Primary payload identifier (content path, run id); empty if unused.
    pub op_ref: String,
    /// Previous content path in the causal chain; empty if unused.
    pub prev: String,
    /// Type-dependent ordered annotations (push targets, `"runID:<id>"`).
    pub relations: Vec<String>,
    /// Human-readable name; used by `Init`/`Amend` on namable models.
    pub name: String,
    /// Identifier of the author writing this operation.
    pub author_id: String,
    /// Nanoseconds since the Unix epoch. Annotation only, never used for
    /// ordering.
    pub timestamp: i64,
    /// Count or byte-size, model-dependent.
    pub size: i64,
    /// Free-form annotation (e.g. commit title).
    pub note: String,
}

impl Op {
    /// Encode this op to its canonical binary form (§6 field order).
    ///
    /// # Errors
    /// Returns an error only if a field exceeds the wire format's length
    /// limits (`u32::MAX` bytes/elements).
    pub fn to_canonical_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        wire::write_u8(&mut buf, self.op_type.wire_byte())?;
        wire::write_u32(&mut buf, self.model.wire_value())?;
        wire::write_str(&mut buf, &self.op_ref)?;
        wire::write_str(&mut buf, &self.prev)?;
        wire::write_str_list(&mut buf, &self.relations)?;
        wire::write_str(&mut buf, &self.name)?;
        wire::write_str(&mut buf, &self.author_id)?;
        wire::write_i64(&mut buf, self.timestamp)?;
        wire::write_i64(&mut buf, self.size)?;
        wire::write_str(&mut buf, &self.note)?;
        Ok(buf)
    }

    /// Decode an op from its canonical binary form.
    ///
    /// # Errors
    /// Returns an error if the bytes are truncated or contain an unknown
    /// `op_type`/`model` tag.
    pub fn from_canonical_bytes(bytes: &[u8]) -> io::Result<Self> {
        let mut cur = Cursor::new(bytes);
        let op_type = OpType::from_wire_byte(wire::read_u8(&mut cur)?)?;
        let model = Model::from_wire_value(wire::read_u32(&mut cur)?)?;
        let op_ref = wire::read_str(&mut cur)?;
        let prev = wire::read_str(&mut cur)?;
        let relations = wire::read_str_list(&mut cur)?;
        let name = wire::read_str(&mut cur)?;
        let author_id = wire::read_str(&mut cur)?;
        let timestamp = wire::read_i64(&mut cur)?;
        let size = wire::read_i64(&mut cur)?;
        let note = wire::read_str(&mut cur)?;
        Ok(Self {
            op_type,
            model,
            op_ref,
            prev,
            relations,
            name,
            author_id,
            timestamp,
            size,
            note,
        })
    }

    /// The op's stable content hash: lowercase base32 of BLAKE2b-256 of the
    /// canonical binary encoding.
    ///
    /// # Errors
    /// Propagates [`Self::to_canonical_bytes`] failures.
    pub fn hash(&self) -> io::Result<String> {
        Ok(crypto::hash(&self.to_canonical_bytes()?))
    }

    /// Construct an `Init` op establishing a new log.
    #[must_use]
    pub fn init(model: Model, name: impl Into<String>, author_id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            op_type: OpType::Init,
            model,
            op_ref: String::new(),
            prev: String::new(),
            relations: Vec::new(),
            name: name.into(),
            author_id: author_id.into(),
            timestamp,
            size: 0,
            note: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_op() -> Op {
        Op {
            op_type: OpType::Init,
            model: Model::Dataset,
            op_ref: "QmV1".to_owned(),
            prev: String::new(),
            relations: vec!["runID:abc".to_owned()],
            name: "world_bank_population".to_owned(),
            author_id: "author1".to_owned(),
            timestamp: 946_684_800_000_000_000,
            size: 42,
            note: "initial commit".to_owned(),
        }
    }

    #[test]
    fn canonical_round_trip() {
        let op = sample_op();
        let bytes = op.to_canonical_bytes().unwrap();
        let parsed = Op::from_canonical_bytes(&bytes).unwrap();
        assert_eq!(op, parsed);
    }

    #[test]
    fn hash_is_deterministic() {
        let op = sample_op();
        assert_eq!(op.hash().unwrap(), op.hash().unwrap());
    }

    #[test]
    fn hash_differs_when_any_field_changes() {
        let a = sample_op();
        let mut b = sample_op();
        b.note = "different title".to_owned();
        assert_ne!(a.hash().unwrap(), b.hash().unwrap());
    }

    #[test]
    fn hash_is_lowercase_base32_no_padding() {
        let h = sample_op().hash().unwrap();
        assert!(h.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert!(!h.contains('='));
    }

    #[test]
    fn empty_relations_round_trip() {
        let mut op = sample_op();
        op.relations = vec![];
        let bytes = op.to_canonical_bytes().unwrap();
        let parsed = Op::from_canonical_bytes(&bytes).unwrap();
        assert_eq!(op, parsed);
    }

    #[test]
    fn model_and_type_wire_numbering_is_fixed() {
        assert_eq!(Model::User.wire_value(), 0);
        assert_eq!(Model::Dataset.wire_value(), 1);
        assert_eq!(Model::Branch.wire_value(), 2);
        assert_eq!(Model::Commit.wire_value(), 3);
        assert_eq!(Model::Push.wire_value(), 4);
        assert_eq!(Model::Run.wire_value(), 5);
        assert_eq!(Model::Acl.wire_value(), 6);
        assert_eq!(OpType::Init.wire_byte(), 0x01);
        assert_eq!(OpType::Amend.wire_byte(), 0x02);
        assert_eq!(OpType::Remove.wire_byte(), 0x03);
    }

    #[test]
    fn decoding_unknown_model_tag_errors() {
        let mut bytes = sample_op().to_canonical_bytes().unwrap();
        bytes[1] = 99; // model tag byte (after the 1-byte op_type)
        assert!(Op::from_canonical_bytes(&bytes).is_err());
    }

    #[test]
    fn decoding_truncated_bytes_errors() {
        let bytes = sample_op().to_canonical_bytes().unwrap();
        assert!(Op::from_canonical_bytes(&bytes[..4]).is_err());
    }
}
