//! Human-friendly reference parsing and resolution (§4.5, §6).
//!
//! Grammar: `ref := humanFriendly [ concreteRef ] | concreteRef`,
//! `humanFriendly := name "/" name`, `concreteRef := "@" [ b58Id ] "/" network "/" b58Id`,
//! `network ∈ {"ipfs", "mem"}`, `name := [a-zA-Z][\w-]*`, max dataset-name
//! length 144.

use crate::error::OplogError;
use crate::log::Log;
use crate::logstore::Logstore;
use crate::op::{Model, OpType};

/// Maximum length of either the username or dataset-name segment (§6).
pub const MAX_NAME_LEN: usize = 144;

/// An external-facing reference to a dataset (§3).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ref {
    /// The owning user's human-friendly handle.
    pub username: String,
    /// The owning user's externally-visible profile identifier.
    pub profile_id: String,
    /// The dataset's human-friendly name.
    pub name: String,
    /// Content-addressed path to a dataset snapshot.
    pub path: String,
    /// Stable identifier of the dataset's log (hash of its init op).
    pub init_id: String,
}

/// Parse a reference string per the grammar in §6, returning the parsed
/// value together with an optional recoverable case warning.
///
/// The grammar's `name` production (`[a-zA-Z][\w-]*`) permits upper-case
/// letters, but dataset names must be all lower-case at write time (§6), so
/// an upper-case dataset-name segment still parses successfully — it is not
/// a [`OplogError::ParseError`] — and is additionally reported as a
/// [`OplogError::BadCaseShouldRename`] alongside the parsed [`Ref`], for the
/// caller to act on or ignore.
///
/// # Errors
/// [`OplogError::ParseError`] describing the first unexpected character or
/// structural problem, with its byte position.
pub fn parse(s: &str) -> Result<(Ref, Option<OplogError>), OplogError> {
    let bytes = s.as_bytes();
    let at_pos = s.find('@');
    let human_part = at_pos.map_or(s, |i| &s[..i]);

    let mut r = Ref::default();

    if !human_part.is_empty() {
        let mut parts = human_part.splitn(2, '/');
        let username = parts.next().unwrap_or("");
        let name = parts.next();
        validate_name_segment(username, 0)?;
        username.clone_into(&mut r.username);
        if let Some(name) = name {
            let name_start = username.len() + 1;
            validate_name_segment(name, name_start)?;
            name.clone_into(&mut r.name);
        }
    }

    if let Some(at_idx) = at_pos {
        let concrete = &s[at_idx + 1..];
        let full: Vec<&str> = concrete.splitn(3, '/').collect();
        if full.len() != 3 || (full[1] != "ipfs" && full[1] != "mem") {
            return Err(OplogError::ParseError {
                detail: format!(
                    "unexpected character at position {at_idx}: network must be \"ipfs\" or \"mem\""
                ),
            });
        }
        full[0].clone_into(&mut r.profile_id);
        r.path = format!("/{}/{}", full[1], full[2]);
    }

    if r.username.is_empty() && r.profile_id.is_empty() {
        return Err(OplogError::ParseError {
            detail: "empty reference".to_owned(),
        });
    }

    let bad_case = r.name.chars().any(|c| c.is_ascii_uppercase()).then(|| OplogError::BadCaseShouldRename {
        name: r.name.clone(),
        corrected: r.name.to_lowercase(),
    });

    let _ = bytes; // length already validated per-segment above
    Ok((r, bad_case))
}

fn validate_name_segment(s: &str, offset: usize) -> Result<(), OplogError> {
    let mut chars = s.char_indices();
    match chars.next() {
        Some((_, c)) if c.is_ascii_alphabetic() => {}
        Some((i, c)) => {
            return Err(OplogError::ParseError {
                detail: format!("unexpected character at position {}: '{c}'", offset + i),
            });
        }
        None => {
            return Err(OplogError::ParseError {
                detail: "unexpected character: empty name segment".to_owned(),
            });
        }
    }
    for (i, c) in chars {
        if !(c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(OplogError::ParseError {
                detail: format!("unexpected character at position {}: '{c}'", offset + i),
            });
        }
    }
    if s.len() > MAX_NAME_LEN {
        return Err(OplogError::ParseError {
            detail: format!("name segment exceeds {MAX_NAME_LEN} characters"),
        });
    }
    Ok(())
}

/// Fill in missing fields of `r` by walking the logstore (§4.5).
///
/// If `r.init_id` is set, resolves by id; otherwise resolves by
/// `(username, name)`. Idempotent: resolving an already-complete `Ref`
/// returns it unchanged.
///
/// # Errors
/// [`OplogError::RefNotFound`] if no matching log exists.
pub fn resolve_ref(store: &Logstore, r: &Ref) -> Result<Ref, OplogError> {
    let mut out = r.clone();

    if !r.init_id.is_empty() {
        let dataset = store
            .get(&r.init_id)
            .ok()
            .flatten()
            .ok_or_else(|| OplogError::RefNotFound {
                reference: r.init_id.clone(),
            })?;
        dataset.name().clone_into(&mut out.name);
        let branch = dataset
            .children()
            .iter()
            .find(|c| c.model() == Model::Branch)
            .ok_or_else(|| OplogError::RefNotFound {
                reference: r.init_id.clone(),
            })?;
        out.path = latest_save_path(branch);
        let (username, profile_id) = find_owner(store, &r.init_id)?;
        out.username = username;
        out.profile_id = profile_id;
        return Ok(out);
    }

    let user_log = store
        .top_level()
        .iter()
        .find(|l| l.model() == Model::User && l.name() == r.username)
        .ok_or_else(|| OplogError::RefNotFound {
            reference: format!("{}/{}", r.username, r.name),
        })?;

    let dataset = user_log
        .children()
        .iter()
        .find(|c| c.model() == Model::Dataset && c.name() == r.name && !c.is_removed())
        .ok_or_else(|| OplogError::RefNotFound {
            reference: format!("{}/{}", r.username, r.name),
        })?;

    out.init_id = dataset.id().map_err(OplogError::from)?;
    if out.path.is_empty()
        && let Some(branch) = dataset.children().iter().find(|c| c.model() == Model::Branch) {
            out.path = latest_save_path(branch);
        }
    if out.profile_id.is_empty() {
        out.profile_id.clone_from(&user_log.ops()[0].author_id);
    }
    Ok(out)
}

fn find_owner(store: &Logstore, init_id: &str) -> Result<(String, String), OplogError> {
    for user_log in store.top_level() {
        if user_log.model() != Model::User {
            continue;
        }
        for dataset in user_log.children() {
            if dataset.id().ok().as_deref() == Some(init_id) {
                return Ok((user_log.name().to_owned(), user_log.ops()[0].author_id.clone()));
            }
        }
    }
    Err(OplogError::RefNotFound {
        reference: init_id.to_owned(),
    })
}

/// Walk a branch's ops in reverse to find the content path of the latest
/// live (non-removed) commit (§4.5).
#[must_use]
pub fn latest_save_path(branch: &Log) -> String {
    let mut removes = 0i64;
    for op in branch.ops().iter().rev() {
        match (op.op_type, op.model) {
            (OpType::Remove, Model::Commit) => removes += op.size.max(0),
            (OpType::Init | OpType::Amend, Model::Commit) => {
                if removes > 0 {
                    removes -= 1;
                } else {
                    return op.op_ref.clone();
                }
            }
            _ => {}
        }
    }
    String::new()
}
