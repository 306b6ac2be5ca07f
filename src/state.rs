//! Branch-level state machine: folds a branch's op sequence into an ordered
//! [`VersionInfo`] list (§4.4, the state-machine portion of the Book layer).

use crate::log::Log;
use crate::op::{Model, OpType};

/// Denormalized projection of one commit's state, for listing (§3).
#[derive(Clone, Debug, PartialEq)]
pub struct VersionInfo {
    /// Content path of this version.
    pub path: String,
    /// Previous content path in the causal chain.
    pub prev: String,
    /// Commit timestamp, nanoseconds since epoch.
    pub commit_time: i64,
    /// Commit title/annotation.
    pub commit_title: String,
    /// Body size as recorded on the commit op.
    pub body_size: i64,
    /// Whether this version has been marked published by a `Push` op.
    pub published: bool,
    /// The linked run id, if this version was produced by a transform run.
    pub run_id: Option<String>,
}

/// How [`project`] should treat `Commit/Remove` ops: collapsing every
/// recorded delete (default listing) or counting only a *trailing* run of
/// deletes (used when computing "the live head after recent deletes" for
/// event emission) (§4.4).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteCollapseMode {
    /// Every `Remove` op truncates from the end immediately.
    All,
    /// Only a trailing, uninterrupted run of `Remove`s is honored; an
    /// intervening `Amend` resets the count.
    TailOnly,
}

/// Fold `branch`'s ops into an ordered, newest-first list of [`VersionInfo`],
/// applying `offset`/`limit` after the fold (§4.4).
///
/// # Panics
/// Never panics on well-formed input; `branch` is assumed to be a `Branch`
/// model log (the caller, [`crate::book::Book`], is responsible for that).
#[must_use]
pub fn project(branch: &Log, mode: DeleteCollapseMode, offset: usize, limit: i64) -> Vec<VersionInfo> {
    let mut history: Vec<VersionInfo> = Vec::new();
    let mut delete_at_end = 0usize;

    for op in branch.ops() {
        match (op.op_type, op.model) {
            (OpType::Init, Model::Run) => {
                history.push(VersionInfo {
                    path: String::new(),
                    prev: String::new(),
                    commit_time: op.timestamp,
                    commit_title: op.note.clone(),
                    body_size: 0,
                    published: false,
                    run_id: Some(op.op_ref.clone()),
                });
            }
            (OpType::Init, Model::Commit) => {
                let run_id = run_id_from_relations(op);
                if let (Some(run), Some(last)) = (&run_id, history.last_mut())
                    && last.run_id.as_deref() == Some(run.as_str()) {
                        last.path.clone_from(&op.op_ref);
                        last.prev.clone_from(&op.prev);
                        last.commit_time = op.timestamp;
                        last.commit_title.clone_from(&op.note);
                        last.body_size = op.size;
                        delete_at_end = 0;
                        continue;
                    }
                history.push(VersionInfo {
                    path: op.op_ref.clone(),
                    prev: op.prev.clone(),
                    commit_time: op.timestamp,
                    commit_title: op.note.clone(),
                    body_size: op.size,
                    published: false,
                    run_id,
                });
                delete_at_end = 0;
            }
            (OpType::Amend, Model::Commit) => {
                if let Some(last) = history.last_mut() {
                    last.path.clone_from(&op.op_ref);
                    last.prev.clone_from(&op.prev);
                    last.commit_time = op.timestamp;
                    last.commit_title.clone_from(&op.note);
                    last.body_size = op.size;
                }
                delete_at_end = 0;
            }
            (OpType::Remove, Model::Commit) => {
                let k = usize::try_from(op.size.max(0)).unwrap_or(0);
                match mode {
                    DeleteCollapseMode::All => {
                        let new_len = history.len().saturating_sub(k);
                        history.truncate(new_len);
                    }
                    DeleteCollapseMode::TailOnly => {
                        delete_at_end += k;
                    }
                }
            }
            (OpType::Init, Model::Push) => mark_published(&mut history, op.size, true),
            (OpType::Remove, Model::Push) => mark_published(&mut history, op.size, false),
            _ => {}
        }
    }

    if mode == DeleteCollapseMode::TailOnly {
        let new_len = history.len().saturating_sub(delete_at_end);
        history.truncate(new_len);
    }

    history.reverse();
    paginate(&history, offset, limit)
}

fn run_id_from_relations(op: &crate::op::Op) -> Option<String> {
    op.relations
        .iter()
        .find_map(|r| r.strip_prefix("runID:").map(str::to_owned))
}

fn mark_published(history: &mut [VersionInfo], size: i64, published: bool) {
    let k = usize::try_from(size.max(0)).unwrap_or(0);
    let len = history.len();
    for entry in &mut history[len.saturating_sub(k)..] {
        entry.published = published;
    }
}

fn paginate(history: &[VersionInfo], offset: usize, limit: i64) -> Vec<VersionInfo> {
    if offset >= history.len() {
        return Vec::new();
    }
    let remaining = &history[offset..];
    if limit < 0 {
        remaining.to_vec()
    } else {
        let take = usize::try_from(limit).unwrap_or(0).min(remaining.len());
        remaining[..take].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::{Model, Op, OpType};

    fn commit_op(op_type: OpType, op_ref: &str, prev: &str, title: &str, ts: i64) -> Op {
        Op {
            op_type,
            model: Model::Commit,
            op_ref: op_ref.to_owned(),
            prev: prev.to_owned(),
            relations: vec![],
            name: String::new(),
            author_id: "a1".to_owned(),
            timestamp: ts,
            size: 10,
            note: title.to_owned(),
        }
    }

    fn remove_commit(n: i64) -> Op {
        Op {
            op_type: OpType::Remove,
            model: Model::Commit,
            op_ref: String::new(),
            prev: String::new(),
            relations: vec![],
            name: String::new(),
            author_id: "a1".to_owned(),
            timestamp: 0,
            size: n,
            note: String::new(),
        }
    }

    fn branch_with(ops: Vec<Op>) -> Log {
        let mut log = Log::new(Op {
            op_type: OpType::Init,
            model: Model::Branch,
            op_ref: String::new(),
            prev: String::new(),
            relations: vec![],
            name: "main".to_owned(),
            author_id: "a1".to_owned(),
            timestamp: 0,
            size: 0,
            note: String::new(),
        });
        for op in ops {
            log.append(op);
        }
        log
    }

    #[test]
    fn two_commits_newest_first() {
        let branch = branch_with(vec![
            commit_op(OpType::Init, "QmV1", "", "initial commit", 1),
            commit_op(OpType::Init, "QmV2", "QmV1", "added body data", 2),
        ]);
        let items = project(&branch, DeleteCollapseMode::All, 0, 100);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].path, "QmV2");
        assert_eq!(items[1].path, "QmV1");
    }

    #[test]
    fn scenario_delete_tail_then_amend() {
        // Two commits, delete the latest (back down to one live version),
        // then amend: the sole remaining version is replaced in place.
        let branch = branch_with(vec![
            commit_op(OpType::Init, "QmV1", "", "initial commit", 1),
            commit_op(OpType::Init, "QmV2", "QmV1", "added body data", 2),
            remove_commit(1),
            commit_op(OpType::Amend, "QmV3", "QmV1", "added meta info", 3),
        ]);
        let items = project(&branch, DeleteCollapseMode::All, 0, 100);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].path, "QmV3");
        assert_eq!(items[0].commit_title, "added meta info");
    }

    #[test]
    fn delete_more_than_exist_leaves_zero() {
        let branch = branch_with(vec![
            commit_op(OpType::Init, "QmV1", "", "c1", 1),
            remove_commit(5),
        ]);
        let items = project(&branch, DeleteCollapseMode::All, 0, 100);
        assert!(items.is_empty());
    }

    #[test]
    fn push_marks_published() {
        let mut ops = vec![
            commit_op(OpType::Init, "QmV1", "", "c1", 1),
            commit_op(OpType::Init, "QmV2", "QmV1", "c2", 2),
        ];
        ops.push(Op {
            op_type: OpType::Init,
            model: Model::Push,
            op_ref: String::new(),
            prev: String::new(),
            relations: vec!["registry.qri.cloud".to_owned()],
            name: String::new(),
            author_id: "a1".to_owned(),
            timestamp: 3,
            size: 2,
            note: String::new(),
        });
        let branch = branch_with(ops);
        let items = project(&branch, DeleteCollapseMode::All, 0, 100);
        assert!(items.iter().all(|i| i.published));
    }

    #[test]
    fn run_then_commit_folds_into_one_entry() {
        let mut ops = vec![Op {
            op_type: OpType::Init,
            model: Model::Run,
            op_ref: "run-1".to_owned(),
            prev: String::new(),
            relations: vec![],
            name: String::new(),
            author_id: "a1".to_owned(),
            timestamp: 1,
            size: 0,
            note: String::new(),
        }];
        ops.push(Op {
            op_type: OpType::Init,
            model: Model::Commit,
            op_ref: "QmV1".to_owned(),
            prev: String::new(),
            relations: vec!["runID:run-1".to_owned()],
            name: String::new(),
            author_id: "a1".to_owned(),
            timestamp: 2,
            size: 5,
            note: "ran + saved".to_owned(),
        });
        let branch = branch_with(ops);
        let items = project(&branch, DeleteCollapseMode::All, 0, 100);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].path, "QmV1");
        assert_eq!(items[0].run_id.as_deref(), Some("run-1"));
    }

    #[test]
    fn run_fold_resets_trailing_delete_count_under_tail_only() {
        // C1 -> Remove(Commit, 1) -> Init(Run R1) -> Init(Commit, runID:R1 folds into R1).
        // The stale delete_at_end=1 from before the run started must not survive
        // the fold and truncate away the just-completed run-commit entry.
        let ops = vec![
            commit_op(OpType::Init, "QmV1", "", "initial commit", 1),
            remove_commit(1),
            Op {
                op_type: OpType::Init,
                model: Model::Run,
                op_ref: "run-1".to_owned(),
                prev: String::new(),
                relations: vec![],
                name: String::new(),
                author_id: "a1".to_owned(),
                timestamp: 2,
                size: 0,
                note: String::new(),
            },
            Op {
                op_type: OpType::Init,
                model: Model::Commit,
                op_ref: "QmV2".to_owned(),
                prev: String::new(),
                relations: vec!["runID:run-1".to_owned()],
                name: String::new(),
                author_id: "a1".to_owned(),
                timestamp: 3,
                size: 5,
                note: "ran + saved".to_owned(),
            },
        ];
        let branch = branch_with(ops);
        let items = project(&branch, DeleteCollapseMode::TailOnly, 0, 100);
        // The fold resets the trailing-delete count (same as a fresh commit or
        // an amend would), so nothing is truncated: both the originally-removed
        // V1 and the newly folded V2 survive, newest first.
        assert_eq!(items.len(), 2, "the folded run-commit entry must survive the tail-only pass");
        assert_eq!(items[0].path, "QmV2");
        assert_eq!(items[0].run_id.as_deref(), Some("run-1"));
        assert_eq!(items[1].path, "QmV1");
    }

    #[test]
    fn pagination_offset_and_limit() {
        let branch = branch_with(vec![
            commit_op(OpType::Init, "QmV1", "", "c1", 1),
            commit_op(OpType::Init, "QmV2", "QmV1", "c2", 2),
            commit_op(OpType::Init, "QmV3", "QmV2", "c3", 3),
        ]);
        let items = project(&branch, DeleteCollapseMode::All, 1, 1);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].path, "QmV2");
    }
}
