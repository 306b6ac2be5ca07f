//! Book — the dataset-aware write-path API layered over a [`Journal`] (§4.4).
//!
//! Every write method except the owner's own rename targets some branch or
//! dataset log `L` and is permission-checked: the acting author must be the
//! log's original author (single-writer-per-log, §9).

use ed25519_dalek::{SigningKey, VerifyingKey};
use tracing::{debug, info};

use crate::error::OplogError;
use crate::log::Log;
use crate::logstore::{BlobStore, Journal};
use crate::name;
use crate::op::{Model, Op, OpType};
use crate::reference::{self, Ref};
use crate::state::{self, DeleteCollapseMode, VersionInfo};

/// Optional state describing a transform run, supplied alongside a save
/// (§4.4 item 5).
#[derive(Clone, Debug)]
pub struct RunState {
    /// Id of the run; must match `dataset.commit.run_id` on amend paths.
    pub run_id: String,
    /// How long the run took, nanoseconds.
    pub duration_ns: i64,
    /// Run status string (e.g. `"succeeded"`, `"failed"`).
    pub status: String,
}

/// A dataset snapshot to save, as supplied by the caller (§4.4 item 5).
#[derive(Clone, Debug, Default)]
pub struct DatasetSave {
    /// Content path produced by the blob store for this snapshot.
    pub path: String,
    /// Previous content path in the causal chain.
    pub prev: String,
    /// Commit title/annotation.
    pub title: String,
    /// Body size in bytes.
    pub body_size: i64,
}

/// Events the [`Book`] emits after a successful write (§4.4, §5: advisory —
/// publish failures never roll back the underlying write).
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// A new dataset was initialized.
    DatasetNameInit {
        /// Stable id of the new dataset log.
        init_id: String,
        /// Owning username.
        username: String,
        /// Owning profile id.
        profile_id: String,
        /// Dataset name.
        name: String,
    },
    /// A dataset was renamed.
    DatasetRename {
        /// Id of the renamed dataset.
        init_id: String,
        /// The new name.
        name: String,
    },
    /// A dataset was logically deleted.
    DatasetDeleteAll {
        /// Id of the deleted dataset.
        init_id: String,
    },
    /// A commit was written (save, amend, or the head after a delete).
    WriteCommit {
        /// Id of the dataset the commit belongs to.
        init_id: String,
        /// The resulting head version.
        version: VersionInfo,
    },
}

/// Pluggable sink for [`Event`]s emitted by the [`Book`] (mirrors the
/// teacher's treatment of telemetry/validation exporters as optional
/// injected collaborators).
pub trait EventPublisher {
    /// Handle one event. Errors are logged by the caller, never propagated.
    fn publish(&self, event: &Event);
}

/// An [`EventPublisher`] that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventPublisher;

impl EventPublisher for NoopEventPublisher {
    fn publish(&self, _event: &Event) {}
}

/// A one-shot handle paired with the sparse log returned by
/// [`Book::write_remote_push`]/[`Book::write_remote_delete`] (§4.4 item 8/9).
/// Call [`Self::rollback`] if the transfer the log was produced for
/// subsequently fails.
#[derive(Debug, Clone)]
pub struct PushRollback {
    init_id: String,
}

impl PushRollback {
    /// Truncate the push/delete op this handle was issued for and
    /// re-persist. Idempotent: a second call after the first succeeds is a
    /// no-op (there is nothing left matching to truncate).
    ///
    /// # Errors
    /// [`OplogError::NotFound`] if the dataset no longer resolves.
    pub fn rollback<S: BlobStore, P: EventPublisher>(&self, book: &mut Book<S, P>) -> Result<(), OplogError> {
        book.rollback_last_push(&self.init_id)
    }
}

/// The dataset-aware API layered over a [`Journal`] (§4.4).
pub struct Book<S: BlobStore, P: EventPublisher> {
    journal: Journal,
    signing_key: SigningKey,
    blob_store: S,
    events: P,
    owner_profile_id: String,
}

impl<S: BlobStore, P: EventPublisher> Book<S, P> {
    /// Construct a book over an already-open journal.
    ///
    /// `owner_profile_id` is the owner's externally-visible profile
    /// identifier (derived from their public key by the caller); it seeds
    /// the owner's `User` log on first use if none exists yet.
    pub fn new(journal: Journal, signing_key: SigningKey, blob_store: S, events: P, owner_profile_id: impl Into<String>) -> Self {
        Self {
            journal,
            signing_key,
            blob_store,
            events,
            owner_profile_id: owner_profile_id.into(),
        }
    }

    /// Persist the journal and emit `event`.
    fn finish(&mut self, event: &Event) -> Result<(), OplogError> {
        self.journal.persist()?;
        self.events.publish(event);
        Ok(())
    }

    fn require_owner(&mut self, actor_profile_id: &str, now: i64) -> Result<String, OplogError> {
        if let Some(log) = self
            .journal
            .store()
            .get_author(Model::User, actor_profile_id)
        {
            return log.id().map_err(OplogError::from);
        }
        let init = Op::init(Model::User, String::new(), actor_profile_id, now);
        let log = Log::new(init);
        let id = log.id().map_err(OplogError::from)?;
        self.journal.store_mut().push_top_level(log);
        Ok(id)
    }

    /// Check that `L` (identified by `log_id`, whose first op's `author_id`
    /// is `log_author`) is owned by `actor`'s user log.
    fn require_access(actor_user_log_id: &str, log_id: &str, log_author: &str) -> Result<(), OplogError> {
        if log_author == actor_user_log_id {
            Ok(())
        } else {
            Err(OplogError::AccessDenied {
                log_id: log_id.to_owned(),
                actor: actor_user_log_id.to_owned(),
            })
        }
    }

    /// `WriteAuthorRename` (§4.4 item 1).
    ///
    /// # Errors
    /// [`OplogError::InvalidName`] if `new_name` fails validation.
    pub fn write_author_rename(&mut self, actor_profile_id: &str, new_name: &str, now: i64) -> Result<(), OplogError> {
        validate_dataset_name(new_name)?;
        let user_log_id = self.require_owner(actor_profile_id, now)?;
        let log = self
            .journal
            .store_mut()
            .get_mut(&user_log_id)
            .map_err(OplogError::from)?
            .ok_or_else(|| OplogError::NotFound {
                what: "user log".to_owned(),
                id: user_log_id.clone(),
            })?;
        log.append(Op {
            op_type: OpType::Amend,
            model: Model::User,
            op_ref: String::new(),
            prev: String::new(),
            relations: vec![],
            name: new_name.to_owned(),
            author_id: actor_profile_id.to_owned(),
            timestamp: now,
            size: 0,
            note: String::new(),
        });
        if actor_profile_id == self.owner_profile_id {
            debug!(target: "oplog::book", "write_author_rename: owner renamed to {new_name}");
        }
        self.journal.persist()
    }

    /// `WriteDatasetInit` (§4.4 item 2).
    ///
    /// # Errors
    /// [`OplogError::InvalidName`] on an empty/invalid name;
    /// [`OplogError::LogTooShort`] if a non-blank dataset with this name
    /// already exists.
    pub fn write_dataset_init(
        &mut self,
        actor_profile_id: &str,
        dataset_name: &str,
        now: i64,
    ) -> Result<String, OplogError> {
        if dataset_name.is_empty() {
            return Err(OplogError::InvalidName {
                name: String::new(),
                reason: "dataset name must not be empty".to_owned(),
            });
        }
        validate_dataset_name(dataset_name)?;

        let user_log_id = self.require_owner(actor_profile_id, now)?;

        if let Some(user_log) = self.journal.store().top_level().iter().find(|l| l.ops()[0].author_id == actor_profile_id)
            && let Some(existing) = user_log.children().iter().find(|c| c.model() == Model::Dataset && c.name() == dataset_name && !c.is_removed()) {
                if is_blank_dataset(existing) {
                    let username = user_log.name().to_owned();
                    // remove the stale blank log before re-creating
                    self.remove_blank_dataset(&user_log_id, dataset_name)?;
                    let _ = username;
                } else {
                    return Err(OplogError::LogTooShort {
                        name: dataset_name.to_owned(),
                    });
                }
            }

        let dataset_init = Op::init(Model::Dataset, dataset_name, &user_log_id, now);
        let mut dataset_log = Log::new(dataset_init);
        let branch_init = Op::init(Model::Branch, "main", &user_log_id, now);
        dataset_log.add_child(Log::new(branch_init)).map_err(OplogError::from)?;
        let init_id = dataset_log.id().map_err(OplogError::from)?;

        let user_log = self
            .journal
            .store_mut()
            .get_mut(&user_log_id)
            .map_err(OplogError::from)?
            .ok_or_else(|| OplogError::NotFound {
                what: "user log".to_owned(),
                id: user_log_id.clone(),
            })?;
        user_log.add_child(dataset_log).map_err(OplogError::from)?;
        let username = user_log.name().to_owned();

        info!(target: "oplog::book", %init_id, name = %dataset_name, "dataset initialized");
        self.finish(&Event::DatasetNameInit {
            init_id: init_id.clone(),
            username,
            profile_id: actor_profile_id.to_owned(),
            name: dataset_name.to_owned(),
        })?;
        Ok(init_id)
    }

    fn remove_blank_dataset(&mut self, user_log_id: &str, dataset_name: &str) -> Result<(), OplogError> {
        let user_log = self
            .journal
            .store_mut()
            .get_mut(user_log_id)
            .map_err(OplogError::from)?
            .ok_or_else(|| OplogError::NotFound {
                what: "user log".to_owned(),
                id: user_log_id.to_owned(),
            })?;
        user_log.children_mut().retain(|c| c.name() != dataset_name);
        Ok(())
    }

    /// `WriteDatasetRename` (§4.4 item 3).
    ///
    /// # Errors
    /// [`OplogError::NotFound`] if `init_id` doesn't resolve;
    /// [`OplogError::AccessDenied`] if the actor doesn't own it.
    pub fn write_dataset_rename(
        &mut self,
        actor_profile_id: &str,
        init_id: &str,
        new_name: &str,
        now: i64,
    ) -> Result<(), OplogError> {
        validate_dataset_name(new_name)?;
        let user_log_id = self.require_owner(actor_profile_id, now)?;
        let author = self.dataset_author(init_id)?;
        Self::require_access(&user_log_id, init_id, &author)?;

        let dataset = self
            .journal
            .store_mut()
            .get_mut(init_id)
            .map_err(OplogError::from)?
            .ok_or_else(|| OplogError::NotFound {
                what: "dataset".to_owned(),
                id: init_id.to_owned(),
            })?;
        dataset.append(Op {
            op_type: OpType::Amend,
            model: Model::Dataset,
            op_ref: String::new(),
            prev: String::new(),
            relations: vec![],
            name: new_name.to_owned(),
            author_id: user_log_id,
            timestamp: now,
            size: 0,
            note: String::new(),
        });
        self.finish(&Event::DatasetRename {
            init_id: init_id.to_owned(),
            name: new_name.to_owned(),
        })
    }

    /// `WriteDatasetDeleteAll` (§4.4 item 4).
    ///
    /// # Errors
    /// [`OplogError::NotFound`]/[`OplogError::AccessDenied`] as above.
    pub fn write_dataset_delete_all(&mut self, actor_profile_id: &str, init_id: &str, now: i64) -> Result<(), OplogError> {
        let user_log_id = self.require_owner(actor_profile_id, now)?;
        let author = self.dataset_author(init_id)?;
        Self::require_access(&user_log_id, init_id, &author)?;

        let dataset = self
            .journal
            .store_mut()
            .get_mut(init_id)
            .map_err(OplogError::from)?
            .ok_or_else(|| OplogError::NotFound {
                what: "dataset".to_owned(),
                id: init_id.to_owned(),
            })?;
        dataset.append(Op {
            op_type: OpType::Remove,
            model: Model::Dataset,
            op_ref: String::new(),
            prev: String::new(),
            relations: vec![],
            name: String::new(),
            author_id: user_log_id,
            timestamp: now,
            size: 0,
            note: String::new(),
        });
        self.finish(&Event::DatasetDeleteAll {
            init_id: init_id.to_owned(),
        })
    }

    /// `WriteVersionSave` (§4.4 item 5): optionally preceded by a `Run` op.
    ///
    /// # Errors
    /// [`OplogError::NotFound`]/[`OplogError::AccessDenied`] as above.
    pub fn write_version_save(
        &mut self,
        actor_profile_id: &str,
        init_id: &str,
        save: DatasetSave,
        run: Option<RunState>,
        now: i64,
    ) -> Result<VersionInfo, OplogError> {
        let user_log_id = self.require_owner(actor_profile_id, now)?;
        let author = self.dataset_author(init_id)?;
        Self::require_access(&user_log_id, init_id, &author)?;

        let branch = self.branch_mut(init_id)?;

        let mut relations = Vec::new();
        if let Some(run) = run {
            branch.append(Op {
                op_type: OpType::Init,
                model: Model::Run,
                op_ref: run.run_id.clone(),
                prev: String::new(),
                relations: vec![],
                name: String::new(),
                author_id: user_log_id.clone(),
                timestamp: now,
                size: run.duration_ns,
                note: run.status,
            });
            relations.push(format!("runID:{}", run.run_id));
        }
        branch.append(Op {
            op_type: OpType::Init,
            model: Model::Commit,
            op_ref: save.path,
            prev: save.prev,
            relations,
            name: String::new(),
            author_id: user_log_id,
            timestamp: now,
            size: save.body_size,
            note: save.title,
        });

        let branch_snapshot = self.branch_mut(init_id)?.clone();
        let items = state::project(&branch_snapshot, DeleteCollapseMode::All, 0, 1);
        let version = items.into_iter().next().ok_or_else(|| OplogError::NotFound {
            what: "version".to_owned(),
            id: init_id.to_owned(),
        })?;
        self.finish(&Event::WriteCommit {
            init_id: init_id.to_owned(),
            version: version.clone(),
        })?;
        Ok(version)
    }

    /// `WriteVersionAmend` (§4.4 item 6).
    ///
    /// # Errors
    /// [`OplogError::NotFound`]/[`OplogError::AccessDenied`] as above.
    pub fn write_version_amend(&mut self, actor_profile_id: &str, init_id: &str, save: DatasetSave, now: i64) -> Result<VersionInfo, OplogError> {
        let user_log_id = self.require_owner(actor_profile_id, now)?;
        let author = self.dataset_author(init_id)?;
        Self::require_access(&user_log_id, init_id, &author)?;

        let branch = self.branch_mut(init_id)?;
        branch.append(Op {
            op_type: OpType::Amend,
            model: Model::Commit,
            op_ref: save.path,
            prev: save.prev,
            relations: vec![],
            name: String::new(),
            author_id: user_log_id,
            timestamp: now,
            size: save.body_size,
            note: save.title,
        });

        let branch_snapshot = self.branch_mut(init_id)?.clone();
        let items = state::project(&branch_snapshot, DeleteCollapseMode::All, 0, 1);
        let version = items.into_iter().next().ok_or_else(|| OplogError::NotFound {
            what: "version".to_owned(),
            id: init_id.to_owned(),
        })?;
        self.finish(&Event::WriteCommit {
            init_id: init_id.to_owned(),
            version: version.clone(),
        })?;
        Ok(version)
    }

    /// `WriteVersionDelete` (§4.4 item 7).
    ///
    /// # Errors
    /// [`OplogError::NotFound`]/[`OplogError::AccessDenied`] as above.
    pub fn write_version_delete(&mut self, actor_profile_id: &str, init_id: &str, n: i64, now: i64) -> Result<(), OplogError> {
        let user_log_id = self.require_owner(actor_profile_id, now)?;
        let author = self.dataset_author(init_id)?;
        Self::require_access(&user_log_id, init_id, &author)?;

        let branch = self.branch_mut(init_id)?;
        branch.append(Op {
            op_type: OpType::Remove,
            model: Model::Commit,
            op_ref: String::new(),
            prev: String::new(),
            relations: vec![],
            name: String::new(),
            author_id: user_log_id,
            timestamp: now,
            size: n,
            note: String::new(),
        });

        let branch_snapshot = self.branch_mut(init_id)?.clone();
        let items = state::project(&branch_snapshot, DeleteCollapseMode::TailOnly, 0, 1);
        if let Some(version) = items.into_iter().next() {
            self.finish(&Event::WriteCommit {
                init_id: init_id.to_owned(),
                version,
            })
        } else {
            self.journal.persist()
        }
    }

    /// `WriteRemotePush` (§4.4 item 8). Returns the sparse
    /// `UserDatasetBranchesLog` for transport — a synthetic ancestor chain
    /// pruned to the path to `init_id`, with the dataset itself populated
    /// with its full descendant subtree (§4.3) — paired with a one-shot
    /// [`PushRollback`] to invoke if the transfer subsequently fails.
    ///
    /// # Errors
    /// [`OplogError::NotFound`]/[`OplogError::AccessDenied`] as above.
    pub fn write_remote_push(
        &mut self,
        actor_profile_id: &str,
        init_id: &str,
        n: i64,
        addr: &str,
        now: i64,
    ) -> Result<(Log, PushRollback), OplogError> {
        self.write_push_or_delete(actor_profile_id, init_id, n, addr, now, OpType::Init)
    }

    /// `WriteRemoteDelete` (§4.4 item 9).
    ///
    /// # Errors
    /// [`OplogError::NotFound`]/[`OplogError::AccessDenied`] as above.
    pub fn write_remote_delete(
        &mut self,
        actor_profile_id: &str,
        init_id: &str,
        n: i64,
        addr: &str,
        now: i64,
    ) -> Result<(Log, PushRollback), OplogError> {
        self.write_push_or_delete(actor_profile_id, init_id, n, addr, now, OpType::Remove)
    }

    fn write_push_or_delete(
        &mut self,
        actor_profile_id: &str,
        init_id: &str,
        n: i64,
        addr: &str,
        now: i64,
        op_type: OpType,
    ) -> Result<(Log, PushRollback), OplogError> {
        let user_log_id = self.require_owner(actor_profile_id, now)?;
        let author = self.dataset_author(init_id)?;
        Self::require_access(&user_log_id, init_id, &author)?;

        let branch = self.branch_mut(init_id)?;
        branch.append(Op {
            op_type,
            model: Model::Push,
            op_ref: String::new(),
            prev: String::new(),
            relations: vec![addr.to_owned()],
            name: String::new(),
            author_id: user_log_id,
            timestamp: now,
            size: n,
            note: String::new(),
        });
        self.journal.persist()?;

        let mut out = self.journal.store().sparse_log(init_id)?;
        out.sign(&self.signing_key);
        Ok((
            out,
            PushRollback {
                init_id: init_id.to_owned(),
            },
        ))
    }

    /// Truncate the most recently appended op of `init_id`'s branch and
    /// re-persist. Idempotent: calling twice after the first successful call
    /// is a no-op (there is nothing left matching to truncate).
    ///
    /// # Errors
    /// [`OplogError::NotFound`] if `init_id` doesn't resolve.
    pub fn rollback_last_push(&mut self, init_id: &str) -> Result<(), OplogError> {
        let branch = self.branch_mut(init_id)?;
        if matches!(branch.head().model, Model::Push) {
            let ops: Vec<_> = branch.ops().to_vec();
            let mut rebuilt = Log::new(ops[0].clone());
            for op in &ops[1..ops.len() - 1] {
                rebuilt.append(op.clone());
            }
            for child in branch.children() {
                rebuilt.add_child(child.clone()).map_err(OplogError::from)?;
            }
            *branch = rebuilt;
        }
        self.journal.persist()
    }

    /// `WriteTransformRun` (§4.4 item 10): a standalone run record.
    ///
    /// # Errors
    /// [`OplogError::NotFound`]/[`OplogError::AccessDenied`] as above.
    pub fn write_transform_run(&mut self, actor_profile_id: &str, init_id: &str, run: RunState, now: i64) -> Result<(), OplogError> {
        let user_log_id = self.require_owner(actor_profile_id, now)?;
        let author = self.dataset_author(init_id)?;
        Self::require_access(&user_log_id, init_id, &author)?;

        let branch = self.branch_mut(init_id)?;
        branch.append(Op {
            op_type: OpType::Init,
            model: Model::Run,
            op_ref: run.run_id,
            prev: String::new(),
            relations: vec![],
            name: String::new(),
            author_id: user_log_id,
            timestamp: now,
            size: run.duration_ns,
            note: run.status,
        });
        self.journal.persist()
    }

    /// `MergeLog` (§4.4 item 11). Verifies the sender's signature before
    /// merging — the only signature check in the write path; trust is
    /// anchored at the sender's public key.
    ///
    /// # Errors
    /// [`OplogError::InvalidSignature`] if verification fails.
    pub fn merge_log(&mut self, sender_public_key: &VerifyingKey, incoming: Log) -> Result<(), OplogError> {
        incoming.verify(sender_public_key)?;
        self.journal.store_mut().merge_log(incoming)?;
        self.journal.persist()
    }

    /// `RemoveLog` (§4.4 item 12).
    ///
    /// # Errors
    /// [`OplogError::NotFound`] if the path doesn't resolve.
    pub fn remove_log(&mut self, names: &[&str]) -> Result<(), OplogError> {
        self.journal.store_mut().remove_log(names)?;
        self.journal.persist()
    }

    /// `ConstructDatasetLog` (§4.4 item 13): bulk-seed a dataset's branch
    /// from an externally supplied ordered commit history.
    ///
    /// # Errors
    /// [`OplogError::LogTooShort`] if a dataset with this name already
    /// resolves.
    pub fn construct_dataset_log(
        &mut self,
        actor_profile_id: &str,
        dataset_name: &str,
        history: Vec<DatasetSave>,
        now: i64,
    ) -> Result<String, OplogError> {
        validate_dataset_name(dataset_name)?;
        if let Some(user_log) = self
            .journal
            .store()
            .top_level()
            .iter()
            .find(|l| l.ops()[0].author_id == actor_profile_id)
            && user_log
                .children()
                .iter()
                .any(|c| c.model() == Model::Dataset && c.name() == dataset_name && !c.is_removed())
            {
                return Err(OplogError::LogTooShort {
                    name: dataset_name.to_owned(),
                });
            }

        let user_log_id = self.require_owner(actor_profile_id, now)?;
        let dataset_init = Op::init(Model::Dataset, dataset_name, &user_log_id, now);
        let mut dataset_log = Log::new(dataset_init);
        let branch_init = Op::init(Model::Branch, "main", &user_log_id, now);
        let mut branch = Log::new(branch_init);
        for save in history {
            branch.append(Op {
                op_type: OpType::Init,
                model: Model::Commit,
                op_ref: save.path,
                prev: save.prev,
                relations: vec![],
                name: String::new(),
                author_id: user_log_id.clone(),
                timestamp: now,
                size: save.body_size,
                note: save.title,
            });
        }
        dataset_log.add_child(branch).map_err(OplogError::from)?;
        let init_id = dataset_log.id().map_err(OplogError::from)?;

        let user_log = self
            .journal
            .store_mut()
            .get_mut(&user_log_id)
            .map_err(OplogError::from)?
            .ok_or_else(|| OplogError::NotFound {
                what: "user log".to_owned(),
                id: user_log_id,
            })?;
        user_log.add_child(dataset_log).map_err(OplogError::from)?;
        self.journal.persist()?;
        Ok(init_id)
    }

    /// List a dataset's version history (§4.4 state machine, §4.5).
    ///
    /// # Errors
    /// [`OplogError::NotFound`] if `init_id` doesn't resolve to a dataset
    /// with exactly one branch.
    pub fn items(&self, init_id: &str, offset: usize, limit: i64) -> Result<Vec<VersionInfo>, OplogError> {
        let dataset = self
            .journal
            .store()
            .get(init_id)
            .map_err(OplogError::from)?
            .ok_or_else(|| OplogError::NotFound {
                what: "dataset".to_owned(),
                id: init_id.to_owned(),
            })?;
        let branch = dataset
            .children()
            .iter()
            .find(|c| c.model() == Model::Branch)
            .ok_or_else(|| OplogError::NotFound {
                what: "branch".to_owned(),
                id: init_id.to_owned(),
            })?;
        Ok(state::project(branch, DeleteCollapseMode::All, offset, limit))
    }

    /// `ResolveRef`, with `"me"` substituted for `actor_profile_id`'s
    /// username before resolving (§4.5, final paragraph).
    ///
    /// # Errors
    /// [`OplogError::RefNotFound`] if the reference doesn't resolve.
    pub fn resolve_ref(&self, actor_profile_id: &str, mut r: Ref) -> Result<Ref, OplogError> {
        if r.username == "me"
            && let Some(user_log) = self.journal.store().get_author(Model::User, actor_profile_id) {
                user_log.name().clone_into(&mut r.username);
            }
        reference::resolve_ref(self.journal.store(), &r)
    }

    /// Store `bytes` via the configured blob store, returning its path.
    ///
    /// # Errors
    /// Propagates the blob store's failure.
    pub fn put_blob(&mut self, bytes: &[u8]) -> Result<String, OplogError> {
        self.blob_store.put(bytes)
    }

    /// Fetch previously-stored bytes by path.
    ///
    /// # Errors
    /// [`OplogError::NotFound`] if no blob exists at `path`.
    pub fn get_blob(&self, path: &str) -> Result<Vec<u8>, OplogError> {
        self.blob_store.get(path)
    }

    fn dataset_author(&self, init_id: &str) -> Result<String, OplogError> {
        let dataset = self
            .journal
            .store()
            .get(init_id)
            .map_err(OplogError::from)?
            .ok_or_else(|| OplogError::NotFound {
                what: "dataset".to_owned(),
                id: init_id.to_owned(),
            })?;
        Ok(dataset.ops()[0].author_id.clone())
    }

    fn branch_mut(&mut self, init_id: &str) -> Result<&mut Log, OplogError> {
        let dataset = self
            .journal
            .store_mut()
            .get_mut(init_id)
            .map_err(OplogError::from)?
            .ok_or_else(|| OplogError::NotFound {
                what: "dataset".to_owned(),
                id: init_id.to_owned(),
            })?;
        dataset
            .children_mut()
            .iter_mut()
            .find(|c| c.model() == Model::Branch)
            .ok_or_else(|| OplogError::NotFound {
                what: "branch".to_owned(),
                id: init_id.to_owned(),
            })
    }
}

fn is_blank_dataset(dataset: &Log) -> bool {
    dataset.ops().len() == 1
        && dataset.children().len() == 1
        && dataset.children()[0].ops().len() == 1
}

fn validate_dataset_name(name: &str) -> Result<(), OplogError> {
    if name.is_empty() {
        return Ok(());
    }
    if name.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(OplogError::InvalidName {
            name: name.to_owned(),
            reason: "must be all lower-case".to_owned(),
        });
    }
    if name.len() > reference::MAX_NAME_LEN {
        return Err(OplogError::InvalidName {
            name: name.to_owned(),
            reason: format!("exceeds {} characters", reference::MAX_NAME_LEN),
        });
    }
    Ok(())
}

/// Generate a valid dataset name from arbitrary input, falling back to
/// `name::generate_name` (§4.4's naming helper, re-exported for callers that
/// want to derive a name before calling `write_dataset_init`).
#[must_use]
pub fn suggest_dataset_name(input: &str) -> String {
    name::generate_name(input, "dataset_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;
    use crate::logstore::MemBlobStore;

    fn new_book() -> Book<MemBlobStore, NoopEventPublisher> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.bin");
        std::mem::forget(dir); // keep the tempdir alive for the test's duration
        let key = crypto::generate_signing_key();
        let journal = Journal::open(path, &key).unwrap();
        Book::new(journal, key, MemBlobStore::default(), NoopEventPublisher, "PID_B5")
    }

    #[test]
    fn init_then_save_then_items() {
        let mut book = new_book();
        let init_id = book.write_dataset_init("PID_B5", "world_bank_population", 1).unwrap();
        book.write_version_save(
            "PID_B5",
            &init_id,
            DatasetSave {
                path: "QmV1".to_owned(),
                prev: String::new(),
                title: "initial commit".to_owned(),
                body_size: 10,
            },
            None,
            2,
        )
        .unwrap();
        let items = book.items(&init_id, 0, 100).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].path, "QmV1");
    }

    #[test]
    fn duplicate_init_without_history_fails() {
        let mut book = new_book();
        book.write_dataset_init("PID_B5", "ds", 1).unwrap();
        book.write_version_save(
            "PID_B5",
            &book.resolve_ref("PID_B5", Ref { username: "me".to_owned(), name: "ds".to_owned(), ..Default::default() }).unwrap().init_id,
            DatasetSave { path: "Qm1".to_owned(), ..Default::default() },
            None,
            2,
        ).unwrap();
        assert!(book.write_dataset_init("PID_B5", "ds", 3).is_err());
    }

    #[test]
    fn rename_requires_ownership() {
        let mut book = new_book();
        let init_id = book.write_dataset_init("PID_B5", "ds", 1).unwrap();
        let err = book.write_dataset_rename("PID_JANELLE", &init_id, "foo", 2).unwrap_err();
        assert!(matches!(err, OplogError::AccessDenied { .. }));
    }

    #[test]
    fn delete_all_makes_dataset_unresolvable_by_name() {
        let mut book = new_book();
        let init_id = book.write_dataset_init("PID_B5", "ds", 1).unwrap();
        book.write_dataset_delete_all("PID_B5", &init_id, 2).unwrap();
        let r = Ref { username: "me".to_owned(), name: "ds".to_owned(), ..Default::default() };
        assert!(book.resolve_ref("PID_B5", r).is_err());
    }

    #[test]
    fn version_delete_then_amend_collapses_to_one() {
        let mut book = new_book();
        let init_id = book.write_dataset_init("PID_B5", "ds", 1).unwrap();
        book.write_version_save("PID_B5", &init_id, DatasetSave { path: "Qm1".to_owned(), ..Default::default() }, None, 2).unwrap();
        book.write_version_save("PID_B5", &init_id, DatasetSave { path: "Qm2".to_owned(), prev: "Qm1".to_owned(), ..Default::default() }, None, 3).unwrap();
        book.write_version_delete("PID_B5", &init_id, 1, 4).unwrap();
        book.write_version_amend("PID_B5", &init_id, DatasetSave { path: "Qm3".to_owned(), prev: "Qm1".to_owned(), title: "meta".to_owned(), ..Default::default() }, 5).unwrap();
        let items = book.items(&init_id, 0, 100).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].path, "Qm3");
    }

    #[test]
    fn push_rollback_truncates_op() {
        let mut book = new_book();
        let init_id = book.write_dataset_init("PID_B5", "ds", 1).unwrap();
        book.write_version_save("PID_B5", &init_id, DatasetSave { path: "Qm1".to_owned(), ..Default::default() }, None, 2).unwrap();
        let (_, rollback) = book.write_remote_push("PID_B5", &init_id, 1, "registry.example", 3).unwrap();
        let before = book.items(&init_id, 0, 100).unwrap();
        rollback.rollback(&mut book).unwrap();
        let after = book.items(&init_id, 0, 100).unwrap();
        assert_eq!(before.len(), after.len());
    }

    #[test]
    fn write_remote_push_returns_sparse_user_dataset_branches_log() {
        let mut book = new_book();
        let init_id = book.write_dataset_init("PID_B5", "ds", 1).unwrap();
        book.write_version_save("PID_B5", &init_id, DatasetSave { path: "Qm1".to_owned(), ..Default::default() }, None, 2).unwrap();
        let (sparse, _rollback) = book.write_remote_push("PID_B5", &init_id, 1, "registry.example", 3).unwrap();

        assert_eq!(sparse.model(), crate::op::Model::User, "top level of a mergeable log must be a User log");
        assert_eq!(sparse.children().len(), 1, "ancestor chain is pruned to the single path to init_id");
        let dataset = &sparse.children()[0];
        assert_eq!(dataset.id().unwrap(), init_id);
        assert_eq!(dataset.children().len(), 1, "dataset carries its full descendant subtree");
        assert_eq!(dataset.children()[0].model(), crate::op::Model::Branch);
        assert!(!dataset.children()[0].ops().is_empty(), "branch ops (save + push) came along with the subtree");
    }

    #[test]
    fn merge_log_rejects_bad_signature() {
        let mut book = new_book();
        let key = crypto::generate_signing_key();
        let other = crypto::generate_signing_key();
        let mut log = Log::new(Op::init(Model::User, "janelle", "PID_JANELLE", 1));
        log.sign(&key);
        assert!(book.merge_log(&other.verifying_key(), log).is_err());
    }

    #[test]
    fn merge_log_accepts_valid_signature() {
        let mut book = new_book();
        let key = crypto::generate_signing_key();
        let mut log = Log::new(Op::init(Model::User, "janelle", "PID_JANELLE", 1));
        log.sign(&key);
        assert!(book.merge_log(&key.verifying_key(), log).is_ok());
    }
}
