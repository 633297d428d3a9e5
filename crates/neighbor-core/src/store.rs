use thiserror::Error;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::task::{PosterSnapshot, SeedRecord, Status, Task, TaskDraft, TaskId};
use crate::user::User;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("invalid task: {0}")]
    Validation(String),
    #[error("task not found: {0}")]
    NotFound(TaskId),
    #[error("cannot move task from {from} to {to}")]
    InvalidTransition { from: Status, to: Status },
    #[error("task can only be edited while open (currently {0})")]
    EditNotAllowed(Status),
    #[error("this task requires a certified helper")]
    CertificationRequired,
    #[error("only the poster can do that")]
    NotPoster,
    #[error("you cannot accept your own task")]
    PosterCannotAccept,
}

/// Ordered task collection, newest first.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: Vec<Task>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: TaskId) -> Result<&Task, StoreError> {
        self.tasks
            .iter()
            .find(|t| t.id == id)
            .ok_or(StoreError::NotFound(id))
    }

    /// Resolves a full id or a unique prefix of its simple (hyphen-less)
    /// or hyphenated form.
    pub fn resolve(&self, needle: &str) -> Option<TaskId> {
        if let Ok(id) = Uuid::parse_str(needle) {
            return self.tasks.iter().find(|t| t.id == id).map(|t| t.id);
        }

        let needle = needle.trim().to_ascii_lowercase();
        if needle.is_empty() {
            return None;
        }

        let mut matches = self.tasks.iter().filter(|t| {
            t.id.simple().to_string().starts_with(&needle)
                || t.id.hyphenated().to_string().starts_with(&needle)
        });
        let first = matches.next()?;
        if matches.next().is_some() {
            None
        } else {
            Some(first.id)
        }
    }

    #[instrument(skip_all, fields(poster = %poster.id))]
    pub fn create(&mut self, draft: &TaskDraft, poster: &User) -> Result<Task, StoreError> {
        let fields = draft.validate().map_err(StoreError::Validation)?;

        let mut id = Uuid::new_v4();
        while self.tasks.iter().any(|t| t.id == id) {
            id = Uuid::new_v4();
        }

        let task = Task {
            id,
            title: fields.title,
            description: fields.description,
            category: fields.category,
            reward: fields.reward,
            location: fields.location,
            estimated_duration: fields.estimated_duration,
            deadline: fields.deadline,
            requires_certification: fields.requires_certification,
            poster: PosterSnapshot::of(poster),
            status: Status::Open,
        };

        self.tasks.insert(0, task.clone());
        info!(task_id = %task.id, count = self.tasks.len(), "task posted");
        Ok(task)
    }

    /// Replaces the editable fields of an open task. Identity, poster
    /// snapshot and status always come from the stored record.
    #[instrument(skip_all, fields(task_id = %id))]
    pub fn update(&mut self, id: TaskId, draft: &TaskDraft) -> Result<Task, StoreError> {
        let fields = draft.validate().map_err(StoreError::Validation)?;
        let task = self.get_mut(id)?;
        if task.status != Status::Open {
            return Err(StoreError::EditNotAllowed(task.status));
        }

        task.apply_fields(fields);
        debug!(title = %task.title, "task updated");
        Ok(task.clone())
    }

    #[instrument(skip_all, fields(task_id = %id, to = %to))]
    pub fn transition(&mut self, id: TaskId, to: Status) -> Result<Task, StoreError> {
        let task = self.get_mut(id)?;
        let from = task.status;
        if !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition { from, to });
        }

        task.status = to;
        info!(from = %from, "task status changed");
        Ok(task.clone())
    }

    pub fn accept(&mut self, id: TaskId, helper: &User) -> Result<Task, StoreError> {
        let task = self.get(id)?;
        if task.is_posted_by(helper) {
            return Err(StoreError::PosterCannotAccept);
        }
        if task.status == Status::Open && task.requires_certification && !helper.is_certified {
            return Err(StoreError::CertificationRequired);
        }
        self.transition(id, Status::InProgress)
    }

    pub fn cancel(&mut self, id: TaskId, actor: &User) -> Result<Task, StoreError> {
        self.ensure_poster(id, actor)?;
        self.transition(id, Status::Cancelled)
    }

    pub fn complete(&mut self, id: TaskId, actor: &User) -> Result<Task, StoreError> {
        self.ensure_poster(id, actor)?;
        self.transition(id, Status::Completed)
    }

    /// Replaces the whole collection with freshly seeded records. Each
    /// record gets a new id and starts open.
    #[instrument(skip_all, fields(count = records.len()))]
    pub fn admit_seeded(&mut self, records: Vec<SeedRecord>) {
        self.tasks = records.into_iter().map(SeedRecord::into_task).collect();
        info!(count = self.tasks.len(), "seeded tasks admitted");
    }

    fn ensure_poster(&self, id: TaskId, actor: &User) -> Result<(), StoreError> {
        if self.get(id)?.is_posted_by(actor) {
            Ok(())
        } else {
            Err(StoreError::NotPoster)
        }
    }

    fn get_mut(&mut self, id: TaskId) -> Result<&mut Task, StoreError> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(StoreError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Category;
    use crate::user::{ProfileEdit, ProfileStore};

    fn profile(name: &str, certified: bool) -> User {
        ProfileStore::new(ProfileEdit {
            name: name.to_string(),
            avatar_seed: name.to_string(),
            bio: String::new(),
            is_certified: certified,
            certification_org: certified.then(|| "Welfare League".to_string()),
            trust_score: 4,
        })
        .unwrap()
        .get()
        .clone()
    }

    fn draft(title: &str, reward: &str) -> TaskDraft {
        TaskDraft {
            title: title.to_string(),
            description: "help needed".to_string(),
            category: Category::SimpleRepair,
            reward: reward.to_string(),
            location: "台北市信義區".to_string(),
            ..TaskDraft::default()
        }
    }

    #[test]
    fn create_prepends_and_snapshots_poster() {
        let poster = profile("Ming", true);
        let mut store = TaskStore::new();
        let first = store.create(&draft("first", "100"), &poster).unwrap();
        let second = store.create(&draft("second", "200"), &poster).unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(store.list()[0].id, second.id);
        assert_eq!(store.list()[1].id, first.id);
        assert_eq!(second.status, Status::Open);
        assert_eq!(second.poster.poster_name, "Ming");
        assert_eq!(second.poster.poster_trust_score, 4);
        assert_eq!(
            second.poster.poster_certification_org.as_deref(),
            Some("Welfare League")
        );
    }

    #[test]
    fn invalid_create_leaves_store_untouched() {
        let poster = profile("Ming", false);
        let mut store = TaskStore::new();
        let err = store.create(&draft("", "100"), &poster).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        let err = store.create(&draft("x", "abc"), &poster).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn edit_replaces_fields_and_keeps_identity() {
        let poster = profile("Ming", false);
        let mut store = TaskStore::new();
        let task = store.create(&draft("X", "100"), &poster).unwrap();

        let mut edit = TaskDraft::from_task(&task);
        edit.title = "Y".to_string();
        store.update(task.id, &edit).unwrap();

        assert_eq!(store.len(), 1);
        let stored = store.get(task.id).unwrap();
        assert_eq!(stored.title, "Y");
        assert_eq!(stored.status, Status::Open);
        assert_eq!(stored.poster, task.poster);
    }

    #[test]
    fn edit_requires_open_task_and_known_id() {
        let poster = profile("Ming", false);
        let mut store = TaskStore::new();
        let task = store.create(&draft("X", "100"), &poster).unwrap();
        store.cancel(task.id, &poster).unwrap();

        let err = store.update(task.id, &draft("Y", "1")).unwrap_err();
        assert_eq!(err, StoreError::EditNotAllowed(Status::Cancelled));

        let unknown = Uuid::new_v4();
        assert_eq!(
            store.update(unknown, &draft("Y", "1")).unwrap_err(),
            StoreError::NotFound(unknown)
        );
    }

    #[test]
    fn accept_twice_is_rejected() {
        let poster = profile("Ming", false);
        let helper = profile("Hua", false);
        let mut store = TaskStore::new();
        let task = store.create(&draft("X", "100"), &poster).unwrap();

        let accepted = store.accept(task.id, &helper).unwrap();
        assert_eq!(accepted.status, Status::InProgress);

        let err = store.accept(task.id, &helper).unwrap_err();
        assert_eq!(
            err,
            StoreError::InvalidTransition {
                from: Status::InProgress,
                to: Status::InProgress
            }
        );
    }

    #[test]
    fn terminal_tasks_never_change() {
        let poster = profile("Ming", false);
        let helper = profile("Hua", false);
        let mut store = TaskStore::new();
        let done = store.create(&draft("done", "100"), &poster).unwrap();
        let gone = store.create(&draft("gone", "100"), &poster).unwrap();

        store.accept(done.id, &helper).unwrap();
        store.complete(done.id, &poster).unwrap();
        store.cancel(gone.id, &poster).unwrap();

        for (id, status) in [(done.id, Status::Completed), (gone.id, Status::Cancelled)] {
            for to in [
                Status::Open,
                Status::InProgress,
                Status::Completed,
                Status::Cancelled,
            ] {
                assert!(store.transition(id, to).is_err());
            }
            assert_eq!(store.get(id).unwrap().status, status);
        }
    }

    #[test]
    fn acceptance_rules_follow_poster_and_certification() {
        let poster = profile("Ming", false);
        let uncertified = profile("Hua", false);
        let certified = profile("Mei", true);
        let mut store = TaskStore::new();

        let mut needs_cert = draft("X", "100");
        needs_cert.requires_certification = true;
        let task = store.create(&needs_cert, &poster).unwrap();

        assert_eq!(
            store.accept(task.id, &poster).unwrap_err(),
            StoreError::PosterCannotAccept
        );
        assert_eq!(
            store.accept(task.id, &uncertified).unwrap_err(),
            StoreError::CertificationRequired
        );
        assert_eq!(
            store.cancel(task.id, &certified).unwrap_err(),
            StoreError::NotPoster
        );
        assert_eq!(
            store.accept(task.id, &certified).unwrap().status,
            Status::InProgress
        );
    }

    #[test]
    fn resolve_accepts_unique_prefix() {
        let poster = profile("Ming", false);
        let mut store = TaskStore::new();
        let task = store.create(&draft("X", "100"), &poster).unwrap();

        assert_eq!(store.resolve(&task.short_id()), Some(task.id));
        assert_eq!(store.resolve(&task.id.to_string()), Some(task.id));
        assert_eq!(store.resolve(""), None);
        assert_eq!(store.resolve("zzzz"), None);
    }
}
