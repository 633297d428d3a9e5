//! Application state: every store plus the dialog orchestrator, owned in one
//! place and mutated through intent handlers.

use tracing::{debug, info, instrument, warn};

use crate::dialog::DialogOrchestrator;
use crate::filter::{Criteria, HistoryCounts, HistoryTab, history, history_counts};
use crate::seed::{SeedOutcome, SeedSource};
use crate::store::{StoreError, TaskStore};
use crate::task::{Status, Task, TaskDraft, TaskId};
use crate::user::{ProfileEdit, ProfileStore, User};

#[derive(Debug)]
pub struct AppState {
    pub tasks: TaskStore,
    pub profile: ProfileStore,
    pub dialogs: DialogOrchestrator,
    pub criteria: Criteria,
    /// Message shown to the user after a failed seeding attempt.
    pub load_error: Option<String>,
    pub seed_source: Option<SeedSource>,
}

pub struct HistoryView<'a> {
    pub tab: HistoryTab,
    pub tasks: Vec<&'a Task>,
    pub counts: HistoryCounts,
}

impl AppState {
    pub fn new(profile: ProfileEdit) -> Result<Self, StoreError> {
        Ok(Self {
            tasks: TaskStore::new(),
            profile: ProfileStore::new(profile)?,
            dialogs: DialogOrchestrator::new(),
            criteria: Criteria::default(),
            load_error: None,
            seed_source: None,
        })
    }

    pub fn user(&self) -> &User {
        self.profile.get()
    }

    /// Replaces the task list with a seeding result. Open dialogs that point
    /// at tasks are closed since those ids no longer exist.
    #[instrument(skip_all, fields(count = outcome.records.len()))]
    pub fn admit(&mut self, outcome: SeedOutcome) {
        self.tasks.admit_seeded(outcome.records);
        self.load_error = outcome.error;
        self.seed_source = Some(outcome.source);
        self.dialogs.close_detail();
        self.dialogs.close_task_form();
        self.dialogs.close_map();
        if let Some(message) = &self.load_error {
            warn!(message = %message, "task list loaded from fallback");
        }
    }

    pub fn visible_tasks(&self) -> Vec<&Task> {
        self.criteria.apply(self.tasks.list())
    }

    /// The task behind the detail dialog, read live from the store.
    pub fn detail(&self) -> Option<&Task> {
        self.dialogs
            .detail_task()
            .and_then(|id| self.tasks.get(id).ok())
    }

    pub fn select_task(&mut self, id: TaskId) -> Result<&Task, StoreError> {
        self.tasks.get(id)?;
        self.dialogs.open_detail(id);
        self.tasks.get(id)
    }

    pub fn close_detail(&mut self) {
        self.dialogs.close_detail();
    }

    pub fn show_map_for(&mut self, id: TaskId) -> Result<String, StoreError> {
        let location = self.tasks.get(id)?.location.clone();
        self.dialogs.show_map(location.clone());
        Ok(location)
    }

    pub fn open_create(&mut self) {
        self.dialogs.open_create();
    }

    /// Opens the edit form for a task the current user posted and returns
    /// the form prefilled from the stored task.
    #[instrument(skip(self))]
    pub fn open_edit(&mut self, id: TaskId) -> Result<TaskDraft, StoreError> {
        let task = self.tasks.get(id)?;
        if !task.is_posted_by(self.profile.get()) {
            return Err(StoreError::NotPoster);
        }
        if task.status != Status::Open {
            return Err(StoreError::EditNotAllowed(task.status));
        }
        let draft = TaskDraft::from_task(task);

        if !self.dialogs.edit_from_detail(id) {
            self.dialogs.open_edit(id);
        }
        Ok(draft)
    }

    /// Submits the open task form: creates a task for a post form, updates
    /// the target for an edit form. The form closes on success and stays
    /// open on any error. Returns `None` when no form is open.
    #[instrument(skip_all)]
    pub fn submit_task_form(&mut self, draft: &TaskDraft) -> Option<Result<Task, StoreError>> {
        let editing = self.dialogs.task_form()?;

        let result = match editing {
            None => self.tasks.create(draft, self.profile.get()),
            Some(id) => match self.tasks.get(id) {
                Ok(task) if !task.is_posted_by(self.profile.get()) => Err(StoreError::NotPoster),
                Ok(_) => self.tasks.update(id, draft),
                Err(err) => Err(err),
            },
        };

        match &result {
            Ok(task) => {
                debug!(task_id = %task.id, "task form submitted");
                self.dialogs.close_task_form();
            }
            Err(err) => debug!(error = %err, "task form rejected"),
        }
        Some(result)
    }

    pub fn cancel_task_form(&mut self) {
        self.dialogs.close_task_form();
    }

    pub fn accept_task(&mut self, id: TaskId) -> Result<Task, StoreError> {
        let task = self.tasks.accept(id, self.profile.get())?;
        info!(task_id = %id, helper = %self.profile.get().id, "task accepted");
        self.dialogs.close_detail();
        Ok(task)
    }

    pub fn cancel_task(&mut self, id: TaskId) -> Result<Task, StoreError> {
        let task = self.tasks.cancel(id, self.profile.get())?;
        self.dialogs.close_detail();
        Ok(task)
    }

    pub fn complete_task(&mut self, id: TaskId) -> Result<Task, StoreError> {
        let task = self.tasks.complete(id, self.profile.get())?;
        self.dialogs.close_detail();
        Ok(task)
    }

    pub fn open_profile(&mut self) {
        self.dialogs.open_profile();
    }

    pub fn start_profile_edit(&mut self) -> ProfileEdit {
        self.dialogs.open_profile();
        self.dialogs.set_profile_editing(true);
        ProfileEdit::from_user(self.profile.get())
    }

    /// Replaces the current profile. Existing poster snapshots keep the
    /// values they were created with.
    pub fn update_profile(&mut self, edit: ProfileEdit) -> Result<&User, StoreError> {
        self.profile.replace(edit)?;
        self.dialogs.set_profile_editing(false);
        Ok(self.profile.get())
    }

    pub fn open_history(&mut self, tab: HistoryTab) {
        self.dialogs.open_history(tab);
    }

    pub fn history_view(&self, tab: HistoryTab) -> HistoryView<'_> {
        let user = self.profile.get();
        HistoryView {
            tab,
            tasks: history(self.tasks.list(), user, tab),
            counts: history_counts(self.tasks.list(), user),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::Dialog;
    use crate::seed::mock_records;
    use crate::task::Category;

    fn profile(name: &str, certified: bool) -> ProfileEdit {
        ProfileEdit {
            name: name.to_string(),
            avatar_seed: "seed".to_string(),
            bio: String::new(),
            is_certified: certified,
            certification_org: certified.then(|| "社會局".to_string()),
            trust_score: 4,
        }
    }

    fn draft(title: &str) -> TaskDraft {
        TaskDraft {
            title: title.to_string(),
            description: "幫忙搬兩箱書".to_string(),
            category: Category::ErrandRunning,
            reward: "300".to_string(),
            location: "台北市大安區".to_string(),
            ..TaskDraft::default()
        }
    }

    fn seeded_app() -> AppState {
        let mut app = AppState::new(profile("王小明", true)).unwrap();
        app.admit(SeedOutcome {
            records: mock_records().unwrap(),
            source: SeedSource::Mock,
            error: None,
        });
        app
    }

    #[test]
    fn post_form_creates_and_closes() {
        let mut app = seeded_app();
        let before = app.tasks.len();

        assert!(app.submit_task_form(&draft("搬書")).is_none());

        app.open_create();
        let err = app.submit_task_form(&draft("")).unwrap().unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(app.dialogs.task_form(), Some(None));
        assert_eq!(app.tasks.len(), before);

        let task = app.submit_task_form(&draft("搬書")).unwrap().unwrap();
        assert_eq!(app.dialogs.primary(), &Dialog::None);
        assert_eq!(app.tasks.list()[0].id, task.id);
        assert!(task.is_posted_by(app.user()));
    }

    #[test]
    fn edit_from_detail_updates_in_place() {
        let mut app = seeded_app();
        app.open_create();
        let task = app.submit_task_form(&draft("X")).unwrap().unwrap();

        app.select_task(task.id).unwrap();
        let mut form = app.open_edit(task.id).unwrap();
        assert_eq!(app.dialogs.task_form(), Some(Some(task.id)));
        assert_eq!(form.title, "X");

        form.title = "Y".to_string();
        let updated = app.submit_task_form(&form).unwrap().unwrap();
        assert_eq!(updated.id, task.id);
        assert_eq!(updated.status, Status::Open);

        let matching: Vec<_> = app.tasks.list().iter().filter(|t| t.id == task.id).collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].title, "Y");
    }

    #[test]
    fn seeded_tasks_are_not_editable_by_the_user() {
        let mut app = seeded_app();
        let seeded = app.tasks.list()[0].id;
        assert_eq!(app.open_edit(seeded), Err(StoreError::NotPoster));
        assert_eq!(app.cancel_task(seeded), Err(StoreError::NotPoster));
    }

    #[test]
    fn accept_closes_detail_and_history_tracks_poster() {
        let mut app = seeded_app();
        let seeded = app.tasks.list()[0].id;

        app.select_task(seeded).unwrap();
        let accepted = app.accept_task(seeded).unwrap();
        assert_eq!(accepted.status, Status::InProgress);
        assert_eq!(app.dialogs.detail_task(), None);

        app.open_create();
        let mine = app.submit_task_form(&draft("陪散步")).unwrap().unwrap();
        app.cancel_task(mine.id).unwrap();

        let view = app.history_view(HistoryTab::Cancelled);
        assert_eq!(view.tasks.len(), 1);
        assert_eq!(view.counts.cancelled, 1);
        assert_eq!(view.counts.completed, 0);

        // renaming does not disown earlier posts
        let mut edit = ProfileEdit::from_user(app.user());
        edit.name = "小明".to_string();
        app.update_profile(edit).unwrap();
        assert_eq!(app.history_view(HistoryTab::Cancelled).tasks.len(), 1);
    }

    #[test]
    fn admit_resets_dialogs_and_records_error() {
        let mut app = seeded_app();
        let id = app.tasks.list()[0].id;
        app.select_task(id).unwrap();
        app.show_map_for(id).unwrap();

        app.admit(SeedOutcome {
            records: mock_records().unwrap(),
            source: SeedSource::Mock,
            error: Some("boom".to_string()),
        });
        assert_eq!(app.detail(), None);
        assert_eq!(app.dialogs.map_location(), None);
        assert_eq!(app.load_error.as_deref(), Some("boom"));
        assert!(app.tasks.get(id).is_err());
    }

    #[test]
    fn invalid_profile_update_keeps_editing() {
        let mut app = seeded_app();
        let mut edit = app.start_profile_edit();
        edit.trust_score = 9;
        assert!(app.update_profile(edit).is_err());
        assert_eq!(app.dialogs.primary(), &Dialog::Profile { editing: true });
        assert_eq!(app.user().trust_score, 4);
    }
}
