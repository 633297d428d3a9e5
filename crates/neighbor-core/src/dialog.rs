use tracing::debug;

use crate::filter::HistoryTab;
use crate::task::TaskId;

/// The one primary dialog that may be open. Holding it in a single value
/// is what keeps the form, detail, profile and history dialogs mutually
/// exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Dialog {
    #[default]
    None,
    /// Post form when `editing` is `None`, edit form otherwise.
    TaskForm { editing: Option<TaskId> },
    Detail { task: TaskId },
    Profile { editing: bool },
    History { tab: HistoryTab },
}

impl Dialog {
    pub fn name(&self) -> &'static str {
        match self {
            Dialog::None => "none",
            Dialog::TaskForm { editing: None } => "post task",
            Dialog::TaskForm { editing: Some(_) } => "edit task",
            Dialog::Detail { .. } => "task detail",
            Dialog::Profile { .. } => "profile",
            Dialog::History { .. } => "history",
        }
    }
}

#[derive(Debug, Default)]
pub struct DialogOrchestrator {
    primary: Dialog,
    map: Option<String>,
}

impl DialogOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn primary(&self) -> &Dialog {
        &self.primary
    }

    pub fn map_location(&self) -> Option<&str> {
        self.map.as_deref()
    }

    pub fn detail_task(&self) -> Option<TaskId> {
        match self.primary {
            Dialog::Detail { task } => Some(task),
            _ => None,
        }
    }

    /// `None` when no task form is open, `Some(None)` for a new post and
    /// `Some(Some(id))` while editing.
    pub fn task_form(&self) -> Option<Option<TaskId>> {
        match self.primary {
            Dialog::TaskForm { editing } => Some(editing),
            _ => None,
        }
    }

    pub fn open_create(&mut self) {
        self.set(Dialog::TaskForm { editing: None });
    }

    pub fn open_edit(&mut self, task: TaskId) {
        self.set(Dialog::TaskForm {
            editing: Some(task),
        });
    }

    pub fn close_task_form(&mut self) {
        if matches!(self.primary, Dialog::TaskForm { .. }) {
            self.set(Dialog::None);
        }
    }

    pub fn open_detail(&mut self, task: TaskId) {
        self.set(Dialog::Detail { task });
    }

    pub fn close_detail(&mut self) {
        if matches!(self.primary, Dialog::Detail { .. }) {
            self.set(Dialog::None);
        }
    }

    /// Swaps the detail dialog for the edit form of the same task in a
    /// single assignment. Returns false when detail is not showing `task`.
    pub fn edit_from_detail(&mut self, task: TaskId) -> bool {
        if self.detail_task() != Some(task) {
            return false;
        }
        self.open_edit(task);
        true
    }

    pub fn open_profile(&mut self) {
        self.set(Dialog::Profile { editing: false });
    }

    pub fn set_profile_editing(&mut self, editing: bool) {
        if let Dialog::Profile { editing: current } = &mut self.primary {
            *current = editing;
        }
    }

    pub fn close_profile(&mut self) {
        if matches!(self.primary, Dialog::Profile { .. }) {
            self.set(Dialog::None);
        }
    }

    pub fn open_history(&mut self, tab: HistoryTab) {
        self.set(Dialog::History { tab });
    }

    pub fn close_history(&mut self) {
        if matches!(self.primary, Dialog::History { .. }) {
            self.set(Dialog::None);
        }
    }

    pub fn show_map(&mut self, location: impl Into<String>) {
        let location = location.into();
        debug!(location = %location, "map opened");
        self.map = Some(location);
    }

    pub fn close_map(&mut self) {
        self.map = None;
    }

    /// Closes the map overlay if one is open, otherwise the primary dialog.
    pub fn close_top(&mut self) {
        if self.map.is_some() {
            self.close_map();
        } else {
            self.set(Dialog::None);
        }
    }

    fn set(&mut self, next: Dialog) {
        debug!(from = self.primary.name(), to = next.name(), "dialog change");
        self.primary = next;
    }
}

pub fn map_embed_url(location: &str) -> String {
    format!(
        "https://maps.google.com/maps?q={}&output=embed&hl=zh-TW",
        urlencoding::encode(location)
    )
}
