use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::datetime::deadline_serde;
use crate::user::{MAX_TRUST_SCORE, MIN_TRUST_SCORE, User, UserId};

pub type TaskId = Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Category {
    #[serde(rename = "家務助理", alias = "household-assistance")]
    HouseholdAssistance,
    #[serde(rename = "簡易維修", alias = "simple-repair")]
    SimpleRepair,
    #[serde(rename = "陪伴關懷", alias = "companionship")]
    Companionship,
    #[serde(rename = "跑腿代辦", alias = "errand-running")]
    ErrandRunning,
}

/// Presentation hints for a category. Every view reads these from
/// [`Category::style`] so a new category cannot be half-styled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryStyle {
    pub icon: &'static str,
    pub ansi: &'static str,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::HouseholdAssistance,
        Category::SimpleRepair,
        Category::Companionship,
        Category::ErrandRunning,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Category::HouseholdAssistance => "家務助理",
            Category::SimpleRepair => "簡易維修",
            Category::Companionship => "陪伴關懷",
            Category::ErrandRunning => "跑腿代辦",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Category::HouseholdAssistance => "household-assistance",
            Category::SimpleRepair => "simple-repair",
            Category::Companionship => "companionship",
            Category::ErrandRunning => "errand-running",
        }
    }

    pub fn style(self) -> CategoryStyle {
        match self {
            Category::HouseholdAssistance => CategoryStyle {
                icon: "home",
                ansi: "34",
            },
            Category::SimpleRepair => CategoryStyle {
                icon: "wrench",
                ansi: "33",
            },
            Category::Companionship => CategoryStyle {
                icon: "heart",
                ansi: "35",
            },
            Category::ErrandRunning => CategoryStyle {
                icon: "zap",
                ansi: "36",
            },
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Category::ALL
            .into_iter()
            .find(|c| c.slug() == needle.to_ascii_lowercase() || c.label() == needle)
            .ok_or_else(|| anyhow!("unknown category: {s}"))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EstimatedDuration {
    #[serde(rename = "30分鐘", alias = "30-minutes")]
    ThirtyMinutes,
    #[serde(rename = "1小時", alias = "1-hour")]
    OneHour,
    #[serde(rename = "2小時", alias = "2-hours")]
    TwoHours,
    #[serde(rename = "半天", alias = "half-day")]
    HalfDay,
}

impl EstimatedDuration {
    pub const ALL: [EstimatedDuration; 4] = [
        EstimatedDuration::ThirtyMinutes,
        EstimatedDuration::OneHour,
        EstimatedDuration::TwoHours,
        EstimatedDuration::HalfDay,
    ];

    pub fn label(self) -> &'static str {
        match self {
            EstimatedDuration::ThirtyMinutes => "30分鐘",
            EstimatedDuration::OneHour => "1小時",
            EstimatedDuration::TwoHours => "2小時",
            EstimatedDuration::HalfDay => "半天",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            EstimatedDuration::ThirtyMinutes => "30-minutes",
            EstimatedDuration::OneHour => "1-hour",
            EstimatedDuration::TwoHours => "2-hours",
            EstimatedDuration::HalfDay => "half-day",
        }
    }
}

impl fmt::Display for EstimatedDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for EstimatedDuration {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        EstimatedDuration::ALL
            .into_iter()
            .find(|d| d.slug() == needle.to_ascii_lowercase() || d.label() == needle)
            .ok_or_else(|| anyhow!("unknown duration: {s}"))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Status {
    Open,
    #[serde(rename = "In Progress")]
    InProgress,
    Completed,
    Cancelled,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Cancelled)
    }

    pub fn can_transition_to(self, to: Status) -> bool {
        matches!(
            (self, to),
            (Status::Open, Status::InProgress)
                | (Status::Open, Status::Cancelled)
                | (Status::InProgress, Status::Cancelled)
                | (Status::InProgress, Status::Completed)
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            Status::Open => "Open",
            Status::InProgress => "In Progress",
            Status::Completed => "Completed",
            Status::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Poster profile as it was when the task was posted. Later profile
/// edits never reach back into existing tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PosterSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster_id: Option<UserId>,
    pub poster_name: String,
    pub poster_trust_score: u8,
    pub poster_is_certified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster_certification_org: Option<String>,
}

impl PosterSnapshot {
    pub fn of(user: &User) -> Self {
        Self {
            poster_id: Some(user.id),
            poster_name: user.name.clone(),
            poster_trust_score: user.trust_score,
            poster_is_certified: user.is_certified,
            poster_certification_org: if user.is_certified {
                user.certification_org.clone()
            } else {
                None
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub category: Category,
    pub reward: u32,
    pub location: String,
    pub estimated_duration: EstimatedDuration,
    #[serde(default, with = "deadline_serde::option", skip_serializing_if = "Option::is_none")]
    pub deadline: Option<NaiveDateTime>,
    pub requires_certification: bool,
    #[serde(flatten)]
    pub poster: PosterSnapshot,
    pub status: Status,
}

impl Task {
    pub fn is_posted_by(&self, user: &User) -> bool {
        self.poster.poster_id == Some(user.id)
    }

    pub fn short_id(&self) -> String {
        short_id(&self.id)
    }

    pub(crate) fn apply_fields(&mut self, fields: TaskFields) {
        self.title = fields.title;
        self.description = fields.description;
        self.category = fields.category;
        self.reward = fields.reward;
        self.location = fields.location;
        self.estimated_duration = fields.estimated_duration;
        self.deadline = fields.deadline;
        self.requires_certification = fields.requires_certification;
    }
}

/// Hex digits shown for a task id in tables and command output.
pub const SHORT_ID_LEN: usize = 8;

pub fn short_id(id: &TaskId) -> String {
    id.simple().to_string()[..SHORT_ID_LEN].to_string()
}

/// Raw form input for posting or editing a task. Everything is kept as
/// text until [`TaskDraft::validate`] runs, matching what a form hands us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub category: Category,
    pub reward: String,
    pub location: String,
    pub estimated_duration: EstimatedDuration,
    pub deadline: Option<NaiveDateTime>,
    pub requires_certification: bool,
}

impl Default for TaskDraft {
    fn default() -> Self {
        Self {
            title: String::new(),
            description: String::new(),
            category: Category::ErrandRunning,
            reward: String::new(),
            location: String::new(),
            estimated_duration: EstimatedDuration::OneHour,
            deadline: None,
            requires_certification: false,
        }
    }
}

impl TaskDraft {
    pub fn from_task(task: &Task) -> Self {
        Self {
            title: task.title.clone(),
            description: task.description.clone(),
            category: task.category,
            reward: task.reward.to_string(),
            location: task.location.clone(),
            estimated_duration: task.estimated_duration,
            deadline: task.deadline,
            requires_certification: task.requires_certification,
        }
    }

    pub fn validate(&self) -> Result<TaskFields, String> {
        let mut missing = Vec::new();
        if self.title.trim().is_empty() {
            missing.push("title");
        }
        if self.description.trim().is_empty() {
            missing.push("description");
        }
        if self.reward.trim().is_empty() {
            missing.push("reward");
        }
        if self.location.trim().is_empty() {
            missing.push("location");
        }
        if !missing.is_empty() {
            return Err(format!("missing required fields: {}", missing.join(", ")));
        }

        let reward = self
            .reward
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("reward must be a non-negative integer, got {:?}", self.reward))?;

        Ok(TaskFields {
            title: self.title.trim().to_string(),
            description: self.description.trim().to_string(),
            category: self.category,
            reward,
            location: self.location.trim().to_string(),
            estimated_duration: self.estimated_duration,
            deadline: self.deadline,
            requires_certification: self.requires_certification,
        })
    }
}

/// Validated editable fields of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFields {
    pub title: String,
    pub description: String,
    pub category: Category,
    pub reward: u32,
    pub location: String,
    pub estimated_duration: EstimatedDuration,
    pub deadline: Option<NaiveDateTime>,
    pub requires_certification: bool,
}

/// A task as delivered by a seeding collaborator: no id, no status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SeedRecord {
    pub title: String,
    pub description: String,
    pub category: Category,
    pub reward: u32,
    pub location: String,
    pub poster_name: String,
    pub poster_trust_score: u8,
    pub requires_certification: bool,
    pub poster_is_certified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster_certification_org: Option<String>,
    pub estimated_duration: EstimatedDuration,
    #[serde(default, with = "deadline_serde::option", skip_serializing_if = "Option::is_none")]
    pub deadline: Option<NaiveDateTime>,
}

impl SeedRecord {
    /// Checks the values serde cannot: text fields must not be blank and
    /// the poster's trust score must be within the profile range.
    pub fn validate(&self) -> Result<(), String> {
        let mut missing = Vec::new();
        if self.title.trim().is_empty() {
            missing.push("title");
        }
        if self.description.trim().is_empty() {
            missing.push("description");
        }
        if self.location.trim().is_empty() {
            missing.push("location");
        }
        if self.poster_name.trim().is_empty() {
            missing.push("posterName");
        }
        if !missing.is_empty() {
            return Err(format!("blank required fields: {}", missing.join(", ")));
        }

        if !(MIN_TRUST_SCORE..=MAX_TRUST_SCORE).contains(&self.poster_trust_score) {
            return Err(format!(
                "posterTrustScore must be within {MIN_TRUST_SCORE}..={MAX_TRUST_SCORE}, got {}",
                self.poster_trust_score
            ));
        }
        Ok(())
    }

    pub fn into_task(self) -> Task {
        let org = if self.poster_is_certified {
            self.poster_certification_org
                .filter(|org| !org.trim().is_empty())
        } else {
            None
        };

        Task {
            id: Uuid::new_v4(),
            title: self.title,
            description: self.description,
            category: self.category,
            reward: self.reward,
            location: self.location,
            estimated_duration: self.estimated_duration,
            deadline: self.deadline,
            requires_certification: self.requires_certification,
            poster: PosterSnapshot {
                poster_id: None,
                poster_name: self.poster_name,
                poster_trust_score: self.poster_trust_score,
                poster_is_certified: self.poster_is_certified,
                poster_certification_org: org,
            },
            status: Status::Open,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_machine_has_no_exit_from_terminal_states() {
        let all = [
            Status::Open,
            Status::InProgress,
            Status::Completed,
            Status::Cancelled,
        ];
        for from in [Status::Completed, Status::Cancelled] {
            assert!(from.is_terminal());
            for to in all {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
        assert!(Status::Open.can_transition_to(Status::InProgress));
        assert!(!Status::InProgress.can_transition_to(Status::InProgress));
        assert!(!Status::Open.can_transition_to(Status::Completed));
    }

    #[test]
    fn category_accepts_slug_and_label() {
        assert_eq!(
            "errand-running".parse::<Category>().unwrap(),
            Category::ErrandRunning
        );
        assert_eq!("陪伴關懷".parse::<Category>().unwrap(), Category::Companionship);
        assert!("gardening".parse::<Category>().is_err());

        let from_slug: Category = serde_json::from_str("\"simple-repair\"").unwrap();
        assert_eq!(from_slug, Category::SimpleRepair);
        assert_eq!(
            serde_json::to_string(&Category::SimpleRepair).unwrap(),
            "\"簡易維修\""
        );
    }

    #[test]
    fn draft_validation_rejects_blank_and_non_numeric() {
        let mut draft = TaskDraft {
            title: "Walk the dog".to_string(),
            description: "Twice around the park".to_string(),
            reward: "200".to_string(),
            location: "  ".to_string(),
            ..TaskDraft::default()
        };
        let err = draft.validate().unwrap_err();
        assert!(err.contains("location"));

        draft.location = "台北市大安區".to_string();
        draft.reward = "two hundred".to_string();
        assert!(draft.validate().is_err());

        draft.reward = "-5".to_string();
        assert!(draft.validate().is_err());

        draft.reward = " 200 ".to_string();
        assert_eq!(draft.validate().unwrap().reward, 200);
    }

    #[test]
    fn seed_record_validation_checks_values() {
        let good: SeedRecord = serde_json::from_value(serde_json::json!({
            "title": "倒垃圾",
            "description": "晚上八點垃圾車",
            "category": "跑腿代辦",
            "reward": 100,
            "location": "台南市東區",
            "posterName": "吳先生",
            "posterTrustScore": 2,
            "requiresCertification": false,
            "posterIsCertified": false,
            "estimatedDuration": "30分鐘"
        }))
        .unwrap();
        assert!(good.validate().is_ok());

        let blank = SeedRecord {
            title: "  ".to_string(),
            location: String::new(),
            ..good.clone()
        };
        let err = blank.validate().unwrap_err();
        assert!(err.contains("title") && err.contains("location"), "{err}");

        for score in [0, 6, 200] {
            let record = SeedRecord {
                poster_trust_score: score,
                ..good.clone()
            };
            assert!(record.validate().unwrap_err().contains("posterTrustScore"));
        }
    }

    #[test]
    fn serialized_task_uses_flat_wire_names() {
        let record = SeedRecord {
            title: "買菜".to_string(),
            description: "幫忙到市場買菜".to_string(),
            category: Category::ErrandRunning,
            reward: 150,
            location: "台北市中山區".to_string(),
            poster_name: "陳阿姨".to_string(),
            poster_trust_score: 4,
            requires_certification: false,
            poster_is_certified: false,
            poster_certification_org: Some("should be dropped".to_string()),
            estimated_duration: EstimatedDuration::OneHour,
            deadline: None,
        };
        assert!(record.validate().is_ok());
        let task = record.into_task();
        assert_eq!(task.status, Status::Open);
        assert_eq!(task.poster.poster_certification_org, None);

        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["posterName"], "陳阿姨");
        assert_eq!(value["status"], "Open");
        assert_eq!(value["estimatedDuration"], "1小時");
        assert!(value.get("deadline").is_none());
        assert!(value.get("posterCertificationOrg").is_none());
    }
}
