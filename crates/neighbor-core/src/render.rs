use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use unicode_width::UnicodeWidthStr;

use crate::app::{AppState, HistoryView};
use crate::config::Config;
use crate::datetime::{format_deadline_long, format_deadline_short, is_overdue};
use crate::dialog::{Dialog, map_embed_url};
use crate::filter::{Criteria, HistoryTab};
use crate::task::{Status, Task, TaskDraft, short_id};
use crate::user::{MAX_TRUST_SCORE, ProfileEdit, User};

const AVATAR_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    tz: Tz,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self {
            color: color && io::stdout().is_terminal(),
            tz: cfg.timezone()?,
        })
    }

    pub fn plain(tz: Tz) -> Self {
        Self { color: false, tz }
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    #[tracing::instrument(skip_all, fields(count = tasks.len()))]
    pub fn write_task_table<W: Write + ?Sized>(
        &self,
        out: &mut W,
        tasks: &[&Task],
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "No tasks match the current filter.")?;
            return Ok(());
        }

        let headers = [
            "ID", "Category", "Title", "Reward", "Duration", "Deadline", "Location", "Poster",
            "Status",
        ]
        .map(String::from)
        .to_vec();

        let rows = tasks
            .iter()
            .map(|task| {
                vec![
                    self.paint(&task.short_id(), "33"),
                    self.category_cell(task),
                    task.title.clone(),
                    format!("NT$ {}", task.reward),
                    task.estimated_duration.label().to_string(),
                    self.deadline_cell(task, now),
                    task.location.clone(),
                    self.poster_cell(task),
                    self.status_cell(task.status),
                ]
            })
            .collect();

        write_table(out, headers, rows)
    }

    #[tracing::instrument(skip_all, fields(task_id = %task.id))]
    pub fn write_task_card<W: Write + ?Sized>(
        &self,
        out: &mut W,
        task: &Task,
        viewer: &User,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint(&task.title, "1"))?;
        writeln!(out, "id          {}", task.id)?;
        writeln!(out, "status      {}", self.status_cell(task.status))?;
        writeln!(out, "category    {}", self.category_cell(task))?;
        writeln!(out, "reward      NT$ {}", task.reward)?;
        writeln!(out, "duration    {}", task.estimated_duration.label())?;
        if let Some(deadline) = task.deadline {
            let text = format_deadline_long(deadline);
            let text = if is_overdue(deadline, &self.tz, now) && !task.status.is_terminal() {
                self.paint(&format!("{text} (overdue)"), "31")
            } else {
                text
            };
            writeln!(out, "deadline    {text}")?;
        }
        writeln!(out, "location    {}", task.location)?;
        writeln!(
            out,
            "cert        {}",
            if task.requires_certification {
                "requires a certified helper"
            } else {
                "open to everyone"
            }
        )?;
        writeln!(out, "poster      {}", self.poster_cell(task))?;
        if let Some(org) = &task.poster.poster_certification_org {
            writeln!(out, "            certified by {org}")?;
        }
        writeln!(out)?;
        for line in task.description.lines() {
            writeln!(out, "  {line}")?;
        }
        writeln!(out)?;
        writeln!(out, "actions     {}", available_actions(task, viewer).join(", "))?;
        Ok(())
    }

    pub fn write_profile<W: Write + ?Sized>(
        &self,
        out: &mut W,
        user: &User,
        editing: bool,
    ) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint(&user.name, "1"))?;
        writeln!(out, "avatar      {}", user.avatar_url(AVATAR_SIZE))?;
        writeln!(
            out,
            "trust       {} ({}/{MAX_TRUST_SCORE})",
            self.paint(&stars(user.trust_score), "33"),
            user.trust_score
        )?;
        let certification = match (user.is_certified, &user.certification_org) {
            (true, Some(org)) => format!("certified by {org}"),
            (true, None) => "certified".to_string(),
            (false, _) => "not certified".to_string(),
        };
        writeln!(out, "cert        {certification}")?;
        if !user.bio.is_empty() {
            writeln!(out, "bio         {}", user.bio)?;
        }
        if editing {
            writeln!(
                out,
                "editing: profile edit name:.. avatar:.. bio:.. trust:1-5 certified:yes|no org:.."
            )?;
        }
        Ok(())
    }

    pub fn write_profile_form<W: Write + ?Sized>(
        &self,
        out: &mut W,
        edit: &ProfileEdit,
    ) -> anyhow::Result<()> {
        let rows = vec![
            vec!["name".to_string(), edit.name.clone()],
            vec!["avatar".to_string(), edit.avatar_seed.clone()],
            vec!["bio".to_string(), edit.bio.clone()],
            vec!["trust".to_string(), edit.trust_score.to_string()],
            vec![
                "certified".to_string(),
                if edit.is_certified { "yes" } else { "no" }.to_string(),
            ],
            vec![
                "org".to_string(),
                edit.certification_org.clone().unwrap_or_default(),
            ],
        ];
        write_table(out, vec!["Field".into(), "Value".into()], rows)
    }

    pub fn write_task_form<W: Write + ?Sized>(
        &self,
        out: &mut W,
        draft: &TaskDraft,
        editing: bool,
    ) -> anyhow::Result<()> {
        writeln!(
            out,
            "{}",
            self.paint(if editing { "Edit task" } else { "Post a task" }, "1")
        )?;
        let rows = vec![
            vec!["title".to_string(), draft.title.clone()],
            vec!["desc".to_string(), draft.description.clone()],
            vec!["category".to_string(), draft.category.slug().to_string()],
            vec!["reward".to_string(), draft.reward.clone()],
            vec!["location".to_string(), draft.location.clone()],
            vec![
                "duration".to_string(),
                draft.estimated_duration.slug().to_string(),
            ],
            vec![
                "deadline".to_string(),
                draft.deadline.map(format_deadline_long).unwrap_or_default(),
            ],
            vec![
                "cert".to_string(),
                if draft.requires_certification { "yes" } else { "no" }.to_string(),
            ],
        ];
        write_table(&mut *out, vec!["Field".into(), "Value".into()], rows)?;
        writeln!(out, "submit key:value ... to save, close to discard")?;
        Ok(())
    }

    pub fn write_history<W: Write + ?Sized>(
        &self,
        out: &mut W,
        view: &HistoryView<'_>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let tab = |tab: HistoryTab, label: &str, count: usize| {
            let text = format!("{label} ({count})");
            if view.tab == tab {
                self.paint(&format!("[{text}]"), "1")
            } else {
                format!(" {text} ")
            }
        };
        writeln!(
            out,
            "{} {}",
            tab(HistoryTab::Completed, "completed", view.counts.completed),
            tab(HistoryTab::Cancelled, "cancelled", view.counts.cancelled)
        )?;

        if view.tasks.is_empty() {
            writeln!(out, "No tasks here yet.")?;
            return Ok(());
        }
        self.write_task_table(out, &view.tasks, now)
    }

    pub fn write_map<W: Write + ?Sized>(&self, out: &mut W, location: &str) -> anyhow::Result<()> {
        writeln!(out, "map         {location}")?;
        writeln!(out, "            {}", map_embed_url(location))?;
        Ok(())
    }

    pub fn write_status<W: Write + ?Sized>(
        &self,
        out: &mut W,
        app: &AppState,
    ) -> anyhow::Result<()> {
        let dialog = match app.dialogs.primary() {
            Dialog::Detail { task } => format!("task detail {}", short_id(task)),
            Dialog::TaskForm { editing: Some(id) } => format!("edit task {}", short_id(id)),
            Dialog::History { tab } => format!("history ({tab})"),
            other => other.name().to_string(),
        };
        writeln!(out, "dialog      {dialog}")?;
        if let Some(location) = app.dialogs.map_location() {
            writeln!(out, "map         {location}")?;
        }
        self.write_criteria(out, &app.criteria)?;
        writeln!(
            out,
            "tasks       {} total, {} shown",
            app.tasks.len(),
            app.visible_tasks().len()
        )?;
        writeln!(out, "user        {}", app.user().name)?;
        if let Some(source) = app.seed_source {
            writeln!(out, "source      {source}")?;
        }
        if let Some(message) = &app.load_error {
            writeln!(out, "{}", self.paint(message, "31"))?;
        }
        Ok(())
    }

    pub fn write_criteria<W: Write + ?Sized>(
        &self,
        out: &mut W,
        criteria: &Criteria,
    ) -> anyhow::Result<()> {
        writeln!(out, "filter      {criteria}")?;
        Ok(())
    }

    fn category_cell(&self, task: &Task) -> String {
        let style = task.category.style();
        self.paint(
            &format!("{} {}", style.icon, task.category.label()),
            style.ansi,
        )
    }

    fn deadline_cell(&self, task: &Task, now: DateTime<Utc>) -> String {
        let Some(deadline) = task.deadline else {
            return String::new();
        };
        let text = format_deadline_short(deadline);
        if !task.status.is_terminal() && is_overdue(deadline, &self.tz, now) {
            self.paint(&text, "31")
        } else {
            text
        }
    }

    fn poster_cell(&self, task: &Task) -> String {
        let poster = &task.poster;
        let mut cell = format!(
            "{} {}",
            poster.poster_name,
            stars(poster.poster_trust_score)
        );
        if poster.poster_is_certified {
            cell.push_str(&self.paint(" ✓", "32"));
        }
        cell
    }

    fn status_cell(&self, status: Status) -> String {
        let code = match status {
            Status::Open => "32",
            Status::InProgress => "33",
            Status::Completed => "34",
            Status::Cancelled => "90",
        };
        self.paint(status.label(), code)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

/// Detail-dialog actions the viewer may take on `task`.
fn available_actions(task: &Task, viewer: &User) -> Vec<&'static str> {
    let mut actions = vec!["map"];
    if task.is_posted_by(viewer) {
        match task.status {
            Status::Open => actions.extend(["edit", "cancel"]),
            Status::InProgress => actions.extend(["complete", "cancel"]),
            Status::Completed | Status::Cancelled => {}
        }
    } else if task.status == Status::Open
        && (viewer.is_certified || !task.requires_certification)
    {
        actions.push("accept");
    }
    actions
}

fn stars(score: u8) -> String {
    let filled = usize::from(score.min(MAX_TRUST_SCORE));
    let empty = usize::from(MAX_TRUST_SCORE) - filled;
    format!("{}{}", "★".repeat(filled), "☆".repeat(empty))
}

fn write_table<W: Write + ?Sized>(
    writer: &mut W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths: Vec<usize> = headers.iter().map(|h| h.width()).collect();

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(strip_ansi(cell).width());
        }
    }

    let last = column_count.saturating_sub(1);
    for (idx, header) in headers.iter().enumerate() {
        let pad = widths[idx].saturating_sub(header.width());
        if idx == last {
            write!(writer, "{header}")?;
        } else {
            write!(writer, "{header}{} ", " ".repeat(pad))?;
        }
    }
    writeln!(writer)?;

    let rule = widths
        .iter()
        .map(|w| "-".repeat(*w))
        .collect::<Vec<_>>()
        .join(" ");
    writeln!(writer, "{rule}")?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            if idx == last {
                write!(writer, "{cell}")?;
            } else {
                let pad = widths[idx].saturating_sub(strip_ansi(cell).width());
                write!(writer, "{cell}{} ", " ".repeat(pad))?;
            }
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::task::{Category, EstimatedDuration, PosterSnapshot};
    use crate::user::{ProfileStore, UserId};

    fn task(deadline: &str) -> Task {
        Task {
            id: uuid::Uuid::new_v4(),
            title: "修水龍頭".to_string(),
            description: "廚房水龍頭漏水".to_string(),
            category: Category::SimpleRepair,
            reward: 400,
            location: "新北市板橋區".to_string(),
            estimated_duration: EstimatedDuration::OneHour,
            deadline: chrono::NaiveDateTime::parse_from_str(deadline, "%Y-%m-%dT%H:%M").ok(),
            requires_certification: false,
            poster: PosterSnapshot {
                poster_id: Some(UserId::new()),
                poster_name: "李太太".to_string(),
                poster_trust_score: 3,
                poster_is_certified: true,
                poster_certification_org: None,
            },
            status: Status::Open,
        }
    }

    fn viewer() -> User {
        ProfileStore::new(ProfileEdit {
            name: "王小明".to_string(),
            avatar_seed: "ming wang".to_string(),
            bio: String::new(),
            is_certified: false,
            certification_org: None,
            trust_score: 4,
        })
        .unwrap()
        .get()
        .clone()
    }

    #[test]
    fn table_columns_align_with_wide_characters() {
        let mut out = Vec::new();
        write_table(
            &mut out,
            vec!["A".to_string(), "B".to_string()],
            vec![
                vec!["家務".to_string(), "x".to_string()],
                vec!["ab".to_string(), "y".to_string()],
            ],
        )
        .unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "A    B");
        assert_eq!(lines[1], "---- -");
        assert_eq!(lines[2], "家務 x");
        assert_eq!(lines[3], "ab   y");
    }

    #[test]
    fn strip_ansi_removes_color() {
        assert_eq!(strip_ansi("\x1b[31mlate\x1b[0m"), "late");
    }

    #[test]
    fn stars_are_clamped() {
        assert_eq!(stars(3), "★★★☆☆");
        assert_eq!(stars(9), "★★★★★");
    }

    #[test]
    fn card_lists_actions_for_viewer() {
        let renderer = Renderer::plain(chrono_tz::Asia::Taipei);
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 4, 0, 0).unwrap();
        let mut out = Vec::new();
        renderer
            .write_task_card(&mut out, &task("2026-10-01T09:00"), &viewer(), now)
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("2026-10-01 09:00 (overdue)"));
        assert!(text.contains("actions     map, accept"));
        assert!(text.contains("李太太 ★★★☆☆ ✓"));
    }

    #[test]
    fn certified_tasks_offer_accept_only_to_certified_viewers() {
        let mut gated = task("2026-10-20T09:00");
        gated.requires_certification = true;

        let uncertified = viewer();
        assert_eq!(available_actions(&gated, &uncertified), vec!["map"]);

        let mut certified = uncertified.clone();
        certified.is_certified = true;
        assert_eq!(available_actions(&gated, &certified), vec!["map", "accept"]);
    }

    #[test]
    fn profile_shows_avatar_url() {
        let renderer = Renderer::plain(chrono_tz::Asia::Taipei);
        let mut out = Vec::new();
        renderer.write_profile(&mut out, &viewer(), false).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("https://picsum.photos/seed/ming%20wang/100/100"));
        assert!(text.contains("not certified"));
        assert!(!text.contains("editing:"));

        let mut out = Vec::new();
        renderer.write_profile(&mut out, &viewer(), true).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("editing: profile edit name:.."));
    }
}
