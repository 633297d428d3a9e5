use std::collections::BTreeMap;
use std::io::{BufRead, Write};

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::app::AppState;
use crate::config::{Config, parse_bool};
use crate::datetime::parse_deadline;
use crate::dialog::Dialog;
use crate::filter::{Criteria, HistoryTab};
use crate::render::Renderer;
use crate::seed::{load_initial_tasks, seeder_from_config};
use crate::task::{SHORT_ID_LEN, Task, TaskDraft, TaskId};
use crate::user::ProfileEdit;

const PROMPT: &str = "neighbor> ";

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "help", "list", "filter", "show", "close", "map", "post", "edit", "submit", "accept",
        "cancel", "complete", "profile", "history", "reload", "status", "config", "quit", "exit",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Everything one shell session works on.
pub struct Shell {
    pub app: AppState,
    cfg: Config,
    renderer: Renderer,
    runtime: tokio::runtime::Runtime,
    /// Field values of the open task form, kept between `submit` attempts.
    draft: TaskDraft,
}

impl Shell {
    pub fn new(cfg: Config, renderer: Renderer) -> anyhow::Result<Self> {
        let profile = cfg.initial_profile()?;
        let app = AppState::new(profile).context("invalid profile.* settings")?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start async runtime")?;

        Ok(Self {
            app,
            cfg,
            renderer,
            runtime,
            draft: TaskDraft::default(),
        })
    }

    /// Runs the configured seeder once and replaces the task list with the
    /// result (or the mock dataset on failure).
    #[instrument(skip(self))]
    pub fn reseed(&mut self) -> anyhow::Result<()> {
        let seeder = seeder_from_config(&self.cfg)?;
        let outcome = self
            .runtime
            .block_on(load_initial_tasks(seeder.as_deref()));
        self.app.admit(outcome);
        Ok(())
    }
}

/// Splits a shell line on whitespace. Double quotes group words and
/// backslash escapes the next character inside quotes.
pub fn split_command_line(line: &str) -> anyhow::Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;
    let mut chars = line.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            '\\' if quoted => {
                let next = chars
                    .next()
                    .ok_or_else(|| anyhow!("dangling escape at end of line"))?;
                current.push(next);
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if quoted {
        return Err(anyhow!("unterminated quote"));
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

#[instrument(skip_all)]
pub fn execute_line<W: Write + ?Sized>(
    shell: &mut Shell,
    out: &mut W,
    line: &str,
) -> anyhow::Result<Flow> {
    let tokens = split_command_line(line)?;
    let Some((first, args)) = tokens.split_first() else {
        return Ok(Flow::Continue);
    };

    let known = known_command_names();
    let command = expand_command_abbrev(first, &known)
        .ok_or_else(|| anyhow!("unknown or ambiguous command: {first} (try help)"))?;
    dispatch(shell, out, command, args)
}

/// Reads commands until EOF or `quit`. Command errors are reported and the
/// loop carries on.
pub fn run_repl<R, W, E>(
    shell: &mut Shell,
    mut input: R,
    out: &mut W,
    err: &mut E,
    prompt: bool,
) -> anyhow::Result<()>
where
    R: BufRead,
    W: Write + ?Sized,
    E: Write + ?Sized,
{
    info!("interactive shell started");
    let mut line = String::new();
    loop {
        if prompt {
            write!(out, "{PROMPT}")?;
            out.flush()?;
        }

        line.clear();
        if input.read_line(&mut line).context("failed reading input")? == 0 {
            break;
        }

        match execute_line(shell, out, line.trim_end()) {
            Ok(Flow::Quit) => break,
            Ok(Flow::Continue) => {}
            Err(e) => {
                warn!(error = %e, "command failed");
                writeln!(err, "error: {e:#}")?;
            }
        }
    }
    info!("interactive shell finished");
    Ok(())
}

#[instrument(skip(shell, out, args))]
pub fn dispatch<W: Write + ?Sized>(
    shell: &mut Shell,
    out: &mut W,
    command: &str,
    args: &[String],
) -> anyhow::Result<Flow> {
    let now = Utc::now();
    debug!(command, ?args, "dispatching command");

    match command {
        "help" => cmd_help(out)?,
        "list" => cmd_list(shell, out, args, now)?,
        "filter" => cmd_filter(shell, out, args, now)?,
        "show" => cmd_show(shell, out, args, now)?,
        "close" => cmd_close(shell, out, args)?,
        "map" => cmd_map(shell, out, args)?,
        "post" => cmd_post(shell, out, args, now)?,
        "edit" => cmd_edit(shell, out, args, now)?,
        "submit" => cmd_submit(shell, out, args, now)?,
        "accept" => cmd_accept(shell, out, args)?,
        "cancel" => cmd_cancel(shell, out, args)?,
        "complete" => cmd_complete(shell, out, args)?,
        "profile" => cmd_profile(shell, out, args)?,
        "history" => cmd_history(shell, out, args, now)?,
        "reload" => cmd_reload(shell, out)?,
        "status" => shell.renderer.write_status(out, &shell.app)?,
        "config" => cmd_config(shell, out)?,
        "quit" | "exit" => return Ok(Flow::Quit),
        other => return Err(anyhow!("unknown command: {other}")),
    }
    Ok(Flow::Continue)
}

fn cmd_list<W: Write + ?Sized>(
    shell: &Shell,
    out: &mut W,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let mut criteria = shell.app.criteria;
    criteria.apply_tokens(args)?;
    write_listing(shell, out, &criteria, now)
}

fn cmd_filter<W: Write + ?Sized>(
    shell: &mut Shell,
    out: &mut W,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    match args {
        [] => {}
        [reset] if reset == "reset" => shell.app.criteria = Criteria::default(),
        tokens => shell.app.criteria.apply_tokens(tokens)?,
    }
    let criteria = shell.app.criteria;
    write_listing(shell, out, &criteria, now)
}

fn write_listing<W: Write + ?Sized>(
    shell: &Shell,
    out: &mut W,
    criteria: &Criteria,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let tasks = criteria.apply(shell.app.tasks.list());
    shell.renderer.write_criteria(out, criteria)?;
    shell.renderer.write_task_table(out, &tasks, now)
}

fn cmd_show<W: Write + ?Sized>(
    shell: &mut Shell,
    out: &mut W,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let token = args
        .first()
        .ok_or_else(|| anyhow!("usage: show <id>"))?;
    let id = resolve_task(&shell.app, token)?;
    shell.app.select_task(id)?;
    let task = shell.app.tasks.get(id)?;
    shell
        .renderer
        .write_task_card(out, task, shell.app.user(), now)
}

fn cmd_close<W: Write + ?Sized>(
    shell: &mut Shell,
    out: &mut W,
    args: &[String],
) -> anyhow::Result<()> {
    let dialogs = &mut shell.app.dialogs;
    match args.first().map(String::as_str) {
        Some("map") => dialogs.close_map(),
        Some(other) => return Err(anyhow!("usage: close [map], got {other}")),
        None => dialogs.close_top(),
    }
    writeln!(out, "open: {}", dialogs.primary().name())?;
    Ok(())
}

fn cmd_map<W: Write + ?Sized>(
    shell: &mut Shell,
    out: &mut W,
    args: &[String],
) -> anyhow::Result<()> {
    let location = match args {
        [] => {
            let id = shell
                .app
                .dialogs
                .detail_task()
                .ok_or_else(|| anyhow!("usage: map <id|location>, or open a task with show"))?;
            shell.app.show_map_for(id)?
        }
        // Short words like "cafe" are hex too, so only id-length tokens are
        // looked up as tasks.
        [token] if token.len() >= SHORT_ID_LEN && shell.app.tasks.resolve(token).is_some() => {
            let id = resolve_task(&shell.app, token)?;
            shell.app.show_map_for(id)?
        }
        words => {
            let location = words.join(" ");
            shell.app.dialogs.show_map(location.clone());
            location
        }
    };
    shell.renderer.write_map(out, &location)
}

fn cmd_post<W: Write + ?Sized>(
    shell: &mut Shell,
    out: &mut W,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    shell.app.open_create();
    shell.draft = TaskDraft::default();
    if args.is_empty() {
        return shell.renderer.write_task_form(out, &shell.draft, false);
    }
    cmd_submit(shell, out, args, now)
}

fn cmd_edit<W: Write + ?Sized>(
    shell: &mut Shell,
    out: &mut W,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let (id, fields) = match args.split_first() {
        Some((first, rest)) if !first.contains(':') => (resolve_task(&shell.app, first)?, rest),
        _ => (target_task(&shell.app, &[])?, args),
    };

    shell.draft = shell.app.open_edit(id)?;
    if fields.is_empty() {
        return shell.renderer.write_task_form(out, &shell.draft, true);
    }
    cmd_submit(shell, out, fields, now)
}

#[instrument(skip_all)]
fn cmd_submit<W: Write + ?Sized>(
    shell: &mut Shell,
    out: &mut W,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let editing = shell
        .app
        .dialogs
        .task_form()
        .ok_or_else(|| anyhow!("no task form is open; use post or edit first"))?;

    let mut draft = shell.draft.clone();
    apply_task_fields(&mut draft, args, &shell.renderer, now)?;
    shell.draft = draft;

    let result = shell
        .app
        .submit_task_form(&shell.draft)
        .ok_or_else(|| anyhow!("no task form is open"))?;
    let task =
        result.context("form kept open; correct it with submit key:value or close to discard")?;

    let verb = if editing.is_some() { "updated" } else { "posted" };
    info!(task_id = %task.id, verb, "task saved");
    write_task_line(out, verb, &task)
}

fn cmd_accept<W: Write + ?Sized>(
    shell: &mut Shell,
    out: &mut W,
    args: &[String],
) -> anyhow::Result<()> {
    let id = target_task(&shell.app, args)?;
    let task = shell.app.accept_task(id)?;
    write_task_line(out, "accepted", &task)
}

fn cmd_cancel<W: Write + ?Sized>(
    shell: &mut Shell,
    out: &mut W,
    args: &[String],
) -> anyhow::Result<()> {
    let id = target_task(&shell.app, args)?;
    let task = shell.app.cancel_task(id)?;
    write_task_line(out, "cancelled", &task)
}

fn cmd_complete<W: Write + ?Sized>(
    shell: &mut Shell,
    out: &mut W,
    args: &[String],
) -> anyhow::Result<()> {
    let id = target_task(&shell.app, args)?;
    let task = shell.app.complete_task(id)?;
    write_task_line(out, "completed", &task)
}

fn cmd_profile<W: Write + ?Sized>(
    shell: &mut Shell,
    out: &mut W,
    args: &[String],
) -> anyhow::Result<()> {
    match args.split_first() {
        None => {
            shell.app.open_profile();
            shell
                .renderer
                .write_profile(out, shell.app.user(), profile_editing(&shell.app))
        }
        Some((sub, fields)) if sub == "edit" => {
            let mut edit = shell.app.start_profile_edit();
            if fields.is_empty() {
                shell
                    .renderer
                    .write_profile(out, shell.app.user(), profile_editing(&shell.app))?;
                return shell.renderer.write_profile_form(out, &edit);
            }
            apply_profile_fields(&mut edit, fields)?;
            shell
                .app
                .update_profile(edit)
                .context("profile not saved")?;
            shell
                .renderer
                .write_profile(out, shell.app.user(), profile_editing(&shell.app))
        }
        Some((other, _)) => Err(anyhow!("usage: profile [edit key:value ...], got {other}")),
    }
}

fn cmd_history<W: Write + ?Sized>(
    shell: &mut Shell,
    out: &mut W,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let tab = args
        .first()
        .map(|raw| raw.parse::<HistoryTab>())
        .transpose()?
        .unwrap_or(HistoryTab::Completed);
    shell.app.open_history(tab);
    let view = shell.app.history_view(tab);
    shell.renderer.write_history(out, &view, now)
}

fn cmd_reload<W: Write + ?Sized>(shell: &mut Shell, out: &mut W) -> anyhow::Result<()> {
    shell.reseed()?;
    let source = shell
        .app
        .seed_source
        .map(|s| s.to_string())
        .unwrap_or_default();
    writeln!(out, "loaded {} tasks ({source})", shell.app.tasks.len())?;
    if let Some(message) = &shell.app.load_error {
        writeln!(out, "{message}")?;
    }
    Ok(())
}

fn cmd_config<W: Write + ?Sized>(shell: &Shell, out: &mut W) -> anyhow::Result<()> {
    let sorted: BTreeMap<_, _> = shell.cfg.iter().collect();
    for (k, v) in sorted {
        writeln!(out, "{k}={v}")?;
    }
    Ok(())
}

fn cmd_help<W: Write + ?Sized>(out: &mut W) -> anyhow::Result<()> {
    writeln!(
        out,
        "\
list [category:.. trust:.. cert:.. sort:..]   show tasks (filter not saved)
filter <tokens>|reset                          change the saved filter
show <id>                                      open task detail
map [<id>|<location>]                          show a map link
close [map]                                    close the top dialog
post [key:value ...]                           open the post form
edit [<id>] [key:value ...]                    edit your own open task
submit key:value ...                           fill in and submit the open form
accept|cancel|complete [<id>]                  change a task's status
profile [edit key:value ...]                   view or edit your profile
history [completed|cancelled]                  tasks you posted that finished
reload                                         fetch tasks again
status | config | help | quit

form keys: title desc category reward location duration deadline cert
profile keys: name avatar bio trust certified org
ids may be shortened to any unique prefix; quote values with spaces"
    )?;
    Ok(())
}

fn profile_editing(app: &AppState) -> bool {
    matches!(app.dialogs.primary(), Dialog::Profile { editing: true })
}

fn write_task_line<W: Write + ?Sized>(out: &mut W, verb: &str, task: &Task) -> anyhow::Result<()> {
    writeln!(
        out,
        "{verb} task {} {} ({})",
        task.short_id(),
        task.title,
        task.status
    )?;
    Ok(())
}

fn resolve_task(app: &AppState, token: &str) -> anyhow::Result<TaskId> {
    app.tasks
        .resolve(token)
        .ok_or_else(|| anyhow!("no single task matches id {token:?}"))
}

/// The task named by the first argument, or the one open in the detail
/// dialog.
fn target_task(app: &AppState, args: &[String]) -> anyhow::Result<TaskId> {
    match args.first() {
        Some(token) => resolve_task(app, token),
        None => app
            .dialogs
            .detail_task()
            .ok_or_else(|| anyhow!("which task? give an id or open one with show")),
    }
}

fn split_field(token: &str) -> anyhow::Result<(String, &str)> {
    let (key, value) = token
        .split_once(':')
        .ok_or_else(|| anyhow!("expected key:value, got {token:?}"))?;
    Ok((key.trim().to_ascii_lowercase(), value))
}

fn apply_task_fields(
    draft: &mut TaskDraft,
    args: &[String],
    renderer: &Renderer,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    for token in args {
        let (key, value) = split_field(token)?;
        match key.as_str() {
            "title" => draft.title = value.to_string(),
            "desc" | "description" => draft.description = value.to_string(),
            "category" | "cat" => draft.category = value.parse()?,
            "reward" => draft.reward = value.to_string(),
            "location" | "loc" => draft.location = value.to_string(),
            "duration" => draft.estimated_duration = value.parse()?,
            "deadline" => {
                draft.deadline = match value.trim() {
                    "" | "none" => None,
                    raw => Some(parse_deadline(raw, &renderer.tz(), now)?),
                }
            }
            "cert" | "certification" => draft.requires_certification = parse_bool(value),
            other => return Err(anyhow!("unknown form key: {other}")),
        }
    }
    Ok(())
}

fn apply_profile_fields(edit: &mut ProfileEdit, args: &[String]) -> anyhow::Result<()> {
    for token in args {
        let (key, value) = split_field(token)?;
        match key.as_str() {
            "name" => edit.name = value.to_string(),
            "avatar" | "avatar_seed" => edit.avatar_seed = value.trim().to_string(),
            "bio" => edit.bio = value.to_string(),
            "trust" => {
                edit.trust_score = value
                    .trim()
                    .parse()
                    .with_context(|| format!("trust must be a number, got {value:?}"))?
            }
            "certified" | "cert" => edit.is_certified = parse_bool(value),
            "org" => {
                edit.certification_org =
                    Some(value.trim().to_string()).filter(|org| !org.is_empty())
            }
            other => return Err(anyhow!("unknown profile key: {other}")),
        }
    }
    Ok(())
}
