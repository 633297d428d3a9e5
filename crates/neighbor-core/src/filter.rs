use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use tracing::trace;

use crate::task::{
  Category,
  Status,
  Task
};
use crate::user::{
  MAX_TRUST_SCORE,
  MIN_TRUST_SCORE,
  User
};

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum CertificationFilter {
  Any,
  Required,
  NotRequired
}

impl CertificationFilter {
  fn admits(
    self,
    requires_certification: bool
  ) -> bool {
    match self {
      | CertificationFilter::Any => true,
      | CertificationFilter::Required => {
        requires_certification
      }
      | CertificationFilter::NotRequired => {
        !requires_certification
      }
    }
  }
}

impl FromStr for CertificationFilter {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "any" | "all" => Ok(Self::Any),
      | "required" | "yes" => {
        Ok(Self::Required)
      }
      | "not-required" | "no" => {
        Ok(Self::NotRequired)
      }
      | other => Err(anyhow!(
        "unknown certification filter: \
         {other}"
      ))
    }
  }
}

impl fmt::Display for CertificationFilter {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(match self {
      | CertificationFilter::Any => "any",
      | CertificationFilter::Required => {
        "required"
      }
      | CertificationFilter::NotRequired => {
        "not-required"
      }
    })
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum SortOrder {
  Insertion,
  RewardAscending,
  RewardDescending
}

impl FromStr for SortOrder {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "insertion" | "default" => {
        Ok(Self::Insertion)
      }
      | "reward-asc" | "asc" => {
        Ok(Self::RewardAscending)
      }
      | "reward-desc" | "desc" => {
        Ok(Self::RewardDescending)
      }
      | other => Err(anyhow!(
        "unknown sort order: {other}"
      ))
    }
  }
}

impl fmt::Display for SortOrder {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(match self {
      | SortOrder::Insertion => {
        "insertion"
      }
      | SortOrder::RewardAscending => {
        "reward-asc"
      }
      | SortOrder::RewardDescending => {
        "reward-desc"
      }
    })
  }
}

/// What the task list is currently narrowed to. `category: None` means
/// every category.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct Criteria {
  pub category:        Option<Category>,
  pub min_trust_score: u8,
  pub certification:   CertificationFilter,
  pub sort:            SortOrder
}

impl Default for Criteria {
  fn default() -> Self {
    Self {
      category:        None,
      min_trust_score: MIN_TRUST_SCORE,
      certification:
        CertificationFilter::Any,
      sort:            SortOrder::Insertion
    }
  }
}

impl fmt::Display for Criteria {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    write!(
      f,
      "category:{} trust:{} cert:{} \
       sort:{}",
      self
        .category
        .map(Category::slug)
        .unwrap_or("any"),
      self.min_trust_score,
      self.certification,
      self.sort
    )
  }
}

impl Criteria {
  pub fn matches(
    &self,
    task: &Task
  ) -> bool {
    let category_match =
      self.category.is_none_or(|c| {
        task.category == c
      });
    let trust_match = task
      .poster
      .poster_trust_score
      >= self.min_trust_score;
    let cert_match =
      self.certification.admits(
        task.requires_certification
      );

    category_match
      && trust_match
      && cert_match
  }

  /// Filters then orders `tasks` without touching them. Reward sorts are
  /// stable, so equal rewards keep their store order.
  #[tracing::instrument(skip(
    self, tasks
  ))]
  pub fn apply<'a>(
    &self,
    tasks: &'a [Task]
  ) -> Vec<&'a Task> {
    let mut out: Vec<&Task> = tasks
      .iter()
      .filter(|task| self.matches(task))
      .collect();

    match self.sort {
      | SortOrder::Insertion => {}
      | SortOrder::RewardAscending => {
        out.sort_by_key(|t| t.reward)
      }
      | SortOrder::RewardDescending => {
        out.sort_by(|a, b| {
          b.reward.cmp(&a.reward)
        })
      }
    }

    trace!(
      total = tasks.len(),
      shown = out.len(),
      "applied criteria"
    );
    out
  }

  /// Applies `key:value` tokens on top of the current criteria. Nothing
  /// changes unless every token parses.
  pub fn apply_tokens(
    &mut self,
    tokens: &[String]
  ) -> anyhow::Result<()> {
    let mut next = *self;

    for token in tokens {
      let (key, value) = token
        .split_once(':')
        .ok_or_else(|| {
          anyhow!(
            "expected key:value, got \
             {token:?}"
          )
        })?;

      match key {
        | "category" | "cat" => {
          next.category = if value
            .eq_ignore_ascii_case("any")
            || value
              .eq_ignore_ascii_case("all")
          {
            None
          } else {
            Some(value.parse()?)
          };
        }
        | "trust" => {
          let score: u8 = value
            .parse()
            .map_err(|_| {
              anyhow!(
                "trust must be a number, \
                 got {value:?}"
              )
            })?;
          if !(MIN_TRUST_SCORE
            ..=MAX_TRUST_SCORE)
            .contains(&score)
          {
            return Err(anyhow!(
              "trust must be between \
               {MIN_TRUST_SCORE} and \
               {MAX_TRUST_SCORE}"
            ));
          }
          next.min_trust_score = score;
        }
        | "cert" => {
          next.certification =
            value.parse()?;
        }
        | "sort" => {
          next.sort = value.parse()?;
        }
        | other => {
          return Err(anyhow!(
            "unknown filter key: {other}"
          ));
        }
      }
    }

    *self = next;
    Ok(())
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum HistoryTab {
  Completed,
  Cancelled
}

impl HistoryTab {
  fn status(self) -> Status {
    match self {
      | HistoryTab::Completed => {
        Status::Completed
      }
      | HistoryTab::Cancelled => {
        Status::Cancelled
      }
    }
  }
}

impl FromStr for HistoryTab {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "completed" | "done" => {
        Ok(Self::Completed)
      }
      | "cancelled" | "canceled" => {
        Ok(Self::Cancelled)
      }
      | other => Err(anyhow!(
        "unknown history tab: {other}"
      ))
    }
  }
}

impl fmt::Display for HistoryTab {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(match self {
      | HistoryTab::Completed => {
        "completed"
      }
      | HistoryTab::Cancelled => {
        "cancelled"
      }
    })
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct HistoryCounts {
  pub completed: usize,
  pub cancelled: usize
}

/// Tasks the user posted that ended up in `tab`'s terminal status.
pub fn history<'a>(
  tasks: &'a [Task],
  user: &User,
  tab: HistoryTab
) -> Vec<&'a Task> {
  let wanted = tab.status();
  tasks
    .iter()
    .filter(|t| {
      t.is_posted_by(user)
        && t.status == wanted
    })
    .collect()
}

pub fn history_counts(
  tasks: &[Task],
  user: &User
) -> HistoryCounts {
  HistoryCounts {
    completed: history(
      tasks,
      user,
      HistoryTab::Completed
    )
    .len(),
    cancelled: history(
      tasks,
      user,
      HistoryTab::Cancelled
    )
    .len()
  }
}
