use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use chrono_tz::Tz;
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::datetime::{
  DEFAULT_TIMEZONE,
  parse_timezone
};
use crate::user::ProfileEdit;

const RC_ENV_VAR: &str = "NEIGHBORRC";
const RC_FILE_NAME: &str = ".neighborrc";

const DEFAULTS: [(&str, &str); 13] = [
  ("seed.source", "auto"),
  ("gemini.model", "gemini-2.5-flash"),
  (
    "gemini.endpoint",
    "https://generativelanguage.googleapis.com/v1beta"
  ),
  ("gemini.api_key_env", "API_KEY"),
  ("gemini.timeout", "30"),
  ("color", "on"),
  ("timezone", DEFAULT_TIMEZONE),
  ("profile.name", "王小明"),
  ("profile.avatar_seed", "ming-wang"),
  (
    "profile.bio",
    "我是一位熱心的退休教師，喜歡幫助鄰居解決生活中的大小事。"
  ),
  ("profile.trust_score", "5"),
  ("profile.certified", "yes"),
  (
    "profile.certification_org",
    "衛生福利部社會及家庭署"
  )
];

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    Self::with_defaults()
  }
}

impl Config {
  pub fn with_defaults() -> Self {
    let map = DEFAULTS
      .iter()
      .map(|(k, v)| {
        (k.to_string(), v.to_string())
      })
      .collect();
    Self {
      map,
      loaded_files: vec![]
    }
  }

  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Self::with_defaults();

    let rc = resolve_rc_path(rc_override)?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading neighborrc");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no neighborrc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  pub fn get_u64(
    &self,
    key: &str
  ) -> anyhow::Result<Option<u64>> {
    self
      .map
      .get(key)
      .map(|v| {
        v.trim().parse::<u64>().with_context(
          || {
            format!(
              "config {key} must be a \
               non-negative integer, got \
               {v:?}"
            )
          }
        )
      })
      .transpose()
  }

  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    self.map.iter()
  }

  pub fn timezone(
    &self
  ) -> anyhow::Result<Tz> {
    let raw = self
      .get("timezone")
      .unwrap_or_else(|| {
        DEFAULT_TIMEZONE.to_string()
      });
    parse_timezone(&raw)
      .context("invalid timezone setting")
  }

  /// The profile the session starts with, from the `profile.*` keys.
  pub fn initial_profile(
    &self
  ) -> anyhow::Result<ProfileEdit> {
    let trust_score = self
      .get_u64("profile.trust_score")?
      .unwrap_or(5);
    let trust_score =
      u8::try_from(trust_score)
        .map_err(|_| {
          anyhow!(
            "profile.trust_score out of \
             range: {trust_score}"
          )
        })?;

    Ok(ProfileEdit {
      name: self
        .get("profile.name")
        .unwrap_or_default(),
      avatar_seed: self
        .get("profile.avatar_seed")
        .unwrap_or_default(),
      bio: self
        .get("profile.bio")
        .unwrap_or_default(),
      is_certified: self
        .get_bool("profile.certified")
        .unwrap_or(false),
      certification_org: self
        .get(
          "profile.certification_org"
        )
        .filter(|v| !v.trim().is_empty()),
      trust_score
    })
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if line.is_empty()
        || line.starts_with('#')
      {
        continue;
      }

      if let Some((before, _)) =
        line.split_once('#')
      {
        line = before.trim();
      }

      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping neighborrc"
    );
    return Ok(None);
  };
  let candidate = home.join(RC_FILE_NAME);
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

pub(crate) fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

pub(crate) fn parse_bool(
  s: &str
) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}

#[cfg(test)]
mod tests {
  use std::fs;

  use tempfile::tempdir;

  use super::*;

  #[test]
  fn file_values_and_includes_override_defaults()
   {
    let temp = tempdir().unwrap();
    let extra = temp.path().join("extra.rc");
    fs::write(
      &extra,
      "profile.trust_score = 3\n"
    )
    .unwrap();

    let main = temp.path().join("main.rc");
    fs::write(
      &main,
      "# local overrides\n\
       seed.source = mock   # no network\n\
       profile.name = Hua\n\
       include extra.rc\n\
       include missing.rc\n"
    )
    .unwrap();

    let cfg =
      Config::load(Some(&main)).unwrap();
    assert_eq!(
      cfg.get("seed.source").as_deref(),
      Some("mock")
    );
    assert_eq!(cfg.loaded_files.len(), 2);

    let profile =
      cfg.initial_profile().unwrap();
    assert_eq!(profile.name, "Hua");
    assert_eq!(profile.trust_score, 3);
    assert!(profile.is_certified);
  }

  #[test]
  fn malformed_line_is_an_error() {
    let temp = tempdir().unwrap();
    let main = temp.path().join("bad.rc");
    fs::write(&main, "just words\n")
      .unwrap();
    let err = Config::load(Some(&main))
      .unwrap_err();
    assert!(
      err
        .to_string()
        .contains("invalid config line")
    );
  }

  #[test]
  fn overrides_strip_rc_prefix() {
    let mut cfg = Config::with_defaults();
    cfg.apply_overrides([
      (
        "rc.timezone".to_string(),
        "UTC".to_string()
      ),
      (
        "gemini.timeout".to_string(),
        "0".to_string()
      ),
    ]);
    assert_eq!(
      cfg.timezone().unwrap(),
      chrono_tz::UTC
    );
    assert_eq!(
      cfg.get_u64("gemini.timeout")
        .unwrap(),
      Some(0)
    );

    cfg.apply_overrides([(
      "profile.trust_score".to_string(),
      "lots".to_string()
    )]);
    assert!(
      cfg.initial_profile().is_err()
    );
  }
}
