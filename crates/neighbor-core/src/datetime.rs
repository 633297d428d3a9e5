use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  NaiveDate,
  NaiveDateTime,
  TimeDelta,
  Timelike,
  Utc
};
use chrono_tz::Tz;
use regex::Regex;

pub const DEADLINE_FORMAT: &str =
  "%Y-%m-%dT%H:%M";
pub const DEFAULT_TIMEZONE: &str =
  "Asia/Taipei";

const ACCEPTED_FORMATS: [&str; 4] = [
  "%Y-%m-%dT%H:%M",
  "%Y-%m-%dT%H:%M:%S",
  "%Y-%m-%d %H:%M",
  "%Y-%m-%d %H:%M:%S"
];

pub fn parse_timezone(
  raw: &str
) -> anyhow::Result<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return Err(anyhow!(
      "timezone must not be empty"
    ));
  }

  trimmed.parse::<Tz>().map_err(|e| {
    anyhow!(
      "invalid timezone {trimmed:?}: \
       {e}"
    )
  })
}

#[must_use]
pub fn local_now(
  tz: &Tz,
  now: DateTime<Utc>
) -> NaiveDateTime {
  now.with_timezone(tz).naive_local()
}

/// Parses a deadline typed by the user. Accepts the wire format
/// (`YYYY-MM-DDTHH:mm`), a space separated variant, a bare date (end of
/// that day) and relative offsets like `+2d`, `+3h` or `+45m`.
#[tracing::instrument(skip(tz, now))]
pub fn parse_deadline(
  raw: &str,
  tz: &Tz,
  now: DateTime<Utc>
) -> anyhow::Result<NaiveDateTime> {
  let token = raw.trim();
  if token.is_empty() {
    return Err(anyhow!(
      "deadline must not be empty"
    ));
  }

  for fmt in ACCEPTED_FORMATS {
    if let Ok(parsed) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return Ok(parsed);
    }
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return date
      .and_hms_opt(23, 59, 0)
      .ok_or_else(|| {
        anyhow!(
          "failed to construct end of \
           day for {token}"
        )
      });
  }

  let rel_re = Regex::new(r"^\+(?P<num>\d+)(?P<unit>[dhm])$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

  if let Some(caps) =
    rel_re.captures(token)
  {
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!(
          "missing relative amount"
        )
      })?
      .parse()
      .context(
        "invalid relative number"
      )?;
    let unit = caps
      .name("unit")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative unit")
      })?;

    let offset = match unit {
      | "d" => TimeDelta::try_days(num),
      | "h" => TimeDelta::try_hours(num),
      | "m" => TimeDelta::try_minutes(num),
      | other => {
        return Err(anyhow!(
          "unknown relative unit: \
           {other}"
        ));
      }
    };

    let shifted = offset
      .and_then(|offset| {
        local_now(tz, now)
          .checked_add_signed(offset)
      })
      .ok_or_else(|| {
        anyhow!(
          "relative deadline out of \
           range"
        )
      })?;
    return truncate_to_minute(shifted);
  }

  Err(anyhow!(
    "unrecognized deadline {token:?} \
     (use YYYY-MM-DDTHH:mm or +Nd/+Nh/+Nm)"
  ))
}

fn truncate_to_minute(
  dt: NaiveDateTime
) -> anyhow::Result<NaiveDateTime> {
  dt.with_second(0)
    .and_then(|d| d.with_nanosecond(0))
    .ok_or_else(|| {
      anyhow!(
        "failed to truncate {dt} to \
         minutes"
      )
    })
}

#[must_use]
pub fn is_overdue(
  deadline: NaiveDateTime,
  tz: &Tz,
  now: DateTime<Utc>
) -> bool {
  deadline < local_now(tz, now)
}

#[must_use]
pub fn format_deadline_short(
  deadline: NaiveDateTime
) -> String {
  deadline
    .format("%m/%d %H:%M")
    .to_string()
}

#[must_use]
pub fn format_deadline_long(
  deadline: NaiveDateTime
) -> String {
  deadline
    .format("%Y-%m-%d %H:%M")
    .to_string()
}

pub mod deadline_serde {
  pub mod option {
    use chrono::NaiveDateTime;
    use serde::{
      Deserialize,
      Deserializer,
      Serializer
    };

    use super::super::{
      ACCEPTED_FORMATS,
      DEADLINE_FORMAT
    };

    pub fn serialize<S>(
      dt: &Option<NaiveDateTime>,
      serializer: S
    ) -> Result<S::Ok, S::Error>
    where
      S: Serializer
    {
      match dt {
        | Some(value) => {
          serializer.serialize_some(
            &value
              .format(DEADLINE_FORMAT)
              .to_string()
          )
        }
        | None => {
          serializer.serialize_none()
        }
      }
    }

    pub fn deserialize<'de, D>(
      deserializer: D
    ) -> Result<Option<NaiveDateTime>, D::Error>
    where
      D: Deserializer<'de>
    {
      let raw = Option::<String>::deserialize(
        deserializer
      )?;
      let Some(raw) = raw else {
        return Ok(None);
      };
      let trimmed = raw.trim();
      if trimmed.is_empty() {
        return Ok(None);
      }

      ACCEPTED_FORMATS
        .iter()
        .find_map(|fmt| {
          NaiveDateTime::parse_from_str(
            trimmed, fmt
          )
          .ok()
        })
        .map(Some)
        .ok_or_else(|| {
          serde::de::Error::custom(
            format!(
              "invalid deadline \
               {trimmed:?}"
            )
          )
        })
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    TimeZone,
    Utc
  };

  use super::*;

  fn taipei() -> Tz {
    parse_timezone(DEFAULT_TIMEZONE)
      .unwrap()
  }

  #[test]
  fn absolute_forms_parse_to_wall_clock()
  {
    let now = Utc
      .with_ymd_and_hms(
        2026, 10, 16, 4, 0, 0
      )
      .unwrap();
    let tz = taipei();

    let a = parse_deadline(
      "2026-10-20T18:30",
      &tz,
      now
    )
    .unwrap();
    let b = parse_deadline(
      "2026-10-20 18:30",
      &tz,
      now
    )
    .unwrap();
    assert_eq!(a, b);
    assert_eq!(
      format_deadline_long(a),
      "2026-10-20 18:30"
    );

    let day = parse_deadline(
      "2026-10-20",
      &tz,
      now
    )
    .unwrap();
    assert_eq!(
      format_deadline_short(day),
      "10/20 23:59"
    );
  }

  #[test]
  fn relative_forms_use_local_now() {
    // 04:00 UTC is 12:00 in Taipei.
    let now = Utc
      .with_ymd_and_hms(
        2026, 10, 16, 4, 0, 30
      )
      .unwrap();
    let tz = taipei();

    let in_two_hours =
      parse_deadline("+2h", &tz, now)
        .unwrap();
    assert_eq!(
      format_deadline_long(
        in_two_hours
      ),
      "2026-10-16 14:00"
    );

    let tomorrow =
      parse_deadline("+1d", &tz, now)
        .unwrap();
    assert!(!is_overdue(
      tomorrow, &tz, now
    ));
    assert!(
      parse_deadline("-1d", &tz, now)
        .is_err()
    );
    assert!(
      parse_deadline("soon", &tz, now)
        .is_err()
    );
  }

  #[test]
  fn huge_relative_offsets_are_errors() {
    let now = Utc
      .with_ymd_and_hms(
        2026, 10, 16, 4, 0, 0
      )
      .unwrap();
    let tz = taipei();

    for raw in [
      "+99999999999999d",
      "+99999999999999h",
      "+9223372036854775807m",
      "+999999999d"
    ] {
      let err =
        parse_deadline(raw, &tz, now)
          .unwrap_err();
      assert!(
        err
          .to_string()
          .contains("out of range"),
        "{raw}: {err}"
      );
    }
    assert!(
      parse_deadline(
        "+99999999999999999999d",
        &tz,
        now
      )
      .is_err()
    );
  }

  #[test]
  fn serde_accepts_blank_and_seconds() {
    #[derive(serde::Deserialize)]
    struct Wrap {
      #[serde(
        default,
        with = "deadline_serde::option"
      )]
      deadline: Option<NaiveDateTime>
    }

    let blank: Wrap = serde_json::from_str(
      r#"{"deadline": ""}"#
    )
    .unwrap();
    assert!(blank.deadline.is_none());

    let missing: Wrap =
      serde_json::from_str("{}")
        .unwrap();
    assert!(missing.deadline.is_none());

    let with_secs: Wrap =
      serde_json::from_str(
        r#"{"deadline": "2026-11-01T09:00:00"}"#
      )
      .unwrap();
    assert_eq!(
      with_secs
        .deadline
        .map(format_deadline_long),
      Some("2026-11-01 09:00".to_string())
    );
  }
}
