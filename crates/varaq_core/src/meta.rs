//! `meta.json` reading and normalization.
//!
//! Every key ending in `date` is promoted from its string form to a
//! timestamp. A `SHC` (or `JC`) suffix marks the value as Solar-Hijri; such
//! values are converted to the Gregorian calendar before timestamp parsing.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use varaq_jdate::jalali_to_gregorian;

use crate::model::{MetaMap, MetaValue};

static SOLAR_HIJRI_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d\d(\d\d)?)-(\d\d?)-(\d\d?)(T.*)?$").expect("valid regex"));

pub fn read_meta(path: &Path) -> Result<MetaMap> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let parsed: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(parsed
        .into_iter()
        .map(|(key, value)| {
            let value = if key.ends_with("date") {
                normalize_date(&key, &value)
            } else {
                convert(value)
            };
            (key, value)
        })
        .collect())
}

fn convert(value: serde_json::Value) -> MetaValue {
    match value {
        serde_json::Value::Null => MetaValue::Null,
        serde_json::Value::Bool(value) => MetaValue::Bool(value),
        serde_json::Value::Number(value) => match value.as_i64() {
            Some(int) => MetaValue::Int(int),
            None => MetaValue::Float(value.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(value) => MetaValue::String(value),
        serde_json::Value::Array(values) => MetaValue::Seq(values.into_iter().map(convert).collect()),
        serde_json::Value::Object(map) => MetaValue::Map(
            map.into_iter()
                .map(|(key, value)| (key, convert(value)))
                .collect(),
        ),
    }
}

fn normalize_date(key: &str, value: &serde_json::Value) -> MetaValue {
    let Some(raw) = value.as_str() else {
        log::warn!("invalid date value for `{key}`: {value}");
        return MetaValue::Null;
    };
    let (text, solar_hijri) = match raw.strip_suffix("SHC") {
        Some(rest) => (rest.to_string(), true),
        None => match raw.strip_suffix("JC") {
            Some(rest) => (rest.to_string(), true),
            None => (raw.to_string(), false),
        },
    };
    let text = if solar_hijri {
        let Some(captures) = SOLAR_HIJRI_DATE.captures(&text) else {
            log::warn!("invalid date string: `{raw}`");
            return MetaValue::Null;
        };
        let mut year: i32 = captures[1].parse().unwrap_or(0);
        if captures.get(2).is_none() {
            year += 1400;
        }
        let month: u32 = captures[3].parse().unwrap_or(0);
        let day: u32 = captures[4].parse().unwrap_or(0);
        let rest = captures.get(5).map(|m| m.as_str()).unwrap_or("");
        let ((gy, gm, gd), _) = jalali_to_gregorian(year, month, day);
        format!("{gy}-{gm:02}-{gd:02}{rest}")
    } else {
        text
    };
    match parse_iso(&text) {
        Some(timestamp) => MetaValue::Timestamp(timestamp),
        None => {
            log::warn!("invalid date string: `{raw}`");
            MetaValue::Null
        }
    }
}

/// ISO-8601 parsing as used for metadata dates and template-boundary
/// timestamp strings: a plain date or a `T`-separated date-time, seconds and
/// fractions optional.
pub fn parse_iso(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Some(parsed);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::{parse_iso, read_meta};
    use crate::model::MetaValue;
    use chrono::NaiveDate;
    use std::fs;

    fn read(contents: &str) -> crate::model::MetaMap {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("meta.json");
        fs::write(&path, contents).expect("write meta");
        read_meta(&path).expect("read meta")
    }

    fn timestamp(y: i32, m: u32, d: u32) -> MetaValue {
        MetaValue::Timestamp(
            NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        )
    }

    #[test]
    fn iso_dates_parse_directly() {
        let meta = read(r#"{"date": "2021-01-01", "title": "Home"}"#);
        assert_eq!(meta["date"], timestamp(2021, 1, 1));
        assert_eq!(meta["title"], MetaValue::String("Home".to_string()));
    }

    #[test]
    fn iso_datetime_keeps_time_suffix() {
        let meta = read(r#"{"publication_date": "2021-01-01T12:30:00"}"#);
        assert_eq!(
            meta["publication_date"],
            MetaValue::Timestamp(
                NaiveDate::from_ymd_opt(2021, 1, 1)
                    .unwrap()
                    .and_hms_opt(12, 30, 0)
                    .unwrap()
            )
        );
    }

    #[test]
    fn solar_hijri_suffix_converts_to_gregorian() {
        let meta = read(r#"{"date": "1403-1-1SHC"}"#);
        assert_eq!(meta["date"], timestamp(2024, 3, 20));
    }

    #[test]
    fn two_digit_solar_hijri_years_are_offset() {
        // 03 means 1403.
        let meta = read(r#"{"date": "03-1-1SHC"}"#);
        assert_eq!(meta["date"], timestamp(2024, 3, 20));
    }

    #[test]
    fn malformed_dates_become_null() {
        let meta = read(r#"{"date": "not-a-date", "other_date": "9-9-9SHC"}"#);
        assert_eq!(meta["date"], MetaValue::Null);
        assert_eq!(meta["other_date"], MetaValue::Null);
    }

    #[test]
    fn non_date_keys_pass_through() {
        let meta = read(r#"{"count": 3, "nested": {"date_like": false}}"#);
        assert_eq!(meta["count"], MetaValue::Int(3));
        assert!(matches!(meta["nested"], MetaValue::Map(_)));
    }

    #[test]
    fn parse_iso_accepts_date_and_datetime() {
        assert!(parse_iso("2021-01-01").is_some());
        assert!(parse_iso("2021-01-01T01:02:03").is_some());
        assert!(parse_iso("garbage").is_none());
    }
}
