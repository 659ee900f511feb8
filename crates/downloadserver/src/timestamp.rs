// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversions between the textual forms of a data generation's timestamp.
//!
//! A timestamp is epoch milliseconds, written either *bare* (`1655832359111`)
//! or *full* (`2022/1655832359111`), where the leading segment is the UTC year
//! of the epoch. Blob store keys use the full form; update checks use the bare one.

use std::time::{SystemTime, UNIX_EPOCH};

use time::OffsetDateTime;

/// Neither a value nor its fallback could be read as epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("timestamp {value:?} and its fallback {fallback:?} are both invalid")]
pub struct TimestampError {
    pub value: String,
    pub fallback: Option<String>,
}

/// True if `s` is of the form `yyyy/epochMs`.
pub fn is_full_form(s: &str) -> bool {
    s.find('/') == Some(4)
}

/// Parses `value` (bare or full) as epoch milliseconds, trying `fallback` if it fails.
pub fn to_bare(value: &str, fallback: Option<&str>) -> Result<u64, TimestampError> {
    parse_bare(value)
        .or_else(|| fallback.and_then(parse_bare))
        .ok_or_else(|| TimestampError {
            value: value.to_owned(),
            fallback: fallback.map(str::to_owned),
        })
}

/// Returns `value` in its full form, using `fallback` if `value` isn't a number.
///
/// A `value` already in full form is returned unchanged. `None` means
/// no version could be determined; that is not a configuration error.
pub fn to_full(value: &str, fallback: Option<&str>) -> Option<String> {
    if is_full_form(value) {
        return Some(value.to_owned());
    }
    let epoch_ms = parse_epoch_ms(value).or_else(|| fallback.and_then(parse_epoch_ms))?;
    full_form_of(epoch_ms)
}

/// Composes `yyyy/epochMs` for `epoch_ms`, if its year is representable.
pub fn full_form_of(epoch_ms: u64) -> Option<String> {
    let nanos = i128::from(epoch_ms) * 1_000_000;
    let year = OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()?.year();
    Some(format!("{year}/{epoch_ms}"))
}

/// True if `ts` reads as a timestamp that is not in the future.
pub fn is_plausible(ts: &str) -> bool {
    match parse_bare(ts) {
        Some(t) => t <= now_ms(),
        None => false,
    }
}

fn parse_bare(value: &str) -> Option<u64> {
    let value = match value.split_once('/') {
        Some((_year, rest)) if is_full_form(value) => rest,
        _ => value,
    };
    parse_epoch_ms(value)
}

fn parse_epoch_ms(value: &str) -> Option<u64> {
    // u64::from_str accepts a leading '+', which no client sends on purpose.
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    #[test]
    fn recognizes_full_form() {
        assert!(is_full_form("2022/1655832359111"));
        assert!(is_full_form("2022/"));
        assert!(!is_full_form("1655832359111"));
        assert!(!is_full_form("22/1655832359111"));
        assert!(!is_full_form("20222/1655832359111"));
        assert!(!is_full_form(""));
    }

    #[test]
    fn bare_strips_year() {
        assert_eq!(to_bare("2022/1655832359111", None), Ok(1655832359111));
        assert_eq!(to_bare("1655832359111", None), Ok(1655832359111));
    }

    #[test]
    fn bare_uses_fallback_for_garbage() {
        assert_eq!(to_bare("abc", Some("2022/1655832359111")), Ok(1655832359111));
        assert_eq!(to_bare("", Some("42")), Ok(42));
        assert_eq!(to_bare("2022/xyz", Some("7")), Ok(7));
    }

    #[test]
    fn bare_never_reads_garbage_as_zero() {
        assert!(to_bare("abc", None).is_err());
        assert!(to_bare("12abc", Some("nope")).is_err());
        assert!(to_bare("-1", None).is_err());
        assert!(to_bare("+1", None).is_err());
    }

    #[test]
    fn full_keeps_full_form_as_is() {
        // not re-validated: the year is whatever the caller wrote
        assert_eq!(
            to_full("1999/1655832359111", None).as_deref(),
            Some("1999/1655832359111")
        );
    }

    #[test]
    fn full_derives_utc_year() {
        assert_eq!(
            to_full("1655832359111", None).as_deref(),
            Some("2022/1655832359111")
        );
        // 2022-12-31T23:59:59.999Z and a millisecond later
        assert_eq!(
            to_full("1672531199999", None).as_deref(),
            Some("2022/1672531199999")
        );
        assert_eq!(
            to_full("1672531200000", None).as_deref(),
            Some("2023/1672531200000")
        );
    }

    #[test]
    fn full_falls_back_then_gives_up() {
        assert_eq!(
            to_full("", Some("1700000000000")).as_deref(),
            Some("2023/1700000000000")
        );
        assert_eq!(to_full("abc", Some("def")), None);
        assert_eq!(to_full("abc", None), None);
    }

    #[test]
    fn zero_is_a_valid_timestamp() {
        assert_eq!(to_full("0", Some("1700000000000")).as_deref(), Some("1970/0"));
        assert_eq!(to_bare("0", Some("5")), Ok(0));
    }

    #[test]
    fn plausibility() {
        assert!(is_plausible("1655832359111"));
        assert!(is_plausible("2022/1655832359111"));
        assert!(!is_plausible("abc"));
        assert!(!is_plausible(&(now_ms() + 60_000).to_string()));
    }

    quickcheck! {
        fn qc_bare_round_trip_is_idempotent(epoch_ms: u32, scale: u8) -> bool {
            let epoch_ms = u64::from(epoch_ms) * (u64::from(scale) + 1);
            let Some(v) = full_form_of(epoch_ms) else {
                return false;
            };
            let bare = to_bare(&v, None).unwrap();
            let again = to_full(&bare.to_string(), None).unwrap();
            to_bare(&again, None).unwrap() == bare
        }

        fn qc_full_starts_with_utc_year(epoch_ms: u64, fallback: String) -> bool {
            // keep within the years `time` represents by default
            let epoch_ms = epoch_ms % 253_402_300_799_000;
            let year = OffsetDateTime::from_unix_timestamp_nanos(i128::from(epoch_ms) * 1_000_000)
                .unwrap()
                .year();
            to_full(&epoch_ms.to_string(), Some(&fallback))
                .is_some_and(|f| f.starts_with(&format!("{year}/")))
        }
    }
}
