// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Epoch boundaries deciding where, and in which encoding, artifacts live.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tracing::{info, warn};

use crate::timestamp;

/// Key prefix marking a location that is served from the blob store binding.
pub const BLOB_STORE_SCHEME: &str = "r2:";

/// Blocklists at or below this timestamp were only published to the legacy origin.
pub const LAST_VERSION_ON_LEGACY_ORIGIN: u64 = 1666666666666; // Oct 25, 2022
/// Clients at or below this version code only understand u8-encoded tries.
pub const LAST_U8_ONLY_VCODE: u64 = 30;
/// Clients at or below this version code no longer receive blocklist updates.
pub const LAST_NO_BLOCKLIST_UPDATES_VCODE: u64 = 22; // v053k
/// Clients at or below this version code need the legacy filetag manifest.
pub const LAST_LEGACY_BLOCKLIST_VCODE: u64 = 22; // v053k
/// The last app build uploaded to the legacy origin.
pub const LAST_APP_VCODE_ON_LEGACY_ORIGIN: u64 = 22; // v053k
/// First blocklist generation that was published with `filetag-legacy.json`.
pub const FIRST_LEGACY_FILETAG_TSTAMP: u64 = 1667519318907; // Nov 4, 2022
/// Latest blocklist generation known when this build was cut.
pub const FALLBACK_LATEST_TSTAMP: u64 = 1667519318907;

/// Metadata document shipped alongside the server describing the latest blocklists.
pub const BUNDLED_METADATA: &str = include_str!("../metadata/blocklists.json");

#[derive(Debug, Deserialize)]
struct BlocklistMetadata {
    timestamp: Option<serde_json::Value>,
}

/// Reads the latest blocklist timestamp out of a metadata document.
///
/// The value is only trusted if it is strictly newer than
/// [`FALLBACK_LATEST_TSTAMP`], so a stale or corrupt document can never
/// move the latest pointer backwards.
pub fn latest_timestamp(metadata_json: &str) -> u64 {
    let fallback = FALLBACK_LATEST_TSTAMP.to_string();
    let bundled = match serde_json::from_str::<BlocklistMetadata>(metadata_json) {
        Ok(BlocklistMetadata {
            timestamp: Some(serde_json::Value::String(s)),
        }) => s,
        Ok(BlocklistMetadata {
            timestamp: Some(serde_json::Value::Number(n)),
        }) => n.to_string(),
        Ok(_) => {
            warn!("blocklist metadata has no usable timestamp");
            return FALLBACK_LATEST_TSTAMP;
        }
        Err(err) => {
            warn!("blocklist metadata is not valid json: {err}");
            return FALLBACK_LATEST_TSTAMP;
        }
    };

    match timestamp::to_bare(&bundled, Some(&fallback)) {
        Ok(t) if t > FALLBACK_LATEST_TSTAMP => t,
        Ok(t) => {
            info!("ignoring bundled timestamp {t}, not newer than {FALLBACK_LATEST_TSTAMP}");
            FALLBACK_LATEST_TSTAMP
        }
        // unreachable in practice: the fallback is a constant number
        Err(err) => {
            warn!("{err}");
            FALLBACK_LATEST_TSTAMP
        }
    }
}

/// Loads the metadata document from `path`, or the bundled one.
pub fn load_latest_timestamp(path: Option<&Path>) -> anyhow::Result<u64> {
    let latest = match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading blocklist metadata {}", path.display()))?;
            latest_timestamp(&json)
        }
        None => latest_timestamp(BUNDLED_METADATA),
    };
    info!("Latest blocklists: {latest}");
    Ok(latest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_metadata_is_newer_than_fallback() {
        assert!(latest_timestamp(BUNDLED_METADATA) > FALLBACK_LATEST_TSTAMP);
    }

    #[test]
    fn accepts_full_and_bare_forms() {
        assert_eq!(
            latest_timestamp(r#"{"timestamp": "2023/1700000000000"}"#),
            1700000000000
        );
        assert_eq!(
            latest_timestamp(r#"{"timestamp": "1700000000000"}"#),
            1700000000000
        );
        assert_eq!(
            latest_timestamp(r#"{"timestamp": 1700000000000}"#),
            1700000000000
        );
    }

    #[test]
    fn never_regresses_behind_fallback() {
        let older = FALLBACK_LATEST_TSTAMP - 1;
        let json = format!(r#"{{"timestamp": "{older}"}}"#);
        assert_eq!(latest_timestamp(&json), FALLBACK_LATEST_TSTAMP);
        let same = format!(r#"{{"timestamp": {FALLBACK_LATEST_TSTAMP}}}"#);
        assert_eq!(latest_timestamp(&same), FALLBACK_LATEST_TSTAMP);
    }

    #[test]
    fn garbage_yields_fallback() {
        assert_eq!(latest_timestamp("not json"), FALLBACK_LATEST_TSTAMP);
        assert_eq!(latest_timestamp("{}"), FALLBACK_LATEST_TSTAMP);
        assert_eq!(
            latest_timestamp(r#"{"timestamp": "yesterday"}"#),
            FALLBACK_LATEST_TSTAMP
        );
        assert_eq!(
            latest_timestamp(r#"{"timestamp": [1]}"#),
            FALLBACK_LATEST_TSTAMP
        );
    }

    #[test]
    fn reads_metadata_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocklists.json");
        std::fs::write(&path, r#"{"timestamp": "2024/1710000000000"}"#).unwrap();
        assert_eq!(load_latest_timestamp(Some(&path)).unwrap(), 1710000000000);
        assert!(load_latest_timestamp(Some(&dir.path().join("missing.json"))).is_err());
    }
}
