// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Computes where a resolved intent's bytes live and how they are served.

use hyper::StatusCode;

use crate::intent::{ArtifactKind, Codec, ContentKind, ResolvedIntent};
use crate::opts::Settings;
use crate::params::Params;
use crate::registry::{
    FIRST_LEGACY_FILETAG_TSTAMP, LAST_APP_VCODE_ON_LEGACY_ORIGIN, LAST_LEGACY_BLOCKLIST_VCODE,
    LAST_VERSION_ON_LEGACY_ORIGIN,
};
use crate::timestamp;

/// Cache lifetime of app packages, in seconds (3 hours).
pub const APP_TTL: u64 = 10800;
/// Cache lifetime of everything else, in seconds (30 days).
pub const ARTIFACT_TTL: u64 = 2592000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    /// Either `r2:<key>` for the blob store binding or an `https:` URL.
    pub url: String,
    pub filename: String,
    pub ttl: u64,
    pub content: ContentKind,
}

/// Reasons a request can't be mapped to an artifact. All are the caller's fault.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LocateError {
    #[error("unknown artifact")]
    UnknownArtifact,
    #[error("no {0} version could be determined")]
    MissingVersion(ArtifactKind),
    #[error("invalid {kind} version {version:?}")]
    InvalidVersion { kind: ArtifactKind, version: String },
}

impl LocateError {
    pub fn status(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }
}

/// Computes the source, download filename and TTL for `intent`.
pub fn locate(
    intent: &ResolvedIntent,
    params: &Params,
    settings: &Settings,
) -> Result<ArtifactLocation, LocateError> {
    let kind = intent.kind;
    let version = match (kind, intent.version.as_deref()) {
        (ArtifactKind::Unknown, _) => return Err(LocateError::UnknownArtifact),
        (_, Some(v)) if !v.is_empty() => v,
        _ => return Err(LocateError::MissingVersion(kind)),
    };

    let located = |url: String, filename: &str| ArtifactLocation {
        url,
        filename: filename.to_owned(),
        ttl: if kind == ArtifactKind::App {
            APP_TTL
        } else {
            ARTIFACT_TTL
        },
        content: intent.content,
    };

    let location = match kind {
        ArtifactKind::Unknown => return Err(LocateError::UnknownArtifact),
        ArtifactKind::App => {
            let url = app_url(settings, version)?;
            located(url, &format!("rethink-{version}.apk"))
        }
        ArtifactKind::GeoIp => {
            let base = format!("{}geoip/{version}", settings.blob_prefix());
            let file = if params.has("asn") {
                "asn.v64"
            } else if params.has("v6") {
                "dbip.v6"
            } else {
                "dbip.v4"
            };
            located(format!("{base}/{file}"), file)
        }
        ArtifactKind::Blocklists => {
            let base = store_url(settings, version, intent.codec, intent.is_test)?;
            let file = if wants_legacy_filetag(version, intent.codec, intent.client_vcode)? {
                "filetag-legacy.json"
            } else {
                "filetag.json"
            };
            located(format!("{base}/{file}"), "filetag.json")
        }
        ArtifactKind::BasicConfig => {
            let base = store_url(settings, version, intent.codec, intent.is_test)?;
            located(format!("{base}/basicconfig.json"), "basicconfig.json")
        }
        ArtifactKind::Rank => {
            let base = store_url(settings, version, intent.codec, intent.is_test)?;
            located(format!("{base}/rd.txt"), "rank.bin")
        }
        ArtifactKind::Trie => {
            let base = store_url(settings, version, intent.codec, intent.is_test)?;
            located(format!("{base}/td.txt"), "trie.bin")
        }
        ArtifactKind::Bloom => {
            let base = store_url(settings, version, intent.codec, intent.is_test)?;
            located(format!("{base}/bloom_buckets.txt"), "bloom.bin")
        }
    };
    Ok(location)
}

fn app_url(settings: &Settings, version: &str) -> Result<String, LocateError> {
    let vcode: u64 = version.parse().map_err(|_| LocateError::InvalidVersion {
        kind: ArtifactKind::App,
        version: version.to_owned(),
    })?;
    let base = if vcode <= LAST_APP_VCODE_ON_LEGACY_ORIGIN {
        settings.store_url.as_str()
    } else {
        settings.blob_prefix()
    };
    Ok(format!("{base}androidapp/{version}.apk"))
}

/// Base location of a blocklist generation, given its full-form `version`.
///
/// Generations at or below [`LAST_VERSION_ON_LEGACY_ORIGIN`] live on the legacy
/// origin under their bare timestamp; the rest live in the blob store, split by codec.
pub fn store_url(
    settings: &Settings,
    version: &str,
    codec: Codec,
    is_test: bool,
) -> Result<String, LocateError> {
    let invalid = || LocateError::InvalidVersion {
        kind: ArtifactKind::Blocklists,
        version: version.to_owned(),
    };
    let bare = version.split('/').nth(1).ok_or_else(invalid)?;
    let tstamp: u64 = bare.parse().map_err(|_| invalid())?;

    let dir = if is_test {
        "testblocklists"
    } else {
        "blocklists"
    };
    if tstamp <= LAST_VERSION_ON_LEGACY_ORIGIN {
        Ok(format!("{}{dir}/{bare}", settings.store_url))
    } else {
        Ok(format!(
            "{}{dir}/{version}/{}",
            settings.blob_prefix(),
            codec.as_str()
        ))
    }
}

/// Whether the client should be handed `filetag-legacy.json` for `version`.
///
/// Only old u8 clients that said who they are get it, and only from
/// generations that were published with one.
pub fn wants_legacy_filetag(
    version: &str,
    codec: Codec,
    client_vcode: Option<u64>,
) -> Result<bool, LocateError> {
    let bare = timestamp::to_bare(version, None).map_err(|_| LocateError::InvalidVersion {
        kind: ArtifactKind::Blocklists,
        version: version.to_owned(),
    })?;
    let old_client = client_vcode.is_some_and(|vcode| vcode <= LAST_LEGACY_BLOCKLIST_VCODE);
    Ok(bare >= FIRST_LEGACY_FILETAG_TSTAMP && codec != Codec::U6 && old_client)
}
