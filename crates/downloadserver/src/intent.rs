// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Maps a request path and query onto what the client wants to download.

use std::fmt;

use tracing::{debug, info};

use crate::opts::Settings;
use crate::params::Params;
use crate::registry::LAST_U8_ONLY_VCODE;
use crate::timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    App,
    GeoIp,
    Blocklists,
    BasicConfig,
    Rank,
    Trie,
    Bloom,
    Unknown,
}

impl ArtifactKind {
    /// Artifacts versioned by blocklist generation, stored side by side.
    fn from_blocklist_token(token: &str) -> Option<Self> {
        match token {
            "blocklists" => Some(Self::Blocklists),
            "basicconfig" => Some(Self::BasicConfig),
            "rank" => Some(Self::Rank),
            "trie" => Some(Self::Trie),
            "bloom" => Some(Self::Bloom),
            _ => None,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::App => "app",
            Self::GeoIp => "geoip",
            Self::Blocklists => "blocklists",
            Self::BasicConfig => "basicconfig",
            Self::Rank => "rank",
            Self::Trie => "trie",
            Self::Bloom => "bloom",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Encoding of the blocklist trie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    U6,
    U8,
}

impl Codec {
    fn from_param(value: &str) -> Option<Self> {
        match value {
            "u6" => Some(Self::U6),
            "u8" => Some(Self::U8),
            _ => None,
        }
    }

    /// Codec a client understands, given its version code (`None` if unknown).
    ///
    /// Clients that don't say are assumed to be old, and old clients only read u8.
    pub fn for_client(client_vcode: Option<u64>) -> Self {
        match client_vcode {
            Some(vcode) if vcode > LAST_U8_ONLY_VCODE => Self::U6,
            _ => Self::U8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::U6 => "u6",
            Self::U8 => "u8",
        }
    }
}

/// How the response body should be labelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Blob,
    Json,
    /// A blob labelled so that the edge compresses it in transit.
    CompressableBlob,
}

impl ContentKind {
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Blob => "application/octet-stream",
            Self::Json => "application/json;charset=UTF-8",
            // CDNs leave octet-streams alone but do compress wasm.
            Self::CompressableBlob => "application/wasm",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIntent {
    pub kind: ArtifactKind,
    /// An app version code, or a full-form timestamp. `None` if none could be determined.
    pub version: Option<String>,
    pub codec: Codec,
    /// `None` stands for a client that did not say, i.e. +Infinity.
    pub client_vcode: Option<u64>,
    pub content: ContentKind,
    pub is_test: bool,
}

/// Resolves what `path` and `params` ask for.
pub fn resolve(params: &Params, path: &str, settings: &Settings) -> ResolvedIntent {
    let client_vcode = params.get("vcode").and_then(|v| v.parse::<u64>().ok());
    let codec = params
        .get("codec")
        .and_then(Codec::from_param)
        .unwrap_or_else(|| Codec::for_client(client_vcode));

    let mut intent = ResolvedIntent {
        kind: ArtifactKind::App,
        version: Some(settings.latest_vcode.clone()),
        codec,
        client_vcode,
        content: ContentKind::Blob,
        is_test: params.has("test"),
    };

    if path.is_empty() || path == "/" {
        debug!("intent: root path, latest app");
        return intent;
    }

    let segments = normalize_segments(path.split('/').skip(1).collect());
    let p1 = segments.first().copied().unwrap_or_default();
    let p2 = segments.get(1).copied().unwrap_or_default();

    if p1.is_empty() {
        if settings.strict_paths {
            info!("intent: empty path segment in {path:?}");
            intent.kind = ArtifactKind::Unknown;
        }
        return intent;
    }

    match p1 {
        "geoip" => {
            intent.kind = ArtifactKind::GeoIp;
            intent.version = timestamp::to_full(p2, Some(&settings.geoip_tstamp));
        }
        "app" => {
            intent.kind = ArtifactKind::App;
            if !p2.is_empty() {
                intent.version = Some(p2.to_owned());
            }
        }
        _ => match ArtifactKind::from_blocklist_token(p1) {
            Some(kind) => {
                let latest = settings.latest_timestamp.to_string();
                intent.kind = kind;
                intent.version = timestamp::to_full(p2, Some(&latest));
            }
            None => {
                info!("intent: unknown artifact {p1:?}");
                intent.kind = ArtifactKind::Unknown;
            }
        },
    }

    intent.content = match intent.kind {
        ArtifactKind::BasicConfig | ArtifactKind::Blocklists => ContentKind::Json,
        _ if params.has("compressed") => ContentKind::CompressableBlob,
        _ => ContentKind::Blob,
    };
    intent
}

/// Tolerates clients that put a full-form version into the path as two
/// segments, as in `/blocklists/2023/1700000000000`.
///
/// Takes the segments after the leading `/` and returns them with the year
/// segment dropped, so that the version segment always comes second.
pub fn normalize_segments(mut segments: Vec<&str>) -> Vec<&str> {
    let looks_like_year = |s: &str| {
        s.len() == 4 && s.bytes().all(|b| b.is_ascii_digit()) && s >= "2022"
    };
    if segments.len() > 2 && looks_like_year(segments[1]) {
        segments.remove(1);
    }
    segments
}
