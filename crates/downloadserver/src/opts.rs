// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::path::PathBuf;

use clap::{crate_version, Parser};
use tracing::warn;

#[derive(Debug, Parser)]
#[clap(
    name = "downloadserver",
    about = "Serves app, blocklist and GeoIP artifacts and answers update checks",
    version = crate_version!()
)]
pub struct Opts {
    #[clap(
        short,
        long,
        help = "Port to listen on.",
        default_value = "8080",
        env = "DOWNLOADSERVER_PORT"
    )]
    pub port: u16,

    #[clap(
        long,
        help = "Maximum simultaneously connected clients before connections are no longer accepted",
        default_value = "1024",
        env = "DOWNLOADSERVER_MAX_CLIENTS"
    )]
    pub max_clients: usize,

    #[clap(
        long,
        help = "JSON document with the latest blocklist `timestamp`. Defaults to the one built into the server.",
        env = "DOWNLOADSERVER_METADATA"
    )]
    pub metadata: Option<PathBuf>,

    #[clap(
        long,
        help = "Directory holding the blob store. Without it, the blob store is reached over --r2-store-url.",
        env = "R2_RDNS"
    )]
    pub blob_store: Option<PathBuf>,

    #[clap(long, help = "Latest app version code", env = "LATEST_VCODE")]
    pub latest_vcode: Option<String>,

    #[clap(long, help = "Latest GeoIP database timestamp", env = "GEOIP_TSTAMP")]
    pub geoip_tstamp: Option<String>,

    #[clap(
        long,
        help = "Base URL of the legacy origin, with a trailing slash",
        env = "STORE_URL"
    )]
    pub store_url: Option<String>,

    #[clap(
        long,
        help = "Base URL of the blob store's HTTP mirror, with a trailing slash",
        env = "R2_STORE_URL"
    )]
    pub r2_store_url: Option<String>,

    #[clap(
        long,
        help = "Treat empty non-root paths (e.g. `//`) as bad requests instead of app downloads",
        env = "STRICT_PATHS"
    )]
    pub strict_paths: Option<bool>,
}

impl Opts {
    pub fn raw_env(&self) -> RawEnv {
        RawEnv {
            strict_paths: self.strict_paths,
            latest_vcode: self.latest_vcode.clone(),
            geoip_tstamp: self.geoip_tstamp.clone(),
            store_url: self.store_url.clone(),
            r2_store_url: self.r2_store_url.clone(),
            has_blob_store: self.blob_store.is_some(),
        }
    }
}

/// Runtime bindings as given, any of which may be absent.
#[derive(Debug, Clone, Default)]
pub struct RawEnv {
    pub strict_paths: Option<bool>,
    pub latest_vcode: Option<String>,
    pub geoip_tstamp: Option<String>,
    pub store_url: Option<String>,
    pub r2_store_url: Option<String>,
    pub has_blob_store: bool,
}

/// Immutable, fully-defaulted configuration shared by every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Unrecognized or empty non-root paths resolve to nothing rather than the app.
    pub strict_paths: bool,
    pub latest_vcode: String,
    pub geoip_tstamp: String,
    /// Base URL of the legacy origin.
    pub store_url: String,
    /// Base URL of the blob store's HTTP mirror.
    pub r2_store_url: String,
    /// Latest blocklist timestamp, see [`crate::registry::latest_timestamp`].
    pub latest_timestamp: u64,
    /// Reach the blob store through [`Self::r2_store_url`] instead of a binding.
    pub blob_over_http: bool,
    /// Host features such as stream transforms are unavailable.
    pub constrained: bool,
}

impl Settings {
    pub const DEFAULT_LATEST_VCODE: &'static str = "41";
    pub const DEFAULT_GEOIP_TSTAMP: &'static str = "1655832359111";
    pub const DEFAULT_STORE_URL: &'static str = "https://dist.rethinkdns.com/";
    pub const DEFAULT_R2_STORE_URL: &'static str = "https://cfstore.rethinkdns.com/";

    /// Prefix for blob store locations: the binding's scheme, or its HTTP mirror.
    pub fn blob_prefix(&self) -> &str {
        if self.blob_over_http {
            &self.r2_store_url
        } else {
            crate::registry::BLOB_STORE_SCHEME
        }
    }
}

/// Normalizes possibly-absent bindings into [`Settings`].
pub fn wrap(raw: RawEnv, latest_timestamp: u64) -> Settings {
    if !raw.has_blob_store {
        warn!("No blob store binding; serving blob store artifacts over http");
    }
    Settings {
        strict_paths: raw.strict_paths.unwrap_or(false),
        latest_vcode: raw
            .latest_vcode
            .unwrap_or_else(|| Settings::DEFAULT_LATEST_VCODE.into()),
        geoip_tstamp: raw
            .geoip_tstamp
            .unwrap_or_else(|| Settings::DEFAULT_GEOIP_TSTAMP.into()),
        store_url: raw
            .store_url
            .unwrap_or_else(|| Settings::DEFAULT_STORE_URL.into()),
        r2_store_url: raw
            .r2_store_url
            .unwrap_or_else(|| Settings::DEFAULT_R2_STORE_URL.into()),
        latest_timestamp,
        blob_over_http: !raw.has_blob_store,
        constrained: !raw.has_blob_store,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_absent_bindings() {
        let settings = wrap(RawEnv::default(), 7);
        assert_eq!(
            settings,
            Settings {
                strict_paths: false,
                latest_vcode: "41".into(),
                geoip_tstamp: "1655832359111".into(),
                store_url: "https://dist.rethinkdns.com/".into(),
                r2_store_url: "https://cfstore.rethinkdns.com/".into(),
                latest_timestamp: 7,
                blob_over_http: true,
                constrained: true,
            }
        );
        assert_eq!(settings.blob_prefix(), "https://cfstore.rethinkdns.com/");
    }

    #[test]
    fn binding_keeps_blob_scheme() {
        let raw = RawEnv {
            latest_vcode: Some("50".into()),
            strict_paths: Some(true),
            has_blob_store: true,
            ..Default::default()
        };
        let settings = wrap(raw, 7);
        assert!(!settings.blob_over_http);
        assert!(!settings.constrained);
        assert!(settings.strict_paths);
        assert_eq!(settings.latest_vcode, "50");
        assert_eq!(settings.blob_prefix(), "r2:");
    }

    #[test]
    fn parses_env_style_args() {
        let opts = Opts::parse_from([
            "downloadserver",
            "--blob-store",
            "/srv/blobs",
            "--store-url",
            "https://legacy.example/",
            "--strict-paths",
            "true",
        ]);
        let raw = opts.raw_env();
        assert!(raw.has_blob_store);
        assert_eq!(raw.store_url.as_deref(), Some("https://legacy.example/"));
        assert_eq!(raw.strict_paths, Some(true));
        assert_eq!(opts.port, 8080);
    }
}
