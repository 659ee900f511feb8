// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Download and update-check server for app packages, blocklists and GeoIP databases.

pub mod client;
pub mod cors;
pub mod download;
pub mod intent;
pub mod locate;
pub mod opts;
pub mod origin;
pub mod params;
pub mod registry;
pub mod response;
pub mod serve;
pub mod server;
pub mod signal;
pub mod state;
pub mod store;
pub mod stream;
pub mod timestamp;
pub mod update;

pub use opts::Opts;
pub use server::{respond, run, server_setup};
pub use state::DownloadServerState;
