// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;

use crate::opts::Settings;
use crate::origin::Origin;
use crate::store::BlobStore;

/// Everything a request handler needs. Built once at startup and never mutated.
pub struct DownloadServerState {
    pub settings: Settings,
    /// Absent when no blob store is configured, in which case
    /// `settings.blob_over_http` routes blob store artifacts through `origin`.
    pub blobs: Option<Arc<dyn BlobStore>>,
    pub origin: Arc<dyn Origin>,
}
