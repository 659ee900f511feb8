// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serving artifact downloads: fetch from the backend a location names, then
//! reframe the upstream response as an attachment.

use http::header::{
    HeaderName, InvalidHeaderValue, CACHE_CONTROL, CONNECTION, CONTENT_DISPOSITION,
    CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, ETAG, HOST, PROXY_AUTHENTICATE,
    PROXY_AUTHORIZATION, TE, TRAILER, TRANSFER_ENCODING, UPGRADE, USER_AGENT,
};
use http::{HeaderMap, HeaderValue, StatusCode};
use tracing::{debug, info, warn};

use crate::cors::allow_cors;
use crate::intent;
use crate::locate::{locate, ArtifactLocation};
use crate::origin::{OriginRequest, OriginResponse};
use crate::params::Params;
use crate::registry::BLOB_STORE_SCHEME;
use crate::response::{self, GenericResponse};
use crate::state::DownloadServerState;
use crate::stream::StreamTransform;

static HOP_BY_HOP: [HeaderName; 7] = [
    CONNECTION,
    PROXY_AUTHENTICATE,
    PROXY_AUTHORIZATION,
    TE,
    TRAILER,
    TRANSFER_ENCODING,
    UPGRADE,
];

/// Serves the artifact `path` and `params` ask for.
pub async fn handle(
    state: &DownloadServerState,
    params: &Params,
    path: &str,
    request_headers: &HeaderMap,
) -> GenericResponse {
    let intent = intent::resolve(params, path, &state.settings);
    let location = match locate(&intent, params, &state.settings) {
        Ok(location) => location,
        Err(err) => {
            info!("Rejecting download of {path:?}: {err}");
            return response::text(err.status(), err);
        }
    };
    debug!("{path:?} resolved to {intent:?}, located at {location:?}");

    let transform = StreamTransform::from_params(params);
    fetch_and_frame(&location, transform, request_headers, state).await
}

/// Fetches `location` and frames a successful result as a download.
///
/// Backend failures are answered with a bare status; upstream responses that
/// aren't 2xx or 3xx are forwarded untouched.
pub async fn fetch_and_frame(
    location: &ArtifactLocation,
    transform: StreamTransform,
    request_headers: &HeaderMap,
    state: &DownloadServerState,
) -> GenericResponse {
    let upstream = match fetch(location, request_headers, state).await {
        Ok(upstream) => upstream,
        Err(response) => return response,
    };
    let OriginResponse {
        status,
        mut headers,
        body,
    } = upstream;

    let Some(body) = body else {
        warn!("{} answered {status} without a body", location.url);
        return response::empty(StatusCode::SERVICE_UNAVAILABLE);
    };

    for name in &HOP_BY_HOP {
        headers.remove(name);
    }

    let transform = if state.settings.constrained && transform != StreamTransform::Passthrough {
        warn!("Constrained runtime; serving {} without {transform:?}", location.filename);
        StreamTransform::Passthrough
    } else {
        transform
    };
    if transform != StreamTransform::Passthrough {
        // these describe the upstream bytes, not the transformed ones
        for name in [CONTENT_LENGTH, CONTENT_ENCODING, ETAG] {
            headers.remove(name);
        }
        headers.remove("content-md5");
    }

    if let Err(err) = frame_headers(&mut headers, location) {
        return response::internal_error(format_args!(
            "framing {:?}: {err}",
            location.filename
        ));
    }

    response::streaming(status, headers, transform.apply(body))
}

async fn fetch(
    location: &ArtifactLocation,
    request_headers: &HeaderMap,
    state: &DownloadServerState,
) -> Result<OriginResponse, GenericResponse> {
    let url = &location.url;
    if let Some(key) = url.strip_prefix(BLOB_STORE_SCHEME) {
        let failed = || response::empty(StatusCode::INTERNAL_SERVER_ERROR);
        let Some(blobs) = &state.blobs else {
            warn!("No blob store to fetch {key:?} from");
            return Err(failed());
        };
        match blobs.get(key).await {
            Ok(Some(object)) if object.size > 0 => {
                let mut headers = HeaderMap::new();
                headers.insert(CONTENT_LENGTH, HeaderValue::from(object.size));
                Ok(OriginResponse {
                    status: StatusCode::OK,
                    headers,
                    body: Some(object.body),
                })
            }
            Ok(Some(_)) => {
                warn!("Blob {key:?} is empty");
                Err(failed())
            }
            Ok(None) => {
                warn!("Blob {key:?} not found");
                Err(failed())
            }
            Err(err) => {
                warn!("Blob store failed: {err}");
                Err(failed())
            }
        }
    } else if url.starts_with("https:") {
        let request = OriginRequest {
            url: url.clone(),
            headers: forwardable_headers(request_headers),
            cache_ttl: location.ttl,
            cache_everything: true,
        };
        match state.origin.fetch(request).await {
            Ok(upstream) if upstream.status.is_success() || upstream.status.is_redirection() => {
                Ok(upstream)
            }
            Ok(upstream) => {
                warn!(
                    "Download of {} failed upstream: {} {:?}",
                    location.filename, upstream.status, upstream.headers
                );
                Err(forward(upstream))
            }
            Err(err) => {
                warn!("Download of {} failed: {err}", location.filename);
                Err(response::empty(StatusCode::BAD_GATEWAY))
            }
        }
    } else {
        warn!("Unsupported scheme in {url:?}");
        Err(response::empty(StatusCode::BAD_GATEWAY))
    }
}

/// Passes an upstream response along as it is.
fn forward(upstream: OriginResponse) -> GenericResponse {
    let OriginResponse {
        status,
        headers,
        body,
    } = upstream;
    let mut response = match body {
        Some(body) => response::streaming(status, headers, body),
        None => {
            let mut response = response::empty(status);
            *response.headers_mut() = headers;
            response
        }
    };
    for name in &HOP_BY_HOP {
        response.headers_mut().remove(name);
    }
    response
}

/// The subset of a client's headers that may be sent on to an origin.
pub fn forwardable_headers(request_headers: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in request_headers {
        let lowercase = name.as_str();
        let dropped = *name == HOST
            || *name == USER_AGENT
            || lowercase.starts_with("cf-")
            || lowercase.starts_with("x-")
            || HOP_BY_HOP.contains(name);
        if !dropped {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

/// Marks `headers` as a cacheable, publicly readable attachment of `location`.
fn frame_headers(
    headers: &mut HeaderMap,
    location: &ArtifactLocation,
) -> Result<(), InvalidHeaderValue> {
    let disposition = format!("attachment; filename=\"{}\"", location.filename);
    headers.insert(CONTENT_DISPOSITION, HeaderValue::try_from(disposition)?);
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(location.content.mime_type()),
    );
    let cache_control = format!("public, max-age={}", location.ttl);
    headers.insert(CACHE_CONTROL, HeaderValue::try_from(cache_control)?);
    allow_cors(headers);
    Ok(())
}
