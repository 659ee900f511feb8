// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Response-related helpers

use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::{Bytes, Frame};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{HeaderMap, Response};
pub use hyper::StatusCode;
use serde::Serialize;

use crate::store::ByteStream;

/// Type-erased HTTP response.
///
/// Bodies are streamed from backends that are `Send` but not `Sync`, hence the unsync box.
pub type GenericResponse = Response<UnsyncBoxBody<Bytes, anyhow::Error>>;

pub const JSON_CONTENT_TYPE: &str = "application/json;charset=UTF-8";

/// Return a body-less response with the given status.
pub fn empty(status: StatusCode) -> GenericResponse {
    let body = Empty::<Bytes>::new()
        .map_err(anyhow::Error::from)
        .boxed_unsync();
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}

/// Return a [`GenericResponse`] with known content.
pub fn full(
    status: StatusCode,
    content_type: &'static str,
    content: impl ToString,
) -> GenericResponse {
    let body = Full::new(Bytes::from(content.to_string()))
        .map_err(anyhow::Error::from)
        .boxed_unsync();
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Return a plain text response with known content.
pub fn text(status: StatusCode, content: impl ToString) -> GenericResponse {
    full(status, "text/plain; charset=utf-8", content)
}

/// Return `value` as pretty-printed JSON.
pub fn json(status: StatusCode, value: &impl Serialize) -> GenericResponse {
    match serde_json::to_string_pretty(value) {
        Ok(json) => full(status, JSON_CONTENT_TYPE, json),
        Err(err) => internal_error(format_args!("serializing response: {err}")),
    }
}

#[derive(Serialize)]
struct ErrorBody {
    version: &'static str,
    error: String,
}

/// Return a 500 with a JSON body describing `reason`.
pub fn internal_error(reason: impl ToString) -> GenericResponse {
    let body = ErrorBody {
        version: "1",
        error: reason.to_string(),
    };
    // a struct of two strings always serializes
    let json = serde_json::to_string_pretty(&body).unwrap_or_default();
    full(StatusCode::INTERNAL_SERVER_ERROR, JSON_CONTENT_TYPE, json)
}

/// Return a response streaming `body`.
pub fn streaming(status: StatusCode, headers: HeaderMap, body: ByteStream) -> GenericResponse {
    let body = StreamBody::new(futures::TryStreamExt::map_ok(body, Frame::data))
        .map_err(anyhow::Error::from)
        .boxed_unsync();
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

#[cfg(test)]
pub(crate) fn to_body(response: GenericResponse) -> Vec<u8> {
    let body = response.into_body().collect();
    futures::executor::block_on(body)
        .unwrap()
        .to_bytes()
        .to_vec()
}
