// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! CORS headers and preflight handling. Everything served here is public.

use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE, ACCESS_CONTROL_REQUEST_HEADERS, ACCESS_CONTROL_REQUEST_METHOD, ALLOW,
    ORIGIN, VARY,
};
use http::{HeaderMap, HeaderValue, Method, StatusCode};

use crate::response::{self, GenericResponse};

pub const ALLOWED_METHODS: &str = "GET,HEAD,POST,OPTIONS";

const PREFLIGHT_MAX_AGE: &str = "86400";

/// Let any origin read the response.
pub fn allow_cors(headers: &mut HeaderMap) {
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.append(VARY, HeaderValue::from_static("Origin"));
}

/// Methods answered with something other than a 405.
pub fn allow_method(method: &Method) -> bool {
    [Method::GET, Method::HEAD, Method::POST].contains(method)
}

/// Answers an `OPTIONS` request.
///
/// A request carrying `Origin` and both `Access-Control-Request-*` headers is a
/// CORS preflight and gets the full set of CORS headers, echoing back whatever
/// headers were asked for. Anything else just learns which methods exist.
pub fn preflight(request_headers: &HeaderMap) -> GenericResponse {
    let mut response = response::empty(StatusCode::OK);
    let headers = response.headers_mut();

    let requested_headers = request_headers.get(ACCESS_CONTROL_REQUEST_HEADERS);
    let is_preflight = request_headers.contains_key(ORIGIN)
        && request_headers.contains_key(ACCESS_CONTROL_REQUEST_METHOD);

    match requested_headers {
        Some(requested) if is_preflight => {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
            headers.insert(
                ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static(ALLOWED_METHODS),
            );
            headers.insert(
                ACCESS_CONTROL_MAX_AGE,
                HeaderValue::from_static(PREFLIGHT_MAX_AGE),
            );
            headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
        }
        _ => {
            headers.insert(ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
        }
    }
    response
}

pub fn method_not_allowed() -> GenericResponse {
    let mut response = response::empty(StatusCode::METHOD_NOT_ALLOWED);
    response
        .headers_mut()
        .insert(ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_appends_vary() {
        let mut headers = HeaderMap::new();
        headers.insert(VARY, HeaderValue::from_static("Accept-Encoding"));
        allow_cors(&mut headers);
        assert_eq!(headers.get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
        assert_eq!(headers.get_all(VARY).iter().count(), 2);
    }

    #[test]
    fn full_preflight_echoes_requested_headers() {
        let mut request = HeaderMap::new();
        request.insert(ORIGIN, HeaderValue::from_static("https://rethinkdns.com"));
        request.insert(ACCESS_CONTROL_REQUEST_METHOD, HeaderValue::from_static("GET"));
        request.insert(
            ACCESS_CONTROL_REQUEST_HEADERS,
            HeaderValue::from_static("x-client-name-version"),
        );

        let response = preflight(&request);
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers.get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
        assert_eq!(
            headers.get(ACCESS_CONTROL_ALLOW_HEADERS).unwrap(),
            "x-client-name-version"
        );
        assert_eq!(headers.get(ACCESS_CONTROL_MAX_AGE).unwrap(), "86400");
        assert!(headers.get(ALLOW).is_none());
    }

    #[test]
    fn plain_options_lists_methods() {
        let mut request = HeaderMap::new();
        // no Access-Control-Request-Headers, so not a preflight
        request.insert(ORIGIN, HeaderValue::from_static("https://rethinkdns.com"));
        request.insert(ACCESS_CONTROL_REQUEST_METHOD, HeaderValue::from_static("GET"));

        let response = preflight(&request);
        assert_eq!(response.headers().get(ALLOW).unwrap(), ALLOWED_METHODS);
        assert!(response
            .headers()
            .get(ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[test]
    fn methods() {
        assert!(allow_method(&Method::GET));
        assert!(allow_method(&Method::HEAD));
        assert!(allow_method(&Method::POST));
        assert!(!allow_method(&Method::PUT));
        assert!(!allow_method(&Method::DELETE));
        assert_eq!(
            method_not_allowed().status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
    }
}
