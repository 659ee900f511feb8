// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Answers "is there something newer than what I have?" for the app,
//! blocklists and GeoIP databases.
//!
//! Client-supplied values that can't be read always get `"true"`: a spurious
//! update costs a redundant download, a missed one leaves a client stale.

use http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

use crate::cors::allow_cors;
use crate::opts::Settings;
use crate::params::Params;
use crate::registry::LAST_NO_BLOCKLIST_UPDATES_VCODE;
use crate::response::{self, GenericResponse};
use crate::timestamp;

#[derive(Debug, Serialize)]
struct UpdateCheck {
    version: &'static str,
    update: &'static str,
    latest: Value,
}

impl UpdateCheck {
    fn new(update: bool, latest: impl Into<Value>) -> Self {
        Self {
            version: "1",
            update: if update { "true" } else { "false" },
            latest: latest.into(),
        }
    }

    fn into_response(self) -> GenericResponse {
        let mut response = response::json(StatusCode::OK, &self);
        allow_cors(response.headers_mut());
        response
    }
}

/// Routes an `/update/...` request.
pub fn handle(params: &Params, path: &str, settings: &Settings) -> GenericResponse {
    match path {
        "/update/app" => check_app(params, &settings.latest_vcode).into_response(),
        "/update/blocklists" => {
            check_blocklists(params, settings.latest_timestamp).into_response()
        }
        "/update/geoip" => match check_geoip(params, &settings.geoip_tstamp) {
            Ok(check) => check.into_response(),
            Err(err) => {
                error!("Misconfigured GeoIP version: {err}");
                response::internal_error(err)
            }
        },
        _ => {
            info!("Unknown update check {path:?}");
            response::text(StatusCode::BAD_REQUEST, "unknown update check")
        }
    }
}

fn parse_number(value: &str) -> Option<u64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

/// An absent `vcode` is taken to be current; an unreadable one is not.
fn check_app(params: &Params, latest_vcode: &str) -> UpdateCheck {
    let latest_number = parse_number(latest_vcode);
    let latest = match latest_number {
        Some(n) => Value::from(n),
        None => Value::from(latest_vcode),
    };
    let Some(vcode) = params.get("vcode") else {
        return UpdateCheck::new(false, latest);
    };
    let update = match (latest_number, parse_number(vcode)) {
        (Some(latest), Some(current)) => latest > current,
        _ => true,
    };
    UpdateCheck::new(update, latest)
}

/// Clients at or below [`LAST_NO_BLOCKLIST_UPDATES_VCODE`] can't use current
/// blocklists and are never told to update. Absent `vcode` and `tstamp` count as 0.
fn check_blocklists(params: &Params, latest_timestamp: u64) -> UpdateCheck {
    let vcode = match params.get("vcode") {
        None => Some(0),
        Some(vcode) => parse_number(vcode),
    };
    let update = match vcode {
        Some(vcode) if vcode <= LAST_NO_BLOCKLIST_UPDATES_VCODE => false,
        Some(_) => {
            let tstamp = params.get("tstamp").unwrap_or("0");
            match parse_number(tstamp) {
                Some(current) if timestamp::is_plausible(tstamp) => latest_timestamp > current,
                _ => true,
            }
        }
        None => true,
    };
    UpdateCheck::new(update, latest_timestamp)
}

/// Compares the epochs of full-form versions; `latest` must be readable.
fn check_geoip(
    params: &Params,
    geoip_tstamp: &str,
) -> Result<UpdateCheck, timestamp::TimestampError> {
    let latest = timestamp::to_bare(geoip_tstamp, None)?;
    let current = params.get("tstamp").unwrap_or("0");

    let epoch_of = |full: Option<String>| {
        let full = full?;
        let (_year, epoch) = full.split_once('/')?;
        parse_number(epoch)
    };
    let update = match (
        epoch_of(timestamp::full_form_of(latest)),
        epoch_of(timestamp::to_full(current, None)),
    ) {
        (Some(latest), Some(current)) => latest > current,
        _ => true,
    };
    Ok(UpdateCheck::new(update, latest))
}
