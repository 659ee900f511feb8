// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shutdown signal detection
//!
//! **BEWARE:** these register process-wide signal handlers through [`tokio`], permanently.
//! Only the binary's entry point should call them.

use tokio::signal::ctrl_c;

/// Resolves on the first `SIGINT`.
///
/// # Panics
///
/// If [`tokio::signal`] can't register its handler.
pub async fn graceful_shutdown_requested() {
    ctrl_c().await.expect("Unable to await CTRL-C");
}

/// Resolves on a second `SIGINT`, or on any `SIGTERM`.
///
/// # Panics
///
/// If [`tokio::signal`] can't register its handlers.
pub async fn fast_shutdown_requested() {
    let want_to_shutdown = async {
        ctrl_c().await.expect("Unable to await CTRL-C");
        ctrl_c().await.expect("Unable to await CTRL-C");
    };

    #[cfg(unix)]
    let want_to_shutdown = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate()).expect("Can't register SIGTERM handler");
        tokio::select! {
            _ = want_to_shutdown => {},
            _ = sigterm.recv() => {},
        };
    };

    want_to_shutdown.await
}
