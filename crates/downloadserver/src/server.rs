// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use hyper::{Method, Request};
use tokio::net::TcpListener;
use tracing::{info, info_span, Instrument};

use crate::client::{client_addr, RequestId};
use crate::opts::{wrap, Opts};
use crate::origin::ReqwestOrigin;
use crate::params::Params;
use crate::registry::load_latest_timestamp;
use crate::response::GenericResponse;
use crate::serve::Server;
use crate::signal::{fast_shutdown_requested, graceful_shutdown_requested};
use crate::state::DownloadServerState;
use crate::store::{BlobStore, DirBlobStore};
use crate::{cors, download, update};

/// Builds the server state from command line options and the environment.
pub fn server_setup(opts: &Opts) -> anyhow::Result<DownloadServerState> {
    let latest_timestamp = load_latest_timestamp(opts.metadata.as_deref())?;
    let settings = wrap(opts.raw_env(), latest_timestamp);

    let blobs = opts.blob_store.as_ref().map(|root| {
        info!("Serving blob store artifacts from {}", root.display());
        Arc::new(DirBlobStore::new(root)) as Arc<dyn BlobStore>
    });
    let origin = ReqwestOrigin::new().context("building http client")?;

    Ok(DownloadServerState {
        settings,
        blobs,
        origin: Arc::new(origin),
    })
}

/// Runs the server until a shutdown is signaled.
///
/// The first `SIGINT` drains in-flight requests; a second one, or a `SIGTERM`, doesn't wait.
pub async fn run(opts: Opts) -> anyhow::Result<()> {
    let state = Arc::new(server_setup(&opts)?);

    let address = SocketAddr::from(([0, 0, 0, 0], opts.port));
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("binding {address}"))?;
    info!("Listening on {address}");
    let connections = futures::stream::unfold(listener, |listener| async {
        Some((listener.accept().await, listener))
    });

    let server = Server::new(opts.max_clients);
    let graceful_shutdown = async {
        graceful_shutdown_requested().await;
        info!("Graceful shutdown signaled");
        server.graceful_shutdown().await;
        futures::future::pending().await
    };

    tokio::select! {
        biased;
        _ = fast_shutdown_requested() => info!("Fast shutdown requested..."),
        () = graceful_shutdown => {}
        _ = server.serve(connections, move |request, peer| respond(state.clone(), peer, request)) => {}
    };

    Ok(())
}

/// Answers a single request.
pub async fn respond<B>(
    state: Arc<DownloadServerState>,
    peer: SocketAddr,
    request: Request<B>,
) -> GenericResponse {
    let id = RequestId::from(request.headers());
    let client = client_addr(request.headers(), peer);
    let span = info_span!("request", %id, %client);
    route(&state, request).instrument(span).await
}

async fn route<B>(state: &DownloadServerState, request: Request<B>) -> GenericResponse {
    // Only the head matters; everything served is addressed by path and query.
    let (parts, _) = request.into_parts();

    if parts.method == Method::OPTIONS {
        return cors::preflight(&parts.headers);
    }
    if !cors::allow_method(&parts.method) {
        info!("Method {} not allowed", parts.method);
        return cors::method_not_allowed();
    }

    let path = parts.uri.path();
    let params = Params::parse(parts.uri.query());
    if path.starts_with("/update") {
        update::handle(&params, path, &state.settings)
    } else {
        download::handle(state, &params, path, &parts.headers).await
    }
}
