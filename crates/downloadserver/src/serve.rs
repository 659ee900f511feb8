// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serving HTTP/1 connections with a connection limit and graceful shutdown.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, Stream, StreamExt};
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::{service_fn, HttpService};
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{error, info, info_span, warn, Instrument};

use crate::response::GenericResponse;

/// Serves HTTP connections while allowing for graceful shutdowns.
pub struct Server {
    concurrent_connections: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
}

impl Server {
    /// `max_connections` is the number of simultaneous connections served across
    /// all [`serve`](Self::serve) calls before new ones get a 503.
    pub fn new(max_connections: usize) -> Self {
        let concurrent_connections = Arc::new(Semaphore::new(max_connections));
        let (shutdown, _) = watch::channel(false);
        Self {
            concurrent_connections,
            shutdown,
        }
    }

    /// Serve incoming `connections` with `responder`, one task per connection.
    ///
    /// Resolves once [`graceful_shutdown`](Self::graceful_shutdown) has been called
    /// (or `connections` is exhausted) and every connection it accepted has ended.
    /// Dropping the returned future aborts its connections.
    pub async fn serve<P, C, R, F>(&self, connections: P, responder: R)
    where
        P: Stream<Item = std::io::Result<(C, SocketAddr)>>,
        C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
        R: Fn(Request<Incoming>, SocketAddr) -> F + Clone + Send + Sync + 'static,
        F: Future<Output = GenericResponse> + Send + 'static,
    {
        // Held until every connection is done, so graceful_shutdown waits for us.
        let mut shutdown_receiver = self.shutdown.subscribe();
        let mut was_shutdown = pin!(shutdown_receiver.wait_for(|&done| done).map(|_| None));

        let mut tasks = JoinSet::new();
        info!("Started serving");

        // scope is only to force `connections` to be dropped
        {
            let mut connections = pin!(connections);
            loop {
                let accepted = select! {
                    biased; // don't take connections once shut down
                    none = &mut was_shutdown => none,
                    next = connections.next() => next,
                };
                let Some(accepted) = accepted else { break };
                let (connection, peer_addr) = match accepted {
                    Ok(a) => a,
                    Err(err) => {
                        error!("Couldn't accept connection: {err}");
                        continue;
                    }
                };

                let connection_span = info_span!("connection", addr = %peer_addr);
                let permit = match self.concurrent_connections.clone().try_acquire_owned() {
                    Ok(p) => p,
                    Err(_) => {
                        warn!(parent: &connection_span, "Too overloaded; sending minimal 503.");
                        let _ = respond_with_temporarily_unavailable(connection).await;
                        continue;
                    }
                };

                let respond = responder.clone();
                let service = service_fn(move |request: Request<Incoming>| {
                    let respond = respond.clone();
                    async move {
                        info!("Request: {} {}", request.method(), request.uri());
                        let response = respond(request, peer_addr).await;
                        info!("Response: {}", response.status());
                        Ok::<_, Infallible>(response)
                    }
                });
                let mut shutdown_receiver = self.shutdown.subscribe();
                let connection_task = async move {
                    let _permit = permit;
                    info!("Connected.");
                    let wants_shutdown = shutdown_receiver.wait_for(|&done| done);
                    let http_connection = http1::Builder::new()
                        .half_close(true)
                        .serve_connection(TokioIo::new(connection), service);
                    if let Err(err) = with_graceful_shutdown(http_connection, wants_shutdown).await
                    {
                        error!("Error serving: {err}");
                    }
                    info!("Disconnected.");
                };
                tasks.spawn(connection_task.instrument(connection_span));
            }
        }

        while tasks.join_next().await.is_some() {}
        info!("Stopped serving");
    }

    /// Gracefully shuts down the server.
    ///
    /// Current [`serve`](Self::serve) calls stop accepting connections, and each of
    /// their connections ends as soon as its current request finishes. Resolves once
    /// they have all returned.
    pub async fn graceful_shutdown(&self) {
        self.shutdown.send_replace(true);
        self.shutdown.closed().await;
    }
}

/// Cheaply responds to an HTTP 1 connection with a minimal 503.
///
/// The request isn't read at all, and a slow client gets a second at most.
async fn respond_with_temporarily_unavailable(
    mut connection: impl AsyncWriteExt + Unpin,
) -> std::io::Result<()> {
    let write_response = async {
        let msg = b"HTTP/1.1 503 Service Unavailable\r\n\
                    Content-Type: text/plain;charset=utf-8\r\n\
                    Content-Length: 22\r\n\
                    \r\n\
                    Too many connections!\n";
        connection.write_all(msg).await?;
        connection.shutdown().await
    };
    select! {
         result = write_response => result,
         _ = sleep(Duration::from_secs(1)) => Err(std::io::ErrorKind::TimedOut.into()),
    }
}

/// Gracefully terminate `connection` if `want_shutdown` resolves.
async fn with_graceful_shutdown<I, S, B>(
    connection: http1::Connection<I, S>,
    want_shutdown: impl Future,
) -> Result<(), hyper::Error>
where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + 'static,
    S: HttpService<Incoming, ResBody = B>,
    S::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    B: Body + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    // Polling and shutting down both need the connection exclusively.
    let mut connection = pin!(connection);
    let mut want_shutdown = pin!(want_shutdown.fuse());
    std::future::poll_fn(|cx| {
        if want_shutdown.as_mut().poll(cx).is_ready() {
            connection.as_mut().graceful_shutdown();
        }
        connection.as_mut().poll(cx)
    })
    .await
}
