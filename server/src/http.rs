//! HTTP front end: every request is answered with one endless GIF stream.
//!
//! Each viewer gets its own [`StreamSession`] on a dedicated thread. The
//! session writes into a [`ChannelSink`], whose flushes become chunks of the
//! response body.

use std::future::Future;
use std::io::{self, Write};
use std::mem;
use std::net::SocketAddr;
use std::thread;

use anyhow::Context;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use futures::stream::StreamExt;
use gifstream_core::{FrameSource, Shutdown, StreamConfig, StreamSession};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Flushed chunks a viewer may lag behind before its session blocks.
const CHUNK_QUEUE: usize = 4;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub source: FrameSource,
    pub config: StreamConfig,
    /// Ends every session and the refresh loop once triggered.
    pub shutdown: Shutdown,
}

/// `Write` adapter that ships each flushed batch of bytes to the response
/// body. Fails with `BrokenPipe` once the viewer's body has been dropped.
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
    buf: Vec<u8>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx, buf: Vec::new() }
    }
}

impl Write for ChannelSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = Bytes::from(mem::take(&mut self.buf));
        self.tx
            .blocking_send(chunk)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "viewer disconnected"))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(stream_gif))
        .fallback(stream_gif)
        .with_state(state)
}

/// Serve viewers on `listener` until `signal` resolves, then trigger the
/// shared [`Shutdown`] so open streams end and the server can drain.
pub async fn serve<F>(listener: TcpListener, state: AppState, signal: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let shutdown = state.shutdown.clone();
    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            log::info!("shutting down, closing viewer streams");
            shutdown.trigger();
        })
        .await
        .context("http server terminated")
}

/// Resolves on ctrl-c, or on SIGTERM where that exists.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("cannot listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn stream_gif(State(state): State<AppState>, ConnectInfo(peer): ConnectInfo<SocketAddr>) -> Response {
    let (tx, rx) = mpsc::channel::<Bytes>(CHUNK_QUEUE);
    let session = StreamSession::with_shutdown(state.source, state.config, state.shutdown);
    let spawned = thread::Builder::new()
        .name("stream-session".into())
        .spawn(move || serve_viewer(peer, session, ChannelSink::new(tx)));
    if let Err(e) = spawned {
        log::error!("{peer}: failed to spawn session thread: {e}");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, io::Error>));
    (
        [
            (header::CONTENT_TYPE, "image/gif"),
            (header::CACHE_CONTROL, "no-cache, no-store"),
        ],
        body,
    )
        .into_response()
}

fn serve_viewer(peer: SocketAddr, mut session: StreamSession, sink: ChannelSink) {
    log::info!("{peer}: viewer connected");
    match session.run(sink) {
        Ok(()) => log::info!("{peer}: stream stopped"),
        Err(e) => log::info!("{peer}: viewer disconnected: {e}"),
    }
}
