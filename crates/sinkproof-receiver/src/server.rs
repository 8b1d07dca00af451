//! The receiver itself: an axum router behind a plain or TLS accept loop.

use crate::cloudevent;
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::{Extension, Router, body::Bytes};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use rustls::ServerConfig;
use sinkproof_cancel::{CancelReason, CancelSignal};
use sinkproof_schema::event::{CapturedEvent, EventKind, PeerTls, SecurityContext};
use sinkproof_store::EventStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;

/// What the accept loop learned about a connection.
#[derive(Clone, Debug, Default)]
pub struct ConnInfo {
    pub peer: Option<SocketAddr>,
    pub tls: Option<PeerTls>,
}

#[derive(Clone)]
struct ReceiverState {
    name: Arc<str>,
    store: EventStore,
    audience: Option<Arc<str>>,
}

/// Router capturing every request, whatever its method or path.
pub fn router(name: &str, store: EventStore, audience: Option<&str>) -> Router {
    Router::new().fallback(capture).with_state(ReceiverState {
        name: name.into(),
        store,
        audience: audience.map(Into::into),
    })
}

async fn capture(
    State(state): State<ReceiverState>,
    Extension(conn): Extension<ConnInfo>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let bearer_token = cloudevent::bearer_token(&headers);
    let kind = if state.audience.is_some() && bearer_token.is_none() {
        EventKind::EventRejected
    } else {
        EventKind::EventReceived
    };
    let attributes = cloudevent::extract(&headers, &body);

    let mut event = CapturedEvent::new(state.name.as_ref(), kind);
    event.event_type = attributes.event_type;
    event.event_id = attributes.id;
    event.event_source = attributes.source;
    event.headers = cloudevent::header_map(&headers);
    event.payload = body.to_vec();
    event.security = SecurityContext {
        bearer_token,
        tls: conn.tls,
    };
    let status = event.status_code;

    let sequence = state.store.append(&state.name, event);
    tracing::debug!(
        receiver = %state.name,
        sequence,
        ?kind,
        %method,
        path = uri.path(),
        peer = ?conn.peer,
        "captured request"
    );

    StatusCode::from_u16(status).unwrap_or(StatusCode::ACCEPTED)
}

/// A receiver accepting connections until stopped or dropped.
pub struct RunningReceiver {
    addr: SocketAddr,
    tls: bool,
    shutdown: CancelSignal,
    task: Option<JoinHandle<()>>,
}

impl RunningReceiver {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// `http(s)://<addr>/`.
    pub fn uri(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}/", self.addr)
    }

    /// Stops accepting and waits for the accept loop to exit.
    pub async fn stop(mut self) {
        self.shutdown.cancel(CancelReason::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RunningReceiver {
    fn drop(&mut self) {
        self.shutdown.cancel(CancelReason::Shutdown);
    }
}

impl std::fmt::Debug for RunningReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningReceiver")
            .field("addr", &self.addr)
            .field("tls", &self.tls)
            .finish()
    }
}

/// Binds `127.0.0.1:0` and serves `app`, over TLS when `tls` is set.
pub async fn start(app: Router, tls: Option<Arc<ServerConfig>>) -> Result<RunningReceiver> {
    start_on("127.0.0.1:0".parse().context("loopback address")?, app, tls).await
}

pub async fn start_on(
    bind: SocketAddr,
    app: Router,
    tls: Option<Arc<ServerConfig>>,
) -> Result<RunningReceiver> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("bind receiver on {bind}"))?;
    let addr = listener.local_addr().context("receiver local address")?;
    let shutdown = CancelSignal::new();
    let acceptor = tls.clone().map(TlsAcceptor::from);

    let stop = shutdown.clone();
    let task = tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                _ = stop.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            };
            let app = app.clone();
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                match acceptor {
                    Some(acceptor) => {
                        let stream = match acceptor.accept(stream).await {
                            Ok(stream) => stream,
                            Err(e) => {
                                tracing::debug!(%peer, error = %e, "TLS handshake failed");
                                return;
                            }
                        };
                        let (_, session) = stream.get_ref();
                        let info = PeerTls {
                            protocol: session.protocol_version().map(|v| format!("{v:?}")),
                            server_name: session.server_name().map(str::to_string),
                        };
                        serve_connection(
                            stream,
                            app,
                            ConnInfo {
                                peer: Some(peer),
                                tls: Some(info),
                            },
                        )
                        .await;
                    }
                    None => {
                        serve_connection(
                            stream,
                            app,
                            ConnInfo {
                                peer: Some(peer),
                                tls: None,
                            },
                        )
                        .await;
                    }
                }
            });
        }
        tracing::debug!(%addr, "receiver stopped accepting");
    });

    tracing::info!(%addr, tls = tls.is_some(), "receiver listening");
    Ok(RunningReceiver {
        addr,
        tls: tls.is_some(),
        shutdown,
        task: Some(task),
    })
}

async fn serve_connection<I>(io: I, app: Router, info: ConnInfo)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let peer = info.peer;
    let app = app.layer(Extension(info));
    let service = hyper::service::service_fn(move |request: hyper::Request<Incoming>| {
        app.clone().oneshot(request)
    });
    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(io), service)
        .await
    {
        tracing::debug!(peer = ?peer, error = %e, "connection closed with error");
    }
}
