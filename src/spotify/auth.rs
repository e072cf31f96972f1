use async_trait::async_trait;
use http_body_util::Full;
use hyper::{
    body::{Bytes, Incoming},
    header::{self, HeaderValue},
    server::conn::http1,
    service::service_fn,
    Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use std::{collections::HashMap, convert::Infallible, net::SocketAddr, sync::Arc};
use thiserror::Error;
use tokio::{net::TcpListener, sync::Notify, task::JoinHandle};
use tracing::{debug, error, info, warn};

use super::SpotifyError;

pub const CALLBACK_PATH: &str = "/callback";

const PLACEHOLDER: &str =
    "spotify-status-bot callback server running. Waiting for Spotify redirect...";
const SUCCESS: &str = "Authorization successful! You can close this window. \
The bot will now start updating your status.";
const EXCHANGE_FAILED: &str = "Error during Spotify authorization. Check bot console.";

/// Receives the authorization code from the redirect.
#[async_trait]
pub trait AuthCompletion: Send + Sync + 'static {
    async fn complete(&self, code: &str) -> Result<(), SpotifyError>;
}

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("callback address {0} is already in use")]
    AddrInUse(SocketAddr),
    #[error("failed to bind callback server on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
}

/// A running listener. Dropping the handle does not stop it; call `stop`.
pub struct CallbackHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl CallbackHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn stop(&self) {
        self.shutdown.notify_one();
    }

    /// Waits until the accept loop has exited.
    pub async fn closed(self) {
        if let Err(e) = self.task.await {
            warn!("Callback server task failed: {e}");
        }
    }
}

pub struct CallbackListener;

impl CallbackListener {
    /// Binds `addr` and serves until a `code` or `error` redirect arrives.
    pub async fn start(
        addr: SocketAddr,
        completion: Arc<dyn AuthCompletion>,
    ) -> Result<CallbackHandle, CallbackError> {
        info!("Starting callback server");
        let listener = TcpListener::bind(addr).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::AddrInUse {
                CallbackError::AddrInUse(addr)
            } else {
                CallbackError::Bind { addr, source }
            }
        })?;
        let local_addr = listener.local_addr().unwrap_or(addr);
        info!("Callback server listening on http://{local_addr}{CALLBACK_PATH}");

        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn(accept_loop(listener, completion, Arc::clone(&shutdown)));
        Ok(CallbackHandle {
            shutdown,
            task,
            local_addr,
        })
    }
}

async fn accept_loop(
    listener: TcpListener,
    completion: Arc<dyn AuthCompletion>,
    shutdown: Arc<Notify>,
) {
    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("Failed to accept callback connection: {e}");
                        continue;
                    }
                };
                let completion = Arc::clone(&completion);
                let shutdown = Arc::clone(&shutdown);
                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let completion = Arc::clone(&completion);
                        let shutdown = Arc::clone(&shutdown);
                        async move {
                            Ok::<_, Infallible>(handle(req, completion.as_ref(), &shutdown).await)
                        }
                    });
                    if let Err(e) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        debug!("Callback connection from {peer} ended: {e}");
                    }
                });
            }
        }
    }
    info!("Callback server closed");
}

async fn handle(
    req: Request<Incoming>,
    completion: &dyn AuthCompletion,
    shutdown: &Notify,
) -> Response<Full<Bytes>> {
    debug!("Received request: {} {}", req.method(), req.uri());
    if req.uri().path() != CALLBACK_PATH {
        return text(StatusCode::OK, PLACEHOLDER);
    }

    let params = parse_query(req.uri().query().unwrap_or(""));
    if let Some(code) = params.get("code") {
        info!("Received Spotify authorization code, exchanging for tokens");
        let response = match completion.complete(code).await {
            Ok(()) => text(StatusCode::OK, SUCCESS),
            Err(e) => {
                error!("Error exchanging Spotify code for tokens: {e}");
                text(StatusCode::INTERNAL_SERVER_ERROR, EXCHANGE_FAILED)
            }
        };
        shutdown.notify_one();
        response
    } else if let Some(reason) = params.get("error") {
        error!("Authorization error from Spotify redirect: {reason}");
        shutdown.notify_one();
        text(
            StatusCode::BAD_REQUEST,
            format!("Spotify authorization failed: {reason}. Please try again or check bot console."),
        )
    } else {
        text(StatusCode::OK, PLACEHOLDER)
    }
}

fn text(status: StatusCode, body: impl Into<String>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.into())));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

/// Decodes an `application/x-www-form-urlencoded` query string.
pub(crate) fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = decode(parts.next()?)?;
            let value = decode(parts.next().unwrap_or(""))?;
            Some((key, value))
        })
        .collect()
}

fn decode(raw: &str) -> Option<String> {
    urlencoding::decode(&raw.replace('+', " "))
        .ok()
        .map(|s| s.into_owned())
}
