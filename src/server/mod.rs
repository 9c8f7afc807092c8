//! Range-aware file server
//!
//! Exposes one resource per torrent file (by index or exact name) plus
//! `/.m3u`, `/.json` and `/`, which serves the default file. Reads wait on
//! the engine for bytes that are still downloading. When a client goes
//! away the response body is dropped, which cancels the engine read.

pub mod manifest;
pub mod range;

use crate::engine::ByteRange;
use crate::models::{FileInfo, SwarmSnapshot};
use crate::session::{FileHandle, TorrentSession};
use bytes::Bytes;
use futures_util::TryStreamExt;
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, Empty, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

pub type Body = UnsyncBoxBody<Bytes, std::io::Error>;

/// Decides which files the playlist and telemetry document list
pub type FileFilter = Arc<dyn Fn(&FileInfo) -> bool + Send + Sync>;

/// Default idle timeout for accepted sockets
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(3600);

/// Pause after a failed accept, e.g. when out of file descriptors
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

const DLNA_FEATURES: &str = "DLNA.ORG_OP=01;DLNA.ORG_CI=0;DLNA.ORG_FLAGS=01700000000000000000000000000000";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Torrent has no files to serve")]
    NoFiles,
    #[error("No file at index {0}")]
    BadIndex(usize),
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    /// 0 picks an ephemeral port
    pub port: u16,
    /// File served at `/`. Defaults to the largest file.
    pub index: Option<usize>,
    pub idle_timeout: Duration,
    pub filter: Option<FileFilter>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8888,
            index: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            filter: None,
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("index", &self.index)
            .field("idle_timeout", &self.idle_timeout)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

struct ServerState {
    session: Arc<TorrentSession>,
    snapshots: watch::Receiver<Arc<SwarmSnapshot>>,
    default_index: usize,
    filter: Option<FileFilter>,
    local_addr: SocketAddr,
}

impl ServerState {
    fn listed(&self) -> impl Iterator<Item = (usize, &FileInfo)> {
        self.session
            .files()
            .iter()
            .filter(move |f| self.filter.as_ref().map(|keep| keep(&f.info)).unwrap_or(true))
            .map(|f| (f.index, &f.info))
    }
}

/// A listening file server
pub struct FileServer {
    local_addr: SocketAddr,
    default_index: usize,
    task: JoinHandle<()>,
}

impl FileServer {
    /// Bind and start serving `session`. Selects the default file on the
    /// engine. Falls back to an ephemeral port when the configured one is
    /// taken.
    pub async fn bind(
        session: Arc<TorrentSession>,
        snapshots: watch::Receiver<Arc<SwarmSnapshot>>,
        config: ServerConfig,
    ) -> Result<Self, ServerError> {
        let default_index = match config.index {
            Some(index) if session.file(index).is_some() => index,
            Some(index) => return Err(ServerError::BadIndex(index)),
            None => session.default_index().ok_or(ServerError::NoFiles)?,
        };
        if let Some(file) = session.file(default_index) {
            if let Err(e) = file.select() {
                tracing::warn!(index = default_index, error = %e, "failed to select default file");
            }
        }

        let wanted = SocketAddr::new(config.host, config.port);
        let listener = match TcpListener::bind(wanted).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::warn!(addr = %wanted, error = %e, "port unavailable, using an ephemeral port");
                let fallback = SocketAddr::new(config.host, 0);
                TcpListener::bind(fallback)
                    .await
                    .map_err(|source| ServerError::Bind {
                        addr: fallback,
                        source,
                    })?
            }
        };
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: wanted,
            source,
        })?;
        tracing::info!(addr = %local_addr, default_index, "file server listening");

        let state = Arc::new(ServerState {
            session,
            snapshots,
            default_index,
            filter: config.filter,
            local_addr,
        });
        let task = tokio::spawn(accept_loop(listener, state, config.idle_timeout));

        Ok(Self {
            local_addr,
            default_index,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn default_index(&self) -> usize {
        self.default_index
    }

    /// Stop accepting and drop every open connection
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for FileServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<ServerState>, idle_timeout: Duration) {
    // Dropping the set aborts in-flight connections
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, remote) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        accept_failed(&e).await;
                        continue;
                    }
                };
                let state = state.clone();
                connections.spawn(async move {
                    let io = TokioIo::new(socket);
                    let service = service_fn(move |req| handle(req, state.clone()));
                    let result = http1::Builder::new()
                        .timer(TokioTimer::new())
                        .header_read_timeout(idle_timeout)
                        .keep_alive(true)
                        .serve_connection(io, service)
                        .await;
                    if let Err(e) = result {
                        tracing::debug!(peer = %remote, error = %e, "connection closed");
                    }
                });
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn accept_failed(e: &std::io::Error) {
    tracing::error!(error = %e, "failed to accept connection");
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}

fn empty() -> Body {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync()
}

fn full(text: impl Into<Bytes>) -> Body {
    Full::new(text.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

fn status(code: StatusCode) -> Response<Body> {
    let mut resp = Response::new(empty());
    *resp.status_mut() = code;
    resp
}

fn header_str<'a>(req: &'a Request<Incoming>, name: header::HeaderName) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

async fn handle(
    req: Request<Incoming>,
    state: Arc<ServerState>,
) -> Result<Response<Body>, Infallible> {
    let origin = req.headers().get(header::ORIGIN).cloned();

    if req.method() == Method::OPTIONS {
        if let Some(requested) = req.headers().get(header::ACCESS_CONTROL_REQUEST_HEADERS) {
            let mut resp = status(StatusCode::OK);
            let headers = resp.headers_mut();
            if let Some(origin) = origin {
                headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
            }
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static("POST, GET, OPTIONS"),
            );
            headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
            headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("1728000"));
            return Ok(resp);
        }
    }

    let mut resp = route(&req, &state);
    if let Some(origin) = origin {
        resp.headers_mut()
            .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    }
    Ok(resp)
}

fn route(req: &Request<Incoming>, state: &ServerState) -> Response<Body> {
    let path = req.uri().path();
    if path == "/favicon.ico" {
        return status(StatusCode::NOT_FOUND);
    }

    let host = header_str(req, header::HOST)
        .map(str::to_string)
        .unwrap_or_else(|| state.local_addr.to_string());

    let key = match path {
        "/" => state.default_index.to_string(),
        "/.json" => {
            let snapshot = state.snapshots.borrow().clone();
            let doc = manifest::telemetry_document(&host, state.listed(), &snapshot);
            return match serde_json::to_string_pretty(&doc) {
                Ok(body) => Response::builder()
                    .header(header::CONTENT_TYPE, "application/json; charset=utf-8")
                    .body(full(body))
                    .unwrap_or_else(|_| status(StatusCode::INTERNAL_SERVER_ERROR)),
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode telemetry");
                    status(StatusCode::INTERNAL_SERVER_ERROR)
                }
            };
        }
        "/.m3u" => {
            let body = manifest::playlist(&host, state.listed());
            return Response::builder()
                .header(header::CONTENT_TYPE, "application/x-mpegurl; charset=utf-8")
                .body(full(body))
                .unwrap_or_else(|_| status(StatusCode::INTERNAL_SERVER_ERROR));
        }
        other => {
            let raw = other.trim_start_matches('/');
            urlencoding::decode(raw)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| raw.to_string())
        }
    };

    match state.session.find(&key) {
        Some(file) => serve_file(req, file),
        None => status(StatusCode::NOT_FOUND),
    }
}

fn serve_file(req: &Request<Incoming>, file: &FileHandle) -> Response<Body> {
    let length = file.length();
    let range = header_str(req, header::RANGE).and_then(|h| range::parse_range(h, length));

    let mut builder = Response::builder()
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_TYPE, content_type(file.name()))
        .header("transferMode.dlna.org", "Streaming")
        .header("contentFeatures.dlna.org", DLNA_FEATURES);

    let span = match range {
        Some(r) => {
            builder = builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_LENGTH, r.len())
                .header(header::CONTENT_RANGE, range::content_range(&r, length));
            Some(r)
        }
        None => {
            builder = builder
                .status(StatusCode::OK)
                .header(header::CONTENT_LENGTH, length);
            ByteRange::full(length)
        }
    };

    let body = match span {
        Some(span) if req.method() != Method::HEAD => match file.stream(span) {
            Ok(stream) => StreamBody::new(stream.map_ok(Frame::data)).boxed_unsync(),
            Err(e) => {
                tracing::warn!(file = %file.name(), error = %e, "cannot stream file");
                return status(StatusCode::NOT_FOUND);
            }
        },
        _ => empty(),
    };

    tracing::debug!(
        file = %file.name(),
        method = %req.method(),
        start = span.map(|s| s.start),
        end = span.map(|s| s.end),
        "serving file"
    );
    builder
        .body(body)
        .unwrap_or_else(|_| status(StatusCode::INTERNAL_SERVER_ERROR))
}

/// Content type from the file extension
pub fn content_type(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "wmv" => "video/x-ms-wmv",
        "flv" => "video/x-flv",
        "mpg" | "mpeg" => "video/mpeg",
        "ts" => "video/mp2t",
        "ogv" => "video/ogg",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "srt" => "application/x-subrip",
        "vtt" => "text/vtt",
        "txt" | "nfo" => "text/plain",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        _ => "application/octet-stream",
    }
}
