//! Single-request HTTP/1.1 client that runs over a stream the caller already
//! dialed.
//!
//! The probe stage needs the request to travel on the exact connection whose
//! handshake it just timed, so a pooled client is not an option here.
use crate::error::ProbeError;
use anyhow::{bail, Context, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper::{header, Request};
use hyper_util::rt::TokioIo;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

/// Any duplex byte stream a request can be written to.
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

/// Host and request path of a URL. The scheme is chosen per run, so it is
/// accepted on input but not stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTarget {
    pub host: String,
    pub path: String,
}

impl HttpTarget {
    pub fn parse(url: &str) -> Result<Self> {
        let trimmed = url.trim();
        let rest = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
            .unwrap_or(trimmed);
        let (host, path) = match rest.find(['/', '?']) {
            Some(i) => rest.split_at(i),
            None => (rest, "/"),
        };
        if host.is_empty() || host.chars().any(char::is_whitespace) {
            bail!("invalid host in url: {url}");
        }
        let path = if path.starts_with('?') {
            format!("/{path}")
        } else {
            path.to_string()
        };
        Ok(Self {
            host: host.to_string(),
            path,
        })
    }

    pub fn url(&self, tls: bool) -> String {
        let scheme = if tls { "https" } else { "http" };
        format!("{scheme}://{}{}", self.host, self.path)
    }

    /// Host without any port suffix, as used for SNI and certificate checks.
    pub fn server_name(&self) -> &str {
        if let Some(inner) = self.host.strip_prefix('[') {
            return inner.split(']').next().unwrap_or(inner);
        }
        self.host.split(':').next().unwrap_or(&self.host)
    }
}

/// Issues single `GET` requests over caller-provided streams, wrapping them in
/// TLS first when enabled.
pub struct HttpClient {
    tls: Option<tokio_native_tls::TlsConnector>,
    user_agent: String,
}

impl HttpClient {
    pub fn new(tls: bool, user_agent: impl Into<String>) -> Result<Self> {
        let tls = if tls {
            let connector = native_tls::TlsConnector::new().context("failed to build TLS connector")?;
            Some(tokio_native_tls::TlsConnector::from(connector))
        } else {
            None
        };
        Ok(Self {
            tls,
            user_agent: user_agent.into(),
        })
    }

    /// Send `GET target` on `stream` and wait for the final response head.
    /// Interim 1xx responses are skipped. The body stays on the wire for the
    /// caller to consume.
    pub async fn get<S>(&self, stream: S, target: &HttpTarget) -> Result<HttpResponse, ProbeError>
    where
        S: Io + 'static,
    {
        let io: Box<dyn Io> = match &self.tls {
            Some(connector) => Box::new(connector.connect(target.server_name(), stream).await?),
            None => Box::new(stream),
        };
        let request = Request::get(target.path.as_str())
            .header(header::HOST, target.host.as_str())
            .header(header::USER_AGENT, self.user_agent.as_str())
            .header(header::ACCEPT, "*/*")
            .header(header::CONNECTION, "close")
            .body(Empty::<Bytes>::new())
            .map_err(|e| ProbeError::Malformed(format!("bad request: {e}")))?;

        let (mut sender, conn) = http1::Builder::new()
            .title_case_headers(true)
            .handshake::<_, Empty<Bytes>>(TokioIo::new(io))
            .await?;
        let driver = tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::trace!(error = %e, "connection closed with error");
            }
        });

        match sender.send_request(request).await {
            Ok(head) => Ok(HttpResponse {
                status: head.status().as_u16(),
                body: Some(head.into_body()),
                driver,
            }),
            Err(e) => {
                driver.abort();
                Err(e.into())
            }
        }
    }
}

/// Response head plus the not-yet-read body. Dropping it tears down the
/// connection.
pub struct HttpResponse {
    pub status: u16,
    body: Option<Incoming>,
    driver: JoinHandle<()>,
}

impl Drop for HttpResponse {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Next decoded body chunk, or `None` once the body is complete.
    async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        let Some(body) = self.body.as_mut() else {
            return Ok(None);
        };
        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(io::Error::other)?;
            if let Ok(data) = frame.into_data() {
                return Ok(Some(data));
            }
        }
        self.body = None;
        Ok(None)
    }

    /// Collect the whole body, failing once it grows past `limit` bytes.
    pub async fn read_to_end(&mut self, limit: usize) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk().await? {
            if out.len() + chunk.len() > limit {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "body exceeds limit"));
            }
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Discard body bytes until the body ends or `deadline` passes, returning
    /// how many bytes arrived. Reaching the deadline is not an error.
    pub async fn drain_until(&mut self, deadline: Instant) -> io::Result<u64> {
        let mut total = 0u64;
        loop {
            match time::timeout_at(deadline, self.next_chunk()).await {
                Ok(Ok(Some(chunk))) => total += chunk.len() as u64,
                Ok(Ok(None)) | Err(_) => return Ok(total),
                Ok(Err(e)) => return Err(e),
            }
        }
    }
}
