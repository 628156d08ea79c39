//! Scripted in-memory network used by the integration tests.
#![allow(dead_code)]

use edge_probe_rs::config::PipelineConfig;
use edge_probe_rs::geo::GeoResolver;
use edge_probe_rs::net::Connector;
use edge_probe_rs::types::Candidate;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

pub const GEO_JSON: &str = r#"[
    {"iata":"LAX","lat":33.94,"lon":-118.4,"cca2":"US","region":"North America",
     "city":"Los Angeles","region_zh":"北美","country":"United States",
     "city_zh":"洛杉矶","emoji":"🇺🇸"},
    {"iata":"HKG","cca2":"HK","region":"Asia Pacific","city":"Hong Kong",
     "region_zh":"亚太","country":"Hong Kong","city_zh":"香港","emoji":"🇭🇰"}
]"#;

#[derive(Debug, Clone)]
pub enum TraceReply {
    Valid { colo: &'static str, loc: &'static str },
    WrongAgent,
    NoTokens,
    /// Sends the head, then a few bytes every 200ms, never finishing.
    Trickle,
}

#[derive(Debug, Clone)]
pub struct DownloadReply {
    pub status: u16,
    pub bytes: usize,
    /// Wait before sending the response head.
    pub delay: Duration,
    /// Advertise a longer body than `bytes` and keep the connection open
    /// after sending them, so the client's deadline ends the download.
    pub hold: bool,
}

impl DownloadReply {
    pub fn fast() -> Self {
        Self {
            status: 200,
            bytes: 4 * 1024 * 1024,
            delay: Duration::ZERO,
            hold: false,
        }
    }

    /// Sends exactly `bytes` and then stalls until the client gives up.
    pub fn held(bytes: usize) -> Self {
        Self {
            status: 200,
            bytes,
            delay: Duration::ZERO,
            hold: true,
        }
    }

    /// Response head arrives only after `delay`.
    pub fn late(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::fast()
        }
    }

    pub fn slow() -> Self {
        Self {
            status: 200,
            bytes: 20 * 1024,
            delay: Duration::from_millis(300),
            hold: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Script {
    pub latency: Duration,
    pub refuse: bool,
    /// Refuse every dial after the first `n`.
    pub refuse_after: Option<usize>,
    pub trace: TraceReply,
    pub download: DownloadReply,
}

impl Script {
    pub fn valid(latency_ms: u64, colo: &'static str) -> Self {
        Self {
            latency: Duration::from_millis(latency_ms),
            refuse: false,
            refuse_after: None,
            trace: TraceReply::Valid { colo, loc: "US" },
            download: DownloadReply::fast(),
        }
    }

    pub fn with_trace(mut self, trace: TraceReply) -> Self {
        self.trace = trace;
        self
    }

    pub fn with_download(mut self, download: DownloadReply) -> Self {
        self.download = download;
        self
    }

    pub fn refusing_after(mut self, dials: usize) -> Self {
        self.refuse_after = Some(dials);
        self
    }

    pub fn refused() -> Self {
        Self {
            refuse: true,
            ..Self::valid(0, "LAX")
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    scripts: Arc<HashMap<SocketAddr, Script>>,
    dials: Arc<Mutex<HashMap<SocketAddr, usize>>>,
}

impl MockConnector {
    pub fn new(scripts: impl IntoIterator<Item = (Candidate, Script)>) -> Self {
        let scripts = scripts
            .into_iter()
            .map(|(c, s)| (c.socket_addr(), s))
            .collect();
        Self {
            scripts: Arc::new(scripts),
            dials: Arc::default(),
        }
    }

    /// How many times `candidate` has been dialed so far.
    pub fn dial_count(&self, candidate: Candidate) -> usize {
        let dials = self.dials.lock().unwrap();
        dials.get(&candidate.socket_addr()).copied().unwrap_or(0)
    }
}

impl Connector for MockConnector {
    type Stream = DuplexStream;

    async fn connect(&self, addr: SocketAddr) -> io::Result<DuplexStream> {
        let Some(script) = self.scripts.get(&addr).cloned() else {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "no route"));
        };
        let attempt = {
            let mut dials = self.dials.lock().unwrap();
            let count = dials.entry(addr).or_insert(0);
            *count += 1;
            *count
        };
        tokio::time::sleep(script.latency).await;
        if script.refuse || script.refuse_after.is_some_and(|n| attempt > n) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        }
        let (client, server) = duplex(64 * 1024);
        tokio::spawn(serve(server, script));
        Ok(client)
    }
}

fn trace_body(agent: &str, colo: &str, loc: &str) -> String {
    format!(
        "fl=1\nh=speed.cloudflare.com\nip=203.0.113.9\nts=0\nvisit_scheme=http\nuag={agent}\ncolo={colo}\nsliver=none\nhttp=http/1.1\nloc={loc}\ntls=off\nsni=off\nwarp=off\n"
    )
}

async fn serve(mut server: DuplexStream, script: Script) {
    let mut req = Vec::new();
    let mut buf = [0u8; 1024];
    while !req.windows(4).any(|w| w == b"\r\n\r\n") {
        match server.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => req.extend_from_slice(&buf[..n]),
        }
    }
    let request = String::from_utf8_lossy(&req);

    if request.starts_with("GET /cdn-cgi/trace") {
        let body = match script.trace {
            TraceReply::Valid { colo, loc } => trace_body("Mozilla/5.0", colo, loc),
            TraceReply::WrongAgent => trace_body("curl/8.0", "LAX", "US"),
            TraceReply::NoTokens => "uag=Mozilla/5.0\nnothing useful\n".to_string(),
            TraceReply::Trickle => {
                let _ = server
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 4096\r\n\r\n")
                    .await;
                loop {
                    if server.write_all(b"uag=Mozilla/5.0\n").await.is_err() {
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
            }
        };
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        let _ = server.write_all(head.as_bytes()).await;
        let _ = server.write_all(body.as_bytes()).await;
        let _ = server.shutdown().await;
        return;
    }

    let dl = script.download;
    tokio::time::sleep(dl.delay).await;
    let advertised = if dl.hold { dl.bytes * 4 + 1 } else { dl.bytes };
    let head = format!(
        "HTTP/1.1 {} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        dl.status, advertised
    );
    if server.write_all(head.as_bytes()).await.is_err() {
        return;
    }
    let chunk = vec![0u8; 16 * 1024];
    let mut left = dl.bytes;
    while left > 0 {
        let n = left.min(chunk.len());
        if server.write_all(&chunk[..n]).await.is_err() {
            return;
        }
        left -= n;
    }
    if dl.hold {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
    let _ = server.shutdown().await;
}

pub fn candidate(last: u8) -> Candidate {
    Candidate::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)), 443).unwrap()
}

pub fn geo() -> GeoResolver {
    GeoResolver::from_json(GEO_JSON.as_bytes()).unwrap()
}

/// Short timeouts so the scripted delays decide every outcome quickly.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        dial_timeout: Duration::from_millis(200),
        response_timeout: Duration::from_millis(300),
        speed_timeout: Duration::from_secs(1),
        latency_threshold: Duration::from_millis(100),
        throughput_threshold_mbs: 1.0,
        probe_width: 8,
        speed_width: 0,
        tls: false,
        ..PipelineConfig::default()
    }
}
