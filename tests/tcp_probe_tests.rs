use edge_probe_rs::config::PipelineConfig;
use edge_probe_rs::geo::GeoResolver;
use edge_probe_rs::pipeline::Pipeline;
use edge_probe_rs::types::{Candidate, Ranking};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const TRACE: &str = "fl=1\nh=speed.cloudflare.com\nip=127.0.0.1\nuag=Mozilla/5.0\ncolo=SIN\nhttp=http/1.1\nloc=SG\ntls=off\n";

/// Serve the trace body over chunked encoding and report each request head.
async fn spawn_trace_server() -> (u16, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else { return };
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut req = Vec::new();
                let mut buf = [0u8; 1024];
                while !req.windows(4).any(|w| w == b"\r\n\r\n") {
                    match sock.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => req.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = tx.send(String::from_utf8_lossy(&req).into_owned());
                let resp = format!(
                    "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n{:x}\r\n{}\r\n0\r\n\r\n",
                    TRACE.len(),
                    TRACE
                );
                let _ = sock.write_all(resp.as_bytes()).await;
                let _ = sock.shutdown().await;
            });
        }
    });
    (port, rx)
}

async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn probes_real_sockets_over_plain_http() {
    let (open, mut requests) = spawn_trace_server().await;
    let closed = closed_port().await;
    let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);

    let cfg = PipelineConfig {
        tls: false,
        speed_width: 0,
        latency_threshold: Duration::ZERO,
        ..PipelineConfig::default()
    };
    let geo = GeoResolver::from_json(r#"[{"iata":"SIN","city":"Singapore","city_zh":"新加坡"}]"#.as_bytes())
        .unwrap();
    let pipeline = Pipeline::over_tcp(cfg, geo).unwrap().show_progress(false);

    let candidates = vec![
        Candidate::new(localhost, open).unwrap(),
        Candidate::new(localhost, closed).unwrap(),
    ];
    let report = pipeline.run(candidates, CancellationToken::new()).await.unwrap();

    let Ranking::ByLatency(results) = report.ranking else {
        panic!("expected latency ranking");
    };
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].candidate.port, open);
    assert_eq!(results[0].datacenter, "SIN");
    assert_eq!(results[0].location_code, "SG");
    assert_eq!(results[0].geo.city_localized, "新加坡");

    let head = requests.recv().await.unwrap();
    assert!(head.starts_with("GET /cdn-cgi/trace HTTP/1.1\r\n"));
    assert!(head.contains("Host: speed.cloudflare.com\r\n"));
    assert!(head.contains("User-Agent: Mozilla/5.0\r\n"));
}
