use edge_probe_rs::upload::{entries_from_list, load_entries, upload};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Accept one request, hand its raw text back, and answer with `status`.
async fn one_shot_collector(status: u16, reply: &'static str) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/ips", listener.local_addr().unwrap());
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut req = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = sock.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            req.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&req).to_string();
            if let Some((head, body)) = text.split_once("\r\n\r\n") {
                let len = head
                    .lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length").then(|| v.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if body.len() >= len {
                    break;
                }
            }
        }
        let resp = format!(
            "HTTP/1.1 {status} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{reply}",
            reply.len()
        );
        sock.write_all(resp.as_bytes()).await.unwrap();
        let _ = tx.send(String::from_utf8_lossy(&req).into_owned());
    });
    (url, rx)
}

#[tokio::test]
async fn posts_plain_text_lines_with_bearer_token() {
    let (url, rx) = one_shot_collector(200, "ok").await;
    let entries = entries_from_list("1.1.1.1 443 Tokyo\n1.0.0.1:2053#HK\n");

    let sent = upload(&entries, &url, Some("secret")).await.unwrap();
    assert_eq!(sent, 2);

    let req = rx.await.unwrap();
    assert!(req.starts_with("POST /ips HTTP/1.1\r\n"));
    let lower = req.to_ascii_lowercase();
    assert!(lower.contains("authorization: bearer secret\r\n"));
    assert!(lower.contains("content-type: text/plain; charset=utf-8\r\n"));
    assert!(req.ends_with("\r\n\r\n1.1.1.1:443#Tokyo\n1.0.0.1:2053#HK"));
}

#[tokio::test]
async fn non_success_status_reports_body() {
    let (url, _rx) = one_shot_collector(403, "bad token").await;
    let entries = entries_from_list("1.1.1.1 443\n");
    let err = upload(&entries, &url, None).await.unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("403"));
    assert!(msg.contains("bad token"));
}

#[test]
fn results_csv_is_read_for_upload() {
    let path = std::env::temp_dir().join(format!("edge-probe-upload-{}.csv", std::process::id()));
    std::fs::write(
        &path,
        "address,port,tls,datacenter,location,region,city,region_localized,country,city_localized,flag,latency,download_mb_s\n\
         104.16.1.1,443,true,LAX,US,North America,Los Angeles,,United States,,,12 ms,8.20\n\
         104.16.1.2,8443,true,RNO,US,,,,,,,30 ms,4.10\n",
    )
    .unwrap();
    let entries = load_entries(&path).unwrap();
    let _ = std::fs::remove_file(&path);

    let lines: Vec<_> = entries.iter().map(|e| e.line()).collect();
    assert_eq!(lines, vec!["104.16.1.1:443#洛杉矶", "104.16.1.2:8443#RNO"]);
}
