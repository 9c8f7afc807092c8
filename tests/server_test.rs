//! File Server Tests
//!
//! Real loopback server over an in-memory engine.

use macflix::engine::memory::MemoryFile;
use macflix::engine::{EngineEvent, MemoryEngine};
use macflix::models::{SwarmCounters, TorrentDescriptor};
use macflix::server::{FileServer, ServerConfig};
use macflix::session::TorrentSession;
use macflix::telemetry::Telemetry;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed)).collect()
}

struct Fixture {
    server: FileServer,
    engine: Arc<MemoryEngine>,
    _telemetry: Telemetry,
    _events: mpsc::Sender<EngineEvent>,
}

impl Fixture {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.server.local_addr(), path)
    }
}

async fn serve(index: Option<usize>) -> Fixture {
    let engine = Arc::new(MemoryEngine::new(vec![
        MemoryFile::new("Show/ep1.mkv", pattern(600_000, 1)),
        MemoryFile::new("Show/ep2.mkv", pattern(400_000, 2)),
    ]));
    engine.set_counters(SwarmCounters {
        downloaded: 400_000,
        peers_total: 5,
        peers_active: 2,
        ..Default::default()
    });

    let descriptor = TorrentDescriptor {
        info_hash: None,
        name: "Show".to_string(),
        trackers: Vec::new(),
        info: None,
        metainfo: None,
    };
    let session = Arc::new(TorrentSession::attach(descriptor, engine.clone()));
    let (events_tx, events_rx) = mpsc::channel(8);
    let telemetry = Telemetry::spawn(engine.clone(), events_rx, Duration::from_secs(60));

    let config = ServerConfig {
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        index,
        ..Default::default()
    };
    let server = FileServer::bind(session, telemetry.subscribe(), config)
        .await
        .unwrap();

    Fixture {
        server,
        engine,
        _telemetry: telemetry,
        _events: events_tx,
    }
}

// =============================================================================
// Range Tests
// =============================================================================

#[tokio::test]
async fn test_range_request_is_partial() {
    let fx = serve(None).await;
    let resp = reqwest::Client::new()
        .get(fx.url("/"))
        .header("Range", "bytes=100-199")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 206);
    assert_eq!(resp.headers()["content-length"], "100");
    assert_eq!(resp.headers()["content-range"], "bytes 100-199/600000");
    assert_eq!(resp.headers()["accept-ranges"], "bytes");
    assert_eq!(resp.headers()["content-type"], "video/x-matroska");

    let body = resp.bytes().await.unwrap();
    assert_eq!(&body[..], &pattern(600_000, 1)[100..200]);
}

#[tokio::test]
async fn test_open_ended_range_runs_to_the_end() {
    let fx = serve(None).await;
    let resp = reqwest::Client::new()
        .get(fx.url("/1"))
        .header("Range", "bytes=399990-")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 206);
    assert_eq!(resp.headers()["content-range"], "bytes 399990-399999/400000");
    assert_eq!(resp.bytes().await.unwrap().len(), 10);
}

#[tokio::test]
async fn test_no_range_serves_whole_file() {
    let fx = serve(None).await;
    let resp = reqwest::get(fx.url("/1")).await.unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-length"], "400000");
    let body = resp.bytes().await.unwrap();
    assert_eq!(body.len(), 400_000);
    assert_eq!(&body[..], &pattern(400_000, 2)[..]);
}

#[tokio::test]
async fn test_unsatisfiable_range_serves_whole_file() {
    let fx = serve(None).await;
    let resp = reqwest::Client::new()
        .get(fx.url("/1"))
        .header("Range", "bytes=500000-600000")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-length"], "400000");
}

#[tokio::test]
async fn test_head_has_headers_without_body() {
    let fx = serve(None).await;
    let resp = reqwest::Client::new()
        .head(fx.url("/0"))
        .header("Range", "bytes=0-9")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 206);
    assert_eq!(resp.headers()["content-length"], "10");
    assert!(resp.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_partial_file_waits_for_bytes() {
    let fx = serve(None).await;
    fx.engine.set_available(1, 0);

    let engine = fx.engine.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.set_available(1, 400_000);
    });

    let resp = reqwest::Client::new()
        .get(fx.url("/1"))
        .header("Range", "bytes=0-15")
        .send()
        .await
        .unwrap();
    let body = resp.bytes().await.unwrap();
    assert_eq!(&body[..], &pattern(400_000, 2)[..16]);
}

#[tokio::test]
async fn test_client_disconnect_releases_engine_stream() {
    let fx = serve(None).await;
    fx.engine.set_available(1, 0);

    let resp = reqwest::Client::new()
        .get(fx.url("/1"))
        .header("Range", "bytes=0-15")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 206);

    let wait_for = |want: usize| {
        let engine = fx.engine.clone();
        async move {
            while engine.open_streams() != want {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait_for(1))
        .await
        .expect("stream never opened");

    drop(resp);
    tokio::time::timeout(Duration::from_secs(5), wait_for(0))
        .await
        .expect("stream outlived the client");
}

// =============================================================================
// Routing Tests
// =============================================================================

#[tokio::test]
async fn test_root_serves_largest_file() {
    let fx = serve(None).await;
    assert_eq!(fx.server.default_index(), 0);
    let resp = reqwest::get(fx.url("/")).await.unwrap();
    assert_eq!(resp.headers()["content-length"], "600000");
}

#[tokio::test]
async fn test_root_honors_index() {
    let fx = serve(Some(1)).await;
    let resp = reqwest::get(fx.url("/")).await.unwrap();
    assert_eq!(resp.headers()["content-length"], "400000");
}

#[tokio::test]
async fn test_lookup_by_name() {
    let fx = serve(None).await;
    let resp = reqwest::get(fx.url("/ep2.mkv")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-length"], "400000");
}

#[tokio::test]
async fn test_unknown_paths_are_not_found() {
    let fx = serve(None).await;
    assert_eq!(reqwest::get(fx.url("/favicon.ico")).await.unwrap().status(), 404);
    assert_eq!(reqwest::get(fx.url("/7")).await.unwrap().status(), 404);
    assert_eq!(reqwest::get(fx.url("/missing.mkv")).await.unwrap().status(), 404);
}

#[tokio::test]
async fn test_cors_preflight() {
    let fx = serve(None).await;
    let resp = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, fx.url("/"))
        .header("Origin", "http://player.local")
        .header("Access-Control-Request-Headers", "X-Test")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let headers = resp.headers();
    assert_eq!(headers["access-control-allow-origin"], "http://player.local");
    assert_eq!(headers["access-control-allow-methods"], "POST, GET, OPTIONS");
    assert_eq!(headers["access-control-allow-headers"], "X-Test");
    assert_eq!(headers["access-control-max-age"], "1728000");
    assert!(resp.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_origin_is_echoed() {
    let fx = serve(None).await;
    let resp = reqwest::Client::new()
        .head(fx.url("/"))
        .header("Origin", "http://player.local")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()["access-control-allow-origin"], "http://player.local");
}

// =============================================================================
// Manifest Tests
// =============================================================================

#[tokio::test]
async fn test_status_document() {
    let fx = serve(None).await;
    let doc: serde_json::Value = reqwest::get(fx.url("/.json"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(doc["totalLength"], 1_000_000);
    assert_eq!(doc["downloaded"], 400_000);
    assert_eq!(doc["totalPeers"], 5);
    assert_eq!(doc["activePeers"], 2);
    let files = doc["files"].as_array().unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0]["name"], "ep1.mkv");
    assert_eq!(files[1]["length"], 400_000);
    assert!(files[1]["url"].as_str().unwrap().ends_with("/1"));
}

#[tokio::test]
async fn test_playlist() {
    let fx = serve(None).await;
    let resp = reqwest::get(fx.url("/.m3u")).await.unwrap();
    assert_eq!(resp.headers()["content-type"], "application/x-mpegurl; charset=utf-8");

    let body = resp.text().await.unwrap();
    let addr = fx.server.local_addr();
    assert_eq!(
        body,
        format!(
            "#EXTM3U\n#EXTINF:-1,Show/ep1.mkv\nhttp://{addr}/0\n#EXTINF:-1,Show/ep2.mkv\nhttp://{addr}/1"
        )
    );
}

#[tokio::test]
async fn test_taken_port_falls_back() {
    let first = serve(None).await;
    let engine = Arc::new(MemoryEngine::new(vec![MemoryFile::new("a.mp4", vec![0u8; 10])]));
    let descriptor = TorrentDescriptor {
        info_hash: None,
        name: "a".to_string(),
        trackers: Vec::new(),
        info: None,
        metainfo: None,
    };
    let session = Arc::new(TorrentSession::attach(descriptor, engine.clone()));
    let (_tx, rx) = mpsc::channel(1);
    let telemetry = Telemetry::spawn(engine, rx, Duration::from_secs(60));
    let config = ServerConfig {
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: first.server.port(),
        ..Default::default()
    };

    let second = FileServer::bind(session, telemetry.subscribe(), config).await.unwrap();
    assert_ne!(second.port(), first.server.port());
}

#[tokio::test]
async fn test_concurrent_readers() {
    let fx = serve(None).await;
    let client = reqwest::Client::new();
    let expected = pattern(600_000, 1);

    let requests = (0..8u64).map(|i| {
        let client = client.clone();
        let url = fx.url("/0");
        async move {
            let start = i * 50_000;
            let resp = client
                .get(url)
                .header("Range", format!("bytes={}-{}", start, start + 999))
                .send()
                .await
                .unwrap();
            (start as usize, resp.bytes().await.unwrap())
        }
    });
    let results = futures::future::join_all(requests).await;

    for (start, body) in results {
        assert_eq!(&body[..], &expected[start..start + 1000]);
    }
}
