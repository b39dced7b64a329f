//! The dev server over a real socket.

use packline_core::config::Config;
use packline_core::dev::{DevHandle, DevLoop, DevOptions, DevState};
use packline_core::Compiler;
use packline_dev::{router, ServerOptions, CLIENT_PATH};
use std::fs;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const CONFIG: &str = r#"{
    "entry": "./src/index.js",
    "output": {"publicPath": "/static/"},
    "rules": [{"test": "\\.js$", "use": ["script"]}],
    "devServer": {"middlewares": ["request-log", "health"]}
}"#;

async fn start(files: &[(&str, &str)]) -> (tempfile::TempDir, SocketAddr, DevHandle) {
    start_with(CONFIG, files).await
}

async fn start_with(config: &str, files: &[(&str, &str)]) -> (tempfile::TempDir, SocketAddr, DevHandle) {
    let dir = tempfile::tempdir().unwrap();
    let root = dunce::canonicalize(dir.path()).unwrap();
    for (name, content) in files {
        let path = root.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    let config = Config::from_json_str(config, &root).unwrap();
    let options = ServerOptions::from_config(&config).unwrap();
    let mut compiler = Compiler::new(config).unwrap();
    compiler.set_hot_client(Some(CLIENT_PATH.to_string()));

    let (dev, handle) = DevLoop::new(compiler, DevOptions::default());
    tokio::spawn(dev.run());
    tokio::time::timeout(Duration::from_secs(10), handle.wait_for_builds(1))
        .await
        .unwrap()
        .unwrap();
    assert!(handle.wait_for_state(DevState::Serving).await);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(handle.clone(), options);
    tokio::spawn(async move { axum::serve(listener, app).await });
    (dir, addr, handle)
}

async fn get(addr: SocketAddr, path: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let text = String::from_utf8_lossy(&raw).into_owned();
    let status = text[9..12].parse().unwrap();
    let body = text
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default();
    (status, body)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_serves_html_chunks_and_client() {
    let (_dir, addr, _handle) = start(&[("src/index.js", "console.log('hi');\n")]).await;

    let (status, html) = get(addr, "/").await;
    assert_eq!(status, 200);
    assert!(html.contains(r#"<script defer src="/__packline/client.js"></script>"#));
    assert!(html.contains(r#"<script defer src="/static/main.js"></script>"#));

    let (status, chunk) = get(addr, "/static/main.js").await;
    assert_eq!(status, 200);
    assert!(chunk.contains("self.packlineChunks"));
    assert!(chunk.contains("console.log('hi');"));

    let (status, client) = get(addr, CLIENT_PATH).await;
    assert_eq!(status, 200);
    assert!(client.contains("/__packline/hot"));

    assert_eq!(get(addr, "/static/missing.js").await.0, 404);
    assert_eq!(get(addr, "/elsewhere.js").await.0, 404);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_health_middleware_answers_first() {
    let (_dir, addr, _handle) = start(&[("src/index.js", "1;\n")]).await;
    let (status, body) = get(addr, "/__packline/health").await;
    assert_eq!(status, 200);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["ok"], true);
    assert_eq!(json["builds"], 1);
    assert_eq!(json["state"], "serving");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_broken_build_serves_error_page() {
    let (_dir, addr, _handle) = start(&[("src/index.js", "import './nope.js';\n")]).await;
    let (status, body) = get(addr, "/").await;
    assert_eq!(status, 500);
    assert!(body.contains("PACKLINE_RESOLVE_FAILED"));
    assert!(body.contains(CLIENT_PATH));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_relative_public_path_serves_from_root() {
    let config = r#"{
        "entry": "./src/index.js",
        "output": {"publicPath": "./"},
        "rules": [{"test": "\\.js$", "use": ["script"]}]
    }"#;
    let (_dir, addr, _handle) = start_with(config, &[("src/index.js", "console.log('rel');\n")]).await;

    let (status, html) = get(addr, "/").await;
    assert_eq!(status, 200);
    assert!(html.contains(r#"<script defer src="./main.js"></script>"#));

    let (status, chunk) = get(addr, "/main.js").await;
    assert_eq!(status, 200);
    assert!(chunk.contains("console.log('rel');"));
}
