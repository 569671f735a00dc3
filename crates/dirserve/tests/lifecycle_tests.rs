//! End-to-end tests through the lifecycle manager and a real listener.

use std::fs;
use std::time::Duration;

use dirserve::{Config, ControlError, ServerManager};
use tempfile::TempDir;

fn free_port() -> u16 {
    let socket = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}

fn manager(lookup: &TempDir) -> ServerManager {
    ServerManager::new(Config {
        lookup_dir: lookup.path().to_path_buf(),
        log_file: lookup.path().join("log.txt"),
        ..Config::default()
    })
}

#[tokio::test]
async fn test_serves_files_until_stopped() {
    let root = TempDir::new().unwrap();
    let lookup = TempDir::new().unwrap();
    fs::write(root.path().join("hello.txt"), "hello world").unwrap();
    fs::create_dir_all(lookup.path().join("txt")).unwrap();
    fs::write(lookup.path().join("txt/7.txt"), "seven").unwrap();

    let manager = manager(&lookup);
    let port = free_port();
    let base = format!("http://127.0.0.1:{}", port);

    manager
        .start(root.path().to_str().unwrap(), "127.0.0.1", &port.to_string())
        .await
        .unwrap();

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();

    let response = client
        .get(format!("{}/hello.txt", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "hello world");

    let response = client
        .get(format!("{}/lookup/get/7", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "seven");

    let form = reqwest::multipart::Form::new().part(
        "files",
        reqwest::multipart::Part::bytes(b"uploaded".to_vec()).file_name("up.txt"),
    );
    let response = client
        .post(format!("{}/", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        fs::read_to_string(root.path().join("up.txt")).unwrap(),
        "uploaded"
    );

    manager.stop().await.unwrap();
    assert!(!manager.is_running().await);

    // The listener is gone once stop returns.
    let fresh = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    assert!(
        fresh
            .get(format!("{}/hello.txt", base))
            .send()
            .await
            .is_err()
    );

    let logs = manager.logs().snapshot();
    assert!(logs.iter().any(|line| line.starts_with("Serving directory:")));
    assert!(logs.iter().any(|line| line.starts_with("File uploaded:")));
}

#[tokio::test]
async fn test_restart_on_same_port() {
    let root = TempDir::new().unwrap();
    let lookup = TempDir::new().unwrap();
    let dir = root.path().to_str().unwrap();
    let port = free_port().to_string();
    let manager = manager(&lookup);

    for _ in 0..3 {
        manager.start(dir, "127.0.0.1", &port).await.unwrap();
        assert!(matches!(
            manager.start(dir, "127.0.0.1", &port).await,
            Err(ControlError::AlreadyRunning)
        ));
        manager.stop().await.unwrap();
    }
    assert!(matches!(manager.stop().await, Err(ControlError::NotRunning)));
}

#[tokio::test]
async fn test_log_saving_writes_file() {
    let lookup = TempDir::new().unwrap();
    let manager = manager(&lookup);

    manager.logs().set_saving(true);
    manager.logs().append("persist me");

    let log_file = lookup.path().join("log.txt");
    let mut content = String::new();
    for _ in 0..50 {
        content = fs::read_to_string(&log_file).unwrap_or_default();
        if content.contains("persist me") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(content.contains("persist me"));
    assert!(content.starts_with('['));

    manager.logs().set_saving(false);
    assert!(!manager.logs().is_saving());
}
