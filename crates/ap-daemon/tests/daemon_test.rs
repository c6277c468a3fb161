use std::sync::Arc;
use std::time::Duration;

use ap_core::config::Config;
use ap_daemon::daemon::Daemon;
use serde_json::Value;

#[test]
fn bind_addr_from_config() {
    let mut config = Config::default();
    config.daemon.host = "0.0.0.0".into();
    config.daemon.port = 4321;
    let daemon = Daemon::new(config);
    assert_eq!(daemon.bind_addr(), "0.0.0.0:4321");
}

#[tokio::test]
async fn serves_until_shutdown() {
    let mut config = Config::default();
    config.workspace.root = std::env::temp_dir();
    let daemon = Arc::new(Daemon::new(config));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind to ephemeral port");
    let addr = listener.local_addr().unwrap();

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = {
        let daemon = daemon.clone();
        tokio::spawn(async move {
            daemon
                .run_with_listener(listener, async {
                    let _ = stop_rx.await;
                })
                .await
        })
    };

    let health: Value = reqwest::get(format!("http://{addr}/api/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["sessions"], 0);

    stop_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop")
        .expect("server task panicked")
        .expect("server returned an error");
    assert!(daemon.state().registry.is_empty());
}
