use std::sync::Arc;
use std::time::Duration;

use ap_session::pipeline::{OutputEvent, Subscription};
use ap_session::registry::{RegistryConfig, SessionRegistry};
use ap_session::shell::ShellCommand;
use ap_session::SessionError;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn bash() -> ShellCommand {
    ShellCommand::new("/bin/bash", std::env::temp_dir())
        .arg("--noprofile")
        .arg("--norc")
        .env("TERM", "dumb")
        .env("PS1", "$ ")
}

fn registry_with_capacity(max: usize) -> SessionRegistry {
    SessionRegistry::new(RegistryConfig {
        shell: bash(),
        max_sessions: max,
        output_buffer_bytes: 64 * 1024,
    })
}

fn registry() -> SessionRegistry {
    registry_with_capacity(8)
}

async fn wait_for_exit(sub: &Subscription) -> Option<u32> {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("timed out waiting for exit")
        {
            Some(OutputEvent::Exited { code }) => return code,
            Some(OutputEvent::Data(_)) => continue,
            None => panic!("subscription closed without exit event"),
        }
    }
}

async fn wait_for_buffer(registry: &SessionRegistry, id: &str, needle: &str) {
    let session = registry.get(id).expect("session exists");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !session.recent_output().contains(needle) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {needle:?} in {:?}",
            session.recent_output()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ===========================================================================
// Shared-session pointer
// ===========================================================================

#[tokio::test]
async fn create_session_becomes_shared() {
    let registry = registry();
    assert!(registry.get_shared().is_none());

    let session = registry
        .create_session("conn-a", std::env::temp_dir())
        .expect("create session");

    let shared = registry.get_shared().expect("shared session");
    assert!(Arc::ptr_eq(&shared, &session));
    assert_eq!(registry.shared_id().as_deref(), Some("conn-a"));
    assert_eq!(registry.len(), 1);
    assert!(session.process().is_alive());

    registry.shutdown();
}

#[tokio::test]
async fn newest_session_displaces_shared_and_clears_old_buffer() {
    let registry = registry();
    let a = registry.create_session("conn-a", std::env::temp_dir()).unwrap();
    a.process().write_line("echo from-a").unwrap();
    wait_for_buffer(&registry, "conn-a", "\nfrom-a").await;

    let b = registry.create_session("conn-b", std::env::temp_dir()).unwrap();
    let shared = registry.get_shared().unwrap();
    assert!(Arc::ptr_eq(&shared, &b));
    assert!(!a.recent_output().contains("from-a"));

    // The displaced session is still registered and alive.
    assert!(registry.get("conn-a").is_some());
    assert!(a.process().is_alive());

    registry.shutdown();
}

#[tokio::test]
async fn create_same_id_kills_previous_process_first() {
    let registry = registry();
    let first = registry.create_session("conn", std::env::temp_dir()).unwrap();
    let first_exit = first.pipeline().subscribe();

    let second = registry.create_session("conn", std::env::temp_dir()).unwrap();
    wait_for_exit(&first_exit).await;

    assert!(!first.process().is_alive());
    assert!(second.process().is_alive());
    assert_eq!(registry.len(), 1);
    assert!(Arc::ptr_eq(&registry.get_shared().unwrap(), &second));

    registry.shutdown();
}

#[tokio::test]
async fn destroying_shared_clears_pointer_without_reassigning() {
    let registry = registry();
    registry.create_session("conn-a", std::env::temp_dir()).unwrap();
    let b = registry.create_session("conn-b", std::env::temp_dir()).unwrap();
    let b_exit = b.pipeline().subscribe();

    assert!(registry.destroy_session("conn-b"));
    wait_for_exit(&b_exit).await;

    assert!(registry.get_shared().is_none());
    assert!(registry.get("conn-a").is_some());
    assert!(!registry.destroy_session("conn-b"));

    registry.shutdown();
}

#[tokio::test]
async fn destroying_non_shared_keeps_pointer() {
    let registry = registry();
    registry.create_session("conn-a", std::env::temp_dir()).unwrap();
    registry.create_session("conn-b", std::env::temp_dir()).unwrap();

    assert!(registry.destroy_session("conn-a"));
    assert_eq!(registry.shared_id().as_deref(), Some("conn-b"));

    registry.shutdown();
}

// ===========================================================================
// Limits and failures
// ===========================================================================

#[tokio::test]
async fn capacity_limit_enforced() {
    let registry = registry_with_capacity(1);
    registry.create_session("conn-a", std::env::temp_dir()).unwrap();

    let err = registry
        .create_session("conn-b", std::env::temp_dir())
        .expect_err("expected capacity error");
    match err {
        SessionError::AtCapacity { max } => assert_eq!(max, 1),
        other => panic!("expected AtCapacity, got: {other:?}"),
    }
    assert_eq!(registry.shared_id().as_deref(), Some("conn-a"));

    // Replacing the same connection does not count twice.
    registry
        .create_session("conn-a", std::env::temp_dir())
        .expect("replacement fits");

    registry.shutdown();
}

#[tokio::test]
async fn spawn_failure_registers_nothing() {
    let registry = SessionRegistry::new(RegistryConfig {
        shell: ShellCommand::new("/nonexistent/definitely-not-a-shell", std::env::temp_dir()),
        max_sessions: 4,
        output_buffer_bytes: 1024,
    });

    let err = registry
        .create_session("conn", std::env::temp_dir())
        .expect_err("spawn should fail");
    assert!(matches!(err, SessionError::SpawnFailed(_)), "got: {err:?}");
    assert!(registry.is_empty());
    assert!(registry.get_shared().is_none());
}

#[tokio::test]
async fn list_and_shutdown() {
    let registry = registry();
    registry.create_session("conn-a", std::env::temp_dir()).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    registry.create_session("conn-b", std::env::temp_dir()).unwrap();

    let infos = registry.list();
    assert_eq!(infos.len(), 2);
    assert_eq!(infos[0].id, "conn-a");
    assert!(!infos[0].shared);
    assert!(infos[1].shared);
    assert!(infos.iter().all(|i| i.alive && i.pid.is_some()));

    let sessions: Vec<_> = ["conn-a", "conn-b"]
        .iter()
        .map(|id| registry.get(id).unwrap())
        .collect();
    let subs: Vec<_> = sessions.iter().map(|s| s.pipeline().subscribe()).collect();

    registry.shutdown();
    assert!(registry.is_empty());
    assert!(registry.get_shared().is_none());
    for sub in &subs {
        wait_for_exit(sub).await;
    }
}
