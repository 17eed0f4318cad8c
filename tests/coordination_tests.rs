/// In-memory ensemble tests
///
/// Node model, sessions and watches of the in-process coordination service.
/// Run with: cargo test --test coordination_tests

use std::time::Duration;
use zookeeper_master::coordination::{ConnectRequest, Session, SessionEvent};
use zookeeper_master::{CoordinationError, CoordinationService, CreateMode, Credentials, InMemoryEnsemble};

fn request() -> ConnectRequest {
    ConnectRequest {
        connect_string: "localhost:2181".to_string(),
        session_timeout: Duration::from_secs(30),
        credentials: None,
    }
}

async fn open(ensemble: &InMemoryEnsemble) -> Session {
    ensemble.connect(request()).await.unwrap()
}

#[tokio::test]
async fn test_sequential_names_are_monotonic() {
    let ensemble = InMemoryEnsemble::new();
    let session = open(&ensemble).await;
    ensemble.ensure_path(session.id, "/seq/group").await.unwrap();

    let first = ensemble
        .create(session.id, "/seq/group/member-", Vec::new(), CreateMode::EphemeralSequential)
        .await
        .unwrap();
    let second = ensemble
        .create(session.id, "/seq/group/member-", Vec::new(), CreateMode::EphemeralSequential)
        .await
        .unwrap();
    assert_eq!(first, "/seq/group/member-0000000001");
    assert_eq!(second, "/seq/group/member-0000000002");

    // Deleting does not reuse numbers.
    ensemble.delete(session.id, &second).await.unwrap();
    let third = ensemble
        .create(session.id, "/seq/group/member-", Vec::new(), CreateMode::EphemeralSequential)
        .await
        .unwrap();
    assert_eq!(third, "/seq/group/member-0000000003");

    let children = ensemble.get_children(session.id, "/seq/group").await.unwrap();
    assert_eq!(children, vec!["member-0000000001", "member-0000000003"]);
}

#[tokio::test]
async fn test_node_errors() {
    let ensemble = InMemoryEnsemble::new();
    let session = open(&ensemble).await;

    let err = ensemble
        .create(session.id, "/missing/child", Vec::new(), CreateMode::Persistent)
        .await
        .err()
        .unwrap();
    assert_eq!(err, CoordinationError::NoNode("/missing".to_string()));

    ensemble.ensure_path(session.id, "/a/b").await.unwrap();
    let err = ensemble
        .create(session.id, "/a/b", Vec::new(), CreateMode::Persistent)
        .await
        .err()
        .unwrap();
    assert_eq!(err, CoordinationError::NodeExists("/a/b".to_string()));

    let err = ensemble.delete(session.id, "/a").await.err().unwrap();
    assert_eq!(err, CoordinationError::NotEmpty("/a".to_string()));

    let err = ensemble.get_data(session.id, "/nope").await.err().unwrap();
    assert_eq!(err, CoordinationError::NoNode("/nope".to_string()));

    let err = ensemble.ensure_path(session.id, "no/slash").await.err().unwrap();
    assert!(matches!(err, CoordinationError::InvalidPath(_)));
}

#[tokio::test]
async fn test_ephemerals_die_with_their_session() {
    let ensemble = InMemoryEnsemble::new();
    let owner = open(&ensemble).await;
    let mut watcher = open(&ensemble).await;

    ensemble.ensure_path(watcher.id, "/live").await.unwrap();
    ensemble.watch_children(watcher.id, "/live").await.unwrap();
    let entry = ensemble
        .create(owner.id, "/live/e-", b"data".to_vec(), CreateMode::EphemeralSequential)
        .await
        .unwrap();
    assert_eq!(ensemble.ephemeral_owner(&entry), Some(owner.id));
    assert_eq!(
        watcher.events.recv().await.unwrap(),
        SessionEvent::ChildrenChanged { path: "/live".to_string() }
    );

    let mut owner_events = owner.events;
    assert!(ensemble.expire_session(owner.id));
    assert_eq!(owner_events.recv().await.unwrap(), SessionEvent::Expired);
    assert!(!ensemble.node_exists(&entry));
    assert!(ensemble.node_exists("/live"));
    assert_eq!(
        watcher.events.recv().await.unwrap(),
        SessionEvent::ChildrenChanged { path: "/live".to_string() }
    );

    let err = ensemble.get_data(owner.id, "/live").await.err().unwrap();
    assert_eq!(err, CoordinationError::SessionExpired(owner.id));
    assert!(!ensemble.expire_session(owner.id));
}

#[tokio::test]
async fn test_data_change_notifies_parent_watchers() {
    let ensemble = InMemoryEnsemble::new();
    let mut session = open(&ensemble).await;
    ensemble.ensure_path(session.id, "/data").await.unwrap();
    ensemble
        .create(session.id, "/data/n", b"1".to_vec(), CreateMode::Ephemeral)
        .await
        .unwrap();
    ensemble.watch_children(session.id, "/data").await.unwrap();

    ensemble.set_data(session.id, "/data/n", b"2".to_vec()).await.unwrap();
    assert_eq!(
        session.events.recv().await.unwrap(),
        SessionEvent::ChildrenChanged { path: "/data".to_string() }
    );
    assert_eq!(ensemble.data("/data/n"), Some(b"2".to_vec()));

    ensemble.unwatch_children(session.id, "/data").await.unwrap();
    ensemble.set_data(session.id, "/data/n", b"3".to_vec()).await.unwrap();
    assert!(session.events.try_recv().is_err());
}

#[tokio::test]
async fn test_suspended_session_keeps_its_nodes() {
    let ensemble = InMemoryEnsemble::new();
    let mut session = open(&ensemble).await;
    ensemble.ensure_path(session.id, "/susp").await.unwrap();
    ensemble
        .create(session.id, "/susp/e", Vec::new(), CreateMode::Ephemeral)
        .await
        .unwrap();

    assert!(ensemble.suspend_session(session.id));
    assert!(!ensemble.suspend_session(session.id));
    assert_eq!(session.events.recv().await.unwrap(), SessionEvent::Disconnected);
    let err = ensemble.exists(session.id, "/susp/e").await.err().unwrap();
    assert_eq!(err, CoordinationError::ConnectionLoss);
    assert!(ensemble.node_exists("/susp/e"));

    assert!(ensemble.resume_session(session.id));
    assert_eq!(session.events.recv().await.unwrap(), SessionEvent::Reconnected);
    assert!(ensemble.exists(session.id, "/susp/e").await.unwrap());
}

#[tokio::test]
async fn test_close_session_removes_ephemerals() {
    let ensemble = InMemoryEnsemble::new();
    let session = open(&ensemble).await;
    ensemble.ensure_path(session.id, "/closed").await.unwrap();
    ensemble
        .create(session.id, "/closed/e", Vec::new(), CreateMode::Ephemeral)
        .await
        .unwrap();

    ensemble.close_session(session.id).await.unwrap();
    assert_eq!(ensemble.session_count(), 0);
    assert!(!ensemble.node_exists("/closed/e"));
    assert!(ensemble.node_exists("/closed"));
}

#[tokio::test]
async fn test_connect_faults() {
    let ensemble = InMemoryEnsemble::new();

    ensemble.set_available(false);
    let err = ensemble.connect(request()).await.err().unwrap();
    assert!(matches!(err, CoordinationError::Unavailable(_)));
    assert!(err.is_retryable());
    ensemble.set_available(true);

    ensemble.require_credentials(Some(Credentials::digest("master", "secret")));
    let err = ensemble.connect(request()).await.err().unwrap();
    assert_eq!(err, CoordinationError::AuthFailed("digest".to_string()));
    assert!(!err.is_retryable());

    let mut with_auth = request();
    with_auth.credentials = Some(Credentials::digest("master", "secret"));
    assert!(ensemble.connect(with_auth).await.is_ok());
}
