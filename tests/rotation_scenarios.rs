use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use credwatch::{Error, RotationOutcome};
use tokio_util::sync::CancellationToken;

mod support;
use support::{at, service_from, wait_for_version, write_secret};

const REDIS_ONLY: &str = r#"
secrets_dir = "."
poll_interval = "20ms"

[retry]
attempts = 3
backoff = "5ms"

[credentials.redis-password]
format = "value"
"#;

const MYSQL_ONLY: &str = r#"
secrets_dir = "."

[credentials.mysql-creds]
format = "key-value"
fields = ["username", "password"]
"#;

#[tokio::test]
async fn redis_password_appears_within_one_poll_interval() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let service = service_from(dir.path(), REDIS_ONLY)?;

    assert!(matches!(
        service.get_credential("redis-password"),
        Err(Error::NotYetAvailable { .. })
    ));

    let cancel = CancellationToken::new();
    let watchers = service.spawn(cancel.clone());

    std::fs::write(dir.path().join("redis-password"), "hunter2\n")?;
    let credential = wait_for_version(&service, "redis-password", 1).await?;

    assert_eq!(credential.version(), 1);
    assert_eq!(credential.value(), Some("hunter2"));
    assert_eq!(credential.field_names().collect::<Vec<_>>(), vec!["value"]);

    watchers.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn empty_rewrite_keeps_last_known_good() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("mysql-creds");
    let service = service_from(dir.path(), MYSQL_ONLY)?;

    write_secret(&path, "username=a\npassword=b\n", at(0))?;
    service.refresh_once().await;

    let credential = service.get_credential("mysql-creds")?;
    assert_eq!(credential.version(), 1);
    assert_eq!(credential.expose("username"), Some("a"));
    assert_eq!(credential.expose("password"), Some("b"));

    write_secret(&path, "", at(10))?;
    let outcomes = service.refresh_once().await;
    assert!(matches!(
        outcomes[0].1,
        RotationOutcome::Rejected(Error::Validation { .. })
    ));

    let credential = service.get_credential("mysql-creds")?;
    assert_eq!(credential.version(), 1);
    assert_eq!(credential.expose("password"), Some("b"));
    Ok(())
}

#[tokio::test]
async fn versions_only_come_from_valid_writes() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("mysql-creds");
    let service = service_from(dir.path(), MYSQL_ONLY)?;

    // (content, expected version afterwards)
    let writes = [
        ("username=a\npassword=1\n", 1),
        ("username=a\n", 1),
        ("username=a\npassword=2\n", 2),
        ("username=a\npassword=2\n", 2),
        ("garbage without equals", 2),
        ("username=a\npassword=\n", 2),
        ("username=b\npassword=3\n", 3),
    ];

    for (i, (content, expected)) in writes.iter().enumerate() {
        write_secret(&path, content, at(i as u64))?;
        service.refresh_once().await;

        let credential = service.get_credential("mysql-creds")?;
        assert_eq!(credential.version(), *expected, "after write {i}: {content:?}");
        assert!(!credential.expose("password").unwrap_or_default().is_empty());
    }

    let credential = service.get_credential("mysql-creds")?;
    assert_eq!(credential.expose("username"), Some("b"));
    assert_eq!(credential.expose("password"), Some("3"));
    Ok(())
}

#[tokio::test]
async fn background_watcher_notifies_subscribers_in_order() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("redis-password");
    let service = service_from(dir.path(), REDIS_ONLY)?;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let _subscription = service.subscribe("redis-password", move |event| {
        log.lock().unwrap().push(event.version);
    })?;

    let cancel = CancellationToken::new();
    let watchers = service.spawn(cancel.clone());

    write_secret(&path, "first", at(0))?;
    wait_for_version(&service, "redis-password", 1).await?;

    write_secret(&path, "second", at(30))?;
    let credential = wait_for_version(&service, "redis-password", 2).await?;
    assert_eq!(credential.value(), Some("second"));

    watchers.shutdown().await;
    assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    Ok(())
}

#[tokio::test]
async fn shutdown_returns_within_a_poll_interval() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let service = service_from(
        dir.path(),
        r#"
secrets_dir = "."
poll_interval = "50ms"
[credentials.redis-password]
[credentials.tfc-creds]
required = false
"#,
    )?;

    let cancel = CancellationToken::new();
    let watchers = service.spawn(cancel.clone());
    tokio::time::sleep(Duration::from_millis(20)).await;

    tokio::time::timeout(Duration::from_secs(2), watchers.shutdown())
        .await
        .expect("watchers did not stop after cancellation");
    Ok(())
}

#[tokio::test]
async fn unknown_name_is_a_configuration_error() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let service = service_from(dir.path(), REDIS_ONLY)?;

    let err = service.get_credential("mongodb-uri").unwrap_err();
    assert!(matches!(err, Error::UnknownCredential { .. }));
    assert!(!err.is_transient());

    let err = service.get_credential("redis-password").unwrap_err();
    assert!(err.is_transient());
    Ok(())
}
