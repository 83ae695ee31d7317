//! Config files and storage backends on a real filesystem

use thpoll_core::{
    build_storage, AppConfig, ConfigError, SensorRecord, StorageConfig, StorageKind,
};

fn record(name: &str) -> SensorRecord {
    SensorRecord {
        timestamp: chrono::Local::now(),
        sensor_name: name.to_string(),
        slave_id: 2,
        temperature: 23.4,
        humidity: 45.6,
    }
}

#[test]
fn test_config_round_trip_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("thpoll.toml");

    let mut config = AppConfig::default();
    config.read_interval = 10.0;
    config.storage.kind = StorageKind::Jsonl;
    config.storage.path = Some(dir.path().join("out.jsonl"));
    config.save(&path).unwrap();

    let loaded = AppConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
    loaded.validate().unwrap();
}

#[test]
fn test_invalid_config_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("thpoll.toml");
    std::fs::write(
        &path,
        r#"
        read_interval = 1

        [[ports]]
        name = "bus"
        port = "/dev/ttyS0"

        [[sensors]]
        name = "lost"
        port = "elsewhere"
        slave_id = 1
        "#,
    )
    .unwrap();

    let config = AppConfig::load(&path).unwrap();
    match config.validate() {
        Err(ConfigError::Invalid(msg)) => assert!(msg.contains("elsewhere")),
        other => panic!("expected validation failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_csv_sink_appends_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let storage = StorageConfig {
        kind: StorageKind::Csv,
        path: Some(dir.path().join("readings.csv")),
        ..StorageConfig::default()
    };

    for name in ["first", "second"] {
        let mut sink = build_storage(&storage).await.unwrap().unwrap();
        sink.save_batch(&[record(name)]).unwrap();
        sink.flush().unwrap();
    }

    let mut reader = csv::Reader::from_path(dir.path().join("readings.csv")).unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(
        headers.iter().collect::<Vec<_>>(),
        vec!["timestamp", "sensor_name", "slave_id", "temperature", "humidity"]
    );
    let rows: Vec<SensorRecord> = reader.deserialize().collect::<Result<_, _>>().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].sensor_name, "second");
    assert_eq!(rows[1].humidity, 45.6);
}

#[tokio::test]
async fn test_storage_open_failure() {
    let dir = tempfile::tempdir().unwrap();
    for kind in [StorageKind::Csv, StorageKind::Sqlite] {
        let storage = StorageConfig {
            kind,
            path: Some(dir.path().join("no-such-dir").join("data")),
            ..StorageConfig::default()
        };
        assert!(build_storage(&storage).await.is_err());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sqlite_sink_appends_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sensor_data.db");
    std::fs::write(
        dir.path().join("thpoll.toml"),
        format!(
            "[storage]\ntype = \"sqlite\"\npath = {:?}\n",
            path.display().to_string()
        ),
    )
    .unwrap();
    let config = AppConfig::load(&dir.path().join("thpoll.toml")).unwrap();
    assert_eq!(config.storage.kind, StorageKind::Sqlite);

    for name in ["first", "second"] {
        let sink = build_storage(&config.storage).await.unwrap().unwrap();
        tokio::task::spawn_blocking(move || {
            let mut sink = sink;
            sink.save_batch(&[record(name)]).unwrap();
            sink.flush().unwrap();
        })
        .await
        .unwrap();
    }

    let options = sqlx::sqlite::SqliteConnectOptions::new().filename(&path);
    let pool = sqlx::SqlitePool::connect_with(options).await.unwrap();
    let rows: Vec<(String, i64, f64)> =
        sqlx::query_as("SELECT name, slave_id, humidity FROM sensor_data ORDER BY id")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(
        rows,
        vec![("first".to_string(), 2, 45.6), ("second".to_string(), 2, 45.6)]
    );
}
