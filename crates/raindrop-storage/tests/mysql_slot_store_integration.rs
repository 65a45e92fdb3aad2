mod common;

use std::time::Duration;

use raindrop_storage::{MySqlSlotStore, StorageError, MAX_TABLE_NAME_LEN};
use raindrop_test_infra::{DatabaseConfig, MySqlServer};
use sqlx::mysql::MySqlPoolOptions;

struct Fixture {
    _mysql: MySqlServer,
    store: MySqlSlotStore,
}

impl Fixture {
    async fn start() -> Self {
        let mysql = MySqlServer::new(DatabaseConfig::default())
            .await
            .expect("start mysql");
        let url = mysql.database_url().await.expect("mysql url");
        let pool = connect_with_retry(&url).await;

        Self {
            _mysql: mysql,
            store: MySqlSlotStore::new(pool),
        }
    }
}

async fn connect_with_retry(url: &str) -> sqlx::MySqlPool {
    let mut last_error = None;

    for _ in 0..20 {
        match MySqlPoolOptions::new().max_connections(5).connect(url).await {
            Ok(pool) => return pool,
            Err(err) => {
                last_error = Some(err);
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }

    panic!("failed to connect mysql: {last_error:?}");
}

#[tokio::test]
async fn provisioning_creates_table_once() {
    let fixture = Fixture::start().await;
    common::provisioning_creates_table_once(&fixture.store).await;
}

#[tokio::test]
async fn inverted_range_is_rejected() {
    let fixture = Fixture::start().await;
    common::inverted_range_is_rejected(&fixture.store).await;
}

#[tokio::test]
async fn activation_wins_only_with_current_version() {
    let fixture = Fixture::start().await;
    common::activation_wins_only_with_current_version(&fixture.store).await;
}

#[tokio::test]
async fn fresh_heartbeats_are_not_free() {
    let fixture = Fixture::start().await;
    common::fresh_heartbeats_are_not_free(&fixture.store).await;
}

#[tokio::test]
async fn renewal_bumps_version_and_heartbeat() {
    let fixture = Fixture::start().await;
    common::renewal_bumps_version_and_heartbeat(&fixture.store).await;
}

#[tokio::test]
async fn store_clock_is_close_to_local() {
    let fixture = Fixture::start().await;
    common::store_clock_is_close_to_local(&fixture.store).await;
}

#[tokio::test]
async fn custom_table_name_is_validated() {
    let fixture = Fixture::start().await;
    let pool = fixture.store.pool().clone();

    let err = MySqlSlotStore::with_table(pool.clone(), "bad name").unwrap_err();
    assert!(matches!(err, StorageError::InvalidData(_)));

    let store = MySqlSlotStore::with_table(pool.clone(), "raindrop_worker_alt").unwrap();
    common::provisioning_creates_table_once(&store).await;

    let longest = "w".repeat(MAX_TABLE_NAME_LEN);
    let store = MySqlSlotStore::with_table(pool.clone(), longest).unwrap();
    common::provisioning_creates_table_once(&store).await;
    assert!(MySqlSlotStore::with_table(pool, "w".repeat(MAX_TABLE_NAME_LEN + 1)).is_err());
}
