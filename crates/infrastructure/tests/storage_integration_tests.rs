//! PostgreSQL与Redis集成测试，需要Docker：`cargo test -- --ignored`

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, Row};

use taskhub_config::{CacheConfig, DatabaseConfig};
use taskhub_core::HealthCheck;
use taskhub_errors::AppError;
use taskhub_infrastructure::database::ping;
use taskhub_infrastructure::{Cache, Database};
use taskhub_testing_utils::{PostgresTestContainer, RedisTestContainer};

async fn insert_note<'e, E: PgExecutor<'e>>(executor: E, body: &str) -> Result<(), AppError> {
    sqlx::query("INSERT INTO notes (body) VALUES ($1)")
        .bind(body)
        .execute(executor)
        .await?;
    Ok(())
}

async fn count_notes(db: &Database) -> i64 {
    sqlx::query("SELECT COUNT(*) AS n FROM notes")
        .fetch_one(db.pool())
        .await
        .unwrap()
        .get("n")
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_transaction_commit_and_rollback() {
    let postgres = PostgresTestContainer::new().await.unwrap();
    let db = Database::connect(&DatabaseConfig {
        url: postgres.url.clone(),
        ..DatabaseConfig::default()
    })
    .await
    .unwrap();

    sqlx::query("CREATE TABLE notes (id BIGSERIAL PRIMARY KEY, body TEXT NOT NULL)")
        .execute(db.pool())
        .await
        .unwrap();

    db.transaction(|conn| {
        Box::pin(async move {
            insert_note(&mut *conn, "committed").await?;
            ping(&mut *conn).await
        })
    })
    .await
    .unwrap();
    assert_eq!(count_notes(&db).await, 1);

    let result: Result<(), AppError> = db
        .transaction(|conn| {
            Box::pin(async move {
                insert_note(&mut *conn, "rolled back").await?;
                Err(AppError::validation_error("reject"))
            })
        })
        .await;
    assert!(result.is_err());
    assert_eq!(count_notes(&db).await, 1);

    insert_note(db.pool(), "outside").await.unwrap();
    assert_eq!(count_notes(&db).await, 2);

    assert!(db.check().await.is_ok());
    db.close().await;
    assert!(db.is_closed());
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Heartbeat {
    worker: String,
    seq: u32,
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_cache_round_robin_and_json() {
    let redis = RedisTestContainer::new().await.unwrap();
    let cache = Cache::connect(&CacheConfig {
        url: redis.url.clone(),
        pool_size: 2,
        key_prefix: "test:".to_string(),
    })
    .await
    .unwrap();

    assert_eq!(cache.key("a"), "test:a");

    let beat = Heartbeat {
        worker: "w1".to_string(),
        seq: 7,
    };
    cache.set_json("beat", &beat, Duration::from_secs(30)).await.unwrap();
    assert_eq!(cache.get_json::<Heartbeat>("beat").await.unwrap(), Some(beat));

    assert!(cache.delete("beat").await.unwrap());
    assert!(!cache.delete("beat").await.unwrap());
    assert!(cache.get_string("beat").await.unwrap().is_none());

    assert!(cache.check().await.is_ok());
    cache.close();
    assert!(cache.ping().await.is_err());
}
