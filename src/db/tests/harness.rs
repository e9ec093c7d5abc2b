//! Test harness for database repository testing
//!
//! - SQLite: fast in-memory databases with real migrations
//! - Redis: testcontainers-based instances for the shared cache

use sqlx::SqlitePool;

/// Create an in-memory SQLite pool for testing
pub async fn create_sqlite_pool() -> SqlitePool {
    sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool")
}

/// Run SQLite migrations on the pool
///
/// Uses the actual migration files to ensure tests match production schema
pub async fn run_sqlite_migrations(pool: &SqlitePool) {
    sqlx::migrate!("./migrations_sqlx/sqlite")
        .run(pool)
        .await
        .expect("Failed to run SQLite migrations");
}

/// Redis test harness using testcontainers
#[cfg(feature = "redis")]
pub mod redis {
    use testcontainers_modules::{
        redis::Redis,
        testcontainers::{ContainerAsync, runners::AsyncRunner},
    };

    /// Start a Redis container and return the connection URL and container handle
    /// The container is kept alive as long as the returned handle is held
    pub async fn create_redis_container() -> (String, ContainerAsync<Redis>) {
        let container = Redis::default()
            .start()
            .await
            .expect("Failed to start Redis container");

        let host = container.get_host().await.expect("Failed to get host");
        let port = container
            .get_host_port_ipv4(6379)
            .await
            .expect("Failed to get port");

        let url = format!("redis://{}:{}", host, port);

        (url, container)
    }
}
