use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, Pool, Postgres};

#[tracing::instrument(skip(database_url))]
pub async fn init_db_and_get_pool(database_url: &str) -> Option<Pool<Postgres>> {
    let pool = match PgPoolOptions::new()
        .max_connections(60)
        .acquire_timeout(Duration::from_secs(120))
        .connect(database_url)
        .await
    {
        Ok(pool) => pool,
        Err(error) => {
            tracing::error!(%error, "Unable to create database connection pool");
            return None;
        }
    };

    match sqlx::migrate!("./migrations").run(&pool).await {
        Ok(()) => Some(pool),
        Err(error) => {
            tracing::error!(%error, "Unable to run migrations");
            None
        }
    }
}

pub fn check_rows_updated<E>(rows_updated: u64, err_if_zero: E) -> Result<(), E> {
    if rows_updated == 0 {
        return Err(err_if_zero);
    }

    Ok(())
}

#[cfg(test)]
pub async fn get_test_pool(truncate_tables: &[&str]) -> Pool<Postgres> {
    let database_url = std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .expect("TEST_DATABASE_URL or DATABASE_URL must be set to run database tests");

    let pool = init_db_and_get_pool(&database_url)
        .await
        .expect("unable to connect to test database");

    for table in truncate_tables {
        sqlx::query(&format!("TRUNCATE TABLE {table} CASCADE"))
            .execute(&pool)
            .await
            .expect("unable to truncate test table");
    }

    pool
}
