//! A durable workflow orchestrator backed by Postgres.
//!
//! A flow is an ordered sequence of tasks produced from a named, process-local
//! template. Multiple replicas of the server cooperate over a single Postgres
//! database using `SELECT ... FOR UPDATE SKIP LOCKED` to claim and advance flows,
//! with no separate leader election or consensus layer.
//!
//! ```no_run
//! use orch::server::config::get_config;
//! use orch::server::pool::init_db_and_get_pool;
//! use orch::server::scheduler::Scheduler;
//! use orch::templates::registry::default_registry;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = get_config().unwrap();
//!     let pool = init_db_and_get_pool(&config.async_database_url).await.unwrap();
//!     let scheduler = Scheduler::new(pool, Arc::new(default_registry()));
//!
//!     scheduler.advance_one_eligible_flow().await.unwrap();
//! }
//! ```

pub mod server;
pub mod templates;
pub mod webhook;
