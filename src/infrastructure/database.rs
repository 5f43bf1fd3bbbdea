//! Pooled SQLite connection

use di::inject;
use di::injectable;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::env;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, OnceLock};

// Integration tests swap in an in-memory pool here, since the DI container
// always constructs DatabaseConnection itself.
static TEST_POOL: OnceLock<Mutex<Option<SqlitePool>>> = OnceLock::new();

pub struct DatabaseConnection {
    connection: SqlitePool,
}

#[injectable]
impl DatabaseConnection {
    #[inject]
    pub fn create() -> DatabaseConnection {
        if let Some(pool) = Self::test_pool() {
            return DatabaseConnection { connection: pool };
        }

        dotenvy::dotenv().ok();
        let connection_string = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_lazy(&connection_string)
            .expect("Cannot connect to database");

        DatabaseConnection { connection: pool }
    }
}

impl DatabaseConnection {
    pub fn set_test_pool(pool: SqlitePool) {
        *Self::slot().lock().unwrap() = Some(pool);
    }

    pub fn clear_test_pool() {
        *Self::slot().lock().unwrap() = None;
    }

    fn test_pool() -> Option<SqlitePool> {
        Self::slot().lock().unwrap().clone()
    }

    fn slot() -> &'static Mutex<Option<SqlitePool>> {
        TEST_POOL.get_or_init(|| Mutex::new(None))
    }
}

impl Deref for DatabaseConnection {
    type Target = SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl DerefMut for DatabaseConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.connection
    }
}
