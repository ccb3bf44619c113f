use sqlx::SqlitePool;

#[derive(Clone, Debug)]
pub struct DbModelManager {
    pool: SqlitePool,
}

impl DbModelManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
