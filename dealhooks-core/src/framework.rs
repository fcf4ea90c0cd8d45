use sqlx::PgPool;

/// Executor-providing wrapper around the connection pool.
///
/// Database operations are expressed as `kanau` `Processor` message impls
/// on this type (see `entities::receipts`), so callers hold one of these
/// instead of passing the pool around.
pub struct DatabaseProcessor {
    pub pool: PgPool,
}

impl DatabaseProcessor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}
