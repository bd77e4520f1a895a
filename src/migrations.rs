//! Database migrations.
//!
//! Uses SQLx embedded migrations for the shared tenant directory. Tenant stores
//! are never migrated this way; their shape is owned by the reconciliation engine.

use sqlx::PgPool;

static DIRECTORY_MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("migrations/directory");

pub async fn run_directory(pool: &PgPool) -> anyhow::Result<()> {
    DIRECTORY_MIGRATOR.run(pool).await?;
    Ok(())
}
