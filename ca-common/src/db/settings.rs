//! Key/value runtime settings
//!
//! Missing keys are initialised with the caller's default and written back,
//! so the table always reflects the values in effect.

use crate::time::{now, to_db};
use crate::Result;
use sqlx::SqlitePool;
use tracing::info;

/// Read a setting; `None` when the key is absent or its value is NULL
pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;
    Ok(value.flatten())
}

/// Insert or overwrite a setting
pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value)
    .bind(to_db(now()))
    .execute(pool)
    .await?;
    Ok(())
}

/// Read a setting, writing `default` back when it is missing or NULL
pub async fn get_or_init_setting(pool: &SqlitePool, key: &str, default: &str) -> Result<String> {
    match get_setting(pool, key).await? {
        Some(value) => Ok(value),
        None => {
            info!("Setting '{}' not found in database, using default", key);
            set_setting(pool, key, default).await?;
            Ok(default.to_string())
        }
    }
}
