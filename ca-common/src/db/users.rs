//! User queries

use crate::db::{parse_json_column, NewUser, User};
use crate::time::{from_db, to_db};
use crate::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

const USER_COLUMNS: &str = "user_id, telegram_id, first_name, last_name, username, \
     language_code, registration_date, profile_data";

pub(crate) fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        user_id: row.try_get("user_id")?,
        telegram_id: row.try_get("telegram_id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        username: row.try_get("username")?,
        language_code: row.try_get("language_code")?,
        registration_date: from_db(&row.try_get::<String, _>("registration_date")?)?,
        profile_data: parse_json_column(row.try_get("profile_data")?)?,
    })
}

/// Insert a user, returning the new `user_id`
pub async fn insert_user(pool: &SqlitePool, user: &NewUser) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO users (telegram_id, first_name, last_name, username, language_code,
                           registration_date, profile_data)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user.telegram_id)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(&user.username)
    .bind(&user.language_code)
    .bind(to_db(user.registration_date))
    .bind(user.profile_data.to_string())
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Insert many users in one transaction, returning their ids in order
pub async fn insert_users_batch(pool: &SqlitePool, users: &[NewUser]) -> Result<Vec<i64>> {
    let mut tx = pool.begin().await?;
    let mut ids = Vec::with_capacity(users.len());

    for user in users {
        let result = sqlx::query(
            r#"
            INSERT INTO users (telegram_id, first_name, last_name, username, language_code,
                               registration_date, profile_data)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user.telegram_id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.username)
        .bind(&user.language_code)
        .bind(to_db(user.registration_date))
        .bind(user.profile_data.to_string())
        .execute(&mut *tx)
        .await?;
        ids.push(result.last_insert_rowid());
    }

    tx.commit().await?;
    Ok(ids)
}

/// Fetch one user; `None` if absent
pub async fn get_user(pool: &SqlitePool, user_id: i64) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE user_id = ?", USER_COLUMNS);
    let row = sqlx::query(&sql).bind(user_id).fetch_optional(pool).await?;
    row.as_ref().map(user_from_row).transpose()
}

/// Fetch users ordered by id, optionally limited
pub async fn list_users(pool: &SqlitePool, limit: Option<i64>) -> Result<Vec<User>> {
    let sql = format!(
        "SELECT {} FROM users ORDER BY user_id LIMIT ?",
        USER_COLUMNS
    );
    // SQLite treats a negative LIMIT as unlimited
    let rows = sqlx::query(&sql)
        .bind(limit.unwrap_or(-1))
        .fetch_all(pool)
        .await?;
    rows.iter().map(user_from_row).collect()
}

/// User ids ordered ascending, optionally limited
pub async fn list_user_ids(pool: &SqlitePool, limit: Option<i64>) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar("SELECT user_id FROM users ORDER BY user_id LIMIT ?")
        .bind(limit.unwrap_or(-1))
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

/// Every telegram id already registered
pub async fn list_telegram_ids(pool: &SqlitePool) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar("SELECT telegram_id FROM users")
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

pub async fn count_users(pool: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
