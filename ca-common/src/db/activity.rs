//! Loading users together with their event history

use crate::db::{all_events_by_user, events_for_user, events_for_users, get_user, list_users};
use crate::features::UserActivity;
use crate::Result;
use sqlx::SqlitePool;

/// Load one user's activity; `None` if the user does not exist
pub async fn load_activity(pool: &SqlitePool, user_id: i64) -> Result<Option<UserActivity>> {
    let Some(user) = get_user(pool, user_id).await? else {
        return Ok(None);
    };
    let events = events_for_user(pool, user_id).await?;
    Ok(Some(UserActivity::new(user, events)))
}

/// Load activity for all users (ordered by id), optionally limited
pub async fn load_all_activity(pool: &SqlitePool, limit: Option<i64>) -> Result<Vec<UserActivity>> {
    let users = list_users(pool, limit).await?;

    let mut events = if limit.is_some() {
        let ids: Vec<i64> = users.iter().map(|u| u.user_id).collect();
        events_for_users(pool, &ids).await?
    } else {
        all_events_by_user(pool).await?
    };

    Ok(users
        .into_iter()
        .map(|user| {
            let user_events = events.remove(&user.user_id).unwrap_or_default();
            UserActivity::new(user, user_events)
        })
        .collect())
}

/// Load activity for the given users; unknown ids are skipped
pub async fn load_activity_for(pool: &SqlitePool, user_ids: &[i64]) -> Result<Vec<UserActivity>> {
    let mut events = events_for_users(pool, user_ids).await?;
    let mut activities = Vec::with_capacity(user_ids.len());
    for &user_id in user_ids {
        if let Some(user) = get_user(pool, user_id).await? {
            let user_events = events.remove(&user_id).unwrap_or_default();
            activities.push(UserActivity::new(user, user_events));
        }
    }
    Ok(activities)
}
