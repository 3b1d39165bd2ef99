use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub user_id: i32,
    pub email: String,
    pub display_name: String,
    pub registered_at: NaiveDateTime,
    pub is_active: bool,
}

impl User {
    // Resolve a session email to an active account
    pub async fn find_by_email(
        email: &str,
        db: &crate::database::Database,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            "SELECT user_id, email, display_name, registered_at, is_active
             FROM users
             WHERE email = $1 AND is_active = true",
        )
        .bind(email)
        .fetch_optional(&db.pool)
        .await
    }
}
