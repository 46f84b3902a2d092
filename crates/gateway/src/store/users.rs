// User directory: display-field lookup for broadcast payload
// population. The gateway never writes users.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use lagoon_common::types::UserProfile;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Clone)]
pub enum UserDirectory {
    Postgres(sqlx::PgPool),
    #[cfg_attr(not(test), allow(dead_code))]
    Memory(Arc<RwLock<HashMap<Uuid, UserProfile>>>),
}

impl UserDirectory {
    pub async fn find_by_id(&self, user_id: Uuid) -> anyhow::Result<Option<UserProfile>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, (Uuid, String, Option<String>)>(
                    r#"
                    SELECT id, username, profile_picture
                    FROM users
                    WHERE id = $1
                    "#,
                )
                .bind(user_id)
                .fetch_optional(pool)
                .await
                .context("failed to query user display fields")?;

                Ok(row.map(|(id, username, profile_picture)| UserProfile {
                    id,
                    username,
                    profile_picture,
                }))
            }
            Self::Memory(store) => Ok(store.read().await.get(&user_id).cloned()),
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashMap::new())))
    }

    #[cfg(test)]
    pub(crate) async fn insert_for_tests(&self, profile: UserProfile) {
        if let Self::Memory(store) = self {
            store.write().await.insert(profile.id, profile);
        }
    }
}
