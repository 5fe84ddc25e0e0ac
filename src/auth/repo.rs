use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, User};

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("username or email already taken")]
    Duplicate,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Persistence of user records. Every mutation returns `Ok(None)` / `Ok(false)`
/// when the user does not exist.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;

    /// Match on username OR email; either may be absent.
    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> anyhow::Result<Option<User>>;

    async fn create(&self, new: NewUser) -> Result<User, RepoError>;

    /// Touches only the refresh token column.
    async fn set_refresh_token(&self, id: Uuid, token: Option<&str>) -> anyhow::Result<bool>;

    /// Touches only the password hash column.
    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<bool>;

    async fn update_details(
        &self,
        id: Uuid,
        fullname: &str,
        email: &str,
    ) -> Result<Option<User>, RepoError>;

    async fn set_avatar(&self, id: Uuid, url: &str) -> anyhow::Result<Option<User>>;

    async fn set_cover_image(&self, id: Uuid, url: &str) -> anyhow::Result<Option<User>>;
}

const USER_COLUMNS: &str = "id, username, email, fullname, avatar, cover_image, password_hash, \
                            refresh_token, created_at, updated_at";

fn map_write_err(e: sqlx::Error, what: &'static str) -> RepoError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => RepoError::Duplicate,
        _ => RepoError::Other(anyhow::Error::new(e).context(what)),
    }
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE ($1::text IS NOT NULL AND username = $1)
               OR ($2::text IS NOT NULL AND email = $2)
            LIMIT 1
            "#
        ))
        .bind(username)
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by username or email")?;
        Ok(user)
    }

    async fn create(&self, new: NewUser) -> Result<User, RepoError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, email, fullname, avatar, cover_image, password_hash)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(new.username)
        .bind(new.email)
        .bind(new.fullname)
        .bind(new.avatar)
        .bind(new.cover_image)
        .bind(new.password_hash)
        .fetch_one(&self.db)
        .await
        .map_err(|e| map_write_err(e, "insert user"))?;
        Ok(user)
    }

    async fn set_refresh_token(&self, id: Uuid, token: Option<&str>) -> anyhow::Result<bool> {
        let res = sqlx::query(
            "UPDATE users SET refresh_token = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(token)
        .execute(&self.db)
        .await
        .context("update refresh token")?;
        Ok(res.rows_affected() == 1)
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<bool> {
        let res = sqlx::query(
            "UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.db)
        .await
        .context("update password hash")?;
        Ok(res.rows_affected() == 1)
    }

    async fn update_details(
        &self,
        id: Uuid,
        fullname: &str,
        email: &str,
    ) -> Result<Option<User>, RepoError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET fullname = $2, email = $3, updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(fullname)
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| map_write_err(e, "update account details"))?;
        Ok(user)
    }

    async fn set_avatar(&self, id: Uuid, url: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET avatar = $2, updated_at = now() WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(url)
        .fetch_optional(&self.db)
        .await
        .context("update avatar")?;
        Ok(user)
    }

    async fn set_cover_image(&self, id: Uuid, url: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET cover_image = $2, updated_at = now() WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(url)
        .fetch_optional(&self.db)
        .await
        .context("update cover image")?;
        Ok(user)
    }
}

#[cfg(test)]
pub mod memory {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use time::OffsetDateTime;
    use tokio::sync::RwLock;
    use uuid::Uuid;

    use super::{RepoError, UserStore};
    use crate::auth::repo_types::{NewUser, User};

    /// Map-backed store mirroring the unique constraints of the `users` table.
    #[derive(Default)]
    pub struct InMemoryUserStore {
        users: RwLock<HashMap<Uuid, User>>,
    }

    impl InMemoryUserStore {
        pub async fn count(&self) -> usize {
            self.users.read().await.len()
        }

        fn taken(users: &HashMap<Uuid, User>, skip: Option<Uuid>, username: Option<&str>, email: &str) -> bool {
            users.values().any(|u| {
                Some(u.id) != skip
                    && (Some(u.username.as_str()) == username || u.email == email)
            })
        }

        async fn mutate(&self, id: Uuid, f: impl FnOnce(&mut User)) -> Option<User> {
            let mut users = self.users.write().await;
            let user = users.get_mut(&id)?;
            f(user);
            user.updated_at = OffsetDateTime::now_utc();
            Some(user.clone())
        }
    }

    #[async_trait]
    impl UserStore for InMemoryUserStore {
        async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
            Ok(self.users.read().await.get(&id).cloned())
        }

        async fn find_by_username_or_email(
            &self,
            username: Option<&str>,
            email: Option<&str>,
        ) -> anyhow::Result<Option<User>> {
            let users = self.users.read().await;
            Ok(users
                .values()
                .find(|u| {
                    username.is_some_and(|n| u.username == n) || email.is_some_and(|e| u.email == e)
                })
                .cloned())
        }

        async fn create(&self, new: NewUser) -> Result<User, RepoError> {
            let mut users = self.users.write().await;
            if Self::taken(&users, None, Some(&new.username), &new.email) {
                return Err(RepoError::Duplicate);
            }
            let now = OffsetDateTime::now_utc();
            let user = User {
                id: Uuid::new_v4(),
                username: new.username,
                email: new.email,
                fullname: new.fullname,
                avatar: new.avatar,
                cover_image: new.cover_image,
                password_hash: new.password_hash,
                refresh_token: None,
                created_at: now,
                updated_at: now,
            };
            users.insert(user.id, user.clone());
            Ok(user)
        }

        async fn set_refresh_token(&self, id: Uuid, token: Option<&str>) -> anyhow::Result<bool> {
            let token = token.map(str::to_string);
            Ok(self.mutate(id, |u| u.refresh_token = token).await.is_some())
        }

        async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<bool> {
            Ok(self
                .mutate(id, |u| u.password_hash = password_hash.to_string())
                .await
                .is_some())
        }

        async fn update_details(
            &self,
            id: Uuid,
            fullname: &str,
            email: &str,
        ) -> Result<Option<User>, RepoError> {
            let mut users = self.users.write().await;
            if Self::taken(&users, Some(id), None, email) {
                return Err(RepoError::Duplicate);
            }
            let Some(user) = users.get_mut(&id) else {
                return Ok(None);
            };
            user.fullname = fullname.to_string();
            user.email = email.to_string();
            user.updated_at = OffsetDateTime::now_utc();
            Ok(Some(user.clone()))
        }

        async fn set_avatar(&self, id: Uuid, url: &str) -> anyhow::Result<Option<User>> {
            Ok(self.mutate(id, |u| u.avatar = url.to_string()).await)
        }

        async fn set_cover_image(&self, id: Uuid, url: &str) -> anyhow::Result<Option<User>> {
            Ok(self
                .mutate(id, |u| u.cover_image = Some(url.to_string()))
                .await)
        }
    }
}
