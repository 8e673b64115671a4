//! User record storage.

use anyhow::Result;
use tracing::{debug, info};

use crate::auth::identity::VerifiedIdentity;
use crate::db::Db;
use crate::db::schema::{UserCreate, UserRecord};
use crate::types::{ExternalUserId, Role};

/// Result of [`UserStore::upsert_user`].
#[derive(Debug, Clone)]
pub enum UpsertOutcome {
    /// No record existed; one was created
    Created(UserRecord),
    /// The record existed and was changed (role promotion, profile refresh)
    Updated(UserRecord),
    /// The record existed and already matched
    Unchanged(UserRecord),
}

impl UpsertOutcome {
    pub fn record(&self) -> &UserRecord {
        match self {
            Self::Created(r) | Self::Updated(r) | Self::Unchanged(r) => r,
        }
    }

    pub fn into_record(self) -> UserRecord {
        match self {
            Self::Created(r) | Self::Updated(r) | Self::Unchanged(r) => r,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// User store for database operations.
pub struct UserStore {
    db: Db,
}

impl UserStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Create or refresh the record mirroring `identity`.
    ///
    /// A new record gets `role_hint` or `user`. An existing record is only
    /// ever promoted: an admin hint upgrades a `user`, while a missing or
    /// `user` hint never demotes an admin. Email follows the provider when it
    /// reports a new value; the display name is only taken from the token
    /// when none is stored. The external id never changes.
    pub async fn upsert_user(
        &self,
        identity: &VerifiedIdentity,
        role_hint: Option<Role>,
    ) -> Result<UpsertOutcome> {
        let existing = match self.get_user_by_external_id(identity.external_id()).await? {
            Some(user) => user,
            None => {
                let create = UserCreate {
                    external_id: identity.external_id().to_string(),
                    email: identity.email().map(str::to_string),
                    display_name: Some(identity.display()),
                    role: role_hint.unwrap_or_default(),
                };

                match self.create_user(&create).await {
                    Ok(user) => {
                        info!(
                            "Registered user {} with role {}",
                            user.external_id, user.role
                        );
                        return Ok(UpsertOutcome::Created(user));
                    }
                    Err(e) => {
                        // A concurrent register for the same identity may have
                        // won the unique index; fall through to the update path.
                        match self.get_user_by_external_id(identity.external_id()).await? {
                            Some(user) => {
                                debug!("Lost create race for {}: {}", user.external_id, e);
                                user
                            }
                            None => return Err(e),
                        }
                    }
                }
            }
        };

        let promote = role_hint.is_some_and(|r| r.is_admin()) && !existing.role().is_admin();
        let new_email = identity
            .email()
            .filter(|email| existing.email.as_deref() != Some(*email));
        // A stored name may have been set by the user; only fill a gap.
        let new_name = identity
            .display_name()
            .filter(|_| existing.display_name.is_none());

        if !promote && new_email.is_none() && new_name.is_none() {
            return Ok(UpsertOutcome::Unchanged(existing));
        }

        let role = if promote { Role::Admin } else { existing.role() };
        let email = new_email.map(str::to_string).or(existing.email.clone());
        let display_name = new_name.map(str::to_string).or(existing.display_name.clone());

        let query = r#"
            UPDATE user SET
                role = $role,
                email = $email,
                display_name = $display_name,
                updated_at = time::now()
            WHERE id = $id
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("id", existing.id.clone()))
            .bind(("role", role.as_str().to_string()))
            .bind(("email", email))
            .bind(("display_name", display_name))
            .await?;

        let users: Vec<UserRecord> = res.take(0)?;
        let user = users
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("user {} vanished during update", existing.external_id))?;

        if promote {
            info!("Promoted user {} to admin", user.external_id);
        }

        Ok(UpsertOutcome::Updated(user))
    }

    /// Get a user by external identity.
    pub async fn get_user_by_external_id(
        &self,
        external_id: &ExternalUserId,
    ) -> Result<Option<UserRecord>> {
        let query = r#"
            SELECT * FROM user
            WHERE external_id = $external_id
            LIMIT 1
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("external_id", external_id.to_string()))
            .await?;

        let users: Vec<UserRecord> = res.take(0)?;
        Ok(users.into_iter().next())
    }

    /// All user records, oldest first.
    pub async fn list_users(&self) -> Result<Vec<UserRecord>> {
        let mut res = self
            .db
            .query("SELECT * FROM user ORDER BY created_at ASC")
            .await?;

        let users: Vec<UserRecord> = res.take(0)?;
        Ok(users)
    }

    /// Set the display name. Returns `None` if the user does not exist.
    pub async fn update_display_name(
        &self,
        external_id: &ExternalUserId,
        display_name: &str,
    ) -> Result<Option<UserRecord>> {
        let query = r#"
            UPDATE user SET
                display_name = $display_name,
                updated_at = time::now()
            WHERE external_id = $external_id
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("external_id", external_id.to_string()))
            .bind(("display_name", display_name.to_string()))
            .await?;

        let users: Vec<UserRecord> = res.take(0)?;
        Ok(users.into_iter().next())
    }

    /// Delete a user record. Returns whether a record was removed.
    pub async fn delete_user(&self, external_id: &ExternalUserId) -> Result<bool> {
        let query = "DELETE user WHERE external_id = $external_id RETURN BEFORE";

        let mut res = self
            .db
            .query(query)
            .bind(("external_id", external_id.to_string()))
            .await?;

        let removed: Vec<UserRecord> = res.take(0)?;
        Ok(!removed.is_empty())
    }

    async fn create_user(&self, create: &UserCreate) -> Result<UserRecord> {
        let query = r#"
            CREATE user CONTENT {
                external_id: $external_id,
                email: $email,
                display_name: $display_name,
                role: $role
            }
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("external_id", create.external_id.clone()))
            .bind(("email", create.email.clone()))
            .bind(("display_name", create.display_name.clone()))
            .bind(("role", create.role.as_str().to_string()))
            .await?;

        let users: Vec<UserRecord> = res.take(0)?;
        users
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Failed to create user"))
    }
}
