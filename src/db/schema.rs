use serde::{Deserialize, Serialize};
use surrealdb::{RecordId, sql::Datetime};

use crate::types::{ExternalUserId, Role};

/// Persisted user record mirroring an identity-provider account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// Database identifier
    pub id: RecordId,
    /// Identity provider subject (unique)
    pub external_id: String,
    /// Email reported by the provider
    pub email: Option<String>,
    /// Display name reported by the provider or set by the user
    pub display_name: Option<String>,
    /// "user" or "admin"
    pub role: String,
    pub created_at: Option<Datetime>,
    pub updated_at: Option<Datetime>,
}

impl UserRecord {
    /// Parsed role; unknown values degrade to `Role::User`.
    pub fn role(&self) -> Role {
        self.role.parse().unwrap_or_default()
    }

    pub fn external_id(&self) -> ExternalUserId {
        ExternalUserId::new(self.external_id.clone())
    }
}

/// Payload for creating a new user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCreate {
    pub external_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub role: Role,
}

/// Wire representation of a user record.
///
/// Returned by the HTTP API and held by the client as the mirrored
/// backend record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub external_id: ExternalUserId,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub role: Role,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl From<&UserRecord> for UserProfile {
    fn from(record: &UserRecord) -> Self {
        Self {
            id: record.id.to_string(),
            external_id: record.external_id(),
            email: record.email.clone(),
            display_name: record.display_name.clone(),
            role: record.role(),
            created_at: record.created_at.as_ref().map(|dt| dt.0.to_rfc3339()),
            updated_at: record.updated_at.as_ref().map(|dt| dt.0.to_rfc3339()),
        }
    }
}

impl From<UserRecord> for UserProfile {
    fn from(record: UserRecord) -> Self {
        Self::from(&record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(role: &str) -> UserRecord {
        UserRecord {
            id: RecordId::from_table_key("user", "abc"),
            external_id: "uid-1".to_string(),
            email: Some("a@x.com".to_string()),
            display_name: None,
            role: role.to_string(),
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_record_role_parsing() {
        assert_eq!(record("admin").role(), Role::Admin);
        assert_eq!(record("user").role(), Role::User);
        assert_eq!(record("garbage").role(), Role::User);
    }

    #[test]
    fn test_profile_from_record() {
        let profile = UserProfile::from(record("user"));
        assert_eq!(profile.external_id.as_str(), "uid-1");
        assert_eq!(profile.role, Role::User);
        assert!(profile.id.contains("user"));
        assert_eq!(profile.email.as_deref(), Some("a@x.com"));
    }

    #[test]
    fn test_profile_json_shape() {
        let json = serde_json::to_value(UserProfile::from(record("admin"))).unwrap();
        assert_eq!(json["role"], "admin");
        assert_eq!(json["external_id"], "uid-1");
    }
}
