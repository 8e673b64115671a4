//! Session snapshot and its derived phase.

use crate::db::UserProfile;
use crate::session::provider::ProviderUser;

/// What the session currently knows about the user.
///
/// Held in memory by the session actor only; published to observers as
/// clones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Identity reported by the identity provider
    pub provider_user: Option<ProviderUser>,
    /// Backend record mirrored for that identity
    pub mirrored: Option<UserProfile>,
    /// True until the first identity-provider notification
    pub loading: bool,
    /// Last error recorded by a user-facing operation
    pub error: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            provider_user: None,
            mirrored: None,
            loading: true,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorState {
    Pending,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Initializing,
    Anonymous,
    Authenticated(MirrorState),
}

impl Session {
    pub fn phase(&self) -> SessionPhase {
        if self.loading {
            return SessionPhase::Initializing;
        }
        match (&self.provider_user, &self.mirrored) {
            (None, _) => SessionPhase::Anonymous,
            (Some(_), None) => SessionPhase::Authenticated(MirrorState::Pending),
            (Some(_), Some(_)) => SessionPhase::Authenticated(MirrorState::Ready),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.mirrored
            .as_ref()
            .is_some_and(|profile| profile.role.is_admin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExternalUserId, Role};

    fn user(uid: &str) -> ProviderUser {
        ProviderUser {
            uid: ExternalUserId::new(uid),
            email: None,
            display_name: None,
            id_token: "t".to_string(),
        }
    }

    fn profile(uid: &str, role: Role) -> UserProfile {
        UserProfile {
            id: "user:1".to_string(),
            external_id: ExternalUserId::new(uid),
            email: None,
            display_name: None,
            role,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_phases() {
        let mut session = Session::default();
        assert_eq!(session.phase(), SessionPhase::Initializing);

        session.loading = false;
        assert_eq!(session.phase(), SessionPhase::Anonymous);

        session.provider_user = Some(user("u1"));
        assert_eq!(
            session.phase(),
            SessionPhase::Authenticated(MirrorState::Pending)
        );

        session.mirrored = Some(profile("u1", Role::User));
        assert_eq!(session.phase(), SessionPhase::Authenticated(MirrorState::Ready));
        assert!(!session.is_admin());
    }

    #[test]
    fn test_admin_flag_follows_mirrored_role() {
        let mut session = Session {
            provider_user: Some(user("u1")),
            mirrored: None,
            loading: false,
            error: None,
        };
        assert!(!session.is_admin());

        session.mirrored = Some(profile("u1", Role::Admin));
        assert!(session.is_admin());

        session.provider_user = None;
        session.mirrored = None;
        assert!(!session.is_admin());
        assert_eq!(session.phase(), SessionPhase::Anonymous);
    }
}
