//! Client authentication for the privileged IPC surface.
//!
//! The authenticator is decision-only: platform facts (group membership,
//! code-signing state) come in through traits, and the four checks run in a
//! fixed order against the configured policy. Ordering matters for the
//! error a client sees — group membership is checked before anything about
//! the binary.

use std::sync::Arc;

use thiserror::Error;

/// Which authentication check failed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    /// The connecting user is not in the allowed group.
    #[error("user not in allowed group")]
    UserNotInAllowedGroup,
    /// The client binary's code signature is missing or invalid.
    #[error("invalid code signature")]
    InvalidCodeSignature,
    /// The signing team is not in the allow list.
    #[error("unauthorized team identifier")]
    UnauthorizedTeamIdentifier,
    /// The bundle identifier matches no allowed prefix.
    #[error("unauthorized bundle identifier")]
    UnauthorizedBundleIdentifier,
}

/// Code-signing facts about a connecting process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CodeSignatureInfo {
    /// Whether the signature verified.
    pub is_valid: bool,
    /// Signing team identifier, when present.
    pub team_identifier: Option<String>,
    /// Bundle identifier, when present.
    pub bundle_identifier: Option<String>,
}

/// Identity of one connecting client, from the socket's peer credentials
/// plus the platform's signature lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Peer uid.
    pub uid: u32,
    /// Peer pid.
    pub pid: i32,
    /// Code-signing facts; `None` when the binary is unsigned.
    pub signature: Option<CodeSignatureInfo>,
}

/// Platform lookup: is `uid` a member of `group`?
pub trait GroupMembership: Send + Sync + 'static {
    /// Check membership.
    fn is_member(&self, uid: u32, group: &str) -> bool;
}

/// Membership check that admits everyone; development only.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllGroups;

impl GroupMembership for AllowAllGroups {
    fn is_member(&self, _uid: u32, _group: &str) -> bool {
        true
    }
}

/// Authentication policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Group the connecting user must belong to.
    pub allowed_group_name: String,
    /// Accept clients without a valid code signature.
    pub allow_unsigned_clients: bool,
    /// Allowed signing teams; empty disables the check.
    pub allowed_team_identifiers: Vec<String>,
    /// Allowed bundle identifier prefixes; empty disables the check.
    pub allowed_bundle_identifier_prefixes: Vec<String>,
}

impl AuthConfig {
    /// Development preset: unsigned clients allowed, no identifier
    /// enforcement.
    #[must_use]
    pub fn development() -> Self {
        Self {
            allowed_group_name: "staff".to_string(),
            allow_unsigned_clients: true,
            allowed_team_identifiers: Vec::new(),
            allowed_bundle_identifier_prefixes: Vec::new(),
        }
    }

    /// Production preset: valid signature from `team`, bundle ids under
    /// `bundle_prefix`.
    #[must_use]
    pub fn production(team: impl Into<String>, bundle_prefix: impl Into<String>) -> Self {
        Self {
            allowed_group_name: "staff".to_string(),
            allow_unsigned_clients: false,
            allowed_team_identifiers: vec![team.into()],
            allowed_bundle_identifier_prefixes: vec![bundle_prefix.into()],
        }
    }
}

/// Runs the four-step authentication decision.
pub struct ClientAuthenticator {
    config: AuthConfig,
    groups: Arc<dyn GroupMembership>,
}

impl ClientAuthenticator {
    /// Authenticator with the given policy and platform lookup.
    #[must_use]
    pub fn new(config: AuthConfig, groups: Arc<dyn GroupMembership>) -> Self {
        Self { config, groups }
    }

    /// Run the checks in order; `Ok` admits the client.
    ///
    /// # Errors
    ///
    /// The first failed check, as an [`AuthRejection`].
    pub fn authenticate(&self, identity: &ClientIdentity) -> Result<(), AuthRejection> {
        if !self.groups.is_member(identity.uid, &self.config.allowed_group_name) {
            return Err(AuthRejection::UserNotInAllowedGroup);
        }

        let signature = match &identity.signature {
            Some(signature) if signature.is_valid => Some(signature),
            _ if self.config.allow_unsigned_clients => None,
            _ => return Err(AuthRejection::InvalidCodeSignature),
        };

        if !self.config.allowed_team_identifiers.is_empty() {
            let team = signature.and_then(|s| s.team_identifier.as_deref());
            let allowed =
                team.is_some_and(|t| self.config.allowed_team_identifiers.iter().any(|a| a == t));
            if !allowed {
                return Err(AuthRejection::UnauthorizedTeamIdentifier);
            }
        }

        if !self.config.allowed_bundle_identifier_prefixes.is_empty() {
            let bundle = signature.and_then(|s| s.bundle_identifier.as_deref());
            let allowed = bundle.is_some_and(|b| {
                self.config
                    .allowed_bundle_identifier_prefixes
                    .iter()
                    .any(|prefix| b.starts_with(prefix.as_str()))
            });
            if !allowed {
                return Err(AuthRejection::UnauthorizedBundleIdentifier);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaffOnly;

    impl GroupMembership for StaffOnly {
        fn is_member(&self, uid: u32, group: &str) -> bool {
            group == "staff" && uid == 501
        }
    }

    fn signed(team: &str, bundle: &str) -> ClientIdentity {
        ClientIdentity {
            uid: 501,
            pid: 1000,
            signature: Some(CodeSignatureInfo {
                is_valid: true,
                team_identifier: Some(team.to_string()),
                bundle_identifier: Some(bundle.to_string()),
            }),
        }
    }

    fn unsigned() -> ClientIdentity {
        ClientIdentity { uid: 501, pid: 1000, signature: None }
    }

    #[test]
    fn production_accepts_matching_client() {
        let auth = ClientAuthenticator::new(
            AuthConfig::production("TEAM123", "com.winrun."),
            Arc::new(StaffOnly),
        );
        auth.authenticate(&signed("TEAM123", "com.winrun.ui")).unwrap();
    }

    #[test]
    fn group_check_runs_first() {
        let auth = ClientAuthenticator::new(
            AuthConfig::production("TEAM123", "com.winrun."),
            Arc::new(StaffOnly),
        );
        let mut outsider = signed("TEAM123", "com.winrun.ui");
        outsider.uid = 999;
        assert_eq!(
            auth.authenticate(&outsider),
            Err(AuthRejection::UserNotInAllowedGroup)
        );
    }

    #[test]
    fn production_rejects_unsigned() {
        let auth = ClientAuthenticator::new(
            AuthConfig::production("TEAM123", "com.winrun."),
            Arc::new(StaffOnly),
        );
        assert_eq!(auth.authenticate(&unsigned()), Err(AuthRejection::InvalidCodeSignature));
    }

    #[test]
    fn production_rejects_invalid_signature() {
        let auth = ClientAuthenticator::new(
            AuthConfig::production("TEAM123", "com.winrun."),
            Arc::new(StaffOnly),
        );
        let mut client = signed("TEAM123", "com.winrun.ui");
        if let Some(sig) = client.signature.as_mut() {
            sig.is_valid = false;
        }
        assert_eq!(auth.authenticate(&client), Err(AuthRejection::InvalidCodeSignature));
    }

    #[test]
    fn wrong_team_is_rejected() {
        let auth = ClientAuthenticator::new(
            AuthConfig::production("TEAM123", "com.winrun."),
            Arc::new(StaffOnly),
        );
        assert_eq!(
            auth.authenticate(&signed("EVIL999", "com.winrun.ui")),
            Err(AuthRejection::UnauthorizedTeamIdentifier)
        );
    }

    #[test]
    fn wrong_bundle_prefix_is_rejected() {
        let auth = ClientAuthenticator::new(
            AuthConfig::production("TEAM123", "com.winrun."),
            Arc::new(StaffOnly),
        );
        assert_eq!(
            auth.authenticate(&signed("TEAM123", "com.malware.ui")),
            Err(AuthRejection::UnauthorizedBundleIdentifier)
        );
    }

    #[test]
    fn development_accepts_unsigned() {
        let auth = ClientAuthenticator::new(AuthConfig::development(), Arc::new(AllowAllGroups));
        auth.authenticate(&unsigned()).unwrap();
    }

    #[test]
    fn empty_allow_lists_disable_identifier_checks() {
        let config = AuthConfig {
            allowed_group_name: "staff".to_string(),
            allow_unsigned_clients: false,
            allowed_team_identifiers: Vec::new(),
            allowed_bundle_identifier_prefixes: Vec::new(),
        };
        let auth = ClientAuthenticator::new(config, Arc::new(StaffOnly));
        auth.authenticate(&signed("ANYTEAM", "any.bundle")).unwrap();
    }
}
