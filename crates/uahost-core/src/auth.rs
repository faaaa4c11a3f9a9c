//! ---
//! uah_section: "01-core-lifecycle"
//! uah_subsection: "module"
//! uah_type: "source"
//! uah_scope: "code"
//! uah_description: "Session creation and user identity policy delegation."
//! uah_version: "v0.1.0"
//! uah_owner: "tbd"
//! ---
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use strum::Display;
use uahost_common::UserIdentityTokenConfig;

use crate::modules::ProtocolStack;
use crate::types::NodeId;

/// Server-side state of one client session.
pub trait Session: Send + Sync + fmt::Debug {
    fn session_id(&self) -> i32;
    fn authentication_token(&self) -> &NodeId;
}

/// Session object used when the application does not supply its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericSession {
    session_id: i32,
    authentication_token: NodeId,
}

impl GenericSession {
    pub fn new(session_id: i32, authentication_token: NodeId) -> Self {
        Self {
            session_id,
            authentication_token,
        }
    }
}

impl Session for GenericSession {
    fn session_id(&self) -> i32 {
        self.session_id
    }

    fn authentication_token(&self) -> &NodeId {
        &self.authentication_token
    }
}

/// Identity presented by a client when activating a session.
#[derive(Clone, PartialEq, Eq)]
pub enum UserIdentityToken {
    Anonymous {
        policy_id: String,
    },
    UserName {
        policy_id: String,
        user: String,
        password: String,
    },
    X509 {
        policy_id: String,
        certificate: Vec<u8>,
    },
    IssuedToken {
        policy_id: String,
        data: Vec<u8>,
    },
}

impl UserIdentityToken {
    pub fn anonymous() -> Self {
        UserIdentityToken::Anonymous {
            policy_id: "anonymous".to_owned(),
        }
    }

    pub fn user_name(user_name: impl Into<String>, password: impl Into<String>) -> Self {
        UserIdentityToken::UserName {
            policy_id: "username".to_owned(),
            user: user_name.into(),
            password: password.into(),
        }
    }

    pub fn kind(&self) -> UserTokenKind {
        match self {
            UserIdentityToken::Anonymous { .. } => UserTokenKind::Anonymous,
            UserIdentityToken::UserName { .. } => UserTokenKind::UserName,
            UserIdentityToken::X509 { .. } => UserTokenKind::Certificate,
            UserIdentityToken::IssuedToken { .. } => UserTokenKind::IssuedToken,
        }
    }

    pub fn policy_id(&self) -> &str {
        match self {
            UserIdentityToken::Anonymous { policy_id }
            | UserIdentityToken::UserName { policy_id, .. }
            | UserIdentityToken::X509 { policy_id, .. }
            | UserIdentityToken::IssuedToken { policy_id, .. } => policy_id,
        }
    }
}

// Secrets never reach the logs.
impl fmt::Debug for UserIdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserIdentityToken::UserName {
                policy_id,
                user,
                ..
            } => f
                .debug_struct("UserName")
                .field("policy_id", policy_id)
                .field("user", user)
                .field("password", &"<redacted>")
                .finish(),
            other => f
                .debug_struct(&other.kind().to_string())
                .field("policy_id", &other.policy_id())
                .finish_non_exhaustive(),
        }
    }
}

/// Discriminant of a [`UserIdentityToken`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum UserTokenKind {
    Anonymous,
    UserName,
    Certificate,
    IssuedToken,
}

/// Outcome of a session logon attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum LogonDecision {
    Accept,
    Reject,
}

impl LogonDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, LogonDecision::Accept)
    }
}

/// Capability supplied by the embedding application to own session and user policy.
pub trait AuthCallback: Send + Sync {
    /// Create the session object for a newly opened client session.
    fn create_session(&self, session_id: i32, authentication_token: &NodeId) -> Arc<dyn Session>;

    /// Approve or deny a user name/password identity. Anonymous identities are decided
    /// from configuration and never reach this method.
    fn logon_session_user(&self, session: &dyn Session, token: &UserIdentityToken) -> LogonDecision;

    /// Supply a pre-built protocol stack instead of the protocol module's default.
    fn create_protocol_stack(&self) -> Option<Box<dyn ProtocolStack>> {
        None
    }
}

/// Callback installed until the application provides its own: generic sessions,
/// anonymous logons only.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAuthCallback;

impl AuthCallback for DefaultAuthCallback {
    fn create_session(&self, session_id: i32, authentication_token: &NodeId) -> Arc<dyn Session> {
        Arc::new(GenericSession::new(session_id, authentication_token.clone()))
    }

    fn logon_session_user(&self, _session: &dyn Session, _token: &UserIdentityToken) -> LogonDecision {
        LogonDecision::Reject
    }
}

/// Shared, non-owning slot holding the currently installed [`AuthCallback`].
///
/// Clones observe the same slot, so adapters built before a callback change see the
/// new callback. A callback whose last strong reference was dropped reads as absent.
#[derive(Clone, Default)]
pub struct AuthHandle {
    slot: Arc<RwLock<Option<Weak<dyn AuthCallback>>>>,
}

impl AuthHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, callback: &Arc<dyn AuthCallback>) {
        *self.slot.write() = Some(Arc::downgrade(callback));
    }

    pub fn clear(&self) {
        *self.slot.write() = None;
    }

    pub fn upgrade(&self) -> Option<Arc<dyn AuthCallback>> {
        self.slot.read().as_ref().and_then(Weak::upgrade)
    }
}

impl fmt::Debug for AuthHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.read();
        f.debug_struct("AuthHandle")
            .field("installed", &slot.is_some())
            .field(
                "alive",
                &slot.as_ref().map(|weak| weak.strong_count() > 0).unwrap_or(false),
            )
            .finish()
    }
}

/// Create a session through `callback`, or a [`GenericSession`] when none is installed.
pub fn create_session(
    callback: Option<&dyn AuthCallback>,
    session_id: i32,
    authentication_token: &NodeId,
) -> Arc<dyn Session> {
    match callback {
        Some(callback) => callback.create_session(session_id, authentication_token),
        None => Arc::new(GenericSession::new(session_id, authentication_token.clone())),
    }
}

/// Decide whether `token` may log on to `session`.
///
/// Anonymous tokens follow `policy.anonymous_allowed`. User name tokens require
/// `policy.username_password_allowed` and an installed callback, which makes the final
/// call. Every other token kind is rejected.
pub fn decide_logon(
    policy: UserIdentityTokenConfig,
    session: &dyn Session,
    token: &UserIdentityToken,
    callback: Option<&dyn AuthCallback>,
) -> LogonDecision {
    match token {
        UserIdentityToken::Anonymous { .. } => {
            if policy.anonymous_allowed {
                LogonDecision::Accept
            } else {
                LogonDecision::Reject
            }
        }
        UserIdentityToken::UserName { .. } => {
            if !policy.username_password_allowed {
                return LogonDecision::Reject;
            }
            match callback {
                Some(callback) => callback.logon_session_user(session, token),
                None => LogonDecision::Reject,
            }
        }
        UserIdentityToken::X509 { .. } | UserIdentityToken::IssuedToken { .. } => {
            LogonDecision::Reject
        }
    }
}
