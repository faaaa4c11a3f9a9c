//! ---
//! uah_section: "06-testing"
//! uah_subsection: "module"
//! uah_type: "source"
//! uah_scope: "code"
//! uah_description: "Scripted configuration provider and authentication callback."
//! uah_version: "v0.1.0"
//! uah_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use uahost_common::{
    EndpointSettings, ServerInstanceInfo, ServerSettings, ServerTraceSettings, StackTraceSettings,
    UserIdentityTokenConfig,
};
use uahost_core::auth;
use uahost_core::{
    AuthCallback, AuthHandle, ConfigProvider, GenericSession, LogonDecision, NodeId,
    ProtocolStack, ServerManager, Session, UserIdentityToken,
};
use url::Url;

use crate::journal::{FaultPlan, FaultPoint, Journal};

/// In-memory configuration provider journaling its lifecycle hooks under `config.*`.
pub struct ScriptedConfig {
    journal: Journal,
    faults: FaultPlan,
    settings: ServerSettings,
    auth: AuthHandle,
}

impl ScriptedConfig {
    pub fn new(journal: &Journal, faults: &FaultPlan) -> Self {
        let mut settings = ServerSettings::default();
        settings.server.uri = "urn:uahost:scripted".to_owned();
        settings.endpoints.urls = vec!["opc.tcp://localhost:4840".to_owned()];
        Self {
            journal: journal.clone(),
            faults: faults.clone(),
            settings,
            auth: AuthHandle::new(),
        }
    }

    pub fn with_endpoints(mut self, urls: &[&str]) -> Self {
        self.settings.endpoints.urls = urls.iter().map(|url| (*url).to_owned()).collect();
        self
    }

    pub fn with_identity(mut self, identity: UserIdentityTokenConfig) -> Self {
        self.settings.identity = identity;
        self
    }

    pub fn with_auth(mut self, auth: AuthHandle) -> Self {
        self.auth = auth;
        self
    }

    pub fn boxed(self) -> Box<dyn ConfigProvider> {
        Box::new(self)
    }
}

impl ConfigProvider for ScriptedConfig {
    fn load_configuration(&self) -> Result<()> {
        self.journal.record("config.load");
        self.faults.check(FaultPoint::ConfigLoad)
    }

    fn start_up(&self, _server_manager: &Arc<dyn ServerManager>) -> Result<()> {
        self.journal.record("config.start");
        self.faults.check(FaultPoint::ConfigStart)
    }

    fn shut_down(&self) {
        self.journal.record("config.shutdown");
    }

    fn stack_trace_settings(&self) -> StackTraceSettings {
        self.settings.trace.stack()
    }

    fn server_trace_settings(&self) -> ServerTraceSettings {
        self.settings.trace.server()
    }

    fn server_instance_info(&self) -> ServerInstanceInfo {
        self.settings.server.clone()
    }

    fn endpoint_configuration(&self) -> EndpointSettings {
        self.settings.endpoints.clone()
    }

    fn user_identity_token_config(&self) -> UserIdentityTokenConfig {
        self.settings.identity
    }

    fn create_session(&self, session_id: i32, authentication_token: &NodeId) -> Arc<dyn Session> {
        let callback = self.auth.upgrade();
        auth::create_session(callback.as_deref(), session_id, authentication_token)
    }

    fn logon_session_user(&self, session: &dyn Session, token: &UserIdentityToken) -> LogonDecision {
        let callback = self.auth.upgrade();
        auth::decide_logon(self.settings.identity, session, token, callback.as_deref())
    }

    fn create_protocol_stack(&self) -> Option<Box<dyn ProtocolStack>> {
        self.journal.record("config.create_protocol_stack");
        self.auth.upgrade()?.create_protocol_stack()
    }
}

impl Drop for ScriptedConfig {
    fn drop(&mut self) {
        self.journal.record("config.drop");
    }
}

/// Protocol stack handed out by [`ScriptedAuthCallback`].
pub struct InjectedStack {
    name: String,
    opened: Arc<Mutex<Vec<Url>>>,
}

impl ProtocolStack for InjectedStack {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, endpoints: &[Url]) -> Result<()> {
        self.opened.lock().extend_from_slice(endpoints);
        Ok(())
    }

    fn close(&mut self) {
        self.opened.lock().clear();
    }
}

/// Authentication callback accepting a fixed set of user names.
#[derive(Default)]
pub struct ScriptedAuthCallback {
    accepted_users: Vec<String>,
    stack_name: Option<String>,
    sessions: AtomicUsize,
    logons: AtomicUsize,
    opened: Arc<Mutex<Vec<Url>>>,
}

impl ScriptedAuthCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept_user(mut self, user: impl Into<String>) -> Self {
        self.accepted_users.push(user.into());
        self
    }

    /// Supply an [`InjectedStack`] named `name` to protocol modules.
    pub fn with_stack(mut self, name: impl Into<String>) -> Self {
        self.stack_name = Some(name.into());
        self
    }

    pub fn sessions_created(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    pub fn logons_forwarded(&self) -> usize {
        self.logons.load(Ordering::SeqCst)
    }

    /// Endpoints currently opened on injected stacks.
    pub fn opened_endpoints(&self) -> Vec<String> {
        self.opened.lock().iter().map(Url::to_string).collect()
    }
}

impl AuthCallback for ScriptedAuthCallback {
    fn create_session(&self, session_id: i32, authentication_token: &NodeId) -> Arc<dyn Session> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        Arc::new(GenericSession::new(session_id, authentication_token.clone()))
    }

    fn logon_session_user(&self, _session: &dyn Session, token: &UserIdentityToken) -> LogonDecision {
        self.logons.fetch_add(1, Ordering::SeqCst);
        match token {
            UserIdentityToken::UserName { user, .. } if self.accepted_users.contains(user) => {
                LogonDecision::Accept
            }
            _ => LogonDecision::Reject,
        }
    }

    fn create_protocol_stack(&self) -> Option<Box<dyn ProtocolStack>> {
        let name = self.stack_name.clone()?;
        Some(Box::new(InjectedStack {
            name,
            opened: self.opened.clone(),
        }))
    }
}
