//! ---
//! uah_section: "02-configuration"
//! uah_subsection: "module"
//! uah_type: "source"
//! uah_scope: "code"
//! uah_description: "Configuration provider seam and the file-backed default adapter."
//! uah_version: "v0.1.0"
//! uah_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;
use tracing::{debug, info};
use uahost_common::{
    ConfigFormat, EndpointSettings, ServerInstanceInfo, ServerSettings, ServerTraceSettings,
    StackTraceSettings, UserIdentityTokenConfig,
};

use crate::auth::{self, AuthHandle, LogonDecision, Session, UserIdentityToken};
use crate::modules::{ProtocolStack, ServerManager};
use crate::types::NodeId;

/// Source of server settings plus session and identity policy.
///
/// Shared between the orchestrator and the running runtime, which consults the session
/// hooks while serving clients.
pub trait ConfigProvider: Send + Sync {
    fn load_configuration(&self) -> Result<()>;
    fn start_up(&self, server_manager: &Arc<dyn ServerManager>) -> Result<()>;
    fn shut_down(&self);

    fn stack_trace_settings(&self) -> StackTraceSettings;
    fn server_trace_settings(&self) -> ServerTraceSettings;
    fn server_instance_info(&self) -> ServerInstanceInfo;
    fn endpoint_configuration(&self) -> EndpointSettings;
    fn user_identity_token_config(&self) -> UserIdentityTokenConfig;

    fn create_session(&self, session_id: i32, authentication_token: &NodeId) -> Arc<dyn Session>;
    fn logon_session_user(&self, session: &dyn Session, token: &UserIdentityToken) -> LogonDecision;

    fn create_protocol_stack(&self) -> Option<Box<dyn ProtocolStack>> {
        None
    }
}

/// Default adapter reading an INI or XML settings file.
///
/// Before [`ConfigProvider::load_configuration`] succeeds every getter returns defaults.
#[derive(Debug)]
pub struct FileServerConfig {
    format: ConfigFormat,
    path: PathBuf,
    application_path: String,
    auth: AuthHandle,
    settings: RwLock<ServerSettings>,
}

impl FileServerConfig {
    pub fn new(
        format: ConfigFormat,
        path: impl Into<PathBuf>,
        application_path: impl Into<String>,
        auth: AuthHandle,
    ) -> Self {
        Self {
            format,
            path: path.into(),
            application_path: application_path.into(),
            auth,
            settings: RwLock::new(ServerSettings::default()),
        }
    }

    /// Pick the adapter variant from the extension of `path`.
    ///
    /// Returns `None` when the extension is neither `.ini` nor `.xml`.
    pub fn from_path(
        path: impl Into<PathBuf>,
        application_path: impl Into<String>,
        auth: AuthHandle,
    ) -> Option<Self> {
        let path = path.into();
        let format = ConfigFormat::from_path(&path)?;
        Some(Self::new(format, path, application_path, auth))
    }

    pub fn format(&self) -> ConfigFormat {
        self.format
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> ServerSettings {
        self.settings.read().clone()
    }
}

impl ConfigProvider for FileServerConfig {
    fn load_configuration(&self) -> Result<()> {
        let settings = ServerSettings::load(self.format, &self.path, &self.application_path)?;
        info!(
            config_path = %self.path.display(),
            format = %self.format,
            server_uri = %settings.server.uri,
            endpoints = settings.endpoints.urls.len(),
            "server configuration loaded"
        );
        *self.settings.write() = settings;
        Ok(())
    }

    fn start_up(&self, _server_manager: &Arc<dyn ServerManager>) -> Result<()> {
        debug!(config_path = %self.path.display(), "configuration started");
        Ok(())
    }

    fn shut_down(&self) {
        debug!(config_path = %self.path.display(), "configuration shut down");
    }

    fn stack_trace_settings(&self) -> StackTraceSettings {
        self.settings.read().trace.stack()
    }

    fn server_trace_settings(&self) -> ServerTraceSettings {
        self.settings.read().trace.server()
    }

    fn server_instance_info(&self) -> ServerInstanceInfo {
        self.settings.read().server.clone()
    }

    fn endpoint_configuration(&self) -> EndpointSettings {
        self.settings.read().endpoints.clone()
    }

    fn user_identity_token_config(&self) -> UserIdentityTokenConfig {
        self.settings.read().identity
    }

    fn create_session(&self, session_id: i32, authentication_token: &NodeId) -> Arc<dyn Session> {
        let callback = self.auth.upgrade();
        auth::create_session(callback.as_deref(), session_id, authentication_token)
    }

    fn logon_session_user(&self, session: &dyn Session, token: &UserIdentityToken) -> LogonDecision {
        let callback = self.auth.upgrade();
        let decision = auth::decide_logon(
            self.user_identity_token_config(),
            session,
            token,
            callback.as_deref(),
        );
        debug!(
            session_id = session.session_id(),
            token = %token.kind(),
            %decision,
            "logon decided"
        );
        decision
    }

    fn create_protocol_stack(&self) -> Option<Box<dyn ProtocolStack>> {
        self.auth.upgrade()?.create_protocol_stack()
    }
}
