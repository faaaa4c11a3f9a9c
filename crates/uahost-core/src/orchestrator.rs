//! ---
//! uah_section: "01-core-lifecycle"
//! uah_subsection: "module"
//! uah_type: "source"
//! uah_scope: "code"
//! uah_description: "Ordered startup, rollback and shutdown of the server subsystems."
//! uah_version: "v0.1.0"
//! uah_owner: "tbd"
//! ---
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use parking_lot::Mutex;
use serde::Serialize;
use strum::Display;
use tracing::{debug, error, info, warn};
use uahost_common::{LocalizedText, ServerTrace};

use crate::auth::{AuthCallback, AuthHandle, DefaultAuthCallback};
use crate::config_adapter::{ConfigProvider, FileServerConfig};
use crate::error::{LifecycleError, NodeManagerFailure, Result};
use crate::modules::{
    ModuleFactory, NodeManager, NodeManagerConfig, ProtocolModule, RuntimeModule, ServerManager,
};
use crate::registry::{NodeManagerId, NodeManagerRegistry};

/// Lifecycle phase of the orchestrated server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ServerState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl ServerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ServerState::Starting,
            2 => ServerState::Running,
            3 => ServerState::Stopping,
            _ => ServerState::Stopped,
        }
    }
}

/// Outcome of a successful [`LifecycleOrchestrator::start`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StartReport {
    pub endpoints: Vec<String>,
    pub node_manager_failures: Vec<NodeManagerFailure>,
}

impl fmt::Display for StartReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.endpoints.is_empty() {
            return Ok(());
        }
        writeln!(f, "***************************************************")?;
        writeln!(f, " Server opened endpoints for following URLs:")?;
        for endpoint in &self.endpoints {
            writeln!(f, "     {endpoint}")?;
        }
        write!(f, "***************************************************")
    }
}

/// Outcome of [`LifecycleOrchestrator::stop`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopReport {
    pub connected_clients: usize,
    /// Time spent waiting for clients before teardown.
    pub drain: Duration,
    pub reason: LocalizedText,
}

/// Settings reported by [`LifecycleOrchestrator::check_configuration`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigurationSummary {
    pub server_uri: String,
    pub endpoints: Vec<String>,
    pub rejected_certificate_dir: PathBuf,
    pub anonymous_allowed: bool,
    pub username_password_allowed: bool,
    pub server_trace_file: Option<PathBuf>,
    pub server_names: Vec<LocalizedText>,
}

impl ConfigurationSummary {
    fn from_provider(config: &dyn ConfigProvider) -> Self {
        let instance = config.server_instance_info();
        let endpoints = config.endpoint_configuration();
        let identity = config.user_identity_token_config();
        let trace = config.server_trace_settings();
        Self {
            server_uri: instance.uri,
            endpoints: endpoints.urls,
            rejected_certificate_dir: endpoints.rejected_certificate_dir,
            anonymous_allowed: identity.anonymous_allowed,
            username_password_allowed: identity.username_password_allowed,
            server_trace_file: trace.enabled.then_some(trace.file),
            server_names: instance.names,
        }
    }
}

#[derive(Debug, Clone, Default)]
enum ConfigSource {
    #[default]
    Unset,
    File {
        path: String,
        application_path: String,
    },
}

/// Which subsystems completed their start hook during the current run.
#[derive(Debug, Clone, Copy, Default)]
struct Started {
    runtime: bool,
    config: bool,
    node_managers: bool,
    protocol: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    /// Failed start: node managers stay registered.
    Rollback,
    /// Regular stop: node managers are released.
    Stop,
}

struct OrchestratorState {
    source: ConfigSource,
    config: Option<Arc<dyn ConfigProvider>>,
    runtime: Option<Box<dyn RuntimeModule>>,
    protocol: Option<Box<dyn ProtocolModule>>,
    server_manager: Option<Arc<dyn ServerManager>>,
    node_managers: NodeManagerRegistry,
    auth: AuthHandle,
    trace: Option<ServerTrace>,
    trace_file: Option<PathBuf>,
    started: Started,
}

impl OrchestratorState {
    /// Installed provider, or the default adapter built from the recorded file path.
    fn ensure_config(&mut self) -> Result<Arc<dyn ConfigProvider>> {
        if let Some(config) = &self.config {
            return Ok(config.clone());
        }
        let ConfigSource::File {
            path,
            application_path,
        } = &self.source
        else {
            return Err(LifecycleError::ConfigurationMissing {
                reason: "no configuration file or provider was supplied".to_owned(),
            });
        };
        let adapter = FileServerConfig::from_path(path, application_path, self.auth.clone())
            .ok_or_else(|| LifecycleError::ConfigurationMissing {
                reason: format!("unsupported configuration file extension: {path}"),
            })?;
        info!(config_path = %path, format = %adapter.format(), "default configuration adapter created");
        let config: Arc<dyn ConfigProvider> = Arc::new(adapter);
        self.config = Some(config.clone());
        Ok(config)
    }

    fn open_trace(&mut self, config: &dyn ConfigProvider) {
        self.trace.take();
        self.trace_file = None;
        let server = config.server_trace_settings();
        let stack = config.stack_trace_settings();
        let instance = config.server_instance_info();
        match ServerTrace::open(&server, &stack, &instance.uri) {
            Ok(Some(trace)) => {
                self.trace_file = Some(trace.file().to_path_buf());
                self.trace = Some(trace);
            }
            Ok(None) => debug!("server trace disabled"),
            Err(err) => warn!(error = %format!("{err:#}"), "server trace unavailable, continuing without it"),
        }
    }

    fn start_runtime(&mut self, config: Arc<dyn ConfigProvider>) -> anyhow::Result<Arc<dyn ServerManager>> {
        let runtime = self
            .runtime
            .as_mut()
            .context("runtime module was not created")?;
        runtime.start_up(config)?;
        self.started.runtime = true;
        let server_manager = runtime
            .server_manager()
            .ok_or_else(|| anyhow!("runtime module started without a server manager"))?;
        self.server_manager = Some(server_manager.clone());
        Ok(server_manager)
    }

    fn start_protocol(&mut self) -> anyhow::Result<()> {
        let (Some(runtime), Some(protocol)) = (self.runtime.as_deref(), self.protocol.as_mut()) else {
            return Err(anyhow!("protocol module started without a runtime module"));
        };
        // A failed start is still shut down during rollback.
        self.started.protocol = true;
        protocol.start_up(runtime)
    }

    /// Release everything acquired by the current run, in shutdown order.
    fn tear_down(&mut self, mode: Teardown) {
        let started = std::mem::take(&mut self.started);

        if let Some(mut protocol) = self.protocol.take() {
            if started.protocol {
                protocol.shut_down();
            }
            debug!("protocol module released");
        }

        self.server_manager = None;
        if let Some(mut runtime) = self.runtime.take() {
            if started.runtime {
                runtime.shut_down();
            }
            debug!("runtime module released");
        }

        match mode {
            Teardown::Stop => self.node_managers.shut_down_all(),
            Teardown::Rollback if started.node_managers => self.node_managers.shut_down_running(),
            Teardown::Rollback => {}
        }

        if started.config {
            if let Some(config) = self.config.take() {
                config.shut_down();
                debug!("configuration released");
            }
        }

        if let Some(trace) = self.trace.take() {
            trace.close();
        }
    }
}

/// Unwinds a partial startup unless [`StartupGuard::commit`] was called.
struct StartupGuard<'a> {
    state: &'a mut OrchestratorState,
    armed: bool,
}

impl<'a> StartupGuard<'a> {
    fn new(state: &'a mut OrchestratorState) -> Self {
        Self { state, armed: true }
    }

    fn commit(mut self) {
        self.armed = false;
    }
}

impl Deref for StartupGuard<'_> {
    type Target = OrchestratorState;

    fn deref(&self) -> &Self::Target {
        self.state
    }
}

impl DerefMut for StartupGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.state
    }
}

impl Drop for StartupGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("rolling back partial server startup");
            self.state.tear_down(Teardown::Rollback);
        }
    }
}

/// Brings the configuration, runtime, node managers and protocol modules up in order
/// and tears them down in reverse.
///
/// Every control operation holds one exclusive lock for its whole duration. The
/// current [`ServerState`] can be read without the lock through [`Self::state`].
pub struct LifecycleOrchestrator {
    factory: Arc<dyn ModuleFactory>,
    // Keeps the weak handle in `auth` valid until a callback is installed.
    _default_auth: Arc<dyn AuthCallback>,
    phase: AtomicU8,
    inner: Mutex<OrchestratorState>,
}

impl LifecycleOrchestrator {
    pub fn new(factory: Arc<dyn ModuleFactory>) -> Self {
        let default_auth: Arc<dyn AuthCallback> = Arc::new(DefaultAuthCallback);
        let auth = AuthHandle::new();
        auth.install(&default_auth);
        Self {
            factory,
            _default_auth: default_auth,
            phase: AtomicU8::new(ServerState::Stopped as u8),
            inner: Mutex::new(OrchestratorState {
                source: ConfigSource::Unset,
                config: None,
                runtime: None,
                protocol: None,
                server_manager: None,
                node_managers: NodeManagerRegistry::new(),
                auth,
                trace: None,
                trace_file: None,
                started: Started::default(),
            }),
        }
    }

    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ServerState) {
        self.phase.store(state as u8, Ordering::Release);
        debug!(%state, "server state changed");
    }

    fn ensure_stopped(&self) -> Result<()> {
        match self.state() {
            ServerState::Stopped => Ok(()),
            _ => Err(LifecycleError::AlreadyStarted),
        }
    }

    /// Record a settings file for the default adapter built at start.
    ///
    /// Replaces any previously supplied provider.
    pub fn configure_file(
        &self,
        path: impl Into<String>,
        application_path: impl Into<String>,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        self.ensure_stopped()?;
        let path = path.into();
        let application_path = application_path.into();
        info!(config_path = %path, application_path = %application_path, "configuration file recorded");
        inner.config = None;
        inner.source = ConfigSource::File {
            path,
            application_path,
        };
        Ok(())
    }

    /// Take ownership of a caller-built configuration provider.
    pub fn configure_provider(&self, provider: Box<dyn ConfigProvider>) -> Result<()> {
        let mut inner = self.inner.lock();
        self.ensure_stopped()?;
        info!("configuration provider installed");
        inner.source = ConfigSource::Unset;
        inner.config = Some(Arc::from(provider));
        Ok(())
    }

    /// Install the application's session and identity callback.
    ///
    /// Only a weak reference is kept; the caller keeps the callback alive.
    pub fn set_auth_callback(&self, callback: &Arc<dyn AuthCallback>) -> Result<()> {
        let inner = self.inner.lock();
        self.ensure_stopped()?;
        inner.auth.install(callback);
        info!("authentication callback installed");
        Ok(())
    }

    /// Register a node manager; while running it is started right away.
    ///
    /// A manager whose start fails stays registered and is released on stop.
    pub fn add_node_manager(&self, manager: Box<dyn NodeManager>) -> Result<NodeManagerId> {
        let mut inner = self.inner.lock();
        let name = manager.name().to_owned();
        let id = inner.node_managers.register(manager);
        if self.state() == ServerState::Running {
            if let Some(server_manager) = inner.server_manager.clone() {
                if let Err(source) = inner.node_managers.start(id, &server_manager) {
                    error!(node_manager = %name, %id, error = %format!("{source:#}"), "node manager failed to start");
                    return Err(LifecycleError::NodeManagerStartFailed { name, source });
                }
                info!(node_manager = %name, %id, "node manager started on running server");
            }
        }
        Ok(id)
    }

    pub fn node_manager_count(&self) -> usize {
        self.inner.lock().node_managers.len()
    }

    /// Trace file opened by the last start, if server tracing was enabled.
    pub fn server_trace_file(&self) -> Option<PathBuf> {
        self.inner.lock().trace_file.clone()
    }

    /// Load the configuration without starting anything.
    ///
    /// The loaded provider stays installed for the next start.
    pub fn check_configuration(&self) -> Result<ConfigurationSummary> {
        let mut inner = self.inner.lock();
        self.ensure_stopped()?;
        let config = inner.ensure_config()?;
        config
            .load_configuration()
            .map_err(LifecycleError::ConfigurationLoadFailed)?;
        Ok(ConfigurationSummary::from_provider(config.as_ref()))
    }

    pub fn start(&self) -> Result<StartReport> {
        let mut inner = self.inner.lock();
        self.ensure_stopped()?;
        self.set_state(ServerState::Starting);
        info!("starting server");

        match Self::bring_up(&mut inner, self.factory.as_ref()) {
            Ok(report) => {
                self.set_state(ServerState::Running);
                for endpoint in &report.endpoints {
                    info!(endpoint = %endpoint, "endpoint opened");
                }
                info!(
                    endpoints = report.endpoints.len(),
                    node_managers = inner.node_managers.len(),
                    node_manager_failures = report.node_manager_failures.len(),
                    "server running"
                );
                Ok(report)
            }
            Err(err) => {
                self.set_state(ServerState::Stopped);
                error!(error = %err, "server start failed");
                Err(err)
            }
        }
    }

    fn bring_up(state: &mut OrchestratorState, factory: &dyn ModuleFactory) -> Result<StartReport> {
        let config = state.ensure_config()?;
        config
            .load_configuration()
            .map_err(LifecycleError::ConfigurationLoadFailed)?;

        let mut guard = StartupGuard::new(state);
        guard.open_trace(config.as_ref());

        let runtime = guard.runtime.insert(factory.create_runtime());
        runtime
            .initialize()
            .map_err(LifecycleError::RuntimeInitFailed)?;
        debug!("runtime module initialized");

        let stack = config.create_protocol_stack();
        let protocol = guard.protocol.insert(factory.create_protocol());
        protocol
            .initialize(config.as_ref(), stack)
            .map_err(LifecycleError::ProtocolInitFailed)?;
        debug!("protocol module initialized");

        let server_manager = guard
            .start_runtime(config.clone())
            .map_err(LifecycleError::RuntimeStartFailed)?;
        debug!("runtime module started");

        config
            .start_up(&server_manager)
            .map_err(LifecycleError::ConfigStartFailed)?;
        guard.started.config = true;

        let node_manager_failures = guard.node_managers.start_all(&server_manager);
        guard.started.node_managers = true;

        guard
            .start_protocol()
            .map_err(LifecycleError::ProtocolStartFailed)?;
        debug!("protocol module started");

        let endpoints = config.endpoint_configuration().urls;
        guard.commit();
        Ok(StartReport {
            endpoints,
            node_manager_failures,
        })
    }

    /// Announce the shutdown, wait `grace_seconds` if clients are connected, then tear
    /// everything down.
    pub fn stop(&self, grace_seconds: u32, reason: &LocalizedText) -> Result<StopReport> {
        let mut inner = self.inner.lock();
        if self.state() != ServerState::Running {
            return Err(LifecycleError::NotRunning);
        }
        self.set_state(ServerState::Stopping);
        info!(grace_seconds, reason = %reason, "stopping server");

        let connected_clients = inner
            .server_manager
            .as_ref()
            .map(|server_manager| server_manager.start_server_shutdown(grace_seconds, reason))
            .unwrap_or(0);
        let mut drain = Duration::ZERO;
        if connected_clients > 0 {
            drain = Duration::from_secs(u64::from(grace_seconds));
            info!(connected_clients, grace_seconds, "waiting for clients to disconnect");
            std::thread::sleep(drain);
        }

        inner.tear_down(Teardown::Stop);
        self.set_state(ServerState::Stopped);
        info!(connected_clients, "server stopped");
        Ok(StopReport {
            connected_clients,
            drain,
            reason: reason.clone(),
        })
    }

    /// Namespace-1 node manager of the running server.
    pub fn default_node_manager(&self) -> Result<Arc<dyn NodeManagerConfig>> {
        let inner = self.inner.lock();
        if self.state() != ServerState::Running {
            return Err(LifecycleError::NotRunning);
        }
        inner
            .server_manager
            .as_ref()
            .map(|server_manager| server_manager.default_node_manager())
            .ok_or(LifecycleError::NotRunning)
    }
}

impl fmt::Debug for LifecycleOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleOrchestrator")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for LifecycleOrchestrator {
    fn drop(&mut self) {
        if self.state() == ServerState::Running {
            let reason = LocalizedText::new("en", "Application shut down");
            if let Err(err) = self.stop(0, &reason) {
                warn!(error = %err, "shutdown on drop failed");
            }
        }
    }
}
