//! ---
//! uah_section: "04-runtime-modules"
//! uah_subsection: "module"
//! uah_type: "source"
//! uah_scope: "code"
//! uah_description: "In-process server manager with a session table and shutdown notice."
//! uah_version: "v0.1.0"
//! uah_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, info};
use uahost_common::LocalizedText;
use uahost_core::{
    ConfigProvider, LogonDecision, NodeId, NodeManagerConfig, ServerManager, Session,
    UserIdentityToken,
};

use crate::namespace::Namespace1Store;

/// Shutdown announcement sent to connected clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownNotice {
    pub reason: LocalizedText,
    pub seconds_till_shutdown: u32,
    pub deadline: DateTime<Utc>,
    pub connected_clients: usize,
}

struct SessionEntry {
    session: Arc<dyn Session>,
    activated: bool,
}

/// Server manager of the reference runtime.
///
/// Sessions are created and authorised through the configuration provider; activated
/// sessions count as connected clients.
pub struct LocalServerManager {
    config: Arc<dyn ConfigProvider>,
    namespace: Arc<Namespace1Store>,
    sessions: Mutex<IndexMap<i32, SessionEntry>>,
    shutdown: Mutex<Option<ShutdownNotice>>,
}

impl LocalServerManager {
    pub fn new(config: Arc<dyn ConfigProvider>) -> Self {
        Self {
            config,
            namespace: Arc::new(Namespace1Store::new()),
            sessions: Mutex::new(IndexMap::new()),
            shutdown: Mutex::new(None),
        }
    }

    pub fn namespace(&self) -> Arc<Namespace1Store> {
        self.namespace.clone()
    }

    pub fn open_session(
        &self,
        session_id: i32,
        authentication_token: NodeId,
    ) -> Result<Arc<dyn Session>> {
        if self.shutdown.lock().is_some() {
            bail!("server is shutting down, session {session_id} refused");
        }
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(&session_id) {
            bail!("session {session_id} already exists");
        }
        let session = self.config.create_session(session_id, &authentication_token);
        sessions.insert(
            session_id,
            SessionEntry {
                session: session.clone(),
                activated: false,
            },
        );
        debug!(session_id, token = %authentication_token, "session opened");
        Ok(session)
    }

    pub fn activate_session(
        &self,
        session_id: i32,
        identity: &UserIdentityToken,
    ) -> Result<LogonDecision> {
        let mut sessions = self.sessions.lock();
        let Some(entry) = sessions.get_mut(&session_id) else {
            bail!("session {session_id} does not exist");
        };
        let decision = self
            .config
            .logon_session_user(entry.session.as_ref(), identity);
        if decision.is_accepted() {
            entry.activated = true;
        }
        info!(session_id, token = %identity.kind(), %decision, "session activation");
        Ok(decision)
    }

    pub fn close_session(&self, session_id: i32) -> bool {
        let closed = self.sessions.lock().shift_remove(&session_id).is_some();
        if closed {
            debug!(session_id, "session closed");
        }
        closed
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn connected_clients(&self) -> usize {
        self.sessions
            .lock()
            .values()
            .filter(|entry| entry.activated)
            .count()
    }

    pub fn shutdown_notice(&self) -> Option<ShutdownNotice> {
        self.shutdown.lock().clone()
    }

    pub(crate) fn close_all_sessions(&self) {
        let mut sessions = self.sessions.lock();
        if !sessions.is_empty() {
            debug!(sessions = sessions.len(), "closing remaining sessions");
        }
        sessions.clear();
    }
}

impl ServerManager for LocalServerManager {
    fn start_server_shutdown(&self, seconds_till_shutdown: u32, reason: &LocalizedText) -> usize {
        let connected_clients = self.connected_clients();
        let notice = ShutdownNotice {
            reason: reason.clone(),
            seconds_till_shutdown,
            deadline: Utc::now() + Duration::seconds(i64::from(seconds_till_shutdown)),
            connected_clients,
        };
        info!(
            connected_clients,
            seconds_till_shutdown,
            deadline = %notice.deadline.to_rfc3339(),
            reason = %reason,
            "shutdown announced to clients"
        );
        *self.shutdown.lock() = Some(notice);
        connected_clients
    }

    fn default_node_manager(&self) -> Arc<dyn NodeManagerConfig> {
        self.namespace.clone()
    }
}
