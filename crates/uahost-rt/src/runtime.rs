//! ---
//! uah_section: "04-runtime-modules"
//! uah_subsection: "module"
//! uah_type: "source"
//! uah_scope: "code"
//! uah_description: "Reference runtime module hosting the local server manager."
//! uah_version: "v0.1.0"
//! uah_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{bail, Result};
use parking_lot::Mutex;
use tracing::{debug, info};
use uahost_core::{ConfigProvider, RuntimeModule, ServerManager};

use crate::server::LocalServerManager;

/// Server manager of the runtime currently started by a factory.
pub(crate) type ServerSlot = Arc<Mutex<Option<Arc<LocalServerManager>>>>;

pub struct LocalRuntimeModule {
    initialized: bool,
    server: Option<Arc<LocalServerManager>>,
    published: ServerSlot,
}

impl LocalRuntimeModule {
    pub fn new() -> Self {
        Self::with_slot(ServerSlot::default())
    }

    pub(crate) fn with_slot(published: ServerSlot) -> Self {
        Self {
            initialized: false,
            server: None,
            published,
        }
    }

    pub fn local_server(&self) -> Option<Arc<LocalServerManager>> {
        self.server.clone()
    }
}

impl Default for LocalRuntimeModule {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeModule for LocalRuntimeModule {
    fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            bail!("runtime module already initialized");
        }
        self.initialized = true;
        debug!("local runtime initialized");
        Ok(())
    }

    fn start_up(&mut self, config: Arc<dyn ConfigProvider>) -> Result<()> {
        if !self.initialized {
            bail!("runtime module started before initialization");
        }
        if self.server.is_some() {
            bail!("runtime module already started");
        }
        let server = Arc::new(LocalServerManager::new(config));
        *self.published.lock() = Some(server.clone());
        self.server = Some(server);
        info!("local runtime started");
        Ok(())
    }

    fn shut_down(&mut self) {
        if let Some(server) = self.server.take() {
            server.close_all_sessions();
            let mut published = self.published.lock();
            if published
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &server))
            {
                *published = None;
            }
            info!("local runtime shut down");
        }
    }

    fn server_manager(&self) -> Option<Arc<dyn ServerManager>> {
        self.server
            .clone()
            .map(|server| server as Arc<dyn ServerManager>)
    }
}
