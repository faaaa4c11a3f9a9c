//! ---
//! uah_section: "04-runtime-modules"
//! uah_subsection: "module"
//! uah_type: "source"
//! uah_scope: "code"
//! uah_description: "Reference protocol module and the in-process loopback stack."
//! uah_version: "v0.1.0"
//! uah_owner: "tbd"
//! ---
use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};
use uahost_common::STACK_TRACE_TARGET;
use uahost_core::{ConfigProvider, ProtocolModule, ProtocolStack, RuntimeModule};
use url::Url;

const OPC_TCP_SCHEME: &str = "opc.tcp";
const DEFAULT_OPC_TCP_PORT: u16 = 4840;

/// Stack that binds nothing and only records which endpoints it serves.
#[derive(Debug, Default)]
pub struct LoopbackStack {
    bound: Vec<Url>,
}

impl LoopbackStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bound(&self) -> &[Url] {
        &self.bound
    }
}

impl ProtocolStack for LoopbackStack {
    fn name(&self) -> &str {
        "loopback"
    }

    fn open(&mut self, endpoints: &[Url]) -> Result<()> {
        if !self.bound.is_empty() {
            bail!("loopback stack is already open");
        }
        let mut listeners = HashSet::new();
        for endpoint in endpoints {
            let host = endpoint.host_str().unwrap_or_default().to_owned();
            let port = endpoint.port().unwrap_or(DEFAULT_OPC_TCP_PORT);
            if !listeners.insert((host, port)) {
                bail!("endpoint {endpoint} reuses an address that is already bound");
            }
            debug!(target: STACK_TRACE_TARGET, endpoint = %endpoint, "listener bound");
        }
        self.bound = endpoints.to_vec();
        Ok(())
    }

    fn close(&mut self) {
        for endpoint in self.bound.drain(..) {
            debug!(target: STACK_TRACE_TARGET, endpoint = %endpoint, "listener released");
        }
    }
}

/// Protocol module that validates the configured endpoints and opens them on a stack.
pub struct LocalProtocolModule {
    endpoints: Vec<Url>,
    stack: Option<Box<dyn ProtocolStack>>,
    open: bool,
}

impl LocalProtocolModule {
    pub fn new() -> Self {
        Self {
            endpoints: Vec::new(),
            stack: None,
            open: false,
        }
    }

    pub fn endpoints(&self) -> &[Url] {
        &self.endpoints
    }

    pub fn stack_name(&self) -> Option<&str> {
        self.stack.as_deref().map(|stack| stack.name())
    }
}

impl Default for LocalProtocolModule {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_endpoint(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).with_context(|| format!("endpoint url '{raw}' is invalid"))?;
    if url.scheme() != OPC_TCP_SCHEME {
        bail!("endpoint url '{raw}' must use the {OPC_TCP_SCHEME} scheme");
    }
    if url.host_str().map_or(true, str::is_empty) {
        bail!("endpoint url '{raw}' has no host");
    }
    Ok(url)
}

impl ProtocolModule for LocalProtocolModule {
    fn initialize(
        &mut self,
        config: &dyn ConfigProvider,
        stack: Option<Box<dyn ProtocolStack>>,
    ) -> Result<()> {
        self.endpoints = config
            .endpoint_configuration()
            .urls
            .iter()
            .map(|raw| parse_endpoint(raw))
            .collect::<Result<_>>()?;
        let stack = stack.unwrap_or_else(|| Box::new(LoopbackStack::new()));
        info!(stack = %stack.name(), endpoints = self.endpoints.len(), "protocol module initialized");
        self.stack = Some(stack);
        Ok(())
    }

    fn start_up(&mut self, runtime: &dyn RuntimeModule) -> Result<()> {
        if runtime.server_manager().is_none() {
            bail!("runtime module is not running");
        }
        let stack = self
            .stack
            .as_mut()
            .context("protocol module started before initialization")?;
        stack.open(&self.endpoints)?;
        self.open = true;
        info!(stack = %stack.name(), endpoints = self.endpoints.len(), "protocol stack opened");
        Ok(())
    }

    fn shut_down(&mut self) {
        if let Some(stack) = self.stack.as_mut() {
            if self.open {
                stack.close();
                self.open = false;
                info!(stack = %stack.name(), "protocol stack closed");
            }
        }
    }
}
