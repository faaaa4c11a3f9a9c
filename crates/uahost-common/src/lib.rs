//! ---
//! uah_section: "02-configuration"
//! uah_subsection: "module"
//! uah_type: "source"
//! uah_scope: "code"
//! uah_description: "Shared settings and tracing primitives."
//! uah_version: "v0.1.0"
//! uah_owner: "tbd"
//! ---
//! Shared primitives for the UA-Host workspace.
//! This crate exposes the server settings model with its INI and XML loaders,
//! and the tracing setup used by the daemon and by started servers.

pub mod config;
pub mod logging;

pub use config::{
    ConfigFormat, EndpointSettings, LocalizedText, LoggingConfig, ServerInstanceInfo,
    ServerSettings, ServerTraceSettings, SettingsError, StackTraceSettings, TraceSettings,
    UserIdentityTokenConfig, APPLICATION_PATH_PLACEHOLDER,
};
pub use logging::{init_tracing, LogFormat, ServerTrace, STACK_TRACE_TARGET};
