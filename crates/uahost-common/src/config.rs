//! ---
//! uah_section: "02-configuration"
//! uah_subsection: "module"
//! uah_type: "source"
//! uah_scope: "code"
//! uah_description: "Server settings model and INI/XML settings loaders."
//! uah_version: "v0.1.0"
//! uah_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

/// Placeholder replaced with the application path in every string setting.
pub const APPLICATION_PATH_PLACEHOLDER: &str = "[ApplicationPath]";

fn default_server_uri() -> String {
    "urn:[ApplicationPath]:uahost:server".to_owned()
}

fn default_trace_file() -> PathBuf {
    PathBuf::from("[ApplicationPath]/log/uahost-server.log")
}

fn default_max_trace_entries() -> u32 {
    100_000
}

fn default_max_backup_files() -> u32 {
    5
}

fn default_rejected_certificate_dir() -> PathBuf {
    PathBuf::from("[ApplicationPath]/pki/rejected")
}

fn default_anonymous_allowed() -> bool {
    true
}

/// Persistence format of a server configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigFormat {
    /// Sectioned `key = value` file (`.ini`).
    Ini,
    /// Structured markup file (`.xml`).
    Xml,
}

impl ConfigFormat {
    /// Select the format from the file extension, ignoring case.
    ///
    /// Returns `None` for any extension other than `.ini` or `.xml`.
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let extension = path.as_ref().extension()?.to_str()?;
        if extension.eq_ignore_ascii_case("ini") {
            Some(ConfigFormat::Ini)
        } else if extension.eq_ignore_ascii_case("xml") {
            Some(ConfigFormat::Xml)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigFormat::Ini => "ini",
            ConfigFormat::Xml => "xml",
        }
    }
}

impl fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text tagged with a locale identifier (e.g. `en`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedText {
    pub locale: String,
    pub text: String,
}

impl LocalizedText {
    pub fn new(locale: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            text: text.into(),
        }
    }

    /// Parse the `locale|text` notation used by the INI format.
    fn parse_pair(raw: &str) -> Self {
        match raw.split_once('|') {
            Some((locale, text)) => Self::new(locale.trim(), text.trim()),
            None => Self::new("", raw.trim()),
        }
    }
}

impl fmt::Display for LocalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Complete settings of one server instance, independent of file format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    pub server: ServerInstanceInfo,
    pub trace: TraceSettings,
    pub endpoints: EndpointSettings,
    pub identity: UserIdentityTokenConfig,
}

/// Identity of the server application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInstanceInfo {
    pub uri: String,
    pub names: Vec<LocalizedText>,
}

impl Default for ServerInstanceInfo {
    fn default() -> Self {
        Self {
            uri: default_server_uri(),
            names: Vec::new(),
        }
    }
}

/// Trace options for both the protocol stack and the server itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceSettings {
    pub stack_enabled: bool,
    pub stack_level: u32,
    pub server_enabled: bool,
    pub server_level: u32,
    pub max_entries: u32,
    pub max_backup_files: u32,
    pub file: PathBuf,
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            stack_enabled: false,
            stack_level: 0,
            server_enabled: false,
            server_level: 0,
            max_entries: default_max_trace_entries(),
            max_backup_files: default_max_backup_files(),
            file: default_trace_file(),
        }
    }
}

impl TraceSettings {
    pub fn stack(&self) -> StackTraceSettings {
        StackTraceSettings {
            enabled: self.stack_enabled,
            level: self.stack_level,
        }
    }

    pub fn server(&self) -> ServerTraceSettings {
        ServerTraceSettings {
            enabled: self.server_enabled,
            level: self.server_level,
            max_entries: self.max_entries,
            max_backup_files: self.max_backup_files,
            file: self.file.clone(),
        }
    }
}

/// Protocol stack trace switch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StackTraceSettings {
    pub enabled: bool,
    pub level: u32,
}

/// Server trace file options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTraceSettings {
    pub enabled: bool,
    pub level: u32,
    pub max_entries: u32,
    pub max_backup_files: u32,
    pub file: PathBuf,
}

impl Default for ServerTraceSettings {
    fn default() -> Self {
        TraceSettings::default().server()
    }
}

/// Endpoints the protocol module opens, plus the certificate rejection store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSettings {
    pub rejected_certificate_dir: PathBuf,
    pub urls: Vec<String>,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            rejected_certificate_dir: default_rejected_certificate_dir(),
            urls: Vec::new(),
        }
    }
}

/// Which user identity token kinds the server accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserIdentityTokenConfig {
    pub anonymous_allowed: bool,
    pub username_password_allowed: bool,
}

impl Default for UserIdentityTokenConfig {
    fn default() -> Self {
        Self {
            anonymous_allowed: default_anonymous_allowed(),
            username_password_allowed: false,
        }
    }
}

/// Logging options of the hosting process (stdout sink).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// Filter directive overriding `UAHOST_LOG` / `RUST_LOG`.
    #[serde(default)]
    pub filter: Option<String>,
    /// Directory for a daily rolling process log next to stdout.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

/// Errors raised while reading a settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings from {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse INI settings at {path:?}")]
    Ini {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },
    #[error("failed to parse XML settings at {path:?}")]
    Xml {
        path: PathBuf,
        #[source]
        source: quick_xml::DeError,
    },
    #[error("invalid settings in {path:?}: {details}")]
    Validation { path: PathBuf, details: String },
}

impl ServerSettings {
    /// Load settings from `path` using the parser for `format`.
    ///
    /// `[ApplicationPath]` placeholders are expanded before validation.
    pub fn load(
        format: ConfigFormat,
        path: impl AsRef<Path>,
        application_path: &str,
    ) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        debug!(config_path = %path.display(), %format, "loading server settings");
        let settings = match format {
            ConfigFormat::Ini => parse_ini(path)?,
            ConfigFormat::Xml => parse_xml(path)?,
        }
        .with_application_path(application_path);
        settings
            .validate()
            .map_err(|details| SettingsError::Validation {
                path: path.to_path_buf(),
                details,
            })?;
        Ok(settings)
    }

    /// Replace every `[ApplicationPath]` placeholder with `application_path`.
    pub fn with_application_path(mut self, application_path: &str) -> Self {
        let expand = |value: &str| value.replace(APPLICATION_PATH_PLACEHOLDER, application_path);
        let expand_path = |value: &Path| PathBuf::from(expand(&value.to_string_lossy()));

        self.server.uri = expand(&self.server.uri);
        for name in &mut self.server.names {
            name.text = expand(&name.text);
        }
        self.trace.file = expand_path(&self.trace.file);
        self.endpoints.rejected_certificate_dir =
            expand_path(&self.endpoints.rejected_certificate_dir);
        for url in &mut self.endpoints.urls {
            *url = expand(url);
        }
        self
    }

    /// Check structural invariants, returning a description of the first violation.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.uri.trim().is_empty() {
            return Err("server uri may not be empty".to_owned());
        }
        for url in &self.endpoints.urls {
            Url::parse(url).map_err(|err| format!("endpoint url '{url}' is invalid: {err}"))?;
        }
        if self.trace.server_enabled && self.trace.file.as_os_str().is_empty() {
            return Err("server trace is enabled but no trace file is set".to_owned());
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IniDocument {
    server: BTreeMap<String, String>,
    trace: TraceSettings,
    endpoints: BTreeMap<String, String>,
    identity: UserIdentityTokenConfig,
}

fn parse_ini(path: &Path) -> Result<ServerSettings, SettingsError> {
    let document: IniDocument = config::Config::builder()
        .add_source(config::File::from(path).format(config::FileFormat::Ini))
        .build()
        .and_then(|built| built.try_deserialize())
        .map_err(|source| SettingsError::Ini {
            path: path.to_path_buf(),
            source,
        })?;
    let invalid = |details: String| SettingsError::Validation {
        path: path.to_path_buf(),
        details,
    };

    let mut server = ServerInstanceInfo::default();
    let mut names = Vec::new();
    for (key, value) in document.server {
        if key == "uri" {
            server.uri = value;
        } else if let Some(index) = numbered_key(&key, "name_") {
            names.push((index, LocalizedText::parse_pair(&value)));
        } else {
            return Err(invalid(format!("unknown key '{key}' in [server]")));
        }
    }
    names.sort_by_key(|(index, _)| *index);
    server.names = names.into_iter().map(|(_, name)| name).collect();

    let mut endpoints = EndpointSettings::default();
    let mut urls = Vec::new();
    for (key, value) in document.endpoints {
        if key == "rejected_certificate_dir" {
            endpoints.rejected_certificate_dir = PathBuf::from(value);
        } else if let Some(index) = numbered_key(&key, "url_") {
            urls.push((index, value));
        } else {
            return Err(invalid(format!("unknown key '{key}' in [endpoints]")));
        }
    }
    urls.sort_by_key(|(index, _)| *index);
    endpoints.urls = urls.into_iter().map(|(_, url)| url).collect();

    Ok(ServerSettings {
        server,
        trace: document.trace,
        endpoints,
        identity: document.identity,
    })
}

fn numbered_key(key: &str, prefix: &str) -> Option<u32> {
    key.strip_prefix(prefix)?.parse().ok()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct XmlDocument {
    server: XmlServer,
    trace: TraceSettings,
    endpoints: XmlEndpoints,
    identity: UserIdentityTokenConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct XmlServer {
    uri: Option<String>,
    #[serde(rename = "name")]
    names: Vec<XmlLocalizedText>,
}

#[derive(Debug, Default, Deserialize)]
struct XmlLocalizedText {
    #[serde(rename = "@locale", default)]
    locale: String,
    #[serde(rename = "$text", default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct XmlEndpoints {
    rejected_certificate_dir: Option<PathBuf>,
    #[serde(rename = "url")]
    urls: Vec<String>,
}

fn parse_xml(path: &Path) -> Result<ServerSettings, SettingsError> {
    let raw = fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let document: XmlDocument =
        quick_xml::de::from_str(&raw).map_err(|source| SettingsError::Xml {
            path: path.to_path_buf(),
            source,
        })?;

    let mut server = ServerInstanceInfo::default();
    if let Some(uri) = document.server.uri {
        server.uri = uri.trim().to_owned();
    }
    server.names = document
        .server
        .names
        .into_iter()
        .map(|name| LocalizedText::new(name.locale.trim(), name.text.trim()))
        .collect();

    let mut endpoints = EndpointSettings::default();
    if let Some(dir) = document.endpoints.rejected_certificate_dir {
        endpoints.rejected_certificate_dir = dir;
    }
    endpoints.urls = document
        .endpoints
        .urls
        .into_iter()
        .map(|url| url.trim().to_owned())
        .collect();

    Ok(ServerSettings {
        server,
        trace: document.trace,
        endpoints,
        identity: document.identity,
    })
}
