//! Definitions of the configuration file and the items in it

use bouncer_core::directory::UserSettings;
use bouncer_core::settings::BouncerSettings;
use client_listener::{ConnectionType, TlsSettings};

use serde::Deserialize;
use thiserror::Error;
use tracing_core::LevelFilter;

use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, Read},
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

/// Errors that could happen when loading or processing a config
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error on {1}: {0}")]
    IoError(std::io::Error, PathBuf),
    #[error("JSON parse error in {1}: {0}")]
    JsonError(json5::Error, PathBuf),
    #[error("{1}: {0}")]
    FormatError(String, PathBuf),
    #[error("A TLS listener is configured, but no TLS certificate")]
    MissingTls,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuiltinLogTarget {
    Stdout,
    Stderr,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum LogTarget {
    File { filename: PathBuf },
    Builtin(BuiltinLogTarget),
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Off,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LogEntry {
    pub target: LogTarget,
    #[serde(default)]
    pub modules: Vec<String>,
    pub level: Option<LogLevel>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoggingConfig {
    pub dir: PathBuf,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    pub pidfile: Option<PathBuf>,
    pub default_level: Option<LogLevel>,
    #[serde(default)]
    pub module_levels: HashMap<String, LogLevel>,
    #[serde(default)]
    pub targets: Vec<LogEntry>,
}

impl LoggingConfig {
    pub fn prefix_file(&self, filename: impl AsRef<Path>) -> PathBuf {
        let mut path = self.dir.clone();
        path.push(filename);
        path
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(arg: LogLevel) -> LevelFilter {
        match arg {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Off => LevelFilter::OFF,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ListenerConfig {
    pub address: SocketAddr,
    #[serde(default)]
    pub tls: bool,
}

impl ListenerConfig {
    pub fn connection_type(&self) -> ConnectionType {
        if self.tls {
            ConnectionType::Tls
        } else {
            ConnectionType::Clear
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TlsConfig {
    pub key_file: PathBuf,
    pub cert_file: PathBuf,
}

impl TlsConfig {
    /// Load the certificate chain and private key from the referenced files
    pub fn load_from_disk(&self) -> Result<TlsSettings, ConfigError> {
        let cert_file = File::open(&self.cert_file)
            .map_err(|e| ConfigError::IoError(e, self.cert_file.clone()))?;
        let mut cert_reader = BufReader::new(cert_file);
        let cert_chain = rustls_pemfile::certs(&mut cert_reader)
            .map_err(|e| ConfigError::IoError(e, self.cert_file.clone()))?;

        if cert_chain.is_empty() {
            return Err(ConfigError::FormatError(
                "No certificate in file".to_string(),
                self.cert_file.clone(),
            ));
        }

        let key_file = File::open(&self.key_file)
            .map_err(|e| ConfigError::IoError(e, self.key_file.clone()))?;
        let mut key_reader = BufReader::new(key_file);
        let key = rustls_pemfile::read_all(&mut key_reader)
            .map_err(|e| ConfigError::IoError(e, self.key_file.clone()))?
            .into_iter()
            .find_map(|item| match item {
                rustls_pemfile::Item::RSAKey(key) | rustls_pemfile::Item::PKCS8Key(key) => Some(key),
                _ => None,
            })
            .ok_or_else(|| {
                ConfigError::FormatError("No private key in file".to_string(), self.key_file.clone())
            })?;

        Ok(TlsSettings { cert_chain, key })
    }
}

fn default_sendq_kib() -> usize {
    10
}

fn default_dns_timeout() -> u64 {
    3
}

fn default_true() -> bool {
    true
}

/// Configuration for the whole bouncer process
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BouncerConfig {
    pub server_name: String,
    pub listeners: Vec<ListenerConfig>,
    pub tls: Option<TlsConfig>,
    #[serde(default = "default_sendq_kib")]
    pub sendq_kib: usize,
    #[serde(default = "default_dns_timeout")]
    pub dns_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub quit_away: bool,
    pub motd: Option<String>,
    #[serde(default)]
    pub users: Vec<UserSettings>,
    pub log: LoggingConfig,
}

impl BouncerConfig {
    /// Load configuration from a file
    pub fn load_file(filename: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = filename.as_ref();
        let mut file = File::open(path).map_err(|e| ConfigError::IoError(e, path.to_owned()))?;
        let mut config = String::new();
        file.read_to_string(&mut config)
            .map_err(|e| ConfigError::IoError(e, path.to_owned()))?;

        Self::parse(&config).map_err(|e| ConfigError::JsonError(e, path.to_owned()))
    }

    pub fn parse(text: &str) -> Result<Self, json5::Error> {
        json5::from_str(text)
    }

    /// Load TLS certificates, if any listener needs them
    pub fn load_tls(&self) -> Result<Option<TlsSettings>, ConfigError> {
        match &self.tls {
            Some(tls) => Ok(Some(tls.load_from_disk()?)),
            None if self.listeners.iter().any(|l| l.tls) => Err(ConfigError::MissingTls),
            None => Ok(None),
        }
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_secs(self.dns_timeout_secs)
    }

    /// The process-wide settings handed to client sessions
    pub fn settings(&self) -> BouncerSettings {
        let settings = BouncerSettings::new(&self.server_name, self.sendq_kib * 1024, self.quit_away);
        if let Some(motd) = &self.motd {
            settings.set_motd(motd);
        }
        settings
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"{
        // comments are allowed
        server-name: "bnc.example",
        listeners: [
            { address: "127.0.0.1:6667" },
            { address: "127.0.0.1:6697", tls: true },
        ],
        tls: { key-file: "key.pem", cert-file: "cert.pem" },
        sendq-kib: 16,
        motd: "hello\nthere",
        users: [
            {
                name: "alice",
                password: "$1$salt$hash",
                upstream: "irc.example:6667",
                host-allows: ["*.example"],
            },
        ],
        log: {
            dir: "log",
            default-level: "info",
            targets: [
                { target: "stdout", level: "debug" },
                { target: { filename: "bouncer.log" }, modules: ["bouncer_core"] },
            ],
        },
    }"#;

    #[test]
    fn parse_sample() {
        let config = BouncerConfig::parse(SAMPLE).unwrap();

        assert_eq!(config.server_name, "bnc.example");
        assert_eq!(config.listeners.len(), 2);
        assert_eq!(config.listeners[1].connection_type(), ConnectionType::Tls);
        assert_eq!(config.dns_timeout(), Duration::from_secs(3));
        assert!(config.quit_away);

        assert_eq!(config.users.len(), 1);
        let alice = &config.users[0];
        assert_eq!(alice.upstream.as_deref(), Some("irc.example:6667"));
        assert_eq!(alice.host_allows, vec!["*.example"]);
        assert!(!alice.admin);

        assert!(matches!(config.log.targets[0].target, LogTarget::Builtin(BuiltinLogTarget::Stdout)));
        assert!(matches!(&config.log.targets[1].target, LogTarget::File { filename } if filename == Path::new("bouncer.log")));
        assert_eq!(config.log.prefix_file("bouncer.pid"), PathBuf::from("log/bouncer.pid"));

        let settings = config.settings();
        assert_eq!(settings.sendq_limit, 16 * 1024);
        assert_eq!(settings.motd().as_deref(), Some("hello\nthere"));
    }

    #[test]
    fn tls_listener_needs_certificate() {
        let mut config = BouncerConfig::parse(SAMPLE).unwrap();
        config.tls = None;
        assert!(matches!(config.load_tls(), Err(ConfigError::MissingTls)));

        config.listeners.retain(|l| !l.tls);
        assert!(matches!(config.load_tls(), Ok(None)));
    }

    #[test]
    fn missing_file() {
        let err = BouncerConfig::load_file("/nonexistent/bouncer.conf").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_, path) if path == Path::new("/nonexistent/bouncer.conf")));
    }
}
