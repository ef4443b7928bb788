pub mod store;

pub use store::{ConfigStore, LiveConfig, StoreError};

use serde::{Serialize, Deserialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::anyhow;

/// Path of the credential refresh endpoint, shared by the router and the
/// refresh link embedded in fallback emails.
pub const REFRESH_PATH: &str = "/config-refresh";

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    server: Option<Server>,
    smtp: Option<SMTP>,
    mail: Option<Mail>,
    cron: Option<String>,
    zhfd: Option<Zhfd>,
    templates: Option<Templates>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        ConfigBuilder::default()
    }

    /// Reads a TOML config file, or JSON when the file has a `.json` extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();

        let config_content = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path.display(), e))?;

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            Self::from_json(&config_content)
        } else {
            Self::from_toml(&config_content)
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, anyhow::Error> {
        let config: Config = toml::from_str(content)
            .map_err(|e| anyhow!("Failed to parse config file: {}", e))?;
        Ok(Self::from_config(config))
    }

    pub fn from_json(content: &str) -> Result<Self, anyhow::Error> {
        let config: Config = serde_json::from_str(content)
            .map_err(|e| anyhow!("Failed to parse config file: {}", e))?;
        Ok(Self::from_config(config))
    }

    fn from_config(config: Config) -> Self {
        Self {
            server: Some(config.server),
            smtp: Some(config.smtp),
            mail: Some(config.mail),
            cron: Some(config.cron),
            zhfd: Some(config.zhfd),
            templates: Some(config.templates),
        }
    }

    pub fn with_server(mut self, server: Server) -> Self {
        self.server = Some(server);
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        let server = self.server.get_or_insert(Server::default());
        server.port = port;
        self
    }

    pub fn build(self) -> Result<Config, anyhow::Error> {
        let smtp = self.smtp.ok_or_else(|| anyhow!("SMTP configuration is required"))?;
        let mail = self.mail.ok_or_else(|| anyhow!("Mail configuration is required"))?;
        let zhfd = self.zhfd.ok_or_else(|| anyhow!("Zhfd configuration is required"))?;
        let server = self.server.unwrap_or_default();

        let cron = self.cron.unwrap_or_default();
        if cron.trim().is_empty() {
            return Err(anyhow!("A cron expression is required"));
        }

        if mail.from.trim().is_empty() {
            return Err(anyhow!("mail.from must not be empty"));
        }

        if mail.to.iter().all(|to| to.trim().is_empty()) {
            return Err(anyhow!("mail.to needs at least one recipient"));
        }

        if zhfd.request_url.trim().is_empty() {
            return Err(anyhow!("zhfd.request_url must not be empty"));
        }

        if server.public_host.trim().is_empty() {
            return Err(anyhow!("server.public_host is required to build the refresh link"));
        }

        Ok(Config {
            server,
            smtp,
            mail,
            cron,
            zhfd,
            templates: self.templates.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    pub smtp: SMTP,
    pub mail: Mail,
    pub cron: String,
    pub zhfd: Zhfd,
    #[serde(default)]
    pub templates: Templates,
}

impl Config {
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() { "" } else { "******" }
}

// Used for the startup log line, so secrets stay out of the log files.
impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "server: {} (public host {})", self.http_addr(), self.server.public_host)?;
        writeln!(
            f,
            "smtp: {}@{}:{} tls={:?} credential={}",
            self.smtp.username,
            self.smtp.host,
            self.smtp.port,
            self.smtp.tls,
            redact(&self.smtp.credential),
        )?;
        writeln!(f, "mail: {} -> {} \"{}\"", self.mail.from, self.mail.to.join(", "), self.mail.subject)?;
        writeln!(f, "cron: {}", self.cron)?;
        writeln!(
            f,
            "zhfd: {} referer={} host={} authorization={}",
            self.zhfd.request_url,
            self.zhfd.referer,
            self.zhfd.host,
            redact(&self.zhfd.authorization),
        )?;
        write!(
            f,
            "templates: normal={} fallback={}",
            self.templates.normal.display(),
            self.templates.fallback.display(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub host: String,
    pub port: u16,
    /// Address users reach this process on; only used to build the refresh link.
    pub public_host: String,
}

impl Default for Server {
    fn default() -> Self {
        Server {
            host: "0.0.0.0".to_string(),
            port: 54321,
            public_host: "".to_string(),
        }
    }
}

#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    None,
    Starttls,
    #[default]
    Tls,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SMTP {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: String,
    #[serde(default)]
    pub tls: TlsMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    #[serde(default)]
    pub send_on_startup: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zhfd {
    #[serde(alias = "request_url")]
    pub request_url: String,
    #[serde(default)]
    pub referer: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub authorization: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Templates {
    pub normal: PathBuf,
    pub fallback: PathBuf,
}

impl Default for Templates {
    fn default() -> Self {
        Templates {
            normal: PathBuf::from("templates/normal.html"),
            fallback: PathBuf::from("templates/fallback.html"),
        }
    }
}
