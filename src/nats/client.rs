use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info};

/// NATS configuration
#[derive(Clone, Deserialize)]
pub struct NatsConfig {
    #[serde(default = "default_url")]
    pub url: String,
    /// Subject carrying inbound tag changes
    #[serde(default = "default_tag_subject")]
    pub tag_subject: String,
    /// Client name reported to the server
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Broker user; must come with `password`
    #[serde(default = "default_user")]
    pub user: Option<String>,
    #[serde(default = "default_password")]
    pub password: Option<String>,
    /// NATS `.creds` file, used instead of user/password
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,
}

fn default_url() -> String {
    std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string())
}

fn default_tag_subject() -> String {
    "*.EdgeTagChange.>".to_string()
}

fn default_client_name() -> String {
    "edge-equipment".to_string()
}

fn default_user() -> Option<String> {
    std::env::var("NATS_USER").ok()
}

fn default_password() -> Option<String> {
    std::env::var("NATS_PASSWORD").ok()
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            tag_subject: default_tag_subject(),
            client_name: default_client_name(),
            user: default_user(),
            password: default_password(),
            credentials_file: None,
        }
    }
}

impl fmt::Debug for NatsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NatsConfig")
            .field("url", &self.url)
            .field("tag_subject", &self.tag_subject)
            .field("client_name", &self.client_name)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("credentials_file", &self.credentials_file)
            .finish()
    }
}

/// How the client authenticates to the broker
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NatsAuth {
    Anonymous,
    UserPassword { user: String, password: String },
    CredentialsFile(PathBuf),
}

impl NatsConfig {
    /// Resolves the configured credentials. A user without a password (or
    /// the reverse), or both a creds file and a user, is rejected.
    pub fn auth(&self) -> Result<NatsAuth> {
        match (&self.user, &self.password, &self.credentials_file) {
            (None, None, None) => Ok(NatsAuth::Anonymous),
            (None, None, Some(path)) => Ok(NatsAuth::CredentialsFile(path.clone())),
            (Some(user), Some(password), None) => Ok(NatsAuth::UserPassword {
                user: user.clone(),
                password: password.clone(),
            }),
            (Some(_), None, _) | (None, Some(_), _) => {
                bail!("NATS user and password must be configured together")
            }
            (Some(_), Some(_), Some(_)) => {
                bail!("NATS credentials file and user/password are mutually exclusive")
            }
        }
    }

    /// Whether the URL scheme asks for TLS. `nats` (or no scheme) is plain,
    /// `tls` is secure; anything else is unsupported.
    pub fn requires_tls(&self) -> Result<bool> {
        let scheme = match self.url.split_once("://") {
            Some((scheme, _)) => scheme.to_ascii_lowercase(),
            None => return Ok(false),
        };
        match scheme.as_str() {
            "nats" => Ok(false),
            "tls" => Ok(true),
            other => Err(anyhow!(
                "unsupported NATS URL scheme '{}' (supported: nats, tls)",
                other
            )),
        }
    }
}

/// Connection to the message broker
pub struct NatsClient {
    client: async_nats::Client,
    config: NatsConfig,
}

impl NatsClient {
    /// Connect to NATS. Connection failures are returned, never fatal.
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        info!(url = %config.url, "Connecting to NATS");

        let tls = config.requires_tls()?;
        debug!(url = %config.url, tls, "NATS URL scheme checked");

        let mut options = async_nats::ConnectOptions::new()
            .name(config.client_name.clone())
            .require_tls(tls);

        options = match config.auth()? {
            NatsAuth::Anonymous => options,
            NatsAuth::UserPassword { user, password } => {
                debug!(user = %user, "Using NATS user/password authentication");
                options.user_and_password(user, password)
            }
            NatsAuth::CredentialsFile(path) => {
                debug!(path = %path.display(), "Using NATS credentials file");
                options.credentials_file(&path).await.with_context(|| {
                    format!("Failed to read NATS credentials file {}", path.display())
                })?
            }
        };

        let client = options
            .connect(config.url.as_str())
            .await
            .with_context(|| format!("Failed to connect to NATS at {}", config.url))?;

        info!(url = %config.url, "Connected to NATS");
        Ok(Self { client, config })
    }

    /// Get underlying NATS client
    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    pub fn config(&self) -> &NatsConfig {
        &self.config
    }

    /// Flush pending publications before shutdown
    pub async fn close(&self) -> Result<()> {
        self.client
            .flush()
            .await
            .context("Failed to flush NATS connection")?;
        info!("NATS connection flushed");
        Ok(())
    }
}
