use config::{Config, ConfigError, Environment, File, Map};
use lettre::message::Mailbox;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    #[serde(default)]
    pub search: SearchConfig,
    pub database: DatabaseConfig,
    pub monitoring: MonitoringConfig,
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub url: String,
    /// Dot-separated path to the listing array inside the response,
    /// e.g. `pageProps.feed.private`. Unset means the body is the array.
    pub data_path: Option<String>,
    /// Used when a listing carries no `url`; `{id}` is replaced.
    pub url_template: Option<String>,
    pub request_timeout: u64,
    pub user_agents: Vec<String>,
    #[serde(default)]
    pub rotation: RotationMode,
    pub rotation_seed: Option<u64>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationMode {
    Sequential,
    #[default]
    Random,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchConfig {
    pub max_price: Option<i64>,
    pub min_rooms: Option<f64>,
    pub max_rooms: Option<f64>,
    #[serde(default)]
    pub area_codes: Vec<String>,
    #[serde(default)]
    pub extra_params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub min_interval_minutes: f64,
    pub max_interval_minutes: f64,
    pub interval_seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    pub enabled: bool,
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default = "default_removed_alert_threshold")]
    pub removed_alert_threshold: usize,
    #[serde(default = "default_currency_symbol")]
    pub currency_symbol: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: Option<String>,
    pub from_name: String,
    pub use_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub directory: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}

/// Upper bound for either polling interval bound, one week.
pub const MAX_INTERVAL_MINUTES: f64 = 7.0 * 24.0 * 60.0;

fn default_removed_alert_threshold() -> usize {
    1
}

fn default_currency_symbol() -> String {
    "₪".to_string()
}

impl SearchConfig {
    /// Query string pairs sent with every fetch, in a stable order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(max_price) = self.max_price {
            pairs.push(("maxPrice".to_string(), max_price.to_string()));
        }
        if let Some(min_rooms) = self.min_rooms {
            pairs.push(("minRooms".to_string(), min_rooms.to_string()));
        }
        if let Some(max_rooms) = self.max_rooms {
            pairs.push(("maxRooms".to_string(), max_rooms.to_string()));
        }
        if !self.area_codes.is_empty() {
            pairs.push(("area".to_string(), self.area_codes.join(",")));
        }
        for (key, value) in &self.extra_params {
            pairs.push((key.clone(), value.clone()));
        }
        pairs
    }
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load(path, None)
    }

    /// Build the configuration; `vars` replaces the process environment
    /// when given.
    pub fn load(path: impl AsRef<Path>, vars: Option<Map<String, String>>) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from(path.as_ref()))
            // Add local config (ignored by git)
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables like WATCHER_MONITORING__MIN_INTERVAL_MINUTES
            .add_source(
                Environment::with_prefix("WATCHER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(vars.clone()),
            )
            .build()?;

        let mut config: AppConfig = s.try_deserialize()?;
        match &vars {
            Some(vars) => config.apply_env_fallbacks(|key| vars.get(key).cloned()),
            None => config.apply_env_fallbacks(|key| env::var(key).ok()),
        }
        config.validate()?;
        Ok(config)
    }

    /// Fill SMTP credentials and recipients from the plain environment
    /// names used by older deployments when the config leaves them unset.
    pub fn apply_env_fallbacks<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let smtp = &mut self.notifications.smtp;
        if smtp.username.is_none() {
            smtp.username = lookup("SMTP_USERNAME");
        }
        if smtp.password.is_none() {
            smtp.password = lookup("SMTP_PASSWORD");
        }
        if smtp.from_address.is_none() {
            smtp.from_address = smtp.username.clone();
        }

        if self.notifications.recipients.is_empty() {
            if let Some(list) = lookup("RECIPIENT_EMAILS") {
                self.notifications.recipients = list
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate API configuration
        match Url::parse(&self.api.url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            _ => return Err(ConfigError::Message("Invalid API URL format".into())),
        }

        if self.api.request_timeout == 0 {
            return Err(ConfigError::Message("API request_timeout must be greater than 0".into()));
        }

        if self.api.user_agents.iter().all(|ua| ua.trim().is_empty()) {
            return Err(ConfigError::Message("API user_agents must contain at least one entry".into()));
        }

        if let Some(template) = &self.api.url_template {
            if !template.contains("{id}") {
                return Err(ConfigError::Message("API url_template must contain {id}".into()));
            }
        }

        // Validate search configuration
        if let (Some(min), Some(max)) = (self.search.min_rooms, self.search.max_rooms) {
            if min > max {
                return Err(ConfigError::Message("Search min_rooms cannot exceed max_rooms".into()));
            }
        }

        if matches!(self.search.max_price, Some(price) if price <= 0) {
            return Err(ConfigError::Message("Search max_price must be greater than 0".into()));
        }

        // Validate database configuration
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Message("Database url must be set".into()));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Message("Database max_connections must be greater than 0".into()));
        }

        // Validate monitoring configuration
        let monitoring = &self.monitoring;
        for (name, value) in [
            ("min_interval_minutes", monitoring.min_interval_minutes),
            ("max_interval_minutes", monitoring.max_interval_minutes),
        ] {
            if !value.is_finite() || value > MAX_INTERVAL_MINUTES {
                return Err(ConfigError::Message(format!(
                    "Monitoring {} must be a finite number of minutes up to {}",
                    name, MAX_INTERVAL_MINUTES
                )));
            }
        }

        if !(monitoring.min_interval_minutes > 0.0) {
            return Err(ConfigError::Message("Monitoring min_interval_minutes must be greater than 0".into()));
        }

        if monitoring.min_interval_minutes > monitoring.max_interval_minutes {
            return Err(ConfigError::Message(
                "Monitoring min_interval_minutes cannot exceed max_interval_minutes".into(),
            ));
        }

        // Validate SMTP configuration
        let notifications = &self.notifications;
        if notifications.smtp.port == 0 {
            return Err(ConfigError::Message("SMTP port must be greater than 0".into()));
        }

        if notifications.enabled {
            if notifications.smtp.host.trim().is_empty() {
                return Err(ConfigError::Message("SMTP host must be set when notifications are enabled".into()));
            }

            match &notifications.smtp.from_address {
                Some(address) if address.parse::<Mailbox>().is_ok() => {}
                Some(address) => {
                    return Err(ConfigError::Message(format!("Invalid sender address: {}", address)));
                }
                None => {
                    return Err(ConfigError::Message(
                        "SMTP from_address must be set when notifications are enabled".into(),
                    ));
                }
            }

            if notifications.recipients.is_empty() {
                return Err(ConfigError::Message(
                    "At least one recipient is required when notifications are enabled".into(),
                ));
            }

            for recipient in &notifications.recipients {
                if recipient.parse::<Mailbox>().is_err() {
                    return Err(ConfigError::Message(format!("Invalid recipient address: {}", recipient)));
                }
            }
        }

        if notifications.removed_alert_threshold == 0 {
            return Err(ConfigError::Message("removed_alert_threshold must be at least 1".into()));
        }

        Ok(())
    }
}
