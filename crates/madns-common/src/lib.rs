mod util;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::Deserialize;
pub use util::{parent_domains, to_fqdn};

/// Pattern of the fallback policy
pub const DEFAULT_PATTERN: &str = ".";
pub const DEFAULT_PORT: u16 = 53;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read the config file '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config")]
    Parse(#[from] serde_json::Error),
    #[error("handler patterns '{first}' and '{second}' both normalise to '{pattern}'")]
    DuplicatePattern {
        first: String,
        second: String,
        pattern: String,
    },
}

/// Transport a query arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Tcp,
    Udp,
}

impl Transport {
    pub fn as_str(self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RebindConfig {
    #[serde(rename = "Addrs", alias = "addrs", default)]
    pub addrs: Vec<String>,
}

/// Per-domain handler entry.
///
/// Several actions may be configured at once; only one of them is acted upon
/// per query, by priority: `redirect`, `respond`, `rebind`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Policy {
    #[serde(rename = "Redirect", alias = "redirect", default)]
    pub redirect: Option<String>,
    #[serde(rename = "Respond", alias = "respond", default)]
    pub respond: Option<String>,
    #[serde(rename = "Rebind", alias = "rebind", default)]
    pub rebind: Option<RebindConfig>,
    #[serde(rename = "NotifyEmail", alias = "notifyEmail", default)]
    pub notify_email: Option<String>,
    #[serde(rename = "NotifySlack", alias = "notifySlack", default)]
    pub notify_slack: Option<String>,
}

impl Policy {
    pub fn redirect(&self) -> Option<&str> {
        non_empty(&self.redirect)
    }

    pub fn respond(&self) -> Option<&str> {
        non_empty(&self.respond)
    }

    /// Rebind addresses, if the list is configured and non-empty
    pub fn rebind_addrs(&self) -> Option<&[String]> {
        self.rebind
            .as_ref()
            .map(|rebind| rebind.addrs.as_slice())
            .filter(|addrs| !addrs.is_empty())
    }

    pub fn notify_email(&self) -> Option<&str> {
        non_empty(&self.notify_email)
    }

    pub fn notify_slack(&self) -> Option<&str> {
        non_empty(&self.notify_slack)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.is_empty())
}

#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SmtpSettings {
    #[serde(rename = "SMTPUser", alias = "smtpUser", default)]
    pub user: String,
    #[serde(rename = "SMTPPassword", alias = "smtpPassword", default)]
    pub password: String,
    /// `host:port`, e.g. `smtp.gmail.com:587`
    #[serde(rename = "SMTPServer", alias = "smtpServer", default)]
    pub server: String,
    /// Seconds to aggregate email notifications before sending them
    #[serde(rename = "SMTPDelay", alias = "smtpDelay", default)]
    pub delay_secs: u64,
}

impl fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("server", &self.server)
            .field("delay_secs", &self.delay_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MadnsConfig {
    #[serde(flatten)]
    pub smtp: SmtpSettings,
    #[serde(rename = "Port", alias = "port", default = "default_port")]
    pub port: u16,
    #[serde(rename = "Handlers", alias = "handlers")]
    pub handlers: HashMap<String, Policy>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl MadnsConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_slice(&raw)
    }

    pub fn from_slice(raw: &[u8]) -> Result<Self, ConfigError> {
        Ok(serde_json::from_slice(raw)?)
    }
}

/// Read-only map from a normalised domain pattern to its policy.
#[derive(Debug, Clone, Default)]
pub struct PolicyModel {
    policies: HashMap<String, Policy>,
}

impl PolicyModel {
    /// Builds the model, normalising every pattern to a lowercase FQDN.
    pub fn new(handlers: impl IntoIterator<Item = (String, Policy)>) -> Result<Self, ConfigError> {
        let mut policies = HashMap::new();
        let mut originals: HashMap<String, String> = HashMap::new();

        for (pattern, policy) in handlers {
            let key = to_fqdn(&pattern);
            if let Some(first) = originals.get(&key) {
                return Err(ConfigError::DuplicatePattern {
                    first: first.clone(),
                    second: pattern,
                    pattern: key,
                });
            }
            originals.insert(key.clone(), pattern);
            policies.insert(key, policy);
        }

        Ok(PolicyModel { policies })
    }

    pub fn get(&self, pattern: &str) -> Option<&Policy> {
        self.policies.get(pattern)
    }

    /// Looks up a pattern and returns the key it is stored under
    pub fn get_key_value(&self, pattern: &str) -> Option<(&str, &Policy)> {
        self.policies
            .get_key_value(pattern)
            .map(|(key, policy)| (key.as_str(), policy))
    }

    pub fn default_policy(&self) -> Option<&Policy> {
        self.policies.get(DEFAULT_PATTERN)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl TryFrom<&MadnsConfig> for PolicyModel {
    type Error = ConfigError;

    fn try_from(config: &MadnsConfig) -> Result<Self, Self::Error> {
        PolicyModel::new(config.handlers.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CONFIG: &str = r#"{
        "SMTPUser": "madns@example.org",
        "SMTPPassword": "hunter2",
        "SMTPServer": "smtp.example.org:587",
        "SMTPDelay": 30,
        "Port": 5353,
        "Handlers": {
            "Example.COM": { "Redirect": "8.8.8.8:53", "NotifyEmail": "ops@example.org" },
            "static.test": { "Respond": "10.1.2.3", "NotifySlack": "https://hooks.slack.test/x" },
            "rebind.test": { "Rebind": { "Addrs": ["10.0.0.1", "10.0.0.2"] } },
            ".": { "Redirect": "1.1.1.1:53" }
        }
    }"#;

    #[test]
    fn config_parsing() {
        let config = MadnsConfig::from_slice(SAMPLE_CONFIG.as_bytes()).expect("shouldn't have failed");

        assert_eq!(config.port, 5353);
        assert_eq!(config.smtp.delay_secs, 30);
        assert_eq!(config.smtp.server, "smtp.example.org:587");
        assert_eq!(config.handlers.len(), 4);

        let rebind = config.handlers["rebind.test"].rebind_addrs().expect("rebind list");
        assert_eq!(rebind, ["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn config_defaults() {
        let config = MadnsConfig::from_slice(br#"{ "Handlers": {} }"#).expect("shouldn't have failed");

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.smtp, SmtpSettings::default());
        assert!(config.handlers.is_empty());
    }

    #[test]
    fn camel_case_keys_are_accepted() {
        let config = MadnsConfig::from_slice(
            br#"{
                "port": 5353,
                "smtpUser": "madns",
                "smtpPassword": "hunter2",
                "smtpServer": "smtp.example:587",
                "smtpDelay": 30,
                "handlers": { "example.com": { "respond": "192.0.2.1" } }
            }"#,
        )
        .expect("shouldn't have failed");

        assert_eq!(config.port, 5353);
        assert_eq!(config.smtp.user, "madns");
        assert_eq!(config.smtp.password, "hunter2");
        assert_eq!(config.smtp.server, "smtp.example:587");
        assert_eq!(config.smtp.delay_secs, 30);
        assert_eq!(config.handlers["example.com"].respond(), Some("192.0.2.1"));
    }

    #[test]
    fn config_without_handlers_is_rejected() {
        let result = MadnsConfig::from_slice(br#"{ "Port": 53 }"#);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn smtp_password_is_redacted() {
        let config = MadnsConfig::from_slice(SAMPLE_CONFIG.as_bytes()).expect("shouldn't have failed");

        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn policy_model_normalises_patterns() {
        let config = MadnsConfig::from_slice(SAMPLE_CONFIG.as_bytes()).expect("shouldn't have failed");
        let model = PolicyModel::try_from(&config).expect("shouldn't have failed");

        assert_eq!(model.len(), 4);
        assert!(model.get("example.com.").is_some());
        assert!(model.get("Example.COM").is_none());
        assert_eq!(
            model.default_policy().and_then(Policy::redirect),
            Some("1.1.1.1:53")
        );
    }

    #[test]
    fn policy_model_rejects_duplicate_patterns() {
        let result = PolicyModel::new([
            ("example.com".to_string(), Policy::default()),
            ("EXAMPLE.com.".to_string(), Policy::default()),
        ]);

        assert!(matches!(
            result,
            Err(ConfigError::DuplicatePattern { ref pattern, .. }) if pattern == "example.com."
        ));
    }

    #[test]
    fn empty_actions_are_ignored() {
        let policy = Policy {
            redirect: Some(String::new()),
            respond: Some(String::new()),
            rebind: Some(RebindConfig { addrs: vec![] }),
            notify_email: Some(String::new()),
            notify_slack: None,
        };

        assert!(policy.redirect().is_none());
        assert!(policy.respond().is_none());
        assert!(policy.rebind_addrs().is_none());
        assert!(policy.notify_email().is_none());
        assert!(policy.notify_slack().is_none());
    }
}
