//! Application configuration.
//!
//! Configuration is loaded from a TOML file (default `config/config.toml`).
//! `${VAR}` references in the file are replaced with environment values and
//! a few well-known environment variables override file values:
//!
//! - `DATABASE_URL` overrides `database.url`
//! - `ORACLE_URL` overrides `oracle.url`
//! - `NOTIFY_WEBHOOK_URL` overrides `notify.webhook_url`
//! - `NOTIFY_WEBHOOK_SECRET` overrides `notify.webhook_secret`
//!
//! # Example
//!
//! ```toml
//! [routing]
//! default_room = "inbox"
//! aliases = { inbox = "!abc:example.org", sales = "!def:example.org" }
//! rooms_addr_to = { "^sales@" = "sales" }
//! overview = { "!ovw:example.org" = [] }
//!
//! [threading]
//! head_blacklist = ["^noreply@", "^mailer-daemon@"]
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::path::Path;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::defaults;
use crate::error::{Error, Result};

/// Database connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: defaults::DATABASE_URL.to_string(),
            max_connections: defaults::DB_MAX_CONNECTIONS,
        }
    }
}

/// Extraction oracle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Base URL of the HTTP oracle.
    pub url: String,
    /// Skip the HTTP oracle and keep every mail body as a single message.
    pub passthrough: bool,
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            url: defaults::ORACLE_URL.to_string(),
            passthrough: false,
            timeout_secs: defaults::ORACLE_TIMEOUT_SECS,
        }
    }
}

impl OracleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.passthrough {
            return Ok(());
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(Error::Config(format!(
                "oracle.url must start with http:// or https://, got: {}",
                self.url
            )));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config("oracle.timeout_secs must be positive".into()));
        }
        Ok(())
    }
}

/// Chat notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Endpoint receiving notification events. Notifications are only logged
    /// when unset.
    pub webhook_url: Option<String>,
    /// Key for the `X-Inbox-Signature` HMAC-SHA256 header.
    pub webhook_secret: Option<String>,
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_secret: None,
            timeout_secs: defaults::NOTIFY_TIMEOUT_SECS,
        }
    }
}

impl NotifyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Room routing for new threads and overview rooms.
///
/// Rooms may be given as room ids or as keys of `aliases`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub default_room: String,
    /// alias -> room id
    pub aliases: BTreeMap<String, String>,
    /// sender address pattern -> room
    pub rooms_addr_from: BTreeMap<String, String>,
    /// recipient address pattern -> room
    pub rooms_addr_to: BTreeMap<String, String>,
    /// source mailbox pattern -> room
    pub rooms_mailbox: BTreeMap<String, String>,
    /// overview room -> rooms it lists (empty: every room)
    pub overview: BTreeMap<String, Vec<String>>,

    #[serde(skip)]
    compiled: CompiledRouting,
}

#[derive(Debug, Clone, Default)]
struct CompiledRouting {
    addr_to: Vec<(Regex, String)>,
    mailbox: Vec<(Regex, String)>,
    addr_from: Vec<(Regex, String)>,
}

impl RoutingConfig {
    /// Room id for a room id or alias.
    pub fn resolve(&self, room: &str) -> String {
        self.aliases
            .get(room)
            .cloned()
            .unwrap_or_else(|| room.to_string())
    }

    /// Alias of a room id, or the id itself.
    pub fn alias_of(&self, room_id: &str) -> String {
        self.aliases
            .iter()
            .find(|(_, id)| id.as_str() == room_id)
            .map(|(alias, _)| alias.clone())
            .unwrap_or_else(|| room_id.to_string())
    }

    pub fn default_room(&self) -> String {
        self.resolve(&self.default_room)
    }

    /// Room for a new thread: first recipient match, then mailbox, then
    /// sender, then the default room.
    pub fn route(&self, fetcher: Option<&str>, addr_from: &str, addr_to: &[String]) -> String {
        let find = |rules: &[(Regex, String)], value: &str| {
            rules
                .iter()
                .find(|(re, _)| re.is_match(value))
                .map(|(_, room)| room.clone())
        };
        for addr in addr_to {
            if let Some(room) = find(&self.compiled.addr_to, addr) {
                return room;
            }
        }
        if let Some(room) = fetcher.and_then(|f| find(&self.compiled.mailbox, f)) {
            return room;
        }
        if let Some(room) = find(&self.compiled.addr_from, addr_from) {
            return room;
        }
        debug!(addr_from, ?addr_to, ?fetcher, "Using default room");
        self.default_room()
    }

    /// Rooms threads can be published into.
    pub fn target_rooms(&self) -> Vec<String> {
        let mut rooms = BTreeSet::new();
        rooms.insert(self.default_room());
        for room in self
            .rooms_addr_from
            .values()
            .chain(self.rooms_addr_to.values())
            .chain(self.rooms_mailbox.values())
            .chain(self.overview.values().flatten())
        {
            rooms.insert(self.resolve(room));
        }
        rooms.into_iter().collect()
    }

    /// Overview room ids.
    pub fn overview_rooms(&self) -> Vec<String> {
        let rooms: BTreeSet<String> = self.overview.keys().map(|r| self.resolve(r)).collect();
        rooms.into_iter().collect()
    }

    /// Every configured room: target rooms, overview rooms and aliased rooms.
    pub fn all_rooms(&self) -> Vec<String> {
        let mut rooms: BTreeSet<String> = self.target_rooms().into_iter().collect();
        rooms.extend(self.overview_rooms());
        rooms.extend(self.aliases.values().cloned());
        rooms.into_iter().collect()
    }

    /// Rooms listed by an overview room.
    pub fn overview_targets(&self, overview_room: &str) -> Vec<String> {
        let targets = self
            .overview
            .iter()
            .find(|(room, _)| self.resolve(room) == overview_room)
            .map(|(_, targets)| targets);
        match targets {
            Some(targets) if !targets.is_empty() => {
                let set: BTreeSet<String> = targets.iter().map(|t| self.resolve(t)).collect();
                set.into_iter().collect()
            }
            _ => self.target_rooms(),
        }
    }

    /// Overview rooms listing `room_id`, including those listing every room.
    pub fn overview_rooms_for(&self, room_id: &str) -> Vec<String> {
        let rooms: BTreeSet<String> = self
            .overview
            .iter()
            .filter(|(_, targets)| {
                targets.is_empty() || targets.iter().any(|t| self.resolve(t) == room_id)
            })
            .map(|(room, _)| self.resolve(room))
            .collect();
        rooms.into_iter().collect()
    }

    fn compile(&mut self) -> Result<()> {
        if self.default_room.trim().is_empty() {
            return Err(Error::Config("routing.default_room must be set".into()));
        }
        let compile_rules = |rules: &BTreeMap<String, String>| -> Result<Vec<(Regex, String)>> {
            rules
                .iter()
                .map(|(pattern, room)| {
                    Regex::new(pattern)
                        .map(|re| (re, self.resolve(room)))
                        .map_err(|e| {
                            Error::Config(format!("room pattern \"{}\" invalid: {}", pattern, e))
                        })
                })
                .collect()
        };
        self.compiled = CompiledRouting {
            addr_to: compile_rules(&self.rooms_addr_to)?,
            mailbox: compile_rules(&self.rooms_mailbox)?,
            addr_from: compile_rules(&self.rooms_addr_from)?,
        };
        Ok(())
    }
}

/// Thread sorting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadingConfig {
    /// Sender address patterns that never start a thread.
    pub head_blacklist: Vec<String>,
    pub quiet_window_secs: u64,
    pub sort_timeout_secs: u64,

    #[serde(skip)]
    blacklist: Vec<Regex>,
}

impl Default for ThreadingConfig {
    fn default() -> Self {
        Self {
            head_blacklist: Vec::new(),
            quiet_window_secs: defaults::SORT_QUIET_WINDOW_SECS,
            sort_timeout_secs: defaults::SORT_TIMEOUT_SECS,
            blacklist: Vec::new(),
        }
    }
}

impl ThreadingConfig {
    pub fn quiet_window(&self) -> Duration {
        Duration::from_secs(self.quiet_window_secs)
    }

    pub fn sort_timeout(&self) -> Duration {
        Duration::from_secs(self.sort_timeout_secs)
    }

    /// Whether a sender address may not start a thread.
    pub fn is_blacklisted(&self, addr_from: &str) -> bool {
        self.blacklist.iter().any(|re| re.is_match(addr_from))
    }

    fn compile(&mut self) -> Result<()> {
        self.blacklist = self
            .head_blacklist
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    Error::Config(format!("head blacklist \"{}\" invalid: {}", pattern, e))
                })
            })
            .collect::<Result<_>>()?;
        Ok(())
    }
}

/// Message extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Delay before retrying after a failed batch.
    pub retry_delay_secs: u64,
    /// Interval for picking up mail stored by external fetchers; 0 disables.
    pub poll_interval_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            retry_delay_secs: defaults::EXTRACTION_RETRY_DELAY_SECS,
            poll_interval_secs: defaults::EXTRACTION_POLL_INTERVAL_SECS,
        }
    }
}

impl ExtractionConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_secs > 0).then(|| Duration::from_secs(self.poll_interval_secs))
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub oracle: OracleConfig,
    pub notify: NotifyConfig,
    pub routing: RoutingConfig,
    pub threading: ThreadingConfig,
    pub extraction: ExtractionConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file, applying environment overrides.
    pub fn from_file(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "Loading configuration");
        let content = std::fs::read_to_string(path)?;
        let content = Self::substitute_env_vars(&content)?;
        let mut config: Self = toml::from_str(&content)?;
        config.apply_overrides(|name| env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text without consulting the environment.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("DATABASE_URL").filter(|v| !v.is_empty()) {
            debug!("DATABASE_URL overrides database.url");
            self.database.url = url;
        }
        if let Some(url) = lookup("ORACLE_URL").filter(|v| !v.is_empty()) {
            debug!("ORACLE_URL overrides oracle.url");
            self.oracle.url = url;
        }
        if let Some(url) = lookup("NOTIFY_WEBHOOK_URL").filter(|v| !v.is_empty()) {
            debug!("NOTIFY_WEBHOOK_URL overrides notify.webhook_url");
            self.notify.webhook_url = Some(url);
        }
        if let Some(secret) = lookup("NOTIFY_WEBHOOK_SECRET").filter(|v| !v.is_empty()) {
            self.notify.webhook_secret = Some(secret);
        }
    }

    /// Validate settings and compile all patterns.
    pub fn validate(&mut self) -> Result<()> {
        self.oracle.validate()?;
        self.routing.compile()?;
        self.threading.compile()?;
        if self.database.max_connections == 0 {
            return Err(Error::Config(
                "database.max_connections must be positive".into(),
            ));
        }
        Ok(())
    }

    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")?;
        Ok(re
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[oracle]
url = "http://oracle.local:8000"

[routing]
default_room = "inbox"
aliases = { inbox = "!inbox:example.org", sales = "!sales:example.org", ovw = "!ovw:example.org" }
rooms_addr_to = { "^sales@" = "sales" }
rooms_addr_from = { "@partner\\.org$" = "!partner:example.org" }
rooms_mailbox = { "^support$" = "!support:example.org" }
overview = { ovw = [], "!sales-ovw:example.org" = ["sales"] }

[threading]
head_blacklist = ["^noreply@", "^mailer-daemon@"]
"#;

    #[test]
    fn test_parse_sample() {
        let config = AppConfig::parse_toml(SAMPLE).unwrap();
        assert_eq!(config.oracle.url, "http://oracle.local:8000");
        assert_eq!(config.routing.default_room(), "!inbox:example.org");
        assert_eq!(config.threading.quiet_window(), Duration::from_secs(5));
        assert_eq!(config.threading.sort_timeout(), Duration::from_secs(120));
        assert_eq!(config.extraction.retry_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_blacklist_matches() {
        let config = AppConfig::parse_toml(SAMPLE).unwrap();
        assert!(config.threading.is_blacklisted("noreply@shop.example"));
        assert!(config.threading.is_blacklisted("mailer-daemon@example.org"));
        assert!(!config.threading.is_blacklisted("alice@example.org"));
    }

    #[test]
    fn test_invalid_blacklist_is_config_error() {
        let toml = r#"
[routing]
default_room = "!inbox:example.org"

[threading]
head_blacklist = ["(unclosed"]
"#;
        let err = AppConfig::parse_toml(toml).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("(unclosed")));
    }

    #[test]
    fn test_missing_default_room_is_config_error() {
        let err = AppConfig::parse_toml("").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_invalid_oracle_url() {
        let toml = r#"
[oracle]
url = "oracle.local"

[routing]
default_room = "!inbox:example.org"
"#;
        assert!(matches!(
            AppConfig::parse_toml(toml).unwrap_err(),
            Error::Config(_)
        ));
    }

    #[test]
    fn test_passthrough_skips_url_validation() {
        let toml = r#"
[oracle]
url = ""
passthrough = true

[routing]
default_room = "!inbox:example.org"
"#;
        let config = AppConfig::parse_toml(toml).unwrap();
        assert!(config.oracle.passthrough);
    }

    #[test]
    fn test_route_order() {
        let config = AppConfig::parse_toml(SAMPLE).unwrap();
        let routing = &config.routing;

        // recipient beats mailbox and sender
        assert_eq!(
            routing.route(
                Some("support"),
                "bob@partner.org",
                &["sales@example.org".to_string()]
            ),
            "!sales:example.org"
        );
        // mailbox beats sender
        assert_eq!(
            routing.route(Some("support"), "bob@partner.org", &[]),
            "!support:example.org"
        );
        assert_eq!(
            routing.route(None, "bob@partner.org", &[]),
            "!partner:example.org"
        );
        assert_eq!(
            routing.route(None, "carol@example.org", &["info@example.org".to_string()]),
            "!inbox:example.org"
        );
    }

    #[test]
    fn test_overview_mapping() {
        let config = AppConfig::parse_toml(SAMPLE).unwrap();
        let routing = &config.routing;

        assert_eq!(
            routing.overview_rooms(),
            vec!["!ovw:example.org".to_string(), "!sales-ovw:example.org".to_string()]
        );
        assert_eq!(
            routing.overview_targets("!sales-ovw:example.org"),
            vec!["!sales:example.org".to_string()]
        );
        assert_eq!(
            routing.overview_targets("!ovw:example.org"),
            routing.target_rooms()
        );
        assert_eq!(
            routing.overview_rooms_for("!sales:example.org"),
            vec!["!ovw:example.org".to_string(), "!sales-ovw:example.org".to_string()]
        );
        assert_eq!(
            routing.overview_rooms_for("!inbox:example.org"),
            vec!["!ovw:example.org".to_string()]
        );
    }

    #[test]
    fn test_aliases() {
        let config = AppConfig::parse_toml(SAMPLE).unwrap();
        assert_eq!(config.routing.resolve("sales"), "!sales:example.org");
        assert_eq!(config.routing.resolve("!other:example.org"), "!other:example.org");
        assert_eq!(config.routing.alias_of("!sales:example.org"), "sales");
        assert!(config
            .routing
            .all_rooms()
            .contains(&"!ovw:example.org".to_string()));
    }

    #[test]
    fn test_overrides() {
        let mut config = AppConfig::parse_toml(SAMPLE).unwrap();
        config.apply_overrides(|name| match name {
            "DATABASE_URL" => Some("postgres://db/override".to_string()),
            "NOTIFY_WEBHOOK_URL" => Some("http://hook.local/events".to_string()),
            "ORACLE_URL" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.database.url, "postgres://db/override");
        assert_eq!(
            config.notify.webhook_url.as_deref(),
            Some("http://hook.local/events")
        );
        assert_eq!(config.oracle.url, "http://oracle.local:8000");
    }

    #[test]
    fn test_env_var_substitution() {
        env::set_var("INBOX_TEST_SUBST_ROOM", "!subst:example.org");
        let result = AppConfig::substitute_env_vars(
            "default_room = \"${INBOX_TEST_SUBST_ROOM}\" other = \"${INBOX_TEST_MISSING_12345}\"",
        )
        .unwrap();
        env::remove_var("INBOX_TEST_SUBST_ROOM");

        assert_eq!(
            result,
            "default_room = \"!subst:example.org\" other = \"${INBOX_TEST_MISSING_12345}\""
        );
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "[routing]\ndefault_room = \"!file:example.org\"\n\n[extraction]\nretry_delay_secs = 9\n"
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.routing.default_room(), "!file:example.org");
        assert_eq!(config.extraction.retry_delay_secs, 9);
    }

    #[test]
    fn test_from_missing_file() {
        let err = AppConfig::from_file(Path::new("/nonexistent/inbox/config.toml")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_example_config_parses() {
        let config =
            AppConfig::parse_toml(include_str!("../../../config/config.example.toml")).unwrap();
        assert_eq!(config.routing.default_room(), "!inbox:example.org");
        assert_eq!(config.routing.overview_rooms(), vec!["!overview:example.org".to_string()]);
        assert_eq!(config.extraction.poll_interval(), Some(Duration::from_secs(60)));
        assert!(config.notify.webhook_secret.is_none());
    }

    #[test]
    fn test_zero_poll_interval_disables_polling() {
        let config = AppConfig::parse_toml(
            "[routing]\ndefault_room = \"!r\"\n\n[extraction]\npoll_interval_secs = 0\n",
        )
        .unwrap();
        assert_eq!(config.extraction.poll_interval(), None);
    }
}
