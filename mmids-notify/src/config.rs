//! Notify configuration. The configuration is loaded once at startup and is immutable
//! afterwards; every session reads it through a shared `Arc<NotifyConfig>`.
//!
//! The format follows the mmids config style: a `notify` block holds the server level settings
//! (connect and disconnect callbacks) plus defaults for every application, and any number of
//! `application <name>` blocks override those defaults for sessions connected to that
//! application.
//!
//! ```text
//! notify {
//!     method post
//!     on_connect http://localhost:9055/connect
//!     update_timeout 30s
//! }
//!
//! application live {
//!     on_play http://localhost:9055/play
//!     reconnect_time_gap 3s
//!     reconnect_timeout 5m
//! }
//! ```

use hyper::Uri;
use pest::iterators::Pair;
use pest::Parser;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RECONNECT_TIME_GAP: Duration = Duration::from_secs(3);
pub const DEFAULT_RECONNECT_TIMEOUT: Duration = Duration::from_secs(300);

/// Lifecycle events that can be reported to the control service
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Disconnect,
    Publish,
    Play,
    PublishDone,
    PlayDone,
    Done,
    RecordDone,
    Update,
}

/// HTTP method used when calling the control service
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotifyMethod {
    Get,
    Post,
}

/// Where and how a single lifecycle event is reported
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotifyEndpoint {
    pub url: String,
    pub method: NotifyMethod,
}

/// Fully resolved notify settings for one scope
#[derive(Clone, Debug)]
pub struct NotifyScope {
    endpoints: HashMap<EventKind, NotifyEndpoint>,

    /// How long to wait between update (heartbeat) notifications. A zero duration disables
    /// heartbeats.
    pub update_timeout: Duration,

    /// When set only a 2xx update response keeps the heartbeat going. Otherwise any response
    /// that isn't a failure is tolerated.
    pub update_strict: bool,

    /// Delay between full passes over an upstream address list during failover
    pub reconnect_time_gap: Duration,

    /// Total time budget for failover passes
    pub reconnect_timeout: Duration,

    /// When set, the locally visible name of relayed streams is replaced by a hash of the
    /// upstream target so players never see the real upstream identity.
    pub relay_redirect: bool,
}

/// The complete notify configuration
#[derive(Clone, Debug)]
pub struct NotifyConfig {
    server: NotifyScope,
    applications: HashMap<String, NotifyScope>,
}

#[derive(Error, Debug)]
pub enum ConfigParseError {
    #[error("The config provided could not be parsed")]
    InvalidConfig(#[from] pest::error::Error<Rule>),

    #[error("Found unexpected rule '{rule:?}' in the {section} section")]
    UnexpectedRule { rule: Rule, section: String },

    #[error("Unknown setting '{name}'")]
    UnknownSetting { name: String },

    #[error("The setting '{name}' requires a value")]
    MissingValue { name: String },

    #[error("The setting '{name}' is only allowed in the notify block")]
    ServerOnlySetting { name: String },

    #[error("Invalid duration '{value}' for setting '{name}'")]
    InvalidDuration { name: String, value: String },

    #[error("Invalid flag value '{value}' for setting '{name}'. Expected 'on' or 'off'")]
    InvalidFlag { name: String, value: String },

    #[error("Unsupported notify method '{value}'. Expected 'get' or 'post'")]
    InvalidMethod { value: String },

    #[error("Invalid url '{value}' for setting '{name}'")]
    InvalidUrl { name: String, value: String },

    #[error("The reconnect_time_gap setting must be greater than zero")]
    ZeroReconnectTimeGap,

    #[error("Duplicate application block: '{name}'")]
    DuplicateApplication { name: String },

    #[error("Only one notify block may be specified")]
    DuplicateNotifyBlock,
}

#[derive(Parser)]
#[grammar = "config.pest"]
struct RawConfigParser;

/// Settings exactly as they appeared in one block, before defaults are applied
#[derive(Default)]
struct RawScope {
    method: Option<NotifyMethod>,
    urls: HashMap<EventKind, String>,
    update_timeout: Option<Duration>,
    update_strict: Option<bool>,
    reconnect_time_gap: Option<Duration>,
    reconnect_timeout: Option<Duration>,
    relay_redirect: Option<bool>,
}

impl EventKind {
    /// Name of the event as sent in the `call` field of notifications
    pub fn call_name(&self) -> &'static str {
        match self {
            EventKind::Connect => "connect",
            EventKind::Disconnect => "disconnect",
            EventKind::Publish => "publish",
            EventKind::Play => "play",
            EventKind::PublishDone => "publish_done",
            EventKind::PlayDone => "play_done",
            EventKind::Done => "done",
            EventKind::RecordDone => "record_done",
            EventKind::Update => "update",
        }
    }

    /// Connect and disconnect are tied to the connection, not an application, so they can only
    /// be configured in the notify block.
    pub fn is_server_level(&self) -> bool {
        matches!(self, EventKind::Connect | EventKind::Disconnect)
    }

    fn from_setting_name(name: &str) -> Option<Self> {
        match name {
            "on_connect" => Some(EventKind::Connect),
            "on_disconnect" => Some(EventKind::Disconnect),
            "on_publish" => Some(EventKind::Publish),
            "on_play" => Some(EventKind::Play),
            "on_publish_done" => Some(EventKind::PublishDone),
            "on_play_done" => Some(EventKind::PlayDone),
            "on_done" => Some(EventKind::Done),
            "on_record_done" => Some(EventKind::RecordDone),
            "on_update" => Some(EventKind::Update),
            _ => None,
        }
    }
}

impl NotifyScope {
    pub fn endpoint(&self, kind: EventKind) -> Option<&NotifyEndpoint> {
        self.endpoints.get(&kind)
    }

    /// A scope is active when at least one application level callback is configured. Sessions
    /// in inactive scopes never track notify state.
    pub fn is_active(&self) -> bool {
        self.endpoints.keys().any(|kind| !kind.is_server_level())
    }

    /// How many full passes over an address list the failover engine may make. Saturates at
    /// `u32::MAX` for timeouts too large to count.
    pub fn max_reconnect_attempts(&self) -> u32 {
        let gap = self.reconnect_time_gap.as_millis();
        if gap == 0 {
            return 0;
        }

        u32::try_from(self.reconnect_timeout.as_millis() / gap).unwrap_or(u32::MAX)
    }

    fn resolve(raw: &RawScope, parent: Option<&RawScope>, include_server_level: bool) -> Self {
        let method = raw
            .method
            .or_else(|| parent.and_then(|p| p.method))
            .unwrap_or(NotifyMethod::Post);

        let mut endpoints = HashMap::new();
        let parent_urls = parent.map(|p| p.urls.iter()).into_iter().flatten();
        for (kind, url) in parent_urls.chain(raw.urls.iter()) {
            if kind.is_server_level() && !include_server_level {
                continue;
            }

            // Later entries (this scope's own urls) overwrite inherited ones
            endpoints.insert(
                *kind,
                NotifyEndpoint {
                    url: url.clone(),
                    method,
                },
            );
        }

        NotifyScope {
            endpoints,
            update_timeout: raw
                .update_timeout
                .or_else(|| parent.and_then(|p| p.update_timeout))
                .unwrap_or(DEFAULT_UPDATE_TIMEOUT),

            update_strict: raw
                .update_strict
                .or_else(|| parent.and_then(|p| p.update_strict))
                .unwrap_or(false),

            reconnect_time_gap: raw
                .reconnect_time_gap
                .or_else(|| parent.and_then(|p| p.reconnect_time_gap))
                .unwrap_or(DEFAULT_RECONNECT_TIME_GAP),

            reconnect_timeout: raw
                .reconnect_timeout
                .or_else(|| parent.and_then(|p| p.reconnect_timeout))
                .unwrap_or(DEFAULT_RECONNECT_TIMEOUT),

            relay_redirect: raw
                .relay_redirect
                .or_else(|| parent.and_then(|p| p.relay_redirect))
                .unwrap_or(false),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        NotifyConfig {
            server: NotifyScope::resolve(&RawScope::default(), None, true),
            applications: HashMap::new(),
        }
    }
}

impl NotifyConfig {
    /// Settings of the notify block, including the connect and disconnect callbacks
    pub fn server(&self) -> &NotifyScope {
        &self.server
    }

    /// Settings for sessions connected to the specified application. Applications without
    /// their own block use the notify block's settings.
    pub fn application(&self, name: &str) -> &NotifyScope {
        self.applications.get(name).unwrap_or(&self.server)
    }
}

pub fn parse(content: &str) -> Result<NotifyConfig, ConfigParseError> {
    let mut server = None;
    let mut applications = HashMap::new();

    let pairs = RawConfigParser::parse(Rule::content, content)?;
    for pair in pairs {
        match pair.as_rule() {
            Rule::notify_block => {
                if server.is_some() {
                    return Err(ConfigParseError::DuplicateNotifyBlock);
                }

                server = Some(read_block(pair, false)?.1);
            }

            Rule::application_block => {
                let (name, scope) = read_block(pair, true)?;
                let name = name.unwrap_or_default();
                if applications.contains_key(&name) {
                    return Err(ConfigParseError::DuplicateApplication { name });
                }

                applications.insert(name, scope);
            }

            _ => (),
        }
    }

    let server = server.unwrap_or_default();
    let applications = applications
        .iter()
        .map(|(name, raw)| {
            (
                name.clone(),
                NotifyScope::resolve(raw, Some(&server), false),
            )
        })
        .collect();

    Ok(NotifyConfig {
        server: NotifyScope::resolve(&server, None, true),
        applications,
    })
}

fn read_block(
    pair: Pair<Rule>,
    is_application: bool,
) -> Result<(Option<String>, RawScope), ConfigParseError> {
    let section = if is_application {
        "application block"
    } else {
        "notify block"
    };

    let mut name = None;
    let mut scope = RawScope::default();
    for pair in pair.into_inner() {
        match pair.as_rule() {
            Rule::application_name => name = Some(pair.as_str().to_string()),
            Rule::setting => {
                let mut setting_name = String::new();
                let mut value = None;
                for inner in pair.into_inner() {
                    match inner.as_rule() {
                        Rule::setting_name => setting_name = inner.as_str().to_string(),
                        Rule::setting_value => value = read_setting_value(inner),
                        x => {
                            return Err(ConfigParseError::UnexpectedRule {
                                rule: x,
                                section: "setting".to_string(),
                            })
                        }
                    }
                }

                apply_setting(&mut scope, setting_name, value, is_application)?;
            }

            x => {
                return Err(ConfigParseError::UnexpectedRule {
                    rule: x,
                    section: section.to_string(),
                })
            }
        }
    }

    Ok((name, scope))
}

fn read_setting_value(pair: Pair<Rule>) -> Option<String> {
    let mut value = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::quoted_string_value | Rule::raw_value => {
                value = Some(inner.as_str().to_string());
            }

            _ => (),
        }
    }

    value.filter(|v| !v.trim().is_empty())
}

fn apply_setting(
    scope: &mut RawScope,
    name: String,
    value: Option<String>,
    is_application: bool,
) -> Result<(), ConfigParseError> {
    let value = match value {
        Some(value) => value,
        None => return Err(ConfigParseError::MissingValue { name }),
    };

    if let Some(kind) = EventKind::from_setting_name(&name) {
        if kind.is_server_level() && is_application {
            return Err(ConfigParseError::ServerOnlySetting { name });
        }

        let url = normalize_url(&name, &value)?;
        scope.urls.insert(kind, url);
        return Ok(());
    }

    match name.as_str() {
        "method" | "notify_method" => {
            scope.method = Some(match value.to_lowercase().as_str() {
                "get" => NotifyMethod::Get,
                "post" => NotifyMethod::Post,
                _ => return Err(ConfigParseError::InvalidMethod { value }),
            });
        }

        "update_timeout" | "notify_update_timeout" => {
            scope.update_timeout = Some(parse_duration(&name, &value)?);
        }

        "update_strict" | "notify_update_strict" => {
            scope.update_strict = Some(parse_flag(&name, &value)?);
        }

        "relay_redirect" | "notify_relay_redirect" => {
            scope.relay_redirect = Some(parse_flag(&name, &value)?);
        }

        "reconnect_time_gap" => {
            let gap = parse_duration(&name, &value)?;
            if gap.is_zero() {
                return Err(ConfigParseError::ZeroReconnectTimeGap);
            }

            scope.reconnect_time_gap = Some(gap);
        }

        "reconnect_timeout" => {
            scope.reconnect_timeout = Some(parse_duration(&name, &value)?);
        }

        _ => return Err(ConfigParseError::UnknownSetting { name }),
    }

    Ok(())
}

/// Durations are written as a number with an optional `ms`, `s`, `m` or `h` suffix. A bare
/// number is interpreted as milliseconds.
fn parse_duration(name: &str, value: &str) -> Result<Duration, ConfigParseError> {
    let invalid = || ConfigParseError::InvalidDuration {
        name: name.to_string(),
        value: value.to_string(),
    };

    let trimmed = value.trim();
    let (number, multiplier) = if let Some(number) = trimmed.strip_suffix("ms") {
        (number, 1)
    } else if let Some(number) = trimmed.strip_suffix('s') {
        (number, 1_000)
    } else if let Some(number) = trimmed.strip_suffix('m') {
        (number, 60_000)
    } else if let Some(number) = trimmed.strip_suffix('h') {
        (number, 3_600_000)
    } else {
        (trimmed, 1)
    };

    let number = number.parse::<u64>().map_err(|_| invalid())?;
    let millis = number.checked_mul(multiplier).ok_or_else(invalid)?;

    Ok(Duration::from_millis(millis))
}

fn parse_flag(name: &str, value: &str) -> Result<bool, ConfigParseError> {
    match value.to_lowercase().as_str() {
        "on" | "true" | "yes" => Ok(true),
        "off" | "false" | "no" => Ok(false),
        _ => Err(ConfigParseError::InvalidFlag {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Urls without a scheme are assumed to be plain http. Only http callbacks are supported.
fn normalize_url(name: &str, value: &str) -> Result<String, ConfigParseError> {
    let invalid = || ConfigParseError::InvalidUrl {
        name: name.to_string(),
        value: value.to_string(),
    };

    let url = if value.contains("://") {
        value.to_string()
    } else {
        format!("http://{}", value)
    };

    let uri = url.parse::<Uri>().map_err(|_| invalid())?;
    if uri.scheme_str() != Some("http") || uri.authority().is_none() {
        return Err(invalid());
    }

    Ok(url)
}
