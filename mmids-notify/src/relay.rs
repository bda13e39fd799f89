//! Upstream origin targets and the requests this crate raises toward the relay subsystem and
//! the live subscriber registry. Neither collaborator is implemented here; they receive these
//! requests over channels and act on them on their own.

use crate::SessionId;
use thiserror::Error;

pub const RTMP_SCHEME: &str = "rtmp://";
pub const DEFAULT_RTMP_PORT: u16 = 1935;

/// A parsed upstream origin a stream can be pushed to or pulled from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayTarget {
    /// Full target url, including the play path
    pub url: String,
    pub host: String,
    pub port: u16,
    pub app: String,
    pub play_path: String,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RtmpUrlError {
    #[error("The url '{0}' does not use the rtmp scheme")]
    MissingScheme(String),

    #[error("The url '{0}' has no host")]
    EmptyHost(String),

    #[error("The url '{0}' has an invalid port")]
    InvalidPort(String),

    #[error("The url '{0}' does not specify an application")]
    MissingApp(String),

    #[error("The url '{0}' has no stream path and no stream name was available")]
    MissingPlayPath(String),
}

/// Requests for the relay subsystem. Registration is fire and forget.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayRequest {
    /// Forward the locally published stream to the target
    Push {
        session_id: SessionId,
        local_name: String,
        target: RelayTarget,
    },

    /// Pull the target into the local stream name so players can be served from it
    Pull {
        session_id: SessionId,
        local_name: String,
        target: RelayTarget,
    },
}

/// Requests for the live subscriber registry
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubscriberRequest {
    /// Clears whatever the session's player is currently bound to, so it can be bound to a new
    /// upstream. Always raised before the matching pull is registered.
    Rebind { session_id: SessionId },
}

/// Case insensitive check for the rtmp scheme
pub fn is_rtmp_url(url: &str) -> bool {
    url.len() >= RTMP_SCHEME.len()
        && url.as_bytes()[..RTMP_SCHEME.len()].eq_ignore_ascii_case(RTMP_SCHEME.as_bytes())
}

/// Parses an `rtmp://host[:port]/app[/play_path]` url. The first path segment is the
/// application and the remainder is the play path. When there is no play path the fallback
/// stream name is used, and appended to the target url so the relay has a concrete path.
pub fn parse_rtmp_target(url: &str, fallback_stream: &str) -> Result<RelayTarget, RtmpUrlError> {
    if !is_rtmp_url(url) {
        return Err(RtmpUrlError::MissingScheme(url.to_string()));
    }

    let remainder = &url[RTMP_SCHEME.len()..];
    let (authority, path) = match remainder.split_once('/') {
        Some((authority, path)) => (authority, path),
        None => (remainder, ""),
    };

    let (host, port) = split_host_and_port(url, authority)?;
    if host.is_empty() {
        return Err(RtmpUrlError::EmptyHost(url.to_string()));
    }

    let (app, play_path) = match path.split_once('/') {
        Some((app, play_path)) => (app, play_path),
        None => (path, ""),
    };

    if app.is_empty() {
        return Err(RtmpUrlError::MissingApp(url.to_string()));
    }

    let (url, play_path) = if play_path.is_empty() {
        if fallback_stream.is_empty() {
            return Err(RtmpUrlError::MissingPlayPath(url.to_string()));
        }

        let base = url.trim_end_matches('/');
        (
            format!("{}/{}", base, fallback_stream),
            fallback_stream.to_string(),
        )
    } else {
        (url.to_string(), play_path.to_string())
    };

    Ok(RelayTarget {
        url,
        host: host.to_string(),
        port,
        app: app.to_string(),
        play_path,
    })
}

/// Stream name exposed locally for a relayed target when its real identity must be hidden.
/// This is the lowercase hex md5 digest of the target url.
pub fn hashed_stream_name(target_url: &str) -> String {
    format!("{:x}", md5::compute(target_url.as_bytes()))
}

fn split_host_and_port<'a>(url: &str, authority: &'a str) -> Result<(&'a str, u16), RtmpUrlError> {
    let invalid_port = || RtmpUrlError::InvalidPort(url.to_string());

    // Bracketed ipv6 literal
    if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, rest) = bracketed
            .split_once(']')
            .ok_or_else(|| RtmpUrlError::EmptyHost(url.to_string()))?;

        return match rest.strip_prefix(':') {
            Some(port) => Ok((host, port.parse().map_err(|_| invalid_port())?)),
            None if rest.is_empty() => Ok((host, DEFAULT_RTMP_PORT)),
            None => Err(invalid_port()),
        };
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => Ok((host, port.parse().map_err(|_| invalid_port())?)),
        None => Ok((authority, DEFAULT_RTMP_PORT)),
    }
}
