//! Payloads of the lifecycle events that are reported to the control service. These are what
//! the media server hands to the hook chain, and what hooks may rewrite before passing them on.

/// Details the client sent with its RTMP `connect` command
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectEvent {
    pub app: String,
    pub flash_version: String,
    pub swf_url: String,
    pub tc_url: String,
    pub page_url: String,

    /// Query string arguments of the connection url, in `key=value&...` form
    pub args: String,
}

/// A client asked to publish a stream
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishEvent {
    pub stream_name: String,

    /// Publish type as sent by the client (`live`, `record`, `append`)
    pub publish_type: String,
    pub args: String,
}

/// A client asked to play a stream
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlayEvent {
    pub stream_name: String,
    pub args: String,
    pub start: i64,
    pub duration: i64,
    pub reset: bool,

    /// Silent plays come from internal consumers (e.g. transcoders) and are never reported
    pub silent: bool,
}

/// A recorder finished writing a file
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordDoneEvent {
    pub recorder: String,
    pub path: String,
}
