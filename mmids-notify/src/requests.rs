//! Builders for the url encoded bodies of each notification. These are deterministic
//! formatters with no decision making of their own.
//!
//! Every body except `connect` starts with the session prefix
//! (`app`, `flashver`, `swfurl`, `tcurl`, `pageurl`, `addr`, `clientid`), followed by the
//! `call` field naming the event and then the event's own fields. Free form arguments captured
//! from the client are appended last, verbatim, since they are already query string encoded.

use crate::config::EventKind;
use crate::events::{ConnectEvent, PlayEvent, PublishEvent, RecordDoneEvent};
use crate::session::{ActiveRoles, SessionIdentity};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::fmt::Display;
use std::time::Duration;

/// Characters that are percent encoded in field values. Non-ascii bytes are always encoded.
const FIELD_VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b';')
    .add(b'?');

struct FormBody {
    body: String,
}

impl FormBody {
    fn new() -> Self {
        FormBody {
            body: String::new(),
        }
    }

    fn session_prefix(identity: &SessionIdentity, connect: &ConnectEvent) -> Self {
        FormBody::new()
            .connection_fields(identity, connect)
            .number("clientid", identity.client_id)
    }

    fn connection_fields(self, identity: &SessionIdentity, connect: &ConnectEvent) -> Self {
        self.field("app", &connect.app)
            .field("flashver", &connect.flash_version)
            .field("swfurl", &connect.swf_url)
            .field("tcurl", &connect.tc_url)
            .field("pageurl", &connect.page_url)
            .field("addr", &identity.peer_address)
    }

    fn field(mut self, name: &str, value: &str) -> Self {
        self.separator();
        self.body.push_str(name);
        self.body.push('=');
        self.body.extend(utf8_percent_encode(value, FIELD_VALUE));

        self
    }

    fn number(mut self, name: &str, value: impl Display) -> Self {
        self.separator();
        self.body.push_str(&format!("{}={}", name, value));
        self
    }

    fn call(self, call: &str) -> Self {
        self.number("call", call)
    }

    fn name_if_present(self, stream_name: &str) -> Self {
        if stream_name.is_empty() {
            self
        } else {
            self.field("name", stream_name)
        }
    }

    fn args(mut self, args: &str) -> Self {
        let args = args.trim_start_matches('&');
        if !args.is_empty() {
            self.separator();
            self.body.push_str(args);
        }

        self
    }

    fn separator(&mut self) {
        if !self.body.is_empty() {
            self.body.push('&');
        }
    }

    fn finish(self) -> String {
        self.body
    }
}

pub fn connect_body(identity: &SessionIdentity, connect: &ConnectEvent) -> String {
    FormBody::new()
        .connection_fields(identity, connect)
        .number("epoch", identity.epoch)
        .call(EventKind::Connect.call_name())
        .args(&connect.args)
        .finish()
}

pub fn disconnect_body(identity: &SessionIdentity, connect: &ConnectEvent) -> String {
    FormBody::session_prefix(identity, connect)
        .call(EventKind::Disconnect.call_name())
        .field("app", &connect.app)
        .args(&connect.args)
        .finish()
}

pub fn publish_body(
    identity: &SessionIdentity,
    connect: &ConnectEvent,
    event: &PublishEvent,
) -> String {
    FormBody::session_prefix(identity, connect)
        .call(EventKind::Publish.call_name())
        .field("name", &event.stream_name)
        .field("type", &event.publish_type)
        .args(&event.args)
        .finish()
}

pub fn play_body(identity: &SessionIdentity, connect: &ConnectEvent, event: &PlayEvent) -> String {
    FormBody::session_prefix(identity, connect)
        .call(EventKind::Play.call_name())
        .field("name", &event.stream_name)
        // Unsigned 32 bit on the wire, so a start of -2 goes out as 4294967294
        .number("start", event.start as u32)
        .number("duration", event.duration as u32)
        .number("reset", u8::from(event.reset))
        .args(&event.args)
        .finish()
}

/// Body for `publish_done`, `play_done` and `done`
pub fn done_body(
    identity: &SessionIdentity,
    connect: &ConnectEvent,
    kind: EventKind,
    stream_name: &str,
    args: &str,
) -> String {
    FormBody::session_prefix(identity, connect)
        .call(kind.call_name())
        .name_if_present(stream_name)
        .args(args)
        .finish()
}

pub struct UpdateDetails<'a> {
    pub roles: ActiveRoles,
    pub elapsed: Duration,
    pub media_timestamp: u32,
    pub stream_name: &'a str,
    pub args: &'a str,
}

pub fn update_body(
    identity: &SessionIdentity,
    connect: &ConnectEvent,
    details: &UpdateDetails,
) -> String {
    // A session that both publishes and plays reports as a publisher
    let call = if details.roles.publishing {
        "update_publish"
    } else if details.roles.playing {
        "update_play"
    } else {
        EventKind::Update.call_name()
    };

    FormBody::session_prefix(identity, connect)
        .call(call)
        .number("time", details.elapsed.as_secs())
        .number("timestamp", details.media_timestamp)
        .name_if_present(details.stream_name)
        .args(details.args)
        .finish()
}

pub fn record_done_body(
    identity: &SessionIdentity,
    connect: &ConnectEvent,
    event: &RecordDoneEvent,
    stream_name: &str,
    args: &str,
) -> String {
    FormBody::session_prefix(identity, connect)
        .call(EventKind::RecordDone.call_name())
        .field("recorder", &event.recorder)
        .field("name", stream_name)
        .field("path", &event.path)
        .args(args)
        .finish()
}
