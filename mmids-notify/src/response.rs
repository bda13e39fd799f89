//! Minimal interpretation of raw control service responses. Only the status class and single
//! named headers are ever needed, so responses are never parsed into a full header table. Each
//! scan moves forward over the response's chunks once, meaning the result is the same however
//! the response bytes were fragmented.

use bytes::{Bytes, BytesMut};
use tracing::warn;

/// Byte offset of the status code's hundreds digit in `HTTP/1.1 200 OK`
const STATUS_DIGIT_OFFSET: usize = 9;

/// Coarse outcome of a notification
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    Redirect,
    Failure,
}

/// The raw bytes of one control service response, as received from the transport
#[derive(Clone, Debug, Default)]
pub struct NotifyResponse {
    chunks: Vec<Bytes>,
}

impl NotifyResponse {
    pub fn from_chunks(chunks: Vec<Bytes>) -> Self {
        NotifyResponse { chunks }
    }

    pub fn class(&self) -> ResponseClass {
        classify(&self.chunks)
    }

    pub fn header(&self, name: &str, max_length: usize) -> Option<String> {
        extract_header(&self.chunks, name, max_length)
    }

    pub fn body(&self) -> Option<Bytes> {
        response_body(&self.chunks)
    }
}

impl From<&str> for NotifyResponse {
    fn from(raw: &str) -> Self {
        NotifyResponse::from_chunks(vec![Bytes::copy_from_slice(raw.as_bytes())])
    }
}

/// Classifies a response by the hundreds digit of its status code. Responses too short to
/// contain a status code, or with a non-digit in that position, are failures.
pub fn classify(chunks: &[Bytes]) -> ResponseClass {
    let digit = chunks.iter().flat_map(|c| c.iter()).nth(STATUS_DIGIT_OFFSET);
    match digit {
        Some(b'2') => ResponseClass::Success,
        Some(b'3') => ResponseClass::Redirect,
        Some(digit) if digit.is_ascii_digit() => ResponseClass::Failure,
        Some(other) => {
            warn!(
                "Response status code has a non-digit character: 0x{:02x}",
                other
            );

            ResponseClass::Failure
        }

        None => {
            warn!("Response was too short to contain a status code");
            ResponseClass::Failure
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ScanState {
    StatusLine,
    Name,
    Space,
    Value,
    ValueNewline,
}

/// Finds the value of the first header whose name matches `name` (ignoring case). Values longer
/// than `max_length` bytes are truncated. Continuation lines (starting with a space or tab)
/// are folded into the value. The scan stops at the blank line ending the header block.
pub fn extract_header(chunks: &[Bytes], name: &str, max_length: usize) -> Option<String> {
    let name = name.as_bytes();
    let mut state = ScanState::StatusLine;
    let mut name_index = 0;
    let mut name_matches = true;
    let mut value = Vec::new();

    for &byte in chunks.iter().flat_map(|c| c.iter()) {
        if byte == b'\r' {
            continue;
        }

        if state == ScanState::ValueNewline {
            if byte == b' ' || byte == b'\t' {
                if name_matches {
                    push_bounded(&mut value, b' ', max_length);
                }

                state = ScanState::Space;
                continue;
            }

            if name_matches {
                return Some(finish_value(value));
            }

            // Start of the next header line
            state = ScanState::Name;
            name_index = 0;
            name_matches = true;
        }

        match state {
            ScanState::StatusLine => {
                if byte == b'\n' {
                    state = ScanState::Name;
                }
            }

            ScanState::Name => match byte {
                b'\n' if name_index == 0 => return None,
                b'\n' => {
                    // Malformed line without a colon
                    name_index = 0;
                    name_matches = true;
                }

                b':' => {
                    name_matches = name_matches && name_index == name.len();
                    state = ScanState::Space;
                }

                _ => {
                    name_matches = name_matches
                        && name_index < name.len()
                        && name[name_index].eq_ignore_ascii_case(&byte);

                    name_index += 1;
                }
            },

            ScanState::Space => match byte {
                b' ' | b'\t' => (),
                b'\n' => state = ScanState::ValueNewline,
                _ => {
                    if name_matches {
                        push_bounded(&mut value, byte, max_length);
                    }

                    state = ScanState::Value;
                }
            },

            ScanState::Value => {
                if byte == b'\n' {
                    state = ScanState::ValueNewline;
                } else if name_matches {
                    push_bounded(&mut value, byte, max_length);
                }
            }

            ScanState::ValueNewline => (),
        }
    }

    let value_complete = matches!(state, ScanState::Value | ScanState::ValueNewline);
    if value_complete && name_matches {
        return Some(finish_value(value));
    }

    None
}

/// Returns everything after the blank line that terminates the header block, or `None` if
/// there is no header terminator or nothing follows it.
pub fn response_body(chunks: &[Bytes]) -> Option<Bytes> {
    let mut consecutive_newlines = 0;
    let mut found_body = false;
    let mut body = BytesMut::new();

    for chunk in chunks {
        if found_body {
            body.extend_from_slice(chunk);
            continue;
        }

        for (index, byte) in chunk.iter().enumerate() {
            match byte {
                b'\r' => (),
                b'\n' => consecutive_newlines += 1,
                _ => consecutive_newlines = 0,
            }

            if consecutive_newlines == 2 {
                found_body = true;
                body.extend_from_slice(&chunk[index + 1..]);
                break;
            }
        }
    }

    if body.is_empty() {
        None
    } else {
        Some(body.freeze())
    }
}

fn push_bounded(value: &mut Vec<u8>, byte: u8, max_length: usize) {
    if value.len() < max_length {
        value.push(byte);
    }
}

fn finish_value(value: Vec<u8>) -> String {
    let value = String::from_utf8_lossy(&value);
    value.trim().to_string()
}
