/// Longest stream name (in bytes) that is captured into session notify state.
pub const MAX_NAME_LENGTH: usize = 256;

/// Longest stream argument string (in bytes) that is captured into session notify state.
pub const MAX_ARGS_LENGTH: usize = 256;

/// Longest `Location` header value (in bytes) that will be read from a redirect response.
pub const MAX_LOCATION_LENGTH: usize = 1024;

/// Returns the longest prefix of `value` that is at most `max_length` bytes and does not split
/// a UTF-8 character. Values over the limit are truncated, not rejected.
pub fn truncate_to_boundary(value: &str, max_length: usize) -> &str {
    if value.len() <= max_length {
        return value;
    }

    let mut end = max_length;
    while !value.is_char_boundary(end) {
        end -= 1;
    }

    &value[..end]
}

/// Owned version of [`truncate_to_boundary`]
pub fn bounded(value: &str, max_length: usize) -> String {
    truncate_to_boundary(value, max_length).to_string()
}
