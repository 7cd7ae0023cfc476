//! Sizes such as `100KiB`, `8MiB` or a plain byte count, used by the
//! threshold, part size and speed options of `cp`.

use byte_unit::Byte;
use std::str::FromStr;

pub fn parse_human_bytes(value: &str) -> Result<u64, String> {
    Byte::from_str(value.trim())
        .map(|bytes| bytes.as_u64())
        .map_err(|e| format!("invalid size {value}: {e}"))
}

/// Validates the size and keeps the original text, so that the value
/// shows up in `--help` defaults exactly as the user wrote it.
pub fn check_human_bytes(value: &str) -> Result<String, String> {
    parse_human_bytes(value).map(|_| value.to_string())
}
