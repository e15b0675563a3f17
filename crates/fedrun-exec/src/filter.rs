//! Cleaning of raw child output lines.

use std::{borrow::Cow, sync::LazyLock};

use regex::Regex;

/// CSI sequence: ESC `[`, parameter bytes 0x30–0x3F, intermediate bytes 0x20–0x2F, final byte 0x40–0x7E.
static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]").expect("static regex"));

/// Remove terminal control sequences from `line`.
pub fn strip_ansi(line: &str) -> Cow<'_, str> {
    ANSI_ESCAPE.replace_all(line, "")
}

/// Decode UTF-8, dropping invalid byte sequences instead of failing.
pub fn decode_lossy(bytes: &[u8]) -> String {
    bytes.utf8_chunks().map(|chunk| chunk.valid()).collect()
}

/// Decode and strip one raw output line, keeping its line terminator.
pub fn clean_line(raw: &[u8]) -> String {
    strip_ansi(&decode_lossy(raw)).into_owned()
}
