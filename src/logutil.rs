//! Log formatting for relayed text.
//!
//! Chat and mesh messages are user input: they may span lines or carry control
//! characters, and a long Telegram message would drown the log. [`preview`] wraps such
//! text in a [`Display`](std::fmt::Display) adapter that renders it on one line and cuts
//! it after [`PREVIEW_CHARS`] characters. Nothing is allocated unless the record is
//! actually written. Mesh parts are logged with the part limit as the cap, so a sent
//! part is always shown whole.

use std::fmt::{self, Write};

/// Characters of user text shown per log record.
pub const PREVIEW_CHARS: usize = 160;

/// One-line rendering of relayed text; see [`preview`].
#[derive(Debug, Clone, Copy)]
pub struct Preview<'a> {
    text: &'a str,
    limit: usize,
}

/// Preview `text` with the default cap.
pub fn preview(text: &str) -> Preview<'_> {
    preview_with(text, PREVIEW_CHARS)
}

/// Preview `text`, cut after `limit` characters.
pub fn preview_with(text: &str, limit: usize) -> Preview<'_> {
    Preview { text, limit }
}

impl fmt::Display for Preview<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut chars = self.text.chars();
        for ch in chars.by_ref().take(self.limit) {
            match ch {
                '\\' => f.write_str("\\\\")?,
                '\n' => f.write_str("\\n")?,
                '\r' => f.write_str("\\r")?,
                '\t' => f.write_str("\\t")?,
                c if c.is_control() => write!(f, "\\u{{{:x}}}", c as u32)?,
                c => f.write_char(c)?,
            }
        }
        let rest = chars.count();
        if rest > 0 {
            write!(f, "… (+{} chars)", rest)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_line_chat_text_becomes_one_line() {
        let s = "[TG: Anna] line one\nline two\r\tend\u{7}";
        assert_eq!(
            preview(s).to_string(),
            "[TG: Anna] line one\\nline two\\r\\tend\\u{7}"
        );
    }

    #[test]
    fn long_text_is_cut_on_char_boundary_and_counted() {
        let s = "ж".repeat(PREVIEW_CHARS + 40);
        let shown = preview(&s).to_string();
        assert!(shown.starts_with(&"ж".repeat(PREVIEW_CHARS)));
        assert!(shown.ends_with("… (+40 chars)"));
    }

    #[test]
    fn text_at_the_cap_is_not_marked() {
        let s = "x".repeat(12);
        assert_eq!(preview_with(&s, 12).to_string(), s);
        assert_eq!(preview_with(&s, 10).to_string(), "xxxxxxxxxx… (+2 chars)");
    }
}
