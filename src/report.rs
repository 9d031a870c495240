//! Formatting helpers for the final report.

pub const KILOBYTE: u64 = 1 << 10;
pub const MEGABYTE: u64 = 1 << 20;
pub const GIGABYTE: u64 = 1 << 30;
pub const TERABYTE: u64 = 1 << 40;
pub const PETABYTE: u64 = 1 << 50;
pub const EXABYTE: u64 = 1 << 60;

/// Renders a human-readable byte string of the form 10MB, 12.5KB, and so
/// forth.
pub fn byte_size(bytes: u64) -> String {
    let (value, unit) = match bytes {
        v if v >= EXABYTE => (v as f64 / EXABYTE as f64, "EB"),
        v if v >= PETABYTE => (v as f64 / PETABYTE as f64, "PB"),
        v if v >= TERABYTE => (v as f64 / TERABYTE as f64, "TB"),
        v if v >= GIGABYTE => (v as f64 / GIGABYTE as f64, "GB"),
        v if v >= MEGABYTE => (v as f64 / MEGABYTE as f64, "MB"),
        v if v >= KILOBYTE => (v as f64 / KILOBYTE as f64, "KB"),
        v => (v as f64, "B"),
    };

    let mut result = format!("{value:.1}");
    if let Some(stripped) = result.strip_suffix(".0") {
        result.truncate(stripped.len());
    }

    result + unit
}

/// Takes the head of data for printing.
///
/// Data longer than `limit` is truncated with an ellipsis; non-printable
/// data is replaced with a placeholder.
pub fn peek_body(body: &[u8], limit: usize) -> String {
    let too_long = body.len() > limit;
    let body = if too_long { &body[..limit] } else { body };

    if !is_ascii_printable(body) {
        return "<non-printable-binary-data>".to_string();
    }

    let mut out = String::from_utf8_lossy(body).into_owned();
    if too_long {
        out.push_str("...");
    }

    out
}

/// Checks whether the data contains only ASCII bytes.
pub fn is_ascii_printable(data: &[u8]) -> bool {
    data.iter().all(u8::is_ascii)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_body_bounds() {
        assert_eq!("", peek_body(b"", 10));
        assert_eq!("1234567890...", peek_body(b"123456789012345", 10));
        assert_eq!("1234567890", peek_body(b"1234567890", 10));
        assert_eq!("123456789", peek_body(b"123456789", 10));
        assert_eq!("<non-printable-binary-data>", peek_body(b"\xed\xa0\x80\x80", 10));
    }

    #[test]
    fn byte_size_units() {
        assert_eq!("0B", byte_size(0));
        assert_eq!("1KB", byte_size(KILOBYTE));
        assert_eq!("1MB", byte_size(MEGABYTE));
        assert_eq!("1GB", byte_size(GIGABYTE));
        assert_eq!("1TB", byte_size(TERABYTE));
        assert_eq!("1PB", byte_size(PETABYTE));
        assert_eq!("1EB", byte_size(EXABYTE));
        assert_eq!("1.5KB", byte_size(KILOBYTE + 512));
    }
}
