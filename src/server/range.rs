//! `Range` header parsing
//!
//! Only the first satisfiable `bytes` range is honored. Anything that
//! cannot be satisfied yields `None` and the caller serves the whole file.

use crate::engine::ByteRange;

/// Parse a `Range` header value against a file of `size` bytes
pub fn parse_range(header: &str, size: u64) -> Option<ByteRange> {
    let (unit, ranges) = header.split_once('=')?;
    if !unit.trim().eq_ignore_ascii_case("bytes") {
        return None;
    }
    let last = size.checked_sub(1)?;

    ranges.split(',').find_map(|part| {
        let (start, end) = part.trim().split_once('-')?;
        let start = start.trim();
        let end = end.trim();
        let (start, end) = if start.is_empty() {
            // suffix range: the last N bytes
            let suffix: u64 = end.parse().ok()?;
            if suffix == 0 {
                return None;
            }
            (size.saturating_sub(suffix), last)
        } else {
            let start: u64 = start.parse().ok()?;
            let end = if end.is_empty() {
                last
            } else {
                end.parse::<u64>().ok()?.min(last)
            };
            (start, end)
        };
        (start <= end).then(|| ByteRange::new(start, end))
    })
}

/// `Content-Range` header value for a partial response
pub fn content_range(range: &ByteRange, size: u64) -> String {
    format!("bytes {}-{}/{}", range.start, range.end, size)
}
