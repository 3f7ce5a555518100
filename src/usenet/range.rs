//! HTTP byte-range parsing
//!
//! Supports the three single-range forms: `bytes=start-end`,
//! `bytes=start-` (open-ended), and `bytes=-suffix` (last N bytes). Parsed
//! ranges are inclusive and always satisfy `0 <= start <= end <= total-1`.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("malformed range header: {0}")]
    Malformed(String),

    #[error("range not satisfiable for resource of {total} bytes")]
    Unsatisfiable { total: u64 },
}

/// An inclusive byte range within a resource of known size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// The whole resource
    pub fn full(total: u64) -> Option<Self> {
        if total == 0 {
            return None;
        }
        Some(Self {
            start: 0,
            end: total - 1,
        })
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// `Content-Range` value for a 206 response
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{total}", self.start, self.end)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes={}-{}", self.start, self.end)
    }
}

/// Parse a `Range` header against a resource of `total` bytes.
///
/// A suffix of zero (`bytes=-0`) and anything starting at or past the end
/// are rejected as unsatisfiable; an explicit `end` past the resource is
/// clamped to `total-1`.
pub fn parse_range_header(header: &str, total: u64) -> Result<ByteRange, RangeError> {
    let spec = header
        .trim()
        .strip_prefix("bytes=")
        .ok_or_else(|| RangeError::Malformed(header.to_string()))?;

    if spec.contains(',') {
        // Multi-range requests are not supported
        return Err(RangeError::Malformed(header.to_string()));
    }

    let (start_str, end_str) = spec
        .split_once('-')
        .ok_or_else(|| RangeError::Malformed(header.to_string()))?;

    if total == 0 {
        return Err(RangeError::Unsatisfiable { total });
    }

    let range = match (start_str.is_empty(), end_str.is_empty()) {
        // bytes=-suffix
        (true, false) => {
            let suffix: u64 = end_str
                .parse()
                .map_err(|_| RangeError::Malformed(header.to_string()))?;
            if suffix == 0 {
                return Err(RangeError::Unsatisfiable { total });
            }
            let start = total.saturating_sub(suffix);
            ByteRange {
                start,
                end: total - 1,
            }
        }
        // bytes=start-
        (false, true) => {
            let start: u64 = start_str
                .parse()
                .map_err(|_| RangeError::Malformed(header.to_string()))?;
            if start >= total {
                return Err(RangeError::Unsatisfiable { total });
            }
            ByteRange {
                start,
                end: total - 1,
            }
        }
        // bytes=start-end
        (false, false) => {
            let start: u64 = start_str
                .parse()
                .map_err(|_| RangeError::Malformed(header.to_string()))?;
            let end: u64 = end_str
                .parse()
                .map_err(|_| RangeError::Malformed(header.to_string()))?;
            if start > end || start >= total {
                return Err(RangeError::Unsatisfiable { total });
            }
            ByteRange {
                start,
                end: end.min(total - 1),
            }
        }
        (true, true) => return Err(RangeError::Malformed(header.to_string())),
    };

    Ok(range)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_range() {
        let r = parse_range_header("bytes=1000000-1999999", 10_000_000).unwrap();
        assert_eq!(r.start, 1_000_000);
        assert_eq!(r.end, 1_999_999);
        assert_eq!(r.len(), 1_000_000);
    }

    #[test]
    fn single_byte() {
        let r = parse_range_header("bytes=0-0", 100).unwrap();
        assert_eq!(r, ByteRange { start: 0, end: 0 });
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn suffix_range() {
        let r = parse_range_header("bytes=-500", 10_000).unwrap();
        assert_eq!(r.start, 9_500);
        assert_eq!(r.end, 9_999);

        // Suffix larger than the resource covers the whole thing
        let r = parse_range_header("bytes=-99999", 100).unwrap();
        assert_eq!(r, ByteRange { start: 0, end: 99 });
    }

    #[test]
    fn zero_suffix_rejected() {
        assert_eq!(
            parse_range_header("bytes=-0", 100),
            Err(RangeError::Unsatisfiable { total: 100 })
        );
    }

    #[test]
    fn open_ended_range() {
        let r = parse_range_header("bytes=500-", 1000).unwrap();
        assert_eq!(r, ByteRange { start: 500, end: 999 });
    }

    #[test]
    fn end_clamped_to_resource() {
        let r = parse_range_header("bytes=0-99999", 100).unwrap();
        assert_eq!(r.end, 99);
    }

    #[test]
    fn out_of_bounds_rejected() {
        assert!(parse_range_header("bytes=100-", 100).is_err());
        assert!(parse_range_header("bytes=200-300", 100).is_err());
        assert!(parse_range_header("bytes=5-2", 100).is_err());
    }

    #[test]
    fn malformed_rejected() {
        assert!(matches!(
            parse_range_header("0-100", 1000),
            Err(RangeError::Malformed(_))
        ));
        assert!(matches!(
            parse_range_header("bytes=", 1000),
            Err(RangeError::Malformed(_))
        ));
        assert!(matches!(
            parse_range_header("bytes=a-b", 1000),
            Err(RangeError::Malformed(_))
        ));
        assert!(matches!(
            parse_range_header("bytes=0-10,20-30", 1000),
            Err(RangeError::Malformed(_))
        ));
    }

    #[test]
    fn serialize_parse_roundtrip() {
        let total = 10_000_000;
        for r in [
            ByteRange { start: 0, end: 0 },
            ByteRange { start: 0, end: total - 1 },
            ByteRange {
                start: 1_000_000,
                end: 1_999_999,
            },
        ] {
            let parsed = parse_range_header(&r.to_string(), total).unwrap();
            assert_eq!(parsed, r);
        }
    }

    #[test]
    fn content_range_format() {
        let r = ByteRange { start: 10, end: 19 };
        assert_eq!(r.content_range(100), "bytes 10-19/100");
    }
}
