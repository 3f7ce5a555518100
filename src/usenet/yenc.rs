//! yEnc decoder
//!
//! yEnc is the standard encoding for binary data on Usenet, using 252 of
//! 256 byte values directly.
//!
//! # Format
//!
//! ```text
//! =ybegin part=1 line=128 size=123456 name=filename.ext
//! =ypart begin=1 end=123456
//! <encoded binary data>
//! =yend size=123456 part=1 pcrc32=ABCD1234 crc32=DEADBEEF
//! ```
//!
//! The `=ybegin` header is expected within the first 10 lines of the
//! article body and the `=yend` trailer within the last 5. Body bytes are
//! `(byte - 42) mod 256`, with `=`-escaped bytes subtracting another 64
//! first. CRC fields are parsed but mismatches only warn unless strict
//! mode is on: live streaming tolerates minor corruption better than hard
//! aborts.

use thiserror::Error;
use tracing::{debug, warn};

/// Lines searched from the top for `=ybegin`
const HEADER_SEARCH_LINES: usize = 10;
/// Lines searched from the bottom for `=yend`
const TRAILER_SEARCH_LINES: usize = 5;

#[derive(Debug, Error)]
pub enum YencError {
    #[error("no =ybegin header in the first {HEADER_SEARCH_LINES} lines")]
    MissingHeader,

    #[error("empty article body")]
    Empty,

    #[error("CRC mismatch: expected {expected:08x}, computed {computed:08x}")]
    CrcMismatch { expected: u32, computed: u32 },
}

/// Parsed `=ybegin` (and optional `=ypart`) fields
#[derive(Debug, Clone, Default)]
pub struct YencHeader {
    pub name: Option<String>,
    pub size: Option<u64>,
    pub part: Option<u32>,
    pub total: Option<u32>,
    pub line: Option<u32>,
    /// 1-based start offset within the target file (`=ypart`)
    pub begin: Option<u64>,
    /// Inclusive end offset within the target file (`=ypart`)
    pub end: Option<u64>,
}

/// Parsed `=yend` fields
#[derive(Debug, Clone, Default)]
pub struct YencTrailer {
    pub size: Option<u64>,
    pub part: Option<u32>,
    pub crc32: Option<u32>,
    pub pcrc32: Option<u32>,
}

/// A decoded article body
#[derive(Debug, Clone)]
pub struct YencDecoded {
    pub header: YencHeader,
    pub trailer: Option<YencTrailer>,
    pub data: Vec<u8>,
}

/// Decode a yEnc article body.
///
/// `strict_crc` turns CRC mismatches into errors; the default behavior is
/// to log and return the data anyway.
pub fn decode_yenc(article: &[u8], strict_crc: bool) -> Result<YencDecoded, YencError> {
    let lines = split_lines(article);
    if lines.is_empty() {
        return Err(YencError::Empty);
    }

    let header_idx = lines
        .iter()
        .take(HEADER_SEARCH_LINES)
        .position(|line| line.starts_with(b"=ybegin "))
        .ok_or(YencError::MissingHeader)?;

    let mut header = parse_header(lines[header_idx]);

    let mut data_start = header_idx + 1;
    if let Some(line) = lines.get(data_start) {
        if line.starts_with(b"=ypart ") {
            parse_ypart(line, &mut header);
            data_start += 1;
        }
    }

    let mut trailer = None;
    let mut data_end = lines.len();
    let trailer_from = lines.len().saturating_sub(TRAILER_SEARCH_LINES);
    for idx in (trailer_from..lines.len()).rev() {
        if idx >= data_start && lines[idx].starts_with(b"=yend ") {
            trailer = Some(parse_trailer(lines[idx]));
            data_end = idx;
            break;
        }
    }
    if trailer.is_none() {
        debug!("no =yend trailer found, decoding to end of article");
    }

    let mut data = Vec::with_capacity(article.len());
    let mut escaped = false;
    for line in &lines[data_start..data_end] {
        for &byte in *line {
            if escaped {
                data.push(byte.wrapping_sub(64).wrapping_sub(42));
                escaped = false;
            } else if byte == b'=' {
                escaped = true;
            } else {
                data.push(byte.wrapping_sub(42));
            }
        }
    }

    if let Some(ref t) = trailer {
        if let Some(expected) = t.size {
            if data.len() as u64 != expected {
                warn!(
                    expected = expected,
                    actual = data.len(),
                    "yEnc decoded size differs from trailer"
                );
            }
        }

        // Multipart articles carry the part CRC; single-part the full CRC
        let expected_crc = t.pcrc32.or(t.crc32);
        if let Some(expected) = expected_crc {
            let computed = crc32fast::hash(&data);
            if computed != expected {
                if strict_crc {
                    return Err(YencError::CrcMismatch { expected, computed });
                }
                warn!(
                    expected = format!("{expected:08x}"),
                    computed = format!("{computed:08x}"),
                    "yEnc CRC mismatch, keeping data"
                );
            }
        }
    }

    Ok(YencDecoded {
        header,
        trailer,
        data,
    })
}

/// Split on LF, trimming a trailing CR from each line
fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    data.split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.is_empty())
        .collect()
}

fn parse_header(line: &[u8]) -> YencHeader {
    let mut header = YencHeader::default();
    let text = String::from_utf8_lossy(line);

    // name=... runs to end of line and may contain spaces
    if let Some(pos) = text.find("name=") {
        header.name = Some(text[pos + 5..].trim().to_string());
    }
    for token in text.split_whitespace().skip(1) {
        if let Some((key, value)) = token.split_once('=') {
            match key {
                "size" => header.size = value.parse().ok(),
                "part" => header.part = value.parse().ok(),
                "total" => header.total = value.parse().ok(),
                "line" => header.line = value.parse().ok(),
                _ => {}
            }
        }
    }
    header
}

fn parse_ypart(line: &[u8], header: &mut YencHeader) {
    let text = String::from_utf8_lossy(line);
    for token in text.split_whitespace().skip(1) {
        if let Some((key, value)) = token.split_once('=') {
            match key {
                "begin" => header.begin = value.parse().ok(),
                "end" => header.end = value.parse().ok(),
                _ => {}
            }
        }
    }
}

fn parse_trailer(line: &[u8]) -> YencTrailer {
    let mut trailer = YencTrailer::default();
    let text = String::from_utf8_lossy(line);
    for token in text.split_whitespace().skip(1) {
        if let Some((key, value)) = token.split_once('=') {
            match key {
                "size" => trailer.size = value.parse().ok(),
                "part" => trailer.part = value.parse().ok(),
                "crc32" => trailer.crc32 = u32::from_str_radix(value, 16).ok(),
                "pcrc32" => trailer.pcrc32 = u32::from_str_radix(value, 16).ok(),
                _ => {}
            }
        }
    }
    trailer
}

/// Encode data in yEnc format. Test fixture support.
pub fn encode_yenc(data: &[u8], filename: &str, line_length: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let header = format!(
        "=ybegin line={} size={} name={}\r\n",
        line_length,
        data.len(),
        filename
    );
    out.extend_from_slice(header.as_bytes());

    let mut line_pos = 0;
    for &byte in data {
        let encoded = byte.wrapping_add(42);
        let needs_escape = matches!(encoded, 0x00 | 0x0A | 0x0D | 0x3D);
        if needs_escape {
            out.push(b'=');
            out.push(encoded.wrapping_add(64));
            line_pos += 2;
        } else {
            out.push(encoded);
            line_pos += 1;
        }
        if line_pos >= line_length {
            out.extend_from_slice(b"\r\n");
            line_pos = 0;
        }
    }
    if line_pos > 0 {
        out.extend_from_slice(b"\r\n");
    }

    let crc = crc32fast::hash(data);
    let trailer = format!("=yend size={} crc32={crc:08x}\r\n", data.len());
    out.extend_from_slice(trailer.as_bytes());
    out
}
