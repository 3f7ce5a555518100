//! NZB document parser
//!
//! NZB is an XML format describing how to fetch files from Usenet: a list
//! of files, each with the message IDs of its yEnc segments. The parser
//! also classifies files (RAR volumes, samples, streamable media) so the
//! streaming service can refuse archive-only payloads up front.

use once_cell::sync::Lazy;
use quick_xml::Reader;
use quick_xml::events::Event;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

/// Files at or below this size never make an NZB "RAR-only"
const RAR_ONLY_MIN_BYTES: u64 = 10 * 1024 * 1024;

/// Streamable media extensions, largest-first candidates for playback
const MEDIA_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "m4v", "mov", "wmv", "ts", "m2ts", "mpg", "mpeg", "webm", "flv", "vob",
    "divx",
];

static RAR_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)\.rar$").unwrap(),
        Regex::new(r"(?i)\.r\d{2}$").unwrap(),
        Regex::new(r"(?i)\.part\d+\.rar$").unwrap(),
        Regex::new(r"(?i)\.\d{3}$").unwrap(),
    ]
});

/// `yEnc (a/b) <name>` filename form
static YENC_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)yEnc\s*\(\d+/\d+\)\s+(\S+\.\w+)").unwrap());

/// Trailing `name.ext` token
static TRAILING_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([\w\-+~\[\]()]+(?:\.[\w\-+~]+)*\.\w{2,4})\s*$"#).unwrap());

#[derive(Debug, Error)]
pub enum NzbError {
    #[error("NZB XML parse error: {0}")]
    Xml(String),

    #[error("NZB contains no files")]
    Empty,
}

/// One article of a multipart upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NzbSegment {
    /// Message-ID for NNTP retrieval (no angle brackets)
    pub message_id: String,
    /// 1-based segment index
    pub number: u32,
    /// Poster-declared size; decode reconciles the actual value
    pub bytes: u64,
}

/// A file entry in an NZB
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NzbFileEntry {
    pub subject: String,
    /// Derived from the subject
    pub filename: String,
    pub poster: String,
    /// Post timestamp (unix seconds)
    pub date: i64,
    pub groups: Vec<String>,
    /// Ordered by segment number ascending
    pub segments: Vec<NzbSegment>,
    /// Sum of segment sizes
    pub size: u64,
}

impl NzbFileEntry {
    /// Derive a filename from a subject line. Tried in order: quoted span,
    /// `yEnc (a/b) name`, trailing `name.ext`, first 100 characters.
    pub fn extract_filename(subject: &str) -> String {
        if let Some(start) = subject.find('"') {
            if let Some(len) = subject[start + 1..].find('"') {
                let name = subject[start + 1..start + 1 + len].trim();
                if !name.is_empty() {
                    return name.to_string();
                }
            }
        }

        if let Some(caps) = YENC_NAME.captures(subject) {
            return caps[1].to_string();
        }

        if let Some(caps) = TRAILING_NAME.captures(subject) {
            return caps[1].to_string();
        }

        subject.chars().take(100).collect()
    }

    /// RAR volume by any of the archive naming conventions
    pub fn is_rar(&self) -> bool {
        RAR_PATTERNS.iter().any(|p| p.is_match(&self.filename))
    }

    pub fn is_sample(&self) -> bool {
        self.filename.to_lowercase().contains("sample")
    }

    /// Non-RAR file with a streamable media extension
    pub fn is_media(&self) -> bool {
        if self.is_rar() {
            return false;
        }
        let lower = self.filename.to_lowercase();
        MEDIA_EXTENSIONS
            .iter()
            .any(|ext| lower.ends_with(&format!(".{ext}")))
    }
}

/// A parsed NZB document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedNzb {
    /// SHA-256 of the raw document bytes, hex
    pub hash: String,
    pub files: Vec<NzbFileEntry>,
    /// Non-RAR media files, sorted by size descending for preferential
    /// streaming
    pub media_files: Vec<NzbFileEntry>,
    pub total_size: u64,
    /// All newsgroups referenced, sorted and deduplicated
    pub groups: Vec<String>,
}

impl ParsedNzb {
    /// Parse an NZB document from raw bytes
    pub fn parse(data: &[u8]) -> Result<Self, NzbError> {
        let hash = format!("{:x}", Sha256::digest(data));
        let xml = String::from_utf8_lossy(data);

        let mut reader = Reader::from_str(&xml);
        reader.config_mut().trim_text(true);

        let mut files: Vec<NzbFileEntry> = Vec::new();
        let mut current_file: Option<FileBuilder> = None;
        let mut current_segment: Option<SegmentBuilder> = None;
        let mut in_groups = false;
        let mut current_tag = String::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref e)) => {
                    let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    current_tag = tag.clone();
                    match tag.as_str() {
                        "file" => {
                            let mut builder = FileBuilder::default();
                            for attr in e.attributes().flatten() {
                                let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                                let val = attr
                                    .unescape_value()
                                    .map(|v| v.into_owned())
                                    .unwrap_or_default();
                                match key.as_str() {
                                    "subject" => builder.subject = Some(val),
                                    "poster" => builder.poster = Some(val),
                                    "date" => builder.date = val.parse().unwrap_or(0),
                                    _ => {}
                                }
                            }
                            current_file = Some(builder);
                        }
                        "groups" => in_groups = true,
                        "segment" => {
                            let mut builder = SegmentBuilder::default();
                            for attr in e.attributes().flatten() {
                                let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                                let val = String::from_utf8_lossy(&attr.value).to_string();
                                match key.as_str() {
                                    "bytes" => builder.bytes = val.parse().unwrap_or(0),
                                    "number" => builder.number = val.parse().unwrap_or(0),
                                    _ => {}
                                }
                            }
                            current_segment = Some(builder);
                        }
                        _ => {}
                    }
                }
                Ok(Event::Text(ref e)) => {
                    let text = e.unescape().unwrap_or_default().to_string();
                    if text.is_empty() {
                        continue;
                    }
                    if in_groups && current_tag == "group" {
                        if let Some(ref mut file) = current_file {
                            file.groups.push(text);
                        }
                    } else if let Some(ref mut segment) = current_segment {
                        segment.message_id = text;
                    }
                }
                Ok(Event::End(ref e)) => {
                    let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    match tag.as_str() {
                        "file" => {
                            if let Some(builder) = current_file.take() {
                                match builder.build() {
                                    Some(file) => files.push(file),
                                    None => warn!("Skipping NZB file entry without subject"),
                                }
                            }
                        }
                        "groups" => in_groups = false,
                        "segment" => {
                            if let Some(builder) = current_segment.take() {
                                if let Some(segment) = builder.build() {
                                    if let Some(ref mut file) = current_file {
                                        file.segments.push(segment);
                                    }
                                }
                            }
                        }
                        _ => {}
                    }
                    current_tag.clear();
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(NzbError::Xml(e.to_string())),
                _ => {}
            }
        }

        if files.is_empty() {
            return Err(NzbError::Empty);
        }

        let total_size = files.iter().map(|f| f.size).sum();

        let mut groups: Vec<String> = files.iter().flat_map(|f| f.groups.clone()).collect();
        groups.sort();
        groups.dedup();

        let mut media_files: Vec<NzbFileEntry> =
            files.iter().filter(|f| f.is_media()).cloned().collect();
        media_files.sort_by(|a, b| b.size.cmp(&a.size));

        debug!(
            files = files.len(),
            media_files = media_files.len(),
            total_size = total_size,
            "Parsed NZB"
        );

        Ok(ParsedNzb {
            hash,
            files,
            media_files,
            total_size,
            groups,
        })
    }

    /// True when every substantial file is a RAR volume: at least one
    /// non-sample file over 10 MB, and all such files are RARs. Streaming
    /// refuses these; they need extraction first.
    pub fn is_rar_only(&self) -> bool {
        let substantial: Vec<&NzbFileEntry> = self
            .files
            .iter()
            .filter(|f| f.size > RAR_ONLY_MIN_BYTES && !f.is_sample())
            .collect();
        !substantial.is_empty() && substantial.iter().all(|f| f.is_rar())
    }

    pub fn total_segments(&self) -> usize {
        self.files.iter().map(|f| f.segments.len()).sum()
    }
}

#[derive(Default)]
struct FileBuilder {
    subject: Option<String>,
    poster: Option<String>,
    date: i64,
    groups: Vec<String>,
    segments: Vec<NzbSegment>,
}

impl FileBuilder {
    fn build(mut self) -> Option<NzbFileEntry> {
        let subject = self.subject?;
        let filename = NzbFileEntry::extract_filename(&subject);
        self.segments.sort_by_key(|s| s.number);
        let size = self.segments.iter().map(|s| s.bytes).sum();

        Some(NzbFileEntry {
            subject,
            filename,
            poster: self.poster.unwrap_or_default(),
            date: self.date,
            groups: self.groups,
            segments: self.segments,
            size,
        })
    }
}

#[derive(Default)]
struct SegmentBuilder {
    message_id: String,
    bytes: u64,
    number: u32,
}

impl SegmentBuilder {
    fn build(self) -> Option<NzbSegment> {
        if self.message_id.is_empty() {
            warn!("Segment with empty message ID");
            return None;
        }
        Some(NzbSegment {
            message_id: self.message_id,
            number: self.number,
            bytes: self.bytes,
        })
    }
}
