//! Usenet streaming core
//!
//! Turns an NZB hash into a range-seekable virtual file: NZB parsing, yEnc
//! decoding, a pooled multi-provider NNTP client, per-file segment stores,
//! and the stream service the HTTP surface drives.

pub mod nntp;
pub mod nzb;
pub mod range;
pub mod segments;
pub mod service;
pub mod stream;
pub mod yenc;

pub use nntp::{NntpError, NntpManager, NntpPool, ProviderHealth};
pub use nzb::{NzbError, NzbFileEntry, NzbSegment, ParsedNzb};
pub use range::{ByteRange, RangeError, parse_range_header};
pub use segments::{SegmentDecodeInfo, SegmentLocation, SegmentStore};
pub use service::{
    GuardedStream, MountInfo, MountJanitor, MountManager, MountRegistry, MountStatus,
    UsenetStreamResponse, UsenetStreamService,
};
pub use stream::{AccessPattern, AccessPatternHandle, stream_range};
pub use yenc::{YencDecoded, YencError, decode_yenc, encode_yenc};
