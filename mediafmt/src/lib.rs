#![doc = include_str!("../README.md")]
//!
//! ## Technical Overview
//!
//! Every format follows the same lifecycle: the whole file is loaded into a
//! buffer owned by a parser, a single left-to-right (WAV/MP3/FLV) or
//! recursive (M4A) structural parse builds an in-memory result, and two
//! best-effort stages render the result as text and extract embedded
//! elementary-stream bytes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use mediafmt::parser::Container;
//! use mediafmt::render;
//!
//! # fn main() -> anyhow::Result<()> {
//! let path = Path::new("movie.flv");
//! let data = std::fs::read(path)?;
//!
//! let container = Container::from_path(path).expect("unsupported extension");
//! let mut parser = container.parser(data);
//! parser.parse()?;
//!
//! // Text dump of everything the structural parse found.
//! println!("{}", render::render(&parser.records()));
//!
//! // Elementary streams, ready to write out verbatim.
//! for stream in parser.extract_streams()? {
//!     std::fs::write(path.with_extension(stream.kind.extension()), &stream.data)?;
//! }
//! # Ok(())
//! # }
//! ```

/// Byte-order conversions: big/little-endian integers, IEEE-754 doubles and
/// QuickTime fixed-point values.
pub mod byteorder;

/// Typed errors for structural invariant violations and truncated input.
pub mod errors;

/// FLV tag-stream parsing, AMF metadata decoding and H.264/AAC re-framing.
pub mod flv;

/// M4A/QuickTime recursive atom-tree parsing.
pub mod m4a;

/// MP3 frame-sync scanning and ID3v1/ID3v2 tag parsing.
pub mod mp3;

/// The shared parser lifecycle: [`parser::FormatParser`], container
/// detection and extracted-stream types.
pub mod parser;

/// Bounds-checked cursor over a loaded byte buffer.
pub mod reader;

/// Structural dump records and the text renderer.
pub mod render;

/// WAV RIFF chunk parsing.
pub mod wav;
