//! Error types for the structural parsers.
//!
//! Each format owns an enum for its invariant violations; `TruncatedError` is
//! the shared "insufficient data" signal raised by the buffer cursor. Errors
//! propagate through `anyhow::Result`; composing loops that prefer partial
//! results over total failure downcast to decide whether to skip one unit or
//! stop the walk.

/// Declared or fixed-size data extends past the bytes actually available.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("need {needed} bytes at offset {offset}, only {available} available")]
pub struct TruncatedError {
    pub offset: usize,
    pub needed: usize,
    pub available: usize,
}

/// Buffer reservation failed while copying a payload.
#[derive(thiserror::Error, Debug)]
#[error("failed to reserve {bytes} bytes: {source}")]
pub struct AllocError {
    pub bytes: usize,
    pub source: std::collections::TryReserveError,
}

#[derive(thiserror::Error, Debug)]
pub enum WavError {
    #[error("header chunk id mismatch: got {0:?}, expected \"RIFF\"")]
    BadRiffId([u8; 4]),

    #[error("header type tag mismatch: got {0:?}, expected \"WAVE\"")]
    BadWaveTag([u8; 4]),

    #[error("chunk {id:?} declares {declared} bytes, only {available} remain")]
    ChunkOverrun {
        id: [u8; 4],
        declared: u32,
        available: usize,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum Mp3Error {
    #[error("unsupported ID3v2 version {0} (only version 3 is parsed)")]
    UnsupportedId3Version(u8),

    #[error("ID3v2 tag declares {declared} bytes, only {available} remain")]
    TagOverrun { declared: u32, available: usize },
}

#[derive(thiserror::Error, Debug)]
pub enum FlvError {
    #[error("invalid signature {0:?}, expected \"FLV\"")]
    BadSignature([u8; 3]),

    #[error("first script AMF value must be a string, got type {0}")]
    ScriptAmf1NotString(u8),

    #[error("first script AMF value is {0:?}, expected \"onMetaData\"")]
    ScriptNotOnMetaData(String),

    #[error("second script AMF value must be an ECMA array (type 8), got type {0}")]
    ScriptAmf2NotArray(u8),

    #[error("unsupported AMF value type {0}, expected 0 (number), 1 (boolean) or 2 (string)")]
    UnsupportedAmfValueType(u8),

    #[error("AVC raw frame before any configuration record")]
    MissingAvcConfiguration,

    #[error("AAC raw frame before any AudioSpecificConfig")]
    MissingAacConfiguration,
}

#[derive(thiserror::Error, Debug)]
pub enum AtomError {
    #[error("atom {kind:?} end {end:#x} exceeds parent bound {bound:#x}")]
    Overrun {
        kind: [u8; 4],
        end: u64,
        bound: u64,
    },

    #[error("atom {kind:?} made no progress at offset {offset:#x}")]
    NoProgress { kind: [u8; 4], offset: usize },

    #[error("elng language tag is not NUL-terminated")]
    UnterminatedLanguageTag,

    #[error("no atom found at the top level")]
    EmptyFile,
}
