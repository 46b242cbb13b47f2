//! Common parser lifecycle.
//!
//! Every container format implements [`FormatParser`]: a structural parse
//! over an owned byte buffer, a [`Record`] tree describing what was found,
//! and extraction of the embedded elementary streams. Callers run the three
//! stages in order; a failed parse is fatal for the file, while dump and
//! extraction failures only lose that stage's output.

use std::path::Path;

use anyhow::Result;

use crate::flv::FlvParser;
use crate::m4a::M4aParser;
use crate::mp3::Mp3Parser;
use crate::render::Record;
use crate::wav::WavParser;

/// The elementary-stream flavor of one extracted artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Raw sample bytes, playable with the format token the parser reports.
    Pcm,
    /// H.264 Annex-B byte stream, start-code-prefixed NAL units.
    H264,
    /// AAC wrapped in ADTS frames.
    Aac,
}

impl StreamKind {
    pub fn extension(self) -> &'static str {
        match self {
            StreamKind::Pcm => "pcm",
            StreamKind::H264 => "h264",
            StreamKind::Aac => "aac",
        }
    }
}

/// One extracted elementary stream, ready to be written out verbatim.
#[derive(Debug, Clone)]
pub struct ExtractedStream {
    pub kind: StreamKind,
    pub data: Vec<u8>,
}

pub trait FormatParser {
    /// Walks the whole buffer once, building the structural result.
    ///
    /// Must be called before [`records`](Self::records) or
    /// [`extract_streams`](Self::extract_streams); a failure here invalidates
    /// both.
    fn parse(&mut self) -> Result<()>;

    /// The parsed structure as a dump tree.
    fn records(&self) -> Vec<Record>;

    /// Re-frames the embedded elementary-stream payloads.
    ///
    /// Formats whose extraction needs an external decoder (MP3) return an
    /// empty list here and leave decoding to the caller.
    fn extract_streams(&self) -> Result<Vec<ExtractedStream>>;

    /// Shell command that plays the extracted raw stream, when the parsed
    /// structure pins down enough of the sample layout to build one.
    fn playback_hint(&self, _output_name: &str) -> Option<String> {
        None
    }
}

/// Container format, detected from the input path's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Wav,
    Mp3,
    Flv,
    M4a,
}

impl Container {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "wav" => Some(Container::Wav),
            "mp3" => Some(Container::Mp3),
            "flv" => Some(Container::Flv),
            "m4a" | "mp4" | "mov" => Some(Container::M4a),
            _ => None,
        }
    }

    /// Parser instance owning `data` for one file's lifetime.
    pub fn parser(self, data: Vec<u8>) -> Box<dyn FormatParser> {
        match self {
            Container::Wav => Box::new(WavParser::new(data)),
            Container::Mp3 => Box::new(Mp3Parser::new(data)),
            Container::Flv => Box::new(FlvParser::new(data)),
            Container::M4a => Box::new(M4aParser::new(data)),
        }
    }
}

impl std::fmt::Display for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Container::Wav => "WAV",
            Container::Mp3 => "MP3",
            Container::Flv => "FLV",
            Container::M4a => "M4A",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_detection_by_extension() {
        assert_eq!(Container::from_path(Path::new("a.wav")), Some(Container::Wav));
        assert_eq!(Container::from_path(Path::new("A.MP3")), Some(Container::Mp3));
        assert_eq!(Container::from_path(Path::new("x/y.flv")), Some(Container::Flv));
        assert_eq!(Container::from_path(Path::new("b.m4a")), Some(Container::M4a));
        assert_eq!(Container::from_path(Path::new("b.mov")), Some(Container::M4a));
        assert_eq!(Container::from_path(Path::new("b.ogg")), None);
        assert_eq!(Container::from_path(Path::new("noext")), None);
    }

    #[test]
    fn stream_extensions() {
        assert_eq!(StreamKind::Pcm.extension(), "pcm");
        assert_eq!(StreamKind::H264.extension(), "h264");
        assert_eq!(StreamKind::Aac.extension(), "aac");
    }
}
