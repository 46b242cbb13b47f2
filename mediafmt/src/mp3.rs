//! MP3 frame and ID3 tag parser.
//!
//! Three passes over the same buffer: an ID3v2 tag scan, a frame-sync scan
//! and an ID3v1 trailer scan. Frame boundaries come from the sync pattern
//! plus table-driven size computation, never from declared sizes; the first
//! accepted frame latches the stream's MPEG version and layer so spurious
//! sync bytes inside payload data are rejected instead of accepted as frames.
//!
//! PCM extraction is delegated to an external decoder by the caller; this
//! module only reports structure.

use anyhow::{Result, bail};
use log::{debug, warn};

use crate::errors::Mp3Error;
use crate::parser::{ExtractedStream, FormatParser};
use crate::render::{Record, Value};

/// The 32-bit frame header bitfield, stored big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader(pub u32);

impl FrameHeader {
    /// 0 = MPEG 2.5, 2 = MPEG 2, 3 = MPEG 1 (1 is reserved).
    pub fn version(self) -> u8 {
        ((self.0 >> 19) & 0x3) as u8
    }

    /// 3 = Layer I, 2 = Layer II, 1 = Layer III (0 is reserved).
    pub fn layer(self) -> u8 {
        ((self.0 >> 17) & 0x3) as u8
    }

    pub fn crc_protected(self) -> bool {
        (self.0 >> 16) & 0x1 == 0
    }

    pub fn bit_rate_index(self) -> u8 {
        ((self.0 >> 12) & 0xF) as u8
    }

    pub fn sample_rate_index(self) -> u8 {
        ((self.0 >> 10) & 0x3) as u8
    }

    pub fn padding(self) -> bool {
        (self.0 >> 9) & 0x1 == 1
    }

    pub fn channel_mode(self) -> u8 {
        ((self.0 >> 6) & 0x3) as u8
    }

    /// Bitrate in kbit/s, 0 for free-format or reserved indices.
    pub fn bit_rate(self) -> u32 {
        let index = self.bit_rate_index() as usize;
        if !(1..=14).contains(&index) {
            return 0;
        }
        match (self.version(), self.layer()) {
            (3, 3) => index as u32 * 32,
            (3, 2) => [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384][index],
            (3, 1) => [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320][index],
            (0 | 2, 3) => {
                [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256][index]
            }
            (0 | 2, 1 | 2) => [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160][index],
            _ => 0,
        }
    }

    /// Sampling rate in Hz, 1 for reserved combinations so size math never
    /// divides by zero.
    pub fn sample_rate(self) -> u32 {
        let index = self.sample_rate_index() as usize;
        if index > 2 {
            return 1;
        }
        match self.version() {
            0 => [11025, 12000, 8000][index],
            2 => [22050, 24000, 16000][index],
            3 => [44100, 48000, 32000][index],
            _ => 1,
        }
    }

    pub fn samples_per_frame(self) -> u32 {
        match (self.version(), self.layer()) {
            (_, 3) => 384,
            (_, 2) => 1152,
            (3, 1) => 1152,
            (0 | 2, 1) => 576,
            _ => 0,
        }
    }

    /// Payload size following the 4 header bytes. Layer I pads in 4-byte
    /// slots, Layers II/III in single bytes.
    pub fn frame_data_size(self) -> u32 {
        let base = self.samples_per_frame() * self.bit_rate() * 1000 / 8 / self.sample_rate();
        let padding = self.padding() as u32;
        match self.layer() {
            3 => base + padding * 4,
            1 | 2 => base + padding,
            _ => 0,
        }
    }

    fn version_name(self) -> &'static str {
        match self.version() {
            0 => "MPEG 2.5",
            2 => "MPEG 2",
            3 => "MPEG 1",
            _ => "reserved",
        }
    }

    fn layer_name(self) -> &'static str {
        match self.layer() {
            3 => "Layer I",
            2 => "Layer II",
            1 => "Layer III",
            _ => "reserved",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Id3v2Header {
    pub version: [u8; 2],
    pub flags: u8,
    pub size: u32,
}

#[derive(Debug, Clone)]
pub struct Id3v2ExtendedHeader {
    pub header_size: u32,
    pub flags: u16,
    pub padding_size: u32,
}

#[derive(Debug, Clone)]
pub struct Id3v2FrameHeader {
    pub frame_id: [u8; 4],
    pub size: u32,
    pub flags: u16,
}

#[derive(Debug, Clone)]
pub struct Id3v1 {
    pub song_name: String,
    pub artist: String,
    pub album: String,
    pub year: String,
    pub comment: String,
    pub genre: u8,
}

pub struct Mp3Parser {
    data: Vec<u8>,
    id3v2: Option<Id3v2Header>,
    id3v2_extended: Option<Id3v2ExtendedHeader>,
    id3v2_frames: Vec<Id3v2FrameHeader>,
    frames: Vec<FrameHeader>,
    last_frame_pos: usize,
    id3v1: Option<Id3v1>,
}

/// Decodes a 4-byte synch-safe size: only the low 7 bits of each byte carry
/// value.
pub fn synch_safe_size(bytes: &[u8; 4]) -> u32 {
    (bytes[0] & 0x7F) as u32 * 0x200000
        + (bytes[1] & 0x7F) as u32 * 0x4000
        + (bytes[2] & 0x7F) as u32 * 0x80
        + (bytes[3] & 0x7F) as u32
}

fn valid_frame_id(id: &[u8; 4]) -> bool {
    id.iter().enumerate().all(|(i, &b)| {
        b.is_ascii_uppercase() || (i > 0 && b.is_ascii_digit())
    })
}

fn fixed_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(['\0', ' '])
        .to_string()
}

impl Mp3Parser {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            id3v2: None,
            id3v2_extended: None,
            id3v2_frames: Vec::new(),
            frames: Vec::new(),
            last_frame_pos: 0,
            id3v1: None,
        }
    }

    pub fn frames(&self) -> &[FrameHeader] {
        &self.frames
    }

    pub fn id3v1(&self) -> Option<&Id3v1> {
        self.id3v1.as_ref()
    }

    /// Pass 1: scan for "ID3" and decode the tag. Returns the offset where
    /// the frame-sync scan should start: the tag's declared end on success,
    /// 0 when no usable tag exists.
    fn parse_id3v2(&mut self) -> Result<usize> {
        let data = &self.data;
        let Some(start) = data.windows(3).position(|w| w == b"ID3") else {
            return Ok(0);
        };

        let mut pos = start + 3;
        let header_end = pos + 7;
        if header_end > data.len() {
            return Ok(0);
        }
        let version = [data[pos], data[pos + 1]];
        if version[0] != 3 {
            bail!(Mp3Error::UnsupportedId3Version(version[0]));
        }
        let flags = data[pos + 2];
        let size = synch_safe_size(&[data[pos + 3], data[pos + 4], data[pos + 5], data[pos + 6]]);
        pos = header_end;

        if size as usize > data.len() - pos {
            bail!(Mp3Error::TagOverrun {
                declared: size,
                available: data.len() - pos,
            });
        }
        let tag_end = pos + size as usize;

        if flags & 0x40 != 0 && pos + 10 <= tag_end {
            let header_size = u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);
            let ext_flags = u16::from_be_bytes([data[pos + 4], data[pos + 5]]);
            let padding_size =
                u32::from_be_bytes([data[pos + 6], data[pos + 7], data[pos + 8], data[pos + 9]]);
            pos += 10 + header_size as usize;
            self.id3v2_extended = Some(Id3v2ExtendedHeader {
                header_size,
                flags: ext_flags,
                padding_size,
            });
        }

        // Frame headers until the id pattern breaks or the tag is exhausted;
        // payloads are skipped, not decoded.
        while pos + 10 <= tag_end {
            let frame_id = [data[pos], data[pos + 1], data[pos + 2], data[pos + 3]];
            if !valid_frame_id(&frame_id) {
                break;
            }
            let frame_size =
                u32::from_be_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]]);
            let frame_flags = u16::from_be_bytes([data[pos + 8], data[pos + 9]]);
            pos += 10;
            if frame_size as usize > tag_end - pos {
                break;
            }
            pos += frame_size as usize;
            self.id3v2_frames.push(Id3v2FrameHeader {
                frame_id,
                size: frame_size,
                flags: frame_flags,
            });
        }

        self.id3v2 = Some(Id3v2Header {
            version,
            flags,
            size,
        });
        Ok(tag_end)
    }

    /// Pass 2: frame-sync scan with latched version/layer.
    fn parse_frames(&mut self, start: usize) {
        let data = &self.data;
        let mut pos = start;
        let mut version = None;
        let mut layer = None;

        while pos + 4 <= data.len() {
            if data[pos] != 0xFF || data[pos + 1] & 0xE0 != 0xE0 {
                pos += 1;
                continue;
            }
            let header = FrameHeader(u32::from_be_bytes([
                data[pos],
                data[pos + 1],
                data[pos + 2],
                data[pos + 3],
            ]));

            // A sync whose version or layer disagrees with the latched pair
            // is payload data, not a frame.
            match version {
                None => version = Some(header.version()),
                Some(v) if v != header.version() => {
                    pos += 4;
                    continue;
                }
                Some(_) => {}
            }
            match layer {
                None => layer = Some(header.layer()),
                Some(l) if l != header.layer() => {
                    pos += 4;
                    continue;
                }
                Some(_) => {}
            }

            self.last_frame_pos = pos;
            self.frames.push(header);
            pos += 4 + header.frame_data_size() as usize;
        }

        debug!("accepted {} frames", self.frames.len());
    }

    /// Pass 3: scan for the "TAG" trailer from the last accepted frame.
    fn parse_id3v1(&mut self) {
        let data = &self.data;
        let mut pos = self.last_frame_pos;
        while pos + 3 <= data.len() {
            if &data[pos..pos + 3] == b"TAG" {
                if pos + 128 > data.len() {
                    warn!("ID3v1 trailer truncated at offset {pos}");
                    return;
                }
                let tag = &data[pos + 3..pos + 128];
                self.id3v1 = Some(Id3v1 {
                    song_name: fixed_string(&tag[0..30]),
                    artist: fixed_string(&tag[30..60]),
                    album: fixed_string(&tag[60..90]),
                    year: fixed_string(&tag[90..94]),
                    comment: fixed_string(&tag[94..124]),
                    genre: tag[124],
                });
                return;
            }
            pos += 1;
        }
    }

    /// Contiguous runs of identical frame headers, 1-based inclusive index
    /// ranges.
    pub fn frame_runs(&self) -> Vec<(usize, usize, FrameHeader)> {
        let mut runs = Vec::new();
        let mut start = 0;
        for i in 1..=self.frames.len() {
            if i == self.frames.len() || self.frames[i] != self.frames[start] {
                runs.push((start + 1, i, self.frames[start]));
                start = i;
            }
        }
        runs
    }
}

impl FormatParser for Mp3Parser {
    fn parse(&mut self) -> Result<()> {
        // A rejected or malformed ID3v2 tag loses that tag only; the frame
        // scan still runs over the whole buffer.
        let start = match self.parse_id3v2() {
            Ok(start) => start,
            Err(err) => {
                warn!("ID3v2 tag skipped: {err:#}");
                0
            }
        };
        self.parse_frames(start);
        self.parse_id3v1();
        Ok(())
    }

    fn records(&self) -> Vec<Record> {
        let mut records = Vec::new();

        if let Some(header) = &self.id3v2 {
            let mut rec = Record::new("ID3v2 tag");
            rec.field(
                "version",
                Value::Str(format!("2.{}.{}", header.version[0], header.version[1])),
            )
            .field("flags", Value::Bits { bits: header.flags.into(), width: 8 })
            .field("size", Value::U64(header.size.into()));
            if let Some(ext) = &self.id3v2_extended {
                rec.field("extendedHeaderSize", Value::U64(ext.header_size.into()))
                    .field("extendedFlags", Value::Bits { bits: ext.flags.into(), width: 16 })
                    .field("paddingSize", Value::U64(ext.padding_size.into()));
            }
            for frame in &self.id3v2_frames {
                let mut child = Record::new("frame header");
                child
                    .field("frameId", Value::FourCc(frame.frame_id))
                    .field("size", Value::U64(frame.size.into()))
                    .field("flags", Value::Bits { bits: frame.flags.into(), width: 16 });
                rec.child(child);
            }
            records.push(rec);
        }

        for (start, end, header) in self.frame_runs() {
            let name = if start == end {
                format!("frame [{start}]")
            } else {
                format!("frames [{start} - {end}]")
            };
            let mut rec = Record::new(name);
            rec.field("header", Value::Bits { bits: header.0, width: 32 })
                .field("version", Value::Str(header.version_name().to_string()))
                .field("layer", Value::Str(header.layer_name().to_string()))
                .field("crc", Value::Bool(header.crc_protected()))
                .field(
                    "bitRate",
                    Value::Str(format!("{} kbps", header.bit_rate())),
                )
                .field("sampleRate", Value::U64(header.sample_rate().into()))
                .field("padding", Value::Bool(header.padding()))
                .field("channelMode", Value::U64(header.channel_mode().into()));
            records.push(rec);
        }

        if let Some(tag) = &self.id3v1 {
            let mut rec = Record::new("ID3v1 tag");
            rec.field("songName", Value::Str(tag.song_name.clone()))
                .field("artist", Value::Str(tag.artist.clone()))
                .field("album", Value::Str(tag.album.clone()))
                .field("year", Value::Str(tag.year.clone()))
                .field("comment", Value::Str(tag.comment.clone()))
                .field("genre", Value::U64(tag.genre.into()));
            records.push(rec);
        }

        records
    }

    fn extract_streams(&self) -> Result<Vec<ExtractedStream>> {
        // Decoding to PCM needs a full MPEG audio decoder; the binary wires
        // one up around this parser.
        Ok(Vec::new())
    }
}
