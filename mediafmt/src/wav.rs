//! WAV (RIFF) chunk parser.
//!
//! Walks the flat chunk sequence: a 12-byte RIFF/WAVE header, then
//! (id, little-endian size, payload) chunks until the `data` chunk is
//! consumed. Only `fmt `, `fact` and `data` are decoded; other ids are
//! skipped by their declared size. Sample bytes are copied out of the file
//! buffer so extraction can hand them over verbatim.

use anyhow::{Result, bail};
use log::{debug, warn};

use crate::errors::{AllocError, WavError};
use crate::parser::{ExtractedStream, FormatParser, StreamKind};
use crate::reader::SliceReader;
use crate::render::{Record, Value};

pub const WAVE_FORMAT_PCM: u16 = 0x0001;
pub const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
pub const WAVE_FORMAT_ALAW: u16 = 0x0006;
pub const WAVE_FORMAT_MULAW: u16 = 0x0007;
/// True codec lives in the format extension's sub-format field.
pub const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

fn format_name(format: u16) -> &'static str {
    match format {
        WAVE_FORMAT_PCM => "PCM",
        WAVE_FORMAT_IEEE_FLOAT => "IEEE_FLOAT",
        WAVE_FORMAT_ALAW => "ALAW",
        WAVE_FORMAT_MULAW => "MULAW",
        WAVE_FORMAT_EXTENSIBLE => "EXTENSIBLE",
        _ => "UNKNOWN",
    }
}

#[derive(Debug, Clone)]
pub struct HeaderChunk {
    pub size: u32,
}

#[derive(Debug, Clone)]
pub struct FormatChunk {
    pub size: u32,
    pub audio_format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub extension: Option<FormatExtension>,
}

/// Extension fields present when the declared `fmt ` size exceeds 16 and the
/// extension size is nonzero.
#[derive(Debug, Clone)]
pub struct FormatExtension {
    pub valid_bits_per_sample: u16,
    pub channel_mask: u32,
    pub sub_format: [u8; 16],
}

impl FormatChunk {
    /// Codec and bit depth with the extensible indirection resolved.
    fn effective_format(&self) -> (u16, u16) {
        if self.audio_format == WAVE_FORMAT_EXTENSIBLE {
            if let Some(ext) = &self.extension {
                let sub = u16::from_le_bytes([ext.sub_format[0], ext.sub_format[1]]);
                return (sub, ext.valid_bits_per_sample);
            }
        }
        (self.audio_format, self.bits_per_sample)
    }

    /// ffplay `-f` token for the raw sample data, when one exists.
    pub fn pcm_format_token(&self) -> Option<&'static str> {
        let (format, bit_depth) = self.effective_format();
        match (format, bit_depth) {
            (WAVE_FORMAT_PCM, 8) => Some("u8"),
            (WAVE_FORMAT_PCM, 16) => Some("s16le"),
            (WAVE_FORMAT_PCM, 32) => Some("s32le"),
            (WAVE_FORMAT_PCM, 64) => Some("s64le"),
            (WAVE_FORMAT_IEEE_FLOAT, 32) => Some("f32le"),
            (WAVE_FORMAT_IEEE_FLOAT, 64) => Some("f64le"),
            (WAVE_FORMAT_ALAW, _) => Some("alaw"),
            (WAVE_FORMAT_MULAW, _) => Some("mulaw"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FactChunk {
    pub size: u32,
    pub sample_length: u32,
}

#[derive(Debug, Clone)]
pub struct DataChunk {
    pub size: u32,
    pub data: Vec<u8>,
    pub pad_byte: Option<u8>,
}

pub struct WavParser {
    data: Vec<u8>,
    header: Option<HeaderChunk>,
    format: Option<FormatChunk>,
    fact: Option<FactChunk>,
    data_chunk: Option<DataChunk>,
}

impl WavParser {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            header: None,
            format: None,
            fact: None,
            data_chunk: None,
        }
    }

    pub fn format_chunk(&self) -> Option<&FormatChunk> {
        self.format.as_ref()
    }

    pub fn data_chunk(&self) -> Option<&DataChunk> {
        self.data_chunk.as_ref()
    }

    /// Suggested playback command for the extracted `.pcm` file.
    pub fn ffplay_command(&self, pcm_name: &str) -> Option<String> {
        let format = self.format.as_ref()?;
        let token = format.pcm_format_token()?;
        Some(format!(
            "ffplay -autoexit -f {token} -ar {} -ac {} {pcm_name}",
            format.sample_rate, format.channels
        ))
    }

    fn parse_header(&self, r: &mut SliceReader) -> Result<HeaderChunk> {
        let id = r.read_tag()?;
        if &id != b"RIFF" {
            bail!(WavError::BadRiffId(id));
        }
        let size = r.read_u32_le()?;
        let tag = r.read_tag()?;
        if &tag != b"WAVE" {
            bail!(WavError::BadWaveTag(tag));
        }
        Ok(HeaderChunk { size })
    }

    fn parse_format(&self, r: &mut SliceReader, size: u32) -> Result<FormatChunk> {
        let audio_format = r.read_u16_le()?;
        let channels = r.read_u16_le()?;
        let sample_rate = r.read_u32_le()?;
        let byte_rate = r.read_u32_le()?;
        let block_align = r.read_u16_le()?;
        let bits_per_sample = r.read_u16_le()?;

        let mut extension = None;
        if size > 16 {
            let extension_size = r.read_u16_le()?;
            if extension_size > 0 {
                let valid_bits_per_sample = r.read_u16_le()?;
                let channel_mask = r.read_u32_le()?;
                let mut sub_format = [0u8; 16];
                sub_format.copy_from_slice(r.read_bytes(16)?);
                extension = Some(FormatExtension {
                    valid_bits_per_sample,
                    channel_mask,
                    sub_format,
                });
            }
        }

        Ok(FormatChunk {
            size,
            audio_format,
            channels,
            sample_rate,
            byte_rate,
            block_align,
            bits_per_sample,
            extension,
        })
    }

    fn parse_data(&self, r: &mut SliceReader, size: u32) -> Result<DataChunk> {
        let payload = r.read_bytes(size as usize)?;
        let mut data = Vec::new();
        data.try_reserve_exact(payload.len())
            .map_err(|source| AllocError {
                bytes: payload.len(),
                source,
            })?;
        data.extend_from_slice(payload);

        // RIFF word alignment: odd-sized payloads carry one pad byte, which
        // may be missing when the chunk ends the file.
        let pad_byte = if size % 2 == 1 {
            r.read_u8().ok()
        } else {
            None
        };

        Ok(DataChunk {
            size,
            data,
            pad_byte,
        })
    }
}

impl FormatParser for WavParser {
    fn parse(&mut self) -> Result<()> {
        let mut r = SliceReader::new(&self.data);
        let header = self.parse_header(&mut r)?;

        // Chunks past the RIFF-declared end are not part of the file.
        let bound = (header.size as usize + 8).min(self.data.len());
        let mut r = SliceReader::with_window(&self.data, r.position(), bound);

        let mut format = None;
        let mut fact = None;
        let mut data_chunk = None;

        while r.remaining() >= 8 {
            let id = r.read_tag()?;
            let size = r.read_u32_le()?;
            if size as usize > r.remaining() {
                bail!(WavError::ChunkOverrun {
                    id,
                    declared: size,
                    available: r.remaining(),
                });
            }
            let next = r.position() + size as usize;

            match &id {
                b"fmt " => format = Some(self.parse_format(&mut r, size)?),
                b"fact" => {
                    fact = Some(FactChunk {
                        size,
                        sample_length: r.read_u32_le()?,
                    });
                }
                b"data" => {
                    data_chunk = Some(self.parse_data(&mut r, size)?);
                    break;
                }
                other => {
                    debug!("skipping chunk {} ({size} bytes)", Value::FourCc(*other));
                }
            }
            r.seek_to(next);
        }

        if data_chunk.is_none() {
            warn!("reached end of RIFF payload without a data chunk");
        }

        self.header = Some(header);
        self.format = format;
        self.fact = fact;
        self.data_chunk = data_chunk;
        Ok(())
    }

    fn records(&self) -> Vec<Record> {
        let mut records = Vec::new();

        if let Some(header) = &self.header {
            let mut rec = Record::new("header chunk");
            rec.field("id", Value::FourCc(*b"RIFF"))
                .field("size", Value::U64(header.size.into()))
                .field("type", Value::FourCc(*b"WAVE"));
            records.push(rec);
        }

        if let Some(format) = &self.format {
            let mut rec = Record::new("format chunk");
            rec.field("id", Value::FourCc(*b"fmt "))
                .field("size", Value::U64(format.size.into()))
                .field(
                    "audioFormat",
                    Value::Str(format!(
                        "{} ({})",
                        format.audio_format,
                        format_name(format.audio_format)
                    )),
                )
                .field("channels", Value::U64(format.channels.into()))
                .field("sampleRate", Value::U64(format.sample_rate.into()))
                .field("byteRate", Value::U64(format.byte_rate.into()))
                .field("blockAlign", Value::U64(format.block_align.into()))
                .field("bitsPerSample", Value::U64(format.bits_per_sample.into()));
            if let Some(ext) = &format.extension {
                let sub = u16::from_le_bytes([ext.sub_format[0], ext.sub_format[1]]);
                rec.field(
                    "validBitsPerSample",
                    Value::U64(ext.valid_bits_per_sample.into()),
                )
                .field(
                    "channelMask",
                    Value::Bits {
                        bits: ext.channel_mask,
                        width: 32,
                    },
                )
                .field("subFormat", Value::Str(format_name(sub).to_string()));
            }
            records.push(rec);
        }

        if let Some(fact) = &self.fact {
            let mut rec = Record::new("fact chunk");
            rec.field("id", Value::FourCc(*b"fact"))
                .field("size", Value::U64(fact.size.into()))
                .field("sampleLength", Value::U64(fact.sample_length.into()));
            records.push(rec);
        }

        if let Some(data) = &self.data_chunk {
            let mut rec = Record::new("data chunk");
            rec.field("id", Value::FourCc(*b"data"))
                .field("size", Value::U64(data.size.into()))
                .field("data", Value::Bytes(data.data.len()));
            if let Some(pad) = data.pad_byte {
                rec.field("padByte", Value::U64(pad.into()));
            }
            records.push(rec);
        }

        records
    }

    fn extract_streams(&self) -> Result<Vec<ExtractedStream>> {
        let Some(data) = &self.data_chunk else {
            return Ok(Vec::new());
        };
        Ok(vec![ExtractedStream {
            kind: StreamKind::Pcm,
            data: data.data.clone(),
        }])
    }

    fn playback_hint(&self, output_name: &str) -> Option<String> {
        self.ffplay_command(output_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(id);
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn wav_file(chunks: &[Vec<u8>]) -> Vec<u8> {
        let body: Vec<u8> = chunks.concat();
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&((body.len() + 4) as u32).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(&body);
        out
    }

    fn pcm_fmt(channels: u16, sample_rate: u32, bits: u16) -> Vec<u8> {
        let block_align = channels * bits / 8;
        let byte_rate = sample_rate * block_align as u32;
        let mut payload = Vec::new();
        payload.extend_from_slice(&WAVE_FORMAT_PCM.to_le_bytes());
        payload.extend_from_slice(&channels.to_le_bytes());
        payload.extend_from_slice(&sample_rate.to_le_bytes());
        payload.extend_from_slice(&byte_rate.to_le_bytes());
        payload.extend_from_slice(&block_align.to_le_bytes());
        payload.extend_from_slice(&bits.to_le_bytes());
        chunk(b"fmt ", &payload)
    }

    #[test]
    fn stereo_s16le_scenario() {
        let samples: Vec<u8> = (0u8..8).collect();
        let file = wav_file(&[pcm_fmt(2, 44100, 16), chunk(b"data", &samples)]);

        let mut parser = WavParser::new(file);
        parser.parse().unwrap();

        let streams = parser.extract_streams().unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].kind, StreamKind::Pcm);
        assert_eq!(streams[0].data, samples);

        let format = parser.format_chunk().unwrap();
        assert_eq!(format.pcm_format_token(), Some("s16le"));
        assert_eq!(
            parser.ffplay_command("out.pcm").unwrap(),
            "ffplay -autoexit -f s16le -ar 44100 -ac 2 out.pcm"
        );
    }

    #[test]
    fn odd_data_size_consumes_pad_byte() {
        let mut data = chunk(b"data", &[1, 2, 3]);
        data.push(0); // pad byte after the odd-sized payload
        let file = wav_file(&[pcm_fmt(1, 8000, 8), data]);

        let mut parser = WavParser::new(file);
        parser.parse().unwrap();

        let data = parser.data_chunk().unwrap();
        assert_eq!(data.data, vec![1, 2, 3]);
        assert_eq!(data.pad_byte, Some(0));
    }

    #[test]
    fn odd_data_size_at_eof_keeps_chunk() {
        // Same odd-sized payload, but the file ends without the pad byte.
        let file = wav_file(&[pcm_fmt(1, 8000, 8), chunk(b"data", &[1, 2, 3])]);

        let mut parser = WavParser::new(file);
        parser.parse().unwrap();

        let data = parser.data_chunk().unwrap();
        assert_eq!(data.data, vec![1, 2, 3]);
        assert_eq!(data.pad_byte, None);
    }

    #[test]
    fn undersized_riff_declaration_is_not_fatal() {
        let mut file = wav_file(&[pcm_fmt(1, 8000, 8), chunk(b"data", &[0, 0])]);
        // A declared RIFF size smaller than the header itself leaves no
        // chunk region at all.
        file[4..8].copy_from_slice(&0u32.to_le_bytes());

        let mut parser = WavParser::new(file);
        parser.parse().unwrap();
        assert!(parser.format_chunk().is_none());
        assert!(parser.data_chunk().is_none());
        assert!(parser.extract_streams().unwrap().is_empty());
    }

    #[test]
    fn bad_wave_tag_is_fatal() {
        let mut file = wav_file(&[pcm_fmt(1, 8000, 8), chunk(b"data", &[0, 0])]);
        file[8..12].copy_from_slice(b"AVI ");

        let mut parser = WavParser::new(file);
        let err = parser.parse().unwrap_err();
        assert!(err.downcast_ref::<WavError>().is_some());
        assert!(parser.extract_streams().unwrap().is_empty());
    }

    #[test]
    fn unknown_chunks_are_skipped() {
        let file = wav_file(&[
            chunk(b"LIST", &[0xAA; 10]),
            pcm_fmt(2, 48000, 32),
            chunk(b"data", &[9, 9, 9, 9]),
        ]);

        let mut parser = WavParser::new(file);
        parser.parse().unwrap();
        assert_eq!(parser.format_chunk().unwrap().sample_rate, 48000);
        assert_eq!(parser.data_chunk().unwrap().data, vec![9, 9, 9, 9]);
    }

    #[test]
    fn chunk_overrun_is_fatal() {
        let mut file = wav_file(&[pcm_fmt(1, 8000, 16)]);
        file.extend_from_slice(b"data");
        file.extend_from_slice(&1000u32.to_le_bytes());
        file.extend_from_slice(&[0; 4]);
        // RIFF size field now disagrees too; recompute it so only the chunk
        // overruns.
        let riff_size = (file.len() - 8) as u32;
        file[4..8].copy_from_slice(&riff_size.to_le_bytes());

        let mut parser = WavParser::new(file);
        let err = parser.parse().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WavError>(),
            Some(WavError::ChunkOverrun { .. })
        ));
    }

    #[test]
    fn extensible_sub_format_resolves_token() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&WAVE_FORMAT_EXTENSIBLE.to_le_bytes());
        payload.extend_from_slice(&2u16.to_le_bytes()); // channels
        payload.extend_from_slice(&48000u32.to_le_bytes());
        payload.extend_from_slice(&(48000u32 * 8).to_le_bytes());
        payload.extend_from_slice(&8u16.to_le_bytes()); // block align
        payload.extend_from_slice(&32u16.to_le_bytes()); // container bits
        payload.extend_from_slice(&22u16.to_le_bytes()); // extension size
        payload.extend_from_slice(&32u16.to_le_bytes()); // valid bits
        payload.extend_from_slice(&0x3u32.to_le_bytes()); // channel mask
        let mut sub = [0u8; 16];
        sub[..2].copy_from_slice(&WAVE_FORMAT_IEEE_FLOAT.to_le_bytes());
        payload.extend_from_slice(&sub);

        let file = wav_file(&[chunk(b"fmt ", &payload), chunk(b"data", &[0; 8])]);
        let mut parser = WavParser::new(file);
        parser.parse().unwrap();
        assert_eq!(
            parser.format_chunk().unwrap().pcm_format_token(),
            Some("f32le")
        );
    }
}
