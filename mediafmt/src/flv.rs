//! FLV tag-stream parser and elementary-stream extraction.
//!
//! The body is a sequence of (previous-tag-size, tag-header, payload)
//! triples. Audio and video payloads are retained as ranges into the file
//! buffer; script payloads are decoded as AMF. Extraction re-frames AVC
//! video into an Annex-B byte stream and AAC audio into ADTS frames, both
//! driven by configuration records that appear once near the head of the
//! stream.

use std::ops::Range;

use anyhow::{Result, bail};
use bitstream_io::{BigEndian, BitWrite, BitWriter};
use log::warn;

use crate::errors::FlvError;
use crate::parser::{ExtractedStream, FormatParser, StreamKind};
use crate::reader::SliceReader;
use crate::render::{Record, Value};

pub const TAG_AUDIO: u8 = 8;
pub const TAG_VIDEO: u8 = 9;
pub const TAG_SCRIPT: u8 = 18;

/// Sound format code for AAC in the audio tag's first byte.
pub const SOUND_FORMAT_AAC: u8 = 10;
/// Codec id for AVC/H.264 in the video tag's first byte.
pub const CODEC_AVC: u8 = 7;

const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

#[derive(Debug, Clone)]
pub struct FlvHeader {
    pub version: u8,
    pub has_audio: bool,
    pub has_video: bool,
    pub header_size: u32,
}

#[derive(Debug, Clone)]
pub struct TagHeader {
    pub tag_type: u8,
    pub data_size: u32,
    pub timestamp: u32,
    pub timestamp_extended: u8,
    pub stream_id: u32,
}

impl TagHeader {
    fn type_name(&self) -> &'static str {
        match self.tag_type {
            TAG_AUDIO => "audio",
            TAG_VIDEO => "video",
            TAG_SCRIPT => "script",
            _ => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AmfValue {
    Number(f64),
    Boolean(bool),
    String(String),
}

#[derive(Debug, Clone)]
pub struct ScriptData {
    pub name: String,
    pub entries: Vec<(String, AmfValue)>,
}

#[derive(Debug, Clone)]
pub struct AudioData {
    pub sound_format: u8,
    pub sound_rate: u8,
    pub sound_size: u8,
    pub sound_type: u8,
    /// Payload after the sound-spec byte, as a range into the file buffer.
    pub body: Range<usize>,
}

#[derive(Debug, Clone)]
pub struct VideoData {
    pub frame_type: u8,
    pub codec_id: u8,
    /// Payload after the frame/codec byte.
    pub body: Range<usize>,
}

#[derive(Debug, Clone)]
pub enum TagPayload {
    Audio(AudioData),
    Video(VideoData),
    Script(ScriptData),
    /// Unknown tag type or a payload that failed to decode.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct Tag {
    pub prev_tag_size: u32,
    pub header: TagHeader,
    pub payload: TagPayload,
}

pub struct FlvParser {
    data: Vec<u8>,
    header: Option<FlvHeader>,
    tags: Vec<Tag>,
    trailing_prev_tag_size: Option<u32>,
}

impl FlvParser {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            header: None,
            tags: Vec::new(),
            trailing_prev_tag_size: None,
        }
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    fn parse_script(payload: &[u8]) -> Result<ScriptData> {
        let mut r = SliceReader::new(payload);

        let amf1_type = r.read_u8()?;
        if amf1_type != 2 {
            bail!(FlvError::ScriptAmf1NotString(amf1_type));
        }
        let name_len = r.read_u16_be()?;
        let name = String::from_utf8_lossy(r.read_bytes(name_len as usize)?).into_owned();
        if name != "onMetaData" {
            bail!(FlvError::ScriptNotOnMetaData(name));
        }

        let amf2_type = r.read_u8()?;
        if amf2_type != 8 {
            bail!(FlvError::ScriptAmf2NotArray(amf2_type));
        }
        let count = r.read_u32_be()?;

        let mut entries = Vec::new();
        for _ in 0..count {
            let key_len = r.read_u16_be()?;
            let key = String::from_utf8_lossy(r.read_bytes(key_len as usize)?).into_owned();
            let value_type = r.read_u8()?;
            let value = match value_type {
                0 => AmfValue::Number(r.read_f64_be()?),
                1 => AmfValue::Boolean(r.read_u8()? != 0),
                2 => {
                    let len = r.read_u16_be()?;
                    AmfValue::String(String::from_utf8_lossy(r.read_bytes(len as usize)?).into_owned())
                }
                other => bail!(FlvError::UnsupportedAmfValueType(other)),
            };
            entries.push((key, value));
        }

        Ok(ScriptData { name, entries })
    }

    fn parse_payload(&self, header: &TagHeader, range: Range<usize>) -> TagPayload {
        let payload = &self.data[range.clone()];
        match header.tag_type {
            TAG_AUDIO if !payload.is_empty() => {
                let byte1 = payload[0];
                TagPayload::Audio(AudioData {
                    sound_format: byte1 >> 4,
                    sound_rate: (byte1 >> 2) & 0x3,
                    sound_size: (byte1 >> 1) & 0x1,
                    sound_type: byte1 & 0x1,
                    body: range.start + 1..range.end,
                })
            }
            TAG_VIDEO if !payload.is_empty() => {
                let byte1 = payload[0];
                TagPayload::Video(VideoData {
                    frame_type: byte1 >> 4,
                    codec_id: byte1 & 0xF,
                    body: range.start + 1..range.end,
                })
            }
            TAG_SCRIPT => match Self::parse_script(payload) {
                Ok(script) => TagPayload::Script(script),
                // A script tag we cannot decode must not stop the walk.
                Err(err) => {
                    warn!("script tag skipped: {err:#}");
                    TagPayload::Skipped
                }
            },
            _ => TagPayload::Skipped,
        }
    }

    fn extract_h264(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut nal_len_size: Option<usize> = None;

        for tag in &self.tags {
            let TagPayload::Video(video) = &tag.payload else {
                continue;
            };
            if video.codec_id != CODEC_AVC || video.body.is_empty() {
                continue;
            }
            if let Err(err) = self.reframe_avc_payload(video, &mut nal_len_size, &mut out) {
                warn!("video tag at offset {} skipped: {err:#}", video.body.start);
            }
        }
        Ok(out)
    }

    /// One AVC packet: a configuration record (packet type 0) contributes its
    /// SPS/PPS sets and latches the NAL length-prefix width; a raw frame
    /// (packet type 1) contributes one length-prefixed NAL unit.
    fn reframe_avc_payload(
        &self,
        video: &VideoData,
        nal_len_size: &mut Option<usize>,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let body = &self.data[video.body.clone()];
        let mut r = SliceReader::new(body);
        let packet_type = r.read_u8()?;
        r.skip(3)?; // composition time offset

        match packet_type {
            0 => {
                // AVCDecoderConfigurationRecord: version, profile,
                // compatibility, level, then the length-size byte.
                r.skip(4)?;
                *nal_len_size = Some((r.read_u8()? & 0x03) as usize + 1);

                let sps_count = r.read_u8()? & 0x1F;
                for _ in 0..sps_count {
                    let len = r.read_u16_be()?;
                    out.extend_from_slice(&START_CODE);
                    out.extend_from_slice(r.read_bytes(len as usize)?);
                }
                let pps_count = r.read_u8()?;
                for _ in 0..pps_count {
                    let len = r.read_u16_be()?;
                    out.extend_from_slice(&START_CODE);
                    out.extend_from_slice(r.read_bytes(len as usize)?);
                }
            }
            1 => {
                let Some(width) = *nal_len_size else {
                    bail!(FlvError::MissingAvcConfiguration);
                };
                let len = r.read_uint_be(width)?;
                out.extend_from_slice(&START_CODE);
                out.extend_from_slice(r.read_bytes(len as usize)?);
            }
            // End-of-sequence and anything newer carry no NAL data.
            _ => {}
        }
        Ok(())
    }

    fn extract_aac(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut config: Option<AacConfig> = None;

        for tag in &self.tags {
            let TagPayload::Audio(audio) = &tag.payload else {
                continue;
            };
            if audio.sound_format != SOUND_FORMAT_AAC || audio.body.is_empty() {
                continue;
            }
            if let Err(err) = self.reframe_aac_payload(audio, &mut config, &mut out) {
                warn!("audio tag at offset {} skipped: {err:#}", audio.body.start);
            }
        }
        Ok(out)
    }

    fn reframe_aac_payload(
        &self,
        audio: &AudioData,
        config: &mut Option<AacConfig>,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let body = &self.data[audio.body.clone()];
        let mut r = SliceReader::new(body);
        let packet_type = r.read_u8()?;

        match packet_type {
            0 => {
                // AudioSpecificConfig: 5-bit object type, 4-bit sample-rate
                // index, 4-bit channel configuration.
                let b1 = r.read_u8()?;
                let b2 = r.read_u8()?;
                *config = Some(AacConfig {
                    profile: ((b1 & 0xF8) >> 3).saturating_sub(1),
                    sample_rate_index: ((b1 & 0x07) << 1) | (b2 >> 7),
                    channel_config: (b2 >> 3) & 0x0F,
                });
            }
            1 => {
                let Some(config) = config else {
                    bail!(FlvError::MissingAacConfiguration);
                };
                let payload = r.read_bytes(r.remaining())?;
                out.extend_from_slice(&config.adts_header(payload.len())?);
                out.extend_from_slice(payload);
            }
            _ => {}
        }
        Ok(())
    }
}

/// Decoder parameters cached from the AAC configuration record.
#[derive(Debug, Clone, Copy)]
pub struct AacConfig {
    pub profile: u8,
    pub sample_rate_index: u8,
    pub channel_config: u8,
}

impl AacConfig {
    /// The 7-byte ADTS header framing one raw AAC payload. Raw AAC carries
    /// no sync or size of its own, so every frame gets one.
    pub fn adts_header(&self, payload_len: usize) -> Result<Vec<u8>> {
        let mut w = BitWriter::endian(Vec::with_capacity(7), BigEndian);
        w.write_var(12, 0xFFFu16)?; // syncword
        w.write_var(1, 0u8)?; // MPEG-4
        w.write_var(2, 0u8)?; // layer
        w.write_var(1, 1u8)?; // no CRC
        w.write_var(2, self.profile & 0x3)?;
        w.write_var(4, self.sample_rate_index & 0xF)?;
        w.write_var(1, 0u8)?; // private
        w.write_var(3, self.channel_config & 0x7)?;
        w.write_var(4, 0u8)?; // original, home, copyright id, copyright start
        w.write_var(13, (7 + payload_len) as u16)?;
        w.write_var(11, 0x7FFu16)?; // buffer fullness: VBR
        w.write_var(2, 0u8)?; // raw blocks minus one
        Ok(w.into_writer())
    }
}

impl FormatParser for FlvParser {
    fn parse(&mut self) -> Result<()> {
        let mut r = SliceReader::new(&self.data);
        let signature = [r.read_u8()?, r.read_u8()?, r.read_u8()?];
        if &signature != b"FLV" {
            bail!(FlvError::BadSignature(signature));
        }
        let version = r.read_u8()?;
        let flags = r.read_u8()?;
        let header_size = r.read_u32_be()?;
        let header = FlvHeader {
            version,
            has_audio: flags & 0x04 != 0,
            has_video: flags & 0x01 != 0,
            header_size,
        };

        let mut tags = Vec::new();
        let mut trailing = None;
        loop {
            if r.remaining() < 4 {
                break;
            }
            let prev_tag_size = r.read_u32_be()?;
            if r.remaining() < 11 {
                trailing = Some(prev_tag_size);
                break;
            }

            let tag_type = r.read_u8()?;
            let data_size = r.read_u24_be()?;
            let timestamp = r.read_u24_be()?;
            let timestamp_extended = r.read_u8()?;
            let stream_id = r.read_u24_be()?;
            if data_size as usize > r.remaining() {
                warn!("tag payload of {data_size} bytes overruns the buffer, stopping");
                trailing = Some(prev_tag_size);
                break;
            }

            let tag_header = TagHeader {
                tag_type,
                data_size,
                timestamp,
                timestamp_extended,
                stream_id,
            };
            let range = r.position()..r.position() + data_size as usize;
            let payload = self.parse_payload(&tag_header, range.clone());
            tags.push(Tag {
                prev_tag_size,
                header: tag_header,
                payload,
            });

            // The payload size is authoritative even when decoding failed;
            // the next tag starts right after it.
            r.seek_to(range.end);
        }

        self.header = Some(header);
        self.tags = tags;
        self.trailing_prev_tag_size = trailing;
        Ok(())
    }

    fn records(&self) -> Vec<Record> {
        let mut records = Vec::new();

        if let Some(header) = &self.header {
            let mut rec = Record::new("flv header");
            rec.field("signature", Value::Str("FLV".to_string()))
                .field("version", Value::U64(header.version.into()))
                .field("hasAudio", Value::Bool(header.has_audio))
                .field("hasVideo", Value::Bool(header.has_video))
                .field("headerSize", Value::U64(header.header_size.into()));
            records.push(rec);
        }

        for tag in &self.tags {
            let mut rec = Record::new("flv tag");
            rec.field("previousTagSize", Value::U64(tag.prev_tag_size.into()))
                .field(
                    "type",
                    Value::Str(format!("{} ({})", tag.header.tag_type, tag.header.type_name())),
                )
                .field("dataSize", Value::U64(tag.header.data_size.into()))
                .field("timestamp", Value::U64(tag.header.timestamp.into()))
                .field(
                    "timestampExtended",
                    Value::U64(tag.header.timestamp_extended.into()),
                )
                .field("streamId", Value::U64(tag.header.stream_id.into()));

            match &tag.payload {
                TagPayload::Audio(audio) => {
                    let mut child = Record::new("audio tag data");
                    child
                        .field("soundFormat", Value::U64(audio.sound_format.into()))
                        .field("soundRate", Value::U64(audio.sound_rate.into()))
                        .field("soundSize", Value::U64(audio.sound_size.into()))
                        .field("soundType", Value::U64(audio.sound_type.into()))
                        .field("data", Value::Bytes(audio.body.len()));
                    rec.child(child);
                }
                TagPayload::Video(video) => {
                    let mut child = Record::new("video tag data");
                    child
                        .field("frameType", Value::U64(video.frame_type.into()))
                        .field("codecId", Value::U64(video.codec_id.into()))
                        .field("data", Value::Bytes(video.body.len()));
                    rec.child(child);
                }
                TagPayload::Script(script) => {
                    let mut child = Record::new("script tag data");
                    child.field("name", Value::Str(script.name.clone()));
                    for (key, value) in &script.entries {
                        let rendered = match value {
                            AmfValue::Number(n) => Value::F64(*n),
                            AmfValue::Boolean(b) => Value::Bool(*b),
                            AmfValue::String(s) => Value::Str(s.clone()),
                        };
                        child.field(key.clone(), rendered);
                    }
                    rec.child(child);
                }
                TagPayload::Skipped => {}
            }
            records.push(rec);
        }

        if let Some(size) = self.trailing_prev_tag_size {
            let mut rec = Record::new("trailing");
            rec.field("previousTagSize", Value::U64(size.into()));
            records.push(rec);
        }

        records
    }

    fn extract_streams(&self) -> Result<Vec<ExtractedStream>> {
        let mut streams = Vec::new();
        let h264 = self.extract_h264()?;
        if !h264.is_empty() {
            streams.push(ExtractedStream {
                kind: StreamKind::H264,
                data: h264,
            });
        }
        let aac = self.extract_aac()?;
        if !aac.is_empty() {
            streams.push(ExtractedStream {
                kind: StreamKind::Aac,
                data: aac,
            });
        }
        Ok(streams)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::render;

    fn flv_file(tags: &[(u8, Vec<u8>)]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"FLV");
        out.push(1);
        out.push(0x05); // audio + video
        out.extend_from_slice(&9u32.to_be_bytes());
        let mut prev_size = 0u32;
        for (tag_type, payload) in tags {
            out.extend_from_slice(&prev_size.to_be_bytes());
            out.push(*tag_type);
            out.extend_from_slice(&(payload.len() as u32).to_be_bytes()[1..]);
            out.extend_from_slice(&[0, 0, 0, 0]); // timestamp + extension
            out.extend_from_slice(&[0, 0, 0]); // stream id
            out.extend_from_slice(payload);
            prev_size = 11 + payload.len() as u32;
        }
        out.extend_from_slice(&prev_size.to_be_bytes());
        out
    }

    fn amf_string(s: &str) -> Vec<u8> {
        let mut out = vec![2];
        out.extend_from_slice(&(s.len() as u16).to_be_bytes());
        out.extend_from_slice(s.as_bytes());
        out
    }

    fn on_meta_data(entries: &[(&str, AmfValue)]) -> Vec<u8> {
        let mut out = amf_string("onMetaData");
        out.push(8);
        out.extend_from_slice(&(entries.len() as u32).to_be_bytes());
        for (key, value) in entries {
            out.extend_from_slice(&(key.len() as u16).to_be_bytes());
            out.extend_from_slice(key.as_bytes());
            match value {
                AmfValue::Number(n) => {
                    out.push(0);
                    out.extend_from_slice(&n.to_be_bytes());
                }
                AmfValue::Boolean(b) => {
                    out.push(1);
                    out.push(*b as u8);
                }
                AmfValue::String(s) => {
                    out.push(2);
                    out.extend_from_slice(&(s.len() as u16).to_be_bytes());
                    out.extend_from_slice(s.as_bytes());
                }
            }
        }
        out
    }

    fn avc_config(sps: &[u8], pps: &[u8], len_size: u8) -> Vec<u8> {
        let mut payload = vec![0x17, 0x00, 0, 0, 0]; // keyframe AVC, packet type 0, CTS
        payload.extend_from_slice(&[1, 0x64, 0x00, 0x1F]); // config record prefix
        payload.push(0xFC | (len_size - 1));
        payload.push(0xE1); // one SPS
        payload.extend_from_slice(&(sps.len() as u16).to_be_bytes());
        payload.extend_from_slice(sps);
        payload.push(1); // one PPS
        payload.extend_from_slice(&(pps.len() as u16).to_be_bytes());
        payload.extend_from_slice(pps);
        payload
    }

    fn avc_frame(nal: &[u8]) -> Vec<u8> {
        let mut payload = vec![0x27, 0x01, 0, 0, 0]; // inter frame AVC, packet type 1, CTS
        payload.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        payload.extend_from_slice(nal);
        payload
    }

    #[test]
    fn bad_signature_is_fatal() {
        let mut parser = FlvParser::new(b"FLX\x01\x05\x00\x00\x00\x09".to_vec());
        let err = parser.parse().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FlvError>(),
            Some(FlvError::BadSignature(_))
        ));
    }

    #[test]
    fn script_duration_renders_three_decimals() {
        let file = flv_file(&[(
            TAG_SCRIPT,
            on_meta_data(&[
                ("duration", AmfValue::Number(12.5)),
                ("stereo", AmfValue::Boolean(true)),
                ("encoder", AmfValue::String("test".to_string())),
            ]),
        )]);

        let mut parser = FlvParser::new(file);
        parser.parse().unwrap();

        let text = render(&parser.records());
        assert!(text.contains("duration: 12.500"), "dump was:\n{text}");
        assert!(text.contains("stereo: true"));
        assert!(text.contains("encoder: test"));
    }

    #[test]
    fn non_metadata_script_is_skipped_not_fatal() {
        let file = flv_file(&[
            (TAG_SCRIPT, amf_string("onCuePoint")),
            (TAG_VIDEO, avc_config(&[0x67, 0x64], &[0x68, 0xEE], 4)),
        ]);

        let mut parser = FlvParser::new(file);
        parser.parse().unwrap();
        assert_eq!(parser.tags().len(), 2);
        assert!(matches!(parser.tags()[0].payload, TagPayload::Skipped));
        assert!(matches!(parser.tags()[1].payload, TagPayload::Video(_)));
    }

    #[test]
    fn avc_reframed_to_annex_b() {
        let sps = [0x67, 0x64, 0x00, 0x1F];
        let pps = [0x68, 0xEE, 0x3C];
        let nal1 = [0x41, 0xAA, 0xBB, 0xCC, 0xDD];
        let nal2 = [0x41, 0x11, 0x22];
        let file = flv_file(&[
            (TAG_VIDEO, avc_config(&sps, &pps, 4)),
            (TAG_VIDEO, avc_frame(&nal1)),
            (TAG_VIDEO, avc_frame(&nal2)),
        ]);

        let mut parser = FlvParser::new(file);
        parser.parse().unwrap();
        let streams = parser.extract_streams().unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].kind, StreamKind::H264);

        let out = &streams[0].data;
        let mut expected = Vec::new();
        for nal in [&sps[..], &pps[..], &nal1[..], &nal2[..]] {
            expected.extend_from_slice(&START_CODE);
            expected.extend_from_slice(nal);
        }
        assert_eq!(out, &expected);

        let start_codes = out.windows(4).filter(|w| *w == START_CODE).count();
        assert_eq!(start_codes, 4);
    }

    #[test]
    fn raw_frame_without_config_is_skipped() {
        let file = flv_file(&[(TAG_VIDEO, avc_frame(&[0x41, 0x01]))]);
        let mut parser = FlvParser::new(file);
        parser.parse().unwrap();
        assert!(parser.extract_streams().unwrap().is_empty());
    }

    #[test]
    fn aac_reframed_with_adts_headers() {
        // AudioSpecificConfig: AAC LC (2), 44100 Hz (index 4), stereo.
        let config_payload = vec![0xAF, 0x00, 0x12, 0x10];
        let raw = [0x21, 0x43, 0x65, 0x87];
        let mut raw_payload = vec![0xAF, 0x01];
        raw_payload.extend_from_slice(&raw);

        let file = flv_file(&[(TAG_AUDIO, config_payload), (TAG_AUDIO, raw_payload)]);
        let mut parser = FlvParser::new(file);
        parser.parse().unwrap();

        let streams = parser.extract_streams().unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].kind, StreamKind::Aac);

        let out = &streams[0].data;
        assert_eq!(out.len(), 7 + raw.len());
        // Syncword plus MPEG-4, layer 0, no CRC.
        assert_eq!(out[0], 0xFF);
        assert_eq!(out[1], 0xF1);
        // Profile 1 (LC minus one), sample-rate index 4.
        assert_eq!(out[2] >> 6, 1);
        assert_eq!((out[2] >> 2) & 0xF, 4);
        // Channel configuration 2.
        assert_eq!(((out[2] & 0x1) << 2) | (out[3] >> 6), 2);
        // 13-bit frame length covers header plus payload.
        let frame_len =
            ((out[3] as u16 & 0x03) << 11) | ((out[4] as u16) << 3) | (out[5] as u16 >> 5);
        assert_eq!(frame_len, 7 + raw.len() as u16);
        assert_eq!(&out[7..], &raw);
    }

    #[test]
    fn adts_header_is_idempotent() {
        let config = AacConfig {
            profile: 1,
            sample_rate_index: 4,
            channel_config: 2,
        };
        let first = config.adts_header(128).unwrap();
        assert_eq!(first.len(), 7);
        for _ in 0..3 {
            assert_eq!(config.adts_header(128).unwrap(), first);
        }
        assert_ne!(config.adts_header(129).unwrap(), first);
    }

    #[test]
    fn truncated_tag_keeps_earlier_tags() {
        let mut file = flv_file(&[(TAG_AUDIO, vec![0xAF, 0x00, 0x12, 0x10])]);
        // A tag header declaring more payload than remains.
        file.extend_from_slice(&15u32.to_be_bytes());
        file.extend_from_slice(&[TAG_AUDIO, 0xFF, 0xFF, 0xFF]);
        file.extend_from_slice(&[0; 7]);

        let mut parser = FlvParser::new(file);
        parser.parse().unwrap();
        assert_eq!(parser.tags().len(), 1);
    }
}
