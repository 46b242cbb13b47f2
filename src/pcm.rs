//! MP3 decoding to interleaved 16-bit PCM via Symphonia.
//!
//! The structural MP3 parse never touches sample data; turning frames into
//! playable audio is delegated to Symphonia's decoder here.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use log::{debug, warn};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Interleaved signed 16-bit little-endian samples plus the layout needed to
/// play them back.
pub struct DecodedPcm {
    pub sample_rate: u32,
    pub channels: usize,
    pub data: Vec<u8>,
}

impl DecodedPcm {
    /// Suggested playback command for the written `.pcm` file.
    pub fn ffplay_command(&self, pcm_name: &str) -> String {
        format!(
            "ffplay -autoexit -f s16le -ar {} -ac {} {pcm_name}",
            self.sample_rate, self.channels
        )
    }
}

/// Decodes the default audio track of `path` to s16le samples.
pub fn decode_to_pcm(path: &Path) -> Result<DecodedPcm> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .context("probing input for a decodable stream")?;
    let mut reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| anyhow!("no decodable audio track found"))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .context("building decoder for the selected track")?;

    let mut sample_buffer: Option<SampleBuffer<i16>> = None;
    let mut data = Vec::new();
    let mut sample_rate = codec_params.sample_rate.unwrap_or(0);
    let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(0);

    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e).context("reading next packet"),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("skipping undecodable packet: {e}");
                continue;
            }
            Err(e) => return Err(e).context("decoding packet"),
        };

        let spec = *decoded.spec();
        sample_rate = spec.rate;
        channels = spec.channels.count();

        let capacity = decoded.capacity() as u64;
        let buf =
            sample_buffer.get_or_insert_with(|| SampleBuffer::<i16>::new(capacity, spec));
        buf.copy_interleaved_ref(decoded);
        for sample in buf.samples() {
            data.extend_from_slice(&sample.to_le_bytes());
        }
    }

    debug!("decoded {} bytes of s16le samples", data.len());
    Ok(DecodedPcm {
        sample_rate,
        channels,
        data,
    })
}
