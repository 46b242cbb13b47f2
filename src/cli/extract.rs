use std::path::Path;

use anyhow::{Context, Result, bail};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{error, info, warn};

use super::command::{Cli, ExtractArgs};
use crate::input::load_input;
use crate::output::{output_base, write_artifact};
use crate::pcm;
use mediafmt::parser::{Container, FormatParser, StreamKind};
use mediafmt::render;

pub fn cmd_extract(args: &ExtractArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    if let Some(dir) = &args.output_path {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;
    }

    let pb = match multi {
        Some(multi) => {
            let pb = multi.add(ProgressBar::new(args.inputs.len() as u64));
            pb.set_style(ProgressStyle::with_template(
                "{bar:40.green} {pos}/{len} {msg}",
            )?);
            Some(pb)
        }
        None => None,
    };

    let mut failed = 0usize;
    for input in &args.inputs {
        if let Some(pb) = &pb {
            pb.set_message(input.display().to_string());
        }

        if let Err(e) = extract_one(input, args, cli.strict) {
            if cli.strict {
                return Err(e);
            }
            error!("{}: {e:#}", input.display());
            failed += 1;
        }

        if let Some(pb) = &pb {
            pb.inc(1);
        }
    }

    if let Some(pb) = &pb {
        pb.finish_and_clear();
    }

    if failed > 0 {
        bail!("{failed} of {} inputs failed", args.inputs.len());
    }
    Ok(())
}

fn extract_one(input: &Path, args: &ExtractArgs, strict: bool) -> Result<()> {
    info!("extracting from {}", input.display());

    let (container, data) = load_input(input, args.format.container())?;
    let mut parser = container.parser(data);
    parser.parse()?;

    let base = output_base(input, args.output_path.as_deref());

    // Once the structural parse succeeded the file counts as handled; dump
    // writing, stream extraction and PCM decoding are best-effort and only
    // fail the run under --strict.
    if let Err(e) = write_outputs(&*parser, &base) {
        if strict {
            return Err(e);
        }
        warn!("{}: output stage failed: {e:#}", input.display());
    }

    // MP3 sample data goes through an actual decoder rather than a re-framing
    // pass, so it is handled outside the structural parser.
    if container == Container::Mp3 && !args.no_decode {
        if let Err(e) = decode_to_pcm_file(input, &base) {
            if strict {
                return Err(e);
            }
            warn!("{}: PCM decode failed: {e:#}", input.display());
        }
    }

    Ok(())
}

fn write_outputs(parser: &dyn FormatParser, base: &Path) -> Result<()> {
    write_artifact(base, "txt", render::render(&parser.records()).as_bytes())?;

    for stream in parser.extract_streams()? {
        let path = write_artifact(base, stream.kind.extension(), &stream.data)?;
        if stream.kind == StreamKind::Pcm {
            if let Some(hint) = parser.playback_hint(&path.display().to_string()) {
                info!("play with: {hint}");
            }
        }
    }
    Ok(())
}

fn decode_to_pcm_file(input: &Path, base: &Path) -> Result<()> {
    let decoded = pcm::decode_to_pcm(input)?;
    let path = write_artifact(base, StreamKind::Pcm.extension(), &decoded.data)?;
    info!("play with: {}", decoded.ffplay_command(&path.display().to_string()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::command::FormatArg;

    fn sample_wav() -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(b"fmt ");
        body.extend_from_slice(&16u32.to_le_bytes());
        body.extend_from_slice(&1u16.to_le_bytes()); // PCM
        body.extend_from_slice(&1u16.to_le_bytes()); // mono
        body.extend_from_slice(&8000u32.to_le_bytes());
        body.extend_from_slice(&16000u32.to_le_bytes());
        body.extend_from_slice(&2u16.to_le_bytes());
        body.extend_from_slice(&16u16.to_le_bytes());
        body.extend_from_slice(b"data");
        body.extend_from_slice(&4u32.to_le_bytes());
        body.extend_from_slice(&[1, 2, 3, 4]);

        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&((body.len() + 4) as u32).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn output_failure_is_best_effort_unless_strict() {
        let dir = std::env::temp_dir().join("mediainspect-extract-test");
        std::fs::create_dir_all(&dir).unwrap();
        let input = dir.join("tone.wav");
        std::fs::write(&input, sample_wav()).unwrap();

        // An output "directory" that is actually a file makes every artifact
        // write fail while the parse itself succeeds.
        let blocked = dir.join("blocked");
        std::fs::write(&blocked, b"x").unwrap();

        let args = ExtractArgs {
            inputs: vec![input.clone()],
            output_path: Some(blocked),
            format: FormatArg::Auto,
            no_decode: true,
        };

        assert!(extract_one(&input, &args, false).is_ok());
        assert!(extract_one(&input, &args, true).is_err());
    }
}
