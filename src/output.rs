use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;

/// Output stem for `input`: the same file name, optionally relocated into the
/// requested output directory. Artifact extensions replace the input's.
pub fn output_base(input: &Path, output_dir: Option<&Path>) -> PathBuf {
    match (output_dir, input.file_name()) {
        (Some(dir), Some(name)) => dir.join(name),
        _ => input.to_path_buf(),
    }
}

pub fn path_with_extension(base: &Path, ext: &str) -> PathBuf {
    let mut path = base.to_path_buf();
    path.set_extension(ext);
    path
}

/// Writes one output artifact and logs where it went.
pub fn write_artifact(base: &Path, ext: &str, bytes: &[u8]) -> Result<PathBuf> {
    let path = path_with_extension(base, ext);
    fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
    info!("wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_keeps_input_path_without_output_dir() {
        let base = output_base(Path::new("clips/a.flv"), None);
        assert_eq!(base, PathBuf::from("clips/a.flv"));
        assert_eq!(
            path_with_extension(&base, "h264"),
            PathBuf::from("clips/a.h264")
        );
    }

    #[test]
    fn base_relocates_into_output_dir() {
        let base = output_base(Path::new("clips/a.flv"), Some(Path::new("out")));
        assert_eq!(base, PathBuf::from("out/a.flv"));
        assert_eq!(path_with_extension(&base, "txt"), PathBuf::from("out/a.txt"));
    }
}
