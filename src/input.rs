use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, bail};

use mediafmt::errors::AllocError;
use mediafmt::parser::Container;

/// Loads one input file fully into memory and identifies its container,
/// from the file extension unless a format override is given.
pub fn load_input(path: &Path, forced: Option<Container>) -> Result<(Container, Vec<u8>)> {
    let container = match forced.or_else(|| Container::from_path(path)) {
        Some(container) => container,
        None => bail!("unsupported file extension: {}", path.display()),
    };

    let mut file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let expected = file.metadata().map(|m| m.len() as usize).unwrap_or(0);

    let mut data = Vec::new();
    data.try_reserve_exact(expected).map_err(|source| AllocError {
        bytes: expected,
        source,
    })?;
    file.read_to_end(&mut data)
        .with_context(|| format!("reading {}", path.display()))?;

    Ok((container, data))
}
