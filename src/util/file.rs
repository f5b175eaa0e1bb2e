use std::{
    fs,
    fs::{DirBuilder, File},
    io::{BufWriter, Write},
    path::Path,
};

use anyhow::{Context, Result};
use tracing::info;

use crate::util::ncompress::{decompress_yay0, YAY0_MAGIC};

/// Creates a buffered writer around a file, creating parent directories.
pub fn buf_writer<P>(path: P) -> Result<BufWriter<File>>
where P: AsRef<Path> {
    if let Some(parent) = path.as_ref().parent() {
        DirBuilder::new().recursive(true).create(parent)?;
    }
    let file = File::create(&path)
        .with_context(|| format!("Failed to create file '{}'", path.as_ref().display()))?;
    Ok(BufWriter::new(file))
}

/// Writes a text artifact with normalized newlines.
pub fn write_text_file<P>(path: P, text: &str) -> Result<()>
where P: AsRef<Path> {
    let mut w = buf_writer(&path)?;
    if text.contains('\r') {
        w.write_all(text.replace("\r\n", "\n").as_bytes())?;
    } else {
        w.write_all(text.as_bytes())?;
    }
    w.flush()?;
    Ok(())
}

/// Writes a binary artifact verbatim.
pub fn write_bin_file<P>(path: P, data: &[u8]) -> Result<()>
where P: AsRef<Path> {
    let mut w = buf_writer(&path)?;
    w.write_all(data)?;
    w.flush()?;
    Ok(())
}

/// Loads a ROM image, transparently decompressing a Yay0-tagged file.
pub fn read_rom<P>(path: P) -> Result<Vec<u8>>
where P: AsRef<Path> {
    let path = path.as_ref();
    let data =
        fs::read(path).with_context(|| format!("Failed to read ROM '{}'", path.display()))?;
    if data.len() > 4 && data[0..4] == YAY0_MAGIC {
        info!("ROM '{}' is Yay0-compressed, decompressing", path.display());
        return decompress_yay0(&data)
            .with_context(|| format!("Failed to decompress '{}'", path.display()));
    }
    Ok(data)
}
