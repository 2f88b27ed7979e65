//! Blocking file primitives: zip and sequential split.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use super::ProcessingError;

/// Writes a deflate zip at `dest` holding `src` under `entry_name`.
///
/// Returns the archive size in bytes.
pub fn zip_file(src: &Path, dest: &Path, entry_name: &str) -> Result<u64, ProcessingError> {
    let mut reader = BufReader::new(File::open(src)?);
    let mut zip = ZipWriter::new(File::create(dest)?);
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .large_file(true);

    zip.start_file(entry_name, options)?;
    io::copy(&mut reader, &mut zip)?;
    zip.finish()?.sync_all()?;

    Ok(std::fs::metadata(dest)?.len())
}

/// Path of the 1-based part `index` of `src`: `<src>.part001`.
#[must_use]
pub fn part_path(src: &Path, index: usize) -> PathBuf {
    let mut name = src.as_os_str().to_owned();
    name.push(format!(".part{index:03}"));
    PathBuf::from(name)
}

/// Splits `src` into consecutive chunks of at most `chunk_size` bytes.
///
/// Parts are written next to the source. An empty source yields no parts.
pub fn split_file(src: &Path, chunk_size: u64) -> Result<Vec<PathBuf>, ProcessingError> {
    if chunk_size == 0 {
        return Err(ProcessingError::InvalidInput("chunk size must be positive".to_owned()));
    }

    let total = std::fs::metadata(src)?.len();
    let count = total.div_ceil(chunk_size);
    let mut reader = BufReader::new(File::open(src)?);
    let mut parts = Vec::new();

    for i in 0..count {
        let path = part_path(src, usize::try_from(i + 1).unwrap_or(usize::MAX));
        let mut writer = BufWriter::new(File::create(&path)?);
        let copied = io::copy(&mut (&mut reader).take(chunk_size), &mut writer)?;
        writer.flush()?;
        if copied == 0 {
            break;
        }
        parts.push(path);
    }

    Ok(parts)
}
