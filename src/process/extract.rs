// src/process/extract.rs
use std::{
    fs::{self, File},
    io,
    path::{Component, Path, PathBuf},
};
use tracing::{debug, info, instrument};
use zip::ZipArchive;

use crate::error::{PipelineError, Result};
use crate::process::load::find_csv_files;

#[derive(Debug, Clone)]
pub struct ExtractOutcome {
    pub dir: PathBuf,
    /// False when an earlier extraction was reused.
    pub extracted: bool,
    pub files_written: usize,
}

/// Unpack `zip_path` into `dest`.
///
/// Every entry name is checked before anything is written; a single entry
/// that would land outside `dest` fails the whole extraction with
/// [`PipelineError::Security`]. With `force`, `dest` is emptied first so
/// files from an older archive cannot mix with the new ones. Without it,
/// a `dest` that already holds CSV files is left alone.
#[instrument(level = "info", skip(zip_path, dest), fields(zip = %zip_path.display(), dest = %dest.display()))]
pub fn safe_extract(zip_path: &Path, dest: &Path, force: bool) -> Result<ExtractOutcome> {
    if force {
        clear_dir(dest)?;
    } else if dest.is_dir() && !find_csv_files(dest)?.is_empty() {
        info!("CSV files already extracted, skipping");
        return Ok(ExtractOutcome {
            dir: dest.to_path_buf(),
            extracted: false,
            files_written: 0,
        });
    }
    fs::create_dir_all(dest)?;

    let file = File::open(zip_path)?;
    let mut archive = ZipArchive::new(file)?;

    // 1) validate every name up front
    let mut plan: Vec<(usize, PathBuf, bool)> = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i)?;
        let name = entry.name().to_string();
        let rel = match (entry.enclosed_name(), contained_path(&name)) {
            (Some(_), Some(rel)) => rel,
            _ => return Err(PipelineError::Security { entry: name }),
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        plan.push((i, rel, entry.is_dir()));
    }

    // 2) write
    let mut files_written = 0;
    for (i, rel, is_dir) in plan {
        let out_path = dest.join(&rel);
        if is_dir {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut entry = archive.by_index(i)?;
        let mut out = File::create(&out_path)?;
        io::copy(&mut entry, &mut out)?;
        files_written += 1;
        debug!(file = %rel.display(), "extracted");
    }

    info!(files_written, "extraction complete");
    Ok(ExtractOutcome {
        dir: dest.to_path_buf(),
        extracted: true,
        files_written,
    })
}

/// Relative path for an archive entry, or `None` if it could escape the
/// target: absolute paths, drive prefixes, `..` segments, NUL bytes.
/// Both `/` and `\` count as separators.
pub fn contained_path(name: &str) -> Option<PathBuf> {
    if name.contains('\0') || name.starts_with('/') || name.starts_with('\\') {
        return None;
    }
    if name.len() >= 2 && name.as_bytes()[1] == b':' {
        return None;
    }

    let mut out = PathBuf::new();
    for part in name.split(['/', '\\']) {
        match part {
            "" | "." => continue,
            ".." => return None,
            p => {
                // a single segment must not smuggle in a root or prefix
                let mut comps = Path::new(p).components();
                match (comps.next(), comps.next()) {
                    (Some(Component::Normal(c)), None) => out.push(c),
                    _ => return None,
                }
            }
        }
    }
    Some(out)
}

/// Remove everything under `dir`, keeping `dir` itself.
fn clear_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
