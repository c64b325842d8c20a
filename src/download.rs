use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Response;
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Streams a successful response body into `target`.
///
/// The body is written to a sibling `.part` file that is renamed once
/// complete, so an interrupted download never leaves a truncated target.
pub(crate) fn save_response(
    mut resp: Response,
    url: &str,
    target: &Path,
    overwrite: bool,
    progress: bool,
) -> Result<PathBuf> {
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
    }
    if !overwrite && target.exists() {
        return Err(Error::io(
            target,
            std::io::Error::new(std::io::ErrorKind::AlreadyExists, "file already exists"),
        ));
    }

    let partial = partial_path(target);
    let pb = if progress {
        let pb = match resp.content_length() {
            Some(len) => ProgressBar::new(len),
            None => ProgressBar::no_length(),
        };
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.green} {bytes}/{total_bytes} ({bytes_per_sec}) {wide_bar} {eta}",
        ) {
            pb.set_style(style.progress_chars("=>-"));
        }
        Some(pb)
    } else {
        None
    };

    let written = match copy_body(&mut resp, url, &partial, pb.as_ref()) {
        Ok(n) => n,
        Err(e) => {
            let _ = std::fs::remove_file(&partial);
            if let Some(pb) = &pb {
                pb.abandon();
            }
            return Err(e);
        }
    };

    std::fs::rename(&partial, target).map_err(|e| Error::io(target, e))?;
    if let Some(pb) = &pb {
        pb.finish_and_clear();
    }
    tracing::debug!(%url, target = %target.display(), bytes = written, "download complete");
    Ok(target.to_path_buf())
}

fn copy_body(
    resp: &mut Response,
    url: &str,
    partial: &Path,
    pb: Option<&ProgressBar>,
) -> Result<u64> {
    let mut out = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(partial)
        .map_err(|e| Error::io(partial, e))?;

    let mut written: u64 = 0;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = match resp.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                return Err(Error::Network {
                    message: format!("download from {} interrupted: {}", url, e),
                    source: None,
                });
            }
        };
        out.write_all(&buf[..n]).map_err(|e| Error::io(partial, e))?;
        written += n as u64;
        if let Some(pb) = pb {
            pb.inc(n as u64);
        }
    }
    out.flush().map_err(|e| Error::io(partial, e))?;

    if let Some(expected) = resp.content_length() {
        if written < expected {
            return Err(Error::Network {
                message: format!(
                    "download from {} ended after {} of {} byte(s)",
                    url, written, expected
                ),
                source: None,
            });
        }
    }
    Ok(written)
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "download".into());
    name.push(".part");
    target.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_sits_next_to_target() {
        assert_eq!(
            partial_path(Path::new("out/athens.nt")),
            PathBuf::from("out/athens.nt.part")
        );
    }
}
