//! Keeps a copy of deleted messages.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::config::{Config, TRASH_LOG_NAME};
use crate::suspect::Suspect;

/// Writes the message to the trash directory.
///
/// Returns the file written, or `None` if trash is disabled or writing
/// failed. Failures are logged.
pub fn trash(config: &Config, suspect: &Suspect, killer: &str) -> Option<PathBuf> {
    if config.trashdir.is_empty() {
        return None;
    }
    let dir = Path::new(&config.trashdir);

    let path = match write_copy(dir, suspect) {
        Ok(path) => path,
        Err(e) => {
            tracing::error!(id = %suspect.id, dir = %dir.display(), error = %e, "failed to trash message");
            return None;
        }
    };
    tracing::debug!(id = %suspect.id, file = %path.display(), plugin = killer, "message trashed");

    if config.trashlog
        && let Err(e) = append_log(dir, suspect, killer, &path)
    {
        tracing::error!(id = %suspect.id, error = %e, "failed to write trash log");
    }

    Some(path)
}

fn write_copy(dir: &Path, suspect: &Suspect) -> std::io::Result<PathBuf> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    let mut file = tempfile::Builder::new()
        .prefix(&suspect.id)
        .tempfile_in(dir)?;
    file.write_all(suspect.source())?;
    let (_, path) = file.keep().map_err(|e| e.error)?;
    Ok(path)
}

fn append_log(dir: &Path, suspect: &Suspect, killer: &str, path: &Path) -> std::io::Result<()> {
    let mut log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(TRASH_LOG_NAME))?;
    writeln!(
        log,
        "{} {} {} {} {}",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        suspect.from_address,
        suspect.recipients.join(","),
        killer,
        path.display()
    )
}
