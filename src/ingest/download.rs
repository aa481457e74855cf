/// Download materialization: find the report file the browser saved.
///
/// The portal gives no signal when the export has been written, so after the
/// export click we poll the download directory for a bounded settle period,
/// then take the newest matching file. An empty directory ends the run.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use crate::config::MAX_WAIT;
use crate::logging::{self, Stage};
use crate::model::PipelineError;

/// Suffixes browsers give to files still being written.
const PARTIAL_SUFFIXES: &[&str] = &["crdownload", "part", "tmp"];

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

/// Creation time, or modification time on filesystems that don't record one.
fn created_at(path: &Path) -> Option<SystemTime> {
    let meta = fs::metadata(path).ok()?;
    meta.created().or_else(|_| meta.modified()).ok()
}

fn entries(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let read = match fs::read_dir(dir) {
        Ok(read) => read,
        // A directory that was never created holds no report either
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PipelineError::Io(format!("{}: {}", dir.display(), e))),
    };
    Ok(read
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect())
}

/// Newest file in `dir` with the given extension.
pub fn find_latest_file(dir: &Path, extension: &str) -> Result<PathBuf, PipelineError> {
    let latest = entries(dir)?
        .into_iter()
        .filter(|p| has_extension(p, extension))
        .filter_map(|p| created_at(&p).map(|t| (t, p)))
        .max_by(|(a, pa), (b, pb)| a.cmp(b).then_with(|| pa.cmp(pb)))
        .map(|(_, p)| p);

    match latest {
        Some(path) => {
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
            logging::info(
                Stage::Download,
                name.as_deref(),
                "Latest report file selected",
            );
            Ok(path)
        }
        None => {
            logging::error(
                Stage::Download,
                None,
                &format!("no .{} file in '{}'", extension, dir.display()),
            );
            Err(PipelineError::ArtifactMissing {
                dir: dir.display().to_string(),
            })
        }
    }
}

/// True when a matching file newer than `since` exists and nothing is still
/// being written.
fn download_landed(dir: &Path, extension: &str, since: SystemTime) -> bool {
    let Ok(files) = entries(dir) else {
        return false;
    };
    let in_progress = files
        .iter()
        .any(|p| PARTIAL_SUFFIXES.iter().any(|s| has_extension(p, s)));
    let fresh = files
        .iter()
        .filter(|p| has_extension(p, extension))
        .any(|p| created_at(p).map(|t| t >= since).unwrap_or(false));
    fresh && !in_progress
}

/// Waits up to `settle` for the export to land, then returns the newest
/// matching file (which may predate this run if the export never arrived).
/// `settle` is cut to `MAX_WAIT`.
pub fn await_download(
    dir: &Path,
    extension: &str,
    settle: Duration,
    since: SystemTime,
    poll_interval: Duration,
) -> Result<PathBuf, PipelineError> {
    let settle = settle.min(MAX_WAIT);
    logging::info(
        Stage::Download,
        None,
        &format!("Waiting up to {}s for the download to land...", settle.as_secs()),
    );

    let deadline = Instant::now() + settle;
    while !download_landed(dir, extension, since) {
        let now = Instant::now();
        if now >= deadline {
            logging::warn(Stage::Download, None, "no new report appeared within the settle period");
            break;
        }
        thread::sleep(poll_interval.min(deadline - now));
    }

    find_latest_file(dir, extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        writeln!(file, "x").unwrap();
        path
    }

    #[test]
    fn test_empty_directory_is_artifact_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_latest_file(dir.path(), "csv").unwrap_err();
        assert!(matches!(err, PipelineError::ArtifactMissing { .. }));
    }

    #[test]
    fn test_missing_directory_is_artifact_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_latest_file(&dir.path().join("never-created"), "csv").unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_other_extensions_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "report.xlsx");
        touch(dir.path(), "report.csv.crdownload");
        assert!(find_latest_file(dir.path(), "csv").is_err());
    }

    #[test]
    fn test_newest_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a_older.csv");
        thread::sleep(Duration::from_millis(20));
        let newer = touch(dir.path(), "b_newer.CSV");
        assert_eq!(find_latest_file(dir.path(), "csv").unwrap(), newer);
    }

    #[test]
    fn test_await_returns_early_once_fresh_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let since = SystemTime::now() - Duration::from_secs(1);
        let path = touch(dir.path(), "spi.csv");
        let started = Instant::now();
        let found = await_download(
            dir.path(),
            "csv",
            Duration::from_secs(10),
            since,
            Duration::from_millis(5),
        )
        .unwrap();
        assert_eq!(found, path);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_await_accepts_unbounded_settle() {
        let dir = tempfile::tempdir().unwrap();
        let since = SystemTime::now() - Duration::from_secs(1);
        let path = touch(dir.path(), "spi.csv");
        let found = await_download(dir.path(), "csv", Duration::MAX, since, Duration::from_millis(5))
            .unwrap();
        assert_eq!(found, path);
    }

    #[test]
    fn test_await_falls_back_to_older_file_after_settle() {
        let dir = tempfile::tempdir().unwrap();
        let old = touch(dir.path(), "yesterday.csv");
        let since = SystemTime::now() + Duration::from_secs(3600);
        let found = await_download(
            dir.path(),
            "csv",
            Duration::from_millis(20),
            since,
            Duration::from_millis(5),
        )
        .unwrap();
        assert_eq!(found, old);
    }
}
