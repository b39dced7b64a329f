//! Filesystem helpers.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex, OnceLock};
use std::thread;
use std::time::Duration;

type ReadJob = (PathBuf, mpsc::SyncSender<io::Result<Vec<u8>>>);

/// Long-lived reader threads shared by every bounded read.
///
/// A read that hangs keeps its worker busy until the kernel returns; the
/// caller has long since timed out. Once every worker is stuck, queued reads
/// time out too.
struct ReaderPool {
    jobs: Mutex<mpsc::Sender<ReadJob>>,
}

impl ReaderPool {
    fn start() -> io::Result<Self> {
        let workers = thread::available_parallelism().map_or(4, usize::from).clamp(2, 16);
        let (tx, rx) = mpsc::channel::<ReadJob>();
        let rx = Arc::new(Mutex::new(rx));
        for index in 0..workers {
            let rx = Arc::clone(&rx);
            thread::Builder::new()
                .name(format!("packline-read-{index}"))
                .spawn(move || loop {
                    let job = match rx.lock() {
                        Ok(guard) => guard.recv(),
                        Err(_) => return,
                    };
                    let Ok((path, reply)) = job else { return };
                    let _ = reply.send(fs::read(&path));
                })?;
        }
        Ok(Self { jobs: Mutex::new(tx) })
    }

    fn submit(&self, job: ReadJob) -> io::Result<()> {
        let jobs = self
            .jobs
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "reader pool lock poisoned"))?;
        jobs.send(job)
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "reader pool has shut down"))
    }
}

static READERS: OnceLock<io::Result<ReaderPool>> = OnceLock::new();

/// Read a whole file, giving up after `timeout`.
///
/// The read runs on a shared pool of reader threads started on first use;
/// if it has not finished by the deadline this returns `ErrorKind::TimedOut`
/// and the late result is dropped.
///
/// # Errors
/// Returns the underlying I/O error, or `TimedOut`.
pub fn read_with_timeout(path: &Path, timeout: Duration) -> io::Result<Vec<u8>> {
    let pool = READERS
        .get_or_init(ReaderPool::start)
        .as_ref()
        .map_err(|e| io::Error::new(e.kind(), format!("cannot start reader threads: {e}")))?;
    let (tx, rx) = mpsc::sync_channel(1);
    pool.submit((path.to_path_buf(), tx))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("read of {} exceeded {}ms", path.display(), timeout.as_millis()),
        )),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(io::Error::new(
            io::ErrorKind::Other,
            format!("reader thread for {} exited without a result", path.display()),
        )),
    }
}

/// Write bytes to `path` via a sibling temp file and a rename, so readers see
/// either the old or the new content. Parent directories are created.
///
/// # Errors
/// Returns an error if the directory, temp file or rename fails.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;

    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("file");
    let temp = parent.join(format!(".{name}.tmp.{}", std::process::id()));
    {
        let mut file = File::create(&temp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    if let Err(err) = fs::rename(&temp, path) {
        if cfg!(windows) {
            fs::copy(&temp, path)?;
            let _ = fs::remove_file(&temp);
            return Ok(());
        }
        let _ = fs::remove_file(&temp);
        return Err(err);
    }
    Ok(())
}

/// Remove a directory tree by first renaming it aside.
///
/// After the rename returns, `dir` no longer exists, so concurrent readers
/// never observe a half-deleted tree. A missing directory is not an error.
///
/// # Errors
/// Returns an error if the rename or the removal fails.
pub fn swap_remove_dir(dir: &Path) -> io::Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    let graveyard = graveyard_path(dir);
    fs::rename(dir, &graveyard)?;
    fs::remove_dir_all(&graveyard)
}

fn graveyard_path(dir: &Path) -> PathBuf {
    let name = dir.file_name().and_then(|n| n.to_str()).unwrap_or("dir");
    let parent = dir.parent().unwrap_or(Path::new("."));
    parent.join(format!(".{name}.stale.{}", std::process::id()))
}

/// Normalise a path to forward slashes for hashing and display.
#[must_use]
pub fn slash_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
