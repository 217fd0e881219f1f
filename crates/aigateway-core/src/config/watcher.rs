//! Config Watcher (spec §4.7): polls a file path at a tick interval, delivering a new
//! [`Config`] snapshot to the receiver whenever the file's mtime advances.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{Error, load_file};
use crate::types::Config;

/// Shared, atomically-swapped handle to the current config snapshot. Readers dereference
/// once per operation; a torn read is impossible because the whole snapshot is replaced.
pub type ConfigHandle = Arc<ArcSwap<Config>>;

pub struct Watcher {
    path: PathBuf,
    tick: Duration,
    last_mtime: Option<SystemTime>,
    handle: ConfigHandle,
}

impl Watcher {
    /// Performs the initial load (fatal on failure, per spec §4.7) and returns a watcher
    /// plus the shared handle readers should hold.
    pub fn start(path: PathBuf, tick: Duration) -> Result<(Self, ConfigHandle), Error> {
        let (config, mtime) = match std::fs::metadata(&path) {
            Ok(meta) => {
                let config = load_file(&path)?;
                (config, meta.modified().ok())
            }
            Err(_) => {
                info!(path = %path.display(), "config file absent, loading default");
                (Config::default_config(), None)
            }
        };
        let handle: ConfigHandle = Arc::new(ArcSwap::from_pointee(config));
        Ok((
            Watcher {
                path,
                tick,
                last_mtime: mtime,
                handle: handle.clone(),
            },
            handle,
        ))
    }

    /// Runs the poll loop until cancelled. Parse errors are logged and do not terminate
    /// the watcher; the previously loaded config keeps serving traffic.
    pub async fn run(mut self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick_once();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Checks the watched path once and reloads if its mtime has advanced. Exposed so
    /// tests can step the watcher deterministically instead of racing a real interval.
    pub fn tick_once(&mut self) {
        let meta = match std::fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(_) => {
                // File remains absent: do not reload while it stays missing.
                return;
            }
        };
        let mtime = match meta.modified() {
            Ok(m) => m,
            Err(_) => return,
        };
        if Some(mtime) == self.last_mtime {
            return;
        }
        match load_file(&self.path) {
            Ok(config) => {
                debug!(path = %self.path.display(), uuid = %config.uuid, "reloaded config");
                self.handle.store(Arc::new(config));
                self.last_mtime = Some(mtime);
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to parse config, keeping previous snapshot");
                // Still advance last_mtime so we don't spin retrying an unchanged bad file
                // on every tick; a subsequent edit still produces a new mtime.
                self.last_mtime = Some(mtime);
            }
        }
    }
}

/// Logs a load failure without panicking, used for non-initial loads.
pub fn log_reload_error(path: &std::path::Path, err: &Error) {
    error!(path = %path.display(), error = %err, "config reload failed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn absent_file_loads_default_once() {
        let dir = tempfile_dir();
        let path = dir.join("missing.yaml");
        let (mut watcher, handle) = Watcher::start(path, Duration::from_millis(10)).unwrap();
        assert_eq!(handle.load().uuid, "00000000-0000-0000-0000-000000000000");
        watcher.tick_once();
        watcher.tick_once();
        assert_eq!(handle.load().uuid, "00000000-0000-0000-0000-000000000000");
    }

    #[tokio::test]
    async fn reloads_on_mtime_change_only() {
        let dir = tempfile_dir();
        let path = dir.join("config.yaml");
        std::fs::write(&path, "uuid: v1\n").unwrap();
        let (mut watcher, handle) = Watcher::start(path.clone(), Duration::from_millis(10)).unwrap();
        assert_eq!(handle.load().uuid, "v1");

        // Unchanged mtime: no reload.
        watcher.tick_once();
        assert_eq!(handle.load().uuid, "v1");

        // New content, forced mtime bump.
        std::thread::sleep(Duration::from_millis(20));
        let mut f = std::fs::OpenOptions::new().write(true).truncate(true).open(&path).unwrap();
        write!(f, "uuid: v2\n").unwrap();
        drop(f);
        watcher.tick_once();
        assert_eq!(handle.load().uuid, "v2");
    }

    fn tempfile_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "aigateway-watcher-test-{}-{}",
            std::process::id(),
            rand::random::<u64>()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
