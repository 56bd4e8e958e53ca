use std::fmt;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

/// States of one ingestion run. Runs only move forward; `Done` and `Failed`
/// are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Idle,
    Downloading,
    Extracting,
    Enumerating,
    Hashing,
    Publishing,
    Done,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    /// `Failed` is reachable from every non-terminal stage; otherwise only the
    /// immediate successor is.
    pub fn can_advance_to(self, next: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Stage::Failed => true,
            _ => self.successor() == Some(next),
        }
    }

    fn successor(self) -> Option<Stage> {
        Some(match self {
            Stage::Idle => Stage::Downloading,
            Stage::Downloading => Stage::Extracting,
            Stage::Extracting => Stage::Enumerating,
            Stage::Enumerating => Stage::Hashing,
            Stage::Hashing => Stage::Publishing,
            Stage::Publishing => Stage::Done,
            Stage::Done | Stage::Failed => return None,
        })
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Idle => "idle",
            Stage::Downloading => "downloading",
            Stage::Extracting => "extracting",
            Stage::Enumerating => "enumerating",
            Stage::Hashing => "hashing",
            Stage::Publishing => "publishing",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Shared progress of a run: current stage plus file and byte counters.
/// With `enabled`, a background thread logs a summary line periodically.
#[derive(Clone)]
pub struct Progress {
    enabled: bool,
    instance: Arc<str>,
    stage: Arc<Mutex<Stage>>,
    pub files_done: Arc<AtomicUsize>,
    pub files_total: Arc<AtomicUsize>,
    pub bytes_done: Arc<AtomicU64>,
    pub bytes_total: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
}

impl Progress {
    pub fn new(instance: &str, enabled: bool) -> Self {
        Self {
            enabled,
            instance: Arc::from(instance),
            stage: Arc::new(Mutex::new(Stage::Idle)),
            files_done: Arc::new(AtomicUsize::new(0)),
            files_total: Arc::new(AtomicUsize::new(0)),
            bytes_done: Arc::new(AtomicU64::new(0)),
            bytes_total: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stage(&self) -> Stage {
        *self.stage.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Move to `next`, logging the transition. Returns `false` and leaves the
    /// stage untouched if the move is not allowed.
    pub fn advance(&self, next: Stage) -> bool {
        let mut cur = self.stage.lock().unwrap_or_else(|p| p.into_inner());
        if !cur.can_advance_to(next) {
            return false;
        }
        let from = *cur;
        info!(instance = %self.instance, %from, to = %next, "stage transition");
        *cur = next;
        true
    }

    pub fn reset_files(&self, files: usize, bytes: u64) {
        self.files_total.store(files, Ordering::Relaxed);
        self.files_done.store(0, Ordering::Relaxed);
        self.bytes_total.store(bytes, Ordering::Relaxed);
        self.bytes_done.store(0, Ordering::Relaxed);
    }

    pub fn inc_file(&self, bytes: u64) {
        self.files_done.fetch_add(1, Ordering::Relaxed);
        self.bytes_done.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, n: u64) {
        self.bytes_done.fetch_add(n, Ordering::Relaxed);
    }

    pub fn start(&self, every: Duration) {
        if !self.enabled {
            return;
        }
        self.running.store(true, Ordering::Relaxed);
        let this = self.clone();
        thread::spawn(move || {
            let t0 = Instant::now();
            while this.running.load(Ordering::Relaxed) {
                thread::sleep(every);
                if !this.running.load(Ordering::Relaxed) {
                    break;
                }
                let fd = this.files_done.load(Ordering::Relaxed);
                let ft = this.files_total.load(Ordering::Relaxed);
                let bd = this.bytes_done.load(Ordering::Relaxed);
                let bt = this.bytes_total.load(Ordering::Relaxed);
                let pct = if bt > 0 { (bd as f64 / bt as f64) * 100.0 } else { 0.0 };
                info!(
                    instance = %this.instance,
                    elapsed_s = t0.elapsed().as_secs(),
                    stage = %this.stage(),
                    files_done = fd,
                    files_total = ft,
                    bytes_pct = pct as i32,
                    "progress"
                );
            }
        });
    }

    pub fn stop(&self) {
        if self.enabled {
            self.running.store(false, Ordering::Relaxed);
        }
    }
}
