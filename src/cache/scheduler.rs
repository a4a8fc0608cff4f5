use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Instant, SystemTime};

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::cache::policy;
use crate::config::CacheConfig;

enum Message {
    Reschedule,
    Shutdown,
}

type Deadline = Arc<Mutex<Option<Instant>>>;

fn lock(deadline: &Mutex<Option<Instant>>) -> MutexGuard<'_, Option<Instant>> {
    deadline.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Replace the pending deadline only if `at` is earlier. Returns whether it did.
fn schedule_earliest(deadline: &Mutex<Option<Instant>>, at: Instant) -> bool {
    let mut pending = lock(deadline);
    match *pending {
        Some(current) if current <= at => false,
        _ => {
            *pending = Some(at);
            true
        }
    }
}

/// Debounced timer that sweeps the slice cache on a worker thread.
///
/// Every cache-backed fetch calls [`CacheScheduler::notify_fetch`]; after each
/// sweep the worker schedules its own follow-up. Both only ever move the
/// pending deadline earlier.
pub struct CacheScheduler {
    deadline: Deadline,
    wake: Sender<Message>,
    worker: Option<JoinHandle<()>>,
    config: CacheConfig,
}

impl CacheScheduler {
    /// Spawn the worker. Nothing is swept until the first deadline.
    pub fn start(config: CacheConfig) -> Self {
        let deadline: Deadline = Arc::new(Mutex::new(None));
        let (wake, rx) = unbounded();
        let worker = {
            let deadline = Arc::clone(&deadline);
            let config = config.clone();
            std::thread::spawn(move || loop {
                let pending = *lock(&deadline);
                let received = match pending {
                    Some(at) => rx.recv_deadline(at),
                    None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
                };
                match received {
                    Ok(Message::Reschedule) => continue,
                    Ok(Message::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
                {
                    let mut pending = lock(&deadline);
                    match *pending {
                        Some(at) if at <= Instant::now() => *pending = None,
                        _ => continue,
                    }
                }
                let report = policy::sweep(&config, SystemTime::now());
                debug!(
                    deleted = report.deleted,
                    next_check_secs = report.next_check_secs,
                    "cache check finished"
                );
                schedule_earliest(&deadline, Instant::now() + report.next_check_in);
            })
        };
        Self {
            deadline,
            wake,
            worker: Some(worker),
            config,
        }
    }

    /// A cache-backed fetch happened: check again after `check_wait`.
    pub fn notify_fetch(&self) {
        self.schedule_at(Instant::now() + self.config.check_wait);
    }

    /// Move the next check to `at` if that is earlier than the pending one.
    pub fn schedule_at(&self, at: Instant) {
        if schedule_earliest(&self.deadline, at) && self.wake.send(Message::Reschedule).is_err() {
            warn!("cache scheduler worker is gone");
        }
    }

    pub fn next_due(&self) -> Option<Instant> {
        *lock(&self.deadline)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

impl Drop for CacheScheduler {
    fn drop(&mut self) {
        let _ = self.wake.send(Message::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(root: &std::path::Path, check_wait: Duration) -> CacheConfig {
        CacheConfig {
            root: root.to_path_buf(),
            max_age: Duration::from_millis(10),
            max_size: 1_000_000,
            check_wait,
        }
    }

    #[test]
    fn test_notify_only_moves_deadline_earlier() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = CacheScheduler::start(config(dir.path(), Duration::from_secs(60)));
        assert!(scheduler.next_due().is_none());

        scheduler.notify_fetch();
        let first = scheduler.next_due().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        scheduler.notify_fetch();
        assert_eq!(scheduler.next_due(), Some(first));

        let earlier = Instant::now() + Duration::from_secs(30);
        scheduler.schedule_at(earlier);
        assert_eq!(scheduler.next_due(), Some(earlier));
        scheduler.schedule_at(earlier + Duration::from_secs(1));
        assert_eq!(scheduler.next_due(), Some(earlier));
    }

    #[test]
    fn test_worker_sweeps_after_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("slice.bam");
        std::fs::write(&file, b"data").unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let scheduler = CacheScheduler::start(config(dir.path(), Duration::from_millis(20)));
        scheduler.notify_fetch();
        let give_up = Instant::now() + Duration::from_secs(5);
        while file.exists() && Instant::now() < give_up {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!file.exists());
        // the worker reschedules itself after sweeping
        let give_up = Instant::now() + Duration::from_secs(5);
        while scheduler.next_due().is_none() && Instant::now() < give_up {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(scheduler.next_due().is_some());
    }

    #[test]
    fn test_drop_stops_worker() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = CacheScheduler::start(config(dir.path(), Duration::from_secs(60)));
        scheduler.notify_fetch();
        drop(scheduler);
    }
}
