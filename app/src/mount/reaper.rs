//! Background thread that drops the tables of exited processes.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::fs_op::adapter::FilesystemAdapter;
use crate::vars::registry::{probe_all, DefunctReport};

pub(crate) fn lock(adapter: &Mutex<FilesystemAdapter>) -> MutexGuard<'_, FilesystemAdapter> {
    // A panicked call leaves the store consistent at record granularity.
    adapter.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One reaping pass. Probes run without the lock held; a pid registered
/// meanwhile is not in the verdicts and stays.
pub fn reap_once(adapter: &Mutex<FilesystemAdapter>) -> DefunctReport {
    let (probe, pids) = {
        let fs = lock(adapter);
        (fs.registry().probe(), fs.registry().pids())
    };
    if pids.is_empty() {
        return DefunctReport::default();
    }
    let verdicts = probe_all(probe.as_ref(), &pids);
    lock(adapter).apply_verdicts(verdicts)
}

pub struct Reaper {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl Reaper {
    pub fn spawn(adapter: Arc<Mutex<FilesystemAdapter>>, interval: Duration) -> std::io::Result<Reaper> {
        let (stop, stopped) = mpsc::channel::<()>();
        let handle = thread::Builder::new().name("fusevars-reaper".into()).spawn(move || loop {
            match stopped.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    let report = reap_once(&adapter);
                    if report.removed_count() > 0 || !report.ambiguous.is_empty() {
                        tracing::debug!(
                            removed = report.removed_count(),
                            ambiguous = report.ambiguous.len(),
                            "reaping pass"
                        );
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        })?;
        Ok(Reaper { stop, handle })
    }

    /// Signal the thread and wait for it to finish its current pass.
    pub fn stop(self) {
        let _ = self.stop.send(());
        if self.handle.join().is_err() {
            tracing::error!("reaper thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs_op::adapter::AdapterOptions;
    use crate::fs_op::ops::VarFilesystem;
    use crate::vars::liveness::{Liveness, ProcessProbe};
    use crate::vars::registry::{VariableRegistry, DEFAULT_MAX_INHERITANCE_DEPTH};

    /// Everything above 1000 has exited.
    struct Threshold;

    impl ProcessProbe for Threshold {
        fn liveness(&self, pid: u32) -> Liveness {
            if pid > 1000 {
                Liveness::Dead
            } else {
                Liveness::Alive
            }
        }
    }

    fn shared() -> Arc<Mutex<FilesystemAdapter>> {
        let registry = VariableRegistry::new(Arc::new(Threshold), DEFAULT_MAX_INHERITANCE_DEPTH);
        Arc::new(Mutex::new(FilesystemAdapter::new(registry, AdapterOptions::default())))
    }

    #[test]
    fn reap_once_drops_dead_tables() {
        let adapter = shared();
        {
            let mut fs = lock(&adapter);
            fs.mkdir("/10", 0).unwrap();
            fs.mkdir("/2000", 0).unwrap();
        }
        assert_eq!(reap_once(&adapter).removed, vec![2000]);
        assert_eq!(lock(&adapter).registry().pids(), vec![10]);
        assert_eq!(reap_once(&adapter).removed_count(), 0);
    }

    #[test]
    fn thread_reaps_until_stopped() {
        let adapter = shared();
        lock(&adapter).mkdir("/3000", 0).unwrap();
        let reaper = Reaper::spawn(Arc::clone(&adapter), Duration::from_millis(10)).unwrap();
        let mut waited = 0;
        while lock(&adapter).registry().contains(3000) && waited < 200 {
            thread::sleep(Duration::from_millis(10));
            waited += 1;
        }
        reaper.stop();
        assert!(lock(&adapter).registry().is_empty());
    }
}
