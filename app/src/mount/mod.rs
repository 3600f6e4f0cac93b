//! Serving the store on a real mount point.

pub mod inodes;
pub mod reaper;

#[cfg(feature = "mount")]
pub mod fuse;

#[cfg(feature = "mount")]
pub use self::session::run;

/// Why a mount session stopped serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Ctrl-C in the serving process.
    Interrupted,
    /// The kernel session ended, e.g. `fusermount -u` from elsewhere.
    Unmounted,
}

#[cfg(feature = "mount")]
mod session {
    use std::path::Path;
    use std::sync::{mpsc, Arc, Mutex};
    use std::time::Duration;

    use anyhow::{Context, Result};
    use fuser::MountOption;

    use super::fuse::VarsFs;
    use super::reaper::{lock, Reaper};
    use super::SessionEnd;
    use crate::settings::Settings;

    /// Mount, serve until Ctrl-C or an external unmount, then tear down.
    /// With `save_dir`, every table is written there before the store is
    /// dropped.
    pub fn run(settings: &Settings, mountpoint: &Path, allow_other: bool, save_dir: Option<&Path>) -> Result<()> {
        let codec = settings.codec()?;
        let adapter = Arc::new(Mutex::new(settings.build_adapter()));

        let mut options = vec![MountOption::FSName(settings.mount.fs_name.clone()), MountOption::RW];
        if allow_other || settings.mount.allow_other {
            options.push(MountOption::AllowOther);
        }
        let (wake, wait) = mpsc::channel();
        let fs = VarsFs::new(Arc::clone(&adapter)).notify_unmount(wake.clone());
        let session = fuser::spawn_mount2(fs, mountpoint, &options)
            .with_context(|| format!("failed to mount at {}", mountpoint.display()))?;
        let reaper = Reaper::spawn(
            Arc::clone(&adapter),
            Duration::from_secs(settings.mount.reap_interval_secs),
        )
        .context("failed to start reaper thread")?;

        ctrlc::set_handler(move || {
            let _ = wake.send(SessionEnd::Interrupted);
        })
        .context("failed to install Ctrl-C handler")?;

        tracing::info!(mountpoint = %mountpoint.display(), "serving variables; Ctrl-C to unmount");
        // A closed channel means every sender is gone; treat it as an unmount.
        let end = wait.recv().unwrap_or(SessionEnd::Unmounted);
        tracing::info!(?end, "session ending");
        reaper.stop();
        drop(session);

        let mut fs = lock(&adapter);
        if let Some(dir) = save_dir {
            fs.save_all(dir, &codec)
                .with_context(|| format!("failed to save tables to {}", dir.display()))?;
        }
        fs.shutdown();
        Ok(())
    }
}
