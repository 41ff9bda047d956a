use std::collections::HashMap;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Process-wide handle that keeps the machine from suspending while held.
pub trait SleepInhibitor: Send + Sync {
    fn acquire(&self, reason: &str) -> u64;
    fn release(&self, id: u64);
}

/// Releases the inhibitor exactly once, on `release` or when dropped.
pub struct InhibitorGuard {
    inhibitor: Arc<dyn SleepInhibitor>,
    id: Option<u64>,
}

impl InhibitorGuard {
    pub fn acquire(inhibitor: Arc<dyn SleepInhibitor>, reason: &str) -> Self {
        let id = inhibitor.acquire(reason);
        tracing::debug!(id, reason, "sleep inhibitor acquired");
        Self {
            inhibitor,
            id: Some(id),
        }
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(id) = self.id.take() {
            self.inhibitor.release(id);
            tracing::debug!(id, "sleep inhibitor released");
        }
    }
}

impl Drop for InhibitorGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Holds an OS helper process for as long as the inhibitor is held:
/// `systemd-inhibit` on Linux, `caffeinate` on macOS. Elsewhere acquiring only logs.
///
/// Both helpers watch the host pid and exit with it, so a lock is never left behind
/// when the host quits without releasing.
#[derive(Default)]
pub struct SystemInhibitor {
    next_id: AtomicU64,
    holders: Mutex<HashMap<u64, Child>>,
}

impl SystemInhibitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn helper_command(reason: &str) -> Option<Command> {
        let host_pid = std::process::id().to_string();
        if cfg!(target_os = "linux") {
            let why = format!("--why={reason}");
            let watch_host = format!("--pid={host_pid}");
            let mut command = Command::new("systemd-inhibit");
            command.args([
                "--what=sleep:idle",
                "--who=SimpleInstaBot",
                why.as_str(),
                "--mode=block",
                "tail",
                watch_host.as_str(),
                "-f",
                "/dev/null",
            ]);
            Some(command)
        } else if cfg!(target_os = "macos") {
            let mut command = Command::new("caffeinate");
            command.args(["-i", "-w", host_pid.as_str()]);
            Some(command)
        } else {
            None
        }
    }
}

impl SleepInhibitor for SystemInhibitor {
    fn acquire(&self, reason: &str) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let Some(mut command) = Self::helper_command(reason) else {
            tracing::warn!("no sleep inhibitor available on this platform");
            return id;
        };

        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own group, so release can stop the wrapped watcher as well.
            command.process_group(0);
        }

        match command.spawn() {
            Ok(child) => {
                tracing::debug!(id, pid = child.id(), "sleep inhibitor helper started");
                if let Ok(mut holders) = self.holders.lock() {
                    holders.insert(id, child);
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "failed to start sleep inhibitor");
            }
        }
        id
    }

    fn release(&self, id: u64) {
        let child = self
            .holders
            .lock()
            .ok()
            .and_then(|mut holders| holders.remove(&id));
        if let Some(mut child) = child {
            if let Err(error) = stop_helper(&mut child) {
                tracing::warn!(error = %error, "failed to stop sleep inhibitor");
            }
            let _ = child.wait();
        }
    }
}

#[cfg(unix)]
fn stop_helper(child: &mut Child) -> std::io::Result<()> {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(child.id() as i32), Signal::SIGTERM) {
        Ok(()) => Ok(()),
        Err(_) => child.kill(),
    }
}

#[cfg(not(unix))]
fn stop_helper(child: &mut Child) -> std::io::Result<()> {
    child.kill()
}

#[cfg(test)]
mod tests {
    use super::{InhibitorGuard, SleepInhibitor};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counting {
        acquired: AtomicUsize,
        released: AtomicUsize,
    }

    impl SleepInhibitor for Counting {
        fn acquire(&self, _reason: &str) -> u64 {
            self.acquired.fetch_add(1, Ordering::SeqCst) as u64
        }

        fn release(&self, _id: u64) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn explicit_release_is_not_repeated_on_drop() {
        let counting = Arc::new(Counting::default());
        let guard = InhibitorGuard::acquire(counting.clone(), "prevent-app-suspension");
        guard.release();

        assert_eq!(counting.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(counting.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_releases() {
        let counting = Arc::new(Counting::default());
        {
            let _guard = InhibitorGuard::acquire(counting.clone(), "prevent-app-suspension");
        }
        assert_eq!(counting.released.load(Ordering::SeqCst), 1);
    }
}
