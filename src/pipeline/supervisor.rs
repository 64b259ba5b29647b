use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;

use super::LoopState;

pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(10);
const STOP_POLL: Duration = Duration::from_millis(50);

/// Sleep for `duration`, waking early once `stop` is raised.
/// Returns `true` if the full duration elapsed.
pub fn sleep_unless_stopped(duration: Duration, stop: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(STOP_POLL));
    }
}

/// Run `attempt` until it finishes cleanly.
///
/// A failed attempt (initialization or a fatal loop error) is retried after
/// `restart_delay` for live sources, indefinitely. For file sources the
/// first failure is returned.
pub fn run_with_restart<F>(
    live: bool,
    restart_delay: Duration,
    stop: &AtomicBool,
    mut attempt: F,
) -> Result<LoopState>
where
    F: FnMut() -> Result<LoopState>,
{
    loop {
        if stop.load(Ordering::SeqCst) {
            return Ok(LoopState::Stopped);
        }
        match attempt() {
            Ok(state) => return Ok(state),
            Err(e) if live => {
                log::error!(
                    "critical error in detection pipeline: {:#}; restarting in {}s",
                    e,
                    restart_delay.as_secs()
                );
                if !sleep_unless_stopped(restart_delay, stop) {
                    return Ok(LoopState::Stopped);
                }
            }
            Err(e) => {
                log::error!("critical error in detection pipeline: {:#}", e);
                return Err(e);
            }
        }
    }
}
