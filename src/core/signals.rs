/*
 * Interrupt handling for backup runs. SIGINT, SIGTERM and SIGHUP always raise a
 * shared "interrupted" flag. Outside a run the default action (termination) is
 * emulated; while an `InterruptGuard` is alive the signal is only recorded, so the
 * run can drain the tool's output, roll back and release its lock before reporting.
 */
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const TERM_SIGNALS: [i32; 3] = [SIGINT, SIGTERM, SIGHUP];

#[derive(Debug, Clone)]
pub struct InterruptMonitor {
    interrupted: Arc<AtomicBool>,
    idle: Arc<AtomicBool>,
}

impl InterruptMonitor {
    // Registers the process-wide handlers. Call once, early in `main`.
    pub fn install() -> io::Result<Self> {
        let monitor = Self::detached();
        for signal in TERM_SIGNALS {
            signal_hook::flag::register_conditional_default(signal, Arc::clone(&monitor.idle))?;
            signal_hook::flag::register(signal, Arc::clone(&monitor.interrupted))?;
        }
        log::debug!("InterruptMonitor: Handlers installed for INT, TERM and HUP.");
        Ok(monitor)
    }

    // A monitor with no handlers attached, for callers that never receive signals.
    pub fn detached() -> Self {
        InterruptMonitor {
            interrupted: Arc::new(AtomicBool::new(false)),
            idle: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Marks a run as active until the returned guard is dropped. Any interrupt
    /// recorded before the run started is cleared.
    pub fn guard(&self) -> InterruptGuard {
        self.interrupted.store(false, Ordering::SeqCst);
        self.idle.store(false, Ordering::SeqCst);
        InterruptGuard {
            idle: Arc::clone(&self.idle),
        }
    }

    #[cfg(test)]
    pub fn trigger(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct InterruptGuard {
    idle: Arc<AtomicBool>,
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        self.idle.store(true, Ordering::SeqCst);
    }
}
