//! Exit signal checked once per capture cycle
//!
//! Set by SIGINT/SIGTERM, by the exit key typed on stdin, or by a key press
//! forwarded from the preview window.

use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Set from the signal handler
static SIGNALLED: AtomicBool = AtomicBool::new(false);

#[derive(Clone, Debug, Default)]
pub struct ExitSignal {
    requested: Arc<AtomicBool>,
}

impl ExitSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::Relaxed);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Relaxed) || SIGNALLED.load(Ordering::Relaxed)
    }

    /// Route SIGINT and SIGTERM into the exit flag
    pub fn install_signal_handlers(&self) {
        use std::sync::Once;
        static INIT: Once = Once::new();

        INIT.call_once(|| unsafe {
            let handler = stop_handler as extern "C" fn(libc::c_int) as libc::sighandler_t;
            libc::signal(libc::SIGTERM, handler);
            libc::signal(libc::SIGINT, handler);
        });
    }

    /// Watch stdin for a line starting with `key`
    pub fn watch_stdin(&self, key: char) {
        let signal = self.clone();
        let spawned = std::thread::Builder::new()
            .name("exit-key".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    if is_exit_key(&line, key) {
                        log::info!("Exit key pressed");
                        signal.request();
                        break;
                    }
                }
            });
        if let Err(e) = spawned {
            log::warn!("Cannot watch stdin for the exit key: {}", e);
        }
    }
}

/// Whether an input line (or a key name from the window) means "exit"
pub fn is_exit_key(input: &str, key: char) -> bool {
    let mut chars = input.trim().chars();
    matches!(chars.next(), Some(c) if c.eq_ignore_ascii_case(&key))
        && chars.next().is_none()
}

extern "C" fn stop_handler(_: libc::c_int) {
    SIGNALLED.store(true, Ordering::Relaxed);
}
