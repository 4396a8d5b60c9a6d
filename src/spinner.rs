//! Progress line shown while the browser redirect is outstanding.

use std::io::Write;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::auth::AuthState;

const FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

const INTERVAL: Duration = Duration::from_millis(120);

/// Spins on stderr for as long as an authorizer sits in
/// [`AuthState::AwaitingCallback`], so the URL printed on stdout stays copyable.
pub struct Spinner {
    handle: JoinHandle<()>,
}

impl Spinner {
    /// Follow `state`. Nothing is drawn unless the grant actually waits on the
    /// browser; the line is cleared as soon as it stops waiting.
    pub fn follow(mut state: watch::Receiver<AuthState>, target: String) -> Self {
        let handle = tokio::spawn(async move {
            let awaiting = state
                .wait_for(|s| *s != AuthState::Unauthenticated)
                .await
                .is_ok_and(|s| *s == AuthState::AwaitingCallback);
            if !awaiting {
                return;
            }

            let started = Instant::now();
            // First frame after one interval, once the URL is on screen.
            let mut ticker = tokio::time::interval_at(started + INTERVAL, INTERVAL);
            let mut frame = 0;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let line = label(&target, started.elapsed().as_secs());
                        eprint!("\x1b[2K\r{} {line}", FRAMES[frame % FRAMES.len()]);
                        let _ = std::io::stderr().flush();
                        frame += 1;
                    }
                    changed = state.changed() => {
                        if changed.is_err() || *state.borrow() != AuthState::AwaitingCallback {
                            break;
                        }
                    }
                }
            }
            eprint!("\x1b[2K\r");
            let _ = std::io::stderr().flush();
        });

        Self { handle }
    }

    /// Wait for the line to be cleared. Returns once the followed state has left
    /// `AwaitingCallback` (or never entered it).
    pub async fn finish(self) {
        let _ = self.handle.await;
    }
}

fn label(target: &str, elapsed_secs: u64) -> String {
    let mut line = format!("waiting for the browser redirect to {target}");
    if elapsed_secs > 0 {
        line.push_str(&format!(" ({elapsed_secs}s)"));
    }
    line
}
