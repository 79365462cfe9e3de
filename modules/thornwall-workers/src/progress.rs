//! Terminal progress bars. Purely presentational; one bar per worker
//! instance, repainted by a single renderer task.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

const BAR_WIDTH: usize = 25;
const REPAINT_INTERVAL: Duration = Duration::from_millis(250);

struct BarState {
    label: String,
    message: String,
    percent: u8,
}

/// Shared handle to one worker's progress line.
#[derive(Clone)]
pub struct Bar {
    state: Arc<Mutex<BarState>>,
}

impl Bar {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(BarState {
                label: label.into(),
                message: String::new(),
                percent: 0,
            })),
        }
    }

    pub fn set_step_message(&self, message: impl Into<String>, percent: u8) {
        let mut state = self.state.lock().expect("bar lock poisoned");
        state.message = message.into();
        state.percent = percent.min(100);
    }

    pub fn reset(&self) {
        let mut state = self.state.lock().expect("bar lock poisoned");
        state.message.clear();
        state.percent = 0;
    }

    fn render_line(&self) -> String {
        let state = self.state.lock().expect("bar lock poisoned");
        let filled = (state.percent as usize * BAR_WIDTH) / 100;
        let bar: String = "#".repeat(filled) + &"-".repeat(BAR_WIDTH - filled);
        format!(
            "{:<12} [{bar}] {:>3}% {}",
            state.label, state.percent, state.message
        )
    }
}

/// Repaints all bars in place on a fixed cadence.
pub struct Renderer {
    bars: Vec<Bar>,
}

impl Renderer {
    pub fn new(bars: Vec<Bar>) -> Self {
        Self { bars }
    }

    /// Spawn the repaint loop; it stops when the token cancels.
    pub fn spawn(self, ctx: &CancellationToken) {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let mut painted_lines = 0usize;
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = tokio::time::sleep(REPAINT_INTERVAL) => {
                        // Move the cursor back over the previous frame.
                        if painted_lines > 0 {
                            print!("\x1b[{painted_lines}A");
                        }
                        for bar in &self.bars {
                            println!("\x1b[2K{}", bar.render_line());
                        }
                        painted_lines = self.bars.len();
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_percent_and_message() {
        let bar = Bar::new("Worker 0");
        bar.set_step_message("Fetching user info", 40);

        let line = bar.render_line();
        assert!(line.contains("Worker 0"));
        assert!(line.contains("40%"));
        assert!(line.contains("Fetching user info"));
        assert!(line.contains("##########---------------"));
    }

    #[test]
    fn reset_clears_state() {
        let bar = Bar::new("Worker 1");
        bar.set_step_message("Completed", 100);
        bar.reset();

        let line = bar.render_line();
        assert!(line.contains("  0%"));
    }

    #[test]
    fn percent_saturates_at_100() {
        let bar = Bar::new("w");
        bar.set_step_message("overflow", 250);
        assert!(bar.render_line().contains("100%"));
    }
}
