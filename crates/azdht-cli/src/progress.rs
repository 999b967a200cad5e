//! Terminal progress display and formatting helpers.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner shown while STUN probes are in flight
pub struct DiscoveryProgress {
    bar: ProgressBar,
}

impl DiscoveryProgress {
    /// Start a spinner with `msg`
    #[must_use]
    pub fn new(msg: &str) -> Self {
        let bar = ProgressBar::new_spinner();

        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(msg.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Finish with a result message
    pub fn finish_with_message(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }

    /// Remove the spinner (for errors)
    pub fn abandon(&self) {
        self.bar.finish_and_clear();
    }
}

/// Format a short duration for display
#[must_use]
pub fn format_elapsed(duration: Duration) -> String {
    let millis = duration.as_millis();

    if millis < 1000 {
        format!("{millis} ms")
    } else {
        format!("{:.2} s", duration.as_secs_f64())
    }
}

/// Format an RTT estimate in milliseconds, which is NaN when unknown
#[must_use]
pub fn format_rtt(rtt: f32) -> String {
    if rtt.is_nan() {
        "unknown (coordinate at origin)".to_string()
    } else {
        format!("{rtt:.2} ms")
    }
}
