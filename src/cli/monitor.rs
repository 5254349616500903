//! Monitor command implementation.

use clap::Args;
use loopshare::monitor::Monitor;
use loopshare::Result;
use std::time::Duration;

/// Watch the share service and report connection/session/file events.
#[derive(Args, Debug)]
pub struct MonitorCmd {
    /// Polling interval (e.g. "2s", "500ms").
    #[arg(long, default_value = "2s", value_parser = parse_duration)]
    pub interval: Duration,
}

/// Parse a duration string (e.g., "30s", "5m").
fn parse_duration(s: &str) -> std::result::Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}

impl MonitorCmd {
    /// Execute the monitor command. Runs until the process is terminated.
    pub fn run(self) -> Result<()> {
        let mut monitor = Monitor::new();
        monitor.run(self.interval)
    }
}
