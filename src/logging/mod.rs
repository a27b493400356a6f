//! Logging and output control
//!
//! [`Logger`] writes user-visible progress to stderr, keeping stdout for command
//! results (a content identifier, an image id). Diagnostics go through `tracing`,
//! set up by [`init_tracing`].

use std::io::{self, Write};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Logger responsible for all user-visible output
#[derive(Debug, Clone)]
pub struct Logger {
    pub verbose: bool,
    pub quiet: bool,
}

impl Logger {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            quiet: false,
        }
    }

    pub fn new_quiet() -> Self {
        Self {
            verbose: false,
            quiet: true,
        }
    }

    fn emit(&self, line: &str) {
        let mut err = io::stderr().lock();
        let _ = writeln!(err, "{}", line);
    }

    /// Main section heading
    pub fn section(&self, title: &str) {
        if !self.quiet {
            self.emit(&format!("\n=== {} ===", title));
        }
    }

    /// Success message
    pub fn success(&self, message: &str) {
        if !self.quiet {
            self.emit(&format!("✅ {}", message));
        }
    }

    /// Errors are shown even in quiet mode
    pub fn error(&self, message: &str) {
        self.emit(&format!("❌ ERROR: {}", message));
    }

    /// Step information
    pub fn step(&self, message: &str) {
        if !self.quiet {
            self.emit(&format!("▶️  {}", message));
        }
    }

    /// Detailed information (only shown in verbose mode)
    pub fn detail(&self, message: &str) {
        if self.verbose && !self.quiet {
            self.emit(&format!("   {}", message));
        }
    }

    /// Format file size in human-readable units
    pub fn format_size(&self, bytes: u64) -> String {
        if bytes < 1024 {
            format!("{} B", bytes)
        } else if bytes < 1024 * 1024 {
            format!("{:.1} KB", bytes as f64 / 1024.0)
        } else if bytes < 1024 * 1024 * 1024 {
            format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
        } else {
            format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
        }
    }

    /// Format duration in human-readable format
    pub fn format_duration(&self, duration: Duration) -> String {
        let secs = duration.as_secs();
        if secs == 0 {
            format!("{}ms", duration.as_millis())
        } else if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m{}s", secs / 60, secs % 60)
        } else {
            format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
        }
    }
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` is honoured unless `debug` forces debug output for this crate.
pub fn init_tracing(debug: bool) {
    let filter = match (debug, EnvFilter::try_from_default_env()) {
        (true, _) => EnvFilter::new("gantry=debug"),
        (false, Ok(env)) => env,
        (false, Err(_)) => EnvFilter::new("gantry=warn"),
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true)
        .try_init();
}
