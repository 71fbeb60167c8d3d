//! Connection configuration and per-connection tracing.
//!
//! `Config` is plain data: host, credentials, memory limit, the three server
//! timeouts and the retry policy. Setters take effect on requests issued after
//! the call; a configuration instance is not meant to be reconfigured while a
//! query is in flight.

use std::sync::Arc;
use std::time::Duration;

/// One megabyte, for configuring [`Config::max_memory_usage`].
pub const MEGABYTE: u64 = 1024 * 1024;

/// One gigabyte, for configuring [`Config::max_memory_usage`].
pub const GIGABYTE: u64 = 1024 * MEGABYTE;

/// Callback receiving human-readable trace messages.
pub type TraceSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Per-connection trace dispatch.
///
/// Messages go to the registered sink (if any) and to stdout when the verbose
/// toggle is on. With neither, emitting is a no-op apart from a debug-level
/// `tracing` event. Trace messages are advisory only and never replace
/// returned errors.
#[derive(Clone, Default)]
pub(crate) struct Trace {
    pub(crate) stdout: bool,
    pub(crate) sink: Option<TraceSink>,
}

impl Trace {
    pub(crate) fn emit(&self, message: &str) {
        tracing::debug!("{message}");

        if let Some(sink) = &self.sink {
            sink(message);
        }

        if self.stdout {
            println!("{message}");
        }
    }
}

/// Connection configuration for a ClickHouse HTTP endpoint.
///
/// Defaults match the server's conventions: 10s connect timeout, 300s send
/// and receive timeouts, a 2 GiB memory limit and a single request attempt.
#[derive(Clone)]
pub struct Config {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) user: String,
    pub(crate) password: String,
    pub(crate) max_memory_usage: u64,
    pub(crate) connect_timeout: u64,
    pub(crate) send_timeout: u64,
    pub(crate) receive_timeout: u64,
    pub(crate) retry_attempts: u32,
    pub(crate) retry_wait: u64,
    pub(crate) trace: Trace,
}

impl Config {
    /// Create a configuration with default limits, timeouts and retry policy.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            max_memory_usage: 2 * GIGABYTE,
            connect_timeout: 10,
            send_timeout: 300,
            receive_timeout: 300,
            retry_attempts: 1,
            retry_wait: 0,
            trace: Trace::default(),
        }
    }

    /// Set the retry policy: number of attempts and the wait between them.
    ///
    /// At least one attempt always occurs; `amount` is clamped to 1.
    pub fn attempts(&mut self, amount: u32, wait_secs: u64) {
        self.retry_attempts = amount.max(1);
        self.retry_wait = wait_secs;

        self.trace.emit(&format!(
            "Set attempts = {} with wait {} s",
            self.retry_attempts, self.retry_wait
        ));
    }

    /// Set the `max_memory_usage` limit (bytes) passed to the server.
    pub fn max_memory_usage(&mut self, limit: u64) {
        self.max_memory_usage = limit;

        self.trace.emit(&format!("Set max_memory_usage = {limit}"));
    }

    /// Set the server-side connect timeout in seconds.
    pub fn connect_timeout(&mut self, timeout_secs: u64) {
        self.connect_timeout = timeout_secs;

        self.trace.emit(&format!("Set connect_timeout = {timeout_secs} s"));
    }

    /// Set the server-side send timeout in seconds.
    pub fn send_timeout(&mut self, timeout_secs: u64) {
        self.send_timeout = timeout_secs;

        self.trace.emit(&format!("Set send_timeout = {timeout_secs} s"));
    }

    /// Set the server-side receive timeout in seconds.
    pub fn receive_timeout(&mut self, timeout_secs: u64) {
        self.receive_timeout = timeout_secs;

        self.trace.emit(&format!("Set receive_timeout = {timeout_secs} s"));
    }

    /// Toggle printing trace messages to stdout.
    pub fn stdout(&mut self, enabled: bool) {
        self.trace.stdout = enabled;

        self.trace.emit(&format!("Set stdout mode = {enabled}"));
    }

    /// Register a sink receiving every trace message for this connection.
    ///
    /// The sink is owned by this configuration instance; there is no shared
    /// global logger.
    pub fn trace_sink(&mut self, sink: impl Fn(&str) + Send + Sync + 'static) {
        self.trace.sink = Some(Arc::new(sink));

        self.trace.emit("Set custom trace sink");
    }

    /// One deadline for the whole round trip: connect + send + receive.
    pub(crate) fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout + self.send_timeout + self.receive_timeout)
    }
}
