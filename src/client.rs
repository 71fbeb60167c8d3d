//! ClickHouse streaming client.
//!
//! This module provides the main `Client` type for executing queries against
//! the ClickHouse HTTP interface and streaming their results.

use std::pin::Pin;
use std::sync::LazyLock;

use async_stream::stream;
use futures::{Stream, StreamExt, TryStreamExt};
use regex::Regex;
use reqwest::{StatusCode, Url};
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use crate::config::Config;
use crate::decoder::RowDecoder;
use crate::error::{Error, Result};
use crate::row::Row;

/// Boxed response body handed to the decoder.
pub type ResponseBody = Box<dyn AsyncRead + Send + Unpin>;

/// Matches a trailing `FORMAT` clause, semicolon and whitespace so a query
/// can be rewritten to request `TabSeparatedWithNames` exactly once.
static FORMAT_CLAUSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\s+FORMAT\s+[A-Za-z0-9]+)?\s*;?\s*$").unwrap());

/// Matches the `<title>` of an HTML error page returned by a proxy or the
/// server itself.
static HTML_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<title>([^<]+)</title>").unwrap());

/// ClickHouse streaming client.
///
/// Executes SQL over the HTTP interface and decodes `TabSeparatedWithNames`
/// responses row by row, so arbitrarily large result sets are processed with
/// constant memory.
///
/// A client is meant for one in-flight query at a time; it holds no internal
/// locking. Callers needing concurrency should use independent instances.
///
/// # Example
///
/// ```ignore
/// use clickhouse_stream::Client;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = Client::new("localhost", 8123, "default", "");
///
///     let mut rows = client.fetch("SELECT number FROM system.numbers LIMIT 10").await?;
///     while let Some(row) = rows.next().await? {
///         println!("number = {}", row.get_u64("number")?);
///     }
///
///     Ok(())
/// }
/// ```
pub struct Client {
    http: reqwest::Client,
    config: Config,
}

impl Client {
    /// Create a client with default configuration for the given endpoint.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::with_config(Config::new(host, port, user, password))
    }

    /// Create a client from an existing configuration.
    pub fn with_config(config: Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Create a client with a custom `reqwest` client.
    ///
    /// This allows configuring proxies, TLS settings, etc. The aggregate
    /// request timeout is still applied per request from the configuration.
    pub fn with_http_client(http: reqwest::Client, config: Config) -> Self {
        Self { http, config }
    }

    /// The connection configuration, for adjusting settings between queries.
    ///
    /// Changes take effect on requests issued after the call. Reconfiguring
    /// while a query is in flight is not supported.
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Set the retry policy: number of attempts and the wait between them.
    pub fn attempts(&mut self, amount: u32, wait_secs: u64) {
        self.config.attempts(amount, wait_secs);
    }

    /// Set the `max_memory_usage` limit (bytes) passed to the server.
    pub fn max_memory_usage(&mut self, limit: u64) {
        self.config.max_memory_usage(limit);
    }

    /// Set the server-side connect timeout in seconds.
    pub fn connect_timeout(&mut self, timeout_secs: u64) {
        self.config.connect_timeout(timeout_secs);
    }

    /// Set the server-side send timeout in seconds.
    pub fn send_timeout(&mut self, timeout_secs: u64) {
        self.config.send_timeout(timeout_secs);
    }

    /// Set the server-side receive timeout in seconds.
    pub fn receive_timeout(&mut self, timeout_secs: u64) {
        self.config.receive_timeout(timeout_secs);
    }

    /// Toggle printing trace messages to stdout.
    pub fn stdout(&mut self, enabled: bool) {
        self.config.stdout(enabled);
    }

    /// Register a sink receiving every trace message for this connection.
    pub fn trace_sink(&mut self, sink: impl Fn(&str) + Send + Sync + 'static) {
        self.config.trace_sink(sink);
    }

    /// Execute a statement that produces no result set.
    ///
    /// The response body is drained and discarded.
    pub async fn execute(&self, query: &str) -> Result<()> {
        self.config.trace.emit(&format!("Try to execute \"{query}\""));

        let mut body = self.send_query(query.to_string()).await.inspect_err(|e| {
            self.config.trace.emit(&format!("Catch error {e}"));
        })?;

        tokio::io::copy(&mut body, &mut tokio::io::sink()).await?;

        self.config.trace.emit(&format!("The query is executed {query}"));

        Ok(())
    }

    /// Execute a query and return a streaming row decoder.
    ///
    /// The query is rewritten to request the `TabSeparatedWithNames` format.
    /// The caller owns the decoder and with it the open response stream;
    /// dropping the decoder (or calling `close`) releases it.
    pub async fn fetch(&self, query: &str) -> Result<RowDecoder<ResponseBody>> {
        self.config.trace.emit(&format!("Try to fetch {query}"));

        let rewritten = rewrite_format_clause(query);

        let body = self.send_query(rewritten).await.inspect_err(|e| {
            self.config.trace.emit(&format!("Catch error {e}"));
        })?;

        self.config.trace.emit("Open stream to fetch");

        Ok(RowDecoder::with_trace(body, self.config.trace.clone()))
    }

    /// Execute a query and return its first row, if any.
    ///
    /// The underlying stream is always closed before returning, even when the
    /// result set has more rows or none at all.
    pub async fn fetch_one(&self, query: &str) -> Result<Option<Row>> {
        let mut rows = self.fetch(query).await?;

        let first = rows.next().await;
        rows.close();

        first
    }

    /// Execute a query and return results as an async stream of rows.
    ///
    /// Results are decoded one record at a time, so arbitrarily large result
    /// sets are processed without loading them into memory.
    pub async fn query_stream(
        &self,
        query: &str,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<Row>> + Send>>> {
        let mut rows = self.fetch(query).await?;

        let s = stream! {
            loop {
                match rows.next().await {
                    Ok(Some(row)) => yield Ok(row),
                    Ok(None) => break,       // EOF
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(s))
    }

    /// Execute a query and collect all rows into a Vec.
    ///
    /// **Warning**: This loads the full result set into memory. For large
    /// results, use [`fetch`](Self::fetch) or
    /// [`query_stream`](Self::query_stream) instead.
    pub async fn query(&self, query: &str) -> Result<Vec<Row>> {
        let mut stream = self.query_stream(query).await?;
        let mut results = Vec::new();

        while let Some(item) = stream.next().await {
            results.push(item?);
        }

        Ok(results)
    }

    /// Build the request URL: endpoint, escaped credentials and the
    /// stringified server settings as query parameters.
    fn server_url(&self) -> Result<Url> {
        let config = &self.config;

        let mut url = Url::parse(&format!("http://{}:{}/", config.host, config.port)).map_err(
            |e| Error::RequestBuild {
                host: config.host.clone(),
                message: e.to_string(),
            },
        )?;

        // Reserved characters in credentials are percent-escaped.
        url.set_username(&config.user)
            .and_then(|()| url.set_password(Some(&config.password)))
            .map_err(|()| Error::RequestBuild {
                host: config.host.clone(),
                message: "can't embed credentials in URL".to_string(),
            })?;

        url.query_pairs_mut()
            .append_pair("max_memory_usage", &config.max_memory_usage.to_string())
            .append_pair("connect_timeout", &config.connect_timeout.to_string())
            .append_pair("send_timeout", &config.send_timeout.to_string());

        Ok(url)
    }

    /// Run the request/retry cycle and return the open response body.
    ///
    /// Transport failures (DNS, connect, timeout) are retried up to the
    /// configured attempt count with the configured wait in between. A non-200
    /// response is a protocol error and is never retried.
    async fn send_query(&self, query: String) -> Result<ResponseBody> {
        let url = self.server_url()?;
        let timeout = self.config.request_timeout();

        let mut attempts = 0;

        let response = loop {
            attempts += 1;

            let sent = self
                .http
                .post(url.clone())
                .header("Content-Type", "text/plain")
                .header("Pragma", "no-cache")
                .header("Cache-Control", "no-cache")
                .timeout(timeout)
                .body(query.clone())
                .send()
                .await;

            match sent {
                Ok(response) if response.status() == StatusCode::OK => break response,
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    let message = extract_error_message(&body);

                    self.config
                        .trace
                        .emit(&format!("Catch error status {status}: {message}"));

                    return Err(Error::Server { status, message });
                }
                Err(e) if attempts < self.config.retry_attempts => {
                    self.config.trace.emit(&format!(
                        "Catch error {e}, retrying (attempt {attempts} of {})",
                        self.config.retry_attempts
                    ));

                    if self.config.retry_wait > 0 {
                        tokio::time::sleep(std::time::Duration::from_secs(self.config.retry_wait))
                            .await;
                    }
                }
                Err(e) => return Err(Error::Transport(e)),
            }
        };

        let reader = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));

        Ok(Box::new(reader))
    }
}

/// Rewrite a query to end with exactly one ` FORMAT TabSeparatedWithNames`
/// clause, stripping any existing trailing `FORMAT` clause, semicolon and
/// whitespace first.
fn rewrite_format_clause(query: &str) -> String {
    let kept = match FORMAT_CLAUSE.find(query) {
        Some(m) => &query[..m.start()],
        None => query,
    };

    format!("{kept} FORMAT TabSeparatedWithNames")
}

/// Extract a human-readable message from a non-200 response body.
///
/// HTML error pages yield their `<title>` text; anything else is used as-is.
/// An empty body yields a fixed message instead of being indexed into.
fn extract_error_message(body: &str) -> String {
    if body.is_empty() {
        return "empty error body".to_string();
    }

    if body.starts_with('<') {
        if let Some(caps) = HTML_TITLE.captures(body) {
            return caps[1].to_string();
        }
    }

    body.trim().to_string()
}
