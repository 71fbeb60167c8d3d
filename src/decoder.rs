//! Streaming decoder for `TabSeparatedWithNames` response bodies.
//!
//! The decoder reads the response line by line and never buffers the full
//! result set: it holds the column index, the line being decoded and nothing
//! else.

use std::collections::BTreeMap;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};

use crate::config::Trace;
use crate::error::{Error, Result};
use crate::row::Row;

/// Decoder state. The header is parsed exactly once, as its own state rather
/// than a side effect of the first read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DecoderState {
    /// Stream open, header line not read yet.
    HeaderPending,
    /// Header parsed, yielding data rows.
    Streaming,
    /// Underlying stream released.
    Closed,
}

/// Async streaming decoder for tab-separated rows with a leading header line.
///
/// Yields [`Row`]s one at a time from any `AsyncRead` source. The first call
/// to [`next`](Self::next) reads the header line and builds the column
/// name-to-position index; every later call decodes one data row.
///
/// # Example
///
/// ```ignore
/// let mut rows = client.fetch("SELECT name, value FROM metrics").await?;
/// while let Some(row) = rows.next().await? {
///     println!("{} = {}", row.get("name")?, row.get_f64("value")?);
/// }
/// ```
pub struct RowDecoder<R: AsyncRead + Unpin> {
    lines: Option<Lines<BufReader<R>>>,
    columns: BTreeMap<String, usize>,
    state: DecoderState,
    trace: Trace,
}

impl<R: AsyncRead + Unpin> std::fmt::Debug for RowDecoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowDecoder")
            .field("columns", &self.columns)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<R: AsyncRead + Unpin> RowDecoder<R> {
    /// Create a decoder over a raw byte source.
    pub fn new(reader: R) -> Self {
        Self::with_trace(reader, Trace::default())
    }

    pub(crate) fn with_trace(reader: R, trace: Trace) -> Self {
        Self {
            lines: Some(BufReader::new(reader).lines()),
            columns: BTreeMap::new(),
            state: DecoderState::HeaderPending,
            trace,
        }
    }

    /// Column name to zero-based position, as declared by the header line.
    ///
    /// Empty until the first call to [`next`](Self::next), and empty forever
    /// for a response with no header line.
    pub fn columns(&self) -> &BTreeMap<String, usize> {
        &self.columns
    }

    /// Whether the underlying stream has been released.
    pub fn is_closed(&self) -> bool {
        self.state == DecoderState::Closed
    }

    /// Advance to the next row.
    ///
    /// Returns:
    /// - `Ok(Some(row))` - one decoded data row
    /// - `Ok(None)` - end of stream; the decoder is closed
    /// - `Err(e)` - read or decode failure; the decoder is closed
    ///
    /// A clean end of stream and a failure both end the iteration, but only a
    /// failure surfaces as an error.
    pub async fn next(&mut self) -> Result<Option<Row>> {
        if self.state == DecoderState::Closed {
            return Ok(None);
        }

        if self.state == DecoderState::HeaderPending {
            match self.read_line().await {
                Ok(Some(line)) => {
                    for (index, column) in line.split('\t').enumerate() {
                        self.columns.insert(column.to_string(), index);
                    }
                    self.state = DecoderState::Streaming;

                    self.trace.emit("Load field names");
                }
                // Empty response: no header, no rows.
                Ok(None) => {
                    self.close();
                    return Ok(None);
                }
                Err(e) => {
                    self.close();
                    return Err(e);
                }
            }
        }

        match self.read_line().await {
            Ok(Some(line)) => match self.decode_row(&line) {
                Ok(row) => {
                    self.trace.emit("Load new data");
                    Ok(Some(row))
                }
                Err(e) => {
                    self.close();
                    Err(e)
                }
            },
            Ok(None) => {
                self.close();
                Ok(None)
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    /// Release the underlying stream. Idempotent: closing twice is a no-op.
    pub fn close(&mut self) {
        if self.lines.take().is_some() {
            self.trace.emit("The query is fetched");
        }

        self.state = DecoderState::Closed;
    }

    async fn read_line(&mut self) -> Result<Option<String>> {
        match &mut self.lines {
            Some(lines) => Ok(lines.next_line().await?),
            None => Ok(None),
        }
    }

    fn decode_row(&self, line: &str) -> Result<Row> {
        let fields: Vec<&str> = line.split('\t').collect();
        let mut values = BTreeMap::new();

        for (column, &index) in &self.columns {
            // A short row is a decode error, never an out-of-range access.
            let field = fields.get(index).ok_or(Error::RowTooShort {
                expected: self.columns.len(),
                actual: fields.len(),
            })?;
            values.insert(column.clone(), field.to_string());
        }

        Ok(Row::new(values))
    }
}

impl<R: AsyncRead + Unpin> Drop for RowDecoder<R> {
    fn drop(&mut self) {
        self.close();
    }
}
