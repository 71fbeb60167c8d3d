//! A single decoded result row with typed field accessors.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{Error, Result};

/// One row of a query result, keyed by column name.
///
/// Fields are kept as the raw strings received from the server and coerced on
/// demand; coercion is never cached. Asking for a column that does not exist
/// is a [`Error::ColumnNotFound`], never a zero value, and is distinct from a
/// failed coercion.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    values: BTreeMap<String, String>,
}

impl Row {
    pub(crate) fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    /// Number of fields in this row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row holds no fields.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column names present in this row.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Get the raw field string for a column.
    pub fn get(&self, column: &str) -> Result<&str> {
        self.values
            .get(column)
            .map(String::as_str)
            .ok_or_else(|| Error::ColumnNotFound(column.to_string()))
    }

    /// Get the field as an owned string.
    pub fn get_string(&self, column: &str) -> Result<String> {
        self.get(column).map(str::to_string)
    }

    /// Get the raw field bytes.
    pub fn get_bytes(&self, column: &str) -> Result<&[u8]> {
        self.get(column).map(str::as_bytes)
    }

    fn parse<T>(&self, column: &str, target: &'static str) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let value = self.get(column)?;

        value.parse().map_err(|e: T::Err| Error::Conversion {
            value: value.to_string(),
            target,
            message: e.to_string(),
        })
    }

    /// Get the field as an unsigned 8-bit integer.
    pub fn get_u8(&self, column: &str) -> Result<u8> {
        self.parse(column, "uint8")
    }

    /// Get the field as an unsigned 16-bit integer.
    pub fn get_u16(&self, column: &str) -> Result<u16> {
        self.parse(column, "uint16")
    }

    /// Get the field as an unsigned 32-bit integer.
    pub fn get_u32(&self, column: &str) -> Result<u32> {
        self.parse(column, "uint32")
    }

    /// Get the field as an unsigned 64-bit integer.
    pub fn get_u64(&self, column: &str) -> Result<u64> {
        self.parse(column, "uint64")
    }

    /// Get the field as a signed 8-bit integer.
    pub fn get_i8(&self, column: &str) -> Result<i8> {
        self.parse(column, "int8")
    }

    /// Get the field as a signed 16-bit integer.
    pub fn get_i16(&self, column: &str) -> Result<i16> {
        self.parse(column, "int16")
    }

    /// Get the field as a signed 32-bit integer.
    pub fn get_i32(&self, column: &str) -> Result<i32> {
        self.parse(column, "int32")
    }

    /// Get the field as a signed 64-bit integer.
    pub fn get_i64(&self, column: &str) -> Result<i64> {
        self.parse(column, "int64")
    }

    /// Get the field as a 32-bit float.
    pub fn get_f32(&self, column: &str) -> Result<f32> {
        self.parse(column, "float32")
    }

    /// Get the field as a 64-bit float.
    pub fn get_f64(&self, column: &str) -> Result<f64> {
        self.parse(column, "float64")
    }

    /// Get the field as a `Date` in strict `YYYY-MM-DD` layout.
    pub fn get_date(&self, column: &str) -> Result<NaiveDate> {
        let value = self.get(column)?;

        NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| Error::Conversion {
            value: value.to_string(),
            target: "date",
            message: e.to_string(),
        })
    }

    /// Get the field as a `DateTime` in strict `YYYY-MM-DD HH:MM:SS` layout.
    pub fn get_datetime(&self, column: &str) -> Result<NaiveDateTime> {
        let value = self.get(column)?;

        NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").map_err(|e| {
            Error::Conversion {
                value: value.to_string(),
                target: "datetime",
                message: e.to_string(),
            }
        })
    }
}
