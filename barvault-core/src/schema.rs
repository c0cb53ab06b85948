//! Structural schema contract for bars on their way into storage.
//!
//! Two layers:
//! - [`validate_batch`] / [`validate_partition_rows`] check typed [`Bar`] rows
//!   (shape and ordering only, no OHLC business rules).
//! - [`BarSchema`] is the Parquet column contract every job file must satisfy:
//!
//! | column        | dtype   | required |
//! |---------------|---------|----------|
//! | `ts_ns`       | Int64   | yes      |
//! | `symbol`      | String  | yes      |
//! | `open`..`close` | Float64 | yes    |
//! | `volume`      | Int64   | yes      |
//! | `trade_count` | Int64   | no       |
//! | `vwap`        | Float64 | no       |

use crate::domain::Bar;
use chrono::NaiveDate;
use polars::prelude::*;

pub const COL_TS_NS: &str = "ts_ns";
pub const COL_SYMBOL: &str = "symbol";
pub const COL_OPEN: &str = "open";
pub const COL_HIGH: &str = "high";
pub const COL_LOW: &str = "low";
pub const COL_CLOSE: &str = "close";
pub const COL_VOLUME: &str = "volume";
pub const COL_TRADE_COUNT: &str = "trade_count";
pub const COL_VWAP: &str = "vwap";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Type mismatch in column {column}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: DataType,
    },

    #[error("row {row}: {reason}")]
    InvalidRow { row: usize, reason: String },

    #[error("row {row}: timestamp {ts_ns} does not increase over previous {previous_ns}")]
    NonIncreasingTimestamp {
        row: usize,
        ts_ns: i64,
        previous_ns: i64,
    },

    #[error("row {row}: belongs to {actual}, not partition {expected}")]
    PartitionMismatch {
        row: usize,
        expected: String,
        actual: String,
    },
}

/// Validate a fetch batch before it is allowed into storage.
///
/// Fails on the first violation; there is no partial acceptance.
pub fn validate_batch(rows: &[Bar]) -> Result<(), SchemaError> {
    let Some(first) = rows.first() else {
        return Ok(());
    };
    let mut previous: Option<i64> = None;

    for (row, bar) in rows.iter().enumerate() {
        if bar.symbol.trim().is_empty() {
            return Err(invalid(row, "symbol is empty"));
        }
        if bar.symbol != first.symbol {
            return Err(invalid(
                row,
                format!("symbol '{}' differs from batch symbol '{}'", bar.symbol, first.symbol),
            ));
        }
        for (name, value) in [
            (COL_OPEN, bar.open),
            (COL_HIGH, bar.high),
            (COL_LOW, bar.low),
            (COL_CLOSE, bar.close),
        ] {
            if !value.is_finite() {
                return Err(invalid(row, format!("{name} is not a finite number")));
            }
        }
        if let Some(vwap) = bar.vwap {
            if !vwap.is_finite() {
                return Err(invalid(row, "vwap is not a finite number"));
            }
        }
        if i64::try_from(bar.volume).is_err() {
            return Err(invalid(row, "volume exceeds int64 range"));
        }
        if let Some(count) = bar.trade_count {
            if i64::try_from(count).is_err() {
                return Err(invalid(row, "trade_count exceeds int64 range"));
            }
        }
        if let Some(prev) = previous {
            if bar.ts_ns <= prev {
                return Err(SchemaError::NonIncreasingTimestamp {
                    row,
                    ts_ns: bar.ts_ns,
                    previous_ns: prev,
                });
            }
        }
        previous = Some(bar.ts_ns);
    }

    Ok(())
}

/// Check that every row belongs to the `(symbol, day)` partition it is written to.
pub fn validate_partition_rows(
    rows: &[Bar],
    symbol: &str,
    day: NaiveDate,
) -> Result<(), SchemaError> {
    for (row, bar) in rows.iter().enumerate() {
        if bar.symbol != symbol {
            return Err(SchemaError::PartitionMismatch {
                row,
                expected: format!("symbol={symbol}"),
                actual: format!("symbol={}", bar.symbol),
            });
        }
        let bar_day = bar.trading_day();
        if bar_day != day {
            return Err(SchemaError::PartitionMismatch {
                row,
                expected: format!("date={day}"),
                actual: format!("date={bar_day}"),
            });
        }
    }
    Ok(())
}

fn invalid(row: usize, reason: impl Into<String>) -> SchemaError {
    SchemaError::InvalidRow {
        row,
        reason: reason.into(),
    }
}

/// Expected Parquet schema for a job file
pub struct BarSchema;

impl BarSchema {
    /// Required columns of every job file.
    pub fn schema() -> Schema {
        Schema::from_iter(vec![
            Field::new(COL_TS_NS.into(), DataType::Int64),
            Field::new(COL_SYMBOL.into(), DataType::String),
            Field::new(COL_OPEN.into(), DataType::Float64),
            Field::new(COL_HIGH.into(), DataType::Float64),
            Field::new(COL_LOW.into(), DataType::Float64),
            Field::new(COL_CLOSE.into(), DataType::Float64),
            Field::new(COL_VOLUME.into(), DataType::Int64),
        ])
    }

    /// Columns that may be present; checked for dtype only when they are.
    pub fn optional() -> Schema {
        Schema::from_iter(vec![
            Field::new(COL_TRADE_COUNT.into(), DataType::Int64),
            Field::new(COL_VWAP.into(), DataType::Float64),
        ])
    }

    /// Validate DataFrame against schema
    pub fn validate(df: &DataFrame) -> Result<(), SchemaError> {
        let expected = Self::schema();
        let actual = df.schema();

        for field in expected.iter_fields() {
            let actual_dtype = actual
                .get(field.name())
                .ok_or_else(|| SchemaError::MissingColumn(field.name().to_string()))?;
            if actual_dtype != field.dtype() {
                return Err(SchemaError::TypeMismatch {
                    column: field.name().to_string(),
                    expected: field.dtype().clone(),
                    actual: actual_dtype.clone(),
                });
            }
        }

        for field in Self::optional().iter_fields() {
            if let Some(actual_dtype) = actual.get(field.name()) {
                // An all-null optional column may come back untyped.
                if actual_dtype != field.dtype() && actual_dtype != &DataType::Null {
                    return Err(SchemaError::TypeMismatch {
                        column: field.name().to_string(),
                        expected: field.dtype().clone(),
                        actual: actual_dtype.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(ts_ns: i64) -> Bar {
        Bar {
            symbol: "AAPL".into(),
            ts_ns,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 1_000,
            trade_count: None,
            vwap: Some(100.2),
        }
    }

    #[test]
    fn accepts_well_formed_batch() {
        let rows = vec![bar(1), bar(2), bar(3)];
        assert!(validate_batch(&rows).is_ok());
        assert!(validate_batch(&[]).is_ok());
    }

    #[test]
    fn rejects_non_increasing_timestamps() {
        let rows = vec![bar(1), bar(3), bar(3)];
        assert!(matches!(
            validate_batch(&rows),
            Err(SchemaError::NonIncreasingTimestamp { row: 2, .. })
        ));
    }

    #[test]
    fn rejects_nan_price() {
        let mut rows = vec![bar(1), bar(2)];
        rows[1].close = f64::NAN;
        assert!(matches!(
            validate_batch(&rows),
            Err(SchemaError::InvalidRow { row: 1, .. })
        ));
    }

    #[test]
    fn rejects_mixed_symbols() {
        let mut rows = vec![bar(1), bar(2)];
        rows[1].symbol = "MSFT".into();
        assert!(validate_batch(&rows).is_err());
    }

    #[test]
    fn rejects_volume_beyond_storage_type() {
        let mut rows = vec![bar(1)];
        rows[0].volume = u64::MAX;
        assert!(validate_batch(&rows).is_err());
    }

    #[test]
    fn does_not_check_ohlc_consistency() {
        // high below low is a business-rule problem, not a structural one
        let mut rows = vec![bar(1)];
        rows[0].high = 1.0;
        assert!(validate_batch(&rows).is_ok());
    }

    #[test]
    fn partition_rows_must_match_day() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let rows = vec![bar(1_705_312_200_000_000_000)];
        assert!(validate_partition_rows(&rows, "AAPL", day).is_ok());

        let other_day = NaiveDate::from_ymd_opt(2024, 1, 16).unwrap();
        assert!(matches!(
            validate_partition_rows(&rows, "AAPL", other_day),
            Err(SchemaError::PartitionMismatch { .. })
        ));
        assert!(validate_partition_rows(&rows, "MSFT", day).is_err());
    }

    #[test]
    fn test_validate_rejects_missing_column() {
        let df = DataFrame::new(vec![
            Column::new(COL_TS_NS.into(), &[1i64]),
            Column::new(COL_SYMBOL.into(), &["AAPL"]),
            Column::new(COL_OPEN.into(), &[400.0]),
        ])
        .unwrap();

        assert!(matches!(
            BarSchema::validate(&df),
            Err(SchemaError::MissingColumn(_))
        ));
    }

    #[test]
    fn test_validate_rejects_wrong_type() {
        let df = DataFrame::new(vec![
            Column::new(COL_TS_NS.into(), &[1i64]),
            Column::new(COL_SYMBOL.into(), &["AAPL"]),
            Column::new(COL_OPEN.into(), &["not_a_number"]),
            Column::new(COL_HIGH.into(), &[405.0]),
            Column::new(COL_LOW.into(), &[399.0]),
            Column::new(COL_CLOSE.into(), &[403.0]),
            Column::new(COL_VOLUME.into(), &[1_000i64]),
        ])
        .unwrap();

        assert!(matches!(
            BarSchema::validate(&df),
            Err(SchemaError::TypeMismatch { .. })
        ));
    }
}
