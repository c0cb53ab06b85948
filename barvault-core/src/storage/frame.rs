//! Bar rows ⇄ polars DataFrame ⇄ Parquet bytes.

use polars::prelude::*;
use std::fs::File;
use std::path::Path;

use super::{StorageConfig, StorageError};
use crate::domain::Bar;
use crate::schema::{
    BarSchema, COL_CLOSE, COL_HIGH, COL_LOW, COL_OPEN, COL_SYMBOL, COL_TRADE_COUNT, COL_TS_NS,
    COL_VOLUME, COL_VWAP,
};

/// Build the job-file frame. Unsigned counts are stored as Int64.
pub fn bars_to_dataframe(rows: &[Bar]) -> PolarsResult<DataFrame> {
    let ts: Vec<i64> = rows.iter().map(|b| b.ts_ns).collect();
    let symbols: Vec<&str> = rows.iter().map(|b| b.symbol.as_str()).collect();
    let opens: Vec<f64> = rows.iter().map(|b| b.open).collect();
    let highs: Vec<f64> = rows.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = rows.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = rows.iter().map(|b| b.close).collect();
    let volumes: Vec<i64> = rows
        .iter()
        .map(|b| i64::try_from(b.volume).unwrap_or(i64::MAX))
        .collect();
    let trade_counts: Vec<Option<i64>> = rows
        .iter()
        .map(|b| b.trade_count.map(|n| i64::try_from(n).unwrap_or(i64::MAX)))
        .collect();
    let vwaps: Vec<Option<f64>> = rows.iter().map(|b| b.vwap).collect();

    DataFrame::new(vec![
        Column::new(COL_TS_NS.into(), ts),
        Column::new(COL_SYMBOL.into(), symbols),
        Column::new(COL_OPEN.into(), opens),
        Column::new(COL_HIGH.into(), highs),
        Column::new(COL_LOW.into(), lows),
        Column::new(COL_CLOSE.into(), closes),
        Column::new(COL_VOLUME.into(), volumes),
        Column::new(COL_TRADE_COUNT.into(), trade_counts),
        Column::new(COL_VWAP.into(), vwaps),
    ])
}

fn null_at(column: &str, row: usize) -> PolarsError {
    PolarsError::ComputeError(format!("null {column} at row {row}").into())
}

fn required_i64(df: &DataFrame, name: &str) -> PolarsResult<Vec<i64>> {
    df.column(name)?
        .i64()?
        .into_iter()
        .enumerate()
        .map(|(i, v)| v.ok_or_else(|| null_at(name, i)))
        .collect()
}

fn required_f64(df: &DataFrame, name: &str) -> PolarsResult<Vec<f64>> {
    df.column(name)?
        .f64()?
        .into_iter()
        .enumerate()
        .map(|(i, v)| v.ok_or_else(|| null_at(name, i)))
        .collect()
}

fn optional_i64(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<i64>>> {
    match df.column(name) {
        Ok(col) if col.dtype() != &DataType::Null => Ok(col.i64()?.into_iter().collect()),
        _ => Ok(vec![None; df.height()]),
    }
}

fn optional_f64(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<f64>>> {
    match df.column(name) {
        Ok(col) if col.dtype() != &DataType::Null => Ok(col.f64()?.into_iter().collect()),
        _ => Ok(vec![None; df.height()]),
    }
}

/// Inverse of [`bars_to_dataframe`]; the frame must already satisfy [`BarSchema`].
pub fn dataframe_to_bars(df: &DataFrame) -> PolarsResult<Vec<Bar>> {
    let ts = required_i64(df, COL_TS_NS)?;
    let opens = required_f64(df, COL_OPEN)?;
    let highs = required_f64(df, COL_HIGH)?;
    let lows = required_f64(df, COL_LOW)?;
    let closes = required_f64(df, COL_CLOSE)?;
    let volumes = required_i64(df, COL_VOLUME)?;
    let trade_counts = optional_i64(df, COL_TRADE_COUNT)?;
    let vwaps = optional_f64(df, COL_VWAP)?;
    let symbols = df.column(COL_SYMBOL)?.str()?;

    let mut bars = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let symbol = symbols.get(i).ok_or_else(|| null_at(COL_SYMBOL, i))?;
        let volume = u64::try_from(volumes[i]).map_err(|_| {
            PolarsError::ComputeError(format!("negative volume at row {i}").into())
        })?;
        bars.push(Bar {
            symbol: symbol.to_string(),
            ts_ns: ts[i],
            open: opens[i],
            high: highs[i],
            low: lows[i],
            close: closes[i],
            volume,
            trade_count: trade_counts[i].and_then(|n| u64::try_from(n).ok()),
            vwap: vwaps[i],
        });
    }
    Ok(bars)
}

/// Write `df` to `path` with the configured codec and fsync it.
pub fn write_parquet(df: &mut DataFrame, path: &Path, config: &StorageConfig) -> Result<(), StorageError> {
    let mut file = File::create(path).map_err(|source| StorageError::io(path, source))?;
    ParquetWriter::new(&mut file)
        .with_compression(config.compression.into())
        .with_row_group_size(Some(config.row_group_size.max(1)))
        .finish(df)
        .map_err(|source| StorageError::parquet(path, source))?;
    file.sync_all().map_err(|source| StorageError::io(path, source))
}

/// Read and schema-check one job file.
pub fn read_job_file(path: &Path) -> Result<Vec<Bar>, StorageError> {
    let file = File::open(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            StorageError::io(path, source)
        }
    })?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|source| StorageError::parquet(path, source))?;
    BarSchema::validate(&df)?;
    dataframe_to_bars(&df).map_err(|source| StorageError::parquet(path, source))
}

/// Row count of a job file without materialising bars.
pub fn count_rows(path: &Path) -> Result<usize, StorageError> {
    let file = File::open(path).map_err(|source| StorageError::io(path, source))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|source| StorageError::parquet(path, source))?;
    BarSchema::validate(&df)?;
    Ok(df.height())
}

/// Best effort: make a rename durable by syncing its directory.
#[cfg(unix)]
pub fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) {}
