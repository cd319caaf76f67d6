//! Dense `[time, space, feature]` tensors built from long-format frames.

use super::is_present;
use crate::error::{Error, Result};
use ndarray::{Array3, ArrayView3, Axis};
use polars::prelude::*;
use std::collections::HashMap;
use tracing::debug;

/// Marks a (time, space) pair that never appeared in the source data.
///
/// Source data holding this value is rejected, so it cannot be confused with
/// a measured value. NaN keeps its usual meaning of "present but missing".
pub const DOES_NOT_EXIST: f64 = f64::NEG_INFINITY;

/// Bidirectional map between unit identifiers and tensor positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSpaceIndex {
    times: Vec<i64>,
    spaces: Vec<i64>,
    time_positions: HashMap<i64, usize>,
    space_positions: HashMap<i64, usize>,
}

impl TimeSpaceIndex {
    /// Build an index from (possibly repeated, unordered) unit identifiers.
    /// Both axes are sorted ascending.
    pub fn new(times: impl IntoIterator<Item = i64>, spaces: impl IntoIterator<Item = i64>) -> Self {
        let times = sorted_unique(times);
        let spaces = sorted_unique(spaces);
        let time_positions = times.iter().enumerate().map(|(i, &t)| (t, i)).collect();
        let space_positions = spaces.iter().enumerate().map(|(i, &s)| (s, i)).collect();
        Self {
            times,
            spaces,
            time_positions,
            space_positions,
        }
    }

    #[must_use]
    pub fn times(&self) -> &[i64] {
        &self.times
    }

    #[must_use]
    pub fn spaces(&self) -> &[i64] {
        &self.spaces
    }

    #[must_use]
    pub fn n_times(&self) -> usize {
        self.times.len()
    }

    #[must_use]
    pub fn n_spaces(&self) -> usize {
        self.spaces.len()
    }

    #[must_use]
    pub fn time_position(&self, time: i64) -> Option<usize> {
        self.time_positions.get(&time).copied()
    }

    #[must_use]
    pub fn space_position(&self, space: i64) -> Option<usize> {
        self.space_positions.get(&space).copied()
    }

    #[must_use]
    pub fn time_at(&self, position: usize) -> Option<i64> {
        self.times.get(position).copied()
    }

    #[must_use]
    pub fn space_at(&self, position: usize) -> Option<i64> {
        self.spaces.get(position).copied()
    }
}

fn sorted_unique(ids: impl IntoIterator<Item = i64>) -> Vec<i64> {
    let mut ids: Vec<i64> = ids.into_iter().collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// A tensor together with the metadata needed to name its cells.
#[derive(Debug, Clone)]
pub struct TimeSpaceTensor {
    data: Array3<f64>,
    index: TimeSpaceIndex,
    features: Vec<String>,
}

impl TimeSpaceTensor {
    /// Assemble a tensor from parts, checking that the shapes agree.
    pub fn new(data: Array3<f64>, index: TimeSpaceIndex, features: Vec<String>) -> Result<Self> {
        let expected = (index.n_times(), index.n_spaces(), features.len());
        if data.dim() != expected {
            return Err(Error::data(format!(
                "tensor shape {:?} does not match index/features {expected:?}",
                data.dim()
            )));
        }
        Ok(Self {
            data,
            index,
            features,
        })
    }

    /// Build from `(time, space, values)` records. Later duplicates overwrite
    /// earlier ones.
    pub fn from_records<I>(features: Vec<String>, records: I) -> Result<Self>
    where
        I: IntoIterator<Item = (i64, i64, Vec<f64>)>,
    {
        let records: Vec<(i64, i64, Vec<f64>)> = records.into_iter().collect();
        let index = TimeSpaceIndex::new(
            records.iter().map(|(t, _, _)| *t),
            records.iter().map(|(_, s, _)| *s),
        );
        let mut data = Array3::from_elem(
            (index.n_times(), index.n_spaces(), features.len()),
            DOES_NOT_EXIST,
        );

        for (row, (time, space, values)) in records.iter().enumerate() {
            if values.len() != features.len() {
                return Err(Error::data(format!(
                    "record {row} has {} values, expected {}",
                    values.len(),
                    features.len()
                )));
            }
            let (Some(t), Some(s)) = (index.time_position(*time), index.space_position(*space))
            else {
                continue;
            };
            for (f, &value) in values.iter().enumerate() {
                if !is_present(value) {
                    return Err(sentinel_collision(&features[f], row));
                }
                data[[t, s, f]] = value;
            }
        }

        Self::new(data, index, features)
    }

    /// Same index and features, different cell values.
    pub fn with_data(&self, data: Array3<f64>) -> Result<Self> {
        Self::new(data, self.index.clone(), self.features.clone())
    }

    #[must_use]
    pub fn view(&self) -> ArrayView3<'_, f64> {
        self.data.view()
    }

    #[must_use]
    pub const fn data(&self) -> &Array3<f64> {
        &self.data
    }

    #[must_use]
    pub const fn index(&self) -> &TimeSpaceIndex {
        &self.index
    }

    #[must_use]
    pub fn features(&self) -> &[String] {
        &self.features
    }

    #[must_use]
    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    #[must_use]
    pub fn n_times(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    /// True wherever the cell is not [`DOES_NOT_EXIST`].
    #[must_use]
    pub fn validity_mask(&self) -> Array3<bool> {
        validity_mask(self.data.view())
    }
}

#[must_use]
pub fn validity_mask(data: ArrayView3<'_, f64>) -> Array3<bool> {
    data.mapv(is_present)
}

fn sentinel_collision(feature: &str, row: usize) -> Error {
    Error::data(format!(
        "feature '{feature}' holds the reserved does-not-exist value (-inf) at row {row}"
    ))
}

/// Column names pandas gives index levels that have no name of their own.
const UNNAMED_INDEX_LEVELS: [&str; 2] = ["__index_level_0__", "__index_level_1__"];

/// Converts a long-format frame into a [`TimeSpaceTensor`].
///
/// By default the first two columns are the time and space identifiers; every
/// other numeric or boolean column becomes a feature. A frame carrying
/// unnamed pandas index levels uses those instead, wherever they sit.
#[derive(Debug, Clone, Default)]
pub struct TensorBuilder {
    time_column: Option<String>,
    space_column: Option<String>,
}

impl TensorBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_index_columns(mut self, time: impl Into<String>, space: impl Into<String>) -> Self {
        self.time_column = Some(time.into());
        self.space_column = Some(space.into());
        self
    }

    pub fn build(&self, df: &DataFrame) -> Result<TimeSpaceTensor> {
        let (time_name, space_name) = self.index_columns(df)?;
        let times = index_values(df.column(&time_name)?)?;
        let spaces = index_values(df.column(&space_name)?)?;

        let mut features = Vec::new();
        let mut columns = Vec::new();
        for column in df.get_columns() {
            let name = column.name().as_str();
            if name == time_name || name == space_name {
                continue;
            }
            if !is_feature_dtype(column.dtype()) {
                debug!(column = name, dtype = %column.dtype(), "Dropping non-numeric column");
                continue;
            }
            features.push(name.to_string());
            columns.push(feature_values(column)?);
        }

        let index = TimeSpaceIndex::new(times.iter().copied(), spaces.iter().copied());
        let mut data = Array3::from_elem(
            (index.n_times(), index.n_spaces(), features.len()),
            DOES_NOT_EXIST,
        );

        for (row, (time, space)) in times.iter().zip(&spaces).enumerate() {
            let (Some(t), Some(s)) = (index.time_position(*time), index.space_position(*space))
            else {
                continue;
            };
            for (f, values) in columns.iter().enumerate() {
                let value = values[row];
                if !is_present(value) {
                    return Err(sentinel_collision(&features[f], row));
                }
                data[[t, s, f]] = value;
            }
        }

        debug!(
            times = index.n_times(),
            spaces = index.n_spaces(),
            features = features.len(),
            "Built drift tensor"
        );
        TimeSpaceTensor::new(data, index, features)
    }

    fn index_columns(&self, df: &DataFrame) -> Result<(String, String)> {
        if let (Some(time), Some(space)) = (&self.time_column, &self.space_column) {
            return Ok((time.clone(), space.clone()));
        }
        let names = df.get_column_names();
        if UNNAMED_INDEX_LEVELS
            .iter()
            .all(|level| names.iter().any(|n| n.as_str() == *level))
        {
            let [time, space] = UNNAMED_INDEX_LEVELS;
            return Ok((time.to_string(), space.to_string()));
        }
        match names.as_slice() {
            [time, space, ..] => Ok((time.to_string(), space.to_string())),
            _ => Err(Error::data(
                "frame needs a time and a space index column before its features",
            )),
        }
    }
}

fn index_values(column: &Column) -> Result<Vec<i64>> {
    let series = column.as_materialized_series().cast(&DataType::Int64)?;
    series
        .i64()?
        .into_iter()
        .enumerate()
        .map(|(row, value)| {
            value.ok_or_else(|| {
                Error::data(format!(
                    "index column '{}' has no value at row {row}",
                    column.name()
                ))
            })
        })
        .collect()
}

fn feature_values(column: &Column) -> Result<Vec<f64>> {
    let series = column.as_materialized_series().cast(&DataType::Float64)?;
    Ok(series
        .f64()?
        .into_iter()
        .map(|value| value.unwrap_or(f64::NAN))
        .collect())
}

const fn is_feature_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Boolean
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::Float32
            | DataType::Float64
    )
}
