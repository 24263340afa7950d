//! Dataset containers for notebook experiments
//!
//! A `Dataset` bundles the full feature/target matrices, their
//! train/validation/test partitions, the min-max scalers fitted on the
//! training partition and the scaled copy of every partition.

mod scaler;

pub use scaler::MinMaxScaler;

use ndarray::{s, Array2};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DatasetError {
    #[error("features have {x} rows but targets have {y}")]
    RowMismatch { x: usize, y: usize },

    #[error("invalid split ratios: train {train}, val {val} (each in [0, 1], sum at most 1)")]
    InvalidRatios { train: f64, val: f64 },

    #[error("expected {expected} columns, found {found}")]
    ColumnMismatch { expected: usize, found: usize },

    #[error("scaler used before fit")]
    NotFitted,

    #[error("training partition is empty")]
    EmptyTrainingSet,

    #[error("invalid feature range ({min}, {max})")]
    InvalidFeatureRange { min: f64, max: f64 },
}

/// The train/validation/test partitions of one quantity
#[derive(Debug, Clone, PartialEq)]
pub struct Split<T> {
    pub train: T,
    pub val: T,
    pub test: T,
}

impl<T> Split<T> {
    pub fn new(train: T, val: T, test: T) -> Self {
        Self { train, val, test }
    }

    pub fn try_map<U, E, F>(&self, mut f: F) -> Result<Split<U>, E>
    where
        F: FnMut(&T) -> Result<U, E>,
    {
        Ok(Split {
            train: f(&self.train)?,
            val: f(&self.val)?,
            test: f(&self.test)?,
        })
    }
}

impl Split<Array2<f64>> {
    pub fn rows(&self) -> (usize, usize, usize) {
        (self.train.nrows(), self.val.nrows(), self.test.nrows())
    }
}

/// Fractions of rows given to training and validation; test gets the rest
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitRatios {
    train: f64,
    val: f64,
}

impl SplitRatios {
    pub fn new(train: f64, val: f64) -> Result<Self, DatasetError> {
        let valid = (0.0..=1.0).contains(&train)
            && (0.0..=1.0).contains(&val)
            && train + val <= 1.0 + f64::EPSILON;
        if !valid {
            return Err(DatasetError::InvalidRatios { train, val });
        }
        Ok(Self { train, val })
    }

    pub fn train(&self) -> f64 {
        self.train
    }

    pub fn val(&self) -> f64 {
        self.val
    }

    pub fn test(&self) -> f64 {
        (1.0 - self.train - self.val).max(0.0)
    }

    /// Row counts for `n` rows; rounding leftovers go to the test partition
    pub fn row_counts(&self, n: usize) -> (usize, usize, usize) {
        let train = (((n as f64) * self.train).floor() as usize).min(n);
        let val = (((n as f64) * self.val).floor() as usize).min(n - train);
        (train, val, n - train - val)
    }
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            train: 0.7,
            val: 0.15,
        }
    }
}

/// Features `x` and targets `y`, partitioned and min-max scaled
#[derive(Debug, Clone)]
pub struct Dataset {
    pub x: Array2<f64>,
    pub y: Array2<f64>,

    pub x_split: Split<Array2<f64>>,
    pub y_split: Split<Array2<f64>>,

    pub x_scaler: MinMaxScaler,
    pub y_scaler: MinMaxScaler,

    pub x_mms: Split<Array2<f64>>,
    pub y_mms: Split<Array2<f64>>,
}

impl Dataset {
    /// Partition rows contiguously by `ratios`, then fit and apply the scalers
    pub fn new(x: Array2<f64>, y: Array2<f64>, ratios: SplitRatios) -> Result<Self, DatasetError> {
        check_rows(&x, &y)?;
        let ratios = SplitRatios::new(ratios.train, ratios.val)?;
        let (train, val, _) = ratios.row_counts(x.nrows());
        let x_split = partition(&x, train, val);
        let y_split = partition(&y, train, val);
        Self::from_splits(x, y, x_split, y_split)
    }

    /// Build from existing partitions; scalers are fitted on the training rows only
    pub fn from_splits(
        x: Array2<f64>,
        y: Array2<f64>,
        x_split: Split<Array2<f64>>,
        y_split: Split<Array2<f64>>,
    ) -> Result<Self, DatasetError> {
        check_rows(&x, &y)?;
        check_rows(&x_split.train, &y_split.train)?;
        check_rows(&x_split.val, &y_split.val)?;
        check_rows(&x_split.test, &y_split.test)?;

        let mut x_scaler = MinMaxScaler::new();
        x_scaler.fit(x_split.train.view())?;
        let mut y_scaler = MinMaxScaler::new();
        y_scaler.fit(y_split.train.view())?;

        let x_mms = x_split.try_map(|part| x_scaler.transform(part.view()))?;
        let y_mms = y_split.try_map(|part| y_scaler.transform(part.view()))?;

        Ok(Self {
            x,
            y,
            x_split,
            y_split,
            x_scaler,
            y_scaler,
            x_mms,
            y_mms,
        })
    }

    pub fn len(&self) -> usize {
        self.x.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.x.nrows() == 0
    }

    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }

    pub fn n_targets(&self) -> usize {
        self.y.ncols()
    }
}

fn check_rows(x: &Array2<f64>, y: &Array2<f64>) -> Result<(), DatasetError> {
    if x.nrows() != y.nrows() {
        return Err(DatasetError::RowMismatch {
            x: x.nrows(),
            y: y.nrows(),
        });
    }
    Ok(())
}

fn partition(data: &Array2<f64>, train: usize, val: usize) -> Split<Array2<f64>> {
    Split {
        train: data.slice(s![..train, ..]).to_owned(),
        val: data.slice(s![train..train + val, ..]).to_owned(),
        test: data.slice(s![train + val.., ..]).to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratios_validation() {
        assert!(SplitRatios::new(0.8, 0.1).is_ok());
        assert!(SplitRatios::new(0.8, 0.3).is_err());
        assert!(SplitRatios::new(-0.1, 0.3).is_err());
        assert!(SplitRatios::new(1.0, 0.0).is_ok());
    }

    #[test]
    fn test_row_counts_give_remainder_to_test() {
        let ratios = SplitRatios::new(0.7, 0.15).unwrap();
        assert_eq!(ratios.row_counts(10), (7, 1, 2));
        assert_eq!(ratios.row_counts(0), (0, 0, 0));
        let (train, val, test) = ratios.row_counts(101);
        assert_eq!(train + val + test, 101);
    }

    #[test]
    fn test_unchecked_ratios_are_rejected_by_new() {
        let ratios = SplitRatios {
            train: 1.5,
            val: 0.0,
        };
        assert_eq!(ratios.row_counts(10), (10, 0, 0));

        let x = Array2::zeros((10, 2));
        let y = Array2::zeros((10, 1));
        let err = Dataset::new(x, y, ratios).unwrap_err();
        assert_eq!(
            err,
            DatasetError::InvalidRatios {
                train: 1.5,
                val: 0.0
            }
        );
    }

    #[test]
    fn test_partition_is_contiguous() {
        let data = Array2::from_shape_fn((6, 1), |(i, _)| i as f64);
        let split = partition(&data, 3, 2);
        assert_eq!(split.rows(), (3, 2, 1));
        assert_eq!(split.val[[0, 0]], 3.0);
        assert_eq!(split.test[[0, 0]], 5.0);
    }
}
