//! Per-column min-max scaling

use ndarray::{Array1, Array2, ArrayView2, Axis};

use super::DatasetError;

#[derive(Debug, Clone, PartialEq)]
struct Fitted {
    data_min: Array1<f64>,
    data_max: Array1<f64>,
    scale: Array1<f64>,
    offset: Array1<f64>,
}

/// Scales each column linearly so its fitted minimum and maximum land on
/// the feature range bounds
///
/// A constant column keeps a unit scale, so its values map onto the lower
/// bound instead of dividing by zero.
#[derive(Debug, Clone, PartialEq)]
pub struct MinMaxScaler {
    feature_range: (f64, f64),
    fitted: Option<Fitted>,
}

impl MinMaxScaler {
    pub fn new() -> Self {
        Self {
            feature_range: (0.0, 1.0),
            fitted: None,
        }
    }

    pub fn with_feature_range(min: f64, max: f64) -> Result<Self, DatasetError> {
        if !(min < max) || !min.is_finite() || !max.is_finite() {
            return Err(DatasetError::InvalidFeatureRange { min, max });
        }
        Ok(Self {
            feature_range: (min, max),
            fitted: None,
        })
    }

    pub fn feature_range(&self) -> (f64, f64) {
        self.feature_range
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn data_min(&self) -> Option<&Array1<f64>> {
        self.fitted.as_ref().map(|f| &f.data_min)
    }

    pub fn data_max(&self) -> Option<&Array1<f64>> {
        self.fitted.as_ref().map(|f| &f.data_max)
    }

    /// Learn per-column bounds from `data`
    pub fn fit(&mut self, data: ArrayView2<'_, f64>) -> Result<&mut Self, DatasetError> {
        if data.nrows() == 0 {
            return Err(DatasetError::EmptyTrainingSet);
        }

        let data_min = data.fold_axis(Axis(0), f64::INFINITY, |&acc, &v| acc.min(v));
        let data_max = data.fold_axis(Axis(0), f64::NEG_INFINITY, |&acc, &v| acc.max(v));
        let (range_min, range_max) = self.feature_range;

        let scale = (&data_max - &data_min).mapv(|span| {
            let span = if span == 0.0 { 1.0 } else { span };
            (range_max - range_min) / span
        });
        let offset = range_min - &data_min * &scale;

        self.fitted = Some(Fitted {
            data_min,
            data_max,
            scale,
            offset,
        });
        Ok(self)
    }

    fn fitted_for(&self, data: &ArrayView2<'_, f64>) -> Result<&Fitted, DatasetError> {
        let fitted = self.fitted.as_ref().ok_or(DatasetError::NotFitted)?;
        if data.ncols() != fitted.scale.len() {
            return Err(DatasetError::ColumnMismatch {
                expected: fitted.scale.len(),
                found: data.ncols(),
            });
        }
        Ok(fitted)
    }

    pub fn transform(&self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>, DatasetError> {
        let fitted = self.fitted_for(&data)?;
        let mut scaled = data.to_owned();
        scaled *= &fitted.scale;
        scaled += &fitted.offset;
        Ok(scaled)
    }

    pub fn fit_transform(&mut self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>, DatasetError> {
        self.fit(data)?;
        self.transform(data)
    }

    /// Map scaled values back to the original units
    pub fn inverse_transform(&self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>, DatasetError> {
        let fitted = self.fitted_for(&data)?;
        let mut restored = data.to_owned();
        restored -= &fitted.offset;
        restored /= &fitted.scale;
        Ok(restored)
    }
}

impl Default for MinMaxScaler {
    fn default() -> Self {
        Self::new()
    }
}
