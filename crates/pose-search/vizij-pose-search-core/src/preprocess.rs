//! Statistical preprocessing of the assembled pose table.
//!
//! Every policy records `forward`, `inverse` and `sample_mean` so that a raw
//! vector `x` maps to `forward * (x - mean)` and back again. Statistics are
//! accumulated in `f64` and stored as `f32`.

use nalgebra::{DMatrix, DVector, SymmetricEigen};

use crate::config::PreprocessPolicy;
use crate::error::PoseSearchError;
use crate::layout::Layout;
use crate::Result;

/// Features whose mean deviation falls below this keep a unit scale.
const MIN_FEATURE_SPREAD: f64 = 0.1;
/// Ridge added to the covariance diagonal, relative to its mean.
const RELATIVE_RIDGE: f64 = 1e-9;
/// Ridge used when the covariance diagonal is all zero.
const MIN_RIDGE: f64 = 1e-12;
/// Smallest correlation eigenvalue kept when whitening.
const EIGENVALUE_FLOOR: f64 = 1e-6;

#[derive(Clone, Debug, PartialEq)]
pub struct PreprocessInfo {
    pub policy: PreprocessPolicy,
    pub transformation: DMatrix<f32>,
    pub inverse_transformation: DMatrix<f32>,
    pub sample_mean: DVector<f32>,
}

impl PreprocessInfo {
    pub fn identity(num_floats: usize) -> Self {
        Self {
            policy: PreprocessPolicy::None,
            transformation: DMatrix::identity(num_floats, num_floats),
            inverse_transformation: DMatrix::identity(num_floats, num_floats),
            sample_mean: DVector::zeros(num_floats),
        }
    }

    #[inline]
    pub fn num_floats(&self) -> usize {
        self.sample_mean.len()
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len != self.num_floats() {
            return Err(PoseSearchError::DimensionMismatch {
                expected: self.num_floats(),
                actual: len,
            });
        }
        Ok(())
    }

    /// Raw to normalized, in place.
    pub fn normalize(&self, values: &mut [f32]) -> Result<()> {
        self.check_len(values.len())?;
        let centered = DVector::from_column_slice(values) - &self.sample_mean;
        let out = &self.transformation * centered;
        values.copy_from_slice(out.as_slice());
        Ok(())
    }

    /// Normalized to raw, in place.
    pub fn denormalize(&self, values: &mut [f32]) -> Result<()> {
        self.check_len(values.len())?;
        let raw = &self.inverse_transformation * DVector::from_column_slice(values)
            + &self.sample_mean;
        values.copy_from_slice(raw.as_slice());
        Ok(())
    }
}

fn to_f32(m: &DMatrix<f64>) -> DMatrix<f32> {
    m.map(|v| v as f32)
}

/// Mean of every column and the centered data.
fn center(data: &DMatrix<f64>) -> (DVector<f64>, DMatrix<f64>) {
    let num_poses = data.nrows().max(1) as f64;
    let mean = DVector::from_iterator(
        data.ncols(),
        data.column_iter().map(|c| c.sum() / num_poses),
    );
    let mut centered = data.clone();
    for mut row in centered.row_iter_mut() {
        row -= mean.transpose();
    }
    (mean, centered)
}

/// Per-float spread: the mean norm of each feature's centered sub-vector,
/// repeated over that feature's floats. Near-zero spreads stay at 1.
fn feature_spreads(centered: &DMatrix<f64>, layout: &Layout) -> DVector<f64> {
    let num_poses = centered.nrows().max(1) as f64;
    let mut spreads = DVector::from_element(centered.ncols(), 1.0);
    for feature in &layout.features {
        let range = feature.value_range();
        let total: f64 = centered
            .row_iter()
            .map(|row| {
                range
                    .clone()
                    .map(|i| row[i] * row[i])
                    .sum::<f64>()
                    .sqrt()
            })
            .sum();
        let spread = total / num_poses;
        if spread > MIN_FEATURE_SPREAD {
            for i in range {
                spreads[i] = spread;
            }
        }
    }
    spreads
}

fn apply_rows(values: &mut [f32], num_floats: usize, info: &PreprocessInfo) -> Result<()> {
    for row in values.chunks_exact_mut(num_floats) {
        info.normalize(row)?;
    }
    Ok(())
}

fn normalize_transforms(spreads: &DVector<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
    let forward = DMatrix::from_diagonal(&spreads.map(|s| 1.0 / s));
    let inverse = DMatrix::from_diagonal(spreads);
    (forward, inverse)
}

/// ZCA whitening of already spread-normalized data.
///
/// Returns `(forward, inverse)` for normalized inputs.
fn sphere_transforms(normalized: &DMatrix<f64>) -> Result<(DMatrix<f64>, DMatrix<f64>)> {
    let num_floats = normalized.ncols();
    let denom = (normalized.nrows().saturating_sub(1)).max(1) as f64;
    let mut covariance = (normalized.transpose() * normalized) / denom;
    let ridge = (covariance.diagonal().mean() * RELATIVE_RIDGE).max(MIN_RIDGE);
    for i in 0..num_floats {
        covariance[(i, i)] += ridge;
    }

    let std_dev = covariance.diagonal().map(f64::sqrt);
    let inv_std_dev = std_dev.map(|s| 1.0 / s);
    let s = DMatrix::from_diagonal(&std_dev);
    let s_inv = DMatrix::from_diagonal(&inv_std_dev);
    let correlation = &s_inv * &covariance * &s_inv;

    let eigen = SymmetricEigen::new(correlation);
    let mut pairs: Vec<(f64, DVector<f64>)> = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .map(|(i, &v)| (v, eigen.eigenvectors.column(i).into_owned()))
        .collect();
    if pairs.iter().any(|(v, _)| !v.is_finite()) {
        return Err(PoseSearchError::Numeric {
            reason: "non-finite eigenvalue in pose correlation".into(),
        });
    }
    pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

    let columns: Vec<DVector<f64>> = pairs.iter().map(|(_, v)| v.clone()).collect();
    let v = DMatrix::from_columns(&columns);
    let values = DVector::from_iterator(
        num_floats,
        pairs.iter().map(|(e, _)| e.max(EIGENVALUE_FLOOR)),
    );
    let d_inv_sqrt = DMatrix::from_diagonal(&values.map(|e| 1.0 / e.sqrt()));
    let d_sqrt = DMatrix::from_diagonal(&values.map(f64::sqrt));

    let zca = &v * d_inv_sqrt * v.transpose() * s_inv;
    let zca_inverse = s * &v * d_sqrt * v.transpose();
    Ok((zca, zca_inverse))
}

/// Transform `values` (`num_poses` rows of `layout.num_floats`) in place and
/// return the map that was applied.
pub fn preprocess(
    values: &mut [f32],
    layout: &Layout,
    policy: PreprocessPolicy,
) -> Result<PreprocessInfo> {
    let num_floats = layout.num_floats;
    if num_floats == 0 {
        return Err(PoseSearchError::EmptyLayout);
    }
    if values.len() % num_floats != 0 {
        return Err(PoseSearchError::PoseCountMismatch {
            num_poses: values.len() / num_floats,
            num_floats,
            num_values: values.len(),
        });
    }
    let num_poses = values.len() / num_floats;

    if policy == PreprocessPolicy::None || num_poses == 0 {
        let mut info = PreprocessInfo::identity(num_floats);
        info.policy = policy;
        return Ok(info);
    }

    let data = DMatrix::from_row_iterator(num_poses, num_floats, values.iter().map(|&v| v as f64));
    let (mean, centered) = center(&data);
    let spreads = feature_spreads(&centered, layout);
    let (normalize, denormalize) = normalize_transforms(&spreads);

    let (forward, inverse) = match policy {
        PreprocessPolicy::Sphere => {
            let normalized = &centered * &normalize;
            let (zca, zca_inverse) = sphere_transforms(&normalized)?;
            (zca * &normalize, denormalize * zca_inverse)
        }
        _ => (normalize, denormalize),
    };

    let info = PreprocessInfo {
        policy,
        transformation: to_f32(&forward),
        inverse_transformation: to_f32(&inverse),
        sample_mean: mean.map(|v| v as f32),
    };
    apply_rows(values, num_floats, &info)?;
    log::debug!("preprocessed {num_poses} poses x {num_floats} floats with {policy:?}");
    Ok(info)
}
