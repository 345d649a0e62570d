use crate::cg::SolverError;
use crate::config::{ConfigError, validate_regularization};
use crate::matrix::DesignMatrix;
use crate::preference::PreferenceStructure;
use ndarray::{Array1, Array2, ArrayView1};

/// A symmetric linear map known only through its action on vectors.
pub trait LinearOperator {
    fn dim(&self) -> usize;

    fn apply(&self, v: ArrayView1<f64>) -> Result<Array1<f64>, SolverError>;
}

/// Dense symmetric matrices act as their own operator.
impl LinearOperator for Array2<f64> {
    fn dim(&self) -> usize {
        self.nrows()
    }

    fn apply(&self, v: ArrayView1<f64>) -> Result<Array1<f64>, SolverError> {
        if v.len() != self.ncols() {
            return Err(SolverError::DimensionMismatch {
                expected: self.ncols(),
                found: v.len(),
            });
        }
        Ok(self.dot(&v))
    }
}

/// Hessian of the regularized pairwise ranking loss in feature space:
///
/// `H·v = Xᵗ L X v + λ v`
///
/// where `X` is the `n_samples × n_features` design matrix and `L` is the
/// sample-space preference operator. Each application is two sparse
/// matrix-vector products plus one `O(n)` (or `O(n + pairs)`) pass for `L`.
pub struct RankingOperator<'a> {
    features: &'a DesignMatrix,
    preferences: &'a PreferenceStructure,
    regularization: f64,
}

impl<'a> RankingOperator<'a> {
    pub fn new(
        features: &'a DesignMatrix,
        preferences: &'a PreferenceStructure,
        regularization: f64,
    ) -> Result<Self, ConfigError> {
        validate_regularization(regularization)?;
        if features.nrows() != preferences.n_samples() {
            return Err(ConfigError::LabelLengthMismatch {
                found: preferences.n_samples(),
                expected: features.nrows(),
            });
        }
        Ok(Self {
            features,
            preferences,
            regularization,
        })
    }

    /// Right-hand side `Xᵗ·t` of the normal equations, with `t = L·y` for
    /// label based modes and `t = Sᵗ·1` for explicit pairs.
    pub fn rhs(&self) -> Result<Array1<f64>, SolverError> {
        let target = self.preferences.target();
        Ok(self.features.transpose_vector_multiply(target.view())?)
    }
}

impl LinearOperator for RankingOperator<'_> {
    fn dim(&self) -> usize {
        self.features.ncols()
    }

    fn apply(&self, v: ArrayView1<f64>) -> Result<Array1<f64>, SolverError> {
        let scores = self.features.matrix_vector_multiply(v)?;
        let weighted = self.preferences.apply(scores.view());
        let mut output = self.features.transpose_vector_multiply(weighted.view())?;
        output.scaled_add(self.regularization, &v);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    /// Materialises the operator column by column.
    fn dense_form(operator: &dyn LinearOperator) -> Array2<f64> {
        let dim = operator.dim();
        let mut dense = Array2::<f64>::zeros((dim, dim));
        for j in 0..dim {
            let mut unit = Array1::<f64>::zeros(dim);
            unit[j] = 1.0;
            dense.column_mut(j).assign(&operator.apply(unit.view()).unwrap());
        }
        dense
    }

    #[test]
    fn identity_features_expose_the_centering_matrix() {
        // With X = I the quadratic form is (I − 11ᵗ/n) + λI.
        let features = DesignMatrix::Dense(Array2::eye(4));
        let preferences = PreferenceStructure::all_pairs(array![1.0, 2.0, 3.0, 4.0]);
        let operator = RankingOperator::new(&features, &preferences, 1.0).unwrap();

        let expected = Array2::from_shape_fn((4, 4), |(i, j)| {
            let centering = if i == j { 0.75 } else { -0.25 };
            centering + if i == j { 1.0 } else { 0.0 }
        });
        assert_abs_diff_eq!(dense_form(&operator), expected, epsilon = 1e-12);
        assert_abs_diff_eq!(
            operator.rhs().unwrap(),
            array![-1.5, -0.5, 0.5, 1.5],
            epsilon = 1e-12
        );
    }

    #[test]
    fn operator_is_symmetric_for_every_mode() {
        let x = array![
            [1.0, 0.5, 0.0],
            [0.0, 2.0, 1.0],
            [3.0, 0.0, 1.0],
            [1.0, 1.0, 1.0],
            [0.0, 0.0, 2.0]
        ];
        let features = DesignMatrix::Dense(x);
        let labels = array![1.0, 0.0, 2.0, 3.0, 1.5];
        let structures = [
            PreferenceStructure::all_pairs(labels.clone()),
            PreferenceStructure::query_grouped(labels, &[vec![0, 1], vec![2, 3, 4]]).unwrap(),
            PreferenceStructure::explicit_pairs(&[(0, 1), (3, 2), (4, 0)], 5).unwrap(),
        ];
        for preferences in &structures {
            let operator = RankingOperator::new(&features, preferences, 0.3).unwrap();
            let dense = dense_form(&operator);
            assert_abs_diff_eq!(dense, dense.t().to_owned(), epsilon = 1e-12);
        }
    }

    #[test]
    fn per_query_constants_map_to_their_regularization_term() {
        // With X = I, a vector constant within each query lies in the null
        // space of L, so the operator reduces to λv.
        let features = DesignMatrix::Dense(Array2::eye(5));
        let preferences = PreferenceStructure::query_grouped(
            array![3.0, 1.0, 0.5, 2.0, 4.0],
            &[vec![0, 3], vec![1, 2, 4]],
        )
        .unwrap();
        let operator = RankingOperator::new(&features, &preferences, 0.7).unwrap();
        let v = array![2.5, -1.0, -1.0, 2.5, -1.0];
        assert_abs_diff_eq!(
            operator.apply(v.view()).unwrap(),
            &v * 0.7,
            epsilon = 1e-12
        );
    }

    #[test]
    fn mismatched_sample_counts_are_rejected() {
        let features = DesignMatrix::Dense(Array2::eye(3));
        let preferences = PreferenceStructure::all_pairs(array![1.0, 2.0]);
        assert!(matches!(
            RankingOperator::new(&features, &preferences, 1.0),
            Err(ConfigError::LabelLengthMismatch { found: 2, expected: 3 })
        ));
        let preferences = PreferenceStructure::all_pairs(array![1.0, 2.0, 3.0]);
        assert!(matches!(
            RankingOperator::new(&features, &preferences, 0.0),
            Err(ConfigError::NonPositiveRegularization(_))
        ));
    }
}
