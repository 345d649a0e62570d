use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use sprs::{CsMat, TriMat};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatrixError {
    #[error("Entry ({row}, {col}) lies outside a {rows}x{cols} matrix.")]
    EntryOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },
    #[error("Vector of length {found} cannot be multiplied with a matrix expecting length {expected}.")]
    VectorLength { found: usize, expected: usize },
}

/// Unified feature matrix representation for dense and sparse workflows.
///
/// Rows are samples and columns are features. Sparse matrices may be stored
/// in either CSR or CSC order; both multiplication directions work for both
/// layouts, but CSR is the fast path for `X·v` and CSC for `Xᵗ·u`.
#[derive(Clone, Debug)]
pub enum DesignMatrix {
    Dense(Array2<f64>),
    Sparse(CsMat<f64>),
}

impl DesignMatrix {
    /// Builds a CSR matrix from `(row, col, value)` triplets. Repeated
    /// coordinates are summed.
    pub fn from_triplets(
        rows: usize,
        cols: usize,
        triplets: &[(usize, usize, f64)],
    ) -> Result<Self, MatrixError> {
        let mut tri = TriMat::new((rows, cols));
        for &(row, col, value) in triplets {
            if row >= rows || col >= cols {
                return Err(MatrixError::EntryOutOfBounds {
                    row,
                    col,
                    rows,
                    cols,
                });
            }
            tri.add_triplet(row, col, value);
        }
        let csr: CsMat<f64> = tri.to_csr();
        Ok(Self::Sparse(csr))
    }

    pub fn nrows(&self) -> usize {
        match self {
            Self::Dense(matrix) => matrix.nrows(),
            Self::Sparse(matrix) => matrix.rows(),
        }
    }

    pub fn ncols(&self) -> usize {
        match self {
            Self::Dense(matrix) => matrix.ncols(),
            Self::Sparse(matrix) => matrix.cols(),
        }
    }

    pub fn nnz(&self) -> usize {
        match self {
            Self::Dense(matrix) => matrix.len(),
            Self::Sparse(matrix) => matrix.nnz(),
        }
    }

    pub fn to_dense(&self) -> Array2<f64> {
        match self {
            Self::Dense(matrix) => matrix.clone(),
            Self::Sparse(matrix) => matrix.to_dense(),
        }
    }

    /// Computes `X·v` where `v` has one entry per feature.
    pub fn matrix_vector_multiply(&self, vector: ArrayView1<f64>) -> Result<Array1<f64>, MatrixError> {
        if vector.len() != self.ncols() {
            return Err(MatrixError::VectorLength {
                found: vector.len(),
                expected: self.ncols(),
            });
        }
        let output = match self {
            Self::Dense(matrix) => matrix.dot(&vector),
            Self::Sparse(matrix) if matrix.is_csr() => {
                let values: Vec<f64> = (0..matrix.rows())
                    .into_par_iter()
                    .map(|row| {
                        matrix.outer_view(row).map_or(0.0, |entries| {
                            entries
                                .iter()
                                .map(|(col, &value)| value * vector[col])
                                .sum()
                        })
                    })
                    .collect();
                Array1::from(values)
            }
            Self::Sparse(matrix) => {
                let mut output = Array1::<f64>::zeros(matrix.rows());
                for (col, entries) in matrix.outer_iterator().enumerate() {
                    let x = vector[col];
                    for (row, &value) in entries.iter() {
                        output[row] += value * x;
                    }
                }
                output
            }
        };
        Ok(output)
    }

    /// Computes `Xᵗ·u` where `u` has one entry per sample.
    pub fn transpose_vector_multiply(
        &self,
        vector: ArrayView1<f64>,
    ) -> Result<Array1<f64>, MatrixError> {
        if vector.len() != self.nrows() {
            return Err(MatrixError::VectorLength {
                found: vector.len(),
                expected: self.nrows(),
            });
        }
        let output = match self {
            Self::Dense(matrix) => matrix.t().dot(&vector),
            Self::Sparse(matrix) if matrix.is_csr() => {
                let mut output = Array1::<f64>::zeros(matrix.cols());
                for (row, entries) in matrix.outer_iterator().enumerate() {
                    let u = vector[row];
                    if u == 0.0 {
                        continue;
                    }
                    for (col, &value) in entries.iter() {
                        output[col] += value * u;
                    }
                }
                output
            }
            Self::Sparse(matrix) => {
                let values: Vec<f64> = (0..matrix.cols())
                    .into_par_iter()
                    .map(|col| {
                        matrix.outer_view(col).map_or(0.0, |entries| {
                            entries
                                .iter()
                                .map(|(row, &value)| value * vector[row])
                                .sum()
                        })
                    })
                    .collect();
                Array1::from(values)
            }
        };
        Ok(output)
    }
}

impl From<Array2<f64>> for DesignMatrix {
    fn from(matrix: Array2<f64>) -> Self {
        Self::Dense(matrix)
    }
}

impl From<CsMat<f64>> for DesignMatrix {
    fn from(matrix: CsMat<f64>) -> Self {
        Self::Sparse(matrix)
    }
}
