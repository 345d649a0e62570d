//! # Pairwise Preference Structures
//!
//! The ranking loss only ever needs the sample-space operator `L` of the
//! preference graph and the target signal it induces. Three sources of
//! preferences are supported:
//!
//! - **All pairs:** a single implicit query holding every sample. `L = I − ppᵗ`
//!   with `p = 1/sqrt(n)`, i.e. subtracting the global mean.
//! - **Query grouped:** one orthonormal indicator column per query, scaled by
//!   `1/sqrt(size)`. `L = I − PPᵗ` subtracts each query's own mean, so only
//!   orderings inside a query are penalised.
//! - **Explicit pairs:** a signed incidence matrix `S` with `+1` on the
//!   preferred sample and `−1` on the other one. `L = SᵗS` is the Laplacian of
//!   the preference graph; no normalisation is applied.
//!
//! None of these build an `n × n` matrix. Applying `L` costs `O(n)` for the
//! group based modes and `O(n + pairs)` for explicit pairs.

use crate::config::ConfigError;
use ndarray::{Array1, ArrayView1};

/// A validated partition of sample indices into non-empty, disjoint queries.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryGrouping {
    queries: Vec<Vec<usize>>,
    n_samples: usize,
}

impl QueryGrouping {
    /// Validates that `queries` covers `0..n_samples` exactly once.
    pub fn new(queries: &[Vec<usize>], n_samples: usize) -> Result<Self, ConfigError> {
        let mut owner: Vec<Option<usize>> = vec![None; n_samples];
        for (query, members) in queries.iter().enumerate() {
            if members.is_empty() {
                return Err(ConfigError::EmptyQuery(query));
            }
            for &index in members {
                if index >= n_samples {
                    return Err(ConfigError::QueryIndexOutOfBounds {
                        index: index as i64,
                        query,
                        n_samples,
                    });
                }
                if let Some(first_query) = owner[index] {
                    return Err(ConfigError::DuplicateQueryIndex {
                        index,
                        first_query,
                        second_query: query,
                    });
                }
                owner[index] = Some(query);
            }
        }

        let unassigned: Vec<usize> = owner
            .iter()
            .enumerate()
            .filter_map(|(index, query)| query.is_none().then_some(index))
            .collect();
        if let Some(&first) = unassigned.first() {
            return Err(ConfigError::UnassignedSamples {
                count: unassigned.len(),
                first,
            });
        }

        Ok(Self {
            queries: queries.to_vec(),
            n_samples,
        })
    }

    /// Same as [`QueryGrouping::new`], for index lists coming from loosely
    /// typed sources where negative values can appear.
    pub fn from_signed(queries: &[Vec<i64>], n_samples: usize) -> Result<Self, ConfigError> {
        let mut converted = Vec::with_capacity(queries.len());
        for (query, members) in queries.iter().enumerate() {
            let mut indices = Vec::with_capacity(members.len());
            for &index in members {
                if index < 0 {
                    return Err(ConfigError::NegativeQueryIndex { index, query });
                }
                let index = usize::try_from(index).map_err(|_| {
                    ConfigError::QueryIndexOutOfBounds {
                        index,
                        query,
                        n_samples,
                    }
                })?;
                indices.push(index);
            }
            converted.push(indices);
        }
        Self::new(&converted, n_samples)
    }

    /// The trivial grouping with every sample in one query.
    pub fn single(n_samples: usize) -> Self {
        Self {
            queries: vec![(0..n_samples).collect()],
            n_samples,
        }
    }

    pub fn queries(&self) -> &[Vec<usize>] {
        &self.queries
    }

    pub fn n_queries(&self) -> usize {
        self.queries.len()
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    /// Computes `(I − PPᵗ)·u`, which subtracts each query's mean from its
    /// members.
    pub fn center(&self, u: ArrayView1<f64>) -> Array1<f64> {
        let mut centered = u.to_owned();
        for members in &self.queries {
            let mean = members.iter().map(|&i| u[i]).sum::<f64>() / members.len() as f64;
            for &i in members {
                centered[i] -= mean;
            }
        }
        centered
    }
}

/// A validated list of `(preferred, other)` sample index pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct PreferencePairs {
    pairs: Vec<(usize, usize)>,
    n_samples: usize,
}

impl PreferencePairs {
    pub fn new(pairs: &[(usize, usize)], n_samples: usize) -> Result<Self, ConfigError> {
        for (pair, &(preferred, other)) in pairs.iter().enumerate() {
            for index in [preferred, other] {
                if index >= n_samples {
                    return Err(ConfigError::PairIndexOutOfBounds {
                        pair,
                        index: index as i64,
                        n_samples,
                    });
                }
            }
        }
        Ok(Self {
            pairs: pairs.to_vec(),
            n_samples,
        })
    }

    pub fn from_signed(pairs: &[(i64, i64)], n_samples: usize) -> Result<Self, ConfigError> {
        let mut converted = Vec::with_capacity(pairs.len());
        for (pair, &(preferred, other)) in pairs.iter().enumerate() {
            let mut checked = [0usize; 2];
            for (slot, index) in [preferred, other].into_iter().enumerate() {
                if index < 0 {
                    return Err(ConfigError::NegativePairIndex { pair, index });
                }
                checked[slot] = usize::try_from(index).map_err(|_| {
                    ConfigError::PairIndexOutOfBounds {
                        pair,
                        index,
                        n_samples,
                    }
                })?;
            }
            converted.push((checked[0], checked[1]));
        }
        Self::new(&converted, n_samples)
    }

    /// Every ordered pair `(i, j)` with `labels[i] > labels[j]`.
    pub fn from_labels(labels: ArrayView1<f64>) -> Self {
        let n_samples = labels.len();
        let mut pairs = Vec::new();
        for i in 0..n_samples {
            for j in 0..n_samples {
                if labels[i] > labels[j] {
                    pairs.push((i, j));
                }
            }
        }
        Self { pairs, n_samples }
    }

    pub fn pairs(&self) -> &[(usize, usize)] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    /// Computes `SᵗS·u`.
    pub fn laplacian_apply(&self, u: ArrayView1<f64>) -> Array1<f64> {
        let mut output = Array1::<f64>::zeros(self.n_samples);
        for &(preferred, other) in &self.pairs {
            let difference = u[preferred] - u[other];
            output[preferred] += difference;
            output[other] -= difference;
        }
        output
    }

    /// Computes `Sᵗ·1`: the number of times each sample is preferred minus the
    /// number of times it loses.
    pub fn incidence_sum(&self) -> Array1<f64> {
        let mut output = Array1::<f64>::zeros(self.n_samples);
        for &(preferred, other) in &self.pairs {
            output[preferred] += 1.0;
            output[other] -= 1.0;
        }
        output
    }
}

/// Canonical preference representation selected once at setup time.
#[derive(Debug, Clone, PartialEq)]
pub enum PreferenceStructure {
    AllPairs {
        labels: Array1<f64>,
    },
    QueryGrouped {
        labels: Array1<f64>,
        grouping: QueryGrouping,
    },
    ExplicitPairs(PreferencePairs),
}

impl PreferenceStructure {
    pub fn all_pairs(labels: Array1<f64>) -> Self {
        Self::AllPairs { labels }
    }

    pub fn query_grouped(
        labels: Array1<f64>,
        queries: &[Vec<usize>],
    ) -> Result<Self, ConfigError> {
        let grouping = QueryGrouping::new(queries, labels.len())?;
        Ok(Self::QueryGrouped { labels, grouping })
    }

    pub fn explicit_pairs(pairs: &[(usize, usize)], n_samples: usize) -> Result<Self, ConfigError> {
        Ok(Self::ExplicitPairs(PreferencePairs::new(pairs, n_samples)?))
    }

    pub fn mode_name(&self) -> &'static str {
        match self {
            Self::AllPairs { .. } => "all-pairs",
            Self::QueryGrouped { .. } => "query-grouped",
            Self::ExplicitPairs(_) => "explicit-pairs",
        }
    }

    pub fn n_samples(&self) -> usize {
        match self {
            Self::AllPairs { labels } | Self::QueryGrouped { labels, .. } => labels.len(),
            Self::ExplicitPairs(pairs) => pairs.n_samples(),
        }
    }

    pub fn learns_from_labels(&self) -> bool {
        !matches!(self, Self::ExplicitPairs(_))
    }

    /// Applies the sample-space preference operator `L` to `u`.
    pub fn apply(&self, u: ArrayView1<f64>) -> Array1<f64> {
        match self {
            Self::AllPairs { .. } => {
                let mean = u.mean().unwrap_or(0.0);
                u.mapv(|value| value - mean)
            }
            Self::QueryGrouped { grouping, .. } => grouping.center(u),
            Self::ExplicitPairs(pairs) => pairs.laplacian_apply(u),
        }
    }

    /// The per-sample target signal whose image under `Xᵗ` is the linear term
    /// of the loss: `L·y` for label based modes, `Sᵗ·1` for explicit pairs.
    pub fn target(&self) -> Array1<f64> {
        match self {
            Self::AllPairs { labels } | Self::QueryGrouped { labels, .. } => {
                self.apply(labels.view())
            }
            Self::ExplicitPairs(pairs) => pairs.incidence_sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn grouping_missing_an_index_is_rejected() {
        let queries = vec![vec![0, 1, 2], vec![4, 5, 6], vec![7, 8, 9]];
        let err = QueryGrouping::new(&queries, 10).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnassignedSamples { count: 1, first: 3 }
        ));
    }

    #[test]
    fn grouping_with_duplicate_assignment_is_rejected() {
        let queries = vec![vec![0, 1, 2, 3], vec![3, 4, 5, 6], vec![7, 8, 9]];
        let err = QueryGrouping::new(&queries, 10).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::DuplicateQueryIndex {
                index: 3,
                first_query: 0,
                second_query: 1
            }
        ));
    }

    #[test]
    fn grouping_bounds_and_signs_are_checked() {
        assert!(matches!(
            QueryGrouping::new(&[vec![0, 1], vec![2, 5]], 4),
            Err(ConfigError::QueryIndexOutOfBounds { index: 5, query: 1, .. })
        ));
        assert!(matches!(
            QueryGrouping::from_signed(&[vec![0, -1], vec![1, 2]], 3),
            Err(ConfigError::NegativeQueryIndex { index: -1, query: 0 })
        ));
        assert!(matches!(
            QueryGrouping::new(&[vec![0, 1], vec![]], 2),
            Err(ConfigError::EmptyQuery(1))
        ));
        let grouping = QueryGrouping::from_signed(&[vec![2, 0], vec![1]], 3).unwrap();
        assert_eq!(grouping.n_queries(), 2);
        assert_eq!(grouping.queries()[0], vec![2, 0]);
    }

    #[test]
    fn centering_removes_each_query_mean() {
        let grouping = QueryGrouping::new(&[vec![0, 2], vec![1, 3, 4]], 5).unwrap();
        let u = array![1.0, 10.0, 3.0, 20.0, 30.0];
        let centered = grouping.center(u.view());
        assert_abs_diff_eq!(centered, array![-1.0, -10.0, 1.0, 0.0, 10.0], epsilon = 1e-12);
    }

    #[test]
    fn per_group_constants_are_annihilated() {
        let labels = array![0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let structure =
            PreferenceStructure::query_grouped(labels, &[vec![0, 1, 2], vec![3, 4, 5]]).unwrap();
        let constant_per_group = array![2.5, 2.5, 2.5, -7.0, -7.0, -7.0];
        assert_abs_diff_eq!(
            structure.apply(constant_per_group.view()),
            Array1::zeros(6),
            epsilon = 1e-12
        );
    }

    #[test]
    fn all_pairs_matches_a_single_query() {
        let labels = array![4.0, 1.0, 3.0, 2.0];
        let all_pairs = PreferenceStructure::all_pairs(labels.clone());
        let single = PreferenceStructure::QueryGrouped {
            labels: labels.clone(),
            grouping: QueryGrouping::single(4),
        };
        let u = array![0.3, -1.2, 2.0, 0.7];
        assert_abs_diff_eq!(all_pairs.apply(u.view()), single.apply(u.view()), epsilon = 1e-12);
        assert_abs_diff_eq!(all_pairs.target(), array![1.5, -1.5, 0.5, -0.5], epsilon = 1e-12);
        assert_abs_diff_eq!(all_pairs.target(), single.target(), epsilon = 1e-12);
    }

    #[test]
    fn explicit_pairs_use_the_signed_incidence() {
        let structure = PreferenceStructure::explicit_pairs(&[(0, 1), (2, 1), (0, 2)], 3).unwrap();
        // Edges 0>1, 2>1, 0>2 form a triangle, so SᵗS is its graph Laplacian.
        let u = array![1.0, 0.0, 0.0];
        assert_abs_diff_eq!(structure.apply(u.view()), array![2.0, -1.0, -1.0], epsilon = 1e-12);
        assert_abs_diff_eq!(structure.target(), array![2.0, -2.0, 0.0], epsilon = 1e-12);
        assert!(!structure.learns_from_labels());
        assert_eq!(structure.n_samples(), 3);
    }

    #[test]
    fn pair_indices_are_validated() {
        assert!(matches!(
            PreferencePairs::new(&[(0, 1), (1, 3)], 3),
            Err(ConfigError::PairIndexOutOfBounds { pair: 1, index: 3, .. })
        ));
        assert!(matches!(
            PreferencePairs::from_signed(&[(0, 1), (-2, 1)], 3),
            Err(ConfigError::NegativePairIndex { pair: 1, index: -2 })
        ));
        let pairs = PreferencePairs::from_signed(&[(2, 0)], 3).unwrap();
        assert_eq!(pairs.pairs(), &[(2, 0)]);
    }

    #[test]
    fn complete_label_graph_is_a_scaled_centering() {
        let labels = array![0.5, 2.0, 1.0, 3.0];
        let pairs = PreferencePairs::from_labels(labels.view());
        assert_eq!(pairs.len(), 6);
        let grouped = PreferenceStructure::all_pairs(labels);
        let u = array![1.0, -2.0, 0.5, 4.0];
        let expected = grouped.apply(u.view()) * 4.0;
        assert_abs_diff_eq!(pairs.laplacian_apply(u.view()), expected, epsilon = 1e-12);
    }
}
