//! Dense vector helpers.
//!
//! Cosine similarity against a zero vector is defined as `0.0` (it is otherwise undefined);
//! this is how degenerate trees score against everything.

use rayon::prelude::*;

#[inline]
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[inline]
pub fn l2_norm(v: &[f64]) -> f64 {
    dot(v, v).sqrt()
}

/// Scale `v` to unit length in place and return its original norm. Zero vectors are untouched.
pub fn normalize(v: &mut [f64]) -> f64 {
    let norm = l2_norm(v);
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    norm
}

/// Cosine similarity in `[-1, 1]`; `0.0` if either side is zero or the lengths differ.
pub fn cosine(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let denom = l2_norm(a) * l2_norm(b);
    if denom == 0.0 { 0.0 } else { dot(a, b) / denom }
}

/// Fill an `n x n` symmetric matrix from `f(i, j)` over the upper triangle, in parallel.
pub fn symmetric_matrix<T, F>(n: usize, diagonal: impl Fn(usize) -> T, f: F) -> Vec<Vec<T>>
where
    T: Copy + Default + Send,
    F: Fn(usize, usize) -> T + Sync,
{
    let pairs: Vec<(usize, usize, T)> = (0..n)
        .into_par_iter()
        .flat_map_iter(|i| (i + 1..n).map(move |j| (i, j)))
        .map(|(i, j)| (i, j, f(i, j)))
        .collect();

    let mut matrix = vec![vec![T::default(); n]; n];
    for (i, row) in matrix.iter_mut().enumerate() {
        row[i] = diagonal(i);
    }
    for (i, j, value) in pairs {
        matrix[i][j] = value;
        matrix[j][i] = value;
    }
    matrix
}

/// All-pairs cosine similarity. The diagonal is exactly `1.0`, or `0.0` for a zero vector.
pub fn pairwise_cosine<V: AsRef<[f64]> + Sync>(vectors: &[V]) -> Vec<Vec<f64>> {
    symmetric_matrix(
        vectors.len(),
        |i| if l2_norm(vectors[i].as_ref()) > 0.0 { 1.0 } else { 0.0 },
        |i, j| cosine(vectors[i].as_ref(), vectors[j].as_ref()),
    )
}
