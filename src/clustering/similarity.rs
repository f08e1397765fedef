//! Similarity metrics for feature vectors

/// Cosine of the angle between `a` and `b`, always within [-1, 1].
///
/// Accumulates in f64 so large finite components cannot overflow. A zero
/// vector, or any non-finite component, scores 0.
///
/// # Panics
/// If the slices differ in length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "dimension mismatch: {} vs {}", a.len(), b.len());

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = norm_a.sqrt() * norm_b.sqrt();
    if denominator == 0.0 {
        return 0.0;
    }
    let cosine = dot / denominator;
    if !cosine.is_finite() {
        return 0.0;
    }
    cosine.clamp(-1.0, 1.0) as f32
}

/// Element-wise mean of equally sized vectors
///
/// Returns `None` for no input or when the dimensions disagree.
pub fn mean_vector<V: AsRef<[f32]>>(vectors: &[V]) -> Option<Vec<f32>> {
    let first = vectors.first()?.as_ref();
    let mut sum = vec![0.0f64; first.len()];

    for vector in vectors {
        let vector = vector.as_ref();
        if vector.len() != sum.len() {
            return None;
        }
        for (acc, x) in sum.iter_mut().zip(vector) {
            *acc += f64::from(*x);
        }
    }

    let n = vectors.len() as f64;
    Some(sum.into_iter().map(|x| (x / n) as f32).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parallel_orthogonal_and_opposite() {
        let v = [0.5f32, -2.0, 4.0, 1.0];
        let scaled: Vec<f32> = v.iter().map(|x| x * 3.0).collect();
        let negated: Vec<f32> = v.iter().map(|x| -x).collect();

        assert_relative_eq!(cosine_similarity(&v, &scaled), 1.0, epsilon = 1e-6);
        assert_relative_eq!(cosine_similarity(&v, &negated), -1.0, epsilon = 1e-6);
        assert_relative_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 7.0]), 0.0);
    }

    #[test]
    fn test_zero_vector_scores_zero() {
        let zero = [0.0f32; 4];
        let other = [1.0f32, 2.0, 3.0, 4.0];
        assert_eq!(cosine_similarity(&zero, &other), 0.0);
        assert_eq!(cosine_similarity(&other, &zero), 0.0);
    }

    #[test]
    fn test_stays_in_range_for_wide_and_huge_components() {
        let a: Vec<f32> = (0..128).map(|i| (i as f32 * 0.37).sin()).collect();
        let b: Vec<f32> = (0..128).map(|i| (i as f32 * 0.11).cos() * 1e3).collect();
        assert!((-1.0..=1.0).contains(&cosine_similarity(&a, &b)));

        // Squares of these overflow f32
        let huge = [1e20f32; 4];
        assert_relative_eq!(cosine_similarity(&huge, &huge), 1.0, epsilon = 1e-6);
        let max = [f32::MAX; 128];
        assert_relative_eq!(cosine_similarity(&max, &max), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_non_finite_components_score_zero() {
        let finite = [1.0f32, 2.0, 3.0];
        assert_eq!(cosine_similarity(&[f32::INFINITY, 0.0, 0.0], &finite), 0.0);
        assert_eq!(cosine_similarity(&finite, &[f32::NAN, 1.0, 1.0]), 0.0);
    }

    #[test]
    #[should_panic(expected = "dimension mismatch")]
    fn test_length_mismatch_panics() {
        cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_mean_vector() {
        let mean = mean_vector(&[vec![1.0, 2.0], vec![3.0, 6.0]]).unwrap();
        assert_relative_eq!(mean[0], 2.0);
        assert_relative_eq!(mean[1], 4.0);

        assert!(mean_vector::<Vec<f32>>(&[]).is_none());
        assert!(mean_vector(&[vec![1.0], vec![1.0, 2.0]]).is_none());
    }
}
