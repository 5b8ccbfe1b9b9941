use crate::eval::FitnessVector;

/// Weights over `[P, R, mAP, F1]`.
pub const FITNESS_WEIGHTS: [f64; 4] = [0.0, 0.0, 0.8, 0.2];

/// Scalar used to rank checkpoints: `0.8 · mAP + 0.2 · F1`.
pub fn fitness(results: &FitnessVector) -> f64 {
    let v = results.as_array();
    FITNESS_WEIGHTS.iter().zip(&v[..4]).map(|(w, x)| w * x).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_sum_to_one() {
        assert!((FITNESS_WEIGHTS.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn only_map_and_f1_count() {
        let r = FitnessVector::from_array([0.9, 0.9, 0.5, 0.25, 3.0, 2.0, 1.0]);
        assert!((fitness(&r) - 0.45).abs() < 1e-12);
    }
}
