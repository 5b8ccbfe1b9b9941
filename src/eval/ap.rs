/// Average precision of one class from its recall/precision curve, using
/// all-point interpolation: the precision envelope is made monotone from
/// the right and integrated where recall changes.
///
/// `recall` must be non-decreasing (detections sorted by confidence).
pub fn compute_ap(recall: &[f64], precision: &[f64]) -> f64 {
    let mut mrec = Vec::with_capacity(recall.len() + 2);
    mrec.push(0.0);
    mrec.extend_from_slice(recall);
    mrec.push(recall.last().copied().unwrap_or(0.0).min(1.0) + 1e-3);

    let mut mpre = Vec::with_capacity(precision.len() + 2);
    mpre.push(0.0);
    mpre.extend_from_slice(precision);
    mpre.push(0.0);

    for i in (0..mpre.len() - 1).rev() {
        mpre[i] = mpre[i].max(mpre[i + 1]);
    }

    (1..mrec.len())
        .filter(|&i| mrec[i] != mrec[i - 1])
        .map(|i| (mrec[i] - mrec[i - 1]) * mpre[i])
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_detector_has_unit_ap() {
        let ap = compute_ap(&[0.5, 1.0], &[1.0, 1.0]);
        assert!((ap - 1.0).abs() < 1e-12);
    }

    #[test]
    fn no_detections_have_zero_ap() {
        assert_eq!(compute_ap(&[], &[]), 0.0);
    }

    #[test]
    fn envelope_takes_later_higher_precision() {
        // recall 0.5 at p=0.5, then recall 1.0 at p≈0.67
        let ap = compute_ap(&[0.5, 0.5, 1.0], &[1.0 / 2.0, 1.0 / 3.0, 2.0 / 3.0]);
        assert!((ap - 2.0 / 3.0).abs() < 1e-9);
    }
}
