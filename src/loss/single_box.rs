use crate::activation::sigmoid;
use crate::data::Target;
use crate::loss::{BceWithLogits, DetectionLoss, LossItems, LossOutput, MseLoss};
use crate::math::matrix::Matrix;
use crate::model::Detector;
use crate::network::detector::{BOX, CLS, OBJ};

/// IoU of two `[x_center, y_center, width, height]` boxes.
pub fn box_iou(a: &[f64; 4], b: &[f64; 4]) -> f64 {
    let corners = |v: &[f64; 4]| (v[0] - v[2] / 2.0, v[1] - v[3] / 2.0, v[0] + v[2] / 2.0, v[1] + v[3] / 2.0);
    let (ax0, ay0, ax1, ay1) = corners(a);
    let (bx0, by0, bx1, by1) = corners(b);
    let iw = (ax1.min(bx1) - ax0.max(bx0)).max(0.0);
    let ih = (ay1.min(by1) - ay0.max(by0)).max(0.0);
    let inter = iw * ih;
    let union = a[2] * a[3] + b[2] * b[3] - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Loss for the one-box-per-image head of `DenseDetector`.
///
/// Each row of the prediction is `[obj, x, y, w, h, cls…]` in logits. The
/// first target of an image is its positive; images without targets only
/// contribute objectness. Gains come from the model's attached `hyp`:
/// `giou` scales the box term, `obj`/`cls` their BCE terms and
/// `obj_pw`/`cls_pw` the positive weights. The objectness target of a
/// positive is `(1 - gr) + gr * iou`. Focal weighting (`fl_gamma`) is not
/// applied.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleBoxLoss;

impl<D: Detector<Prediction = Matrix>> DetectionLoss<D> for SingleBoxLoss {
    fn compute(&self, pred: &Matrix, targets: &[Target], model: &D) -> LossOutput<Matrix> {
        let attrs = model.attributes();
        let hyp = &attrs.hyp;
        let nc = pred.cols.saturating_sub(CLS);
        let bs = pred.rows;
        let obj_bce = BceWithLogits::new(hyp.obj_pw);
        let cls_bce = BceWithLogits::new(hyp.cls_pw);

        let mut grad = pred.zeros_like();
        let (mut lbox, mut lobj, mut lcls) = (0.0, 0.0, 0.0);

        let positives: Vec<(usize, &Target)> = (0..bs)
            .filter_map(|i| targets.iter().find(|t| t.image == i).map(|t| (i, t)))
            .collect();
        let npos = positives.len().max(1) as f64;
        let mut tobj = vec![0.0; bs];

        for &(i, t) in &positives {
            let logits = &pred.row(i)[BOX..BOX + 4];
            let pbox: [f64; 4] = [sigmoid(logits[0]), sigmoid(logits[1]), sigmoid(logits[2]), sigmoid(logits[3])];

            lbox += MseLoss::loss(&pbox, &t.bbox);
            let d = MseLoss::derivative(&pbox, &t.bbox);
            for k in 0..4 {
                let dsig = pbox[k] * (1.0 - pbox[k]);
                grad.set(i, BOX + k, hyp.giou * d[k] * dsig / npos);
            }

            tobj[i] = (1.0 - attrs.gr) + attrs.gr * box_iou(&pbox, &t.bbox).max(0.0);

            if nc > 1 {
                let cls_logits = &pred.row(i)[CLS..];
                let mut onehot = vec![0.0; nc];
                if t.class < nc {
                    onehot[t.class] = 1.0;
                }
                lcls += cls_bce.loss(cls_logits, &onehot);
                for (k, g) in cls_bce.derivative(cls_logits, &onehot).into_iter().enumerate() {
                    grad.set(i, CLS + k, hyp.cls * g / npos);
                }
            }
        }

        let obj_logits: Vec<f64> = (0..bs).map(|i| pred.get(i, OBJ)).collect();
        if bs > 0 {
            lobj = obj_bce.loss(&obj_logits, &tobj);
            for (i, g) in obj_bce.derivative(&obj_logits, &tobj).into_iter().enumerate() {
                grad.set(i, OBJ, hyp.obj * g);
            }
        }

        lbox = lbox / npos * hyp.giou;
        lobj *= hyp.obj;
        lcls = lcls / npos * hyp.cls;

        let items = LossItems::new(lbox, lobj, lcls);
        LossOutput { total: items.total(), items, grad }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{ArchitectureSpec, DenseDetector};

    fn detector(nc: usize) -> DenseDetector {
        DenseDetector::new(ArchitectureSpec::tiny(), nc, 3).unwrap()
    }

    fn targets() -> Vec<Target> {
        vec![
            Target { image: 0, class: 1, bbox: [0.4, 0.5, 0.3, 0.2] },
            Target { image: 2, class: 2, bbox: [0.6, 0.3, 0.2, 0.4] },
        ]
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b = [0.5, 0.5, 0.2, 0.4];
        assert!((box_iou(&b, &b) - 1.0).abs() < 1e-12);
        assert_eq!(box_iou(&b, &[0.1, 0.1, 0.05, 0.05]), 0.0);
    }

    #[test]
    fn total_is_sum_of_terms() {
        let model = detector(3);
        let pred = Matrix::from_rows(vec![vec![0.1; 8], vec![-0.2; 8], vec![0.3; 8]]);
        let out = SingleBoxLoss.compute(&pred, &targets(), &model);
        let [b, o, c, t] = out.items.0;
        assert!(b > 0.0 && o > 0.0 && c > 0.0);
        assert!((b + o + c - t).abs() < 1e-12);
        assert_eq!(out.total, t);
    }

    #[test]
    fn single_class_has_no_class_term() {
        let model = detector(1);
        let pred = Matrix::filled(3, 6, 0.2);
        let out = SingleBoxLoss.compute(&pred, &targets(), &model);
        assert_eq!(out.items.0[2], 0.0);
    }

    #[test]
    fn gradient_matches_finite_difference() {
        let mut model = detector(3);
        // hard objectness targets keep the loss smooth in the box logits
        model.attributes_mut().gr = 0.0;
        let pred = Matrix::from_rows(vec![
            vec![0.1, -0.3, 0.2, 0.4, -0.1, 0.5, -0.5, 0.0],
            vec![-0.2, 0.1, 0.1, 0.1, 0.1, 0.2, 0.3, -0.4],
            vec![0.3, 0.6, -0.2, -0.3, 0.2, -0.1, 0.1, 0.7],
        ]);
        let out = SingleBoxLoss.compute(&pred, &targets(), &model);
        let h = 1e-6;
        for idx in 0..pred.numel() {
            let mut plus = pred.clone();
            plus.data[idx] += h;
            let mut minus = pred.clone();
            minus.data[idx] -= h;
            let numeric = (SingleBoxLoss.compute(&plus, &targets(), &model).total
                - SingleBoxLoss.compute(&minus, &targets(), &model).total)
                / (2.0 * h);
            assert!(
                (numeric - out.grad.data[idx]).abs() < 1e-4,
                "index {idx}: numeric {numeric} analytic {}",
                out.grad.data[idx]
            );
        }
    }
}
