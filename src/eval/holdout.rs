use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info};

use crate::activation::sigmoid;
use crate::data::{DataLoader, DetectionDataset};
use crate::error::{Error, Result};
use crate::eval::{compute_ap, EvalOutput, EvalRequest, Evaluator, FitnessVector};
use crate::loss::{box_iou, DetectionLoss};
use crate::math::matrix::Matrix;
use crate::model::Detector;
use crate::network::detector::{BOX, CLS, OBJ};

/// Detections scoring below this are discarded before matching.
const CONF_THRES: f64 = 0.001;
/// Confidence at which precision, recall and F1 are reported.
const REPORT_CONF: f64 = 0.5;
const IOU_THRES: f64 = 0.5;

#[derive(Debug, Clone, Serialize)]
struct JsonDetection {
    image: String,
    category_id: usize,
    bbox: [f64; 4],
    score: f64,
}

#[derive(Debug, Clone, Copy)]
struct Detection {
    class: usize,
    conf: f64,
    bbox: [f64; 4],
}

/// Evaluates a one-box-per-row detector on a held-out dataset.
///
/// Every class with at least one ground-truth box contributes to mean
/// precision, recall, F1 and mAP. Validation losses are the mean loss
/// components over the held-out batches.
pub struct HoldoutEvaluator<S, L> {
    loader: DataLoader<S>,
    loss: L,
    json_path: Option<PathBuf>,
}

impl<S: DetectionDataset + Sync, L> HoldoutEvaluator<S, L> {
    pub fn new(loader: DataLoader<S>, loss: L) -> HoldoutEvaluator<S, L> {
        HoldoutEvaluator { loader, loss, json_path: None }
    }

    /// Where detections are written when a request sets `save_json`.
    pub fn with_json_output(mut self, path: PathBuf) -> Self {
        self.json_path = Some(path);
        self
    }

    pub fn loader(&self) -> &DataLoader<S> {
        &self.loader
    }
}

fn decode(row: &[f64], nc: usize, single_cls: bool, multi_label: bool) -> Vec<Detection> {
    let obj = sigmoid(row[OBJ]);
    let bbox = [sigmoid(row[BOX]), sigmoid(row[BOX + 1]), sigmoid(row[BOX + 2]), sigmoid(row[BOX + 3])];
    if single_cls || nc <= 1 {
        return vec![Detection { class: 0, conf: obj, bbox }];
    }
    let scores: Vec<f64> = row[CLS..CLS + nc].iter().map(|&x| obj * sigmoid(x)).collect();
    if multi_label {
        scores
            .iter()
            .enumerate()
            .filter(|(_, s)| **s > CONF_THRES)
            .map(|(class, &conf)| Detection { class, conf, bbox })
            .collect()
    } else {
        let (class, &conf) = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap_or((0, &0.0));
        vec![Detection { class, conf, bbox }]
    }
}

impl<D, S, L> Evaluator<D> for HoldoutEvaluator<S, L>
where
    D: Detector<Prediction = Matrix>,
    S: DetectionDataset + Sync,
    L: DetectionLoss<D>,
{
    fn evaluate(&mut self, model: &D, request: &EvalRequest) -> Result<EvalOutput> {
        let nc = if request.single_cls { 1 } else { model.attributes().nc.max(1) };
        let mut n_gt = vec![0usize; nc];
        // (confidence, true positive) per class
        let mut scored: Vec<Vec<(f64, bool)>> = vec![Vec::new(); nc];
        let mut loss_sum = [0.0; 3];
        let mut json = Vec::new();

        let batches = self.loader.len();
        for bi in 0..batches {
            let batch = self.loader.batch(bi, request.img_size)?;
            let pred = model.infer(&batch.images, request.img_size);
            if pred.rows != batch.len() || pred.cols < CLS + nc {
                return Err(Error::Evaluation(format!(
                    "prediction shape {:?} does not fit {} images with {nc} classes",
                    pred.shape(),
                    batch.len()
                )));
            }

            let out = self.loss.compute(&pred, &batch.targets, model);
            for (acc, v) in loss_sum.iter_mut().zip(&out.items.0[..3]) {
                *acc += v;
            }

            for i in 0..batch.len() {
                let mut gts: Vec<(usize, [f64; 4], bool)> = batch
                    .targets_for(i)
                    .map(|t| (if request.single_cls { 0 } else { t.class.min(nc - 1) }, t.bbox, false))
                    .collect();
                for (c, _, _) in &gts {
                    n_gt[*c] += 1;
                }

                let mut dets = decode(pred.row(i), nc, request.single_cls, request.multi_label);
                dets.retain(|d| d.conf > CONF_THRES);
                dets.sort_by(|a, b| b.conf.total_cmp(&a.conf));

                for d in dets {
                    let best = gts
                        .iter_mut()
                        .filter(|(c, _, used)| *c == d.class && !*used)
                        .map(|g| (box_iou(&d.bbox, &g.1), g))
                        .max_by(|a, b| a.0.total_cmp(&b.0));
                    let tp = match best {
                        Some((iou, g)) if iou >= IOU_THRES => {
                            g.2 = true;
                            true
                        }
                        _ => false,
                    };
                    scored[d.class].push((d.conf, tp));
                    if request.save_json {
                        json.push(JsonDetection {
                            image: batch.paths[i].display().to_string(),
                            category_id: d.class,
                            bbox: d.bbox,
                            score: d.conf,
                        });
                    }
                }
            }
        }

        let mut maps = vec![0.0; nc];
        let (mut p_sum, mut r_sum, mut ap_sum, mut f1_sum) = (0.0, 0.0, 0.0, 0.0);
        let mut classes = 0usize;
        for c in 0..nc {
            if n_gt[c] == 0 {
                continue;
            }
            classes += 1;
            let dets = &mut scored[c];
            dets.sort_by(|a, b| b.0.total_cmp(&a.0));

            let (mut tp, mut fp) = (0.0, 0.0);
            let mut recall = Vec::with_capacity(dets.len());
            let mut precision = Vec::with_capacity(dets.len());
            let (mut p_at, mut r_at) = (0.0, 0.0);
            for &(conf, is_tp) in dets.iter() {
                if is_tp {
                    tp += 1.0;
                } else {
                    fp += 1.0;
                }
                recall.push(tp / n_gt[c] as f64);
                precision.push(tp / (tp + fp));
                if conf >= REPORT_CONF {
                    p_at = tp / (tp + fp);
                    r_at = tp / n_gt[c] as f64;
                }
            }

            let ap = compute_ap(&recall, &precision);
            maps[c] = ap;
            p_sum += p_at;
            r_sum += r_at;
            ap_sum += ap;
            f1_sum += 2.0 * p_at * r_at / (p_at + r_at + 1e-16);
        }

        let k = classes.max(1) as f64;
        let map = ap_sum / k;
        for (c, m) in maps.iter_mut().enumerate() {
            if n_gt[c] == 0 {
                *m = map;
            }
        }

        let nb = batches.max(1) as f64;
        let results = FitnessVector {
            precision: p_sum / k,
            recall: r_sum / k,
            map,
            f1: f1_sum / k,
            val_giou: loss_sum[0] / nb,
            val_obj: loss_sum[1] / nb,
            val_cls: loss_sum[2] / nb,
        };
        debug!("evaluated {} images over {classes} classes", self.loader.dataset().len());

        if request.save_json {
            if let Some(path) = &self.json_path {
                let writer = BufWriter::new(File::create(path)?);
                serde_json::to_writer_pretty(writer, &json)?;
                info!("Saved {} detections to {}", json.len(), path.display());
            }
        }

        Ok(EvalOutput { results, maps })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{LoaderOptions, SyntheticShapes};
    use crate::loss::SingleBoxLoss;
    use crate::network::{ArchitectureSpec, DenseDetector};

    fn evaluator(len: usize) -> HoldoutEvaluator<SyntheticShapes, SingleBoxLoss> {
        let options = LoaderOptions { batch_size: 4, shuffle: false, augment: false, seed: 0 };
        let loader = DataLoader::new(SyntheticShapes::new(len, 2, 5), options).unwrap();
        HoldoutEvaluator::new(loader, SingleBoxLoss)
    }

    fn request() -> EvalRequest {
        EvalRequest { batch_size: 4, img_size: 32, single_cls: false, save_json: false, multi_label: false }
    }

    #[test]
    fn metrics_are_bounded() {
        let model = DenseDetector::new(ArchitectureSpec::tiny(), 2, 0).unwrap();
        let out = evaluator(10).evaluate(&model, &request()).unwrap();
        let r = out.results;
        for v in [r.precision, r.recall, r.map, r.f1] {
            assert!((0.0..=1.0).contains(&v), "{v}");
        }
        assert!(r.val_obj > 0.0);
        assert_eq!(out.maps.len(), 2);
    }

    #[test]
    fn single_class_collapses_classes() {
        let model = DenseDetector::new(ArchitectureSpec::tiny(), 2, 0).unwrap();
        let req = EvalRequest { single_cls: true, ..request() };
        let out = evaluator(6).evaluate(&model, &req).unwrap();
        assert_eq!(out.maps.len(), 1);
    }

    #[test]
    fn decode_picks_best_class() {
        let row = [3.0, 0.0, 0.0, 0.0, 0.0, -2.0, 4.0, 0.0];
        let dets = decode(&row, 3, false, false);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class, 1);
        assert_eq!(decode(&row, 3, false, true).len(), 3);
    }

    #[test]
    fn writes_detections_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.json");
        let model = DenseDetector::new(ArchitectureSpec::tiny(), 2, 0).unwrap();
        let mut eval = evaluator(4).with_json_output(path.clone());
        let req = EvalRequest { save_json: true, ..request() };
        eval.evaluate(&model, &req).unwrap();
        assert!(path.exists());
    }
}
