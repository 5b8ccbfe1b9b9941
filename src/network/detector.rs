use rand::{rngs::StdRng, SeedableRng};

use crate::activation::activation::ActivationFunction;
use crate::config::GRID_SIZE;
use crate::error::Result;
use crate::layers::dense::DenseLayer;
use crate::math::matrix::Matrix;
use crate::model::{Detector, ModelAttributes, Parameter, Precision};
use crate::network::spec::ArchitectureSpec;

/// Column of the objectness logit in a prediction row.
pub const OBJ: usize = 0;
/// First of the four box columns (x, y, w, h as logits of normalized values).
pub const BOX: usize = 1;
/// First class-score column.
pub const CLS: usize = 5;

/// Single-box detector: pooled image → dense layers → `[obj, box(4), cls(nc)]`.
#[derive(Debug, Clone)]
pub struct DenseDetector {
    spec: ArchitectureSpec,
    layers: Vec<DenseLayer>,
    attributes: ModelAttributes,
}

impl DenseDetector {
    pub fn new(spec: ArchitectureSpec, nc: usize, seed: u64) -> Result<DenseDetector> {
        spec.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);
        let mut layers = Vec::with_capacity(spec.layers.len() + 1);
        let mut input_size = spec.input_size();
        for l in &spec.layers {
            layers.push(DenseLayer::new(input_size, l.size, l.activation, &mut rng));
            input_size = l.size;
        }
        layers.push(DenseLayer::new(input_size, CLS + nc.max(1), ActivationFunction::Identity, &mut rng));

        let attributes = ModelAttributes {
            nc,
            names: spec.names.clone(),
            stride: vec![GRID_SIZE],
            ..ModelAttributes::default()
        };
        Ok(DenseDetector { spec, layers, attributes })
    }

    pub fn spec(&self) -> &ArchitectureSpec {
        &self.spec
    }

    /// Average-pools each `img_size × img_size` row of `images` to
    /// `pool × pool` cells (adaptive: cell bounds are floor/ceil of the
    /// proportional split).
    pub fn pool(&self, images: &Matrix, img_size: u32) -> Matrix {
        let side = img_size as usize;
        let g = self.spec.pool;
        let mut out = Matrix::zeros(images.rows, g * g);
        if side == 0 {
            return out;
        }
        let bounds = |cell: usize| (cell * side / g, ((cell + 1) * side).div_ceil(g).max(cell * side / g + 1).min(side));
        for r in 0..images.rows {
            let plane = images.row(r);
            for gy in 0..g {
                let (y0, y1) = bounds(gy);
                for gx in 0..g {
                    let (x0, x1) = bounds(gx);
                    let mut sum = 0.0;
                    for y in y0..y1 {
                        sum += plane[y * side + x0..y * side + x1].iter().sum::<f64>();
                    }
                    out.set(r, gy * g + gx, sum / ((y1 - y0) * (x1 - x0)) as f64);
                }
            }
        }
        out
    }
}

impl Detector for DenseDetector {
    type Prediction = Matrix;

    fn parameters(&self) -> Vec<(String, &Parameter)> {
        self.layers
            .iter()
            .enumerate()
            .flat_map(|(i, l)| {
                [
                    (format!("module_list.{i}.Conv2d.weight"), &l.weight),
                    (format!("module_list.{i}.Conv2d.bias"), &l.bias),
                    (format!("module_list.{i}.BatchNorm2d.weight"), &l.gain),
                ]
            })
            .collect()
    }

    fn parameters_mut(&mut self) -> Vec<(String, &mut Parameter)> {
        self.layers
            .iter_mut()
            .enumerate()
            .flat_map(|(i, l)| {
                [
                    (format!("module_list.{i}.Conv2d.weight"), &mut l.weight),
                    (format!("module_list.{i}.Conv2d.bias"), &mut l.bias),
                    (format!("module_list.{i}.BatchNorm2d.weight"), &mut l.gain),
                ]
            })
            .collect()
    }

    fn forward(&mut self, images: &Matrix, img_size: u32, precision: Precision) -> Matrix {
        let mut current = self.pool(images, img_size);
        for layer in &mut self.layers {
            current = layer.forward(current, precision);
        }
        current
    }

    fn infer(&self, images: &Matrix, img_size: u32) -> Matrix {
        let mut current = self.pool(images, img_size);
        for layer in &self.layers {
            current = layer.infer(&current);
        }
        current
    }

    fn backward(&mut self, grad: &Matrix, scale: f64, precision: Precision) {
        let mut delta = grad.map(|g| precision.quantize(g * scale));
        for layer in self.layers.iter_mut().rev() {
            delta = layer.backward(&delta, precision);
        }
    }

    fn attributes(&self) -> &ModelAttributes {
        &self.attributes
    }

    fn attributes_mut(&mut self) -> &mut ModelAttributes {
        &mut self.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GroupKind, ParamGroups};

    fn detector(nc: usize) -> DenseDetector {
        DenseDetector::new(ArchitectureSpec::tiny(), nc, 0).unwrap()
    }

    #[test]
    fn output_has_head_columns() {
        let mut d = detector(3);
        let images = Matrix::filled(2, 64 * 64, 0.5);
        let out = d.forward(&images, 64, Precision::Full);
        assert_eq!(out.shape(), (2, CLS + 3));
        assert_eq!(d.infer(&images, 64), out);
    }

    #[test]
    fn pooling_averages_cells() {
        let d = detector(1);
        let mut images = Matrix::zeros(1, 16 * 16);
        // left half bright
        for y in 0..16 {
            for x in 0..8 {
                images.set(0, y * 16 + x, 1.0);
            }
        }
        let pooled = d.pool(&images, 16);
        assert_eq!(pooled.cols, 64);
        assert_eq!(pooled.get(0, 0), 1.0);
        assert_eq!(pooled.get(0, 7), 0.0);
    }

    #[test]
    fn all_three_groups_are_populated() {
        let groups = ParamGroups::build(&detector(2));
        assert_eq!(groups.conv_weight.len(), 3);
        assert_eq!(groups.bias.len(), 3);
        assert_eq!(groups.other.len(), 3);
        assert!(groups.bias.iter().all(|n| GroupKind::classify(n) == GroupKind::Bias));
    }

    #[test]
    fn head_is_dropped_when_class_count_changes() {
        let source = detector(2);
        let mut target = detector(5);
        let before = target.state_dict();

        let report = target.load_state_dict(source.state_dict());
        assert_eq!(
            report.dropped,
            vec![
                "module_list.2.Conv2d.weight".to_string(),
                "module_list.2.Conv2d.bias".to_string(),
                "module_list.2.BatchNorm2d.weight".to_string(),
            ]
        );
        assert!(report.missing.is_empty());
        assert!(report.unexpected.is_empty());

        let after = target.state_dict();
        assert_eq!(after["module_list.0.Conv2d.weight"], source.state_dict()["module_list.0.Conv2d.weight"]);
        assert_eq!(after["module_list.2.Conv2d.weight"], before["module_list.2.Conv2d.weight"]);
    }

    #[test]
    fn single_mismatched_entry_is_the_only_one_dropped() {
        let source = DenseDetector::new(ArchitectureSpec::tiny(), 2, 9).unwrap();
        let mut target = detector(2);
        let mut stored = source.state_dict();
        stored.insert("module_list.1.Conv2d.bias".into(), Matrix::zeros(1, 3));
        stored.insert("module_list.9.Conv2d.weight".into(), Matrix::zeros(1, 1));

        let report = target.load_state_dict(stored);
        assert_eq!(report.dropped, vec!["module_list.1.Conv2d.bias".to_string()]);
        assert_eq!(report.unexpected, vec!["module_list.9.Conv2d.weight".to_string()]);
        assert_eq!(report.loaded.len(), 8);
        assert_eq!(target.state_dict()["module_list.0.Conv2d.weight"], source.state_dict()["module_list.0.Conv2d.weight"]);
    }

    #[test]
    fn entry_with_same_element_count_is_applied_in_live_shape() {
        let mut target = detector(2);
        let mut stored = target.state_dict();
        stored.insert("module_list.1.Conv2d.bias".into(), Matrix::filled(16, 1, 0.25));

        let report = target.load_state_dict(stored);
        assert!(report.dropped.is_empty());
        let bias = &target.state_dict()["module_list.1.Conv2d.bias"];
        assert_eq!(bias.shape(), (1, 16));
        assert_eq!(bias.get(0, 15), 0.25);
    }
}
