use std::collections::{BTreeMap, HashMap};

use serde::{Serialize, Deserialize};

use crate::config::HyperParams;
use crate::error::{Error, Result};
use crate::math::matrix::Matrix;
use crate::model::{Detector, GroupKind, ParamGroups};

/// Per-group optimizer hyperparameters. `lr`, `momentum` and `weight_decay`
/// are rewritten every burn-in iteration; `initial_lr` is the base the
/// epoch schedule multiplies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamGroup {
    pub kind: GroupKind,
    pub params: Vec<String>,
    pub lr: f64,
    pub initial_lr: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    pub nesterov: bool,
}

/// Serializable optimizer state: group settings plus momentum buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SgdState {
    pub param_groups: Vec<ParamGroup>,
    pub momentum_buffers: BTreeMap<String, Matrix>,
}

/// Stochastic gradient descent with (Nesterov) momentum and per-group
/// learning rate and L2 weight decay.
#[derive(Debug, Clone)]
pub struct Sgd {
    pub param_groups: Vec<ParamGroup>,
    momentum_buffers: BTreeMap<String, Matrix>,
}

impl Sgd {
    /// Creates the optimizer with its first group; later groups inherit
    /// `lr`, `momentum` and `nesterov` from it.
    pub fn new(kind: GroupKind, params: Vec<String>, lr: f64, momentum: f64, nesterov: bool) -> Sgd {
        Sgd {
            param_groups: vec![ParamGroup {
                kind,
                params,
                lr,
                initial_lr: lr,
                momentum,
                weight_decay: 0.0,
                nesterov,
            }],
            momentum_buffers: BTreeMap::new(),
        }
    }

    pub fn add_param_group(&mut self, kind: GroupKind, params: Vec<String>, weight_decay: f64) {
        let defaults = &self.param_groups[0];
        let group = ParamGroup {
            kind,
            params,
            lr: defaults.lr,
            initial_lr: defaults.initial_lr,
            momentum: defaults.momentum,
            weight_decay,
            nesterov: defaults.nesterov,
        };
        self.param_groups.push(group);
    }

    /// Standard three-group detector optimizer: plain, decayed conv kernels, biases.
    pub fn for_detector(groups: &ParamGroups, hyp: &HyperParams) -> Sgd {
        let mut sgd = Sgd::new(GroupKind::Other, groups.other.clone(), hyp.lr0, hyp.momentum, true);
        sgd.add_param_group(GroupKind::ConvWeight, groups.conv_weight.clone(), hyp.weight_decay);
        sgd.add_param_group(GroupKind::Bias, groups.bias.clone(), 0.0);
        sgd
    }

    pub fn group(&self, kind: GroupKind) -> Option<&ParamGroup> {
        self.param_groups.iter().find(|g| g.kind == kind)
    }

    /// Current learning rate of every group, in group order.
    pub fn learning_rates(&self) -> Vec<f64> {
        self.param_groups.iter().map(|g| g.lr).collect()
    }

    /// Applies one update from the gradients accumulated in `model`.
    pub fn step<D: Detector>(&mut self, model: &mut D) {
        let mut params: HashMap<String, _> = model.parameters_mut().into_iter().collect();

        for group in &self.param_groups {
            for name in &group.params {
                let Some(p) = params.get_mut(name) else { continue };

                let mut d_p = p.grad.clone();
                if group.weight_decay != 0.0 {
                    d_p.add_scaled(&p.value, group.weight_decay);
                }

                if group.momentum != 0.0 {
                    let momentum = group.momentum;
                    let buf = self
                        .momentum_buffers
                        .entry(name.clone())
                        .and_modify(|buf| {
                            if buf.shape() == d_p.shape() {
                                buf.scale_in_place(momentum);
                                buf.add_scaled(&d_p, 1.0);
                            } else {
                                *buf = d_p.clone();
                            }
                        })
                        .or_insert_with(|| d_p.clone());
                    if group.nesterov {
                        d_p.add_scaled(buf, group.momentum);
                    } else {
                        d_p = buf.clone();
                    }
                }

                p.value.add_scaled(&d_p, -group.lr);
            }
        }
    }

    pub fn zero_grad<D: Detector>(&self, model: &mut D) {
        model.zero_grad();
    }

    pub fn state_dict(&self) -> SgdState {
        SgdState {
            param_groups: self.param_groups.clone(),
            momentum_buffers: self.momentum_buffers.clone(),
        }
    }

    /// Restores group hyperparameters and momentum buffers. Group
    /// membership stays as built for the live model.
    pub fn load_state_dict(&mut self, state: SgdState) -> Result<()> {
        if state.param_groups.len() != self.param_groups.len() {
            return Err(Error::Config(format!(
                "optimizer state has {} parameter groups, expected {}",
                state.param_groups.len(),
                self.param_groups.len()
            )));
        }
        for (live, stored) in self.param_groups.iter_mut().zip(state.param_groups) {
            if live.kind != stored.kind {
                return Err(Error::Config(format!(
                    "optimizer group kind mismatch: stored {:?}, live {:?}",
                    stored.kind, live.kind
                )));
            }
            live.lr = stored.lr;
            live.initial_lr = stored.initial_lr;
            live.momentum = stored.momentum;
            live.weight_decay = stored.weight_decay;
            live.nesterov = stored.nesterov;
        }
        self.momentum_buffers = state.momentum_buffers;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{ArchitectureSpec, DenseDetector};

    fn detector() -> DenseDetector {
        DenseDetector::new(ArchitectureSpec::tiny(), 2, 1).unwrap()
    }

    fn fill_grads(model: &mut DenseDetector, value: f64) {
        for (_, p) in model.parameters_mut() {
            p.grad.fill(value);
        }
    }

    #[test]
    fn detector_optimizer_has_three_groups() {
        let model = detector();
        let groups = ParamGroups::build(&model);
        let sgd = Sgd::for_detector(&groups, &HyperParams::default());
        let kinds: Vec<_> = sgd.param_groups.iter().map(|g| g.kind).collect();
        assert_eq!(kinds, vec![GroupKind::Other, GroupKind::ConvWeight, GroupKind::Bias]);
        assert_eq!(sgd.group(GroupKind::ConvWeight).unwrap().weight_decay, 0.0005);
        assert_eq!(sgd.group(GroupKind::Bias).unwrap().weight_decay, 0.0);
        assert!(sgd.param_groups.iter().all(|g| g.nesterov && g.initial_lr == 0.01));
    }

    #[test]
    fn plain_step_moves_against_gradient() {
        let mut model = detector();
        let name = "module_list.0.Conv2d.bias".to_string();
        let before = model.state_dict()[&name].clone();
        let mut sgd = Sgd::new(GroupKind::Bias, vec![name.clone()], 0.1, 0.0, false);
        fill_grads(&mut model, 1.0);
        sgd.step(&mut model);
        let after = &model.state_dict()[&name];
        for (a, b) in after.data.iter().zip(&before.data) {
            assert!((a - (b - 0.1)).abs() < 1e-12);
        }
    }

    #[test]
    fn nesterov_uses_momentum_lookahead() {
        let mut model = detector();
        let name = "module_list.0.Conv2d.bias".to_string();
        let before = model.state_dict()[&name].data[0];
        let mut sgd = Sgd::new(GroupKind::Bias, vec![name.clone()], 1.0, 0.5, true);
        fill_grads(&mut model, 1.0);
        sgd.step(&mut model);
        // buf = g; update = g + 0.5 * buf
        assert!((model.state_dict()[&name].data[0] - (before - 1.5)).abs() < 1e-12);
        sgd.step(&mut model);
        // buf = 0.5 + 1 = 1.5; update = 1 + 0.75
        assert!((model.state_dict()[&name].data[0] - (before - 3.25)).abs() < 1e-12);
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut model = detector();
        let groups = ParamGroups::build(&model);
        let mut sgd = Sgd::for_detector(&groups, &HyperParams::default());
        fill_grads(&mut model, 0.3);
        sgd.step(&mut model);
        sgd.param_groups[2].lr = 0.07;

        let json = serde_json::to_string(&sgd.state_dict()).unwrap();
        let state: SgdState = serde_json::from_str(&json).unwrap();
        let mut restored = Sgd::for_detector(&groups, &HyperParams::default());
        restored.load_state_dict(state).unwrap();
        assert_eq!(restored.state_dict(), sgd.state_dict());
    }

    #[test]
    fn mismatched_group_layout_is_rejected() {
        let groups = ParamGroups::build(&detector());
        let mut sgd = Sgd::for_detector(&groups, &HyperParams::default());
        let single = Sgd::new(GroupKind::Other, vec![], 0.01, 0.9, true);
        assert!(sgd.load_state_dict(single.state_dict()).is_err());
    }
}
