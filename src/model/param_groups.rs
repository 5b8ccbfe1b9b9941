use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::detector::Detector;

/// Optimizer group a parameter belongs to. The order of the variants is the
/// order of the optimizer's groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    /// Everything that is neither a bias nor a convolution kernel.
    Other,
    /// Convolution kernels; the only group with weight decay.
    ConvWeight,
    Bias,
}

impl GroupKind {
    /// Classifies a parameter name. Bias wins over conv weight, conv weight
    /// over other.
    pub fn classify(name: &str) -> GroupKind {
        if name.contains(".bias") {
            GroupKind::Bias
        } else if name.contains("Conv2d.weight") {
            GroupKind::ConvWeight
        } else {
            GroupKind::Other
        }
    }
}

/// Disjoint partition of a model's parameter names, each in model order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamGroups {
    pub other: Vec<String>,
    pub conv_weight: Vec<String>,
    pub bias: Vec<String>,
}

impl ParamGroups {
    /// Reads the model's parameter names once and partitions them.
    pub fn build<D: Detector>(model: &D) -> ParamGroups {
        let mut groups = ParamGroups::default();
        for (name, _) in model.parameters() {
            match GroupKind::classify(&name) {
                GroupKind::Other => groups.other.push(name),
                GroupKind::ConvWeight => groups.conv_weight.push(name),
                GroupKind::Bias => groups.bias.push(name),
            }
        }
        info!(
            "Optimizer groups: {} .bias, {} Conv2d.weight, {} other",
            groups.bias.len(),
            groups.conv_weight.len(),
            groups.other.len()
        );
        groups
    }

    pub fn len(&self) -> usize {
        self.other.len() + self.conv_weight.len() + self.bias.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bias_takes_precedence() {
        assert_eq!(GroupKind::classify("module_list.0.Conv2d.bias"), GroupKind::Bias);
        assert_eq!(GroupKind::classify("module_list.0.Conv2d.weight"), GroupKind::ConvWeight);
        assert_eq!(GroupKind::classify("module_list.0.BatchNorm2d.weight"), GroupKind::Other);
        assert_eq!(GroupKind::classify("module_list.3.BatchNorm2d.bias"), GroupKind::Bias);
    }
}
