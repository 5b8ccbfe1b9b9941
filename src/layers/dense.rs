use rand::Rng;

use crate::{math::matrix::Matrix, activation::activation::ActivationFunction};
use crate::model::{Parameter, Precision};

/// Activations from the last training-mode forward pass, needed by backward.
#[derive(Debug, Clone)]
struct Cache {
    input: Matrix,
    z: Matrix,
    pre: Matrix,
}

/// Fully connected layer over a batch: `a = act((x · W + b) ⊙ g)`.
///
/// The kernel, bias and per-output gain are named like their
/// convolution/batch-norm counterparts (`Conv2d.weight`, `Conv2d.bias`,
/// `BatchNorm2d.weight`) so they land in the matching optimizer groups.
#[derive(Debug, Clone)]
pub struct DenseLayer {
    pub weight: Parameter,
    pub bias: Parameter,
    pub gain: Parameter,
    pub activator: ActivationFunction,
    cache: Option<Cache>,
}

impl DenseLayer {
    pub fn new<R: Rng>(input_size: usize, size: usize, activation: ActivationFunction, rng: &mut R) -> DenseLayer {
        DenseLayer {
            weight: Parameter::new(Matrix::he(input_size, size, rng)),
            bias: Parameter::new(Matrix::zeros(1, size)),
            gain: Parameter::new(Matrix::filled(1, size, 1.0)),
            activator: activation,
            cache: None,
        }
    }

    pub fn size(&self) -> usize {
        self.weight.value.cols
    }

    fn affine(&self, input: &Matrix, precision: Precision) -> (Matrix, Matrix) {
        let z = (input * &self.weight.value).add_row(&self.bias.value);
        let pre = z.mul_row(&self.gain.value).map(|x| precision.quantize(x));
        (z, pre)
    }

    /// Training-mode pass; keeps what `backward` needs.
    pub fn forward(&mut self, input: Matrix, precision: Precision) -> Matrix {
        let (z, pre) = self.affine(&input, precision);
        let out = pre.map(|x| self.activator.function(x));
        self.cache = Some(Cache { input, z, pre });
        out
    }

    pub fn infer(&self, input: &Matrix) -> Matrix {
        let (_, pre) = self.affine(input, Precision::Full);
        pre.map(|x| self.activator.function(x))
    }

    /// Adds this layer's parameter gradients for `delta` (∂L/∂a) and returns
    /// ∂L/∂x for the layer below. Without a cached forward pass nothing is
    /// accumulated and an empty matrix is returned.
    pub fn backward(&mut self, delta: &Matrix, precision: Precision) -> Matrix {
        let Some(cache) = self.cache.take() else {
            return Matrix::default();
        };

        // δ_pre = δ ⊙ σ'(pre)
        let act_derivative = cache.pre.map(|x| self.activator.derivative(x));
        let d_pre = delta.hadamard(&act_derivative).map(|x| precision.quantize(x));

        let d_gain = d_pre.hadamard(&cache.z).sum_rows();
        let d_z = d_pre.mul_row(&self.gain.value);
        let d_weight = &cache.input.transpose() * &d_z;
        let d_bias = d_z.sum_rows();
        let d_input = &d_z * &self.weight.value.transpose();

        self.weight.grad.add_scaled(&d_weight, 1.0);
        self.bias.grad.add_scaled(&d_bias, 1.0);
        self.gain.grad.add_scaled(&d_gain, 1.0);

        d_input
    }
}
