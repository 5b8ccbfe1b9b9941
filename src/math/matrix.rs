use rand::prelude::*;
use serde::{Serialize, Deserialize};
use std::f64::consts::PI;
use std::ops::{Add, Sub, Mul};

/// Dense row-major `f64` matrix. This is the storage type for every trainable
/// value, gradient, optimizer buffer and image batch in the crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Matrix {
        Matrix { rows, cols, data: vec![0.0; rows * cols] }
    }

    pub fn filled(rows: usize, cols: usize, value: f64) -> Matrix {
        Matrix { rows, cols, data: vec![value; rows * cols] }
    }

    /// Zero matrix with the same shape as `self`.
    pub fn zeros_like(&self) -> Matrix {
        Matrix::zeros(self.rows, self.cols)
    }

    /// Builds a matrix from row-major values. Returns `None` on a length mismatch.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Option<Matrix> {
        if data.len() != rows * cols {
            return None;
        }
        Some(Matrix { rows, cols, data })
    }

    /// Builds a matrix from nested rows. An empty outer vec yields a 0×0 matrix.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Matrix {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let n = rows.len();
        let data: Vec<f64> = rows.into_iter().flatten().collect();
        assert_eq!(data.len(), n * cols, "ragged rows");
        Matrix { rows: n, cols, data }
    }

    /// Samples a single value from N(0, 1) using the Box-Muller transform.
    fn sample_standard_normal<R: Rng>(rng: &mut R) -> f64 {
        // Uniforms in (0, 1] so ln() never sees zero.
        let u1: f64 = 1.0 - rng.gen::<f64>();
        let u2: f64 = 1.0 - rng.gen::<f64>();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }

    /// He initialization: samples from N(0, sqrt(2 / rows)).
    ///
    /// Shape: (rows, cols) where `rows` is the fan-in, matching the `x · W`
    /// convention used by the dense layers.
    pub fn he<R: Rng>(rows: usize, cols: usize, rng: &mut R) -> Matrix {
        let std_dev = (2.0 / rows.max(1) as f64).sqrt();
        let data = (0..rows * cols)
            .map(|_| Matrix::sample_standard_normal(rng) * std_dev)
            .collect();
        Matrix { rows, cols, data }
    }

    /// Total number of elements; the unit of shape compatibility on checkpoint load.
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    #[inline]
    pub fn get(&self, r: usize, c: usize) -> f64 {
        self.data[r * self.cols + c]
    }

    #[inline]
    pub fn set(&mut self, r: usize, c: usize, value: f64) {
        self.data[r * self.cols + c] = value;
    }

    pub fn row(&self, r: usize) -> &[f64] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    pub fn row_mut(&mut self, r: usize) -> &mut [f64] {
        let cols = self.cols;
        &mut self.data[r * cols..(r + 1) * cols]
    }

    pub fn transpose(&self) -> Matrix {
        let mut res = Matrix::zeros(self.cols, self.rows);
        for i in 0..self.rows {
            for j in 0..self.cols {
                res.data[j * self.rows + i] = self.data[i * self.cols + j];
            }
        }
        res
    }

    pub fn map<F>(&self, functor: F) -> Matrix
    where
        F: Fn(f64) -> f64,
    {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|&x| functor(x)).collect(),
        }
    }

    /// Element-wise (Hadamard) product of two same-shape matrices.
    pub fn hadamard(&self, other: &Matrix) -> Matrix {
        assert_eq!(self.shape(), other.shape(), "hadamard shape mismatch");
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().zip(&other.data).map(|(a, b)| a * b).collect(),
        }
    }

    /// Multiplies every row element-wise by a 1×cols row vector.
    pub fn mul_row(&self, row: &Matrix) -> Matrix {
        assert_eq!(row.rows, 1);
        assert_eq!(row.cols, self.cols);
        let mut res = self.clone();
        for r in 0..res.rows {
            for (x, g) in res.row_mut(r).iter_mut().zip(&row.data) {
                *x *= g;
            }
        }
        res
    }

    /// Adds a 1×cols row vector to every row.
    pub fn add_row(&self, row: &Matrix) -> Matrix {
        assert_eq!(row.rows, 1);
        assert_eq!(row.cols, self.cols);
        let mut res = self.clone();
        for r in 0..res.rows {
            for (x, b) in res.row_mut(r).iter_mut().zip(&row.data) {
                *x += b;
            }
        }
        res
    }

    /// Column sums as a 1×cols matrix.
    pub fn sum_rows(&self) -> Matrix {
        let mut res = Matrix::zeros(1, self.cols);
        for r in 0..self.rows {
            for (acc, x) in res.data.iter_mut().zip(self.row(r)) {
                *acc += x;
            }
        }
        res
    }

    /// In-place `self += alpha * other`.
    pub fn add_scaled(&mut self, other: &Matrix, alpha: f64) {
        assert_eq!(self.shape(), other.shape(), "add_scaled shape mismatch");
        for (x, y) in self.data.iter_mut().zip(&other.data) {
            *x += alpha * y;
        }
    }

    /// In-place `self = self * decay + other * (1 - decay)`.
    pub fn lerp_towards(&mut self, other: &Matrix, decay: f64) {
        assert_eq!(self.numel(), other.numel(), "lerp_towards size mismatch");
        for (x, y) in self.data.iter_mut().zip(&other.data) {
            *x = *x * decay + y * (1.0 - decay);
        }
    }

    pub fn scale_in_place(&mut self, factor: f64) {
        self.data.iter_mut().for_each(|x| *x *= factor);
    }

    pub fn fill(&mut self, value: f64) {
        self.data.iter_mut().for_each(|x| *x = value);
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|x| x.is_finite())
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Matrix { rows: 0, cols: 0, data: vec![] }
    }
}

impl Add for Matrix {
    type Output = Matrix;

    fn add(mut self, rhs: Self) -> Self::Output {
        self.add_scaled(&rhs, 1.0);
        self
    }
}

impl Sub for Matrix {
    type Output = Matrix;

    fn sub(mut self, rhs: Self) -> Self::Output {
        self.add_scaled(&rhs, -1.0);
        self
    }
}

impl Mul for &Matrix {
    type Output = Matrix;

    fn mul(self, rhs: Self) -> Self::Output {
        if self.cols != rhs.rows {
            panic!("Matrices are of incorrect sizes")
        }

        let mut res = Matrix::zeros(self.rows, rhs.cols);
        for i in 0..self.rows {
            for k in 0..self.cols {
                let a = self.data[i * self.cols + k];
                if a == 0.0 {
                    continue;
                }
                let rhs_row = rhs.row(k);
                let out = res.row_mut(i);
                for (o, b) in out.iter_mut().zip(rhs_row) {
                    *o += a * b;
                }
            }
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_matches_hand_computation() {
        let a = Matrix::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        let b = Matrix::from_rows(vec![vec![5.0], vec![6.0]]);
        let c = &a * &b;
        assert_eq!(c.shape(), (2, 1));
        assert_eq!(c.data, vec![17.0, 39.0]);
    }

    #[test]
    fn transpose_swaps_indices() {
        let a = Matrix::from_rows(vec![vec![1.0, 2.0, 3.0]]);
        let t = a.transpose();
        assert_eq!(t.shape(), (3, 1));
        assert_eq!(t.get(2, 0), 3.0);
    }

    #[test]
    fn lerp_towards_blends_by_decay() {
        let mut shadow = Matrix::filled(1, 2, 1.0);
        let live = Matrix::filled(1, 2, 3.0);
        shadow.lerp_towards(&live, 0.75);
        assert!((shadow.data[0] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn row_broadcasts() {
        let x = Matrix::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        let b = Matrix::from_rows(vec![vec![10.0, 20.0]]);
        assert_eq!(x.add_row(&b).data, vec![11.0, 22.0, 13.0, 24.0]);
        assert_eq!(x.mul_row(&b).data, vec![10.0, 40.0, 30.0, 80.0]);
        assert_eq!(x.sum_rows().data, vec![4.0, 6.0]);
    }

    #[test]
    fn from_vec_rejects_bad_length() {
        assert!(Matrix::from_vec(2, 2, vec![1.0; 3]).is_none());
    }
}
