//! Elementwise kernels. Every operation writes into `target` when one is
//! given and into `self` otherwise; matrix operands and targets must share
//! the stored shape and transpose flag of `self`.

use crate::error::MatResult;
use crate::kernels;
use crate::matrix::DenseMatrix;

/// Right-hand side of a binary elementwise operation.
#[derive(Clone, Copy, Debug)]
pub enum Operand<'a> {
    Scalar(f32),
    Matrix(&'a DenseMatrix),
}

impl From<f32> for Operand<'_> {
    fn from(value: f32) -> Self {
        Operand::Scalar(value)
    }
}

impl<'a> From<&'a DenseMatrix> for Operand<'a> {
    fn from(value: &'a DenseMatrix) -> Self {
        Operand::Matrix(value)
    }
}

impl<'a> From<&'a mut DenseMatrix> for Operand<'a> {
    fn from(value: &'a mut DenseMatrix) -> Self {
        Operand::Matrix(value)
    }
}

fn sign(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

fn indicator(condition: bool) -> f32 {
    if condition {
        1.0
    } else {
        0.0
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn softplus_exact(x: f32) -> f32 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

fn softplus_fast(x: f32) -> f32 {
    if x > 20.0 {
        x
    } else {
        (1.0 + x.exp()).ln()
    }
}

impl DenseMatrix {
    pub(crate) fn apply_unary<F>(&mut self, target: Option<&mut DenseMatrix>, f: F) -> MatResult<()>
    where
        F: Fn(f32) -> f32 + Send + Sync,
    {
        self.check_target(target.as_deref())?;
        let mut values = self.device_values()?;
        kernels::map_in_place(&mut values, f);
        self.commit(target, &values)
    }

    pub(crate) fn apply_binary<F>(
        &mut self,
        val: Operand<'_>,
        target: Option<&mut DenseMatrix>,
        f: F,
    ) -> MatResult<()>
    where
        F: Fn(f32, f32) -> f32 + Send + Sync,
    {
        self.check_target(target.as_deref())?;
        let mut values = self.device_values()?;
        match val {
            Operand::Scalar(s) => kernels::map_in_place(&mut values, |x| f(x, s)),
            Operand::Matrix(other) => {
                self.check_same_layout(other)?;
                let rhs = other.device_values()?;
                kernels::zip_in_place(&mut values, &rhs, f);
            }
        }
        self.commit(target, &values)
    }

    /// Sets every element to a scalar or copies another matrix.
    pub fn assign<'a>(&mut self, val: impl Into<Operand<'a>>) -> MatResult<()> {
        match val.into() {
            Operand::Scalar(s) => {
                self.ensure_on_device()?;
                let values = vec![s; self.len()];
                self.store_values(&values)
            }
            Operand::Matrix(other) => {
                self.check_same_layout(other)?;
                self.region()?.copy_from(other.region()?)
            }
        }
    }

    pub fn add<'a>(&mut self, val: impl Into<Operand<'a>>, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_binary(val.into(), target, |x, y| x + y)
    }

    pub fn subtract<'a>(&mut self, val: impl Into<Operand<'a>>, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_binary(val.into(), target, |x, y| x - y)
    }

    pub fn mult<'a>(&mut self, val: impl Into<Operand<'a>>, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_binary(val.into(), target, |x, y| x * y)
    }

    pub fn divide<'a>(&mut self, val: impl Into<Operand<'a>>, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_binary(val.into(), target, |x, y| x / y)
    }

    /// Raises each element to a scalar or elementwise exponent.
    pub fn pow<'a>(&mut self, exponent: impl Into<Operand<'a>>, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_binary(exponent.into(), target, f32::powf)
    }

    /// `self += mult * mat`.
    pub fn add_mult(&mut self, mat: &DenseMatrix, mult: f32) -> MatResult<()> {
        self.apply_binary(Operand::Matrix(mat), None, |x, y| x + mult * y)
    }

    /// `self -= mult * mat`.
    pub fn subtract_mult(&mut self, mat: &DenseMatrix, mult: f32) -> MatResult<()> {
        self.apply_binary(Operand::Matrix(mat), None, |x, y| x - mult * y)
    }

    /// `self += mult * sign(mat)`.
    pub fn add_mult_sign(&mut self, mat: &DenseMatrix, mult: f32) -> MatResult<()> {
        self.apply_binary(Operand::Matrix(mat), None, |x, y| x + mult * sign(y))
    }

    pub fn sign(&mut self, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_unary(target, sign)
    }

    pub fn reciprocal(&mut self, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_unary(target, |x| 1.0 / x)
    }

    pub fn apply_exp(&mut self, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_unary(target, f32::exp)
    }

    /// `ln(x + tiny)`; a positive `tiny` keeps zeros finite.
    pub fn apply_log(&mut self, tiny: f32, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_unary(target, |x| (x + tiny).ln())
    }

    /// `ln(1 + e^x)`. The fast form returns `x` once `x > 20`.
    pub fn apply_log_1_plus_exp(&mut self, exact: bool, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        if exact {
            self.apply_unary(target, softplus_exact)
        } else {
            self.apply_unary(target, softplus_fast)
        }
    }

    pub fn apply_sqrt(&mut self, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_unary(target, f32::sqrt)
    }

    pub fn apply_floor(&mut self, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_unary(target, f32::floor)
    }

    pub fn apply_ceil(&mut self, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_unary(target, f32::ceil)
    }

    pub fn apply_sin(&mut self, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_unary(target, f32::sin)
    }

    pub fn apply_cos(&mut self, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_unary(target, f32::cos)
    }

    pub fn apply_sigmoid(&mut self, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_unary(target, sigmoid)
    }

    pub fn apply_tanh(&mut self, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_unary(target, f32::tanh)
    }

    pub fn apply_abs(&mut self, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_unary(target, f32::abs)
    }

    pub fn apply_rectified_linear(&mut self, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_unary(target, |x| if x > 0.0 { x } else { 0.0 })
    }

    pub fn apply_rectified_linear_smooth(&mut self, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_unary(target, softplus_fast)
    }

    // Derivatives: `self` holds the incoming gradient, `val` the saved
    // activation (or input for sin/cos).

    pub fn apply_logistic_deriv(&mut self, val: &DenseMatrix, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_binary(Operand::Matrix(val), target, |g, a| g * a * (1.0 - a))
    }

    pub fn apply_tanh_deriv(&mut self, val: &DenseMatrix, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_binary(Operand::Matrix(val), target, |g, a| g * (1.0 + a) * (1.0 - a))
    }

    pub fn apply_rectified_linear_deriv(&mut self, val: &DenseMatrix, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_binary(Operand::Matrix(val), target, |g, a| if a > 0.0 { g } else { 0.0 })
    }

    pub fn apply_rectified_linear_smooth_deriv(
        &mut self,
        val: &DenseMatrix,
        target: Option<&mut DenseMatrix>,
    ) -> MatResult<()> {
        self.apply_binary(Operand::Matrix(val), target, |g, a| g * (1.0 - (-a).exp()))
    }

    pub fn apply_sin_deriv(&mut self, val: &DenseMatrix, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_binary(Operand::Matrix(val), target, |g, x| g * x.cos())
    }

    pub fn apply_cos_deriv(&mut self, val: &DenseMatrix, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_binary(Operand::Matrix(val), target, |g, x| -g * x.sin())
    }

    pub fn less_than<'a>(&mut self, val: impl Into<Operand<'a>>, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_binary(val.into(), target, |x, y| indicator(x < y))
    }

    pub fn less_than_eq<'a>(&mut self, val: impl Into<Operand<'a>>, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_binary(val.into(), target, |x, y| indicator(x <= y))
    }

    pub fn greater_than<'a>(&mut self, val: impl Into<Operand<'a>>, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_binary(val.into(), target, |x, y| indicator(x > y))
    }

    pub fn greater_than_eq<'a>(&mut self, val: impl Into<Operand<'a>>, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_binary(val.into(), target, |x, y| indicator(x >= y))
    }

    /// `min(self, val)`.
    pub fn upper_bound<'a>(&mut self, val: impl Into<Operand<'a>>, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_binary(val.into(), target, |x, y| if x > y { y } else { x })
    }

    /// `max(self, val)`.
    pub fn lower_bound<'a>(&mut self, val: impl Into<Operand<'a>>, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_binary(val.into(), target, |x, y| if x < y { y } else { x })
    }

    /// Clamps magnitudes: `|x| > val ? sign(x) * val : x`. A matrix bound
    /// behaves like [`upper_bound`](Self::upper_bound).
    pub fn upper_bound_mod<'a>(&mut self, val: impl Into<Operand<'a>>, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        match val.into() {
            Operand::Scalar(bound) => self.apply_unary(target, move |x| {
                if x.abs() > bound {
                    sign(x) * bound
                } else {
                    x
                }
            }),
            matrix => self.upper_bound(matrix, target),
        }
    }

    /// `-self * ln(p + tiny)`.
    pub fn cross_entropy(&mut self, p: &DenseMatrix, tiny: f32, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_binary(Operand::Matrix(p), target, |t, p| -t * (p + tiny).ln())
    }

    /// `-self * ln(p + tiny) - (1 - self) * ln(1 - p + tiny)`.
    pub fn cross_entropy_bernoulli(
        &mut self,
        p: &DenseMatrix,
        tiny: f32,
        target: Option<&mut DenseMatrix>,
    ) -> MatResult<()> {
        self.apply_binary(Operand::Matrix(p), target, |t, p| {
            -t * (p + tiny).ln() - (1.0 - t) * (1.0 - p + tiny).ln()
        })
    }

    /// `self * (p >= cutoff) + (1 - self) * (p < cutoff)`.
    pub fn correct_preds(&mut self, p: &DenseMatrix, cutoff: f32, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.apply_binary(Operand::Matrix(p), target, |t, p| {
            t * indicator(p >= cutoff) + (1.0 - t) * indicator(p < cutoff)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softplus_forms_agree_in_range() {
        for &x in &[-5.0f32, -0.5, 0.0, 0.5, 5.0] {
            assert!((softplus_exact(x) - softplus_fast(x)).abs() < 1e-5);
        }
        assert_eq!(softplus_fast(50.0), 50.0);
        assert!((softplus_exact(100.0) - 100.0).abs() < 1e-4);
    }

    #[test]
    fn sign_of_zero_is_zero() {
        assert_eq!(sign(0.0), 0.0);
        assert_eq!(sign(-3.0), -1.0);
        assert_eq!(sign(f32::NAN), 0.0);
    }
}
