//! Numeric scalar abstraction shared by real and complex-step evaluation.
//!
//! Expression components evaluate the same tree either on `f64` or on
//! `Complex<f64>`; the latter yields derivatives by the complex-step method.

use core::fmt::Debug;
use core::ops::{Add, Div, Mul, Neg, Sub};

use nalgebra::Complex;

/// Complex number used for complex-step differentiation.
pub type C64 = Complex<f64>;

pub trait Scalar:
    Copy
    + Debug
    + PartialEq
    + Send
    + Sync
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
{
    fn from_f64(v: f64) -> Self;
    /// Real part.
    fn re(self) -> f64;
    /// Imaginary part (zero for reals).
    fn im(self) -> f64;

    fn sin(self) -> Self;
    fn cos(self) -> Self;
    fn tan(self) -> Self;
    fn exp(self) -> Self;
    fn ln(self) -> Self;
    fn sqrt(self) -> Self;
    fn tanh(self) -> Self;
    fn powi(self, n: i32) -> Self;
    fn powf(self, e: f64) -> Self;
    fn pow(self, e: Self) -> Self;
    /// Absolute value that keeps the complex-step derivative (sign of the real part).
    fn abs_cs(self) -> Self;
}

impl Scalar for f64 {
    fn from_f64(v: f64) -> Self {
        v
    }
    fn re(self) -> f64 {
        self
    }
    fn im(self) -> f64 {
        0.0
    }
    fn sin(self) -> Self {
        f64::sin(self)
    }
    fn cos(self) -> Self {
        f64::cos(self)
    }
    fn tan(self) -> Self {
        f64::tan(self)
    }
    fn exp(self) -> Self {
        f64::exp(self)
    }
    fn ln(self) -> Self {
        f64::ln(self)
    }
    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }
    fn tanh(self) -> Self {
        f64::tanh(self)
    }
    fn powi(self, n: i32) -> Self {
        f64::powi(self, n)
    }
    fn powf(self, e: f64) -> Self {
        f64::powf(self, e)
    }
    fn pow(self, e: Self) -> Self {
        f64::powf(self, e)
    }
    fn abs_cs(self) -> Self {
        f64::abs(self)
    }
}

impl Scalar for C64 {
    fn from_f64(v: f64) -> Self {
        Complex::new(v, 0.0)
    }
    fn re(self) -> f64 {
        self.re
    }
    fn im(self) -> f64 {
        self.im
    }
    fn sin(self) -> Self {
        Complex::sin(self)
    }
    fn cos(self) -> Self {
        Complex::cos(self)
    }
    fn tan(self) -> Self {
        Complex::tan(self)
    }
    fn exp(self) -> Self {
        Complex::exp(self)
    }
    fn ln(self) -> Self {
        Complex::ln(self)
    }
    fn sqrt(self) -> Self {
        Complex::sqrt(self)
    }
    fn tanh(self) -> Self {
        Complex::tanh(self)
    }
    fn powi(self, n: i32) -> Self {
        Complex::powi(&self, n)
    }
    fn powf(self, e: f64) -> Self {
        // z^e = e^{e ln z}; for a real base with an infinitesimal imaginary
        // part use the first-order expansion to stay exact for negative bases.
        if self.re != 0.0 && self.im.abs() <= 1e-20 * self.re.abs() {
            let re = self.re.powf(e);
            Complex::new(re, e * self.re.powf(e - 1.0) * self.im)
        } else {
            Complex::powf(self, e)
        }
    }
    fn pow(self, e: Self) -> Self {
        if e.im == 0.0 {
            return Scalar::powf(self, e.re);
        }
        Complex::powc(self, e)
    }
    fn abs_cs(self) -> Self {
        if self.re < 0.0 { -self } else { self }
    }
}
