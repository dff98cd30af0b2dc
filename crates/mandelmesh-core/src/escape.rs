//! Escape-time evaluation for a single point of the complex plane.
//!
//! The recurrence is $z_{n+1} = z_n^2 + c$ with $z_0 = c$. A point escapes at
//! the first $n$ with $|z_n|^2 > 4$; points that survive `maxiter` checks
//! report `maxiter`, so every result lies in `[0, maxiter]`.

use num_complex::{Complex32, Complex64};

use crate::types::Precision;

/// Squared escape radius.
pub const ESCAPE_RADIUS_SQR: f64 = 4.0;

/// Escape iteration count of `creal + i*cimag` in double precision.
///
/// The magnitude test uses the squared norm, so no square root is taken and
/// intermediate values are checked before they can grow past the radius.
pub fn escape_time(creal: f64, cimag: f64, maxiter: u32) -> u32 {
    let mut real = creal;
    let mut imag = cimag;
    for n in 0..maxiter {
        let real2 = real * real;
        let imag2 = imag * imag;
        if real2 + imag2 > ESCAPE_RADIUS_SQR {
            return n;
        }
        imag = 2.0 * real * imag + cimag;
        real = real2 - imag2 + creal;
    }
    maxiter
}

/// [`escape_time`] for a `Complex64`.
pub fn escape_time_c(c: Complex64, maxiter: u32) -> u32 {
    escape_time(c.re, c.im, maxiter)
}

/// Single-precision variant.
///
/// Starts from $z = 0$ and tests after each update, which visits the same
/// sequence of iterates as [`escape_time`] and yields the same count up to
/// rounding.
pub fn escape_time_single(c: Complex32, maxiter: u32) -> u32 {
    let mut z = Complex32::new(0.0, 0.0);
    for n in 0..maxiter {
        z = z * z + c;
        if z.norm_sqr() > ESCAPE_RADIUS_SQR as f32 {
            return n;
        }
    }
    maxiter
}

/// Evaluate with the requested precision.
pub fn escape_time_with(precision: Precision, creal: f64, cimag: f64, maxiter: u32) -> u32 {
    match precision {
        Precision::Double => escape_time(creal, cimag, maxiter),
        Precision::Single => {
            escape_time_single(Complex32::new(creal as f32, cimag as f32), maxiter)
        }
    }
}
