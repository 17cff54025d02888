//! Numeric precision abstraction.
//!
//! Everything in the engine is generic over a floating-point type `T: Real`.
//! `f64` is the normal choice; `f32` works for quick surveys.

use nalgebra::RealField;

/// Floating-point scalar usable by the engine.
///
/// Blanket-implemented for every `RealField + Copy` type.
pub trait Real: RealField + Copy {}

impl<T: RealField + Copy> Real for T {}

/// Convert an `f64` literal into `T`.
#[inline]
pub(crate) fn lit<T: Real>(x: f64) -> T {
    nalgebra::convert::<f64, T>(x)
}

/// Machine epsilon of `T`.
#[inline]
pub(crate) fn eps<T: Real>() -> T {
    T::default_epsilon()
}

/// Lossy conversion to `f64` for diagnostics and error payloads.
#[inline]
pub(crate) fn to_f64<T: Real>(x: T) -> f64 {
    nalgebra::try_convert::<T, f64>(x).unwrap_or(f64::NAN)
}

/// NaN is the only value not ordered against itself.
#[inline]
pub(crate) fn is_nan<T: Real>(x: T) -> bool {
    x.partial_cmp(&x).is_none()
}

/// Default absolute/relative tolerance: `eps^(11/16)`.
pub fn default_tolerance<T: Real>() -> T {
    eps::<T>().powf(lit(11.0 / 16.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tolerance_f64() {
        let tol: f64 = default_tolerance();
        let expected = f64::EPSILON.powf(11.0 / 16.0);
        assert!((tol - expected).abs() < 1e-20);
        assert!(tol > 1e-12 && tol < 1e-10, "tolerance {} out of range", tol);
    }

    #[test]
    fn test_is_nan() {
        assert!(is_nan(f64::NAN));
        assert!(!is_nan(f64::INFINITY));
        assert!(!is_nan(0.0_f32));
    }

    #[test]
    fn test_default_tolerance_f32() {
        let tol: f32 = default_tolerance();
        assert!(tol > 1e-6 && tol < 1e-4, "tolerance {} out of range", tol);
    }
}
