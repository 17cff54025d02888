//! Zero-crossing events and Brent root finding.
//!
//! A continuous stop condition is a scalar function `g(t, y)` monitored
//! after every accepted step. When `g` changes sign across a step, Brent's
//! method locates the crossing inside the step.

use thiserror::Error;

use crate::real::{lit, to_f64, Real};

/// Event function trait
///
/// The integrator stops where this function crosses zero. Any closure
/// `Fn(T, &[T; N]) -> T` is an event function.
///
/// # Example
///
/// ```ignore
/// // Stop when the orbital phase reaches 100 radians
/// let phase_limit = |_t: f64, y: &[f64; STATE_LEN]| 100.0 - y[index::PHASE];
/// ```
pub trait EventFunction<T: Real, const N: usize> {
    /// Evaluate the event function at time `t` and state `y`.
    fn eval(&self, t: T, y: &[T; N]) -> T;
}

impl<T, F, const N: usize> EventFunction<T, N> for F
where
    T: Real,
    F: Fn(T, &[T; N]) -> T,
{
    fn eval(&self, t: T, y: &[T; N]) -> T {
        self(t, y)
    }
}

/// Direction of zero-crossing to detect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventDirection {
    /// Detect when g goes from negative to positive (increasing through zero)
    Rising,
    /// Detect when g goes from positive to negative (decreasing through zero)
    Falling,
    /// Detect any zero crossing
    #[default]
    Any,
}

/// Root-finding configuration for one event
#[derive(Debug, Clone, Copy)]
pub struct EventConfig<T> {
    /// Which direction of zero-crossing to detect
    pub direction: EventDirection,
    /// Absolute time tolerance for root finding; never tighter than a few
    /// ulps of the crossing time
    pub root_tol: T,
    /// Maximum iterations for root finding (default: 50)
    pub max_iter: usize,
    /// Count a departure from an exact zero in `direction` as a crossing
    /// (default: false). For bounds a state may start on.
    pub departure_counts: bool,
}

impl<T: Real> EventConfig<T> {
    /// Whether `g` crossed zero between two successive checks.
    pub fn crossed(&self, g_old: T, g_new: T) -> bool {
        if self.departure_counts && g_old == T::zero() {
            return match self.direction {
                EventDirection::Rising => g_new > T::zero(),
                EventDirection::Falling => g_new < T::zero(),
                EventDirection::Any => g_new != T::zero(),
            };
        }
        sign_change_detected(g_old, g_new, self.direction)
    }
}

impl<T: Real> Default for EventConfig<T> {
    fn default() -> Self {
        Self {
            direction: EventDirection::Any,
            root_tol: lit(1e-12),
            max_iter: 50,
            departure_counts: false,
        }
    }
}

/// Result of event detection
#[derive(Debug, Clone)]
pub struct EventResult<T, const N: usize> {
    /// Time at which the event occurred
    pub t: T,
    /// State at the event
    pub y: [T; N],
    /// Value of the event function at the event (should be ~0)
    pub g_value: T,
    /// Number of root-finding iterations used
    pub iterations: usize,
}

/// Brent's method for root finding
///
/// Combines bisection, the secant method and inverse quadratic
/// interpolation.
///
/// Reference: Brent, R.P. (1973). "Algorithms for Minimization without
/// Derivatives". Prentice-Hall.
pub struct BrentSolver<T> {
    /// Tolerance for convergence
    pub tol: T,
    /// Maximum iterations
    pub max_iter: usize,
}

impl<T: Real> Default for BrentSolver<T> {
    fn default() -> Self {
        Self {
            tol: lit(1e-12),
            max_iter: 50,
        }
    }
}

impl<T: Real> BrentSolver<T> {
    /// Create a new Brent solver with specified tolerance
    pub fn new(tol: T, max_iter: usize) -> Self {
        Self { tol, max_iter }
    }

    /// Find the root of f in the bracket `[a, b]`.
    ///
    /// `fa` and `fb` are computed when not supplied.
    ///
    /// # Returns
    /// * `Ok((root, f_root, iterations))`
    /// * `Err(BrentError)` if the root is not bracketed or does not converge
    pub fn find_root<F>(
        &self,
        mut f: F,
        mut a: T,
        mut b: T,
        fa: Option<T>,
        fb: Option<T>,
    ) -> Result<(T, T, usize), BrentError>
    where
        F: FnMut(T) -> T,
    {
        let mut fa = fa.unwrap_or_else(|| f(a));
        let mut fb = fb.unwrap_or_else(|| f(b));
        let two = lit::<T>(2.0);

        if fa * fb > T::zero() {
            return Err(BrentError::NotBracketed {
                a: to_f64(a),
                b: to_f64(b),
                fa: to_f64(fa),
                fb: to_f64(fb),
            });
        }

        if fa.abs() < fb.abs() {
            std::mem::swap(&mut a, &mut b);
            std::mem::swap(&mut fa, &mut fb);
        }

        let mut c = a;
        let mut fc = fa;
        let mut mflag = true;
        let mut d = b - a;

        for iter in 0..self.max_iter {
            if fa.abs() < fb.abs() {
                std::mem::swap(&mut a, &mut b);
                std::mem::swap(&mut fa, &mut fb);
            }

            if fb == T::zero() || (b - a).abs() <= self.tol {
                return Ok((b, fb, iter + 1));
            }

            let s = if fa != fc && fb != fc && fa != fb {
                // Inverse quadratic interpolation
                a * fb * fc / ((fa - fb) * (fa - fc))
                    + b * fa * fc / ((fb - fa) * (fb - fc))
                    + c * fa * fb / ((fc - fa) * (fc - fb))
            } else if fb != fa {
                // Secant
                b - fb * (b - a) / (fb - fa)
            } else {
                (a + b) / two
            };

            let mid = (a + b) / two;
            let quarter = (lit::<T>(3.0) * a + b) / lit(4.0);
            let use_bisection = (s - quarter) * (s - b) > T::zero()
                || (mflag && (s - b).abs() >= (b - c).abs() / two)
                || (!mflag && (s - b).abs() >= (c - d).abs() / two)
                || (mflag && (b - c).abs() < self.tol)
                || (!mflag && (c - d).abs() < self.tol);

            let s = if use_bisection {
                mflag = true;
                mid
            } else {
                mflag = false;
                s
            };

            let fs = f(s);
            d = c;
            c = b;
            fc = fb;

            if fa * fs < T::zero() {
                b = s;
                fb = fs;
            } else {
                a = s;
                fa = fs;
            }
        }

        Err(BrentError::MaxIterations {
            current_best: to_f64(b),
            f_value: to_f64(fb),
            iterations: self.max_iter,
        })
    }
}

/// Errors from Brent's method
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BrentError {
    /// The root is not bracketed by the given interval
    #[error("root not bracketed: f({a}) = {fa}, f({b}) = {fb} (same sign)")]
    NotBracketed {
        /// Left endpoint
        a: f64,
        /// Right endpoint
        b: f64,
        /// Function value at left endpoint
        fa: f64,
        /// Function value at right endpoint
        fb: f64,
    },
    /// Maximum iterations reached without convergence
    #[error("max iterations ({iterations}) reached, best estimate: {current_best}, f = {f_value}")]
    MaxIterations {
        /// Best root estimate so far
        current_best: f64,
        /// Function value at best estimate
        f_value: f64,
        /// Number of iterations performed
        iterations: usize,
    },
}

/// Check if a sign change occurred in the specified direction
pub fn sign_change_detected<T: Real>(g_old: T, g_new: T, direction: EventDirection) -> bool {
    if g_old * g_new > T::zero() {
        return false;
    }

    if g_new == T::zero() {
        // Landing exactly on zero counts as a crossing
        return true;
    }

    if g_old == T::zero() {
        // Leaving zero is not a new crossing
        return false;
    }

    match direction {
        EventDirection::Rising => g_old < T::zero() && g_new > T::zero(),
        EventDirection::Falling => g_old > T::zero() && g_new < T::zero(),
        EventDirection::Any => true,
    }
}
