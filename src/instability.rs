//! Up-down precession instability forecast.
//!
//! A binary whose heavier body spins along `ℓ̂` ("up") while the lighter one
//! spins against it ("down") is unstable to the growth of precession between
//! two orbital separations (Gerosa, Kesden, O'Shaughnessy et al. 2015):
//!
//! ```text
//! r± = M (√χ_h ± √(q χ_l))⁴ / (1 - q)²
//! ```
//!
//! where `q ≤ 1` is the mass ratio, `χ_h > 0` the heavier body's aligned spin
//! and `χ_l` the magnitude of the lighter body's anti-aligned spin. With the
//! Newtonian relation `r = M/v²` the window in the PN velocity parameter is
//! `v∓ = (1 - q) / (√χ_h ± √(q χ_l))²`.

use crate::real::Real;
use crate::state::{frequency_from_velocity, BinaryState};

/// Velocity window `[v_lower, v_upper]` of the up-down instability.
///
/// Both ends lie in `[0, 1]`. Stable configurations have
/// `v_lower == v_upper`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpDownWindow<T> {
    /// Onset of the instability (outer separation)
    pub v_lower: T,
    /// End of the window (inner separation), clamped to 1
    pub v_upper: T,
}

impl<T: Real> UpDownWindow<T> {
    /// The window reported for stable configurations.
    pub fn stable() -> Self {
        Self {
            v_lower: T::zero(),
            v_upper: T::zero(),
        }
    }

    /// Whether the window has positive width.
    pub fn is_unstable(&self) -> bool {
        self.v_lower < self.v_upper
    }

    /// Whether `v` lies inside the window.
    pub fn contains(&self, v: T) -> bool {
        self.is_unstable() && v >= self.v_lower && v <= self.v_upper
    }

    /// Whether the window overlaps the velocity range `[v_a, v_b]`.
    pub fn overlaps(&self, v_a: T, v_b: T) -> bool {
        let (lo, hi) = if v_a <= v_b { (v_a, v_b) } else { (v_b, v_a) };
        self.is_unstable() && self.v_lower <= hi && self.v_upper >= lo
    }

    /// The window as orbital angular frequencies `Ω = v³/M`.
    pub fn frequencies(&self, total_mass: T) -> (T, T) {
        (
            frequency_from_velocity(total_mass, self.v_lower),
            frequency_from_velocity(total_mass, self.v_upper),
        )
    }
}

/// Forecast the up-down instability window of `state`.
///
/// Spin components are taken along the current `ℓ̂`.
pub fn up_down_window<T: Real>(state: &BinaryState<T>) -> UpDownWindow<T> {
    let (m1, m2) = (state.m1(), state.m2());
    let (chi1, chi2) = (state.chi1_ell(), state.chi2_ell());
    let (q, chi_heavy, chi_light) = if m1 >= m2 {
        (m2 / m1, chi1, chi2)
    } else {
        (m1 / m2, chi2, chi1)
    };

    if !(chi_heavy > T::zero() && chi_light < T::zero()) {
        return UpDownWindow::stable();
    }

    let gap = T::one() - q;
    // Equal masses have no window
    if gap <= T::zero() {
        return UpDownWindow::stable();
    }

    let a = chi_heavy.sqrt();
    let b = (q * chi_light.abs()).sqrt();

    let plus = (a + b) * (a + b);
    let minus = (a - b) * (a - b);
    let v_lower = gap / plus;
    let v_upper = if minus > T::zero() { gap / minus } else { T::one() };

    let clamp = |v: T| v.clamp(T::zero(), T::one());
    UpDownWindow {
        v_lower: clamp(v_lower),
        v_upper: clamp(v_upper),
    }
}
