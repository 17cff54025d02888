//! Post-Newtonian expansions of flux, binding energy and mass loss.
//!
//! The engine consumes these only through [`PnExpansions`], so any
//! literature table can be plugged in. Every series is *normalized* by its
//! Newtonian leading term and expanded in the velocity parameter `v`:
//!
//! ```text
//! E   = -½ M ν v²          · Ê(v)
//! E′  = dE/dv = -M ν v      · Ê′(v)
//! F   = (32/5) ν² v¹⁰       · F̂(v)
//! Ṁₐ  = (32/5) ν² v¹⁰       · Ṁ̂ₐ(v)
//! ```
//!
//! [`ReferenceExpansions`] carries the standard non-spinning terms (energy
//! to 3PN, flux to 3.5PN), spin-orbit terms at 1.5PN and 2.5PN, the leading
//! adiabatic tidal terms at 5PN, and leading-order horizon absorption.

use nalgebra::Vector3;
use num_rational::Rational64;

use crate::real::{lit, Real};
use crate::series::{TruncatedSeries, PN_VELOCITY};
use crate::state::BinaryState;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Provider of normalized PN series for a given state.
pub trait PnExpansions<T: Real> {
    /// Normalized gravitational-wave flux `F̂(v)`.
    fn flux(&self, state: &BinaryState<T>, max_power: Option<Rational64>) -> TruncatedSeries<T>;

    /// Normalized binding energy `Ê(v)`.
    fn binding_energy(
        &self,
        state: &BinaryState<T>,
        max_power: Option<Rational64>,
    ) -> TruncatedSeries<T>;

    /// Normalized energy derivative `Ê′(v)`.
    fn energy_derivative(
        &self,
        state: &BinaryState<T>,
        max_power: Option<Rational64>,
    ) -> TruncatedSeries<T>;

    /// Normalized mass-loss rate `Ṁ̂` of `body` (1 or 2).
    fn mass_loss(
        &self,
        state: &BinaryState<T>,
        body: u8,
        max_power: Option<Rational64>,
    ) -> TruncatedSeries<T>;

    /// Spin precession angular velocities `(Ω⃗₁, Ω⃗₂)`, with `χ̇⃗ₐ = Ω⃗ₐ × χ⃗ₐ`.
    fn spin_precession(&self, state: &BinaryState<T>) -> (Vector3<T>, Vector3<T>);
}

/// Standard literature coefficients (Blanchet 2014; Vines, Flanagan &
/// Hinderer 2011; Alvi 2001; Kidder 1995).
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceExpansions;

/// Mass fractions and spin combinations shared by every series.
struct Couplings<T> {
    nu: T,
    delta: T,
    x1: T,
    x2: T,
    /// `S_ℓ / M²`
    s_ell: T,
    /// `Σ_ℓ / M²`
    sigma_ell: T,
}

impl<T: Real> Couplings<T> {
    fn of(state: &BinaryState<T>) -> Self {
        let m = state.total_mass();
        let x1 = state.m1() / m;
        let x2 = state.m2() / m;
        let (chi1_ell, chi2_ell) = (state.chi1_ell(), state.chi2_ell());
        Self {
            nu: x1 * x2,
            delta: x1 - x2,
            x1,
            x2,
            s_ell: x1 * x1 * chi1_ell + x2 * x2 * chi2_ell,
            sigma_ell: x2 * chi2_ell - x1 * chi1_ell,
        }
    }
}

fn pow(n: i64) -> Rational64 {
    Rational64::from_integer(n)
}

impl ReferenceExpansions {
    /// Energy coefficients as `(power, coefficient)` pairs; no logarithms
    /// appear through 3PN.
    fn energy_terms<T: Real>(state: &BinaryState<T>) -> Vec<(i64, T)> {
        let c = Couplings::of(state);
        let (nu, delta) = (c.nu, c.delta);
        let nu2 = nu * nu;
        let pi2 = T::pi() * T::pi();

        let mut terms = vec![
            (0, T::one()),
            (2, -lit::<T>(0.75) - nu / lit(12.0)),
            (
                3,
                lit::<T>(14.0 / 3.0) * c.s_ell + lit::<T>(2.0) * delta * c.sigma_ell,
            ),
            (
                4,
                -lit::<T>(27.0 / 8.0) + lit::<T>(19.0 / 8.0) * nu - nu2 / lit(24.0),
            ),
            (
                5,
                (lit::<T>(11.0) - lit::<T>(61.0 / 9.0) * nu) * c.s_ell
                    + delta * (lit::<T>(3.0) - lit::<T>(10.0 / 3.0) * nu) * c.sigma_ell,
            ),
            (
                6,
                -lit::<T>(675.0 / 64.0)
                    + (lit::<T>(34445.0 / 576.0) - lit::<T>(205.0 / 96.0) * pi2) * nu
                    - lit::<T>(155.0 / 96.0) * nu2
                    - lit::<T>(35.0 / 5184.0) * nu2 * nu,
            ),
        ];
        if state.has_tidal() {
            let (x1, x2) = (c.x1, c.x2);
            let tidal = -lit::<T>(9.0)
                * (x2 * x1.powi(4) * state.lambda1() + x1 * x2.powi(4) * state.lambda2());
            terms.push((10, tidal));
        }
        terms
    }
}

impl<T: Real> PnExpansions<T> for ReferenceExpansions {
    fn flux(&self, state: &BinaryState<T>, max_power: Option<Rational64>) -> TruncatedSeries<T> {
        let c = Couplings::of(state);
        let (nu, delta) = (c.nu, c.delta);
        let nu2 = nu * nu;
        let pi = T::pi();

        let mut terms = vec![
            (T::one(), pow(0), 0),
            (-lit::<T>(1247.0 / 336.0) - lit::<T>(35.0 / 12.0) * nu, pow(2), 0),
            (
                lit::<T>(4.0) * pi - lit::<T>(4.0) * c.s_ell - lit::<T>(1.25) * delta * c.sigma_ell,
                pow(3),
                0,
            ),
            (
                -lit::<T>(44711.0 / 9072.0) + lit::<T>(9271.0 / 504.0) * nu + lit::<T>(65.0 / 18.0) * nu2,
                pow(4),
                0,
            ),
            (
                (-lit::<T>(8191.0 / 672.0) - lit::<T>(583.0 / 24.0) * nu) * pi
                    + (-lit::<T>(4.5) + lit::<T>(272.0 / 9.0) * nu) * c.s_ell
                    + (-lit::<T>(13.0 / 16.0) + lit::<T>(43.0 / 4.0) * nu) * delta * c.sigma_ell,
                pow(5),
                0,
            ),
            (
                lit::<T>(6_643_739_519.0 / 69_854_400.0) + lit::<T>(16.0 / 3.0) * pi * pi
                    - lit::<T>(1712.0 / 105.0 * EULER_GAMMA)
                    - lit::<T>(856.0 / 105.0 * 16f64.ln())
                    + (-lit::<T>(134_543.0 / 7776.0) + lit::<T>(41.0 / 48.0) * pi * pi) * nu
                    - lit::<T>(94403.0 / 3024.0) * nu2
                    - lit::<T>(775.0 / 324.0) * nu2 * nu,
                pow(6),
                0,
            ),
            (-lit::<T>(1712.0 / 105.0), pow(6), 1),
            (
                (-lit::<T>(16285.0 / 504.0) + lit::<T>(214_745.0 / 1728.0) * nu
                    + lit::<T>(193_385.0 / 3024.0) * nu2)
                    * pi,
                pow(7),
                0,
            ),
        ];
        if state.has_tidal() {
            let (x1, x2) = (c.x1, c.x2);
            let tidal = (lit::<T>(18.0) - lit::<T>(12.0) * x1) * x1.powi(4) * state.lambda1()
                + (lit::<T>(18.0) - lit::<T>(12.0) * x2) * x2.powi(4) * state.lambda2();
            terms.push((tidal, pow(10), 0));
        }
        TruncatedSeries::new(PN_VELOCITY, max_power, terms)
    }

    fn binding_energy(
        &self,
        state: &BinaryState<T>,
        max_power: Option<Rational64>,
    ) -> TruncatedSeries<T> {
        let terms = Self::energy_terms(state)
            .into_iter()
            .map(|(k, c)| (c, pow(k), 0));
        TruncatedSeries::new(PN_VELOCITY, max_power, terms)
    }

    fn energy_derivative(
        &self,
        state: &BinaryState<T>,
        max_power: Option<Rational64>,
    ) -> TruncatedSeries<T> {
        // d/dv (v² vᵏ) = (k + 2) v^(k+1), so each coefficient gains (k + 2)/2.
        let terms = Self::energy_terms(state)
            .into_iter()
            .map(|(k, c)| (c * lit::<T>((k + 2) as f64 / 2.0), pow(k), 0));
        TruncatedSeries::new(PN_VELOCITY, max_power, terms)
    }

    fn mass_loss(
        &self,
        state: &BinaryState<T>,
        body: u8,
        max_power: Option<Rational64>,
    ) -> TruncatedSeries<T> {
        let m = state.total_mass();
        let (x, chi) = if body == 1 {
            (state.m1() / m, state.chi1())
        } else {
            (state.m2() / m, state.chi2())
        };
        let chi_ell = chi.dot(&state.ell_hat());
        let coeff = -lit::<T>(0.25)
            * x.powi(3)
            * (T::one() + lit::<T>(3.0) * chi.norm_squared())
            * chi_ell;
        TruncatedSeries::new(PN_VELOCITY, max_power, [(coeff, pow(5), 0)])
    }

    fn spin_precession(&self, state: &BinaryState<T>) -> (Vector3<T>, Vector3<T>) {
        let m = state.total_mass();
        let v = state.v();
        let ell = state.ell_hat();
        let c = Couplings::of(state);

        let so = v.powi(5) / m;
        let base = lit::<T>(0.75) + c.nu / lit(2.0);
        let omega1_so = ell * (so * (base - lit::<T>(0.75) * c.delta));
        let omega2_so = ell * (so * (base + lit::<T>(0.75) * c.delta));

        // Spin-spin coupling: each spin precesses about the other's
        // quadrupole-like field.
        let ss = v.powi(6) / m / lit(2.0);
        let (chi1, chi2) = (state.chi1(), state.chi2());
        let omega1_ss = (chi2 - ell * (lit::<T>(3.0) * chi2.dot(&ell))) * (ss * c.x2 * c.x2);
        let omega2_ss = (chi1 - ell * (lit::<T>(3.0) * chi1.dot(&ell))) * (ss * c.x1 * c.x1);

        (omega1_so + omega1_ss, omega2_so + omega2_ss)
    }
}
