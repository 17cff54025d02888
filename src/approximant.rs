//! Time-domain Taylor approximants and the evolution equations.
//!
//! Every approximant solves the same energy balance
//!
//! ```text
//! dv/dt = -(F + Ṁ₁ + Ṁ₂) / E′ = (32/5) (ν v⁹ / M) · N̂(v) / Ê′(v)
//! ```
//!
//! with `N̂ = F̂ + Ṁ̂₁ + Ṁ̂₂`, and differs only in how the ratio of truncated
//! series is formed:
//!
//! - [`Approximant::TaylorT1`] divides the two series at their natural
//!   order, the smaller of their highest powers.
//! - [`Approximant::TaylorT4`] re-expands `N̂/Ê′` as one series at the
//!   state's truncation order.
//! - [`Approximant::TaylorT5`] re-expands `Ê′/N̂` (that is, `dt/dv`) at the
//!   state's truncation order and inverts the value numerically.
//!
//! Precession and phase rates do not depend on the approximant.

use std::fmt;

use nalgebra::{Quaternion, Vector3};
use num_rational::Rational64;

use crate::error::{DomainError, ExpansionFault};
use crate::expansions::PnExpansions;
use crate::real::{lit, Real};
use crate::series::TruncatedSeries;
use crate::solver::OdeSystem;
use crate::state::{domain_check, index, BinaryState, STATE_LEN};

/// Policy for turning the flux and energy series into `dv/dt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Approximant {
    /// Ratio of the two series at their natural order
    #[default]
    TaylorT1,
    /// `dv/dt` re-expanded at the state's order
    TaylorT4,
    /// `dt/dv` re-expanded at the state's order, inverted numerically
    TaylorT5,
}

impl Approximant {
    /// Every approximant, in declaration order.
    pub const ALL: [Approximant; 3] = [
        Approximant::TaylorT1,
        Approximant::TaylorT4,
        Approximant::TaylorT5,
    ];

    /// Conventional name.
    pub fn name(&self) -> &'static str {
        match self {
            Approximant::TaylorT1 => "TaylorT1",
            Approximant::TaylorT4 => "TaylorT4",
            Approximant::TaylorT5 => "TaylorT5",
        }
    }

    /// The normalized rate `N̂/Ê′` at the state's velocity, before the
    /// Newtonian prefactor is applied.
    pub fn normalized_rate<T, E>(&self, expansions: &E, state: &BinaryState<T>) -> Result<T, DomainError>
    where
        T: Real,
        E: PnExpansions<T> + ?Sized,
    {
        let order = state.order().max_power();
        let numerator = balance_numerator(expansions, state, order)?;
        let denominator = expansions.energy_derivative(state, order);
        let v = state.v();

        let value = match self {
            Approximant::TaylorT1 => {
                let natural = min_option(numerator.highest_power(), denominator.highest_power());
                numerator
                    .truncate(natural)
                    .div(&denominator.truncate(natural))?
                    .evaluate(v)
            }
            Approximant::TaylorT4 => {
                let limit = re_expansion_limit(order, &numerator, &denominator);
                numerator
                    .truncate(limit)
                    .div(&denominator.truncate(limit))?
                    .evaluate(v)
            }
            Approximant::TaylorT5 => {
                let limit = re_expansion_limit(order, &numerator, &denominator);
                let inverse = denominator
                    .truncate(limit)
                    .div(&numerator.truncate(limit))?
                    .evaluate(v);
                if inverse == T::zero() {
                    return Err(DomainError::ExpansionBreakdown(
                        ExpansionFault::VanishingDenominator,
                    ));
                }
                T::one() / inverse
            }
        };

        if !value.is_finite() {
            return Err(DomainError::ExpansionBreakdown(
                ExpansionFault::VanishingDenominator,
            ));
        }
        Ok(value)
    }

    /// `dv/dt` for this approximant.
    pub fn velocity_rate<T, E>(&self, expansions: &E, state: &BinaryState<T>) -> Result<T, DomainError>
    where
        T: Real,
        E: PnExpansions<T> + ?Sized,
    {
        let v = state.v();
        let prefactor = lit::<T>(32.0 / 5.0) * state.nu() * v.powi(9) / state.total_mass();
        Ok(prefactor * self.normalized_rate(expansions, state)?)
    }
}

impl fmt::Display for Approximant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `N̂ = F̂ + Ṁ̂₁ + Ṁ̂₂`.
fn balance_numerator<T, E>(
    expansions: &E,
    state: &BinaryState<T>,
    order: Option<Rational64>,
) -> Result<TruncatedSeries<T>, DomainError>
where
    T: Real,
    E: PnExpansions<T> + ?Sized,
{
    let sum = expansions
        .flux(state, order)
        .add(&expansions.mass_loss(state, 1, order))?
        .add(&expansions.mass_loss(state, 2, order))?;
    Ok(sum)
}

/// The state's order, or every term present in either series if unbounded.
fn re_expansion_limit<T: Real>(
    order: Option<Rational64>,
    numerator: &TruncatedSeries<T>,
    denominator: &TruncatedSeries<T>,
) -> Option<Rational64> {
    order.or_else(|| match (numerator.highest_power(), denominator.highest_power()) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    })
}

fn min_option(a: Option<Rational64>, b: Option<Rational64>) -> Option<Rational64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// The full evolution system for one binary.
///
/// Holds a template state carrying everything that is not in the vector
/// (truncation order, tidal flag); the integrator owns the vector itself.
pub struct PnSystem<'a, T: Real, E: ?Sized> {
    template: BinaryState<T>,
    expansions: &'a E,
    approximant: Approximant,
}

impl<'a, T: Real, E: PnExpansions<T> + ?Sized> PnSystem<'a, T, E> {
    /// Build the system for the binary described by `template`.
    pub fn new(template: BinaryState<T>, expansions: &'a E, approximant: Approximant) -> Self {
        Self {
            template,
            expansions,
            approximant,
        }
    }

    /// The approximant in use.
    pub fn approximant(&self) -> Approximant {
        self.approximant
    }

    /// Time derivative of a full state.
    pub fn derivative(&self, state: &BinaryState<T>) -> Result<[T; STATE_LEN], DomainError> {
        let mut dydt = [T::zero(); STATE_LEN];
        self.rhs(T::zero(), state.as_array(), &mut dydt)?;
        Ok(dydt)
    }
}

impl<T: Real, E: PnExpansions<T> + ?Sized> OdeSystem<T, STATE_LEN> for PnSystem<'_, T, E> {
    fn rhs(&self, _t: T, y: &[T; STATE_LEN], dydt: &mut [T; STATE_LEN]) -> Result<(), DomainError> {
        domain_check(y)?;
        let state = self.template.with_vector(*y);
        let order = state.order().max_power();

        let m = state.total_mass();
        let nu = state.nu();
        let v = state.v();
        let v3 = v * v * v;
        let flux_scale = lit::<T>(32.0 / 5.0) * nu * nu * v.powi(10);

        let v_dot = self.approximant.velocity_rate(self.expansions, &state)?;
        let m1_dot = flux_scale * self.expansions.mass_loss(&state, 1, order).evaluate(v);
        let m2_dot = flux_scale * self.expansions.mass_loss(&state, 2, order).evaluate(v);

        let (omega1, omega2) = self.expansions.spin_precession(&state);
        let (chi1, chi2) = (state.chi1(), state.chi2());
        let chi1_dot = omega1.cross(&chi1);
        let chi2_dot = omega2.cross(&chi2);

        // J = L + S₁ + S₂ is conserved by precession, so L̇ = -(Ṡ₁ + Ṡ₂).
        // Only the part normal to ℓ̂ turns the orbital plane.
        let ell = state.ell_hat();
        let (m1, m2) = (state.m1(), state.m2());
        let l_dot = -(chi1_dot * (m1 * m1) + chi2_dot * (m2 * m2));
        let l_dot_perp = l_dot - ell * l_dot.dot(&ell);
        let l_mag = nu * m * m / v;
        let ell_dot = l_dot_perp / l_mag;

        // The frame turns about ℓ̂ at Ω and tilts with ℓ̂.
        let omega_orbit = v3 / m;
        let frame_omega: Vector3<T> = ell * omega_orbit + ell.cross(&ell_dot);
        let frame_dot = Quaternion::from_imag(frame_omega) * state.frame() * lit::<T>(0.5);

        dydt[index::M1] = m1_dot;
        dydt[index::M2] = m2_dot;
        dydt[index::CHI1..index::CHI1 + 3].copy_from_slice(chi1_dot.as_slice());
        dydt[index::CHI2..index::CHI2 + 3].copy_from_slice(chi2_dot.as_slice());
        dydt[index::FRAME] = frame_dot.w;
        dydt[index::FRAME + 1] = frame_dot.i;
        dydt[index::FRAME + 2] = frame_dot.j;
        dydt[index::FRAME + 3] = frame_dot.k;
        dydt[index::V] = v_dot;
        dydt[index::PHASE] = omega_orbit;
        dydt[index::LAMBDA1] = T::zero();
        dydt[index::LAMBDA2] = T::zero();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expansions::ReferenceExpansions;
    use crate::series::PnOrder;
    use crate::state::BinaryParams;
    use approx::assert_relative_eq;

    fn state(order: PnOrder, v: f64) -> BinaryState<f64> {
        let p = BinaryParams::new(1.0, 0.2).with_order(order);
        BinaryState::new(&p, v).unwrap()
    }

    #[test]
    fn test_newtonian_order_agrees_across_approximants() {
        // At 0PN all three reduce to dv/dt = (32/5) ν v⁹ / M
        let s = state(PnOrder::new(0, 1), 0.2);
        let expected = 32.0 / 5.0 * s.nu() * 0.2f64.powi(9) / 1.2;
        for a in Approximant::ALL {
            let rate = a.velocity_rate(&ReferenceExpansions, &s).unwrap();
            assert_relative_eq!(rate, expected, max_relative = 1e-13);
        }
    }

    #[test]
    fn test_approximants_agree_at_low_velocity() {
        // Differences are of the truncation order, tiny at v = 0.05
        let s = state(PnOrder::UNBOUNDED, 0.05);
        let rates: Vec<f64> = Approximant::ALL
            .iter()
            .map(|a| a.normalized_rate(&ReferenceExpansions, &s).unwrap())
            .collect();
        for r in &rates {
            assert_relative_eq!(*r, rates[0], max_relative = 1e-6);
        }
    }

    #[test]
    fn test_approximants_differ_at_high_velocity() {
        let s = state(PnOrder::new(7, 2), 0.4);
        let t1 = Approximant::TaylorT1.normalized_rate(&ReferenceExpansions, &s).unwrap();
        let t4 = Approximant::TaylorT4.normalized_rate(&ReferenceExpansions, &s).unwrap();
        let t5 = Approximant::TaylorT5.normalized_rate(&ReferenceExpansions, &s).unwrap();
        assert!((t1 - t4).abs() > 1e-6, "T1 {} vs T4 {}", t1, t4);
        assert!((t4 - t5).abs() > 1e-6, "T4 {} vs T5 {}", t4, t5);
    }

    #[test]
    fn test_taylor_t1_divides_at_natural_order() {
        // 1PN: N̂ = 1 + f₂v², Ê′ = 1 + 2e₂v², so the ratio is
        // 1 + (f₂ - 2e₂)v² through v².
        let s = state(PnOrder::new(1, 1), 0.3);
        let nu = s.nu();
        let f2 = -1247.0 / 336.0 - 35.0 / 12.0 * nu;
        let e2 = 2.0 * (-0.75 - nu / 12.0);
        let rate = Approximant::TaylorT1.normalized_rate(&ReferenceExpansions, &s).unwrap();
        assert_relative_eq!(rate, 1.0 + (f2 - e2) * 0.09, max_relative = 1e-13);
    }

    #[test]
    fn test_rates_positive_through_inspiral() {
        for &v in &[0.1, 0.3, 0.5, 0.8, 1.0] {
            let s = state(PnOrder::UNBOUNDED, v);
            for a in [Approximant::TaylorT1, Approximant::TaylorT4] {
                let rate = a.velocity_rate(&ReferenceExpansions, &s).unwrap();
                assert!(rate > 0.0, "{} at v = {} gives {}", a, v, rate);
            }
        }
    }

    #[test]
    fn test_rhs_aligned_nonspinning() {
        let s = state(PnOrder::UNBOUNDED, 0.1);
        let sys = PnSystem::new(s.clone(), &ReferenceExpansions, Approximant::TaylorT4);
        let d = sys.derivative(&s).unwrap();

        assert_eq!(d[index::M1], 0.0);
        assert_eq!(d[index::M2], 0.0);
        assert!(d[index::CHI1..index::CHI2 + 3].iter().all(|&x| x == 0.0));
        assert_relative_eq!(d[index::PHASE], s.omega(), epsilon = 1e-18);
        assert!(d[index::V] > 0.0);
        // R = 1 rotates about ẑ at Ω: Ṙ = ½ (0, 0, 0, Ω)
        assert_relative_eq!(d[index::FRAME + 3], 0.5 * s.omega(), epsilon = 1e-18);
        assert_eq!(d[index::FRAME], 0.0);
        assert_eq!(d[index::LAMBDA1], 0.0);
    }

    #[test]
    fn test_precessing_spins_keep_magnitude() {
        let p = BinaryParams::new(1.0, 0.5)
            .with_spins(Vector3::new(0.5, 0.0, 0.5), Vector3::new(0.0, 0.3, -0.2));
        let s = BinaryState::new(&p, 0.3).unwrap();
        let sys = PnSystem::new(s.clone(), &ReferenceExpansions, Approximant::TaylorT1);
        let d = sys.derivative(&s).unwrap();

        let chi1_dot = Vector3::new(d[index::CHI1], d[index::CHI1 + 1], d[index::CHI1 + 2]);
        let chi2_dot = Vector3::new(d[index::CHI2], d[index::CHI2 + 1], d[index::CHI2 + 2]);
        assert!(chi1_dot.norm() > 0.0);
        assert_relative_eq!(chi1_dot.dot(&s.chi1()), 0.0, epsilon = 1e-15);
        assert_relative_eq!(chi2_dot.dot(&s.chi2()), 0.0, epsilon = 1e-15);

        // d|R|²/dt = 2 R·Ṙ vanishes for a pure rotation generator
        let r = s.frame();
        let r_dot = Quaternion::new(
            d[index::FRAME],
            d[index::FRAME + 1],
            d[index::FRAME + 2],
            d[index::FRAME + 3],
        );
        assert_relative_eq!(r.coords.dot(&r_dot.coords), 0.0, epsilon = 1e-15);
    }

    #[test]
    fn test_rhs_reports_domain_errors() {
        let s = state(PnOrder::UNBOUNDED, 0.1);
        let sys = PnSystem::new(s.clone(), &ReferenceExpansions, Approximant::default());
        let mut y = *s.as_array();
        y[index::CHI2] = 1.5;
        let mut dydt = [0.0; STATE_LEN];
        assert_eq!(
            sys.rhs(0.0, &y, &mut dydt),
            Err(DomainError::SpinAboveUnity { body: 2 })
        );
        y[index::CHI2] = 0.0;
        y[index::V] = -0.1;
        assert_eq!(sys.rhs(0.0, &y, &mut dydt), Err(DomainError::InvalidVelocity));
    }

    #[test]
    fn test_display_names() {
        assert_eq!(Approximant::default(), Approximant::TaylorT1);
        assert_eq!(Approximant::TaylorT5.to_string(), "TaylorT5");
    }
}
