//! Fundamental variables of a compact binary.
//!
//! The state is a dense vector of [`STATE_LEN`] entries:
//!
//! | index   | variable                          |
//! |---------|-----------------------------------|
//! | 0, 1    | masses `M₁`, `M₂`                 |
//! | 2..5    | dimensionless spin `χ⃗₁`           |
//! | 5..8    | dimensionless spin `χ⃗₂`           |
//! | 8..12   | frame quaternion `R` (w, x, y, z) |
//! | 12      | PN velocity parameter `v`         |
//! | 13      | orbital phase `Φ`                 |
//! | 14, 15  | tidal deformabilities `Λ₁`, `Λ₂`  |
//!
//! Black-hole binaries carry zero deformabilities, which never evolve.
//! Units are geometric (`G = c = 1`); time is measured in the same unit as
//! the masses.

use nalgebra::{Quaternion, UnitQuaternion, Vector3};

use crate::error::{DomainError, ParameterError};
use crate::real::{eps, lit, to_f64, Real};
use crate::series::PnOrder;

/// Number of entries in the state vector.
pub const STATE_LEN: usize = 16;

/// Positions of each variable in the state vector.
pub mod index {
    /// Mass of body 1
    pub const M1: usize = 0;
    /// Mass of body 2
    pub const M2: usize = 1;
    /// First component of `χ⃗₁`
    pub const CHI1: usize = 2;
    /// First component of `χ⃗₂`
    pub const CHI2: usize = 5;
    /// Scalar part of `R`
    pub const FRAME: usize = 8;
    /// PN velocity parameter
    pub const V: usize = 12;
    /// Orbital phase
    pub const PHASE: usize = 13;
    /// Tidal deformability of body 1
    pub const LAMBDA1: usize = 14;
    /// Tidal deformability of body 2
    pub const LAMBDA2: usize = 15;
}

/// Physical parameters of a binary, independent of its orbital frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryParams<T: Real> {
    /// Mass of body 1
    pub m1: T,
    /// Mass of body 2
    pub m2: T,
    /// Dimensionless spin of body 1
    pub chi1: Vector3<T>,
    /// Dimensionless spin of body 2
    pub chi2: Vector3<T>,
    /// Orientation of the orbital frame (need not be normalized)
    pub frame: Quaternion<T>,
    /// Initial orbital phase
    pub phase: T,
    /// Tidal deformabilities `(Λ₁, Λ₂)`, `None` for black holes
    pub tidal: Option<(T, T)>,
    /// PN truncation order
    pub order: PnOrder,
}

impl<T: Real> BinaryParams<T> {
    /// Non-spinning black holes with identity orientation.
    pub fn new(m1: T, m2: T) -> Self {
        Self {
            m1,
            m2,
            chi1: Vector3::zeros(),
            chi2: Vector3::zeros(),
            frame: Quaternion::identity(),
            phase: T::zero(),
            tidal: None,
            order: PnOrder::UNBOUNDED,
        }
    }

    /// Set both dimensionless spin vectors.
    pub fn with_spins(mut self, chi1: Vector3<T>, chi2: Vector3<T>) -> Self {
        self.chi1 = chi1;
        self.chi2 = chi2;
        self
    }

    /// Set the orientation of the orbital frame.
    pub fn with_frame(mut self, frame: Quaternion<T>) -> Self {
        self.frame = frame;
        self
    }

    /// Set the initial orbital phase.
    pub fn with_phase(mut self, phase: T) -> Self {
        self.phase = phase;
        self
    }

    /// Give both bodies tidal deformabilities.
    pub fn with_tidal(mut self, lambda1: T, lambda2: T) -> Self {
        self.tidal = Some((lambda1, lambda2));
        self
    }

    /// Set the PN truncation order.
    pub fn with_order(mut self, order: PnOrder) -> Self {
        self.order = order;
        self
    }

    /// Total mass `M₁ + M₂`.
    pub fn total_mass(&self) -> T {
        self.m1 + self.m2
    }
}

/// Instantaneous state of the binary.
///
/// The only mutation is wholesale replacement of the vector by the
/// integration engine, so no caller can leave the state half-updated.
/// Outside the crate every state comes through [`BinaryState::new`] and its
/// validation:
///
/// ```compile_fail
/// use pn_inspiral::{BinaryParams, BinaryState, STATE_LEN};
///
/// let s = BinaryState::new(&BinaryParams::<f64>::new(1.0, 0.5), 0.2).unwrap();
/// let unchecked = s.with_vector([0.0; STATE_LEN]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryState<T: Real> {
    y: [T; STATE_LEN],
    order: PnOrder,
    tidal: bool,
}

impl<T: Real> BinaryState<T> {
    /// Create a state at velocity parameter `v`.
    ///
    /// Fails if a mass is not positive, a spin clearly exceeds the Kerr
    /// bound, a deformability is negative, the frame quaternion vanishes,
    /// or anything is not finite.
    pub fn new(params: &BinaryParams<T>, v: T) -> Result<Self, ParameterError> {
        validate(params, v)?;

        let mut y = [T::zero(); STATE_LEN];
        y[index::M1] = params.m1;
        y[index::M2] = params.m2;
        y[index::CHI1..index::CHI1 + 3].copy_from_slice(params.chi1.as_slice());
        y[index::CHI2..index::CHI2 + 3].copy_from_slice(params.chi2.as_slice());
        let r = params.frame;
        y[index::FRAME] = r.w;
        y[index::FRAME + 1] = r.i;
        y[index::FRAME + 2] = r.j;
        y[index::FRAME + 3] = r.k;
        y[index::V] = v;
        y[index::PHASE] = params.phase;
        if let Some((l1, l2)) = params.tidal {
            y[index::LAMBDA1] = l1;
            y[index::LAMBDA2] = l2;
        }

        Ok(Self {
            y,
            order: params.order,
            tidal: params.tidal.is_some(),
        })
    }

    /// Create a state at orbital angular frequency `omega`, with
    /// `v = (M Ω)^(1/3)`.
    pub fn at_frequency(params: &BinaryParams<T>, omega: T) -> Result<Self, ParameterError> {
        let v = velocity_from_frequency(params.total_mass(), omega);
        Self::new(params, v)
    }

    /// A copy of this state carrying a different vector, unvalidated.
    pub(crate) fn with_vector(&self, y: [T; STATE_LEN]) -> Self {
        Self {
            y,
            order: self.order,
            tidal: self.tidal,
        }
    }

    /// The raw state vector.
    pub fn as_array(&self) -> &[T; STATE_LEN] {
        &self.y
    }

    /// PN truncation order of this state.
    pub fn order(&self) -> PnOrder {
        self.order
    }

    /// Whether the bodies carry tidal deformabilities.
    pub fn has_tidal(&self) -> bool {
        self.tidal
    }

    /// Mass of body 1.
    pub fn m1(&self) -> T {
        self.y[index::M1]
    }

    /// Mass of body 2.
    pub fn m2(&self) -> T {
        self.y[index::M2]
    }

    /// Dimensionless spin of body 1.
    pub fn chi1(&self) -> Vector3<T> {
        chi1(&self.y)
    }

    /// Dimensionless spin of body 2.
    pub fn chi2(&self) -> Vector3<T> {
        chi2(&self.y)
    }

    /// Frame quaternion, as integrated (not renormalized).
    pub fn frame(&self) -> Quaternion<T> {
        frame(&self.y)
    }

    /// PN velocity parameter.
    pub fn v(&self) -> T {
        self.y[index::V]
    }

    /// Accumulated orbital phase.
    pub fn phase(&self) -> T {
        self.y[index::PHASE]
    }

    /// Tidal deformability of body 1.
    pub fn lambda1(&self) -> T {
        self.y[index::LAMBDA1]
    }

    /// Tidal deformability of body 2.
    pub fn lambda2(&self) -> T {
        self.y[index::LAMBDA2]
    }

    /// Total mass.
    pub fn total_mass(&self) -> T {
        self.m1() + self.m2()
    }

    /// Symmetric mass ratio `ν = M₁M₂/M²`.
    pub fn nu(&self) -> T {
        let m = self.total_mass();
        self.m1() * self.m2() / (m * m)
    }

    /// Normalized mass difference `δ = (M₁ - M₂)/M`.
    pub fn delta(&self) -> T {
        (self.m1() - self.m2()) / self.total_mass()
    }

    /// Orbital angular frequency `Ω = v³/M`.
    pub fn omega(&self) -> T {
        let v = self.v();
        v * v * v / self.total_mass()
    }

    /// Newtonian orbital separation `r = M/v²`.
    pub fn separation(&self) -> T {
        let v = self.v();
        self.total_mass() / (v * v)
    }

    /// Orbital angular momentum direction `ℓ̂ = R ẑ R̄`.
    pub fn ell_hat(&self) -> Vector3<T> {
        self.unit_frame() * Vector3::z()
    }

    /// Separation direction `n̂ = R x̂ R̄`.
    pub fn n_hat(&self) -> Vector3<T> {
        self.unit_frame() * Vector3::x()
    }

    /// Orbital velocity direction `λ̂ = R ŷ R̄`.
    pub fn lambda_hat(&self) -> Vector3<T> {
        self.unit_frame() * Vector3::y()
    }

    /// Component of `χ⃗₁` along `ℓ̂`.
    pub fn chi1_ell(&self) -> T {
        self.chi1().dot(&self.ell_hat())
    }

    /// Component of `χ⃗₂` along `ℓ̂`.
    pub fn chi2_ell(&self) -> T {
        self.chi2().dot(&self.ell_hat())
    }

    /// Mass-weighted aligned spin `χ_eff = (M₁χ₁ₗ + M₂χ₂ₗ)/M`.
    pub fn chi_eff(&self) -> T {
        (self.m1() * self.chi1_ell() + self.m2() * self.chi2_ell()) / self.total_mass()
    }

    fn unit_frame(&self) -> UnitQuaternion<T> {
        UnitQuaternion::new_normalize(self.frame())
    }
}

/// `v = (M Ω)^(1/3)`.
pub fn velocity_from_frequency<T: Real>(total_mass: T, omega: T) -> T {
    (total_mass * omega).powf(lit(1.0 / 3.0))
}

/// `Ω = v³/M`.
pub fn frequency_from_velocity<T: Real>(total_mass: T, v: T) -> T {
    v * v * v / total_mass
}

pub(crate) fn chi1<T: Real>(y: &[T; STATE_LEN]) -> Vector3<T> {
    Vector3::new(y[index::CHI1], y[index::CHI1 + 1], y[index::CHI1 + 2])
}

pub(crate) fn chi2<T: Real>(y: &[T; STATE_LEN]) -> Vector3<T> {
    Vector3::new(y[index::CHI2], y[index::CHI2 + 1], y[index::CHI2 + 2])
}

pub(crate) fn frame<T: Real>(y: &[T; STATE_LEN]) -> Quaternion<T> {
    Quaternion::new(
        y[index::FRAME],
        y[index::FRAME + 1],
        y[index::FRAME + 2],
        y[index::FRAME + 3],
    )
}

/// Largest accepted spin magnitude. Grazing the Kerr bound is tolerated;
/// a clear violation is not.
pub(crate) fn spin_bound<T: Real>() -> T {
    T::one() + eps::<T>().sqrt()
}

/// Reject states for which the PN expansion is meaningless.
///
/// A single body mass may pass through zero so that the depletion criteria
/// can bracket the crossing; only a non-positive total mass is fatal.
pub(crate) fn domain_check<T: Real>(y: &[T; STATE_LEN]) -> Result<(), DomainError> {
    let total = y[index::M1] + y[index::M2];
    for (body, i) in [(1, index::M1), (2, index::M2)] {
        if !(y[i] > T::zero()) && !(total > T::zero()) {
            return Err(DomainError::NonPositiveMass { body });
        }
    }
    let bound = spin_bound::<T>();
    for (body, chi) in [(1, chi1(y)), (2, chi2(y))] {
        if chi.norm() > bound {
            return Err(DomainError::SpinAboveUnity { body });
        }
    }
    let v = y[index::V];
    if !(v > T::zero()) || !v.is_finite() {
        return Err(DomainError::InvalidVelocity);
    }
    Ok(())
}

fn validate<T: Real>(params: &BinaryParams<T>, v: T) -> Result<(), ParameterError> {
    let scalars = [
        ("m1", params.m1),
        ("m2", params.m2),
        ("phase", params.phase),
        ("v", v),
    ];
    for (name, x) in scalars {
        if !x.is_finite() {
            return Err(ParameterError::NonFinite { name });
        }
    }
    let vectors = [
        ("chi1", params.chi1.iter()),
        ("chi2", params.chi2.iter()),
    ];
    for (name, mut it) in vectors {
        if !it.all(|x| x.is_finite()) {
            return Err(ParameterError::NonFinite { name });
        }
    }
    if !params.frame.coords.iter().all(|x| x.is_finite()) {
        return Err(ParameterError::NonFinite { name: "frame" });
    }

    for (body, m) in [(1, params.m1), (2, params.m2)] {
        if m <= T::zero() {
            return Err(ParameterError::NonPositiveMass {
                body,
                value: to_f64(m),
            });
        }
    }

    let bound = spin_bound::<T>();
    for (body, chi) in [(1, params.chi1), (2, params.chi2)] {
        let magnitude = chi.norm();
        if magnitude > bound {
            return Err(ParameterError::SpinMagnitude {
                body,
                magnitude: to_f64(magnitude),
            });
        }
    }

    if let Some((l1, l2)) = params.tidal {
        for (body, l) in [(1, l1), (2, l2)] {
            if !l.is_finite() {
                return Err(ParameterError::NonFinite { name: "lambda" });
            }
            if l < T::zero() {
                return Err(ParameterError::NegativeTidal {
                    body,
                    value: to_f64(l),
                });
            }
        }
    }

    if params.frame.norm() <= eps::<T>() {
        return Err(ParameterError::DegenerateFrame);
    }
    Ok(())
}
