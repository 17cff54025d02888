//! # pn-inspiral: Post-Newtonian Orbital Evolution
//!
//! Evolves the quasi-circular inspiral of a compact binary (two black holes,
//! or neutron stars with tidal deformabilities) through post-Newtonian (PN)
//! energy balance, integrated with an adaptive Runge-Kutta-Fehlberg 7(8)
//! scheme.
//!
//! ## Features
//!
//! - Truncated power series in `v` with rational exponents and logarithms
//!   ([`TruncatedSeries`]), truncation-order preserving
//! - Binary state of masses, spins, frame quaternion, velocity, phase and
//!   tidal deformabilities ([`BinaryState`])
//! - TaylorT1, TaylorT4 and TaylorT5 approximants ([`Approximant`])
//! - Spin and orbital-plane precession
//! - Root-found termination on mass, spin and velocity bounds, with
//!   graceful/suspicious/anomalous severities
//! - Forward and backward legs stitched into one time-ascending trajectory
//! - Up-down instability forecast
//! - Generic over `f64` and `f32` through nalgebra's `RealField`
//!
//! ## Basic Usage
//!
//! ```rust
//! use pn_inspiral::{evolve, frequency_from_velocity, BinaryParams, EvolveOptions};
//!
//! let params = BinaryParams::<f64>::new(1.0, 0.2);
//! let omega_i = frequency_from_velocity(params.total_mass(), 0.3);
//! let omega_e = frequency_from_velocity(params.total_mass(), 0.31);
//!
//! let evolution = evolve(
//!     &params,
//!     omega_i,
//!     EvolveOptions::default()
//!         .with_first_frequency(0.95 * omega_i)
//!         .with_end_frequency(omega_e),
//! )?;
//!
//! assert!(evolution.is_graceful());
//! let last = evolution.final_state().unwrap();
//! assert!((last.v() - 0.31).abs() < 1e-8);
//! # Ok::<(), pn_inspiral::EvolveError>(())
//! ```
//!
//! ## Termination
//!
//! Every leg stops at the first of:
//!
//! - `v` reaching its target (`v_end` forward, `v₁` backward): graceful
//! - a caller-supplied [`StopCondition`]: graceful
//! - `M₁ ≤ 0`, `M₂ ≤ 0`, `|χ⃗₁| > 1`, `|χ⃗₂| > 1`: suspicious
//! - non-finite values, a domain violation, step collapse or the step
//!   budget: suspicious
//! - the time horizon: anomalous
//!
//! Graceful stops are logged at `info`, the rest at `warn`, through the
//! [`log`] facade.
//!
//! ## Tolerance Selection
//!
//! The default absolute and relative tolerance is `eps^(11/16)`, about
//! `1.6e-11` for `f64`. The frame quaternion rotates once per orbit, so the
//! step count grows with the number of orbits; `1e-9`–`1e-10` is adequate
//! for surveys.
//!
//! ## References
//!
//! 1. Blanchet, L. (2014). "Gravitational Radiation from Post-Newtonian
//!    Sources and Inspiralling Compact Binaries". Living Rev. Relativ. 17, 2.
//!
//! 2. Gerosa, D., Kesden, M., O'Shaughnessy, R., et al. (2015). "Precessional
//!    Instability in Binary Black Holes with Aligned Spins". PRL 115, 141102.
//!
//! 3. Fehlberg, E. (1968). "Classical Fifth-, Sixth-, Seventh-, and
//!    Eighth-Order Runge-Kutta Formulas with Stepsize Control".
//!    NASA TR R-287.
//!
//! 4. Brent, R.P. (1973). "Algorithms for Minimization without
//!    Derivatives". Prentice-Hall.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod approximant;
pub mod coefficients;
pub mod error;
pub mod events;
pub mod evolve;
pub mod expansions;
pub mod instability;
pub mod real;
pub mod series;
pub mod solver;
pub mod state;
pub mod termination;

pub use approximant::{Approximant, PnSystem};
pub use error::{
    DomainError, EvolveError, ExpansionFault, IntegrationError, ParameterError, SeriesError,
};
pub use events::{BrentError, BrentSolver, EventConfig, EventDirection, EventFunction, EventResult};
pub use evolve::{evolve, evolve_with, time_to_merger, Evolution, EvolveOptions, LegReport, Phase};
pub use expansions::{PnExpansions, ReferenceExpansions};
pub use instability::{up_down_window, UpDownWindow};
pub use real::{default_tolerance, Real};
pub use series::{PnOrder, Term, TruncatedSeries, PN_VELOCITY};
pub use solver::{Leg, OdeSystem, Rkf78, Stats, StepController, StepResult, Tolerances};
pub use state::{
    frequency_from_velocity, index, velocity_from_frequency, BinaryParams, BinaryState, STATE_LEN,
};
pub use termination::{binary_criteria, Criterion, Severity, Stop, StopCondition, VelocityTarget};
