//! Error types for every layer of the engine.
//!
//! Construction and configuration problems are hard errors. Problems that the
//! integrator reaches incrementally (domain excursions, non-finite values,
//! step collapse) are not errors at all: they end a leg through the
//! termination machinery and are reported in the result.

use num_rational::Rational64;
use thiserror::Error;

/// Errors from truncated-series arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SeriesError {
    /// The leading term is zero, carries a logarithm, or the series is empty.
    #[error("series is not invertible: leading term x^{power} (ln x)^{log_power}")]
    NonInvertibleSeries {
        /// Power of the offending leading term
        power: Rational64,
        /// Log power of the offending leading term
        log_power: u32,
    },
    /// The two operands are expansions in different variables.
    #[error("cannot combine a series in `{left}` with a series in `{right}`")]
    MismatchedVariable {
        /// Variable of the left operand
        left: &'static str,
        /// Variable of the right operand
        right: &'static str,
    },
}

/// Invalid physical parameters at state construction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterError {
    /// A body mass is zero or negative
    #[error("mass of body {body} must be positive, got {value}")]
    NonPositiveMass {
        /// Body index (1 or 2)
        body: u8,
        /// Supplied mass
        value: f64,
    },
    /// A spin magnitude clearly exceeds the Kerr bound
    #[error("spin magnitude of body {body} is {magnitude}, which exceeds 1")]
    SpinMagnitude {
        /// Body index (1 or 2)
        body: u8,
        /// Supplied dimensionless spin magnitude
        magnitude: f64,
    },
    /// A tidal deformability is negative
    #[error("tidal deformability of body {body} must be non-negative, got {value}")]
    NegativeTidal {
        /// Body index (1 or 2)
        body: u8,
        /// Supplied deformability
        value: f64,
    },
    /// The orientation quaternion has (numerically) zero norm
    #[error("frame orientation quaternion has zero norm")]
    DegenerateFrame,
    /// A parameter is NaN or infinite
    #[error("parameter `{name}` is not finite")]
    NonFinite {
        /// Name of the parameter
        name: &'static str,
    },
}

/// Domain violation detected while evaluating the right-hand side.
///
/// These are reported as data to the integration loop, never raised as
/// faults from inside a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DomainError {
    /// A body mass is non-positive and so is the total mass
    #[error("mass of body {body} is not positive")]
    NonPositiveMass {
        /// Body index (1 or 2)
        body: u8,
    },
    /// A dimensionless spin magnitude exceeds 1
    #[error("spin magnitude of body {body} exceeds 1")]
    SpinAboveUnity {
        /// Body index (1 or 2)
        body: u8,
    },
    /// The velocity parameter is non-positive or not finite
    #[error("PN velocity parameter is not positive and finite")]
    InvalidVelocity,
    /// The flux or energy series could not be combined at the current state
    #[error("PN expansion broke down: {0}")]
    ExpansionBreakdown(ExpansionFault),
}

/// Which series operation failed inside the right-hand side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpansionFault {
    /// A series to be inverted had a vanishing or logarithmic leading term
    NonInvertible,
    /// The energy derivative or the energy balance evaluated to zero
    VanishingDenominator,
}

impl std::fmt::Display for ExpansionFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpansionFault::NonInvertible => write!(f, "series is not invertible"),
            ExpansionFault::VanishingDenominator => write!(f, "denominator vanished"),
        }
    }
}

impl From<SeriesError> for DomainError {
    fn from(_: SeriesError) -> Self {
        DomainError::ExpansionBreakdown(ExpansionFault::NonInvertible)
    }
}

/// Errors that can occur during integration
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntegrationError {
    /// Event finding failed
    #[error("event finding failed: {message}")]
    EventFindingFailed {
        /// Description of the failure
        message: String,
    },
    /// Invalid input parameters
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Description of the invalid input
        message: String,
    },
}

/// Errors from the bidirectional evolution driver.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvolveError {
    /// The binary could not be constructed
    #[error(transparent)]
    Parameters(#[from] ParameterError),
    /// The initial frequency puts the binary at v >= 1
    #[error("initial frequency gives v = {v}, beyond the validity of the PN expansion")]
    BeyondPnValidity {
        /// Velocity parameter at the initial frequency
        v: f64,
    },
    /// A non-positive or non-finite frequency was requested
    #[error("frequency `{name}` must be positive and finite")]
    InvalidFrequency {
        /// Name of the offending option
        name: &'static str,
    },
    /// The first output frequency lies above the initial frequency
    #[error("first output frequency {omega_1} exceeds the initial frequency {omega_i}")]
    FirstFrequencyAboveInitial {
        /// Requested first output frequency
        omega_1: f64,
        /// Initial frequency
        omega_i: f64,
    },
    /// The end frequency does not lie above the initial frequency
    #[error("end frequency {omega_e} is not above the initial frequency {omega_i}")]
    EndFrequencyBelowInitial {
        /// Requested end frequency
        omega_e: f64,
        /// Initial frequency
        omega_i: f64,
    },
    /// Tolerances must be positive and finite
    #[error("tolerances must be positive and finite")]
    InvalidTolerance,
    /// A driver option is out of range
    #[error("option `{name}` must be positive and finite")]
    InvalidOption {
        /// Name of the offending option
        name: &'static str,
    },
    /// The integrator rejected its inputs
    #[error(transparent)]
    Integration(#[from] IntegrationError),
}
