//! Termination criteria for one leg of an inspiral.
//!
//! Continuous criteria are event functions whose zero crossing is located
//! inside the step by root finding:
//!
//! | criterion            | `g(t, y)`        | stops when        |
//! |----------------------|------------------|-------------------|
//! | `MassOneDepleted`    | `M₁`             | `M₁ ≤ 0`          |
//! | `MassTwoDepleted`    | `M₂`             | `M₂ ≤ 0`          |
//! | `SpinOneExceeded`    | `1 - χ⃗₁·χ⃗₁`       | `|χ⃗₁|² > 1`        |
//! | `SpinTwoExceeded`    | `1 - χ⃗₂·χ⃗₂`       | `|χ⃗₂|² > 1`        |
//! | `EndVelocity`        | `v_end - v`      | `v` reaches `v_end` going forward  |
//! | `StartVelocity`      | `v - v₁`         | `v` reaches `v₁` going backward    |
//!
//! Discrete criteria (step collapse, non-finite values, domain violations,
//! the step budget) are checked by the integrator after every step. Every
//! criterion halts the leg immediately; none is retried.

use std::fmt;

use crate::error::DomainError;
use crate::events::{EventConfig, EventDirection, EventFunction};
use crate::real::Real;
use crate::state::{chi1, chi2, index, STATE_LEN};

/// How alarming a stop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// The expected end of a leg
    Graceful,
    /// Mass or spin bounds, non-finite values, step collapse
    Suspicious,
    /// The time span ran out before any criterion fired
    Anomalous,
}

impl Severity {
    /// Log a stop message at the level matching this severity.
    pub(crate) fn log(self, message: fmt::Arguments<'_>) {
        match self {
            Severity::Graceful => log::info!("{}", message),
            Severity::Suspicious | Severity::Anomalous => log::warn!("{}", message),
        }
    }
}

/// Identity of a termination criterion.
#[derive(Debug, Clone, PartialEq)]
pub enum Criterion {
    /// `M₁` reached zero
    MassOneDepleted,
    /// `M₂` reached zero
    MassTwoDepleted,
    /// `|χ⃗₁|` reached 1
    SpinOneExceeded,
    /// `|χ⃗₂|` reached 1
    SpinTwoExceeded,
    /// `v` reached the requested end value
    EndVelocity,
    /// `v` fell to the requested first-output value
    StartVelocity,
    /// A caller-supplied condition
    Custom(String),
    /// The step size fell below the precision floor
    StepCollapse,
    /// A state component or the time became NaN or infinite
    NonFinite,
    /// The right-hand side rejected the current state
    DomainViolation(DomainError),
    /// The integrator exceeded its step budget
    StepLimit,
}

impl Criterion {
    /// Severity of a stop caused by this criterion.
    ///
    /// Custom conditions are requested by the caller and count as graceful.
    pub fn severity(&self) -> Severity {
        match self {
            Criterion::EndVelocity | Criterion::StartVelocity | Criterion::Custom(_) => {
                Severity::Graceful
            }
            _ => Severity::Suspicious,
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criterion::MassOneDepleted => write!(f, "M₁ ≤ 0"),
            Criterion::MassTwoDepleted => write!(f, "M₂ ≤ 0"),
            Criterion::SpinOneExceeded => write!(f, "|χ₁| > 1"),
            Criterion::SpinTwoExceeded => write!(f, "|χ₂| > 1"),
            Criterion::EndVelocity => write!(f, "reached v_end"),
            Criterion::StartVelocity => write!(f, "reached v₁"),
            Criterion::Custom(name) => write!(f, "custom condition `{}`", name),
            Criterion::StepCollapse => write!(f, "step size collapsed"),
            Criterion::NonFinite => write!(f, "non-finite state or time"),
            Criterion::DomainViolation(e) => write!(f, "domain violation: {}", e),
            Criterion::StepLimit => write!(f, "step budget exhausted"),
        }
    }
}

/// Why a leg ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Stop {
    /// A criterion fired
    Criterion(Criterion),
    /// The time span ran out first
    HorizonExhausted,
}

impl Stop {
    /// Severity of this stop.
    pub fn severity(&self) -> Severity {
        match self {
            Stop::Criterion(c) => c.severity(),
            Stop::HorizonExhausted => Severity::Anomalous,
        }
    }

    /// Whether this is the expected end of a leg.
    pub fn is_graceful(&self) -> bool {
        self.severity() == Severity::Graceful
    }

    /// The criterion that fired, if any.
    pub fn criterion(&self) -> Option<&Criterion> {
        match self {
            Stop::Criterion(c) => Some(c),
            Stop::HorizonExhausted => None,
        }
    }
}

impl fmt::Display for Stop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stop::Criterion(c) => write!(f, "{}", c),
            Stop::HorizonExhausted => write!(f, "time horizon exhausted"),
        }
    }
}

/// A continuous (root-found) stop condition.
pub struct StopCondition<'a, T: Real, const N: usize> {
    /// Which criterion this is
    pub criterion: Criterion,
    /// The monitored function
    pub function: Box<dyn EventFunction<T, N> + 'a>,
    /// Crossing direction and root-finding settings
    pub config: EventConfig<T>,
}

impl<'a, T: Real, const N: usize> StopCondition<'a, T, N> {
    /// Stop where `function` falls through zero.
    pub fn falling<F>(criterion: Criterion, function: F) -> Self
    where
        F: EventFunction<T, N> + 'a,
    {
        Self {
            criterion,
            function: Box::new(function),
            config: EventConfig {
                direction: EventDirection::Falling,
                ..Default::default()
            },
        }
    }

    /// Stop where `function` crosses zero in `direction`.
    pub fn new<F>(criterion: Criterion, function: F, direction: EventDirection) -> Self
    where
        F: EventFunction<T, N> + 'a,
    {
        Self {
            criterion,
            function: Box::new(function),
            config: EventConfig {
                direction,
                ..Default::default()
            },
        }
    }

    /// Also stop when the function leaves an exact zero in the watched
    /// direction, so a state starting on the bound is caught.
    pub fn counting_departure(mut self) -> Self {
        self.config.departure_counts = true;
        self
    }

    /// Evaluate the monitored function.
    pub fn eval(&self, t: T, y: &[T; N]) -> T {
        self.function.eval(t, y)
    }

    /// A condition that borrows this one, so a single caller-supplied
    /// condition can watch several legs.
    pub fn by_ref(&self) -> StopCondition<'_, T, N> {
        StopCondition {
            criterion: self.criterion.clone(),
            function: Box::new(move |t: T, y: &[T; N]| self.function.eval(t, y)),
            config: self.config,
        }
    }
}

impl<T: Real, const N: usize> fmt::Debug for StopCondition<'_, T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopCondition")
            .field("criterion", &self.criterion)
            .field("direction", &self.config.direction)
            .finish()
    }
}

/// Target of the velocity criterion of a leg.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VelocityTarget<T> {
    /// Forward leg: stop when `v` rises to `v_end`
    End(T),
    /// Backward leg: stop when `v` falls to `v₁`
    Start(T),
}

/// The physical criteria monitored on every leg, plus the velocity target.
pub fn binary_criteria<'a, T: Real>(target: VelocityTarget<T>) -> Vec<StopCondition<'a, T, STATE_LEN>> {
    let velocity = match target {
        VelocityTarget::End(v_end) => StopCondition::falling(
            Criterion::EndVelocity,
            move |_t: T, y: &[T; STATE_LEN]| v_end - y[index::V],
        ),
        VelocityTarget::Start(v_1) => StopCondition::falling(
            Criterion::StartVelocity,
            move |_t: T, y: &[T; STATE_LEN]| y[index::V] - v_1,
        ),
    };
    vec![
        velocity,
        StopCondition::falling(Criterion::MassOneDepleted, |_t: T, y: &[T; STATE_LEN]| {
            y[index::M1]
        }),
        StopCondition::falling(Criterion::MassTwoDepleted, |_t: T, y: &[T; STATE_LEN]| {
            y[index::M2]
        }),
        StopCondition::falling(Criterion::SpinOneExceeded, |_t: T, y: &[T; STATE_LEN]| {
            T::one() - chi1(y).norm_squared()
        })
        .counting_departure(),
        StopCondition::falling(Criterion::SpinTwoExceeded, |_t: T, y: &[T; STATE_LEN]| {
            T::one() - chi2(y).norm_squared()
        })
        .counting_departure(),
    ]
}
