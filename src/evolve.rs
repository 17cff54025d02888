//! Bidirectional evolution driver.
//!
//! An evolution starts from the binary at its initial frequency `Ω_i` (which
//! defines `t = 0`) and runs through a fixed sequence of phases:
//!
//! ```text
//! Idle → ForwardRunning → ForwardDone → [BackwardRunning → BackwardDone] → Stitched
//! ```
//!
//! The forward leg integrates up to `v_end`. If an earlier first-output
//! frequency `Ω₁ < Ω_i` is requested, a backward leg integrates the same
//! initial-value problem toward negative times until `v` falls to `v₁`.
//! The legs are then stitched into one time-ascending trajectory.
//!
//! Each leg is bounded by `horizon_factor` times the leading-order time to
//! merger, `τ = 5M / (256 ν v⁸)`. Running out of horizon is reported as an
//! anomalous stop, never as success.

use std::fmt;

use crate::approximant::{Approximant, PnSystem};
use crate::error::EvolveError;
use crate::expansions::{PnExpansions, ReferenceExpansions};
use crate::instability::{up_down_window, UpDownWindow};
use crate::real::{default_tolerance, lit, to_f64, Real};
use crate::solver::{Leg, OdeSystem, Rkf78, Stats, StepInterpolant, Tolerances};
use crate::state::{index, velocity_from_frequency, BinaryParams, BinaryState, STATE_LEN};
use crate::termination::{binary_criteria, Stop, StopCondition, VelocityTarget};

/// Driver configuration.
///
/// ```ignore
/// let options = EvolveOptions::default()
///     .with_first_frequency(0.8 * omega_i)
///     .with_approximant(Approximant::TaylorT4);
/// ```
pub struct EvolveOptions<'a, T: Real> {
    /// First output frequency `Ω₁ ≤ Ω_i`; `None` runs forward only
    pub omega_1: Option<T>,
    /// End frequency `Ω_e > Ω_i`; `None` integrates to `v = 1`
    pub omega_e: Option<T>,
    /// Absolute tolerance
    pub abstol: T,
    /// Relative tolerance
    pub reltol: T,
    /// How `dv/dt` is formed from the PN series
    pub approximant: Approximant,
    /// Multiple of the leading-order time to merger allowed per leg
    pub horizon_factor: T,
    /// Step budget per leg
    pub max_steps: u64,
    /// Magnitude of the first trial step; defaults to `0.1/Ω_i`
    pub initial_step: Option<T>,
    /// Caller-supplied stop conditions, watched on both legs
    pub extra_criteria: Vec<StopCondition<'a, T, STATE_LEN>>,
    /// Forecast the up-down instability before integrating
    pub check_up_down: bool,
}

impl<T: Real> Default for EvolveOptions<'_, T> {
    fn default() -> Self {
        Self {
            omega_1: None,
            omega_e: None,
            abstol: default_tolerance(),
            reltol: default_tolerance(),
            approximant: Approximant::default(),
            horizon_factor: lit(4.0),
            max_steps: 10_000_000,
            initial_step: None,
            extra_criteria: Vec::new(),
            check_up_down: true,
        }
    }
}

impl<'a, T: Real> EvolveOptions<'a, T> {
    /// Request output from the earlier frequency `omega_1`.
    pub fn with_first_frequency(mut self, omega_1: T) -> Self {
        self.omega_1 = Some(omega_1);
        self
    }

    /// Stop at `omega_e` instead of `v = 1`.
    pub fn with_end_frequency(mut self, omega_e: T) -> Self {
        self.omega_e = Some(omega_e);
        self
    }

    /// Set both tolerances.
    pub fn with_tolerances(mut self, abstol: T, reltol: T) -> Self {
        self.abstol = abstol;
        self.reltol = reltol;
        self
    }

    /// Choose the approximant.
    pub fn with_approximant(mut self, approximant: Approximant) -> Self {
        self.approximant = approximant;
        self
    }

    /// Scale the per-leg time horizon.
    pub fn with_horizon_factor(mut self, factor: T) -> Self {
        self.horizon_factor = factor;
        self
    }

    /// Limit the number of steps per leg.
    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Set the first trial step magnitude.
    pub fn with_initial_step(mut self, h0: T) -> Self {
        self.initial_step = Some(h0);
        self
    }

    /// Watch an additional stop condition.
    pub fn with_criterion(mut self, condition: StopCondition<'a, T, STATE_LEN>) -> Self {
        self.extra_criteria.push(condition);
        self
    }

    /// Skip the up-down instability forecast.
    pub fn without_up_down_check(mut self) -> Self {
        self.check_up_down = false;
        self
    }
}

impl<T: Real> fmt::Debug for EvolveOptions<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvolveOptions")
            .field("omega_1", &self.omega_1)
            .field("omega_e", &self.omega_e)
            .field("abstol", &self.abstol)
            .field("reltol", &self.reltol)
            .field("approximant", &self.approximant)
            .field("horizon_factor", &self.horizon_factor)
            .field("max_steps", &self.max_steps)
            .field("initial_step", &self.initial_step)
            .field("extra_criteria", &self.extra_criteria)
            .field("check_up_down", &self.check_up_down)
            .finish()
    }
}

/// Phase of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Inputs validated, nothing integrated yet
    Idle,
    /// Integrating toward `v_end`
    ForwardRunning,
    /// Forward leg stopped
    ForwardDone,
    /// Integrating toward `v₁`, backward in time
    BackwardRunning,
    /// Backward leg stopped
    BackwardDone,
    /// Legs joined into one trajectory
    Stitched,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::ForwardRunning => "forward running",
            Phase::ForwardDone => "forward done",
            Phase::BackwardRunning => "backward running",
            Phase::BackwardDone => "backward done",
            Phase::Stitched => "stitched",
        };
        f.write_str(name)
    }
}

struct PhaseLog(Vec<Phase>);

impl PhaseLog {
    fn new() -> Self {
        Self(vec![Phase::Idle])
    }

    fn enter(&mut self, next: Phase) {
        if let Some(current) = self.0.last() {
            log::debug!("evolution phase: {} -> {}", current, next);
        }
        self.0.push(next);
    }
}

/// Summary of one integration leg.
#[derive(Debug, Clone, PartialEq)]
pub struct LegReport<T> {
    /// Why the leg ended
    pub stop: Stop,
    /// Solver statistics
    pub stats: Stats,
    /// Time at which the leg ended
    pub t_end: T,
    /// Velocity parameter at which the leg ended
    pub v_end: T,
}

impl<T: Real> LegReport<T> {
    fn of(leg: &Leg<T, STATE_LEN>) -> Self {
        let (t_end, v_end) = match leg.final_sample() {
            Some((t, y)) => (*t, y[index::V]),
            None => (T::zero(), T::zero()),
        };
        Self {
            stop: leg.stop.clone(),
            stats: leg.stats.clone(),
            t_end,
            v_end,
        }
    }
}

/// Result of an evolution: a time-ascending trajectory and how each leg
/// ended.
#[derive(Debug, Clone)]
pub struct Evolution<T: Real> {
    template: BinaryState<T>,
    samples: Vec<(T, [T; STATE_LEN])>,
    derivatives: Vec<Option<[T; STATE_LEN]>>,
    forward: LegReport<T>,
    backward: Option<LegReport<T>>,
    up_down: Option<UpDownWindow<T>>,
    phases: Vec<Phase>,
}

impl<T: Real> Evolution<T> {
    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the trajectory is empty (never true for a finished run).
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Raw `(t, y)` samples in ascending time.
    pub fn samples(&self) -> &[(T, [T; STATE_LEN])] {
        &self.samples
    }

    /// Sample times.
    pub fn times(&self) -> impl Iterator<Item = T> + '_ {
        self.samples.iter().map(|(t, _)| *t)
    }

    /// Sample states.
    pub fn states(&self) -> impl Iterator<Item = BinaryState<T>> + '_ {
        self.samples.iter().map(move |(_, y)| self.template.with_vector(*y))
    }

    /// State at the first sample.
    pub fn first_state(&self) -> Option<BinaryState<T>> {
        self.samples.first().map(|(_, y)| self.template.with_vector(*y))
    }

    /// State at the last sample.
    pub fn final_state(&self) -> Option<BinaryState<T>> {
        self.samples.last().map(|(_, y)| self.template.with_vector(*y))
    }

    /// Index of the initial condition (`t = 0`).
    pub fn initial_index(&self) -> usize {
        self.backward_len()
    }

    fn backward_len(&self) -> usize {
        self.samples.iter().take_while(|(t, _)| *t < T::zero()).count()
    }

    /// Forward leg summary.
    pub fn forward(&self) -> &LegReport<T> {
        &self.forward
    }

    /// Backward leg summary, if one ran.
    pub fn backward(&self) -> Option<&LegReport<T>> {
        self.backward.as_ref()
    }

    /// Up-down instability window, if the forecast ran.
    pub fn up_down(&self) -> Option<&UpDownWindow<T>> {
        self.up_down.as_ref()
    }

    /// Phases visited, in order.
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Whether every leg ended at its velocity target (or a caller
    /// condition).
    pub fn is_graceful(&self) -> bool {
        self.forward.stop.is_graceful()
            && self.backward.as_ref().map_or(true, |b| b.stop.is_graceful())
    }

    /// State at time `t`, by cubic Hermite interpolation between samples.
    ///
    /// Returns `None` outside the covered time range.
    pub fn state_at(&self, t: T) -> Option<BinaryState<T>> {
        let (first, last) = (self.samples.first()?, self.samples.last()?);
        if t < first.0 || t > last.0 {
            return None;
        }
        let i = self.samples.partition_point(|(ts, _)| *ts <= t);
        if i >= self.samples.len() {
            return Some(self.template.with_vector(last.1));
        }
        let j = i.saturating_sub(1);
        let interp = self.interpolant(j, i);
        Some(self.template.with_vector(interp.eval(t)))
    }

    /// Uniformly spaced samples `t₀, t₀ + dt, …` through the last time.
    ///
    /// Returns an empty vector for a non-positive or non-finite `dt`.
    pub fn resample(&self, dt: T) -> Vec<(T, BinaryState<T>)> {
        let mut out = Vec::new();
        let (first, last) = match (self.samples.first(), self.samples.last()) {
            (Some(f), Some(l)) => (f.0, l.0),
            _ => return out,
        };
        if !(dt > T::zero()) || !dt.is_finite() {
            return out;
        }

        let mut segment = 1;
        let mut k = 0u64;
        loop {
            let t = first + dt * lit::<T>(k as f64);
            if t > last {
                break;
            }
            while segment + 1 < self.samples.len() && self.samples[segment].0 < t {
                segment += 1;
            }
            let y = if self.samples.len() == 1 {
                self.samples[0].1
            } else {
                self.interpolant(segment - 1, segment).eval(t)
            };
            out.push((t, self.template.with_vector(y)));
            k += 1;
        }
        out
    }

    fn interpolant(&self, a: usize, b: usize) -> StepInterpolant<T, STATE_LEN> {
        let (t_a, y_a) = self.samples[a];
        let (t_b, y_b) = self.samples[b];
        let (f_a, f_b) = match (self.derivatives[a], self.derivatives[b]) {
            (Some(f_a), Some(f_b)) => (Some(f_a), Some(f_b)),
            _ => (None, None),
        };
        StepInterpolant {
            t_a,
            y_a,
            f_a,
            t_b,
            y_b,
            f_b,
        }
    }
}

/// Leading-order time to merger from velocity `v`: `τ = 5M / (256 ν v⁸)`.
pub fn time_to_merger<T: Real>(total_mass: T, nu: T, v: T) -> T {
    lit::<T>(5.0 / 256.0) * total_mass / (nu * v.powi(8))
}

/// Evolve a binary from initial frequency `omega_i` with the reference PN
/// expansions.
pub fn evolve<T: Real>(
    params: &BinaryParams<T>,
    omega_i: T,
    options: EvolveOptions<'_, T>,
) -> Result<Evolution<T>, EvolveError> {
    evolve_with(&ReferenceExpansions, params, omega_i, options)
}

/// Evolve a binary with a caller-supplied set of PN expansions.
pub fn evolve_with<T, E>(
    expansions: &E,
    params: &BinaryParams<T>,
    omega_i: T,
    options: EvolveOptions<'_, T>,
) -> Result<Evolution<T>, EvolveError>
where
    T: Real,
    E: PnExpansions<T> + ?Sized,
{
    let mut phases = PhaseLog::new();
    let targets = validate(omega_i, &options)?;

    let initial = BinaryState::at_frequency(params, omega_i)?;
    let v_i = initial.v();
    if v_i >= T::one() {
        return Err(EvolveError::BeyondPnValidity { v: to_f64(v_i) });
    }
    let v_end = targets
        .omega_e
        .map(|omega| velocity_from_frequency(params.total_mass(), omega))
        .map_or(T::one(), |v| v.min(T::one()));
    let v_1 = targets
        .omega_1
        .filter(|omega| *omega < omega_i)
        .map(|omega| velocity_from_frequency(params.total_mass(), omega));

    let up_down = if options.check_up_down {
        let window = up_down_window(&initial);
        let v_lo = v_1.unwrap_or(v_i);
        if window.overlaps(v_lo, v_end) {
            log::warn!(
                "binary may enter the up-down instability for v in [{}, {}]",
                to_f64(window.v_lower),
                to_f64(window.v_upper)
            );
        }
        Some(window)
    } else {
        None
    };

    let system = PnSystem::new(initial.clone(), expansions, options.approximant);
    let tolerances = Tolerances::new(options.abstol, options.reltol);
    let m = initial.total_mass();
    let nu = initial.nu();
    let h0 = options
        .initial_step
        .unwrap_or_else(|| lit::<T>(0.1) / initial.omega());

    phases.enter(Phase::ForwardRunning);
    let mut criteria = binary_criteria(VelocityTarget::End(v_end));
    criteria.extend(options.extra_criteria.iter().map(|c| c.by_ref()));
    let mut solver = Rkf78::new(tolerances.clone());
    solver.max_steps = options.max_steps;
    let t_forward = options.horizon_factor * time_to_merger(m, nu, v_i);
    let forward = solver.propagate(&system, &criteria, T::zero(), initial.as_array(), t_forward, h0)?;
    let forward_report = LegReport::of(&forward);
    report_stop("forward", &forward_report);
    phases.enter(Phase::ForwardDone);

    let backward = match v_1 {
        Some(v_1) => {
            phases.enter(Phase::BackwardRunning);
            let mut criteria = binary_criteria(VelocityTarget::Start(v_1));
            criteria.extend(options.extra_criteria.iter().map(|c| c.by_ref()));
            let mut solver = Rkf78::new(tolerances);
            solver.max_steps = options.max_steps;
            let t_backward = -options.horizon_factor * time_to_merger(m, nu, v_1);
            let leg = solver.propagate(&system, &criteria, T::zero(), initial.as_array(), t_backward, -h0)?;
            let report = LegReport::of(&leg);
            report_stop("backward", &report);
            phases.enter(Phase::BackwardDone);
            Some((leg, report))
        }
        None => None,
    };

    let (backward_samples, backward_report) = match backward {
        Some((leg, report)) => (Some(leg.samples), Some(report)),
        None => (None, None),
    };
    let samples = stitch(backward_samples, forward.samples);
    let derivatives = samples
        .iter()
        .map(|(t, y)| {
            let mut dydt = [T::zero(); STATE_LEN];
            system.rhs(*t, y, &mut dydt).ok().map(|()| dydt)
        })
        .collect();
    phases.enter(Phase::Stitched);

    Ok(Evolution {
        template: initial,
        samples,
        derivatives,
        forward: forward_report,
        backward: backward_report,
        up_down,
        phases: phases.0,
    })
}

struct Targets<T> {
    omega_1: Option<T>,
    omega_e: Option<T>,
}

fn validate<T: Real>(
    omega_i: T,
    options: &EvolveOptions<'_, T>,
) -> Result<Targets<T>, EvolveError> {
    let positive = |x: T| x > T::zero() && x.is_finite();

    if !positive(omega_i) {
        return Err(EvolveError::InvalidFrequency { name: "omega_i" });
    }
    if !positive(options.abstol) || !positive(options.reltol) {
        return Err(EvolveError::InvalidTolerance);
    }
    if !positive(options.horizon_factor) {
        return Err(EvolveError::InvalidOption { name: "horizon_factor" });
    }
    if let Some(h0) = options.initial_step {
        if !positive(h0) {
            return Err(EvolveError::InvalidOption { name: "initial_step" });
        }
    }
    if options.max_steps == 0 {
        return Err(EvolveError::InvalidOption { name: "max_steps" });
    }

    if let Some(omega_1) = options.omega_1 {
        if !positive(omega_1) {
            return Err(EvolveError::InvalidFrequency { name: "omega_1" });
        }
        if omega_1 > omega_i {
            return Err(EvolveError::FirstFrequencyAboveInitial {
                omega_1: to_f64(omega_1),
                omega_i: to_f64(omega_i),
            });
        }
    }
    if let Some(omega_e) = options.omega_e {
        if !positive(omega_e) {
            return Err(EvolveError::InvalidFrequency { name: "omega_e" });
        }
        if omega_e <= omega_i {
            return Err(EvolveError::EndFrequencyBelowInitial {
                omega_e: to_f64(omega_e),
                omega_i: to_f64(omega_i),
            });
        }
    }
    Ok(Targets {
        omega_1: options.omega_1,
        omega_e: options.omega_e,
    })
}

fn report_stop<T: Real>(leg: &str, report: &LegReport<T>) {
    report.stop.severity().log(format_args!(
        "{} leg stopped at t = {}, v = {} after {} steps: {}",
        leg,
        to_f64(report.t_end),
        to_f64(report.v_end),
        report.stats.accepted_steps,
        report.stop
    ));
}

/// Join the legs into one time-ascending series.
///
/// Both legs start at the initial condition; the backward copy is dropped.
fn stitch<T: Real>(
    backward: Option<Vec<(T, [T; STATE_LEN])>>,
    forward: Vec<(T, [T; STATE_LEN])>,
) -> Vec<(T, [T; STATE_LEN])> {
    match backward {
        Some(backward) => {
            let mut samples: Vec<_> = backward.into_iter().skip(1).rev().collect();
            samples.extend(forward);
            samples
        }
        None => forward,
    }
}
