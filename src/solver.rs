//! Runge-Kutta-Fehlberg 7(8) Integrator
//!
//! A 13-stage embedded RK7(8) pair with adaptive step control, generic over
//! the floating-point type. [`Rkf78::propagate`] integrates one leg, records
//! every accepted step, and halts at the first termination criterion.
//!
//! Reference: NASA TR R-287, Erwin Fehlberg, 1968

use crate::coefficients::{stage_node, stage_weight, A, B, B_ERR, STAGES};
use crate::error::{DomainError, IntegrationError};
use crate::events::{BrentError, BrentSolver, EventResult};
use crate::real::{eps, is_nan, lit, to_f64, Real};
use crate::termination::{Criterion, Stop, StopCondition};

/// System of ordinary differential equations: dy/dt = f(t, y)
pub trait OdeSystem<T: Real, const N: usize> {
    /// Evaluate the right-hand side of the ODE system
    ///
    /// # Arguments
    /// * `t` - Current time
    /// * `y` - Current state vector
    /// * `dydt` - Output: derivative dy/dt
    ///
    /// A state outside the domain of the model is reported as an `Err`
    /// rather than a panic; the integrator turns it into a clean stop.
    fn rhs(&self, t: T, y: &[T; N], dydt: &mut [T; N]) -> Result<(), DomainError>;
}

/// Integration result from a single step
#[derive(Debug, Clone)]
pub struct StepResult<T, const N: usize> {
    /// New state after the step (8th order solution)
    pub y: [T; N],
    /// New time value
    pub t: T,
    /// Normalized error estimate (should be ≤ 1.0 for acceptance)
    pub error: T,
    /// Suggested step size magnitude for the next step
    pub h_next: T,
    /// Whether the step was accepted
    pub accepted: bool,
    /// Set when the right-hand side rejected the starting state itself
    pub domain: Option<DomainError>,
}

/// Integration statistics for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    /// Total number of function evaluations
    pub fn_evals: u64,
    /// Number of accepted steps
    pub accepted_steps: u64,
    /// Number of rejected steps
    pub rejected_steps: u64,
}

/// Step-size controller using an I-controller
///
/// h_new = safety * h * error^(-1/8)
#[derive(Debug, Clone)]
pub struct StepController<T> {
    /// Safety factor (0.8-0.9 typical)
    pub safety: T,
    /// Maximum growth factor per step
    pub max_factor: T,
    /// Minimum reduction factor per step
    pub min_factor: T,
    exponent: T,
}

impl<T: Real> Default for StepController<T> {
    fn default() -> Self {
        Self {
            safety: lit(0.9),
            max_factor: lit(5.0),
            min_factor: lit(0.2),
            exponent: lit(1.0 / 8.0), // 1/(p+1), p = 7 for the error estimate
        }
    }
}

impl<T: Real> StepController<T> {
    /// Compute the step size adjustment factor
    pub fn compute_factor(&self, error: T) -> T {
        if error == T::zero() {
            return self.max_factor;
        }
        if !error.is_finite() {
            return self.min_factor;
        }

        let factor = self.safety * error.powf(-self.exponent);
        factor.clamp(self.min_factor, self.max_factor)
    }
}

/// Tolerances for error control
///
/// Error is computed as: |y8 - y7| / (atol + rtol * |y8|)
#[derive(Debug, Clone)]
pub struct Tolerances<T, const N: usize> {
    /// Absolute tolerance per component
    pub atol: [T; N],
    /// Relative tolerance per component
    pub rtol: [T; N],
}

impl<T: Real, const N: usize> Tolerances<T, N> {
    /// Create tolerances with uniform values
    pub fn new(atol: T, rtol: T) -> Self {
        Self {
            atol: [atol; N],
            rtol: [rtol; N],
        }
    }

    /// Create tolerances with per-component values
    pub fn with_components(atol: [T; N], rtol: [T; N]) -> Self {
        Self { atol, rtol }
    }
}

/// One leg of integration: every accepted sample and the reason it ended.
#[derive(Debug, Clone)]
pub struct Leg<T, const N: usize> {
    /// `(t, y)` samples in integration order, starting with the initial
    /// condition and ending at the stop
    pub samples: Vec<(T, [T; N])>,
    /// Why the leg ended
    pub stop: Stop,
    /// Solver statistics for this leg
    pub stats: Stats,
}

impl<T: Real, const N: usize> Leg<T, N> {
    /// The last recorded sample.
    pub fn final_sample(&self) -> Option<&(T, [T; N])> {
        self.samples.last()
    }
}

/// Runge-Kutta-Fehlberg 7(8) integrator
///
/// # Example
/// ```ignore
/// use pn_inspiral::{OdeSystem, Rkf78, Tolerances, DomainError};
///
/// struct HarmonicOscillator { omega: f64 }
///
/// impl OdeSystem<f64, 2> for HarmonicOscillator {
///     fn rhs(&self, _t: f64, y: &[f64; 2], dydt: &mut [f64; 2]) -> Result<(), DomainError> {
///         dydt[0] = y[1];
///         dydt[1] = -self.omega * self.omega * y[0];
///         Ok(())
///     }
/// }
///
/// let mut solver = Rkf78::new(Tolerances::new(1e-12, 1e-12));
/// let leg = solver.propagate(&HarmonicOscillator { omega: 1.0 }, &[], 0.0, &[1.0, 0.0], 10.0, 0.1)?;
/// ```
#[derive(Clone)]
pub struct Rkf78<T, const N: usize> {
    tol: Tolerances<T, N>,
    controller: StepController<T>,
    /// Maximum step size magnitude
    pub h_max: T,
    /// Step collapse threshold in units of `eps · max(|t|, 1)`
    pub collapse_factor: T,
    /// Maximum number of integration steps per leg
    pub max_steps: u64,
    /// Stage evaluations (pre-allocated workspace)
    k: [[T; N]; STAGES],
    /// Integration statistics
    pub stats: Stats,
}

impl<T: Real, const N: usize> Rkf78<T, N> {
    /// Create a new RKF78 solver with specified tolerances
    pub fn new(tol: Tolerances<T, N>) -> Self {
        Self {
            tol,
            controller: StepController::default(),
            h_max: T::max_value().unwrap_or_else(|| lit(f64::MAX)),
            collapse_factor: lit(10.0),
            max_steps: 10_000_000,
            k: [[T::zero(); N]; STAGES],
            stats: Stats::default(),
        }
    }

    /// Set the maximum step size magnitude
    pub fn set_max_step(&mut self, h_max: T) {
        self.h_max = h_max;
    }

    /// Smallest step magnitude that still makes progress at time `t`.
    pub fn step_floor(&self, t: T) -> T {
        self.collapse_factor * eps::<T>() * t.abs().max(T::one())
    }

    /// Perform a single integration step
    ///
    /// This computes the 13 stages, forms the 8th and 7th order solutions,
    /// estimates the error, and determines if the step should be accepted.
    /// A domain violation at an interior stage rejects the step with the
    /// smallest allowed reduction factor.
    pub fn step<S: OdeSystem<T, N>>(&mut self, sys: &S, t: T, y: &[T; N], h: T) -> StepResult<T, N> {
        let h = h.signum() * h.abs().min(self.h_max);

        match self.compute_stages(sys, t, y, h) {
            Ok(()) => {}
            Err((0, e)) => {
                self.stats.fn_evals += 1;
                return StepResult {
                    y: *y,
                    t,
                    error: T::zero(),
                    h_next: h.abs(),
                    accepted: false,
                    domain: Some(e),
                };
            }
            Err((stage, e)) => {
                log::trace!("stage {} left the model domain ({}); rejecting step", stage, e);
                self.stats.fn_evals += stage as u64 + 1;
                self.stats.rejected_steps += 1;
                return StepResult {
                    y: *y,
                    t,
                    error: T::max_value().unwrap_or_else(|| lit(f64::MAX)),
                    h_next: h.abs() * self.controller.min_factor,
                    accepted: false,
                    domain: None,
                };
            }
        }

        let y8 = self.compute_solution(y, h);
        let error = self.compute_error(&y8, h);
        let accepted = error <= T::one();

        let factor = self.controller.compute_factor(error);
        let h_next = (h.abs() * factor).min(self.h_max);

        self.stats.fn_evals += STAGES as u64;
        if accepted {
            self.stats.accepted_steps += 1;
        } else {
            self.stats.rejected_steps += 1;
        }

        StepResult {
            y: y8,
            t: t + h,
            error,
            h_next,
            accepted,
            domain: None,
        }
    }

    /// Integrate from `t0` toward `tf` until a criterion fires.
    ///
    /// Continuous criteria are checked after every accepted step; when one
    /// changes sign, Brent's method brackets the crossing on the Hermite
    /// interpolant of the step, then pins it down on states integrated from
    /// the step start. The earliest crossing ends the leg.
    /// Discrete criteria end the leg at the last good sample:
    /// non-finite state or time, a domain violation at the current state,
    /// a step below [`step_floor`](Self::step_floor), or the step budget.
    /// Reaching `tf` with no criterion fired ends the leg with
    /// [`Stop::HorizonExhausted`].
    ///
    /// Passing `tf < t0` (with a negative `h0`) integrates backward in time.
    pub fn propagate<S: OdeSystem<T, N>>(
        &mut self,
        sys: &S,
        criteria: &[StopCondition<'_, T, N>],
        t0: T,
        y0: &[T; N],
        tf: T,
        h0: T,
    ) -> Result<Leg<T, N>, IntegrationError> {
        self.reset_stats();
        let mut samples = vec![(t0, *y0)];
        if t0 == tf {
            return Ok(Leg {
                samples,
                stop: Stop::HorizonExhausted,
                stats: self.stats.clone(),
            });
        }
        self.validate_inputs(t0, y0, tf, h0)?;

        let direction = (tf - t0).signum();
        let mut t = t0;
        let mut y = *y0;
        let mut h = h0;
        let mut g_prev: Vec<T> = criteria.iter().map(|c| c.eval(t, &y)).collect();
        let mut step_count = 0u64;

        let stop = loop {
            if (tf - t) * direction <= self.step_floor(t) {
                break Stop::HorizonExhausted;
            }
            if step_count >= self.max_steps {
                break Stop::Criterion(Criterion::StepLimit);
            }
            // Don't overshoot the endpoint
            if (t + h - tf) * direction > T::zero() {
                h = tf - t;
            }

            let result = self.step(sys, t, &y, h);

            if let Some(e) = result.domain {
                break Stop::Criterion(Criterion::DomainViolation(e));
            }
            if is_nan(result.error) {
                break Stop::Criterion(Criterion::NonFinite);
            }

            if result.accepted {
                if !result.t.is_finite() || !result.y.iter().all(|v| v.is_finite()) {
                    break Stop::Criterion(Criterion::NonFinite);
                }

                let g_new: Vec<T> = criteria.iter().map(|c| c.eval(result.t, &result.y)).collect();
                if let Some((i, event)) =
                    self.first_crossing(sys, criteria, t, &y, &result, &g_prev, &g_new)?
                {
                    // An event exactly at the step start replaces that sample
                    if samples.last().map_or(false, |last| last.0 == event.t) {
                        samples.pop();
                    }
                    samples.push((event.t, event.y));
                    break Stop::Criterion(criteria[i].criterion.clone());
                }

                t = result.t;
                y = result.y;
                g_prev = g_new;
                samples.push((t, y));
            }

            h = result.h_next * direction;

            step_count += 1;
            if h.abs() < self.step_floor(t) && (tf - t) * direction > self.step_floor(t) {
                break Stop::Criterion(Criterion::StepCollapse);
            }
        };

        Ok(Leg {
            samples,
            stop,
            stats: self.stats.clone(),
        })
    }

    /// Compute all 13 stages; on failure report the stage index.
    #[allow(clippy::needless_range_loop)]
    fn compute_stages<S: OdeSystem<T, N>>(
        &mut self,
        sys: &S,
        t: T,
        y: &[T; N],
        h: T,
    ) -> Result<(), (usize, DomainError)> {
        let mut y_temp = [T::zero(); N];

        sys.rhs(t, y, &mut self.k[0]).map_err(|e| (0, e))?;

        for i in 1..STAGES {
            for n in 0..N {
                let mut sum = T::zero();
                for j in 0..i {
                    if A[i][j] != 0.0 {
                        sum += stage_weight::<T>(A[i][j]) * self.k[j][n];
                    }
                }
                y_temp[n] = y[n] + h * sum;
            }

            sys.rhs(t + stage_node::<T>(i) * h, &y_temp, &mut self.k[i])
                .map_err(|e| (i, e))?;
        }
        Ok(())
    }

    /// Compute the 8th order solution from the stages
    #[allow(clippy::needless_range_loop)]
    fn compute_solution(&self, y: &[T; N], h: T) -> [T; N] {
        let mut y_new = [T::zero(); N];

        for n in 0..N {
            let mut sum = T::zero();
            for i in 0..STAGES {
                if B[i] != 0.0 {
                    sum += stage_weight::<T>(B[i]) * self.k[i][n];
                }
            }
            y_new[n] = y[n] + h * sum;
        }

        y_new
    }

    /// Infinity norm of the scaled error estimate
    #[allow(clippy::needless_range_loop)]
    fn compute_error(&self, y8: &[T; N], h: T) -> T {
        let mut max_err = T::zero();

        for n in 0..N {
            let mut err_n = T::zero();
            for i in 0..STAGES {
                if B_ERR[i] != 0.0 {
                    err_n += stage_weight::<T>(B_ERR[i]) * self.k[i][n];
                }
            }
            err_n *= h;

            let scale = self.tol.atol[n] + self.tol.rtol[n] * y8[n].abs();
            let scaled_err = err_n.abs() / scale;
            if is_nan(scaled_err) {
                return scaled_err;
            }
            max_err = max_err.max(scaled_err);
        }

        max_err
    }

    /// Reset statistics
    pub fn reset_stats(&mut self) {
        self.stats = Stats::default();
    }

    /// Validate integration inputs
    fn validate_inputs(&self, t0: T, y0: &[T; N], tf: T, h0: T) -> Result<(), IntegrationError> {
        if !t0.is_finite() || !tf.is_finite() || !h0.is_finite() {
            return Err(IntegrationError::InvalidInput {
                message: "t0, tf, and h0 must be finite".to_string(),
            });
        }
        if h0 == T::zero() {
            return Err(IntegrationError::InvalidInput {
                message: "h0 must be non-zero".to_string(),
            });
        }
        if h0.signum() != (tf - t0).signum() {
            return Err(IntegrationError::InvalidInput {
                message: "h0 sign must match integration direction (tf - t0)".to_string(),
            });
        }
        for (i, val) in y0.iter().enumerate() {
            if !val.is_finite() {
                return Err(IntegrationError::InvalidInput {
                    message: format!("y0[{}] is not finite", i),
                });
            }
        }
        for (i, (a, r)) in self.tol.atol.iter().zip(self.tol.rtol.iter()).enumerate() {
            if !a.is_finite() || *a <= T::zero() {
                return Err(IntegrationError::InvalidInput {
                    message: format!("atol[{}] must be positive and finite", i),
                });
            }
            if !r.is_finite() || *r < T::zero() {
                return Err(IntegrationError::InvalidInput {
                    message: format!("rtol[{}] must be non-negative and finite", i),
                });
            }
        }
        Ok(())
    }

    /// Locate the earliest zero crossing among all criteria within the
    /// accepted step `[t_a, step.t]`.
    #[allow(clippy::too_many_arguments)]
    fn first_crossing<S: OdeSystem<T, N>>(
        &mut self,
        sys: &S,
        criteria: &[StopCondition<'_, T, N>],
        t_a: T,
        y_a: &[T; N],
        step: &StepResult<T, N>,
        g_prev: &[T],
        g_new: &[T],
    ) -> Result<Option<(usize, EventResult<T, N>)>, IntegrationError> {
        let crossed: Vec<usize> = (0..criteria.len())
            .filter(|&i| criteria[i].config.crossed(g_prev[i], g_new[i]))
            .collect();
        if crossed.is_empty() {
            return Ok(None);
        }

        // f(t_a, y_a) is stage 0 of the step just taken.
        let f_a = self.k[0];
        let mut f_b = [T::zero(); N];
        self.stats.fn_evals += 1;
        let f_b = match sys.rhs(step.t, &step.y, &mut f_b) {
            Ok(()) => Some(f_b),
            Err(_) => None,
        };
        let interp = StepInterpolant {
            t_a,
            y_a: *y_a,
            f_a: f_b.map(|_| f_a),
            t_b: step.t,
            y_b: step.y,
            f_b,
        };

        let mut best: Option<(usize, EventResult<T, N>)> = None;
        for i in crossed {
            let event = find_event_root(&criteria[i], &interp, g_prev[i], g_new[i])?;
            log::trace!(
                "criterion `{}` crossed zero at t = {} after {} iterations",
                criteria[i].criterion,
                to_f64(event.t),
                event.iterations
            );
            let earlier = match &best {
                Some((_, b)) => (event.t - t_a).abs() < (b.t - t_a).abs(),
                None => true,
            };
            if earlier {
                best = Some((i, event));
            }
        }
        Ok(best.map(|(i, event)| {
            let event = self.settle_event(sys, &criteria[i], &interp, g_prev[i], g_new[i], event);
            (i, event)
        }))
    }

    /// Advance `y` by one unchecked step of size `h`.
    fn advance<S: OdeSystem<T, N>>(&mut self, sys: &S, t: T, y: &[T; N], h: T) -> Option<[T; N]> {
        let result = self.compute_stages(sys, t, y, h);
        self.stats.fn_evals += STAGES as u64;
        result.ok()?;
        Some(self.compute_solution(y, h))
    }

    /// Move a crossing located on the interpolant onto the integrator's own
    /// solution.
    ///
    /// The interpolant root splits the step into a bracket; Brent then runs
    /// on states integrated from the step start, so the event sample carries
    /// the accuracy of an accepted step. Falls back to the interpolated
    /// event when the integrated states leave the model domain or the
    /// bracket is lost.
    #[allow(clippy::too_many_arguments)]
    fn settle_event<S: OdeSystem<T, N>>(
        &mut self,
        sys: &S,
        condition: &StopCondition<'_, T, N>,
        interp: &StepInterpolant<T, N>,
        g_a: T,
        g_b: T,
        event: EventResult<T, N>,
    ) -> EventResult<T, N> {
        let (t_a, t_b) = (interp.t_a, interp.t_b);
        if event.t == t_a {
            return EventResult { y: interp.y_a, ..event };
        }
        if event.t == t_b {
            return EventResult { y: interp.y_b, ..event };
        }

        let y_a = interp.y_a;
        let y_guess = match self.advance(sys, t_a, &y_a, event.t - t_a) {
            Some(y) => y,
            None => return event,
        };
        let g_guess = condition.eval(event.t, &y_guess);
        if g_guess == T::zero() {
            return EventResult {
                y: y_guess,
                g_value: g_guess,
                ..event
            };
        }
        let (lo, g_lo, hi, g_hi) = if g_a * g_guess < T::zero() {
            (t_a, g_a, event.t, g_guess)
        } else {
            (event.t, g_guess, t_b, g_b)
        };

        // Resolve the crossing down to the spacing of representable times
        let scale = t_a.abs().max(t_b.abs());
        let tol = lit::<T>(2.0) * eps::<T>() * scale;
        let solver = BrentSolver::new(tol, condition.config.max_iter.max(100));
        let mut best = if g_lo.abs() <= g_hi.abs() { (lo, g_lo) } else { (hi, g_hi) };
        let mut domain_lost = false;
        // Only the best iterate matters; convergence failures keep it too
        let _ = solver.find_root(
            |t: T| {
                if t == t_b {
                    return g_b;
                }
                match self.advance(sys, t_a, &y_a, t - t_a) {
                    Some(y) => {
                        let g = condition.eval(t, &y);
                        if g.abs() < best.1.abs() {
                            best = (t, g);
                        }
                        g
                    }
                    None => {
                        domain_lost = true;
                        g_guess
                    }
                }
            },
            lo,
            hi,
            Some(g_lo),
            Some(g_hi),
        );
        if domain_lost {
            return EventResult {
                y: y_guess,
                g_value: g_guess,
                ..event
            };
        }

        let t_event = best.0;
        let y_event = if t_event == t_b {
            Some(interp.y_b)
        } else if t_event == event.t {
            Some(y_guess)
        } else {
            self.advance(sys, t_a, &y_a, t_event - t_a)
        };
        match y_event {
            Some(y) => EventResult {
                t: t_event,
                g_value: condition.eval(t_event, &y),
                y,
                iterations: event.iterations,
            },
            None => event,
        }
    }
}

/// Cubic Hermite interpolant across one accepted step.
///
/// Falls back to linear interpolation when the derivative at either end is
/// unavailable.
#[derive(Debug, Clone)]
pub(crate) struct StepInterpolant<T, const N: usize> {
    pub t_a: T,
    pub y_a: [T; N],
    pub f_a: Option<[T; N]>,
    pub t_b: T,
    pub y_b: [T; N],
    pub f_b: Option<[T; N]>,
}

impl<T: Real, const N: usize> StepInterpolant<T, N> {
    #[allow(clippy::needless_range_loop)]
    pub fn eval(&self, t: T) -> [T; N] {
        let dt = self.t_b - self.t_a;
        let alpha = (t - self.t_a) / dt;
        let mut y = [T::zero(); N];
        match (&self.f_a, &self.f_b) {
            (Some(f_a), Some(f_b)) => {
                let (two, three) = (lit::<T>(2.0), lit::<T>(3.0));
                let a2 = alpha * alpha;
                let a3 = a2 * alpha;
                let h00 = T::one() - three * a2 + two * a3;
                let h10 = alpha - two * a2 + a3;
                let h01 = three * a2 - two * a3;
                let h11 = a3 - a2;
                for i in 0..N {
                    y[i] = h00 * self.y_a[i]
                        + h10 * dt * f_a[i]
                        + h01 * self.y_b[i]
                        + h11 * dt * f_b[i];
                }
            }
            _ => {
                for i in 0..N {
                    y[i] = self.y_a[i] + alpha * (self.y_b[i] - self.y_a[i]);
                }
            }
        }
        y
    }
}

fn find_event_root<T: Real, const N: usize>(
    condition: &StopCondition<'_, T, N>,
    interp: &StepInterpolant<T, N>,
    g_a: T,
    g_b: T,
) -> Result<EventResult<T, N>, IntegrationError> {
    let (t_a, t_b) = (interp.t_a, interp.t_b);
    let scale = t_a.abs().max(t_b.abs());
    let tol = condition.config.root_tol.max(lit::<T>(4.0) * eps::<T>() * scale);
    let solver = BrentSolver::new(tol, condition.config.max_iter);

    let eval_g = |t: T| condition.eval(t, &interp.eval(t));

    match solver.find_root(eval_g, t_a, t_b, Some(g_a), Some(g_b)) {
        Ok((t_event, g_value, iterations)) => Ok(EventResult {
            t: t_event,
            y: interp.eval(t_event),
            g_value,
            iterations,
        }),
        Err(BrentError::NotBracketed { .. }) => Err(IntegrationError::EventFindingFailed {
            message: format!(
                "root of `{}` not bracketed despite sign change detection",
                condition.criterion
            ),
        }),
        Err(BrentError::MaxIterations { iterations, .. }) => {
            // Fall back to the end of the step, which lies past the crossing
            Ok(EventResult {
                t: t_b,
                y: interp.y_b,
                g_value: g_b,
                iterations,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventDirection;
    use crate::termination::Severity;

    /// Harmonic oscillator: y'' + ω²y = 0
    struct HarmonicOscillator {
        omega: f64,
    }

    impl OdeSystem<f64, 2> for HarmonicOscillator {
        fn rhs(&self, _t: f64, y: &[f64; 2], dydt: &mut [f64; 2]) -> Result<(), DomainError> {
            dydt[0] = y[1];
            dydt[1] = -self.omega * self.omega * y[0];
            Ok(())
        }
    }

    struct ExpGrowth;

    impl OdeSystem<f64, 1> for ExpGrowth {
        fn rhs(&self, _t: f64, y: &[f64; 1], dydt: &mut [f64; 1]) -> Result<(), DomainError> {
            dydt[0] = y[0];
            Ok(())
        }
    }

    fn run<S: OdeSystem<f64, N>, const N: usize>(
        solver: &mut Rkf78<f64, N>,
        sys: &S,
        t0: f64,
        y0: &[f64; N],
        tf: f64,
        h0: f64,
    ) -> (f64, [f64; N]) {
        let leg = solver.propagate(sys, &[], t0, y0, tf, h0).unwrap();
        assert_eq!(leg.stop, Stop::HorizonExhausted, "unexpected stop {}", leg.stop);
        *leg.final_sample().unwrap()
    }

    #[test]
    fn test_harmonic_oscillator() {
        let sys = HarmonicOscillator { omega: 1.0 };
        let tf = 2.0 * std::f64::consts::PI;
        let mut solver = Rkf78::new(Tolerances::new(1e-12, 1e-12));

        let (t_final, y_final) = run(&mut solver, &sys, 0.0, &[1.0, 0.0], tf, 0.1);

        assert!((t_final - tf).abs() < 1e-10);
        assert!(
            (y_final[0] - 1.0).abs() < 1e-10,
            "y(2π) = {}, expected 1.0",
            y_final[0]
        );
        assert!(y_final[1].abs() < 1e-10, "y'(2π) = {}, expected 0.0", y_final[1]);
    }

    #[test]
    fn test_harmonic_oscillator_f32() {
        let sys = HarmonicOscillatorF32;
        let tf = 2.0 * std::f32::consts::PI;
        let mut solver = Rkf78::<f32, 2>::new(Tolerances::new(1e-6, 1e-6));
        let leg = solver.propagate(&sys, &[], 0.0, &[1.0, 0.0], tf, 0.1).unwrap();
        let (_, y) = leg.final_sample().unwrap();
        assert!((y[0] - 1.0).abs() < 1e-4, "y(2π) = {}", y[0]);
    }

    struct HarmonicOscillatorF32;

    impl OdeSystem<f32, 2> for HarmonicOscillatorF32 {
        fn rhs(&self, _t: f32, y: &[f32; 2], dydt: &mut [f32; 2]) -> Result<(), DomainError> {
            dydt[0] = y[1];
            dydt[1] = -y[0];
            Ok(())
        }
    }

    #[test]
    fn test_exponential_decay() {
        struct ExpDecay;
        impl OdeSystem<f64, 1> for ExpDecay {
            fn rhs(&self, _t: f64, y: &[f64; 1], dydt: &mut [f64; 1]) -> Result<(), DomainError> {
                dydt[0] = -y[0];
                Ok(())
            }
        }

        let tf = 5.0;
        let mut solver = Rkf78::new(Tolerances::new(1e-14, 1e-14));
        let (_, y_final) = run(&mut solver, &ExpDecay, 0.0, &[1.0], tf, 0.1);
        let exact = (-tf).exp();

        let rel_error = (y_final[0] - exact).abs() / exact;
        assert!(rel_error < 1e-11, "Relative error {} too large", rel_error);
    }

    #[test]
    fn test_order_of_convergence() {
        // Single-step refinement on y' = cos(t): local error is O(h^9), so
        // err(h) / err(h/2) should approach 2^9 = 512.
        struct CosODE;
        impl OdeSystem<f64, 1> for CosODE {
            fn rhs(&self, t: f64, _y: &[f64; 1], dydt: &mut [f64; 1]) -> Result<(), DomainError> {
                dydt[0] = t.cos();
                Ok(())
            }
        }

        let tol = Tolerances::new(1.0, 1.0);
        let step_sizes = [1.6, 0.8, 0.4, 0.2];
        let mut errors = Vec::new();
        for &h in &step_sizes {
            let mut solver = Rkf78::new(tol.clone());
            let result = solver.step(&CosODE, 0.0, &[0.0], h);
            assert!(result.accepted, "Step with h={} should be accepted", h);
            errors.push((result.y[0] - h.sin()).abs());
        }

        let mut checked = 0;
        for i in 0..errors.len() - 1 {
            if errors[i + 1] < 1e-15 {
                continue;
            }
            let ratio = errors[i] / errors[i + 1];
            assert!(
                ratio > 100.0 && ratio < 800.0,
                "Error ratio {:.1} outside [100, 800] for h={}/{}",
                ratio,
                step_sizes[i],
                step_sizes[i + 1]
            );
            checked += 1;
        }
        assert!(checked >= 2, "Need at least 2 valid error ratios, got {}", checked);
    }

    #[test]
    fn test_event_finding_exponential() {
        // y' = y, y(0) = 1: y reaches e at t = 1
        let e = std::f64::consts::E;
        let criteria = [StopCondition::new(
            Criterion::Custom("y = e".into()),
            move |_t: f64, y: &[f64; 1]| y[0] - e,
            EventDirection::Rising,
        )];
        let mut solver = Rkf78::new(Tolerances::new(1e-12, 1e-12));
        let leg = solver
            .propagate(&ExpGrowth, &criteria, 0.0, &[1.0], 10.0, 0.1)
            .unwrap();

        assert_eq!(leg.stop, Stop::Criterion(Criterion::Custom("y = e".into())));
        let (t, y) = leg.final_sample().unwrap();
        assert!((t - 1.0).abs() < 1e-10, "Event time {} should be ~1.0", t);
        assert!((y[0] - e).abs() < 1e-10, "y at event {} should be ~e", y[0]);
    }

    #[test]
    fn test_event_state_matches_integrated_solution() {
        // A long step makes the Hermite interpolant visibly inaccurate; the
        // event state must still come from the integrator itself.
        let e = std::f64::consts::E;
        let criteria = [StopCondition::falling(
            Criterion::Custom("y = e".into()),
            move |_t: f64, y: &[f64; 1]| e - y[0],
        )];
        let mut solver = Rkf78::new(Tolerances::new(1e-9, 1e-9));
        let leg = solver
            .propagate(&ExpGrowth, &criteria, 0.0, &[1.0], 10.0, 0.5)
            .unwrap();
        let (t, y) = leg.final_sample().unwrap();
        assert!((y[0] - e).abs() < 1e-12, "y at event {} should be ~e", y[0]);
        assert!(
            (y[0] - t.exp()).abs() < 1e-7,
            "event state {} is not the solution e^t = {}",
            y[0],
            t.exp()
        );
        assert!((t - 1.0).abs() < 1e-7, "event at t = {}", t);
    }

    #[test]
    fn test_constant_components_survive_event() {
        // y₁ is constant; the event sample must carry it bit for bit
        struct DriftWithConstant;
        impl OdeSystem<f64, 2> for DriftWithConstant {
            fn rhs(&self, t: f64, _y: &[f64; 2], dydt: &mut [f64; 2]) -> Result<(), DomainError> {
                dydt[0] = 1.0 + t.sin();
                dydt[1] = 0.0;
                Ok(())
            }
        }
        let criteria = [StopCondition::falling(
            Criterion::Custom("y₀ = 2".into()),
            |_t: f64, y: &[f64; 2]| 2.0 - y[0],
        )];
        let mut solver = Rkf78::new(Tolerances::new(1e-9, 1e-9));
        let leg = solver
            .propagate(&DriftWithConstant, &criteria, 0.0, &[0.0, 399.99], 10.0, 0.5)
            .unwrap();
        let (_, y) = leg.final_sample().unwrap();
        assert_eq!(y[1], 399.99);
        assert!((y[0] - 2.0).abs() < 1e-11, "y₀ at event = {}", y[0]);
    }

    #[test]
    fn test_condition_starting_on_bound_fires() {
        struct Drift;
        impl OdeSystem<f64, 1> for Drift {
            fn rhs(&self, _t: f64, _y: &[f64; 1], dydt: &mut [f64; 1]) -> Result<(), DomainError> {
                dydt[0] = 1.0;
                Ok(())
            }
        }
        // y starts on the bound y = 0 and moves past it at once
        let criteria = [StopCondition::falling(
            Criterion::Custom("bound".into()),
            |_t: f64, y: &[f64; 1]| -y[0],
        )
        .counting_departure()];
        let mut solver = Rkf78::new(Tolerances::new(1e-12, 1e-12));
        let leg = solver.propagate(&Drift, &criteria, 0.0, &[0.0], 1.0, 0.1).unwrap();
        assert_eq!(leg.stop, Stop::Criterion(Criterion::Custom("bound".into())));
        assert_eq!(leg.samples, vec![(0.0, [0.0])]);
    }

    #[test]
    fn test_earliest_of_several_events_wins() {
        let criteria = [
            StopCondition::falling(Criterion::Custom("late".into()), |_t: f64, y: &[f64; 1]| {
                2.2 - y[0]
            }),
            StopCondition::falling(Criterion::Custom("early".into()), |_t: f64, y: &[f64; 1]| {
                2.0 - y[0]
            }),
        ];
        let mut solver = Rkf78::new(Tolerances::new(1e-3, 1e-3));
        let leg = solver
            .propagate(&ExpGrowth, &criteria, 0.0, &[1.0], 3.0, 1.0)
            .unwrap();
        assert_eq!(leg.stop, Stop::Criterion(Criterion::Custom("early".into())));
        let (t, _) = leg.final_sample().unwrap();
        assert!((t - 2f64.ln()).abs() < 1e-2, "event at t = {}", t);
    }

    #[test]
    fn test_no_event_reaches_tf() {
        let criteria = [StopCondition::falling(
            Criterion::Custom("never".into()),
            |_t: f64, y: &[f64; 1]| 1e9 - y[0],
        )];
        let mut solver = Rkf78::new(Tolerances::new(1e-12, 1e-12));
        let leg = solver
            .propagate(&ExpGrowth, &criteria, 0.0, &[1.0], 2.0, 0.1)
            .unwrap();
        assert_eq!(leg.stop, Stop::HorizonExhausted);
        assert_eq!(leg.stop.severity(), Severity::Anomalous);
        let (t, y) = leg.final_sample().unwrap();
        assert!((t - 2.0).abs() < 1e-10);
        assert!((y[0] - 2f64.exp()).abs() < 1e-9);
    }

    #[test]
    fn test_samples_strictly_ordered() {
        let sys = HarmonicOscillator { omega: 1.0 };
        let mut solver = Rkf78::new(Tolerances::new(1e-10, 1e-10));
        let forward = solver.propagate(&sys, &[], 0.0, &[1.0, 0.0], 5.0, 0.1).unwrap();
        assert!(forward.samples.windows(2).all(|w| w[1].0 > w[0].0));
        assert_eq!(forward.samples[0], (0.0, [1.0, 0.0]));

        let backward = solver.propagate(&sys, &[], 0.0, &[1.0, 0.0], -5.0, -0.1).unwrap();
        assert!(backward.samples.windows(2).all(|w| w[1].0 < w[0].0));
        assert!(backward.stats.accepted_steps as usize + 1 == backward.samples.len());
    }

    #[test]
    fn test_backward_integration() {
        let sys = HarmonicOscillator { omega: 1.0 };
        let tf = 2.0 * std::f64::consts::PI;
        let mut solver = Rkf78::new(Tolerances::new(1e-12, 1e-12));

        let (t_final, y_final) = run(&mut solver, &sys, tf, &[1.0, 0.0], 0.0, -0.1);

        assert!(t_final.abs() < 1e-10, "t_final = {}", t_final);
        assert!((y_final[0] - 1.0).abs() < 1e-10);
        assert!(y_final[1].abs() < 1e-10);
    }

    #[test]
    fn test_forward_backward_round_trip() {
        let sys = HarmonicOscillator { omega: 1.0 };
        let tol = Tolerances::new(1e-12, 1e-12);
        let period = 2.0 * std::f64::consts::PI;

        let mut solver = Rkf78::new(tol.clone());
        let (t_mid, y_mid) = run(&mut solver, &sys, 0.0, &[1.0, 0.0], period, 0.1);
        let mut solver2 = Rkf78::new(tol);
        let (t_final, y_final) = run(&mut solver2, &sys, t_mid, &y_mid, 0.0, -0.1);

        assert!(t_final.abs() < 1e-10, "Round-trip t = {}", t_final);
        assert!((y_final[0] - 1.0).abs() < 1e-10);
        assert!(y_final[1].abs() < 1e-10);
    }

    #[test]
    fn test_step_collapse() {
        // A floor far above the tolerance-driven step forces a collapse
        // right after the first accepted step.
        let sys = HarmonicOscillator { omega: 1.0 };
        let mut solver = Rkf78::new(Tolerances::new(1e-14, 1e-14));
        solver.collapse_factor = 1e12;
        let leg = solver.propagate(&sys, &[], 0.0, &[1.0, 0.0], 10.0, 1e-5).unwrap();
        assert_eq!(leg.stop, Stop::Criterion(Criterion::StepCollapse));
        assert_eq!(leg.stop.severity(), Severity::Suspicious);
        assert_eq!(leg.samples.len(), 2);
    }

    #[test]
    fn test_step_limit() {
        let mut solver = Rkf78::new(Tolerances::new(1e-12, 1e-12));
        solver.max_steps = 5;
        let sys = HarmonicOscillator { omega: 1.0 };
        let leg = solver.propagate(&sys, &[], 0.0, &[1.0, 0.0], 100.0, 0.01).unwrap();
        assert_eq!(leg.stop, Stop::Criterion(Criterion::StepLimit));
        assert_eq!(leg.stats.accepted_steps + leg.stats.rejected_steps, 5);
        assert!(leg.samples.len() <= 6);
    }

    #[test]
    fn test_domain_violation_at_start_stops_cleanly() {
        struct PositiveOnly;
        impl OdeSystem<f64, 1> for PositiveOnly {
            fn rhs(&self, _t: f64, y: &[f64; 1], dydt: &mut [f64; 1]) -> Result<(), DomainError> {
                if y[0] <= 0.0 {
                    return Err(DomainError::InvalidVelocity);
                }
                dydt[0] = -1.0;
                Ok(())
            }
        }

        // y decreases linearly and leaves the domain at t = 1
        let mut solver = Rkf78::new(Tolerances::new(1e-12, 1e-12));
        let leg = solver
            .propagate(&PositiveOnly, &[], 0.0, &[1.0], 5.0, 0.3)
            .unwrap();
        match &leg.stop {
            Stop::Criterion(Criterion::DomainViolation(DomainError::InvalidVelocity))
            | Stop::Criterion(Criterion::StepCollapse) => {}
            other => panic!("unexpected stop {}", other),
        }
        let (t, y) = leg.final_sample().unwrap();
        assert!(*t <= 1.0 + 1e-9 && y[0] >= -1e-9, "stopped at t = {}, y = {}", t, y[0]);
    }

    #[test]
    fn test_non_finite_derivative() {
        struct Nan;
        impl OdeSystem<f64, 1> for Nan {
            fn rhs(&self, t: f64, _y: &[f64; 1], dydt: &mut [f64; 1]) -> Result<(), DomainError> {
                dydt[0] = if t > 0.5 { f64::NAN } else { 1.0 };
                Ok(())
            }
        }
        let mut solver = Rkf78::new(Tolerances::new(1e-10, 1e-10));
        let leg = solver.propagate(&Nan, &[], 0.0, &[0.0], 2.0, 0.1).unwrap();
        assert_eq!(leg.stop, Stop::Criterion(Criterion::NonFinite));
        assert!(leg.samples.iter().all(|(t, y)| t.is_finite() && y[0].is_finite()));
    }

    #[test]
    fn test_zero_length_integration() {
        let mut solver = Rkf78::new(Tolerances::new(1e-12, 1e-12));
        let leg = solver.propagate(&ExpGrowth, &[], 5.0, &[42.0], 5.0, 0.1).unwrap();
        assert_eq!(leg.samples, vec![(5.0, [42.0])]);
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let cases: [(Tolerances<f64, 1>, f64, f64); 5] = [
            (Tolerances::new(f64::NAN, 1e-12), 1.0, 0.1),
            (Tolerances::new(f64::INFINITY, 1e-12), 1.0, 0.1),
            (Tolerances::new(-1e-12, 1e-12), 1.0, 0.1),
            (Tolerances::new(1e-12, 1e-12), 1.0, -0.1),
            (Tolerances::new(1e-12, 1e-12), f64::NAN, 0.1),
        ];
        for (tol, tf, h0) in cases {
            let mut solver = Rkf78::new(tol);
            let result = solver.propagate(&ExpGrowth, &[], 0.0, &[1.0], tf, h0);
            assert!(matches!(result, Err(IntegrationError::InvalidInput { .. })));
        }
        let mut solver = Rkf78::new(Tolerances::new(1e-12, 1e-12));
        let result = solver.propagate(&ExpGrowth, &[], 0.0, &[f64::NAN], 1.0, 0.1);
        assert!(matches!(result, Err(IntegrationError::InvalidInput { .. })));
    }

    #[test]
    fn test_step_rejection_with_large_h0() {
        let sys = HarmonicOscillator { omega: 1.0 };
        let tf = 2.0 * std::f64::consts::PI;
        let mut solver = Rkf78::new(Tolerances::new(1e-12, 1e-12));
        let (t_final, y_final) = run(&mut solver, &sys, 0.0, &[1.0, 0.0], tf, 100.0);
        assert!((t_final - tf).abs() < 1e-10);
        assert!((y_final[0] - 1.0).abs() < 1e-9);
        assert!(solver.stats.rejected_steps > 0, "Expected step rejections with h0=100");
    }

    #[test]
    fn test_step_controller_limits() {
        let ctrl = StepController::<f64>::default();
        assert_eq!(ctrl.compute_factor(0.0), ctrl.max_factor);
        assert!((ctrl.compute_factor(1.0) - ctrl.safety).abs() < 1e-15);
        assert_eq!(ctrl.compute_factor(1e-20), ctrl.max_factor);
        assert_eq!(ctrl.compute_factor(1e20), ctrl.min_factor);
        assert_eq!(ctrl.compute_factor(f64::INFINITY), ctrl.min_factor);
        assert_eq!(ctrl.compute_factor(f64::NAN), ctrl.min_factor);
    }

    #[test]
    fn test_hermite_interpolant_is_exact_for_cubics() {
        // y = t³, y' = 3t²
        let interp = StepInterpolant {
            t_a: 1.0f64,
            y_a: [1.0],
            f_a: Some([3.0]),
            t_b: 2.0,
            y_b: [8.0],
            f_b: Some([12.0]),
        };
        for &t in &[1.0f64, 1.25, 1.5, 1.9, 2.0] {
            assert!((interp.eval(t)[0] - t * t * t).abs() < 1e-13);
        }
        let linear = StepInterpolant { f_a: None, f_b: None, ..interp };
        assert!((linear.eval(1.5)[0] - 4.5).abs() < 1e-14);
    }
}
