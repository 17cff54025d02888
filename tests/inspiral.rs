//! End-to-end evolutions through the public API.

use approx::assert_relative_eq;
use nalgebra::{Quaternion, Vector3};
use num_rational::Rational64;
use pn_inspiral::{
    evolve, evolve_with, frequency_from_velocity, up_down_window, Approximant, BinaryParams,
    BinaryState, Criterion, EvolveError, EvolveOptions, PnExpansions, PnOrder,
    ReferenceExpansions, Severity, Stop, TruncatedSeries, PN_VELOCITY,
};

fn omega(params: &BinaryParams<f64>, v: f64) -> f64 {
    frequency_from_velocity(params.total_mass(), v)
}

/// Reference physics plus a transfer of mass from body 2 to body 1.
///
/// `Ṁₐ` carries a factor `ν²`; dividing it out keeps the transfer rate
/// finite as `M₂` runs out, so the donor empties in finite time.
struct MassTransfer {
    rate: f64,
}

impl PnExpansions<f64> for MassTransfer {
    fn flux(&self, state: &BinaryState<f64>, max_power: Option<Rational64>) -> TruncatedSeries<f64> {
        ReferenceExpansions.flux(state, max_power)
    }

    fn binding_energy(
        &self,
        state: &BinaryState<f64>,
        max_power: Option<Rational64>,
    ) -> TruncatedSeries<f64> {
        ReferenceExpansions.binding_energy(state, max_power)
    }

    fn energy_derivative(
        &self,
        state: &BinaryState<f64>,
        max_power: Option<Rational64>,
    ) -> TruncatedSeries<f64> {
        ReferenceExpansions.energy_derivative(state, max_power)
    }

    fn mass_loss(
        &self,
        state: &BinaryState<f64>,
        body: u8,
        max_power: Option<Rational64>,
    ) -> TruncatedSeries<f64> {
        let c = self.rate / (state.nu() * state.nu());
        let c = if body == 2 { -c } else { c };
        TruncatedSeries::constant(PN_VELOCITY, max_power, c)
    }

    fn spin_precession(&self, state: &BinaryState<f64>) -> (Vector3<f64>, Vector3<f64>) {
        ReferenceExpansions.spin_precession(state)
    }
}

#[test]
fn test_nonspinning_inspiral_reaches_v_end() {
    let params = BinaryParams::new(1.0, 0.2);
    let omega_i = omega(&params, 0.1);
    let options = EvolveOptions::default()
        .with_end_frequency(omega(&params, 1.0))
        .with_tolerances(1e-9, 1e-9);

    let evolution = evolve(&params, omega_i, options).unwrap();

    let forward = evolution.forward();
    assert_eq!(
        forward.stop,
        Stop::Criterion(Criterion::EndVelocity),
        "inspiral ended with {}",
        forward.stop
    );
    assert_eq!(forward.stop.severity(), Severity::Graceful);
    assert!(evolution.is_graceful());
    assert_relative_eq!(forward.v_end, 1.0, epsilon = 1e-8);

    let states: Vec<BinaryState<f64>> = evolution.states().collect();
    assert!(
        states.windows(2).all(|w| w[1].phase() > w[0].phase()),
        "orbital phase must increase monotonically"
    );
    assert!(states.windows(2).all(|w| w[1].v() >= w[0].v()));

    let last = evolution.final_state().unwrap();
    // Without spin there is no horizon absorption and no precession
    assert_relative_eq!(last.m1(), 1.0, epsilon = 1e-14);
    assert_relative_eq!(last.m2(), 0.2, epsilon = 1e-14);
    assert_relative_eq!(last.ell_hat(), Vector3::z(), epsilon = 1e-6);
    assert_relative_eq!(last.frame().norm(), 1.0, epsilon = 1e-4);
    // Thousands of orbits from v = 0.1
    assert!(last.phase() > 1e4, "phase {}", last.phase());
}

#[test]
fn test_stitched_trajectory_is_continuous() {
    let params = BinaryParams::new(1.0, 0.5);
    let v_i = 0.2;
    let options = EvolveOptions::default()
        .with_first_frequency(omega(&params, 0.18))
        .with_end_frequency(omega(&params, 0.22))
        .with_tolerances(1e-10, 1e-10);
    let evolution = evolve(&params, omega(&params, v_i), options).unwrap();

    assert!(evolution.is_graceful());
    let backward = evolution.backward().expect("backward leg should run");
    assert_eq!(backward.stop, Stop::Criterion(Criterion::StartVelocity));

    let times: Vec<f64> = evolution.times().collect();
    assert!(
        times.windows(2).all(|w| w[1] > w[0]),
        "stitched times must be strictly increasing"
    );
    assert!(times[0] < 0.0);
    assert_eq!(times.iter().filter(|&&t| t == 0.0).count(), 1);

    let i0 = evolution.initial_index();
    let initial = evolution.states().nth(i0).unwrap();
    assert_relative_eq!(initial.v(), v_i, epsilon = 1e-12);
    assert_eq!(initial.phase(), 0.0);

    assert_relative_eq!(evolution.first_state().unwrap().v(), 0.18, epsilon = 1e-8);
    assert_relative_eq!(evolution.final_state().unwrap().v(), 0.22, epsilon = 1e-8);
    // Backward in time the phase is negative
    assert!(evolution.first_state().unwrap().phase() < 0.0);
}

#[test]
fn test_mass_depletion_is_a_suspicious_stop() {
    let params = BinaryParams::new(1.0, 0.5);
    let options = EvolveOptions::default()
        .with_end_frequency(omega(&params, 0.4))
        .with_tolerances(1e-10, 1e-10);
    let expansions = MassTransfer { rate: 500.0 };

    let evolution = evolve_with(&expansions, &params, omega(&params, 0.2), options)
        .expect("a depleted body ends the leg, it does not fail the evolution");

    let forward = evolution.forward();
    assert_eq!(
        forward.stop,
        Stop::Criterion(Criterion::MassTwoDepleted),
        "inspiral ended with {}",
        forward.stop
    );
    assert_eq!(forward.stop.severity(), Severity::Suspicious);
    assert!(!evolution.is_graceful());
    assert!(evolution.backward().is_none());

    // The trajectory up to the crossing is kept
    assert!(evolution.len() > 2);
    let masses: Vec<f64> = evolution.states().map(|s| s.m2()).collect();
    assert!(masses.windows(2).all(|w| w[1] < w[0]));
    let last = evolution.final_state().unwrap();
    assert!(last.m2().abs() < 1e-9, "final M2 = {}", last.m2());
    assert_relative_eq!(last.m1(), 1.5, epsilon = 1e-9);
    assert!(last.v() < 0.4);
}

#[test]
fn test_up_down_forecast() {
    let params = BinaryParams::new(1.0, 0.3)
        .with_spins(Vector3::new(0.0, 0.0, 0.9), Vector3::new(0.0, 0.0, -0.9));
    let state = BinaryState::new(&params, 0.2).unwrap();
    let window = up_down_window(&state);
    assert!(
        window.v_lower < window.v_upper,
        "expected a non-degenerate window, got {:?}",
        window
    );
    assert!(window.v_lower >= 0.0 && window.v_upper <= 1.0);

    // The driver records the same forecast
    let options = EvolveOptions::default()
        .with_end_frequency(omega(&params, 0.21))
        .with_tolerances(1e-10, 1e-10);
    let evolution = evolve(&params, omega(&params, 0.2), options).unwrap();
    assert_eq!(evolution.up_down(), Some(&window));

    // Flipping both spins removes the instability
    let flipped = BinaryParams::new(1.0, 0.3)
        .with_spins(Vector3::new(0.0, 0.0, -0.9), Vector3::new(0.0, 0.0, 0.9));
    let w = up_down_window(&BinaryState::new(&flipped, 0.2).unwrap());
    assert_eq!(w.v_lower, w.v_upper);
}

#[test]
fn test_precessing_binary_conserves_spin_magnitudes() {
    let chi1 = Vector3::new(0.5, 0.0, 0.5);
    let chi2 = Vector3::new(0.0, -0.4, 0.3);
    let params = BinaryParams::new(1.0, 0.6)
        .with_spins(chi1, chi2)
        .with_order(PnOrder::new(7, 2));
    let options = EvolveOptions::default()
        .with_end_frequency(omega(&params, 0.3))
        .with_tolerances(1e-10, 1e-10)
        .with_approximant(Approximant::TaylorT4);
    let evolution = evolve(&params, omega(&params, 0.25), options).unwrap();
    assert!(evolution.is_graceful());

    for s in evolution.states() {
        assert_relative_eq!(s.chi1().norm(), chi1.norm(), epsilon = 1e-7);
        assert_relative_eq!(s.chi2().norm(), chi2.norm(), epsilon = 1e-7);
        assert_relative_eq!(s.frame().norm(), 1.0, epsilon = 1e-7);
    }

    let last = evolution.final_state().unwrap();
    assert!(
        (last.ell_hat() - Vector3::z()).norm() > 1e-4,
        "orbital plane should precess"
    );
    // Horizon absorption changes the masses only slightly
    assert_relative_eq!(last.m1(), 1.0, epsilon = 1e-5);
}

#[test]
fn test_tidal_binary() {
    let params = BinaryParams::new(1.4, 1.3)
        .with_tidal(400.0, 500.0)
        .with_frame(Quaternion::identity());
    let options = EvolveOptions::default()
        .with_end_frequency(omega(&params, 0.3))
        .with_tolerances(1e-10, 1e-10);
    let evolution = evolve(&params, omega(&params, 0.25), options).unwrap();
    assert!(evolution.is_graceful());

    let last = evolution.final_state().unwrap();
    assert!(last.has_tidal());
    assert_eq!(last.lambda1(), 400.0);
    assert_eq!(last.lambda2(), 500.0);
}

#[test]
fn test_approximants_agree_in_early_inspiral() {
    let params = BinaryParams::new(1.0, 0.4);
    let durations: Vec<f64> = Approximant::ALL
        .iter()
        .map(|&approximant| {
            let options = EvolveOptions::default()
                .with_end_frequency(omega(&params, 0.22))
                .with_tolerances(1e-10, 1e-10)
                .with_approximant(approximant);
            let evolution = evolve(&params, omega(&params, 0.2), options).unwrap();
            assert!(evolution.is_graceful(), "{} did not end gracefully", approximant);
            evolution.forward().t_end
        })
        .collect();

    for d in &durations {
        assert_relative_eq!(*d, durations[0], max_relative = 5e-3);
    }
}

#[test]
fn test_configuration_errors_fail_fast() {
    let params = BinaryParams::new(1.0, 0.2);
    let omega_i = omega(&params, 0.2);

    let result = evolve(
        &params,
        omega_i,
        EvolveOptions::default().with_first_frequency(1.5 * omega_i),
    );
    assert!(matches!(
        result,
        Err(EvolveError::FirstFrequencyAboveInitial { .. })
    ));

    let spinning = BinaryParams::new(1.0, 0.2)
        .with_spins(Vector3::new(0.0, 0.9, 0.9), Vector3::zeros());
    let result = evolve(&spinning, omega_i, EvolveOptions::default());
    assert!(matches!(result, Err(EvolveError::Parameters(_))));

    let result = evolve(&params, omega(&params, 1.05), EvolveOptions::default());
    assert!(matches!(result, Err(EvolveError::BeyondPnValidity { .. })));
}
