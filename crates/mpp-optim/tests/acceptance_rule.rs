use mpp_optim::{accept, acceptance_probability};
use proptest::prelude::*;

proptest! {
    #[test]
    fn improvements_are_always_accepted(delta in -1e6f64..=0.0, temperature in 1e-9f64..1e6) {
        prop_assert_eq!(acceptance_probability(delta, temperature, 1.0), 1.0);
    }

    #[test]
    fn cooling_lowers_acceptance_of_uphill_moves(
        delta in 1e-3f64..10.0,
        hot in 0.5f64..100.0,
        factor in 0.1f64..0.9,
    ) {
        let cold = hot * factor;
        let p_hot = acceptance_probability(delta, hot, 1.0);
        let p_cold = acceptance_probability(delta, cold, 1.0);
        prop_assert!(p_cold < p_hot);
        prop_assert!((p_hot - (-delta / hot).exp()).abs() < 1e-12);
    }

    #[test]
    fn probability_stays_in_unit_interval(
        delta in -100.0f64..100.0,
        temperature in 0.0f64..10.0,
        ratio in 0.0f64..50.0,
    ) {
        let p = acceptance_probability(delta, temperature, ratio);
        prop_assert!((0.0..=1.0).contains(&p));
    }
}

proptest! {
    #[test]
    fn certain_moves_accept_for_every_draw(draw in 0.0f64..1.0, delta in -5.0f64..0.0) {
        prop_assert!(accept(acceptance_probability(delta, 1.0, 1.0), draw));
    }
}
