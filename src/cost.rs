// SPDX-License-Identifier: Apache-2.0

//! Cost functions over oracle results. Lower is better; every cost is in
//! `[0, 1]`.

use crate::eval::EvalResult;

/// Signature shared by all cost functions.
pub type CostFn = fn(&EvalResult) -> f64;

fn soundness(result: &EvalResult) -> f64 {
    result.sound_prop().clamp(0.0, 1.0)
}

fn precision(result: &EvalResult) -> f64 {
    let reference = result.reference_distance();
    let ratio = if reference == 0 {
        0.0
    } else {
        result.sound_distance() as f64 / reference as f64
    };
    (1.0 - ratio).clamp(0.0, 1.0)
}

fn weighted(a: f64, b: f64, sound: f64, precision: f64) -> f64 {
    (a * (1.0 - sound) + b * (1.0 - precision)) / (a + b)
}

/// Favors precision while still paying for unsoundness.
pub fn sound_and_precise_cost(result: &EvalResult) -> f64 {
    weighted(1.0, 2.0, soundness(result), precision(result))
}

/// Ignores soundness.
pub fn precise_cost(result: &EvalResult) -> f64 {
    weighted(0.0, 1.0, soundness(result), precision(result))
}

/// Weighs soundness over precision; used when searching guard conditions.
pub fn abduction_cost(result: &EvalResult) -> f64 {
    weighted(2.0, 1.0, soundness(result), precision(result))
}

/// Precision only counts once the candidate is fully sound.
pub fn sound_first_cost(result: &EvalResult) -> f64 {
    let sound = soundness(result);
    let precision = if result.is_sound() { precision(result) } else { 0.0 };
    weighted(1.0, 1.0, sound, precision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::WidthResult;
    use test_case::test_case;

    fn result(all: u64, sound: u64, reference: u64, sound_dist: u64) -> EvalResult {
        EvalResult::new(vec![WidthResult {
            bitwidth: 4,
            all_cases: all,
            sound_cases: sound,
            reference_distance: reference,
            sound_distance: sound_dist,
            ..Default::default()
        }])
    }

    #[test]
    fn costs_stay_in_unit_interval() {
        let fns: [CostFn; 4] = [sound_and_precise_cost, precise_cost, abduction_cost, sound_first_cost];
        for all in [0u64, 1, 7, 81] {
            for sound in 0..=all.min(9) {
                for reference in [0u64, 1, 5, 100] {
                    // Includes sound distances above the reference.
                    for sound_dist in [0u64, 1, 5, 100, 1000] {
                        let r = result(all, sound, reference, sound_dist);
                        for f in fns {
                            let c = f(&r);
                            assert!((0.0..=1.0).contains(&c), "cost {c} for {r}");
                        }
                    }
                }
            }
        }
    }

    #[test_case(sound_and_precise_cost, 0.0; "sound and precise")]
    #[test_case(precise_cost, 0.0; "precise")]
    #[test_case(abduction_cost, 0.0; "abduction")]
    #[test_case(sound_first_cost, 0.0; "sound first")]
    fn perfect_candidate_costs_nothing(f: CostFn, want: f64) {
        assert_eq!(f(&result(81, 81, 10, 0)), want);
    }

    #[test]
    fn weights_shift_the_balance() {
        // Unsound but precise.
        let r = result(10, 5, 10, 0);
        assert!((sound_and_precise_cost(&r) - 0.5 / 3.0).abs() < 1e-12);
        assert_eq!(precise_cost(&r), 0.0);
        assert!((abduction_cost(&r) - 1.0 / 3.0).abs() < 1e-12);
        assert!((sound_first_cost(&r) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn zero_reference_distance_means_no_precision() {
        let r = result(10, 10, 0, 0);
        assert_eq!(precise_cost(&r), 0.0);
    }
}
