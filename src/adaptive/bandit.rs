//! Beta-Bernoulli Thompson sampling over strategy-mix arms.
//!
//! Each arm keeps a Beta(alpha, beta) posterior over its success
//! probability. Selection draws one value per arm from its posterior and
//! picks the argmax; reward observations bump alpha on success and beta on
//! failure. Draws use the inverse CDF of the `statrs` Beta distribution
//! applied to a uniform variate, so a seeded RNG makes selection fully
//! reproducible in tests.

use std::collections::HashMap;

use rand::Rng;
use statrs::distribution::{Beta, ContinuousCDF};

use super::ArmState;

/// Thompson sampler over named arms.
#[derive(Debug, Clone, Default)]
pub struct ThompsonSampler;

impl ThompsonSampler {
    /// Create a sampler.
    pub fn new() -> Self {
        Self
    }

    /// Draw one posterior sample per arm and return the argmax arm name.
    ///
    /// Arms are visited in sorted name order and exact sample ties break on
    /// name, so a seeded RNG yields a deterministic choice. Returns `None`
    /// when no arms exist.
    pub fn select<R: Rng + ?Sized>(
        &self,
        arms: &HashMap<String, ArmState>,
        rng: &mut R,
    ) -> Option<String> {
        let mut names: Vec<&String> = arms.keys().collect();
        names.sort();

        let mut best: Option<(&String, f64)> = None;
        for name in names {
            let arm = &arms[name];
            let draw = Self::draw(arm, rng);
            log::trace!("bandit arm '{name}' drew {draw:.4} (a={}, b={})", arm.alpha, arm.beta);
            match best {
                Some((_, best_draw)) if draw <= best_draw => {}
                _ => best = Some((name, draw)),
            }
        }

        best.map(|(name, _)| name.clone())
    }

    /// One posterior draw via inverse-CDF sampling. Falls back to the
    /// posterior mean if the parameters do not form a valid distribution.
    fn draw<R: Rng + ?Sized>(arm: &ArmState, rng: &mut R) -> f64 {
        let uniform: f64 = rng.random();
        match Beta::new(arm.alpha, arm.beta) {
            Ok(distribution) => distribution.inverse_cdf(uniform),
            Err(_) => arm.expected_value(),
        }
    }
}
