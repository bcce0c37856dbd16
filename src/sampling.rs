use anyhow::{Result, bail, ensure};

/// Largest value strictly below one, the upper end of a residual draw.
const MAX_DRAW: f64 = 1.0 - f64::EPSILON / 2.0;

/// Select an index from `weights` using a uniform `draw` in `[0, 1)`.
///
/// The draw is scaled by the sum of the weights and located on the cumulative
/// sum. Returns the selected index together with the residual draw, which is
/// the position of the scaled draw inside the selected element's interval,
/// renormalized to `[0, 1)`. The residual can be passed on to a nested
/// selection, so a single uniform number resolves a whole chain of choices.
///
/// # Errors
/// Returns an error if the weights do not have a positive, finite sum.
pub fn weighted_random(draw: f64, weights: &[f64]) -> Result<(usize, f64)> {
    let total: f64 = weights.iter().filter(|&&w| w > 0.0).sum();
    if !(total > 0.0 && total.is_finite()) {
        bail!("weights must have a positive finite sum, but sum to {total}");
    }
    ensure!(
        (0.0..1.0).contains(&draw),
        "draw must be in the range [0, 1), but is {draw}"
    );

    let scaled = draw * total;
    let mut cum = 0.0;
    let mut last = None;
    for (idx, &weight) in weights.iter().enumerate() {
        if weight <= 0.0 {
            continue;
        }
        let start = cum;
        cum += weight;
        last = Some((idx, start, weight));
        if scaled < cum {
            return Ok((idx, residual(scaled, start, weight)));
        }
    }

    // Rounding can leave the scaled draw on the final boundary.
    match last {
        Some((idx, start, weight)) => Ok((idx, residual(scaled, start, weight))),
        None => bail!("no positive weight to select"),
    }
}

fn residual(scaled: f64, start: f64, weight: f64) -> f64 {
    ((scaled - start) / weight).clamp(0.0, MAX_DRAW)
}

/// How many individuals a group request asks for.
///
/// Negative values select the whole pool, values in `[0, 1)` a (truncated)
/// fraction of it, and values of at least one an exact count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupSize(pub f64);

impl GroupSize {
    pub const ALL: GroupSize = GroupSize(-1.0);

    pub fn resolve(self, pool: usize) -> Result<usize> {
        let GroupSize(size) = self;
        ensure!(!size.is_nan(), "group size must be a number");
        let count = if size < 0.0 {
            pool
        } else if size < 1.0 {
            (size * pool as f64) as usize
        } else {
            size as usize
        };
        if count > pool {
            bail!("requested {count} individuals, but only {pool} are available");
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand_chacha::ChaCha12Rng;

    #[test]
    fn selection_respects_cumulative_bounds() {
        let mut rng = ChaCha12Rng::seed_from_u64(7);
        let weights = [0.5, 0.0, 2.0, 1.5, 0.0, 1.0];
        let total: f64 = weights.iter().sum();
        for _ in 0..10_000 {
            let draw: f64 = rng.random();
            let (idx, res) = weighted_random(draw, &weights).unwrap();
            let before: f64 = weights[..idx].iter().sum();
            let after = before + weights[idx];
            let scaled = draw * total;
            assert!(weights[idx] > 0.0);
            assert!(before <= scaled && scaled < after, "{before} {scaled} {after}");
            assert!((0.0..1.0).contains(&res));
        }
    }

    #[test]
    fn residual_is_position_within_interval() {
        let (idx, res) = weighted_random(0.5, &[1.0, 1.0, 2.0]).unwrap();
        assert_eq!(idx, 2);
        assert!(res.abs() < 1e-12);

        let (idx, res) = weighted_random(0.125, &[1.0, 1.0, 2.0]).unwrap();
        assert_eq!(idx, 0);
        assert!((res - 0.5).abs() < 1e-12);
    }

    #[test]
    fn residual_draws_stay_uniform() {
        let mut rng = ChaCha12Rng::seed_from_u64(11);
        let weights = [3.0, 1.0, 0.5];
        let n_draws = 20_000;
        let mut n_low = 0;
        for _ in 0..n_draws {
            let (_, res) = weighted_random(rng.random(), &weights).unwrap();
            if res < 0.5 {
                n_low += 1;
            }
        }
        let frac = n_low as f64 / n_draws as f64;
        assert!((frac - 0.5).abs() < 0.02, "{frac}");
    }

    #[test]
    fn zero_weights_are_rejected() {
        assert!(weighted_random(0.3, &[0.0, 0.0]).is_err());
        assert!(weighted_random(0.3, &[]).is_err());
    }

    #[test]
    fn draw_near_one_selects_last_positive() {
        let draw = 1.0 - f64::EPSILON;
        let (idx, res) = weighted_random(draw, &[1.0, 2.0, 0.0]).unwrap();
        assert_eq!(idx, 1);
        assert!(res < 1.0);
    }

    #[test]
    fn group_sizes() {
        assert_eq!(GroupSize::ALL.resolve(7).unwrap(), 7);
        assert_eq!(GroupSize(0.5).resolve(7).unwrap(), 3);
        assert_eq!(GroupSize(0.0).resolve(7).unwrap(), 0);
        assert_eq!(GroupSize(4.0).resolve(7).unwrap(), 4);
        assert!(GroupSize(8.0).resolve(7).is_err());
    }
}
