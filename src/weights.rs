//! Log-weight bookkeeping shared by the driver: the stabilised logsumexp
//! used throughout spec §4 (stage-1/stage-2 combination, the marginal
//! log-likelihood estimator, and the resample decision), normalisation, and
//! effective sample size.

/// `log(sum(exp(x)))`, stabilised by subtracting the running maximum so it
/// never overflows even when individual log-weights are very negative or
/// very large. Returns `-inf` for an empty or all-`-inf` slice.
pub fn logsumexp(x: &[f64]) -> f64 {
    let m = x.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !m.is_finite() {
        return m;
    }
    let sum: f64 = x.iter().map(|&v| (v - m).exp()).sum();
    m + sum.ln()
}

/// Subtract `max(lw)` from every entry in place.
pub fn normalise(lw: &mut [f64]) {
    let m = lw.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !m.is_finite() {
        return;
    }
    for v in lw.iter_mut() {
        *v -= m;
    }
}

/// Effective sample size of a (not necessarily normalised) log-weight slice:
/// `ESS = (sum w)^2 / sum w^2`, computed in log space to match the scale at
/// which the driver already holds its weights. Always in `[1, P]` for `P`
/// finite, non-degenerate weights.
pub fn ess(lw: &[f64]) -> f64 {
    if lw.is_empty() {
        return 0.0;
    }
    let lse1 = logsumexp(lw);
    let doubled: Vec<f64> = lw.iter().map(|&v| 2.0 * v).collect();
    let lse2 = logsumexp(&doubled);
    (2.0 * lse1 - lse2).exp()
}

/// Convenience bundle returned by the driver's diagnostics, summarising a
/// log-weight vector at one step without exposing the raw slice.
#[derive(Debug, Clone, Copy)]
pub struct WeightSummary {
    pub logsumexp: f64,
    pub ess: f64,
}

pub fn summarise(lw: &[f64]) -> WeightSummary {
    WeightSummary {
        logsumexp: logsumexp(lw),
        ess: ess(lw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logsumexp_of_uniform_log_weights_is_log_p() {
        let lw = vec![0.0; 10];
        assert!((logsumexp(&lw) - (10.0_f64).ln()).abs() < 1e-12);
    }

    #[test]
    fn logsumexp_handles_all_neg_infinity() {
        let lw = vec![f64::NEG_INFINITY; 5];
        assert_eq!(logsumexp(&lw), f64::NEG_INFINITY);
    }

    #[test]
    fn normalise_subtracts_the_max_in_place() {
        let mut lw = vec![1.0, 2.0, 3.0];
        normalise(&mut lw);
        assert!((lw[2] - 0.0).abs() < 1e-12);
        assert!((lw[1] - (-1.0)).abs() < 1e-12);
        assert!((lw[0] - (-2.0)).abs() < 1e-12);
    }

    #[test]
    fn normalise_is_a_no_op_on_all_neg_infinity() {
        let mut lw = vec![f64::NEG_INFINITY; 4];
        normalise(&mut lw);
        assert!(lw.iter().all(|v| *v == f64::NEG_INFINITY));
    }

    #[test]
    fn ess_of_uniform_weights_equals_p() {
        let lw = vec![0.0; 7];
        assert!((ess(&lw) - 7.0).abs() < 1e-9);
    }

    #[test]
    fn ess_of_degenerate_weights_is_one() {
        let mut lw = vec![f64::NEG_INFINITY; 20];
        lw[3] = 0.0;
        assert!((ess(&lw) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn ess_is_bounded_between_one_and_p() {
        let lw = vec![0.0, -1.0, -3.0, 2.0, 0.5];
        let e = ess(&lw);
        assert!(e >= 1.0 - 1e-9 && e <= 5.0 + 1e-9);
    }
}
