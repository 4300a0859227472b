//! Negative-binomial (NB2) regression with log link, exposure offset and
//! per-column ridge penalties, fitted by penalized IRLS. The dispersion
//! `alpha` is profiled by golden-section search between IRLS passes.

use serde::{Deserialize, Serialize};
use statrs::function::erf::{erfc, erfc_inv};
use statrs::function::gamma::ln_gamma;

const ETA_LIMIT: f64 = 30.0;
const LN_ALPHA_MIN: f64 = -18.420680743952367; // ln(1e-8)
const LN_ALPHA_MAX: f64 = 3.912023005428146; // ln(50)
const GOLDEN_ITERS: usize = 60;
const MAX_OUTER: usize = 25;
const MAX_STEP_HALVINGS: usize = 12;
/// Keeps otherwise unpenalized columns solvable when a feature is constant.
const JITTER: f64 = 1e-8;

/// Dense design for one regression. `x` is row-major `n x p`.
#[derive(Debug, Clone, Default)]
pub struct Design {
    pub columns: Vec<String>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub offset: Vec<f64>,
    pub penalty: Vec<f64>,
}

impl Design {
    pub fn n(&self) -> usize {
        self.y.len()
    }

    pub fn p(&self) -> usize {
        self.columns.len()
    }

    pub fn row(&self, i: usize) -> &[f64] {
        let p = self.p();
        &self.x[i * p..(i + 1) * p]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GlmOptions {
    pub max_iters: usize,
    pub tolerance: f64,
}

impl Default for GlmOptions {
    fn default() -> Self {
        Self {
            max_iters: 100,
            tolerance: 1e-8,
        }
    }
}

/// Poisson fit used as the dispersion baseline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DispersionTest {
    /// Pearson chi-square over residual df under the Poisson fit.
    pub pearson_dispersion: f64,
    pub poisson_log_likelihood: f64,
    /// 2 * (llf_nb - llf_poisson).
    pub lr_statistic: f64,
    /// Boundary-corrected p-value for H0: alpha = 0.
    pub lr_p_value: f64,
    pub overdispersed: bool,
}

#[derive(Debug, Clone)]
pub struct NbFit {
    pub beta: Vec<f64>,
    /// Row-major `p x p` inverse penalized Fisher information.
    pub covariance: Vec<f64>,
    pub alpha: f64,
    pub log_likelihood: f64,
    pub deviance: f64,
    pub pearson_chi2: f64,
    pub iterations: usize,
    pub converged: bool,
    pub dispersion: DispersionTest,
}

impl NbFit {
    pub fn std_error(&self, j: usize) -> f64 {
        let p = self.beta.len();
        self.covariance[j * p + j].max(0.0).sqrt()
    }

    pub fn cov(&self, i: usize, j: usize) -> f64 {
        self.covariance[i * self.beta.len() + j]
    }
}

pub fn fit_negative_binomial(design: &Design, opts: &GlmOptions) -> Result<NbFit, String> {
    let (n, p) = (design.n(), design.p());
    if n == 0 || p == 0 {
        return Err("empty design".to_string());
    }
    if design.x.len() != n * p || design.offset.len() != n || design.penalty.len() != p {
        return Err("design dimensions disagree".to_string());
    }
    let total: f64 = design.y.iter().sum();
    if total <= 0.0 {
        return Err("no events to model".to_string());
    }

    let mut beta = vec![0.0; p];
    if let Some(j) = design.columns.iter().position(|c| c == "intercept") {
        let exposure: f64 = design.offset.iter().map(|o| o.exp()).sum();
        beta[j] = (total / exposure).ln();
    }

    // Poisson baseline.
    let pois = irls(design, &beta, 0.0, opts)?;
    let mu_pois = mean_vector(design, &pois.beta);
    let ll_pois = log_likelihood(&design.y, &mu_pois, 0.0);
    let pearson_pois: f64 = design
        .y
        .iter()
        .zip(&mu_pois)
        .map(|(y, m)| (y - m).powi(2) / m.max(1e-12))
        .sum();
    let df_resid = (n as f64 - p as f64).max(1.0);

    let mut beta = pois.beta.clone();
    let mut alpha = 0.0;
    let mut ll = ll_pois;
    let mut iterations = pois.iterations;
    let mut converged = false;
    for _ in 0..MAX_OUTER {
        let mu = mean_vector(design, &beta);
        alpha = profile_alpha(&design.y, &mu);
        let step = irls(design, &beta, alpha, opts)?;
        iterations += step.iterations;
        beta = step.beta;
        let mu = mean_vector(design, &beta);
        let next = log_likelihood(&design.y, &mu, alpha);
        if !next.is_finite() {
            return Err("log-likelihood is not finite".to_string());
        }
        let delta = (next - ll).abs();
        ll = next;
        if step.converged && delta <= opts.tolerance * (1.0 + ll.abs()) {
            converged = true;
            break;
        }
    }

    let mu = mean_vector(design, &beta);
    let covariance = information_inverse(design, &mu, alpha)
        .ok_or_else(|| "information matrix is singular".to_string())?;
    if beta.iter().chain(&covariance).any(|v| !v.is_finite()) {
        return Err("non-finite coefficients".to_string());
    }

    // The dispersion test leans on the Poisson baseline; it has to settle too.
    let converged = converged && pois.converged;
    let lr = (2.0 * (ll - ll_pois)).max(0.0);
    let lr_p = 0.5 * chi2_1_sf(lr);
    Ok(NbFit {
        deviance: deviance(&design.y, &mu, alpha),
        pearson_chi2: design
            .y
            .iter()
            .zip(&mu)
            .map(|(y, m)| (y - m).powi(2) / (m + alpha * m * m).max(1e-12))
            .sum(),
        beta,
        covariance,
        alpha,
        log_likelihood: ll,
        iterations,
        converged,
        dispersion: DispersionTest {
            pearson_dispersion: pearson_pois / df_resid,
            poisson_log_likelihood: ll_pois,
            lr_statistic: lr,
            lr_p_value: lr_p,
            overdispersed: lr_p < 0.05,
        },
    })
}

struct IrlsOutcome {
    beta: Vec<f64>,
    iterations: usize,
    converged: bool,
}

fn irls(design: &Design, start: &[f64], alpha: f64, opts: &GlmOptions) -> Result<IrlsOutcome, String> {
    let (n, p) = (design.n(), design.p());
    let mut beta = start.to_vec();
    let mut objective = penalized_ll(design, &beta, alpha);
    for iter in 1..=opts.max_iters {
        let mu = mean_vector(design, &beta);
        let mut xtwx = vec![0.0; p * p];
        let mut xtwz = vec![0.0; p];
        for i in 0..n {
            let row = design.row(i);
            let m = mu[i].max(1e-12);
            let w = m / (1.0 + alpha * m);
            let eta_lin: f64 = dot(row, &beta);
            let z = eta_lin + (design.y[i] - m) / m;
            for a in 0..p {
                let wa = w * row[a];
                if wa == 0.0 {
                    continue;
                }
                xtwz[a] += wa * z;
                for b in a..p {
                    xtwx[a * p + b] += wa * row[b];
                }
            }
        }
        for a in 0..p {
            xtwx[a * p + a] += design.penalty[a] + JITTER;
            for b in 0..a {
                xtwx[a * p + b] = xtwx[b * p + a];
            }
        }
        let chol = cholesky(&xtwx, p).ok_or_else(|| format!("singular system at iteration {iter}"))?;
        let target = cholesky_solve(&chol, p, &xtwz);

        // Step halving keeps the penalized likelihood from decreasing.
        let mut step = 1.0;
        let mut candidate = target.clone();
        let mut next = penalized_ll(design, &candidate, alpha);
        let mut halvings = 0;
        while !(next.is_finite() && next >= objective - 1e-12) && halvings < MAX_STEP_HALVINGS {
            step *= 0.5;
            candidate = beta
                .iter()
                .zip(&target)
                .map(|(b, t)| b + step * (t - b))
                .collect();
            next = penalized_ll(design, &candidate, alpha);
            halvings += 1;
        }
        if !next.is_finite() {
            return Err(format!("diverged at iteration {iter}"));
        }

        let max_change = beta
            .iter()
            .zip(&candidate)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        let gain = (next - objective).abs();
        beta = candidate;
        objective = next;
        if max_change < opts.tolerance.sqrt() * 1e-2 || gain <= opts.tolerance * (1.0 + objective.abs()) {
            return Ok(IrlsOutcome {
                beta,
                iterations: iter,
                converged: true,
            });
        }
    }
    Ok(IrlsOutcome {
        beta,
        iterations: opts.max_iters,
        converged: false,
    })
}

fn penalized_ll(design: &Design, beta: &[f64], alpha: f64) -> f64 {
    let mu = mean_vector(design, beta);
    let penalty: f64 = beta
        .iter()
        .zip(&design.penalty)
        .map(|(b, l)| 0.5 * l * b * b)
        .sum();
    log_likelihood(&design.y, &mu, alpha) - penalty
}

pub fn mean_vector(design: &Design, beta: &[f64]) -> Vec<f64> {
    (0..design.n())
        .map(|i| {
            let eta = dot(design.row(i), beta) + design.offset[i];
            eta.clamp(-ETA_LIMIT, ETA_LIMIT).exp()
        })
        .collect()
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// NB2 log-likelihood; `alpha` near zero falls back to Poisson.
pub fn log_likelihood(y: &[f64], mu: &[f64], alpha: f64) -> f64 {
    y.iter()
        .zip(mu)
        .map(|(&y, &m)| {
            let m = m.max(1e-300);
            if alpha < 1e-10 {
                y * m.ln() - m - ln_gamma(y + 1.0)
            } else {
                let r = 1.0 / alpha;
                ln_gamma(y + r) - ln_gamma(r) - ln_gamma(y + 1.0)
                    + r * (r / (r + m)).ln()
                    + y * (m / (r + m)).ln()
            }
        })
        .sum()
}

fn deviance(y: &[f64], mu: &[f64], alpha: f64) -> f64 {
    2.0 * y
        .iter()
        .zip(mu)
        .map(|(&y, &m)| {
            let m = m.max(1e-300);
            let term = if y > 0.0 { y * (y / m).ln() } else { 0.0 };
            if alpha < 1e-10 {
                term - (y - m)
            } else {
                term - (y + 1.0 / alpha) * ((1.0 + alpha * y) / (1.0 + alpha * m)).ln()
            }
        })
        .sum::<f64>()
}

/// Golden-section search of the NB log-likelihood over `ln(alpha)`.
fn profile_alpha(y: &[f64], mu: &[f64]) -> f64 {
    let f = |la: f64| log_likelihood(y, mu, la.exp());
    let inv_phi = (5f64.sqrt() - 1.0) / 2.0;
    let (mut a, mut b) = (LN_ALPHA_MIN, LN_ALPHA_MAX);
    let mut c = b - inv_phi * (b - a);
    let mut d = a + inv_phi * (b - a);
    let (mut fc, mut fd) = (f(c), f(d));
    for _ in 0..GOLDEN_ITERS {
        if fc >= fd {
            b = d;
            d = c;
            fd = fc;
            c = b - inv_phi * (b - a);
            fc = f(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + inv_phi * (b - a);
            fd = f(d);
        }
    }
    ((a + b) / 2.0).exp()
}

fn information_inverse(design: &Design, mu: &[f64], alpha: f64) -> Option<Vec<f64>> {
    let (n, p) = (design.n(), design.p());
    let mut info = vec![0.0; p * p];
    for i in 0..n {
        let row = design.row(i);
        let w = mu[i] / (1.0 + alpha * mu[i]);
        for a in 0..p {
            let wa = w * row[a];
            if wa == 0.0 {
                continue;
            }
            for b in a..p {
                info[a * p + b] += wa * row[b];
            }
        }
    }
    for a in 0..p {
        info[a * p + a] += design.penalty[a] + JITTER;
        for b in 0..a {
            info[a * p + b] = info[b * p + a];
        }
    }
    let chol = cholesky(&info, p)?;
    let mut inv = vec![0.0; p * p];
    let mut unit = vec![0.0; p];
    for j in 0..p {
        unit.iter_mut().for_each(|v| *v = 0.0);
        unit[j] = 1.0;
        let col = cholesky_solve(&chol, p, &unit);
        for i in 0..p {
            inv[i * p + j] = col[i];
        }
    }
    Some(inv)
}

/// Lower-triangular factor of a symmetric positive-definite matrix.
fn cholesky(a: &[f64], p: usize) -> Option<Vec<f64>> {
    let mut l = vec![0.0; p * p];
    for i in 0..p {
        for j in 0..=i {
            let mut sum = a[i * p + j];
            for k in 0..j {
                sum -= l[i * p + k] * l[j * p + k];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[i * p + i] = sum.sqrt();
            } else {
                l[i * p + j] = sum / l[j * p + j];
            }
        }
    }
    Some(l)
}

fn cholesky_solve(l: &[f64], p: usize, b: &[f64]) -> Vec<f64> {
    let mut y = vec![0.0; p];
    for i in 0..p {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[i * p + k] * y[k];
        }
        y[i] = sum / l[i * p + i];
    }
    let mut x = vec![0.0; p];
    for i in (0..p).rev() {
        let mut sum = y[i];
        for k in i + 1..p {
            sum -= l[k * p + i] * x[k];
        }
        x[i] = sum / l[i * p + i];
    }
    x
}

fn chi2_1_sf(x: f64) -> f64 {
    if x <= 0.0 { 1.0 } else { erfc((x / 2.0).sqrt()) }
}

/// Wald summary for one coefficient.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaldStat {
    pub estimate: f64,
    pub std_error: f64,
    pub p_value: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
}

impl WaldStat {
    /// Two-sided interval at level `1 - sig_level`.
    pub fn new(estimate: f64, std_error: f64, sig_level: f64) -> Self {
        let crit = normal_critical(sig_level);
        let p_value = if std_error > 0.0 {
            erfc((estimate / std_error).abs() / std::f64::consts::SQRT_2)
        } else {
            1.0
        };
        Self {
            estimate,
            std_error,
            p_value,
            ci_lower: estimate - crit * std_error,
            ci_upper: estimate + crit * std_error,
        }
    }

    /// Significant only when the interval excludes zero.
    pub fn significant(&self) -> bool {
        self.ci_lower > 0.0 || self.ci_upper < 0.0
    }
}

/// Two-sided standard normal critical value, e.g. 1.96 for 0.05.
pub fn normal_critical(sig_level: f64) -> f64 {
    std::f64::consts::SQRT_2 * erfc_inv(sig_level.clamp(1e-12, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Gamma, Poisson};

    fn simulate(n: usize, beta: [f64; 2], alpha: f64, seed: u64) -> Design {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut d = Design {
            columns: vec!["intercept".into(), "x".into()],
            penalty: vec![0.0, 0.0],
            ..Default::default()
        };
        for _ in 0..n {
            let x: f64 = rng.gen_range(-1.5..1.5);
            let offset = 3.0f64.ln();
            let mu = (beta[0] + beta[1] * x + offset).exp();
            let lambda = if alpha > 0.0 {
                Gamma::new(1.0 / alpha, alpha * mu).unwrap().sample(&mut rng)
            } else {
                mu
            };
            let y = Poisson::new(lambda.max(1e-9)).unwrap().sample(&mut rng);
            d.x.extend([1.0, x]);
            d.y.push(y);
            d.offset.push(offset);
        }
        d
    }

    #[test]
    fn recovers_coefficients_and_dispersion() {
        let d = simulate(4000, [-0.2, 0.4], 0.5, 7);
        let fit = fit_negative_binomial(&d, &GlmOptions::default()).unwrap();
        assert!(fit.converged);
        assert!((fit.beta[0] + 0.2).abs() < 0.1, "{:?}", fit.beta);
        assert!((fit.beta[1] - 0.4).abs() < 0.1, "{:?}", fit.beta);
        assert!((fit.alpha - 0.5).abs() < 0.15, "alpha {}", fit.alpha);
        assert!(fit.dispersion.overdispersed);
        assert!(fit.dispersion.pearson_dispersion > 1.2);
    }

    #[test]
    fn poisson_data_is_not_flagged_overdispersed() {
        let d = simulate(3000, [0.1, -0.3], 0.0, 11);
        let fit = fit_negative_binomial(&d, &GlmOptions::default()).unwrap();
        assert!(fit.alpha < 0.05, "alpha {}", fit.alpha);
        assert!(fit.dispersion.pearson_dispersion < 1.15);
    }

    #[test]
    fn iteration_cap_reports_non_convergence() {
        let d = simulate(500, [-0.2, 0.4], 0.5, 5);
        let opts = GlmOptions {
            max_iters: 1,
            ..Default::default()
        };
        let fit = fit_negative_binomial(&d, &opts).unwrap();
        assert!(!fit.converged);
    }

    #[test]
    fn all_zero_counts_fail() {
        let mut d = simulate(50, [0.0, 0.0], 0.0, 3);
        d.y.iter_mut().for_each(|y| *y = 0.0);
        assert!(fit_negative_binomial(&d, &GlmOptions::default()).is_err());
    }

    #[test]
    fn wald_interval_and_significance() {
        let s = WaldStat::new(0.5, 0.2, 0.05);
        assert!((normal_critical(0.05) - 1.959964).abs() < 1e-5);
        assert!(s.significant());
        assert!((s.p_value - 0.0124).abs() < 1e-3);
        let straddle = WaldStat::new(0.1, 0.2, 0.05);
        assert!(!straddle.significant());
        assert!(!WaldStat::new(-0.1, 0.2, 0.05).significant());
    }

    #[test]
    fn cholesky_inverts_small_system() {
        let a = [4.0, 2.0, 2.0, 3.0];
        let l = cholesky(&a, 2).unwrap();
        let x = cholesky_solve(&l, 2, &[2.0, 1.0]);
        assert!((4.0 * x[0] + 2.0 * x[1] - 2.0).abs() < 1e-12);
        assert!((2.0 * x[0] + 3.0 * x[1] - 1.0).abs() < 1e-12);
        assert!(cholesky(&[0.0, 0.0, 0.0, 0.0], 2).is_none());
    }
}
