//! Dense Levenberg-Marquardt for small and medium least-squares problems.
//!
//! Problems expose a residual vector; the Jacobian defaults to central
//! differences and can be overridden where the structure is known. Every
//! attempted step, accepted or not, counts as one iteration against
//! [`TermCriteria::max_iters`]; an accepted step shorter than
//! [`TermCriteria::epsilon`] ends the solve as converged.

use crate::TermCriteria;
use log::trace;
use nalgebra::{DMatrix, DVector};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("problem has {residuals} residuals but {params} parameters")]
    Underdetermined { residuals: usize, params: usize },
    #[error("initial residuals are not finite")]
    NonFiniteStart,
    #[error("normal equations are singular")]
    Singular,
}

/// Nonlinear least-squares problem `min ||r(p)||²`.
pub trait LeastSquaresProblem {
    fn num_residuals(&self) -> usize;

    /// Residual vector at `params`, length [`Self::num_residuals`].
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64>;

    fn jacobian(&self, params: &DVector<f64>) -> DMatrix<f64> {
        numeric_jacobian(params, self.num_residuals(), |p| self.residuals(p))
    }
}

/// Central-difference step for one parameter.
#[inline]
pub fn fd_step(value: f64) -> f64 {
    1e-6 * value.abs().max(1.0)
}

/// Central-difference Jacobian of `f` at `params`.
pub fn numeric_jacobian<F>(params: &DVector<f64>, rows: usize, mut f: F) -> DMatrix<f64>
where
    F: FnMut(&DVector<f64>) -> DVector<f64>,
{
    let mut jac = DMatrix::zeros(rows, params.len());
    let mut p = params.clone();
    for k in 0..params.len() {
        let h = fd_step(params[k]);
        p[k] = params[k] + h;
        let plus = f(&p);
        p[k] = params[k] - h;
        let minus = f(&p);
        p[k] = params[k];
        jac.set_column(k, &((plus - minus) / (2.0 * h)));
    }
    jac
}

/// Outcome of a solve.
#[derive(Clone, Debug, PartialEq)]
pub struct LmReport {
    pub iterations: usize,
    /// Sum of squared residuals before the first step.
    pub initial_cost: f64,
    /// Sum of squared residuals at the returned parameters.
    pub final_cost: f64,
    /// `true` when a step fell below the criterion's epsilon.
    pub converged: bool,
}

#[derive(Clone, Debug)]
pub struct LevenbergMarquardt {
    pub criteria: TermCriteria,
    pub initial_lambda: f64,
}

impl LevenbergMarquardt {
    pub fn new(criteria: TermCriteria) -> Self {
        Self {
            criteria,
            initial_lambda: 1e-3,
        }
    }

    /// Minimize in place; `params` holds the best estimate on return.
    pub fn minimize<P>(
        &self,
        problem: &P,
        params: &mut DVector<f64>,
    ) -> Result<LmReport, SolverError>
    where
        P: LeastSquaresProblem + ?Sized,
    {
        let n = params.len();
        let m = problem.num_residuals();
        if m < n {
            return Err(SolverError::Underdetermined {
                residuals: m,
                params: n,
            });
        }

        let mut r = problem.residuals(params);
        let mut cost = r.norm_squared();
        if !cost.is_finite() {
            return Err(SolverError::NonFiniteStart);
        }
        let initial_cost = cost;

        let mut lambda = self.initial_lambda;
        let mut jac = problem.jacobian(params);
        let mut jtj = jac.tr_mul(&jac);
        let mut jtr = jac.tr_mul(&r);

        let mut iterations = 0;
        let mut converged = false;
        while !self.criteria.exhausted(iterations) {
            iterations += 1;

            let mut a = jtj.clone();
            for k in 0..n {
                a[(k, k)] += lambda * jtj[(k, k)].max(1e-12);
            }
            let delta = solve_normal(a, &jtr).ok_or(SolverError::Singular)?;

            let candidate = &*params - &delta;
            let r_new = problem.residuals(&candidate);
            let cost_new = r_new.norm_squared();

            if cost_new.is_finite() && cost_new < cost {
                let step = delta.norm();
                *params = candidate;
                r = r_new;
                cost = cost_new;
                lambda = (lambda / 10.0).max(1e-12);
                trace!("lm iter {iterations}: cost {cost:.6e} step {step:.3e}");

                if self.criteria.converged(step) {
                    converged = true;
                    break;
                }
                jac = problem.jacobian(params);
                jtj = jac.tr_mul(&jac);
                jtr = jac.tr_mul(&r);
            } else {
                lambda = (lambda * 10.0).min(1e12);
                trace!("lm iter {iterations}: rejected, lambda {lambda:.1e}");
            }
        }

        Ok(LmReport {
            iterations,
            initial_cost,
            final_cost: cost,
            converged,
        })
    }
}

fn solve_normal(a: DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    if let Some(chol) = a.clone().cholesky() {
        return Some(chol.solve(b));
    }
    let x = a.lu().solve(b)?;
    x.iter().all(|v| v.is_finite()).then_some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Fit `y = a * exp(b * x)`.
    struct ExpFit {
        xs: Vec<f64>,
        ys: Vec<f64>,
    }

    impl LeastSquaresProblem for ExpFit {
        fn num_residuals(&self) -> usize {
            self.xs.len()
        }

        fn residuals(&self, p: &DVector<f64>) -> DVector<f64> {
            DVector::from_iterator(
                self.xs.len(),
                self.xs
                    .iter()
                    .zip(&self.ys)
                    .map(|(x, y)| p[0] * (p[1] * x).exp() - y),
            )
        }
    }

    #[test]
    fn fits_exponential() {
        let xs: Vec<f64> = (0..20).map(|i| i as f64 * 0.1).collect();
        let ys = xs.iter().map(|x| 2.5 * (-1.3 * x).exp()).collect();
        let problem = ExpFit { xs, ys };

        let mut p = DVector::from_vec(vec![1.0, 0.0]);
        let solver = LevenbergMarquardt::new(TermCriteria::new(100, 1e-10));
        let report = solver.minimize(&problem, &mut p).unwrap();

        assert!(report.final_cost < 1e-16);
        assert_relative_eq!(p[0], 2.5, epsilon = 1e-6);
        assert_relative_eq!(p[1], -1.3, epsilon = 1e-6);
    }

    #[test]
    fn iteration_cap_is_respected() {
        let xs: Vec<f64> = (0..20).map(|i| i as f64 * 0.1).collect();
        let ys = xs.iter().map(|x| 2.5 * (-1.3 * x).exp()).collect();
        let problem = ExpFit { xs, ys };

        let mut p = DVector::from_vec(vec![1.0, 0.0]);
        let solver = LevenbergMarquardt::new(TermCriteria::new(2, 0.0));
        let report = solver.minimize(&problem, &mut p).unwrap();
        assert_eq!(2, report.iterations);
        assert!(!report.converged);
        assert!(report.final_cost <= report.initial_cost);
    }

    #[test]
    fn rejects_underdetermined_problem() {
        let problem = ExpFit {
            xs: vec![0.0],
            ys: vec![1.0],
        };
        let mut p = DVector::from_vec(vec![1.0, 0.0]);
        let err = LevenbergMarquardt::new(TermCriteria::default())
            .minimize(&problem, &mut p)
            .unwrap_err();
        assert_eq!(
            SolverError::Underdetermined {
                residuals: 1,
                params: 2
            },
            err
        );
    }

    #[test]
    fn numeric_jacobian_matches_analytic() {
        let p = DVector::from_vec(vec![0.7, -0.2]);
        let jac = numeric_jacobian(&p, 2, |q| {
            DVector::from_vec(vec![q[0] * q[0] + q[1], q[0] * q[1].sin()])
        });
        assert_relative_eq!(jac[(0, 0)], 1.4, epsilon = 1e-7);
        assert_relative_eq!(jac[(0, 1)], 1.0, epsilon = 1e-7);
        assert_relative_eq!(jac[(1, 0)], (-0.2f64).sin(), epsilon = 1e-7);
        assert_relative_eq!(jac[(1, 1)], 0.7 * (-0.2f64).cos(), epsilon = 1e-7);
    }
}
