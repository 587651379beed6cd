//! Least-squares layout shared by the calibration fits.
//!
//! Parameters are `[global | local_0 | local_1 | ...]`: a block shared by
//! every view (intrinsics, or the stereo transform) followed by one block per
//! view (a board pose). A view's residuals depend only on the global block
//! and its own local block, so the Jacobian is assembled block by block.

use nalgebra::{DMatrix, DVector};
use stereo_recon_core::{fd_step, LeastSquaresProblem};

pub(crate) trait ViewModel {
    fn num_global(&self) -> usize;
    fn num_local(&self) -> usize;
    fn num_views(&self) -> usize;
    fn view_rows(&self, view: usize) -> usize;

    /// Write the residuals of `view` into `out` (length `view_rows(view)`).
    fn view_residuals(&self, global: &[f64], local: &[f64], view: usize, out: &mut [f64]);
}

pub(crate) struct Bundle<'a, M: ViewModel> {
    model: &'a M,
    offsets: Vec<usize>,
    total: usize,
}

impl<'a, M: ViewModel> Bundle<'a, M> {
    pub fn new(model: &'a M) -> Self {
        let mut offsets = Vec::with_capacity(model.num_views());
        let mut total = 0;
        for v in 0..model.num_views() {
            offsets.push(total);
            total += model.view_rows(v);
        }
        Self {
            model,
            offsets,
            total,
        }
    }

    pub fn num_params(&self) -> usize {
        self.model.num_global() + self.model.num_local() * self.model.num_views()
    }

    fn local_range(&self, view: usize) -> std::ops::Range<usize> {
        let g = self.model.num_global();
        let l = self.model.num_local();
        g + view * l..g + (view + 1) * l
    }

    fn rows(&self, view: usize) -> std::ops::Range<usize> {
        self.offsets[view]..self.offsets[view] + self.model.view_rows(view)
    }

    fn eval_view(&self, p: &[f64], view: usize, out: &mut [f64]) {
        let g = self.model.num_global();
        self.model
            .view_residuals(&p[..g], &p[self.local_range(view)], view, out);
    }

    /// Squared reprojection error per view.
    pub fn view_costs(&self, params: &DVector<f64>) -> Vec<f64> {
        let r = self.residuals(params);
        (0..self.model.num_views())
            .map(|v| r.rows_range(self.rows(v)).norm_squared())
            .collect()
    }
}

impl<M: ViewModel> LeastSquaresProblem for Bundle<'_, M> {
    fn num_residuals(&self) -> usize {
        self.total
    }

    fn residuals(&self, params: &DVector<f64>) -> DVector<f64> {
        let mut out = DVector::zeros(self.total);
        let p = params.as_slice();
        for v in 0..self.model.num_views() {
            let rows = self.rows(v);
            self.eval_view(p, v, &mut out.as_mut_slice()[rows]);
        }
        out
    }

    fn jacobian(&self, params: &DVector<f64>) -> DMatrix<f64> {
        let mut jac = DMatrix::zeros(self.total, params.len());
        let mut p = params.as_slice().to_vec();
        let max_rows = (0..self.model.num_views())
            .map(|v| self.model.view_rows(v))
            .max()
            .unwrap_or(0);
        let mut plus = vec![0.0; max_rows];
        let mut minus = vec![0.0; max_rows];

        // global parameters touch every view
        for k in 0..self.model.num_global() {
            let h = fd_step(params[k]);
            for v in 0..self.model.num_views() {
                let rows = self.rows(v);
                let n = rows.len();
                p[k] = params[k] + h;
                self.eval_view(&p, v, &mut plus[..n]);
                p[k] = params[k] - h;
                self.eval_view(&p, v, &mut minus[..n]);
                p[k] = params[k];
                for (r, row) in rows.enumerate() {
                    jac[(row, k)] = (plus[r] - minus[r]) / (2.0 * h);
                }
            }
        }

        // local parameters touch only their own view
        for v in 0..self.model.num_views() {
            let rows = self.rows(v);
            let n = rows.len();
            for k in self.local_range(v) {
                let h = fd_step(params[k]);
                p[k] = params[k] + h;
                self.eval_view(&p, v, &mut plus[..n]);
                p[k] = params[k] - h;
                self.eval_view(&p, v, &mut minus[..n]);
                p[k] = params[k];
                for (r, row) in rows.clone().enumerate() {
                    jac[(row, k)] = (plus[r] - minus[r]) / (2.0 * h);
                }
            }
        }
        jac
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use stereo_recon_core::numeric_jacobian;

    /// Lines `y = a * x + b_v` sharing a slope, one offset per view.
    struct Lines {
        data: Vec<Vec<(f64, f64)>>,
    }

    impl ViewModel for Lines {
        fn num_global(&self) -> usize {
            1
        }
        fn num_local(&self) -> usize {
            1
        }
        fn num_views(&self) -> usize {
            self.data.len()
        }
        fn view_rows(&self, view: usize) -> usize {
            self.data[view].len()
        }
        fn view_residuals(&self, global: &[f64], local: &[f64], view: usize, out: &mut [f64]) {
            for (o, (x, y)) in out.iter_mut().zip(&self.data[view]) {
                *o = global[0] * x * x + local[0] * x.sin() - y;
            }
        }
    }

    #[test]
    fn blockwise_jacobian_matches_dense() {
        let model = Lines {
            data: vec![
                vec![(0.0, 1.0), (1.0, 3.0), (2.0, 4.0)],
                vec![(0.5, -1.0), (1.5, 2.0)],
            ],
        };
        let bundle = Bundle::new(&model);
        assert_eq!(3, bundle.num_params());
        let p = DVector::from_vec(vec![0.7, -0.3, 1.2]);
        let dense = numeric_jacobian(&p, bundle.num_residuals(), |q| bundle.residuals(q));
        let blocks = bundle.jacobian(&p);
        assert_relative_eq!(dense, blocks, epsilon = 1e-9);
        // view 0 rows do not depend on view 1's offset
        assert_eq!(0.0, blocks[(0, 2)]);
        assert_eq!(0.0, blocks[(4, 1)]);
    }
}
