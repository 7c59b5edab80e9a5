use std::time::Instant;

use argmin::{
    core::{
        observers::{Observe, ObserverMode},
        Error, Executor, Operator, State, KV,
    },
    solver::conjugategradient::ConjugateGradient,
};
use argmin_observer_slog::SlogLogger;
use indicatif::ProgressBar;
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{factorization::CscCholesky, CscMatrix, CsrMatrix};
use serde::{Deserialize, Serialize};

use crate::{
    assembly::{csr_mul_vec, TripletAccumulator},
    error::{FeaError, Result},
};

/// `Auto` switches to conjugate gradient above this size; dense fallbacks
/// and the rank diagnostic stop here too
pub const DIRECT_SIZE_LIMIT: usize = 2000;
/// Relative pivot and singular-value threshold for singularity detection
pub const SINGULAR_TOLERANCE: f64 = 1e-10;
pub const MIN_CG_ITER: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverMethod {
    /// Direct below `DIRECT_SIZE_LIMIT` or without the symmetric hint,
    /// conjugate gradient otherwise
    Auto,
    Direct,
    Iterative,
}

impl SolverMethod {
    pub fn from_key(key: &str) -> Option<SolverMethod> {
        match key.to_lowercase().as_str() {
            "auto" => Some(SolverMethod::Auto),
            "direct" => Some(SolverMethod::Direct),
            "iterative" | "cg" => Some(SolverMethod::Iterative),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverSettings {
    pub method: SolverMethod,
    /// The reduced matrix is symmetric positive definite
    pub symmetric: bool,
    /// Relative residual target of the iterative solver
    pub tolerance: f64,
    /// Iteration cap; `None` means 10 per unknown, at least `MIN_CG_ITER`
    pub max_iterations: Option<u64>,
    /// Log every conjugate gradient iteration to the terminal
    pub trace_iterations: bool,
    pub progress: bool,
}

impl Default for SolverSettings {
    fn default() -> Self {
        SolverSettings {
            method: SolverMethod::Auto,
            symmetric: true,
            tolerance: 1e-10,
            max_iterations: None,
            trace_iterations: false,
            progress: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveInfo {
    /// Method actually used
    pub method: SolverMethod,
    pub iterations: Option<u64>,
    /// ||b - Ax|| / ||b||
    pub residual_norm: f64,
}

/// Runs multiplication for Conjugate Gradient Solver
struct ConjugateGradientOperator<'a> {
    a: &'a CsrMatrix<f64>,
}

impl<'a> Operator for ConjugateGradientOperator<'a> {
    type Param = Vec<f64>;
    type Output = Vec<f64>;

    fn apply(&self, x: &Self::Param) -> std::result::Result<Self::Output, Error> {
        Ok(csr_mul_vec(self.a, x))
    }
}

/// Observer bar for argmin solver. Position tracks the residual on a
/// log scale between its first value and the target.
struct ConjugateGradientObserverBar {
    bar: ProgressBar,
    initial_mag: Option<f64>,
    final_mag: f64,
}

impl ConjugateGradientObserverBar {
    fn new(target_cost: f64) -> ConjugateGradientObserverBar {
        ConjugateGradientObserverBar {
            bar: ProgressBar::new(1000),
            initial_mag: None,
            final_mag: target_cost.log10(),
        }
    }
}

impl<I> Observe<I> for ConjugateGradientObserverBar
where
    I: State<Float = f64>,
{
    fn observe_init(
        &mut self,
        _name: &str,
        _state: &I,
        _kv: &KV,
    ) -> std::result::Result<(), Error> {
        Ok(())
    }

    fn observe_iter(&mut self, state: &I, _kv: &KV) -> std::result::Result<(), Error> {
        let cost = state.get_cost();
        if !cost.is_finite() || cost <= 0.0 {
            return Ok(());
        }
        let cost_mag = cost.log10();
        let initial_mag = *self.initial_mag.get_or_insert(cost_mag);
        let span = initial_mag - self.final_mag;
        if span > 0.0 {
            let fraction = ((initial_mag - cost_mag) / span).clamp(0.0, 1.0);
            self.bar.set_position((1000.0 * fraction) as u64);
        }
        Ok(())
    }

    fn observe_final(&mut self, _state: &I) -> std::result::Result<(), Error> {
        self.bar.finish_and_clear();
        Ok(())
    }
}

fn relative_residual(a: &CsrMatrix<f64>, x: &DVector<f64>, b: &DVector<f64>) -> f64 {
    let ax = DVector::from_vec(csr_mul_vec(a, x.as_slice()));
    let b_norm = b.norm();
    if b_norm == 0.0 {
        ax.norm()
    } else {
        (b - ax).norm() / b_norm
    }
}

/// Rank deficiency from the singular values, relative to the largest one
fn rank_deficiency(dense: DMatrix<f64>) -> usize {
    let n = dense.nrows();
    let svd = dense.svd(false, false);
    let max_sv = svd.singular_values.max();
    if max_sv <= 0.0 {
        return n;
    }
    n - svd.rank(SINGULAR_TOLERANCE * max_sv)
}

/// The SVD diagnostic is dense, so it only runs up to `DIRECT_SIZE_LIMIT`
fn singular(a: &CsrMatrix<f64>, detail: &str) -> FeaError {
    let rank_deficiency = if a.nrows() <= DIRECT_SIZE_LIMIT {
        Some(rank_deficiency(DMatrix::from(a))).filter(|d| *d > 0)
    } else {
        None
    };
    FeaError::SingularSystem {
        rank_deficiency,
        detail: detail.to_owned(),
    }
}

fn matrix_diagonal(a: &CsrMatrix<f64>) -> Vec<f64> {
    let mut diagonal = vec![0.0; a.nrows()];
    for (i, j, v) in a.triplet_iter() {
        if i == j {
            diagonal[i] += *v;
        }
    }
    diagonal
}

/// Sparse Cholesky factor of a symmetric matrix. `None` when the matrix is
/// not positive definite; a singular system when a pivot vanishes relative
/// to the largest diagonal entry.
fn sparse_cholesky(a: &CsrMatrix<f64>, max_diag: f64) -> Result<Option<CscCholesky<f64>>> {
    let cholesky = match CscCholesky::factor(&CscMatrix::from(a)) {
        Ok(cholesky) => cholesky,
        Err(err) => {
            debug!("sparse cholesky failed: {err:?}");
            return Ok(None);
        }
    };
    let min_pivot = cholesky
        .l()
        .triplet_iter()
        .filter(|(i, j, _)| i == j)
        .map(|(_, _, l)| l * l)
        .fold(f64::INFINITY, f64::min);
    if min_pivot < SINGULAR_TOLERANCE * max_diag {
        return Err(singular(a, "cholesky pivot vanished"));
    }
    Ok(Some(cholesky))
}

/// Sparse Cholesky when the symmetric hint holds. Dense LU covers systems
/// without the hint and small indefinite ones.
fn run_direct(a: &CsrMatrix<f64>, b: &DVector<f64>, symmetric: bool) -> Result<DVector<f64>> {
    let n = b.len();
    let max_diag = matrix_diagonal(a).iter().fold(0.0_f64, |m, d| m.max(d.abs()));
    if max_diag == 0.0 {
        return Err(singular(a, "matrix has an empty diagonal"));
    }

    if symmetric {
        if let Some(cholesky) = sparse_cholesky(a, max_diag)? {
            let rhs = DMatrix::from_column_slice(n, 1, b.as_slice());
            let x = cholesky.solve(&rhs);
            return Ok(x.column(0).into_owned());
        }
        if n > DIRECT_SIZE_LIMIT {
            return Err(singular(a, "matrix is not positive definite"));
        }
        debug!("cholesky failed, falling back to LU");
    } else if n > DIRECT_SIZE_LIMIT {
        warn!("factorising {n} unknowns with dense LU");
    }

    let lu = DMatrix::from(a).lu();
    let u_diag = lu.u().diagonal();
    let max_u = u_diag.amax();
    if max_u == 0.0 || u_diag.iter().any(|u| u.abs() < SINGULAR_TOLERANCE * max_u) {
        return Err(singular(a, "LU pivot vanished"));
    }
    match lu.solve(b) {
        Some(x) if x.iter().all(|v| v.is_finite()) => Ok(x),
        _ => Err(singular(a, "LU factorization failed")),
    }
}

/// Solves a system of equations using the conjugate gradient method on the
/// Jacobi-scaled system `D^-1/2 A D^-1/2 y = D^-1/2 b`, `x = D^-1/2 y`.
///
/// Returns the solution and the number of iterations.
fn run_conjugate_gradient(
    a: &CsrMatrix<f64>,
    b: &DVector<f64>,
    settings: &SolverSettings,
) -> Result<(DVector<f64>, u64)> {
    let n = b.len();
    let diagonal = matrix_diagonal(a);
    if let Some(row) = diagonal.iter().position(|d| *d <= 0.0 || !d.is_finite()) {
        return Err(FeaError::SingularSystem {
            rank_deficiency: None,
            detail: format!("non-positive diagonal entry in row {row}"),
        });
    }
    // a load orthogonal to a null space still converges, so definiteness
    // is settled by the factorisation
    let max_diag = diagonal.iter().fold(0.0_f64, |m, d| m.max(*d));
    if sparse_cholesky(a, max_diag)?.is_none() {
        return Err(singular(a, "matrix is not positive definite"));
    }
    if b.norm() == 0.0 {
        return Ok((DVector::zeros(n), 0));
    }
    let scale: Vec<f64> = diagonal.iter().map(|d| 1.0 / d.sqrt()).collect();

    let mut scaled = TripletAccumulator::with_capacity(a.nnz());
    for (i, j, v) in a.triplet_iter() {
        scaled.push(i, j, v * scale[i] * scale[j]);
    }
    let scaled = scaled.to_csr(n)?;
    let b_scaled: Vec<f64> = b.iter().zip(&scale).map(|(v, s)| v * s).collect();

    let b_norm = b_scaled.iter().map(|v| v * v).sum::<f64>().sqrt();
    let target_cost = settings.tolerance * b_norm;
    let max_iters = settings
        .max_iterations
        .unwrap_or_else(|| (10 * n as u64).max(MIN_CG_ITER));

    let solver: ConjugateGradient<_, f64> = ConjugateGradient::new(b_scaled);
    let initial_guess: Vec<f64> = vec![0.0; n];
    let operator = ConjugateGradientOperator { a: &scaled };

    let mut executor = Executor::new(operator, solver).configure(|state| {
        state
            .param(initial_guess)
            .max_iters(max_iters)
            .target_cost(target_cost)
    });
    if settings.progress {
        executor = executor.add_observer(
            ConjugateGradientObserverBar::new(target_cost),
            ObserverMode::NewBest,
        );
    }
    if settings.trace_iterations {
        executor = executor.add_observer(SlogLogger::term(), ObserverMode::Always);
    }

    let res = match executor.run() {
        Ok(r) => r,
        Err(err) => {
            return Err(FeaError::Solver(format!(
                "Conjugate Gradient error: {err}"
            )))
        }
    };

    let iterations = res.state().get_iter();
    let best_param = match &res.state().best_param {
        Some(vec) => DVector::from_vec(vec.clone()),
        None => {
            return Err(FeaError::Solver(
                "Conjugate Gradient could not produce best parameter".to_owned(),
            ))
        }
    };
    if best_param.iter().any(|v| !v.is_finite()) {
        return Err(FeaError::SingularSystem {
            rank_deficiency: None,
            detail: "conjugate gradient broke down".to_owned(),
        });
    }
    if iterations >= max_iters && res.state().get_best_cost() > target_cost {
        return Err(FeaError::Solver(format!(
            "Conjugate Gradient did not converge in {max_iters} iterations (residual {:e})",
            res.state().get_best_cost()
        )));
    }

    let x = DVector::from_iterator(n, best_param.iter().zip(&scale).map(|(y, s)| y * s));
    Ok((x, iterations))
}

/// Solves `A x = b` for the reduced system
pub fn solve(
    a: &CsrMatrix<f64>,
    b: &DVector<f64>,
    settings: &SolverSettings,
) -> Result<(DVector<f64>, SolveInfo)> {
    let n = b.len();
    if a.nrows() != n || a.ncols() != n {
        return Err(FeaError::Solver(format!(
            "Matrix of size {}x{} does not match right-hand side of length {n}",
            a.nrows(),
            a.ncols()
        )));
    }

    let method = match settings.method {
        SolverMethod::Auto if settings.symmetric && n > DIRECT_SIZE_LIMIT => {
            SolverMethod::Iterative
        }
        SolverMethod::Auto => SolverMethod::Direct,
        SolverMethod::Iterative if !settings.symmetric => {
            return Err(FeaError::Solver(
                "Conjugate gradient needs a symmetric positive definite system".to_owned(),
            ))
        }
        other => other,
    };

    if n == 0 {
        return Ok((
            DVector::zeros(0),
            SolveInfo {
                method,
                iterations: None,
                residual_norm: 0.0,
            },
        ));
    }

    info!("solving {n} unknowns with the {method:?} solver...");
    let start = Instant::now();

    let (x, iterations) = match method {
        SolverMethod::Iterative => {
            let (x, iterations) = run_conjugate_gradient(a, b, settings)?;
            (x, Some(iterations))
        }
        _ => (run_direct(a, b, settings.symmetric)?, None),
    };

    let residual_norm = relative_residual(a, &x, b);
    let elapsed = start.elapsed().as_secs_f32();
    info!("solved system in {:.3} seconds", elapsed);
    if let Some(iterations) = iterations {
        info!(
            "conjugate gradient used {iterations} iterations, relative residual {residual_norm:e}"
        );
    }

    Ok((
        x,
        SolveInfo {
            method,
            iterations,
            residual_norm,
        },
    ))
}
