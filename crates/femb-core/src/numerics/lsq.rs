use faer::Mat;

const SINGULAR_PIVOT_EPSILON: f64 = 1.0e-12;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LeastSquaresError {
    #[error("least-squares design requires at least one row and one column")]
    EmptyDesign,
    #[error("design has {rows} rows but {values} values and {weights} weights were supplied")]
    ShapeMismatch {
        rows: usize,
        values: usize,
        weights: usize,
    },
    #[error("normal matrix is not positive definite at pivot index {pivot_index}")]
    NotPositiveDefinite { pivot_index: usize },
}

/// Solution of a weighted linear least-squares problem `values ~ design * parameters`.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedLeastSquares {
    parameters: Vec<f64>,
    covariance: Mat<f64>,
    chi_square: f64,
    row_count: usize,
}

impl WeightedLeastSquares {
    pub fn parameters(&self) -> &[f64] {
        &self.parameters
    }

    pub fn parameter(&self, index: usize) -> f64 {
        self.parameters[index]
    }

    pub fn covariance(&self) -> &Mat<f64> {
        &self.covariance
    }

    /// One-sigma uncertainty from the covariance diagonal.
    pub fn uncertainty(&self, index: usize) -> f64 {
        self.covariance[(index, index)].max(0.0).sqrt()
    }

    pub fn chi_square(&self) -> f64 {
        self.chi_square
    }

    pub fn degrees_of_freedom(&self) -> Option<usize> {
        self.row_count.checked_sub(self.parameters.len())
    }
}

/// Solve by Cholesky factorization of the weighted normal equations.
///
/// Weights are inverse variances; the covariance is the inverse normal matrix.
pub fn solve_weighted_least_squares(
    design: &Mat<f64>,
    values: &[f64],
    weights: &[f64],
) -> Result<WeightedLeastSquares, LeastSquaresError> {
    let rows = design.nrows();
    let cols = design.ncols();
    if rows == 0 || cols == 0 {
        return Err(LeastSquaresError::EmptyDesign);
    }
    if values.len() != rows || weights.len() != rows {
        return Err(LeastSquaresError::ShapeMismatch {
            rows,
            values: values.len(),
            weights: weights.len(),
        });
    }

    let mut normal = Mat::<f64>::zeros(cols, cols);
    let mut rhs = vec![0.0; cols];
    for row in 0..rows {
        let weight = weights[row];
        for lhs_col in 0..cols {
            let lhs = design[(row, lhs_col)] * weight;
            if lhs == 0.0 {
                continue;
            }
            rhs[lhs_col] += lhs * values[row];
            for rhs_col in 0..cols {
                normal[(lhs_col, rhs_col)] += lhs * design[(row, rhs_col)];
            }
        }
    }

    let factor = cholesky_factorize(&normal)?;
    let parameters = cholesky_solve(&factor, &rhs);

    let mut covariance = Mat::<f64>::zeros(cols, cols);
    let mut basis = vec![0.0; cols];
    for col in 0..cols {
        basis.fill(0.0);
        basis[col] = 1.0;
        let column = cholesky_solve(&factor, &basis);
        for row in 0..cols {
            covariance[(row, col)] = column[row];
        }
    }

    let mut chi_square = 0.0;
    for row in 0..rows {
        let mut prediction = 0.0;
        for col in 0..cols {
            prediction += design[(row, col)] * parameters[col];
        }
        let residual = values[row] - prediction;
        chi_square += weights[row] * residual * residual;
    }

    Ok(WeightedLeastSquares {
        parameters,
        covariance,
        chi_square,
        row_count: rows,
    })
}

fn cholesky_factorize(matrix: &Mat<f64>) -> Result<Mat<f64>, LeastSquaresError> {
    let dimension = matrix.nrows();
    let scale = (0..dimension)
        .map(|index| matrix[(index, index)].abs())
        .fold(0.0_f64, f64::max);
    let threshold = SINGULAR_PIVOT_EPSILON * scale.max(f64::MIN_POSITIVE);

    let mut lower = Mat::<f64>::zeros(dimension, dimension);
    for col in 0..dimension {
        let mut diagonal = matrix[(col, col)];
        for inner in 0..col {
            diagonal -= lower[(col, inner)] * lower[(col, inner)];
        }
        if !(diagonal > threshold) {
            return Err(LeastSquaresError::NotPositiveDefinite { pivot_index: col });
        }
        let pivot = diagonal.sqrt();
        lower[(col, col)] = pivot;

        for row in (col + 1)..dimension {
            let mut value = matrix[(row, col)];
            for inner in 0..col {
                value -= lower[(row, inner)] * lower[(col, inner)];
            }
            lower[(row, col)] = value / pivot;
        }
    }

    Ok(lower)
}

fn cholesky_solve(lower: &Mat<f64>, rhs: &[f64]) -> Vec<f64> {
    let dimension = lower.nrows();

    let mut forward = vec![0.0; dimension];
    for row in 0..dimension {
        let mut value = rhs[row];
        for col in 0..row {
            value -= lower[(row, col)] * forward[col];
        }
        forward[row] = value / lower[(row, row)];
    }

    let mut solution = vec![0.0; dimension];
    for row in (0..dimension).rev() {
        let mut value = forward[row];
        for col in (row + 1)..dimension {
            value -= lower[(col, row)] * solution[col];
        }
        solution[row] = value / lower[(row, row)];
    }

    solution
}
