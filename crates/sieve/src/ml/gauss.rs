//! Gauss-Jordan elimination for solution of systems of linear equations
//!
//! LDA requires the leading eigenvector of inv(Sw).dot(Sb). Rather than
//! inverting the within-class scatter matrix, we solve Sw.dot(x) = Sb and
//! then run power iteration on x.

use super::matrix::Matrix;

/// Solve `left.dot(x) = right` for x in a single Gauss-Jordan pass.
///
/// Columns without a usable pivot (constant features) are skipped and leave
/// a zero row behind. Returns `None` if `left` does not reduce to a diagonal
/// of ones and zeros.
pub fn solve(mut left: Matrix, mut right: Matrix) -> Option<Matrix> {
    let (rows, cols) = left.shape();
    let mut pivot_row = 0;

    for col in 0..cols {
        if pivot_row == rows {
            break;
        }

        // Partial pivoting on the largest magnitude
        let (best, magnitude) = (pivot_row..rows)
            .map(|row| (row, left[(row, col)].abs()))
            .fold((pivot_row, 0.0), |acc, x| if x.1 > acc.1 { x } else { acc });
        if magnitude == 0.0 {
            continue;
        }
        if best != pivot_row {
            left.swap_rows(best, pivot_row);
            right.swap_rows(best, pivot_row);
        }

        let scale = left[(pivot_row, col)];
        for j in col..cols {
            left[(pivot_row, j)] /= scale;
        }
        for j in 0..right.cols {
            right[(pivot_row, j)] /= scale;
        }
        left[(pivot_row, col)] = 1.0;

        for row in (0..rows).filter(|&row| row != pivot_row) {
            let factor = left[(row, col)];
            if factor == 0.0 {
                continue;
            }
            for j in col..cols {
                left[(row, j)] -= left[(pivot_row, j)] * factor;
            }
            for j in 0..right.cols {
                right[(row, j)] -= right[(pivot_row, j)] * factor;
            }
            left[(row, col)] = 0.0;
        }
        pivot_row += 1;
    }

    reduced(&left).then_some(right)
}

fn reduced(left: &Matrix) -> bool {
    (0..left.rows).all(|i| {
        (0..left.cols).all(|j| match (i == j, left[(i, j)]) {
            (true, x) => x == 1.0 || x == 0.0,
            (false, x) => x == 0.0,
        })
    })
}
