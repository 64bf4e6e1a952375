use super::norm;
use rayon::prelude::*;
use std::fmt::{self, Debug};
use std::marker::PhantomData;
use std::ops::{AddAssign, Index, IndexMut};

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Row;
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Col;

/// Dense, row-major matrix of feature values
#[derive(Clone, PartialEq)]
pub struct Matrix {
    data: Vec<f64>,
    pub rows: usize,
    pub cols: usize,
}

pub struct Iter<'a, Axis> {
    data: &'a Matrix,
    row: usize,
    col: usize,
    axis: PhantomData<Axis>,
}

impl<'a> Iterator for Iter<'a, Row> {
    type Item = f64;

    fn next(&mut self) -> Option<Self::Item> {
        let x = self.data.get(self.row, self.col);
        self.col += 1;
        x
    }
}

impl<'a> Iterator for Iter<'a, Col> {
    type Item = f64;

    fn next(&mut self) -> Option<Self::Item> {
        let x = self.data.get(self.row, self.col);
        self.row += 1;
        x
    }
}

impl Matrix {
    /// Create a new `Matrix`
    ///
    /// # Panics
    ///
    /// * Panics if `data` does not have len == rows * cols
    pub fn new<T: Into<Vec<f64>>>(t: T, rows: usize, cols: usize) -> Matrix {
        let data = t.into();
        assert_eq!(
            data.len(),
            rows * cols,
            "data passed to Matrix::new() does not have shape ({}, {})",
            rows,
            cols
        );
        Matrix { data, rows, cols }
    }

    pub fn zeros(rows: usize, cols: usize) -> Matrix {
        Matrix {
            data: vec![0.0; rows * cols],
            rows,
            cols,
        }
    }

    pub fn col_vector(data: Vec<f64>) -> Matrix {
        let rows = data.len();
        Matrix {
            data,
            rows,
            cols: 1,
        }
    }

    pub const fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.data.get(self.cols * row + col).copied()
    }

    pub fn row(&self, row: usize) -> Iter<'_, Row> {
        Iter {
            data: self,
            row,
            col: 0,
            axis: PhantomData,
        }
    }

    pub fn col(&self, col: usize) -> Iter<'_, Col> {
        Iter {
            data: self,
            row: 0,
            col,
            axis: PhantomData,
        }
    }

    pub(crate) fn swap_rows(&mut self, i: usize, j: usize) {
        for k in 0..self.cols {
            self.data.swap(self.cols * i + k, self.cols * j + k);
        }
    }

    /// Power iteration for the eigenvector with the largest eigenvalue
    pub fn power_method(&self, initial: &[f64]) -> Vec<f64> {
        let n = norm(initial);
        let mut v = initial.iter().map(|i| i / n).collect::<Vec<_>>();

        let mut last_eig = 0.0;
        for _ in 0..50 {
            let mut v1 = self.dotv(&v);
            let norm = norm(&v1);
            if (norm - last_eig).abs() < 1E-8 {
                break;
            }
            last_eig = norm;
            v1.iter_mut().for_each(|x| *x /= norm);
            v = v1;
        }
        v
    }

    pub fn transpose(&self) -> Matrix {
        if self.cols == 1 || self.rows == 1 {
            let mut mat = self.clone();
            std::mem::swap(&mut mat.cols, &mut mat.rows);
            return mat;
        }
        let mut mat = Matrix::zeros(self.cols, self.rows);
        for row in 0..self.rows {
            for col in 0..self.cols {
                mat[(col, row)] = self[(row, col)]
            }
        }
        mat
    }

    /// Matrix-vector product
    pub fn dotv(&self, rhs: &[f64]) -> Vec<f64> {
        assert_eq!(
            self.cols,
            rhs.len(),
            "lhs has shape ({},{}), rhs has shape (1,{})",
            self.rows,
            self.cols,
            rhs.len()
        );
        (0..self.rows)
            .into_par_iter()
            .map(|row| self.row(row).zip(rhs).fold(0.0, |acc, (x, y)| acc + x * y))
            .collect::<Vec<_>>()
    }

    pub fn dot(&self, rhs: &Matrix) -> Matrix {
        assert_eq!(
            self.cols, rhs.rows,
            "lhs has shape ({},{}), rhs has shape ({},{})",
            self.rows, self.cols, rhs.rows, rhs.cols
        );
        let data = (0..self.rows)
            .into_par_iter()
            .flat_map(|row| {
                (0..rhs.cols).into_par_iter().map(move |col| {
                    self.row(row)
                        .zip(rhs.col(col))
                        .fold(0.0, |acc, (x, y)| acc + x * y)
                })
            })
            .collect::<Vec<_>>();
        Matrix {
            data,
            rows: self.rows,
            cols: rhs.cols,
        }
    }

    /// Mean of each column
    pub fn mean(&self) -> Vec<f64> {
        (0..self.cols)
            .into_par_iter()
            .map(|col| self.col(col).sum::<f64>() / self.rows as f64)
            .collect()
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    fn index(&self, (row, col): (usize, usize)) -> &Self::Output {
        &self.data[self.cols * row + col]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut Self::Output {
        &mut self.data[self.cols * row + col]
    }
}

impl AddAssign<Matrix> for Matrix {
    fn add_assign(&mut self, rhs: Matrix) {
        assert_eq!(
            self.shape(),
            rhs.shape(),
            "matrices must have equal shape to add"
        );
        self.data
            .iter_mut()
            .zip(rhs.data)
            .for_each(|(l, r)| *l += r);
    }
}

impl Debug for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[")?;
        for row in 0..self.rows {
            writeln!(f, "{:?}", self.row(row).collect::<Vec<_>>())?;
        }
        writeln!(f, "]")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dotv() {
        let a = Matrix::new([1., 2., 3., 4.], 2, 2);

        let v0 = a.dotv(&[0.5, 0.5]);
        assert_eq!(v0, vec![1.5, 3.5]);
        let n = norm(&v0);

        let c = v0.iter().map(|v| v / n).collect::<Vec<_>>();
        assert!(c
            .iter()
            .zip(&[0.3939193, 0.91914503])
            .all(|(x, y)| (x - y).abs() <= 0.0001));
    }

    #[test]
    fn transpose() {
        let mat = Matrix::new([1., 2., 3., 4., 5., 6.], 3, 2);
        assert_eq!(mat[(2, 1)], 6.);

        let t = mat.transpose();
        assert_eq!(t.shape(), (2, 3));
        assert_eq!(t.row(0).collect::<Vec<_>>(), vec![1., 3., 5.]);
        assert_eq!(t.row(1).collect::<Vec<_>>(), vec![2., 4., 6.]);
        assert_eq!(t.col(2).collect::<Vec<_>>(), vec![5., 6.]);
    }

    #[test]
    fn dot() {
        #[rustfmt::skip]
        let a = Matrix::new([
            1., 0., 1.,
            2., 1., 1.,
            0., 1., 1.,
            1., 1., 2.
        ], 4, 3);

        #[rustfmt::skip]
        let b = Matrix::new([
            1., 2., 1.,
            2., 3., 1.,
            4., 2., 2.
        ], 3, 3);

        let c = a.dot(&b);
        assert_eq!(c.shape(), (4, 3));
        #[rustfmt::skip]
        assert_eq!(
            c.data,
            vec![
                5., 4., 3.,
                8., 9., 5.,
                6., 5., 3.,
                11., 9., 6.
            ]
        );

        let d = Matrix::new([1., 2., 3., 4., 5., 6.], 2, 3);
        let e = Matrix::col_vector(vec![7., 9., 11.]);
        assert_eq!(d.dot(&e), Matrix::new([58., 139.], 2, 1));
    }

    #[test]
    fn column_means() {
        let m = Matrix::new([1., 10., 3., 20.], 2, 2);
        assert_eq!(m.mean(), vec![2., 15.]);
    }

    #[test]
    #[should_panic]
    fn bad_shape() {
        Matrix::new([1., 2., 3.], 2, 2);
    }
}
