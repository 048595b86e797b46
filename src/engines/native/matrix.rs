//! Exact rational matrices: determinant, inverse and linear systems

use super::expr::{eval_constant, parse_expression, Value};
use super::rational::Rational;
use super::{NResult, NativeError};
use crate::models::split_top_level;

#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: Vec<Vec<Rational>>,
}

impl Matrix {
    pub fn from_rows(rows: Vec<Vec<Rational>>) -> NResult<Self> {
        let width = rows.first().map(Vec::len).unwrap_or(0);
        if width == 0 || rows.iter().any(|r| r.len() != width) {
            return Err(NativeError::Parse("matrix rows must be non-empty and equal length".to_string()));
        }
        Ok(Self { rows })
    }

    /// Parses `[[1, 2], [3, 4]]`; cells may be any constant expression with
    /// an exact value.
    pub fn parse(text: &str) -> NResult<Self> {
        let trimmed = text.trim();
        let inner = trimmed
            .strip_prefix('[')
            .and_then(|t| t.strip_suffix(']'))
            .ok_or_else(|| NativeError::Parse(format!("not a matrix literal: {}", text)))?;

        let mut rows = Vec::new();
        for row in split_top_level(inner, ',') {
            let cells = row
                .strip_prefix('[')
                .and_then(|t| t.strip_suffix(']'))
                .ok_or_else(|| NativeError::Parse(format!("matrix row is not bracketed: {}", row)))?;
            let parsed = split_top_level(cells, ',')
                .iter()
                .map(|cell| exact_cell(cell))
                .collect::<NResult<Vec<_>>>()?;
            rows.push(parsed);
        }
        Matrix::from_rows(rows)
    }

    pub fn size(&self) -> (usize, usize) {
        (self.rows.len(), self.rows[0].len())
    }

    fn require_square(&self) -> NResult<usize> {
        let (n, m) = self.size();
        if n != m {
            return Err(NativeError::Unsupported(format!("matrix is {}x{}, not square", n, m)));
        }
        Ok(n)
    }

    pub fn determinant(&self) -> NResult<Rational> {
        let n = self.require_square()?;
        let mut a = self.rows.clone();
        let mut det = Rational::ONE;

        for col in 0..n {
            let Some(pivot) = (col..n).find(|&r| !a[r][col].is_zero()) else {
                return Ok(Rational::ZERO);
            };
            if pivot != col {
                a.swap(pivot, col);
                det = det.neg()?;
            }
            det = det.mul(a[col][col])?;
            for r in (col + 1)..n {
                let factor = a[r][col].div(a[col][col])?;
                if factor.is_zero() {
                    continue;
                }
                for c in col..n {
                    a[r][c] = a[r][c].sub(factor.mul(a[col][c])?)?;
                }
            }
        }
        Ok(det)
    }

    pub fn inverse(&self) -> NResult<Matrix> {
        let n = self.require_square()?;
        let mut augmented: Vec<Vec<Rational>> = self
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let mut extended = row.clone();
                extended.extend((0..n).map(|j| if i == j { Rational::ONE } else { Rational::ZERO }));
                extended
            })
            .collect();

        if gauss_jordan(&mut augmented, n)? < n {
            return Err(NativeError::Undefined("matrix is singular".to_string()));
        }
        Matrix::from_rows(augmented.into_iter().map(|row| row[n..].to_vec()).collect())
    }

    pub fn display(&self) -> String {
        let rows: Vec<String> = self
            .rows
            .iter()
            .map(|row| {
                let cells: Vec<String> = row.iter().map(Rational::to_string).collect();
                format!("[{}]", cells.join(", "))
            })
            .collect();
        format!("[{}]", rows.join(", "))
    }

    pub fn decimal_display(&self) -> String {
        let rows: Vec<String> = self
            .rows
            .iter()
            .map(|row| {
                let cells: Vec<String> = row
                    .iter()
                    .map(|r| super::expr::format_float(r.to_f64()))
                    .collect();
                format!("[{}]", cells.join(", "))
            })
            .collect();
        format!("[{}]", rows.join(", "))
    }

    pub fn is_integral(&self) -> bool {
        self.rows.iter().flatten().all(Rational::is_integer)
    }
}

/// Reduced row echelon form over the first `cols` columns, returning the rank.
fn gauss_jordan(a: &mut [Vec<Rational>], cols: usize) -> NResult<usize> {
    let n = a.len();
    let mut rank = 0;
    for col in 0..cols {
        let Some(pivot) = (rank..n).find(|&r| !a[r][col].is_zero()) else {
            continue;
        };
        a.swap(pivot, rank);
        let scale = a[rank][col].recip()?;
        for value in a[rank].iter_mut() {
            *value = value.mul(scale)?;
        }
        for r in 0..n {
            if r == rank || a[r][col].is_zero() {
                continue;
            }
            let factor = a[r][col];
            for c in 0..a[r].len() {
                let delta = factor.mul(a[rank][c])?;
                a[r][c] = a[r][c].sub(delta)?;
            }
        }
        rank += 1;
        if rank == n {
            break;
        }
    }
    Ok(rank)
}

/// Unique solution of a square-or-overdetermined linear system given as
/// augmented rows `[a1 .. an | b]`.
pub fn solve_linear(mut augmented: Vec<Vec<Rational>>, unknowns: usize) -> NResult<Vec<Rational>> {
    let rank = gauss_jordan(&mut augmented, unknowns)?;

    // 0 = b with b != 0
    let inconsistent = augmented
        .iter()
        .any(|row| row[..unknowns].iter().all(Rational::is_zero) && !row[unknowns].is_zero());
    if inconsistent {
        return Err(NativeError::Undefined("system has no solution".to_string()));
    }
    if rank < unknowns {
        return Err(NativeError::Unsupported(
            "system has infinitely many solutions".to_string(),
        ));
    }
    Ok(augmented[..unknowns].iter().map(|row| row[unknowns]).collect())
}

fn exact_cell(cell: &str) -> NResult<Rational> {
    match eval_constant(&parse_expression(cell)?)? {
        Value::Exact(r) => Ok(r),
        Value::Approx(_) => Err(NativeError::Unsupported(format!(
            "matrix entry {} has no exact value",
            cell
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_determinant() {
        let m = Matrix::parse("[[1,2],[3,4]]").unwrap();
        assert_eq!(m.determinant().unwrap(), Rational::integer(-2));

        let singular = Matrix::parse("[[1, 2], [2, 4]]").unwrap();
        assert!(singular.determinant().unwrap().is_zero());

        let m3 = Matrix::parse("[[2, 0, 1], [1, 3, 2], [1, 1, 2]]").unwrap();
        assert_eq!(m3.determinant().unwrap(), Rational::integer(6));
    }

    #[test]
    fn test_inverse() {
        let m = Matrix::parse("[[1, 2], [3, 4]]").unwrap();
        assert_eq!(m.inverse().unwrap().display(), "[[-2, 1], [3/2, -1/2]]");

        let singular = Matrix::parse("[[1, 2], [2, 4]]").unwrap();
        assert!(matches!(singular.inverse(), Err(NativeError::Undefined(_))));
    }

    #[test]
    fn test_linear_system() {
        // x + y = 3, x - y = 1
        let rows = vec![
            vec![Rational::ONE, Rational::ONE, Rational::integer(3)],
            vec![Rational::ONE, Rational::integer(-1), Rational::ONE],
        ];
        let solution = solve_linear(rows, 2).unwrap();
        assert_eq!(solution, vec![Rational::integer(2), Rational::ONE]);
    }

    #[test]
    fn test_rejects_ragged_and_non_square() {
        assert!(Matrix::parse("[[1, 2], [3]]").is_err());
        let wide = Matrix::parse("[[1, 2, 3], [4, 5, 6]]").unwrap();
        assert!(matches!(wide.determinant(), Err(NativeError::Unsupported(_))));
    }
}
