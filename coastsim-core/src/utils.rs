//! Module containing miscellaneous utility functions.

use std::collections::HashSet;

use crate::imports::*;

/// return max of 2 f64
pub fn max(a: f64, b: f64) -> f64 {
    a.max(b)
}

/// return min of 2 f64
pub fn min(a: f64, b: f64) -> f64 {
    a.min(b)
}

/// return max <f64> of arr, NaN if empty
pub fn ndarrmax(arr: &Array1<f64>) -> f64 {
    arr.iter().copied().reduce(f64::max).unwrap_or(f64::NAN)
}

/// return cumsum <f64> of arr
pub fn ndarrcumsum(arr: &Array1<f64>) -> Array1<f64> {
    arr.iter()
        .scan(0.0, |acc, &x| {
            *acc += x;
            Some(*acc)
        })
        .collect()
}

/// return the unique values of the array, in order of first appearance
pub fn ndarrunique(arr: &Array1<f64>) -> Array1<f64> {
    let mut seen: HashSet<u64> = HashSet::new();
    arr.iter()
        .copied()
        .filter(|x| seen.insert(x.to_bits()))
        .collect()
}

/// Linear interpolation of `y_data` at `x`. Repeated x values keep the first
/// occurrence. Outside the x range the end values are held unless
/// `extrapolate` is set.
pub fn interpolate(x: f64, x_data: &Array1<f64>, y_data: &Array1<f64>, extrapolate: bool) -> f64 {
    let mut xs: Vec<f64> = Vec::with_capacity(x_data.len());
    let mut ys: Vec<f64> = Vec::with_capacity(y_data.len());
    for (&xi, &yi) in x_data.iter().zip(y_data.iter()) {
        if xs.last().map_or(true, |&last| xi > last) {
            xs.push(xi);
            ys.push(yi);
        }
    }
    match xs.len() {
        0 => f64::NAN,
        1 => ys[0],
        size => {
            let i = if x >= xs[size - 2] {
                size - 2
            } else {
                xs.iter()
                    .skip(1)
                    .position(|&xr| x <= xr)
                    .unwrap_or(size - 2)
            };
            let (xl, xr) = (xs[i], xs[i + 1]);
            let (mut yl, mut yr) = (ys[i], ys[i + 1]);
            if !extrapolate {
                if x < xl {
                    yr = yl;
                }
                if x > xr {
                    yl = yr;
                }
            }
            yl + (yr - yl) / (xr - xl) * (x - xl)
        }
    }
}

/// Value of the breakpoint segment containing `x`, where `ys[i]` applies over
/// `(xs[i - 1], xs[i]]`. Values before the first breakpoint take `ys[0]` and
/// values past the last take the last element.
pub fn segment_lookup(x: f64, xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n == 0 {
        return f64::NAN;
    }
    let idx = xs[..n].partition_point(|&xi| xi < x);
    ys[idx.min(n - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ndarrcumsum_expected_output() {
        let arr = Array1::from_vec(vec![0.0, 1.0, 2.0, 3.0]);
        let expected = Array1::from_vec(vec![0.0, 1.0, 3.0, 6.0]);
        assert_eq!(ndarrcumsum(&arr), expected);
    }

    #[test]
    fn test_ndarrunique_keeps_first_appearance_order() {
        let arr = Array1::from_vec(vec![0.02, 0.0, 0.02, 0.0, -0.01]);
        assert_eq!(ndarrunique(&arr), Array1::from_vec(vec![0.02, 0.0, -0.01]));
        assert_eq!(ndarrunique(&Array1::from_vec(vec![0.0, 0.0])).len(), 1);
    }

    #[test]
    fn test_max_of_empty_is_nan() {
        assert!(ndarrmax(&Array1::zeros(0)).is_nan());
        assert_eq!(ndarrmax(&array![1.0, -3.0, 2.0]), 2.0);
    }

    #[test]
    fn test_that_interpolation_works() {
        let xs = Array1::from_vec(vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        let ys = Array1::from_vec(vec![0.0, 10.0, 20.0, 30.0, 40.0]);
        assert_eq!(interpolate(0.5, &xs, &ys, false), 5.0);
        assert!((interpolate(1.0 / 3.0, &xs, &ys, false) - 3.3333333333).abs() < 1e-6);
        assert!((interpolate(3.5, &xs, &ys, false) - 35.0).abs() < 1e-9);
    }

    #[test]
    fn test_interpolate_past_end_without_extrapolate() {
        let xs = Array1::from_vec(vec![0.0, 1.0]);
        let ys = Array1::from_vec(vec![0.0, 10.0]);
        assert!((interpolate(1.01, &xs, &ys, false) - 10.0).abs() < 1e-6);
        assert!((interpolate(-1.0, &xs, &ys, false) - 0.0).abs() < 1e-6);
        assert!((interpolate(2.0, &xs, &ys, true) - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_interpolate_with_x_data_that_repeats() {
        let xs = Array1::from_vec(vec![0.0, 1.0, 1.0, 2.0]);
        let ys = Array1::from_vec(vec![0.0, 10.0, 99.0, 20.0]);
        assert_eq!(interpolate(1.0, &xs, &ys, false), 10.0);
        assert_eq!(interpolate(1.5, &xs, &ys, false), 15.0);
    }

    #[test]
    fn test_segment_lookup_uses_right_closed_segments() {
        let xs = [0.0, 10.0, 20.0];
        let ys = [0.1, 0.2, 0.3];
        assert_eq!(segment_lookup(-5.0, &xs, &ys), 0.1);
        assert_eq!(segment_lookup(0.0, &xs, &ys), 0.1);
        assert_eq!(segment_lookup(0.5, &xs, &ys), 0.2);
        assert_eq!(segment_lookup(10.0, &xs, &ys), 0.2);
        assert_eq!(segment_lookup(10.5, &xs, &ys), 0.3);
        assert_eq!(segment_lookup(50.0, &xs, &ys), 0.3);
    }
}
