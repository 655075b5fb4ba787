use ndarray::{Array2, ArrayView2};

use crate::components::band::Resampling;

/// Fits `array` onto a `(rows, cols)` pixel grid covering the same extent.
pub fn resample(array: ArrayView2<f64>, shape: (usize, usize), resampling: Resampling) -> Array2<f64> {
    if array.dim() == shape {
        return array.to_owned();
    }
    let (src_rows, src_cols) = array.dim();
    if src_rows == 0 || src_cols == 0 {
        return Array2::from_elem(shape, f64::NAN);
    }
    let ratio = (
        src_rows as f64 / shape.0 as f64,
        src_cols as f64 / shape.1 as f64,
    );
    match resampling {
        Resampling::Nearest => Array2::from_shape_fn(shape, |(row, col)| {
            let src_row = nearest_index(row, ratio.0, src_rows);
            let src_col = nearest_index(col, ratio.1, src_cols);
            array[[src_row, src_col]]
        }),
        Resampling::Average => Array2::from_shape_fn(shape, |(row, col)| {
            let rows = window(row, ratio.0, src_rows);
            let cols = window(col, ratio.1, src_cols);
            let (sum, count) = array
                .slice(ndarray::s![rows.0..rows.1, cols.0..cols.1])
                .iter()
                .filter(|value| value.is_finite())
                .fold((0., 0usize), |(sum, count), value| (sum + value, count + 1));
            if count == 0 {
                f64::NAN
            } else {
                sum / count as f64
            }
        }),
        Resampling::Bilinear => Array2::from_shape_fn(shape, |(row, col)| {
            let (row0, row1, fy) = neighbours(row, ratio.0, src_rows);
            let (col0, col1, fx) = neighbours(col, ratio.1, src_cols);
            let top = array[[row0, col0]] * (1. - fx) + array[[row0, col1]] * fx;
            let bottom = array[[row1, col0]] * (1. - fx) + array[[row1, col1]] * fx;
            top * (1. - fy) + bottom * fy
        }),
        Resampling::Cubic => Array2::from_shape_fn(shape, |(row, col)| {
            let y = centre(row, ratio.0, src_rows);
            let x = centre(col, ratio.1, src_cols);
            let (y0, x0) = (y.floor(), x.floor());
            let mut value = 0.;
            for m in -1..=2 {
                let wy = keys_kernel(y - (y0 + m as f64));
                let src_row = clamp_index(y0 as isize + m, src_rows);
                for n in -1..=2 {
                    let wx = keys_kernel(x - (x0 + n as f64));
                    let src_col = clamp_index(x0 as isize + n, src_cols);
                    value += wy * wx * array[[src_row, src_col]];
                }
            }
            value
        }),
    }
}

fn nearest_index(idx: usize, ratio: f64, len: usize) -> usize {
    (((idx as f64 + 0.5) * ratio) as usize).min(len - 1)
}

/// Source pixels `[start, end)` covered by destination pixel `idx`.
fn window(idx: usize, ratio: f64, len: usize) -> (usize, usize) {
    let start = ((idx as f64 * ratio).floor() as usize).min(len - 1);
    let end = (((idx + 1) as f64 * ratio).ceil() as usize).clamp(start + 1, len);
    (start, end)
}

/// Source coordinate of the centre of destination pixel `idx`,
/// in source pixel centre units.
fn centre(idx: usize, ratio: f64, len: usize) -> f64 {
    ((idx as f64 + 0.5) * ratio - 0.5).clamp(0., (len - 1) as f64)
}

fn neighbours(idx: usize, ratio: f64, len: usize) -> (usize, usize, f64) {
    let position = centre(idx, ratio, len);
    let lower = position.floor() as usize;
    (lower, (lower + 1).min(len - 1), position - lower as f64)
}

fn clamp_index(idx: isize, len: usize) -> usize {
    idx.clamp(0, len as isize - 1) as usize
}

fn keys_kernel(t: f64) -> f64 {
    const A: f64 = -0.5;
    let t = t.abs();
    if t <= 1. {
        (A + 2.) * t.powi(3) - (A + 3.) * t.powi(2) + 1.
    } else if t < 2. {
        A * t.powi(3) - 5. * A * t.powi(2) + 8. * A * t - 4. * A
    } else {
        0.
    }
}
