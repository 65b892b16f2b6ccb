use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::{MlErr, Result};

/// Builds a row-major matrix view over `data`.
///
/// # Arguments
/// * `what` - The name of the matrix for diagnostics.
/// * `data` - The flat row-major elements.
/// * `rows` - The amount of rows.
/// * `cols` - The amount of columns.
///
/// # Returns
/// The view or `ShapeMismatch` if `data` doesn't hold exactly `rows * cols` elements.
pub fn view2<'a>(
    what: &'static str,
    data: &'a [f32],
    rows: usize,
    cols: usize,
) -> Result<ArrayView2<'a, f32>> {
    let expected = rows * cols;
    if data.len() != expected {
        return Err(MlErr::ShapeMismatch {
            what,
            got: data.len(),
            expected,
        });
    }

    ArrayView2::from_shape((rows, cols), data).map_err(|_| MlErr::ShapeMismatch {
        what,
        got: data.len(),
        expected,
    })
}

fn check(what: &'static str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(MlErr::ShapeMismatch {
            what,
            got,
            expected,
        });
    }

    Ok(())
}

/// Computes `(W + scale · A · B) · x`.
///
/// The low-rank correction first projects `x` through `B` into rank space and then
/// expands it through `A`, so it never materializes `A · B`.
///
/// # Arguments
/// * `x` - The input vector, `input_size` long.
/// * `w` - The frozen base weights, `output_size × input_size`.
/// * `a` - The adapter's `A`, `output_size × rank`.
/// * `b` - The adapter's `B`, `rank × input_size`.
/// * `scale` - The adapter scaling factor.
///
/// # Returns
/// The output vector, `output_size` long.
pub fn forward(
    x: ArrayView1<f32>,
    w: ArrayView2<f32>,
    a: ArrayView2<f32>,
    b: ArrayView2<f32>,
    scale: f32,
) -> Result<Array1<f32>> {
    check("base weight columns", w.ncols(), x.len())?;
    check("B columns", b.ncols(), x.len())?;
    check("A rows", a.nrows(), w.nrows())?;
    check("A columns", a.ncols(), b.nrows())?;

    let proj = b.dot(&x);
    let mut out = w.dot(&x);
    out.scaled_add(scale, &a.dot(&proj));
    Ok(out)
}

/// Computes the learning-rate scaled adapter gradients for a single sample.
///
/// `grad_a[o, r] = lr · g[o] · (B · x)[r]` and `grad_b[r, i] = lr · (Aᵀ · g)[r] · x[i]`,
/// both freshly allocated.
///
/// # Arguments
/// * `x` - The input vector.
/// * `grad_out` - The loss gradient with respect to the output.
/// * `a` - The adapter's `A`.
/// * `b` - The adapter's `B`.
/// * `lr` - The learning rate.
///
/// # Returns
/// The gradients for `A` and `B` with their shapes.
pub fn backward(
    x: ArrayView1<f32>,
    grad_out: ArrayView1<f32>,
    a: ArrayView2<f32>,
    b: ArrayView2<f32>,
    lr: f32,
) -> Result<(Array2<f32>, Array2<f32>)> {
    check("B columns", b.ncols(), x.len())?;
    check("A rows", a.nrows(), grad_out.len())?;
    check("A columns", a.ncols(), b.nrows())?;

    let proj = b.dot(&x);
    let back = a.t().dot(&grad_out);

    let grad_a = outer(grad_out, proj.view()) * lr;
    let grad_b = outer(back.view(), x) * lr;
    Ok((grad_a, grad_b))
}

fn outer(u: ArrayView1<f32>, v: ArrayView1<f32>) -> Array2<f32> {
    u.insert_axis(Axis(1)).dot(&v.insert_axis(Axis(0)))
}

/// Elementwise `current - initial`.
pub fn compute_delta(current: &[f32], initial: &[f32]) -> Result<Vec<f32>> {
    check("delta operands", current.len(), initial.len())?;

    let delta = current
        .iter()
        .zip(initial)
        .map(|(cur, init)| cur - init)
        .collect();

    Ok(delta)
}

/// Mean squared error.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mse;

impl Mse {
    pub fn loss(&self, y_pred: ArrayView1<f32>, y: ArrayView1<f32>) -> f32 {
        (&y_pred - &y)
            .mapv(|x| x.powi(2))
            .mean()
            .unwrap_or_default()
    }

    /// The loss derivative, `2/n · (y_pred - y)`.
    pub fn loss_prime(&self, y_pred: ArrayView1<f32>, y: ArrayView1<f32>) -> Array1<f32> {
        (&y_pred - &y) * (2.0 / y_pred.len() as f32)
    }
}
