use tracing::warn;

use super::params::Activation;
use crate::utills::rand::{get_random_normal, get_random_uniform};

/// Creates a random vector scaled for an input dimension of `n`.
///
/// # Arguments
/// * `n` - Input dimension for scaling
/// * `size` - Size of the output vector
pub fn xiver_vec(n: usize, size: usize) -> Vec<f32> {
    let sigma = (1.0 / n as f32).sqrt();

    get_random_normal(size, 0.0, sigma)
}

/// Glorot uniform weights of shape `[n_in, n_out]`, row-major.
///
/// Values are drawn from `U(-sqrt(6 / (n_in + n_out)), sqrt(6 / (n_in + n_out)))`
/// and multiplied by 4 for sigmoid units.
pub fn xavier_init(n_in: usize, n_out: usize, activation: Activation) -> Vec<f32> {
    if !matches!(activation, Activation::Tanh | Activation::Sigmoid) {
        warn!(
            ?activation,
            "xavier init used with an activation that is not sigmoidal"
        );
    }
    let bound = (6.0 / (n_in + n_out) as f32).sqrt();
    let mut w = get_random_uniform(n_in * n_out, -bound, bound);
    if activation == Activation::Sigmoid {
        w.iter_mut().for_each(|v| *v *= 4.0);
    }
    w
}

/// Random matrix `[rows, cols]` with orthonormal rows (rows <= cols) or
/// orthonormal columns (rows > cols).
pub fn ortho_weight(rows: usize, cols: usize) -> Vec<f32> {
    let (n_vec, dim) = if rows <= cols { (rows, cols) } else { (cols, rows) };
    let mut vecs: Vec<Vec<f32>> = (0..n_vec).map(|_| get_random_normal(dim, 0.0, 1.0)).collect();

    // Modified Gram-Schmidt in f64 to keep the basis tight.
    let mut basis: Vec<Vec<f64>> = Vec::with_capacity(n_vec);
    for v in vecs.drain(..) {
        let mut u: Vec<f64> = v.iter().map(|&x| x as f64).collect();
        for b in basis.iter() {
            let dot: f64 = u.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
            for (x, y) in u.iter_mut().zip(b.iter()) {
                *x -= dot * y;
            }
        }
        let mut norm = u.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm < 1e-12 {
            // Degenerate draw; restart from a unit axis not yet covered.
            u = vec![0.0; dim];
            u[basis.len()] = 1.0;
            for b in basis.iter() {
                let dot: f64 = u.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
                for (x, y) in u.iter_mut().zip(b.iter()) {
                    *x -= dot * y;
                }
            }
            norm = u.iter().map(|x| x * x).sum::<f64>().sqrt();
        }
        u.iter_mut().for_each(|x| *x /= norm);
        basis.push(u);
    }

    let mut out = vec![0.0f32; rows * cols];
    for (k, b) in basis.iter().enumerate() {
        for (j, &v) in b.iter().enumerate() {
            if rows <= cols {
                out[k * cols + j] = v as f32;
            } else {
                out[j * cols + k] = v as f32;
            }
        }
    }
    out
}
