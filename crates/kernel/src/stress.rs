//! Neo-Hookean hyperelastic constitutive model.
//!
//! Converts a particle's deformation gradient into the pre-scaled Kirchhoff
//! stress term consumed directly by the P2G affine momentum transfer:
//!
//! ```text
//! J = det(F)
//! P = mu * (F - F^-T) + lambda * ln(J) * F^-T
//! term = -(4 * V0 * inv_dx^2) * (P * F^T)
//! ```
//!
//! At `F = I` the term is exactly zero (`J = 1`, `ln J = 0`, `F - F^-T = 0`).

use glam::Mat3;

use crate::StepError;

/// Compute the pre-scaled Neo-Hookean stress term for one particle.
///
/// A non-finite or non-positive Jacobian means the simulation has gone
/// degenerate (timestep or stiffness too large); the logarithm is undefined
/// there, so this reports [`StepError::NonPositiveJacobian`] instead of
/// letting NaN propagate through the grid.
pub fn neo_hookean_term(
    deformation: Mat3,
    initial_volume: f32,
    mu: f32,
    lambda: f32,
    inv_dx: f32,
    particle: usize,
) -> Result<Mat3, StepError> {
    let jacobian = deformation.determinant();
    if !jacobian.is_finite() || jacobian <= 0.0 {
        return Err(StepError::NonPositiveJacobian { particle, jacobian });
    }

    let f_inv_t = deformation.inverse().transpose();
    let piola = (deformation - f_inv_t) * mu + f_inv_t * (lambda * jacobian.ln());
    Ok(piola * deformation.transpose() * -(initial_volume * 4.0 * inv_dx * inv_dx))
}
