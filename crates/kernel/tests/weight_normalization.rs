//! The quadratic B-spline transfer weights must form a partition of unity:
//! for any fractional offset, the three per-axis weights sum to 1, and the 27
//! products covering a particle's stencil therefore also sum to 1. This is
//! the property that makes the P2G scatter mass-conserving.

use glam::Vec3;
use mpm_kernel::transfer::quadratic_weights;

#[test]
fn per_axis_weights_sum_to_one() {
    // The fractional offset produced by base_cell is always in [0.5, 1.5).
    let mut f = 0.5f32;
    while f < 1.5 {
        let w = quadratic_weights(Vec3::splat(f));
        let sum = w[0].x + w[1].x + w[2].x;
        assert!(
            (sum - 1.0).abs() < 1.0e-6,
            "axis weights at fraction {f} sum to {sum}"
        );
        f += 2.5e-4;
    }
}

#[test]
fn stencil_products_sum_to_one() {
    for frac in [
        Vec3::new(0.5, 0.5, 0.5),
        Vec3::new(1.0, 1.0, 1.0),
        Vec3::new(0.625, 1.25, 0.875),
        Vec3::new(1.49, 0.51, 1.0),
    ] {
        let w = quadratic_weights(frac);
        let mut sum = 0.0f32;
        for x in 0..3 {
            for y in 0..3 {
                for z in 0..3 {
                    sum += w[x].x * w[y].y * w[z].z;
                }
            }
        }
        assert!(
            (sum - 1.0).abs() < 1.0e-6,
            "stencil weights at {frac:?} sum to {sum}"
        );
    }
}

#[test]
fn weights_are_non_negative() {
    let mut f = 0.5f32;
    while f < 1.5 {
        let w = quadratic_weights(Vec3::splat(f));
        for v in w {
            assert!(v.x >= -1.0e-7, "negative weight {v:?} at fraction {f}");
        }
        f += 1.0e-3;
    }
}
