//! Background Eulerian grid: a fixed-resolution lattice of momentum/mass
//! accumulators, plus the grid-update stage (normalization, gravity, boundary
//! conditions).

use glam::{IVec3, Vec4};

/// Cells within this many nodes of a domain face have the velocity component
/// normal to that face zeroed by [`Grid::update`].
pub const BOUNDARY_MARGIN: u32 = 2;

/// Cells with less accumulated mass than this are left untouched by the grid
/// update (expected for empty space, not an error).
pub const MIN_CELL_MASS: f32 = 1.0e-5;

/// Fixed-resolution background grid.
///
/// Each node stores a single `Vec4`: xyz hold momentum while P2G accumulates,
/// then velocity after [`Grid::update`] normalizes; w holds accumulated mass
/// throughout. Storage is x-major: node `(x, y, z)` lives at
/// `(x * r + y) * r + z`.
#[derive(Debug, Clone)]
pub struct Grid {
    resolution: u32,
    cells: Vec<Vec4>,
}

impl Grid {
    /// Allocate a zeroed grid with `resolution` nodes per axis.
    pub fn new(resolution: u32) -> Self {
        let r = resolution as usize;
        Self {
            resolution,
            cells: vec![Vec4::ZERO; r * r * r],
        }
    }

    /// Nodes per axis.
    #[inline]
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Total node count.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    fn index(&self, node: IVec3) -> usize {
        let r = self.resolution as i32;
        ((node.x * r + node.y) * r + node.z) as usize
    }

    /// Whether `node` lies on the lattice.
    #[inline]
    pub fn contains(&self, node: IVec3) -> bool {
        let r = self.resolution as i32;
        node.cmpge(IVec3::ZERO).all() && node.cmplt(IVec3::splat(r)).all()
    }

    /// Momentum/velocity (xyz) and mass (w) of a node.
    #[inline]
    pub fn velocity_mass(&self, node: IVec3) -> Vec4 {
        self.cells[self.index(node)]
    }

    /// Mutable accumulator access for the P2G scatter.
    #[inline]
    pub fn velocity_mass_mut(&mut self, node: IVec3) -> &mut Vec4 {
        let idx = self.index(node);
        &mut self.cells[idx]
    }

    /// Zero-fill every accumulator. Runs at the start of every step.
    pub fn clear(&mut self) {
        self.cells.fill(Vec4::ZERO);
    }

    /// Sum of accumulated mass over all nodes.
    pub fn total_mass(&self) -> f32 {
        self.cells.iter().map(|c| c.w).sum()
    }

    /// Grid-update stage: normalize momentum to velocity, apply the gravity
    /// impulse, and zero velocity components normal to nearby domain faces.
    ///
    /// Cells holding less than [`MIN_CELL_MASS`] are skipped.
    pub fn update(&mut self, gravity: f32, dt: f32) {
        let r = self.resolution;
        let margin_high = r - BOUNDARY_MARGIN - 1;
        let mut i = 0usize;
        for x in 0..r {
            for y in 0..r {
                for z in 0..r {
                    let cell = &mut self.cells[i];
                    i += 1;
                    if cell.w <= MIN_CELL_MASS {
                        continue;
                    }
                    let mass = cell.w;
                    let mut velocity = cell.truncate() / mass;
                    velocity.y -= gravity * dt;

                    if x < BOUNDARY_MARGIN || x > margin_high {
                        velocity.x = 0.0;
                    }
                    if y < BOUNDARY_MARGIN || y > margin_high {
                        velocity.y = 0.0;
                    }
                    if z < BOUNDARY_MARGIN || z > margin_high {
                        velocity.z = 0.0;
                    }
                    *cell = velocity.extend(mass);
                }
            }
        }
    }
}
