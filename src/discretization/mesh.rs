use glam::DVec3;

/// A single rectangular control volume of the structured grid.
pub struct Voxel {
    pub index: usize,
    pub volume: f64,
    pub center: DVec3,
    pub is_dirichlet: bool,
}

/// A structured, axis-aligned voxel grid with row-major (x-fastest) indexing.
pub struct CartesianMesh {
    /// Voxel center coordinates along each axis.
    pub x_coordinates: Vec<f64>,
    pub y_coordinates: Vec<f64>,
    pub z_coordinates: Vec<f64>,
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
    /// `[min, max]` corners of the meshed box.
    pub bounding_box: [DVec3; 2],
    pub voxels: Vec<Voxel>,
    /// Face-sharing (6-connectivity) neighbor lists, built on resize.
    pub orthogonal_neighbors: Vec<Vec<usize>>,
    /// 26-connectivity neighbor lists, empty until [`build_moore_neighborhood`]
    /// is called.
    ///
    /// [`build_moore_neighborhood`]: CartesianMesh::build_moore_neighborhood
    pub moore_neighbors: Vec<Vec<usize>>,
    /// True when every axis has constant spacing.
    pub regular: bool,
    /// True when the mesh is regular with dx == dy == dz.
    pub uniform: bool,
    pub units: String,
}

// Spacing comparisons tolerate accumulated rounding from coordinate construction.
const SPACING_TOLERANCE: f64 = 1e-16;

impl Default for CartesianMesh {
    fn default() -> Self {
        Self::new()
    }
}

impl CartesianMesh {
    /// A single unit voxel centered at the origin.
    pub fn new() -> Self {
        let mut mesh = CartesianMesh {
            x_coordinates: Vec::new(),
            y_coordinates: Vec::new(),
            z_coordinates: Vec::new(),
            dx: 1.0,
            dy: 1.0,
            dz: 1.0,
            bounding_box: [DVec3::ZERO, DVec3::ZERO],
            voxels: Vec::new(),
            orthogonal_neighbors: Vec::new(),
            moore_neighbors: Vec::new(),
            regular: true,
            uniform: true,
            units: "micron".to_string(),
        };
        mesh.resize([DVec3::splat(-0.5), DVec3::splat(0.5)], [1, 1, 1]);
        mesh
    }

    pub fn x_nodes(&self) -> usize {
        self.x_coordinates.len()
    }

    pub fn y_nodes(&self) -> usize {
        self.y_coordinates.len()
    }

    pub fn z_nodes(&self) -> usize {
        self.z_coordinates.len()
    }

    pub fn n_voxels(&self) -> usize {
        self.voxels.len()
    }

    /// Linear-index stride of one step along x.
    pub fn i_jump(&self) -> usize {
        1
    }

    /// Linear-index stride of one step along y.
    pub fn j_jump(&self) -> usize {
        self.x_coordinates.len()
    }

    /// Linear-index stride of one step along z.
    pub fn k_jump(&self) -> usize {
        self.x_coordinates.len() * self.y_coordinates.len()
    }

    /// Rebuild the grid over `bounds` with the given node count per axis.
    /// A zero count is treated as one node; an axis with a single node keeps
    /// unit thickness so voxel volumes stay meaningful in 2-D/1-D setups.
    pub fn resize(&mut self, bounds: [DVec3; 2], nodes: [usize; 3]) {
        let nodes = [nodes[0].max(1), nodes[1].max(1), nodes[2].max(1)];
        let extent = bounds[1] - bounds[0];

        self.dx = if nodes[0] < 2 { 1.0 } else { extent.x / nodes[0] as f64 };
        self.dy = if nodes[1] < 2 { 1.0 } else { extent.y / nodes[1] as f64 };
        self.dz = if nodes[2] < 2 { 1.0 } else { extent.z / nodes[2] as f64 };

        self.x_coordinates = (0..nodes[0])
            .map(|i| bounds[0].x + (i as f64 + 0.5) * self.dx)
            .collect();
        self.y_coordinates = (0..nodes[1])
            .map(|j| bounds[0].y + (j as f64 + 0.5) * self.dy)
            .collect();
        self.z_coordinates = (0..nodes[2])
            .map(|k| bounds[0].z + (k as f64 + 0.5) * self.dz)
            .collect();

        self.bounding_box = bounds;
        self.regular = true;
        self.uniform = (self.dy - self.dx).abs() < SPACING_TOLERANCE
            && (self.dz - self.dx).abs() < SPACING_TOLERANCE;

        self.rebuild_voxels();
        self.connect_voxels();
        self.moore_neighbors.clear();
    }

    /// Rebuild with a target spacing per axis; node counts are rounded up so
    /// the actual spacing never exceeds the request.
    pub fn resize_with_spacing(&mut self, bounds: [DVec3; 2], spacing: DVec3) {
        let extent = bounds[1] - bounds[0];
        let nodes = [
            (SPACING_TOLERANCE + extent.x / spacing.x).ceil() as usize,
            (SPACING_TOLERANCE + extent.y / spacing.y).ceil() as usize,
            (SPACING_TOLERANCE + extent.z / spacing.z).ceil() as usize,
        ];
        self.resize(bounds, nodes);
    }

    /// Rebuild with the same target spacing on all three axes.
    pub fn resize_uniform(&mut self, bounds: [DVec3; 2], spacing: f64) {
        self.resize_with_spacing(bounds, DVec3::splat(spacing));
    }

    /// Build a rectilinear mesh from explicit voxel-center coordinates. The
    /// result is Cartesian in topology but flagged non-regular when any axis
    /// has varying spacing, which the implicit diffusion solver refuses.
    pub fn from_coordinates(xs: Vec<f64>, ys: Vec<f64>, zs: Vec<f64>) -> Self {
        let mut mesh = CartesianMesh::new();

        fn axis_spacing(coords: &[f64]) -> (f64, bool) {
            if coords.len() < 2 {
                return (1.0, true);
            }
            let first = coords[1] - coords[0];
            let constant = coords
                .windows(2)
                .all(|w| ((w[1] - w[0]) - first).abs() < SPACING_TOLERANCE);
            (first, constant)
        }

        let (dx, rx) = axis_spacing(&xs);
        let (dy, ry) = axis_spacing(&ys);
        let (dz, rz) = axis_spacing(&zs);

        mesh.x_coordinates = xs;
        mesh.y_coordinates = ys;
        mesh.z_coordinates = zs;
        mesh.dx = dx;
        mesh.dy = dy;
        mesh.dz = dz;
        mesh.regular = rx && ry && rz;
        mesh.uniform = mesh.regular
            && (dy - dx).abs() < SPACING_TOLERANCE
            && (dz - dx).abs() < SPACING_TOLERANCE;
        mesh.bounding_box = [
            DVec3::new(
                mesh.x_coordinates[0] - 0.5 * dx,
                mesh.y_coordinates[0] - 0.5 * dy,
                mesh.z_coordinates[0] - 0.5 * dz,
            ),
            DVec3::new(
                mesh.x_coordinates[mesh.x_coordinates.len() - 1] + 0.5 * dx,
                mesh.y_coordinates[mesh.y_coordinates.len() - 1] + 0.5 * dy,
                mesh.z_coordinates[mesh.z_coordinates.len() - 1] + 0.5 * dz,
            ),
        ];
        mesh.rebuild_voxels();
        mesh.connect_voxels();
        mesh.moore_neighbors.clear();
        mesh
    }

    fn rebuild_voxels(&mut self) {
        let volume = self.dx * self.dy * self.dz;
        let (nx, ny, nz) = (self.x_nodes(), self.y_nodes(), self.z_nodes());
        self.voxels = Vec::with_capacity(nx * ny * nz);
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let index = (k * ny + j) * nx + i;
                    self.voxels.push(Voxel {
                        index,
                        volume,
                        center: DVec3::new(
                            self.x_coordinates[i],
                            self.y_coordinates[j],
                            self.z_coordinates[k],
                        ),
                        is_dirichlet: false,
                    });
                }
            }
        }
    }

    fn connect_voxels(&mut self) {
        let (nx, ny, nz) = (self.x_nodes(), self.y_nodes(), self.z_nodes());
        let (jj, kk) = (self.j_jump(), self.k_jump());
        self.orthogonal_neighbors = vec![Vec::new(); self.voxels.len()];
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let n = (k * ny + j) * nx + i;
                    let list = &mut self.orthogonal_neighbors[n];
                    if i > 0 {
                        list.push(n - 1);
                    }
                    if i + 1 < nx {
                        list.push(n + 1);
                    }
                    if j > 0 {
                        list.push(n - jj);
                    }
                    if j + 1 < ny {
                        list.push(n + jj);
                    }
                    if k > 0 {
                        list.push(n - kk);
                    }
                    if k + 1 < nz {
                        list.push(n + kk);
                    }
                }
            }
        }
    }

    /// Populate the 26-connectivity neighbor lists. Only coarse container
    /// grids need these, so they are not built on every resize.
    pub fn build_moore_neighborhood(&mut self) {
        let (nx, ny, nz) = (
            self.x_nodes() as isize,
            self.y_nodes() as isize,
            self.z_nodes() as isize,
        );
        self.moore_neighbors = vec![Vec::new(); self.voxels.len()];
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let n = ((k * ny + j) * nx + i) as usize;
                    let list = &mut self.moore_neighbors[n];
                    for dk in -1..=1 {
                        for dj in -1..=1 {
                            for di in -1..=1 {
                                if di == 0 && dj == 0 && dk == 0 {
                                    continue;
                                }
                                let (ii, jj, kk) = (i + di, j + dj, k + dk);
                                if ii < 0 || jj < 0 || kk < 0 || ii >= nx || jj >= ny || kk >= nz {
                                    continue;
                                }
                                list.push(((kk * ny + jj) * nx + ii) as usize);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Linear index of the voxel at Cartesian indices `(i, j, k)`.
    pub fn voxel_index(&self, i: usize, j: usize, k: usize) -> usize {
        (k * self.y_coordinates.len() + j) * self.x_coordinates.len() + i
    }

    /// Cartesian indices `[i, j, k]` of the voxel at linear index `n`.
    pub fn cartesian_indices(&self, n: usize) -> [usize; 3] {
        let nx = self.x_coordinates.len();
        let ny = self.y_coordinates.len();
        [n % nx, (n / nx) % ny, n / (nx * ny)]
    }

    /// Nearest voxel to `position`. Out-of-domain coordinates clamp to the
    /// boundary voxel on that axis; this never fails and is the documented
    /// policy for agents sitting exactly on (or past) a domain face.
    pub fn nearest_voxel_index(&self, position: DVec3) -> usize {
        let [i, j, k] = self.nearest_cartesian_indices(position);
        self.voxel_index(i, j, k)
    }

    /// Clamped Cartesian indices of the voxel nearest to `position`.
    pub fn nearest_cartesian_indices(&self, position: DVec3) -> [usize; 3] {
        let offset = position - self.bounding_box[0];
        let clamp = |raw: f64, n: usize| -> usize {
            let i = raw.floor() as i64;
            i.clamp(0, n as i64 - 1) as usize
        };
        [
            clamp(offset.x / self.dx, self.x_coordinates.len()),
            clamp(offset.y / self.dy, self.y_coordinates.len()),
            clamp(offset.z / self.dz, self.z_coordinates.len()),
        ]
    }

    /// True when `position` lies inside the bounding box (faces inclusive).
    pub fn is_position_valid(&self, position: DVec3) -> bool {
        let [lo, hi] = self.bounding_box;
        position.x >= lo.x
            && position.x <= hi.x
            && position.y >= lo.y
            && position.y <= hi.y
            && position.z >= lo.z
            && position.z <= hi.z
    }

    pub fn display_information(&self) {
        let kind = if self.uniform {
            "uniform Cartesian"
        } else if self.regular {
            "regular Cartesian"
        } else {
            "rectilinear Cartesian"
        };
        println!("Mesh information:");
        println!("  type: {}", kind);
        println!(
            "  domain: [{}, {}] x [{}, {}] x [{}, {}] {}",
            self.bounding_box[0].x,
            self.bounding_box[1].x,
            self.bounding_box[0].y,
            self.bounding_box[1].y,
            self.bounding_box[0].z,
            self.bounding_box[1].z,
            self.units
        );
        println!(
            "  resolution: dx = {}, dy = {}, dz = {} {}",
            self.dx, self.dy, self.dz, self.units
        );
        println!(
            "  voxels: {} ({} x {} x {})",
            self.n_voxels(),
            self.x_nodes(),
            self.y_nodes(),
            self.z_nodes()
        );
    }
}
