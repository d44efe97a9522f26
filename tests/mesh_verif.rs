use glam::DVec3;

use mcfvm_rs::discretization::mesh::CartesianMesh;

fn anisotropic_mesh() -> CartesianMesh {
    let mut mesh = CartesianMesh::new();
    mesh.resize(
        [DVec3::new(-60.0, -35.0, -15.0), DVec3::new(40.0, 35.0, 15.0)],
        [5, 7, 3],
    );
    mesh
}

#[test]
fn indexing_round_trips_across_the_grid() {
    let mesh = anisotropic_mesh();
    assert_eq!(mesh.n_voxels(), 5 * 7 * 3);
    assert_eq!(mesh.dx, 20.0);
    assert_eq!(mesh.dy, 10.0);
    assert_eq!(mesh.dz, 10.0);
    assert!(mesh.regular);
    assert!(!mesh.uniform);

    println!("Test 1: linear <-> Cartesian index round trip");
    for n in 0..mesh.n_voxels() {
        let [i, j, k] = mesh.cartesian_indices(n);
        assert_eq!(mesh.voxel_index(i, j, k), n);
        assert_eq!(mesh.voxels[n].index, n);

        // Every center must be valid and map back to its own voxel.
        let center = mesh.voxels[n].center;
        assert!(mesh.is_position_valid(center));
        assert_eq!(mesh.nearest_voxel_index(center), n);
    }
    println!("  -> [PASSED] all {} voxels", mesh.n_voxels());

    println!("Test 2: jumps match the flattened layout");
    let n = mesh.voxel_index(2, 3, 1);
    assert_eq!(mesh.voxel_index(3, 3, 1), n + mesh.i_jump());
    assert_eq!(mesh.voxel_index(2, 4, 1), n + mesh.j_jump());
    assert_eq!(mesh.voxel_index(2, 3, 2), n + mesh.k_jump());
    println!("  -> [PASSED]");
}

#[test]
fn nearest_voxel_clamps_out_of_domain_positions() {
    let mesh = anisotropic_mesh();

    assert_eq!(
        mesh.nearest_cartesian_indices(DVec3::new(1.0e6, -1.0e6, 0.0)),
        [4, 0, 1]
    );
    assert!(!mesh.is_position_valid(DVec3::new(1.0e6, -1.0e6, 0.0)));

    // Faces are inside the domain; the far face clamps to the last voxel.
    let lo = mesh.bounding_box[0];
    let hi = mesh.bounding_box[1];
    assert!(mesh.is_position_valid(lo));
    assert!(mesh.is_position_valid(hi));
    assert_eq!(mesh.nearest_cartesian_indices(lo), [0, 0, 0]);
    assert_eq!(mesh.nearest_cartesian_indices(hi), [4, 6, 2]);

    // Clamping is idempotent: the clamped voxel's center maps to itself.
    let clamped = mesh.nearest_voxel_index(DVec3::new(1.0e6, -1.0e6, 0.0));
    assert_eq!(mesh.nearest_voxel_index(mesh.voxels[clamped].center), clamped);
}

#[test]
fn flat_axes_keep_unit_thickness() {
    let mut mesh = CartesianMesh::new();
    mesh.resize(
        [DVec3::new(0.0, 0.0, 0.0), DVec3::new(80.0, 80.0, 10.0)],
        [8, 8, 1],
    );

    assert_eq!(mesh.n_voxels(), 64);
    assert_eq!(mesh.dz, 1.0);
    for voxel in &mesh.voxels {
        assert_eq!(voxel.volume, 10.0 * 10.0 * 1.0);
    }
    let [i, j, k] = mesh.cartesian_indices(63);
    assert_eq!([i, j, k], [7, 7, 0]);
}

#[test]
fn neighbor_lists_respect_the_domain_boundary() {
    let mut mesh = CartesianMesh::new();
    mesh.resize(
        [DVec3::new(0.0, 0.0, 0.0), DVec3::new(30.0, 30.0, 30.0)],
        [3, 3, 3],
    );
    mesh.build_moore_neighborhood();

    let corner = mesh.voxel_index(0, 0, 0);
    let center = mesh.voxel_index(1, 1, 1);
    assert_eq!(mesh.orthogonal_neighbors[corner].len(), 3);
    assert_eq!(mesh.orthogonal_neighbors[center].len(), 6);
    assert_eq!(mesh.moore_neighbors[corner].len(), 7);
    assert_eq!(mesh.moore_neighbors[center].len(), 26);

    // Orthogonal neighborhoods are symmetric.
    for n in 0..mesh.n_voxels() {
        for &other in &mesh.orthogonal_neighbors[n] {
            assert!(mesh.orthogonal_neighbors[other].contains(&n));
        }
    }
}
