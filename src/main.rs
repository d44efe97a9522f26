use std::fs;
use std::time::Instant;

use glam::DVec3;

use mcfvm_rs::container::models::{StandardAdhesionRepulsion, VolumeGrowth};
use mcfvm_rs::numerics::timing;
use mcfvm_rs::processing::{csv_writer, mat_writer};
use mcfvm_rs::simulation::{Simulation, SimulationSettings};

fn main() {
    let settings = SimulationSettings::load_or_default("settings.json");
    let output_dir = settings.output_directory.clone();
    fs::create_dir_all(&output_dir).expect("Failed to create output directory");
    settings
        .save(format!("{}/settings_used.json", output_dir))
        .expect("Failed to save settings");

    let mut sim = Simulation::new(settings);

    let oxygen = sim
        .add_substrate("oxygen", "mmHg", 1.0e5, 0.1)
        .expect("Failed to register oxygen");
    let waste = sim
        .add_substrate("waste", "dimensionless", 2.0e4, 0.01)
        .expect("Failed to register waste");

    // Oxygenated background with the rim held at the far-field value; waste
    // is free at the boundary.
    sim.microenvironment
        .set_uniform(oxygen, 38.0)
        .expect("Failed to set initial oxygen");
    sim.microenvironment
        .set_substrate_dirichlet_activation(waste, false)
        .expect("Failed to configure boundary activation");
    pin_boundary(&mut sim, &[38.0, 0.0]);

    seed_spheroid(&mut sim, oxygen, waste, 80.0, 15.0);

    sim.models.phenotype = Some(Box::new(VolumeGrowth {
        growth_rate: 0.02,
        ..VolumeGrowth::default()
    }));
    sim.models.mechanics = Some(Box::new(StandardAdhesionRepulsion::default()));

    sim.display_information();
    println!();

    let t_end = 120.0;
    let save_interval = 12.0;
    save_snapshot(&sim, &output_dir, 0);
    let mut snapshot_index = 1;
    let mut next_save = save_interval;
    let started = Instant::now();

    sim.run_until(t_end, |state| {
        if state.time >= next_save - 0.5 * state.scheduler.diffusion_dt {
            save_snapshot(state, &output_dir, snapshot_index);
            println!(
                "t = {:>7.2} min: {} agents, {} escaped",
                state.time,
                state.population.len(),
                state.container.n_escaped()
            );
            snapshot_index += 1;
            next_save += save_interval;
        }
    })
    .expect("Simulation step failed");

    let elapsed = started.elapsed();
    println!();
    sim.display_information();

    csv_writer::write_density_profile(
        &sim.microenvironment,
        oxygen,
        format!("{}/oxygen_profile.csv", output_dir),
    )
    .expect("Failed to write oxygen profile");
    println!("Oxygen profile saved to {}/oxygen_profile.csv", output_dir);

    timing::finalize_and_print(elapsed);
    println!(
        "Finished {} min of simulated time in {:.2} s",
        t_end,
        elapsed.as_secs_f64()
    );
}

/// Flag every face voxel of the diffusion mesh as a Dirichlet node holding
/// `values`.
fn pin_boundary(sim: &mut Simulation, values: &[f64]) {
    let (nx, ny, nz) = (
        sim.microenvironment.mesh.x_nodes(),
        sim.microenvironment.mesh.y_nodes(),
        sim.microenvironment.mesh.z_nodes(),
    );
    let mut pinned = 0;
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let boundary =
                    i == 0 || i + 1 == nx || j == 0 || j + 1 == ny || k == 0 || k + 1 == nz;
                if !boundary {
                    continue;
                }
                let n = sim.microenvironment.mesh.voxel_index(i, j, k);
                sim.microenvironment
                    .add_dirichlet_node(n, values)
                    .expect("Failed to add Dirichlet node");
                pinned += 1;
            }
        }
    }
    println!("Pinned {} boundary voxels", pinned);
}

/// Lattice-seed oxygen-consuming, waste-secreting agents inside a sphere at
/// the domain center.
fn seed_spheroid(sim: &mut Simulation, oxygen: usize, waste: usize, radius: f64, spacing: f64) {
    let steps = (radius / spacing).ceil() as i32;
    let mut count = 0;
    for k in -steps..=steps {
        for j in -steps..=steps {
            for i in -steps..=steps {
                let position = DVec3::new(i as f64, j as f64, k as f64) * spacing;
                if position.length() > radius {
                    continue;
                }
                let id = sim.create_agent(position);
                if let Some(agent) = sim.population.get_mut(id) {
                    agent.set_volume(2494.0);
                }
                sim.population.uptake_rates_mut(id).expect("live agent")[oxygen] = 10.0;
                sim.population.secretion_rates_mut(id).expect("live agent")[waste] = 1.0;
                sim.population.saturation_densities_mut(id).expect("live agent")[waste] = 1.0;
                count += 1;
            }
        }
    }
    println!(
        "Seeded {} agents in a spheroid of radius {} micron",
        count, radius
    );
}

fn save_snapshot(state: &Simulation, dir: &str, index: usize) {
    mat_writer::write_microenvironment(
        &state.microenvironment,
        format!("{}/microenvironment_{:04}.mat", dir, index),
    )
    .expect("Failed to write microenvironment snapshot");
    mat_writer::write_population(
        &state.population,
        format!("{}/agents_{:04}.mat", dir, index),
    )
    .expect("Failed to write population snapshot");
}
