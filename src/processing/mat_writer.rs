use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::agents::population::Population;
use crate::physics::microenvironment::Microenvironment;

/// Write one real, full, double-precision matrix in the MATLAB Level-4 MAT
/// layout: a 20-byte header of five little-endian u32 fields (type, rows,
/// cols, imaginary flag, name length including the terminator), the
/// NUL-terminated name, then the values column-major.
pub fn write_level4_matrix<P: AsRef<Path>>(
    path: P,
    name: &str,
    rows: usize,
    column_major: &[f64],
) -> io::Result<()> {
    if rows == 0 || column_major.len() % rows != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "Data length ({}) is not a multiple of the row count ({})",
                column_major.len(),
                rows
            ),
        ));
    }
    let cols = column_major.len() / rows;
    let mut writer = BufWriter::new(File::create(path)?);
    let header: [u32; 5] = [
        0,
        rows as u32,
        cols as u32,
        0,
        (name.len() + 1) as u32,
    ];
    for field in header {
        writer.write_all(&field.to_le_bytes())?;
    }
    writer.write_all(name.as_bytes())?;
    writer.write_all(&[0u8])?;
    for value in column_major {
        writer.write_all(&value.to_le_bytes())?;
    }
    writer.flush()
}

/// Snapshot the chemical field: one column per voxel holding `[x, y, z,
/// volume, densities...]`.
pub fn write_microenvironment<P: AsRef<Path>>(m: &Microenvironment, path: P) -> io::Result<()> {
    let s = m.n_substrates();
    let rows = 4 + s;
    let mut data = Vec::with_capacity(rows * m.n_voxels());
    for voxel in &m.mesh.voxels {
        data.push(voxel.center.x);
        data.push(voxel.center.y);
        data.push(voxel.center.z);
        data.push(voxel.volume);
        data.extend_from_slice(m.density(voxel.index));
    }
    write_level4_matrix(path, "microenvironment", rows, &data)
}

/// Snapshot the population: one column per agent holding `[id, x, y, z,
/// volume]` followed by the secretion, uptake, saturation, and net-export
/// rates, each `n_substrates` wide.
pub fn write_population<P: AsRef<Path>>(population: &Population, path: P) -> io::Result<()> {
    let s = population.n_substrates();
    let rows = 5 + 4 * s;
    let mut data = Vec::with_capacity(rows * population.len());
    for agent in population.agents() {
        data.push(agent.id.index as f64);
        data.push(agent.position.x);
        data.push(agent.position.y);
        data.push(agent.position.z);
        data.push(agent.volume);
        for rates in [
            population.secretion_rates(agent.id),
            population.uptake_rates(agent.id),
            population.saturation_densities(agent.id),
            population.net_export_rates(agent.id),
        ] {
            data.extend_from_slice(rates.unwrap_or(&[]));
        }
    }
    write_level4_matrix(path, "agents", rows, &data)
}
