use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::physics::microenvironment::Microenvironment;

/// Write data to CSV file with headers
pub fn write_csv<P: AsRef<Path>>(path: P, headers: &[&str], data: &[Vec<f64>]) -> io::Result<()> {
    if !headers.is_empty() && !data.is_empty() && headers.len() != data.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "Headers count ({}) doesn't match data columns ({})",
                headers.len(),
                data.len()
            ),
        ));
    }

    let mut file = File::create(path)?;

    writeln!(file, "{}", headers.join(","))?;

    let n_rows = data.iter().map(|col| col.len()).max().unwrap_or(0);

    for i in 0..n_rows {
        let row: Vec<String> = data
            .iter()
            .map(|col| {
                if i < col.len() {
                    format!("{:.15e}", col[i])
                } else {
                    String::new()
                }
            })
            .collect();
        writeln!(file, "{}", row.join(","))?;
    }

    Ok(())
}

/// Write x-y data pairs
pub fn write_xy<P: AsRef<Path>>(
    path: P,
    x_header: &str,
    y_header: &str,
    x_data: &[f64],
    y_data: &[f64],
) -> io::Result<()> {
    if x_data.len() != y_data.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "X and Y data lengths don't match ({} vs {})",
                x_data.len(),
                y_data.len()
            ),
        ));
    }
    write_csv(
        path,
        &[x_header, y_header],
        &[x_data.to_vec(), y_data.to_vec()],
    )
}

/// Write one substrate along the x-line through the domain center (the middle
/// j/k indices) as an x,density CSV.
pub fn write_density_profile<P: AsRef<Path>>(
    m: &Microenvironment,
    substrate: usize,
    path: P,
) -> io::Result<()> {
    if substrate >= m.n_substrates() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("No substrate with index {}", substrate),
        ));
    }
    let j = m.mesh.y_nodes() / 2;
    let k = m.mesh.z_nodes() / 2;
    let ys: Vec<f64> = (0..m.mesh.x_nodes())
        .map(|i| m.density_at(i, j, k)[substrate])
        .collect();
    write_xy(
        path,
        "x",
        &m.substrate_names[substrate],
        &m.mesh.x_coordinates,
        &ys,
    )
}
