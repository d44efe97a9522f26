pub mod csv_writer;
pub mod mat_writer;
