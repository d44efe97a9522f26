//! Agent-based reaction-diffusion core for multicellular tissue simulation:
//! a structured voxel microenvironment with an implicit LOD diffusion solver,
//! agents that exchange substrates with their voxels, and a multi-rate
//! scheduler coupling diffusion, mechanics, and phenotype updates.

pub mod agents;
pub mod container;
pub mod discretization;
pub mod numerics;
pub mod physics;
pub mod processing;
pub mod simulation;
