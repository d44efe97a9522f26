pub mod microenvironment;
