//! spawntree
//!
//! Command-line surface and launcher for the spawntree load harness. The
//! binary is a thin wrapper around [`launcher::launch`].

pub mod cli;
pub mod launcher;
