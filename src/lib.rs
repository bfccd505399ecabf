//! Keeps a branch of the `origin` remote identical to a branch of an upstream GitHub repository.

pub mod config;
pub mod git;
pub mod sync;
pub mod utils;
