// src/apt/mod.rs

//! The apt boundary
//!
//! Everything that touches the real package manager lives behind the
//! [`PackageManager`] trait: simulated and real operation runs, the
//! authoritative installed-state probe, and the full metadata scan. The
//! classifier turns the raw line-oriented output of those runs into
//! structured outcomes; nothing else in the crate ever parses apt text.

pub mod classify;
pub mod exec;
pub mod scan;

use crate::db::store::Package;
use crate::error::Result;
use std::collections::HashMap;

/// The two logical package operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Install,
    Remove,
}

impl Operation {
    /// apt-get subcommand for this operation
    pub fn verb(&self) -> &'static str {
        match self {
            Operation::Install => "install",
            Operation::Remove => "remove",
        }
    }
}

/// Interface to the underlying package manager.
///
/// Dependency resolution, download and unpacking all happen on the other
/// side of this boundary; callers only see raw output text (for the
/// classifier) and parsed metadata.
pub trait PackageManager {
    /// Run a simulated multi-package operation and return the raw output
    fn execute_dry_run(&self, packages: &[String], operation: Operation) -> Result<String>;

    /// Run the real operation and return the raw output
    fn execute_real(&self, packages: &[String], operation: Operation) -> Result<String>;

    /// Authoritative name -> installed version snapshot
    fn installed_snapshot(&self) -> Result<HashMap<String, String>>;

    /// Full metadata scan of every available package
    fn scan_available(&self) -> Result<Vec<Package>>;
}
