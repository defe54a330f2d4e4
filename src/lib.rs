// src/lib.rs

//! apm — atomic package manager front-end
//!
//! A cache-and-reconciliation layer between apt and a declarative
//! desired-state configuration for an atomically updated system image.
//!
//! # Architecture
//!
//! - Metadata cache: a queryable SQLite mirror of apt's package metadata,
//!   bulk-replaced on scan and reconciled against the authoritative
//!   installed set
//! - Dry-run first: every install/remove is simulated, the simulation output
//!   classified into structured outcomes before anything real happens
//! - Drift correction: benign "already as desired" complaints update the
//!   persisted desired-state configuration instead of failing
//! - Dependency resolution, download and unpacking are delegated entirely
//!   to apt; this crate never touches package contents

pub mod apt;
pub mod config;
pub mod db;
mod error;
pub mod txn;

pub use error::{Error, Result};
