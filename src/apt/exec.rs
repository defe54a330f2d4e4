// src/apt/exec.rs

//! Shelling out to apt
//!
//! [`AptCli`] is the production [`PackageManager`]: simulated runs via
//! `apt-get -s`, real runs via `apt-get -y`, the installed snapshot via
//! `dpkg-query -W`, and the metadata scan via `apt-cache dumpavail`.
//! Operation runs return stdout and stderr combined, and a non-zero exit
//! is not an error here: the classifier decides what the output means.

use crate::apt::scan;
use crate::apt::{Operation, PackageManager};
use crate::db::store::Package;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::process::Command;
use tracing::debug;

/// Real apt-get backed package manager
#[derive(Debug, Default)]
pub struct AptCli;

impl AptCli {
    pub fn new() -> Self {
        AptCli
    }

    fn run_operation(
        &self,
        packages: &[String],
        operation: Operation,
        simulate: bool,
    ) -> Result<String> {
        let mode = if simulate { "-s" } else { "-y" };
        debug!(
            "running apt-get {} {} for {} package(s)",
            mode,
            operation.verb(),
            packages.len()
        );

        let output = Command::new("apt-get")
            .arg(mode)
            .arg(operation.verb())
            .args(packages)
            .env("LC_ALL", "C")
            .env("DEBIAN_FRONTEND", "noninteractive")
            .output()?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }

        // Exit status is deliberately ignored: the combined output carries
        // the E:/W: lines the classifier needs either way.
        Ok(combined)
    }
}

impl PackageManager for AptCli {
    fn execute_dry_run(&self, packages: &[String], operation: Operation) -> Result<String> {
        self.run_operation(packages, operation, true)
    }

    fn execute_real(&self, packages: &[String], operation: Operation) -> Result<String> {
        self.run_operation(packages, operation, false)
    }

    fn installed_snapshot(&self) -> Result<HashMap<String, String>> {
        let output = Command::new("dpkg-query")
            .args(["-W", "-f", "${Package}\\t${Version}\\n"])
            .env("LC_ALL", "C")
            .output()?;

        if !output.status.success() {
            return Err(Error::ExecutionFailed(format!(
                "dpkg-query exited with {}",
                output.status
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let mut snapshot = HashMap::new();
        for line in text.lines() {
            if let Some((name, version)) = line.split_once('\t') {
                snapshot.insert(name.to_string(), version.to_string());
            }
        }

        debug!("installed snapshot holds {} packages", snapshot.len());
        Ok(snapshot)
    }

    fn scan_available(&self) -> Result<Vec<Package>> {
        let output = Command::new("apt-cache")
            .arg("dumpavail")
            .env("LC_ALL", "C")
            .output()?;

        if !output.status.success() {
            return Err(Error::ExecutionFailed(format!(
                "apt-cache dumpavail exited with {}",
                output.status
            )));
        }

        scan::parse_available(&String::from_utf8_lossy(&output.stdout))
    }
}
