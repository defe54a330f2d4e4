// src/apt/scan.rs

//! Available-package metadata parsing
//!
//! `apt-cache dumpavail` emits one RFC 822-like stanza per available
//! package. This module parses that stream into [`Package`] rows ready
//! for a bulk store replacement. Installed state is not known at this
//! point; the caller overlays it from the dpkg snapshot afterwards.

use crate::db::store::Package;
use crate::error::{Error, Result};
use serde::Deserialize;
use tracing::debug;

/// One dumpavail stanza for rfc822-like parsing
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AvailEntry {
    package: String,
    version: String,
    #[serde(default)]
    section: Option<String>,
    #[serde(default)]
    maintainer: Option<String>,
    #[serde(default)]
    depends: Option<String>,
    #[serde(default)]
    provides: Option<String>,
    #[serde(default)]
    size: Option<String>,
    #[serde(rename = "Installed-Size", default)]
    installed_size: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Extract bare dependency names from an apt relation field.
///
/// Relations are comma separated; each relation may carry alternatives
/// joined by `|` and a version constraint in parentheses. Only the first
/// alternative's name is kept, constraints are dropped.
pub fn parse_relation_names(field: &str) -> Vec<String> {
    field
        .split(',')
        .filter_map(|relation| {
            let first = relation.split('|').next()?;
            let name = match first.find('(') {
                Some(paren_pos) => first[..paren_pos].trim(),
                None => first.trim(),
            };
            // Architecture qualifiers like "libc6:amd64" collapse to the name
            let name = name.split(':').next().unwrap_or(name);
            if name.is_empty() {
                None
            } else {
                Some(name.to_string())
            }
        })
        .collect()
}

fn parse_size(value: Option<&str>, field: &str, package: &str) -> Result<i64> {
    match value {
        None => Ok(0),
        Some(s) => s.trim().parse().map_err(|e| {
            Error::ParseError(format!("invalid {} '{}' for {}: {}", field, s, package, e))
        }),
    }
}

/// Parse the full `apt-cache dumpavail` output into package rows
pub fn parse_available(output: &str) -> Result<Vec<Package>> {
    let entries: Vec<AvailEntry> = rfc822_like::from_str(output)
        .map_err(|e| Error::ParseError(format!("failed to parse available stanzas: {}", e)))?;

    debug!("parsed {} available package stanzas", entries.len());

    let mut packages = Vec::with_capacity(entries.len());
    for entry in entries {
        let size = parse_size(entry.size.as_deref(), "Size", &entry.package)?;
        let installed_size =
            parse_size(entry.installed_size.as_deref(), "Installed-Size", &entry.package)?;

        packages.push(Package {
            name: entry.package,
            section: entry.section.unwrap_or_default(),
            maintainer: entry.maintainer.unwrap_or_default(),
            version: entry.version,
            version_installed: String::new(),
            depends: entry
                .depends
                .as_deref()
                .map(parse_relation_names)
                .unwrap_or_default(),
            provides: entry
                .provides
                .as_deref()
                .map(parse_relation_names)
                .unwrap_or_default(),
            size,
            installed_size,
            filename: entry.filename.unwrap_or_default(),
            description: entry.description.unwrap_or_default(),
            changelog: None,
            installed: false,
            exporting: false,
            container: String::new(),
            manager: String::new(),
        });
    }

    Ok(packages)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STANZAS: &str = "\
Package: vim
Version: 2:9.0.1378-2
Section: editors
Maintainer: Debian Vim Maintainers <team@example.org>
Depends: vim-common (= 2:9.0.1378-2), vim-runtime, libacl1 (>= 2.2.23)
Provides: editor
Size: 1490734
Installed-Size: 4032
Filename: pool/main/v/vim/vim_9.0.1378-2_amd64.deb
Description: Vi IMproved - enhanced vi editor

Package: nano
Version: 7.2-1
Section: editors
Size: 689816
Installed-Size: 2948
Description: small, friendly text editor inspired by Pico
";

    #[test]
    fn test_parse_available_basic() {
        let packages = parse_available(STANZAS).unwrap();
        assert_eq!(packages.len(), 2);

        let vim = &packages[0];
        assert_eq!(vim.name, "vim");
        assert_eq!(vim.version, "2:9.0.1378-2");
        assert_eq!(vim.section, "editors");
        assert_eq!(vim.size, 1490734);
        assert_eq!(vim.installed_size, 4032);
        assert_eq!(vim.provides, vec!["editor"]);
        assert!(!vim.installed);
        assert!(vim.version_installed.is_empty());

        let nano = &packages[1];
        assert_eq!(nano.name, "nano");
        assert!(nano.maintainer.is_empty());
        assert!(nano.depends.is_empty());
    }

    #[test]
    fn test_dependency_names_drop_constraints() {
        let packages = parse_available(STANZAS).unwrap();
        assert_eq!(
            packages[0].depends,
            vec!["vim-common", "vim-runtime", "libacl1"]
        );
    }

    #[test]
    fn test_relation_alternatives_keep_first() {
        let names = parse_relation_names("mail-transport-agent | postfix, libc6:amd64 (>= 2.34)");
        assert_eq!(names, vec!["mail-transport-agent", "libc6"]);
    }

    #[test]
    fn test_invalid_size_is_an_error() {
        let bad = "Package: broken\nVersion: 1.0\nSize: not-a-number\n";
        let result = parse_available(bad);
        assert!(matches!(result, Err(Error::ParseError(_))));
    }

    #[test]
    fn test_empty_input() {
        let packages = parse_available("").unwrap();
        assert!(packages.is_empty());
    }
}
