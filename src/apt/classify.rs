// src/apt/classify.rs

//! Dry-run output classification
//!
//! apt reports what a simulated operation would do as free text: section
//! headers with package name lists, a trailing count summary, and warning
//! or error lines. This module turns that text into a [`DryRunSummary`]
//! plus an ordered list of [`AptError`] values. Recognized message shapes
//! map to stable [`ErrorCode`]s with their literal parameters extracted;
//! anything unrecognized that still looks like a complaint is preserved
//! verbatim so no information is silently dropped.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

/// Stable codes for recognized apt message shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    /// "<pkg> is already the newest version" - requested state already holds
    AlreadyNewest,
    /// "Package '<pkg>' is not installed, so not removed"
    PackageNotInstalled,
    /// "Unable to locate package <pkg>"
    UnableToLocate,
    /// "Package '<pkg>' has no installation candidate"
    NoInstallCandidate,
    /// "Package <pkg> is a virtual package provided by:"
    VirtualPackage,
    /// "The following packages have unmet dependencies:"
    UnmetDependencies,
    /// "you have held broken packages"
    BrokenPackages,
    /// "Could not get lock <path>"
    CouldNotGetLock,
    /// "Permission denied" / "are you root?"
    PermissionDenied,
}

impl ErrorCode {
    /// Benign codes mean the requested state is already satisfied; they
    /// signal drift between the desired configuration and reality, not a
    /// failure.
    pub fn is_benign(&self) -> bool {
        matches!(self, ErrorCode::AlreadyNewest | ErrorCode::PackageNotInstalled)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A classified (or preserved-verbatim) apt complaint
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AptError {
    /// A recognized message shape with its extracted parameters
    #[error("{raw}")]
    Classified {
        code: ErrorCode,
        params: Vec<String>,
        raw: String,
    },
    /// A complaint the classifier could not interpret, kept verbatim
    #[error("{0}")]
    Unclassified(String),
}

impl AptError {
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            AptError::Classified { code, .. } => Some(*code),
            AptError::Unclassified(_) => None,
        }
    }

    /// First extracted parameter, usually the offending package name
    pub fn param(&self) -> Option<&str> {
        match self {
            AptError::Classified { params, .. } => params.first().map(String::as_str),
            AptError::Unclassified(_) => None,
        }
    }

    /// An unclassified complaint cannot be assumed benign
    pub fn is_benign(&self) -> bool {
        self.code().is_some_and(|c| c.is_benign())
    }
}

struct MessagePattern {
    code: ErrorCode,
    regex: Regex,
}

/// Ordered table of recognized message shapes, evaluated in priority order
static MESSAGE_PATTERNS: LazyLock<Vec<MessagePattern>> = LazyLock::new(|| {
    let table: [(ErrorCode, &str); 9] = [
        (
            ErrorCode::AlreadyNewest,
            r"(?:Package ')?([^\s']+)'? is already the newest version",
        ),
        (
            ErrorCode::PackageNotInstalled,
            r"Package '?([^\s']+)'? is not installed, so not removed",
        ),
        (ErrorCode::UnableToLocate, r"Unable to locate package (\S+)"),
        (
            ErrorCode::NoInstallCandidate,
            r"Package '?([^\s']+)'? has no installation candidate",
        ),
        (
            ErrorCode::VirtualPackage,
            r"Package (\S+) is a virtual package provided by",
        ),
        (
            ErrorCode::UnmetDependencies,
            r"The following packages have unmet dependencies",
        ),
        (ErrorCode::BrokenPackages, r"you have held broken packages"),
        (ErrorCode::CouldNotGetLock, r"Could not get lock (\S+)"),
        (
            ErrorCode::PermissionDenied,
            r"(?:Permission denied|are you root\?)",
        ),
    ];
    table
        .into_iter()
        .map(|(code, pattern)| MessagePattern {
            code,
            // The table is static; a bad pattern is a programmer error
            // caught by the classifier tests.
            regex: Regex::new(pattern).expect("invalid classifier pattern"),
        })
        .collect()
});

/// Trailing summary line: "N upgraded, N newly installed, N to remove and N not upgraded"
static COUNT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+) upgraded, (\d+) newly installed, (\d+) to remove and (\d+) not upgraded")
        .expect("invalid count pattern")
});

/// Structured result of one simulated (or real) operation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunSummary {
    pub new_installed_count: i64,
    pub upgraded_count: i64,
    pub removed_count: i64,
    pub not_upgraded_count: i64,
    pub new_installed_packages: Vec<String>,
    pub upgraded_packages: Vec<String>,
    pub removed_packages: Vec<String>,
    pub extra_installed: Vec<String>,
}

impl DryRunSummary {
    /// True iff the operation would change nothing real
    pub fn is_no_op(&self) -> bool {
        self.new_installed_count == 0 && self.upgraded_count == 0 && self.removed_count == 0
    }
}

/// Which package-list section the parser is currently inside
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    NewInstalled,
    Upgraded,
    Removed,
    ExtraInstalled,
    Ignored,
}

fn section_for(line: &str) -> Option<Section> {
    if line.starts_with("The following NEW packages will be installed") {
        Some(Section::NewInstalled)
    } else if line.starts_with("The following packages will be upgraded") {
        Some(Section::Upgraded)
    } else if line.starts_with("The following packages will be REMOVED") {
        Some(Section::Removed)
    } else if line.starts_with("The following additional packages will be installed")
        || line.starts_with("The following extra packages will be installed")
    {
        Some(Section::ExtraInstalled)
    } else if line.starts_with("The following packages have been kept back")
        || line.starts_with("Suggested packages")
        || line.starts_with("Recommended packages")
    {
        Some(Section::Ignored)
    } else {
        None
    }
}

/// Classify one line against the message table
fn classify_line(line: &str) -> Option<AptError> {
    for pattern in MESSAGE_PATTERNS.iter() {
        if let Some(captures) = pattern.regex.captures(line) {
            let params = captures
                .iter()
                .skip(1)
                .flatten()
                .map(|m| m.as_str().to_string())
                .collect();
            return Some(AptError::Classified {
                code: pattern.code,
                params,
                raw: line.to_string(),
            });
        }
    }
    None
}

/// Parse the raw output of a simulated or real apt run.
///
/// Every line is tested against the message table; lines carrying
/// operation semantics (section headers, indented name lists, the count
/// summary) update the running summary instead. `E:`/`W:` lines matching
/// no known shape are preserved as unclassified errors. All errors are
/// accumulated - one run may report several independent issues.
pub fn classify_output(raw: &str) -> (DryRunSummary, Vec<AptError>) {
    let mut summary = DryRunSummary::default();
    let mut errors = Vec::new();
    let mut section: Option<Section> = None;

    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            section = None;
            continue;
        }

        // Indented continuation lines belong to the open section
        if line.starts_with(char::is_whitespace) {
            if let Some(current) = section {
                let target = match current {
                    Section::NewInstalled => Some(&mut summary.new_installed_packages),
                    Section::Upgraded => Some(&mut summary.upgraded_packages),
                    Section::Removed => Some(&mut summary.removed_packages),
                    Section::ExtraInstalled => Some(&mut summary.extra_installed),
                    Section::Ignored => None,
                };
                if let Some(list) = target {
                    for name in trimmed.split_whitespace() {
                        list.push(name.trim_end_matches('*').to_string());
                    }
                }
                continue;
            }
        }

        // A non-indented line always terminates the open section
        section = None;

        let message = trimmed
            .strip_prefix("E: ")
            .or_else(|| trimmed.strip_prefix("W: "))
            .unwrap_or(trimmed);

        if let Some(error) = classify_line(message) {
            errors.push(error);
            continue;
        }

        if let Some(new_section) = section_for(message) {
            section = Some(new_section);
            continue;
        }

        if let Some(captures) = COUNT_LINE.captures(message) {
            summary.upgraded_count = captures[1].parse().unwrap_or(0);
            summary.new_installed_count = captures[2].parse().unwrap_or(0);
            summary.removed_count = captures[3].parse().unwrap_or(0);
            summary.not_upgraded_count = captures[4].parse().unwrap_or(0);
            continue;
        }

        // A complaint line with no recognized shape is preserved verbatim
        if trimmed.starts_with("E:") || trimmed.starts_with("W:") {
            errors.push(AptError::Unclassified(trimmed.to_string()));
        }
    }

    (summary, errors)
}

/// First classified error that is not benign, in encounter order.
///
/// Benign codes are filtered out because they represent drift between the
/// desired state and reality, not failures. Unclassified errors are
/// always critical.
pub fn find_critical_error(errors: &[AptError]) -> Option<&AptError> {
    errors.iter().find(|e| !e.is_benign())
}
