// src/txn.rs

//! Transaction coordination
//!
//! A package operation walks a fixed sequence of steps:
//! resolve -> simulate -> drift check -> confirm -> execute -> resync.
//! Resolution maps raw user input (possibly carrying apt pin markers) to
//! cached package rows, simulation runs the classifier over a dry run,
//! the drift check repairs a desired-state document that has fallen out
//! of step with reality, and resync re-grounds the cache in the
//! authoritative installed snapshot after a real run.
//!
//! Every terminal path, success or failure, is reported as a uniform
//! [`Response`].

use crate::apt::classify::{self, AptError, DryRunSummary, ErrorCode};
use crate::apt::{Operation, PackageManager};
use crate::config::{ConfigStore, DesiredConfig};
use crate::db::query::{FilterValue, PackageField, QuerySpec};
use crate::db::store::{Package, PackageStore, Scope};
use crate::error::{Error, Result};
use serde_json::json;
use tracing::{debug, info, warn};

/// How many provider alternatives a failed lookup reports
const PROVIDES_FALLBACK_LIMIT: i64 = 5;

/// Asks the user (or a policy) whether to proceed with a real run
pub trait Confirmer {
    fn confirm(
        &self,
        operation: Operation,
        packages: &[Package],
        summary: &DryRunSummary,
    ) -> Result<bool>;
}

/// Rebuilds the system image from the desired-state document
pub trait ImageBackend {
    fn regenerate_definition(&self, config: &DesiredConfig) -> Result<()>;
    fn rebuild_and_switch(&self, config: &DesiredConfig) -> Result<()>;
}

/// Uniform reply envelope produced on every terminal path
#[derive(Debug, Clone, serde::Serialize)]
pub struct Response {
    pub message: String,
    pub data: serde_json::Value,
    pub error: bool,
}

impl Response {
    pub fn ok(message: impl Into<String>, data: serde_json::Value) -> Self {
        Response {
            message: message.into(),
            data,
            error: false,
        }
    }

    pub fn fail(message: impl Into<String>, data: serde_json::Value) -> Self {
        Response {
            message: message.into(),
            data,
            error: true,
        }
    }
}

/// Pin marker carried on a raw package argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinIntent {
    /// No marker; follow the operation's own direction
    Default,
    /// Trailing `+`: install regardless of the operation
    ForceInstall,
    /// Trailing `-`: remove regardless of the operation
    ForceRemove,
}

impl PinIntent {
    pub fn from_raw(raw: &str) -> Self {
        match raw.as_bytes().last() {
            Some(b'+') => PinIntent::ForceInstall,
            Some(b'-') => PinIntent::ForceRemove,
            _ => PinIntent::Default,
        }
    }
}

/// A raw argument resolved against the metadata cache
#[derive(Debug, Clone)]
struct Resolved {
    /// The argument as the user typed it, markers included
    raw: String,
    /// The cache row name the argument resolved to
    canonical: String,
    intent: PinIntent,
    package: Package,
}

/// One coordinated operation request
#[derive(Debug, Clone)]
pub struct Request {
    pub operation: Operation,
    pub packages: Vec<String>,
    /// Apply the change to the system image after a successful run
    pub apply: bool,
}

/// Named terminal outcomes of a successful walk through the steps
#[derive(Debug)]
enum Outcome {
    /// The real operation ran; summary of what it did
    Applied(DryRunSummary),
    /// Nothing to execute, but the desired state document was corrected
    NoOpButConfigUpdated,
    /// The user declined at the confirmation step
    Cancelled,
}

/// An error plus the structured payload the reply should carry
struct Failure {
    error: Error,
    data: serde_json::Value,
}

impl Failure {
    fn plain(error: Error) -> Self {
        Failure {
            error,
            data: json!({}),
        }
    }
}

impl From<Error> for Failure {
    fn from(error: Error) -> Self {
        Failure::plain(error)
    }
}

type StepResult<T> = std::result::Result<T, Failure>;

/// Walks one request through the operation state machine
pub struct Coordinator<'a> {
    store: &'a PackageStore,
    scope: Scope,
    manager: &'a dyn PackageManager,
    confirmer: &'a dyn Confirmer,
    image: &'a dyn ImageBackend,
    config: &'a dyn ConfigStore,
    /// Whether the host is an atomic image; image steps only run here
    atomic: bool,
}

impl<'a> Coordinator<'a> {
    pub fn new(
        store: &'a PackageStore,
        scope: Scope,
        manager: &'a dyn PackageManager,
        confirmer: &'a dyn Confirmer,
        image: &'a dyn ImageBackend,
        config: &'a dyn ConfigStore,
        atomic: bool,
    ) -> Self {
        Coordinator {
            store,
            scope,
            manager,
            confirmer,
            image,
            config,
            atomic,
        }
    }

    /// Run the full state machine for one request
    pub fn run(&self, request: &Request) -> Response {
        match self.transact(request) {
            Ok(Outcome::Applied(summary)) => Response::ok(
                format!("{} completed", request.operation.verb()),
                json!({ "summary": summary }),
            ),
            Ok(Outcome::NoOpButConfigUpdated) => Response::ok(
                "requested state already satisfied, desired configuration updated",
                json!({}),
            ),
            Ok(Outcome::Cancelled) => Response::ok("operation cancelled", json!({})),
            Err(failure) => Response::fail(failure.error.to_string(), failure.data),
        }
    }

    fn transact(&self, request: &Request) -> StepResult<Outcome> {
        let resolved = self.resolve(&request.packages)?;

        let (summary, errors) = self.simulate(&resolved, request.operation)?;

        if let Some(critical) = classify::find_critical_error(&errors) {
            warn!("dry run reported: {}", critical);
            return Err(Failure {
                error: Error::Apt(critical.clone()),
                data: json!({ "summary": summary }),
            });
        }

        if summary.is_no_op() {
            return self.drift_check(request, &errors).map_err(Failure::plain);
        }

        let packages: Vec<Package> = resolved.iter().map(|r| r.package.clone()).collect();
        if !self
            .confirmer
            .confirm(request.operation, &packages, &summary)?
        {
            info!("{} declined at confirmation", request.operation.verb());
            return Ok(Outcome::Cancelled);
        }

        self.execute(&resolved, request.operation)?;
        self.resync(request, &resolved)?;

        Ok(Outcome::Applied(summary))
    }

    /// Map each raw argument to a cache row.
    ///
    /// A trailing pin marker is remembered, then stripped one character
    /// at a time until a lookup succeeds. A final miss reports up to
    /// five packages whose provides list contains the name.
    fn resolve(&self, names: &[String]) -> StepResult<Vec<Resolved>> {
        let mut resolved = Vec::new();

        for raw in names {
            if raw.is_empty() {
                continue;
            }

            let intent = PinIntent::from_raw(raw);
            let mut canonical = raw.clone();
            let mut lookup = self.store.get_by_name(&self.scope, &canonical);

            while matches!(lookup, Err(Error::PackageNotFound(_)))
                && canonical.ends_with(['+', '-'])
            {
                canonical.pop();
                if canonical.is_empty() {
                    break;
                }
                lookup = self.store.get_by_name(&self.scope, &canonical);
            }

            match lookup {
                Ok(package) => {
                    debug!("resolved '{}' to '{}'", raw, canonical);
                    resolved.push(Resolved {
                        raw: raw.clone(),
                        canonical,
                        intent,
                        package,
                    });
                }
                Err(Error::PackageNotFound(_)) => {
                    let providers = self.providers_of(&canonical)?;
                    let names: Vec<&str> = providers.iter().map(|p| p.name.as_str()).collect();
                    return Err(Failure {
                        error: Error::PackageNotFound(canonical),
                        data: json!({ "providedBy": names }),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        if resolved.is_empty() {
            return Err(Failure::plain(Error::NothingToDo(
                "no package names given".to_string(),
            )));
        }

        Ok(resolved)
    }

    /// Packages whose provides list contains `name` exactly
    fn providers_of(&self, name: &str) -> Result<Vec<Package>> {
        let spec = QuerySpec::new()
            .filter(
                PackageField::Provides,
                FilterValue::Text(name.to_string()),
            )
            .paginate(PROVIDES_FALLBACK_LIMIT, 0);
        self.store.query(&self.scope, &spec)
    }

    /// Dry run with the raw arguments so pin markers reach apt unchanged
    fn simulate(
        &self,
        resolved: &[Resolved],
        operation: Operation,
    ) -> StepResult<(DryRunSummary, Vec<AptError>)> {
        let raw_names: Vec<String> = resolved.iter().map(|r| r.raw.clone()).collect();
        let output = self.manager.execute_dry_run(&raw_names, operation)?;
        Ok(classify::classify_output(&output))
    }

    /// A no-op dry run means reality already matches the request. In
    /// atomic mode with apply requested the benign errors name the stale
    /// desired-state entries to record; otherwise there is nothing to do.
    fn drift_check(&self, request: &Request, errors: &[AptError]) -> Result<Outcome> {
        if !(self.atomic && request.apply) {
            return Err(Error::NothingToDo(
                "nothing to do, requested state already holds".to_string(),
            ));
        }

        let mut config = self.config.load()?;
        let mut changed = false;

        for error in errors {
            let Some(name) = error.param() else { continue };
            match error.code() {
                Some(ErrorCode::AlreadyNewest) if !config.is_installed(name) => {
                    info!("recording '{}' as desired-installed", name);
                    changed |= config.add_install(name);
                }
                Some(ErrorCode::PackageNotInstalled) if !config.is_removed(name) => {
                    info!("recording '{}' as desired-removed", name);
                    changed |= config.add_remove(name);
                }
                _ => {}
            }
        }

        if !changed {
            return Err(Error::NothingToDo(
                "nothing to do, requested state already holds".to_string(),
            ));
        }

        self.config.save(&config)?;
        self.image.regenerate_definition(&config)?;
        self.image.rebuild_and_switch(&config)?;
        Ok(Outcome::NoOpButConfigUpdated)
    }

    fn execute(&self, resolved: &[Resolved], operation: Operation) -> StepResult<()> {
        let raw_names: Vec<String> = resolved.iter().map(|r| r.raw.clone()).collect();
        info!("executing {} of {:?}", operation.verb(), raw_names);

        let output = self.manager.execute_real(&raw_names, operation)?;
        let (summary, errors) = classify::classify_output(&output);
        if let Some(critical) = classify::find_critical_error(&errors) {
            return Err(Failure {
                error: Error::ExecutionFailed(critical.to_string()),
                data: json!({ "summary": summary }),
            });
        }
        Ok(())
    }

    /// Re-ground the cache in the authoritative installed snapshot and,
    /// in atomic mode with apply requested, carry the change into the
    /// desired-state document and the image.
    fn resync(&self, request: &Request, resolved: &[Resolved]) -> Result<()> {
        let snapshot = self.manager.installed_snapshot()?;
        self.store.reconcile_installed(&self.scope, &snapshot)?;

        if !(self.atomic && request.apply) {
            return Ok(());
        }

        let mut config = self.config.load()?;
        for item in resolved {
            let install = match item.intent {
                PinIntent::ForceInstall => true,
                PinIntent::ForceRemove => false,
                PinIntent::Default => request.operation == Operation::Install,
            };
            if install {
                config.add_install(&item.canonical);
            } else {
                config.add_remove(&item.canonical);
            }
        }

        self.config.save(&config)?;
        self.image.regenerate_definition(&config)?;
        self.image.rebuild_and_switch(&config)
    }
}
