// src/main.rs

use anyhow::Result;
use apm::apt::classify::DryRunSummary;
use apm::apt::exec::AptCli;
use apm::apt::{Operation, PackageManager};
use apm::config::{DesiredConfig, FileConfigStore};
use apm::db::query::{Filter, FilterValue, PackageField, QuerySpec, SortOrder};
use apm::db::store::{Package, PackageStore, Scope};
use apm::txn::{Confirmer, Coordinator, ImageBackend, Request, Response};
use clap::{CommandFactory, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use tracing::info;

const DEFAULT_DB_PATH: &str = "/var/lib/apm/apm.db";
const DEFAULT_CONFIG_PATH: &str = "/etc/apm/image.json";

#[derive(Parser)]
#[command(name = "apm")]
#[command(author, version, about = "Declarative apt frontend for atomic system images", long_about = None)]
struct Cli {
    /// Database path
    #[arg(short, long, global = true, default_value = DEFAULT_DB_PATH)]
    db_path: String,

    /// Desired-state configuration path
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Treat the host as an atomic image (enables image rebuild steps)
    #[arg(long, global = true)]
    atomic: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh the package metadata cache from apt
    Update,
    /// Install packages (a trailing `-` marks a package for removal)
    Install {
        /// Package names, pin markers allowed
        #[arg(required = true)]
        packages: Vec<String>,
        /// Rebuild and switch the system image afterwards
        #[arg(long)]
        apply: bool,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Remove packages (a trailing `+` marks a package for installation)
    Remove {
        /// Package names, pin markers allowed
        #[arg(required = true)]
        packages: Vec<String>,
        /// Rebuild and switch the system image afterwards
        #[arg(long)]
        apply: bool,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Show cached metadata for one package
    Info {
        /// Package name
        package_name: String,
    },
    /// Search packages by name substring
    Search {
        /// Name fragment to search for
        pattern: String,
        /// Only show installed packages
        #[arg(short, long)]
        installed: bool,
    },
    /// List packages with filters, sorting and pagination
    List {
        /// Filter as field=value (repeatable)
        #[arg(short, long)]
        filter: Vec<String>,
        /// Sort as field or field:desc
        #[arg(short, long)]
        sort: Option<String>,
        /// Maximum rows to return (0 disables pagination)
        #[arg(short, long, default_value_t = 25)]
        limit: i64,
        /// Rows to skip
        #[arg(short, long, default_value_t = 0)]
        offset: i64,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// y/n prompt on stdin, optionally bypassed
struct StdinConfirmer {
    assume_yes: bool,
}

impl Confirmer for StdinConfirmer {
    fn confirm(
        &self,
        operation: Operation,
        packages: &[Package],
        summary: &DryRunSummary,
    ) -> apm::Result<bool> {
        if self.assume_yes {
            return Ok(true);
        }

        println!("About to {} {} package(s):", operation.verb(), packages.len());
        for package in packages {
            println!("  {} {}", package.name, package.version);
        }
        println!(
            "{} newly installed, {} upgraded, {} to remove",
            summary.new_installed_count, summary.upgraded_count, summary.removed_count
        );
        print!("Continue? [y/N] ");
        std::io::stdout().flush()?;

        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
    }
}

/// Rebuilds the image with podman and switches to it with bootc
struct PodmanBackend {
    definition_path: PathBuf,
}

impl ImageBackend for PodmanBackend {
    fn regenerate_definition(&self, config: &DesiredConfig) -> apm::Result<()> {
        if let Some(parent) = self.definition_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.definition_path, config.dockerfile())?;
        info!("image definition written to {}", self.definition_path.display());
        Ok(())
    }

    fn rebuild_and_switch(&self, config: &DesiredConfig) -> apm::Result<()> {
        let build = Command::new("podman")
            .args(["build", "-t", &config.image, "-f"])
            .arg(&self.definition_path)
            .arg(".")
            .status()?;
        if !build.success() {
            return Err(apm::Error::ExecutionFailed(format!(
                "podman build exited with {}",
                build
            )));
        }

        let switch = Command::new("bootc")
            .args(["switch", "--transport", "containers-storage", &config.image])
            .status()?;
        if !switch.success() {
            return Err(apm::Error::ExecutionFailed(format!(
                "bootc switch exited with {}",
                switch
            )));
        }

        info!("image {} rebuilt, reboot to switch", config.image);
        Ok(())
    }
}

fn parse_filters(raw: &[String]) -> Result<Vec<Filter>> {
    let mut filters = Vec::new();
    for item in raw {
        let (field, value) = item
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("filter must be field=value, got '{}'", item))?;
        filters.push(Filter::parse(field, FilterValue::Text(value.to_string()))?);
    }
    Ok(filters)
}

fn parse_sort(raw: &str) -> Result<(PackageField, SortOrder)> {
    let (field, order) = match raw.split_once(':') {
        Some((field, order)) => (field, SortOrder::parse(order)),
        None => (raw, SortOrder::Asc),
    };
    Ok((field.parse()?, order))
}

fn print_response(response: &Response, json: bool) {
    if json {
        match serde_json::to_string_pretty(response) {
            Ok(text) => println!("{}", text),
            Err(_) => println!("{}", response.message),
        }
    } else {
        println!("{}", response.message);
    }
}

fn print_package(package: &Package) {
    println!("{} {}", package.name, package.version);
    if !package.section.is_empty() {
        println!("  Section: {}", package.section);
    }
    if !package.maintainer.is_empty() {
        println!("  Maintainer: {}", package.maintainer);
    }
    if package.installed {
        println!("  Installed: yes ({})", package.version_installed);
    } else {
        println!("  Installed: no");
    }
    if !package.depends.is_empty() {
        println!("  Depends: {}", package.depends.join(", "));
    }
    if !package.provides.is_empty() {
        println!("  Provides: {}", package.provides.join(", "));
    }
    println!("  Size: {} (installed {})", package.size, package.installed_size);
    if !package.description.is_empty() {
        println!("  {}", package.description);
    }
}

/// Open the store, refreshing the cache first if it is empty
fn open_store(db_path: &str, manager: &dyn PackageManager) -> Result<PackageStore> {
    let store = PackageStore::new(apm::db::init(db_path)?)?;
    if !store.exists(&Scope::Host)? {
        info!("metadata cache is empty, refreshing");
        refresh_cache(&store, manager)?;
    }
    Ok(store)
}

fn refresh_cache(store: &PackageStore, manager: &dyn PackageManager) -> Result<usize> {
    let packages = manager.scan_available()?;
    let total = packages.len();
    store.replace_all(&Scope::Host, &packages)?;

    let snapshot = manager.installed_snapshot()?;
    store.reconcile_installed(&Scope::Host, &snapshot)?;

    Ok(total)
}

fn run_operation(
    cli: &Cli,
    operation: Operation,
    packages: Vec<String>,
    apply: bool,
    yes: bool,
) -> Result<()> {
    let manager = AptCli::new();
    let store = open_store(&cli.db_path, &manager)?;

    let config_path = PathBuf::from(&cli.config);
    let definition_path = config_path
        .parent()
        .map(|p| p.join("Dockerfile"))
        .unwrap_or_else(|| PathBuf::from("Dockerfile"));

    let confirmer = StdinConfirmer { assume_yes: yes };
    let image = PodmanBackend { definition_path };
    let config = FileConfigStore::new(config_path);

    let coordinator = Coordinator::new(
        &store,
        Scope::Host,
        &manager,
        &confirmer,
        &image,
        &config,
        cli.atomic,
    );

    let response = coordinator.run(&Request {
        operation,
        packages,
        apply,
    });

    print_response(&response, cli.json);
    if response.error {
        std::process::exit(1);
    }
    Ok(())
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Update => {
            let manager = AptCli::new();
            let store = PackageStore::new(apm::db::init(&cli.db_path)?)?;
            let total = refresh_cache(&store, &manager)?;
            println!("Cache refreshed: {} package(s)", total);
            Ok(())
        }
        Commands::Install { packages, apply, yes } => {
            run_operation(&cli, Operation::Install, packages.clone(), *apply, *yes)
        }
        Commands::Remove { packages, apply, yes } => {
            run_operation(&cli, Operation::Remove, packages.clone(), *apply, *yes)
        }
        Commands::Info { package_name } => {
            let manager = AptCli::new();
            let store = open_store(&cli.db_path, &manager)?;
            let package = store.get_by_name(&Scope::Host, package_name)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&package)?);
            } else {
                print_package(&package);
            }
            Ok(())
        }
        Commands::Search { pattern, installed } => {
            let manager = AptCli::new();
            let store = open_store(&cli.db_path, &manager)?;
            let packages = store.search(&Scope::Host, pattern, *installed)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&packages)?);
            } else if packages.is_empty() {
                println!("No packages found.");
            } else {
                for package in &packages {
                    let mark = if package.installed { "i" } else { " " };
                    println!("{} {} {} - {}", mark, package.name, package.version, package.description);
                }
                println!("\nTotal: {} package(s)", packages.len());
            }
            Ok(())
        }
        Commands::List { filter, sort, limit, offset } => {
            let manager = AptCli::new();
            let store = open_store(&cli.db_path, &manager)?;

            let filters = parse_filters(filter)?;
            let mut spec = QuerySpec::new().paginate(*limit, *offset);
            for f in filters.clone() {
                spec.filters.push(f);
            }
            if let Some(raw) = sort {
                let (field, order) = parse_sort(raw)?;
                spec = spec.sort(field, order);
            }

            let packages = store.query(&Scope::Host, &spec)?;
            let total = store.count(&Scope::Host, &filters)?;

            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "packages": packages,
                        "totalCount": total,
                    }))?
                );
            } else {
                for package in &packages {
                    let mark = if package.installed { "i" } else { " " };
                    println!("{} {} {}", mark, package.name, package.version);
                }
                println!("\nShowing {} of {} package(s)", packages.len(), total);
            }
            Ok(())
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(*shell, &mut cmd, name, &mut std::io::stdout());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filters() {
        let filters = parse_filters(&["name=vim".to_string(), "installed=yes".to_string()]).unwrap();
        assert_eq!(filters.len(), 2);
    }

    #[test]
    fn test_parse_filters_rejects_bad_shape() {
        assert!(parse_filters(&["name".to_string()]).is_err());
    }

    #[test]
    fn test_parse_filters_rejects_unknown_field() {
        assert!(parse_filters(&["nosuchfield=1".to_string()]).is_err());
    }

    #[test]
    fn test_parse_sort() {
        let (field, order) = parse_sort("name").unwrap();
        assert_eq!(field, PackageField::Name);
        assert_eq!(order, SortOrder::Asc);

        let (field, order) = parse_sort("size:desc").unwrap();
        assert_eq!(field, PackageField::Size);
        assert_eq!(order, SortOrder::Desc);
    }

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }
}
