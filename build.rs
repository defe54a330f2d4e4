// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn global_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("db_path")
            .short('d')
            .long("db-path")
            .value_name("PATH")
            .default_value("/var/lib/apm/apm.db")
            .help("Database path"),
    )
    .arg(
        Arg::new("config")
            .short('c')
            .long("config")
            .value_name("PATH")
            .default_value("/etc/apm/image.json")
            .help("Desired-state configuration path"),
    )
    .arg(
        Arg::new("atomic")
            .long("atomic")
            .action(ArgAction::SetTrue)
            .help("Treat the host as an atomic image"),
    )
    .arg(
        Arg::new("json")
            .long("json")
            .action(ArgAction::SetTrue)
            .help("Print results as JSON"),
    )
}

fn operation_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("packages")
            .required(true)
            .num_args(1..)
            .help("Package names, pin markers allowed"),
    )
    .arg(
        Arg::new("apply")
            .long("apply")
            .action(ArgAction::SetTrue)
            .help("Rebuild and switch the system image afterwards"),
    )
    .arg(
        Arg::new("yes")
            .short('y')
            .long("yes")
            .action(ArgAction::SetTrue)
            .help("Skip the confirmation prompt"),
    )
}

fn build_cli() -> Command {
    global_args(
        Command::new("apm")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Declarative apt frontend for atomic system images")
            .subcommand_required(true)
            .subcommand(Command::new("update").about("Refresh the package metadata cache from apt"))
            .subcommand(operation_args(
                Command::new("install").about("Install packages"),
            ))
            .subcommand(operation_args(Command::new("remove").about("Remove packages")))
            .subcommand(
                Command::new("info")
                    .about("Show cached metadata for one package")
                    .arg(Arg::new("package_name").required(true).help("Package name")),
            )
            .subcommand(
                Command::new("search")
                    .about("Search packages by name substring")
                    .arg(Arg::new("pattern").required(true).help("Name fragment"))
                    .arg(
                        Arg::new("installed")
                            .short('i')
                            .long("installed")
                            .action(ArgAction::SetTrue)
                            .help("Only show installed packages"),
                    ),
            )
            .subcommand(
                Command::new("list")
                    .about("List packages with filters, sorting and pagination")
                    .arg(
                        Arg::new("filter")
                            .short('f')
                            .long("filter")
                            .action(ArgAction::Append)
                            .help("Filter as field=value (repeatable)"),
                    )
                    .arg(
                        Arg::new("sort")
                            .short('s')
                            .long("sort")
                            .help("Sort as field or field:desc"),
                    )
                    .arg(
                        Arg::new("limit")
                            .short('l')
                            .long("limit")
                            .default_value("25")
                            .help("Maximum rows to return (0 disables pagination)"),
                    )
                    .arg(
                        Arg::new("offset")
                            .short('o')
                            .long("offset")
                            .default_value("0")
                            .help("Rows to skip"),
                    ),
            )
            .subcommand(
                Command::new("completions")
                    .about("Generate shell completion scripts")
                    .arg(
                        Arg::new("shell")
                            .required(true)
                            .value_parser(["bash", "zsh", "fish", "powershell"])
                            .help("Shell type"),
                    ),
            ),
    )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("apm.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
