// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn specs_arg() -> Arg {
    Arg::new("specs")
        .required(true)
        .num_args(1..)
        .help("Spec strings, e.g. `hdf5@1.14 +mpi ^openmpi`")
}

fn fresh_arg() -> Arg {
    Arg::new("fresh")
        .long("fresh")
        .action(ArgAction::SetTrue)
        .help("Ignore installed specs when concretizing")
}

fn build_cli() -> Command {
    Command::new("spackle")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Spackle Contributors")
        .about("Source-based package manager for HPC software")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_name("PATH")
                .help("Configuration file (default: $SPACKLE_CONFIG, then the user config dir)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Show debug output"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Only show warnings and errors"),
        )
        .subcommand(
            Command::new("install")
                .about("Build and install spec(s) and their dependencies")
                .arg(specs_arg())
                .arg(
                    Arg::new("jobs")
                        .short('j')
                        .long("jobs")
                        .help("Parallel builds (default: [build] jobs, or available cores)"),
                )
                .arg(
                    Arg::new("keep_stage")
                        .long("keep-stage")
                        .action(ArgAction::SetTrue)
                        .help("Keep stage directories after successful builds"),
                )
                .arg(
                    Arg::new("dry_run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("Show what would be built without building"),
                )
                .arg(fresh_arg()),
        )
        .subcommand(
            Command::new("concretize")
                .about("Resolve spec(s) and print the concrete graph")
                .arg(specs_arg())
                .arg(
                    Arg::new("long")
                        .short('l')
                        .long("long")
                        .action(ArgAction::SetTrue)
                        .help("Show full hashes"),
                )
                .arg(fresh_arg()),
        )
        .subcommand(
            Command::new("uninstall")
                .about("Remove an installed spec")
                .arg(Arg::new("query").required(true).help("`/hashprefix` or a spec query"))
                .arg(
                    Arg::new("dependents")
                        .long("dependents")
                        .action(ArgAction::SetTrue)
                        .help("Also remove everything that depends on it"),
                )
                .arg(
                    Arg::new("yes")
                        .short('y')
                        .long("yes")
                        .action(ArgAction::SetTrue)
                        .help("Do not ask for confirmation"),
                ),
        )
        .subcommand(
            Command::new("find")
                .about("List installed specs")
                .arg(Arg::new("query").help("Optional spec query"))
                .arg(
                    Arg::new("explicit")
                        .short('e')
                        .long("explicit")
                        .action(ArgAction::SetTrue)
                        .help("Only specs installed on request"),
                ),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "elvish", "fish", "powershell", "zsh"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("spackle.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
