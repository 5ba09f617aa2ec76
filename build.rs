// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: database path
fn db_path_arg() -> Arg {
    Arg::new("db_path")
        .short('d')
        .long("db-path")
        .value_name("PATH")
        .global(true)
        .help("Path to the database file (overrides the config)")
}

/// Common argument: pack names for direct operations
fn packs_arg() -> Arg {
    Arg::new("packs")
        .required(true)
        .num_args(1..)
        .help("Pack names")
}

fn pack_arg() -> Arg {
    Arg::new("pack").required(true).help("Pack name")
}

fn session_cli() -> Command {
    Command::new("session")
        .about("Edit and apply a pack selection session")
        .subcommand_required(true)
        .subcommand(Command::new("init").about("Start a session from what is installed"))
        .subcommand(Command::new("show").about("Print the stored session"))
        .subcommand(
            Command::new("select")
                .about("Select a pack for install or update")
                .arg(pack_arg()),
        )
        .subcommand(
            Command::new("deselect")
                .about("Drop a pack from the selection")
                .arg(pack_arg())
                .arg(
                    Arg::new("cascade")
                        .long("cascade")
                        .action(clap::ArgAction::SetTrue)
                        .help("Also deselect packs that depend on it"),
                ),
        )
        .subcommand(
            Command::new("action")
                .about("Set an explicit action on a pack")
                .arg(pack_arg())
                .arg(
                    Arg::new("action")
                        .required(true)
                        .value_parser(["unchanged", "install", "update", "remove"])
                        .help("Action to set"),
                ),
        )
        .subcommand(
            Command::new("rename")
                .about("Give a page a custom title")
                .arg(pack_arg())
                .arg(Arg::new("page").required(true).help("Page name within the pack"))
                .arg(Arg::new("title").required(true).help("New title")),
        )
        .subcommand(
            Command::new("prefix")
                .about("Set the title prefix for a pack's pages")
                .arg(pack_arg())
                .arg(Arg::new("prefix").default_value("").help("Prefix, may be empty")),
        )
        .subcommand(Command::new("refresh").about("Rebuild the session from the registry and manifest"))
        .subcommand(Command::new("clear").about("Discard the session"))
        .subcommand(
            Command::new("apply")
                .about("Queue the selection as an operation")
                .arg(
                    Arg::new("hash")
                        .long("hash")
                        .help("State hash the selection was made against"),
                ),
        )
        .subcommand(
            Command::new("raw")
                .about("Send a raw command request")
                .arg(Arg::new("request").required(true).help("Request JSON")),
        )
}

fn build_cli() -> Command {
    Command::new("packsmith")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Packsmith Contributors")
        .about("Session-based installer for versioned content packs")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .global(true)
                .help("Path to the config file"),
        )
        .arg(db_path_arg())
        .arg(
            Arg::new("manifest_dir")
                .short('m')
                .long("manifest-dir")
                .value_name("DIR")
                .global(true)
                .help("Directory holding <ref>.toml manifests (overrides the config)"),
        )
        .arg(
            Arg::new("user")
                .short('u')
                .long("user")
                .default_value("admin")
                .global(true)
                .help("User the command acts for"),
        )
        .arg(
            Arg::new("ref")
                .short('r')
                .long("ref")
                .default_value("main")
                .global(true)
                .help("Manifest ref the command acts on"),
        )
        .subcommand(session_cli())
        .subcommand(
            Command::new("pack")
                .about("Install, update or remove packs without a session")
                .subcommand_required(true)
                .subcommand(Command::new("install").about("Install packs").arg(packs_arg()))
                .subcommand(Command::new("update").about("Update installed packs").arg(packs_arg()))
                .subcommand(Command::new("remove").about("Remove installed packs").arg(packs_arg())),
        )
        .subcommand(
            Command::new("op")
                .about("Inspect background operations")
                .subcommand_required(true)
                .subcommand(
                    Command::new("show")
                        .about("Show one operation")
                        .arg(Arg::new("operation_id").required(true).help("Operation ID")),
                )
                .subcommand(
                    Command::new("list")
                        .about("List recent operations for the user")
                        .arg(Arg::new("limit").short('l').long("limit").help("Maximum number to show")),
                ),
        )
        .subcommand(
            Command::new("db")
                .about("Database maintenance")
                .subcommand_required(true)
                .subcommand(Command::new("init").about("Create the database and its schema")),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory - use CARGO_MANIFEST_DIR which is always set by cargo
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

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("packsmith.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
        return;
    }

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
