// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: skip prompts
fn confirm_arg() -> Arg {
    Arg::new("confirm")
        .long("confirm")
        .action(clap::ArgAction::SetTrue)
        .help("Skip prompts, accepting defaults")
}

fn build_cli() -> Command {
    Command::new("zarf")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Deliver and deploy Kubernetes workloads into air-gapped clusters")
        .subcommand_required(true)
        .subcommand(
            Command::new("package")
                .about("Package operations")
                .subcommand(
                    Command::new("create")
                        .about("Assemble a package from a zarf.yaml definition")
                        .arg(Arg::new("base_dir").default_value("."))
                        .arg(confirm_arg()),
                )
                .subcommand(
                    Command::new("deploy")
                        .about("Deploy a package into the target cluster")
                        .arg(Arg::new("package").required(true))
                        .arg(confirm_arg()),
                )
                .subcommand(
                    Command::new("inspect")
                        .about("Print a package's composed definition")
                        .arg(Arg::new("package").required(true)),
                )
                .subcommand(
                    Command::new("publish")
                        .about("Publish a package or skeleton to an OCI registry")
                        .arg(Arg::new("package").required(true))
                        .arg(Arg::new("destination").required(true)),
                )
                .subcommand(
                    Command::new("pull")
                        .about("Pull a published package back into a local tarball")
                        .arg(Arg::new("reference").required(true)),
                )
                .subcommand(
                    Command::new("remove")
                        .about("Remove a deployed package from the cluster")
                        .arg(Arg::new("package_name").required(true)),
                )
                .subcommand(Command::new("list").about("List deployed packages"))
                .subcommand(
                    Command::new("lint")
                        .about("Report manifest problems worth fixing")
                        .arg(Arg::new("base_dir").default_value(".")),
                ),
        )
        .subcommand(
            Command::new("init")
                .about("Install the in-cluster mirror registry and admission agent")
                .arg(confirm_arg()),
        )
        .subcommand(
            Command::new("connect")
                .about("Open a port-forward to a named connect target")
                .arg(Arg::new("name").required(true)),
        )
        .subcommand(
            Command::new("destroy")
                .about("Remove every deployed package and the engine's cluster footprint"),
        )
        .subcommand(Command::new("agent").about("Run the mutating admission agent"))
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

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("zarf.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
