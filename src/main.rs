// src/main.rs
//! Zarf Air-Gap Delivery Engine - CLI Entry Point

use clap::{Parser, Subcommand};

mod commands;

// =============================================================================
// CLI Definitions
// =============================================================================

#[derive(Parser)]
#[command(name = "zarf")]
#[command(version)]
#[command(about = "Deliver and deploy Kubernetes workloads into air-gapped clusters", long_about = None)]
struct Cli {
    /// Skip prompts, accepting defaults
    #[arg(long, global = true)]
    confirm: bool,

    /// Allow insecure registry and git connections
    #[arg(long, global = true)]
    insecure: bool,

    /// Treat SBOM warnings as errors
    #[arg(long, global = true)]
    strict: bool,

    /// Target architecture (amd64, arm64)
    #[arg(short = 'a', long, global = true)]
    architecture: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Package operations
    Package {
        #[command(subcommand)]
        command: PackageCommands,
    },

    /// Install the in-cluster mirror registry and admission agent
    Init {
        /// Path to the init package (defaults to zarf-init-<arch>-*.tar.zst
        /// beside the binary)
        #[arg(long)]
        package: Option<String>,

        /// Key-value pairs for deploy-time variables
        #[arg(long = "set", value_name = "NAME=VALUE")]
        set: Vec<String>,

        /// Comma-separated optional components to include
        #[arg(long)]
        components: Option<String>,

        /// Address of an external registry to use instead of the internal one
        #[arg(long)]
        registry_url: Option<String>,

        /// StorageClass for the registry's persistent volume
        #[arg(long)]
        storage_class: Option<String>,
    },

    /// Open a port-forward to a named connect target
    Connect {
        /// Connect name (registry, git, or an annotation-declared name)
        name: String,
    },

    /// Remove every deployed package and the engine's cluster footprint
    Destroy {
        /// Required acknowledgement that this deletes everything
        #[arg(long)]
        confirm_destroy: bool,
    },

    /// Run the mutating admission agent (in-cluster)
    Agent,
}

#[derive(Subcommand)]
enum PackageCommands {
    /// Assemble a package from a zarf.yaml definition
    Create {
        /// Directory containing zarf.yaml
        #[arg(default_value = ".")]
        base_dir: String,

        /// Key-value pairs for create-time package templates
        #[arg(long = "set", value_name = "NAME=VALUE")]
        set: Vec<String>,

        /// Output directory for the package archive
        #[arg(short, long)]
        output: Option<String>,

        /// Split the archive into chunks of this many megabytes (0 = never)
        #[arg(long, default_value_t = 0)]
        max_package_size: u64,

        /// Skip SBOM generation
        #[arg(long)]
        skip_sbom: bool,

        /// Package flavor to compose
        #[arg(short, long, default_value = "")]
        flavor: String,

        /// Private key for package signing
        #[arg(long)]
        signing_key: Option<String>,

        /// Reference package for a differential build
        #[arg(long)]
        differential: Option<String>,
    },

    /// Deploy a package into the target cluster
    Deploy {
        /// Package source: tarball, .part000, oci:// url, or directory
        package: String,

        /// Key-value pairs for deploy-time variables
        #[arg(long = "set", value_name = "NAME=VALUE")]
        set: Vec<String>,

        /// Comma-separated optional components to include
        #[arg(long)]
        components: Option<String>,

        /// Public key to verify the package signature
        #[arg(short, long)]
        key: Option<String>,

        /// Adopt matching resources that already exist in the cluster
        #[arg(long)]
        adopt_existing_resources: bool,
    },

    /// Print a package's composed definition
    Inspect {
        /// Package source: tarball, .part000, oci:// url, or directory
        package: String,

        /// Public key to verify the package signature
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Publish a package or skeleton to an OCI registry
    Publish {
        /// Built package tarball, or a definition directory for a skeleton
        package: String,

        /// Destination registry, e.g. oci://ghcr.io/org/repo
        destination: String,

        /// Private key for signing the published package
        #[arg(long)]
        signing_key: Option<String>,
    },

    /// Pull a published package back into a local tarball
    Pull {
        /// Source reference, e.g. oci://ghcr.io/org/pkg:0.1.0-amd64
        reference: String,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: String,
    },

    /// Remove a deployed package from the cluster
    Remove {
        /// Deployed package name
        package_name: String,

        /// Comma-separated components to remove (all when omitted)
        #[arg(long)]
        components: Option<String>,
    },

    /// List packages deployed to the cluster
    List,

    /// Report manifest problems worth fixing before shipping
    Lint {
        /// Directory containing zarf.yaml
        #[arg(default_value = ".")]
        base_dir: String,

        /// Key-value pairs checked against template usage
        #[arg(long = "set", value_name = "NAME=VALUE")]
        set: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    commands::init_logging();

    let ctx = match commands::build_context(
        cli.confirm,
        cli.insecure,
        cli.strict,
        cli.architecture.clone(),
    ) {
        Ok(ctx) => ctx,
        Err(err) => commands::fail(err),
    };

    let result = match cli.command {
        Commands::Package { command } => match command {
            PackageCommands::Create {
                base_dir,
                set,
                output,
                max_package_size,
                skip_sbom,
                flavor,
                signing_key,
                differential,
            } => commands::package::cmd_create(
                &ctx,
                &base_dir,
                &set,
                output.as_deref(),
                max_package_size,
                skip_sbom,
                &flavor,
                signing_key.as_deref(),
                differential.as_deref(),
            ),
            PackageCommands::Deploy {
                package,
                set,
                components,
                key,
                adopt_existing_resources,
            } => commands::package::cmd_deploy(
                &ctx,
                &package,
                &set,
                components.as_deref(),
                key.as_deref(),
                adopt_existing_resources,
            ),
            PackageCommands::Inspect { package, key } => {
                commands::package::cmd_inspect(&ctx, &package, key.as_deref())
            }
            PackageCommands::Publish {
                package,
                destination,
                signing_key,
            } => commands::package::cmd_publish(
                &ctx,
                &package,
                &destination,
                signing_key.as_deref(),
            ),
            PackageCommands::Pull { reference, output } => {
                commands::package::cmd_pull(&ctx, &reference, &output)
            }
            PackageCommands::Remove {
                package_name,
                components,
            } => commands::package::cmd_remove(&ctx, &package_name, components.as_deref()),
            PackageCommands::List => commands::package::cmd_list(&ctx),
            PackageCommands::Lint { base_dir, set } => {
                commands::package::cmd_lint(&ctx, &base_dir, &set)
            }
        },
        Commands::Init {
            package,
            set,
            components,
            registry_url,
            storage_class,
        } => commands::init::cmd_init(
            &ctx,
            package.as_deref(),
            &set,
            components.as_deref(),
            registry_url.as_deref(),
            storage_class.as_deref(),
        ),
        Commands::Connect { name } => commands::connect::cmd_connect(&ctx, &name),
        Commands::Destroy { confirm_destroy } => {
            commands::destroy::cmd_destroy(&ctx, confirm_destroy)
        }
        Commands::Agent => commands::agent::cmd_agent(&ctx),
    };

    if let Err(err) = result {
        commands::fail(err);
    }
}
