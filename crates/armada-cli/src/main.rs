mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{Context, Failure, WaitArgs};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "armada",
    version,
    about = "Deploy ordered groups of charts onto a Kubernetes cluster"
)]
struct Cli {
    /// Path to the Armada config file (defaults to $ARMADA_CONFIG, then ~/.armada/config.toml).
    #[arg(long, global = true)]
    armadaconf: Option<PathBuf>,

    /// Path to a kubeconfig file (overrides the config file).
    #[arg(long, global = true)]
    kubeconfig: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, default_value_t = false, global = true)]
    debug: bool,

    /// Enable trace-level logging (more detailed than --debug).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Install or upgrade every chart of a manifest, group by group.
    Apply {
        /// Manifest source: a file path or a deckhand+http:// URL.
        source: String,
        /// Name of the manifest to apply when the source holds several.
        #[arg(long)]
        target_manifest: Option<String>,
        /// Print the result as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Load and validate manifests without touching the cluster.
    Validate {
        /// Manifest source: a file path or a deckhand+http:// URL.
        source: String,
        /// Name of the manifest to validate when the source holds several.
        #[arg(long)]
        target_manifest: Option<String>,
    },
    /// Wait until the selected resources are ready.
    Wait {
        /// Resource type to watch (plural, kind, or plural.group).
        #[arg(long, default_value = "armadacharts")]
        resource_type: String,
        /// Namespace of the resources.
        #[arg(long, default_value = "default")]
        namespace: String,
        /// Label selector, e.g. `app=db,tier=backend`.
        #[arg(long, default_value = "")]
        label_selector: String,
        /// Give up after this long: `30s`, `5m`, `1h`, or bare seconds. Waits forever if unset.
        #[arg(long, value_parser = parse_timeout)]
        timeout: Option<Duration>,
        /// Ready count (`N`) or share (`N%`) that satisfies the wait. Defaults to all.
        #[arg(long, default_value = "")]
        min_ready: String,
    },
    /// Run the HTTP API server.
    Server {
        /// Listen address (overrides the config file).
        #[arg(long)]
        bind: Option<String>,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Parse a `--timeout` value. A bare number is seconds.
fn parse_timeout(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    let (digits, scale) = match input.char_indices().last() {
        Some((i, 's')) => (&input[..i], 1),
        Some((i, 'm')) => (&input[..i], 60),
        Some((i, 'h')) => (&input[..i], 3600),
        _ => (input, 1),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{input}': expected e.g. 30s, 5m, 1h"))?;
    value
        .checked_mul(scale)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{input}' is too large"))
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.debug {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("ARMADA_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        command => Context::load(cli.armadaconf.as_deref(), cli.kubeconfig)
            .and_then(|ctx| dispatch(&ctx, command)),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(Failure { code, message }) => {
            eprintln!("error: {message}");
            ExitCode::from(code)
        }
    }
}

fn dispatch(ctx: &Context, command: Commands) -> Result<u8, Failure> {
    match command {
        Commands::Apply {
            source,
            target_manifest,
            json,
        } => commands::apply::run(ctx, &source, target_manifest.as_deref(), json),
        Commands::Validate {
            source,
            target_manifest,
        } => commands::validate::run(ctx, &source, target_manifest.as_deref()),
        Commands::Wait {
            resource_type,
            namespace,
            label_selector,
            timeout,
            min_ready,
        } => commands::wait::run(
            ctx,
            &WaitArgs {
                resource_type,
                namespace,
                label_selector,
                timeout,
                min_ready,
            },
        ),
        Commands::Server { bind } => commands::server::run(ctx, bind.as_deref()),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    }
}
