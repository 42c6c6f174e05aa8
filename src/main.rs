use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use gatehouse::{AppConfig, AppContext, Navigation, SessionSnapshot};
use gatehouse_core_types::TracingNotifier;
use http::Method;
use permission_tree::{
    compile_tree, load_manifest_from_path, load_tree_from_path, CompiledRoute, ViewRegistry,
};
use request_gate::{compute_fingerprint, GatewayRequest, Payload, DEFAULT_DOWNLOAD_TYPE};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Gatehouse - admin console kernel
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable debug mode
    #[arg(short, long)]
    debug: bool,

    /// Output format
    #[arg(short, long, default_value = "human")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Yaml,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the de-duplication fingerprint of a request
    Fingerprint(FingerprintArgs),
    /// Compile a permission tree file into routes and permissions
    Compile(CompileArgs),
    /// Check permission keys against a permission tree file
    Check(CheckArgs),
    /// Sign in and keep the session for later commands
    Login(LoginArgs),
    /// Sign out and forget the stored session
    Logout,
    /// Send a request through the gate with the stored session
    Fetch(FetchArgs),
    /// Download a file through the gate with the stored session
    Download(DownloadArgs),
    /// Navigate to a path and print the resulting route table
    Routes(RoutesArgs),
    /// Print the effective configuration
    Config,
    /// Print version and build information
    Info,
}

#[derive(Args)]
struct FingerprintArgs {
    #[arg(long, default_value = "GET")]
    method: String,
    #[arg(long)]
    url: String,
    /// Query parameters (JSON, anything else is taken verbatim)
    #[arg(long)]
    params: Option<String>,
    /// Request body (JSON, anything else is taken verbatim)
    #[arg(long)]
    body: Option<String>,
}

#[derive(Args)]
struct CompileArgs {
    /// Permission tree (JSON or YAML, bare list or captured response)
    #[arg(long, value_name = "FILE")]
    tree: PathBuf,
    /// View manifest (JSON or YAML)
    #[arg(long, value_name = "FILE")]
    views: Option<PathBuf>,
}

#[derive(Args)]
struct CheckArgs {
    #[arg(long, value_name = "FILE")]
    tree: PathBuf,
    /// Permission keys to check
    #[arg(required = true)]
    keys: Vec<String>,
}

#[derive(Args)]
struct LoginArgs {
    #[arg(long)]
    phone: String,
    #[arg(long, env = "GATEHOUSE_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Args)]
struct FetchArgs {
    #[arg(long)]
    url: String,
    #[arg(long, default_value = "GET")]
    method: String,
    #[arg(long)]
    params: Option<String>,
    #[arg(long)]
    body: Option<String>,
    /// Token to send instead of the stored session's
    #[arg(long)]
    token: Option<String>,
}

#[derive(Args)]
struct DownloadArgs {
    #[arg(long)]
    url: String,
    #[arg(long, default_value = "GET")]
    method: String,
    /// Sent as the body for POST and as the query otherwise
    #[arg(long)]
    params: Option<String>,
    #[arg(long, default_value = DEFAULT_DOWNLOAD_TYPE)]
    file_type: String,
    /// Directory to save into
    #[arg(long, default_value = ".")]
    out: PathBuf,
}

#[derive(Args)]
struct RoutesArgs {
    /// Path to navigate to
    #[arg(long, default_value = "/")]
    to: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.debug)?;
    info!("Starting Gatehouse v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Fingerprint(args) => cmd_fingerprint(args, cli.output),
        Commands::Compile(args) => cmd_compile(args, &config, cli.output),
        Commands::Check(args) => cmd_check(args, &config, cli.output),
        Commands::Login(args) => cmd_login(args, config, cli.output).await,
        Commands::Logout => cmd_logout(config).await,
        Commands::Fetch(args) => cmd_fetch(args, config, cli.output).await,
        Commands::Download(args) => cmd_download(args, config, cli.output).await,
        Commands::Routes(args) => cmd_routes(args, config, cli.output).await,
        Commands::Config => emit(cli.output, &config, || {
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default())
        }),
        Commands::Info => cmd_info(cli.output),
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("Command failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging(level: &str, debug: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string())),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = AppConfig::load(path).context("Failed to load configuration")?;
    match path {
        Some(path) => info!("Loaded configuration from: {}", path.display()),
        None => info!("Using default configuration layers"),
    }
    Ok(config)
}

fn emit<T: Serialize>(output: OutputFormat, value: &T, human: impl FnOnce()) -> Result<()> {
    match output {
        OutputFormat::Human => human(),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

fn parse_payload(raw: Option<&str>) -> Option<Payload> {
    raw.map(|raw| match serde_json::from_str::<Value>(raw) {
        Ok(value) => Payload::json(value),
        Err(_) => Payload::opaque(raw),
    })
}

fn parse_method(raw: &str) -> Result<Method> {
    Method::from_bytes(raw.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method: {raw}"))
}

fn cmd_fingerprint(args: FingerprintArgs, output: OutputFormat) -> Result<()> {
    let method = parse_method(&args.method)?;
    let params = parse_payload(args.params.as_deref());
    let body = parse_payload(args.body.as_deref());
    let fingerprint = compute_fingerprint(&method, &args.url, params.as_ref(), body.as_ref());
    let value = json!({ "fingerprint": fingerprint.as_str(), "display": fingerprint.to_string() });
    emit(output, &value, || println!("{fingerprint}"))
}

fn load_registry(views: Option<&Path>, config: &AppConfig) -> Result<ViewRegistry> {
    let path = views.or(config.permissions.views_manifest.as_deref());
    match path {
        Some(path) => load_manifest_from_path(path)
            .with_context(|| format!("Failed to load view manifest {}", path.display())),
        None => Ok(ViewRegistry::new()),
    }
}

fn print_routes(routes: &[CompiledRoute], depth: usize) {
    for route in routes {
        let target = match (&route.view, &route.redirect) {
            (Some(view), _) if view.fallback => format!("-> {} (missing view)", view.key),
            (Some(view), _) => format!("-> {}", view.target),
            (None, Some(redirect)) => format!("=> {redirect}"),
            (None, None) => String::new(),
        };
        let title = route.meta.title.as_deref().unwrap_or("");
        println!("{}{} {} {}", "  ".repeat(depth), route.path, title, target);
        print_routes(&route.children, depth + 1);
    }
}

fn cmd_compile(args: CompileArgs, config: &AppConfig, output: OutputFormat) -> Result<()> {
    let nodes = load_tree_from_path(&args.tree)
        .with_context(|| format!("Failed to load permission tree {}", args.tree.display()))?;
    let registry = load_registry(args.views.as_deref(), config)?;
    let compiled = compile_tree(&nodes, &registry, config.permissions.limits())
        .context("Failed to compile permission tree")?;

    let value = json!({ "routes": compiled.routes, "perms": compiled.perms });
    emit(output, &value, || {
        print_routes(&compiled.routes, 0);
        println!();
        for perm in compiled.perms.iter() {
            println!("perm {perm}");
        }
    })
}

fn cmd_check(args: CheckArgs, config: &AppConfig, output: OutputFormat) -> Result<()> {
    let nodes = load_tree_from_path(&args.tree)
        .with_context(|| format!("Failed to load permission tree {}", args.tree.display()))?;
    let compiled = compile_tree(&nodes, &ViewRegistry::new(), config.permissions.limits())
        .context("Failed to compile permission tree")?;

    let results: Vec<(String, bool)> = args
        .keys
        .iter()
        .map(|key| (key.clone(), compiled.perms.has_permission(Some(key.as_str()))))
        .collect();
    let value: serde_json::Map<String, Value> = results
        .iter()
        .map(|(key, granted)| (key.clone(), Value::Bool(*granted)))
        .collect();
    emit(output, &value, || {
        for (key, granted) in &results {
            println!("{key}: {}", if *granted { "granted" } else { "denied" });
        }
    })
}

fn session_path(config: &AppConfig) -> Result<PathBuf> {
    config
        .session
        .state_file()
        .context("No location available for the session file")
}

/// Context with the stored session restored, if any.
fn open_context(config: AppConfig) -> Result<AppContext> {
    let path = session_path(&config)?;
    let ctx = AppContext::new(config, Arc::new(TracingNotifier))
        .context("Failed to initialise console context")?;
    if let Some(snapshot) = SessionSnapshot::load(&path)? {
        ctx.session().restore(snapshot);
    }
    Ok(ctx)
}

async fn cmd_login(args: LoginArgs, config: AppConfig, output: OutputFormat) -> Result<()> {
    let path = session_path(&config)?;
    let ctx = AppContext::new(config, Arc::new(TracingNotifier))?;
    let info = ctx
        .login(&args.phone, &args.password)
        .await
        .context("Login failed")?;
    ctx.session().snapshot().save(&path)?;
    emit(output, &info, || {
        println!(
            "Signed in as {}",
            info.username.as_deref().or(info.phone.as_deref()).unwrap_or("?")
        )
    })
}

async fn cmd_logout(config: AppConfig) -> Result<()> {
    let path = session_path(&config)?;
    let ctx = open_context(config)?;
    let next = ctx.sign_out(None).await;
    SessionSnapshot::remove(&path)?;
    println!("Signed out, continue at {next}");
    Ok(())
}

async fn cmd_fetch(args: FetchArgs, config: AppConfig, output: OutputFormat) -> Result<()> {
    let ctx = open_context(config)?;
    if let Some(token) = args.token {
        ctx.session().set_token(token);
    }

    let mut request = GatewayRequest::new(parse_method(&args.method)?, args.url);
    request.params = parse_payload(args.params.as_deref());
    request.body = parse_payload(args.body.as_deref());
    let result = ctx.gate().execute(request).await;
    if let Some(next) = ctx.take_pending_redirect() {
        SessionSnapshot::remove(&session_path(ctx.config())?)?;
        bail!("Session expired, sign in again ({next})");
    }
    let envelope = result.context("Request failed")?;
    emit(output, &envelope, || {
        println!(
            "{}",
            serde_json::to_string_pretty(&envelope.data).unwrap_or_default()
        )
    })
}

async fn cmd_download(args: DownloadArgs, config: AppConfig, output: OutputFormat) -> Result<()> {
    let ctx = open_context(config)?;
    let method = parse_method(&args.method)?;
    let file = ctx
        .gate()
        .download(
            method,
            &args.url,
            parse_payload(args.params.as_deref()),
            &args.file_type,
        )
        .await
        .context("Download failed")?;
    let saved = file
        .save_into(&args.out)
        .with_context(|| format!("Failed to write into {}", args.out.display()))?;

    let value = json!({
        "file": saved,
        "contentType": file.content_type,
        "bytes": file.bytes.len(),
    });
    emit(output, &value, || {
        println!("Saved {} ({} bytes)", saved.display(), file.bytes.len())
    })
}

async fn cmd_routes(args: RoutesArgs, config: AppConfig, output: OutputFormat) -> Result<()> {
    let ctx = open_context(config)?;
    let navigation = ctx.navigate(&args.to).await;
    let routes = ctx.route_table();
    let perms: Vec<String> = ctx.permissions().perms().iter().map(str::to_string).collect();

    let outcome = match &navigation {
        Navigation::Proceed => json!({ "outcome": "proceed", "location": args.to }),
        Navigation::Stay => json!({ "outcome": "stay" }),
        Navigation::Redirect(target) => json!({ "outcome": "redirect", "location": target }),
        Navigation::Replace(target) => json!({ "outcome": "replace", "location": target }),
    };
    let value = json!({ "navigation": outcome, "routes": routes, "perms": perms });
    emit(output, &value, || {
        println!("navigation: {navigation:?}");
        print_routes(&routes, 0);
        for perm in &perms {
            println!("perm {perm}");
        }
    })
}

fn cmd_info(output: OutputFormat) -> Result<()> {
    let value = json!({
        "version": env!("CARGO_PKG_VERSION"),
        "commit": env!("GATEHOUSE_COMMIT"),
        "built": env!("GATEHOUSE_BUILD_DATE"),
        "defaultConfig": gatehouse::config::default_config_path(),
    });
    emit(output, &value, || {
        println!(
            "gatehouse {} ({}, built {})",
            env!("CARGO_PKG_VERSION"),
            env!("GATEHOUSE_COMMIT"),
            env!("GATEHOUSE_BUILD_DATE")
        )
    })
}
