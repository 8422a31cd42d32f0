use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};
use std::sync::Arc;
use vauban::builder::ScriptBuilder;
use vauban::config::VaubanConfig;
use vauban::constants::{DEFAULT_JOB_IMAGE, DEFAULT_NAMESPACE, NOTIFICATION_HISTORY_LIMIT};
use vauban::logging;
use vauban::media::MediaStore;
use vauban::notify::{Notifier, SlackClient, SlackSettings};
use vauban::platform::{JobTemplate, KubePlatform};
use vauban::request::BuildRequest;
use vauban::scheduler::BuildScheduler;
use vauban::server::{start_server, AppState, ServiceSettings};
use vauban::stage::Stage;
use vauban::tracker::{JobTracker, TrackerConfig};
use vauban::tree::ImageTree;

#[derive(Parser)]
#[command(name = "vauban", version)]
#[command(about = "Layered OS image build orchestrator", long_about = None)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true, env = "VAUBAN_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an image, and its parents when asked
    Build(BuildArgs),

    /// List the defined images
    List {
        #[arg(long, default_value = "config.yml", env = "VAUBAN_CONFIG_PATH")]
        config_path: PathBuf,

        /// Only images with a build schedule
        #[arg(long)]
        scheduled: bool,
    },

    /// Run the HTTP build service submitting builds as cluster jobs
    Serve(ServeArgs),
}

#[derive(Args)]
struct BuildArgs {
    /// Name of the image to build
    #[arg(long, env = "VAUBAN_NAME")]
    name: String,

    #[arg(long, value_enum, default_value_t = Stage::All, env = "VAUBAN_STAGE")]
    stage: Stage,

    /// Override the configured branch
    #[arg(long, env = "VAUBAN_BRANCH")]
    branch: Option<String>,

    /// Print builder commands and trace the builder
    #[arg(long, env = "VAUBAN_DEBUG")]
    debug: bool,

    /// Render the builder commands without running them
    #[arg(long, env = "VAUBAN_CHECK")]
    check: bool,

    #[arg(long, default_value = "config.yml", env = "VAUBAN_CONFIG_PATH")]
    config_path: PathBuf,

    /// Parent generations to build first; negative builds every ancestor
    #[arg(long, default_value_t = 0, allow_negative_numbers = true, env = "VAUBAN_BUILD_PARENTS")]
    build_parents: i32,

    /// Override the configured conffs host
    #[arg(long, env = "VAUBAN_CONFFS")]
    conffs: Option<String>,
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long, default_value = "0.0.0.0:8080", env = "VAUBAN_LISTEN")]
    listen: SocketAddr,

    #[arg(long, default_value = DEFAULT_NAMESPACE, env = "VAUBAN_NAMESPACE")]
    namespace: String,

    /// Container image running the builds
    #[arg(long, default_value = DEFAULT_JOB_IMAGE, env = "VAUBAN_JOB_IMAGE")]
    image: String,

    /// Program invoked inside the job container
    #[arg(long, default_value = "vauban", env = "VAUBAN_JOB_PROGRAM")]
    job_program: String,

    #[arg(long, env = "VAUBAN_SERVICE_ACCOUNT")]
    service_account: Option<String>,

    /// Secret mounted read-only at /opt/vauban in every job
    #[arg(long, env = "VAUBAN_SECRET")]
    secret: Option<String>,

    /// Shell snippet run before the build command
    #[arg(long, env = "VAUBAN_SETUP_SCRIPT")]
    setup_script: Option<String>,

    /// Notifications are disabled without a token
    #[arg(long, env = "SLACK_TOKEN", hide_env_values = true)]
    slack_token: Option<String>,

    #[arg(long, default_value = "vauban", env = "SLACK_CHANNEL")]
    slack_channel: String,

    #[arg(long, env = "SLACK_CHANNEL_ID")]
    slack_channel_id: Option<String>,

    #[arg(long, default_value = "Vauban build manager", env = "SLACK_USERNAME")]
    slack_username: String,

    #[arg(long, default_value = ":robot_face:", env = "SLACK_ICON_EMOJI")]
    slack_icon_emoji: String,

    #[arg(long, default_value_t = NOTIFICATION_HISTORY_LIMIT, env = "SLACK_MAX_HISTORY_FETCH")]
    slack_history_limit: u32,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let debug = matches!(&cli.command, Commands::Build(args) if args.debug || args.check);
    if let Err(e) = logging::init_logging(cli.log_json, logging::default_directive(debug)) {
        eprintln!("cannot initialise logging: {e}");
    }

    let result = match cli.command {
        Commands::Build(args) => run_build(args),
        Commands::List {
            config_path,
            scheduled,
        } => run_list(&config_path, scheduled),
        Commands::Serve(args) => run_serve(args),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "vauban failed");
            ExitCode::FAILURE
        }
    }
}

fn load_tree(config_path: &Path) -> Result<(VaubanConfig, ImageTree)> {
    let config = VaubanConfig::load(config_path)
        .with_context(|| format!("cannot load {}", config_path.display()))?;
    let tree = ImageTree::from_config(&config)?;
    Ok((config, tree))
}

fn run_build(args: BuildArgs) -> Result<ExitCode> {
    let (config, tree) = load_tree(&args.config_path)?;

    let node = match tree.resolve(&args.name) {
        Ok(node) => node,
        Err(e) => {
            tracing::error!(error = %e, config = %args.config_path.display(), "Cannot build");
            return Ok(ExitCode::FAILURE);
        }
    };

    let request = BuildRequest::new(args.name.clone(), args.stage)
        .with_branch(args.branch.clone())
        .with_build_parents(args.build_parents)
        .with_conffs_override(args.conffs.clone())
        .with_debug(args.debug)
        .with_check(args.check);

    if request.debug() {
        let names: Vec<&str> = tree.list_names().collect();
        println!("Available images:");
        println!("{}", serde_json::to_string_pretty(&names)?);
        println!("Selected image:");
        println!("{}", serde_json::to_string_pretty(node)?);
    }

    let media = MediaStore::new(&config.global.iso_dir);
    let builder = ScriptBuilder::new();
    let scheduler = BuildScheduler::new(&tree, &config.global, &media, &builder);

    match scheduler.build(&request) {
        Ok(report) => {
            if request.check() {
                for command in report.commands() {
                    println!("{}", command);
                }
            } else if !request.debug() {
                print_summary(&args.name, args.stage);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_nothing_to_do() && std::env::var_os("CI").is_some() => {
            tracing::warn!(error = %e, "nothing to build");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            tracing::error!(error = %e, "Building failed !");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_summary(name: &str, stage: Stage) {
    if stage.builds_rootfs() {
        println!("Building successful ! {} was built. Details:", name);
        let details = Command::new("docker")
            .args(["run", "--rm", name, "cat", "/imginfo"])
            .status();
        if let Err(e) = details {
            tracing::warn!(error = %e, "cannot read image details");
        }
    }
    if stage.builds_conffs() {
        println!("Building successful ! conffs for {} was/were built.", name);
    }
    if matches!(
        stage,
        Stage::Initramfs | Stage::Kernel | Stage::All | Stage::Trueall
    ) {
        println!("Building successful !");
    }
}

fn run_list(config_path: &Path, scheduled: bool) -> Result<ExitCode> {
    let (_, tree) = load_tree(config_path)?;
    if scheduled {
        for (node, schedule) in tree.scheduled() {
            println!(
                "{}\t{}\t{}\t{}",
                node.name, schedule.cron, schedule.options.stage, schedule.options.build_parents
            );
        }
    } else {
        for name in tree.list_names() {
            println!("{}", name);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_serve(args: ServeArgs) -> Result<ExitCode> {
    // the build path uses blocking HTTP, so only the service owns a runtime
    let runtime = tokio::runtime::Runtime::new().context("cannot start the async runtime")?;
    runtime.block_on(serve(args))?;
    Ok(ExitCode::SUCCESS)
}

async fn serve(args: ServeArgs) -> Result<()> {
    let template = JobTemplate {
        namespace: args.namespace,
        service_account: args.service_account,
        secret_name: args.secret,
        setup_script: args.setup_script,
    };
    let platform = Arc::new(KubePlatform::new(template).await?);
    let mut tracker = JobTracker::new(platform, TrackerConfig::default());

    match args.slack_token {
        Some(token) => {
            let mut settings = SlackSettings::new(token, args.slack_channel);
            settings.channel_id = args.slack_channel_id;
            settings.username = args.slack_username;
            settings.icon_emoji = args.slack_icon_emoji;
            settings.history_limit = args.slack_history_limit;
            let slack = SlackClient::connect(settings)
                .await
                .context("cannot reach Slack")?;
            tracker = tracker.with_notifier(Arc::new(Notifier::new(Arc::new(slack))));
        }
        None => tracing::warn!("SLACK_TOKEN not set, job notifications disabled"),
    }

    let state = Arc::new(AppState {
        tracker,
        settings: ServiceSettings {
            default_image: args.image,
            job_program: args.job_program,
            source: std::env::var("HOSTNAME").unwrap_or_else(|_| "undefined".to_string()),
        },
    });

    start_server(args.listen, state).await
}
