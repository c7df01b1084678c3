//! inspect - run wafer defect detection from the command line
//!
//! `inspect run` performs one detection run over an image, a video file or a
//! camera and prints the results table of the last processed frame. Ctrl-C
//! stops a running camera or video cleanly. `inspect register` adds an
//! operator account for the optional login gate.

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::time::Duration;

use wafer_inspect::config::AppConfig;
use wafer_inspect::ui::{Ui, UiMode};
use wafer_inspect::{AccountStore, DetectionController, Origin, RunOutcome, SourceKind};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run detection over one source.
    Run(RunArgs),
    /// Register an operator account.
    Register {
        #[arg(long)]
        user: String,
        #[arg(long, env = "INSPECT_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Source kind; inferred from the input when omitted.
    #[arg(long)]
    source: Option<SourceKind>,
    /// Image path, video path or camera index.
    #[arg(long)]
    input: String,
    /// Confidence threshold (clamped to [0, 1]).
    #[arg(long)]
    conf: Option<f32>,
    /// IoU threshold for overlap suppression (clamped to [0, 1]).
    #[arg(long)]
    iou: Option<f32>,
    /// Do not record annotated video.
    #[arg(long)]
    no_record: bool,
    /// Save the last annotated frame when the run ends.
    #[arg(long)]
    save_last: bool,
    #[arg(long, value_enum, default_value_t = UiMode::Auto)]
    ui: UiMode,
    /// Operator name, required when the login gate is enabled.
    #[arg(long)]
    user: Option<String>,
    #[arg(long, env = "INSPECT_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = AppConfig::load()?;

    match cli.command {
        Command::Register { user, password } => {
            let mut store = AccountStore::open(&config.accounts.path);
            store.register(&user, &password)?;
            println!("registered {} in {}", user.trim(), store.path().display());
            Ok(())
        }
        Command::Run(args) => run(config, args),
    }
}

fn run(mut config: AppConfig, args: RunArgs) -> Result<()> {
    if config.accounts.require_login {
        let user = args
            .user
            .as_deref()
            .ok_or_else(|| anyhow!("login required: pass --user and --password"))?;
        let password = args.password.as_deref().unwrap_or_default();
        AccountStore::open(&config.accounts.path)
            .login(user, password)
            .context("login failed")?;
        log::info!("operator {} logged in", user);
    }

    if args.no_record {
        config.output.record_video = false;
        config.output.record_camera = false;
    }
    let kind = match args.source {
        Some(kind) => kind,
        None => Origin::infer(&args.input)?.kind(),
    };
    let confidence = args.conf.unwrap_or(config.detection.confidence());
    let iou = args.iou.unwrap_or(config.detection.iou());

    let ui = Ui::detect(args.ui);
    let mut controller = {
        let _stage = ui.stage("loading detector");
        DetectionController::from_config(config)?
    };

    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("failed to install Ctrl-C handler")?;

    controller.start(kind, &args.input, confidence, iou)?;
    let mut progress = ui.run_progress(controller.status());
    while controller.is_running() {
        if stop_rx.try_recv().is_ok() {
            log::info!("stop requested");
            controller.stop();
            break;
        }
        controller.pump_events_timeout(POLL_INTERVAL);
        let sink = controller.sink();
        progress.update(sink.stats().frames_handled, sink.table().len());
    }
    let sink = controller.sink();
    progress.update(sink.stats().frames_handled, sink.table().len());
    progress.finish(controller.status());

    print!("{}", controller.sink().table());
    if controller.sink().stats().write_failures > 0 {
        log::warn!(
            "{} frames could not be recorded",
            controller.sink().stats().write_failures
        );
    }
    if let Some(path) = controller.last_saved_video() {
        println!("video: {}", path.display());
    }
    if args.save_last {
        let path = controller.save_last_result()?;
        println!("saved: {}", path.display());
    }

    match controller.last_summary().map(|summary| &summary.outcome) {
        Some(RunOutcome::Failed(err)) => Err(anyhow!(err.clone())),
        _ => Ok(()),
    }
}
