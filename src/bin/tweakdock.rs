// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use tweakdock::{
    config::Settings,
    device::{Device, DeviceToolGateway, ToolchainGateway},
    path::{default_documents_dir, default_settings_path, Layout},
    pipeline::TweakPipeline,
    plist_store::{parse_value, KeyValueStore, PlistFiles},
    release::{self, ImageStatus, MountState, ReleaseAcquirer},
    session::Session,
    tweak::Tweak,
    version::Version,
    workspace::WorkspaceManager,
};

use anyhow::{anyhow, bail, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::Select;
use std::{collections::BTreeMap, path::PathBuf, process::exit, time::Duration};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "tweakdock [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        let context = Context::load(&self.global)?;
        match self.command {
            Command::Devices => run_devices(context),
            Command::Workspace => run_workspace(context),
            Command::Image => run_image(context).await,
            Command::Mount(opts) => run_mount(context, opts).await,
            Command::Apply(opts) => run_apply(context, opts).await,
            Command::Location(opts) => run_location(context, opts),
            Command::TweakOption(opts) => run_option(context, opts),
            Command::Apps => run_apps(context),
        }
    }
}

#[derive(Debug, Clone, Args)]
struct GlobalOptions {
    /// Identifier of device to work on.
    #[arg(short, long, global = true, value_name = "udid")]
    pub device: Option<String>,

    /// Documents root to use instead of the configured one.
    #[arg(long, global = true, value_name = "path")]
    pub documents: Option<PathBuf>,

    /// Settings file to use instead of the default one.
    #[arg(long, global = true, value_name = "path")]
    pub settings: Option<PathBuf>,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// List connected devices.
    Devices,

    /// Seed workspace of device and show where it lives.
    Workspace,

    /// Download developer disk image matching device version.
    Image,

    /// Mount developer disk image onto device.
    Mount(MountOptions),

    /// Apply tweaks to device.
    #[command(override_usage = "tweakdock apply [options] [<tweak>]...")]
    Apply(ApplyOptions),

    /// Simulate device location.
    #[command(subcommand)]
    Location(LocationCommand),

    /// Read or write option of a tweak.
    #[command(subcommand, name = "option")]
    TweakOption(OptionCommand),

    /// List home screen apps of device.
    Apps,
}

#[derive(Parser, Clone, Debug)]
struct MountOptions {
    /// Mount image even if device reports one is already mounted.
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Parser, Clone, Debug)]
struct ApplyOptions {
    /// Tweaks to enable.
    #[arg(group = "tweaks", value_name = "tweak")]
    pub tweaks: Vec<Tweak>,

    /// Enable every tweak present in workspace.
    #[arg(short, long, group = "tweaks")]
    pub all: bool,
}

#[derive(Subcommand, Clone, Debug)]
enum LocationCommand {
    /// Set simulated location.
    Set {
        #[arg(allow_negative_numbers = true)]
        latitude: f64,

        #[arg(allow_negative_numbers = true)]
        longitude: f64,
    },

    /// Stop simulating location.
    Reset,
}

#[derive(Subcommand, Clone, Debug)]
enum OptionCommand {
    /// Set key in property list of tweak.
    Set {
        tweak: Tweak,

        /// Property list path relative to tweak folder.
        file: PathBuf,

        key: String,

        value: String,
    },

    /// Show key in property list of tweak.
    Get {
        tweak: Tweak,

        /// Property list path relative to tweak folder.
        file: PathBuf,

        key: String,
    },
}

struct Context {
    settings: Settings,
    layout: Layout,
    gateway: ToolchainGateway,
    device: Option<String>,
}

impl Context {
    fn load(opts: &GlobalOptions) -> Result<Self> {
        let settings_path = match &opts.settings {
            Some(path) => path.clone(),
            None => default_settings_path()?,
        };
        let settings = Settings::load(settings_path)?;
        let layout = settings.layout(opts.documents.clone(), default_documents_dir()?);

        let tools = settings
            .paths
            .tools
            .clone()
            .unwrap_or_else(|| layout.tools_dir());
        let mut gateway = ToolchainGateway::new(tools, layout.root());
        if let Some(libraries) = &settings.paths.libraries {
            gateway = gateway.with_library_dir(libraries);
        }

        Ok(Self {
            settings,
            layout,
            gateway,
            device: opts.device.clone(),
        })
    }

    fn select_device(&self) -> Result<Device> {
        let mut devices = self.gateway.list_devices()?;
        if let Some(id) = &self.device {
            return devices
                .into_iter()
                .find(|device| &device.id == id)
                .ok_or_else(|| anyhow!("device {id} is not connected"));
        }

        match devices.len() {
            0 => bail!("no devices connected"),
            1 => Ok(devices.remove(0)),
            _ => Ok(Select::new("device", devices).prompt()?),
        }
    }

    fn open_session(&self) -> Result<Session> {
        let template = self
            .settings
            .paths
            .template
            .clone()
            .unwrap_or_else(|| self.layout.template_dir());
        let mut session = Session::new(WorkspaceManager::new(self.layout.clone(), template));
        session.set_current_device(self.select_device()?)?;

        Ok(session)
    }
}

fn current_device(session: &Session) -> Result<&Device> {
    session
        .current_device()
        .ok_or_else(|| anyhow!("no current device"))
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}

fn run_devices(context: Context) -> Result<()> {
    let devices = context.gateway.list_devices()?;
    if devices.is_empty() {
        info!("no devices connected");
    }

    for device in devices {
        println!("{device}");
    }

    Ok(())
}

fn run_workspace(context: Context) -> Result<()> {
    let session = context.open_session()?;
    let workspace = session
        .current_workspace()
        .ok_or_else(|| anyhow!("device runs an unsupported OS version"))?;
    println!("{}", workspace.path().display());

    for tweak in Tweak::ALL {
        let marker = if workspace.tweak_dir(tweak).is_dir() {
            "present"
        } else {
            "missing"
        };
        println!("  {tweak:<20} {marker}");
    }

    Ok(())
}

async fn acquire_image(context: &Context, session: &Session) -> Result<ReleaseAcquirer> {
    let device = current_device(session)?;
    let target: Version = device.version.parse()?;

    let bar = ProgressBar::new(0);
    let style = ProgressStyle::with_template(
        "{elapsed_precise:.green}  {msg:<30}  [{wide_bar:.yellow/blue}] {bytes}/{total_bytes}",
    )?
    .progress_chars("-Cco.");
    bar.set_style(style);
    bar.set_message(format!("developer disk image {target}"));

    let acquirer =
        ReleaseAcquirer::new(&context.settings.releases, &context.layout)?.with_progress(bar);
    match acquirer
        .ensure_image(&device.id, target, session.image_sink())
        .await?
    {
        ImageStatus::AlreadyPresent => info!("developer disk image for {target} already cached"),
        ImageStatus::Downloaded(resolved) => {
            info!("downloaded developer disk image {resolved} for {target}")
        }
        ImageStatus::Failed(reason) => bail!("failed to acquire developer disk image: {reason}"),
    }

    Ok(acquirer)
}

async fn run_image(context: Context) -> Result<()> {
    let session = context.open_session()?;
    acquire_image(&context, &session).await?;

    Ok(())
}

async fn run_mount(context: Context, opts: MountOptions) -> Result<()> {
    let mut session = context.open_session()?;
    let device = current_device(&session)?.clone();
    if !opts.force && !release::needs_mounting(&context.gateway, &device.id) {
        info!("developer disk image already mounted on {}", device.name);
        session.set_mount_state(MountState::Mounted);
        return Ok(());
    }

    let acquirer = acquire_image(&context, &session).await?;
    session.set_mount_state(MountState::Mounting);
    let state = release::mount_image(&context.gateway, acquirer.cache(), &device)?;
    session.set_mount_state(state);

    if state == MountState::Failed {
        bail!("{} refused to mount developer disk image", device.name);
    }

    Ok(())
}

async fn run_apply(context: Context, opts: ApplyOptions) -> Result<()> {
    let mut session = context.open_session()?;
    let workspace = session
        .current_workspace()
        .ok_or_else(|| anyhow!("device runs an unsupported OS version"))?
        .clone();

    let tweaks = if opts.all {
        Tweak::ALL
            .into_iter()
            .filter(|tweak| workspace.tweak_dir(*tweak).is_dir())
            .collect()
    } else {
        opts.tweaks
    };

    if tweaks.is_empty() {
        warn!("no tweaks enabled, restoring an empty backup");
    }

    for tweak in tweaks {
        session.set_enabled(tweak, true);
    }

    let bar = ProgressBar::new_spinner();
    bar.enable_steady_tick(Duration::from_millis(100));
    let pipeline = TweakPipeline::new(context.gateway.clone(), context.layout.clone());
    let observer = bar.clone();
    let result = tokio::task::spawn_blocking(move || {
        pipeline.apply_with(&session, |stage| observer.set_message(stage.to_string()))
    })
    .await?;
    bar.finish_and_clear();

    if let Err(error) = result {
        bail!("apply failed while {}: {error}", error.stage());
    }

    info!("tweaks applied, device will reboot once restore completes");
    Ok(())
}

fn run_location(context: Context, opts: LocationCommand) -> Result<()> {
    let device = context.select_device()?;
    match opts {
        LocationCommand::Set {
            latitude,
            longitude,
        } => {
            context
                .gateway
                .set_location(&device.id, latitude, longitude)?;
            info!("simulating location {latitude}, {longitude} on {}", device.name);
        }
        LocationCommand::Reset => {
            context.gateway.reset_location(&device.id)?;
            info!("stopped simulating location on {}", device.name);
        }
    }

    Ok(())
}

fn run_option(context: Context, opts: OptionCommand) -> Result<()> {
    let session = context.open_session()?;
    let workspace = session
        .current_workspace()
        .ok_or_else(|| anyhow!("device runs an unsupported OS version"))?;
    let store = PlistFiles::new();

    match opts {
        OptionCommand::Set {
            tweak,
            file,
            key,
            value,
        } => {
            let path = workspace.tweak_file(tweak, file)?;
            store.set_values(&path, BTreeMap::from([(key, parse_value(&value))]))?;
        }
        OptionCommand::Get { tweak, file, key } => {
            let path = workspace.tweak_file(tweak, file)?;
            match store.value(&path, &key)? {
                Some(value) => println!("{value:?}"),
                None => bail!("{key} is not set in {:?}", path.display()),
            }
        }
    }

    Ok(())
}

fn run_apps(context: Context) -> Result<()> {
    let device = context.select_device()?;
    let pages = context.gateway.home_screen_pages(&device.id)?;
    info!("{} has {pages} home screen pages", device.name);

    for (bundle, name) in context.gateway.home_screen_apps(&device.id)? {
        println!("{name:<30} {bundle}");
    }

    Ok(())
}
