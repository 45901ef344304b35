// src/main.rs
//! dtracked - route tracking and find logging from the terminal

use anyhow::{anyhow, bail, Context};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use dtracked::{
    config::TrackerConfig,
    display::{self, run_headless, TerminalDisplay},
    export::{ExportFormat, Exporter},
    geo::Coordinate,
    gps::{list_serial_ports, spawn_source, GpsSource, PositionUpdate},
    store::{
        FindEdit, FindRecord, NewFind, RecordEdit, RecordStore, RouteArchive, RouteRecord,
        SiteType, FINDS_PER_PAGE, ROUTES_PER_PAGE,
    },
    tracker::{RouteTracker, TrackerHandle},
    tracking::{
        inhibit::InhibitPlatform, route::format_duration, NoWakeLock, TrackerEvent,
        WakeLockPlatform,
    },
};
use std::{path::PathBuf, time::Duration};
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dtracked", version, about = "Track routes and log finds from a GPS receiver")]
struct Cli {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file instead of ~/.config/dtracked/config.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Record file instead of the configured one
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Show live position and record routes (default)
    Track(TrackArgs),
    /// Log and manage finds
    Find {
        #[command(subcommand)]
        action: FindCommand,
    },
    /// Manage saved routes
    Route {
        #[command(subcommand)]
        action: RouteCommand,
    },
    /// Export finds and routes
    Export(ExportArgs),
    /// List available serial ports
    Ports,
    /// Show or create the config file
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceKind {
    Gpsd,
    Serial,
    Replay,
}

#[derive(Args, Default)]
struct SourceArgs {
    /// Position source for this run
    #[arg(long, value_enum)]
    source: Option<SourceKind>,

    /// Serial port (e.g. /dev/ttyUSB0)
    #[arg(long)]
    port: Option<String>,

    /// Serial baud rate
    #[arg(long)]
    baud: Option<u32>,

    #[arg(long)]
    gpsd_host: Option<String>,

    #[arg(long)]
    gpsd_port: Option<u16>,

    /// `latitude,longitude` file to replay
    #[arg(long)]
    replay: Option<PathBuf>,

    #[arg(long)]
    replay_interval_ms: Option<u64>,
}

#[derive(Args, Default)]
struct TrackArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Print notifications line by line instead of the status view
    #[arg(long)]
    headless: bool,

    /// Begin tracking right away
    #[arg(long)]
    start: bool,

    /// Name for routes saved in this session
    #[arg(long)]
    name: Option<String>,

    #[arg(long)]
    description: Option<String>,

    /// Do not try to keep the screen awake
    #[arg(long)]
    no_wake_lock: bool,

    /// Seconds before the first "still tracking?" check
    #[arg(long)]
    check_interval_secs: Option<u64>,

    /// Seconds between unanswered prompts
    #[arg(long)]
    prompt_interval_secs: Option<u64>,

    #[arg(long)]
    max_prompts: Option<u8>,
}

#[derive(Subcommand)]
enum FindCommand {
    /// Log a find at the given or current position
    Log {
        name: String,
        #[arg(long, allow_hyphen_values = true, requires = "lon")]
        lat: Option<f64>,
        #[arg(long, allow_hyphen_values = true, requires = "lat")]
        lon: Option<f64>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        site_name: Option<String>,
        /// home, sports-field, beach, event-facility, public-ground,
        /// unknown-heritage-site, known-heritage-site or other:<detail>
        #[arg(long)]
        site_type: Option<SiteType>,
        /// Image reference, repeatable
        #[arg(long = "image")]
        images: Vec<String>,
        /// Seconds to wait for a fix when no coordinates are given
        #[arg(long, default_value_t = 30)]
        wait_secs: u64,
        #[command(flatten)]
        source: SourceArgs,
    },
    List {
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = FINDS_PER_PAGE)]
        per_page: usize,
    },
    Edit {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        site_name: Option<String>,
        #[arg(long)]
        site_type: Option<SiteType>,
        /// Replace image references
        #[arg(long = "image")]
        images: Option<Vec<String>>,
    },
    Delete {
        id: String,
    },
}

#[derive(Subcommand)]
enum RouteCommand {
    List {
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = ROUTES_PER_PAGE)]
        per_page: usize,
    },
    Show {
        id: String,
    },
    Edit {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Replace image references
        #[arg(long = "image")]
        images: Option<Vec<String>>,
    },
    Delete {
        id: String,
    },
}

#[derive(Args)]
struct ExportArgs {
    #[arg(long, value_enum)]
    format: ExportFormat,

    #[arg(short, long)]
    output: PathBuf,

    /// Include every find
    #[arg(long)]
    all_finds: bool,

    /// Include every route
    #[arg(long)]
    all_routes: bool,

    /// Include a find by id, repeatable
    #[arg(long = "find")]
    finds: Vec<String>,

    /// Include a route by id, repeatable
    #[arg(long = "route")]
    routes: Vec<String>,
}

#[derive(Subcommand)]
enum ConfigCommand {
    Show,
    /// Write a default config file
    Init {
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Track(TrackArgs::default()));
    let owns_screen = matches!(&command, Command::Track(args) if !args.headless)
        && display::is_interactive();
    init_logging(cli.verbose, cli.log_file.as_deref(), owns_screen)?;

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => TrackerConfig::get_config_path()?,
    };
    let mut config = TrackerConfig::load_from(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    if let Some(store) = cli.store {
        config.store_path = Some(store);
    }

    match command {
        Command::Track(args) => run_track(config, args, owns_screen).await,
        Command::Find { action } => run_find(config, action).await,
        Command::Route { action } => run_route(config, action),
        Command::Export(args) => run_export(config, args),
        Command::Ports => {
            let ports = list_serial_ports()?;
            if ports.is_empty() {
                println!("No serial ports found.");
            } else {
                println!("Available serial ports:");
                for port in ports {
                    println!("  {}", port);
                }
            }
            Ok(())
        }
        Command::Config { action } => run_config(&config, &config_path, action),
    }
}

fn init_logging(
    verbose: u8,
    log_file: Option<&std::path::Path>,
    owns_screen: bool,
) -> anyhow::Result<()> {
    let default_level = match verbose {
        0 => "dtracked=info",
        1 => "dtracked=debug",
        _ => "dtracked=trace",
    };

    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .init();
    } else {
        // The status view owns the screen, keep stderr quiet
        let default_level = if owns_screen { "dtracked=warn" } else { default_level };
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

fn apply_source_args(config: &mut TrackerConfig, args: &SourceArgs) {
    match args.source {
        Some(SourceKind::Gpsd) => config.source_type = "gpsd".to_string(),
        Some(SourceKind::Serial) => config.source_type = "serial".to_string(),
        Some(SourceKind::Replay) => config.source_type = "replay".to_string(),
        None => {}
    }
    if let Some(port) = &args.port {
        let baud = args.baud.or(config.serial_baudrate).unwrap_or(9600);
        config.update_serial(port.clone(), baud);
    } else if let Some(baud) = args.baud {
        config.serial_baudrate = Some(baud);
    }
    if args.gpsd_host.is_some() || args.gpsd_port.is_some() {
        let host = args
            .gpsd_host
            .clone()
            .or_else(|| config.gpsd_host.clone())
            .unwrap_or_else(|| "localhost".to_string());
        let port = args.gpsd_port.or(config.gpsd_port).unwrap_or(2947);
        config.update_gpsd(host, port);
    }
    if let Some(file) = &args.replay {
        let interval = args
            .replay_interval_ms
            .or(config.replay_interval_ms)
            .unwrap_or(1000);
        config.update_replay(file.clone(), interval);
    } else if let Some(interval) = args.replay_interval_ms {
        config.replay_interval_ms = Some(interval);
    }
}

async fn run_track(
    mut config: TrackerConfig,
    args: TrackArgs,
    owns_screen: bool,
) -> anyhow::Result<()> {
    apply_source_args(&mut config, &args.source);
    if let Some(secs) = args.check_interval_secs {
        config.reminders.check_interval_secs = secs;
    }
    if let Some(secs) = args.prompt_interval_secs {
        config.reminders.prompt_interval_secs = secs;
    }
    if let Some(max) = args.max_prompts {
        config.reminders.max_prompts = max.max(1);
    }
    if args.no_wake_lock {
        config.keep_screen_on = false;
    }

    let source = config.gps_source()?;
    let store_path = config.store_path()?;
    let store = RecordStore::open(&store_path)
        .with_context(|| format!("Failed to open record file {}", store_path.display()))?;
    let archive = RouteArchive::new(store).with_details(args.name, args.description);

    let platform: Box<dyn WakeLockPlatform> = if config.keep_screen_on {
        Box::new(InhibitPlatform::detect())
    } else {
        Box::new(NoWakeLock)
    };

    let (tracker, handle) = RouteTracker::new(
        config.reminders,
        config.keep_screen_on,
        platform,
        Box::new(archive),
    );
    let mut events = handle.subscribe();

    let (tx, rx) = mpsc::channel(64);
    let source_task = spawn_source(source.clone(), tx)
        .await
        .with_context(|| format!("Failed to open {}", source.describe()))?;
    tracing::info!(source = %source.describe(), "Position source connected");

    let tracker_task = tokio::spawn(tracker.run(rx));
    if args.start {
        handle.start().await?;
    }

    let front_end = run_front_end(&handle, &source, owns_screen).await;
    // Make sure the tracker winds down even if the front end failed
    let _ = handle.shutdown().await;
    drop(handle);
    tracker_task.await.context("Tracker task failed")?;
    source_task.abort();

    report_final_events(&mut events);
    front_end
}

async fn run_front_end(
    handle: &TrackerHandle,
    source: &GpsSource,
    owns_screen: bool,
) -> anyhow::Result<()> {
    if owns_screen {
        TerminalDisplay::new(source.describe())
            .run(handle.clone())
            .await?;
    } else {
        println!("Tracking from {}", source.describe());
        println!("commands: t (start), s (stop), c (continue), q (quit)");
        run_headless(handle.clone()).await?;
    }
    Ok(())
}

/// Print what happened to the route during shutdown
fn report_final_events(events: &mut broadcast::Receiver<TrackerEvent>) {
    loop {
        let event = match events.try_recv() {
            Ok(event) => event,
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        };
        if matches!(
            event,
            TrackerEvent::TrackingStopped { .. }
                | TrackerEvent::RouteSaved { .. }
                | TrackerEvent::RouteTooShort { .. }
                | TrackerEvent::RouteSaveFailed { .. }
        ) {
            if let Some(message) = event.message() {
                println!("{}", message);
            }
        }
    }
}

fn open_store(config: &TrackerConfig) -> anyhow::Result<RecordStore> {
    let path = config.store_path()?;
    RecordStore::open(&path)
        .with_context(|| format!("Failed to open record file {}", path.display()))
}

async fn run_find(mut config: TrackerConfig, action: FindCommand) -> anyhow::Result<()> {
    match action {
        FindCommand::Log {
            name,
            lat,
            lon,
            description,
            site_name,
            site_type,
            images,
            wait_secs,
            source,
        } => {
            let location = match (lat, lon) {
                (Some(lat), Some(lon)) => Coordinate::new(lat, lon)?,
                _ => {
                    apply_source_args(&mut config, &source);
                    let source = config.gps_source()?;
                    println!("Waiting for a position fix from {}...", source.describe());
                    current_position(source, Duration::from_secs(wait_secs)).await?
                }
            };

            let mut store = open_store(&config)?;
            let find = store.log_find(NewFind {
                name,
                description,
                site_name,
                site_type,
                location,
                images,
            })?;
            println!("Find '{}' saved successfully! ({})", find.name, find.id);
        }
        FindCommand::List { page, per_page } => {
            let store = open_store(&config)?;
            let listing = store.list_finds(page, per_page)?;
            if listing.total == 0 {
                println!("No finds logged yet.");
            }
            for find in &listing.items {
                print_find(find);
            }
            if listing.total > 0 {
                println!("Page {} of {}", listing.page, listing.total_pages());
            }
        }
        FindCommand::Edit {
            id,
            name,
            description,
            site_name,
            site_type,
            images,
        } => {
            let mut store = open_store(&config)?;
            let find = store.edit_find(
                &id,
                FindEdit {
                    record: RecordEdit {
                        name,
                        description,
                        images,
                    },
                    site_name,
                    site_type,
                },
            )?;
            println!("Find '{}' updated.", find.name);
        }
        FindCommand::Delete { id } => {
            let mut store = open_store(&config)?;
            let find = store.delete_find(&id)?;
            println!("Find '{}' deleted.", find.name);
        }
    }
    Ok(())
}

/// First valid fix from the source, within `wait`
async fn current_position(source: GpsSource, wait: Duration) -> anyhow::Result<Coordinate> {
    let (tx, mut rx) = mpsc::channel(16);
    let task = spawn_source(source, tx).await?;

    let fix = tokio::time::timeout(wait, async {
        while let Some(update) = rx.recv().await {
            match update {
                PositionUpdate::Sample(sample) => match sample.coordinate() {
                    Ok(coordinate) => return Ok(coordinate),
                    Err(e) => tracing::debug!(error = %e, "Skipping invalid sample"),
                },
                PositionUpdate::Error(message) => bail!("Geolocation error: {}", message),
            }
        }
        Err(anyhow!("Position source closed before a fix arrived"))
    })
    .await;
    task.abort();

    fix.map_err(|_| anyhow!("No position fix within {} s", wait.as_secs()))?
}

/// First eight characters of a record id, enough for prefix lookup
fn short_id(id: &str) -> &str {
    id.char_indices().nth(8).map_or(id, |(end, _)| &id[..end])
}

fn print_find(find: &FindRecord) {
    println!("{}  {}", short_id(&find.id), find.name);
    println!(
        "    at {}  logged {}",
        find.location,
        find.created_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M")
    );
    if let Some(site_type) = &find.site_type {
        match &find.site_name {
            Some(site_name) => println!("    site: {} ({})", site_name, site_type),
            None => println!("    site: {}", site_type),
        }
    } else if let Some(site_name) = &find.site_name {
        println!("    site: {}", site_name);
    }
    if let Some(description) = &find.description {
        println!("    {}", description);
    }
}

fn print_route_summary(route: &RouteRecord) {
    println!(
        "{}  {}  {:.2} km, {} points",
        short_id(&route.id),
        route.name,
        route.distance_km,
        route.path.len()
    );
}

fn run_route(config: TrackerConfig, action: RouteCommand) -> anyhow::Result<()> {
    let mut store = open_store(&config)?;
    match action {
        RouteCommand::List { page, per_page } => {
            let listing = store.list_routes(page, per_page)?;
            if listing.total == 0 {
                println!("No routes saved yet.");
            }
            for route in &listing.items {
                print_route_summary(route);
            }
            if listing.total > 0 {
                println!("Page {} of {}", listing.page, listing.total_pages());
            }
        }
        RouteCommand::Show { id } => {
            let route = store.route(&id)?;
            println!("Name:        {}", route.name);
            println!("Id:          {}", route.id);
            if let Some(description) = &route.description {
                println!("Description: {}", description);
            }
            println!("Distance:    {:.2} km", route.distance_km);
            println!("Points:      {}", route.path.len());
            println!("Start:       {}", route.start);
            println!("End:         {}", route.end);
            if let (Some(started), Some(finished)) = (route.started_at, route.finished_at) {
                println!(
                    "Duration:    {}",
                    format_duration(finished.signed_duration_since(started))
                );
            }
            println!(
                "Saved:       {}",
                route.created_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M")
            );
            for image in &route.images {
                println!("Image:       {}", image);
            }
        }
        RouteCommand::Edit {
            id,
            name,
            description,
            images,
        } => {
            let route = store.edit_route(
                &id,
                RecordEdit {
                    name,
                    description,
                    images,
                },
            )?;
            println!("Route '{}' updated.", route.name);
        }
        RouteCommand::Delete { id } => {
            let route = store.delete_route(&id)?;
            println!("Route '{}' deleted.", route.name);
        }
    }
    Ok(())
}

fn run_export(config: TrackerConfig, args: ExportArgs) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    let mut exporter = Exporter::new();

    if args.all_finds {
        store.finds().iter().for_each(|f| exporter.add_find(f));
    } else {
        for id in &args.finds {
            exporter.add_find(store.find(id)?);
        }
    }
    if args.all_routes {
        store.routes().iter().for_each(|r| exporter.add_route(r));
    } else {
        for id in &args.routes {
            exporter.add_route(store.route(id)?);
        }
    }

    exporter.export_to_file(&args.output, args.format)?;
    println!(
        "Exported to {} ({})",
        args.output.display(),
        args.format.display_name()
    );
    Ok(())
}

fn run_config(
    config: &TrackerConfig,
    config_path: &std::path::Path,
    action: ConfigCommand,
) -> anyhow::Result<()> {
    match action {
        ConfigCommand::Show => {
            println!("# {}", config_path.display());
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        ConfigCommand::Init { force } => {
            if config_path.exists() && !force {
                bail!(
                    "{} already exists (use --force to overwrite)",
                    config_path.display()
                );
            }
            TrackerConfig::default().save_to(config_path)?;
            println!("Wrote default config to {}", config_path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("3f2a9c1e-0b7d-4c55-9e61-2f8d3a6b7c90"), "3f2a9c1e");
        assert_eq!(short_id("abc"), "abc");
        // Hand-edited ids need not be ASCII
        assert_eq!(short_id("ééééééééé"), "éééééééé");
    }
}
