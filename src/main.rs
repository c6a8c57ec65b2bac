//! astromon - headless monitoring engine for remote astrophotography-
//! automation servers
//!
//! This is the binary entry point. All logic lives in the workspace crates;
//! the binary wires the settings store, the polling scheduler, and headless
//! stand-ins for the display/radio collaborators together.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use clap::Parser;
use tokio::sync::watch;

use astromon_app::{config_json, Page, PollingScheduler, SettingsStore, UiLink, WifiLink};
use astromon_core::prelude::*;
use astromon_core::telemetry::InstanceState;

/// astromon - monitor N.I.N.A.-style automation servers
#[derive(Parser, Debug)]
#[command(name = "astromon")]
#[command(about = "Headless monitoring engine for astrophotography-automation servers", long_about = None)]
struct Args {
    /// Path of the persisted settings blob (defaults to the platform data dir)
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Print the flat admin config JSON and exit
    #[arg(long)]
    dump_config: bool,
}

/// Renderer stand-in: keeps the page state and logs repaints.
struct HeadlessLink {
    page: StdMutex<Page>,
    page_changed: StdMutex<bool>,
}

impl HeadlessLink {
    fn new(initial: Page) -> Self {
        Self {
            page: StdMutex::new(initial),
            page_changed: StdMutex::new(true),
        }
    }
}

impl UiLink for HeadlessLink {
    fn active_page(&self) -> Page {
        *self.page.lock().unwrap()
    }

    fn take_page_changed(&self) -> bool {
        std::mem::take(&mut *self.page_changed.lock().unwrap())
    }

    fn animate_to(&self, page: Page) {
        info!("page -> {:?}", page);
        *self.page.lock().unwrap() = page;
        *self.page_changed.lock().unwrap() = true;
    }

    fn repaint_summary(&self, states: &[&InstanceState]) {
        for (i, state) in states.iter().enumerate() {
            debug!(
                "summary[{}]: connected={} status={} target={:?} rms={:.2}\"",
                i, state.connected, state.status, state.target_name, state.rms.total
            );
        }
    }

    fn repaint_instance(&self, instance: usize, state: &InstanceState) {
        debug!(
            "instance {}: {} {} {}/{} hfr={:.2} stars={} filter={:?}",
            instance,
            state.status,
            state.time_remaining,
            state.iterations_completed,
            state.iterations_total,
            state.hfr,
            state.stars,
            state.current_filter,
        );
    }

    fn thumbnail_visible(&self) -> bool {
        false
    }

    fn take_thumbnail_request(&self) -> bool {
        false
    }

    fn show_thumbnail(&self, instance: usize, jpeg: Vec<u8>) {
        debug!("instance {}: thumbnail ready ({} bytes)", instance, jpeg.len());
    }
}

/// Radio stand-in for hosts without the WiFi collaborator.
struct NoRadio;

impl WifiLink for NoRadio {
    fn signal_strength(&self) -> Option<i8> {
        None
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    astromon_core::logging::init()?;

    let path = args.settings.unwrap_or_else(SettingsStore::default_path);
    let store = Arc::new(SettingsStore::init(path));

    if args.dump_config {
        let config = config_json(&store, "");
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let cfg = store.snapshot();
    let initial = match cfg.ui.active_page_override {
        p if p >= 0 => Page::from_index(p as usize, cfg.instance_count()),
        _ => Page::Summary,
    };

    let ui = Arc::new(HeadlessLink::new(initial));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = PollingScheduler::new(Arc::clone(&store), ui, Arc::new(NoRadio), shutdown_rx);

    let engine = tokio::spawn(scheduler.run());

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    let _ = engine.await;

    Ok(())
}
