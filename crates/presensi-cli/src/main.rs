use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use presensi_core::{IdentityKey, IdentityStore};
use presensi_hw::Camera;
use presensi_kiosk::{announcement_text, Announcer, AttendanceStore, Config, Cue, InlineSpawner, Mode};
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "presensi", about = "Presensi attendance kiosk tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List V4L2 capture devices
    Devices,
    /// Summarise the identity catalog and metadata
    Catalog,
    /// Print the attendance log for one day
    History {
        /// Day to print (YYYY-MM-DD, default: today)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Speak a one-off sentence through the configured synthesizer and player
    Say {
        /// Text to speak
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Play (and cache) the confirmation for an identity
    Greet {
        /// Identity name as it appears in the catalog
        name: String,
        /// CHECK_IN or CHECK_OUT
        #[arg(short, long, default_value = "CHECK_IN")]
        mode: Mode,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("failed to load configuration")?;
    tracing::debug!(
        catalog = %config.catalog_path.display(),
        db = %config.db_path.display(),
        speech_cache = %config.speech_cache_dir.display(),
        "configuration loaded"
    );

    match cli.command {
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::Catalog => {
            let catalog = IdentityStore::load(&config.catalog_path, &config.metadata_path)
                .context("failed to load identity store")?;
            println!("catalog:    {}", config.catalog_path.display());
            println!("entries:    {}", catalog.len());
            println!("identities: {}", catalog.identity_count());
            if let Some(dim) = catalog.dimension() {
                println!("dimension:  {dim}");
            }
            let names: BTreeSet<&IdentityKey> = (0..catalog.len()).filter_map(|i| catalog.name(i)).collect();
            for name in names {
                let meta = catalog.metadata(name);
                println!("  {name:<24} {:<24} {}", meta.org, meta.status);
            }
        }
        Commands::History { date } => {
            let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
            let store = AttendanceStore::open(&config.db_path, Arc::new(InlineSpawner))
                .with_context(|| format!("failed to open {}", config.db_path.display()))?;
            let events = store.history(date).context("failed to read attendance")?;
            tracing::debug!(%date, count = events.len(), "attendance history read");
            if events.is_empty() {
                println!("No attendance on {date}");
            }
            for event in events {
                println!("{event}");
            }
        }
        Commands::Say { text } => {
            let announcer = Announcer::from_config(&config, Arc::new(InlineSpawner))
                .context("failed to set up speech")?;
            announcer.speak_once(text.join(" "));
        }
        Commands::Greet { name, mode } => {
            let announcer = Announcer::from_config(&config, Arc::new(InlineSpawner))
                .context("failed to set up speech")?;
            let name = IdentityKey::new(&name);
            let cue = Cue::Success(mode);
            let outcome = announcer.announce(&name, cue, || announcement_text(&name, cue));
            tracing::info!(name = %name, ?cue, ?outcome, "greeting requested");
            println!("{outcome:?}: {}", announcer.cache_path(&name, cue).display());
        }
    }

    Ok(())
}
