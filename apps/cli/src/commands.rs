//! CLI command implementations

use crate::output::{format_bytes, print_output, DiskUsage, ShowUsage};
use crate::{ConfigAction, OutputFormat};
use anyhow::{anyhow, Result};
use console::style;
use showdl_core::{
    decode_component, directory_size, show_dir, DownloadRecordDatabase, RecordStore, Storage,
};
use showdl_types::{DownloadRecord, Settings};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Durable state the CLI works on
pub struct Context {
    storage: Storage,
    records: DownloadRecordDatabase,
    settings: Settings,
}

impl Context {
    pub async fn open(data_dir: PathBuf) -> Result<Self> {
        debug!("Opening data directory {:?}", data_dir);

        let storage = Storage::new(data_dir).await?;
        let records = DownloadRecordDatabase::new(storage.database_path()).await?;
        let settings = storage.load_settings().await?;

        Ok(Self {
            storage,
            records,
            settings,
        })
    }
}

// ============================================================================
// Record Commands
// ============================================================================

pub async fn list_records(ctx: &Context, format: OutputFormat) -> Result<()> {
    let records = ctx.records.list_downloaded().await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct RecordRow {
                show: String,
                recording: String,
                format: String,
                updated: String,
            }

            let rows: Vec<RecordRow> = records
                .iter()
                .map(|r| RecordRow {
                    show: r.show_id.clone(),
                    recording: r.downloaded_recording_id.clone().unwrap_or_default(),
                    format: r
                        .downloaded_format
                        .clone()
                        .unwrap_or_else(|| "?".to_string()),
                    updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                })
                .collect();

            println!("{}", Table::new(rows));
        }
        OutputFormat::Human => {
            if records.is_empty() {
                println!("{}", style("No downloaded shows").dim());
                return Ok(());
            }

            for record in &records {
                print_record(record);
            }
            println!();
            println!("{} show(s) downloaded", style(records.len()).bold());
        }
    }

    Ok(())
}

fn print_record(record: &DownloadRecord) {
    println!(
        "{} {} {}",
        style("✓").green(),
        style(&record.show_id).bold(),
        style(record.downloaded_recording_id.as_deref().unwrap_or("-")).cyan()
    );
    if let Some(format) = &record.downloaded_format {
        println!("    Format: {}", format);
    }
}

pub async fn forget_show(
    ctx: &Context,
    show_id: &str,
    yes: bool,
    _format: OutputFormat,
) -> Result<()> {
    let Some(recording_id) = ctx.records.downloaded_recording(show_id).await? else {
        println!("{}", style(format!("{} is not downloaded", show_id)).dim());
        return Ok(());
    };

    if !yes {
        use dialoguer::Confirm;

        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Forget that {} is downloaded with {}? Files are left on disk.",
                show_id, recording_id
            ))
            .default(false)
            .interact()?;

        if !confirmed {
            return Ok(());
        }
    }

    ctx.records.clear(show_id).await?;
    println!(
        "{} Forgot downloaded recording of {}",
        style("✓").green().bold(),
        style(show_id).cyan()
    );

    Ok(())
}

// ============================================================================
// Disk Usage
// ============================================================================

pub async fn disk_usage(ctx: &Context, show: Option<String>, format: OutputFormat) -> Result<()> {
    let root = &ctx.settings.default_download_path;

    let show_ids = match show {
        Some(show_id) => vec![show_id],
        None => list_show_dirs(root).await?,
    };

    let mut shows = Vec::with_capacity(show_ids.len());
    for show_id in show_ids {
        let bytes = directory_size(&show_dir(root, &show_id)).await?;
        let recording_id = ctx.records.downloaded_recording(&show_id).await?;
        shows.push(ShowUsage {
            show_id,
            recording_id,
            bytes,
        });
    }

    let usage = DiskUsage {
        download_dir: root.clone(),
        total_bytes: shows.iter().map(|s| s.bytes).sum(),
        shows,
    };

    match format {
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct UsageRow {
                show: String,
                recording: String,
                size: String,
            }

            let rows: Vec<UsageRow> = usage
                .shows
                .iter()
                .map(|s| UsageRow {
                    show: s.show_id.clone(),
                    recording: s.recording_id.clone().unwrap_or_else(|| "-".to_string()),
                    size: format_bytes(s.bytes),
                })
                .collect();

            println!("{}", Table::new(rows));
            println!("Total: {}", format_bytes(usage.total_bytes));
        }
        _ => print_output(&usage, format)?,
    }

    Ok(())
}

/// Show ids of the directories directly below the download directory
async fn list_show_dirs(root: &std::path::Path) -> Result<Vec<String>> {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut shows = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        match decode_component(&name) {
            Some(show_id) => shows.push(show_id),
            None => warn!("Skipping directory {:?}: not a show directory", name),
        }
    }
    shows.sort();

    Ok(shows)
}

// ============================================================================
// Config Commands
// ============================================================================

pub async fn config_action(
    ctx: &Context,
    action: Option<ConfigAction>,
    format: OutputFormat,
) -> Result<()> {
    match action {
        None | Some(ConfigAction::Show) => {
            let settings = &ctx.settings;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(settings)?);
                }
                _ => {
                    println!("showdl Configuration:");
                    println!();
                    println!("  Data directory: {}", ctx.storage.data_dir().display());
                    println!(
                        "  Default download path: {}",
                        settings.default_download_path.display()
                    );
                    println!("  Event buffer: {}", settings.event_buffer);
                }
            }
        }

        Some(ConfigAction::Get { key }) => {
            let settings = &ctx.settings;
            let value = match key.as_str() {
                "default_download_path" => settings.default_download_path.display().to_string(),
                "event_buffer" => settings.event_buffer.to_string(),
                _ => return Err(anyhow!("Unknown config key: {}", key)),
            };
            println!("{}", value);
        }

        Some(ConfigAction::Set { key, value }) => {
            let mut settings = ctx.settings.clone();

            match key.as_str() {
                "default_download_path" => settings.default_download_path = PathBuf::from(value),
                "event_buffer" => {
                    settings.event_buffer = value.parse()?;
                    if settings.event_buffer == 0 {
                        return Err(anyhow!("event_buffer must be at least 1"));
                    }
                }
                _ => return Err(anyhow!("Unknown config key: {}", key)),
            }

            ctx.storage.save_settings(&settings).await?;
            println!("{} Config updated", style("✓").green().bold());
        }

        Some(ConfigAction::Reset) => {
            use dialoguer::Confirm;

            let confirmed = Confirm::new()
                .with_prompt("Reset all settings to defaults?")
                .default(false)
                .interact()?;

            if confirmed {
                ctx.storage.save_settings(&Settings::default()).await?;
                println!("{} Settings reset to defaults", style("✓").green().bold());
            }
        }
    }

    Ok(())
}
