//! Output formatting utilities

use crate::OutputFormat;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Print output in the specified format
pub fn print_output<T: Serialize + fmt::Display>(
    value: &T,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Human | OutputFormat::Table => {
            println!("{}", value);
        }
    }
    Ok(())
}

/// Format bytes as human-readable
pub fn format_bytes(bytes: u64) -> String {
    human_bytes::human_bytes(bytes as f64)
}

#[derive(Debug, Serialize)]
pub struct ShowUsage {
    pub show_id: String,
    pub recording_id: Option<String>,
    pub bytes: u64,
}

#[derive(Debug, Serialize)]
pub struct DiskUsage {
    pub download_dir: PathBuf,
    pub total_bytes: u64,
    pub shows: Vec<ShowUsage>,
}

impl fmt::Display for DiskUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Download directory: {}", self.download_dir.display())?;
        for show in &self.shows {
            writeln!(
                f,
                "  {:<24} {:>10}  {}",
                show.show_id,
                format_bytes(show.bytes),
                show.recording_id.as_deref().unwrap_or("-")
            )?;
        }
        write!(f, "Total: {}", format_bytes(self.total_bytes))
    }
}
