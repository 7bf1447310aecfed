//! Disk persistence: the local checkpoint file and incident reports.

use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{debug, info};

use lynx_core::constants::ALERT_DIR_NAME;
use lynx_core::error::LynxError;
use lynx_core::snapshot::RawSnapshot;

/// Read the local checkpoint file.
///
/// A missing file is a normal first start and yields `Ok(None)`.
///
/// # Errors
///
/// I/O failures surface as [`LynxError::Io`]; a file that exists but is
/// not snapshot JSON surfaces as a snapshot error; the caller treats that
/// as detected corruption, not as absence.
pub fn read_local_snapshot(path: &Path) -> Result<Option<RawSnapshot>, LynxError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(?path, "no local checkpoint file");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };
    Ok(Some(RawSnapshot::from_json(&text)?))
}

/// Write the checkpoint file, creating parent directories as needed.
pub fn write_local_snapshot(path: &Path, snapshot: &RawSnapshot) -> Result<(), LynxError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, snapshot.to_json()?)?;
    info!(?path, pins = snapshot.hashlines.len(), "checkpoint file written");
    Ok(())
}

/// Details of a detected checkpoint incident, for the alert report.
#[derive(Debug, Clone)]
pub struct IncidentReport {
    /// Height of the offending entry.
    pub height: u64,
    /// The value found locally (hash or raw malformed text).
    pub local_value: String,
    /// The verified value obtained from seeds, if repair succeeded.
    pub verified_value: String,
    /// Path of the compromised file.
    pub file: PathBuf,
    /// What was done about it.
    pub actions: Vec<String>,
}

/// Write a plain-text incident report next to the checkpoint file, under
/// `security_alerts/`, with a timestamped file name. Returns the report
/// path.
pub fn write_alert_report(report: &IncidentReport) -> Result<PathBuf, LynxError> {
    let alert_dir = report
        .file
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(ALERT_DIR_NAME);
    std::fs::create_dir_all(&alert_dir)?;

    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let path = alert_dir.join(format!("checkpoint_attack_{stamp}.txt"));

    let mut body = String::new();
    body.push_str("CHECKPOINT SECURITY REPORT\n");
    body.push_str("==========================\n\n");
    body.push_str(&format!("detected_at: {}\n", Local::now().to_rfc3339()));
    body.push_str(&format!("file:        {}\n", report.file.display()));
    body.push_str(&format!("height:      {}\n", report.height));
    body.push_str(&format!("local:       {}\n", report.local_value));
    body.push_str(&format!("verified:    {}\n\n", report.verified_value));
    body.push_str(
        "The local checkpoint file disagreed with the verified network state.\n\
         This usually means the file was modified outside the daemon.\n\n",
    );
    body.push_str("actions taken:\n");
    for action in &report.actions {
        body.push_str(&format!("  - {action}\n"));
    }
    body.push_str(
        "\nrecommended:\n\
         \x20 - audit this machine for unauthorized processes\n\
         \x20 - tighten permissions on the data directory\n\
         \x20 - keep this report for the incident record\n",
    );

    std::fs::write(&path, body)?;
    info!(path = %path.display(), "security alert report written");
    Ok(path)
}
