// SPDX-License-Identifier: Apache-2.0
//
// The transform runner: spawns the transform tool for a job, routes its
// stdout to the right sink, and applies the `STATE:` / `ATTR:` protocol
// it reports on stderr.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use platen_core::{JobReasons, PlatenError, PrinterReasons, Result};
use platen_ipp::IppAttribute;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::job::Job;
use crate::printer::Printer;

/// Where the child's stdout goes.
#[derive(Debug, Clone)]
pub enum TransformMode {
    /// A fresh spool file next to the input document.
    ToFile,
    /// Captured and handed back to the caller (the client response body).
    ToClient,
    /// The child connects to the device itself via `DEVICE_URI`.
    ToDevice(String),
}

/// Outcome of a transform run.
#[derive(Debug)]
pub struct TransformResult {
    /// Child exit status; 0 maps to job completion.
    pub status: i32,
    /// Captured stdout in [`TransformMode::ToClient`] mode.
    pub client_output: Option<Vec<u8>>,
}

/// Run the transform command for a job.
///
/// The child environment carries the job's attributes (`IPP_*`), the
/// printer's PWG raster capabilities, and the document/output types; argv
/// is `[command, spool_filename]`. The printer lock is never held across
/// the child wait.
pub async fn transform_job(
    printer: &Arc<Printer>,
    job: &Arc<Job>,
    command: &Path,
    mode: TransformMode,
) -> Result<i32> {
    run(printer, job, command, mode).await.map(|r| r.status)
}

/// Run the transform and capture its stdout for the client.
pub async fn transform_to_client(
    printer: &Arc<Printer>,
    job: &Arc<Job>,
    command: &Path,
) -> Result<(i32, Vec<u8>)> {
    let result = run(printer, job, command, TransformMode::ToClient).await?;
    Ok((result.status, result.client_output.unwrap_or_default()))
}

async fn run(
    printer: &Arc<Printer>,
    job: &Arc<Job>,
    command: &Path,
    mode: TransformMode,
) -> Result<TransformResult> {
    let output_format = printer.config.output_format.clone();
    let filename = job
        .inner
        .read()
        .await
        .filename
        .clone()
        .ok_or_else(|| PlatenError::Transform("job has no spooled document".into()))?;

    debug!(job_id = job.id, command = %command.display(), file = %filename.display(), "running transform");
    let start = Instant::now();

    let mut child = Command::new(command);
    child.arg(&filename);
    child.env("CONTENT_TYPE", &job.format);
    child.env("OUTPUT_TYPE", &output_format);
    if let TransformMode::ToDevice(uri) = &mode {
        child.env("DEVICE_URI", uri);
    }

    {
        let inner = job.inner.read().await;
        if let Some(name) = inner.attrs.get_str("document-name") {
            child.env("DOCUMENT_NAME", name);
        }
        // One variable per job attribute: IPP_MEDIA_COL=..., etc.
        for attr in inner.attrs.iter() {
            let key: String = attr
                .name
                .chars()
                .map(|c| {
                    if c == '-' {
                        '_'
                    } else {
                        c.to_ascii_uppercase()
                    }
                })
                .collect();
            child.env(format!("IPP_{key}"), attr.render_values());
        }
    }
    {
        let printer_inner = printer.inner.read().await;
        for (name, variable) in [
            (
                "pwg-raster-document-resolution-supported",
                "PWG_RASTER_DOCUMENT_RESOLUTION_SUPPORTED",
            ),
            (
                "pwg-raster-document-sheet-back",
                "PWG_RASTER_DOCUMENT_SHEET_BACK",
            ),
            (
                "pwg-raster-document-type-supported",
                "PWG_RASTER_DOCUMENT_TYPE_SUPPORTED",
            ),
        ] {
            if let Some(attr) = printer_inner.attrs.get(name) {
                child.env(variable, attr.render_values());
            }
        }
    }

    // Route stdout.
    let mut output_file: Option<PathBuf> = None;
    match &mode {
        TransformMode::ToFile => {
            let path = job.spool_filename(printer, &output_format);
            let file = std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .map_err(|e| {
                    PlatenError::Transform(format!("open {}: {e}", path.display()))
                })?;
            output_file = Some(path);
            child.stdout(Stdio::from(file));
        }
        TransformMode::ToClient => {
            child.stdout(Stdio::piped());
        }
        TransformMode::ToDevice(_) => {
            child.stdout(Stdio::null());
        }
    }
    child.stderr(Stdio::piped());

    let mut child = child.spawn().map_err(|e| {
        PlatenError::Transform(format!("spawn {}: {e}", command.display()))
    })?;

    // Capture stdout concurrently in to-client mode.
    let stdout_task = child.stdout.take().map(|mut stdout| {
        tokio::spawn(async move {
            let mut buffer = Vec::new();
            let _ = stdout.read_to_end(&mut buffer).await;
            buffer
        })
    });

    // Read stderr line by line until EOF, killing the child if the job is
    // canceled mid-run.
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| PlatenError::Transform("no stderr pipe".into()))?;
    let mut lines = BufReader::new(stderr).lines();
    let mut canceled = false;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => process_message(printer, job, &line).await,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(job_id = job.id, error = %e, "stderr read error");
                        break;
                    }
                }
            }
            _ = job.cancel_notify.notified() => {
                info!(job_id = job.id, "cancel requested, terminating transform");
                canceled = true;
                let _ = child.kill().await;
                break;
            }
        }
    }

    // Drain any remaining stderr after a kill.
    while let Ok(Some(line)) = lines.next_line().await {
        if !canceled {
            process_message(printer, job, &line).await;
        }
    }

    let status = child
        .wait()
        .await
        .map_err(|e| PlatenError::Transform(format!("wait: {e}")))?;
    let code = status.code().unwrap_or(-1);

    let client_output = match stdout_task {
        Some(task) => Some(task.await.unwrap_or_default()),
        None => None,
    };

    debug!(
        job_id = job.id,
        code,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "transform finished"
    );

    // A failed to-file transform leaves no useful output behind.
    if code != 0 {
        if let Some(path) = output_file {
            let _ = tokio::fs::remove_file(&path).await;
        }
    }

    Ok(TransformResult {
        status: code,
        client_output,
    })
}

// ---------------------------------------------------------------------------
// stderr message protocol
// ---------------------------------------------------------------------------

/// Dispatch one stderr line.
async fn process_message(printer: &Arc<Printer>, job: &Arc<Job>, line: &str) {
    if let Some(message) = line.strip_prefix("STATE:") {
        process_state_message(printer, message).await;
    } else if let Some(message) = line.strip_prefix("ATTR:") {
        process_attr_message(printer, job, message).await;
    } else if line.starts_with("ERROR:") {
        error!(job_id = job.id, "{line}");
    } else {
        debug!(job_id = job.id, "{line}");
    }
}

/// Apply a `STATE:` update to `printer-state-reasons`.
///
/// `keyword[,keyword...]` replaces the whole mask; a `+` prefix sets bits
/// and a `-` prefix clears them. Keywords may carry an RFC 2911 severity
/// suffix, which the lookup strips.
async fn process_state_message(printer: &Arc<Printer>, message: &str) {
    let message = message.trim();
    let (remove, additive, keywords) = match message.as_bytes().first() {
        Some(b'-') => (true, true, &message[1..]),
        Some(b'+') => (false, true, &message[1..]),
        _ => (false, false, message),
    };

    let mut inner = printer.inner.write().await;
    let mut reasons = if additive {
        inner.state_reasons
    } else {
        PrinterReasons::NONE
    };

    for keyword in keywords.split(',') {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            continue;
        }
        match PrinterReasons::bit_for(keyword) {
            Some(bit) => {
                if remove {
                    reasons.clear(bit);
                } else {
                    reasons.set(bit);
                }
            }
            None => debug!(keyword, "unknown printer-state-reason"),
        }
    }

    inner.state_reasons = reasons;
}

/// Apply an `ATTR:` update: `name=value [name=value ...]`.
///
/// The two progress counters update the job; anything else that names an
/// existing printer attribute replaces its value; unknown names are
/// ignored.
async fn process_attr_message(printer: &Arc<Printer>, job: &Arc<Job>, message: &str) {
    for pair in message.split_whitespace() {
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        match name {
            "job-impressions-completed" => {
                if let Ok(count) = value.parse::<i32>() {
                    let mut inner = job.inner.write().await;
                    inner.impressions_completed = count;
                    inner
                        .attrs
                        .set(IppAttribute::integer("job-impressions-completed", count));
                }
            }
            "job-media-sheets-completed" => {
                if let Ok(count) = value.parse::<i32>() {
                    let mut inner = job.inner.write().await;
                    inner.media_sheets_completed = count;
                    inner.attrs.set(IppAttribute::integer(
                        "job-media-sheets-completed",
                        count,
                    ));
                }
            }
            "job-state-reasons" => {
                let mut inner = job.inner.write().await;
                let mut reasons = JobReasons::NONE;
                for keyword in value.split(',') {
                    if let Some(bit) = JobReasons::bit_for(keyword.trim()) {
                        reasons.set(bit);
                    }
                }
                inner.state_reasons = reasons;
            }
            _ => {
                let mut inner = printer.inner.write().await;
                if inner.attrs.get(name).is_some() {
                    inner.attrs.set(IppAttribute::text(name, value));
                } else {
                    debug!(name, "ignoring unknown attribute update");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{attach_document, create_job};
    use platen_core::ServerConfig;
    use platen_ipp::{IppMessage, Operation};

    async fn printer_and_job(
        spool: &Path,
    ) -> (Arc<Printer>, Arc<Job>) {
        let config = ServerConfig {
            printer_name: "p1".into(),
            spool_directory: spool.to_path_buf(),
            ..Default::default()
        };
        let printer = Printer::create(&config, "host.test");

        let mut request = IppMessage::request(Operation::PrintJob, 1);
        request.groups[0].push(IppAttribute::name_value("requesting-user-name", "alice"));
        let job = create_job(&printer, &request, "application/pdf".into()).await;
        attach_document(&printer, &job, "application/pdf", b"%PDF-1.4")
            .await
            .expect("attach");
        (printer, job)
    }

    #[tokio::test]
    async fn state_message_replace_add_remove() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (printer, _job) = printer_and_job(dir.path()).await;
        let initial = printer.inner.read().await.state_reasons;

        process_state_message(&printer, " media-empty,media-needed").await;
        let mask = printer.inner.read().await.state_reasons;
        assert!(mask.contains(PrinterReasons::MEDIA_EMPTY));
        assert!(mask.contains(PrinterReasons::MEDIA_NEEDED));

        // `+X` then `-X` restores the pre-existing mask.
        process_state_message(&printer, "+toner-low-warning").await;
        assert!(printer
            .inner
            .read()
            .await
            .state_reasons
            .contains(PrinterReasons::TONER_LOW));
        process_state_message(&printer, "-toner-low-warning").await;
        let mask = printer.inner.read().await.state_reasons;
        assert!(!mask.contains(PrinterReasons::TONER_LOW));

        // A bare keyword list replaces everything.
        process_state_message(&printer, "none-of-these-match").await;
        assert_eq!(printer.inner.read().await.state_reasons, initial);
    }

    #[tokio::test]
    async fn attr_message_updates_job_counters() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (printer, job) = printer_and_job(dir.path()).await;

        process_attr_message(
            &printer,
            &job,
            " job-impressions-completed=3 job-media-sheets-completed=2",
        )
        .await;

        let inner = job.inner.read().await;
        assert_eq!(inner.impressions_completed, 3);
        assert_eq!(inner.media_sheets_completed, 2);
        assert_eq!(inner.attrs.get_int("job-impressions-completed"), Some(3));
    }

    #[tokio::test]
    async fn attr_message_ignores_unknown_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (printer, job) = printer_and_job(dir.path()).await;
        let before = printer.inner.read().await.attrs.len();

        process_attr_message(&printer, &job, "no-such-attribute=1").await;
        assert_eq!(printer.inner.read().await.attrs.len(), before);
    }

    #[tokio::test]
    async fn transform_runs_a_real_command() {
        // `/bin/sh -c` style commands need a wrapper script; use `true`
        // via a tiny shell file to exercise spawn/exit handling.
        let dir = tempfile::tempdir().expect("tempdir");
        let (printer, job) = printer_and_job(dir.path()).await;

        let script = dir.path().join("ok.sh");
        std::fs::write(&script, "#!/bin/sh\necho 'ATTR: job-impressions-completed=1' >&2\nexit 0\n")
            .expect("script");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
                .expect("chmod");
        }

        let status = transform_job(&printer, &job, &script, TransformMode::ToFile)
            .await
            .expect("run");
        assert_eq!(status, 0);
        assert_eq!(job.inner.read().await.impressions_completed, 1);
    }

    #[tokio::test]
    async fn failing_command_reports_nonzero() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (printer, job) = printer_and_job(dir.path()).await;

        let script = dir.path().join("fail.sh");
        std::fs::write(&script, "#!/bin/sh\nexit 3\n").expect("script");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
                .expect("chmod");
        }

        let status = transform_job(&printer, &job, &script, TransformMode::ToDevice("socket://localhost:9100".into()))
            .await
            .expect("run");
        assert_eq!(status, 3);
    }

    #[tokio::test]
    async fn missing_command_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (printer, job) = printer_and_job(dir.path()).await;

        let result = transform_job(
            &printer,
            &job,
            Path::new("/nonexistent/transform"),
            TransformMode::ToDevice("socket://localhost:9100".into()),
        )
        .await;
        assert!(result.is_err());
    }
}
