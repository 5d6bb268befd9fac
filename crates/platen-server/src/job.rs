// SPDX-License-Identifier: Apache-2.0
//
// Job objects and the job lifecycle: creation, spooling, scheduling,
// processing, and the janitor that reaps completed jobs.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Duration, Utc};
use platen_core::types::{assemble_uuid, sanitize_job_name};
use platen_core::{DocumentFormat, JobReasons, JobState, PlatenError, PrinterState, Result};
use platen_ipp::{Attributes, GroupTag, IppAttribute, IppMessage};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, error, info, warn};

use crate::printer::{Printer, PrinterInner};
use crate::subscription::{Event, EventMask};
use crate::transform::{self, TransformMode};

/// Completed jobs are reaped this long after reaching a terminal state.
const JOB_HISTORY: Duration = Duration::seconds(60);

/// Mutable job state, guarded by [`Job::inner`].
pub struct JobInner {
    pub state: JobState,
    pub state_reasons: JobReasons,
    /// State reasons reported by a remote output device, merged into
    /// `job-state-reasons` responses.
    pub dev_state_reasons: JobReasons,
    pub attrs: Attributes,
    pub filename: Option<PathBuf>,
    pub processing: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
    pub impressions_completed: i32,
    pub media_sheets_completed: i32,
}

/// A print job. The printer owns the job; the job holds a non-owning
/// back-reference valid for its whole lifetime.
pub struct Job {
    pub id: i32,
    pub printer: Weak<Printer>,
    pub created: DateTime<Utc>,
    pub username: String,
    pub name: String,
    pub priority: i32,
    pub format: String,
    pub impressions: i32,
    pub uri: String,
    pub uuid: String,
    /// Cancellation bit observed cooperatively by the processing task.
    pub cancel_requested: AtomicBool,
    pub cancel_notify: Notify,
    pub inner: RwLock<JobInner>,
}

impl Job {
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
        self.cancel_notify.notify_waiters();
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Spool filename for this job: `{spool}/{id}-{name}.{ext}`.
    pub fn spool_filename(&self, printer: &Printer, format: &str) -> PathBuf {
        let name = sanitize_job_name(&self.name);
        let ext = DocumentFormat::extension_for(format);
        printer
            .config
            .spool_directory
            .join(format!("{}-{}.{}", self.id, name, ext))
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Deliver an event to every matching subscription.
///
/// The caller holds the printer write lock.
pub fn add_event(
    inner: &mut PrinterInner,
    bit: u32,
    job: Option<(i32, JobState)>,
    text: impl Into<String>,
) {
    let text = text.into();
    let event = Event {
        sequence: 0,
        bit,
        text,
        time: Utc::now(),
        job_id: job.map(|(id, _)| id),
        job_state: job.map(|(_, state)| state),
        printer_state: inner.state,
        printer_reasons: inner.state_reasons,
    };
    for subscription in inner.subscriptions.iter_mut() {
        if !subscription.events.contains(bit) {
            continue;
        }
        if let Some(sub_job) = subscription.job_id {
            if Some(sub_job) != event.job_id {
                continue;
            }
        }
        subscription.deliver(event.clone());
    }
}

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

/// Sniff a document format from the request and payload.
pub fn detect_format(request: &IppMessage, document: &[u8]) -> (String, bool) {
    if let Some(format) = request
        .operation_attributes()
        .and_then(|g| g.get_str("document-format"))
    {
        if format != "application/octet-stream" {
            return (format.to_string(), false);
        }
    }

    let sniffed = if document.starts_with(b"%PDF") {
        Some("application/pdf")
    } else if document.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if document.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some("image/png")
    } else if document.starts_with(b"RaS2") {
        Some("image/pwg-raster")
    } else if document.starts_with(b"UNIRAST") {
        Some("image/urf")
    } else if document.starts_with(b"%!") {
        Some("application/postscript")
    } else {
        None
    };

    match sniffed {
        Some(format) => (format.to_string(), true),
        None => ("application/octet-stream".to_string(), false),
    }
}

/// Create a job from a Print-Job / Create-Job request.
///
/// The job starts held; Print-Job promotes it to pending once the
/// document is spooled.
pub async fn create_job(
    printer: &Arc<Printer>,
    request: &IppMessage,
    format: String,
) -> Arc<Job> {
    let operation = request.operation_attributes();
    let username = operation
        .and_then(|g| g.get_str("requesting-user-name"))
        .unwrap_or("anonymous")
        .to_string();
    let name = request
        .groups
        .iter()
        .find_map(|g| g.get_str("job-name"))
        .unwrap_or("untitled")
        .to_string();
    let priority = request
        .groups
        .iter()
        .find_map(|g| g.get_int("job-priority"))
        .unwrap_or(50)
        .clamp(1, 100);
    let impressions = request
        .groups
        .iter()
        .find_map(|g| g.get_int("job-impressions"))
        .unwrap_or(0);

    let mut inner = printer.inner.write().await;
    let id = inner.next_job_id;
    inner.next_job_id += 1;

    let uri = format!("{}/{}", printer.uri, id);
    let uuid = assemble_uuid(&printer.hostname, printer.port, &printer.name, id);
    let created = Utc::now();

    // The job's attribute envelope: everything the client sent in its
    // job-attributes groups, plus the description attributes we assign.
    let mut attrs: Attributes = request
        .groups_of(GroupTag::JobAttributes)
        .flat_map(|g| g.attributes.iter().cloned())
        .collect();
    attrs.set(IppAttribute::name_value(
        "job-originating-user-name",
        username.clone(),
    ));
    attrs.set(IppAttribute::integer("job-id", id));
    attrs.set(IppAttribute::uri("job-uri", uri.clone()));
    attrs.set(IppAttribute::uri("job-uuid", uuid.clone()));
    attrs.set(IppAttribute::uri("job-printer-uri", printer.uri.clone()));
    attrs.set(IppAttribute::name_value("job-name", name.clone()));
    attrs.set(IppAttribute::date_time(
        "date-time-at-creation",
        created.into(),
    ));
    attrs.set(IppAttribute::integer(
        "time-at-creation",
        printer.relative_time(created),
    ));

    let job = Arc::new(Job {
        id,
        printer: Arc::downgrade(printer),
        created,
        username,
        name,
        priority,
        format,
        impressions,
        uri,
        uuid,
        cancel_requested: AtomicBool::new(false),
        cancel_notify: Notify::new(),
        inner: RwLock::new(JobInner {
            state: JobState::PendingHeld,
            state_reasons: JobReasons(JobReasons::JOB_INCOMING),
            dev_state_reasons: JobReasons::NONE,
            attrs,
            filename: None,
            processing: None,
            completed: None,
            impressions_completed: 0,
            media_sheets_completed: 0,
        }),
    });

    inner.jobs.insert(0, job.clone());
    insert_active(&mut inner.active_jobs, job.clone());
    add_event(
        &mut inner,
        EventMask::JOB_CREATED,
        Some((id, JobState::PendingHeld)),
        format!("Job {id} created."),
    );

    info!(job_id = id, printer = %printer.name, "job created");
    job
}

/// Insert into active-jobs keeping (priority desc, id asc) order.
fn insert_active(active: &mut Vec<Arc<Job>>, job: Arc<Job>) {
    let position = active
        .iter()
        .position(|other| {
            (other.priority, job.id) < (job.priority, other.id)
        })
        .unwrap_or(active.len());
    active.insert(position, job);
}

/// Write the received document to the spool and promote the job to
/// pending.
pub async fn attach_document(
    printer: &Arc<Printer>,
    job: &Arc<Job>,
    format: &str,
    document: &[u8],
) -> Result<()> {
    let filename = job.spool_filename(printer, format);
    tokio::fs::write(&filename, document).await.map_err(|e| {
        PlatenError::Spool(format!("write {}: {e}", filename.display()))
    })?;

    debug!(job_id = job.id, file = %filename.display(), bytes = document.len(), "document spooled");

    let mut printer_inner = printer.inner.write().await;
    {
        let mut inner = job.inner.write().await;
        inner.filename = Some(filename);
        inner.state = JobState::Pending;
        inner.state_reasons.clear(JobReasons::JOB_INCOMING);
        inner
            .attrs
            .set(IppAttribute::integer(
                "job-k-octets",
                (document.len() / 1024) as i32,
            ));
    }
    add_event(
        &mut printer_inner,
        EventMask::JOB_STATE_CHANGED,
        Some((job.id, JobState::Pending)),
        format!("Job {} pending.", job.id),
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

/// Find the job a request addresses, by `job-id` or `job-uri`.
pub async fn find_job(printer: &Arc<Printer>, request: &IppMessage) -> Option<Arc<Job>> {
    let operation = request.operation_attributes()?;

    let id = if let Some(id) = operation.get_int("job-id") {
        id
    } else if let Some(uri) = operation.get_str("job-uri") {
        let rest = uri.strip_prefix(printer.uri.as_str())?;
        rest.strip_prefix('/')?.parse().ok()?
    } else {
        return None;
    };

    find_job_by_id(printer, id).await
}

pub async fn find_job_by_id(printer: &Arc<Printer>, id: i32) -> Option<Arc<Job>> {
    let inner = printer.inner.read().await;
    inner.jobs.iter().find(|j| j.id == id).cloned()
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

/// Schedule the next pending job, if nothing is processing.
///
/// The single-job invariant: at most one job per printer is in the
/// processing state at any instant.
pub async fn check_jobs(printer: Arc<Printer>) {
    let job = {
        let mut inner = printer.inner.write().await;
        if inner.processing_job.is_some() {
            return;
        }
        let mut candidate = None;
        for job in inner.active_jobs.iter() {
            if job.inner.read().await.state == JobState::Pending {
                candidate = Some(job.clone());
                break;
            }
        }
        let Some(job) = candidate else {
            return;
        };
        inner.processing_job = Some(job.clone());
        job
    };

    tokio::spawn(process_job(printer, job));
}

/// The per-job processing task.
fn process_job(
    printer: Arc<Printer>,
    job: Arc<Job>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(process_job_inner(printer, job))
}

async fn process_job_inner(printer: Arc<Printer>, job: Arc<Job>) {
    let started = Utc::now();
    let proxied = {
        let mut printer_inner = printer.inner.write().await;
        {
            let mut inner = job.inner.write().await;
            inner.state = JobState::Processing;
            inner.processing = Some(started);
            inner.state_reasons.set(JobReasons::JOB_PRINTING);
            inner.attrs.set(IppAttribute::integer(
                "time-at-processing",
                printer.relative_time(started),
            ));
            inner.attrs.set(IppAttribute::date_time(
                "date-time-at-processing",
                started.into(),
            ));
        }
        printer_inner.state = PrinterState::Processing;
        printer_inner.state_time = started;
        add_event(
            &mut printer_inner,
            EventMask::JOB_STATE_CHANGED,
            Some((job.id, JobState::Processing)),
            "Job processing.",
        );

        printer_inner.device.is_some()
    };

    if proxied {
        // A remote output device is registered: hold the document for it
        // to fetch rather than transforming locally.
        let mut printer_inner = printer.inner.write().await;
        {
            let mut inner = job.inner.write().await;
            inner.state = JobState::ProcessingStopped;
            inner.state_reasons.clear(JobReasons::JOB_PRINTING);
            inner.state_reasons.set(JobReasons::JOB_FETCHABLE);
        }
        printer_inner.processing_job = None;
        printer_inner.state = PrinterState::Idle;
        add_event(
            &mut printer_inner,
            EventMask::JOB_STATE_CHANGED,
            Some((job.id, JobState::ProcessingStopped)),
            "Job fetchable.",
        );
        info!(job_id = job.id, "job held for output device fetch");
        return;
    }

    let terminal = match printer.config.command.clone() {
        Some(command) => {
            let mode = match printer.config.device_uri.clone() {
                Some(uri) => TransformMode::ToDevice(uri),
                None => TransformMode::ToFile,
            };
            match transform::transform_job(&printer, &job, &command, mode).await {
                Ok(0) => JobState::Completed,
                Ok(status) => {
                    if job.is_cancel_requested() {
                        JobState::Canceled
                    } else {
                        warn!(job_id = job.id, status, "transform exited with error");
                        JobState::Aborted
                    }
                }
                Err(e) => {
                    error!(job_id = job.id, error = %e, "transform failed to run");
                    JobState::Aborted
                }
            }
        }
        // No transform command configured: accept the document as-is.
        None => {
            if job.is_cancel_requested() {
                JobState::Canceled
            } else {
                JobState::Completed
            }
        }
    };

    finish_job(&printer, &job, terminal).await;
    check_jobs(printer).await;
}

/// Move a job to a terminal state and restore the printer to idle.
pub async fn finish_job(printer: &Arc<Printer>, job: &Arc<Job>, state: JobState) {
    let completed = Utc::now();
    let mut printer_inner = printer.inner.write().await;
    {
        let mut inner = job.inner.write().await;
        inner.state = state;
        inner.completed = Some(completed);
        inner.state_reasons.clear(JobReasons::JOB_PRINTING);
        inner.state_reasons.set(match state {
            JobState::Completed => JobReasons::JOB_COMPLETED_SUCCESSFULLY,
            JobState::Canceled => JobReasons::JOB_CANCELED_BY_USER,
            _ => JobReasons::ABORTED_BY_SYSTEM,
        });
        inner.attrs.set(IppAttribute::integer(
            "time-at-completed",
            printer.relative_time(completed),
        ));
        inner.attrs.set(IppAttribute::date_time(
            "date-time-at-completed",
            completed.into(),
        ));
    }

    printer_inner.active_jobs.retain(|other| other.id != job.id);
    printer_inner.completed_jobs.push(job.clone());
    if printer_inner
        .processing_job
        .as_ref()
        .is_some_and(|p| p.id == job.id)
    {
        printer_inner.processing_job = None;
    }
    printer_inner.state = PrinterState::Idle;
    printer_inner.state_time = completed;
    add_event(
        &mut printer_inner,
        EventMask::JOB_COMPLETED,
        Some((job.id, state)),
        format!("Job {} {}.", job.id, match state {
            JobState::Completed => "completed",
            JobState::Canceled => "canceled",
            _ => "aborted",
        }),
    );

    info!(job_id = job.id, state = ?state, "job finished");
}

// ---------------------------------------------------------------------------
// Janitor
// ---------------------------------------------------------------------------

/// Reap jobs that completed more than a minute ago; drop expired
/// subscriptions along the way.
pub async fn clean_jobs(printer: &Arc<Printer>) {
    let now = Utc::now();
    let cleantime = now - JOB_HISTORY;
    let keep_files = printer.config.keep_files;

    let mut unlink: Vec<PathBuf> = Vec::new();
    {
        let mut inner = printer.inner.write().await;

        let mut reaped: Vec<i32> = Vec::new();
        // completed-jobs is ordered by completion time, oldest first.
        for job in inner.completed_jobs.clone() {
            let job_inner = job.inner.read().await;
            match job_inner.completed {
                Some(completed) if completed < cleantime => {
                    if !keep_files {
                        if let Some(filename) = job_inner.filename.clone() {
                            unlink.push(filename);
                        }
                    }
                    reaped.push(job.id);
                }
                _ => break,
            }
        }

        if !reaped.is_empty() {
            inner.jobs.retain(|j| !reaped.contains(&j.id));
            inner.completed_jobs.retain(|j| !reaped.contains(&j.id));
            inner
                .subscriptions
                .retain(|s| !matches!(s.job_id, Some(id) if reaped.contains(&id)));
            debug!(count = reaped.len(), "reaped completed jobs");
        }

        inner.subscriptions.retain(|s| !s.is_expired(now));
    }

    for filename in unlink {
        if let Err(e) = tokio::fs::remove_file(&filename).await {
            warn!(file = %filename.display(), error = %e, "unable to unlink spool file");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use platen_core::ServerConfig;
    use platen_ipp::{Operation, StatusCode};

    fn test_printer(spool: &std::path::Path) -> Arc<Printer> {
        let config = ServerConfig {
            printer_name: "p1".into(),
            port: 8631,
            spool_directory: spool.to_path_buf(),
            ..Default::default()
        };
        Printer::create(&config, "host.test")
    }

    fn print_job_request(user: &str, priority: Option<i32>) -> IppMessage {
        let mut request = IppMessage::request(Operation::PrintJob, 1);
        {
            let operation = &mut request.groups[0];
            operation.push(IppAttribute::uri(
                "printer-uri",
                "ipp://host.test:8631/ipp/print",
            ));
            operation.push(IppAttribute::name_value("requesting-user-name", user));
            operation.push(IppAttribute::name_value("job-name", "Test Job"));
        }
        if let Some(priority) = priority {
            let job = request.add_group(GroupTag::JobAttributes);
            job.push(IppAttribute::integer("job-priority", priority));
        }
        request
    }

    #[tokio::test]
    async fn job_ids_are_monotonic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let printer = test_printer(dir.path());

        let a = create_job(&printer, &print_job_request("alice", None), "application/pdf".into()).await;
        let b = create_job(&printer, &print_job_request("bob", None), "application/pdf".into()).await;
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(a.uri, "ipp://host.test:8631/ipp/print/1");
        assert_ne!(a.uuid, b.uuid);
    }

    #[tokio::test]
    async fn active_jobs_order_by_priority_then_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let printer = test_printer(dir.path());

        create_job(&printer, &print_job_request("a", Some(50)), "application/pdf".into()).await;
        create_job(&printer, &print_job_request("b", Some(80)), "application/pdf".into()).await;
        create_job(&printer, &print_job_request("c", Some(50)), "application/pdf".into()).await;

        let inner = printer.inner.read().await;
        let order: Vec<(i32, i32)> = inner
            .active_jobs
            .iter()
            .map(|j| (j.priority, j.id))
            .collect();
        assert_eq!(order, vec![(80, 2), (50, 1), (50, 3)]);

        // all-jobs is newest first.
        let ids: Vec<i32> = inner.jobs.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn attach_document_promotes_to_pending() {
        let dir = tempfile::tempdir().expect("tempdir");
        let printer = test_printer(dir.path());
        let job = create_job(&printer, &print_job_request("alice", None), "application/pdf".into()).await;

        attach_document(&printer, &job, "application/pdf", b"%PDF-1.4")
            .await
            .expect("attach");

        let inner = job.inner.read().await;
        assert_eq!(inner.state, JobState::Pending);
        let filename = inner.filename.clone().expect("filename");
        assert!(filename.exists());
        assert_eq!(
            filename.file_name().unwrap().to_str().unwrap(),
            "1-test_job.pdf"
        );
    }

    #[tokio::test]
    async fn find_job_by_uri_and_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let printer = test_printer(dir.path());
        let job = create_job(&printer, &print_job_request("alice", None), "application/pdf".into()).await;

        let mut by_id = IppMessage::request(Operation::GetJobAttributes, 2);
        by_id.groups[0].push(IppAttribute::integer("job-id", job.id));
        assert!(find_job(&printer, &by_id).await.is_some());

        let mut by_uri = IppMessage::request(Operation::GetJobAttributes, 3);
        by_uri.groups[0].push(IppAttribute::uri("job-uri", job.uri.clone()));
        assert!(find_job(&printer, &by_uri).await.is_some());

        let mut wrong = IppMessage::request(Operation::GetJobAttributes, 4);
        wrong.groups[0].push(IppAttribute::uri(
            "job-uri",
            "ipp://other/ipp/print/1",
        ));
        assert!(find_job(&printer, &wrong).await.is_none());

        let mut missing = IppMessage::request(Operation::GetJobAttributes, 5);
        missing.groups[0].push(IppAttribute::integer("job-id", 99));
        assert!(find_job(&printer, &missing).await.is_none());
    }

    #[tokio::test]
    async fn processing_completes_without_command() {
        let dir = tempfile::tempdir().expect("tempdir");
        let printer = test_printer(dir.path());
        let job = create_job(&printer, &print_job_request("alice", None), "application/pdf".into()).await;
        attach_document(&printer, &job, "application/pdf", b"%PDF-1.4")
            .await
            .expect("attach");

        check_jobs(printer.clone()).await;

        // The processing task runs asynchronously; wait for the terminal
        // state.
        for _ in 0..100 {
            if job.inner.read().await.state.is_terminal() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let inner = job.inner.read().await;
        assert_eq!(inner.state, JobState::Completed);
        assert!(inner
            .state_reasons
            .contains(JobReasons::JOB_COMPLETED_SUCCESSFULLY));

        let printer_inner = printer.inner.read().await;
        assert!(printer_inner.processing_job.is_none());
        assert_eq!(printer_inner.state, PrinterState::Idle);
        assert!(printer_inner.active_jobs.is_empty());
        assert_eq!(printer_inner.completed_jobs.len(), 1);
    }

    #[tokio::test]
    async fn janitor_reaps_old_jobs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let printer = test_printer(dir.path());
        let job = create_job(&printer, &print_job_request("alice", None), "application/pdf".into()).await;
        attach_document(&printer, &job, "application/pdf", b"%PDF-1.4")
            .await
            .expect("attach");
        let filename = job.inner.read().await.filename.clone().expect("filename");

        finish_job(&printer, &job, JobState::Completed).await;

        // Fresh completion survives the sweep.
        clean_jobs(&printer).await;
        assert_eq!(printer.inner.read().await.jobs.len(), 1);

        // Age the completion past the history window.
        job.inner.write().await.completed = Some(Utc::now() - Duration::seconds(120));
        clean_jobs(&printer).await;
        assert!(printer.inner.read().await.jobs.is_empty());
        assert!(!filename.exists());
    }

    #[tokio::test]
    async fn detect_format_sniffs_magic() {
        let request = IppMessage::response(StatusCode::SuccessfulOk, 1);
        assert_eq!(
            detect_format(&request, b"%PDF-1.7 data"),
            ("application/pdf".to_string(), true)
        );
        assert_eq!(
            detect_format(&request, &[0xFF, 0xD8, 0xFF, 0xE0]),
            ("image/jpeg".to_string(), true)
        );
        assert_eq!(
            detect_format(&request, b"plain text"),
            ("application/octet-stream".to_string(), false)
        );
    }
}
