// SPDX-License-Identifier: Apache-2.0
//
// Job operations: Print-Job through Close-Job.

use std::sync::Arc;

use platen_core::{JobReasons, JobState};
use platen_ipp::{GroupTag, IppAttribute, IppMessage, StatusCode};
use tracing::{info, warn};

use super::{error, job_attributes_group, ok, requested_attributes};
use crate::job::{
    self, add_event, attach_document, check_jobs, detect_format, find_job, finish_job,
};
use crate::printer::Printer;
use crate::subscription::EventMask;

/// Whether the printer accepts a document format.
async fn format_supported(printer: &Arc<Printer>, format: &str) -> bool {
    let inner = printer.inner.read().await;
    inner
        .attrs
        .get("document-format-supported")
        .map(|attr| attr.strings().iter().any(|f| *f == format))
        .unwrap_or(false)
}

/// Print-Job: create a job, spool the document, and schedule it.
pub async fn print_job(
    printer: &Arc<Printer>,
    request: &IppMessage,
    document: &[u8],
) -> IppMessage {
    if document.is_empty() {
        return error(
            StatusCode::ClientErrorBadRequest,
            request,
            "No document data in request.",
        );
    }

    let (format, detected) = detect_format(request, document);
    if format != "application/octet-stream" && !format_supported(printer, &format).await {
        return error(
            StatusCode::ClientErrorDocumentFormatNotSupported,
            request,
            format!("Document format \"{format}\" not supported."),
        );
    }

    let new_job = job::create_job(printer, request, format.clone()).await;
    if detected {
        new_job
            .inner
            .write()
            .await
            .attrs
            .set(IppAttribute::mime_type("document-format-detected", format.clone()));
    }

    if let Err(e) = attach_document(printer, &new_job, &format, document).await {
        warn!(job_id = new_job.id, error = %e, "unable to spool document");
        finish_job(printer, &new_job, JobState::Aborted).await;
        return error(
            StatusCode::ServerErrorInternalError,
            request,
            "Unable to spool document data.",
        );
    }

    // Build the response before scheduling: the processing task may flip
    // the job state as soon as it is spawned, and the Print-Job response
    // must report the job as pending.
    let mut response = ok(request);
    let requested = None;
    response
        .groups
        .push(job_attributes_group(printer, &new_job, &requested).await);

    check_jobs(printer.clone()).await;
    response
}

/// Print-URI: like Print-Job, with the document named by `document-uri`.
pub async fn print_uri(printer: &Arc<Printer>, request: &IppMessage) -> IppMessage {
    match read_document_uri(request).await {
        Ok(document) => print_job(printer, request, &document).await,
        Err(response) => *response,
    }
}

/// Fetch the payload a `document-uri` names.
///
/// Only `file://` is dereferenced; the remote schemes advertised for
/// validation are not fetched by this server.
async fn read_document_uri(request: &IppMessage) -> Result<Vec<u8>, Box<IppMessage>> {
    let uri = request
        .operation_attributes()
        .and_then(|g| g.get_str("document-uri"))
        .ok_or_else(|| {
            Box::new(error(
                StatusCode::ClientErrorBadRequest,
                request,
                "Missing document-uri.",
            ))
        })?;

    let Some(path) = uri.strip_prefix("file://") else {
        return Err(Box::new(error(
            StatusCode::ClientErrorUriSchemeNotSupported,
            request,
            format!("URI scheme not supported for \"{uri}\"."),
        )));
    };

    tokio::fs::read(path).await.map_err(|e| {
        Box::new(error(
            StatusCode::ClientErrorNotFound,
            request,
            format!("Unable to read \"{uri}\": {e}."),
        ))
    })
}

/// Validate-Job: run Print-Job's validation without creating a job.
pub async fn validate_job(printer: &Arc<Printer>, request: &IppMessage) -> IppMessage {
    if let Some(format) = request
        .operation_attributes()
        .and_then(|g| g.get_str("document-format"))
    {
        if format != "application/octet-stream" && !format_supported(printer, format).await {
            return error(
                StatusCode::ClientErrorDocumentFormatNotSupported,
                request,
                format!("Document format \"{format}\" not supported."),
            );
        }
    }

    if let Some(copies) = request.groups.iter().find_map(|g| g.get_int("copies")) {
        if !(1..=9999).contains(&copies) {
            return error(
                StatusCode::ClientErrorAttributesOrValuesNotSupported,
                request,
                format!("Unsupported \"copies\" value {copies}."),
            );
        }
    }

    ok(request)
}

/// Create-Job: create a held job awaiting Send-Document.
pub async fn create_job(printer: &Arc<Printer>, request: &IppMessage) -> IppMessage {
    let format = request
        .operation_attributes()
        .and_then(|g| g.get_str("document-format"))
        .unwrap_or("application/octet-stream")
        .to_string();

    let new_job = job::create_job(printer, request, format).await;
    {
        let mut inner = new_job.inner.write().await;
        inner.state_reasons.set(JobReasons::JOB_DATA_INSUFFICIENT);
    }

    let mut response = ok(request);
    response
        .groups
        .push(job_attributes_group(printer, &new_job, &None).await);
    response
}

/// Send-Document: attach the (single) document to a held job.
pub async fn send_document(
    printer: &Arc<Printer>,
    request: &IppMessage,
    document: &[u8],
) -> IppMessage {
    let Some(target) = find_job(printer, request).await else {
        return error(StatusCode::ClientErrorNotFound, request, "Job not found.");
    };

    let last_document = request
        .operation_attributes()
        .and_then(|g| g.get("last-document"))
        .and_then(|a| a.as_bool());
    let Some(last_document) = last_document else {
        return error(
            StatusCode::ClientErrorBadRequest,
            request,
            "Missing required last-document attribute.",
        );
    };

    {
        let inner = target.inner.read().await;
        if inner.filename.is_some() {
            return error(
                StatusCode::ServerErrorMultipleDocumentJobsNotSupported,
                request,
                "Job already has a document.",
            );
        }
        if inner.state.is_terminal() || inner.state == JobState::Processing {
            return error(
                StatusCode::ClientErrorNotPossible,
                request,
                "Job is not accepting documents.",
            );
        }
    }

    if document.is_empty() && last_document {
        // Closing an empty job: nothing to print.
        finish_job(printer, &target, JobState::Aborted).await;
        return error(
            StatusCode::ClientErrorBadRequest,
            request,
            "No document data in request.",
        );
    }

    let (format, _) = detect_format(request, document);
    if let Err(e) = attach_document(printer, &target, &format, document).await {
        warn!(job_id = target.id, error = %e, "unable to spool document");
        finish_job(printer, &target, JobState::Aborted).await;
        return error(
            StatusCode::ServerErrorInternalError,
            request,
            "Unable to spool document data.",
        );
    }

    if last_document {
        target
            .inner
            .write()
            .await
            .state_reasons
            .clear(JobReasons::JOB_DATA_INSUFFICIENT);
    } else {
        // Held until the job is closed.
        let mut inner = target.inner.write().await;
        inner.state = JobState::PendingHeld;
    }

    // Respond with the pending state before the scheduler can pick the
    // job up.
    let mut response = ok(request);
    response
        .groups
        .push(job_attributes_group(printer, &target, &None).await);

    if last_document {
        check_jobs(printer.clone()).await;
    }
    response
}

/// Send-URI: Send-Document with a `document-uri` payload.
pub async fn send_uri(printer: &Arc<Printer>, request: &IppMessage) -> IppMessage {
    match read_document_uri(request).await {
        Ok(document) => send_document(printer, request, &document).await,
        Err(response) => *response,
    }
}

/// Cancel-Job.
pub async fn cancel_job(printer: &Arc<Printer>, request: &IppMessage) -> IppMessage {
    let Some(target) = find_job(printer, request).await else {
        return error(StatusCode::ClientErrorNotFound, request, "Job not found.");
    };

    let state = target.inner.read().await.state;
    match state {
        JobState::Canceled | JobState::Aborted | JobState::Completed => error(
            StatusCode::ClientErrorNotPossible,
            request,
            format!("Job #{} is already terminated.", target.id),
        ),
        JobState::Processing => {
            // Cooperative cancellation: the processing task terminates the
            // transform subprocess and completes the job as canceled.
            target.cancel();
            ok(request)
        }
        _ => {
            finish_job(printer, &target, JobState::Canceled).await;
            unlink_spool(printer, &target).await;
            ok(request)
        }
    }
}

/// Remove a canceled job's spool file unless retention is configured.
async fn unlink_spool(printer: &Arc<Printer>, target: &Arc<crate::job::Job>) {
    if printer.config.keep_files {
        return;
    }
    let filename = target.inner.write().await.filename.take();
    if let Some(filename) = filename {
        if let Err(e) = tokio::fs::remove_file(&filename).await {
            warn!(file = %filename.display(), error = %e, "unable to unlink spool file");
        }
    }
}

/// Cancel-My-Jobs: cancel every active job owned by the requesting user.
pub async fn cancel_my_jobs(printer: &Arc<Printer>, request: &IppMessage) -> IppMessage {
    let Some(user) = request
        .operation_attributes()
        .and_then(|g| g.get_str("requesting-user-name"))
        .map(String::from)
    else {
        return error(
            StatusCode::ClientErrorBadRequest,
            request,
            "Missing requesting-user-name.",
        );
    };

    let mine: Vec<Arc<crate::job::Job>> = {
        let inner = printer.inner.read().await;
        inner
            .active_jobs
            .iter()
            .filter(|j| j.username == user)
            .cloned()
            .collect()
    };

    for target in mine {
        let state = target.inner.read().await.state;
        match state {
            JobState::Processing => target.cancel(),
            state if !state.is_terminal() => {
                finish_job(printer, &target, JobState::Canceled).await;
                unlink_spool(printer, &target).await;
            }
            _ => {}
        }
    }

    ok(request)
}

/// Close-Job: promote a held job with spooled data to pending.
pub async fn close_job(printer: &Arc<Printer>, request: &IppMessage) -> IppMessage {
    let Some(target) = find_job(printer, request).await else {
        return error(StatusCode::ClientErrorNotFound, request, "Job not found.");
    };

    let promoted = {
        let mut inner = target.inner.write().await;
        match inner.state {
            JobState::PendingHeld if inner.filename.is_some() => {
                inner.state = JobState::Pending;
                inner.state_reasons.clear(JobReasons::JOB_DATA_INSUFFICIENT);
                inner.state_reasons.clear(JobReasons::JOB_INCOMING);
                true
            }
            JobState::PendingHeld => {
                return error(
                    StatusCode::ClientErrorNotPossible,
                    request,
                    "Job has no document data.",
                );
            }
            JobState::Pending | JobState::Processing => false,
            _ => {
                return error(
                    StatusCode::ClientErrorNotPossible,
                    request,
                    "Job is not open.",
                );
            }
        }
    };

    if promoted {
        let mut inner = printer.inner.write().await;
        add_event(
            &mut inner,
            EventMask::JOB_STATE_CHANGED,
            Some((target.id, JobState::Pending)),
            format!("Job {} closed.", target.id),
        );
    }

    // Respond with the pending state before the scheduler can pick the
    // job up.
    let mut response = ok(request);
    response
        .groups
        .push(job_attributes_group(printer, &target, &None).await);

    if promoted {
        check_jobs(printer.clone()).await;
    }
    response
}

/// Get-Job-Attributes.
pub async fn get_job_attributes(printer: &Arc<Printer>, request: &IppMessage) -> IppMessage {
    let Some(target) = find_job(printer, request).await else {
        return error(StatusCode::ClientErrorNotFound, request, "Job not found.");
    };

    let requested = requested_attributes(request);
    let mut response = ok(request);
    response
        .groups
        .push(job_attributes_group(printer, &target, &requested).await);
    response
}

/// Get-Jobs: the `which-jobs` / `my-jobs` / `limit` filtered listing.
pub async fn get_jobs(printer: &Arc<Printer>, request: &IppMessage) -> IppMessage {
    let operation = request.operation_attributes();
    let which = operation
        .and_then(|g| g.get_str("which-jobs"))
        .unwrap_or("not-completed")
        .to_string();
    let my_jobs = operation
        .and_then(|g| g.get("my-jobs"))
        .and_then(|a| a.as_bool())
        .unwrap_or(false);
    let user = operation
        .and_then(|g| g.get_str("requesting-user-name"))
        .unwrap_or("anonymous")
        .to_string();
    let limit = operation
        .and_then(|g| g.get_int("limit"))
        .filter(|l| *l > 0)
        .map(|l| l as usize);
    let first_job_id = operation
        .and_then(|g| g.get_int("first-job-id"))
        .unwrap_or(1);

    let selected: Vec<Arc<crate::job::Job>> = {
        let inner = printer.inner.read().await;
        match which.as_str() {
            "completed" => inner.completed_jobs.clone(),
            "not-completed" => inner.active_jobs.clone(),
            "all" => inner.jobs.clone(),
            _ => inner.jobs.clone(),
        }
    };

    let state_filter: Option<JobState> = match which.as_str() {
        "aborted" => Some(JobState::Aborted),
        "canceled" => Some(JobState::Canceled),
        "pending" => Some(JobState::Pending),
        "pending-held" => Some(JobState::PendingHeld),
        "processing" => Some(JobState::Processing),
        "processing-stopped" => Some(JobState::ProcessingStopped),
        _ => None,
    };

    let requested = requested_attributes(request);
    let mut response = ok(request);
    let mut count = 0usize;

    for target in selected {
        if target.id < first_job_id {
            continue;
        }
        if my_jobs && target.username != user {
            continue;
        }
        if let Some(state) = state_filter {
            if target.inner.read().await.state != state {
                continue;
            }
        }
        if let Some(limit) = limit {
            if count == limit {
                break;
            }
        }
        response
            .groups
            .push(job_attributes_group(printer, &target, &requested).await);
        count += 1;
    }

    info!(which = %which, count, "Get-Jobs");
    response
}

/// Validate-Document: check a document format without accepting data.
pub async fn validate_document(printer: &Arc<Printer>, request: &IppMessage) -> IppMessage {
    let format = request
        .operation_attributes()
        .and_then(|g| g.get_str("document-format"))
        .unwrap_or("application/octet-stream");

    if format != "application/octet-stream" && !format_supported(printer, format).await {
        return error(
            StatusCode::ClientErrorDocumentFormatNotSupported,
            request,
            format!("Document format \"{format}\" not supported."),
        );
    }
    ok(request)
}

/// Get-Documents / Get-Document-Attributes: single-document job model.
pub async fn get_documents(printer: &Arc<Printer>, request: &IppMessage) -> IppMessage {
    let Some(target) = find_job(printer, request).await else {
        return error(StatusCode::ClientErrorNotFound, request, "Job not found.");
    };

    let inner = target.inner.read().await;
    if inner.filename.is_none() {
        return error(
            StatusCode::ClientErrorNotFound,
            request,
            "Job has no documents.",
        );
    }

    let mut response = ok(request);
    let group = response.add_group(GroupTag::DocumentAttributes);
    group.push(IppAttribute::integer("document-number", 1));
    group.push(IppAttribute::mime_type("document-format", target.format.clone()));
    group.push(IppAttribute::enumeration(
        "document-state",
        inner.state.as_ipp(),
    ));
    group.push(IppAttribute::keywords(
        "document-state-reasons",
        inner.state_reasons.keywords(),
    ));
    response
}
