// SPDX-License-Identifier: Apache-2.0
//
// Output-Device proxy operations (PWG 5100.18 INFRA model).
//
// A remote output device registers with Update-Output-Device-Attributes;
// from then on jobs stop in the fetchable state and the device pulls
// their documents with Fetch-Job / Fetch-Document, reporting progress
// back through Update-Job-Status and the Acknowledge operations.

use std::sync::Arc;

use chrono::Utc;
use platen_core::{JobReasons, JobState};
use platen_ipp::{GroupTag, IppAttribute, IppMessage, StatusCode};
use tracing::{info, warn};

use super::{error, job_attributes_group, ok, ResponseBody};
use crate::job::{find_job, finish_job};
use crate::printer::{OutputDevice, Printer};
use crate::transform;

fn device_uuid(request: &IppMessage) -> Option<String> {
    request
        .operation_attributes()
        .and_then(|g| g.get_str("output-device-uuid"))
        .map(String::from)
}

/// Update-Output-Device-Attributes: register or refresh the proxy device.
pub async fn update_output_device_attributes(
    printer: &Arc<Printer>,
    request: &IppMessage,
) -> IppMessage {
    let Some(uuid) = device_uuid(request) else {
        return error(
            StatusCode::ClientErrorBadRequest,
            request,
            "Missing output-device-uuid.",
        );
    };

    let mut inner = printer.inner.write().await;
    let device = inner.device.get_or_insert_with(|| OutputDevice {
        uuid: uuid.clone(),
        attrs: platen_ipp::Attributes::new(),
        registered: Utc::now(),
    });
    if device.uuid != uuid {
        return error(
            StatusCode::ClientErrorNotPossible,
            request,
            "Another output device is registered.",
        );
    }
    for group in request.groups_of(GroupTag::PrinterAttributes) {
        for attr in &group.attributes {
            device.attrs.set(attr.clone());
        }
    }

    info!(uuid = %uuid, "output device attributes updated");
    ok(request)
}

/// Get-Output-Device-Attributes.
pub async fn get_output_device_attributes(
    printer: &Arc<Printer>,
    request: &IppMessage,
) -> IppMessage {
    let inner = printer.inner.read().await;
    match &inner.device {
        Some(device) => {
            let mut response = ok(request);
            let group = response.add_group(GroupTag::PrinterAttributes);
            for attr in device.attrs.iter() {
                group.attributes.push(attr.clone());
            }
            response
        }
        None => error(
            StatusCode::ClientErrorNotFound,
            request,
            "No output device registered.",
        ),
    }
}

/// Deregister-Output-Device.
pub async fn deregister_output_device(
    printer: &Arc<Printer>,
    request: &IppMessage,
) -> IppMessage {
    let mut inner = printer.inner.write().await;
    if inner.device.take().is_none() {
        return error(
            StatusCode::ClientErrorNotFound,
            request,
            "No output device registered.",
        );
    }
    info!("output device deregistered");
    ok(request)
}

/// Fetch-Job: hand the device a fetchable job's attributes.
pub async fn fetch_job(printer: &Arc<Printer>, request: &IppMessage) -> IppMessage {
    let Some(target) = find_job(printer, request).await else {
        return error(StatusCode::ClientErrorNotFound, request, "Job not found.");
    };

    let fetchable = target
        .inner
        .read()
        .await
        .state_reasons
        .contains(JobReasons::JOB_FETCHABLE);
    if !fetchable {
        return error(
            StatusCode::ClientErrorNotFetchable,
            request,
            format!("Job #{} is not fetchable.", target.id),
        );
    }

    let mut response = ok(request);
    response
        .groups
        .push(job_attributes_group(printer, &target, &None).await);
    response
}

/// Fetch-Document: stream the document payload to the device.
///
/// The document bytes follow the encoded response attributes. When a
/// transform command is configured and the device asks for the printer's
/// output format, the document is converted on the fly.
pub async fn fetch_document(
    printer: &Arc<Printer>,
    request: &IppMessage,
) -> (IppMessage, ResponseBody) {
    let Some(target) = find_job(printer, request).await else {
        return (
            error(StatusCode::ClientErrorNotFound, request, "Job not found."),
            ResponseBody::None,
        );
    };

    let (fetchable, filename) = {
        let inner = target.inner.read().await;
        (
            inner.state_reasons.contains(JobReasons::JOB_FETCHABLE),
            inner.filename.clone(),
        )
    };
    if !fetchable {
        return (
            error(
                StatusCode::ClientErrorNotFetchable,
                request,
                format!("Job #{} is not fetchable.", target.id),
            ),
            ResponseBody::None,
        );
    }
    let Some(filename) = filename else {
        return (
            error(
                StatusCode::ClientErrorNotFound,
                request,
                "Job has no document.",
            ),
            ResponseBody::None,
        );
    };

    let wanted = request
        .operation_attributes()
        .and_then(|g| g.get_str("document-format"))
        .unwrap_or(&target.format)
        .to_string();

    let (format, payload) = if wanted != target.format {
        // Convert through the transform tool when the device asks for the
        // configured output format.
        let command = printer.config.command.clone();
        match command {
            Some(command) if wanted == printer.config.output_format => {
                match transform::transform_to_client(printer, &target, &command).await {
                    Ok((0, bytes)) => (wanted.clone(), bytes),
                    Ok((status, _)) => {
                        warn!(job_id = target.id, status, "fetch transform failed");
                        return (
                            error(
                                StatusCode::ServerErrorDeviceError,
                                request,
                                "Document conversion failed.",
                            ),
                            ResponseBody::None,
                        );
                    }
                    Err(e) => {
                        warn!(job_id = target.id, error = %e, "fetch transform failed");
                        return (
                            error(
                                StatusCode::ServerErrorDeviceError,
                                request,
                                "Document conversion failed.",
                            ),
                            ResponseBody::None,
                        );
                    }
                }
            }
            _ => {
                return (
                    error(
                        StatusCode::ClientErrorDocumentFormatNotSupported,
                        request,
                        format!("Cannot supply \"{wanted}\"."),
                    ),
                    ResponseBody::None,
                );
            }
        }
    } else {
        match tokio::fs::read(&filename).await {
            Ok(bytes) => (target.format.clone(), bytes),
            Err(e) => {
                warn!(job_id = target.id, error = %e, "unable to read spool file");
                return (
                    error(
                        StatusCode::ServerErrorInternalError,
                        request,
                        "Unable to read document.",
                    ),
                    ResponseBody::None,
                );
            }
        }
    };

    let mut response = ok(request);
    if let Some(group) = response
        .groups
        .iter_mut()
        .find(|g| g.tag == GroupTag::OperationAttributes)
    {
        group.push(IppAttribute::mime_type("document-format", format));
    }
    (response, ResponseBody::Bytes(payload))
}

/// Acknowledge-Job: the device takes ownership of a fetchable job.
pub async fn acknowledge_job(printer: &Arc<Printer>, request: &IppMessage) -> IppMessage {
    let Some(target) = find_job(printer, request).await else {
        return error(StatusCode::ClientErrorNotFound, request, "Job not found.");
    };

    let mut inner = target.inner.write().await;
    if !inner.state_reasons.contains(JobReasons::JOB_FETCHABLE) {
        return error(
            StatusCode::ClientErrorNotFetchable,
            request,
            format!("Job #{} is not fetchable.", target.id),
        );
    }
    inner.state = JobState::Processing;
    inner.state_reasons.clear(JobReasons::JOB_FETCHABLE);
    inner.state_reasons.set(JobReasons::QUEUED_IN_DEVICE);
    info!(job_id = target.id, "job acknowledged by output device");
    ok(request)
}

/// Acknowledge-Document.
pub async fn acknowledge_document(printer: &Arc<Printer>, request: &IppMessage) -> IppMessage {
    match find_job(printer, request).await {
        Some(_) => ok(request),
        None => error(StatusCode::ClientErrorNotFound, request, "Job not found."),
    }
}

/// Update-Job-Status / Update-Document-Status: apply device-reported
/// state.
pub async fn update_job_status(printer: &Arc<Printer>, request: &IppMessage) -> IppMessage {
    let Some(target) = find_job(printer, request).await else {
        return error(StatusCode::ClientErrorNotFound, request, "Job not found.");
    };

    let job_group = request.group(GroupTag::JobAttributes);

    if let Some(group) = job_group {
        let mut inner = target.inner.write().await;
        if let Some(attr) = group.get("job-state-reasons") {
            let mut reasons = JobReasons::NONE;
            for keyword in attr.strings() {
                if let Some(bit) = JobReasons::bit_for(keyword) {
                    reasons.set(bit);
                }
            }
            inner.dev_state_reasons = reasons;
        }
        if let Some(count) = group.get_int("job-impressions-completed") {
            inner.impressions_completed = count;
            inner
                .attrs
                .set(IppAttribute::integer("job-impressions-completed", count));
        }
    }

    // A terminal device-reported state completes the job locally.
    let device_state = job_group
        .and_then(|g| g.get_int("output-device-job-state").or_else(|| g.get_int("job-state")));
    if let Some(state) = device_state {
        let terminal = match state {
            7 => Some(JobState::Canceled),
            8 => Some(JobState::Aborted),
            9 => Some(JobState::Completed),
            _ => None,
        };
        if let Some(state) = terminal {
            if !target.inner.read().await.state.is_terminal() {
                finish_job(printer, &target, state).await;
            }
        }
    }

    ok(request)
}

/// Update-Active-Jobs: report every job the device could fetch.
pub async fn update_active_jobs(printer: &Arc<Printer>, request: &IppMessage) -> IppMessage {
    let jobs: Vec<_> = {
        let inner = printer.inner.read().await;
        inner.active_jobs.clone()
    };

    let mut response = ok(request);
    for target in jobs {
        let fetchable = target
            .inner
            .read()
            .await
            .state_reasons
            .contains(JobReasons::JOB_FETCHABLE);
        if fetchable {
            response
                .groups
                .push(job_attributes_group(printer, &target, &None).await);
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{attach_document, check_jobs, create_job};
    use platen_core::ServerConfig;
    use platen_ipp::Operation;

    async fn proxy_printer(spool: &std::path::Path) -> Arc<Printer> {
        let config = ServerConfig {
            printer_name: "p1".into(),
            spool_directory: spool.to_path_buf(),
            ..Default::default()
        };
        let printer = Printer::create(&config, "host.test");

        // Register a device before any job runs.
        let mut register = base(Operation::UpdateOutputDeviceAttributes);
        register.groups[0].push(IppAttribute::uri(
            "output-device-uuid",
            "urn:uuid:11111111-2222-3333-4444-555555555555",
        ));
        let response = update_output_device_attributes(&printer, &register).await;
        assert_eq!(response.code, StatusCode::SuccessfulOk.as_u16());
        printer
    }

    fn base(op: Operation) -> IppMessage {
        let mut request = IppMessage::request(op, 1);
        request.groups[0].push(IppAttribute::uri(
            "printer-uri",
            "ipp://host.test:631/ipp/print",
        ));
        request
    }

    async fn fetchable_job(printer: &Arc<Printer>) -> Arc<crate::job::Job> {
        let mut print = base(Operation::PrintJob);
        print.groups[0].push(IppAttribute::name_value("requesting-user-name", "alice"));
        let job = create_job(printer, &print, "application/pdf".into()).await;
        attach_document(printer, &job, "application/pdf", b"%PDF-1.4 doc")
            .await
            .expect("attach");
        check_jobs(printer.clone()).await;

        // Wait for the proxy path to park the job as fetchable.
        for _ in 0..100 {
            if job
                .inner
                .read()
                .await
                .state_reasons
                .contains(JobReasons::JOB_FETCHABLE)
            {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        job
    }

    #[tokio::test]
    async fn proxy_mode_parks_jobs_fetchable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let printer = proxy_printer(dir.path()).await;
        let job = fetchable_job(&printer).await;

        let inner = job.inner.read().await;
        assert_eq!(inner.state, JobState::ProcessingStopped);
        assert!(inner.state_reasons.contains(JobReasons::JOB_FETCHABLE));
    }

    #[tokio::test]
    async fn fetch_document_returns_payload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let printer = proxy_printer(dir.path()).await;
        let job = fetchable_job(&printer).await;

        let mut fetch = base(Operation::FetchDocument);
        fetch.groups[0].push(IppAttribute::integer("job-id", job.id));
        let (response, body) = fetch_document(&printer, &fetch).await;

        assert_eq!(response.code, StatusCode::SuccessfulOk.as_u16());
        match body {
            ResponseBody::Bytes(bytes) => assert_eq!(bytes, b"%PDF-1.4 doc"),
            other => panic!("expected bytes, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_requires_fetchable_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        // No device: jobs complete locally and are never fetchable.
        let config = ServerConfig {
            printer_name: "p1".into(),
            spool_directory: dir.path().to_path_buf(),
            ..Default::default()
        };
        let printer = Printer::create(&config, "host.test");
        let mut print = base(Operation::PrintJob);
        print.groups[0].push(IppAttribute::name_value("requesting-user-name", "a"));
        let job = create_job(&printer, &print, "application/pdf".into()).await;

        let mut fetch = base(Operation::FetchJob);
        fetch.groups[0].push(IppAttribute::integer("job-id", job.id));
        let response = fetch_job(&printer, &fetch).await;
        assert_eq!(response.code, StatusCode::ClientErrorNotFetchable.as_u16());
    }

    #[tokio::test]
    async fn acknowledge_then_complete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let printer = proxy_printer(dir.path()).await;
        let job = fetchable_job(&printer).await;

        let mut acknowledge = base(Operation::AcknowledgeJob);
        acknowledge.groups[0].push(IppAttribute::integer("job-id", job.id));
        let response = acknowledge_job(&printer, &acknowledge).await;
        assert_eq!(response.code, StatusCode::SuccessfulOk.as_u16());
        assert_eq!(job.inner.read().await.state, JobState::Processing);

        let mut update = base(Operation::UpdateJobStatus);
        update.groups[0].push(IppAttribute::integer("job-id", job.id));
        let group = update.add_group(GroupTag::JobAttributes);
        group.push(IppAttribute::enumeration("output-device-job-state", 9));
        group.push(IppAttribute::integer("job-impressions-completed", 5));
        let response = update_job_status(&printer, &update).await;
        assert_eq!(response.code, StatusCode::SuccessfulOk.as_u16());

        let inner = job.inner.read().await;
        assert_eq!(inner.state, JobState::Completed);
        assert_eq!(inner.impressions_completed, 5);
    }

    #[tokio::test]
    async fn deregister_clears_device() {
        let dir = tempfile::tempdir().expect("tempdir");
        let printer = proxy_printer(dir.path()).await;

        let response = deregister_output_device(&printer, &base(Operation::DeregisterOutputDevice)).await;
        assert_eq!(response.code, StatusCode::SuccessfulOk.as_u16());
        let response = deregister_output_device(&printer, &base(Operation::DeregisterOutputDevice)).await;
        assert_eq!(response.code, StatusCode::ClientErrorNotFound.as_u16());
    }

    #[tokio::test]
    async fn second_device_uuid_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let printer = proxy_printer(dir.path()).await;

        let mut register = base(Operation::UpdateOutputDeviceAttributes);
        register.groups[0].push(IppAttribute::uri(
            "output-device-uuid",
            "urn:uuid:99999999-0000-0000-0000-000000000000",
        ));
        let response = update_output_device_attributes(&printer, &register).await;
        assert_eq!(response.code, StatusCode::ClientErrorNotPossible.as_u16());
    }

    #[tokio::test]
    async fn update_active_jobs_lists_fetchable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let printer = proxy_printer(dir.path()).await;
        fetchable_job(&printer).await;

        let response = update_active_jobs(&printer, &base(Operation::UpdateActiveJobs)).await;
        assert_eq!(response.groups_of(GroupTag::JobAttributes).count(), 1);
    }
}
