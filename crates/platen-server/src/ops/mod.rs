// SPDX-License-Identifier: Apache-2.0
//
// IPP operation dispatch.
//
// Each handler receives the parsed request and produces a response
// message; handlers translate internal errors into IPP status codes and
// never let a `PlatenError` cross the wire.

pub mod device_ops;
pub mod job_ops;
pub mod printer_ops;
pub mod sub_ops;

use std::sync::Arc;

use platen_ipp::{
    AttributeGroup, GroupTag, IppAttribute, IppMessage, Operation, StatusCode,
};
use tracing::{debug, warn};

use crate::job::Job;
use crate::printer::Printer;

/// Optional payload following the encoded IPP response (Fetch-Document).
#[derive(Debug)]
pub enum ResponseBody {
    None,
    Bytes(Vec<u8>),
}

/// Route one parsed IPP request.
pub async fn dispatch(
    printer: Arc<Printer>,
    request: IppMessage,
    document: &[u8],
) -> (IppMessage, ResponseBody) {
    // Version check first: only 1.x / 2.x requests are honored.
    if request.version_major == 0 || request.version_major > 2 {
        return (
            error(
                StatusCode::ServerErrorVersionNotSupported,
                &request,
                format!(
                    "Bad request version number {}.{}.",
                    request.version_major, request.version_minor
                ),
            ),
            ResponseBody::None,
        );
    }

    // The operation group with its mandatory members must be present.
    let valid_operation_group = request
        .operation_attributes()
        .map(|group| {
            group.get_str("attributes-charset").is_some()
                && group.get_str("attributes-natural-language").is_some()
        })
        .unwrap_or(false);
    if !valid_operation_group {
        return (
            error(
                StatusCode::ClientErrorBadRequest,
                &request,
                "Missing required operation attributes.",
            ),
            ResponseBody::None,
        );
    }

    let Some(operation) = request.operation() else {
        warn!(code = format!("0x{:04X}", request.code), "unsupported operation");
        return (
            error(
                StatusCode::ServerErrorOperationNotSupported,
                &request,
                format!("Operation 0x{:04X} is not supported.", request.code),
            ),
            ResponseBody::None,
        );
    };

    // Every operation addresses the printer or one of its jobs.
    let has_target = request
        .operation_attributes()
        .map(|g| g.get_str("printer-uri").is_some() || g.get_str("job-uri").is_some())
        .unwrap_or(false);
    if !has_target {
        return (
            error(
                StatusCode::ClientErrorBadRequest,
                &request,
                "Missing printer-uri or job-uri.",
            ),
            ResponseBody::None,
        );
    }

    debug!(operation = operation.name(), request_id = request.request_id, "dispatching");

    let response = match operation {
        Operation::PrintJob => job_ops::print_job(&printer, &request, document).await,
        Operation::PrintUri => job_ops::print_uri(&printer, &request).await,
        Operation::ValidateJob => job_ops::validate_job(&printer, &request).await,
        Operation::CreateJob => job_ops::create_job(&printer, &request).await,
        Operation::SendDocument => job_ops::send_document(&printer, &request, document).await,
        Operation::SendUri => job_ops::send_uri(&printer, &request).await,
        Operation::CancelJob => job_ops::cancel_job(&printer, &request).await,
        Operation::GetJobAttributes => job_ops::get_job_attributes(&printer, &request).await,
        Operation::GetJobs => job_ops::get_jobs(&printer, &request).await,
        Operation::CancelMyJobs => job_ops::cancel_my_jobs(&printer, &request).await,
        Operation::CloseJob => job_ops::close_job(&printer, &request).await,
        Operation::ValidateDocument => job_ops::validate_document(&printer, &request).await,
        Operation::GetDocumentAttributes | Operation::GetDocuments => {
            job_ops::get_documents(&printer, &request).await
        }
        Operation::GetPrinterAttributes => {
            printer_ops::get_printer_attributes(&printer, &request).await
        }
        Operation::GetPrinterSupportedValues => {
            printer_ops::get_printer_supported_values(&printer, &request).await
        }
        Operation::IdentifyPrinter => printer_ops::identify_printer(&printer, &request).await,
        Operation::CreatePrinterSubscriptions => {
            sub_ops::create_subscriptions(&printer, &request, false).await
        }
        Operation::CreateJobSubscriptions => {
            sub_ops::create_subscriptions(&printer, &request, true).await
        }
        Operation::GetSubscriptionAttributes => {
            sub_ops::get_subscription_attributes(&printer, &request).await
        }
        Operation::GetSubscriptions => sub_ops::get_subscriptions(&printer, &request).await,
        Operation::RenewSubscription => sub_ops::renew_subscription(&printer, &request).await,
        Operation::CancelSubscription => sub_ops::cancel_subscription(&printer, &request).await,
        Operation::GetNotifications => sub_ops::get_notifications(&printer, &request).await,
        Operation::FetchDocument => {
            return device_ops::fetch_document(&printer, &request).await;
        }
        Operation::FetchJob => device_ops::fetch_job(&printer, &request).await,
        Operation::AcknowledgeDocument => device_ops::acknowledge_document(&printer, &request).await,
        Operation::AcknowledgeIdentifyPrinter => ok(&request),
        Operation::AcknowledgeJob => device_ops::acknowledge_job(&printer, &request).await,
        Operation::GetOutputDeviceAttributes => {
            device_ops::get_output_device_attributes(&printer, &request).await
        }
        Operation::UpdateActiveJobs => device_ops::update_active_jobs(&printer, &request).await,
        Operation::UpdateDocumentStatus | Operation::UpdateJobStatus => {
            device_ops::update_job_status(&printer, &request).await
        }
        Operation::UpdateOutputDeviceAttributes => {
            device_ops::update_output_device_attributes(&printer, &request).await
        }
        Operation::DeregisterOutputDevice => {
            device_ops::deregister_output_device(&printer, &request).await
        }
    };

    (response, ResponseBody::None)
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

/// A bare `successful-ok` response.
pub fn ok(request: &IppMessage) -> IppMessage {
    IppMessage::response(StatusCode::SuccessfulOk, request.request_id)
}

/// An error response carrying a `status-message`.
pub fn error(status: StatusCode, request: &IppMessage, message: impl Into<String>) -> IppMessage {
    let mut response = IppMessage::response(status, request.request_id);
    response.set_status_message(message);
    response
}

// ---------------------------------------------------------------------------
// requested-attributes filtering
// ---------------------------------------------------------------------------

/// Attribute names whose base belongs to the job-template group.
const JOB_TEMPLATE_NAMES: [&str; 16] = [
    "copies",
    "finishings",
    "job-hold-until",
    "job-priority",
    "job-sheets",
    "media",
    "media-col",
    "multiple-document-handling",
    "number-up",
    "orientation-requested",
    "output-bin",
    "page-ranges",
    "print-color-mode",
    "print-quality",
    "printer-resolution",
    "sides",
];

fn is_job_template(name: &str) -> bool {
    let base = name
        .strip_suffix("-default")
        .or_else(|| name.strip_suffix("-supported"))
        .or_else(|| name.strip_suffix("-ready"))
        .or_else(|| name.strip_suffix("-database"))
        .unwrap_or(name);
    JOB_TEMPLATE_NAMES.contains(&base)
}

/// The `requested-attributes` list; `None` requests everything.
pub fn requested_attributes(request: &IppMessage) -> Option<Vec<String>> {
    let attr = request
        .operation_attributes()?
        .get("requested-attributes")?;
    Some(attr.strings().iter().map(|s| s.to_string()).collect())
}

/// Whether a response attribute passes the `requested-attributes` filter.
///
/// The group tokens `all`, `job-template`, `job-description`, and
/// `printer-description` expand to their attribute groups.
pub fn attribute_requested(requested: &Option<Vec<String>>, name: &str) -> bool {
    let Some(requested) = requested else {
        return true;
    };
    requested.iter().any(|token| match token.as_str() {
        "all" => true,
        "job-template" => is_job_template(name),
        "printer-description" | "job-description" => !is_job_template(name),
        other => other == name,
    })
}

// ---------------------------------------------------------------------------
// Job attribute groups
// ---------------------------------------------------------------------------

/// Build the `job-attributes` response group for a job.
pub async fn job_attributes_group(
    printer: &Arc<Printer>,
    job: &Arc<Job>,
    requested: &Option<Vec<String>>,
) -> AttributeGroup {
    let mut group = AttributeGroup::new(GroupTag::JobAttributes);
    let inner = job.inner.read().await;

    let mut push = |attr: IppAttribute| {
        if attribute_requested(requested, &attr.name) {
            group.attributes.push(attr);
        }
    };

    push(IppAttribute::integer("job-id", job.id));
    push(IppAttribute::uri("job-uri", job.uri.clone()));
    push(IppAttribute::enumeration("job-state", inner.state.as_ipp()));
    let reasons = platen_core::JobReasons(inner.state_reasons.0 | inner.dev_state_reasons.0);
    push(IppAttribute::keywords(
        "job-state-reasons",
        reasons.keywords(),
    ));
    push(IppAttribute::integer(
        "job-printer-up-time",
        printer.up_time(),
    ));

    // The stored envelope (description + template attributes).
    for attr in inner.attrs.iter() {
        if group.get(&attr.name).is_none() && attribute_requested(requested, &attr.name) {
            group.attributes.push(attr.clone());
        }
    }

    group
}

#[cfg(test)]
mod tests {
    use super::*;
    use platen_core::ServerConfig;

    fn test_printer() -> Arc<Printer> {
        let config = ServerConfig {
            printer_name: "p1".into(),
            spool_directory: std::env::temp_dir(),
            ..Default::default()
        };
        Printer::create(&config, "host.test")
    }

    fn request(op: Operation) -> IppMessage {
        let mut request = IppMessage::request(op, 9);
        request.groups[0].push(IppAttribute::uri(
            "printer-uri",
            "ipp://host.test:631/ipp/print",
        ));
        request
    }

    #[tokio::test]
    async fn response_echoes_request_id() {
        let printer = test_printer();
        let (response, _) =
            dispatch(printer, request(Operation::GetPrinterAttributes), &[]).await;
        assert_eq!(response.request_id, 9);
        assert_eq!(response.code, StatusCode::SuccessfulOk.as_u16());
    }

    #[tokio::test]
    async fn unknown_operation_is_rejected() {
        let printer = test_printer();
        let mut bad = request(Operation::GetPrinterAttributes);
        bad.code = 0x3FFF;
        let (response, _) = dispatch(printer, bad, &[]).await;
        assert_eq!(
            response.code,
            StatusCode::ServerErrorOperationNotSupported.as_u16()
        );
    }

    #[tokio::test]
    async fn missing_charset_is_bad_request() {
        let printer = test_printer();
        let mut bad = IppMessage::request(Operation::GetPrinterAttributes, 1);
        bad.groups[0].attributes.clear();
        bad.groups[0].push(IppAttribute::uri(
            "printer-uri",
            "ipp://host.test:631/ipp/print",
        ));
        let (response, _) = dispatch(printer, bad, &[]).await;
        assert_eq!(response.code, StatusCode::ClientErrorBadRequest.as_u16());
    }

    #[tokio::test]
    async fn missing_target_uri_is_bad_request() {
        let printer = test_printer();
        let bare = IppMessage::request(Operation::GetPrinterAttributes, 1);
        let (response, _) = dispatch(printer, bare, &[]).await;
        assert_eq!(response.code, StatusCode::ClientErrorBadRequest.as_u16());
    }

    #[tokio::test]
    async fn bad_version_is_rejected() {
        let printer = test_printer();
        let mut bad = request(Operation::GetPrinterAttributes);
        bad.version_major = 9;
        let (response, _) = dispatch(printer, bad, &[]).await;
        assert_eq!(
            response.code,
            StatusCode::ServerErrorVersionNotSupported.as_u16()
        );
    }

    #[test]
    fn requested_attribute_group_tokens() {
        let requested = Some(vec!["job-template".to_string()]);
        assert!(attribute_requested(&requested, "copies-default"));
        assert!(attribute_requested(&requested, "media"));
        assert!(!attribute_requested(&requested, "printer-name"));

        let requested = Some(vec!["printer-description".to_string()]);
        assert!(attribute_requested(&requested, "printer-name"));
        assert!(!attribute_requested(&requested, "media-col-supported"));

        let explicit = Some(vec!["printer-state".to_string()]);
        assert!(attribute_requested(&explicit, "printer-state"));
        assert!(!attribute_requested(&explicit, "printer-name"));

        assert!(attribute_requested(&None, "anything"));
        assert!(attribute_requested(&Some(vec!["all".into()]), "anything"));
    }

    #[test]
    fn job_state_enum_values_follow_rfc() {
        assert_eq!(platen_core::JobState::Pending.as_ipp(), 3);
        assert_eq!(platen_core::JobState::Completed.as_ipp(), 9);
    }
}
