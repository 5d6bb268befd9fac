// SPDX-License-Identifier: Apache-2.0
//
// Subscription operations (RFC 3995 ippget model).

use std::sync::Arc;

use platen_ipp::{GroupTag, IppAttribute, IppMessage, StatusCode};
use tracing::debug;

use super::{error, ok};
use crate::printer::Printer;
use crate::subscription::{EventMask, Subscription, DEFAULT_LEASE_SECONDS};

/// Create-Printer-Subscriptions / Create-Job-Subscriptions.
///
/// Each subscription-attributes group in the request creates one
/// subscription; the response mirrors them with assigned ids.
pub async fn create_subscriptions(
    printer: &Arc<Printer>,
    request: &IppMessage,
    job_subscriptions: bool,
) -> IppMessage {
    let username = request
        .operation_attributes()
        .and_then(|g| g.get_str("requesting-user-name"))
        .unwrap_or("anonymous")
        .to_string();

    let groups: Vec<_> = request
        .groups_of(GroupTag::SubscriptionAttributes)
        .cloned()
        .collect();
    if groups.is_empty() {
        return error(
            StatusCode::ClientErrorBadRequest,
            request,
            "No subscription attributes.",
        );
    }

    let mut created: Vec<(i32, i64)> = Vec::new();

    for group in &groups {
        if let Some(method) = group.get_str("notify-pull-method") {
            if method != "ippget" {
                return error(
                    StatusCode::ClientErrorAttributesOrValuesNotSupported,
                    request,
                    format!("Unsupported notify-pull-method \"{method}\"."),
                );
            }
        }

        let events = group
            .get("notify-events")
            .map(|a| EventMask::parse(a.strings()))
            .unwrap_or_else(|| EventMask::parse(["job-completed"]));

        let job_id = if job_subscriptions {
            let id = group
                .get_int("notify-job-id")
                .or_else(|| {
                    request
                        .operation_attributes()
                        .and_then(|g| g.get_int("notify-job-id"))
                });
            let Some(id) = id else {
                return error(
                    StatusCode::ClientErrorBadRequest,
                    request,
                    "Missing notify-job-id.",
                );
            };
            if crate::job::find_job_by_id(printer, id).await.is_none() {
                return error(StatusCode::ClientErrorNotFound, request, "Job not found.");
            }
            Some(id)
        } else {
            None
        };

        let lease = group
            .get_int("notify-lease-duration")
            .map(i64::from)
            .unwrap_or(DEFAULT_LEASE_SECONDS);

        let mut inner = printer.inner.write().await;
        let id = inner.next_subscription_id;
        inner.next_subscription_id += 1;
        inner
            .subscriptions
            .push(Subscription::new(id, job_id, username.clone(), events, lease));
        created.push((id, lease));
        debug!(subscription_id = id, job_id = ?job_id, "subscription created");
    }

    let mut response = ok(request);
    for (id, lease) in created {
        let group = response.add_group(GroupTag::SubscriptionAttributes);
        group.push(IppAttribute::integer("notify-subscription-id", id));
        if !job_subscriptions {
            group.push(IppAttribute::integer(
                "notify-lease-duration",
                lease.min(i64::from(i32::MAX)) as i32,
            ));
        }
    }
    response
}

/// Build the response group describing one subscription.
fn subscription_group(printer: &Printer, subscription: &Subscription) -> platen_ipp::AttributeGroup {
    let mut group = platen_ipp::AttributeGroup::new(GroupTag::SubscriptionAttributes);
    group.push(IppAttribute::integer(
        "notify-subscription-id",
        subscription.id,
    ));
    group.push(IppAttribute::uri("notify-printer-uri", printer.uri.clone()));
    group.push(IppAttribute::keywords(
        "notify-events",
        subscription.events.keywords(),
    ));
    group.push(IppAttribute::keyword("notify-pull-method", "ippget"));
    group.push(IppAttribute::name_value(
        "notify-subscriber-user-name",
        subscription.username.clone(),
    ));
    match subscription.job_id {
        Some(job_id) => {
            group.push(IppAttribute::integer("notify-job-id", job_id));
        }
        None => {
            group.push(IppAttribute::integer(
                "notify-lease-duration",
                subscription.lease_seconds.min(i64::from(i32::MAX)) as i32,
            ));
        }
    }
    group
}

/// Get-Subscription-Attributes.
pub async fn get_subscription_attributes(
    printer: &Arc<Printer>,
    request: &IppMessage,
) -> IppMessage {
    let Some(id) = request
        .operation_attributes()
        .and_then(|g| g.get_int("notify-subscription-id"))
    else {
        return error(
            StatusCode::ClientErrorBadRequest,
            request,
            "Missing notify-subscription-id.",
        );
    };

    let inner = printer.inner.read().await;
    match inner.subscriptions.iter().find(|s| s.id == id) {
        Some(subscription) => {
            let mut response = ok(request);
            response.groups.push(subscription_group(printer, subscription));
            response
        }
        None => error(
            StatusCode::ClientErrorNotFound,
            request,
            "Subscription not found.",
        ),
    }
}

/// Get-Subscriptions.
pub async fn get_subscriptions(printer: &Arc<Printer>, request: &IppMessage) -> IppMessage {
    let operation = request.operation_attributes();
    let job_filter = operation.and_then(|g| g.get_int("notify-job-id"));
    let limit = operation
        .and_then(|g| g.get_int("limit"))
        .filter(|l| *l > 0)
        .map(|l| l as usize);

    let inner = printer.inner.read().await;
    let mut response = ok(request);
    let mut count = 0usize;
    for subscription in inner.subscriptions.iter() {
        if let Some(job_id) = job_filter {
            if subscription.job_id != Some(job_id) {
                continue;
            }
        }
        if let Some(limit) = limit {
            if count == limit {
                break;
            }
        }
        response.groups.push(subscription_group(printer, subscription));
        count += 1;
    }
    response
}

/// Renew-Subscription: printer subscriptions only.
pub async fn renew_subscription(printer: &Arc<Printer>, request: &IppMessage) -> IppMessage {
    let Some(id) = request
        .operation_attributes()
        .and_then(|g| g.get_int("notify-subscription-id"))
    else {
        return error(
            StatusCode::ClientErrorBadRequest,
            request,
            "Missing notify-subscription-id.",
        );
    };
    let lease = request
        .groups
        .iter()
        .find_map(|g| g.get_int("notify-lease-duration"))
        .map(i64::from)
        .unwrap_or(DEFAULT_LEASE_SECONDS);

    let mut inner = printer.inner.write().await;
    match inner.subscriptions.iter_mut().find(|s| s.id == id) {
        Some(subscription) if subscription.job_id.is_some() => error(
            StatusCode::ClientErrorNotPossible,
            request,
            "Job subscriptions cannot be renewed.",
        ),
        Some(subscription) => {
            subscription.renew(lease);
            let mut response = ok(request);
            response
                .add_group(GroupTag::SubscriptionAttributes)
                .push(IppAttribute::integer(
                    "notify-lease-duration",
                    lease.min(i64::from(i32::MAX)) as i32,
                ));
            response
        }
        None => error(
            StatusCode::ClientErrorNotFound,
            request,
            "Subscription not found.",
        ),
    }
}

/// Cancel-Subscription.
pub async fn cancel_subscription(printer: &Arc<Printer>, request: &IppMessage) -> IppMessage {
    let Some(id) = request
        .operation_attributes()
        .and_then(|g| g.get_int("notify-subscription-id"))
    else {
        return error(
            StatusCode::ClientErrorBadRequest,
            request,
            "Missing notify-subscription-id.",
        );
    };

    let mut inner = printer.inner.write().await;
    let before = inner.subscriptions.len();
    inner.subscriptions.retain(|s| s.id != id);
    if inner.subscriptions.len() == before {
        return error(
            StatusCode::ClientErrorNotFound,
            request,
            "Subscription not found.",
        );
    }
    ok(request)
}

/// Get-Notifications: drain queued events for the named subscriptions.
pub async fn get_notifications(printer: &Arc<Printer>, request: &IppMessage) -> IppMessage {
    let operation = request.operation_attributes();
    let ids: Vec<i32> = operation
        .and_then(|g| g.get("notify-subscription-ids"))
        .map(|a| a.values.iter().filter_map(|v| v.as_int()).collect())
        .unwrap_or_default();
    if ids.is_empty() {
        return error(
            StatusCode::ClientErrorBadRequest,
            request,
            "Missing notify-subscription-ids.",
        );
    }
    let sequences: Vec<i32> = operation
        .and_then(|g| g.get("notify-sequence-numbers"))
        .map(|a| a.values.iter().filter_map(|v| v.as_int()).collect())
        .unwrap_or_default();

    let inner = printer.inner.read().await;
    let mut response = ok(request);

    for (index, id) in ids.iter().enumerate() {
        let Some(subscription) = inner.subscriptions.iter().find(|s| s.id == *id) else {
            continue;
        };
        let since = sequences.get(index).copied().unwrap_or(1);

        for event in subscription.events_since(since) {
            let group = response.add_group(GroupTag::EventNotificationAttributes);
            group.push(IppAttribute::charset("notify-charset", "utf-8"));
            group.push(IppAttribute::natural_language("notify-natural-language", "en"));
            group.push(IppAttribute::integer("notify-subscription-id", *id));
            group.push(IppAttribute::integer("notify-sequence-number", event.sequence));
            group.push(IppAttribute::keyword(
                "notify-subscribed-event",
                EventMask::keyword_for(event.bit),
            ));
            group.push(IppAttribute::text("notify-text", event.text.clone()));
            group.push(IppAttribute::integer(
                "printer-up-time",
                printer.relative_time(event.time),
            ));
            group.push(IppAttribute::enumeration(
                "printer-state",
                event.printer_state.as_ipp(),
            ));
            group.push(IppAttribute::keywords(
                "printer-state-reasons",
                event.printer_reasons.keywords(),
            ));
            if let Some(job_id) = event.job_id {
                group.push(IppAttribute::integer("notify-job-id", job_id));
            }
            if let Some(job_state) = event.job_state {
                group.push(IppAttribute::enumeration("job-state", job_state.as_ipp()));
            }
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use platen_core::ServerConfig;
    use platen_ipp::Operation;

    fn test_printer() -> Arc<Printer> {
        let config = ServerConfig {
            printer_name: "p1".into(),
            spool_directory: std::env::temp_dir(),
            ..Default::default()
        };
        Printer::create(&config, "host.test")
    }

    fn base(op: Operation) -> IppMessage {
        let mut request = IppMessage::request(op, 1);
        request.groups[0].push(IppAttribute::uri(
            "printer-uri",
            "ipp://host.test:631/ipp/print",
        ));
        request.groups[0].push(IppAttribute::name_value("requesting-user-name", "alice"));
        request
    }

    fn with_subscription_group(mut request: IppMessage, events: &[&str]) -> IppMessage {
        let group = request.add_group(GroupTag::SubscriptionAttributes);
        group.push(IppAttribute::keyword("notify-pull-method", "ippget"));
        group.push(IppAttribute::keywords(
            "notify-events",
            events.iter().copied(),
        ));
        request
    }

    #[tokio::test]
    async fn create_and_get_subscription() {
        let printer = test_printer();
        let request = with_subscription_group(
            base(Operation::CreatePrinterSubscriptions),
            &["job-completed"],
        );
        let response = create_subscriptions(&printer, &request, false).await;
        assert_eq!(response.code, StatusCode::SuccessfulOk.as_u16());

        let id = response
            .group(GroupTag::SubscriptionAttributes)
            .and_then(|g| g.get_int("notify-subscription-id"))
            .expect("subscription id");
        assert_eq!(id, 1);

        let mut get = base(Operation::GetSubscriptionAttributes);
        get.groups[0].push(IppAttribute::integer("notify-subscription-id", id));
        let response = get_subscription_attributes(&printer, &get).await;
        let group = response
            .group(GroupTag::SubscriptionAttributes)
            .expect("group");
        assert_eq!(
            group.get("notify-events").map(|a| a.strings()),
            Some(vec!["job-completed"])
        );
    }

    #[tokio::test]
    async fn renew_and_cancel() {
        let printer = test_printer();
        let request = with_subscription_group(
            base(Operation::CreatePrinterSubscriptions),
            &["all"],
        );
        create_subscriptions(&printer, &request, false).await;

        let mut renew = base(Operation::RenewSubscription);
        renew.groups[0].push(IppAttribute::integer("notify-subscription-id", 1));
        renew.groups[0].push(IppAttribute::integer("notify-lease-duration", 7200));
        let response = renew_subscription(&printer, &renew).await;
        assert_eq!(response.code, StatusCode::SuccessfulOk.as_u16());

        let mut cancel = base(Operation::CancelSubscription);
        cancel.groups[0].push(IppAttribute::integer("notify-subscription-id", 1));
        assert_eq!(
            cancel_subscription(&printer, &cancel).await.code,
            StatusCode::SuccessfulOk.as_u16()
        );
        assert_eq!(
            cancel_subscription(&printer, &cancel).await.code,
            StatusCode::ClientErrorNotFound.as_u16()
        );
    }

    #[tokio::test]
    async fn notifications_deliver_job_events() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ServerConfig {
            printer_name: "p1".into(),
            spool_directory: dir.path().to_path_buf(),
            ..Default::default()
        };
        let printer = Printer::create(&config, "host.test");

        let request =
            with_subscription_group(base(Operation::CreatePrinterSubscriptions), &["all"]);
        create_subscriptions(&printer, &request, false).await;

        // Creating a job delivers a job-created event.
        let mut print = base(Operation::PrintJob);
        print.groups[0].push(IppAttribute::name_value("job-name", "n"));
        crate::job::create_job(&printer, &print, "application/pdf".into()).await;

        let mut get = base(Operation::GetNotifications);
        get.groups[0].push(IppAttribute::integers("notify-subscription-ids", &[1]));
        let response = get_notifications(&printer, &get).await;

        let groups: Vec<_> = response
            .groups_of(GroupTag::EventNotificationAttributes)
            .collect();
        assert_eq!(groups.len(), 1);
        assert_eq!(
            groups[0].get_str("notify-subscribed-event"),
            Some("job-created")
        );
        assert_eq!(groups[0].get_int("notify-job-id"), Some(1));
    }

    #[tokio::test]
    async fn job_subscription_requires_existing_job() {
        let printer = test_printer();
        let mut request =
            with_subscription_group(base(Operation::CreateJobSubscriptions), &["all"]);
        request.groups[0].push(IppAttribute::integer("notify-job-id", 42));

        let response = create_subscriptions(&printer, &request, true).await;
        assert_eq!(response.code, StatusCode::ClientErrorNotFound.as_u16());
    }

    #[tokio::test]
    async fn unknown_pull_method_rejected() {
        let printer = test_printer();
        let mut request = base(Operation::CreatePrinterSubscriptions);
        let group = request.add_group(GroupTag::SubscriptionAttributes);
        group.push(IppAttribute::keyword("notify-pull-method", "smtp"));

        let response = create_subscriptions(&printer, &request, false).await;
        assert_eq!(
            response.code,
            StatusCode::ClientErrorAttributesOrValuesNotSupported.as_u16()
        );
    }
}
