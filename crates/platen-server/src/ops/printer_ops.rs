// SPDX-License-Identifier: Apache-2.0
//
// Printer operations.

use std::sync::Arc;

use chrono::Utc;
use platen_ipp::{GroupTag, IppAttribute, IppMessage};
use tracing::info;

use super::{attribute_requested, ok, requested_attributes};
use crate::printer::Printer;

/// Get-Printer-Attributes: the full capability table plus computed state
/// attributes, filtered by `requested-attributes`.
pub async fn get_printer_attributes(printer: &Arc<Printer>, request: &IppMessage) -> IppMessage {
    let requested = requested_attributes(request);
    let mut response = ok(request);
    let mut group = platen_ipp::AttributeGroup::new(GroupTag::PrinterAttributes);

    let inner = printer.inner.read().await;
    let now = Utc::now();

    let mut push = |attr: IppAttribute| {
        if attribute_requested(&requested, &attr.name) {
            group.attributes.push(attr);
        }
    };

    // Computed attributes first.
    push(IppAttribute::enumeration("printer-state", inner.state.as_ipp()));
    push(IppAttribute::keywords(
        "printer-state-reasons",
        inner.state_reasons.keywords(),
    ));
    push(IppAttribute::text(
        "printer-state-message",
        format!("{}.", inner.state.label()),
    ));
    push(IppAttribute::boolean("printer-is-accepting-jobs", true));
    push(IppAttribute::integer("printer-up-time", printer.up_time()));
    push(IppAttribute::date_time("printer-current-time", now.into()));
    push(IppAttribute::integer(
        "printer-state-change-time",
        printer.relative_time(inner.state_time),
    ));
    push(IppAttribute::date_time(
        "printer-state-change-date-time",
        inner.state_time.into(),
    ));
    push(IppAttribute::integer(
        "printer-config-change-time",
        printer.relative_time(inner.config_time),
    ));
    push(IppAttribute::date_time(
        "printer-config-change-date-time",
        inner.config_time.into(),
    ));
    push(IppAttribute::integer(
        "queued-job-count",
        inner.active_jobs.len() as i32,
    ));
    push(IppAttribute::name_value(
        "printer-dns-sd-name",
        inner.dnssd_name.clone(),
    ));

    // The static capability table.
    for attr in inner.attrs.iter() {
        if group.get(&attr.name).is_none() && attribute_requested(&requested, &attr.name) {
            group.attributes.push(attr.clone());
        }
    }

    response.groups.push(group);
    response
}

/// Get-Printer-Supported-Values: only the `-supported` capability
/// attributes.
pub async fn get_printer_supported_values(
    printer: &Arc<Printer>,
    request: &IppMessage,
) -> IppMessage {
    let requested = requested_attributes(request);
    let mut response = ok(request);
    let group = response.add_group(GroupTag::PrinterAttributes);

    let inner = printer.inner.read().await;
    for attr in inner.attrs.iter() {
        if attr.name.ends_with("-supported") && attribute_requested(&requested, &attr.name) {
            group.attributes.push(attr.clone());
        }
    }

    response
}

/// Identify-Printer: log the identification request.
pub async fn identify_printer(printer: &Arc<Printer>, request: &IppMessage) -> IppMessage {
    let actions: Vec<String> = request
        .operation_attributes()
        .and_then(|g| g.get("identify-actions"))
        .map(|a| a.strings().iter().map(|s| s.to_string()).collect())
        .unwrap_or_else(|| vec!["sound".to_string()]);
    let message = request
        .operation_attributes()
        .and_then(|g| g.get_str("message"))
        .unwrap_or("");

    info!(printer = %printer.name, actions = ?actions, message, "IDENTIFY");
    ok(request)
}
