// SPDX-License-Identifier: Apache-2.0
//
// The printer object and the process-wide printer registry.
//
// A printer owns its attribute table, job collections, subscriptions, and
// optional proxy device behind one reader/writer lock. Lock order is
// always printer before job; the lock is never held across network I/O or
// a child-process wait.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use platen_core::types::assemble_uuid;
use platen_core::{PlatenError, PrinterReasons, PrinterState, Result, ServerConfig};
use platen_ipp::{Attributes, IppAttribute, IppValue};
use tokio::sync::RwLock;
use tracing::info;

use crate::job::Job;
use crate::subscription::Subscription;

/// Attributes last reported by a registered remote output device.
#[derive(Debug, Clone)]
pub struct OutputDevice {
    pub uuid: String,
    pub attrs: Attributes,
    pub registered: DateTime<Utc>,
}

/// Mutable printer state, guarded by [`Printer::inner`].
pub struct PrinterInner {
    pub state: PrinterState,
    pub state_reasons: PrinterReasons,
    pub state_time: DateTime<Utc>,
    pub config_time: DateTime<Utc>,
    /// The full capability table served by Get-Printer-Attributes.
    pub attrs: Attributes,
    /// All jobs, newest first.
    pub jobs: Vec<Arc<Job>>,
    /// Non-terminal jobs ordered by (priority desc, id asc).
    pub active_jobs: Vec<Arc<Job>>,
    /// Terminal jobs ordered by (completed asc, id asc).
    pub completed_jobs: Vec<Arc<Job>>,
    pub next_job_id: i32,
    pub processing_job: Option<Arc<Job>>,
    pub subscriptions: Vec<Subscription>,
    pub next_subscription_id: i32,
    /// Registered remote output device, when operating in proxy mode.
    pub device: Option<OutputDevice>,
    /// Advertised DNS-SD instance name; the discovery layer may rename it
    /// on collision.
    pub dnssd_name: String,
}

/// A printer: immutable identity plus locked mutable state.
pub struct Printer {
    pub name: String,
    pub resource: String,
    pub hostname: String,
    pub port: u16,
    pub uri: String,
    pub uuid: String,
    pub start_time: DateTime<Utc>,
    pub config: ServerConfig,
    pub inner: RwLock<PrinterInner>,
}

impl Printer {
    /// Create a printer from the server configuration.
    pub fn create(config: &ServerConfig, hostname: &str) -> Arc<Printer> {
        let now = Utc::now();
        let uri = format!("ipp://{hostname}:{}{}", config.port, config.resource);
        let uuid = assemble_uuid(hostname, config.port, &config.printer_name, 0);

        let printer = Arc::new(Printer {
            name: config.printer_name.clone(),
            resource: config.resource.clone(),
            hostname: hostname.to_string(),
            port: config.port,
            uri: uri.clone(),
            uuid: uuid.clone(),
            start_time: now,
            config: config.clone(),
            inner: RwLock::new(PrinterInner {
                state: PrinterState::Idle,
                state_reasons: PrinterReasons::NONE,
                state_time: now,
                config_time: now,
                attrs: Attributes::new(),
                jobs: Vec::new(),
                active_jobs: Vec::new(),
                completed_jobs: Vec::new(),
                next_job_id: 1,
                processing_job: None,
                subscriptions: Vec::new(),
                next_subscription_id: 1,
                device: None,
                dnssd_name: config.printer_name.clone(),
            }),
        });

        let attrs = build_attributes(&printer);
        {
            // No other handle exists yet; the lock cannot be contended.
            let mut inner = printer
                .inner
                .try_write()
                .expect("freshly created printer lock");
            inner.attrs = attrs;
        }

        info!(name = %printer.name, uri = %printer.uri, "printer created");
        printer
    }

    /// Seconds since the printer came up (IPP `printer-up-time` clock).
    pub fn up_time(&self) -> i32 {
        (Utc::now() - self.start_time).num_seconds().max(1) as i32
    }

    /// An instant on the `printer-up-time` clock.
    pub fn relative_time(&self, when: DateTime<Utc>) -> i32 {
        (when - self.start_time).num_seconds().max(1) as i32
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Process-wide printer set, keyed by resource path, insertion-ordered.
#[derive(Default)]
pub struct PrinterRegistry {
    printers: Vec<Arc<Printer>>,
}

impl PrinterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a printer; resource paths must be unique.
    pub fn add(&mut self, printer: Arc<Printer>) -> Result<()> {
        if self.find(&printer.resource).is_some() {
            return Err(PlatenError::Config(format!(
                "duplicate printer resource {}",
                printer.resource
            )));
        }
        self.printers.push(printer);
        Ok(())
    }

    /// Look up a printer by the request URI path.
    ///
    /// Job URIs (`{resource}/{id}`) resolve to the owning printer.
    pub fn find(&self, path: &str) -> Option<Arc<Printer>> {
        self.printers
            .iter()
            .find(|p| {
                path == p.resource
                    || (path.starts_with(&p.resource)
                        && path[p.resource.len()..].starts_with('/'))
            })
            .cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Printer>> {
        self.printers.iter()
    }
}

// ---------------------------------------------------------------------------
// Capability table
// ---------------------------------------------------------------------------

/// Media advertised in `media-supported`.
const MEDIA_SUPPORTED: [&str; 6] = [
    "na_letter_8.5x11in",
    "na_legal_8.5x14in",
    "iso_a4_210x297mm",
    "iso_a5_148x210mm",
    "na_executive_7.25x10.5in",
    "iso_dl_110x220mm",
];

/// Build the static printer attribute table.
///
/// Dynamic attributes (state, timestamps, queued-job-count) are computed
/// per request by the Get-Printer-Attributes handler.
fn build_attributes(printer: &Printer) -> Attributes {
    let config = &printer.config;
    let mut attrs = Attributes::new();

    let admin_uri = format!("http://{}:{}/", printer.hostname, printer.port);
    let icon_uri = format!("http://{}:{}/icon.png", printer.hostname, printer.port);

    attrs.set(IppAttribute::charset("charset-configured", "utf-8"));
    attrs.set(IppAttribute::new(
        "charset-supported",
        platen_ipp::ValueTag::Charset,
        vec![
            IppValue::Text("us-ascii".into()),
            IppValue::Text("utf-8".into()),
        ],
    ));
    attrs.set(IppAttribute::keyword("compression-supported", "none"));
    attrs.set(IppAttribute::integer("copies-default", 1));
    attrs.set(IppAttribute::range("copies-supported", 1, 9999));
    attrs.set(IppAttribute::mime_type(
        "document-format-default",
        "application/octet-stream",
    ));
    attrs.set(IppAttribute::mime_types(
        "document-format-supported",
        config.document_formats.iter().cloned(),
    ));
    attrs.set(IppAttribute::natural_language(
        "generated-natural-language-supported",
        "en",
    ));
    attrs.set(IppAttribute::keywords(
        "identify-actions-default",
        ["sound"],
    ));
    attrs.set(IppAttribute::keywords(
        "identify-actions-supported",
        ["display", "sound"],
    ));
    attrs.set(IppAttribute::keywords(
        "ipp-features-supported",
        ["document-object", "ipp-everywhere", "infrastructure-printer"],
    ));
    attrs.set(IppAttribute::keywords(
        "ipp-versions-supported",
        ["1.0", "1.1", "2.0"],
    ));
    attrs.set(IppAttribute::boolean("job-ids-supported", true));
    attrs.set(IppAttribute::range("job-k-octets-supported", 0, 65536));
    attrs.set(IppAttribute::integer("job-priority-default", 50));
    attrs.set(IppAttribute::integer("job-priority-supported", 100));
    attrs.set(IppAttribute::keywords(
        "job-creation-attributes-supported",
        [
            "copies",
            "ipp-attribute-fidelity",
            "job-name",
            "job-priority",
            "media",
            "media-col",
            "multiple-document-handling",
            "orientation-requested",
            "print-color-mode",
            "print-quality",
            "printer-resolution",
            "sides",
        ],
    ));
    attrs.set(IppAttribute::keyword("media-default", "na_letter_8.5x11in"));
    attrs.set(IppAttribute::keywords("media-supported", MEDIA_SUPPORTED));
    attrs.set(IppAttribute::keywords(
        "media-col-supported",
        [
            "media-bottom-margin",
            "media-left-margin",
            "media-right-margin",
            "media-size",
            "media-size-name",
            "media-top-margin",
            "media-type",
        ],
    ));
    attrs.set(IppAttribute::keywords(
        "multiple-document-handling-supported",
        [
            "separate-documents-uncollated-copies",
            "separate-documents-collated-copies",
        ],
    ));
    attrs.set(IppAttribute::boolean(
        "multiple-document-jobs-supported",
        false,
    ));
    attrs.set(IppAttribute::natural_language(
        "natural-language-configured",
        "en",
    ));
    attrs.set(IppAttribute::keywords(
        "notify-attributes-supported",
        [
            "printer-state-change-time",
            "notify-lease-expiration-time",
            "notify-subscriber-user-name",
        ],
    ));
    attrs.set(IppAttribute::integer("notify-lease-duration-default", 86400));
    attrs.set(IppAttribute::range(
        "notify-lease-duration-supported",
        0,
        604800,
    ));
    attrs.set(IppAttribute::integer("notify-max-events-supported", 100));
    attrs.set(IppAttribute::keywords(
        "notify-events-default",
        ["job-completed"],
    ));
    attrs.set(IppAttribute::keywords(
        "notify-events-supported",
        crate::subscription::EventMask::KEYWORDS,
    ));
    attrs.set(IppAttribute::keyword("notify-pull-method", "ippget"));
    attrs.set(IppAttribute::keywords("notify-pull-method-supported", ["ippget"]));
    attrs.set(IppAttribute::enumerations(
        "operations-supported",
        &platen_ipp::Operation::SUPPORTED
            .iter()
            .map(|op| op.as_u16() as i32)
            .collect::<Vec<_>>(),
    ));
    attrs.set(IppAttribute::enumeration("orientation-requested-default", 3));
    attrs.set(IppAttribute::enumerations(
        "orientation-requested-supported",
        &[3, 4, 5, 6],
    ));
    attrs.set(IppAttribute::keywords(
        "overrides-supported",
        ["document-number", "pages"],
    ));
    attrs.set(IppAttribute::keyword("pdl-override-supported", "attempted"));
    attrs.set(IppAttribute::keyword("print-color-mode-default", "auto"));
    attrs.set(IppAttribute::keywords(
        "print-color-mode-supported",
        ["auto", "color", "monochrome"],
    ));
    attrs.set(IppAttribute::enumeration("print-quality-default", 4));
    attrs.set(IppAttribute::enumerations(
        "print-quality-supported",
        &[3, 4, 5],
    ));
    attrs.set(IppAttribute::text(
        "printer-device-id",
        format!("MFG:Platen;MDL:{};CMD:PDF,JPEG;", printer.name),
    ));
    attrs.set(IppAttribute::uri("printer-icons", icon_uri));
    attrs.set(IppAttribute::text("printer-info", printer.name.clone()));
    attrs.set(IppAttribute::text("printer-location", ""));
    attrs.set(IppAttribute::text(
        "printer-make-and-model",
        "Platen Virtual Printer",
    ));
    attrs.set(IppAttribute::uri("printer-more-info", admin_uri.clone()));
    attrs.set(IppAttribute::name_value("printer-name", printer.name.clone()));
    attrs.set(IppAttribute::resolution("printer-resolution-default", 300, 300));
    attrs.set(IppAttribute::resolutions(
        "printer-resolution-supported",
        &[(150, 150), (300, 300), (600, 600)],
    ));
    attrs.set(IppAttribute::uri("printer-supply-info-uri", admin_uri));
    attrs.set(IppAttribute::uris("printer-uri-supported", [printer.uri.clone()]));
    attrs.set(IppAttribute::uri("printer-uuid", printer.uuid.clone()));
    attrs.set(IppAttribute::resolutions(
        "pwg-raster-document-resolution-supported",
        &[(150, 150), (300, 300)],
    ));
    attrs.set(IppAttribute::keyword(
        "pwg-raster-document-sheet-back",
        "normal",
    ));
    attrs.set(IppAttribute::keywords(
        "pwg-raster-document-type-supported",
        ["sgray_8", "srgb_8"],
    ));
    // Only file URIs are dereferenced by Print-URI / Send-URI.
    attrs.set(IppAttribute::keywords(
        "reference-uri-schemes-supported",
        ["file"],
    ));
    attrs.set(IppAttribute::keyword("sides-default", "one-sided"));
    attrs.set(IppAttribute::keywords(
        "sides-supported",
        [
            "one-sided",
            "two-sided-long-edge",
            "two-sided-short-edge",
        ],
    ));
    attrs.set(IppAttribute::keywords(
        "urf-supported",
        ["CP1", "IS1-5-7", "MT1-2-3-4-5-6-8-9-10-11-12-13", "RS300", "SRGB24", "V1.4", "W8", "DM1"],
    ));
    attrs.set(IppAttribute::keyword("uri-authentication-supported", "none"));
    attrs.set(IppAttribute::keyword(
        "uri-security-supported",
        if config.tls_certificate.is_some() {
            "tls"
        } else {
            "none"
        },
    ));
    attrs.set(IppAttribute::keywords(
        "which-jobs-supported",
        [
            "completed",
            "not-completed",
            "aborted",
            "all",
            "canceled",
            "pending",
            "pending-held",
            "processing",
            "processing-stopped",
        ],
    ));

    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_printer() -> Arc<Printer> {
        let config = ServerConfig {
            printer_name: "Test Printer".into(),
            port: 8631,
            ..Default::default()
        };
        Printer::create(&config, "host.test")
    }

    #[test]
    fn printer_uri_shape() {
        let printer = test_printer();
        assert_eq!(printer.uri, "ipp://host.test:8631/ipp/print");
        assert!(printer.uuid.starts_with("urn:uuid:"));
    }

    #[tokio::test]
    async fn capability_table_essentials() {
        let printer = test_printer();
        let inner = printer.inner.read().await;

        assert_eq!(
            inner.attrs.get_str("printer-name"),
            Some("Test Printer")
        );
        let ops = inner.attrs.get("operations-supported").expect("ops");
        assert_eq!(ops.values.len(), platen_ipp::Operation::SUPPORTED.len());
        assert!(inner
            .attrs
            .get("which-jobs-supported")
            .expect("which-jobs")
            .strings()
            .contains(&"processing-stopped"));
        assert_eq!(inner.next_job_id, 1);
    }

    #[test]
    fn registry_resolves_job_paths() {
        let mut registry = PrinterRegistry::new();
        let printer = test_printer();
        registry.add(printer.clone()).expect("add");

        assert!(registry.find("/ipp/print").is_some());
        assert!(registry.find("/ipp/print/17").is_some());
        assert!(registry.find("/ipp/printer").is_none());
        assert!(registry.find("/other").is_none());

        // Duplicate resource is rejected.
        let duplicate = test_printer();
        assert!(registry.add(duplicate).is_err());
    }
}
