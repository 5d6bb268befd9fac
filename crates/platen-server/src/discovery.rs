// SPDX-License-Identifier: Apache-2.0
//
// DNS-SD advertisement via mDNS.
//
// One service daemon registers three service types per printer:
// `_printer._tcp` on port 0 (name reservation only), `_ipp._tcp` on the
// real port with the full TXT record, and `_http._tcp` (subtype
// `_printer`) for the web status page.

use std::sync::Arc;

use mdns_sd::{ServiceDaemon, ServiceInfo};
use platen_core::{PlatenError, Result};
use tracing::{info, warn};

use crate::printer::Printer;

/// Registered advertisement handles for one printer.
pub struct Advertisement {
    daemon: ServiceDaemon,
    fullnames: Vec<String>,
}

/// Register all three service types for a printer.
///
/// Advertisement failures are not fatal to the server: the printer still
/// works by direct address.
pub async fn register(printer: &Arc<Printer>) -> Result<Advertisement> {
    let daemon = ServiceDaemon::new()
        .map_err(|e| PlatenError::Discovery(format!("create daemon: {e}")))?;

    let instance = printer.inner.read().await.dnssd_name.clone();
    let host = format!("{}.local.", printer.hostname.trim_end_matches(".local"));
    let mut fullnames = Vec::new();

    let formats = printer.config.document_formats.join(",");
    let color = "T";
    let duplex = "T";
    let tls = if printer.config.tls_certificate.is_some() {
        "1.2"
    } else {
        ""
    };
    let adminurl = format!("http://{}:{}/", printer.hostname, printer.port);

    // The IPP TXT record.
    let txt: Vec<(&str, &str)> = vec![
        ("rp", printer.resource.trim_start_matches('/')),
        ("ty", &printer.name),
        ("adminurl", &adminurl),
        ("note", ""),
        ("product", "(Platen)"),
        ("pdl", &formats),
        ("Color", color),
        ("Duplex", duplex),
        ("usb_MFG", "Platen"),
        ("usb_MDL", &printer.name),
        ("UUID", printer.uuid.trim_start_matches("urn:uuid:")),
        ("URF", "CP1,IS1-5-7,MT1-2-3-4-5-6-8-9-10-11-12-13,RS300,SRGB24,V1.4,W8,DM1"),
        ("TLS", tls),
        ("txtvers", "1"),
        ("qtotal", "1"),
    ];

    // _printer._tcp on port 0 reserves the instance name against LPD-era
    // browsers.
    let mut registrations = vec![
        ("_printer._tcp.local.".to_string(), 0u16, Vec::new()),
        ("_ipp._tcp.local.".to_string(), printer.port, txt.clone()),
        ("_http._tcp.local.".to_string(), printer.port, Vec::new()),
    ];
    if let Some(subtype) = &printer.config.dnssd_subtype {
        registrations.push((
            format!("{subtype}._sub._ipp._tcp.local."),
            printer.port,
            txt.clone(),
        ));
    }

    for (service_type, port, properties) in registrations {
        match ServiceInfo::new(
            &service_type,
            &instance,
            &host,
            "",
            port,
            &properties[..],
        ) {
            Ok(info) => {
                let fullname = info.get_fullname().to_owned();
                match daemon.register(info) {
                    Ok(()) => {
                        info!(service_type = %service_type, instance = %instance, port, "DNS-SD service registered");
                        fullnames.push(fullname);
                    }
                    Err(e) => warn!(service_type = %service_type, error = %e, "DNS-SD registration failed"),
                }
            }
            Err(e) => warn!(service_type = %service_type, error = %e, "DNS-SD service info failed"),
        }
    }

    Ok(Advertisement { daemon, fullnames })
}

impl Advertisement {
    /// Withdraw all registrations and stop the daemon.
    pub fn shutdown(self) {
        for fullname in &self.fullnames {
            if let Err(e) = self.daemon.unregister(fullname) {
                warn!(name = %fullname, error = %e, "DNS-SD unregister failed");
            }
        }
        if let Err(e) = self.daemon.shutdown() {
            warn!(error = %e, "DNS-SD daemon shutdown failed");
        }
    }
}
