// SPDX-License-Identifier: Apache-2.0
//
// Server configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PlatenError, Result};

/// Persistent server settings.
///
/// Loaded from a JSON file at startup; every field has a default so a
/// missing file yields a usable configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Addresses to listen on; each resolves to one or more bind sockets.
    pub listen: Vec<String>,
    /// TCP port for all listeners (IANA-assigned IPP port is 631).
    pub port: u16,
    /// Human-readable printer name.
    pub printer_name: String,
    /// Resource path the printer is served under.
    pub resource: String,
    /// Directory for job spool files.
    pub spool_directory: PathBuf,
    /// Optional PNG icon served at `/icon.png`.
    pub icon: Option<PathBuf>,
    /// External transform command; `None` runs jobs in proxy/fetch mode
    /// only.
    pub command: Option<PathBuf>,
    /// Output device URI handed to the transform command
    /// (`socket://host:port`).
    pub device_uri: Option<String>,
    /// Keep spool files after job completion.
    pub keep_files: bool,
    /// Destination format produced by the transform command.
    pub output_format: String,
    /// Document formats advertised in `document-format-supported`.
    pub document_formats: Vec<String>,
    /// PEM certificate chain for TLS upgrades.
    pub tls_certificate: Option<PathBuf>,
    /// PEM private key for TLS upgrades.
    pub tls_key: Option<PathBuf>,
    /// DNS-SD subtype advertised on `_ipp._tcp` (e.g. `_print`).
    pub dnssd_subtype: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: vec!["0.0.0.0".into()],
            port: 631,
            printer_name: "Platen".into(),
            resource: "/ipp/print".into(),
            spool_directory: PathBuf::from("spool"),
            icon: None,
            command: None,
            device_uri: None,
            keep_files: false,
            output_format: "image/pwg-raster".into(),
            document_formats: vec![
                "application/pdf".into(),
                "image/jpeg".into(),
                "application/octet-stream".into(),
            ],
            tls_certificate: None,
            tls_key: None,
            dnssd_subtype: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .map_err(|e| PlatenError::Config(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&data)
            .map_err(|e| PlatenError::Config(format!("parse {}: {e}", path.display())))
    }

    /// Validate bootstrap-fatal settings: the spool directory must exist
    /// (or be creatable) and TLS files must come in pairs.
    pub fn validate(&self) -> Result<()> {
        if self.tls_certificate.is_some() != self.tls_key.is_some() {
            return Err(PlatenError::Config(
                "tls_certificate and tls_key must both be set or both be absent".into(),
            ));
        }
        if !self.spool_directory.exists() {
            std::fs::create_dir_all(&self.spool_directory).map_err(|e| {
                PlatenError::Spool(format!(
                    "create {}: {e}",
                    self.spool_directory.display()
                ))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 631);
        assert_eq!(config.resource, "/ipp/print");
        assert!(!config.keep_files);
    }

    #[test]
    fn load_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{"port": 8631, "printer_name": "Test"}}"#).expect("write");

        let config = ServerConfig::load(file.path()).expect("load");
        assert_eq!(config.port, 8631);
        assert_eq!(config.printer_name, "Test");
        assert_eq!(config.resource, "/ipp/print");
    }

    #[test]
    fn mismatched_tls_pair_is_rejected() {
        let config = ServerConfig {
            tls_certificate: Some(PathBuf::from("cert.pem")),
            tls_key: None,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_creates_spool_directory() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = ServerConfig {
            spool_directory: dir.path().join("spool"),
            ..Default::default()
        };
        config.validate().expect("validate");
        assert!(config.spool_directory.is_dir());
    }
}
