// SPDX-License-Identifier: Apache-2.0
//
// Core domain types for the Platen IPP server: printer and job state
// machines, state-reason bitmasks, and document format handling.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Printer state (RFC 8011 §5.4.11)
// ---------------------------------------------------------------------------

/// Primary printer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrinterState {
    /// Ready to accept jobs, nothing processing.
    Idle,
    /// A job is currently being processed.
    Processing,
    /// Printing is stopped (error condition or paused).
    Stopped,
}

impl PrinterState {
    /// The IPP `printer-state` enum value.
    pub fn as_ipp(self) -> i32 {
        match self {
            Self::Idle => 3,
            Self::Processing => 4,
            Self::Stopped => 5,
        }
    }

    /// Human-readable label used on the web status page.
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Processing => "Printing",
            Self::Stopped => "Stopped",
        }
    }
}

// ---------------------------------------------------------------------------
// Job state (RFC 8011 §5.3.7)
// ---------------------------------------------------------------------------

/// Lifecycle states of a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Queued, waiting to be processed.
    Pending,
    /// Held (Create-Job issued, documents not yet closed, or held by user).
    PendingHeld,
    /// Currently being processed.
    Processing,
    /// Processing stopped (also used for fetchable jobs in proxy mode).
    ProcessingStopped,
    /// Canceled by the user or operator.
    Canceled,
    /// Aborted by the system.
    Aborted,
    /// Completed successfully.
    Completed,
}

impl JobState {
    /// The IPP `job-state` enum value.
    pub fn as_ipp(self) -> i32 {
        match self {
            Self::Pending => 3,
            Self::PendingHeld => 4,
            Self::Processing => 5,
            Self::ProcessingStopped => 6,
            Self::Canceled => 7,
            Self::Aborted => 8,
            Self::Completed => 9,
        }
    }

    /// True once the job has reached a terminal state.
    ///
    /// Terminal jobs live in the completed-jobs view and are eligible for
    /// the janitor sweep one minute after completion.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Canceled | Self::Aborted | Self::Completed)
    }

    /// True while the job belongs in the active-jobs view.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

// ---------------------------------------------------------------------------
// printer-state-reasons bitmask
// ---------------------------------------------------------------------------

/// Bitmask of `printer-state-reasons` keywords.
///
/// Bit order matches [`PrinterReasons::KEYWORDS`]; translation between the
/// mask and keyword strings happens through that table in both directions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterReasons(pub u32);

impl PrinterReasons {
    pub const NONE: PrinterReasons = PrinterReasons(0);
    pub const OTHER: u32 = 1 << 0;
    pub const COVER_OPEN: u32 = 1 << 1;
    pub const INPUT_TRAY_MISSING: u32 = 1 << 2;
    pub const MARKER_SUPPLY_EMPTY: u32 = 1 << 3;
    pub const MARKER_SUPPLY_LOW: u32 = 1 << 4;
    pub const MARKER_WASTE_ALMOST_FULL: u32 = 1 << 5;
    pub const MARKER_WASTE_FULL: u32 = 1 << 6;
    pub const MEDIA_EMPTY: u32 = 1 << 7;
    pub const MEDIA_JAM: u32 = 1 << 8;
    pub const MEDIA_LOW: u32 = 1 << 9;
    pub const MEDIA_NEEDED: u32 = 1 << 10;
    pub const MOVING_TO_PAUSED: u32 = 1 << 11;
    pub const PAUSED: u32 = 1 << 12;
    pub const SPOOL_AREA_FULL: u32 = 1 << 13;
    pub const TONER_EMPTY: u32 = 1 << 14;
    pub const TONER_LOW: u32 = 1 << 15;

    /// Keyword strings, one per bit, lowest bit first.
    pub const KEYWORDS: [&'static str; 16] = [
        "other",
        "cover-open",
        "input-tray-missing",
        "marker-supply-empty",
        "marker-supply-low",
        "marker-waste-almost-full",
        "marker-waste-full",
        "media-empty",
        "media-jam",
        "media-low",
        "media-needed",
        "moving-to-paused",
        "paused",
        "spool-area-full",
        "toner-empty",
        "toner-low",
    ];

    /// Human-readable labels, parallel to [`Self::KEYWORDS`], used on the
    /// web status page.
    pub const LABELS: [&'static str; 16] = [
        "Other",
        "Cover Open",
        "Input Tray Missing",
        "Marker Supply Empty",
        "Marker Supply Low",
        "Marker Waste Almost Full",
        "Marker Waste Full",
        "Media Empty",
        "Media Jam",
        "Media Low",
        "Media Needed",
        "Moving to Paused",
        "Paused",
        "Spool Area Full",
        "Toner Empty",
        "Toner Low",
    ];

    /// Bit for a single keyword, if known.
    ///
    /// An RFC 2911 severity suffix (`-error`, `-warning`, `-report`) is
    /// stripped before lookup.
    pub fn bit_for(keyword: &str) -> Option<u32> {
        let keyword = strip_severity_suffix(keyword);
        Self::KEYWORDS
            .iter()
            .position(|k| *k == keyword)
            .map(|i| 1u32 << i)
    }

    pub fn contains(self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    pub fn set(&mut self, bit: u32) {
        self.0 |= bit;
    }

    pub fn clear(&mut self, bit: u32) {
        self.0 &= !bit;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The keyword strings for every set bit, lowest bit first.
    ///
    /// Returns `["none"]` when the mask is empty, matching the IPP
    /// convention for `printer-state-reasons`.
    pub fn keywords(self) -> Vec<&'static str> {
        if self.0 == 0 {
            return vec!["none"];
        }
        Self::KEYWORDS
            .iter()
            .enumerate()
            .filter(|(i, _)| self.0 & (1 << i) != 0)
            .map(|(_, k)| *k)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// job-state-reasons bitmask
// ---------------------------------------------------------------------------

/// Bitmask of `job-state-reasons` keywords; same scheme as
/// [`PrinterReasons`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReasons(pub u32);

impl JobReasons {
    pub const NONE: JobReasons = JobReasons(0);
    pub const ABORTED_BY_SYSTEM: u32 = 1 << 0;
    pub const COMPRESSION_ERROR: u32 = 1 << 1;
    pub const DOCUMENT_ACCESS_ERROR: u32 = 1 << 2;
    pub const DOCUMENT_FORMAT_ERROR: u32 = 1 << 3;
    pub const DOCUMENT_PASSWORD_ERROR: u32 = 1 << 4;
    pub const DOCUMENT_PERMISSION_ERROR: u32 = 1 << 5;
    pub const DOCUMENT_SECURITY_ERROR: u32 = 1 << 6;
    pub const DOCUMENT_UNPRINTABLE_ERROR: u32 = 1 << 7;
    pub const ERRORS_DETECTED: u32 = 1 << 8;
    pub const JOB_CANCELED_AT_DEVICE: u32 = 1 << 9;
    pub const JOB_CANCELED_BY_USER: u32 = 1 << 10;
    pub const JOB_COMPLETED_SUCCESSFULLY: u32 = 1 << 11;
    pub const JOB_COMPLETED_WITH_ERRORS: u32 = 1 << 12;
    pub const JOB_COMPLETED_WITH_WARNINGS: u32 = 1 << 13;
    pub const JOB_DATA_INSUFFICIENT: u32 = 1 << 14;
    pub const JOB_DELAY_OUTPUT_UNTIL_SPECIFIED: u32 = 1 << 15;
    pub const JOB_FETCHABLE: u32 = 1 << 16;
    pub const JOB_INCOMING: u32 = 1 << 17;
    pub const JOB_PASSWORD_WAIT: u32 = 1 << 18;
    pub const JOB_PRINTING: u32 = 1 << 19;
    pub const JOB_QUEUED: u32 = 1 << 20;
    pub const JOB_SPOOLING: u32 = 1 << 21;
    pub const JOB_STOPPED: u32 = 1 << 22;
    pub const JOB_TRANSFORMING: u32 = 1 << 23;
    pub const PRINTER_STOPPED: u32 = 1 << 24;
    pub const PRINTER_STOPPED_PARTLY: u32 = 1 << 25;
    pub const PROCESSING_TO_STOP_POINT: u32 = 1 << 26;
    pub const QUEUED_IN_DEVICE: u32 = 1 << 27;
    pub const WARNINGS_DETECTED: u32 = 1 << 28;

    /// Keyword strings, one per bit, lowest bit first.
    pub const KEYWORDS: [&'static str; 29] = [
        "aborted-by-system",
        "compression-error",
        "document-access-error",
        "document-format-error",
        "document-password-error",
        "document-permission-error",
        "document-security-error",
        "document-unprintable-error",
        "errors-detected",
        "job-canceled-at-device",
        "job-canceled-by-user",
        "job-completed-successfully",
        "job-completed-with-errors",
        "job-completed-with-warnings",
        "job-data-insufficient",
        "job-delay-output-until-specified",
        "job-fetchable",
        "job-incoming",
        "job-password-wait",
        "job-printing",
        "job-queued",
        "job-spooling",
        "job-stopped",
        "job-transforming",
        "printer-stopped",
        "printer-stopped-partly",
        "processing-to-stop-point",
        "queued-in-device",
        "warnings-detected",
    ];

    /// Bit for a single keyword, if known (severity suffix stripped).
    pub fn bit_for(keyword: &str) -> Option<u32> {
        let keyword = strip_severity_suffix(keyword);
        Self::KEYWORDS
            .iter()
            .position(|k| *k == keyword)
            .map(|i| 1u32 << i)
    }

    pub fn contains(self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    pub fn set(&mut self, bit: u32) {
        self.0 |= bit;
    }

    pub fn clear(&mut self, bit: u32) {
        self.0 &= !bit;
    }

    /// The keyword strings for every set bit, or `["none"]`.
    pub fn keywords(self) -> Vec<&'static str> {
        if self.0 == 0 {
            return vec!["none"];
        }
        Self::KEYWORDS
            .iter()
            .enumerate()
            .filter(|(i, _)| self.0 & (1 << i) != 0)
            .map(|(_, k)| *k)
            .collect()
    }
}

/// Strip an RFC 2911 severity suffix from a state-reason keyword.
fn strip_severity_suffix(keyword: &str) -> &str {
    keyword
        .strip_suffix("-error")
        .or_else(|| keyword.strip_suffix("-warning"))
        .or_else(|| keyword.strip_suffix("-report"))
        .unwrap_or(keyword)
}

// ---------------------------------------------------------------------------
// Document formats
// ---------------------------------------------------------------------------

/// MIME media types the server understands, plus a catch-all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentFormat {
    Pdf,
    Jpeg,
    Png,
    PwgRaster,
    Urf,
    PostScript,
    Pcl,
    Octet,
}

impl DocumentFormat {
    /// MIME type string.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::PwgRaster => "image/pwg-raster",
            Self::Urf => "image/urf",
            Self::PostScript => "application/postscript",
            Self::Pcl => "application/vnd.hp-pcl",
            Self::Octet => "application/octet-stream",
        }
    }

    /// Parse a MIME type string; unknown types map to [`Self::Octet`].
    pub fn from_mime(mime: &str) -> Self {
        match mime {
            "application/pdf" => Self::Pdf,
            "image/jpeg" => Self::Jpeg,
            "image/png" => Self::Png,
            "image/pwg-raster" => Self::PwgRaster,
            "image/urf" => Self::Urf,
            "application/postscript" => Self::PostScript,
            "application/vnd.hp-pcl" => Self::Pcl,
            _ => Self::Octet,
        }
    }

    /// Spool-file extension for a MIME type (not necessarily a known one).
    pub fn extension_for(mime: &str) -> &'static str {
        match mime {
            "application/pdf" => "pdf",
            "image/jpeg" => "jpg",
            "image/png" => "png",
            "image/pwg-raster" => "ras",
            "image/urf" => "urf",
            "application/postscript" => "ps",
            _ => "prn",
        }
    }
}

// ---------------------------------------------------------------------------
// Spool-file naming
// ---------------------------------------------------------------------------

/// Sanitize a job name for use in a spool filename.
///
/// Alphanumerics and `-` are lowercased and kept; everything else becomes
/// `_`.
pub fn sanitize_job_name(name: &str) -> String {
    let name = if name.is_empty() { "untitled" } else { name };
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Deterministic UUIDs
// ---------------------------------------------------------------------------

/// Assemble a deterministic `urn:uuid:` URI from a printer/job identity.
///
/// Hashes (hostname, port, name, id) with SHA-256 and stamps the result as
/// a version-5 style UUID, so the same identity always yields the same
/// UUID across restarts. Pass `id = 0` for the printer's own UUID.
pub fn assemble_uuid(hostname: &str, port: u16, name: &str, id: i32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(hostname.as_bytes());
    hasher.update(port.to_be_bytes());
    hasher.update(name.as_bytes());
    hasher.update(id.to_be_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    // Stamp version 5 and RFC 4122 variant bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x50;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    format!("urn:uuid:{}", uuid::Uuid::from_bytes(bytes))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_state_ipp_values() {
        assert_eq!(JobState::Pending.as_ipp(), 3);
        assert_eq!(JobState::Canceled.as_ipp(), 7);
        assert_eq!(JobState::Completed.as_ipp(), 9);
    }

    #[test]
    fn terminal_states_partition() {
        for state in [
            JobState::Pending,
            JobState::PendingHeld,
            JobState::Processing,
            JobState::ProcessingStopped,
        ] {
            assert!(state.is_active());
            assert!(!state.is_terminal());
        }
        for state in [JobState::Canceled, JobState::Aborted, JobState::Completed] {
            assert!(state.is_terminal());
            assert!(!state.is_active());
        }
    }

    #[test]
    fn printer_reason_keyword_roundtrip() {
        for (i, keyword) in PrinterReasons::KEYWORDS.iter().enumerate() {
            assert_eq!(PrinterReasons::bit_for(keyword), Some(1 << i));
        }
        assert_eq!(PrinterReasons::bit_for("no-such-reason"), None);
    }

    #[test]
    fn severity_suffix_is_stripped() {
        assert_eq!(
            PrinterReasons::bit_for("media-empty-warning"),
            Some(PrinterReasons::MEDIA_EMPTY)
        );
        assert_eq!(
            PrinterReasons::bit_for("cover-open-error"),
            Some(PrinterReasons::COVER_OPEN)
        );
        assert_eq!(
            PrinterReasons::bit_for("toner-low-report"),
            Some(PrinterReasons::TONER_LOW)
        );
    }

    #[test]
    fn empty_mask_reports_none() {
        assert_eq!(PrinterReasons::NONE.keywords(), vec!["none"]);
        assert_eq!(JobReasons::NONE.keywords(), vec!["none"]);
    }

    #[test]
    fn set_then_clear_restores_mask() {
        let initial = PrinterReasons(PrinterReasons::TONER_LOW);
        let mut mask = initial;
        mask.set(PrinterReasons::MEDIA_EMPTY);
        mask.clear(PrinterReasons::MEDIA_EMPTY);
        assert_eq!(mask, initial);
    }

    #[test]
    fn job_reason_keywords_in_bit_order() {
        let mut mask = JobReasons::NONE;
        mask.set(JobReasons::JOB_FETCHABLE);
        mask.set(JobReasons::ABORTED_BY_SYSTEM);
        assert_eq!(mask.keywords(), vec!["aborted-by-system", "job-fetchable"]);
    }

    #[test]
    fn spool_name_sanitization() {
        assert_eq!(sanitize_job_name("My Report (final).pdf"), "my_report__final__pdf");
        assert_eq!(sanitize_job_name("plain-name"), "plain-name");
        assert_eq!(sanitize_job_name(""), "untitled");
    }

    #[test]
    fn extension_follows_mime_type() {
        assert_eq!(DocumentFormat::extension_for("application/pdf"), "pdf");
        assert_eq!(DocumentFormat::extension_for("image/jpeg"), "jpg");
        assert_eq!(DocumentFormat::extension_for("image/pwg-raster"), "ras");
        assert_eq!(DocumentFormat::extension_for("text/weird"), "prn");
    }

    #[test]
    fn assembled_uuid_is_deterministic() {
        let a = assemble_uuid("host.local", 8631, "p1", 1);
        let b = assemble_uuid("host.local", 8631, "p1", 1);
        let c = assemble_uuid("host.local", 8631, "p1", 2);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("urn:uuid:"));
    }
}
