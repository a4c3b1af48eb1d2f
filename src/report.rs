//! Report rendering.
//!
//! Every classified certificate becomes one [`ReportRow`]. Rows are printed
//! either as an aligned table or as JSON lines, one object per certificate.

use chrono::{DateTime, Utc};
use comfy_table::presets::NOTHING;
use comfy_table::{Cell, Color, Table};
use serde::Serialize;
use std::io::{self, Write};
use strum_macros::{Display, EnumString};

use crate::classifier::CertificateRecord;
use crate::scan::ScanResult;

/// Column headers of the table output.
pub const HEADER: [&str; 7] = [
    "NAME",
    "SUBJECT",
    "ISSUER",
    "ALGO",
    "EXPIRES",
    "SUNSET DATE",
    "ERROR",
];

/// Format used for sunset dates, e.g. `Jan 01, 2017`.
const SUNSET_DATE_FORMAT: &str = "%b %d, %Y";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OutputFormat {
    Table,
    Json,
}

/// One output row per certificate record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub host: String,
    pub subject: String,
    pub issuer: String,
    pub algorithm: String,
    pub expires_in: String,
    /// Empty when the algorithm has no sunset policy
    pub sunset_date: String,
    /// Empty when the certificate passed verification
    pub error: String,
    pub expires_soon: bool,
    pub expires_in_hours: i64,
    pub not_after: DateTime<Utc>,
    pub sunset_algorithm: Option<String>,
}

impl From<&CertificateRecord> for ReportRow {
    fn from(record: &CertificateRecord) -> Self {
        ReportRow {
            host: record.host_label.clone(),
            subject: record.subject_common_name.clone(),
            issuer: record.issuer_common_name.clone(),
            algorithm: record.signature_algorithm_label.clone(),
            expires_in: record.expires_in_text.clone(),
            sunset_date: record
                .sunset_policy
                .as_ref()
                .map(|policy| policy.sunset_date.format(SUNSET_DATE_FORMAT).to_string())
                .unwrap_or_default(),
            error: record.error_text.clone().unwrap_or_default(),
            expires_soon: record.expires_soon,
            expires_in_hours: record.expires_in_hours,
            not_after: record.not_after,
            sunset_algorithm: record.sunset_policy.as_ref().map(|p| p.name.clone()),
        }
    }
}

/// Rows for every record in the scan, host by host.
pub fn rows(scan: &ScanResult) -> Vec<ReportRow> {
    scan.records().map(ReportRow::from).collect()
}

/// Builds the table; `color` highlights expiring and failed certificates.
pub fn render_table(rows: &[ReportRow], color: bool) -> Table {
    let mut table = Table::new();
    table.load_preset(NOTHING).set_header(HEADER.to_vec());
    if color {
        table.enforce_styling();
    } else {
        table.force_no_tty();
    }

    for row in rows {
        let mut expires = Cell::new(&row.expires_in);
        if row.expires_soon {
            expires = expires.fg(Color::Red);
        }
        let mut error = Cell::new(&row.error);
        if !row.error.is_empty() {
            error = error.fg(Color::Red);
        }
        table.add_row(vec![
            Cell::new(&row.host),
            Cell::new(&row.subject),
            Cell::new(&row.issuer),
            Cell::new(&row.algorithm),
            expires,
            Cell::new(&row.sunset_date),
            error,
        ]);
    }
    table
}

/// Writes one JSON object per row, newline separated.
pub fn write_json_lines<W: Write>(out: &mut W, rows: &[ReportRow]) -> io::Result<()> {
    for row in rows {
        serde_json::to_writer(&mut *out, row)?;
        writeln!(out)?;
    }
    Ok(())
}

/// Renders the scan in the requested format.
pub fn write_report<W: Write>(
    out: &mut W,
    scan: &ScanResult,
    format: OutputFormat,
    color: bool,
) -> io::Result<()> {
    let rows = rows(scan);
    match format {
        OutputFormat::Table => writeln!(out, "{}", render_table(&rows, color)),
        OutputFormat::Json => write_json_lines(out, &rows),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::SunsetPolicy;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn record(error: Option<&str>, sunset: bool) -> CertificateRecord {
        CertificateRecord {
            host_label: "expired.example.com:8443".to_string(),
            subject_common_name: "expired.example.com".to_string(),
            issuer_common_name: "Example CA".to_string(),
            signature_algorithm_label: "SHA1-RSA".to_string(),
            not_after: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            expires_in_hours: -5,
            expires_in_text: "-5 hours".to_string(),
            expires_soon: true,
            sunset_policy: sunset.then(|| SunsetPolicy {
                name: "SHA1 with RSA".to_string(),
                sunset_date: Utc.with_ymd_and_hms(2017, 1, 1, 0, 0, 0).unwrap(),
            }),
            error_text: error.map(String::from),
        }
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::from_str("table").unwrap(), OutputFormat::Table);
        assert_eq!(OutputFormat::from_str("JSON").unwrap(), OutputFormat::Json);
        assert!(OutputFormat::from_str("yaml").is_err());
        assert_eq!(OutputFormat::Json.to_string(), "json");
    }

    #[test]
    fn test_row_from_record() {
        let row = ReportRow::from(&record(Some("certificate verify failed: expired"), true));
        assert_eq!(row.host, "expired.example.com:8443");
        assert_eq!(row.sunset_date, "Jan 01, 2017");
        assert_eq!(row.sunset_algorithm, Some("SHA1 with RSA".to_string()));
        assert_eq!(row.error, "certificate verify failed: expired");

        let plain = ReportRow::from(&record(None, false));
        assert_eq!(plain.sunset_date, "");
        assert_eq!(plain.error, "");
        assert_eq!(plain.sunset_algorithm, None);
    }

    #[test]
    fn test_table_has_fixed_header() {
        let rows = vec![ReportRow::from(&record(None, true))];
        let rendered = render_table(&rows, false).to_string();
        let header_line = rendered
            .lines()
            .find(|line| line.contains("NAME"))
            .unwrap();
        let header: Vec<_> = header_line.split_whitespace().collect();
        assert_eq!(
            header,
            vec!["NAME", "SUBJECT", "ISSUER", "ALGO", "EXPIRES", "SUNSET", "DATE", "ERROR"]
        );
        assert!(rendered.contains("expired.example.com:8443"));
        assert!(rendered.contains("-5 hours"));
        assert!(rendered.contains("Jan 01, 2017"));
        assert!(!rendered.contains('\u{1b}'));
    }

    #[test]
    fn test_table_highlights_when_colored() {
        let rows = vec![ReportRow::from(&record(Some("bad"), false))];
        let rendered = render_table(&rows, true).to_string();
        assert!(rendered.contains('\u{1b}'));
    }

    #[test]
    fn test_json_lines() {
        let rows = vec![
            ReportRow::from(&record(None, true)),
            ReportRow::from(&record(Some("bad"), false)),
        ];
        let mut out = Vec::new();
        write_json_lines(&mut out, &rows).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["host"], "expired.example.com:8443");
        assert_eq!(first["algorithm"], "SHA1-RSA");
        assert_eq!(first["expires_soon"], true);
        assert_eq!(first["expires_in_hours"], -5);
        assert_eq!(first["sunset_date"], "Jan 01, 2017");
        assert_eq!(first["error"], "");

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["error"], "bad");
        assert!(second["sunset_algorithm"].is_null());
    }
}
