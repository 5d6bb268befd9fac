// SPDX-License-Identifier: Apache-2.0
//
// The embedded web status page.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use platen_core::{JobState, PrinterReasons};

use crate::printer::Printer;

/// Render the status page served at `GET /`.
pub async fn status_page(printer: &Arc<Printer>) -> String {
    let inner = printer.inner.read().await;

    let mut body = html_header(&printer.name);
    body.push_str(&format!(
        "<p><img align=\"right\" src=\"/icon.png\" width=\"64\" height=\"64\"><b>{}</b></p>\n",
        escape(&printer.name)
    ));
    body.push_str(&format!(
        "<p>{}, {} job(s).",
        inner.state.label(),
        inner.jobs.len()
    ));
    for (index, label) in PrinterReasons::LABELS.iter().enumerate() {
        if inner.state_reasons.contains(1 << index) {
            body.push_str(&format!("\n<br>&nbsp;&nbsp;&nbsp;&nbsp;{label}"));
        }
    }
    body.push_str("</p>\n");

    if !inner.jobs.is_empty() {
        body.push_str(
            "<table class=\"striped\" summary=\"Jobs\"><thead><tr>\
             <th>Job #</th><th>Name</th><th>Owner</th><th>When</th>\
             </tr></thead><tbody>\n",
        );
        for job in inner.jobs.iter() {
            let job_inner = job.inner.read().await;
            let when = match job_inner.state {
                JobState::Pending | JobState::PendingHeld => {
                    format!("Queued at {}", clock(job.created))
                }
                JobState::Processing | JobState::ProcessingStopped => {
                    format!("Started at {}", clock_opt(job_inner.processing))
                }
                JobState::Aborted => format!("Aborted at {}", clock_opt(job_inner.completed)),
                JobState::Canceled => format!("Canceled at {}", clock_opt(job_inner.completed)),
                JobState::Completed => format!("Completed at {}", clock_opt(job_inner.completed)),
            };
            body.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                job.id,
                escape(&job.name),
                escape(&job.username),
                when
            ));
        }
        body.push_str("</tbody></table>\n");
    }

    body.push_str(html_footer());
    body
}

fn html_header(title: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<title>{}</title>\n\
         <link rel=\"shortcut icon\" href=\"/icon.png\" type=\"image/png\">\n\
         <style>body {{ font-family: sans-serif; margin: 2em; }}\n\
         table.striped {{ border-collapse: collapse; }}\n\
         table.striped td, table.striped th {{ padding: 0.25em 1em; text-align: left; }}\n\
         table.striped tbody tr:nth-child(odd) {{ background: #f0f0f0; }}</style>\n\
         </head>\n<body>\n",
        escape(title)
    )
}

fn html_footer() -> &'static str {
    "</body>\n</html>\n"
}

fn clock(when: DateTime<Utc>) -> String {
    when.format("%H:%M:%S").to_string()
}

fn clock_opt(when: Option<DateTime<Utc>>) -> String {
    when.map(clock).unwrap_or_else(|| "-".into())
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
