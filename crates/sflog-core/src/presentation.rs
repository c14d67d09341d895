//! Turns log summaries into the markup shown in the panel.
//!
//! The panel document is a static template with a single placeholder; each
//! summary becomes one table row, in the order it was received.

use crate::model::LogSummary;
use thiserror::Error;

pub const ROWS_PLACEHOLDER: &str = "<!--LOG_ROWS-->";

const DEFAULT_TEMPLATE: &str = include_str!("../templates/panel.html");

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("panel template is missing the <!--LOG_ROWS--> placeholder")]
    MissingPlaceholder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelTemplate {
    source: String,
}

impl Default for PanelTemplate {
    fn default() -> Self {
        Self {
            source: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl PanelTemplate {
    pub fn parse(source: impl Into<String>) -> Result<Self, TemplateError> {
        let source = source.into();
        if !source.contains(ROWS_PLACEHOLDER) {
            return Err(TemplateError::MissingPlaceholder);
        }
        Ok(Self { source })
    }

    pub fn render(&self, summaries: &[LogSummary]) -> String {
        let rows: String = summaries.iter().map(render_row).collect();
        self.source.replacen(ROWS_PLACEHOLDER, &rows, 1)
    }
}

pub fn render_row(summary: &LogSummary) -> String {
    let cells = [
        summary.id.as_str(),
        summary.application.as_str(),
        summary.operation.as_str(),
        summary.start_time.as_str(),
        summary.status.as_str(),
        summary.user_name().unwrap_or(""),
        summary.length.as_str(),
    ];
    let mut row = format!("<tr data-log-id=\"{}\">", escape_html(&summary.id));
    for cell in cells {
        row.push_str("<td>");
        row.push_str(&escape_html(cell));
        row.push_str("</td>");
    }
    row.push_str("</tr>\n");
    row
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
