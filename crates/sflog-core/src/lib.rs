//! Shared data model and presentation for the Salesforce log panel.
//!
//! - `model`: log summaries, listing extraction, log ids and file paths
//! - `message`: messages posted from the panel document
//! - `presentation`: panel template and row markup

pub mod message;
pub mod model;
pub mod presentation;

pub use message::PanelMessage;
pub use model::{
    extract_log_body, extract_records, log_file_path, InvalidLogId, ListingShapeError, LogId,
    LogSummary, LogUser,
};
pub use presentation::{PanelTemplate, TemplateError};

/// Listing query used when no override is configured; newest logs first.
pub const DEFAULT_LISTING_COMMAND: &str =
    "sfdx force:data:soql:query -q \"SELECT Id, Application, Operation, StartTime, Status, LogUser.Name, LogLength FROM ApexLog ORDER BY SystemModstamp desc LIMIT 20\" --json";

/// Detail retrieval command; `{id}` is replaced with the selected log id.
pub const DEFAULT_DETAIL_COMMAND: &str = "sfdx force:apex:log:get -i {id} --json";

pub const ID_PLACEHOLDER: &str = "{id}";
