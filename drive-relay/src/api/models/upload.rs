use serde::{Deserialize, Serialize};

use crate::upload::RelayOutcome;

/// Body of a successful upload. `file_name` is the name the browser sent, not the
/// timestamp-prefixed name the file is stored under.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub file_name: String,
    pub file_id: String,
}

impl From<RelayOutcome> for UploadResponse {
    fn from(outcome: RelayOutcome) -> Self {
        Self {
            success: true,
            file_name: outcome.file_name,
            file_id: outcome.file_id,
        }
    }
}
