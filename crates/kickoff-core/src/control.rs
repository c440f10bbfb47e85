//! Inbound control frames sent by listeners.

use serde::Deserialize;

use crate::criteria::FilterCriteria;
use crate::errors::ControlError;

/// The only action with a defined effect.
pub const UPDATE_FILTERS_ACTION: &str = "updateFilters";

/// Wire shape of a control frame:
/// `{"action": "updateFilters", "leagues": [...], "status": [...]}`.
///
/// Every field is optional; a missing or `null` list is empty.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ControlMessage {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub leagues: Option<Vec<String>>,
    #[serde(default, alias = "statuses")]
    pub status: Option<Vec<String>>,
}

/// What a decoded control frame asks the server to do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlCommand {
    /// Replace the connection's criteria wholesale.
    UpdateFilters(FilterCriteria),
    /// Unknown or unsupported action; carries the action name for logging.
    Ignored(String),
}

impl ControlMessage {
    pub fn decode(frame: &[u8]) -> Result<Self, ControlError> {
        Ok(serde_json::from_slice(frame)?)
    }

    pub fn into_command(self) -> ControlCommand {
        if self.action == UPDATE_FILTERS_ACTION {
            ControlCommand::UpdateFilters(FilterCriteria::new(
                self.leagues.unwrap_or_default(),
                self.status.unwrap_or_default(),
            ))
        } else {
            ControlCommand::Ignored(self.action)
        }
    }
}

impl ControlCommand {
    /// Decode a raw frame straight into a command.
    pub fn parse(frame: &[u8]) -> Result<Self, ControlError> {
        ControlMessage::decode(frame).map(ControlMessage::into_command)
    }
}
