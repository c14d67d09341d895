use serde::{Deserialize, Serialize};

/// Messages the panel document may post back to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum PanelMessage {
    /// A row was selected; fetch and open the full log.
    #[serde(rename = "callFunction")]
    CallFunction { id: String },
}

impl PanelMessage {
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_call_function() {
        let msg = PanelMessage::decode(r#"{"command":"callFunction","id":"07L1"}"#).unwrap();
        assert_eq!(
            msg,
            PanelMessage::CallFunction {
                id: "07L1".to_string()
            }
        );
    }

    #[test]
    fn rejects_unknown_command_tag() {
        assert!(PanelMessage::decode(r#"{"command":"deleteAll"}"#).is_err());
        assert!(PanelMessage::decode(r#"{"id":"07L1"}"#).is_err());
        assert!(PanelMessage::decode(r#"{"command":"callFunction"}"#).is_err());
    }
}
