use serde::{Deserialize, Serialize};

/// Signaling command carried by a [`SignalMessage`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// SDP offer addressed to another peer
    Offer,
    /// SDP answer addressed to another peer
    Answer,
    /// Trickled ICE candidate addressed to another peer
    IceCandidate,
    /// Peer announces itself; relayed to everyone else
    Connect,
    /// Peer leaves; relayed to everyone else
    Disconnect,
    /// Anything the relay does not understand. Ignored.
    #[default]
    #[serde(other)]
    Unknown,
}

/// Envelope exchanged over the signaling endpoint.
///
/// The relay forwards offers, answers and candidates verbatim, so every field
/// is optional on the wire and only the ones relevant to `command` are read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMessage {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub command: Command,
}

impl SignalMessage {
    /// Notification that `from` joined, addressed to `to`
    pub fn connect(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            data: String::new(),
            command: Command::Connect,
        }
    }

    /// Notification that `from` left, addressed to `to`
    pub fn disconnect(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            data: String::new(),
            command: Command::Disconnect,
        }
    }
}

/// Requests sent from a client to the SFU endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SfuRequest {
    /// Offer to send media into the stream `name`
    Publish {
        #[serde(default)]
        sdp: String,
        #[serde(default)]
        name: String,
    },

    /// Offer to receive the media currently published under `name`
    Subscribe {
        #[serde(default)]
        sdp: String,
        #[serde(default)]
        name: String,
    },
}

impl SfuRequest {
    /// Stream name the request refers to
    pub fn name(&self) -> &str {
        match self {
            SfuRequest::Publish { name, .. } | SfuRequest::Subscribe { name, .. } => name,
        }
    }
}

/// Replies sent from the SFU endpoint to a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SfuResponse {
    /// Answer for a publish request
    Publish { sdp: String, name: String },

    /// Answer for a subscribe request
    Subscribe { sdp: String, name: String },

    /// The request failed; nothing was negotiated
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_ice_candidate_command() {
        let msg: SignalMessage = serde_json::from_value(json!({
            "from": "a",
            "to": "b",
            "data": "candidate:1 1 udp 1 10.0.0.1 5000 typ host",
            "command": "icecandidate"
        }))
        .unwrap();

        assert_eq!(msg.command, Command::IceCandidate);
        assert_eq!(msg.to, "b");
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let msg: SignalMessage = serde_json::from_str(r#"{"command":"connect"}"#).unwrap();
        assert_eq!(msg.command, Command::Connect);
        assert!(msg.from.is_empty());
        assert!(msg.to.is_empty());
        assert!(msg.data.is_empty());
    }

    #[test]
    fn unrecognised_or_absent_command_is_unknown() {
        let msg: SignalMessage = serde_json::from_str(r#"{"command":"renegotiate"}"#).unwrap();
        assert_eq!(msg.command, Command::Unknown);

        let msg: SignalMessage = serde_json::from_str(r#"{"from":"a"}"#).unwrap();
        assert_eq!(msg.command, Command::Unknown);
    }

    #[test]
    fn notifications_serialize_with_lowercase_command() {
        let value = serde_json::to_value(SignalMessage::disconnect("a", "b")).unwrap();
        assert_eq!(
            value,
            json!({"from": "a", "to": "b", "data": "", "command": "disconnect"})
        );
    }

    #[test]
    fn decodes_sfu_requests() {
        let req: SfuRequest =
            serde_json::from_str(r#"{"type":"publish","sdp":"v=0","name":"room1"}"#).unwrap();
        assert_eq!(
            req,
            SfuRequest::Publish {
                sdp: "v=0".to_string(),
                name: "room1".to_string()
            }
        );

        let req: SfuRequest = serde_json::from_str(r#"{"type":"subscribe","name":"room1"}"#).unwrap();
        assert_eq!(req.name(), "room1");
    }

    #[test]
    fn rejects_unknown_sfu_type() {
        assert!(serde_json::from_str::<SfuRequest>(r#"{"type":"unpublish","name":"x"}"#).is_err());
    }

    #[test]
    fn error_reply_shape() {
        let value = serde_json::to_value(SfuResponse::Error {
            message: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(value, json!({"type": "error", "message": "boom"}));
    }
}
