//! Change notifications.

use serde::Serialize;
use serde_json::Value;

/// Something observable happened inside an interpreter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Started {
        machine: String,
        configuration: Vec<String>,
    },
    Entered {
        machine: String,
        state: String,
    },
    Exited {
        machine: String,
        state: String,
    },
    Transitioned {
        machine: String,
        event: String,
        source: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    /// An event finished processing, including any raised events it caused.
    Dispatched {
        machine: String,
        event: String,
        handled: bool,
        configuration: Vec<String>,
        context: Value,
    },
    Stopped {
        machine: String,
    },
}

impl Notification {
    pub fn machine(&self) -> &str {
        match self {
            Notification::Started { machine, .. }
            | Notification::Entered { machine, .. }
            | Notification::Exited { machine, .. }
            | Notification::Transitioned { machine, .. }
            | Notification::Dispatched { machine, .. }
            | Notification::Stopped { machine } => machine,
        }
    }

    /// Short name of the notification kind, as used in filters.
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Started { .. } => "started",
            Notification::Entered { .. } => "entered",
            Notification::Exited { .. } => "exited",
            Notification::Transitioned { .. } => "transitioned",
            Notification::Dispatched { .. } => "dispatched",
            Notification::Stopped { .. } => "stopped",
        }
    }
}

/// Receives notifications. Called synchronously, in order, on the thread
/// driving the interpreter.
pub trait Observer: Send + Sync {
    fn notify(&self, notification: &Notification);
}

impl<F> Observer for F
where
    F: Fn(&Notification) + Send + Sync,
{
    fn notify(&self, notification: &Notification) {
        self(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serialize_tagged() {
        let n = Notification::Transitioned {
            machine: "door".to_string(),
            event: "OPEN".to_string(),
            source: "closed".to_string(),
            target: Some("open".to_string()),
        };
        assert_eq!(
            serde_json::to_value(&n).unwrap(),
            json!({
                "type": "transitioned",
                "machine": "door",
                "event": "OPEN",
                "source": "closed",
                "target": "open"
            })
        );
        assert_eq!(n.kind(), "transitioned");
        assert_eq!(n.machine(), "door");
    }
}
