use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use session::{ServerSession, SessionId};
use thiserror::Error;
use world::{AccountId, ObjectId};

/// How the Server process is being stopped, or was stopped last time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartMode {
    /// Sessions and persistent scripts survive; the process comes back.
    Reload,
    /// Sessions survive, non-persistent scripts are cleared.
    Reset,
    /// Sessions are dropped and no restart is expected.
    Shutdown,
}

impl RestartMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RestartMode::Reload => "reload",
            RestartMode::Reset => "reset",
            RestartMode::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for RestartMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown restart mode '{0}'")]
pub struct ParseModeError(pub String);

impl FromStr for RestartMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reload" => Ok(RestartMode::Reload),
            "reset" => Ok(RestartMode::Reset),
            "shutdown" => Ok(RestartMode::Shutdown),
            other => Err(ParseModeError(other.to_string())),
        }
    }
}

/// Portal → Server messages (internally tagged JSON on the wire).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PortalToServer {
    /// The Portal's authoritative session list.
    SyncSessions { sessions: Vec<ServerSession> },
    /// Session list pushed; the Server may start. `mode` is how the
    /// previous Server stopped, if the Portal knows.
    ServerReady {
        #[serde(default)]
        mode: Option<RestartMode>,
    },
    SessionConnected { session: ServerSession },
    SessionDisconnected { session_id: SessionId },
    SessionActivity { session_id: SessionId, timestamp: f64 },
    SessionLogin { session_id: SessionId, account: AccountId },
    SessionPuppet {
        session_id: SessionId,
        #[serde(default)]
        puppet: Option<ObjectId>,
    },
    /// Operator asked the Portal to stop or restart the Server.
    Shutdown { mode: RestartMode },
    /// Reply to a [`ServerToPortal::SyncSessions`].
    Ack { request_id: u64 },
}

/// Server → Portal messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerToPortal {
    SyncSessions {
        request_id: u64,
        sessions: Vec<ServerSession>,
    },
    DisconnectSession { session_id: SessionId, reason: String },
    ShutdownPortal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_mode_parses_case_insensitively() {
        assert_eq!("Reload".parse::<RestartMode>().unwrap(), RestartMode::Reload);
        assert_eq!(" reset ".parse::<RestartMode>().unwrap(), RestartMode::Reset);
        assert_eq!(
            "reboot".parse::<RestartMode>().unwrap_err(),
            ParseModeError("reboot".into())
        );
        assert_eq!(RestartMode::Shutdown.to_string(), "shutdown");
    }

    #[test]
    fn server_ready_mode_is_optional() {
        let msg: PortalToServer = serde_json::from_str(r#"{"type":"server_ready"}"#).unwrap();
        assert_eq!(msg, PortalToServer::ServerReady { mode: None });

        let msg: PortalToServer =
            serde_json::from_str(r#"{"type":"server_ready","mode":"reload"}"#).unwrap();
        assert_eq!(msg, PortalToServer::ServerReady { mode: Some(RestartMode::Reload) });
    }

    #[test]
    fn outbound_wire_shape() {
        let json = serde_json::to_value(ServerToPortal::DisconnectSession {
            session_id: SessionId(3),
            reason: "idle timeout exceeded".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "disconnect_session");
        assert_eq!(json["session_id"], 3);
    }
}
