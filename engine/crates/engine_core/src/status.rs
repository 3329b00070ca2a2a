use serde::Serialize;

use net::RestartMode;

const MAX_ENTRIES: usize = 50;

/// In-memory summary shown to operators.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerStatus {
    pub servername: String,
    pub version: String,
    pub portal_connected: bool,
    pub start_mode: Option<RestartMode>,
    pub runtime_secs: f64,
    pub sessions: usize,
    pub last_error: Option<String>,
    pub errors: Vec<String>,
    pub info: Vec<String>,
}

impl ServerStatus {
    pub fn new(servername: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            servername: servername.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.last_error = Some(error.clone());
        push_bounded(&mut self.errors, error);
    }

    pub fn push_info(&mut self, line: impl Into<String>) {
        push_bounded(&mut self.info, line.into());
    }

    /// One-line operator view.
    pub fn display(&self) -> String {
        let portal = if self.portal_connected { "connected" } else { "disconnected" };
        let mut line = format!(
            "{} {} | portal {} | {} sessions | runtime {:.0}s",
            self.servername, self.version, portal, self.sessions, self.runtime_secs
        );
        if let Some(err) = &self.last_error {
            line.push_str(&format!(" | last error: {err}"));
        }
        line
    }
}

fn push_bounded(list: &mut Vec<String>, entry: String) {
    if list.len() >= MAX_ENTRIES {
        list.remove(0);
    }
    list.push(entry);
}
