//! The in-memory process record (§3). Exists only while a service is
//! supervised; it does not survive process exit the way a `RegistryEntry`
//! does.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct ProcessRecord {
    pub name: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub port: u16,
    pub exit_code: Option<i32>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ProcessRecord {
    pub fn new(name: impl Into<String>, pid: u32, port: u16) -> Self {
        Self {
            name: name.into(),
            pid,
            started_at: Utc::now(),
            port,
            exit_code: None,
            ended_at: None,
        }
    }

    pub fn mark_exited(&mut self, exit_code: i32) {
        self.exit_code = Some(exit_code);
        self.ended_at = Some(Utc::now());
    }
}
