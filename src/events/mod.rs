pub mod hyprland;

pub use hyprland::EventRecord;

use std::fmt;
use std::time::Duration;

/// Задание на выполнение команды для одного принятого события.
///
/// После извлечения из очереди принадлежит только одному обработчику.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionJob {
    pub event_name: String,
    pub event_data: String,
    pub command: String,
    pub timeout: Duration,
}

impl ExecutionJob {
    pub fn new(event: EventRecord, command: String, timeout: Duration) -> Self {
        Self {
            event_name: event.name,
            event_data: event.data,
            command,
            timeout,
        }
    }
}

impl fmt::Display for ExecutionJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (таймаут {:?})", self.event_name, self.timeout)
    }
}
