use crate::error::Result;
use crate::services::EventHandler;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::info;

use super::EventSourceTrait;

const SAMPLE_EVENTS: [&str; 6] = [
    "workspace>>2",
    "activewindow>>kitty,~/projects",
    "windowtitle>>5f3a2b10",
    "openwindow>>5f3a2b10,2,firefox,Mozilla Firefox",
    "urgent>>5f3a2b10",
    "closewindow>>5f3a2b10",
];

/// Эмуляция событий композитора без подключения к Hyprland
pub struct DryRunEventSource {
    handler: Arc<EventHandler>,
    period: Duration,
    limit: Option<usize>,
}

impl DryRunEventSource {
    pub fn new(handler: Arc<EventHandler>) -> Self {
        Self {
            handler,
            period: Duration::from_secs(3),
            limit: None,
        }
    }

    #[cfg(test)]
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Остановиться после `limit` событий
    #[cfg(test)]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[cfg(test)]
    pub fn sample_events() -> &'static [&'static str] {
        &SAMPLE_EVENTS
    }

    async fn run_impl(self) -> Result<()> {
        info!("Dry-run режим - события эмулируются каждые {}мс", self.period.as_millis());

        let mut ticker = interval(self.period);
        let mut emitted = 0usize;

        for line in SAMPLE_EVENTS.iter().cycle() {
            if self.limit.is_some_and(|limit| emitted >= limit) {
                break;
            }

            ticker.tick().await;

            let outcome = self.handler.handle_line(line);
            info!("Dry-run: событие {} -> {:?}", line, outcome);
            emitted += 1;
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl EventSourceTrait for DryRunEventSource {
    async fn run(self: Box<Self>) -> Result<()> {
        (*self).run_impl().await
    }
}
