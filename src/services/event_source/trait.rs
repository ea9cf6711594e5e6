use crate::error::Result;
use crate::services::EventHandler;
use std::sync::Arc;

use super::{socket_path_from_env, DryRunEventSource, SocketEventSource};

/// Trait for event sources that can run in different modes
#[async_trait::async_trait]
pub trait EventSourceTrait {
    /// Read events until the source is exhausted
    async fn run(self: Box<Self>) -> Result<()>;
}

/// Factory function to create an appropriate event source based on the dry_run flag.
///
/// The real source connects immediately, so a missing socket fails startup.
pub async fn create_event_source(
    handler: Arc<EventHandler>,
    dry_run: bool,
) -> Result<Box<dyn EventSourceTrait + Send>> {
    if dry_run {
        Ok(Box::new(DryRunEventSource::new(handler)))
    } else {
        let socket_path = socket_path_from_env()?;
        Ok(Box::new(SocketEventSource::connect(handler, socket_path).await?))
    }
}
