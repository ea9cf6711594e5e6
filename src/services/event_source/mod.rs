//! Event sources: responsibility and boundaries
//!
//! Submodules here ONLY deliver raw event lines to the `EventHandler`.
//! They MUST NOT debounce, resolve commands or execute anything: every
//! decision about an event is made by `EventHandler::handle_line`.

mod dry_run;
mod socket;
mod r#trait;

pub use self::dry_run::DryRunEventSource;
pub use self::r#trait::{create_event_source, EventSourceTrait};
pub use self::socket::{socket_path_from_env, SocketEventSource};
