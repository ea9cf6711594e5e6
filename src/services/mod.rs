pub mod config_watcher;
pub mod debouncer;
pub mod dispatcher;
pub mod event_handler;
pub mod event_source;
pub mod executor;
pub mod router;
pub mod supervisor;

pub use config_watcher::ConfigWatcher;
pub use debouncer::Debouncer;
pub use dispatcher::EventDispatcher;
pub use event_handler::EventHandler;
pub use event_source::create_event_source;
pub use executor::CommandExecutor;
pub use router::EventRouter;
pub use supervisor::TimeoutSupervisor;
