use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::{ConfigStore, DispatchMode, ReloadOutcome};
use crate::debug_if_enabled;
use crate::events::{EventRecord, ExecutionJob};
use crate::services::router::Resolution;
use crate::services::supervisor::effective_timeout;
use crate::services::{
    CommandExecutor, Debouncer, EventDispatcher, EventRouter, TimeoutSupervisor,
};

/// Что произошло с одной строкой события (для логов и тестов)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    Malformed,
    Debounced,
    NotConfigured,
    CommandNotFound,
    Dispatched,
    Dropped,
}

enum DispatchStrategy {
    Queue(EventDispatcher),
    Direct(TimeoutSupervisor),
}

/// Контекст обработки событий.
///
/// Создаётся один раз при старте и владеет всем разделяемым состоянием:
/// снимком конфигурации, дебаунсером, маршрутизатором и исполнителем.
pub struct EventHandler {
    store: Arc<ConfigStore>,
    debouncer: Debouncer,
    router: EventRouter,
    executor: Arc<CommandExecutor>,
    strategy: DispatchStrategy,
    timeout_override: u64,
}

impl EventHandler {
    /// `queue_limit` ограничивает размер очереди сверху (подсказка по памяти).
    /// В режиме очереди нужен контекст tokio.
    pub fn new(
        store: Arc<ConfigStore>,
        router: EventRouter,
        timeout_override: u64,
        queue_limit: Option<usize>,
    ) -> Self {
        let config = store.snapshot();
        let settings = &config.settings;

        let executor = Arc::new(CommandExecutor::new(settings.max_concurrent));
        let supervisor = TimeoutSupervisor::new(Arc::clone(&executor));

        let strategy = match settings.dispatch_mode {
            DispatchMode::Queue => {
                let queue_size = match queue_limit {
                    Some(limit) => settings.queue_size.min(limit),
                    None => settings.queue_size,
                };
                DispatchStrategy::Queue(EventDispatcher::new(
                    settings.workers,
                    queue_size,
                    supervisor,
                ))
            }
            DispatchMode::Direct => DispatchStrategy::Direct(supervisor),
        };

        if timeout_override > 0 {
            info!(
                "Таймаут выполнения переопределён из командной строки: {} секунд",
                timeout_override
            );
        }

        Self {
            store,
            debouncer: Debouncer::new(Duration::from_millis(settings.debounce_time)),
            router,
            executor,
            strategy,
            timeout_override,
        }
    }

    /// Обработать одну строку из сокета. Ничего не возвращает наверх, кроме исхода.
    pub fn handle_line(&self, line: &str) -> HandleOutcome {
        let Some(event) = EventRecord::parse(line) else {
            return HandleOutcome::Malformed;
        };

        if self.debouncer.should_suppress(&event.name, Instant::now()) {
            debug_if_enabled!("Событие {} подавлено дебаунсом", event.name);
            return HandleOutcome::Debounced;
        }

        let config = self.store.snapshot();

        let command = match self.router.resolve(&event.name, &event.data, &config) {
            Resolution::Ready(command) => command,
            Resolution::NotConfigured => return HandleOutcome::NotConfigured,
            Resolution::CommandNotFound(program) => {
                info!("Команда не найдена: {} (событие {})", program, event.name);
                return HandleOutcome::CommandNotFound;
            }
        };

        let timeout = effective_timeout(self.timeout_override, config.settings.timeout);
        let job = ExecutionJob::new(event, command, timeout);

        match &self.strategy {
            DispatchStrategy::Queue(dispatcher) => {
                if dispatcher.dispatch(job) {
                    HandleOutcome::Dispatched
                } else {
                    HandleOutcome::Dropped
                }
            }
            DispatchStrategy::Direct(supervisor) => {
                let supervisor = supervisor.clone();
                tokio::spawn(async move { supervisor.supervise(job).await });
                HandleOutcome::Dispatched
            }
        }
    }

    /// Перечитать конфигурацию. При успехе состояние дебаунса сбрасывается.
    pub fn reload(&self) -> bool {
        match self.store.reload() {
            ReloadOutcome::Reloaded(config) => {
                self.debouncer
                    .reset(Duration::from_millis(config.settings.debounce_time));

                if config.settings.max_concurrent != self.executor.max_concurrent() {
                    warn!(
                        "max_concurrent изменится только после перезапуска (сейчас {})",
                        self.executor.max_concurrent()
                    );
                }

                config.log_summary();
                true
            }
            ReloadOutcome::KeptPrevious(e) => {
                debug_if_enabled!("Перезагрузка отклонена: {:#}", e);
                false
            }
        }
    }

    /// Остановить диспетчер и завершить все оставшиеся команды
    pub async fn shutdown(&self, grace: Duration) {
        if let DispatchStrategy::Queue(dispatcher) = &self.strategy {
            dispatcher.shutdown(grace).await;
        }

        let killed = self.executor.kill_all();
        if killed > 0 {
            info!("Завершено {} незаконченных команд", killed);
        }
    }

    pub fn config_store(&self) -> &Arc<ConfigStore> {
        &self.store
    }
}
