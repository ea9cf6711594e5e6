use std::future::{self, Future};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::debug_if_enabled;
use crate::error::ExecError;
use crate::events::ExecutionJob;
use crate::services::CommandExecutor;
use crate::utils::limit_string;

/// Сколько символов вывода команды попадает в лог
pub const OUTPUT_PREVIEW_CHARS: usize = 100;

/// Таймаут выполнения: переопределение из командной строки (если > 0)
/// важнее значения из конфигурации
pub fn effective_timeout(override_secs: u64, config_secs: u64) -> Duration {
    if override_secs > 0 {
        Duration::from_secs(override_secs)
    } else {
        Duration::from_secs(config_secs)
    }
}

/// Ограничивает одно выполнение команды по времени.
///
/// Вызывающий освобождается не позже дедлайна. Результат, пришедший после
/// дедлайна, отбрасывается: передача идёт через `oneshot`, и первым
/// принимается либо результат, либо истечение таймаута.
#[derive(Clone)]
pub struct TimeoutSupervisor {
    executor: Arc<CommandExecutor>,
}

impl TimeoutSupervisor {
    pub fn new(executor: Arc<CommandExecutor>) -> Self {
        Self { executor }
    }

    #[cfg(test)]
    pub fn executor(&self) -> &Arc<CommandExecutor> {
        &self.executor
    }

    #[cfg(test)]
    pub async fn run(&self, job: &ExecutionJob) -> Result<Vec<u8>, ExecError> {
        self.run_until(job, future::pending()).await
    }

    /// Выполнить задание; ожидание прерывается, когда завершается `cancelled`
    pub async fn run_until<F>(&self, job: &ExecutionJob, cancelled: F) -> Result<Vec<u8>, ExecError>
    where
        F: Future<Output = ()>,
    {
        self.run_command_until(
            job.command.clone(),
            job.event_data.clone(),
            job.timeout,
            cancelled,
        )
        .await
    }

    pub async fn run_command(
        &self,
        command: String,
        event_data: String,
        timeout: Duration,
    ) -> Result<Vec<u8>, ExecError> {
        self.run_command_until(command, event_data, timeout, future::pending())
            .await
    }

    /// Гонка результата, дедлайна и отмены.
    ///
    /// При отмене процесс не трогается и продолжает занимать слот, его
    /// завершает `CommandExecutor::kill_all`.
    pub async fn run_command_until<F>(
        &self,
        command: String,
        event_data: String,
        timeout: Duration,
        cancelled: F,
    ) -> Result<Vec<u8>, ExecError>
    where
        F: Future<Output = ()>,
    {
        let id = self.executor.next_execution_id();
        let (result_tx, result_rx) = oneshot::channel();

        let executor = Arc::clone(&self.executor);
        let worker = tokio::spawn(async move {
            let result = executor.execute_as(id, &command, &event_data).await;
            // Получатель уже мог уйти по таймауту - тогда результат просто теряется
            let _ = result_tx.send(result);
        });

        tokio::select! {
            outcome = tokio::time::timeout(timeout, result_rx) => match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(ExecError::Cancelled),
                Err(_) => {
                    if !self.executor.kill(id) {
                        debug_if_enabled!("Выполнение #{} не найдено в реестре при таймауте", id);
                    }
                    // Прерывание задачи также снимает процесс через kill_on_drop
                    worker.abort();
                    Err(ExecError::TimedOut(timeout))
                }
            },
            _ = cancelled => {
                debug_if_enabled!("Ожидание выполнения #{} прервано остановкой", id);
                Err(ExecError::Cancelled)
            }
        }
    }

    /// Выполнить задание и записать исход в лог. Ошибки дальше не идут.
    pub async fn supervise(&self, job: ExecutionJob) {
        self.supervise_until(job, future::pending()).await
    }

    pub async fn supervise_until<F>(&self, job: ExecutionJob, cancelled: F)
    where
        F: Future<Output = ()>,
    {
        info!("Выполнение скрипта для события: {}", job);
        let result = self.run_until(&job, cancelled).await;
        log_outcome(&job.event_name, &result);
    }
}

pub fn log_outcome(event_name: &str, result: &Result<Vec<u8>, ExecError>) {
    match result {
        Ok(output) => {
            if !output.is_empty() {
                debug_if_enabled!(
                    "Вывод скрипта [{}]: {}",
                    event_name,
                    limit_string(String::from_utf8_lossy(output).trim_end(), OUTPUT_PREVIEW_CHARS)
                );
            }
        }
        Err(ExecError::TimedOut(timeout)) => {
            warn!("Таймаут скрипта [{}] после {:?}", event_name, timeout);
        }
        Err(ExecError::Cancelled) => {
            info!("Скрипт [{}] оставлен без ожидания: остановка", event_name);
        }
        Err(e) => {
            let output = String::from_utf8_lossy(e.output());
            let output = output.trim_end();
            if output.is_empty() {
                warn!("Ошибка скрипта [{}]: {}", event_name, e);
            } else {
                warn!(
                    "Ошибка скрипта [{}]: {}: {}",
                    event_name,
                    e,
                    limit_string(output, OUTPUT_PREVIEW_CHARS)
                );
            }
        }
    }
}
