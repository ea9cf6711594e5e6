use dashmap::DashMap;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::debug_if_enabled;
use crate::error::ExecError;
use crate::services::TimeoutSupervisor;
use crate::utils::limit_string;

pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Переменная окружения с исходными данными события для скрипта
pub const EVENT_DATA_VAR: &str = "HYDE_EVENT_DATA";

const SHELL: &str = "sh";

/// Запущенный процесс в реестре исполнителя
#[derive(Debug, Clone)]
pub struct RunningProcess {
    pub pid: u32,
    pub command: String,
    pub started_at: Instant,
}

/// Запуск shell-команд с ограничением параллельности.
///
/// Каждый живой процесс зарегистрирован под уникальным идентификатором
/// выполнения, чтобы `kill_all` мог завершить всё при остановке демона.
pub struct CommandExecutor {
    limit: Semaphore,
    max_concurrent: usize,
    running: DashMap<u64, RunningProcess>,
    next_id: AtomicU64,
}

/// Снимает процесс с учёта при любом выходе из выполнения, включая отмену задачи
struct RegistryGuard<'a> {
    running: &'a DashMap<u64, RunningProcess>,
    id: u64,
}

impl Drop for RegistryGuard<'_> {
    fn drop(&mut self) {
        self.running.remove(&self.id);
    }
}

impl CommandExecutor {
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = if max_concurrent == 0 {
            DEFAULT_MAX_CONCURRENT
        } else {
            max_concurrent
        };

        info!("Инициализация CommandExecutor (max_concurrent: {})", max_concurrent);

        Self {
            limit: Semaphore::new(max_concurrent),
            max_concurrent,
            running: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Новый идентификатор выполнения (для `execute_as` и `kill`)
    pub fn next_execution_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    #[allow(dead_code)]
    pub async fn execute(&self, command: &str, event_data: &str) -> Result<Vec<u8>, ExecError> {
        let id = self.next_execution_id();
        self.execute_as(id, command, event_data).await
    }

    /// Выполнить `sh -c <command>` под заданным идентификатором.
    ///
    /// Ждёт свободный слот, слот освобождается при любом исходе.
    /// Возвращает stdout, за которым следует stderr.
    pub async fn execute_as(
        &self,
        id: u64,
        command: &str,
        event_data: &str,
    ) -> Result<Vec<u8>, ExecError> {
        let _permit = self.limit.acquire().await.map_err(|_| ExecError::Cancelled)?;

        debug_if_enabled!("Запуск #{}: {}", id, limit_string(command, 100));

        let child = Command::new(SHELL)
            .arg("-c")
            .arg(command)
            .env(EVENT_DATA_VAR, event_data)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ExecError::Spawn)?;

        let _guard = child.id().map(|pid| self.register(id, pid, command));

        let output = child.wait_with_output().await.map_err(ExecError::Wait)?;

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);

        if output.status.success() {
            Ok(combined)
        } else {
            Err(ExecError::NonZeroExit {
                status: output.status,
                output: combined,
            })
        }
    }

    /// Выполнить команду с ограничением по времени
    #[allow(dead_code)]
    pub async fn execute_with_timeout(
        self: &Arc<Self>,
        command: &str,
        event_data: &str,
        timeout: Duration,
    ) -> Result<Vec<u8>, ExecError> {
        TimeoutSupervisor::new(Arc::clone(self))
            .run_command(command.to_string(), event_data.to_string(), timeout)
            .await
    }

    fn register(&self, id: u64, pid: u32, command: &str) -> RegistryGuard<'_> {
        self.running.insert(
            id,
            RunningProcess {
                pid,
                command: command.to_string(),
                started_at: Instant::now(),
            },
        );
        RegistryGuard {
            running: &self.running,
            id,
        }
    }

    /// Принудительно завершить одно выполнение. `false`, если процесс уже не зарегистрирован
    pub fn kill(&self, id: u64) -> bool {
        // Копируем pid, чтобы не держать шард DashMap во время системного вызова
        let pid = match self.running.get(&id) {
            Some(entry) => entry.pid,
            None => return false,
        };
        send_kill(pid)
    }

    /// Завершить все запущенные команды (при остановке демона).
    ///
    /// Ошибки отдельных процессов игнорируются. Возвращает число
    /// процессов, которым удалось отправить сигнал.
    pub fn kill_all(&self) -> usize {
        let targets: Vec<(u64, RunningProcess)> = self
            .running
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        if targets.is_empty() {
            return 0;
        }

        info!("Принудительное завершение {} запущенных команд", targets.len());

        targets
            .into_iter()
            .filter(|(id, process)| {
                debug_if_enabled!(
                    "Завершение #{} (pid {}, работает {}мс): {}",
                    id,
                    process.pid,
                    process.started_at.elapsed().as_millis(),
                    limit_string(&process.command, 50)
                );
                send_kill(process.pid)
            })
            .count()
    }

    #[allow(dead_code)]
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    #[allow(dead_code)]
    pub fn running_processes(&self) -> Vec<RunningProcess> {
        self.running.iter().map(|entry| entry.value().clone()).collect()
    }
}

fn send_kill(pid: u32) -> bool {
    let Ok(raw_pid) = i32::try_from(pid) else {
        return false;
    };

    match kill(Pid::from_raw(raw_pid), Signal::SIGKILL) {
        Ok(()) => true,
        Err(e) => {
            warn!("Не удалось завершить процесс {}: {}", pid, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    async fn wait_until(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("условие не выполнилось за отведённое время");
    }

    #[tokio::test]
    async fn test_execute_captures_output() {
        let executor = CommandExecutor::new(2);

        let output = executor.execute("echo hello", "").await.unwrap();

        assert_eq!(String::from_utf8_lossy(&output), "hello\n");
        assert_eq!(executor.running_count(), 0);
    }

    #[tokio::test]
    async fn test_event_data_is_injected() {
        let executor = CommandExecutor::new(2);

        let output = executor
            .execute("printf '%s' \"$HYDE_EVENT_DATA\"", "kitty,~/src")
            .await
            .unwrap();

        assert_eq!(String::from_utf8_lossy(&output), "kitty,~/src");
    }

    #[tokio::test]
    async fn test_ambient_environment_is_inherited() {
        let executor = CommandExecutor::new(1);

        let output = executor.execute("printf '%s' \"$PATH\"", "").await.unwrap();

        assert!(!output.is_empty());
    }

    #[tokio::test]
    async fn test_non_zero_exit_keeps_output() {
        let executor = CommandExecutor::new(2);

        let err = executor
            .execute("echo out; echo err >&2; exit 3", "")
            .await
            .unwrap_err();

        match &err {
            ExecError::NonZeroExit { status, output } => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(String::from_utf8_lossy(output), "out\nerr\n");
            }
            other => panic!("неожиданная ошибка: {:?}", other),
        }
        assert!(!err.is_timeout());
    }

    #[tokio::test]
    async fn test_zero_limit_falls_back_to_default() {
        let executor = CommandExecutor::new(0);
        assert_eq!(executor.max_concurrent(), DEFAULT_MAX_CONCURRENT);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_single_slot_runs_sequentially() {
        let executor = Arc::new(CommandExecutor::new(1));
        let started = Instant::now();

        let first = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move { executor.execute("sleep 0.3", "").await })
        };
        let second = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move { executor.execute("sleep 0.3", "").await })
        };

        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        assert!(started.elapsed() >= Duration::from_millis(600));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_two_slots_run_in_parallel() {
        let executor = Arc::new(CommandExecutor::new(2));
        let started = Instant::now();

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let executor = Arc::clone(&executor);
                tokio::spawn(async move { executor.execute("sleep 0.5", "").await })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert!(started.elapsed() < Duration::from_millis(950));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_kill_all_terminates_running_commands() {
        let executor = Arc::new(CommandExecutor::new(2));

        let task = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move { executor.execute("exec sleep 30", "").await })
        };

        wait_until(|| executor.running_count() == 1).await;
        let processes = executor.running_processes();
        assert_eq!(processes[0].command, "exec sleep 30");

        assert_eq!(executor.kill_all(), 1);

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("команда должна завершиться после kill_all")
            .unwrap();

        match result {
            Err(ExecError::NonZeroExit { status, .. }) => {
                assert_eq!(status.signal(), Some(Signal::SIGKILL as i32));
            }
            other => panic!("неожиданный результат: {:?}", other),
        }
        assert_eq!(executor.running_count(), 0);
    }

    #[tokio::test]
    async fn test_kill_unknown_execution() {
        let executor = CommandExecutor::new(1);
        assert!(!executor.kill(42));
        assert_eq!(executor.kill_all(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_execute_with_timeout_reports_timeout() {
        let executor = Arc::new(CommandExecutor::new(1));
        let started = Instant::now();

        let err = executor
            .execute_with_timeout("sleep 10", "", Duration::from_millis(200))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(2));

        wait_until(|| executor.running_count() == 0).await;
    }
}
