use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::debug_if_enabled;
use crate::events::ExecutionJob;
use crate::services::TimeoutSupervisor;

type JobQueue = Arc<AsyncMutex<mpsc::Receiver<ExecutionJob>>>;

/// Жизненный цикл диспетчера
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Created,
    Running,
    ShuttingDown,
    Stopped,
}

/// Ограниченная очередь заданий и фиксированный пул обработчиков.
///
/// `dispatch` никогда не блокирует: цикл чтения событий однопоточный,
/// поэтому при заполненной очереди задание отбрасывается.
pub struct EventDispatcher {
    sender: mpsc::Sender<ExecutionJob>,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    state: RwLock<DispatcherState>,
    dropped: AtomicU64,
    worker_count: usize,
}

/// Завершается при сигнале остановки пула (или если отправитель удалён)
async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

impl EventDispatcher {
    /// Создать диспетчер и сразу запустить обработчики (нужен контекст tokio)
    pub fn new(worker_count: usize, queue_size: usize, supervisor: TimeoutSupervisor) -> Self {
        let worker_count = worker_count.max(1);
        let queue_size = queue_size.max(1);

        info!(
            "Инициализация EventDispatcher (обработчиков: {}, очередь: {})",
            worker_count, queue_size
        );

        let (sender, receiver) = mpsc::channel(queue_size);
        let (shutdown_tx, _) = watch::channel(false);

        let dispatcher = Self {
            sender,
            shutdown_tx,
            workers: Mutex::new(Vec::with_capacity(worker_count)),
            state: RwLock::new(DispatcherState::Created),
            dropped: AtomicU64::new(0),
            worker_count,
        };

        dispatcher.start_workers(Arc::new(AsyncMutex::new(receiver)), supervisor);
        dispatcher
    }

    fn start_workers(&self, queue: JobQueue, supervisor: TimeoutSupervisor) {
        let mut workers = self.workers.lock();
        for id in 0..self.worker_count {
            let queue = Arc::clone(&queue);
            let shutdown = self.shutdown_tx.subscribe();
            let supervisor = supervisor.clone();
            workers.push(tokio::spawn(Self::worker_loop(id, queue, shutdown, supervisor)));
        }
        *self.state.write() = DispatcherState::Running;
    }

    /// Цикл одного обработчика: одно задание за раз
    async fn worker_loop(
        id: usize,
        queue: JobQueue,
        mut shutdown: watch::Receiver<bool>,
        supervisor: TimeoutSupervisor,
    ) {
        debug_if_enabled!("Обработчик событий #{} запущен", id);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let job = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                job = async { queue.lock().await.recv().await } => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            debug_if_enabled!("Обработчик #{} взял событие {}", id, job.event_name);
            supervisor
                .supervise_until(job, wait_for_shutdown(shutdown.clone()))
                .await;
        }

        debug_if_enabled!("Обработчик событий #{} остановлен", id);
    }

    /// Поставить задание в очередь без ожидания.
    ///
    /// `false` - задание отброшено (очередь заполнена или диспетчер остановлен).
    pub fn dispatch(&self, job: ExecutionJob) -> bool {
        if self.state() != DispatcherState::Running {
            self.record_drop(&job.event_name, "диспетчер остановлен");
            return false;
        }

        match self.sender.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                self.record_drop(&job.event_name, "очередь заполнена");
                false
            }
            Err(TrySendError::Closed(job)) => {
                self.record_drop(&job.event_name, "очередь закрыта");
                false
            }
        }
    }

    fn record_drop(&self, event_name: &str, reason: &str) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        warn!("Событие {} отброшено: {}", event_name, reason);
    }

    /// Остановить приём заданий и подождать обработчики не дольше `grace`.
    ///
    /// Сигнал остановки прерывает и ожидание текущих заданий. Их процессы
    /// не убиваются здесь: это делает `CommandExecutor::kill_all`.
    pub async fn shutdown(&self, grace: Duration) {
        {
            let mut state = self.state.write();
            if matches!(*state, DispatcherState::ShuttingDown | DispatcherState::Stopped) {
                return;
            }
            *state = DispatcherState::ShuttingDown;
        }

        info!("Остановка EventDispatcher...");
        self.shutdown_tx.send_replace(true);

        let workers = std::mem::take(&mut *self.workers.lock());
        let drained = tokio::time::timeout(grace, async {
            for worker in workers {
                let _ = worker.await;
            }
        })
        .await;

        match drained {
            Ok(()) => info!(
                "EventDispatcher остановлен корректно (отброшено событий: {})",
                self.dropped_count()
            ),
            Err(_) => warn!(
                "Таймаут остановки EventDispatcher ({}мс), незавершённые задания брошены",
                grace.as_millis()
            ),
        }

        *self.state.write() = DispatcherState::Stopped;
    }

    pub fn state(&self) -> DispatcherState {
        *self.state.read()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

}
