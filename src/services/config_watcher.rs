use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::error::Result;
use crate::hyde_error;
use crate::services::EventHandler;
use crate::trace_if_enabled;

/// Пауза после изменения файла, чтобы редактор успел дописать его целиком
pub const RELOAD_COOLDOWN: Duration = Duration::from_millis(500);

/// Наблюдение за файлом конфигурации и горячая перезагрузка
pub struct ConfigWatcher {
    // Держим наблюдатель живым, пока жив ConfigWatcher
    _watcher: RecommendedWatcher,
    reload_task: JoinHandle<()>,
}

/// Изменение или создание файла с нужным именем.
///
/// Create учитывается, потому что редакторы сохраняют через переименование.
pub fn is_config_change(event: &Event, file_name: &OsStr) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
        && event
            .paths
            .iter()
            .any(|path| path.file_name() == Some(file_name))
}

impl ConfigWatcher {
    /// Наблюдаем за каталогом файла (нужен контекст tokio)
    pub fn start(handler: Arc<EventHandler>) -> Result<Self> {
        let config_path = handler.config_store().path().to_path_buf();

        let file_name: OsString = config_path
            .file_name()
            .ok_or_else(|| hyde_error!(internal, "У пути конфигурации нет имени файла: {:?}", config_path))?
            .to_os_string();

        let parent_dir = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf();

        let (tx, rx) = mpsc::unbounded_channel::<()>();

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    if is_config_change(&event, &file_name) {
                        trace_if_enabled!("Изменение конфигурации: {:?}", event.kind);
                        let _ = tx.send(());
                    }
                }
                Err(e) => warn!("Ошибка наблюдения за конфигурацией: {}", e),
            }
        })?;

        watcher.watch(&parent_dir, RecursiveMode::NonRecursive)?;

        info!("Наблюдение за конфигурацией: {:?}", config_path);

        let reload_task = tokio::spawn(Self::reload_loop(rx, handler));

        Ok(Self {
            _watcher: watcher,
            reload_task,
        })
    }

    async fn reload_loop(mut rx: mpsc::UnboundedReceiver<()>, handler: Arc<EventHandler>) {
        while rx.recv().await.is_some() {
            tokio::time::sleep(RELOAD_COOLDOWN).await;

            // Серия событий от одного сохранения - одна перезагрузка
            while rx.try_recv().is_ok() {}

            info!("Файл конфигурации изменён, перезагрузка...");
            handler.reload();
        }
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.reload_task.abort();
    }
}
