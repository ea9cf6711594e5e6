use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::debug_if_enabled;
use crate::utils::limit_string;

/// Файлы меньше этого размера считаются недописанными редактором
const MIN_CONFIG_SIZE: u64 = 10;

const ENV_PREFIX: &str = "HYDE_IPC_";

const CONFLICT_MARKERS: [&str; 2] = ["<<<<<<< ", ">>>>>>> "];

const DEFAULT_CONFIG: &str = r#"# Hyde IPC Configuration for Hyprland

[hyde-ipc]
# Maximum number of concurrent script executions
max_concurrent = 2
# Timeout for script execution in seconds
timeout = 60
# Debounce time for frequent events in milliseconds
debounce_time = 100
# "queue" (bounded queue + worker pool) or "direct" (task per event)
dispatch_mode = "queue"
workers = 4
queue_size = 64

[hyprland-ipc]
# Most common events are configured here
# {0} - all event data, {1}, {2}, ... - comma-separated fields
windowtitle = "notify-send \"Window Title Changed\" \"$HYDE_EVENT_DATA\""
workspace = ""
fullscreen = ""
screencast = ""
activewindow = ""
"#;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(rename = "hyde-ipc", default)]
    pub settings: IpcSettings,
    /// Имя события -> шаблон команды
    #[serde(rename = "hyprland-ipc", default)]
    pub events: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IpcSettings {
    pub max_concurrent: usize,
    /// Секунды
    pub timeout: u64,
    /// Миллисекунды
    pub debounce_time: u64,
    pub dispatch_mode: DispatchMode,
    pub workers: usize,
    pub queue_size: usize,
}

impl Default for IpcSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            timeout: 60,
            debounce_time: 100,
            dispatch_mode: DispatchMode::Queue,
            workers: 4,
            queue_size: 64,
        }
    }
}

/// Способ передачи заданий исполнителю
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Ограниченная очередь + фиксированный пул обработчиков
    #[default]
    Queue,
    /// Отдельная задача на каждое событие
    Direct,
}

impl Config {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        let metadata = fs::metadata(config_path)
            .with_context(|| format!("Файл конфигурации не найден: {:?}", config_path))?;

        if metadata.len() < MIN_CONFIG_SIZE {
            anyhow::bail!(
                "Файл конфигурации пуст или слишком мал: {} байт",
                metadata.len()
            );
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Не удалось прочитать {:?}", config_path))?;

        Self::parse(&content)
            .with_context(|| format!("Не удалось загрузить конфигурацию из {:?}", config_path))
    }

    /// Разбор содержимого TOML с наложением переменных окружения `HYDE_IPC_*`
    pub fn parse(content: &str) -> Result<Self> {
        if CONFLICT_MARKERS.iter().any(|marker| content.contains(marker)) {
            anyhow::bail!("Конфигурация содержит маркеры конфликта слияния");
        }

        let figment = Figment::new().merge(Toml::string(content)).merge(
            Env::prefixed(ENV_PREFIX)
                .map(|key| format!("hyde-ipc.{}", key.as_str().to_ascii_lowercase()).into()),
        );

        let config: Config = figment.extract()?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.settings.max_concurrent == 0 {
            anyhow::bail!("max_concurrent должно быть больше 0");
        }

        if self.settings.timeout == 0 {
            anyhow::bail!("timeout должно быть больше 0");
        }

        if self.settings.workers == 0 {
            anyhow::bail!("workers должно быть больше 0");
        }

        if self.settings.queue_size == 0 {
            anyhow::bail!("queue_size должно быть больше 0");
        }

        for event in self.events.keys() {
            if event.is_empty() || event.contains(">>") {
                anyhow::bail!("Неверное имя события: '{}'", event);
            }
        }

        Ok(())
    }

    /// `$XDG_CONFIG_HOME/hyde/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Не удалось определить каталог конфигурации пользователя")?;
        Ok(config_dir.join("hyde").join("config.toml"))
    }

    /// Создаёт конфигурацию по умолчанию, если файла ещё нет
    pub fn write_default<P: AsRef<Path>>(config_path: P) -> Result<()> {
        let config_path = config_path.as_ref();

        if config_path.exists() {
            return Ok(());
        }

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Не удалось создать каталог {:?}", parent))?;
        }

        fs::write(config_path, DEFAULT_CONFIG)
            .with_context(|| format!("Не удалось записать {:?}", config_path))?;

        Ok(())
    }

    /// Шаблон команды для события (`None`, если событие не описано)
    pub fn command_for(&self, event: &str) -> Option<&str> {
        self.events.get(event).map(String::as_str)
    }

    pub fn log_summary(&self) {
        info!(
            "Настройки: max_concurrent={}, timeout={}, debounce_time={}, dispatch_mode={:?}",
            self.settings.max_concurrent,
            self.settings.timeout,
            self.settings.debounce_time,
            self.settings.dispatch_mode
        );

        info!("Настроено событий: {}", self.events.len());
        for (event, script) in &self.events {
            if !script.is_empty() {
                debug_if_enabled!("  {} -> {}", event, limit_string(script, 50));
            }
        }
    }
}

/// Результат попытки перезагрузки конфигурации
#[derive(Debug)]
pub enum ReloadOutcome {
    Reloaded(Arc<Config>),
    /// Новая конфигурация невалидна, продолжаем работать на предыдущей
    KeptPrevious(anyhow::Error),
}

/// Текущий снимок конфигурации.
///
/// Читатели берут `Arc` на весь цикл обработки события, перезагрузка
/// подменяет снимок целиком под блокировкой записи.
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<Arc<Config>>,
}

impl ConfigStore {
    /// Первая загрузка: без валидной конфигурации работать нельзя
    pub fn open<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref().to_path_buf();
        let config = Config::load(&path)?;
        Ok(Self::with_config(path, config))
    }

    pub fn with_config(path: PathBuf, config: Config) -> Self {
        Self {
            path,
            current: RwLock::new(Arc::new(config)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Arc<Config> {
        self.current.read().clone()
    }

    pub fn reload(&self) -> ReloadOutcome {
        match Config::load(&self.path) {
            Ok(config) => {
                let config = Arc::new(config);
                *self.current.write() = Arc::clone(&config);
                info!("Конфигурация перезагружена из {:?}", self.path);
                ReloadOutcome::Reloaded(config)
            }
            Err(e) => {
                warn!("Ошибка загрузки конфигурации: {:#}", e);
                warn!("Продолжаем работу с предыдущей валидной конфигурацией");
                ReloadOutcome::KeptPrevious(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
[hyde-ipc]
max_concurrent = 3
timeout = 5
debounce_time = 250
dispatch_mode = "direct"

[hyprland-ipc]
workspace = "echo {1}"
activewindow = ""
"#;

    #[test]
    fn test_default_config_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.settings.max_concurrent, 2);
        assert_eq!(config.settings.timeout, 60);
        assert_eq!(config.settings.debounce_time, 100);
    }

    #[test]
    fn test_parse_sections() {
        let config = Config::parse(SAMPLE).unwrap();

        assert_eq!(config.settings.max_concurrent, 3);
        assert_eq!(config.settings.timeout, 5);
        assert_eq!(config.settings.debounce_time, 250);
        assert_eq!(config.settings.dispatch_mode, DispatchMode::Direct);
        // Не указанные поля берутся по умолчанию
        assert_eq!(config.settings.workers, 4);
        assert_eq!(config.settings.queue_size, 64);

        assert_eq!(config.command_for("workspace"), Some("echo {1}"));
        assert_eq!(config.command_for("activewindow"), Some(""));
        assert_eq!(config.command_for("monitoradded"), None);
    }

    #[test]
    fn test_parse_rejects_conflict_markers() {
        let content = format!("{}\n<<<<<<< HEAD\n", SAMPLE);
        assert!(Config::parse(&content).is_err());
    }

    #[test]
    fn test_parse_rejects_zero_concurrency() {
        let content = "[hyde-ipc]\nmax_concurrent = 0\n";
        assert!(Config::parse(content).is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_dispatch_mode() {
        let content = "[hyde-ipc]\ndispatch_mode = \"fanout\"\n";
        assert!(Config::parse(content).is_err());
    }

    #[test]
    fn test_load_rejects_tiny_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "a=1").unwrap();

        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_write_default_is_loadable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hyde").join("config.toml");

        Config::write_default(&path).unwrap();
        let config = Config::load(&path).unwrap();

        assert_eq!(config.settings.max_concurrent, 2);
        assert!(config.command_for("windowtitle").unwrap().contains("HYDE_EVENT_DATA"));
        assert_eq!(config.command_for("workspace"), Some(""));
    }

    #[test]
    fn test_write_default_keeps_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, SAMPLE).unwrap();

        Config::write_default(&path).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), SAMPLE);
    }

    #[test]
    fn test_store_keeps_previous_on_broken_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, SAMPLE).unwrap();

        let store = ConfigStore::open(&path).unwrap();
        assert_eq!(store.snapshot().settings.timeout, 5);

        fs::write(&path, "[hyde-ipc\nthis is not toml at all").unwrap();
        assert!(matches!(store.reload(), ReloadOutcome::KeptPrevious(_)));
        assert_eq!(store.snapshot().settings.timeout, 5);

        fs::write(&path, SAMPLE.replace("timeout = 5", "timeout = 9")).unwrap();
        assert!(matches!(store.reload(), ReloadOutcome::Reloaded(_)));
        assert_eq!(store.snapshot().settings.timeout, 9);
    }

    #[test]
    fn test_store_open_fails_without_file() {
        let dir = TempDir::new().unwrap();
        assert!(ConfigStore::open(dir.path().join("missing.toml")).is_err());
    }
}
