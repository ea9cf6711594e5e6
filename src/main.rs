use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio::time::Duration;
use tracing::{error, info, warn};
mod config;
mod error;
mod events;
mod services;
mod utils;

use config::{Config, ConfigStore};
use services::{create_event_source, ConfigWatcher, EventHandler, EventRouter};

/// Сколько ждать завершения текущих команд при остановке
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Размер очереди на каждый мегабайт подсказки `--memlimit`
const QUEUE_JOBS_PER_MB: usize = 16;

#[derive(Parser, Debug)]
#[command(name = "hyde-ipc")]
#[command(about = "Запуск shell-команд по событиям Hyprland")]
struct Args {
    /// Подробное логирование
    #[arg(short, long)]
    verbose: bool,

    /// Подсказка по памяти в МБ (ограничивает очередь событий, 0 - без ограничения)
    #[arg(long, default_value_t = 8)]
    memlimit: usize,

    /// Не следить за изменениями файла конфигурации
    #[arg(long)]
    nowatch: bool,

    /// Таймаут выполнения скриптов в секундах (0 - из конфигурации)
    #[arg(long, default_value_t = 0)]
    timeout: u64,

    /// Путь к файлу конфигурации (по умолчанию ~/.config/hyde/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Режим сухого запуска (события эмулируются, сокет не нужен)
    #[arg(long)]
    dry_run: bool,

    /// Уровень логирования (перекрывает --verbose)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Инициализация системы логирования
    let level = match (&args.log_level, args.verbose) {
        (Some(level), _) => level.as_str(),
        (None, true) => "debug",
        (None, false) => "info",
    };
    init_tracing(level)?;

    info!("Запуск hyde-ipc v{}", env!("CARGO_PKG_VERSION"));

    // Загрузка конфигурации
    let config_path = match args.config.clone() {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !config_path.exists() {
        info!("Создание конфигурации по умолчанию: {:?}", config_path);
        Config::write_default(&config_path)?;
    }

    let store = Arc::new(ConfigStore::open(&config_path)?);
    info!("Конфигурация загружена из: {:?}", config_path);
    store.snapshot().log_summary();

    if args.dry_run {
        warn!("Режим сухого запуска - события эмулируются");
    }

    let queue_limit = (args.memlimit > 0).then(|| args.memlimit * QUEUE_JOBS_PER_MB);
    let handler = Arc::new(EventHandler::new(
        store,
        EventRouter::from_env(),
        args.timeout,
        queue_limit,
    ));

    let _watcher = if args.nowatch {
        info!("Наблюдение за конфигурацией отключено");
        None
    } else {
        match ConfigWatcher::start(Arc::clone(&handler)) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("Не удалось запустить наблюдение за конфигурацией: {}", e);
                None
            }
        }
    };

    let source = create_event_source(Arc::clone(&handler), args.dry_run).await?;
    let mut source_handle = tokio::spawn(async move { source.run().await });

    info!("Все сервисы запущены");

    let mut terminate = unix_signal(SignalKind::terminate())?;

    // Ожидание сигнала завершения или конца потока событий
    let outcome: Result<()> = tokio::select! {
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Получен сигнал завершения (Ctrl+C)"),
                Err(err) => error!("Ошибка при ожидании сигнала завершения: {}", err),
            }
            Ok(())
        }
        _ = terminate.recv() => {
            info!("Получен сигнал завершения (SIGTERM)");
            Ok(())
        }
        result = &mut source_handle => match result {
            Ok(Ok(())) => {
                info!("Поток событий завершён");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("Ошибка чтения событий: {}", e);
                Err(e.into())
            }
            Err(e) => {
                error!("Задача чтения событий аварийно завершилась: {}", e);
                Err(e.into())
            }
        },
    };

    info!("Завершение работы...");

    source_handle.abort();
    handler.shutdown(SHUTDOWN_GRACE).await;

    info!("hyde-ipc завершил работу");
    outcome
}

fn init_tracing(level: &str) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .init();

    Ok(())
}
