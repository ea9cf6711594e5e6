use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HydeError {
    #[error("Ошибка конфигурации: {0}")]
    Config(#[from] anyhow::Error),

    #[error("Ошибка ввода-вывода: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ошибка наблюдения за файлом: {0}")]
    Watch(#[from] notify::Error),

    #[error("Не задана переменная окружения: {0}")]
    MissingEnv(String),

    #[error("Сервис недоступен: {0}")]
    ServiceUnavailable(String),

    #[error("Внутренняя ошибка: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, HydeError>;

/// Ошибки выполнения одной команды.
///
/// Никогда не пробрасываются к источнику событий: каждая ошибка
/// логируется в месте возникновения.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("не удалось запустить процесс: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("ошибка ожидания процесса: {0}")]
    Wait(#[source] std::io::Error),

    #[error("команда завершилась неуспешно ({status})")]
    NonZeroExit { status: ExitStatus, output: Vec<u8> },

    #[error("превышено время выполнения ({0:?})")]
    TimedOut(Duration),

    #[error("выполнение отменено")]
    Cancelled,
}

impl ExecError {
    /// Вывод, захваченный до ошибки (пустой, если процесс не успел ничего написать)
    pub fn output(&self) -> &[u8] {
        match self {
            ExecError::NonZeroExit { output, .. } => output,
            _ => &[],
        }
    }

    #[cfg(test)]
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecError::TimedOut(_))
    }
}

// Удобные макросы для создания ошибок
#[macro_export]
macro_rules! hyde_error {
    (missing_env, $($arg:tt)*) => {
        $crate::error::HydeError::MissingEnv(format!($($arg)*))
    };
    (service_unavailable, $($arg:tt)*) => {
        $crate::error::HydeError::ServiceUnavailable(format!($($arg)*))
    };
    (internal, $($arg:tt)*) => {
        $crate::error::HydeError::Internal(format!($($arg)*))
    };
}
