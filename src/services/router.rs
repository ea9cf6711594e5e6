use smallvec::SmallVec;
use std::env;
use std::ffi::OsString;

use crate::config::Config;
use crate::utils::find_executable;

/// Плейсхолдер, заменяемый всей строкой данных события
const WHOLE_DATA_PLACEHOLDER: &str = "{0}";

/// Результат сопоставления события с командой
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Команда с подставленными данными, готовая к запуску
    Ready(String),
    /// Для события нет записи или шаблон пуст
    NotConfigured,
    /// Программа из начала команды не найдена
    CommandNotFound(String),
}

/// Сопоставление имени события с шаблоном команды из конфигурации
pub struct EventRouter {
    search_path: Option<OsString>,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::from_env()
    }
}

impl EventRouter {
    /// Поиск программ по `PATH` текущего процесса
    pub fn from_env() -> Self {
        Self {
            search_path: env::var_os("PATH"),
        }
    }

    #[cfg(test)]
    pub fn with_search_path(search_path: impl Into<OsString>) -> Self {
        Self {
            search_path: Some(search_path.into()),
        }
    }

    pub fn resolve(&self, event_name: &str, event_data: &str, config: &Config) -> Resolution {
        let template = match config.command_for(event_name) {
            Some(template) if !template.is_empty() => template,
            _ => return Resolution::NotConfigured,
        };

        let command = if template.contains('{') {
            substitute_placeholders(template, event_data)
        } else {
            template.to_string()
        };

        // Быстрый отказ: не запускаем shell ради заведомо отсутствующей программы
        let Some(program) = program_name(&command) else {
            return Resolution::NotConfigured;
        };

        if find_executable(program, self.search_path.as_deref()).is_none() {
            return Resolution::CommandNotFound(program.to_string());
        }

        Resolution::Ready(command)
    }
}

/// Подстановка данных события в шаблон.
///
/// `{0}` - вся строка данных, `{1}`, `{2}`, ... - поля, разделённые запятыми.
/// Плейсхолдеры без соответствующего поля остаются как есть.
///
/// Совместимость: в ранних версиях `{0}` означал первое поле; скрипты,
/// написанные под ту нумерацию, нужно сдвинуть на единицу.
pub fn substitute_placeholders(template: &str, event_data: &str) -> String {
    let mut command = template.replace(WHOLE_DATA_PLACEHOLDER, event_data);

    let fields: SmallVec<[&str; 8]> = event_data.split(',').collect();
    for (i, field) in fields.iter().enumerate() {
        let placeholder = format!("{{{}}}", i + 1);
        command = command.replace(&placeholder, field);
    }

    command
}

/// Первый токен команды, разделённый пробельными символами
pub fn program_name(command: &str) -> Option<&str> {
    command.split_whitespace().next()
}
