pub mod path_lookup;

pub use path_lookup::find_executable;

// ✅ Макросы условного логирования для оптимизации производительности
#[macro_export]
macro_rules! debug_if_enabled {
    ($($arg:tt)*) => {
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! trace_if_enabled {
    ($($arg:tt)*) => {
        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!($($arg)*);
        }
    };
}

/// Обрезать строку до `max_chars` символов, добавив `...`
pub fn limit_string(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_string() {
        assert_eq!(limit_string("short", 10), "short");
        assert_eq!(limit_string("exactly10!", 10), "exactly10!");
        assert_eq!(limit_string("hello world", 5), "hello...");
        // Не режем посреди многобайтового символа
        assert_eq!(limit_string("привет мир", 6), "привет...");
    }
}
