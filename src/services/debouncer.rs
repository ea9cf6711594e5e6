use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::trace_if_enabled;

/// События о смене состояния, которые нельзя терять
pub const UNDEBOUNCED_EVENTS: [&str; 2] = ["urgent", "closewindow"];

/// Записи старше этого возраста удаляются при очистке
pub const STALE_AFTER: Duration = Duration::from_secs(10);

/// Очистка запускается примерно в одном вызове из `EVICTION_ODDS`
const EVICTION_ODDS: u32 = 100;

/// Ограничитель частоты по имени события.
///
/// Окно отсчитывается от первого принятого события: подавленные повторы
/// не сдвигают отметку времени, поэтому поток дубликатов не может держать
/// окно закрытым бесконечно.
pub struct Debouncer {
    state: Mutex<DebounceState>,
}

struct DebounceState {
    window: Duration,
    last_seen: HashMap<String, Instant>,
}

impl DebounceState {
    fn evict_stale(&mut self, now: Instant) -> usize {
        let before = self.last_seen.len();
        self.last_seen
            .retain(|_, last| now.saturating_duration_since(*last) <= STALE_AFTER);
        before - self.last_seen.len()
    }
}

pub fn is_undebounced(event_name: &str) -> bool {
    UNDEBOUNCED_EVENTS.iter().any(|name| *name == event_name)
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            state: Mutex::new(DebounceState {
                window,
                last_seen: HashMap::new(),
            }),
        }
    }

    /// `true` - событие нужно отбросить.
    ///
    /// При `false` время `now` запоминается как последнее принятие события.
    /// Проверка и обновление выполняются под одной блокировкой.
    pub fn should_suppress(&self, event_name: &str, now: Instant) -> bool {
        if is_undebounced(event_name) {
            return false;
        }

        let mut state = self.state.lock();

        let suppressed = match state.last_seen.get(event_name) {
            Some(last) => now.saturating_duration_since(*last) < state.window,
            None => false,
        };

        if !suppressed {
            state.last_seen.insert(event_name.to_string(), now);
        }

        if rand::thread_rng().gen_ratio(1, EVICTION_ODDS) {
            let evicted = state.evict_stale(now);
            trace_if_enabled!("Дебаунс: удалено {} устаревших записей", evicted);
        }

        suppressed
    }

    /// Удалить записи старше `STALE_AFTER`, вернуть их количество
    #[cfg(test)]
    pub fn evict_stale(&self, now: Instant) -> usize {
        self.state.lock().evict_stale(now)
    }

    /// Сбросить всё состояние и принять новое окно (после перезагрузки конфигурации)
    pub fn reset(&self, window: Duration) {
        let mut state = self.state.lock();
        state.window = window;
        state.last_seen.clear();
    }

    #[cfg(test)]
    pub fn window(&self) -> Duration {
        self.state.lock().window
    }

    #[cfg(test)]
    pub fn tracked_events(&self) -> usize {
        self.state.lock().last_seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(100);
    const EPSILON: Duration = Duration::from_millis(1);

    #[test]
    fn test_window_boundaries() {
        let debouncer = Debouncer::new(WINDOW);
        let t0 = Instant::now();

        assert!(!debouncer.should_suppress("workspace", t0));
        assert!(debouncer.should_suppress("workspace", t0 + WINDOW - EPSILON));
        assert!(!debouncer.should_suppress("workspace", t0 + WINDOW + EPSILON));
    }

    #[test]
    fn test_window_reopens_exactly_at_boundary() {
        let debouncer = Debouncer::new(WINDOW);
        let t0 = Instant::now();

        assert!(!debouncer.should_suppress("workspace", t0));
        assert!(!debouncer.should_suppress("workspace", t0 + WINDOW));
    }

    #[test]
    fn test_flood_does_not_slide_window() {
        let debouncer = Debouncer::new(WINDOW);
        let t0 = Instant::now();

        assert!(!debouncer.should_suppress("activewindow", t0));
        for ms in [20, 40, 60, 80, 99] {
            assert!(debouncer.should_suppress("activewindow", t0 + Duration::from_millis(ms)));
        }
        // Отсчёт от t0, а не от последнего подавленного события
        assert!(!debouncer.should_suppress("activewindow", t0 + Duration::from_millis(101)));
    }

    #[test]
    fn test_critical_events_never_suppressed() {
        let debouncer = Debouncer::new(Duration::from_secs(60));
        let t0 = Instant::now();

        for name in UNDEBOUNCED_EVENTS {
            for _ in 0..5 {
                assert!(!debouncer.should_suppress(name, t0));
            }
        }
        assert_eq!(debouncer.tracked_events(), 0);
    }

    #[test]
    fn test_events_are_independent() {
        let debouncer = Debouncer::new(WINDOW);
        let t0 = Instant::now();

        assert!(!debouncer.should_suppress("workspace", t0));
        assert!(!debouncer.should_suppress("activewindow", t0));
        assert!(debouncer.should_suppress("workspace", t0 + EPSILON));
    }

    #[test]
    fn test_zero_window_never_suppresses() {
        let debouncer = Debouncer::new(Duration::ZERO);
        let t0 = Instant::now();

        assert!(!debouncer.should_suppress("workspace", t0));
        assert!(!debouncer.should_suppress("workspace", t0));
    }

    #[test]
    fn test_evict_stale_entries() {
        let debouncer = Debouncer::new(WINDOW);
        let t0 = Instant::now();

        debouncer.should_suppress("old", t0);
        debouncer.should_suppress("fresh", t0 + Duration::from_secs(8));

        let evicted = debouncer.evict_stale(t0 + STALE_AFTER + Duration::from_secs(1));
        assert_eq!(evicted, 1);
        assert_eq!(debouncer.tracked_events(), 1);
    }

    #[test]
    fn test_reset_clears_state() {
        let debouncer = Debouncer::new(Duration::from_secs(60));
        let t0 = Instant::now();

        assert!(!debouncer.should_suppress("workspace", t0));
        assert!(debouncer.should_suppress("workspace", t0 + EPSILON));

        debouncer.reset(Duration::from_millis(500));

        assert_eq!(debouncer.window(), Duration::from_millis(500));
        assert!(!debouncer.should_suppress("workspace", t0 + EPSILON * 2));
    }

    #[test]
    fn test_concurrent_callers_accept_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let debouncer = Arc::new(Debouncer::new(Duration::from_secs(60)));
        let accepted = Arc::new(AtomicUsize::new(0));
        let now = Instant::now();

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let debouncer = Arc::clone(&debouncer);
                let accepted = Arc::clone(&accepted);
                std::thread::spawn(move || {
                    if !debouncer.should_suppress("workspace", now) {
                        accepted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }
}
