use std::fmt;

/// Разделитель имени события и данных в протоколе socket2
pub const EVENT_DELIMITER: &str = ">>";

/// Событие композитора, разобранное из одной строки сокета
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub name: String,
    pub data: String,
}

impl EventRecord {
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Разбор строки вида `<имя>>><данные>`.
    ///
    /// Делится по первому вхождению `>>`, данные могут содержать `>>` дальше.
    /// Строка без разделителя считается повреждённой и возвращает `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (name, data) = line.split_once(EVENT_DELIMITER)?;
        Some(Self::new(name, data))
    }

    /// Поля данных, разделённые запятыми
    #[cfg(test)]
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.data.split(',')
    }
}

impl fmt::Display for EventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.name, EVENT_DELIMITER, self.data)
    }
}
