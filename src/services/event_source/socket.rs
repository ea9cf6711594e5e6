use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::UnixStream;
use tracing::{info, warn};

use crate::error::Result;
use crate::hyde_error;
use crate::services::event_handler::HandleOutcome;
use crate::services::EventHandler;
use crate::trace_if_enabled;

use super::EventSourceTrait;

const INSTANCE_SIGNATURE_VAR: &str = "HYPRLAND_INSTANCE_SIGNATURE";
const RUNTIME_DIR_VAR: &str = "XDG_RUNTIME_DIR";

/// Строки длиннее этого предела пропускаются целиком
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Результат чтения одной строки из сокета
#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Line,
    Oversized,
    Eof,
}

/// Прочитать строку (вместе с `\n`) в `buf`, не больше `MAX_LINE_LEN` байт.
///
/// Хвост слишком длинной строки дочитывается и выбрасывается порциями,
/// буфер при этом не растёт сверх предела.
async fn read_event_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let read = (&mut *reader)
        .take(MAX_LINE_LEN as u64)
        .read_until(b'\n', buf)
        .await?;

    if read == 0 {
        return Ok(LineRead::Eof);
    }
    if read < MAX_LINE_LEN || buf.last() == Some(&b'\n') {
        return Ok(LineRead::Line);
    }

    loop {
        buf.clear();
        let read = (&mut *reader)
            .take(MAX_LINE_LEN as u64)
            .read_until(b'\n', buf)
            .await?;
        if read == 0 || buf.last() == Some(&b'\n') {
            buf.clear();
            return Ok(LineRead::Oversized);
        }
    }
}

/// Путь к сокету событий Hyprland
pub fn socket_path(runtime_dir: &Path, instance_signature: &str) -> PathBuf {
    runtime_dir
        .join("hypr")
        .join(instance_signature)
        .join(".socket2.sock")
}

/// Путь к сокету из окружения; без обеих переменных работать нельзя
pub fn socket_path_from_env() -> Result<PathBuf> {
    let signature = env::var(INSTANCE_SIGNATURE_VAR)
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| hyde_error!(missing_env, "{}", INSTANCE_SIGNATURE_VAR))?;

    let runtime_dir = env::var_os(RUNTIME_DIR_VAR)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| hyde_error!(missing_env, "{}", RUNTIME_DIR_VAR))?;

    Ok(socket_path(Path::new(&runtime_dir), &signature))
}

/// Чтение событий из сокета socket2 построчно
pub struct SocketEventSource {
    handler: Arc<EventHandler>,
    socket_path: PathBuf,
    stream: UnixStream,
}

impl SocketEventSource {
    pub async fn connect(handler: Arc<EventHandler>, socket_path: PathBuf) -> Result<Self> {
        let stream = UnixStream::connect(&socket_path).await.map_err(|e| {
            hyde_error!(
                service_unavailable,
                "Не удалось подключиться к сокету {:?}: {}",
                socket_path,
                e
            )
        })?;

        info!("Подключено к сокету Hyprland: {:?}", socket_path);

        Ok(Self {
            handler,
            socket_path,
            stream,
        })
    }

    async fn run_impl(self) -> Result<()> {
        info!("Ожидание событий...");

        let mut reader = BufReader::new(self.stream);
        let mut buf = Vec::with_capacity(1024);
        let mut received: u64 = 0;

        loop {
            match read_event_line(&mut reader, &mut buf).await? {
                LineRead::Eof => break,
                LineRead::Oversized => {
                    warn!("Пропущена строка длиннее {} байт", MAX_LINE_LEN);
                    continue;
                }
                LineRead::Line => {}
            }

            received += 1;
            // Невалидный UTF-8 заменяется, а не обрывает чтение
            let line = String::from_utf8_lossy(&buf);
            let outcome = self.handler.handle_line(&line);
            if outcome == HandleOutcome::Malformed {
                trace_if_enabled!("Пропущена строка без разделителя: {}", line.trim_end());
            }
        }

        warn!(
            "Сокет {:?} закрыт после {} событий",
            self.socket_path, received
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl EventSourceTrait for SocketEventSource {
    async fn run(self: Box<Self>) -> Result<()> {
        (*self).run_impl().await
    }
}
