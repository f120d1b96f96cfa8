use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::MakeWriter;

/// Tees formatted log lines into a broadcast channel so the `/logs` SSE
/// endpoint can mirror the process log, while still writing to stdout.
#[derive(Clone)]
pub(crate) struct BroadcastMakeWriter {
    pub sender: tokio::sync::broadcast::Sender<String>,
}

impl<'a> MakeWriter<'a> for BroadcastMakeWriter {
    type Writer = BroadcastWriter;

    fn make_writer(&'a self) -> Self::Writer {
        BroadcastWriter {
            sender: self.sender.clone(),
        }
    }
}

pub(crate) struct BroadcastWriter {
    sender: tokio::sync::broadcast::Sender<String>,
}

impl std::io::Write for BroadcastWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let line = String::from_utf8_lossy(buf).to_string();
        let _ = self.sender.send(line); // Ignored if no receivers
        std::io::stdout().write(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stdout().flush()
    }
}

/// Install the global subscriber. Later calls are no-ops, which keeps
/// repeated `serve` invocations in one process from panicking.
pub(crate) fn init(level: &str, sender: tokio::sync::broadcast::Sender<String>) {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(BroadcastMakeWriter { sender })
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}
