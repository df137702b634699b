use std::{
    io::{self, Write},
    path::Path,
};

use env_logger::{Builder, Env, Target};
use tokio::{
    fs::{create_dir_all, metadata, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
};

use crate::{
    config,
    core::{
        error::{ErrorContext, OrchestratorResult},
        traits::ShutdownWatch,
    },
};

pub struct AsyncWriter {
    sender: UnboundedSender<Vec<u8>>,
}

impl Write for AsyncWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let data = buf.to_vec();
        self.sender
            .send(data)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct Logger {
    sender: UnboundedSender<Vec<u8>>,
    receiver: UnboundedReceiver<Vec<u8>>,
    config: config::Log,
}

impl Logger {
    pub fn new(config: config::Log) -> Self {
        let (sender, receiver) = unbounded_channel::<Vec<u8>>();
        Self {
            sender,
            receiver,
            config,
        }
    }

    fn create_async_writer(&self) -> AsyncWriter {
        AsyncWriter {
            sender: self.sender.clone(),
        }
    }

    /// Whether records go to a file that [`run`](Self::run) must drain
    pub fn writes_to_file(&self) -> bool {
        self.config.path.is_some()
    }

    /// Install the global logger. `RUST_LOG` overrides the configured level.
    pub fn init_env_logger(&self) -> OrchestratorResult<()> {
        let mut builder = Builder::new();
        builder
            .filter_level(self.config.level_filter())
            .parse_env(Env::default());

        if self.writes_to_file() {
            builder.target(Target::Pipe(Box::new(self.create_async_writer())));
        }

        builder.try_init().with_context("Failed to install logger")
    }

    /// Drain buffered records into the log file until shutdown.
    pub async fn run(mut self, mut shutdown: ShutdownWatch) -> OrchestratorResult<()> {
        let Some(log_file_path) = self.config.path.clone() else {
            return Ok(());
        };

        if let Some(parent) = Path::new(&log_file_path).parent() {
            if metadata(parent).await.is_err() {
                create_dir_all(parent)
                    .await
                    .with_context("Failed to create log path")?;
            }
        }

        let mut file = BufWriter::new(
            OpenOptions::new()
                .append(true)
                .create(true)
                .open(&log_file_path)
                .await
                .with_context("Failed to open or create log file")?,
        );

        loop {
            tokio::select! {
                biased;
                // Shutdown signal handling
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        log::info!("Shutdown signal received, stopping write log");
                        break;
                    }
                },

                data = self.receiver.recv() => {
                    match data {
                        Some(data) => {
                            if let Err(e) = file.write_all(&data).await {
                                eprintln!("Failed to write to log file: {e}");
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        // Keep what was logged before the signal
        self.receiver.close();
        while let Some(data) = self.receiver.recv().await {
            if let Err(e) = file.write_all(&data).await {
                eprintln!("Failed to write to log file: {e}");
            }
        }

        file.flush().await.with_context("Failed to flush log file")
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::watch;

    use super::*;

    #[tokio::test]
    async fn test_run_drains_records_to_file() {
        let dir = std::env::temp_dir().join(format!("componix-log-{}", std::process::id()));
        let path = dir.join("nested").join("app.log");
        let logger = Logger::new(config::Log {
            path: Some(path.to_string_lossy().into_owned()),
            ..config::Log::default()
        });
        assert!(logger.writes_to_file());

        let mut writer = logger.create_async_writer();
        writer.write_all(b"first line\n").unwrap();
        writer.write_all(b"second line\n").unwrap();

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        logger.run(rx).await.unwrap();

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(written, "first line\nsecond line\n");
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_run_without_path_is_noop() {
        let logger = Logger::new(config::Log::default());
        assert!(!logger.writes_to_file());
        let (_tx, rx) = watch::channel(false);
        logger.run(rx).await.unwrap();
    }
}
