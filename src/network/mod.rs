//! Network service module
//!
//! This module owns the UDP listener and wires it to the GPS time source.

mod connection;

pub use self::connection::{ListenerStats, RequestListener};

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::core::{Config, Error, Result, SerialConfig};
use crate::protocol::Responder;
use crate::time::{GpsTimeSource, ReferenceClock, SentenceReader, SerialLink, SourceStats};

/// A running GPS-disciplined NTP server: one serial source, one listener
pub struct TimeServer<R: SentenceReader + 'static = SerialLink> {
    clock: Arc<ReferenceClock>,
    source: GpsTimeSource<R>,
    listener: RequestListener,
}

impl TimeServer<SerialLink> {
    /// Validates `config`, opens the serial device and binds the socket.
    ///
    /// Any failure here is fatal; nothing has been started yet.
    pub async fn start(config: Config) -> Result<Self> {
        Self::assemble(config, SerialLink::open)
    }
}

impl<R: SentenceReader + 'static> TimeServer<R> {
    /// Like [`TimeServer::start`], reading sentences from `reader` instead of a serial port
    pub async fn with_reader(config: Config, reader: R) -> Result<Self> {
        Self::assemble(config, move |_| Ok(reader))
    }

    fn assemble<F>(config: Config, open: F) -> Result<Self>
    where
        F: FnOnce(&SerialConfig) -> Result<R>,
    {
        config.validate()?;

        let clock = Arc::new(ReferenceClock::new(config.clock));
        let responder = Responder::new(clock.clone(), &config.ntp);

        let reader = open(&config.serial)?;
        let listener =
            RequestListener::bind(config.ntp.bind_addr, responder, config.ntp.max_in_flight)?;
        let source = GpsTimeSource::new(reader, clock.clone(), config.serial);

        Ok(TimeServer { clock, source, listener })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// The shared reference clock
    pub fn clock(&self) -> Arc<ReferenceClock> {
        self.clock.clone()
    }

    /// Request counters of the listener
    pub fn listener_stats(&self) -> Arc<ListenerStats> {
        self.listener.stats()
    }

    /// Serves time until `shutdown` is cancelled or either half stops.
    ///
    /// The serial source runs on the blocking pool; the listener runs on the runtime.
    pub async fn run(self, shutdown: CancellationToken) -> Result<SourceStats> {
        let TimeServer { mut source, listener, .. } = self;
        let source_token = shutdown.child_token();
        let listener_token = shutdown.child_token();

        let mut source_task = tokio::task::spawn_blocking({
            let token = source_token.clone();
            move || source.run(&token)
        });
        let mut listener_task = tokio::spawn(listener.run(listener_token.clone()));

        let (source_result, listener_result) = tokio::select! {
            result = &mut source_task => {
                listener_token.cancel();
                (result, listener_task.await)
            }
            result = &mut listener_task => {
                source_token.cancel();
                (source_task.await, result)
            }
        };

        let stats = source_result
            .map_err(|e| Error::serial(format!("serial source task failed: {}", e)))?;
        match listener_result {
            Ok(result) => result?,
            Err(e) => {
                error!(error = %e, "NTP listener task failed");
                return Err(Error::network(format!("listener task failed: {}", e)));
            }
        }

        info!(published = stats.published, "Time server stopped");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::time::Duration;

    /// Never produces data
    struct Quiet;

    impl SentenceReader for Quiet {
        fn read_line(&mut self, _buf: &mut String) -> io::Result<usize> {
            std::thread::sleep(Duration::from_millis(5));
            Err(io::ErrorKind::TimedOut.into())
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.ntp.bind_addr = "127.0.0.1:0".parse().unwrap();
        config
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_io() {
        let mut config = test_config();
        config.serial.error_bound = -1.0;
        assert!(matches!(
            TimeServer::with_reader(config, Quiet).await,
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_serial_device_is_fatal() {
        let mut config = test_config();
        config.serial.device = "/dev/gps-ntp-test-does-not-exist".to_string();
        assert!(matches!(TimeServer::start(config).await, Err(Error::SerialIo(_))));
    }

    #[tokio::test]
    async fn test_run_and_shutdown() {
        let server = TimeServer::with_reader(test_config(), Quiet).await.unwrap();
        assert_ne!(server.local_addr().port(), 0);
        assert_eq!(server.clock().generation(), 0);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(server.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        let stats = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(stats.published, 0);
    }
}
