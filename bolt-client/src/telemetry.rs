//! Where log output goes. The binary and the integration tests both set up
//! tracing through [`TelemetryConfig`].

use std::io::{IsTerminal as _, Write as _};

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter,
};

#[derive(Debug)]
pub struct TelemetryConfig {
    syslog_identifier: Option<String>,
    filter: EnvFilter,
}

impl TelemetryConfig {
    /// `RUST_LOG` wins if set, otherwise `INFO` and above is kept.
    #[expect(clippy::new_without_default, reason = "may add required args later")]
    #[must_use]
    pub fn new() -> Self {
        Self {
            syslog_identifier: None,
            filter: EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        }
    }

    /// Send events to the journal, tagged with `syslog_identifier`. Interactive
    /// runs keep writing to stderr.
    #[must_use]
    pub fn with_journald(self, syslog_identifier: &str) -> Self {
        Self {
            syslog_identifier: Some(syslog_identifier.to_owned()),
            ..self
        }
    }

    pub fn try_init(
        self,
    ) -> Result<TelemetryFlusher, tracing_subscriber::util::TryInitError> {
        let interactive = std::io::stderr().is_terminal();
        let journald = self
            .syslog_identifier
            .filter(|_| !interactive)
            .and_then(|identifier| match tracing_journald::layer() {
                Ok(layer) => Some(layer.with_syslog_identifier(identifier)),
                Err(err) => {
                    eprintln!("journald unavailable, logging to stderr: {err}");
                    None
                }
            });
        let stderr = journald
            .is_none()
            .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

        tracing_subscriber::registry()
            .with(stderr)
            .with(journald)
            .with(self.filter)
            .try_init()?;

        Ok(TelemetryFlusher { _priv: () })
    }

    /// # Panics
    ///
    /// If a global subscriber is already installed.
    pub fn init(self) -> TelemetryFlusher {
        self.try_init()
            .expect("failed to initialize bolt-client telemetry")
    }
}

/// Hold on to this until the program exits.
#[must_use = "call .flush before exiting so buffered output is written"]
pub struct TelemetryFlusher {
    _priv: (),
}

impl TelemetryFlusher {
    pub async fn flush(self) {
        std::io::stderr().flush().ok();
        std::io::stdout().flush().ok();
    }
}
