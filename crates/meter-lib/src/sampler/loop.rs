//! Sampling loop
//!
//! Drives a [`SampleSource`] on a fixed interval until shutdown. Failed
//! ticks are logged and skipped; a permanent failure stops the loop without
//! touching the rest of the process.

use super::SampleSource;
use crate::models::UtilizationSample;
use crate::observability::StructuredLogger;
use anyhow::Result;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Configuration for the sampling loop
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Time between ticks (default: 1 second)
    pub interval: Duration,
    /// Channel buffer size for published samples
    pub buffer_size: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            buffer_size: 64,
        }
    }
}

/// Why the loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Shutdown was signalled
    Shutdown,
    /// The source failed permanently and was disabled
    Disabled,
}

/// Outcome of a single tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickOutcome {
    Sampled,
    Skipped,
    Disabled,
}

/// Periodically samples one source and publishes the results
pub struct SamplingLoop {
    source: Box<dyn SampleSource>,
    config: SamplerConfig,
    logger: StructuredLogger,
    /// Channel to publish computed samples
    sample_tx: mpsc::Sender<UtilizationSample>,
    samples: u64,
    skipped: u64,
}

impl SamplingLoop {
    /// Create a new sampling loop
    pub fn new(
        source: Box<dyn SampleSource>,
        config: SamplerConfig,
        logger: StructuredLogger,
    ) -> (Self, mpsc::Receiver<UtilizationSample>) {
        let (sample_tx, sample_rx) = mpsc::channel(config.buffer_size.max(1));

        let loop_instance = Self {
            source,
            config,
            logger,
            sample_tx,
            samples: 0,
            skipped: 0,
        };

        (loop_instance, sample_rx)
    }

    /// Run until shutdown is signalled or the source is disabled
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> LoopExit {
        let kind = self.source.kind();
        info!(
            backend = %kind,
            interval_ms = self.config.interval.as_millis() as u64,
            "Starting sampling loop"
        );

        if let Err(e) = self.source.prime().await {
            if e.is_permanent() {
                self.logger.log_monitoring_disabled(kind, &e);
                return LoopExit::Disabled;
            }
            warn!(backend = %kind, error = %e, "Priming failed, first tick will retry");
        }

        // First tick fires one interval after priming so it has a delta to report
        let mut ticker = interval_at(Instant::now() + self.config.interval, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.tick().await == TickOutcome::Disabled {
                        return LoopExit::Disabled;
                    }

                    let ticks = self.samples + self.skipped;
                    if ticks % 60 == 0 {
                        debug!(
                            backend = %kind,
                            samples = self.samples,
                            skipped = self.skipped,
                            "Sampling progress"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    info!(
                        backend = %kind,
                        samples = self.samples,
                        skipped = self.skipped,
                        "Shutting down sampling loop"
                    );
                    return LoopExit::Shutdown;
                }
            }
        }
    }

    /// Take one sample and report it
    async fn tick(&mut self) -> TickOutcome {
        let kind = self.source.kind();

        match self.source.sample().await {
            Ok(sample) => {
                self.samples += 1;
                self.logger.log_sample(&sample);
                self.publish(sample);
                TickOutcome::Sampled
            }
            Err(e) if e.is_permanent() => {
                self.logger.log_monitoring_disabled(kind, &e);
                TickOutcome::Disabled
            }
            Err(e) => {
                self.skipped += 1;
                self.logger.log_tick_skipped(kind, &e);
                TickOutcome::Skipped
            }
        }
    }

    /// Hand a sample to consumers without ever blocking the loop
    fn publish(&self, sample: UtilizationSample) {
        match self.sample_tx.try_send(sample) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Sample channel full, dropping sample");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("No sample consumer attached");
            }
        }
    }
}

/// Builder for creating the sampling loop
pub struct SamplingLoopBuilder {
    source: Option<Box<dyn SampleSource>>,
    logger: Option<StructuredLogger>,
    config: SamplerConfig,
}

impl SamplingLoopBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            source: None,
            logger: None,
            config: SamplerConfig::default(),
        }
    }

    /// Set the sample source
    pub fn source(mut self, source: Box<dyn SampleSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the structured logger
    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Set the sampling interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Set the buffer size
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    /// Build the sampling loop
    pub fn build(self) -> Result<(SamplingLoop, mpsc::Receiver<UtilizationSample>)> {
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("Sample source is required"))?;
        if self.config.interval.is_zero() {
            anyhow::bail!("Sampling interval must be positive");
        }
        let logger = self
            .logger
            .unwrap_or_else(|| StructuredLogger::new("unknown"));

        Ok(SamplingLoop::new(source, self.config, logger))
    }
}

impl Default for SamplingLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MeterError;
    use crate::models::{CpuUtilization, MemoryUtilization, SourceKind};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Mock source replaying scripted results
    struct ScriptedSource {
        script: VecDeque<crate::error::Result<UtilizationSample>>,
        prime_result: Option<MeterError>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(script: Vec<crate::error::Result<UtilizationSample>>) -> Self {
            Self {
                script: script.into(),
                prime_result: None,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl SampleSource for ScriptedSource {
        fn kind(&self) -> SourceKind {
            SourceKind::Runtime
        }

        async fn prime(&mut self) -> crate::error::Result<()> {
            match self.prime_result.take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        async fn sample(&mut self) -> crate::error::Result<UtilizationSample> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .pop_front()
                .unwrap_or_else(|| Ok(sample_with_cpu(1.0)))
        }
    }

    fn sample_with_cpu(raw: f64) -> UtilizationSample {
        UtilizationSample::new(
            SourceKind::Runtime,
            None,
            CpuUtilization {
                raw_percent: raw,
                effective_percent: raw,
            },
            MemoryUtilization {
                used_mb: 10.0,
                limit_mb: Some(100.0),
                usage_percent: Some(10.0),
            },
        )
    }

    fn transient() -> MeterError {
        MeterError::FetchFailed {
            reason: "connection refused".into(),
        }
    }

    #[test]
    fn test_sampler_config_default() {
        let config = SamplerConfig::default();
        assert_eq!(config.interval, Duration::from_secs(1));
        assert_eq!(config.buffer_size, 64);
    }

    #[test]
    fn test_builder_requires_source() {
        let result = SamplingLoopBuilder::new().build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_rejects_zero_interval() {
        let result = SamplingLoopBuilder::new()
            .source(Box::new(ScriptedSource::new(vec![])))
            .interval(Duration::ZERO)
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_transient_error_skips_tick() {
        let source = ScriptedSource::new(vec![Err(transient()), Ok(sample_with_cpu(42.0))]);
        let (mut sampling_loop, mut rx) = SamplingLoop::new(
            Box::new(source),
            SamplerConfig::default(),
            StructuredLogger::new("test"),
        );

        assert_eq!(sampling_loop.tick().await, TickOutcome::Skipped);
        assert!(rx.try_recv().is_err());

        assert_eq!(sampling_loop.tick().await, TickOutcome::Sampled);
        let sample = rx.try_recv().unwrap();
        assert_eq!(sample.raw_cpu_percent, 42.0);
        assert_eq!(sampling_loop.samples, 1);
        assert_eq!(sampling_loop.skipped, 1);
    }

    #[tokio::test]
    async fn test_permanent_error_disables_loop() {
        let source = ScriptedSource::new(vec![Err(MeterError::EntityNotFound {
            id: "abc".into(),
        })]);
        let calls = source.calls.clone();
        let (sampling_loop, _rx) = SamplingLoopBuilder::new()
            .source(Box::new(source))
            .interval(Duration::from_millis(10))
            .build()
            .unwrap();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let exit = sampling_loop.run(shutdown_rx).await;

        assert_eq!(exit, LoopExit::Disabled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_permanent_prime_failure_never_ticks() {
        let mut source = ScriptedSource::new(vec![]);
        source.prime_result = Some(MeterError::EntityIdMissing {
            var: "HOSTNAME".into(),
        });
        let calls = source.calls.clone();
        let (sampling_loop, _rx) = SamplingLoopBuilder::new()
            .source(Box::new(source))
            .interval(Duration::from_millis(10))
            .build()
            .unwrap();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        assert_eq!(sampling_loop.run(shutdown_rx).await, LoopExit::Disabled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transient_prime_failure_keeps_running() {
        let mut source = ScriptedSource::new(vec![]);
        source.prime_result = Some(transient());
        let (sampling_loop, mut rx) = SamplingLoopBuilder::new()
            .source(Box::new(source))
            .interval(Duration::from_millis(10))
            .build()
            .unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(sampling_loop.run(shutdown_rx));
        let sample = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sample.raw_cpu_percent, 1.0);

        shutdown_tx.send(()).unwrap();
        assert_eq!(handle.await.unwrap(), LoopExit::Shutdown);
    }

    #[tokio::test]
    async fn test_run_publishes_until_shutdown() {
        let source = ScriptedSource::new(vec![
            Ok(sample_with_cpu(5.0)),
            Err(transient()),
            Ok(sample_with_cpu(7.0)),
        ]);
        let (sampling_loop, mut rx) = SamplingLoopBuilder::new()
            .source(Box::new(source))
            .interval(Duration::from_millis(10))
            .logger(StructuredLogger::new("test"))
            .build()
            .unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(sampling_loop.run(shutdown_rx));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.raw_cpu_percent, 5.0);
        assert_eq!(second.raw_cpu_percent, 7.0);

        shutdown_tx.send(()).unwrap();
        let exit = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, LoopExit::Shutdown);
    }

    #[tokio::test]
    async fn test_full_channel_does_not_block() {
        let (mut sampling_loop, _rx) = SamplingLoopBuilder::new()
            .source(Box::new(ScriptedSource::new(vec![])))
            .buffer_size(1)
            .build()
            .unwrap();

        for _ in 0..5 {
            assert_eq!(sampling_loop.tick().await, TickOutcome::Sampled);
        }
        assert_eq!(sampling_loop.samples, 5);
    }
}
