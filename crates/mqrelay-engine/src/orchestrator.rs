//! Relay orchestrator: builds endpoints from validated configuration,
//! wires the completion queue and quit signal, and runs the controller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mqrelay_types::EngineError;

use crate::broker::{BrokerSink, BrokerSource};
use crate::config::{EndpointConfig, RelayConfig};
use crate::controller::{Controller, EngineOptions};
use crate::dirq::{DirQueueSink, DirQueueSource};
use crate::endpoint::{completion_queue, CompletionSender, Sink, Source};
use crate::pidfile::PidFile;
use crate::result::RunResult;
use crate::transform::{self, Transform};

fn build_source(config: &RelayConfig) -> Result<Box<dyn Source>, EngineError> {
    let EndpointConfig { broker, queue } = &config.incoming;
    if let Some(broker) = broker {
        return Ok(Box::new(BrokerSource::new(
            broker.uri.clone(),
            broker.auth.clone(),
            broker.subscriptions.clone(),
            config.reliable,
            config.effective_prefetch(),
            config.timeout_connect(),
        )));
    }
    if let Some(queue) = queue {
        return Ok(Box::new(DirQueueSource::new(
            &queue.path,
            config.remove,
            config.loop_rescan,
        )));
    }
    Err(EngineError::config("no incoming endpoint configured"))
}

fn build_sink(
    config: &RelayConfig,
    completions: CompletionSender,
) -> Result<Box<dyn Sink>, EngineError> {
    let EndpointConfig { broker, queue } = &config.outgoing;
    if let Some(broker) = broker {
        return Ok(Box::new(BrokerSink::new(
            broker.uri.clone(),
            broker.auth.clone(),
            config.reliable,
            config.timeout_connect(),
            completions,
        )));
    }
    if let Some(queue) = queue {
        return Ok(Box::new(DirQueueSink::new(&queue.path, completions)));
    }
    Err(EngineError::config("no outgoing endpoint configured"))
}

fn build_transform(config: &RelayConfig) -> Result<Box<dyn Transform>, EngineError> {
    let Some(spec) = &config.transform else {
        return Ok(Box::new(transform::Identity));
    };
    let mut built = transform::by_name(&spec.name)?;
    built.start(&spec.data)?;
    Ok(built)
}

fn engine_options(config: &RelayConfig) -> EngineOptions {
    EngineOptions {
        window: config.window,
        count: config.count,
        duration: config.duration.map(Duration::from_secs),
        timeout_inactivity: config.timeout_inactivity.map(Duration::from_secs),
        timeout_linger: config.timeout_linger(),
        lazy: config.lazy,
        statistics: config.statistics,
    }
}

/// Build and run the relay described by an already-validated config.
///
/// # Errors
///
/// Config-category errors are raised before the pipeline starts; any
/// other error is a fatal runtime failure after start.
pub async fn run_relay(config: &RelayConfig) -> Result<RunResult, EngineError> {
    let (completion_tx, completion_rx) = completion_queue();

    let source = build_source(config)?;
    let sink = build_sink(config, completion_tx)?;
    let transform = build_transform(config)?;

    let quit = Arc::new(AtomicBool::new(false));
    {
        let quit = quit.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, requesting quit");
                quit.store(true, Ordering::SeqCst);
            }
        });
    }

    let mut controller = Controller::new(source, sink, transform, completion_rx, engine_options(config))
        .with_quit_flag(quit);
    if let Some(path) = &config.pidfile {
        controller = controller.with_pidfile(PidFile::create(path)?);
    }

    controller.run().await
}
