use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Instant;

use anyhow::Context;
use crossbeam_channel::{Sender, unbounded};

use geostream::buffer::MemoryBudget;
use geostream::fence::{SubPassState, Timeline};

use super::caps::{ConsumerCaps, ProducerCaps};
use super::config::DemoConfig;
use super::consumer::consumer_thread;
use super::gameplay::gameplay_thread;
use super::loader::loader_thread;
use super::messages::{EngineControl, ShutdownPhase, Submission};
use super::producer::producer_thread;

/// Failures are reported to the watchdog as they happen and still returned
/// through the join handle.
type ThreadHandle = thread::JoinHandle<anyhow::Result<()>>;

pub struct Engine {
    control: Arc<EngineControl>,
    timeline: Arc<Timeline>,
    gameplay: Option<ThreadHandle>,
    loader: Option<ThreadHandle>,
    producer: Option<ThreadHandle>,
    consumer: Option<ThreadHandle>,
}

fn spawn_named<F>(
    name: &str,
    error_tx: &mpsc::Sender<(String, String)>,
    body: F,
) -> anyhow::Result<ThreadHandle>
where
    F: FnOnce() -> anyhow::Result<()> + Send + 'static,
{
    let error_tx = error_tx.clone();
    let thread_name = name.to_string();
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let result = body();
            if let Err(e) = &result {
                let _ = error_tx.send((thread_name, format!("{:?}", e)));
            }
            result
        })
        .with_context(|| format!("failed to spawn {} thread", name))
}

/// Submits the work recorded so far when a ring ends the sub-pass early.
fn early_end_submitter(timeline: Arc<Timeline>, submit_tx: Sender<Submission>) -> SubPassState {
    SubPassState::new().with_early_end_hook(move |epoch| {
        let fence = timeline.submit();
        log::debug!("SubPass: {:?} submitted early as {}", epoch, fence);
        let _ = submit_tx.send(Submission {
            fence,
            submitted_at: Instant::now(),
            early: true,
        });
    })
}

impl Engine {
    pub fn new(config: DemoConfig) -> anyhow::Result<Self> {
        let (load_tx, load_rx) = unbounded();
        let (complete_tx, complete_rx) = unbounded();
        let (batch_tx, batch_rx) = unbounded();
        let (handoff_tx, handoff_rx) = unbounded();
        let (submit_tx, submit_rx) = unbounded();

        let control = Arc::new(EngineControl::default());
        let timeline = Arc::new(Timeline::new());

        let producer_caps = ProducerCaps {
            timeline: timeline.clone(),
            sub_pass: Arc::new(early_end_submitter(timeline.clone(), submit_tx.clone())),
            budget: MemoryBudget::with_limit(config.memory_budget),
        };
        let consumer_caps = ConsumerCaps {
            timeline: timeline.clone(),
        };

        let (error_tx, error_rx) = mpsc::channel::<(String, String)>();

        let consumer_handle = {
            let control = control.clone();
            let latency = config.consumer_latency;
            spawn_named("consumer", &error_tx, move || {
                consumer_thread(consumer_caps, latency, submit_rx, control)
            })?
        };

        let producer_handle = {
            let control = control.clone();
            let config = config.clone();
            spawn_named("producer", &error_tx, move || {
                producer_thread(
                    producer_caps,
                    config,
                    handoff_tx,
                    batch_rx,
                    submit_tx,
                    control,
                )
            })?
        };

        let loader_handle = {
            let control = control.clone();
            spawn_named("loader", &error_tx, move || {
                loader_thread(handoff_rx, load_rx, batch_tx, complete_tx, control)
            })?
        };

        let gameplay_handle = {
            let control = control.clone();
            spawn_named("gameplay", &error_tx, move || {
                gameplay_thread(config, load_tx, complete_rx, control)
            })?
        };

        let _watchdog = {
            thread::Builder::new()
                .name("thread_watchdog".to_string())
                .spawn(move || {
                    for (name, e) in error_rx {
                        log::error!("Thread {} failed: {}", name, e);
                    }
                })?
        };

        Ok(Self {
            control,
            timeline,
            gameplay: Some(gameplay_handle),
            loader: Some(loader_handle),
            producer: Some(producer_handle),
            consumer: Some(consumer_handle),
        })
    }

    /// Blocks until the producer has recorded every frame, returning its
    /// failure if it stopped early.
    pub fn run(&mut self) -> anyhow::Result<()> {
        if let Some(handle) = self.producer.take() {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("producer thread panicked"))?
                .context("producer thread failed")?;
        }
        log::info!(
            "Engine: consumer caught up to {} of {}",
            self.timeline.completed(),
            self.timeline.last_submitted()
        );
        Ok(())
    }

    pub fn shutdown(&mut self) -> anyhow::Result<()> {
        self.control.advance(ShutdownPhase::StopGameplay);
        if let Some(handle) = self.gameplay.take() {
            handle.join().ok();
        }

        self.control.advance(ShutdownPhase::StopLoader);
        if let Some(handle) = self.loader.take() {
            handle.join().ok();
        }

        self.control.advance(ShutdownPhase::StopProducer);
        if let Some(handle) = self.producer.take() {
            handle.join().ok();
        }

        self.control.advance(ShutdownPhase::StopConsumer);
        if let Some(handle) = self.consumer.take() {
            handle.join().ok();
        }

        Ok(())
    }
}
