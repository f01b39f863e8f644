use std::mem::size_of;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Context;
use crossbeam_channel::{Receiver, Sender};
#[cfg(feature = "tracing")]
use tracy_client::{frame_mark, plot};

use geostream::buffer::{BackendKind, BufferUsage, HostStorageProvider};
use geostream::fence::SubPassTracker;
use geostream::{
    BufferKey, BufferManager, BufferSpec, DeviceBindingCache, FenceContext, LockMode, Severity,
};

use super::caps::ProducerCaps;
use super::config::DemoConfig;
use super::mesh::{self, Vertex};
use super::messages::{EngineControl, ShutdownPhase, StagedBatch, Submission};

/// What the loader needs to write into the streamed buffer.
pub struct LoaderHandoff {
    pub manager: Arc<Mutex<BufferManager>>,
    pub key: BufferKey,
}

struct FrameBuffers {
    dynamic_vb: BufferKey,
    dynamic_ib: BufferKey,
    quad: BufferKey,
}

/// Owns the rendering context: every buffer is created on this thread.
pub fn producer_thread(
    caps: ProducerCaps,
    config: DemoConfig,
    handoff_tx: Sender<LoaderHandoff>,
    batch_rx: Receiver<StagedBatch>,
    submit_tx: Sender<Submission>,
    control: Arc<EngineControl>,
) -> anyhow::Result<()> {
    let fences = FenceContext::new(caps.timeline.clone(), caps.sub_pass.clone());
    let provider = HostStorageProvider::new(caps.budget.clone());
    let mut manager = BufferManager::new(Box::new(provider), fences);
    let mut cache = DeviceBindingCache::new();

    let buffers = FrameBuffers {
        dynamic_vb: manager.create_buffer(
            BufferSpec::vertices(size_of::<Vertex>(), config.dynamic_vertices)
                .backend(BackendKind::SelfManaged)
                .debug_name("dynamic vb"),
        ),
        dynamic_ib: manager.create_buffer(
            BufferSpec::indices(size_of::<u16>(), config.dynamic_indices)
                .debug_name("dynamic ib"),
        ),
        quad: manager.create_buffer(
            BufferSpec::vertices(size_of::<Vertex>(), 4)
                .usage(BufferUsage::Static)
                .debug_name("static quad"),
        ),
    };
    let streamed = manager.create_buffer(
        BufferSpec::vertices(size_of::<Vertex>(), config.streamed_vertices)
            .debug_name("streamed meshes"),
    );

    manager
        .write(buffers.quad, &mesh::fan(4, 0), LockMode::Discard, &mut cache)
        .context("failed to fill static quad")?;

    let manager = Arc::new(Mutex::new(manager));
    handoff_tx
        .send(LoaderHandoff {
            manager: manager.clone(),
            key: streamed,
        })
        .context("loader is gone")?;

    let mut frame = 0u64;
    while frame < config.frames && !control.reached(ShutdownPhase::StopProducer) {
        let _span = tracing::debug_span!("frame", frame).entered();

        {
            let mut manager = manager
                .lock()
                .map_err(|_| anyhow::anyhow!("buffer manager poisoned"))?;
            record_frame(
                &mut manager,
                &mut cache,
                &buffers,
                &caps,
                &config,
                &batch_rx,
                frame,
            )?;
        }

        let fence = caps.timeline.submit();
        submit_tx
            .send(Submission {
                fence,
                submitted_at: Instant::now(),
                early: false,
            })
            .context("consumer is gone")?;

        #[cfg(feature = "tracing")]
        {
            plot!("submitted fence", fence.0 as f64);
            frame_mark();
        }

        frame += 1;
        if frame % 60 == 0 {
            let stats = manager
                .lock()
                .map_err(|_| anyhow::anyhow!("buffer manager poisoned"))?
                .stats();
            log::info!(
                "Producer: frame {} locks={} discards={} wraps={} stalls={} ({:?}) staged={} early_ends={}",
                frame,
                stats.locks,
                stats.discards,
                stats.wraps,
                stats.stalls,
                stats.stall_time,
                stats.staged_locks,
                stats.early_sub_pass_ends
            );
        }
    }

    log::info!(
        "Producer: {} frames, {} redundant binds skipped",
        frame,
        cache.suppressed_rebinds()
    );
    log::debug!("Producer thread shutting down");
    Ok(())
}

fn record_frame(
    manager: &mut BufferManager,
    cache: &mut DeviceBindingCache,
    buffers: &FrameBuffers,
    caps: &ProducerCaps,
    config: &DemoConfig,
    batch_rx: &Receiver<StagedBatch>,
    frame: u64,
) -> anyhow::Result<()> {
    if frame % config.flush_interval == 0 {
        manager.flush_at_frame_start();
    }
    manager.handle_late_creation()?;

    cache.bind_vertex(1, buffers.quad);

    let (pre_pass, main_pass) = mesh::frame_draws(frame, config.dynamic_vertices);

    caps.sub_pass.begin();
    for (i, &count) in pre_pass.iter().enumerate() {
        draw(manager, cache, buffers, count, (frame as u32).wrapping_add(i as u32))?;
    }
    if caps.sub_pass.is_in_open_sub_pass() {
        caps.sub_pass.end();
    }

    for (i, &count) in main_pass.iter().enumerate() {
        let seed = (frame as u32).wrapping_mul(8).wrapping_add(i as u32);
        draw(manager, cache, buffers, count, seed)?;
    }

    for batch in batch_rx.try_iter() {
        if manager.buffer(batch.key).is_none() {
            continue;
        }
        log::trace!(
            "Producer: drawing asset {} ({} vertices at {})",
            batch.asset_id,
            batch.element_count,
            batch.element_offset
        );
        cache.bind_vertex(0, batch.key);
        manager.mark_bound_used(cache);
    }

    Ok(())
}

fn draw(
    manager: &mut BufferManager,
    cache: &mut DeviceBindingCache,
    buffers: &FrameBuffers,
    count: usize,
    seed: u32,
) -> anyhow::Result<()> {
    let vertices = manager.write(
        buffers.dynamic_vb,
        &mesh::fan(count, seed),
        LockMode::Append,
        cache,
    );
    let indices = manager.write(
        buffers.dynamic_ib,
        &mesh::fan_indices(count),
        LockMode::Append,
        cache,
    );

    match (vertices, indices) {
        (Ok(_), Ok(_)) => {}
        (Err(e), _) | (_, Err(e)) if e.severity() == Severity::ResourceExhaustion => {
            log::warn!("Producer: skipping draw of {} vertices: {}", count, e);
            return Ok(());
        }
        (Err(e), _) | (_, Err(e)) => return Err(e).context("draw failed"),
    }

    cache.bind_vertex(0, buffers.dynamic_vb);
    cache.bind_index(buffers.dynamic_ib);
    manager.mark_bound_used(cache);
    Ok(())
}
