use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use geostream::{LockMode, Severity};

use super::mesh;
use super::messages::{EngineControl, LoadComplete, LoadRequest, ShutdownPhase, StagedBatch};
use super::producer::LoaderHandoff;

/// Writes streamed meshes from outside the rendering context; every write
/// lands in a staging buffer until the producer's next late creation.
pub fn loader_thread(
    handoff_rx: Receiver<LoaderHandoff>,
    load_rx: Receiver<LoadRequest>,
    batch_tx: Sender<StagedBatch>,
    complete_tx: Sender<LoadComplete>,
    control: Arc<EngineControl>,
) -> anyhow::Result<()> {
    let handoff = handoff_rx
        .recv()
        .context("producer exited before handing over the buffer manager")?;

    while !control.reached(ShutdownPhase::StopLoader) {
        let request = match load_rx.recv_timeout(Duration::from_millis(10)) {
            Ok(request) => request,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let vertices = mesh::fan(request.vertex_count, request.asset_id);
        let written = {
            let mut manager = handoff
                .manager
                .lock()
                .map_err(|_| anyhow::anyhow!("buffer manager poisoned"))?;
            let Some(region) = manager.buffer_mut(handoff.key) else {
                anyhow::bail!("streamed buffer was destroyed");
            };
            region.write(&vertices, LockMode::Append)
        };

        match written {
            Ok(result) => {
                log::debug!(
                    "Loader: staged asset {} ({} vertices at {})",
                    request.asset_id,
                    result.element_count,
                    result.element_offset
                );
                let _ = batch_tx.send(StagedBatch {
                    asset_id: request.asset_id,
                    key: handoff.key,
                    element_offset: result.element_offset,
                    element_count: result.element_count,
                });
            }
            Err(e) if e.severity() == Severity::ResourceExhaustion => {
                log::warn!("Loader: dropping asset {}: {}", request.asset_id, e);
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to stage asset {}", request.asset_id));
            }
        }

        let _ = complete_tx.send(LoadComplete {
            asset_id: request.asset_id,
        });
    }
    log::debug!("Loader thread shutting down");

    Ok(())
}
