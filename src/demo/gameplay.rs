use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

use super::config::DemoConfig;
use super::messages::{EngineControl, LoadComplete, LoadRequest, ShutdownPhase};

pub fn gameplay_thread(
    config: DemoConfig,
    load_tx: Sender<LoadRequest>,
    complete_rx: Receiver<LoadComplete>,
    control: Arc<EngineControl>,
) -> anyhow::Result<()> {
    let mut next_asset = 0u32;
    let mut in_flight = 0usize;

    while !control.reached(ShutdownPhase::StopGameplay) {
        if in_flight < 4 {
            let vertex_count = 128 + (next_asset as usize * 197) % 896;
            if load_tx
                .send(LoadRequest {
                    asset_id: next_asset,
                    vertex_count,
                })
                .is_err()
            {
                break;
            }
            next_asset += 1;
            in_flight += 1;
        }

        for msg in complete_rx.try_iter() {
            log::debug!("Gameplay: load complete {}", msg.asset_id);
            in_flight = in_flight.saturating_sub(1);
        }

        std::thread::sleep(config.load_interval);
    }

    log::debug!("Gameplay Thread shutting down ({} assets requested)", next_asset);

    Ok(())
}
