use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, Duration};
use tracing::{debug, info};

use crate::{Device, DeviceTable};

pub const HOST_DEVICE_ID: &str = "hx";

const LED_COMMANDS: [&str; 2] = ["1", "0"];
const BUZ_COMMANDS: [&str; 2] = ["8a", "3f"];

/// A simulated attached device backed by real host telemetry. It reports a
/// cyclic `cpu` / `mem` / `tmp` stream, answers the help protocol, and lets
/// actuations perturb the temperature wave so experiments have an observable
/// consequence.
pub async fn start_host_device(
    table: Arc<Mutex<DeviceTable>>,
    lines: mpsc::Sender<(String, String)>,
    interval_ms: u64,
) {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<String>(32);
    {
        let mut guard = table.lock().await;
        guard.register(Device::new(HOST_DEVICE_ID, '<', '>', cmd_tx));
    }
    info!(device = HOST_DEVICE_ID, "host.device_attached");

    let mut system = System::new_with_specifics(
        RefreshKind::new()
            .with_cpu(CpuRefreshKind::everything())
            .with_memory(MemoryRefreshKind::everything()),
    );
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let mut tick: f32 = 0.0;
    let mut boost: f32 = 0.0;

    loop {
        tokio::select! {
            _ = sleep(Duration::from_millis(interval_ms)) => {
                system.refresh_cpu_usage();
                system.refresh_memory();

                let cpu_usage = system.global_cpu_info().cpu_usage().clamp(0.0, 100.0);
                let total_memory = system.total_memory() as f32;
                let free_memory = if total_memory > 0.0 {
                    system.available_memory() as f32 / total_memory
                } else {
                    0.0
                };
                let temp_wave =
                    (tick / 10.0).sin() * 0.25 + 0.5 + rng.gen_range(-0.05..0.05) + boost;
                boost *= 0.9;
                tick += 1.0;

                let readings = [
                    format!("cpu>{}", cpu_usage as u32),
                    format!("mem>{}", (free_memory.clamp(0.0, 1.0) * 99.0) as u32),
                    format!("tmp>{}", (temp_wave.clamp(0.0, 1.0) * 99.0) as u32),
                ];
                for reading in readings {
                    if lines.send((HOST_DEVICE_ID.to_string(), reading)).await.is_err() {
                        return;
                    }
                }
            }
            command = cmd_rx.recv() => {
                let Some(command) = command else { return };
                match respond(&command, &mut rng) {
                    HostResponse::Help(line) => {
                        if lines.send((HOST_DEVICE_ID.to_string(), line)).await.is_err() {
                            return;
                        }
                    }
                    HostResponse::Actuated => {
                        // any actuation nudges the thermal wave for a while
                        boost += 0.3;
                        info!(device = HOST_DEVICE_ID, command = %command, "host.actuated");
                    }
                    HostResponse::Ignored => {
                        debug!(device = HOST_DEVICE_ID, command = %command, "host.ignored");
                    }
                }
            }
        }
    }
}

enum HostResponse {
    Help(String),
    Actuated,
    Ignored,
}

fn respond(command: &str, rng: &mut impl Rng) -> HostResponse {
    match command {
        "?" => HostResponse::Help("?<led|buz".to_string()),
        "?<led" => HostResponse::Help(format!(
            "?<led>{}",
            LED_COMMANDS[rng.gen_range(0..LED_COMMANDS.len())]
        )),
        "?<buz" => HostResponse::Help(format!(
            "?<buz>{}",
            BUZ_COMMANDS[rng.gen_range(0..BUZ_COMMANDS.len())]
        )),
        other if other.starts_with("led<") || other.starts_with("buz<") => HostResponse::Actuated,
        _ => HostResponse::Ignored,
    }
}
