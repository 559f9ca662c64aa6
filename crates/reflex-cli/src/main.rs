use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{info, warn};

use reflex_core::{
    run_loop, timestamp_ms, Brain, BrainConfig, DeviceProfile, Directive, MemorySnapshot,
};
use reflex_device::host::start_host_device;
use reflex_device::DeviceTable;
use reflex_net::{publish_event, ws_server::start_ws_server};
use reflex_store::MemoryStore;

enum SaveRequest {
    Memory(MemorySnapshot),
    Devices(Vec<DeviceProfile>),
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let mut args = std::env::args().skip(1);
    let mut store_path: Option<PathBuf> = None;
    let mut ws_port: u16 = 8199;
    let mut config = BrainConfig::default();
    let mut host_sensors = true;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--store" => {
                let Some(path) = args.next() else {
                    return Err(anyhow!("--store requires a path"));
                };
                store_path = Some(PathBuf::from(path));
            }
            "--ws-port" => {
                let Some(value) = args.next() else {
                    return Err(anyhow!("--ws-port requires a port"));
                };
                ws_port = value
                    .parse::<u16>()
                    .map_err(|_| anyhow!("--ws-port expects a valid port, got {value}"))?;
            }
            "--mem-size" => {
                let Some(value) = args.next() else {
                    return Err(anyhow!("--mem-size requires a number"));
                };
                config.mem_size = value
                    .parse::<usize>()
                    .map_err(|_| anyhow!("--mem-size expects a number, got {value}"))?;
                if config.mem_size < 16 {
                    return Err(anyhow!("--mem-size must be at least 16"));
                }
            }
            "--tick-ms" => {
                let Some(value) = args.next() else {
                    return Err(anyhow!("--tick-ms requires milliseconds"));
                };
                config.tick_ms = value
                    .parse::<u64>()
                    .map_err(|_| anyhow!("--tick-ms expects milliseconds, got {value}"))?;
                if config.tick_ms == 0 {
                    return Err(anyhow!("--tick-ms must be greater than zero"));
                }
            }
            "--no-host-sensors" => host_sensors = false,
            other => return Err(anyhow!("unknown argument: {other}")),
        }
    }

    let store = match store_path {
        Some(path) => Some(MemoryStore::open(&path)?),
        None => None,
    };

    let brain = Arc::new(Mutex::new(Brain::new(config.clone())));
    let table = Arc::new(Mutex::new(DeviceTable::new()));

    let (line_tx, mut line_rx) = mpsc::channel::<(String, String)>(128);
    let (reading_tx, mut reading_rx) = mpsc::channel::<String>(128);
    let (directive_tx, mut directive_rx) = mpsc::channel::<Directive>(64);
    let (save_tx, mut save_rx) = mpsc::channel::<SaveRequest>(16);
    let (profiles_tx, profiles_rx) = watch::channel::<Vec<DeviceProfile>>(Vec::new());

    if host_sensors {
        tokio::spawn(start_host_device(
            table.clone(),
            line_tx.clone(),
            config.tick_ms,
        ));
    }

    {
        let listen_addr = format!("127.0.0.1:{ws_port}");
        let brain_for_ws = brain.clone();
        let table_for_ws = table.clone();
        let log_addr = listen_addr.clone();
        tokio::spawn(async move {
            if let Err(err) = start_ws_server(brain_for_ws, table_for_ws, &listen_addr).await {
                eprintln!("websocket server error: {err}");
            }
        });
        info!(addr = %log_addr, "cli.ws_spawned");
    }

    // raw device lines -> capability ledger or tagged readings
    let table_for_lines = table.clone();
    let reading_tx_for_lines = reading_tx.clone();
    tokio::spawn(async move {
        while let Some((device_id, line)) = line_rx.recv().await {
            let (reading, profiles) = {
                let mut guard = table_for_lines.lock().await;
                let reading = guard
                    .get_mut(&device_id)
                    .and_then(|device| device.ingest(&line));
                (reading, guard.profiles())
            };
            profiles_tx.send_replace(profiles);
            if let Some(reading) = reading {
                if reading_tx_for_lines.send(reading).await.is_err() {
                    break;
                }
            }
        }
    });

    // the single consumer that serializes every reading against memory
    let brain_for_readings = brain.clone();
    let directive_tx_for_readings = directive_tx.clone();
    let save_tx_for_readings = save_tx.clone();
    tokio::spawn(async move {
        while let Some(raw) = reading_rx.recv().await {
            let now_ms = timestamp_ms();
            let (outcome, snapshot) = {
                let mut guard = brain_for_readings.lock().await;
                let outcome = guard.handle_reading(&raw, now_ms);
                let snapshot = match outcome {
                    Some(ref o) if o.persist => Some(guard.memory_snapshot()),
                    _ => None,
                };
                (outcome, snapshot)
            };
            let Some(outcome) = outcome else { continue };
            if outcome.update.surprise() {
                println!(
                    "SURPRISE src={} payload={} expected={} deviation={:.2}",
                    outcome.update.source,
                    outcome.update.payload,
                    outcome.update.expected.as_deref().unwrap_or("-"),
                    outcome.update.deviation
                );
                publish_event(json!({
                    "ev": "surprise",
                    "meta": {
                        "source": outcome.update.source,
                        "payload": outcome.update.payload,
                        "expected": outcome.update.expected,
                        "deviation": outcome.update.deviation,
                        "input": outcome.input,
                    }
                }));
            }
            if let Some(action) = outcome.reaction {
                println!("REACTION {}", action);
                if directive_tx_for_readings
                    .send(Directive::Dispatch { action })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            if let Some(snapshot) = snapshot {
                let _ = save_tx_for_readings.try_send(SaveRequest::Memory(snapshot));
            }
        }
    });

    // directives fan out to the device table
    let table_for_directives = table.clone();
    tokio::spawn(async move {
        while let Some(directive) = directive_rx.recv().await {
            match directive {
                Directive::Dispatch { action } => {
                    let result = {
                        let guard = table_for_directives.lock().await;
                        guard.dispatch(&action).await
                    };
                    match result {
                        Ok(()) => {
                            println!("ACTION {}", action);
                            publish_event(json!({"ev": "action", "meta": {"action": action}}));
                        }
                        Err(err) => warn!(error = %err, "cli.dispatch_skipped"),
                    }
                }
                Directive::Query { device, payload } => {
                    let result = {
                        let guard = table_for_directives.lock().await;
                        guard.query(&device, &payload).await
                    };
                    match result {
                        Ok(()) => println!("QUERY {} {}", device, payload),
                        Err(err) => warn!(error = %err, "cli.query_skipped"),
                    }
                }
            }
        }
    });

    // one task owns the store, so saves never interleave
    tokio::spawn(async move {
        while let Some(request) = save_rx.recv().await {
            let Some(ref store) = store else { continue };
            let result = match request {
                SaveRequest::Memory(snapshot) => store.save_memory(&snapshot),
                SaveRequest::Devices(profiles) => store.save_devices(&profiles),
            };
            if let Err(err) = result {
                warn!(error = %err, "cli.save_failed");
            }
        }
    });

    // the reflection loop shares the brain lock and never overlaps itself
    let loop_brain = brain.clone();
    let directive_tx_for_loop = directive_tx.clone();
    let save_tx_for_loop = save_tx.clone();
    let profiles_for_loop = profiles_rx.clone();
    let profiles_for_metrics = profiles_rx.clone();
    tokio::spawn(async move {
        run_loop(
            loop_brain,
            config.tick_ms,
            move || profiles_for_loop.borrow().clone(),
            move |directive| {
                if directive_tx_for_loop.try_send(directive.clone()).is_err() {
                    warn!("cli.directive_channel_full");
                }
            },
            move |stats| {
                println!(
                    "METRICS actions={} outputs={} surprises={} reactions={} experiments={}",
                    stats.known_actions,
                    stats.reaction_outputs,
                    stats.surprises,
                    stats.reactions,
                    stats.experiments
                );
                if let Ok(meta) = serde_json::to_value(stats) {
                    publish_event(json!({"ev": "metrics", "meta": meta}));
                }
                let profiles = profiles_for_metrics.borrow().clone();
                let _ = save_tx_for_loop.try_send(SaveRequest::Devices(profiles));
            },
        )
        .await;
    });

    // operator console: raw readings, direct actions, inspection commands
    let brain_for_cli = brain.clone();
    let table_for_cli = table.clone();
    let reading_tx_for_cli = reading_tx.clone();
    let directive_tx_for_cli = directive_tx.clone();
    let save_tx_for_cli = save_tx.clone();
    let separator_out = config.separator_out;
    let separator_in = config.separator_in;
    let input_task = tokio::spawn(async move {
        let stdin = BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(rest) = trimmed.strip_prefix(':') {
                match rest {
                    "memory" => {
                        let snapshot = {
                            let guard = brain_for_cli.lock().await;
                            guard.memory_snapshot()
                        };
                        match serde_json::to_string_pretty(&snapshot) {
                            Ok(rendered) => println!("{rendered}"),
                            Err(err) => eprintln!("failed to render memory: {err}"),
                        }
                    }
                    "devices" => {
                        let profiles = {
                            let guard = table_for_cli.lock().await;
                            guard.profiles()
                        };
                        match serde_json::to_string_pretty(&profiles) {
                            Ok(rendered) => println!("{rendered}"),
                            Err(err) => eprintln!("failed to render devices: {err}"),
                        }
                    }
                    "stats" => {
                        let stats = {
                            let guard = brain_for_cli.lock().await;
                            guard.memory_stats()
                        };
                        println!(
                            "STATS actions={} outputs={} surprises={} reactions={} experiments={}",
                            stats.known_actions,
                            stats.reaction_outputs,
                            stats.surprises,
                            stats.reactions,
                            stats.experiments
                        );
                    }
                    "save" => {
                        let snapshot = {
                            let guard = brain_for_cli.lock().await;
                            guard.memory_snapshot()
                        };
                        if save_tx_for_cli
                            .send(SaveRequest::Memory(snapshot))
                            .await
                            .is_err()
                        {
                            eprintln!("save channel closed");
                        } else {
                            println!("SAVE queued");
                        }
                    }
                    "clear" => {
                        let mut guard = brain_for_cli.lock().await;
                        guard.cycle.clear();
                        println!("CLEARED sensor cycle");
                    }
                    other => eprintln!("Unknown command: :{other}"),
                }
                continue;
            }
            if trimmed.contains(separator_out) {
                // operator-injected reading, e.g. `one>1`
                if reading_tx_for_cli.send(trimmed.to_string()).await.is_err() {
                    break;
                }
                continue;
            }
            if trimmed.contains(separator_in) && trimmed.contains('.') {
                // operator-injected action, e.g. `hx.led<1`
                {
                    let mut guard = brain_for_cli.lock().await;
                    guard.observe_action(trimmed, timestamp_ms());
                }
                if directive_tx_for_cli
                    .send(Directive::Dispatch {
                        action: trimmed.to_string(),
                    })
                    .await
                    .is_err()
                {
                    break;
                }
                continue;
            }
            eprintln!("usage: <src>{separator_out}<payload> | <dev>.<pin>{separator_in}<data> | :memory :devices :stats :save :clear");
        }
    });

    input_task.await?;
    Ok(())
}
