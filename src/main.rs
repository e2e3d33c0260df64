use anyhow::Result;
use tokio::sync::mpsc;

use fluxgate::config::Config;
use fluxgate::engine::DecisionEngine;
use fluxgate::logging::{json_log, obj, v_int, v_str};
use fluxgate::stream::{wire, StreamCommand, StreamConnectionManager};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    cfg.validate()?;

    json_log(
        "main",
        "startup",
        obj(&[
            ("symbol", v_str(&cfg.symbol)),
            ("endpoint", v_str(&cfg.ws_endpoint)),
            ("cycle_secs", v_int(cfg.cycle_secs)),
            ("required_votes", v_int(cfg.required_votes as u64)),
        ]),
    );

    let (event_tx, event_rx) = mpsc::channel(1024);
    let (command_tx, command_rx) = mpsc::channel(16);

    let manager = StreamConnectionManager::new(&cfg, event_tx, command_rx)?;
    command_tx
        .send(StreamCommand::Subscribe(vec![
            wire::stream_name(&cfg.symbol, "trade"),
            wire::stream_name(&cfg.symbol, "bookTicker"),
        ]))
        .await?;
    let stream_task = tokio::spawn(manager.run());

    let mut engine = DecisionEngine::new(&cfg);
    let engine_result = tokio::select! {
        result = engine.run(event_rx) => {
            if let Err(e) = &result {
                json_log("main", "engine_stopped", obj(&[("error", v_str(&e.to_string()))]));
                let _ = command_tx.send(StreamCommand::Disconnect).await;
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            json_log("main", "shutdown_signal", obj(&[]));
            let _ = command_tx.send(StreamCommand::Disconnect).await;
            Ok(())
        }
    };

    match stream_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            json_log("main", "stream_stopped", obj(&[("error", v_str(&e.to_string()))]));
        }
        Err(e) => {
            json_log("main", "stream_task_panicked", obj(&[("error", v_str(&e.to_string()))]));
        }
    }

    json_log(
        "main",
        "shutdown_complete",
        obj(&[("cycles", v_int(engine.cycles_run()))]),
    );
    engine_result
}
