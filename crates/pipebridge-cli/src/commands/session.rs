use std::path::PathBuf;

use pipebridge_config::BridgeConfig;
use pipebridge_core::{Bridge, Direction, SessionState, VirtualPath};
use tracing::{info, warn};

/// Run one session in the foreground until it ends or Ctrl-C closes it.
///
/// The pipe path goes to stdout first so a script can hand it to the peer.
pub async fn run(
    config: BridgeConfig,
    direction: Direction,
    path: &str,
    pipe: Option<PathBuf>,
    legacy: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let bridge = Bridge::from_config(config)?;
    let virtual_path = VirtualPath::new(path);

    let session = if legacy {
        for (fixed, err) in bridge.provision_legacy()? {
            warn!(path = %fixed.display(), error = %err, "legacy pipe unavailable");
        }
        bridge.create_legacy_session(virtual_path, direction)?
    } else {
        bridge.create_session(virtual_path, direction, pipe)?
    };

    println!("{}", session.pipe_path().display());
    bridge.start(&session)?;

    let state = tokio::select! {
        state = session.wait() => state,
        _ = tokio::signal::ctrl_c() => {
            info!(session = %session.id(), "interrupted, closing session");
            bridge.close(&session);
            session.wait().await
        }
    };

    match state {
        SessionState::Closed => {
            let info = session.info();
            let elapsed = match (info.started_at, info.finished_at) {
                (Some(start), Some(end)) => (end - start).num_milliseconds(),
                _ => 0,
            };
            eprintln!(
                "{} {}: {} bytes in {} ms",
                direction, info.virtual_path, info.bytes, elapsed
            );
            Ok(())
        }
        _ => {
            let reason = session
                .failure()
                .map(|e| e.to_string())
                .unwrap_or_else(|| format!("session ended in state {}", state));
            Err(reason.into())
        }
    }
}
