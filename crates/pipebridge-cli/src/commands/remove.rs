use std::path::PathBuf;

use pipebridge_config::BridgeConfig;
use pipebridge_core::PipeProvisioner;

pub fn run(config: &BridgeConfig, paths: &[PathBuf]) -> Result<(), Box<dyn std::error::Error>> {
    let provisioner = PipeProvisioner::new(config.pipes.mode.bits());
    let mut failed = 0;

    for path in paths {
        match provisioner.remove(path) {
            Ok(()) => println!("Removed {}", path.display()),
            Err(e) => {
                eprintln!("Failed {}: {}", path.display(), e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(format!("{} of {} pipe(s) not removed", failed, paths.len()).into());
    }
    Ok(())
}
