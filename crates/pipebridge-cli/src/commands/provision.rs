use std::path::PathBuf;

use pipebridge_config::BridgeConfig;
use pipebridge_core::PipeProvisioner;

pub fn run(
    config: &BridgeConfig,
    paths: &[PathBuf],
    fresh: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let provisioner = PipeProvisioner::new(config.pipes.mode.bits());
    let mut failed = 0;

    for path in paths {
        let result = if fresh {
            provisioner.create_fresh(path)
        } else {
            provisioner.ensure(path)
        };
        match result {
            Ok(()) => println!("Provisioned {}", path.display()),
            Err(e) => {
                eprintln!("Failed {}: {}", path.display(), e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(format!("{} of {} pipe(s) not provisioned", failed, paths.len()).into());
    }
    Ok(())
}
