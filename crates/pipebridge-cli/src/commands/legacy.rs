use pipebridge_config::BridgeConfig;
use pipebridge_core::Bridge;

pub fn run(config: BridgeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let bridge = Bridge::from_config(config)?;
    let pool = bridge
        .legacy_pool()
        .ok_or("Legacy pool is disabled. Set legacy.enabled and legacy.paths in the config")?;

    let failures = pool.provision_all();
    for path in pool.paths() {
        match failures.iter().find(|(failed, _)| failed == path) {
            Some((_, err)) => println!("  FAILED  {}  {}", path.display(), err),
            None => println!("  ok      {}", path.display()),
        }
    }

    if !failures.is_empty() {
        return Err(format!(
            "{} of {} legacy pipe(s) not provisioned",
            failures.len(),
            pool.paths().len()
        )
        .into());
    }
    Ok(())
}
