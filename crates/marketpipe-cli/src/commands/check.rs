use std::path::Path;

use anyhow::Result;

use marketpipe_core::config::AppConfig;
use marketpipe_core::probe::{self, DEFAULT_DELAY};

/// Execute the `check` command: load the config and probe each external
/// dependency once per two-second window, with a short retry budget so a
/// booting stack still reports accurately.
pub async fn execute(config_path: &Path) -> Result<bool> {
    const CHECK_RETRIES: u32 = 3;

    // 1. Load config
    let config = AppConfig::load(config_path)?;
    println!("Config: OK");

    // 2. Probe each dependency
    let mut all_ok = true;
    for probe in probe::all_probes(&config) {
        let ready = probe::wait_for(probe.as_ref(), CHECK_RETRIES, DEFAULT_DELAY).await;
        println!(
            "{:18} {}",
            format!("{}:", probe.name()),
            if ready { "OK" } else { "FAILED" }
        );
        all_ok &= ready;
    }

    if all_ok {
        println!("\nAll checks passed.");
    }
    Ok(all_ok)
}
