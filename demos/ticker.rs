use daemonlib::{ConfFile, Daemon};
use signal_hook::consts::signal::*;
use signal_hook::flag;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logging goes to stderr; the daemon's stderr ends up in the log file.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_ansi(false)
        .init();

    let pwd = env::current_dir()?;
    let conf_path = pwd.join("ticker.conf");

    // First run: write a default conf file next to us.
    let mut conf = if conf_path.exists() {
        ConfFile::read(&conf_path)?
    } else {
        ConfFile::new()
    };
    if conf.get("pid_file").is_none() {
        conf.set("pid_file", pwd.join("ticker.pid").to_string_lossy().as_bytes())?;
        conf.set("log_file", pwd.join("ticker.log").to_string_lossy().as_bytes())?;
        conf.set("interval", "3")?;
        conf.write(&conf_path)?;
    }

    let interval = conf
        .get_str("interval")
        .and_then(|v| v.parse().ok())
        .unwrap_or(3);

    println!("Launching the ticker daemon...");
    let handle = Daemon::from_conf("ticker", &conf).build()?.start()?;

    // Only the daemon process gets here.
    let term = Arc::new(AtomicBool::new(false));
    flag::register(SIGTERM, Arc::clone(&term))?;
    flag::register(SIGINT, Arc::clone(&term))?;

    tracing::info!(
        pid = std::process::id(),
        pid_file = %handle.lock().path().display(),
        "ticker started"
    );

    let mut tick = 0u64;
    while !term.load(Ordering::Relaxed) {
        tracing::info!(tick, "ping");
        tick += 1;
        thread::sleep(Duration::from_secs(interval));
    }

    tracing::info!("stop signal received, shutting down");
    Ok(())
}
