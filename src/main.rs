use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use may::coroutine;
use may::sync::mpsc;
use tracing::{debug, error, info};

use wirehound::alert::{AlertConfig, AlertDetector};
use wirehound::cancel::CancelToken;
use wirehound::dispatcher::{Dispatcher, DispatcherConfig};
use wirehound::routes::{top_n_requests, RequestCounter};
use wirehound::runtime_config::RuntimeConfig;
use wirehound::sniff;
use wirehound::view::{AlertLog, Dashboard};

/// HTTP traffic monitor for unix systems.
#[derive(Parser, Debug)]
#[command(name = "wirehound", version, about)]
struct Cli {
    /// Alerting threshold: HTTP requests allowed per 2 minute span
    #[arg(long, default_value_t = 100)]
    alert_threshold: u64,

    /// Number of top requested URL slugs to display
    #[arg(long, default_value_t = 10)]
    top_n_reqs: usize,

    /// BPF filter forwarded to the capture layer
    #[arg(long, default_value = "tcp port 80")]
    bpf: String,

    /// Logging verbosity (tracing env-filter syntax)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Logging destination: "stderr", a file path, or unset to disable
    #[arg(long)]
    log_sink: Option<String>,

    /// Interface to tap (repeatable); defaults to every capturable interface
    #[arg(long)]
    iface: Vec<String>,

    /// Run without the dashboard, logging snapshots only
    #[arg(long, default_value_t = false)]
    headless: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(&cli.log_level, cli.log_sink.as_deref())?;

    let runtime = RuntimeConfig::from_env();
    may::config().set_stack_size(runtime.stack_size);

    let cancel = CancelToken::new();
    #[cfg(unix)]
    watch_signals(cancel.clone())?;

    // Alerting pipeline: detector, counter, and the notification drain that
    // feeds both the logs and the dashboard's alert panel.
    let (notify_tx, notify_rx) = mpsc::channel();
    let detector = Arc::new(AlertDetector::new(
        cancel.clone(),
        AlertConfig {
            upper_limit: cli.alert_threshold,
            ..AlertConfig::default()
        },
        notify_tx,
    ));
    let counter = Arc::new(RequestCounter::new());

    let alerts: AlertLog = Arc::new(Mutex::new(Vec::new()));
    {
        let alerts = Arc::clone(&alerts);
        unsafe {
            coroutine::spawn(move || {
                for notification in notify_rx.iter() {
                    info!(%notification, "alert notification");
                    alerts
                        .lock()
                        .expect("alert log lock poisoned")
                        .push(notification.to_string());
                }
            });
        }
    }

    let dispatcher = Arc::new(Dispatcher::new(
        DispatcherConfig::from_env(),
        Arc::clone(&detector),
        Arc::clone(&counter),
        cancel.clone(),
    ));

    spawn_snapshot_logger(Arc::clone(&counter), cli.top_n_reqs, cancel.clone());

    // One capture thread per interface. A failed interface is logged and
    // skipped; zero usable interfaces is fatal.
    let ifaces = if cli.iface.is_empty() {
        sniff::detect_interfaces().context("unable to detect network interfaces")?
    } else {
        cli.iface.clone()
    };
    let mut capture_threads = Vec::new();
    for iface in &ifaces {
        match sniff::open_capture(iface, &cli.bpf, sniff::DEFAULT_SNAPLEN) {
            Ok(capture) => {
                info!(iface = %iface, bpf = %cli.bpf, "starting capture");
                let cancel = cancel.clone();
                let dispatcher = Arc::clone(&dispatcher);
                let iface = iface.clone();
                let handle = thread::Builder::new()
                    .name(format!("capture-{iface}"))
                    .spawn(move || sniff::run_capture(cancel, capture, iface, dispatcher))
                    .context("unable to spawn capture thread")?;
                capture_threads.push(handle);
            }
            Err(e) => error!(iface = %iface, error = %e, "skipping interface"),
        }
    }
    if capture_threads.is_empty() {
        bail!("no interface could be opened for capture (missing CAP_NET_RAW / root?)");
    }

    if cli.headless {
        info!("running headless; send SIGINT to stop");
        while !cancel.is_cancelled() {
            thread::sleep(Duration::from_millis(200));
        }
    } else {
        let dashboard = Dashboard {
            detector: Arc::clone(&detector),
            counter: Arc::clone(&counter),
            alerts,
            top_n: cli.top_n_reqs,
            cancel: cancel.clone(),
        };
        dashboard.run()?;
        // Quitting the dashboard shuts the whole process down.
        cancel.cancel();
    }

    for handle in capture_threads {
        let _ = handle.join();
    }
    info!("shutdown complete");
    Ok(())
}

/// Configure tracing per `--log-level` / `--log-sink`. Unset sink disables
/// logging entirely (the dashboard owns the terminal). The returned guard
/// must stay alive for the non-blocking file writer to flush.
fn init_logging(
    level: &str,
    sink: Option<&str>,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(sink) = sink else {
        return Ok(None);
    };
    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .with_context(|| format!("invalid log level {level:?}"))?;
    if sink == "stderr" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        Ok(None)
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(sink)
            .with_context(|| format!("unable to open {sink:?} for logging"))?;
        let (writer, guard) = tracing_appender::non_blocking(file);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Ok(Some(guard))
    }
}

/// Cancel everything on the standard termination signals.
#[cfg(unix)]
fn watch_signals(cancel: CancelToken) -> anyhow::Result<()> {
    use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGHUP, SIGTERM, SIGQUIT])
        .context("unable to install signal handlers")?;
    thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            info!(signal, "caught shutdown signal");
            cancel.cancel();
        }
    });
    Ok(())
}

/// Every 10 s, serialize the current top-N ranking into the debug log.
fn spawn_snapshot_logger(counter: Arc<RequestCounter>, top_n: usize, cancel: CancelToken) {
    unsafe {
        coroutine::spawn(move || loop {
            // Sleep in 1 s steps so shutdown stays prompt.
            for _ in 0..10 {
                coroutine::sleep(Duration::from_secs(1));
                if cancel.is_cancelled() {
                    return;
                }
            }
            let ranked = top_n_requests(&counter.export(), top_n);
            match serde_json::to_string(&ranked) {
                Ok(json) => debug!(top = %json, "top requested slugs"),
                Err(e) => debug!(error = %e, "unable to serialize top slugs"),
            }
        });
    }
}
