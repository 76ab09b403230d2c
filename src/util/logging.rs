use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber for the server process.
///
/// Pipeline stages log generated SQL, rejections, row counts and history ids
/// under their module targets, so `RUST_LOG=txt2sql::sql=debug` narrows
/// output to one stage. Without `RUST_LOG` everything at `info` is shown.
/// `--log-json` emits one JSON object per line for log shippers.
pub fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(false);

    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
