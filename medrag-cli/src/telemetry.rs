use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. Logs go to stderr so answers on stdout
/// stay clean for piping.
///
/// `RUST_LOG` wins unless `verbose` is set, which forces `debug`.
pub fn init(verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
