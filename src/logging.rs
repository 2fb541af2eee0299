use tracing::level_filters::LevelFilter;
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;

/// Log level for the given verbosity: `INFO`, or `TRACE` with `--verbose`.
pub fn level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    }
}

/// Formatted subscriber writing to `writer`.
pub fn subscriber<W>(verbose: bool, writer: W) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_max_level(level(verbose))
        .with_writer(writer)
        .with_target(false)
        .finish()
}

/// Install the global subscriber, logging to stderr.
pub fn init(verbose: bool) {
    let _ = tracing::subscriber::set_global_default(subscriber(verbose, std::io::stderr));
    tracing::debug!("Log level: {}", level(verbose));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from_verbosity() {
        assert_eq!(level(false), LevelFilter::INFO);
        assert_eq!(level(true), LevelFilter::TRACE);
    }
}
