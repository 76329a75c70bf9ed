use std::{
    io::{Sink, sink},
    path::PathBuf,
};

use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{
        MakeWriter,
        writer::{EitherWriter, MakeWriterExt as _},
    },
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Initializes `tracing` logging with the filter directives from the environment variable
/// `env`, e.g. `KUBE_PATCH_DIFF_LOG=debug`. Without the variable the maximum level is INFO.
///
/// Logs are written to stderr, so they never mix with a diff printed to stdout. Setting
/// `{env}_DIRECTORY` additionally copies them into a rotated log file in that directory.
pub fn initialize_logging(env: &str, app_name: &str) {
    let filter = EnvFilter::try_from_env(env)
        .unwrap_or_else(|_| EnvFilter::new(tracing::Level::INFO.to_string()));

    let file_appender_directory = std::env::var_os(format!("{env}_DIRECTORY")).map(PathBuf::from);
    let file_appender =
        OptionalMakeWriter::from(file_appender_directory.as_deref().map(|log_dir| {
            RollingFileAppender::builder()
                .filename_suffix(format!("{app_name}.log"))
                .max_log_files(6)
                .build(log_dir)
                .expect("failed to initialize rolling file appender")
        }));

    let fmt = tracing_subscriber::fmt::layer().with_writer(std::io::stderr.and(file_appender));

    if Registry::default().with(filter).with(fmt).try_init().is_err() {
        tracing::debug!("global tracing subscriber already installed, keeping it");
        return;
    }

    // Logging only works once the subscriber is installed
    match file_appender_directory {
        Some(dir) => tracing::info!(directory = %dir.display(), "file logging enabled"),
        None => tracing::debug!("file logging disabled, because no log directory set"),
    }
}

/// Selects between two [`MakeWriter`]s at runtime.
enum EitherMakeWriter<A, B> {
    A(A),
    B(B),
}

impl<'a, A, B> MakeWriter<'a> for EitherMakeWriter<A, B>
where
    A: MakeWriter<'a>,
    B: MakeWriter<'a>,
{
    type Writer = EitherWriter<A::Writer, B::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        match self {
            Self::A(a) => EitherWriter::A(a.make_writer()),
            Self::B(b) => EitherWriter::B(b.make_writer()),
        }
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        match self {
            Self::A(a) => EitherWriter::A(a.make_writer_for(meta)),
            Self::B(b) => EitherWriter::B(b.make_writer_for(meta)),
        }
    }
}

type OptionalMakeWriter<T> = EitherMakeWriter<T, fn() -> Sink>;

impl<T> From<Option<T>> for OptionalMakeWriter<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(t) => Self::A(t),
            None => Self::B(sink),
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing::{debug, error, info};

    // This is a sanity check only, run
    //      KUBE_PATCH_DIFF_TEST_LOG=debug cargo test default_tracing -- --nocapture
    // to see the DEBUG message as well.
    #[test]
    fn default_tracing_level_is_info() {
        super::initialize_logging("KUBE_PATCH_DIFF_TEST_LOG", "test");
        // A second call must not panic
        super::initialize_logging("KUBE_PATCH_DIFF_TEST_LOG", "test");

        error!("ERROR level messages should be seen.");
        info!("INFO level messages should also be seen by default.");
        debug!("DEBUG level messages should be seen only if you set the env var.");
    }
}
