use etl::error::EtlError;
use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;

/// Returns whether terminal output should include backtraces.
fn should_render_backtrace() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_deref(),
        Ok("1") | Ok("full")
    )
}

pub type ReplicatorResult<T> = Result<T, ReplicatorError>;

/// Backtrace captured when a non-pipeline error is created.
pub struct CapturedBacktrace(Backtrace);

impl CapturedBacktrace {
    fn capture() -> Self {
        Self(Backtrace::capture())
    }
}

impl fmt::Debug for CapturedBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type for the replicator service.
///
/// Wraps [`EtlError`] for connection and pipeline errors and adds variants for the process
/// around it.
#[derive(Debug, thiserror::Error)]
pub enum ReplicatorError {
    #[error(transparent)]
    Etl(#[from] EtlError),
    #[error("configuration error: {0}")]
    Config(#[source] Box<dyn Error + Send + Sync>, CapturedBacktrace),
    #[error("i/o error: {0}")]
    Io(#[source] std::io::Error, CapturedBacktrace),
}

impl ReplicatorError {
    /// Returns a short category label for this error.
    pub fn category(&self) -> &'static str {
        match self {
            ReplicatorError::Etl(_) => "replicator error",
            ReplicatorError::Config(_, _) => "configuration error",
            ReplicatorError::Io(_, _) => "i/o error",
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            ReplicatorError::Etl(err) => err.backtrace(),
            ReplicatorError::Config(_, captured) | ReplicatorError::Io(_, captured) => {
                Some(&captured.0)
            }
        }
    }

    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        ReplicatorError::Config(Box::new(err), CapturedBacktrace::capture())
    }

    /// Returns a user-oriented report for terminal output.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        out.push_str("replicator failed\n");
        out.push_str(&format!("category: {}\n", self.category()));
        out.push_str(&format!("error: {self}\n"));

        // Aggregated pipeline errors already list every cause in their display.
        if !matches!(self, ReplicatorError::Etl(err) if err.kinds().len() > 1) {
            let mut source = Error::source(self);
            let mut idx = 1usize;
            while let Some(err) = source {
                out.push_str(&format!("cause {idx}: {err}\n"));
                source = err.source();
                idx += 1;
            }
        }

        if should_render_backtrace()
            && let Some(backtrace) = self.backtrace()
        {
            out.push_str("backtrace:\n");
            out.push_str(&backtrace.to_string());
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }

        out
    }
}

impl From<std::io::Error> for ReplicatorError {
    fn from(err: std::io::Error) -> Self {
        ReplicatorError::Io(err, CapturedBacktrace::capture())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etl::error::ErrorKind;

    #[test]
    fn report_lists_category_and_causes() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "replicator.yaml");
        let err = ReplicatorError::config(io);

        let report = err.render_report();

        assert!(report.starts_with("replicator failed\n"));
        assert!(report.contains("category: configuration error\n"));
        assert!(report.contains("cause 1: replicator.yaml\n"));
    }

    #[test]
    fn pipeline_errors_keep_their_kind() {
        let err: ReplicatorError =
            EtlError::from((ErrorKind::DestinationIndexSetupFailed, "Index creation failed"))
                .into();

        assert_eq!(err.category(), "replicator error");
        assert!(err.render_report().contains("Index creation failed"));
    }
}
