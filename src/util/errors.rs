use std::fmt;
use thiserror::Error;
use tokio::time::Duration;

#[derive(Error, Debug)]
pub enum StdError {
    #[error("JsonSerializationError: {0}")]
    JsonSerializationError(#[source] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("Finalizer Error: {0}")]
    // NB: awkward type because finalizer::Error embeds the reconciler error (which is this)
    // so boxing this error to break cycles
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("MetadataMissing: {0}")]
    MetadataMissing(String),

    #[error("InvalidConfig: {0}")]
    InvalidConfig(String),
}

impl StdError {
    pub fn metric_label(&self) -> String {
        format!("{self:?}").to_lowercase()
    }
}

#[derive(Error, Debug)]
pub struct ErrorWithRequeue {
    pub duration: Duration,
    pub error: StdError,
}

impl ErrorWithRequeue {
    pub fn new(error: StdError, duration: Duration) -> ErrorWithRequeue {
        ErrorWithRequeue { error, duration }
    }

    pub fn metric_label(&self) -> String {
        self.error.metric_label()
    }
}

impl fmt::Display for ErrorWithRequeue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Standard Error: {0}")]
    StdError(#[source] StdError),

    #[error("Error With Requeue: {0}")]
    ErrorWithRequeue(#[source] ErrorWithRequeue),
}

impl Error {
    /// Short label used for the failure metric; the enum name of the innermost error
    pub fn metric_label(&self) -> String {
        match self {
            Error::StdError(e) => short_label(e.metric_label()),
            Error::ErrorWithRequeue(e) => short_label(e.metric_label()),
        }
    }
}

fn short_label(label: String) -> String {
    match label.split_once('(') {
        Some((variant, _)) => variant.to_string(),
        None => label,
    }
}

impl From<kube::Error> for Error {
    fn from(e: kube::Error) -> Self {
        Error::StdError(StdError::KubeError(e))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_label_drops_payload() {
        let err = Error::StdError(StdError::MetadataMissing("namespace".to_string()));
        assert_eq!(err.metric_label(), "metadatamissing");

        let err = Error::ErrorWithRequeue(ErrorWithRequeue::new(
            StdError::InvalidConfig("gitops.ManualSync".to_string()),
            Duration::from_secs(1),
        ));
        assert_eq!(err.metric_label(), "invalidconfig");
    }
}
