/// Errors ending the operator process
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Wrapper for Kubernetes error
    #[error("Kubernetes reported error: {0}")]
    KubeError(#[from] kube::Error),
    /// Invalid or unparsable settings
    #[error("Invalid configuration: {0}")]
    Config(#[from] envconfig::Error),
    /// A stop signal handler could not be installed
    #[error("Failed to listen for stop signals: {0}")]
    Signal(#[from] std::io::Error),
}
