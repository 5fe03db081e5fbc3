use thiserror::Error;

/// Error taxonomy for the reconcile engine.
///
/// `ParseError` and `ClusterError` are scoped to a single resource and are
/// meant to be caught and logged by the driver without aborting the tick;
/// `ConfigError` is fatal and only ever surfaces during startup.
#[derive(Debug, Error)]
pub enum DownscalerError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse {field} for {resource}: {detail}")]
    Parse {
        resource: String,
        field: &'static str,
        detail: String,
    },

    #[error("cluster operation failed for {resource}: {source}")]
    Cluster {
        resource: String,
        #[source]
        source: kube::Error,
    },
}

pub type Result<T> = std::result::Result<T, DownscalerError>;
