use resources::HasMetadata;
use thiserror::Error;
use tracing::info;

use crate::cluster::{ClusterError, ObjectApi};

/// Creates `desired` if no object of that name is cached, replaces the
/// cached object otherwise.
///
/// # Arguments
/// - `api` - Store to write the object to
/// - `desired` - The freshly built object
/// - `cached` - The object of the same name as last seen by the informer
pub(crate) async fn apply<T, A>(
    api: &A,
    desired: &T,
    cached: Option<&T>,
) -> Result<T, ApplyError>
where
    T: k8s_openapi::Resource + HasMetadata + Send + Sync + 'static,
    A: ObjectApi<T> + ?Sized,
{
    let key = desired.object_key();
    let applied = match cached {
        None => {
            let created = api.create(desired).await?;
            info!("Created {} {key}", T::KIND);
            created
        }
        Some(_) => {
            let updated = api.update(desired).await?;
            info!("Updated {} {key}", T::KIND);
            updated
        }
    };
    Ok(applied)
}

#[derive(Debug, Error)]
pub(crate) enum ApplyError {
    #[error("Error from Kubernetes: {0}")]
    Kubernetes(#[from] ClusterError),
}
