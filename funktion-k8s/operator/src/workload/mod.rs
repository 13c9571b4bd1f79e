//! Writes of derived Deployments and Services to the cluster.
mod apply;
mod destroy;

pub(crate) use apply::{apply, ApplyError};
pub(crate) use destroy::{destroy_deployment, destroy_service, DestroyError, TeardownPolicy};
