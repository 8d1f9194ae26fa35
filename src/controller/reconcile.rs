use std::sync::Arc;

use tracing::{debug, info};

use super::deployment::{is_owned_by, new_deployment};
use super::{Controller, Error};
use crate::cache::split_key;
use crate::crd::ProgrammerStatus;
use crate::recorder::EventType;

pub const REASON_SYNCED: &str = "Synced";
pub const REASON_RESOURCE_EXISTS: &str = "ErrResourceExists";
const MESSAGE_SYNCED: &str = "Programmer synced successfully";

impl Controller {
    /// Drive the Deployment of the Programmer `key` toward its spec and
    /// report the Deployment's availability back.
    pub(crate) async fn reconcile(&self, key: &str) -> Result<(), Error> {
        let (namespace, name) = split_key(key).map_err(|source| Error::InvalidKey {
            key: key.to_string(),
            source,
        })?;

        let Some(programmer) = self.programmers.get(namespace, name) else {
            // deleted, the Deployment is garbage collected through its
            // owner reference
            debug!(message = "programmer is gone", key);
            return Ok(());
        };

        let deployment_name = programmer.spec.deployment_name.as_str();
        if deployment_name.is_empty() {
            return Err(Error::InvalidSpec {
                key: key.to_string(),
            });
        }

        let deployment = match self.deployments.get(namespace, deployment_name) {
            Some(deployment) => deployment,
            None => {
                info!(message = "create deployment", key, deployment = deployment_name);

                let desired = new_deployment(&programmer, &self.registry)?;
                match self.deployment_api.create(namespace, &desired).await {
                    Ok(created) => Arc::new(created),
                    // the informer hasn't delivered it yet
                    Err(err) if err.is_already_exists() => {
                        return Err(Error::NotCached {
                            name: deployment_name.to_string(),
                        });
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        };

        if !is_owned_by(&deployment, &programmer) {
            let err = Error::Conflict {
                name: deployment.metadata.name.clone(),
            };
            self.recorder.event(
                programmer.as_ref(),
                EventType::Warning,
                REASON_RESOURCE_EXISTS,
                err.to_string(),
            );

            return Err(err);
        }

        let deployment = match programmer.spec.replicas {
            Some(replicas) if deployment.spec.replicas != Some(replicas) => {
                info!(
                    message = "update deployment replicas",
                    key,
                    deployment = deployment_name,
                    desired = replicas,
                    actual = ?deployment.spec.replicas,
                );

                // the whole spec is replaced, not only the replicas
                let desired = new_deployment(&programmer, &self.registry)?;
                Arc::new(self.deployment_api.update(namespace, &desired).await?)
            }
            _ => deployment,
        };

        let available = deployment.available_replicas();
        if programmer.available_replicas() != Some(available) {
            let mut updated = programmer.as_ref().clone();
            updated.status = Some(ProgrammerStatus {
                available_replicas: available,
            });

            // carries the cached resourceVersion, a stale write fails
            self.programmer_api.update(namespace, &updated).await?;
        }

        self.recorder.event(
            programmer.as_ref(),
            EventType::Normal,
            REASON_SYNCED,
            MESSAGE_SYNCED,
        );

        Ok(())
    }
}
