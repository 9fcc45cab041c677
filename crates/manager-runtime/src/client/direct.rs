//! Direct API server access for the write half of the split client.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use tracing::{debug, info};

use super::traits::{ObjectWriter, StatusWriter};
use super::{ClientError, ClientOptions, ObjectKey};
use crate::registry::RegisteredKind;

/// Writes straight to the API server through dynamic `Api` handles.
#[derive(Clone)]
pub struct DirectClient {
    client: Client,
    field_manager: String,
}

impl std::fmt::Debug for DirectClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectClient")
            .field("field_manager", &self.field_manager)
            .finish_non_exhaustive()
    }
}

impl DirectClient {
    /// Builds a client and checks the API server answers.
    pub async fn connect(config: kube::Config, options: &ClientOptions) -> Result<Self, ClientError> {
        let url = config.cluster_url.to_string();
        let client = Client::try_from(config)?;
        let version = client
            .apiserver_version()
            .await
            .map_err(|e| ClientError::Unreachable(format!("{url}: {e}")))?;
        info!(
            api_server = %url,
            version = %version.git_version,
            "Connected to API server"
        );
        Ok(Self::from_client(client, options))
    }

    /// Wraps an existing client without contacting the API server.
    pub fn from_client(client: Client, options: &ClientOptions) -> Self {
        Self {
            client,
            field_manager: options.field_manager.clone(),
        }
    }

    fn api(&self, kind: &RegisteredKind, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, kind.resource()),
            None => Api::all_with(self.client.clone(), kind.resource()),
        }
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..PostParams::default()
        }
    }
}

fn key_of(object: &DynamicObject) -> Result<ObjectKey, ClientError> {
    ObjectKey::from_object(object)
        .ok_or_else(|| ClientError::InvalidObject("missing metadata.name".to_string()))
}

fn map_kube_error(kind: &RegisteredKind, key: &ObjectKey, err: kube::Error) -> ClientError {
    match err {
        kube::Error::Api(ref response) if response.code == 404 => ClientError::NotFound {
            kind: kind.label(),
            key: key.clone(),
        },
        kube::Error::Api(ref response) if response.code == 409 => ClientError::Conflict {
            kind: kind.label(),
            key: key.clone(),
            message: response.message.clone(),
        },
        other => ClientError::Kube(other),
    }
}

#[async_trait]
impl ObjectWriter for DirectClient {
    async fn create(
        &self,
        kind: &RegisteredKind,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        let key = key_of(object)?;
        debug!(kind = %kind.label(), object = %key, "Creating object");
        self.api(kind, key.namespace.as_deref())
            .create(&self.post_params(), object)
            .await
            .map_err(|e| map_kube_error(kind, &key, e))
    }

    async fn update(
        &self,
        kind: &RegisteredKind,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        let key = key_of(object)?;
        debug!(kind = %kind.label(), object = %key, "Updating object");
        self.api(kind, key.namespace.as_deref())
            .replace(&key.name, &self.post_params(), object)
            .await
            .map_err(|e| map_kube_error(kind, &key, e))
    }

    async fn delete(&self, kind: &RegisteredKind, key: &ObjectKey) -> Result<(), ClientError> {
        debug!(kind = %kind.label(), object = %key, "Deleting object");
        self.api(kind, key.namespace.as_deref())
            .delete(&key.name, &DeleteParams::default())
            .await
            .map(drop)
            .map_err(|e| map_kube_error(kind, key, e))
    }

    async fn ping(&self) -> Result<(), ClientError> {
        self.client
            .apiserver_version()
            .await
            .map(drop)
            .map_err(|e| ClientError::Unreachable(e.to_string()))
    }
}

#[async_trait]
impl StatusWriter for DirectClient {
    async fn update_status(
        &self,
        kind: &RegisteredKind,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        let key = key_of(object)?;
        let status = object.data.get("status").cloned().unwrap_or(json!({}));
        let mut body = json!({ "status": status });
        // resourceVersion turns the merge patch into a compare-and-swap
        if let Some(version) = &object.metadata.resource_version {
            body["metadata"] = json!({ "resourceVersion": version });
        }
        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..PatchParams::default()
        };
        debug!(kind = %kind.label(), object = %key, "Updating status");
        self.api(kind, key.namespace.as_deref())
            .patch_status(&key.name, &params, &Patch::Merge(&body))
            .await
            .map_err(|e| map_kube_error(kind, &key, e))
    }
}
