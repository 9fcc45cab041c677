//! Typed admission handlers.

use kube::api::{DynamicObject, GroupVersionKind};
use kube::core::admission::Operation;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::{AdmissionError, AdmissionHandler};
use crate::registry::{gvk_of, kind_label};

/// Defaulting and validation rules for one statically typed kind.
///
/// Every method has a permissive default, so a kind only implements the
/// hooks it needs.
pub trait Webhook: Send + Sync + 'static {
    /// Kind this webhook admits.
    type Object: Resource<DynamicType = ()> + Serialize + DeserializeOwned + Clone + Send + Sync;

    /// Fills in defaults.
    fn default(&self, _object: &mut Self::Object) {}

    /// Checks a new object.
    fn validate_create(&self, _object: &Self::Object) -> Result<(), AdmissionError> {
        Ok(())
    }

    /// Checks a change.
    fn validate_update(&self, _old: &Self::Object, _new: &Self::Object) -> Result<(), AdmissionError> {
        Ok(())
    }

    /// Checks a deletion.
    fn validate_delete(&self, _object: &Self::Object) -> Result<(), AdmissionError> {
        Ok(())
    }
}

/// Adapts a [`Webhook`] to the dynamic [`AdmissionHandler`] interface.
#[derive(Debug)]
pub struct TypedWebhook<W> {
    inner: W,
}

impl<W: Webhook> TypedWebhook<W> {
    /// Wraps a typed webhook.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    fn decode(object: &DynamicObject) -> Result<W::Object, AdmissionError> {
        Self::decode_value(Self::raw(object)?)
    }

    fn raw(object: &DynamicObject) -> Result<Value, AdmissionError> {
        serde_json::to_value(object).map_err(Self::decode_error)
    }

    fn decode_value(value: Value) -> Result<W::Object, AdmissionError> {
        serde_json::from_value(value).map_err(Self::decode_error)
    }

    fn encode(object: &W::Object) -> Result<Value, AdmissionError> {
        serde_json::to_value(object).map_err(Self::decode_error)
    }

    fn decode_error(source: serde_json::Error) -> AdmissionError {
        AdmissionError::Decode {
            kind: kind_label(&gvk_of::<W::Object>()),
            source,
        }
    }
}

/// Applies the change from `before` to `after` onto `target`.
///
/// `target` is the object as submitted; `before` and `after` are typed
/// encodings, which may carry defaulted parents the submitted object lacks.
/// Such parents are inserted whole so the resulting patch only touches
/// paths that exist in `target`.
fn overlay(target: &mut Value, before: &Value, after: &Value) {
    match (target, before, after) {
        (Value::Object(target), Value::Object(before), Value::Object(after)) => {
            for (key, value) in after {
                let previous = before.get(key);
                if previous == Some(value) {
                    continue;
                }
                if let (Some(previous), Some(slot)) = (previous, target.get_mut(key)) {
                    overlay(slot, previous, value);
                } else {
                    target.insert(key.clone(), value.clone());
                }
            }
            for key in before.keys().filter(|key| !after.contains_key(*key)) {
                target.remove(key);
            }
        }
        (target, _, after) => *target = after.clone(),
    }
}

impl<W: Webhook> AdmissionHandler for TypedWebhook<W> {
    fn gvk(&self) -> GroupVersionKind {
        gvk_of::<W::Object>()
    }

    fn default(&self, object: &DynamicObject) -> Result<json_patch::Patch, AdmissionError> {
        let raw = Self::raw(object)?;
        let original = Self::decode_value(raw.clone())?;
        let mut defaulted = original.clone();
        self.inner.default(&mut defaulted);

        // the patch is applied to the submitted object, so diff against it
        // rather than the typed encoding
        let mut merged = raw.clone();
        overlay(&mut merged, &Self::encode(&original)?, &Self::encode(&defaulted)?);
        Ok(json_patch::diff(&raw, &merged))
    }

    fn validate(
        &self,
        operation: &Operation,
        old: Option<&DynamicObject>,
        new: Option<&DynamicObject>,
    ) -> Result<(), AdmissionError> {
        match (operation, old, new) {
            (Operation::Create, _, Some(new)) => self.inner.validate_create(&Self::decode(new)?),
            (Operation::Update, Some(old), Some(new)) => self
                .inner
                .validate_update(&Self::decode(old)?, &Self::decode(new)?),
            (Operation::Delete, Some(old), _) => self.inner.validate_delete(&Self::decode(old)?),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::v1alpha3::MachineSet;
    use serde_json::json;

    struct LabelTemplate;

    impl Webhook for LabelTemplate {
        type Object = MachineSet;

        fn default(&self, set: &mut MachineSet) {
            set.spec
                .template
                .metadata
                .labels
                .insert("pool".to_string(), "workers".to_string());
            set.spec.replicas.get_or_insert(1);
        }
    }

    fn submitted() -> Value {
        json!({
            "apiVersion": "cluster.x-k8s.io/v1alpha3",
            "kind": "MachineSet",
            "metadata": {"name": "workers", "namespace": "default"},
            "spec": {
                "clusterName": "prod",
                "template": {"spec": {"clusterName": "prod"}},
                "x-unknown": true
            }
        })
    }

    #[test]
    fn test_defaulting_patch_applies_to_submitted_object() {
        let mut raw = submitted();
        let object: DynamicObject = serde_json::from_value(raw.clone()).unwrap();

        let patch = TypedWebhook::new(LabelTemplate).default(&object).unwrap();
        json_patch::patch(&mut raw, &patch).unwrap();

        assert_eq!(raw["spec"]["template"]["metadata"]["labels"]["pool"], "workers");
        assert_eq!(raw["spec"]["replicas"], 1);
        assert_eq!(raw["spec"]["x-unknown"], true, "unknown fields are left alone");
    }

    #[test]
    fn test_overlay_inserts_missing_parents_and_removes_dropped_keys() {
        let mut target = json!({"a": {"keep": 1}, "gone": 2});
        let before = json!({"a": {"keep": 1}, "b": {}, "gone": 2});
        let after = json!({"a": {"keep": 1, "new": 3}, "b": {"leaf": 4}});

        overlay(&mut target, &before, &after);

        assert_eq!(target, json!({"a": {"keep": 1, "new": 3}, "b": {"leaf": 4}}));
    }
}
