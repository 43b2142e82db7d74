use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identity::{Identity, ObjectMeta};
use crate::version::ResourceVersion;

/// A structured value the store can persist.
///
/// Implementors expose their kind and their [`ObjectMeta`]; the store derives
/// the storage key from those and stamps the resource version back onto the
/// metadata after every write.
pub trait Object:
    Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static
{
    /// The kind this object belongs to (e.g. `"Pod"`).
    fn kind(&self) -> &str;

    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn identity(&self) -> Identity {
        let meta = self.meta();
        Identity::new(meta.namespace.clone(), self.kind(), meta.name.clone())
    }

    fn resource_version(&self) -> Option<ResourceVersion> {
        self.meta().resource_version
    }

    fn set_resource_version(&mut self, version: Option<ResourceVersion>) {
        self.meta_mut().resource_version = version;
    }
}

/// A schema-less object: kind, metadata, and arbitrary JSON fields.
///
/// ```text
/// {"kind": "Pod", "metadata": {"namespace": "default", "name": "x"}, "a": 1}
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Unstructured {
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Unstructured {
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            metadata: ObjectMeta::new(namespace, name),
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn set_field(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

impl Object for Unstructured {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// List container returned by collection reads.
///
/// `resource_version` is the store's latest write sequence at the time the
/// list was taken.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectList<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<ResourceVersion>,
    pub items: Vec<T>,
}

impl<T> ObjectList<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            resource_version: None,
            items,
        }
    }

    pub fn with_resource_version(mut self, version: ResourceVersion) -> Self {
        self.resource_version = Some(version);
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }
}

impl<T> Default for ObjectList<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<T> IntoIterator for ObjectList<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
