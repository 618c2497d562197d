use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::{ObjRef, WorkspaceSettings};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default)]
    pub title: String,
}

impl ObjectMeta {
    pub fn new(identifier: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            uri: None,
            title: title.into(),
        }
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Canonical (identifier based) reference.
    pub fn obj_ref(&self) -> ObjRef {
        ObjRef::Identifier(self.identifier.clone())
    }

    /// Every reference the object can be addressed by.
    pub fn refs(&self) -> Vec<ObjRef> {
        let mut refs = vec![self.obj_ref()];
        if let Some(uri) = &self.uri {
            refs.push(ObjRef::Uri(uri.clone()));
        }
        refs
    }

    pub fn matches(&self, obj_ref: &ObjRef) -> bool {
        match obj_ref {
            ObjRef::Identifier(id) => id == &self.identifier,
            ObjRef::Uri(uri) => self.uri.as_deref() == Some(uri.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogDisplayForm {
    #[serde(flatten)]
    pub meta: ObjectMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogAttribute {
    #[serde(flatten)]
    pub meta: ObjectMeta,
    #[serde(default)]
    pub display_forms: Vec<CatalogDisplayForm>,
    /// Attributes this attribute rolls up to in the logical data model.
    #[serde(default)]
    pub ancestors: Vec<ObjRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogMeasure {
    #[serde(flatten)]
    pub meta: ObjectMeta,
    /// Date datasets the measure can be sliced by.
    #[serde(default)]
    pub date_data_sets: Vec<ObjRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogDateDataset {
    #[serde(flatten)]
    pub meta: ObjectMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub attributes: Vec<CatalogAttribute>,
    #[serde(default)]
    pub measures: Vec<CatalogMeasure>,
    #[serde(default)]
    pub date_data_sets: Vec<CatalogDateDataset>,
}

impl Catalog {
    pub fn attribute(&self, attribute_ref: &ObjRef) -> Option<&CatalogAttribute> {
        self.attributes
            .iter()
            .find(|attribute| attribute.meta.matches(attribute_ref))
    }

    pub fn attribute_for_display_form(&self, display_form: &ObjRef) -> Option<&CatalogAttribute> {
        self.attributes.iter().find(|attribute| {
            attribute
                .display_forms
                .iter()
                .any(|df| df.meta.matches(display_form))
        })
    }

    pub fn measure(&self, measure_ref: &ObjRef) -> Option<&CatalogMeasure> {
        self.measures
            .iter()
            .find(|measure| measure.meta.matches(measure_ref))
    }

    /// The attribute itself plus everything it rolls up to, as canonical refs.
    fn lineage(&self, attribute_ref: &ObjRef) -> BTreeSet<ObjRef> {
        let mut seen = BTreeSet::new();
        let mut pending = vec![attribute_ref.clone()];
        while let Some(next) = pending.pop() {
            let Some(attribute) = self.attribute(&next) else {
                continue;
            };
            if seen.insert(attribute.meta.obj_ref()) {
                pending.extend(attribute.ancestors.iter().cloned());
            }
        }
        seen
    }

    /// Attributes shared by the lineage of both attributes.
    pub fn common_ancestors(&self, left: &ObjRef, right: &ObjRef) -> Vec<ObjRef> {
        let left = self.lineage(left);
        let right = self.lineage(right);
        left.intersection(&right).cloned().collect()
    }
}

/// Everything a workspace contributes to a dashboard session besides the document itself.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkspaceMetadata {
    #[serde(default)]
    pub catalog: Catalog,
    #[serde(default)]
    pub settings: WorkspaceSettings,
}
