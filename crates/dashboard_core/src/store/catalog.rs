use std::collections::HashMap;

use shared::{
    catalog::{Catalog, CatalogAttribute, CatalogDateDataset, CatalogDisplayForm, CatalogMeasure},
    domain::ObjRef,
};

/// Read-only catalog with lookup tables keyed by every ref form of each object.
#[derive(Debug, Clone, Default)]
pub struct CatalogState {
    catalog: Catalog,
    attributes: HashMap<ObjRef, usize>,
    display_forms: HashMap<ObjRef, (usize, usize)>,
    measures: HashMap<ObjRef, usize>,
    date_data_sets: HashMap<ObjRef, usize>,
}

impl CatalogState {
    pub fn new(catalog: Catalog) -> Self {
        let mut state = Self::default();
        for (i, attribute) in catalog.attributes.iter().enumerate() {
            for obj_ref in attribute.meta.refs() {
                state.attributes.insert(obj_ref, i);
            }
            for (j, display_form) in attribute.display_forms.iter().enumerate() {
                for obj_ref in display_form.meta.refs() {
                    state.display_forms.insert(obj_ref, (i, j));
                }
            }
        }
        for (i, measure) in catalog.measures.iter().enumerate() {
            for obj_ref in measure.meta.refs() {
                state.measures.insert(obj_ref, i);
            }
        }
        for (i, data_set) in catalog.date_data_sets.iter().enumerate() {
            for obj_ref in data_set.meta.refs() {
                state.date_data_sets.insert(obj_ref, i);
            }
        }
        state.catalog = catalog;
        state
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn attribute(&self, attribute_ref: &ObjRef) -> Option<&CatalogAttribute> {
        self.attributes
            .get(attribute_ref)
            .and_then(|i| self.catalog.attributes.get(*i))
    }

    pub fn display_form(&self, display_form: &ObjRef) -> Option<&CatalogDisplayForm> {
        let (i, j) = self.display_forms.get(display_form)?;
        self.catalog.attributes.get(*i)?.display_forms.get(*j)
    }

    pub fn attribute_for_display_form(&self, display_form: &ObjRef) -> Option<&CatalogAttribute> {
        let (i, _) = self.display_forms.get(display_form)?;
        self.catalog.attributes.get(*i)
    }

    pub fn measure(&self, measure_ref: &ObjRef) -> Option<&CatalogMeasure> {
        self.measures
            .get(measure_ref)
            .and_then(|i| self.catalog.measures.get(*i))
    }

    pub fn date_data_set(&self, data_set: &ObjRef) -> Option<&CatalogDateDataset> {
        self.date_data_sets
            .get(data_set)
            .and_then(|i| self.catalog.date_data_sets.get(*i))
    }

    /// Whether two refs name the same display form, regardless of ref form.
    pub fn same_display_form(&self, left: &ObjRef, right: &ObjRef) -> bool {
        left == right
            || matches!(
                (self.display_forms.get(left), self.display_forms.get(right)),
                (Some(l), Some(r)) if l == r
            )
    }

    pub fn same_date_data_set(&self, left: &ObjRef, right: &ObjRef) -> bool {
        left == right
            || matches!(
                (self.date_data_sets.get(left), self.date_data_sets.get(right)),
                (Some(l), Some(r)) if l == r
            )
    }
}
