//! Grouping of catalog elements by data module and subscription strategy.

use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::catalog::Element;

/// Elements of one data module split by how their values are obtained.
///
/// Each subset keeps catalog order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleGroup {
    pub cov: Vec<Element>,
    pub interval_batched: Vec<Element>,
    pub interval_single: Vec<Element>,
}

impl ModuleGroup {
    fn push(&mut self, element: &Element) {
        let bucket = if element.cov {
            &mut self.cov
        } else if element.single {
            &mut self.interval_single
        } else {
            &mut self.interval_batched
        };
        bucket.push(element.clone());
    }

    #[must_use]
    pub fn cov_ids(&self) -> Vec<SmolStr> {
        ids(&self.cov)
    }

    #[must_use]
    pub fn batched_ids(&self) -> Vec<SmolStr> {
        ids(&self.interval_batched)
    }

    #[must_use]
    pub fn single_ids(&self) -> Vec<SmolStr> {
        ids(&self.interval_single)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cov.len() + self.interval_batched.len() + self.interval_single.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when at least one element has to be polled.
    #[must_use]
    pub fn polls(&self) -> bool {
        !self.interval_batched.is_empty() || !self.interval_single.is_empty()
    }
}

fn ids(elements: &[Element]) -> Vec<SmolStr> {
    elements
        .iter()
        .map(|element| element.data_id.clone())
        .collect()
}

/// Partitions `elements` by `data_module`; modules appear in first-seen order.
#[must_use]
pub fn aggregate(elements: &[Element]) -> IndexMap<SmolStr, ModuleGroup> {
    let mut groups: IndexMap<SmolStr, ModuleGroup> = IndexMap::new();
    for element in elements {
        groups
            .entry(element.data_module.clone())
            .or_default()
            .push(element);
    }
    groups
}
