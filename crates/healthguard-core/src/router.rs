//! Keyword based specialist selection.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::registry::SpecialistRegistry;

/// Selects the specialists relevant to a query. Pure and infallible; the
/// registry guarantees a non-empty default set.
#[derive(Debug, Clone)]
pub struct TaskRouter {
    registry: Arc<SpecialistRegistry>,
}

impl TaskRouter {
    pub fn new(registry: Arc<SpecialistRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SpecialistRegistry> {
        &self.registry
    }

    /// Returns specialist names in first-match order, without duplicates.
    pub fn select(&self, query: &str) -> Vec<String> {
        let query = query.to_lowercase();
        let mut matched: Vec<String> = Vec::new();

        for descriptor in self.registry.iter() {
            if descriptor
                .keywords
                .iter()
                .any(|keyword| query.contains(keyword.as_str()))
            {
                matched.push(descriptor.name.clone());
            }
        }

        for compound in self.registry.compound_triggers() {
            if query.contains(compound.trigger.as_str()) {
                matched.extend(compound.specialists.iter().cloned());
            }
        }

        if matched.is_empty() {
            debug!("no keyword matched; using default specialist set");
            return self.registry.default_set().to_vec();
        }

        let mut seen = HashSet::new();
        matched.retain(|name| seen.insert(name.clone()));
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{CompoundTrigger, SpecialistDescriptor};

    fn builtin_router() -> TaskRouter {
        TaskRouter::new(Arc::new(SpecialistRegistry::builtin().unwrap()))
    }

    #[test]
    fn empty_and_unmatched_queries_use_default_set() {
        let router = builtin_router();
        let defaults = vec![
            "EPHT_Agent".to_string(),
            "OpenData_Agent".to_string(),
            "HealthcareAccess_Agent".to_string(),
        ];
        assert_eq!(router.select(""), defaults);
        assert_eq!(router.select("tell me something interesting"), defaults);
    }

    #[test]
    fn air_quality_and_asthma_selects_environment_and_surveillance() {
        let router = builtin_router();
        let selected = router.select("air quality and asthma in California");
        assert_eq!(selected, vec!["EPHT_Agent", "OpenData_Agent"]);
        assert!(!selected.contains(&"HealthcareAccess_Agent".to_string()));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let router = builtin_router();
        assert_eq!(router.select("Recent FDA RECALLS"), vec!["OpenFDA_Agent"]);
    }

    #[test]
    fn compound_trigger_deduplicates_in_first_match_order() {
        let router = builtin_router();
        let selected = router.select("drug recalls and covid deaths linked to fentanyl");
        assert_eq!(
            selected,
            vec!["OpenData_Agent", "OpenFDA_Agent", "MedlinePlus_Agent"]
        );
    }

    #[test]
    fn overlapping_categories_return_each_specialist_once() {
        let registry = SpecialistRegistry::new(
            vec![
                SpecialistDescriptor::new("alpha", "a", "a").with_keywords(["smoke", "fire"]),
                SpecialistDescriptor::new("beta", "b", "b").with_keywords(["fire"]),
            ],
            vec!["alpha".into()],
            vec![CompoundTrigger::new("wildfire", ["beta", "alpha"])],
        )
        .unwrap();
        let router = TaskRouter::new(Arc::new(registry));
        assert_eq!(router.select("wildfire smoke"), vec!["alpha", "beta"]);
    }
}
