//! Static specialist configuration: descriptors, default set and compound triggers.
//!
//! The registry is built once at startup. Every consistency problem (duplicate
//! names, unknown references, empty default set) is reported here as a
//! configuration error so that request handling never has to deal with it.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::HealthGuardError;

/// Static description of one specialist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialistDescriptor {
    pub name: String,
    /// Remote research endpoint. `None` means the specialist is answered by the
    /// language model directly, using `instructions` as its system prompt.
    #[serde(default)]
    pub endpoint: Option<String>,
    pub instructions: String,
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl SpecialistDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: None,
            instructions: instructions.into(),
            description: description.into(),
            keywords: Vec::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }
}

/// A single high-signal term that pulls in several specialists at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompoundTrigger {
    pub trigger: String,
    pub specialists: Vec<String>,
}

impl CompoundTrigger {
    pub fn new<I, S>(trigger: impl Into<String>, specialists: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            trigger: trigger.into(),
            specialists: specialists.into_iter().map(Into::into).collect(),
        }
    }
}

/// Validated, immutable collection of specialists in a stable order.
#[derive(Debug, Clone)]
pub struct SpecialistRegistry {
    specialists: Vec<Arc<SpecialistDescriptor>>,
    default_set: Vec<String>,
    compound: Vec<CompoundTrigger>,
}

impl SpecialistRegistry {
    pub fn new(
        specialists: Vec<SpecialistDescriptor>,
        default_set: Vec<String>,
        compound: Vec<CompoundTrigger>,
    ) -> Result<Self, HealthGuardError> {
        if specialists.is_empty() {
            return Err(HealthGuardError::registry(
                "at least one specialist must be registered",
            ));
        }

        let mut seen = HashSet::new();
        let mut normalised = Vec::with_capacity(specialists.len());
        for mut descriptor in specialists {
            let name = descriptor.name.trim().to_string();
            if name.is_empty() {
                return Err(HealthGuardError::registry("specialist name must not be empty"));
            }
            if !seen.insert(name.clone()) {
                return Err(HealthGuardError::registry(format!(
                    "duplicate specialist name `{name}`"
                )));
            }

            let mut keywords = Vec::with_capacity(descriptor.keywords.len());
            for keyword in &descriptor.keywords {
                let keyword = keyword.trim().to_lowercase();
                if keyword.is_empty() {
                    return Err(HealthGuardError::registry(format!(
                        "specialist `{name}` has an empty keyword"
                    )));
                }
                keywords.push(keyword);
            }

            descriptor.name = name;
            descriptor.keywords = keywords;
            normalised.push(Arc::new(descriptor));
        }

        if default_set.is_empty() {
            return Err(HealthGuardError::registry(
                "router default set must name at least one specialist",
            ));
        }
        for name in &default_set {
            if !seen.contains(name) {
                return Err(HealthGuardError::registry(format!(
                    "default set references unknown specialist `{name}`"
                )));
            }
        }

        let mut triggers = Vec::with_capacity(compound.len());
        for mut entry in compound {
            entry.trigger = entry.trigger.trim().to_lowercase();
            if entry.trigger.is_empty() {
                return Err(HealthGuardError::registry("compound trigger must not be empty"));
            }
            if entry.specialists.is_empty() {
                return Err(HealthGuardError::registry(format!(
                    "compound trigger `{}` selects no specialists",
                    entry.trigger
                )));
            }
            if let Some(unknown) = entry.specialists.iter().find(|name| !seen.contains(*name)) {
                return Err(HealthGuardError::registry(format!(
                    "compound trigger `{}` references unknown specialist `{unknown}`",
                    entry.trigger
                )));
            }
            triggers.push(entry);
        }

        Ok(Self {
            specialists: normalised,
            default_set,
            compound: triggers,
        })
    }

    /// The health data deployment the service ships with.
    pub fn builtin() -> Result<Self, HealthGuardError> {
        Self::new(
            builtin_specialists(),
            builtin_default_set(),
            builtin_compound_triggers(),
        )
    }

    pub fn get(&self, name: &str) -> Option<&Arc<SpecialistDescriptor>> {
        self.specialists.iter().find(|d| d.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SpecialistDescriptor>> {
        self.specialists.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.specialists.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn default_set(&self) -> &[String] {
        &self.default_set
    }

    pub fn compound_triggers(&self) -> &[CompoundTrigger] {
        &self.compound
    }

    pub fn len(&self) -> usize {
        self.specialists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specialists.is_empty()
    }
}

const NO_FOLLOW_UP: &str = "NOTE: you do NOT have the ability to ask follow up questions, your job is to research and address the prompt as thoroughly as possible. If it is completely irrelevant to you, that is okay, just say so.";

pub fn builtin_specialists() -> Vec<SpecialistDescriptor> {
    vec![
        SpecialistDescriptor::new(
            "EPHT_Agent",
            "Environmental health and air quality specialist",
            format!(
                "You are a specialized CDC Environmental Public Health Tracking (EPHT) agent.\n\
                 Focus on environmental health data including:\n\
                 - Air quality measurements (PM2.5, ozone, air toxics)\n\
                 - Environmental health outcomes\n\
                 - Community health profiles\n\
                 - Geographic and temporal analysis of environmental factors\n\n\
                 {NO_FOLLOW_UP}"
            ),
        )
        .with_endpoint("http://localhost:8889/research")
        .with_keywords([
            "air quality",
            "environmental",
            "pollution",
            "water",
            "climate",
            "epht",
        ]),
        SpecialistDescriptor::new(
            "OpenData_Agent",
            "CDC surveillance and public health data specialist",
            format!(
                "You are a specialized CDC Open Data agent.\n\
                 Focus on:\n\
                 - COVID-19 surveillance data\n\
                 - General health surveillance datasets\n\
                 - Disease outbreak and monitoring data\n\
                 - Public health statistics and trends\n\n\
                 {NO_FOLLOW_UP}"
            ),
        )
        .with_endpoint("http://localhost:8890/research")
        .with_keywords([
            "covid",
            "disease",
            "outbreak",
            "surveillance",
            "mortality",
            "cdc",
            "asthma",
        ]),
        SpecialistDescriptor::new(
            "HealthcareAccess_Agent",
            "Healthcare access and insurance coverage specialist",
            format!(
                "You are a specialized Healthcare Access agent focusing on Healthcare.gov data.\n\
                 Focus on:\n\
                 - Insurance coverage and accessibility data\n\
                 - Provider network information\n\
                 - Healthcare marketplace statistics\n\
                 - Geographic healthcare access patterns\n\n\
                 {NO_FOLLOW_UP}"
            ),
        )
        .with_endpoint("http://localhost:8891/research")
        .with_keywords([
            "insurance",
            "coverage",
            "access",
            "provider",
            "network",
            "marketplace",
        ]),
        SpecialistDescriptor::new(
            "MedlinePlus_Agent",
            "Patient education and clinical support",
            format!(
                "You are a Patient Education and Clinical Support specialist focusing on:\n\
                 - Patient education materials and health information\n\
                 - Clinical decision support and medical terminology\n\
                 - Drug information and medication guidance\n\
                 - Diagnostic code interpretation (ICD-10, SNOMED CT)\n\n\
                 {NO_FOLLOW_UP}"
            ),
        )
        .with_endpoint("http://localhost:8892/research")
        .with_keywords([
            "patient",
            "education",
            "treatment",
            "symptoms",
            "diagnosis",
            "medication guide",
        ]),
        SpecialistDescriptor::new(
            "OpenFDA_Agent",
            "Drug safety and FDA monitoring",
            format!(
                "You are a Drug Safety and FDA Monitoring specialist focusing on:\n\
                 - Drug adverse events and safety signals\n\
                 - FDA recalls and enforcement actions\n\
                 - Medical device safety reports\n\
                 - Food safety and contamination issues\n\n\
                 {NO_FOLLOW_UP}"
            ),
        )
        .with_endpoint("http://localhost:8893/research")
        .with_keywords([
            "drug",
            "adverse",
            "recall",
            "fda",
            "medication",
            "safety",
            "enforcement",
        ]),
    ]
}

pub fn builtin_default_set() -> Vec<String> {
    vec![
        "EPHT_Agent".to_string(),
        "OpenData_Agent".to_string(),
        "HealthcareAccess_Agent".to_string(),
    ]
}

pub fn builtin_compound_triggers() -> Vec<CompoundTrigger> {
    vec![CompoundTrigger::new(
        "fentanyl",
        ["OpenFDA_Agent", "MedlinePlus_Agent", "OpenData_Agent"],
    )]
}
