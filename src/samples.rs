//! Built-in sample scenarios, one or more per data model.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Sample {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    /// Data model id the sample is written against
    pub model: &'static str,
    pub content: &'static str,
}

const SAMPLES: &[Sample] = &[
    Sample {
        id: "validate-patient",
        name: "Validate Patient",
        description: "Client submits an allergy and a monitor validates it",
        model: "fhir",
        content: r#"Feature: Client submits and monitor validates an allergy
  As a client
  I want to submit an allergy and have a monitor approve it
  So that the test step is completed

  Background:
    Given the test session is set up with dataset ingestion "Y" and server api root from SYSTEM

  Scenario: tc-client-001 Client submission with monitor approval
    Given I create an allergy resource with:
      | resourceType       | codeCode  | codeDisplay        | codeText            |
      | AllergyIntolerance | 762952008 | Peanut (substance) | Allergic to peanuts |
    When I submit the created allergy
    Then validate against http://hl7.org/fhir/StructureDefinition/AllergyIntolerance  # GF1
    And inform the user "Please review the submission"
    And poll for monitor validation
"#,
    },
    Sample {
        id: "create-observation",
        name: "Create Observation",
        description: "Create and validate a FHIR Observation",
        model: "fhir",
        content: r#"Feature: Observation Resource Creation

Scenario: Create a vital signs observation
    Given the user submits an Observation resource
    When the resource is processed
    Then validate against http://hl7.org/fhir/StructureDefinition/Observation
    And poll for processing status
    And inform the user "Observation created successfully"
"#,
    },
    Sample {
        id: "smart-anc-workflow",
        name: "SMART ANC Workflow",
        description: "Antenatal care workflow following SMART Guidelines",
        model: "smart-guidelines",
        content: r#"Feature: SMART Guidelines ANC Workflow

Scenario: Execute antenatal care workflow
    Given collect patient data for antenatal care
    When apply clinical guidelines for ANC
    Then execute clinical decision support
    And provide clinical recommendations
    And create care plan for pregnant patient
    And calculate quality indicators for ANC program
"#,
    },
    Sample {
        id: "smart-immunization",
        name: "SMART Immunization",
        description: "Immunization workflow with SMART Guidelines",
        model: "smart-guidelines",
        content: r#"Feature: SMART Guidelines Immunization

Scenario: Process immunization according to SMART Guidelines
    Given collect patient immunization history
    When validate data quality for immunization records
    Then execute clinical decision support for vaccines
    And trigger clinical alerts if vaccines overdue
    And update care pathway for immunization schedule
    And monitor health outcomes for vaccination program
"#,
    },
    Sample {
        id: "l2-sop-requirements",
        name: "L2 SOP Health Program Requirements",
        description: "Health program requirements analysis at SMART level 2",
        model: "smart-l2-sop",
        content: r#"Feature: L2 SOP Health Program Requirements Analysis

Scenario: Analyze health program requirements following L2 SOP
    Given analyze health program objectives for maternal health
    When document clinical workflows for antenatal care
    And identify key health indicators for pregnancy outcomes
    Then define care pathways for high-risk pregnancies
    And establish program governance structure
    And validate program requirements completeness
"#,
    },
    Sample {
        id: "l2-sop-clinical-decisions",
        name: "L2 SOP Clinical Decision Support",
        description: "Clinical decision support requirements at SMART level 2",
        model: "smart-l2-sop",
        content: r#"Feature: L2 SOP Clinical Decision Support Requirements

Scenario: Define clinical decision support requirements following L2 SOP
    Given identify clinical decision points in immunization workflow
    When document clinical algorithms for vaccine recommendations
    And define alert conditions for overdue vaccinations
    Then specify recommendation logic for contraindications
    And establish clinical thresholds for age-based vaccines
    And validate clinical rules against evidence base
"#,
    },
    Sample {
        id: "l3-sop-fhir-ig",
        name: "L3 SOP FHIR Implementation Guide",
        description: "FHIR implementation guide development at SMART level 3",
        model: "smart-l3-sop",
        content: r#"Feature: L3 SOP FHIR Implementation Guide Development

Scenario: Develop FHIR Implementation Guide following L3 SOP
    Given create FHIR profiles for Patient and Immunization resources
    When define value sets for vaccine codes and administration sites
    And specify code systems for immunization status
    Then create capability statements for immunization registry
    And validate FHIR resources against profiles
    And publish implementation guide to registry
"#,
    },
    Sample {
        id: "l3-sop-cql",
        name: "L3 SOP CQL Development",
        description: "Clinical Quality Language development at SMART level 3",
        model: "smart-l3-sop",
        content: r#"Feature: L3 SOP Clinical Quality Language Development

Scenario: Develop executable clinical logic using CQL following L3 SOP
    Given author CQL libraries for immunization recommendations
    When define clinical expressions for vaccine eligibility
    And implement decision logic for contraindications
    Then create quality measures for vaccination coverage
    And test CQL execution against test patients
    And validate clinical algorithms with subject matter experts
"#,
    },
    Sample {
        id: "l3-sop-questionnaire",
        name: "L3 SOP FHIR Questionnaire",
        description: "FHIR Questionnaire development at SMART level 3",
        model: "smart-l3-sop",
        content: r#"Feature: L3 SOP FHIR Questionnaire Development

Scenario: Create structured data collection forms following L3 SOP
    Given design questionnaire structure for patient registration
    When define question items for demographic information
    And specify answer options for gender and ethnicity
    Then implement conditional logic for pregnancy status
    And validate questionnaire against FHIR specification
    And test form functionality in reference implementation
"#,
    },
    Sample {
        id: "eira-interoperability",
        name: "EIRA Interoperability",
        description: "Test the interoperability layers of EIRA",
        model: "EIRA",
        content: r#"Feature: EIRA Interoperability Assessment

Scenario: Validate all EIRA interoperability layers
    Given check legal compliance for health data exchange
    When align business processes between organizations
    And validate semantic meaning of health data
    Then establish technical connection
    And test system integration
    And ensure GDPR compliance
"#,
    },
    Sample {
        id: "openehr-composition",
        name: "openEHR Composition",
        description: "Validate an openEHR composition",
        model: "openehr",
        content: r#"Feature: openEHR Composition Validation

Scenario: Validate clinical composition
    Given create composition encounter
    When the composition is processed
    Then validate against archetype openEHR-EHR-COMPOSITION.encounter.v1
    And the composition should conform to openEHR-EHR-COMPOSITION.encounter.v1
    And archetype validation succeeds
"#,
    },
];

pub fn all() -> &'static [Sample] {
    SAMPLES
}

pub fn find(id: &str) -> Option<&'static Sample> {
    SAMPLES.iter().find(|s| s.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario;

    #[test]
    fn test_ids_are_unique() {
        let mut ids: Vec<_> = all().iter().map(|s| s.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), all().len());
    }

    #[test]
    fn test_find() {
        assert_eq!(find("create-observation").unwrap().model, "fhir");
        assert!(find("kmehr-prescription").is_none());
    }

    #[test]
    fn test_every_builtin_model_has_a_sample() {
        for model in ["fhir", "EIRA", "smart-guidelines", "smart-l2-sop", "smart-l3-sop", "openehr"] {
            assert!(all().iter().any(|s| s.model == model), "no sample for {}", model);
        }
    }

    #[test]
    fn test_samples_parse_cleanly() {
        for sample in all() {
            let parsed = scenario::parse(sample.content);
            assert!(parsed.diagnostics.is_empty(), "{}: {:?}", sample.id, parsed.diagnostics);
            assert!(!parsed.scenario.steps.is_empty());
        }
    }
}
