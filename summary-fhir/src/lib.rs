//! FHIR patient summary builder: section narratives plus the document bundle.
//!
//! Records are opaque `serde_json::Value` resources. The builder only reads
//! them; a malformed record degrades to placeholder text instead of failing
//! the section, while structural problems (missing subject, missing mandatory
//! sections, conflicting identities) surface as [`SummaryError`].

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::{json, Value};
use summary_core::{
    Narrative, NarrativeStatus, SectionId, SummaryConfig, SummaryError, SUMMARY_DOCUMENT_LOINC,
};

const LOINC_SYSTEM: &str = "http://loinc.org";
const XHTML_NS: &str = "http://www.w3.org/1999/xhtml";

/// Render one record into a single line of escaped text for a section
/// narrative.
///
/// Dispatch is on `resourceType`. Every branch applies a field-fallback
/// chain so an incomplete record still yields a line; an unrecognized kind
/// yields a generic line and a warning, never an error.
pub fn render_entry(section: SectionId, resource: &Value, config: &SummaryConfig) -> String {
    let line = match resource.get("resourceType").and_then(Value::as_str) {
        Some("Patient") => render_patient(resource, config),
        Some("AllergyIntolerance") => render_allergy(resource),
        Some("MedicationStatement") | Some("MedicationRequest") => render_medication(resource),
        Some("Condition") => render_condition(resource, config),
        Some("Immunization") => render_immunization(resource, config),
        Some("Observation") => render_observation(resource, config),
        Some("Procedure") => render_procedure(resource, config),
        Some("Device") => render_device(resource),
        Some("DiagnosticReport") => render_diagnostic_report(resource, config),
        Some("FamilyMemberHistory") => render_family_member_history(resource),
        other => {
            tracing::warn!(
                section = section.identifier(),
                kind = other.unwrap_or("<missing>"),
                "unrecognized record kind, rendering generic line"
            );
            "Unknown item".to_string()
        }
    };
    escape_xhtml(&line)
}

/// Generate the narrative block for one section.
///
/// Fragments keep the input record order. An empty record list yields
/// `status=empty` with fixed placeholder markup; the returned `div` is
/// always well-formed XHTML.
pub fn generate_narrative(
    section: SectionId,
    records: &[Value],
    config: &SummaryConfig,
) -> Narrative {
    if records.is_empty() {
        return Narrative {
            status: NarrativeStatus::Empty,
            div: wrap_div("<p>No information available</p>"),
        };
    }

    let items: String = records
        .iter()
        .map(|record| format!("<li>{}</li>", render_entry(section, record, config)))
        .collect();

    Narrative {
        status: NarrativeStatus::Generated,
        div: wrap_div(&format!("<ul>{items}</ul>")),
    }
}

/// Wrap caller-supplied supplementary text verbatim (escaped, not derived
/// from records) as an `additional` narrative.
pub fn additional_narrative(text: &str) -> Narrative {
    Narrative {
        status: NarrativeStatus::Additional,
        div: wrap_div(&format!("<p>{}</p>", escape_xhtml(text))),
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum BuildState {
    #[default]
    Empty,
    Accumulating,
    Validated,
    Finalized,
}

#[derive(Debug, Clone)]
struct SectionState {
    records: Vec<Value>,
    narrative: Narrative,
}

/// Accumulates the subject and per-section record lists of one summary
/// document, then emits the composition and the self-contained document
/// bundle.
///
/// One builder owns one in-progress build. After [`build_bundle`] hands the
/// document off, the accumulated state is cleared; calling [`set_subject`]
/// again starts the next document.
///
/// [`build_bundle`]: CompositionBuilder::build_bundle
/// [`set_subject`]: CompositionBuilder::set_subject
#[derive(Debug, Default)]
pub struct CompositionBuilder {
    subject: Option<Value>,
    sections: BTreeMap<SectionId, SectionState>,
    state: BuildState,
}

impl CompositionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the subject (patient) record. Last write wins.
    pub fn set_subject(&mut self, patient: Value) -> Result<&mut Self, SummaryError> {
        match self.state {
            BuildState::Empty | BuildState::Accumulating => {}
            BuildState::Finalized => {
                self.sections.clear();
            }
            BuildState::Validated => return Err(SummaryError::AlreadyFinalized),
        }
        self.subject = Some(patient);
        self.state = BuildState::Accumulating;
        Ok(self)
    }

    /// Store a section with a generated narrative.
    ///
    /// Re-adding the same section replaces the previous record list, so a
    /// retried call with corrected data never accumulates duplicates.
    pub fn add_section(
        &mut self,
        section: SectionId,
        records: Vec<Value>,
        config: &SummaryConfig,
    ) -> Result<&mut Self, SummaryError> {
        self.ensure_accumulating()?;
        let narrative = generate_narrative(section, &records, config);
        self.put_section(section, records, narrative);
        Ok(self)
    }

    /// Store a section with caller-supplied narrative, for the verbatim
    /// `additional` mode.
    pub fn add_section_with_narrative(
        &mut self,
        section: SectionId,
        records: Vec<Value>,
        narrative: Narrative,
    ) -> Result<&mut Self, SummaryError> {
        self.ensure_accumulating()?;
        self.put_section(section, records, narrative);
        Ok(self)
    }

    /// [`add_section`] addressed by registry identifier; unknown identifiers
    /// fail with [`SummaryError::UnknownSection`].
    ///
    /// [`add_section`]: CompositionBuilder::add_section
    pub fn add_section_named(
        &mut self,
        identifier: &str,
        records: Vec<Value>,
        config: &SummaryConfig,
    ) -> Result<&mut Self, SummaryError> {
        let section = SectionId::parse(identifier)?;
        self.add_section(section, records, config)
    }

    /// Ingest a FHIR bundle: route each resource to its section by
    /// `resourceType` and store the grouped sections.
    ///
    /// The first `Patient` becomes the subject if none is set yet;
    /// resources with no matching section are skipped with a warning.
    pub fn read_bundle(
        &mut self,
        bundle: &Value,
        config: &SummaryConfig,
    ) -> Result<&mut Self, SummaryError> {
        if self.state == BuildState::Validated || self.state == BuildState::Finalized {
            return Err(SummaryError::AlreadyFinalized);
        }

        let bundle_type = bundle
            .get("resourceType")
            .and_then(Value::as_str)
            .ok_or_else(|| SummaryError::Parse("input has no resourceType".to_string()))?;
        if bundle_type != "Bundle" {
            return Err(SummaryError::Parse(format!(
                "expected resourceType Bundle, received {bundle_type}"
            )));
        }
        let entries = bundle
            .get("entry")
            .and_then(Value::as_array)
            .ok_or_else(|| SummaryError::Parse("bundle has no entry array".to_string()))?;

        let mut groups: BTreeMap<SectionId, Vec<Value>> = BTreeMap::new();
        for entry in entries {
            let Some(resource) = entry.get("resource") else {
                continue;
            };
            let kind = resource
                .get("resourceType")
                .and_then(Value::as_str)
                .unwrap_or_default();

            if kind == "Patient" {
                if self.subject.is_none() {
                    self.set_subject(resource.clone())?;
                }
                continue;
            }

            match section_for_resource(kind, resource) {
                Some(section) => groups.entry(section).or_default().push(resource.clone()),
                None => {
                    tracing::warn!(kind, "no section for resource kind, skipping");
                }
            }
        }

        for (section, records) in groups {
            self.add_section(section, records, config)?;
        }
        Ok(self)
    }

    /// Validate the accumulated state and return the ordered section list.
    ///
    /// Sections come back in the registry's canonical order, never insertion
    /// order. Fails when the subject is missing or any mandatory section is
    /// absent; the error lists every missing section, in canonical order.
    /// A second call fails with [`SummaryError::AlreadyFinalized`].
    pub fn build(&mut self) -> Result<Vec<Value>, SummaryError> {
        match self.state {
            BuildState::Empty => Err(SummaryError::MissingSubject),
            BuildState::Validated | BuildState::Finalized => Err(SummaryError::AlreadyFinalized),
            BuildState::Accumulating => {
                let sections = self.validated_sections()?;
                self.state = BuildState::Validated;
                Ok(sections)
            }
        }
    }

    /// Assemble the finished document bundle.
    ///
    /// The first entry is the Composition; then the subject, the custodian
    /// organization built from `org_id`/`org_name`, and every section record
    /// deduplicated by `(resourceType, id)`. Each entry carries a `fullUrl`
    /// derived from `base_url`, so references resolve inside the bundle.
    /// Two records claiming the same identity with different content fail
    /// with [`SummaryError::DuplicateIdentityConflict`].
    pub fn build_bundle(
        &mut self,
        org_id: &str,
        org_name: &str,
        base_url: &str,
        config: &SummaryConfig,
    ) -> Result<Value, SummaryError> {
        let sections = match self.state {
            BuildState::Empty => return Err(SummaryError::MissingSubject),
            BuildState::Finalized => return Err(SummaryError::AlreadyFinalized),
            BuildState::Accumulating | BuildState::Validated => self.validated_sections()?,
        };

        let subject = self.subject.clone().ok_or(SummaryError::MissingSubject)?;
        let subject_id = subject
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("patient")
            .to_string();

        let base = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };

        let now = Utc::now();
        let date = match config.display_offset {
            Some(offset) => now
                .with_timezone(&offset)
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            None => now.to_rfc3339_opts(SecondsFormat::Secs, true),
        };

        let organization = json!({
            "resourceType": "Organization",
            "id": org_id,
            "name": org_name,
            "active": true,
        });
        let org_ref = format!("Organization/{org_id}");

        let composition = json!({
            "resourceType": "Composition",
            "id": format!("{subject_id}-summary"),
            "status": "final",
            "type": {
                "coding": [{
                    "system": LOINC_SYSTEM,
                    "code": SUMMARY_DOCUMENT_LOINC,
                    "display": "Patient summary Document",
                }],
            },
            "subject": reference_json(&subject),
            "date": date.clone(),
            "title": "Patient Summary",
            "author": [{"reference": org_ref.as_str(), "display": org_name}],
            "custodian": {"reference": org_ref.as_str(), "display": org_name},
            "section": sections,
        });

        let mut entries: Vec<Value> = Vec::new();
        let mut seen: HashMap<(String, String), usize> = HashMap::new();
        push_entry(&mut entries, &mut seen, &base, composition)?;
        push_entry(&mut entries, &mut seen, &base, subject)?;
        push_entry(&mut entries, &mut seen, &base, organization)?;
        for state in self.sections.values() {
            for record in &state.records {
                if resource_key(record).is_some() {
                    push_entry(&mut entries, &mut seen, &base, record.clone())?;
                }
            }
        }

        let bundle = json!({
            "resourceType": "Bundle",
            "id": format!("{subject_id}-summary-bundle"),
            "type": "document",
            "timestamp": date,
            "entry": entries,
        });

        self.subject = None;
        self.sections.clear();
        self.state = BuildState::Finalized;
        Ok(bundle)
    }

    fn ensure_accumulating(&mut self) -> Result<(), SummaryError> {
        match self.state {
            BuildState::Empty | BuildState::Accumulating => {
                self.state = BuildState::Accumulating;
                Ok(())
            }
            BuildState::Validated | BuildState::Finalized => Err(SummaryError::AlreadyFinalized),
        }
    }

    fn put_section(&mut self, section: SectionId, records: Vec<Value>, narrative: Narrative) {
        if self.sections.contains_key(&section) {
            tracing::debug!(section = section.identifier(), "replacing section records");
        }
        self.sections.insert(section, SectionState { records, narrative });
    }

    fn validated_sections(&self) -> Result<Vec<Value>, SummaryError> {
        if self.subject.is_none() {
            return Err(SummaryError::MissingSubject);
        }

        let missing: Vec<SectionId> = SectionId::mandatory()
            .filter(|section| !self.sections.contains_key(section))
            .collect();
        if !missing.is_empty() {
            return Err(SummaryError::MissingMandatorySections(missing));
        }

        let mut ordered: Vec<(SectionId, &SectionState)> = self
            .sections
            .iter()
            .map(|(section, state)| (*section, state))
            .collect();
        ordered.sort_by_key(|(section, _)| section.profile().order);

        Ok(ordered
            .into_iter()
            .map(|(section, state)| section_json(section, state))
            .collect())
    }
}

fn section_json(section: SectionId, state: &SectionState) -> Value {
    let profile = section.profile();
    let refs: Vec<Value> = state
        .records
        .iter()
        .map(|record| reference_json(record))
        .collect();

    json!({
        "title": profile.title,
        "code": {
            "coding": [{
                "system": LOINC_SYSTEM,
                "code": profile.loinc_code,
                "display": profile.title,
            }],
        },
        "text": {
            "status": state.narrative.status.code(),
            "div": state.narrative.div,
        },
        "entry": refs,
    })
}

fn push_entry(
    entries: &mut Vec<Value>,
    seen: &mut HashMap<(String, String), usize>,
    base: &str,
    resource: Value,
) -> Result<(), SummaryError> {
    let Some(key) = resource_key(&resource) else {
        return Ok(());
    };

    if let Some(index) = seen.get(&key) {
        if entries[*index].get("resource") == Some(&resource) {
            return Ok(());
        }
        return Err(SummaryError::DuplicateIdentityConflict {
            kind: key.0,
            id: key.1,
        });
    }

    let full_url = format!("{base}{}/{}", key.0, key.1);
    seen.insert(key, entries.len());
    entries.push(json!({"fullUrl": full_url, "resource": resource}));
    Ok(())
}

fn resource_key(resource: &Value) -> Option<(String, String)> {
    let kind = resource.get("resourceType").and_then(Value::as_str)?;
    let id = resource.get("id").and_then(Value::as_str)?;
    Some((kind.to_string(), id.to_string()))
}

/// Reference for one record; a record without a usable identity is marked
/// unresolved instead of being dropped.
fn reference_json(resource: &Value) -> Value {
    match resource_key(resource) {
        Some((kind, id)) => json!({"reference": format!("{kind}/{id}")}),
        None => json!({"display": "Unresolved entry"}),
    }
}

fn section_for_resource(kind: &str, resource: &Value) -> Option<SectionId> {
    match kind {
        "AllergyIntolerance" => Some(SectionId::Allergies),
        "MedicationStatement" | "MedicationRequest" => Some(SectionId::Medications),
        "Condition" => Some(SectionId::Problems),
        "Immunization" => Some(SectionId::Immunizations),
        "Observation" => Some(section_for_observation(resource)),
        "DiagnosticReport" => Some(SectionId::Results),
        "Procedure" => Some(SectionId::Procedures),
        "Device" | "DeviceUseStatement" => Some(SectionId::MedicalDevices),
        "FamilyMemberHistory" => Some(SectionId::FamilyHistory),
        "CarePlan" => Some(SectionId::PlanOfCare),
        "Consent" => Some(SectionId::AdvanceDirectives),
        _ => None,
    }
}

fn section_for_observation(resource: &Value) -> SectionId {
    if observation_category_matches(resource, "vital") {
        SectionId::VitalSigns
    } else if observation_category_matches(resource, "social-history") {
        SectionId::SocialHistory
    } else {
        // Laboratory and uncategorized observations both land in results.
        SectionId::Results
    }
}

fn observation_category_matches(resource: &Value, keyword: &str) -> bool {
    let Some(categories) = resource.get("category").and_then(Value::as_array) else {
        return false;
    };

    let needle = keyword.to_lowercase();
    categories.iter().any(|entry| {
        if let Some(text) = entry.get("text").and_then(Value::as_str) {
            if text.to_lowercase().contains(&needle) {
                return true;
            }
        }
        if let Some(codings) = entry.get("coding").and_then(Value::as_array) {
            for coding in codings {
                for field in ["display", "code"] {
                    if let Some(code_text) = coding.get(field).and_then(Value::as_str) {
                        if code_text.to_lowercase().contains(&needle) {
                            return true;
                        }
                    }
                }
            }
        }
        false
    })
}

// ---- per-kind rendering ----

fn render_patient(resource: &Value, config: &SummaryConfig) -> String {
    let name = person_name(resource).unwrap_or_else(|| "Unnamed".to_string());

    let mut phrases = Vec::new();
    if let Some(gender) = resource.get("gender").and_then(Value::as_str) {
        phrases.push(capitalize_first(gender));
    }
    if let Some(birth_date) = resource.get("birthDate").and_then(Value::as_str) {
        phrases.push(format!("born {}", format_date_display(birth_date, config)));
    }

    if phrases.is_empty() {
        name
    } else {
        format!("{name} ({})", phrases.join(", "))
    }
}

fn render_allergy(resource: &Value) -> String {
    let label = display_text(resource, "code");

    let mut phrases = Vec::new();
    if let Some(status) = resource.get("clinicalStatus").and_then(codeable_text) {
        phrases.push(format!("Status {status}."));
    }
    if let Some(criticality) = resource.get("criticality").and_then(Value::as_str) {
        phrases.push(format!("Criticality {}.", criticality.to_uppercase()));
    }
    if let Some(reactions) = summarize_reactions(resource) {
        phrases.push(format!("Reaction: {reactions}."));
    }

    join_line(label, phrases)
}

fn render_medication(resource: &Value) -> String {
    let label = medication_label(resource);

    let mut phrases = Vec::new();
    if let Some(status) = resource.get("status").and_then(Value::as_str) {
        phrases.push(format!("Status {status}."));
    }
    if let Some(dose) = resource
        .get("dosage")
        .or_else(|| resource.get("dosageInstruction"))
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .and_then(|dosage| dosage.get("text"))
        .and_then(Value::as_str)
    {
        let cleaned = dose.trim().trim_end_matches('.');
        if !cleaned.is_empty() {
            phrases.push(format!("{cleaned}."));
        }
    }

    join_line(label, phrases)
}

fn render_condition(resource: &Value, config: &SummaryConfig) -> String {
    let label = display_text(resource, "code");

    let mut phrases = Vec::new();
    if let Some(status) = resource.get("clinicalStatus").and_then(codeable_text) {
        phrases.push(format!("Status {status}."));
    }
    if let Some(onset) = resource.get("onsetDateTime").and_then(Value::as_str) {
        phrases.push(format!("Onset {}.", format_date_display(onset, config)));
    }

    join_line(label, phrases)
}

fn render_immunization(resource: &Value, config: &SummaryConfig) -> String {
    let label = display_text(resource, "vaccineCode");

    let mut phrases = Vec::new();
    if let Some(date) = resource.get("occurrenceDateTime").and_then(Value::as_str) {
        phrases.push(format!("Given {}.", format_date_display(date, config)));
    }
    if let Some(status) = resource.get("status").and_then(Value::as_str) {
        phrases.push(format!("Status {status}."));
    }

    join_line(label, phrases)
}

fn render_observation(resource: &Value, config: &SummaryConfig) -> String {
    let label = display_text(resource, "code");

    let mut phrases = Vec::new();
    if let Some(value) = observation_value(resource) {
        phrases.push(format!("{value}."));
    }
    if let Some(effective) = resource
        .get("effectiveDateTime")
        .or_else(|| resource.get("issued"))
        .and_then(Value::as_str)
    {
        phrases.push(format!("Recorded {}.", format_date_display(effective, config)));
    }

    join_line(label, phrases)
}

fn render_procedure(resource: &Value, config: &SummaryConfig) -> String {
    let label = display_text(resource, "code");

    let mut phrases = Vec::new();
    if let Some(performed) = resource.get("performedDateTime").and_then(Value::as_str) {
        phrases.push(format!("Performed {}.", format_date_display(performed, config)));
    }
    if let Some(status) = resource.get("status").and_then(Value::as_str) {
        phrases.push(format!("Status {status}."));
    }

    join_line(label, phrases)
}

fn render_device(resource: &Value) -> String {
    let label = resource
        .get("type")
        .and_then(codeable_text)
        .or_else(|| {
            resource
                .get("deviceName")
                .and_then(Value::as_array)
                .and_then(|arr| arr.first())
                .and_then(|name| name.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| "Unknown".to_string());

    let mut phrases = Vec::new();
    if let Some(status) = resource.get("status").and_then(Value::as_str) {
        phrases.push(format!("Status {status}."));
    }

    join_line(label, phrases)
}

fn render_diagnostic_report(resource: &Value, config: &SummaryConfig) -> String {
    let label = display_text(resource, "code");

    let mut phrases = Vec::new();
    if let Some(conclusion) = resource.get("conclusion").and_then(Value::as_str) {
        let cleaned = conclusion.trim().trim_end_matches('.');
        if !cleaned.is_empty() {
            phrases.push(format!("{cleaned}."));
        }
    }
    if let Some(issued) = resource.get("issued").and_then(Value::as_str) {
        phrases.push(format!("Issued {}.", format_date_display(issued, config)));
    }

    join_line(label, phrases)
}

fn render_family_member_history(resource: &Value) -> String {
    let label = display_text(resource, "relationship");

    let mut phrases = Vec::new();
    if let Some(conditions) = resource.get("condition").and_then(Value::as_array) {
        let names: Vec<String> = conditions
            .iter()
            .filter_map(|condition| condition.get("code").and_then(codeable_text))
            .collect();
        if !names.is_empty() {
            phrases.push(format!("Conditions: {}.", names.join(", ")));
        }
    }
    if let Some(status) = resource.get("status").and_then(Value::as_str) {
        phrases.push(format!("Status {status}."));
    }

    join_line(label, phrases)
}

fn join_line(label: String, phrases: Vec<String>) -> String {
    if phrases.is_empty() {
        label
    } else {
        format!("{label}: {}", phrases.join(" "))
    }
}

// ---- field extraction helpers ----

/// Fallback chain for the display value of `resource[field]`:
/// codeable text, coding display, coding code, a top-level `text` string,
/// then the literal `Unknown`.
fn display_text(resource: &Value, field: &str) -> String {
    resource
        .get(field)
        .and_then(codeable_text)
        .or_else(|| {
            resource
                .get("text")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "Unknown".to_string())
}

fn codeable_text(value: &Value) -> Option<String> {
    if let Some(text) = value.get("text").and_then(Value::as_str) {
        if !text.trim().is_empty() {
            return Some(text.trim().to_string());
        }
    }

    if let Some(codings) = value.get("coding").and_then(Value::as_array) {
        for coding in codings {
            for field in ["display", "code"] {
                if let Some(text) = coding.get(field).and_then(Value::as_str) {
                    if !text.trim().is_empty() {
                        return Some(text.trim().to_string());
                    }
                }
            }
        }
    }

    None
}

fn medication_label(resource: &Value) -> String {
    resource
        .get("medicationCodeableConcept")
        .and_then(codeable_text)
        .or_else(|| {
            resource
                .get("medicationReference")
                .and_then(|reference| reference.get("display"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .or_else(|| {
            resource
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| "Unknown".to_string())
}

fn person_name(resource: &Value) -> Option<String> {
    let names = resource.get("name")?.as_array()?;
    let name = names.first()?;

    let mut parts: Vec<String> = name
        .get("given")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if let Some(family) = name.get("family").and_then(Value::as_str) {
        parts.push(family.to_string());
    }

    let full = parts.join(" ").trim().to_string();
    if full.is_empty() {
        None
    } else {
        Some(full)
    }
}

fn summarize_reactions(resource: &Value) -> Option<String> {
    let reactions = resource.get("reaction")?.as_array()?;
    let mut parts = Vec::new();
    for reaction in reactions {
        if let Some(manifestations) = reaction.get("manifestation").and_then(Value::as_array) {
            for manifestation in manifestations {
                if let Some(text) = codeable_text(manifestation) {
                    parts.push(text);
                }
            }
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

fn observation_value(resource: &Value) -> Option<String> {
    if let Some(quantity) = resource.get("valueQuantity") {
        return format_quantity(quantity);
    }

    if let Some(text) = resource.get("valueString").and_then(Value::as_str) {
        if !text.is_empty() {
            return Some(text.to_string());
        }
    }

    if let Some(concept) = resource.get("valueCodeableConcept") {
        if let Some(text) = codeable_text(concept) {
            return Some(text);
        }
    }

    if let Some(components) = resource.get("component").and_then(Value::as_array) {
        let mut parts = Vec::new();
        for component in components {
            let label = component
                .get("code")
                .and_then(codeable_text)
                .unwrap_or_else(|| "Component".to_string());
            if let Some(value) = component.get("valueQuantity").and_then(format_quantity) {
                parts.push(format!("{label} {value}"));
            }
        }
        if !parts.is_empty() {
            return Some(parts.join(", "));
        }
    }

    None
}

fn format_quantity(value: &Value) -> Option<String> {
    let magnitude = value.get("value")?.as_f64()?;
    let unit = value.get("unit").and_then(Value::as_str).unwrap_or("");
    let number = format_numeric(magnitude);
    if unit.is_empty() {
        Some(number)
    } else {
        Some(format!("{number} {unit}"))
    }
}

fn format_numeric(value: f64) -> String {
    if value.fract().abs() < f64::EPSILON {
        format!("{value:.0}")
    } else if (value * 10.0).fract().abs() < f64::EPSILON {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

/// Canonical date rendering. The display offset changes presentation only;
/// a value that does not parse is shown as supplied.
fn format_date_display(raw: &str, config: &SummaryConfig) -> String {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return match config.display_offset {
            Some(offset) => parsed
                .with_timezone(&offset)
                .format("%Y-%m-%d %H:%M")
                .to_string(),
            None => parsed
                .with_timezone(&Utc)
                .format("%Y-%m-%d %H:%M")
                .to_string(),
        };
    }
    if NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok() {
        return raw.to_string();
    }
    raw.to_string()
}

fn capitalize_first(input: &str) -> String {
    let mut chars = input.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn wrap_div(content: &str) -> String {
    format!("<div xmlns=\"{XHTML_NS}\">{content}</div>")
}

fn escape_xhtml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c if c.is_control() => out.push(' '),
            c => out.push(c),
        }
    }
    out
}
