use serde_json::{json, Value};
use summary_core::{SectionId, SummaryConfig, SummaryError};
use summary_fhir::{additional_narrative, CompositionBuilder};

const BASE_URL: &str = "https://fhir.example.org/";

fn patient() -> Value {
    json!({
        "resourceType": "Patient",
        "id": "p1",
        "name": [{"given": ["John"], "family": "Doe"}],
        "gender": "male",
        "birthDate": "1980-01-01",
    })
}

fn allergy() -> Value {
    json!({"resourceType": "AllergyIntolerance", "id": "a1", "text": "Penicillin allergy"})
}

fn medication() -> Value {
    json!({
        "resourceType": "MedicationStatement",
        "id": "m1",
        "status": "active",
        "medicationCodeableConcept": {"text": "Atorvastatin 20mg"},
    })
}

fn condition() -> Value {
    json!({
        "resourceType": "Condition",
        "id": "c1",
        "code": {"text": "Hypertension"},
        "clinicalStatus": {"coding": [{"code": "active"}]},
    })
}

fn immunization() -> Value {
    json!({
        "resourceType": "Immunization",
        "id": "i1",
        "status": "completed",
        "vaccineCode": {"coding": [{"code": "MMR"}]},
    })
}

fn builder_with_mandatory() -> CompositionBuilder {
    let config = SummaryConfig::default();
    let mut builder = CompositionBuilder::new();
    builder
        .set_subject(patient())
        .expect("Không đặt được subject");
    builder
        .add_section(SectionId::Allergies, vec![allergy()], &config)
        .expect("Không thêm được section allergies");
    builder
        .add_section(SectionId::Medications, vec![medication()], &config)
        .expect("Không thêm được section medications");
    builder
        .add_section(SectionId::Problems, vec![condition()], &config)
        .expect("Không thêm được section problems");
    builder
        .add_section(SectionId::Immunizations, vec![immunization()], &config)
        .expect("Không thêm được section immunizations");
    builder
}

#[test]
fn build_reports_all_missing_mandatory_sections() {
    let config = SummaryConfig::default();
    let mut builder = CompositionBuilder::new();
    builder
        .set_subject(patient())
        .expect("Không đặt được subject");
    builder
        .add_section(SectionId::Allergies, vec![allergy()], &config)
        .expect("Không thêm được section allergies");

    let err = builder.build().expect_err("Phải báo thiếu section bắt buộc");
    match err {
        SummaryError::MissingMandatorySections(missing) => {
            assert_eq!(
                missing,
                vec![
                    SectionId::Medications,
                    SectionId::Problems,
                    SectionId::Immunizations,
                ]
            );
        }
        other => panic!("Lỗi không đúng loại: {other}"),
    }

    builder
        .add_section(SectionId::Medications, vec![medication()], &config)
        .expect("Không thêm được section medications");
    builder
        .add_section(SectionId::Problems, vec![condition()], &config)
        .expect("Không thêm được section problems");
    builder
        .add_section(SectionId::Immunizations, vec![immunization()], &config)
        .expect("Không thêm được section immunizations");

    let sections = builder
        .build()
        .expect("Build phải thành công khi đủ section bắt buộc");
    assert_eq!(sections.len(), 4);
}

#[test]
fn sections_come_back_in_canonical_order() {
    let config = SummaryConfig::default();
    let mut builder = CompositionBuilder::new();
    builder
        .set_subject(patient())
        .expect("Không đặt được subject");

    // Thêm theo thứ tự lộn xộn.
    builder
        .add_section(SectionId::VitalSigns, vec![], &config)
        .expect("Không thêm được section vital-signs");
    builder
        .add_section(SectionId::Immunizations, vec![immunization()], &config)
        .expect("Không thêm được section immunizations");
    builder
        .add_section(SectionId::Problems, vec![condition()], &config)
        .expect("Không thêm được section problems");
    builder
        .add_section(SectionId::Medications, vec![medication()], &config)
        .expect("Không thêm được section medications");
    builder
        .add_section(SectionId::Allergies, vec![allergy()], &config)
        .expect("Không thêm được section allergies");

    let sections = builder.build().expect("Build phải thành công");
    let codes: Vec<&str> = sections
        .iter()
        .map(|section| section["code"]["coding"][0]["code"].as_str().unwrap())
        .collect();
    assert_eq!(codes, vec!["48765-2", "10160-0", "11450-4", "11369-6", "8716-3"]);
}

#[test]
fn re_adding_a_section_replaces_the_records() {
    let config = SummaryConfig::default();
    let mut builder = builder_with_mandatory();

    let corrected = json!({
        "resourceType": "AllergyIntolerance",
        "id": "a2",
        "code": {"text": "Latex allergy"},
    });
    builder
        .add_section(SectionId::Allergies, vec![corrected], &config)
        .expect("Không thay được section allergies");

    let sections = builder.build().expect("Build phải thành công");
    let allergy_section = &sections[0];
    let div = allergy_section["text"]["div"].as_str().unwrap();
    assert!(div.contains("Latex allergy"));
    assert!(!div.contains("Penicillin allergy"));
    assert_eq!(allergy_section["entry"].as_array().unwrap().len(), 1);
}

#[test]
fn build_twice_is_rejected() {
    let mut builder = builder_with_mandatory();
    builder.build().expect("Lần build đầu phải thành công");
    assert!(matches!(
        builder.build(),
        Err(SummaryError::AlreadyFinalized)
    ));
}

#[test]
fn build_without_subject_is_rejected() {
    let config = SummaryConfig::default();
    let mut builder = CompositionBuilder::new();
    builder
        .add_section(SectionId::Allergies, vec![allergy()], &config)
        .expect("Không thêm được section allergies");
    assert!(matches!(builder.build(), Err(SummaryError::MissingSubject)));
}

#[test]
fn unknown_section_identifier_is_rejected() {
    let config = SummaryConfig::default();
    let mut builder = CompositionBuilder::new();
    builder
        .set_subject(patient())
        .expect("Không đặt được subject");
    assert!(matches!(
        builder.add_section_named("nonsense", vec![allergy()], &config),
        Err(SummaryError::UnknownSection(_))
    ));
}

#[test]
fn document_bundle_is_reference_resolved_and_deduplicated() {
    let config = SummaryConfig::default();
    let mut builder = builder_with_mandatory();

    let bundle = builder
        .build_bundle("example-organization", "Example Organization", BASE_URL, &config)
        .expect("Không dựng được bundle");

    assert_eq!(bundle["resourceType"], "Bundle");
    assert_eq!(bundle["type"], "document");

    let entries = bundle["entry"].as_array().unwrap();
    // Composition + subject + organization + bốn bản ghi.
    assert_eq!(entries.len(), 7);

    let composition = &entries[0]["resource"];
    assert_eq!(composition["resourceType"], "Composition");
    assert_eq!(composition["type"]["coding"][0]["code"], "60591-5");
    assert_eq!(composition["subject"]["reference"], "Patient/p1");
    assert_eq!(composition["custodian"]["reference"], "Organization/example-organization");

    let allergy_div = composition["section"][0]["text"]["div"].as_str().unwrap();
    assert!(allergy_div.contains("Penicillin allergy"));

    let mut keys = Vec::new();
    for entry in entries {
        let url = entry["fullUrl"].as_str().unwrap();
        assert!(url.starts_with(BASE_URL));

        let resource = &entry["resource"];
        keys.push((
            resource["resourceType"].as_str().unwrap().to_string(),
            resource["id"].as_str().unwrap().to_string(),
        ));
    }
    let before = keys.len();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), before);
}

#[test]
fn identical_record_via_two_sections_is_packaged_once() {
    let config = SummaryConfig::default();
    let mut builder = builder_with_mandatory();

    let observation = json!({
        "resourceType": "Observation",
        "id": "o1",
        "code": {"text": "Glucose"},
        "valueQuantity": {"value": 5.4, "unit": "mmol/L"},
    });
    builder
        .add_section(SectionId::Results, vec![observation.clone()], &config)
        .expect("Không thêm được section results");
    builder
        .add_section(SectionId::VitalSigns, vec![observation], &config)
        .expect("Không thêm được section vital-signs");

    let bundle = builder
        .build_bundle("example-organization", "Example Organization", BASE_URL, &config)
        .expect("Không dựng được bundle");

    let entries = bundle["entry"].as_array().unwrap();
    let observation_count = entries
        .iter()
        .filter(|entry| entry["resource"]["resourceType"] == "Observation")
        .count();
    assert_eq!(observation_count, 1);
    assert_eq!(entries.len(), 8);
}

#[test]
fn conflicting_identities_are_rejected() {
    let config = SummaryConfig::default();
    let mut builder = builder_with_mandatory();

    let first = json!({"resourceType": "Observation", "id": "o1", "code": {"text": "Glucose"}});
    let second = json!({"resourceType": "Observation", "id": "o1", "code": {"text": "Sodium"}});
    builder
        .add_section(SectionId::Results, vec![first], &config)
        .expect("Không thêm được section results");
    builder
        .add_section(SectionId::VitalSigns, vec![second], &config)
        .expect("Không thêm được section vital-signs");

    let err = builder
        .build_bundle("example-organization", "Example Organization", BASE_URL, &config)
        .expect_err("Phải báo trùng định danh");
    assert!(matches!(
        err,
        SummaryError::DuplicateIdentityConflict { .. }
    ));
}

#[test]
fn builder_is_reusable_after_finalize() {
    let config = SummaryConfig::default();
    let mut builder = builder_with_mandatory();
    builder
        .build_bundle("example-organization", "Example Organization", BASE_URL, &config)
        .expect("Không dựng được bundle đầu tiên");

    assert!(matches!(
        builder.build_bundle("example-organization", "Example Organization", BASE_URL, &config),
        Err(SummaryError::AlreadyFinalized)
    ));

    builder
        .set_subject(json!({"resourceType": "Patient", "id": "p2", "name": [{"family": "Roe"}]}))
        .expect("Không đặt được subject mới");
    for section in SectionId::mandatory() {
        builder
            .add_section(section, vec![], &config)
            .expect("Không thêm được section rỗng");
    }

    let bundle = builder
        .build_bundle("example-organization", "Example Organization", BASE_URL, &config)
        .expect("Builder phải dùng lại được sau khi chốt");
    assert_eq!(bundle["entry"][1]["resource"]["id"], "p2");

    let composition = &bundle["entry"][0]["resource"];
    assert_eq!(composition["section"][0]["text"]["status"], "empty");
}

#[test]
fn set_subject_last_write_wins() {
    let config = SummaryConfig::default();
    let mut builder = builder_with_mandatory();
    builder
        .set_subject(json!({"resourceType": "Patient", "id": "p2", "name": [{"family": "Roe"}]}))
        .expect("Không thay được subject");

    let bundle = builder
        .build_bundle("example-organization", "Example Organization", BASE_URL, &config)
        .expect("Không dựng được bundle");
    assert_eq!(
        bundle["entry"][0]["resource"]["subject"]["reference"],
        "Patient/p2"
    );
}

#[test]
fn additional_narrative_is_kept_verbatim_in_section() {
    let mut builder = builder_with_mandatory();
    let narrative = additional_narrative("Theo dõi thêm tại nhà");
    builder
        .add_section_with_narrative(SectionId::PlanOfCare, vec![], narrative)
        .expect("Không thêm được section plan-of-care");

    let sections = builder.build().expect("Build phải thành công");
    let plan = sections.last().unwrap();
    assert_eq!(plan["text"]["status"], "additional");
    assert!(plan["text"]["div"]
        .as_str()
        .unwrap()
        .contains("Theo dõi thêm tại nhà"));
}

#[test]
fn read_bundle_routes_resources_to_sections() {
    let config = SummaryConfig::default();
    let input = json!({
        "resourceType": "Bundle",
        "entry": [
            {"resource": patient()},
            {"resource": allergy()},
            {"resource": medication()},
            {"resource": condition()},
            {"resource": immunization()},
            {"resource": {
                "resourceType": "Observation",
                "id": "o1",
                "code": {"text": "Hemoglobin"},
                "category": [{"coding": [{"code": "laboratory"}]}],
                "valueQuantity": {"value": 13.2, "unit": "g/dL"},
            }},
            {"resource": {"resourceType": "Basic", "id": "b1"}},
        ],
    });

    let mut builder = CompositionBuilder::new();
    builder
        .read_bundle(&input, &config)
        .expect("Không đọc được bundle");

    let sections = builder.build().expect("Build phải thành công");
    assert_eq!(sections.len(), 5);
    let titles: Vec<&str> = sections
        .iter()
        .map(|section| section["title"].as_str().unwrap())
        .collect();
    assert!(titles.contains(&"Results Summary"));
}

#[test]
fn read_bundle_routes_family_member_history() {
    let config = SummaryConfig::default();
    let input = json!({
        "resourceType": "Bundle",
        "entry": [
            {"resource": patient()},
            {"resource": allergy()},
            {"resource": medication()},
            {"resource": condition()},
            {"resource": immunization()},
            {"resource": {
                "resourceType": "FamilyMemberHistory",
                "id": "f1",
                "relationship": {"text": "Father"},
                "condition": [{"code": {"text": "Coronary artery disease"}}],
            }},
        ],
    });

    let mut builder = CompositionBuilder::new();
    builder
        .read_bundle(&input, &config)
        .expect("Không đọc được bundle");

    let sections = builder.build().expect("Build phải thành công");
    assert_eq!(sections.len(), 5);

    let family = sections.last().unwrap();
    assert_eq!(family["title"], "History of Family Member Diseases");
    assert_eq!(family["code"]["coding"][0]["code"], "10157-6");
    assert_eq!(family["entry"][0]["reference"], "FamilyMemberHistory/f1");
    let div = family["text"]["div"].as_str().unwrap();
    assert!(div.contains("Father"));
    assert!(div.contains("Coronary artery disease"));
}

#[test]
fn record_without_identity_is_marked_unresolved() {
    let config = SummaryConfig::default();
    let mut builder = builder_with_mandatory();

    let anonymous = json!({"resourceType": "Condition", "code": {"text": "Gout"}});
    builder
        .add_section(SectionId::Problems, vec![condition(), anonymous], &config)
        .expect("Không thay được section problems");

    let bundle = builder
        .build_bundle("example-organization", "Example Organization", BASE_URL, &config)
        .expect("Không dựng được bundle");

    let composition = &bundle["entry"][0]["resource"];
    let problem_entries = composition["section"][2]["entry"].as_array().unwrap();
    assert_eq!(problem_entries.len(), 2);
    assert_eq!(problem_entries[0]["reference"], "Condition/c1");
    assert_eq!(problem_entries[1]["display"], "Unresolved entry");
    assert!(problem_entries[1].get("reference").is_none());

    // Bản ghi không định danh vẫn có mặt trong narrative...
    let div = composition["section"][2]["text"]["div"].as_str().unwrap();
    assert!(div.contains("Gout"));

    // ...nhưng không được đóng gói thành entry của bundle.
    let entries = bundle["entry"].as_array().unwrap();
    assert_eq!(entries.len(), 7);
    assert!(entries
        .iter()
        .all(|entry| entry["resource"]["code"]["text"] != "Gout"));
}

#[test]
fn read_bundle_rejects_non_bundle_input() {
    let config = SummaryConfig::default();
    let mut builder = CompositionBuilder::new();
    let err = builder
        .read_bundle(&json!({"resourceType": "Patient", "id": "p1"}), &config)
        .expect_err("Phải từ chối input không phải Bundle");
    assert!(matches!(err, SummaryError::Parse(_)));
}
