//! Kiểu dữ liệu lõi cho tài liệu tóm tắt bệnh án (patient summary).

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

/// Cấu hình hiển thị khi sinh narrative.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryConfig {
    /// Múi giờ hiển thị ngày tháng; `None` nghĩa là UTC.
    ///
    /// Chỉ ảnh hưởng cách trình bày, không bao giờ thay đổi giá trị thời gian gốc.
    pub display_offset: Option<FixedOffset>,
}

/// Định danh các section trong tài liệu tóm tắt.
///
/// Thứ tự khai báo là thứ tự chuẩn của tài liệu; xem [`SectionId::profile`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum SectionId {
    Allergies,
    Medications,
    Problems,
    Immunizations,
    Results,
    Procedures,
    MedicalDevices,
    VitalSigns,
    PastIllness,
    FamilyHistory,
    Pregnancy,
    SocialHistory,
    FunctionalStatus,
    PlanOfCare,
    AdvanceDirectives,
}

/// Thông tin tra cứu cho một section: tiêu đề, mã LOINC, vị trí và cờ bắt buộc.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct SectionProfile {
    pub title: &'static str,
    pub loinc_code: &'static str,
    pub order: u8,
    pub mandatory: bool,
}

impl SectionId {
    /// Toàn bộ section theo thứ tự chuẩn.
    pub const ALL: [SectionId; 15] = [
        SectionId::Allergies,
        SectionId::Medications,
        SectionId::Problems,
        SectionId::Immunizations,
        SectionId::Results,
        SectionId::Procedures,
        SectionId::MedicalDevices,
        SectionId::VitalSigns,
        SectionId::PastIllness,
        SectionId::FamilyHistory,
        SectionId::Pregnancy,
        SectionId::SocialHistory,
        SectionId::FunctionalStatus,
        SectionId::PlanOfCare,
        SectionId::AdvanceDirectives,
    ];

    /// Tra cứu registry tĩnh cho section này.
    ///
    /// Mã LOINC lấy theo https://hl7.org/fhir/R4/valueset-doc-section-codes.html
    pub fn profile(self) -> SectionProfile {
        match self {
            SectionId::Allergies => SectionProfile {
                title: "Allergies and Intolerances",
                loinc_code: "48765-2",
                order: 1,
                mandatory: true,
            },
            SectionId::Medications => SectionProfile {
                title: "Medication Summary",
                loinc_code: "10160-0",
                order: 2,
                mandatory: true,
            },
            SectionId::Problems => SectionProfile {
                title: "Problem List",
                loinc_code: "11450-4",
                order: 3,
                mandatory: true,
            },
            SectionId::Immunizations => SectionProfile {
                title: "Immunizations",
                loinc_code: "11369-6",
                order: 4,
                mandatory: true,
            },
            SectionId::Results => SectionProfile {
                title: "Results Summary",
                loinc_code: "30954-2",
                order: 5,
                mandatory: false,
            },
            SectionId::Procedures => SectionProfile {
                title: "History of Procedures",
                loinc_code: "47519-4",
                order: 6,
                mandatory: false,
            },
            SectionId::MedicalDevices => SectionProfile {
                title: "History of Medical Devices",
                loinc_code: "46264-8",
                order: 7,
                mandatory: false,
            },
            SectionId::VitalSigns => SectionProfile {
                title: "Vital Signs",
                loinc_code: "8716-3",
                order: 8,
                mandatory: false,
            },
            SectionId::PastIllness => SectionProfile {
                title: "History of Past Illness",
                loinc_code: "11348-0",
                order: 9,
                mandatory: false,
            },
            SectionId::FamilyHistory => SectionProfile {
                title: "History of Family Member Diseases",
                loinc_code: "10157-6",
                order: 10,
                mandatory: false,
            },
            SectionId::Pregnancy => SectionProfile {
                title: "History of Pregnancies",
                loinc_code: "10162-6",
                order: 11,
                mandatory: false,
            },
            SectionId::SocialHistory => SectionProfile {
                title: "Social History",
                loinc_code: "29762-2",
                order: 12,
                mandatory: false,
            },
            SectionId::FunctionalStatus => SectionProfile {
                title: "Functional Status",
                loinc_code: "47420-5",
                order: 13,
                mandatory: false,
            },
            SectionId::PlanOfCare => SectionProfile {
                title: "Plan of Care",
                loinc_code: "18776-5",
                order: 14,
                mandatory: false,
            },
            SectionId::AdvanceDirectives => SectionProfile {
                title: "Advance Directives",
                loinc_code: "42348-3",
                order: 15,
                mandatory: false,
            },
        }
    }

    /// Tên định danh dùng ở CLI và thông báo lỗi.
    pub fn identifier(self) -> &'static str {
        match self {
            SectionId::Allergies => "allergies",
            SectionId::Medications => "medications",
            SectionId::Problems => "problems",
            SectionId::Immunizations => "immunizations",
            SectionId::Results => "results",
            SectionId::Procedures => "procedures",
            SectionId::MedicalDevices => "medical-devices",
            SectionId::VitalSigns => "vital-signs",
            SectionId::PastIllness => "past-illness",
            SectionId::FamilyHistory => "family-history",
            SectionId::Pregnancy => "pregnancy",
            SectionId::SocialHistory => "social-history",
            SectionId::FunctionalStatus => "functional-status",
            SectionId::PlanOfCare => "plan-of-care",
            SectionId::AdvanceDirectives => "advance-directives",
        }
    }

    /// Phân giải tên định danh; trả lỗi nếu registry không có section đó.
    pub fn parse(identifier: &str) -> Result<SectionId, SummaryError> {
        SectionId::ALL
            .iter()
            .copied()
            .find(|section| section.identifier() == identifier)
            .ok_or_else(|| SummaryError::UnknownSection(identifier.to_string()))
    }

    /// Các section bắt buộc, theo thứ tự chuẩn.
    pub fn mandatory() -> impl Iterator<Item = SectionId> {
        SectionId::ALL
            .iter()
            .copied()
            .filter(|section| section.profile().mandatory)
    }
}

/// Mã LOINC của chính tài liệu tóm tắt (Patient summary Document).
pub const SUMMARY_DOCUMENT_LOINC: &str = "60591-5";

/// Trạng thái narrative theo chuẩn FHIR.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeStatus {
    Generated,
    Additional,
    Empty,
}

impl NarrativeStatus {
    /// Mã trạng thái theo wire format FHIR.
    pub fn code(self) -> &'static str {
        match self {
            NarrativeStatus::Generated => "generated",
            NarrativeStatus::Additional => "additional",
            NarrativeStatus::Empty => "empty",
        }
    }
}

/// Narrative gắn với một section: trạng thái cùng khối XHTML.
///
/// `div` luôn là markup hợp lệ, kể cả khi section không có bản ghi nào.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Narrative {
    pub status: NarrativeStatus,
    pub div: String,
}

/// Lỗi khi dựng tài liệu tóm tắt.
///
/// Đây là các lỗi cấu trúc ở biên builder; lỗi hiển thị từng bản ghi
/// không bao giờ leo thang tới đây mà chỉ hạ cấp xuống chữ thay thế.
#[derive(Debug, thiserror::Error)]
pub enum SummaryError {
    #[error("Chưa thiết lập bệnh nhân (subject) trước khi build")]
    MissingSubject,
    #[error("Không nhận ra section: {0}")]
    UnknownSection(String),
    #[error("Thiếu section bắt buộc: {}", fmt_sections(.0))]
    MissingMandatorySections(Vec<SectionId>),
    #[error("Trùng định danh {kind}/{id} với nội dung khác nhau")]
    DuplicateIdentityConflict { kind: String, id: String },
    #[error("Tài liệu đã được chốt, không thể build lại")]
    AlreadyFinalized,
    #[error("Không đọc được dữ liệu: {0}")]
    Parse(String),
}

fn fmt_sections(sections: &[SectionId]) -> String {
    sections
        .iter()
        .map(|section| section.identifier())
        .collect::<Vec<_>>()
        .join(", ")
}
