use serde::Serialize;
use std::collections::HashMap;

/// The only submission status that counts toward progress.
pub const STATUS_COMPLETED: &str = "completed";

/// Students below this attendance percentage are defaulters.
pub const DEFAULTER_ATTENDANCE_THRESHOLD: f64 = 75.0;

pub fn is_defaulter(attendance: f64) -> bool {
    attendance < DEFAULTER_ATTENDANCE_THRESHOLD
}

/// Attendance is a percentage in 0..=100.
pub fn attendance_in_range(attendance: f64) -> bool {
    attendance.is_finite() && (0.0..=100.0).contains(&attendance)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubjectKind {
    Theory,
    Practical,
    Mdm,
    Oe,
    Pe,
}

impl SubjectKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "theory" => Some(Self::Theory),
            "practical" => Some(Self::Practical),
            "mdm" => Some(Self::Mdm),
            "oe" => Some(Self::Oe),
            "pe" => Some(Self::Pe),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Theory => "theory",
            Self::Practical => "practical",
            Self::Mdm => "MDM",
            Self::Oe => "OE",
            Self::Pe => "PE",
        }
    }

    pub fn is_elective(self) -> bool {
        self.elective_slot().is_some()
    }

    pub fn elective_slot(self) -> Option<ElectiveSlot> {
        match self {
            Self::Mdm => Some(ElectiveSlot::Mdm),
            Self::Oe => Some(ElectiveSlot::Oe),
            Self::Pe => Some(ElectiveSlot::Pe),
            Self::Theory | Self::Practical => None,
        }
    }
}

/// One of the three independent elective choices a student makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElectiveSlot {
    Mdm,
    Oe,
    Pe,
}

impl ElectiveSlot {
    pub const ALL: [ElectiveSlot; 3] = [ElectiveSlot::Mdm, ElectiveSlot::Oe, ElectiveSlot::Pe];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "MDM" => Some(Self::Mdm),
            "OE" => Some(Self::Oe),
            "PE" => Some(Self::Pe),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        self.subject_kind().as_str()
    }

    pub fn subject_kind(self) -> SubjectKind {
        match self {
            Self::Mdm => SubjectKind::Mdm,
            Self::Oe => SubjectKind::Oe,
            Self::Pe => SubjectKind::Pe,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmissionKind {
    Ta,
    Cie,
    Defaulter,
}

impl SubmissionKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ta" => Some(Self::Ta),
            "cie" => Some(Self::Cie),
            "defaulter" => Some(Self::Defaulter),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ta => "ta",
            Self::Cie => "cie",
            Self::Defaulter => "defaulter",
        }
    }

    /// Display name the type is seeded with. Only used to resolve rows that
    /// predate the `kind` column.
    pub fn legacy_name(self) -> &'static str {
        match self {
            Self::Ta => "TA",
            Self::Cie => "CIE",
            Self::Defaulter => "Defaulter work",
        }
    }
}

const PRACTICAL_ITEMS: &[SubmissionKind] = &[SubmissionKind::Ta];
const REGULAR_ITEMS: &[SubmissionKind] = &[SubmissionKind::Ta, SubmissionKind::Cie];
const DEFAULTER_ITEMS: &[SubmissionKind] = &[
    SubmissionKind::Ta,
    SubmissionKind::Cie,
    SubmissionKind::Defaulter,
];

/// Items a student owes for one subject. Depends only on the subject type and
/// the defaulter flag, never on which submission rows exist.
pub fn required_items(kind: SubjectKind, defaulter: bool) -> &'static [SubmissionKind] {
    match kind {
        SubjectKind::Practical => PRACTICAL_ITEMS,
        _ if defaulter => DEFAULTER_ITEMS,
        _ => REGULAR_ITEMS,
    }
}

/// Half-up integer percentage; zero when nothing is required.
pub fn submission_percentage(completed: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    (200 * completed + total) / (2 * total)
}

#[derive(Debug, Clone)]
pub struct SubmissionTypeRow {
    pub id: String,
    pub name: String,
    pub kind: Option<String>,
}

/// Submission-type ids resolved for one request.
///
/// A `None` entry means the type is not configured in this workspace. Every
/// item of that kind then evaluates as pending; nothing errors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmissionTypeIds {
    pub ta: Option<String>,
    pub cie: Option<String>,
    pub defaulter: Option<String>,
}

impl SubmissionTypeIds {
    pub fn resolve(rows: &[SubmissionTypeRow]) -> Self {
        let mut ids = Self::default();
        for row in rows {
            let Some(kind) = row.kind.as_deref().and_then(SubmissionKind::parse) else {
                continue;
            };
            let slot = ids.slot_mut(kind);
            if slot.is_none() {
                *slot = Some(row.id.clone());
            }
        }
        // Rows without a kind fall back to an exact display-name match.
        for row in rows.iter().filter(|r| r.kind.is_none()) {
            for kind in [
                SubmissionKind::Ta,
                SubmissionKind::Cie,
                SubmissionKind::Defaulter,
            ] {
                let slot = ids.slot_mut(kind);
                if slot.is_none() && row.name == kind.legacy_name() {
                    *slot = Some(row.id.clone());
                }
            }
        }
        ids
    }

    pub fn get(&self, kind: SubmissionKind) -> Option<&str> {
        match kind {
            SubmissionKind::Ta => self.ta.as_deref(),
            SubmissionKind::Cie => self.cie.as_deref(),
            SubmissionKind::Defaulter => self.defaulter.as_deref(),
        }
    }

    fn slot_mut(&mut self, kind: SubmissionKind) -> &mut Option<String> {
        match kind {
            SubmissionKind::Ta => &mut self.ta,
            SubmissionKind::Cie => &mut self.cie,
            SubmissionKind::Defaulter => &mut self.defaulter,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubmissionRecord {
    pub student_id: String,
    pub subject_id: String,
    pub submission_type_id: String,
    pub status: String,
}

/// Submission statuses keyed by (student, subject, submission type).
#[derive(Debug, Clone, Default)]
pub struct SubmissionIndex {
    by_key: HashMap<(String, String, String), String>,
}

impl SubmissionIndex {
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = SubmissionRecord>,
    {
        let mut by_key = HashMap::new();
        for r in records {
            by_key.insert((r.student_id, r.subject_id, r.submission_type_id), r.status);
        }
        Self { by_key }
    }

    pub fn is_completed(&self, student_id: &str, subject_id: &str, type_id: Option<&str>) -> bool {
        let Some(type_id) = type_id else {
            return false;
        };
        self.by_key
            .get(&(
                student_id.to_string(),
                subject_id.to_string(),
                type_id.to_string(),
            ))
            .map(|s| s == STATUS_COMPLETED)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ItemStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "N/A")]
    NotApplicable,
    #[serde(rename = "-")]
    NotRequired,
}

impl ItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::NotApplicable => "N/A",
            Self::NotRequired => "-",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StudentRef<'a> {
    pub id: &'a str,
    pub defaulter: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct SubjectRef<'a> {
    pub id: &'a str,
    pub kind: SubjectKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectProgress {
    pub subject_id: String,
    pub ta: ItemStatus,
    pub cie: ItemStatus,
    pub defaulter: ItemStatus,
    pub completed: u32,
    pub total: u32,
    pub submission_percentage: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProgress {
    pub completed: u32,
    pub total: u32,
    pub submission_percentage: u32,
    pub subjects: Vec<SubjectProgress>,
}

pub fn subject_progress(
    student: StudentRef<'_>,
    subject: SubjectRef<'_>,
    types: &SubmissionTypeIds,
    index: &SubmissionIndex,
) -> SubjectProgress {
    let required = required_items(subject.kind, student.defaulter);
    let mut completed = 0u32;
    let mut status_of = |kind: SubmissionKind| -> ItemStatus {
        if !required.contains(&kind) {
            return match kind {
                SubmissionKind::Cie => ItemStatus::NotApplicable,
                _ => ItemStatus::NotRequired,
            };
        }
        if index.is_completed(student.id, subject.id, types.get(kind)) {
            completed += 1;
            ItemStatus::Completed
        } else {
            ItemStatus::Pending
        }
    };

    let ta = status_of(SubmissionKind::Ta);
    let cie = status_of(SubmissionKind::Cie);
    let defaulter = status_of(SubmissionKind::Defaulter);
    let total = required.len() as u32;

    SubjectProgress {
        subject_id: subject.id.to_string(),
        ta,
        cie,
        defaulter,
        completed,
        total,
        submission_percentage: submission_percentage(completed, total),
    }
}

pub fn student_progress<'a, I>(
    student: StudentRef<'_>,
    subjects: I,
    types: &SubmissionTypeIds,
    index: &SubmissionIndex,
) -> StudentProgress
where
    I: IntoIterator<Item = SubjectRef<'a>>,
{
    let subjects: Vec<SubjectProgress> = subjects
        .into_iter()
        .map(|s| subject_progress(student, s, types, index))
        .collect();
    let completed = subjects.iter().map(|s| s.completed).sum();
    let total = subjects.iter().map(|s| s.total).sum();
    StudentProgress {
        completed,
        total,
        submission_percentage: submission_percentage(completed, total),
        subjects,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_types() -> Vec<SubmissionTypeRow> {
        vec![
            SubmissionTypeRow {
                id: "t-ta".into(),
                name: "TA".into(),
                kind: Some("ta".into()),
            },
            SubmissionTypeRow {
                id: "t-cie".into(),
                name: "CIE".into(),
                kind: Some("cie".into()),
            },
            SubmissionTypeRow {
                id: "t-def".into(),
                name: "Defaulter work".into(),
                kind: Some("defaulter".into()),
            },
        ]
    }

    fn record(subject: &str, type_id: &str, status: &str) -> SubmissionRecord {
        SubmissionRecord {
            student_id: "s1".into(),
            subject_id: subject.into(),
            submission_type_id: type_id.into(),
            status: status.into(),
        }
    }

    fn student(defaulter: bool) -> StudentRef<'static> {
        StudentRef {
            id: "s1",
            defaulter,
        }
    }

    #[test]
    fn practical_requires_only_ta_regardless_of_defaulter() {
        let types = SubmissionTypeIds::resolve(&seeded_types());
        let practical = SubjectRef {
            id: "lab",
            kind: SubjectKind::Practical,
        };

        let empty = SubmissionIndex::default();
        for defaulter in [false, true] {
            let p = subject_progress(student(defaulter), practical, &types, &empty);
            assert_eq!(p.total, 1);
            assert_eq!(p.submission_percentage, 0);
            assert_eq!(p.ta, ItemStatus::Pending);
            assert_eq!(p.cie, ItemStatus::NotApplicable);
            assert_eq!(p.defaulter, ItemStatus::NotRequired);
        }

        let done = SubmissionIndex::from_records([record("lab", "t-ta", "completed")]);
        let p = subject_progress(student(true), practical, &types, &done);
        assert_eq!(p.submission_percentage, 100);
        assert_eq!(p.ta, ItemStatus::Completed);
    }

    #[test]
    fn theory_non_defaulter_with_ta_only_is_half_done() {
        let types = SubmissionTypeIds::resolve(&seeded_types());
        let index = SubmissionIndex::from_records([
            record("math", "t-ta", "completed"),
            record("math", "t-cie", "submitted"),
        ]);
        let p = subject_progress(
            student(false),
            SubjectRef {
                id: "math",
                kind: SubjectKind::Theory,
            },
            &types,
            &index,
        );
        assert_eq!(p.total, 2);
        assert_eq!(p.completed, 1);
        assert_eq!(p.submission_percentage, 50);
        // Anything but the literal "completed" stays pending.
        assert_eq!(p.cie, ItemStatus::Pending);
        assert_eq!(p.defaulter, ItemStatus::NotRequired);
    }

    #[test]
    fn defaulter_theory_rounds_two_thirds_up() {
        let types = SubmissionTypeIds::resolve(&seeded_types());
        let index = SubmissionIndex::from_records([
            record("os", "t-ta", "completed"),
            record("os", "t-cie", "completed"),
        ]);
        let p = subject_progress(
            student(true),
            SubjectRef {
                id: "os",
                kind: SubjectKind::Pe,
            },
            &types,
            &index,
        );
        assert_eq!(p.total, 3);
        assert_eq!(p.submission_percentage, 67);
        assert_eq!(p.defaulter, ItemStatus::Pending);
    }

    #[test]
    fn percentage_rounds_half_up() {
        assert_eq!(submission_percentage(1, 8), 13);
        assert_eq!(submission_percentage(1, 3), 33);
        assert_eq!(submission_percentage(5, 8), 63);
        assert_eq!(submission_percentage(0, 0), 0);
        assert_eq!(submission_percentage(4, 4), 100);
    }

    #[test]
    fn student_without_subjects_scores_zero() {
        let types = SubmissionTypeIds::resolve(&seeded_types());
        let p = student_progress(
            student(false),
            std::iter::empty(),
            &types,
            &SubmissionIndex::default(),
        );
        assert_eq!(p.total, 0);
        assert_eq!(p.submission_percentage, 0);
        assert!(p.subjects.is_empty());
    }

    #[test]
    fn missing_type_degrades_to_pending() {
        let rows: Vec<SubmissionTypeRow> = seeded_types()
            .into_iter()
            .filter(|r| r.kind.as_deref() != Some("ta"))
            .collect();
        let types = SubmissionTypeIds::resolve(&rows);
        assert_eq!(types.ta, None);

        let index = SubmissionIndex::from_records([
            record("lab", "t-ta", "completed"),
            record("math", "t-cie", "completed"),
        ]);
        let p = student_progress(
            student(false),
            [
                SubjectRef {
                    id: "lab",
                    kind: SubjectKind::Practical,
                },
                SubjectRef {
                    id: "math",
                    kind: SubjectKind::Theory,
                },
            ],
            &types,
            &index,
        );
        assert_eq!(p.subjects[0].ta, ItemStatus::Pending);
        assert_eq!(p.subjects[1].ta, ItemStatus::Pending);
        assert_eq!(p.completed, 1);
        assert_eq!(p.total, 3);
        assert_eq!(p.submission_percentage, 33);
    }

    #[test]
    fn resolve_prefers_kind_and_falls_back_to_name() {
        let rows = vec![
            SubmissionTypeRow {
                id: "renamed".into(),
                name: "Tutorial Assessment".into(),
                kind: Some("ta".into()),
            },
            SubmissionTypeRow {
                id: "old-cie".into(),
                name: "CIE".into(),
                kind: None,
            },
            SubmissionTypeRow {
                id: "decoy".into(),
                name: "TA".into(),
                kind: None,
            },
        ];
        let types = SubmissionTypeIds::resolve(&rows);
        assert_eq!(types.get(SubmissionKind::Ta), Some("renamed"));
        assert_eq!(types.get(SubmissionKind::Cie), Some("old-cie"));
        assert_eq!(types.get(SubmissionKind::Defaulter), None);
    }

    #[test]
    fn defaulter_threshold_is_strict() {
        assert!(is_defaulter(74.9));
        assert!(!is_defaulter(75.0));
    }
}
