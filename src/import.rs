use anyhow::{anyhow, Context};
use serde::Deserialize;
use std::collections::HashSet;

use crate::progress::{attendance_in_range, is_defaulter};

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(default, alias = "rollno", alias = "roll_number", alias = "roll")]
    roll_no: Option<String>,
    #[serde(
        default,
        alias = "hall_ticket",
        alias = "hall_ticket_number",
        alias = "hallticket",
        alias = "htno"
    )]
    hall_ticket_no: Option<String>,
    #[serde(default, alias = "student_name", alias = "full_name")]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default, alias = "batch_name")]
    batch: Option<String>,
    #[serde(default, alias = "attendance_percentage")]
    attendance: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportRow {
    pub roll_no: String,
    pub hall_ticket_no: Option<String>,
    pub name: String,
    pub email: Option<String>,
    pub batch: Option<String>,
    pub attendance: Option<f64>,
}

impl ImportRow {
    pub fn defaulter(&self) -> bool {
        self.attendance.map(is_defaulter).unwrap_or(false)
    }
}

#[derive(Debug, Default)]
pub struct ParsedSheet {
    pub rows: Vec<ImportRow>,
    /// Rows missing a roll number or name, or with attendance outside
    /// 0..=100.
    pub invalid: usize,
}

fn normalize_header(h: &str) -> String {
    h.trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

pub fn parse_student_sheet(text: &str) -> anyhow::Result<ParsedSheet> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: csv::StringRecord = reader
        .headers()
        .context("failed to read header row")?
        .iter()
        .map(normalize_header)
        .collect();
    let has = |names: &[&str]| headers.iter().any(|h| names.contains(&h));
    if !has(&["roll_no", "rollno", "roll_number", "roll"]) {
        return Err(anyhow!("sheet has no roll number column"));
    }
    if !has(&["name", "student_name", "full_name"]) {
        return Err(anyhow!("sheet has no name column"));
    }
    reader.set_headers(headers);

    let mut sheet = ParsedSheet::default();
    for (i, result) in reader.deserialize::<CsvRow>().enumerate() {
        let raw = result.with_context(|| format!("invalid row {}", i + 2))?;
        let (Some(roll_no), Some(name)) = (non_empty(raw.roll_no), non_empty(raw.name)) else {
            sheet.invalid += 1;
            continue;
        };
        let attendance = non_empty(raw.attendance)
            .map(|a| {
                a.trim_end_matches('%')
                    .trim()
                    .parse::<f64>()
                    .with_context(|| format!("row {}: attendance {:?} is not a number", i + 2, a))
            })
            .transpose()?;
        if attendance.is_some_and(|pct| !attendance_in_range(pct)) {
            sheet.invalid += 1;
            continue;
        }
        sheet.rows.push(ImportRow {
            roll_no,
            hall_ticket_no: non_empty(raw.hall_ticket_no),
            name,
            email: non_empty(raw.email),
            batch: non_empty(raw.batch),
            attendance,
        });
    }
    Ok(sheet)
}

/// Roll numbers and hall tickets already taken, compared case-insensitively.
#[derive(Debug, Default)]
pub struct TakenKeys {
    rolls: HashSet<String>,
    hall_tickets: HashSet<String>,
}

impl TakenKeys {
    pub fn insert(&mut self, roll_no: &str, hall_ticket_no: Option<&str>) {
        self.rolls.insert(roll_no.trim().to_ascii_uppercase());
        if let Some(ht) = hall_ticket_no {
            self.hall_tickets.insert(ht.trim().to_ascii_uppercase());
        }
    }

    /// Claims the row's keys; false when either is already taken.
    pub fn claim(&mut self, row: &ImportRow) -> bool {
        let roll = row.roll_no.trim().to_ascii_uppercase();
        let ht = row
            .hall_ticket_no
            .as_deref()
            .map(|h| h.trim().to_ascii_uppercase());
        if self.rolls.contains(&roll) {
            return false;
        }
        if let Some(ht) = ht.as_ref() {
            if self.hall_tickets.contains(ht) {
                return false;
            }
        }
        self.rolls.insert(roll);
        if let Some(ht) = ht {
            self.hall_tickets.insert(ht);
        }
        true
    }
}
