//! Delimited-text import and export of the employee roster.
//!
//! The importer never fails on a single bad row: rows are turned into either a
//! normalized [`CandidateRow`] or a [`RowError`]. Only structural problems
//! (encoding, headers) abort the import.

use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDate;
use csv::{QuoteStyle, ReaderBuilder, StringRecord, Terminator, WriterBuilder};
use serde::Serialize;
use thiserror::Error;

use crate::types::{normalize_optional, EmployeeProfile, EmployeeRecord, EmploymentStatus};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Recognized roster columns in export order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Name,
    GovernmentId,
    Position,
    Status,
    Address,
    Phone,
    Email,
    Gender,
    DateOfBirth,
    BirthPlace,
    JoinedDate,
    LastEducation,
    Religion,
    Bank,
    BankAccountNumber,
}

pub const COLUMNS: [Column; 15] = [
    Column::Name,
    Column::GovernmentId,
    Column::Position,
    Column::Status,
    Column::Address,
    Column::Phone,
    Column::Email,
    Column::Gender,
    Column::DateOfBirth,
    Column::BirthPlace,
    Column::JoinedDate,
    Column::LastEducation,
    Column::Religion,
    Column::Bank,
    Column::BankAccountNumber,
];

impl Column {
    pub fn header(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::GovernmentId => "government_id",
            Self::Position => "position",
            Self::Status => "status",
            Self::Address => "address",
            Self::Phone => "phone",
            Self::Email => "email",
            Self::Gender => "gender",
            Self::DateOfBirth => "date_of_birth",
            Self::BirthPlace => "birth_place",
            Self::JoinedDate => "joined_date",
            Self::LastEducation => "last_education",
            Self::Religion => "religion",
            Self::Bank => "bank",
            Self::BankAccountNumber => "bank_account_number",
        }
    }

    pub fn is_required(self) -> bool {
        matches!(
            self,
            Self::Name | Self::GovernmentId | Self::Position | Self::Status
        )
    }

    fn from_header(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        COLUMNS
            .iter()
            .copied()
            .find(|column| column.header() == normalized)
    }
}

/// Import failures that abort the whole file.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("input is not valid UTF-8: {0}")]
    InvalidEncoding(#[from] std::str::Utf8Error),
    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<&'static str>),
    #[error("column '{0}' appears more than once")]
    DuplicateColumn(&'static str),
    #[error("failed to read header row: {0}")]
    Header(#[source] csv::Error),
}

/// Why a single row was excluded from the import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowErrorKind {
    MissingField { column: &'static str },
    InvalidDate { column: &'static str, value: String },
    InvalidStatus { value: String },
    DuplicateGovernmentId { first_row: usize },
    Malformed { detail: String },
}

impl fmt::Display for RowErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField { column } => write!(f, "missing required field '{column}'"),
            Self::InvalidDate { column, value } => {
                write!(f, "'{value}' in '{column}' is not a YYYY-MM-DD date")
            }
            Self::InvalidStatus { value } => write!(
                f,
                "'{value}' is not one of FULL_TIME, PROBATION, CONTRACT"
            ),
            Self::DuplicateGovernmentId { first_row } => {
                write!(f, "government id already used on row {first_row}")
            }
            Self::Malformed { detail } => write!(f, "malformed row: {detail}"),
        }
    }
}

/// Row-indexed validation error. `row` is the 1-based data row number (header excluded).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    pub row: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub government_id: Option<String>,
    #[serde(flatten)]
    pub kind: RowErrorKind,
    pub message: String,
}

impl RowError {
    fn new(row: usize, government_id: Option<String>, kind: RowErrorKind) -> Self {
        let message = kind.to_string();
        Self {
            row,
            government_id,
            kind,
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRow {
    pub row: usize,
    pub profile: EmployeeProfile,
}

/// Outcome of parsing a roster file. Government IDs are unique across `candidates`.
#[derive(Debug, Default, Clone)]
pub struct ParsedRoster {
    pub candidates: Vec<CandidateRow>,
    pub errors: Vec<RowError>,
}

impl ParsedRoster {
    pub fn profiles(&self) -> Vec<EmployeeProfile> {
        self.candidates
            .iter()
            .map(|candidate| candidate.profile.clone())
            .collect()
    }
}

/// Reads and writes roster files with a fixed delimiter.
#[derive(Debug, Clone, Copy)]
pub struct RosterCsv {
    delimiter: u8,
}

impl Default for RosterCsv {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

impl RosterCsv {
    pub fn new(delimiter: u8) -> Self {
        Self { delimiter }
    }

    /// Parses an uploaded roster file.
    pub fn parse(&self, input: &[u8]) -> Result<ParsedRoster, ParseError> {
        let input = input.strip_prefix(UTF8_BOM).unwrap_or(input);
        std::str::from_utf8(input)?;

        let mut reader = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(input);

        let layout = HeaderLayout::from_record(reader.headers().map_err(ParseError::Header)?)?;

        let mut parsed = ParsedRoster::default();
        let mut seen: HashMap<String, usize> = HashMap::new();

        for (index, result) in reader.records().enumerate() {
            let row = index + 1;
            let record = match result {
                Ok(record) => record,
                Err(err) => {
                    parsed.errors.push(RowError::new(
                        row,
                        None,
                        RowErrorKind::Malformed {
                            detail: err.to_string(),
                        },
                    ));
                    continue;
                }
            };

            if record.len() != layout.width {
                parsed.errors.push(RowError::new(
                    row,
                    None,
                    RowErrorKind::Malformed {
                        detail: format!(
                            "expected {} fields, found {}",
                            layout.width,
                            record.len()
                        ),
                    },
                ));
                continue;
            }

            match layout.read_profile(&record) {
                Ok(profile) => {
                    if let Some(first_row) = seen.get(&profile.government_id) {
                        parsed.errors.push(RowError::new(
                            row,
                            Some(profile.government_id.clone()),
                            RowErrorKind::DuplicateGovernmentId {
                                first_row: *first_row,
                            },
                        ));
                        continue;
                    }
                    seen.insert(profile.government_id.clone(), row);
                    parsed.candidates.push(CandidateRow { row, profile });
                }
                Err((government_id, kind)) => {
                    parsed.errors.push(RowError::new(row, government_id, kind));
                }
            }
        }

        Ok(parsed)
    }

    /// Writes the roster with every recognized column, in a form [`RosterCsv::parse`] reads back unchanged.
    pub fn export(&self, employees: &[EmployeeRecord]) -> Result<String, ExportError> {
        let mut writer = WriterBuilder::new()
            .delimiter(self.delimiter)
            .quote_style(QuoteStyle::Necessary)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(Vec::new());

        writer.write_record(COLUMNS.iter().map(|column| column.header()))?;
        for employee in employees {
            let profile = &employee.profile;
            writer.write_record(COLUMNS.iter().map(|column| export_field(profile, *column)))?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|err| ExportError::Flush(err.to_string()))?;
        String::from_utf8(bytes).map_err(|err| ExportError::Flush(err.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write roster row: {0}")]
    Write(#[from] csv::Error),
    #[error("failed to flush roster export: {0}")]
    Flush(String),
}

fn export_field(profile: &EmployeeProfile, column: Column) -> String {
    fn text(value: &Option<String>) -> String {
        value.clone().unwrap_or_default()
    }
    fn date(value: &Option<NaiveDate>) -> String {
        value
            .map(|date| date.format(DATE_FORMAT).to_string())
            .unwrap_or_default()
    }

    match column {
        Column::Name => profile.name.clone(),
        Column::GovernmentId => profile.government_id.clone(),
        Column::Position => profile.position.clone(),
        Column::Status => profile.status.as_str().to_string(),
        Column::Address => text(&profile.address),
        Column::Phone => text(&profile.phone),
        Column::Email => text(&profile.email),
        Column::Gender => text(&profile.gender),
        Column::DateOfBirth => date(&profile.date_of_birth),
        Column::BirthPlace => text(&profile.birth_place),
        Column::JoinedDate => date(&profile.joined_date),
        Column::LastEducation => text(&profile.last_education),
        Column::Religion => text(&profile.religion),
        Column::Bank => text(&profile.bank),
        Column::BankAccountNumber => profile
            .bank_account_number
            .map(|number| number.to_string())
            .unwrap_or_default(),
    }
}

/// Maps recognized columns to their positions in the uploaded header row.
struct HeaderLayout {
    positions: HashMap<Column, usize>,
    width: usize,
}

type RowFailure = (Option<String>, RowErrorKind);

impl HeaderLayout {
    fn from_record(headers: &StringRecord) -> Result<Self, ParseError> {
        let mut positions = HashMap::new();
        for (index, header) in headers.iter().enumerate() {
            let Some(column) = Column::from_header(header) else {
                continue;
            };
            if positions.insert(column, index).is_some() {
                return Err(ParseError::DuplicateColumn(column.header()));
            }
        }

        let missing: Vec<&'static str> = COLUMNS
            .iter()
            .filter(|column| column.is_required() && !positions.contains_key(column))
            .map(|column| column.header())
            .collect();
        if !missing.is_empty() {
            return Err(ParseError::MissingColumns(missing));
        }

        Ok(Self {
            positions,
            width: headers.len(),
        })
    }

    fn field(&self, record: &StringRecord, column: Column) -> Option<String> {
        let index = *self.positions.get(&column)?;
        normalize_optional(record.get(index).map(str::to_string))
    }

    fn required(&self, record: &StringRecord, column: Column) -> Result<String, RowErrorKind> {
        self.field(record, column)
            .ok_or(RowErrorKind::MissingField {
                column: column.header(),
            })
    }

    fn date(&self, record: &StringRecord, column: Column) -> Result<Option<NaiveDate>, RowErrorKind> {
        match self.field(record, column) {
            None => Ok(None),
            Some(value) => NaiveDate::parse_from_str(&value, DATE_FORMAT)
                .map(Some)
                .map_err(|_| RowErrorKind::InvalidDate {
                    column: column.header(),
                    value,
                }),
        }
    }

    fn read_profile(&self, record: &StringRecord) -> Result<EmployeeProfile, RowFailure> {
        let government_id = self.field(record, Column::GovernmentId);
        let fail = |kind: RowErrorKind| (government_id.clone(), kind);

        let name = self.required(record, Column::Name).map_err(fail)?;
        let government_id_value = self
            .required(record, Column::GovernmentId)
            .map_err(fail)?;
        let position = self.required(record, Column::Position).map_err(fail)?;
        let raw_status = self.required(record, Column::Status).map_err(fail)?;
        let status = EmploymentStatus::parse(&raw_status)
            .ok_or_else(|| fail(RowErrorKind::InvalidStatus { value: raw_status }))?;
        let date_of_birth = self.date(record, Column::DateOfBirth).map_err(fail)?;
        let joined_date = self.date(record, Column::JoinedDate).map_err(fail)?;

        Ok(EmployeeProfile {
            name,
            government_id: government_id_value,
            position,
            status,
            address: self.field(record, Column::Address),
            phone: self.field(record, Column::Phone),
            email: self.field(record, Column::Email),
            gender: self.field(record, Column::Gender),
            date_of_birth,
            birth_place: self.field(record, Column::BirthPlace),
            joined_date,
            last_education: self.field(record, Column::LastEducation),
            religion: self.field(record, Column::Religion),
            bank: self.field(record, Column::Bank),
            bank_account_number: self
                .field(record, Column::BankAccountNumber)
                .and_then(|value| coerce_account_number(&value)),
        })
    }
}

/// Integer-or-null: blanks and anything non-numeric become `None`.
fn coerce_account_number(value: &str) -> Option<i64> {
    let compact: String = value.chars().filter(|ch| !ch.is_whitespace()).collect();
    compact.parse::<i64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::types::OwnerScope;

    const HEADER: &str = "name,government_id,position,status,address,phone,email,gender,date_of_birth,birth_place,joined_date,last_education,religion,bank,bank_account_number";

    fn parse(text: &str) -> ParsedRoster {
        RosterCsv::default().parse(text.as_bytes()).expect("parse")
    }

    #[test]
    fn parses_full_rows_into_profiles() {
        let text = format!(
            "{HEADER}\nAna Putri,3201001,Clerk,full_time,\"Jl. Merdeka 1, Bandung\",0812,ana@example.com,F,1990-04-01,Bandung,2020-01-06,S1,Islam,BCA,\"1234 5678\"\n"
        );
        let parsed = parse(&text);
        assert!(parsed.errors.is_empty(), "{:?}", parsed.errors);
        assert_eq!(parsed.candidates.len(), 1);
        let profile = &parsed.candidates[0].profile;
        assert_eq!(profile.address.as_deref(), Some("Jl. Merdeka 1, Bandung"));
        assert_eq!(profile.status, EmploymentStatus::FullTime);
        assert_eq!(
            profile.date_of_birth,
            NaiveDate::from_ymd_opt(1990, 4, 1)
        );
        assert_eq!(profile.bank_account_number, Some(12_345_678));
    }

    #[test]
    fn missing_required_headers_abort_the_import() {
        let err = RosterCsv::default()
            .parse(b"name,position\nAna,Clerk\n")
            .unwrap_err();
        match err {
            ParseError::MissingColumns(columns) => {
                assert_eq!(columns, vec!["government_id", "status"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn invalid_utf8_is_structural() {
        let err = RosterCsv::default()
            .parse(b"name,government_id,position,status\n\xff\xfe,1,a,CONTRACT\n")
            .unwrap_err();
        assert!(matches!(err, ParseError::InvalidEncoding(_)));
    }

    #[test]
    fn duplicate_headers_are_structural() {
        let err = RosterCsv::default()
            .parse(b"name,NAME,government_id,position,status\n")
            .unwrap_err();
        assert!(matches!(err, ParseError::DuplicateColumn("name")));
    }

    #[test]
    fn unknown_headers_are_ignored_and_order_is_free() {
        let parsed = parse("Status, Position ,notes,Government_ID,Name\ncontract,Driver,hello,77,Budi\n");
        assert!(parsed.errors.is_empty());
        let profile = &parsed.candidates[0].profile;
        assert_eq!(profile.name, "Budi");
        assert_eq!(profile.government_id, "77");
        assert_eq!(profile.status, EmploymentStatus::Contract);
    }

    #[test]
    fn bad_rows_are_reported_and_good_rows_survive() {
        let text = "name,government_id,position,status,date_of_birth\n\
                    Ana,1,Clerk,FULL_TIME,1990-01-01\n\
                    Budi,2,Driver,intern,\n\
                    Citra,3,Cook,CONTRACT,01/02/1990\n\
                    ,4,Cook,CONTRACT,\n\
                    Dewi,1,Clerk,PROBATION,\n\
                    Eko,5,Guard,PROBATION,\n";
        let parsed = parse(text);
        let accepted: Vec<&str> = parsed
            .candidates
            .iter()
            .map(|candidate| candidate.profile.name.as_str())
            .collect();
        assert_eq!(accepted, vec!["Ana", "Eko"]);

        let kinds: Vec<(usize, &RowErrorKind)> =
            parsed.errors.iter().map(|err| (err.row, &err.kind)).collect();
        assert_eq!(kinds.len(), 4);
        assert_eq!(
            kinds[0],
            (2, &RowErrorKind::InvalidStatus { value: "intern".into() })
        );
        assert!(matches!(kinds[1], (3, RowErrorKind::InvalidDate { column: "date_of_birth", .. })));
        assert_eq!(
            kinds[2],
            (4, &RowErrorKind::MissingField { column: "name" })
        );
        assert_eq!(
            kinds[3],
            (5, &RowErrorKind::DuplicateGovernmentId { first_row: 1 })
        );
        assert_eq!(parsed.errors[2].government_id.as_deref(), Some("4"));
    }

    #[test]
    fn short_rows_are_malformed_not_fatal() {
        let parsed = parse("name,government_id,position,status\nAna,1,Clerk\nBudi,2,Driver,CONTRACT\n");
        assert_eq!(parsed.candidates.len(), 1);
        assert!(matches!(parsed.errors[0].kind, RowErrorKind::Malformed { .. }));
    }

    #[test]
    fn non_numeric_account_numbers_become_null() {
        assert_eq!(coerce_account_number("12 34"), Some(1234));
        assert_eq!(coerce_account_number("12-34"), None);
        assert_eq!(coerce_account_number(""), None);
    }

    #[test]
    fn leading_bom_is_ignored() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice(b"name,government_id,position,status\nAna,1,Clerk,CONTRACT\n");
        let parsed = RosterCsv::default().parse(&bytes).expect("parse");
        assert_eq!(parsed.candidates.len(), 1);
    }

    #[test]
    fn export_quotes_delimiters_and_doubles_quotes() {
        let text = "name,government_id,position,status,address\n\"Ana \"\"The Boss\"\" Putri\",1,\"Clerk; Senior\",CONTRACT,\"Jl. A, No. 5\"\n";
        let parsed = parse(text);
        let now = Utc::now();
        let employees: Vec<EmployeeRecord> = parsed
            .candidates
            .iter()
            .map(|candidate| EmployeeRecord {
                id: "e-1".into(),
                owner: OwnerScope::parse("acme").unwrap(),
                profile: candidate.profile.clone(),
                active: true,
                created_at: now,
                updated_at: now,
            })
            .collect();

        let exported = RosterCsv::default().export(&employees).expect("export");
        let line = exported.lines().nth(1).expect("data row");
        assert!(line.starts_with("\"Ana \"\"The Boss\"\" Putri\",1,Clerk; Senior,CONTRACT,\"Jl. A, No. 5\""));

        let reparsed = parse(&exported);
        assert_eq!(reparsed.profiles(), parsed.profiles());
    }

    #[test]
    fn semicolon_delimiter_round_trips() {
        let csv = RosterCsv::new(b';');
        let parsed = csv
            .parse(b"name;government_id;position;status\n\"Ana; Putri\";1;Clerk;CONTRACT\n")
            .expect("parse");
        assert_eq!(parsed.candidates[0].profile.name, "Ana; Putri");
    }
}
