use chrono::{DateTime, Local};
use serde_json::Value;
use std::fmt;

use crate::rclone::RcloneResult;
use crate::restic::ResticResult;

/// Presentation hint attached to a report field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Annotation {
    Ok,
    Warning,
    Error,
    ErrorUnknown,
    /// The field's data is free-form text that should be shown on its own lines.
    MultilineText,
}

/// Maps field data to an optional annotation.
///
/// A plain function pointer, so an annotator cannot capture state and always
/// yields the same annotation for the same data.
pub type Annotator = fn(&FieldData) -> Option<Annotation>;

/// Value held by a report field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldData {
    Bool(bool),
    Int(i64),
    Text(String),
    Time(DateTime<Local>),
    /// Structured data, rendered as multi-line text.
    Structured(Value),
    /// A value the tool was expected to provide but did not.
    Missing,
}

impl FieldData {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldData::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldData::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldData::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, FieldData::Missing)
    }
}

impl fmt::Display for FieldData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldData::Bool(b) => write!(f, "{b}"),
            FieldData::Int(i) => write!(f, "{i}"),
            FieldData::Text(s) => f.write_str(s),
            FieldData::Time(t) => write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S")),
            FieldData::Structured(Value::String(s)) => f.write_str(s),
            FieldData::Structured(v) => match serde_json::to_string_pretty(v) {
                Ok(s) => f.write_str(&s),
                Err(_) => write!(f, "{v}"),
            },
            FieldData::Missing => f.write_str("(missing)"),
        }
    }
}

impl From<bool> for FieldData {
    fn from(value: bool) -> Self {
        FieldData::Bool(value)
    }
}

impl From<i64> for FieldData {
    fn from(value: i64) -> Self {
        FieldData::Int(value)
    }
}

impl From<i32> for FieldData {
    fn from(value: i32) -> Self {
        FieldData::Int(value.into())
    }
}

impl From<u64> for FieldData {
    fn from(value: u64) -> Self {
        FieldData::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<usize> for FieldData {
    fn from(value: usize) -> Self {
        FieldData::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<&str> for FieldData {
    fn from(value: &str) -> Self {
        FieldData::Text(value.to_string())
    }
}

impl From<String> for FieldData {
    fn from(value: String) -> Self {
        FieldData::Text(value)
    }
}

impl From<DateTime<Local>> for FieldData {
    fn from(value: DateTime<Local>) -> Self {
        FieldData::Time(value)
    }
}

impl From<Value> for FieldData {
    fn from(value: Value) -> Self {
        FieldData::Structured(value)
    }
}

impl<T: Into<FieldData>> From<Option<T>> for FieldData {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldData::Missing)
    }
}

/// Annotators shared by the services.
pub mod annotators {
    use super::{Annotation, FieldData};

    pub fn none(_: &FieldData) -> Option<Annotation> {
        None
    }

    pub fn multiline_text(_: &FieldData) -> Option<Annotation> {
        Some(Annotation::MultilineText)
    }

    pub fn ok_if_true_else_error(data: &FieldData) -> Option<Annotation> {
        match data.as_bool() {
            Some(true) => Some(Annotation::Ok),
            _ => Some(Annotation::Error),
        }
    }

    pub fn ok_if_false_else_warning(data: &FieldData) -> Option<Annotation> {
        match data.as_bool() {
            Some(false) => Some(Annotation::Ok),
            _ => Some(Annotation::Warning),
        }
    }

    pub fn ok_if_false_else_error(data: &FieldData) -> Option<Annotation> {
        match data.as_bool() {
            Some(false) => Some(Annotation::Ok),
            _ => Some(Annotation::Error),
        }
    }

    pub fn ok_if_zero_else_error(data: &FieldData) -> Option<Annotation> {
        match data.as_int() {
            Some(0) => Some(Annotation::Ok),
            _ => Some(Annotation::Error),
        }
    }

    pub fn error_if_missing(data: &FieldData) -> Option<Annotation> {
        if data.is_missing() {
            Some(Annotation::Error)
        } else {
            None
        }
    }
}

/// A labeled value in a report.
#[derive(Clone)]
pub struct ReportField {
    pub label: String,
    pub data: FieldData,
    annotator: Annotator,
}

impl ReportField {
    pub fn new(label: impl Into<String>, data: impl Into<FieldData>, annotator: Annotator) -> Self {
        ReportField {
            label: label.into(),
            data: data.into(),
            annotator,
        }
    }

    /// Evaluate the annotator against the current data.
    pub fn annotation(&self) -> Option<Annotation> {
        (self.annotator)(&self.data)
    }
}

impl PartialEq for ReportField {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label
            && self.data == other.data
            && self.annotation() == other.annotation()
    }
}

impl fmt::Debug for ReportField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportField")
            .field("label", &self.label)
            .field("data", &self.data)
            .field("annotation", &self.annotation())
            .finish()
    }
}

/// Handle to a field of a [`BackupReport`], used to update its data after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldId(usize);

/// Raw tool result a report was built from, kept for diagnostics.
#[derive(Debug, Clone)]
pub enum ReportResult {
    Restic(ResticResult),
    Rclone(RcloneResult),
}

impl ReportResult {
    pub fn returncode(&self) -> i32 {
        match self {
            ReportResult::Restic(r) => r.returncode,
            ReportResult::Rclone(r) => r.returncode,
        }
    }

    pub fn full_cmd(&self) -> &[String] {
        match self {
            ReportResult::Restic(r) => &r.full_cmd,
            ReportResult::Rclone(r) => &r.full_cmd,
        }
    }
}

impl From<ResticResult> for ReportResult {
    fn from(value: ResticResult) -> Self {
        ReportResult::Restic(value)
    }
}

impl From<RcloneResult> for ReportResult {
    fn from(value: RcloneResult) -> Self {
        ReportResult::Rclone(value)
    }
}

/// Hierarchical record of one backup operation and its sub-operations.
///
/// Reports start out unsuccessful and non-omittable; services flip those
/// flags once the outcome is known.
#[derive(Debug, Clone)]
pub struct BackupReport {
    pub name: String,
    pub fields: Vec<ReportField>,
    pub subreports: Vec<BackupReport>,
    pub successful: bool,
    /// The operation was a no-op and the report may be left out of delivery.
    pub omittable: bool,
    pub result: Option<ReportResult>,
}

impl BackupReport {
    pub fn new(name: impl Into<String>) -> Self {
        BackupReport {
            name: name.into(),
            fields: Vec::new(),
            subreports: Vec::new(),
            successful: false,
            omittable: false,
            result: None,
        }
    }

    pub fn add_field(&mut self, field: ReportField) -> FieldId {
        self.fields.push(field);
        FieldId(self.fields.len() - 1)
    }

    /// Create a field, append it, and return a handle for later updates.
    pub fn new_field(
        &mut self,
        label: impl Into<String>,
        data: impl Into<FieldData>,
        annotator: Annotator,
    ) -> FieldId {
        self.add_field(ReportField::new(label, data, annotator))
    }

    pub fn field(&self, id: FieldId) -> Option<&ReportField> {
        self.fields.get(id.0)
    }

    pub fn field_mut(&mut self, id: FieldId) -> Option<&mut ReportField> {
        self.fields.get_mut(id.0)
    }

    /// Replace the data of a previously created field.
    pub fn set_field_data(&mut self, id: FieldId, data: impl Into<FieldData>) {
        if let Some(field) = self.fields.get_mut(id.0) {
            field.data = data.into();
        }
    }

    pub fn add_subreport(&mut self, subreport: BackupReport) {
        self.subreports.push(subreport);
    }

    /// Create a child report named `"{self.name} / {name}"` and return it.
    pub fn new_subreport(&mut self, name: &str) -> &mut BackupReport {
        let subreport = BackupReport::new(format!("{} / {}", self.name, name));
        self.subreports.push(subreport);
        let last = self.subreports.len() - 1;
        &mut self.subreports[last]
    }

    /// First field matching `filter`, searching subreports in pre-order when asked.
    pub fn find_one_field<F>(&self, filter: F, include_subreports: bool) -> Option<&ReportField>
    where
        F: Fn(&ReportField) -> bool,
    {
        if include_subreports {
            self.all_reports()
                .flat_map(|r| r.fields.iter())
                .find(|&f| filter(f))
        } else {
            self.fields.iter().find(|&f| filter(f))
        }
    }

    /// First field in this report (not its subreports) with the given label.
    pub fn find_field(&self, label: &str) -> Option<&ReportField> {
        self.find_one_field(|f| f.label == label, false)
    }

    /// Pre-order traversal: this report, then each subreport's traversal in order.
    pub fn all_reports(&self) -> AllReports<'_> {
        AllReports { stack: vec![self] }
    }

    pub fn set_result(&mut self, result: impl Into<ReportResult>) {
        self.result = Some(result.into());
    }
}

/// Iterator returned by [`BackupReport::all_reports`].
pub struct AllReports<'a> {
    stack: Vec<&'a BackupReport>,
}

impl<'a> Iterator for AllReports<'a> {
    type Item = &'a BackupReport;

    fn next(&mut self) -> Option<Self::Item> {
        let report = self.stack.pop()?;
        self.stack.extend(report.subreports.iter().rev());
        Some(report)
    }
}
