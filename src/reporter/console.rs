//! Terminal reporter for local runs.

use std::io::{self, Write};

use anyhow::{Context, Result};
use colored::Colorize;

use crate::report::{Annotation, BackupReport, FieldData, ReportField};

use super::{reports_to_deliver, BackupReporter};

/// Prints reports to a writer (stdout by default) with colored status markers.
pub struct ConsoleReporter<W: Write = io::Stdout> {
    out: W,
}

impl ConsoleReporter<io::Stdout> {
    pub fn new() -> Self {
        Self { out: io::stdout() }
    }
}

impl Default for ConsoleReporter<io::Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn with_writer(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_report(&mut self, report: &BackupReport) -> io::Result<()> {
        let status = if report.successful {
            "OK".green().bold()
        } else {
            "FAILED".red().bold()
        };
        writeln!(self.out, "{} [{}]", report.name.as_str().bold(), status)?;

        for field in &report.fields {
            self.write_field(field)?;
        }

        writeln!(self.out)
    }

    fn write_field(&mut self, field: &ReportField) -> io::Result<()> {
        let annotation = field.annotation();

        if annotation == Some(Annotation::MultilineText) {
            writeln!(self.out, "  {}:", field.label.as_str().cyan())?;
            for line in field.data.to_string().lines() {
                writeln!(self.out, "    {line}")?;
            }
            return Ok(());
        }

        let value = match &field.data {
            FieldData::Bool(true) => "yes".to_string(),
            FieldData::Bool(false) => "no".to_string(),
            data => data.to_string(),
        };
        let value = value.as_str();
        let value = match annotation {
            Some(Annotation::Ok) => value.green(),
            Some(Annotation::Warning) => value.yellow(),
            Some(Annotation::Error) | Some(Annotation::ErrorUnknown) => value.red(),
            _ => value.normal(),
        };

        writeln!(self.out, "  {}: {}", field.label.as_str().cyan(), value)
    }
}

impl<W: Write> BackupReporter for ConsoleReporter<W> {
    fn report(&mut self, report: &BackupReport) -> Result<()> {
        for r in reports_to_deliver(report) {
            self.write_report(r)
                .with_context(|| format!("Failed to print report '{}'", r.name))?;
        }
        self.out.flush().context("Failed to flush report output")
    }
}
