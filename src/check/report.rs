//! Check results in the Nagios plugin output format.
//!
//! ```text
//! CRITICAL: 1 of 2 pool members unavailable | current_connections=12 ...
//! WARNING: Member /Common/10.0.0.2:80: enabled, offline
//! OK: Member /Common/10.0.0.1:80: enabled, available
//! ```

use std::fmt;

/// Check severity. Declaration order is the aggregation order, so UNKNOWN
/// wins over CRITICAL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Status {
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl Status {
    pub fn exit_code(self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::Warning => 1,
            Status::Critical => 2,
            Status::Unknown => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Warning => "WARNING",
            Status::Critical => "CRITICAL",
            Status::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One performance datum: `label=value[unit];warn;crit;min;max`.
#[derive(Debug, Clone, PartialEq)]
pub struct PerfDatum {
    pub label: String,
    pub unit: String,
    pub value: f64,
    pub warn: String,
    pub crit: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl PerfDatum {
    pub fn new(label: impl Into<String>, unit: impl Into<String>, value: f64) -> Self {
        Self {
            label: label.into(),
            unit: unit.into(),
            value,
            warn: String::new(),
            crit: String::new(),
            min: None,
            max: None,
        }
    }

    pub fn with_thresholds(mut self, warn: &str, crit: &str) -> Self {
        self.warn = warn.to_string();
        self.crit = crit.to_string();
        self
    }

    pub fn with_min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }
}

impl fmt::Display for PerfDatum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.label.contains([' ', '=', '\'']) {
            write!(f, "'{}'", self.label.replace('\'', "''"))?;
        } else {
            f.write_str(&self.label)?;
        }

        let mut fields = vec![
            format!("{}{}", format_number(self.value), self.unit),
            self.warn.clone(),
            self.crit.clone(),
            self.min.map(format_number).unwrap_or_default(),
            self.max.map(format_number).unwrap_or_default(),
        ];
        while fields.len() > 1 && fields.last().is_some_and(String::is_empty) {
            fields.pop();
        }
        write!(f, "={}", fields.join(";"))
    }
}

/// Formats a number without exponent; integral values without decimals.
pub fn format_number(value: f64) -> String {
    if !value.is_finite() {
        return "U".to_string();
    }
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.0}", value)
    } else {
        let text = format!("{:.6}", value);
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

/// Accumulated verdicts and performance data of one check run.
#[derive(Debug, Default)]
pub struct CheckReport {
    results: Vec<(Status, String)>,
    perfdata: Vec<PerfDatum>,
}

impl CheckReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_result(&mut self, status: Status, message: impl Into<String>) {
        self.results.push((status, message.into()));
    }

    pub fn add_perf_datum(&mut self, datum: PerfDatum) {
        self.perfdata.push(datum);
    }

    /// Shorthand for a datum without thresholds.
    pub fn add_perf(&mut self, label: &str, unit: &str, value: f64) {
        self.perfdata.push(PerfDatum::new(label, unit, value));
    }

    pub fn results(&self) -> &[(Status, String)] {
        &self.results
    }

    pub fn perfdata(&self) -> &[PerfDatum] {
        &self.perfdata
    }

    /// Number of verdicts with exactly `status`.
    pub fn count(&self, status: Status) -> usize {
        self.results.iter().filter(|(s, _)| *s == status).count()
    }

    /// Worst status seen; UNKNOWN for an empty report.
    pub fn status(&self) -> Status {
        self.results
            .iter()
            .map(|(s, _)| *s)
            .max()
            .unwrap_or(Status::Unknown)
    }

    /// Renders plugin output and the matching exit code.
    pub fn render(&self) -> (String, i32) {
        let status = self.status();

        let headline = if self.results.is_empty() {
            "no check results".to_string()
        } else {
            self.results
                .iter()
                .filter(|(s, _)| *s == status)
                .map(|(_, m)| m.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut out = format!("{}: {}", status.label(), headline);
        if !self.perfdata.is_empty() {
            let perf: Vec<String> = self.perfdata.iter().map(ToString::to_string).collect();
            out.push_str(" | ");
            out.push_str(&perf.join(" "));
        }
        for (s, message) in self.results.iter().filter(|(s, _)| *s != status) {
            out.push('\n');
            out.push_str(&format!("{}: {}", s.label(), message));
        }

        (out, status.exit_code())
    }
}
