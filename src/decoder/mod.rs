//! Violation decoding
//!
//! The engine reports a violation as `@<timestamp> (time point <n>): <tuple>`,
//! where the tuple lists the values of the formula's free variables in the
//! order the engine reported them for `-check`. Decoding zips that order
//! with the values. It is best effort: anything that cannot be mapped
//! reliably is passed on verbatim.

mod tuple;


pub use tuple::parse_tuple;

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use tracing::warn;

static ENGINE_VIOLATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@(\d+) \(time point (\d+)\): (.*)$").expect("Invalid regex pattern")
});

static RENDERED_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@(\d+) \(time point (\d+)\):$").expect("Invalid regex pattern")
});

static RENDERED_BINDING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^ (\S+) = "(.*)"$"#).expect("Invalid regex pattern"));

/// A violation as shown to humans
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationRecord {
    Decoded {
        timestamp: u64,
        time_point: u64,
        bindings: Vec<(String, String)>,
    },
    /// The engine's message, passed on unchanged
    Raw(String),
}

impl ViolationRecord {
    pub fn is_decoded(&self) -> bool {
        matches!(self, ViolationRecord::Decoded { .. })
    }
}

impl fmt::Display for ViolationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationRecord::Decoded {
                timestamp,
                time_point,
                bindings,
            } => {
                write!(f, "@{timestamp} (time point {time_point}):")?;
                for (name, value) in bindings {
                    write!(f, "\n {name} = \"{value}\"")?;
                }
                Ok(())
            }
            ViolationRecord::Raw(text) => f.write_str(text),
        }
    }
}

/// Decodes violations of one formula
#[derive(Debug, Clone, Copy)]
pub struct ViolationDecoder<'a> {
    variables: &'a [String],
}

impl<'a> ViolationDecoder<'a> {
    pub fn new(variables: &'a [String]) -> Self {
        Self { variables }
    }

    /// Decode an engine message; never fails.
    ///
    /// Already rendered violations decode to the same record again.
    pub fn decode(&self, message: &str) -> ViolationRecord {
        if let Some(record) = parse_rendered(message, self.variables) {
            return record;
        }

        let Some(captures) = ENGINE_VIOLATION.captures(message) else {
            return ViolationRecord::Raw(message.to_string());
        };

        let (Ok(timestamp), Ok(time_point)) =
            (captures[1].parse::<u64>(), captures[2].parse::<u64>())
        else {
            return ViolationRecord::Raw(message.to_string());
        };

        let Some(values) = parse_tuple(&captures[3]) else {
            warn!("could not parse violation tuple; original violation: {message}");
            return ViolationRecord::Raw(message.to_string());
        };

        if values.len() != self.variables.len() {
            warn!(
                "could not match variable names against tuple values:\n var_seq = {};\n val_seq = {};\n original violation: {message}",
                self.variables.join(", "),
                values.join(", ")
            );
            return ViolationRecord::Raw(message.to_string());
        }

        ViolationRecord::Decoded {
            timestamp,
            time_point,
            bindings: self.variables.iter().cloned().zip(values).collect(),
        }
    }
}

/// Recognize the output of [`ViolationRecord`]'s `Display` for decoded records
/// of a formula with exactly `variables` as free variables
fn parse_rendered(message: &str, variables: &[String]) -> Option<ViolationRecord> {
    let mut lines = message.lines();
    let header = RENDERED_HEADER.captures(lines.next()?)?;
    let timestamp = header[1].parse().ok()?;
    let time_point = header[2].parse().ok()?;

    let bindings = lines
        .map(|line| {
            RENDERED_BINDING
                .captures(line)
                .map(|c| (c[1].to_string(), c[2].to_string()))
        })
        .collect::<Option<Vec<_>>>()?;

    let names_match = bindings.len() == variables.len()
        && bindings
            .iter()
            .zip(variables)
            .all(|((name, _), variable)| name == variable);
    if !names_match {
        return None;
    }

    Some(ViolationRecord::Decoded {
        timestamp,
        time_point,
        bindings,
    })
}
