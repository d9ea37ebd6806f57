//! Systemd unit file serialization
//!
//! Transforms between a unit file's text and a structured list of options so
//! providers can adjust individual entries (say, add a kubelet flag) without
//! string surgery. Section order, option order, and backslash line
//! continuations are preserved so an untouched unit round-trips verbatim.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const PAYLOAD: &str = "systemd unit";

/// One `Key=Value` entry of a systemd unit file, with its section
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct UnitOption {
    /// Section the option lives in, without brackets (e.g. "Service")
    pub section: String,
    /// Option name left of the `=`
    pub name: String,
    /// Option value, including any `\`-continued lines
    pub value: String,
}

impl UnitOption {
    /// Create a new unit option
    pub fn new(
        section: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            section: section.into(),
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Serializer between unit file text and [`UnitOption`] lists
#[derive(Clone, Copy, Debug, Default)]
pub struct UnitSerializer;

impl UnitSerializer {
    /// Parse unit file text into options
    ///
    /// Blank lines and comment lines (`#`, `;`) are dropped; a value ending
    /// in `\` continues on the next line and the continuation is kept in the
    /// value so serialization reproduces it.
    pub fn deserialize(&self, content: &str) -> Result<Vec<UnitOption>> {
        let mut options = Vec::new();
        let mut section: Option<String> = None;
        let mut lines = content.lines();

        while let Some(line) = lines.next() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            if let Some(name) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                section = Some(name.to_string());
                continue;
            }

            let current = section
                .clone()
                .ok_or_else(|| Error::decode(PAYLOAD, format!("option {trimmed:?} outside any section")))?;

            let (name, value) = trimmed
                .split_once('=')
                .ok_or_else(|| Error::decode(PAYLOAD, format!("malformed line {trimmed:?}")))?;

            let mut value = value.to_string();
            while value.ends_with('\\') {
                match lines.next() {
                    Some(next) => {
                        value.push('\n');
                        value.push_str(next);
                    }
                    None => break,
                }
            }

            options.push(UnitOption::new(current, name, value));
        }

        Ok(options)
    }

    /// Render options back into unit file text
    ///
    /// Sections are emitted in order of first appearance, separated by a
    /// blank line, each header followed by its options in order.
    pub fn serialize(&self, options: &[UnitOption]) -> Result<String> {
        let mut out = String::new();
        let mut current: Option<&str> = None;

        for option in options {
            if option.section.is_empty() || option.name.is_empty() {
                return Err(Error::encode(
                    PAYLOAD,
                    format!("option {:?} has an empty section or name", option.name),
                ));
            }

            if current != Some(option.section.as_str()) {
                if current.is_some() {
                    out.push('\n');
                }
                out.push('[');
                out.push_str(&option.section);
                out.push_str("]\n");
                current = Some(option.section.as_str());
            }

            out.push_str(&option.name);
            out.push('=');
            out.push_str(&option.value);
            out.push('\n');
        }

        Ok(out)
    }
}
