//! Canonical text form of dataflows.
//!
//! ```text
//! dataflow my.context
//! ;
//! observe hydrology:Runoff
//!    using im.hydro.runoff
//!    (
//!       observe geography:Elevation
//!          using im.terrain.dem
//!          apply core.urn.resolver(urns = ["im:data.dem"])
//!    )
//!    apply
//!       hydro.runoff(k = 0.3),
//!       core.constant.resolver(value = 1);
//! ```
//!
//! The same dataflow always encodes to the same text. Encoding never fails:
//! problems degrade to [`ENCODING_ERROR`].

use std::fmt::Write;
use std::sync::LazyLock;

use regex::Regex;

use crate::scope::ContextScope;

use super::{Actuator, Dataflow};

/// Returned instead of the encoding when it cannot be produced.
pub const ENCODING_ERROR: &str = "Error encoding dataflow";

const INDENT: usize = 3;

static RE_UNSAFE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9_.\-]+").unwrap());

#[derive(Debug, Clone, Copy)]
pub struct DataflowEncoder {
    max_depth: usize,
}

impl DataflowEncoder {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn encode(&self, dataflow: &Dataflow, scope: &ContextScope) -> String {
        let mut out = String::new();
        match self.write_dataflow(&mut out, dataflow, scope) {
            Ok(()) => out,
            Err(reason) => {
                tracing::warn!(context = %scope.id, reason, "dataflow encoding failed");
                ENCODING_ERROR.to_string()
            }
        }
    }

    fn write_dataflow(
        &self,
        out: &mut String,
        dataflow: &Dataflow,
        scope: &ContextScope,
    ) -> Result<(), &'static str> {
        write!(out, "dataflow {}\n;", sanitize(scope.display_name())).map_err(|_| "write failed")?;
        for actuator in &dataflow.actuators {
            out.push('\n');
            self.write_actuator(out, actuator, 0)?;
            out.push(';');
        }
        Ok(())
    }

    fn write_actuator(&self, out: &mut String, actuator: &Actuator, level: usize) -> Result<(), &'static str> {
        if level > self.max_depth {
            return Err("actuator nesting too deep");
        }
        let indent = " ".repeat(level * 2 * INDENT);
        let inner = " ".repeat(level * 2 * INDENT + INDENT);

        write!(out, "{indent}{} {}", actuator.kind, actuator.target_name()).map_err(|_| "write failed")?;

        if let Some(strategy) = &actuator.strategy {
            write!(out, "\n{inner}using {strategy}").map_err(|_| "write failed")?;
        }

        if !actuator.children.is_empty() {
            write!(out, "\n{inner}(\n").map_err(|_| "write failed")?;
            for (i, child) in actuator.children.iter().enumerate() {
                if i > 0 {
                    out.push_str(",\n");
                }
                self.write_actuator(out, child, level + 1)?;
            }
            write!(out, "\n{inner})").map_err(|_| "write failed")?;
        }

        match actuator.computation.as_slice() {
            [] => {}
            [call] => write!(out, "\n{inner}apply {}", call.encode()).map_err(|_| "write failed")?,
            calls => {
                write!(out, "\n{inner}apply").map_err(|_| "write failed")?;
                let step = " ".repeat(level * 2 * INDENT + 2 * INDENT);
                for (i, call) in calls.iter().enumerate() {
                    let sep = if i + 1 < calls.len() { "," } else { "" };
                    write!(out, "\n{step}{}{sep}", call.encode()).map_err(|_| "write failed")?;
                }
            }
        }
        Ok(())
    }
}

impl Default for DataflowEncoder {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Lowercase dotted identifier derived from a context name.
fn sanitize(name: &str) -> String {
    let lowered = name.trim().to_lowercase().replace(char::is_whitespace, ".");
    let cleaned = RE_UNSAFE.replace_all(&lowered, "");
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned.to_string()
    }
}
