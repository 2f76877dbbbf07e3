//! Hierarchical name normalization.
//!
//! Cell values in sign-off reports carry tool decorations: an `@suffix`,
//! `/` separators, a trailing `.main` and `x`/`xx` prefixes on generated
//! hierarchy levels. `normalize` strips those and splits the result into the
//! hierarchy path and the leaf object name.

use serde::{Deserialize, Serialize};

use crate::config::ToolName;
use crate::protocol::ObjectKind;

/// Hierarchy delimiter used for the final split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Delimiter {
    #[default]
    #[serde(rename = ".")]
    Dot,
    #[serde(rename = "/")]
    Slash,
}

impl Delimiter {
    pub fn as_char(self) -> char {
        match self {
            Self::Dot => '.',
            Self::Slash => '/',
        }
    }
}

impl std::str::FromStr for Delimiter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "." => Ok(Self::Dot),
            "/" => Ok(Self::Slash),
            other => Err(format!("delimiter must be '.' or '/', got '{other}'")),
        }
    }
}

/// A value split into its hierarchy path and leaf name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HierName {
    /// Ancestry of the object; empty for a flat name.
    pub path: String,
    pub leaf: String,
}

/// Normalize a raw cell value and split it into `(path, leaf)`.
pub fn normalize(raw: &str, delimiter: Delimiter) -> HierName {
    let delim = delimiter.as_char();

    let trimmed = raw.split('@').next().unwrap_or_default();
    let canonical = trimmed.replace('/', ".");
    let canonical = canonical.strip_suffix(".main").unwrap_or(&canonical);

    let joined = canonical
        .split(delim)
        .map(strip_generated_prefix)
        .collect::<Vec<_>>()
        .join(&delim.to_string());

    match joined.rsplit_once(delim) {
        Some((path, leaf)) => HierName {
            path: path.to_string(),
            leaf: leaf.to_string(),
        },
        None => HierName {
            path: String::new(),
            leaf: joined,
        },
    }
}

/// Undo the `x` / `xx` prefix tools put on generated hierarchy levels.
///
/// `xx` (not followed by `or`) collapses to `x`, then one leading `x` is
/// dropped. Matching is case-insensitive.
fn strip_generated_prefix(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let is_x = |b: u8| b.eq_ignore_ascii_case(&b'x');

    let collapsed = if bytes.len() >= 2 && is_x(bytes[0]) && is_x(bytes[1]) {
        let rest = &segment[2..];
        let followed_by_or = rest
            .get(..2)
            .is_some_and(|next| next.eq_ignore_ascii_case("or"));
        if followed_by_or {
            segment
        } else {
            // Both leading bytes are ASCII, so slicing at 1 is a char boundary.
            &segment[1..]
        }
    } else {
        segment
    };

    match collapsed.as_bytes().first() {
        Some(&b) if is_x(b) => collapsed[1..].to_string(),
        _ => collapsed.to_string(),
    }
}

/// Drop the `r`/`m` prefix instance names carry in the netlist.
///
/// Applies to instances only, and never empties a one-character name.
pub fn strip_instance_prefix(kind: ObjectKind, leaf: &str) -> &str {
    if kind != ObjectKind::Instance || leaf.chars().count() <= 1 {
        return leaf;
    }
    leaf.strip_prefix(|c: char| c == 'r' || c == 'm').unwrap_or(leaf)
}

/// Format an object path the way the given tool names it.
pub fn tool_path(tool: ToolName, path: &str, leaf: &str) -> String {
    if path.is_empty() {
        return leaf.to_string();
    }
    let hier = match tool {
        ToolName::CustomWaveView => path
            .split('.')
            .map(|segment| format!("x{segment}"))
            .collect::<Vec<_>>()
            .join("."),
        ToolName::Verdi => path.replace('.', "/"),
        ToolName::Other => path.to_string(),
    };
    format!("{hier}.{leaf}")
}
