//! Plaintext cross-probe protocol.
//!
//! Outbound commands are single newline-terminated lines:
//!
//! ```text
//! select -obj <kind> -hier <path> -name <n1,n2,...>
//! select -obj <kind> -name <n1,n2,...>
//! selectCurObject -obj <kind> -name <n1,n2,...>
//! ```
//!
//! Names are joined by `,` without whitespace and are never escaped, so they
//! must not contain `,`. Inbound text from a tool has no grammar; only the
//! liveness marker is interpreted.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ToolName;
use crate::hier;

/// Substring a tool sends once it is ready to receive commands.
pub const TOOL_READY_MARKER: &str = "toolinvoked";

/// Kind of design object being probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Net,
    #[serde(alias = "inst")]
    Instance,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Net => "net",
            Self::Instance => "instance",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ObjectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "net" => Ok(Self::Net),
            "instance" | "inst" => Ok(Self::Instance),
            other => Err(format!("unknown object kind: {other}")),
        }
    }
}

/// Object names in first-insertion order, without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameSet {
    names: Vec<String>,
    seen: HashSet<String>,
}

impl NameSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a name. Returns false if it was already present.
    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if !self.seen.insert(name.clone()) {
            return false;
        }
        self.names.push(name);
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.seen.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// The comma-separated wire form.
    pub fn to_csv(&self) -> String {
        self.names.join(",")
    }
}

impl<S: Into<String>> FromIterator<S> for NameSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for name in iter {
            set.insert(name);
        }
        set
    }
}

/// A command understood by the remote tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Select objects, changing the displayed scope to `hier` when present.
    Select {
        kind: ObjectKind,
        hier: Option<String>,
        names: NameSet,
    },
    /// Select objects within the scope the tool already shows.
    SelectCurObject { kind: ObjectKind, names: NameSet },
}

impl Command {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Select { kind, .. } | Self::SelectCurObject { kind, .. } => *kind,
        }
    }

    pub fn names(&self) -> &NameSet {
        match self {
            Self::Select { names, .. } | Self::SelectCurObject { names, .. } => names,
        }
    }

    /// Encode to the newline-terminated wire line.
    pub fn encode(&self) -> String {
        match self {
            Self::Select {
                kind,
                hier: Some(hier),
                names,
            } => format!("select -obj {kind} -hier {hier} -name {}\n", names.to_csv()),
            Self::Select {
                kind,
                hier: None,
                names,
            } => format!("select -obj {kind} -name {}\n", names.to_csv()),
            Self::SelectCurObject { kind, names } => {
                format!("selectCurObject -obj {kind} -name {}\n", names.to_csv())
            }
        }
    }

    /// Parse a command line back into its structured form.
    ///
    /// Returns `None` for anything that is not one of the three shapes.
    pub fn parse(line: &str) -> Option<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let (verb, rest) = tokens.split_first()?;
        let kind = match rest {
            ["-obj", kind, ..] => kind.parse::<ObjectKind>().ok()?,
            _ => return None,
        };
        match (*verb, &rest[2..]) {
            ("select", ["-hier", hier, "-name", names]) => Some(Self::Select {
                kind,
                hier: Some((*hier).to_string()),
                names: names.split(',').collect(),
            }),
            ("select", ["-name", names]) => Some(Self::Select {
                kind,
                hier: None,
                names: names.split(',').collect(),
            }),
            ("selectCurObject", ["-name", names]) => Some(Self::SelectCurObject {
                kind,
                names: names.split(',').collect(),
            }),
            _ => None,
        }
    }

    /// Full path of the first selected net, formatted for `tool`.
    ///
    /// Only net selections have a meaningful echo path.
    pub fn tool_path(&self, tool: ToolName) -> Option<String> {
        if self.kind() != ObjectKind::Net {
            return None;
        }
        let name = self.names().iter().next()?;
        let hier = match self {
            Self::Select { hier: Some(hier), .. } => hier.as_str(),
            _ => "",
        };
        Some(hier::tool_path(tool, hier, name))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode().trim_end())
    }
}

/// Interpretation of text received from a tool peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    ToolReady,
    Other(String),
}

impl Inbound {
    pub fn classify(text: &str) -> Self {
        if text.contains(TOOL_READY_MARKER) {
            Self::ToolReady
        } else {
            Self::Other(text.to_string())
        }
    }
}
