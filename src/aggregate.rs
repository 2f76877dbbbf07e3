//! Turns a grid selection into the command sent to the tool.
//!
//! A plain selection probes one object. In a grouped (tree) view the whole
//! sibling group of the anchor row is probed: every object in the anchor's
//! hierarchy level, plus the child block under it for objects deeper down.

use crate::error::ProbeError;
use crate::hier::{self, Delimiter, HierName};
use crate::protocol::{Command, NameSet, ObjectKind};
use crate::scope::ScopeState;
use crate::table::{cell_text, Dataset, SelectionEvent};

/// A command ready to send, with the scope to commit once it is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePlan {
    pub command: Command,
    /// Wire text of `command`.
    pub text: String,
    pub scope_update: Option<String>,
}

impl MessagePlan {
    fn new(command: Command, scope_update: Option<String>) -> Self {
        let text = command.encode();
        Self {
            command,
            text,
            scope_update,
        }
    }
}

/// Build the command for a selection event.
///
/// `dataset` is the table the grid currently shows; it is only consulted
/// when the event carries group-by columns.
pub fn build_message(
    event: &SelectionEvent,
    dataset: &Dataset,
    scope: &ScopeState,
    delimiter: Delimiter,
) -> Result<MessagePlan, ProbeError> {
    let kind = match event.object_kind {
        Some(kind) if !event.column.is_empty() => kind,
        _ => return Err(ProbeError::MissingSelectionCriteria),
    };

    let anchor_row = event.rows.first().ok_or(ProbeError::EmptySelection)?;
    let value = cell_text(anchor_row, &event.column);
    if value.is_empty() {
        return Err(ProbeError::EmptySelection);
    }

    let anchor = probe_name(&value, kind, delimiter);
    let mut names = NameSet::new();
    names.insert(anchor.leaf.clone());

    if !event.group_by_columns.is_empty() {
        for row in dataset.siblings(anchor_row, &event.group_by_columns) {
            let value = cell_text(row, &event.column);
            if value.is_empty() {
                continue;
            }
            if let Some(name) = group_member(&anchor.path, &value, kind, delimiter) {
                names.insert(name);
            }
        }
    }

    Ok(plan_select(kind, anchor.path, names, scope))
}

/// Build the command for a name typed in by the user.
///
/// Manual probes always address the full hierarchy and never touch the
/// tracked scope.
pub fn build_manual(
    name: &str,
    kind: ObjectKind,
    delimiter: Delimiter,
) -> Result<MessagePlan, ProbeError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ProbeError::EmptySelection);
    }
    let target = probe_name(name, kind, delimiter);
    let command = Command::Select {
        kind,
        hier: (!target.path.is_empty()).then_some(target.path),
        names: [target.leaf].into_iter().collect(),
    };
    Ok(MessagePlan::new(command, None))
}

/// Normalized name with the instance prefix removed from the leaf.
fn probe_name(value: &str, kind: ObjectKind, delimiter: Delimiter) -> HierName {
    let HierName { path, leaf } = hier::normalize(value, delimiter);
    let leaf = hier::strip_instance_prefix(kind, &leaf).to_string();
    HierName { path, leaf }
}

/// Name a sibling contributes to the anchor's selection, if any.
///
/// Objects at the anchor's level contribute their leaf; deeper objects
/// contribute the child block directly below the anchor's level.
fn group_member(
    anchor_path: &str,
    value: &str,
    kind: ObjectKind,
    delimiter: Delimiter,
) -> Option<String> {
    let member = probe_name(value, kind, delimiter);
    if member.path == anchor_path {
        return Some(member.leaf);
    }
    let below = member
        .path
        .strip_prefix(anchor_path)?
        .strip_prefix(delimiter.as_char())?;
    let child = below.split(delimiter.as_char()).next()?;
    Some(hier::strip_instance_prefix(kind, child).to_string())
}

fn plan_select(kind: ObjectKind, path: String, names: NameSet, scope: &ScopeState) -> MessagePlan {
    if !scope.should_rescope(&path) {
        return MessagePlan::new(Command::SelectCurObject { kind, names }, None);
    }
    if path.is_empty() {
        // A flat select leaves the tracked scope alone.
        return MessagePlan::new(
            Command::Select {
                kind,
                hier: None,
                names,
            },
            None,
        );
    }
    MessagePlan::new(
        Command::Select {
            kind,
            hier: Some(path.clone()),
            names,
        },
        Some(path),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{CellValue, Row};

    fn data(rows: Vec<Row>) -> Dataset {
        Dataset {
            rows,
            group_by: vec![],
        }
    }

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), CellValue::from(*v)))
            .collect()
    }

    fn event(rows: Vec<Row>, kind: ObjectKind, column: &str, group_by: &[&str]) -> SelectionEvent {
        SelectionEvent {
            rows,
            object_kind: Some(kind),
            column: column.to_string(),
            group_by_columns: group_by.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn missing_kind_or_column_is_rejected() {
        let scope = ScopeState::new();
        let mut ev = event(vec![row(&[("net", "a.b")])], ObjectKind::Net, "net", &[]);
        ev.object_kind = None;
        assert!(matches!(
            build_message(&ev, &Dataset::default(), &scope, Delimiter::Dot),
            Err(ProbeError::MissingSelectionCriteria)
        ));

        let ev = event(vec![row(&[("net", "a.b")])], ObjectKind::Net, "", &[]);
        assert!(matches!(
            build_message(&ev, &Dataset::default(), &scope, Delimiter::Dot),
            Err(ProbeError::MissingSelectionCriteria)
        ));
    }

    #[test]
    fn empty_anchor_value_is_silent() {
        let scope = ScopeState::new();
        let ev = event(vec![row(&[("net", "")])], ObjectKind::Net, "net", &[]);
        let err = build_message(&ev, &Dataset::default(), &scope, Delimiter::Dot).unwrap_err();
        assert!(err.is_silent());

        let ev = event(vec![], ObjectKind::Net, "net", &[]);
        assert!(build_message(&ev, &Dataset::default(), &scope, Delimiter::Dot)
            .unwrap_err()
            .is_silent());
    }

    #[test]
    fn single_instance_first_probe_rescopes() {
        let scope = ScopeState::new();
        let ev = event(
            vec![row(&[("cell", "top.sub.minst")])],
            ObjectKind::Instance,
            "cell",
            &[],
        );
        let plan = build_message(&ev, &Dataset::default(), &scope, Delimiter::Dot).unwrap();
        assert_eq!(plan.text, "select -obj instance -hier top.sub -name inst\n");
        assert_eq!(plan.scope_update.as_deref(), Some("top.sub"));
    }

    #[test]
    fn same_scope_uses_select_cur_object() {
        let mut scope = ScopeState::new();
        scope.commit("top.sub");
        let ev = event(
            vec![row(&[("cell", "top.sub.minst")])],
            ObjectKind::Instance,
            "cell",
            &[],
        );
        let plan = build_message(&ev, &Dataset::default(), &scope, Delimiter::Dot).unwrap();
        assert_eq!(plan.text, "selectCurObject -obj instance -name inst\n");
        assert!(plan.scope_update.is_none());
    }

    #[test]
    fn flat_name_does_not_commit_scope() {
        let mut scope = ScopeState::new();
        scope.commit("top");
        let ev = event(vec![row(&[("net", "vdd")])], ObjectKind::Net, "net", &[]);
        let plan = build_message(&ev, &Dataset::default(), &scope, Delimiter::Dot).unwrap();
        assert_eq!(plan.text, "select -obj net -name vdd\n");
        assert!(plan.scope_update.is_none());
    }

    #[test]
    fn flat_name_with_no_scope_yet_is_in_place() {
        // Empty path equals the empty initial scope.
        let scope = ScopeState::new();
        let ev = event(vec![row(&[("net", "vdd")])], ObjectKind::Net, "net", &[]);
        let plan = build_message(&ev, &Dataset::default(), &scope, Delimiter::Dot).unwrap();
        assert_eq!(plan.text, "selectCurObject -obj net -name vdd\n");
    }

    #[test]
    fn group_collects_same_level_siblings() {
        let scope = ScopeState::new();
        let anchor = row(&[("block", "b1"), ("net", "top.xxreg.q")]);
        let dataset = vec![
            anchor.clone(),
            row(&[("block", "b1"), ("net", "top.xxreg.d")]),
            row(&[("block", "b2"), ("net", "top.xxreg.clk")]),
        ];
        let ev = event(vec![anchor], ObjectKind::Net, "net", &["block"]);
        let plan = build_message(&ev, &data(dataset), &scope, Delimiter::Dot).unwrap();
        assert_eq!(plan.text, "select -obj net -hier top.reg -name q,d\n");
        assert_eq!(plan.scope_update.as_deref(), Some("top.reg"));
    }

    #[test]
    fn group_adds_child_block_for_deeper_rows() {
        let scope = ScopeState::new();
        let anchor = row(&[("block", "b1"), ("cell", "top.rinv1")]);
        let dataset = vec![
            anchor.clone(),
            row(&[("block", "b1"), ("cell", "top.xmbuf.xsub.rleaf")]),
            row(&[("block", "b1"), ("cell", "other.rfoo")]),
            row(&[("block", "b1"), ("cell", "topx.rbar")]),
            row(&[("block", "b1"), ("cell", "")]),
        ];
        let ev = event(vec![anchor], ObjectKind::Instance, "cell", &["block"]);
        let plan = build_message(&ev, &data(dataset), &scope, Delimiter::Dot).unwrap();
        let names: Vec<&str> = plan.command.names().iter().collect();
        assert_eq!(names, vec!["inv1", "buf"]);
        assert_eq!(plan.text, "select -obj instance -hier top -name inv1,buf\n");
    }

    #[test]
    fn group_always_contains_anchor() {
        let scope = ScopeState::new();
        let anchor = row(&[("block", "b1"), ("net", "a.b.n1")]);
        // Anchor row is not part of the dataset snapshot.
        let dataset = vec![row(&[("block", "b2"), ("net", "a.b.n2")])];
        let ev = event(vec![anchor], ObjectKind::Net, "net", &["block"]);
        let plan = build_message(&ev, &data(dataset), &scope, Delimiter::Dot).unwrap();
        assert!(plan.command.names().contains("n1"));
        assert_eq!(plan.command.names().len(), 1);
    }

    #[test]
    fn group_in_current_scope_selects_in_place() {
        let mut scope = ScopeState::new();
        scope.commit("top.reg");
        let anchor = row(&[("block", "b1"), ("net", "top.xxreg.q")]);
        let dataset = vec![anchor.clone(), row(&[("block", "b1"), ("net", "top.reg.d")])];
        let ev = event(vec![anchor], ObjectKind::Net, "net", &["block"]);
        let plan = build_message(&ev, &data(dataset), &scope, Delimiter::Dot).unwrap();
        assert_eq!(plan.text, "selectCurObject -obj net -name q,d\n");
        assert!(plan.scope_update.is_none());
    }

    #[test]
    fn group_matches_numeric_group_values() {
        let scope = ScopeState::new();
        let mut anchor = row(&[("net", "top.n1")]);
        anchor.insert("rank".into(), CellValue::Number(1.0));
        let mut sibling = row(&[("net", "top.n2")]);
        sibling.insert("rank".into(), CellValue::Number(1.0));
        let mut other = row(&[("net", "top.n3")]);
        other.insert("rank".into(), CellValue::Number(2.0));

        let dataset = vec![anchor.clone(), sibling, other];
        let ev = event(vec![anchor], ObjectKind::Net, "net", &["rank"]);
        let plan = build_message(&ev, &data(dataset), &scope, Delimiter::Dot).unwrap();
        assert_eq!(plan.command.names().to_csv(), "n1,n2");
    }

    #[test]
    fn manual_probe_always_full_select() {
        let plan = build_manual("top.sub.minst", ObjectKind::Instance, Delimiter::Dot).unwrap();
        assert_eq!(plan.text, "select -obj instance -hier top.sub -name inst\n");
        assert!(plan.scope_update.is_none());

        let plan = build_manual("vdd", ObjectKind::Net, Delimiter::Dot).unwrap();
        assert_eq!(plan.text, "select -obj net -name vdd\n");

        assert!(build_manual("  ", ObjectKind::Net, Delimiter::Dot).is_err());
    }
}
