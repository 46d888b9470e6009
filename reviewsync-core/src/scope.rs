//! Scope predicate: which remote records belong to the working set.
//!
//! Every caller (bootstrap, reconciliation, manual load, post-save
//! classification) goes through the same [`ScopePredicate`] so a record is
//! judged identically no matter how it arrived.

use serde::{Deserialize, Serialize};

use crate::types::{FieldValue, Record};

/// Classifies whether a record currently belongs to the working set.
///
/// Implementations must be pure and total: a missing or malformed field
/// means "not in scope", never a panic or an error.
pub trait ScopePredicate: Send + Sync {
    fn in_scope(&self, record: &Record) -> bool;

    /// Optional server-side rendering of this predicate. Only an
    /// optimization for the initial full fetch; results are still
    /// re-checked locally.
    fn remote_filter(&self) -> Option<String> {
        None
    }
}

/// Adapts a plain closure into a [`ScopePredicate`].
pub struct FnScope<F>(pub F);

impl<F> ScopePredicate for FnScope<F>
where
    F: Fn(&Record) -> bool + Send + Sync,
{
    fn in_scope(&self, record: &Record) -> bool {
        (self.0)(record)
    }
}

/// One condition on a named field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FieldCondition {
    /// Field is text (or a number) exactly equal to `value`.
    Equals { field: String, value: String },
    /// Field equals one of `values`.
    OneOf { field: String, values: Vec<String> },
    /// Field is missing or blank.
    Blank { field: String },
    /// Field is present and not blank.
    Present { field: String },
}

impl FieldCondition {
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            FieldCondition::Equals { field, value } => record
                .field(field)
                .map(|v| value_equals(v, value))
                .unwrap_or(false),
            FieldCondition::OneOf { field, values } => record
                .field(field)
                .map(|v| values.iter().any(|want| value_equals(v, want)))
                .unwrap_or(false),
            FieldCondition::Blank { field } => record.is_blank(field),
            FieldCondition::Present { field } => !record.is_blank(field),
        }
    }

    fn formula(&self) -> String {
        match self {
            FieldCondition::Equals { field, value } => {
                format!("{{{field}}} = '{}'", escape_formula(value))
            }
            FieldCondition::OneOf { field, values } => {
                let parts: Vec<String> = values
                    .iter()
                    .map(|v| format!("{{{field}}} = '{}'", escape_formula(v)))
                    .collect();
                format!("OR({})", parts.join(", "))
            }
            FieldCondition::Blank { field } => {
                format!("OR({{{field}}} = \"\", NOT({{{field}}}))")
            }
            FieldCondition::Present { field } => format!("NOT({{{field}}} = \"\")"),
        }
    }
}

/// Conjunction of field conditions. An empty rule set admits every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeRules {
    #[serde(default)]
    pub all: Vec<FieldCondition>,
}

impl Default for ScopeRules {
    /// Builder-issued backcharges that have not been approved or disputed yet.
    fn default() -> Self {
        Self {
            all: vec![
                FieldCondition::Equals {
                    field: "Type of Backcharge".to_string(),
                    value: "Builder Issued Backcharge".to_string(),
                },
                FieldCondition::Blank {
                    field: "Approved or Dispute".to_string(),
                },
            ],
        }
    }
}

impl ScopePredicate for ScopeRules {
    fn in_scope(&self, record: &Record) -> bool {
        self.all.iter().all(|c| c.matches(record))
    }

    fn remote_filter(&self) -> Option<String> {
        match self.all.as_slice() {
            [] => None,
            [only] => Some(only.formula()),
            many => {
                let parts: Vec<String> = many.iter().map(FieldCondition::formula).collect();
                Some(format!("AND({})", parts.join(", ")))
            }
        }
    }
}

fn value_equals(value: &FieldValue, want: &str) -> bool {
    match value {
        FieldValue::Text(s) => s == want,
        FieldValue::Number(n) => want.parse::<f64>().map(|w| w == *n).unwrap_or(false),
        _ => false,
    }
}

fn escape_formula(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Fields;
    use rstest::rstest;

    fn record(kind: Option<&str>, decision: Option<&str>) -> Record {
        let mut fields = Fields::new();
        if let Some(kind) = kind {
            fields.insert("Type of Backcharge".into(), FieldValue::from(kind));
        }
        if let Some(decision) = decision {
            fields.insert("Approved or Dispute".into(), FieldValue::from(decision));
        }
        Record::new("recA", fields)
    }

    #[rstest]
    #[case(Some("Builder Issued Backcharge"), None, true)]
    #[case(Some("Builder Issued Backcharge"), Some(""), true)]
    #[case(Some("Builder Issued Backcharge"), Some("  "), true)]
    #[case(Some("Builder Issued Backcharge"), Some("Approve"), false)]
    #[case(Some("Builder Issued Backcharge"), Some("Dispute"), false)]
    #[case(Some("Vendor Backcharge"), None, false)]
    #[case(None, None, false)]
    fn default_rules_classify(
        #[case] kind: Option<&str>,
        #[case] decision: Option<&str>,
        #[case] expected: bool,
    ) {
        assert_eq!(ScopeRules::default().in_scope(&record(kind, decision)), expected);
    }

    #[test]
    fn equals_does_not_match_links() {
        let mut fields = Fields::new();
        fields.insert(
            "Type of Backcharge".into(),
            FieldValue::Links(vec!["Builder Issued Backcharge".into()]),
        );
        assert!(!ScopeRules::default().in_scope(&Record::new("recA", fields)));
    }

    #[test]
    fn numbers_compare_by_value() {
        let rules = ScopeRules {
            all: vec![FieldCondition::OneOf {
                field: "Priority".into(),
                values: vec!["1".into(), "2".into()],
            }],
        };
        let mut fields = Fields::new();
        fields.insert("Priority".into(), FieldValue::Number(2.0));
        assert!(rules.in_scope(&Record::new("recA", fields)));
    }

    #[test]
    fn empty_rules_admit_everything_and_have_no_filter() {
        let rules = ScopeRules { all: vec![] };
        assert!(rules.in_scope(&record(None, None)));
        assert!(rules.remote_filter().is_none());
    }

    #[test]
    fn default_rules_render_formula() {
        let formula = ScopeRules::default().remote_filter().expect("formula");
        assert_eq!(
            formula,
            "AND({Type of Backcharge} = 'Builder Issued Backcharge', \
             OR({Approved or Dispute} = \"\", NOT({Approved or Dispute})))"
        );
    }

    #[test]
    fn formula_escapes_quotes() {
        let rules = ScopeRules {
            all: vec![FieldCondition::Equals {
                field: "Client".into(),
                value: "O'Neil".into(),
            }],
        };
        assert_eq!(rules.remote_filter().as_deref(), Some("{Client} = 'O\\'Neil'"));
    }

    #[test]
    fn closures_are_predicates() {
        let scope = FnScope(|r: &Record| r.id.as_str().starts_with("rec"));
        assert!(scope.in_scope(&record(None, None)));
        assert!(scope.remote_filter().is_none());
    }

    #[test]
    fn rules_deserialize_from_yaml() {
        let yaml = "all:\n  - op: equals\n    field: Kind\n    value: A\n  - op: blank\n    field: Decision\n";
        let rules: ScopeRules = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(rules.all.len(), 2);
        assert_eq!(
            rules.all[1],
            FieldCondition::Blank {
                field: "Decision".into()
            }
        );
    }
}
