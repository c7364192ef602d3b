//! Mutators and condition functions, and their per-column legality.

use crate::atomic::AtomicKind;
use crate::column::ColumnSchema;
use crate::error::{SchemaError, SchemaResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A mutation operator applied to a column inside a `mutate` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutator {
    /// `+=`
    #[serde(rename = "+=")]
    Add,
    /// `-=`
    #[serde(rename = "-=")]
    Subtract,
    /// `*=`
    #[serde(rename = "*=")]
    Multiply,
    /// `/=`
    #[serde(rename = "/=")]
    Divide,
    /// `%=`
    #[serde(rename = "%=")]
    Modulo,
    /// Insert elements into a set or pairs into a map.
    #[serde(rename = "insert")]
    Insert,
    /// Delete elements from a set, or keys or pairs from a map.
    #[serde(rename = "delete")]
    Delete,
}

impl Mutator {
    /// Returns `true` for the arithmetic mutators.
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            Mutator::Add | Mutator::Subtract | Mutator::Multiply | Mutator::Divide | Mutator::Modulo
        )
    }
}

impl fmt::Display for Mutator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mutator::Add => "+=",
            Mutator::Subtract => "-=",
            Mutator::Multiply => "*=",
            Mutator::Divide => "/=",
            Mutator::Modulo => "%=",
            Mutator::Insert => "insert",
            Mutator::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// A comparison function used in a `where` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionFunction {
    /// `==`
    #[serde(rename = "==")]
    Equal,
    /// `!=`
    #[serde(rename = "!=")]
    NotEqual,
    /// Set/map membership.
    #[serde(rename = "includes")]
    Includes,
    /// Set/map non-membership.
    #[serde(rename = "excludes")]
    Excludes,
    /// `<`
    #[serde(rename = "<")]
    LessThan,
    /// `<=`
    #[serde(rename = "<=")]
    LessThanOrEqual,
    /// `>`
    #[serde(rename = ">")]
    GreaterThan,
    /// `>=`
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
}

impl ConditionFunction {
    /// Returns `true` for the relational (ordering) functions.
    pub fn is_relational(self) -> bool {
        matches!(
            self,
            ConditionFunction::LessThan
                | ConditionFunction::LessThanOrEqual
                | ConditionFunction::GreaterThan
                | ConditionFunction::GreaterThanOrEqual
        )
    }
}

impl fmt::Display for ConditionFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionFunction::Equal => "==",
            ConditionFunction::NotEqual => "!=",
            ConditionFunction::Includes => "includes",
            ConditionFunction::Excludes => "excludes",
            ConditionFunction::LessThan => "<",
            ConditionFunction::LessThanOrEqual => "<=",
            ConditionFunction::GreaterThan => ">",
            ConditionFunction::GreaterThanOrEqual => ">=",
        };
        f.write_str(s)
    }
}

impl ColumnSchema {
    /// Checks that `mutator` is legal for this column.
    ///
    /// Arithmetic mutators require a mutable numeric column or a set of
    /// numerics; `%=` additionally requires the integer kind. `insert` and
    /// `delete` require a mutable set or map. Immutable columns admit no
    /// mutator at all.
    pub fn validate_mutator(&self, column: &str, mutator: Mutator) -> SchemaResult<()> {
        let illegal = |message: &str| SchemaError::IllegalMutator {
            column: column.to_string(),
            mutator: mutator.to_string(),
            message: message.to_string(),
        };

        if !self.mutable {
            return Err(illegal("column is immutable"));
        }

        match mutator {
            Mutator::Insert | Mutator::Delete => {
                if self.ty.is_map() || self.ty.is_set() || self.ty.is_optional() {
                    Ok(())
                } else {
                    Err(illegal("insert/delete require a set or map column"))
                }
            }
            Mutator::Modulo => {
                if self.ty.is_map() {
                    return Err(illegal("%= does not apply to maps"));
                }
                if self.ty.key.kind == AtomicKind::Integer {
                    Ok(())
                } else {
                    Err(illegal("%= requires an integer column"))
                }
            }
            _ => {
                if self.ty.is_map() {
                    return Err(illegal("arithmetic mutators do not apply to maps"));
                }
                if self.ty.key.kind.is_numeric() {
                    Ok(())
                } else {
                    Err(illegal("arithmetic mutators require a numeric column"))
                }
            }
        }
    }

    /// Checks that `function` is legal for this column.
    ///
    /// The relational functions require a numeric column; the equality and
    /// membership functions apply to any column.
    pub fn validate_condition(&self, column: &str, function: ConditionFunction) -> SchemaResult<()> {
        if function.is_relational() && !self.ty.key.kind.is_numeric() {
            return Err(SchemaError::IllegalCondition {
                column: column.to_string(),
                function: function.to_string(),
                message: "relational comparisons require a numeric column".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnType;

    fn column(json: &str) -> ColumnSchema {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn mutator_wire_names() {
        assert_eq!(serde_json::to_string(&Mutator::Add).unwrap(), "\"+=\"");
        assert_eq!(serde_json::to_string(&Mutator::Insert).unwrap(), "\"insert\"");
        let m: Mutator = serde_json::from_str("\"%=\"").unwrap();
        assert_eq!(m, Mutator::Modulo);
    }

    #[test]
    fn condition_wire_names() {
        assert_eq!(
            serde_json::to_string(&ConditionFunction::NotEqual).unwrap(),
            "\"!=\""
        );
        let f: ConditionFunction = serde_json::from_str("\"includes\"").unwrap();
        assert_eq!(f, ConditionFunction::Includes);
    }

    #[test]
    fn arithmetic_requires_numeric() {
        let counter = column(r#"{"type": "integer"}"#);
        assert!(counter.validate_mutator("n", Mutator::Add).is_ok());
        assert!(counter.validate_mutator("n", Mutator::Modulo).is_ok());

        let name = column(r#"{"type": "string"}"#);
        assert!(name.validate_mutator("name", Mutator::Add).is_err());
    }

    #[test]
    fn modulo_rejects_real() {
        let load = column(r#"{"type": "real"}"#);
        assert!(load.validate_mutator("load", Mutator::Multiply).is_ok());
        assert!(load.validate_mutator("load", Mutator::Modulo).is_err());
    }

    #[test]
    fn insert_requires_collection() {
        let tags = column(r#"{"type": {"key": "string", "min": 0, "max": "unlimited"}}"#);
        assert!(tags.validate_mutator("tags", Mutator::Insert).is_ok());
        assert!(tags.validate_mutator("tags", Mutator::Delete).is_ok());

        let name = column(r#"{"type": "string"}"#);
        assert!(name.validate_mutator("name", Mutator::Insert).is_err());
    }

    #[test]
    fn immutable_rejects_everything() {
        let fixed = column(r#"{"type": "integer", "mutable": false}"#);
        assert!(fixed.validate_mutator("fixed", Mutator::Add).is_err());
        assert!(fixed.validate_mutator("fixed", Mutator::Insert).is_err());
    }

    #[test]
    fn relational_conditions_require_numeric() {
        let name = column(r#"{"type": "string"}"#);
        assert!(name
            .validate_condition("name", ConditionFunction::Equal)
            .is_ok());
        assert!(name
            .validate_condition("name", ConditionFunction::LessThan)
            .is_err());

        let n = column(r#"{"type": "integer"}"#);
        assert!(n
            .validate_condition("n", ConditionFunction::GreaterThanOrEqual)
            .is_ok());
    }

    #[test]
    fn scalar_type_helper() {
        let ty = ColumnType::scalar(AtomicKind::Boolean);
        assert!(ty.is_scalar());
    }
}
