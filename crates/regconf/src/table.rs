use core::fmt;
use std::collections::HashMap;

use crate::value::{Decoded, Scalar, TypeTag};

/// What was learned about one register during a pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterTableCell {
    /// Position at discovery time.
    pub index: u16,
    pub tag: TypeTag,
    /// `None` when the value could not be decoded.
    pub value: Option<Scalar>,
}

/// Per node register table, built fresh for every pass.
///
/// Never contains the empty name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegisterTable {
    cells: HashMap<String, RegisterTableCell>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Read,
    Write,
}

/// One printed line of a configuration pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterRow {
    pub index: u16,
    pub name: String,
    pub tag: TypeTag,
    pub value: Option<Scalar>,
    pub kind: RowKind,
}

impl RegisterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the decoded value of `name`. Returns `false`, and stores
    /// nothing, for the empty name.
    pub fn insert(&mut self, name: &str, index: u16, decoded: Decoded) -> bool {
        if name.is_empty() {
            return false;
        }
        self.cells.insert(
            name.to_owned(),
            RegisterTableCell {
                index,
                tag: decoded.tag,
                value: decoded.value,
            },
        );
        true
    }

    pub fn get(&self, name: &str) -> Option<&RegisterTableCell> {
        self.cells.get(name)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Cells ordered by discovery index.
    pub fn iter_by_index(&self) -> impl Iterator<Item = (&str, &RegisterTableCell)> {
        let mut cells: Vec<_> = self.cells.iter().map(|(k, v)| (k.as_str(), v)).collect();
        cells.sort_by_key(|(_, cell)| cell.index);
        cells.into_iter()
    }
}

impl RegisterRow {
    pub fn new(index: u16, name: &str, decoded: &Decoded, kind: RowKind) -> Self {
        Self {
            index,
            name: name.to_owned(),
            tag: decoded.tag,
            value: decoded.value.clone(),
            kind,
        }
    }
}

impl fmt::Display for RegisterRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let index = format!("{}.", self.index);
        let value = match &self.value {
            Some(v) => v.to_string(),
            None => "None".to_owned(),
        };
        write!(
            f,
            "{:<3} {:<30} {:<10} {:<5}",
            index,
            self.name,
            self.tag.as_str(),
            value
        )
    }
}

#[cfg(test)]
mod test {
    use super::{RegisterRow, RegisterTable, RowKind};
    use crate::value::{Decoded, Scalar, Value, decode};

    #[test]
    fn empty_name_is_rejected() {
        let mut table = RegisterTable::new();
        assert!(!table.insert("", 0, decode(&Value::Empty)));
        assert!(table.is_empty());
        assert!(table.insert("uavcan.node.id", 0, decode(&Value::Natural16(vec![50]))));
        assert_eq!(table.len(), 1);
        let cell = table.get("uavcan.node.id").unwrap();
        assert_eq!(cell.value, Some(Scalar::Natural16(50)));
        assert_eq!(cell.tag.as_str(), "natural16");
    }

    #[test]
    fn iteration_follows_discovery() {
        let mut table = RegisterTable::new();
        table.insert("b", 1, decode(&Value::Bit(vec![true])));
        table.insert("c", 2, Decoded::UNKNOWN);
        table.insert("a", 0, decode(&Value::Empty));
        let names: Vec<&str> = table.iter_by_index().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn row_layout() {
        let decoded = decode(&Value::Natural16(vec![7]));
        let row = RegisterRow::new(3, "uavcan.node.id", &decoded, RowKind::Read);
        assert_eq!(
            row.to_string(),
            format!("{:<3} {:<30} {:<10} {:<5}", "3.", "uavcan.node.id", "natural16", "7")
        );
        assert_eq!(&row.to_string()[..4], "3.  ");

        let row = RegisterRow::new(12, "weird", &Decoded::UNKNOWN, RowKind::Write);
        assert!(row.to_string().starts_with("12. weird"));
        assert!(row.to_string().ends_with("Unknown    None "));
    }
}
