use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::coerce::{self, lookup, lookup_text, normalize_ident};
use super::{FieldValue, StageKind, StageRecord, StageTarget};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRecord {
    pub schema: String,
    pub table: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRecord {
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    #[serde(deserialize_with = "coerce::length")]
    pub length: Option<i64>,
    #[serde(deserialize_with = "coerce::boolean")]
    pub is_primary_key: bool,
    #[serde(deserialize_with = "coerce::boolean")]
    pub is_nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub name: String,
    pub table: String,
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
}

fn strip_brackets(s: &str) -> String {
    let t = s.trim();
    t.strip_prefix('[')
        .and_then(|r| r.strip_suffix(']'))
        .unwrap_or(t)
        .to_string()
}

impl StageRecord for TableRecord {
    const KIND: StageKind = StageKind::Tables;
    const FIELDS: &'static [&'static str] = &["schema", "table"];

    fn key(&self) -> String {
        format!(
            "{}.{}",
            normalize_ident(&self.schema),
            normalize_ident(&self.table)
        )
    }

    fn label(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    fn values(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("schema", FieldValue::Text(self.schema.clone())),
            ("table", FieldValue::Text(self.table.clone())),
        ]
    }

    fn from_raw(raw: &Value, _target: &StageTarget) -> Option<Self> {
        match raw {
            // `ListTables`-style tools answer with bare "schema.table" strings.
            Value::String(qualified) => {
                let (schema, table) = qualified.trim().split_once('.')?;
                Some(TableRecord {
                    schema: strip_brackets(schema),
                    table: strip_brackets(table),
                })
            }
            Value::Object(obj) => Some(TableRecord {
                schema: strip_brackets(&lookup_text(
                    obj,
                    &["schema", "table_schema", "schema_name", "owner"],
                )?),
                table: strip_brackets(&lookup_text(obj, &["table", "table_name", "name"])?),
            }),
            _ => None,
        }
    }
}

impl StageRecord for ColumnRecord {
    const KIND: StageKind = StageKind::Columns;
    const FIELDS: &'static [&'static str] = &[
        "table_name",
        "column_name",
        "data_type",
        "length",
        "is_primary_key",
        "is_nullable",
    ];

    fn key(&self) -> String {
        format!(
            "{}.{}",
            normalize_ident(&self.table_name),
            normalize_ident(&self.column_name)
        )
    }

    fn label(&self) -> String {
        format!("{}.{}", self.table_name, self.column_name)
    }

    fn values(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("table_name", FieldValue::Text(self.table_name.clone())),
            ("column_name", FieldValue::Text(self.column_name.clone())),
            ("data_type", FieldValue::Text(self.data_type.clone())),
            ("length", FieldValue::Int(self.length)),
            ("is_primary_key", FieldValue::Bool(self.is_primary_key)),
            ("is_nullable", FieldValue::Bool(self.is_nullable)),
        ]
    }

    fn from_raw(raw: &Value, target: &StageTarget) -> Option<Self> {
        let obj = raw.as_object()?;
        let table_name = lookup_text(obj, &["table_name", "table"]).or(target.table.clone())?;
        let length = match lookup(
            obj,
            &["length", "max_length", "character_maximum_length", "size"],
        ) {
            Some(v) => coerce::length_from_value(v).ok()?,
            None => None,
        };
        Some(ColumnRecord {
            table_name: strip_brackets(&table_name),
            column_name: strip_brackets(&lookup_text(obj, &["column_name", "column", "name"])?),
            data_type: lookup_text(obj, &["data_type", "type_name", "type"])?,
            length,
            is_primary_key: lookup(obj, &["is_primary_key", "primary_key", "is_pk", "pk"])
                .and_then(coerce::bool_from_value)?,
            is_nullable: lookup(obj, &["is_nullable", "nullable"])
                .and_then(coerce::bool_from_value)?,
        })
    }

    fn in_scope(&self, target: &StageTarget) -> bool {
        target
            .table
            .as_deref()
            .is_none_or(|t| normalize_ident(t) == normalize_ident(&self.table_name))
    }
}

impl StageRecord for RelationshipRecord {
    const KIND: StageKind = StageKind::Relationships;
    const FIELDS: &'static [&'static str] = &["name", "table", "column", "ref_table", "ref_column"];

    fn key(&self) -> String {
        format!(
            "{}.{}",
            normalize_ident(&self.name),
            normalize_ident(&self.column)
        )
    }

    fn label(&self) -> String {
        format!(
            "{} ({}.{} -> {}.{})",
            self.name, self.table, self.column, self.ref_table, self.ref_column
        )
    }

    fn values(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("name", FieldValue::Text(self.name.clone())),
            ("table", FieldValue::Text(self.table.clone())),
            ("column", FieldValue::Text(self.column.clone())),
            ("ref_table", FieldValue::Text(self.ref_table.clone())),
            ("ref_column", FieldValue::Text(self.ref_column.clone())),
        ]
    }

    fn from_raw(raw: &Value, _target: &StageTarget) -> Option<Self> {
        let obj = raw.as_object()?;
        Some(RelationshipRecord {
            name: lookup_text(
                obj,
                &["name", "constraint_name", "fk_name", "foreign_key_name"],
            )?,
            table: strip_brackets(&lookup_text(
                obj,
                &["table", "table_name", "parent_table", "fk_table"],
            )?),
            column: strip_brackets(&lookup_text(
                obj,
                &["column", "column_name", "parent_column", "fk_column"],
            )?),
            ref_table: strip_brackets(&lookup_text(
                obj,
                &[
                    "ref_table",
                    "referenced_table",
                    "referenced_table_name",
                    "pk_table",
                ],
            )?),
            ref_column: strip_brackets(&lookup_text(
                obj,
                &[
                    "ref_column",
                    "referenced_column",
                    "referenced_column_name",
                    "pk_column",
                ],
            )?),
        })
    }

    fn in_scope(&self, target: &StageTarget) -> bool {
        target
            .table
            .as_deref()
            .is_none_or(|t| normalize_ident(t) == normalize_ident(&self.table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tables_from_qualified_strings_and_objects() {
        let target = StageTarget::tables("SalesDb");
        let a = TableRecord::from_raw(&json!("[dbo].[Orders]"), &target).unwrap();
        assert_eq!(a.schema, "dbo");
        assert_eq!(a.table, "Orders");

        let b = TableRecord::from_raw(
            &json!({"TABLE_SCHEMA": "sales", "TABLE_NAME": "Customers"}),
            &target,
        )
        .unwrap();
        assert_eq!(b.label(), "sales.Customers");
        assert!(TableRecord::from_raw(&json!("Orders"), &target).is_none());
    }

    #[test]
    fn columns_take_target_table_and_coerce_fields() {
        let target = StageTarget::columns("SalesDb", "Orders");
        let raw = json!({
            "COLUMN_NAME": "Notes",
            "DATA_TYPE": "nvarchar",
            "CHARACTER_MAXIMUM_LENGTH": -1,
            "IS_NULLABLE": "YES",
            "IS_PK": 0
        });
        let col = ColumnRecord::from_raw(&raw, &target).unwrap();
        assert_eq!(col.table_name, "Orders");
        assert_eq!(col.length, Some(-1));
        assert!(col.is_nullable);
        assert!(!col.is_primary_key);
    }

    #[test]
    fn columns_without_key_or_nullability_are_unreadable() {
        let target = StageTarget::columns("SalesDb", "Orders");
        let no_key = json!({"column_name": "Id", "data_type": "int", "is_nullable": false});
        let no_null = json!({"column_name": "Id", "data_type": "int", "is_primary_key": true});
        let bad_length = json!({
            "column_name": "Price",
            "data_type": "decimal",
            "length": 4.5,
            "is_primary_key": false,
            "is_nullable": true
        });
        assert!(ColumnRecord::from_raw(&no_key, &target).is_none());
        assert!(ColumnRecord::from_raw(&no_null, &target).is_none());
        assert!(ColumnRecord::from_raw(&bad_length, &target).is_none());
    }

    #[test]
    fn relationships_are_scoped_to_the_target_table() {
        let target = StageTarget::relationships("SalesDb", "Orders");
        let raw = json!({
            "constraint_name": "FK_Orders_Customers",
            "parent_table": "Orders",
            "parent_column": "CustomerId",
            "referenced_table": "Customers",
            "referenced_column": "Id"
        });
        let rel = RelationshipRecord::from_raw(&raw, &target).unwrap();
        assert!(rel.in_scope(&target));
        assert!(!rel.in_scope(&StageTarget::relationships("SalesDb", "Customers")));
    }

    #[test]
    fn column_deserialization_coerces_textual_booleans() {
        let col: ColumnRecord = serde_json::from_value(json!({
            "table_name": "Orders",
            "column_name": "Id",
            "data_type": "int",
            "length": "4",
            "is_primary_key": "true",
            "is_nullable": "false"
        }))
        .unwrap();
        assert!(col.is_primary_key);
        assert!(!col.is_nullable);
        assert_eq!(col.length, Some(4));
    }
}
