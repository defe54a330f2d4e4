// src/db/query.rs

//! Safe filter/sort/paginate query construction for the package table
//!
//! Every field that may appear in a filter or sort position is a member of
//! the closed [`PackageField`] enum; field names arriving from the outside
//! world go through [`PackageField::from_str`], which is the only gate
//! between caller input and SQL text. Values are always bound as
//! parameters, never interpolated.

use crate::error::{Error, Result};
use rusqlite::types::Value;
use std::fmt;
use std::str::FromStr;

/// Reserved separator for the stored depends/provides token lists
pub const TOKEN_SEPARATOR: char = ',';

/// Join a token list into its stored single-column form.
///
/// Fails if any element contains the separator, which would corrupt
/// membership matching for every other element in the row.
pub fn join_tokens(tokens: &[String]) -> Result<String> {
    for token in tokens {
        if token.contains(TOKEN_SEPARATOR) {
            return Err(Error::ParseError(format!(
                "token '{}' contains the reserved separator '{}'",
                token, TOKEN_SEPARATOR
            )));
        }
    }
    Ok(tokens.join(&TOKEN_SEPARATOR.to_string()))
}

/// Split a stored token column back into its list form
pub fn split_tokens(joined: &str) -> Vec<String> {
    if joined.is_empty() {
        return Vec::new();
    }
    joined.split(TOKEN_SEPARATOR).map(str::to_string).collect()
}

/// How a field participates in filter matching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// String values match as substring, everything else as equality
    Plain,
    /// Lenient boolean parse; unparseable values skip the filter entirely
    Boolean,
    /// Separator-wrapped containment over a joined token list
    TokenList,
}

/// The allow-list of queryable package fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageField {
    Name,
    Section,
    InstalledSize,
    Maintainer,
    Version,
    VersionInstalled,
    Depends,
    Provides,
    Size,
    Filename,
    Description,
    Changelog,
    Installed,
    Exporting,
    Manager,
    Container,
}

impl PackageField {
    pub const ALL: [PackageField; 16] = [
        PackageField::Name,
        PackageField::Section,
        PackageField::InstalledSize,
        PackageField::Maintainer,
        PackageField::Version,
        PackageField::VersionInstalled,
        PackageField::Depends,
        PackageField::Provides,
        PackageField::Size,
        PackageField::Filename,
        PackageField::Description,
        PackageField::Changelog,
        PackageField::Installed,
        PackageField::Exporting,
        PackageField::Manager,
        PackageField::Container,
    ];

    /// External (API) name of the field
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageField::Name => "name",
            PackageField::Section => "section",
            PackageField::InstalledSize => "installedSize",
            PackageField::Maintainer => "maintainer",
            PackageField::Version => "version",
            PackageField::VersionInstalled => "versionInstalled",
            PackageField::Depends => "depends",
            PackageField::Provides => "provides",
            PackageField::Size => "size",
            PackageField::Filename => "filename",
            PackageField::Description => "description",
            PackageField::Changelog => "changelog",
            PackageField::Installed => "installed",
            PackageField::Exporting => "exporting",
            PackageField::Manager => "manager",
            PackageField::Container => "container",
        }
    }

    /// Column name in the packages table
    pub fn column(&self) -> &'static str {
        match self {
            PackageField::Name => "name",
            PackageField::Section => "section",
            PackageField::InstalledSize => "installed_size",
            PackageField::Maintainer => "maintainer",
            PackageField::Version => "version",
            PackageField::VersionInstalled => "version_installed",
            PackageField::Depends => "depends",
            PackageField::Provides => "provides",
            PackageField::Size => "size",
            PackageField::Filename => "filename",
            PackageField::Description => "description",
            PackageField::Changelog => "changelog",
            PackageField::Installed => "installed",
            PackageField::Exporting => "exporting",
            PackageField::Manager => "manager",
            PackageField::Container => "container",
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            PackageField::Installed | PackageField::Exporting => FieldKind::Boolean,
            PackageField::Depends | PackageField::Provides => FieldKind::TokenList,
            _ => FieldKind::Plain,
        }
    }

    /// Comma-separated list of allowed field names for error messages
    pub fn allowed_list() -> String {
        Self::ALL
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for PackageField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .find(|f| f.as_str() == s)
            .copied()
            .ok_or_else(|| Error::InvalidField {
                field: s.to_string(),
                allowed: Self::allowed_list(),
            })
    }
}

/// Sort direction; anything unrecognized falls back to ascending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("desc") {
            SortOrder::Desc
        } else {
            SortOrder::Asc
        }
    }

    fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// A filter value as supplied by the caller
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Integer(i64),
    Bool(bool),
}

impl FilterValue {
    /// Lenient boolean interpretation; None means "not a boolean"
    fn parse_bool(&self) -> Option<bool> {
        match self {
            FilterValue::Bool(b) => Some(*b),
            FilterValue::Integer(i) => Some(*i != 0),
            FilterValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "y" | "on" => Some(true),
                "0" | "false" | "no" | "n" | "off" => Some(false),
                _ => None,
            },
        }
    }

    /// The literal text used for token-list containment matching
    fn as_token(&self) -> String {
        match self {
            FilterValue::Text(s) => s.clone(),
            FilterValue::Integer(i) => i.to_string(),
            FilterValue::Bool(b) => b.to_string(),
        }
    }
}

/// One allow-listed filter condition
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: PackageField,
    pub value: FilterValue,
}

impl Filter {
    pub fn new(field: PackageField, value: FilterValue) -> Self {
        Self { field, value }
    }

    /// Convenience constructor taking an external field name
    pub fn parse(field: &str, value: FilterValue) -> Result<Self> {
        Ok(Self::new(field.parse()?, value))
    }

    /// Append this filter's SQL condition and bound arguments.
    ///
    /// Boolean fields with an unparseable value append nothing: the filter
    /// is skipped rather than failing the whole query.
    fn push_condition(&self, conditions: &mut Vec<String>, args: &mut Vec<Value>) {
        let column = self.field.column();
        match self.field.kind() {
            FieldKind::Boolean => {
                if let Some(value) = self.value.parse_bool() {
                    conditions.push(format!("{} = ?", column));
                    args.push(Value::Integer(i64::from(value)));
                }
            }
            FieldKind::TokenList => {
                // Wrap both sides with the separator so "lib" cannot match
                // inside "libfoo".
                conditions.push(format!("',' || {} || ',' LIKE ?", column));
                args.push(Value::Text(format!("%,{},%", self.value.as_token())));
            }
            FieldKind::Plain => match &self.value {
                FilterValue::Text(s) => {
                    conditions.push(format!("{} LIKE ?", column));
                    args.push(Value::Text(format!("%{}%", s)));
                }
                FilterValue::Integer(i) => {
                    conditions.push(format!("{} = ?", column));
                    args.push(Value::Integer(*i));
                }
                FilterValue::Bool(b) => {
                    conditions.push(format!("{} = ?", column));
                    args.push(Value::Integer(i64::from(*b)));
                }
            },
        }
    }
}

/// A complete filter/sort/paginate request against the package table
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    pub filters: Vec<Filter>,
    pub sort: Option<(PackageField, SortOrder)>,
    /// limit <= 0 disables pagination entirely (offset is then ignored)
    pub limit: i64,
    pub offset: i64,
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: PackageField, value: FilterValue) -> Self {
        self.filters.push(Filter::new(field, value));
        self
    }

    pub fn sort(mut self, field: PackageField, order: SortOrder) -> Self {
        self.sort = Some((field, order));
        self
    }

    pub fn paginate(mut self, limit: i64, offset: i64) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    /// Render the query suffix after `SELECT ... FROM packages`.
    ///
    /// `base_conditions`/`base_args` carry the store's scope restriction so
    /// it is ANDed with the caller's filters.
    pub(crate) fn build(
        &self,
        base_conditions: Vec<String>,
        base_args: Vec<Value>,
    ) -> (String, Vec<Value>) {
        let mut conditions = base_conditions;
        let mut args = base_args;

        for filter in &self.filters {
            filter.push_condition(&mut conditions, &mut args);
        }

        let mut sql = String::new();
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        if let Some((field, order)) = self.sort {
            sql.push_str(&format!(" ORDER BY {} {}", field.column(), order.as_sql()));
        }

        if self.limit > 0 {
            sql.push_str(" LIMIT ?");
            args.push(Value::Integer(self.limit));
            if self.offset > 0 {
                sql.push_str(" OFFSET ?");
                args.push(Value::Integer(self.offset));
            }
        }

        (sql, args)
    }

    /// Render only the WHERE portion, for COUNT queries
    pub(crate) fn build_where(
        &self,
        base_conditions: Vec<String>,
        base_args: Vec<Value>,
    ) -> (String, Vec<Value>) {
        let mut conditions = base_conditions;
        let mut args = base_args;

        for filter in &self.filters {
            filter.push_condition(&mut conditions, &mut args);
        }

        let mut sql = String::new();
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        (sql, args)
    }
}
