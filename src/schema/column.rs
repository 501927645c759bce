//! Column definitions and their modifiers.

use crate::models::SqlValue;

/// Logical column type; each grammar maps it onto a native type.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnType {
    Char(u32),
    String(u32),
    Text,
    MediumText,
    LongText,
    TinyInteger,
    SmallInteger,
    MediumInteger,
    Integer,
    BigInteger,
    Decimal { precision: u8, scale: u8 },
    Float,
    Double,
    Boolean,
    Json,
    Enum(Vec<String>),
    Date,
    DateTime,
    Time,
    Timestamp,
    Year,
    Binary,
    Uuid,
}

impl ColumnType {
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Self::TinyInteger | Self::SmallInteger | Self::MediumInteger | Self::Integer | Self::BigInteger
        )
    }

    /// Types that need `DEFAULT NULL` spelled out when nullable.
    pub fn is_temporal_point(&self) -> bool {
        matches!(self, Self::DateTime | Self::Timestamp)
    }
}

/// Column default: a bound-style value or a raw SQL expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnDefault {
    Value(SqlValue),
    Expression(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratedKind {
    Stored,
    Virtual,
}

/// A column and its modifiers, compiled in a fixed order by the grammar.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub kind: ColumnType,
    pub unsigned: bool,
    pub nullable: bool,
    pub default: Option<ColumnDefault>,
    pub auto_increment: bool,
    pub primary: bool,
    pub unique: bool,
    pub index: bool,
    pub comment: Option<String>,
    pub charset: Option<String>,
    pub collation: Option<String>,
    pub use_current_on_update: bool,
    pub generated: Option<(String, GeneratedKind)>,
    /// Modify an existing column instead of adding one
    pub change: bool,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, kind: ColumnType) -> Self {
        Self {
            name: name.into(),
            kind,
            unsigned: false,
            nullable: false,
            default: None,
            auto_increment: false,
            primary: false,
            unique: false,
            index: false,
            comment: None,
            charset: None,
            collation: None,
            use_current_on_update: false,
            generated: None,
            change: false,
        }
    }

    pub fn nullable(&mut self) -> &mut Self {
        self.nullable = true;
        self
    }

    pub fn not_null(&mut self) -> &mut Self {
        self.nullable = false;
        self
    }

    pub fn default(&mut self, value: impl Into<SqlValue>) -> &mut Self {
        self.default = Some(ColumnDefault::Value(value.into()));
        self
    }

    /// Raw SQL default such as `CURRENT_TIMESTAMP`.
    pub fn default_raw(&mut self, expression: impl Into<String>) -> &mut Self {
        self.default = Some(ColumnDefault::Expression(expression.into()));
        self
    }

    pub fn use_current(&mut self) -> &mut Self {
        self.default_raw("CURRENT_TIMESTAMP")
    }

    /// Refresh the column to the current time whenever the row changes.
    ///
    /// MySQL compiles this inline; PostgreSQL and SQLite get a trigger.
    pub fn use_current_on_update(&mut self) -> &mut Self {
        self.use_current_on_update = true;
        self
    }

    pub fn unsigned(&mut self) -> &mut Self {
        self.unsigned = true;
        self
    }

    pub fn auto_increment(&mut self) -> &mut Self {
        self.auto_increment = true;
        self
    }

    pub fn primary(&mut self) -> &mut Self {
        self.primary = true;
        self
    }

    pub fn unique(&mut self) -> &mut Self {
        self.unique = true;
        self
    }

    pub fn index(&mut self) -> &mut Self {
        self.index = true;
        self
    }

    pub fn comment(&mut self, comment: impl Into<String>) -> &mut Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn charset(&mut self, charset: impl Into<String>) -> &mut Self {
        self.charset = Some(charset.into());
        self
    }

    pub fn collation(&mut self, collation: impl Into<String>) -> &mut Self {
        self.collation = Some(collation.into());
        self
    }

    pub fn stored_as(&mut self, expression: impl Into<String>) -> &mut Self {
        self.generated = Some((expression.into(), GeneratedKind::Stored));
        self
    }

    pub fn virtual_as(&mut self, expression: impl Into<String>) -> &mut Self {
        self.generated = Some((expression.into(), GeneratedKind::Virtual));
        self
    }

    /// Mark the column as a modification of an existing one.
    pub fn change(&mut self) -> &mut Self {
        self.change = true;
        self
    }

    /// A static default that is not NULL.
    pub fn has_static_default(&self) -> bool {
        matches!(&self.default, Some(ColumnDefault::Value(v)) if !v.is_null())
    }
}
