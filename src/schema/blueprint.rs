//! Table blueprints.
//!
//! A [`Blueprint`] records what a migration wants done to one table. It holds
//! no SQL; a [`super::grammar::Grammar`] compiles it for a dialect.

use super::column::{ColumnDefinition, ColumnType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Create,
    Alter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Primary,
    Unique,
    Index,
    Fulltext,
}

impl IndexKind {
    fn suffix(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Unique => "unique",
            Self::Index => "index",
            Self::Fulltext => "fulltext",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub kind: IndexKind,
    pub name: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub references: Vec<String>,
    pub on: String,
    pub on_delete: Option<String>,
    pub on_update: Option<String>,
}

impl ForeignKeyDefinition {
    pub fn references<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.references = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn on(&mut self, table: impl Into<String>) -> &mut Self {
        self.on = table.into();
        self
    }

    /// `CASCADE`, `SET NULL`, `RESTRICT`, `NO ACTION`.
    pub fn on_delete(&mut self, action: impl Into<String>) -> &mut Self {
        self.on_delete = Some(action.into().to_ascii_uppercase());
        self
    }

    pub fn on_update(&mut self, action: impl Into<String>) -> &mut Self {
        self.on_update = Some(action.into().to_ascii_uppercase());
        self
    }

    pub fn cascade_on_delete(&mut self) -> &mut Self {
        self.on_delete("CASCADE")
    }
}

/// Structural changes other than adding or modifying a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlterChange {
    RenameColumn { from: String, to: String },
    DropColumn(String),
    DropIndex(String),
    DropUnique(String),
    DropPrimary(Option<String>),
    DropForeign(String),
}

/// MySQL table options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableOptions {
    pub engine: Option<String>,
    pub charset: Option<String>,
    pub collation: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Blueprint {
    table: String,
    intent: Intent,
    pub(crate) if_not_exists: bool,
    columns: Vec<ColumnDefinition>,
    indexes: Vec<IndexDefinition>,
    foreigns: Vec<ForeignKeyDefinition>,
    changes: Vec<AlterChange>,
    options: TableOptions,
}

impl Blueprint {
    pub fn new(table: impl Into<String>, intent: Intent) -> Self {
        Self {
            table: table.into(),
            intent,
            if_not_exists: false,
            columns: Vec::new(),
            indexes: Vec::new(),
            foreigns: Vec::new(),
            changes: Vec::new(),
            options: TableOptions::default(),
        }
    }

    pub fn create(table: impl Into<String>) -> Self {
        Self::new(table, Intent::Create)
    }

    pub fn alter(table: impl Into<String>) -> Self {
        Self::new(table, Intent::Alter)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn intent(&self) -> Intent {
        self.intent
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    pub fn foreigns(&self) -> &[ForeignKeyDefinition] {
        &self.foreigns
    }

    pub fn changes(&self) -> &[AlterChange] {
        &self.changes
    }

    pub fn options(&self) -> &TableOptions {
        &self.options
    }

    /// Explicit indexes plus the ones implied by column-level
    /// `unique()`/`index()` on added columns.
    ///
    /// Column-level `primary()` stays inline on the column.
    pub fn indexes(&self) -> Vec<IndexDefinition> {
        let mut indexes = self.indexes.clone();
        for column in self.columns.iter().filter(|c| !c.change) {
            if column.index {
                indexes.push(self.index_definition(IndexKind::Index, vec![column.name.clone()], None));
            }
        }
        indexes
    }

    // ---------------------------------------------------------------
    // Table options
    // ---------------------------------------------------------------

    pub fn engine(&mut self, engine: impl Into<String>) -> &mut Self {
        self.options.engine = Some(engine.into());
        self
    }

    pub fn charset(&mut self, charset: impl Into<String>) -> &mut Self {
        self.options.charset = Some(charset.into());
        self
    }

    pub fn collation(&mut self, collation: impl Into<String>) -> &mut Self {
        self.options.collation = Some(collation.into());
        self
    }

    // ---------------------------------------------------------------
    // Columns
    // ---------------------------------------------------------------

    /// Add a column of any type.
    pub fn add_column(&mut self, name: &str, kind: ColumnType) -> &mut ColumnDefinition {
        self.columns.push(ColumnDefinition::new(name, kind));
        let last = self.columns.len() - 1;
        &mut self.columns[last]
    }

    pub fn char(&mut self, name: &str, length: u32) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Char(length))
    }

    pub fn string(&mut self, name: &str, length: u32) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::String(length))
    }

    pub fn text(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Text)
    }

    pub fn medium_text(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::MediumText)
    }

    pub fn long_text(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::LongText)
    }

    pub fn tiny_integer(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::TinyInteger)
    }

    pub fn small_integer(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::SmallInteger)
    }

    pub fn medium_integer(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::MediumInteger)
    }

    pub fn integer(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Integer)
    }

    pub fn big_integer(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::BigInteger)
    }

    pub fn unsigned_integer(&mut self, name: &str) -> &mut ColumnDefinition {
        self.integer(name).unsigned()
    }

    pub fn unsigned_big_integer(&mut self, name: &str) -> &mut ColumnDefinition {
        self.big_integer(name).unsigned()
    }

    /// Unsigned auto-incrementing INTEGER primary key.
    pub fn increments(&mut self, name: &str) -> &mut ColumnDefinition {
        self.unsigned_integer(name).auto_increment().primary()
    }

    /// Unsigned auto-incrementing BIGINT primary key.
    pub fn big_increments(&mut self, name: &str) -> &mut ColumnDefinition {
        self.unsigned_big_integer(name).auto_increment().primary()
    }

    /// `id` big-increments column.
    pub fn id(&mut self) -> &mut ColumnDefinition {
        self.big_increments("id")
    }

    /// Unsigned BIGINT for referencing another table's `id`.
    pub fn foreign_id(&mut self, name: &str) -> &mut ColumnDefinition {
        self.unsigned_big_integer(name)
    }

    pub fn decimal(&mut self, name: &str, precision: u8, scale: u8) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Decimal { precision, scale })
    }

    pub fn float(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Float)
    }

    pub fn double(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Double)
    }

    pub fn boolean(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Boolean)
    }

    pub fn json(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Json)
    }

    pub fn enum_<I, S>(&mut self, name: &str, allowed: I) -> &mut ColumnDefinition
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let allowed = allowed.into_iter().map(Into::into).collect();
        self.add_column(name, ColumnType::Enum(allowed))
    }

    pub fn date(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Date)
    }

    pub fn date_time(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::DateTime)
    }

    pub fn time(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Time)
    }

    pub fn timestamp(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Timestamp)
    }

    pub fn year(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Year)
    }

    pub fn binary(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Binary)
    }

    pub fn uuid(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Uuid)
    }

    /// `created_at` and `updated_at`, both defaulting to the current time.
    /// `updated_at` is refreshed whenever the row changes.
    pub fn timestamps(&mut self) {
        self.timestamp("created_at").use_current();
        self.timestamp("updated_at").use_current().use_current_on_update();
    }

    /// Nullable `deleted_at`.
    pub fn soft_deletes(&mut self) -> &mut ColumnDefinition {
        self.timestamp("deleted_at").nullable()
    }

    // ---------------------------------------------------------------
    // Indexes and keys
    // ---------------------------------------------------------------

    fn index_definition(&self, kind: IndexKind, columns: Vec<String>, name: Option<&str>) -> IndexDefinition {
        let name = match name {
            Some(name) => name.to_string(),
            None => format!("{}_{}_{}", self.table, columns.join("_"), kind.suffix())
                .replace(['-', '.'], "_")
                .to_ascii_lowercase(),
        };
        IndexDefinition { kind, name, columns }
    }

    fn add_index<I, S>(&mut self, kind: IndexKind, columns: I, name: Option<&str>) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns = columns.into_iter().map(Into::into).collect();
        let index = self.index_definition(kind, columns, name);
        self.indexes.push(index);
        self
    }

    pub fn primary<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_index(IndexKind::Primary, columns, None)
    }

    pub fn unique<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_index(IndexKind::Unique, columns, None)
    }

    pub fn unique_named<I, S>(&mut self, columns: I, name: &str) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_index(IndexKind::Unique, columns, Some(name))
    }

    pub fn index<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_index(IndexKind::Index, columns, None)
    }

    pub fn index_named<I, S>(&mut self, columns: I, name: &str) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_index(IndexKind::Index, columns, Some(name))
    }

    pub fn fulltext<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_index(IndexKind::Fulltext, columns, None)
    }

    /// Start a foreign key; finish it with `references(..).on(..)`.
    pub fn foreign<I, S>(&mut self, columns: I) -> &mut ForeignKeyDefinition
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let name = format!("{}_{}_foreign", self.table, columns.join("_")).to_ascii_lowercase();
        self.foreigns.push(ForeignKeyDefinition {
            name,
            columns,
            references: vec!["id".to_string()],
            on: String::new(),
            on_delete: None,
            on_update: None,
        });
        let last = self.foreigns.len() - 1;
        &mut self.foreigns[last]
    }

    // ---------------------------------------------------------------
    // Alter changes
    // ---------------------------------------------------------------

    pub fn rename_column(&mut self, from: &str, to: &str) -> &mut Self {
        self.changes.push(AlterChange::RenameColumn {
            from: from.to_string(),
            to: to.to_string(),
        });
        self
    }

    pub fn drop_column(&mut self, column: &str) -> &mut Self {
        self.changes.push(AlterChange::DropColumn(column.to_string()));
        self
    }

    pub fn drop_columns<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.changes
            .extend(columns.into_iter().map(|c| AlterChange::DropColumn(c.into())));
        self
    }

    pub fn drop_index(&mut self, name: &str) -> &mut Self {
        self.changes.push(AlterChange::DropIndex(name.to_string()));
        self
    }

    pub fn drop_unique(&mut self, name: &str) -> &mut Self {
        self.changes.push(AlterChange::DropUnique(name.to_string()));
        self
    }

    /// Drop the primary key; the name is only needed when it is not the
    /// dialect's default.
    pub fn drop_primary(&mut self, name: Option<&str>) -> &mut Self {
        self.changes.push(AlterChange::DropPrimary(name.map(str::to_string)));
        self
    }

    pub fn drop_foreign(&mut self, name: &str) -> &mut Self {
        self.changes.push(AlterChange::DropForeign(name.to_string()));
        self
    }

    pub fn drop_timestamps(&mut self) -> &mut Self {
        self.drop_columns(["created_at", "updated_at"])
    }

    pub fn drop_soft_deletes(&mut self) -> &mut Self {
        self.drop_column("deleted_at")
    }
}
