use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    pub fn sql(self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
        }
    }
}

/// How a destination column is filled from a feed record.
#[derive(Debug, Clone, Copy)]
pub enum Source {
    /// Copy a single source field.
    Field(&'static str),
    /// Concatenate several source fields, no separator.
    Concat(&'static [&'static str]),
}

/// What the merge does with a staged row whose referenced row is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefPolicy {
    /// The row is not merged at all.
    Require,
    /// The row is merged with this column set to NULL.
    SetNull,
}

#[derive(Debug, Clone, Copy)]
pub struct Reference {
    pub table: &'static str,
    pub policy: RefPolicy,
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub ty: ColumnType,
    pub source: Source,
    pub reference: Option<Reference>,
}

impl ColumnSpec {
    pub const fn new(name: &'static str, ty: ColumnType, source: Source) -> Self {
        ColumnSpec {
            name,
            ty,
            source,
            reference: None,
        }
    }

    pub const fn referencing(
        name: &'static str,
        ty: ColumnType,
        source: Source,
        table: &'static str,
        policy: RefPolicy,
    ) -> Self {
        ColumnSpec {
            name,
            ty,
            source,
            reference: Some(Reference { table, policy }),
        }
    }
}

/// Declarative description of one physical table. Pure data; the schema
/// and merge compilers read it, nothing mutates it.
#[derive(Debug)]
pub struct TableSpec {
    /// Physical table name.
    pub name: &'static str,
    /// Base-name prefix identifying this table's feed file.
    pub feed_name: &'static str,
    /// Field names for the headerless feed file, in file order.
    pub source_headers: &'static [&'static str],
    pub columns: &'static [ColumnSpec],
    /// Natural (possibly composite) key.
    pub key: &'static [&'static str],
    /// Non-unique indexes.
    pub indexes: &'static [&'static [&'static str]],
}

impl TableSpec {
    pub fn staging_name(&self) -> String {
        format!("staging_{}", self.name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_key(&self, name: &str) -> bool {
        self.key.contains(&name)
    }

    pub fn non_key_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(|c| !self.is_key(c.name))
    }

    /// Key columns whose reference is repaired to NULL when unresolved.
    pub fn nullable_key_refs(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(|c| {
            self.is_key(c.name)
                && matches!(
                    c.reference,
                    Some(Reference {
                        policy: RefPolicy::SetNull,
                        ..
                    })
                )
        })
    }
}

pub static BOOKS: TableSpec = TableSpec {
    name: "books",
    feed_name: "books",
    source_headers: &[
        "BOOK ID",
        "ISBN13",
        "TITLE",
        "AUTHOR",
        "EDITION",
        "PUBLISHER",
    ],
    columns: &[
        ColumnSpec::new("id", ColumnType::Integer, Source::Field("BOOK ID")),
        ColumnSpec::new("isbn", ColumnType::Text, Source::Field("ISBN13")),
        ColumnSpec::new("title", ColumnType::Text, Source::Field("TITLE")),
        ColumnSpec::new("author", ColumnType::Text, Source::Field("AUTHOR")),
        ColumnSpec::new("edition", ColumnType::Text, Source::Field("EDITION")),
        ColumnSpec::new("publisher", ColumnType::Text, Source::Field("PUBLISHER")),
    ],
    key: &["id"],
    indexes: &[&["isbn"]],
};

pub static COURSES: TableSpec = TableSpec {
    name: "courses",
    feed_name: "courses",
    source_headers: &[
        "COURSE ID",
        "TERM",
        "YEAR",
        "DEPARTMENT",
        "COURSE NUMBER",
        "COURSE SUFFIX",
        "SECTION",
        "CRN",
        "COURSE TITLE",
        "INSTRUCTOR",
        "EST ENROLLMENT",
        "ACT ENROLLMENT",
        "NO TEXT",
        "UNIT",
    ],
    columns: &[
        ColumnSpec::new("id", ColumnType::Integer, Source::Field("COURSE ID")),
        ColumnSpec::new("term", ColumnType::Text, Source::Field("TERM")),
        ColumnSpec::new("year", ColumnType::Text, Source::Field("YEAR")),
        ColumnSpec::new("dept", ColumnType::Text, Source::Field("DEPARTMENT")),
        // Registrar splits the catalog number from its honors/lab suffix.
        ColumnSpec::new(
            "course",
            ColumnType::Text,
            Source::Concat(&["COURSE NUMBER", "COURSE SUFFIX"]),
        ),
        ColumnSpec::new("section", ColumnType::Text, Source::Field("SECTION")),
        ColumnSpec::new("crn", ColumnType::Text, Source::Field("CRN")),
        ColumnSpec::new("title", ColumnType::Text, Source::Field("COURSE TITLE")),
        ColumnSpec::new("prof", ColumnType::Text, Source::Field("INSTRUCTOR")),
        ColumnSpec::new(
            "est_enrl",
            ColumnType::Integer,
            Source::Field("EST ENROLLMENT"),
        ),
        ColumnSpec::new(
            "act_enrl",
            ColumnType::Integer,
            Source::Field("ACT ENROLLMENT"),
        ),
        ColumnSpec::new("no_text", ColumnType::Text, Source::Field("NO TEXT")),
        ColumnSpec::new("unit", ColumnType::Text, Source::Field("UNIT")),
    ],
    key: &["id"],
    indexes: &[&["term", "year"], &["dept", "course", "section"], &["crn"]],
};

pub static COURSE_BOOKS: TableSpec = TableSpec {
    name: "course_books",
    feed_name: "adoptions",
    source_headers: &["COURSE ID", "BOOK ID"],
    columns: &[
        ColumnSpec::referencing(
            "course_id",
            ColumnType::Integer,
            Source::Field("COURSE ID"),
            "courses",
            RefPolicy::Require,
        ),
        // NULL book marks an adoption whose book is not in the catalog yet.
        ColumnSpec::referencing(
            "book_id",
            ColumnType::Integer,
            Source::Field("BOOK ID"),
            "books",
            RefPolicy::SetNull,
        ),
    ],
    key: &["course_id", "book_id"],
    indexes: &[&["book_id"]],
};

pub static SALES: TableSpec = TableSpec {
    name: "sales",
    feed_name: "sales",
    source_headers: &[
        "BOOK ID",
        "TERM",
        "YEAR",
        "UNIT",
        "EST ENROLLMENT",
        "ACT ENROLLMENT",
        "EST SALES",
        "USED SALES",
        "NEW SALES",
        "REORDERS",
        "NUM COURSES",
    ],
    columns: &[
        ColumnSpec::referencing(
            "book_id",
            ColumnType::Integer,
            Source::Field("BOOK ID"),
            "books",
            RefPolicy::Require,
        ),
        ColumnSpec::new("term", ColumnType::Text, Source::Field("TERM")),
        ColumnSpec::new("year", ColumnType::Text, Source::Field("YEAR")),
        ColumnSpec::new("unit", ColumnType::Text, Source::Field("UNIT")),
        ColumnSpec::new(
            "est_enrl",
            ColumnType::Integer,
            Source::Field("EST ENROLLMENT"),
        ),
        ColumnSpec::new(
            "act_enrl",
            ColumnType::Integer,
            Source::Field("ACT ENROLLMENT"),
        ),
        ColumnSpec::new("est_sales", ColumnType::Integer, Source::Field("EST SALES")),
        ColumnSpec::new(
            "used_sales",
            ColumnType::Integer,
            Source::Field("USED SALES"),
        ),
        ColumnSpec::new("new_sales", ColumnType::Integer, Source::Field("NEW SALES")),
        ColumnSpec::new("reorders", ColumnType::Integer, Source::Field("REORDERS")),
        ColumnSpec::new(
            "num_courses",
            ColumnType::Integer,
            Source::Field("NUM COURSES"),
        ),
    ],
    key: &["book_id", "term", "year", "unit"],
    indexes: &[&["term", "year"]],
};

pub static PRICES: TableSpec = TableSpec {
    name: "prices",
    feed_name: "prices",
    source_headers: &["BOOK ID", "TERM", "YEAR", "UNIT", "UNIT PRICE", "DISCOUNT"],
    columns: &[
        ColumnSpec::referencing(
            "book_id",
            ColumnType::Integer,
            Source::Field("BOOK ID"),
            "books",
            RefPolicy::Require,
        ),
        ColumnSpec::new("term", ColumnType::Text, Source::Field("TERM")),
        ColumnSpec::new("year", ColumnType::Text, Source::Field("YEAR")),
        ColumnSpec::new("unit", ColumnType::Text, Source::Field("UNIT")),
        ColumnSpec::new("unit_price", ColumnType::Real, Source::Field("UNIT PRICE")),
        ColumnSpec::new("discount", ColumnType::Real, Source::Field("DISCOUNT")),
    ],
    key: &["book_id", "term", "year", "unit"],
    indexes: &[&["term", "year"]],
};

pub static INVENTORY: TableSpec = TableSpec {
    name: "inventory",
    feed_name: "inventory",
    source_headers: &["BOOK ID", "TERM", "YEAR", "UNIT", "ON HAND", "ON ORDER", "RESERVED"],
    columns: &[
        ColumnSpec::referencing(
            "book_id",
            ColumnType::Integer,
            Source::Field("BOOK ID"),
            "books",
            RefPolicy::Require,
        ),
        ColumnSpec::new("term", ColumnType::Text, Source::Field("TERM")),
        ColumnSpec::new("year", ColumnType::Text, Source::Field("YEAR")),
        ColumnSpec::new("unit", ColumnType::Text, Source::Field("UNIT")),
        ColumnSpec::new("on_hand", ColumnType::Integer, Source::Field("ON HAND")),
        ColumnSpec::new("on_order", ColumnType::Integer, Source::Field("ON ORDER")),
        ColumnSpec::new("reserved", ColumnType::Integer, Source::Field("RESERVED")),
    ],
    key: &["book_id", "term", "year", "unit"],
    indexes: &[&["term", "year"]],
};

pub static ALL_TABLES: &[&TableSpec] = &[
    &BOOKS,
    &COURSES,
    &COURSE_BOOKS,
    &SALES,
    &PRICES,
    &INVENTORY,
];

/// The validated registry, loaded once at startup. Holds the declaration
/// set plus the dependency-sorted merge order.
pub struct Registry {
    tables: &'static [&'static TableSpec],
    merge_order: Vec<&'static TableSpec>,
}

impl Registry {
    pub fn load() -> Result<Registry, StoreError> {
        validate(ALL_TABLES)?;
        let merge_order = merge_order(ALL_TABLES)?;
        Ok(Registry {
            tables: ALL_TABLES,
            merge_order,
        })
    }

    /// All tables, declaration order.
    pub fn tables(&self) -> impl Iterator<Item = &'static TableSpec> + '_ {
        self.tables.iter().copied()
    }

    pub fn get(&self, name: &str) -> Option<&'static TableSpec> {
        self.tables.iter().copied().find(|t| t.name == name)
    }

    /// Tables in reference order: a table always appears after every
    /// table it references.
    pub fn merge_order(&self) -> &[&'static TableSpec] {
        &self.merge_order
    }

    /// Match a feed file's base name (without extension) to its table.
    pub fn match_feed(&self, stem: &str) -> Option<&'static TableSpec> {
        let stem = stem.to_ascii_lowercase();
        self.tables
            .iter()
            .copied()
            .find(|t| stem.starts_with(t.feed_name))
    }

    /// Single-column key of a referenced table, guaranteed by validation.
    pub fn target_key(&self, table: &str) -> &'static str {
        self.get(table).map(|t| t.key[0]).unwrap_or("id")
    }
}

fn validate(tables: &[&TableSpec]) -> Result<(), StoreError> {
    let mut names = HashSet::new();
    for t in tables {
        if !names.insert(t.name) {
            return Err(StoreError::schema(t.name, "duplicate table name"));
        }
    }

    for t in tables {
        if t.columns.is_empty() {
            return Err(StoreError::schema(t.name, "no columns declared"));
        }
        if t.key.is_empty() {
            return Err(StoreError::schema(t.name, "no key declared"));
        }

        let mut cols = HashSet::new();
        for c in t.columns {
            if !cols.insert(c.name) {
                return Err(StoreError::schema(
                    t.name,
                    format!("duplicate column {}", c.name),
                ));
            }
            match c.source {
                Source::Field(f) => {
                    if !t.source_headers.contains(&f) {
                        return Err(StoreError::schema(
                            t.name,
                            format!("column {} maps unknown source field {f:?}", c.name),
                        ));
                    }
                }
                Source::Concat(fields) => {
                    if fields.is_empty() {
                        return Err(StoreError::schema(
                            t.name,
                            format!("column {} concatenates nothing", c.name),
                        ));
                    }
                    for f in fields {
                        if !t.source_headers.contains(f) {
                            return Err(StoreError::schema(
                                t.name,
                                format!("column {} maps unknown source field {f:?}", c.name),
                            ));
                        }
                    }
                }
            }
            if let Some(r) = c.reference {
                let Some(target) = tables.iter().find(|x| x.name == r.table) else {
                    return Err(StoreError::schema(
                        t.name,
                        format!("column {} references unknown table {}", c.name, r.table),
                    ));
                };
                if target.key.len() != 1 {
                    return Err(StoreError::schema(
                        t.name,
                        format!("reference target {} has a composite key", r.table),
                    ));
                }
            }
        }

        for k in t.key {
            if !cols.contains(k) {
                return Err(StoreError::schema(
                    t.name,
                    format!("key column {k} not declared"),
                ));
            }
        }

        // A NULL-repaired key column makes conflict targets useless (NULL
        // never equals NULL), so such tables may not carry updatable
        // columns; the merge compiler emits a dedup shape instead.
        if t.nullable_key_refs().next().is_some() && t.non_key_columns().next().is_some() {
            return Err(StoreError::schema(
                t.name,
                "a nullable reference in the key requires a key-only table",
            ));
        }
    }

    Ok(())
}

fn merge_order(tables: &[&'static TableSpec]) -> Result<Vec<&'static TableSpec>, StoreError> {
    let mut graph: DiGraph<&'static str, ()> = DiGraph::new();
    let mut nodes: HashMap<&'static str, NodeIndex> = HashMap::new();

    for t in tables {
        nodes.insert(t.name, graph.add_node(t.name));
    }
    for t in tables {
        for c in t.columns {
            if let Some(r) = c.reference {
                // Edge from referenced table to referencing table, so the
                // sort yields reference targets first.
                graph.add_edge(nodes[r.table], nodes[t.name], ());
            }
        }
    }

    match toposort(&graph, None) {
        Ok(order) => Ok(order
            .into_iter()
            .map(|ix| {
                let name = graph[ix];
                *tables
                    .iter()
                    .find(|t| t.name == name)
                    .expect("node built from this table set")
            })
            .collect()),
        Err(cycle) => Err(StoreError::schema(
            graph[cycle.node_id()],
            "reference cycle detected",
        )),
    }
}
