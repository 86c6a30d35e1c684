use rusqlite::types::ValueRef;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::StoreError;
use crate::meta::Registry;

/// Campus unit the desktop app works against unless a request says
/// otherwise.
pub const DEFAULT_UNIT: &str = "1";

/// Zero-pads course and section numbers to width 3 so lexicographic
/// comparison matches catalog order ("005" before "101"). The same
/// expression is used in ORDER BY, cursor filters, and returned rows;
/// cursors therefore always compare in the collation that produced
/// them.
fn pad3_sql(col: &str) -> String {
    format!("SUBSTR('000' || {col}, LENGTH('000' || {col}) - 2, 3)")
}

fn pad3(value: &str) -> String {
    format!("{value:0>3}")
}

fn value_ref_to_json(v: ValueRef<'_>) -> serde_json::Value {
    match v {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Value::from(f),
        ValueRef::Text(t) => serde_json::Value::from(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => serde_json::Value::Null,
    }
}

/// Offset paging over a whole table, admin-facing. The name is checked
/// against the registry before it lands in SQL.
pub fn table_page(
    conn: &Connection,
    registry: &Registry,
    name: &str,
    offset: i64,
    limit: i64,
) -> Result<(Vec<serde_json::Value>, i64), StoreError> {
    let Some(spec) = registry.get(name) else {
        return Err(StoreError::UnknownTable(name.to_string()));
    };

    let mut stmt = conn
        .prepare(&format!("SELECT * FROM {} LIMIT ?1 OFFSET ?2", spec.name))
        .map_err(|e| StoreError::query(spec.name, "page", e))?;
    let names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();

    let rows = stmt
        .query_map(params![limit, offset * limit], |row| {
            let mut obj = serde_json::Map::new();
            for (i, name) in names.iter().enumerate() {
                obj.insert(name.clone(), value_ref_to_json(row.get_ref(i)?));
            }
            Ok(serde_json::Value::Object(obj))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| StoreError::query(spec.name, "page", e))?;

    let total: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM {}", spec.name), [], |r| {
            r.get(0)
        })
        .map_err(|e| StoreError::query(spec.name, "count", e))?;

    Ok((rows, total))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Prev,
}

/// Last-seen ordering key. All components optional: a partial cursor is
/// only legal in seek mode, a full one drives strict keyset paging.
#[derive(Debug, Clone, Default)]
pub struct CourseCursor {
    pub dept: Option<String>,
    pub course: Option<String>,
    pub section: Option<String>,
}

impl CourseCursor {
    fn is_empty(&self) -> bool {
        self.dept.is_none() && self.course.is_none() && self.section.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct CoursePageQuery {
    pub term: String,
    pub year: String,
    pub unit: String,
    pub limit: i64,
    pub direction: Direction,
    pub cursor: CourseCursor,
    /// Relaxed per-column seek instead of strict tuple comparison.
    pub seek: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRow {
    pub id: i64,
    pub dept: Option<String>,
    pub course: Option<String>,
    pub section: Option<String>,
    pub title: Option<String>,
    pub prof: Option<String>,
    pub est_enrl: Option<i64>,
    pub act_enrl: Option<i64>,
    pub no_text: Option<String>,
    /// "Y" when any adoption row exists for the course.
    pub adopted: String,
}

/// Keyset-paginated course listing for one (term, year, unit).
///
/// Forward pages continue past the cursor tuple, backward pages scan
/// DESC and are flipped back to ascending before returning. The total
/// is a separate COUNT over the scope and deliberately ignores the
/// cursor: the page answers "where am I", the count "how big is the
/// term".
pub fn courses_page(
    conn: &Connection,
    q: &CoursePageQuery,
) -> Result<(Vec<CourseRow>, i64), StoreError> {
    use rusqlite::types::Value;

    let course_expr = pad3_sql("c.course");
    let section_expr = pad3_sql("c.section");

    let mut filters: Vec<String> = Vec::new();
    let mut binds: Vec<Value> = vec![
        Value::from(q.term.clone()),
        Value::from(q.year.clone()),
        Value::from(q.unit.clone()),
    ];

    let backward = q.direction == Direction::Prev && !q.seek;
    if q.seek {
        if let Some(dept) = &q.cursor.dept {
            binds.push(Value::from(dept.clone()));
            filters.push(format!("c.dept >= ?{}", binds.len()));
        }
        if let Some(course) = &q.cursor.course {
            binds.push(Value::from(pad3(course)));
            filters.push(format!("{course_expr} >= ?{}", binds.len()));
        }
        if let Some(section) = &q.cursor.section {
            binds.push(Value::from(pad3(section)));
            filters.push(format!("{section_expr} >= ?{}", binds.len()));
        }
    } else if let (Some(dept), Some(course), Some(section)) =
        (&q.cursor.dept, &q.cursor.course, &q.cursor.section)
    {
        let cmp = if backward { "<" } else { ">" };
        binds.push(Value::from(dept.clone()));
        let d = binds.len();
        binds.push(Value::from(pad3(course)));
        let c = binds.len();
        binds.push(Value::from(pad3(section)));
        let s = binds.len();
        filters.push(format!(
            "(c.dept, {course_expr}, {section_expr}) {cmp} (?{d}, ?{c}, ?{s})"
        ));
    } else if !q.cursor.is_empty() {
        return Err(StoreError::query(
            "courses",
            "page",
            rusqlite::Error::InvalidQuery,
        ));
    }

    binds.push(Value::from(q.limit));
    let limit_ix = binds.len();
    let order = if backward { " DESC" } else { "" };

    let sql = format!(
        "SELECT c.id, c.dept, {course_expr} AS course, {section_expr} AS section,
                c.title, c.prof, c.est_enrl, c.act_enrl, c.no_text,
                CASE WHEN EXISTS (SELECT 1 FROM course_books cb WHERE cb.course_id = c.id)
                     THEN 'Y' ELSE 'N' END AS adopted
         FROM courses c
         WHERE c.term = ?1 AND c.year = ?2 AND c.unit = ?3
           {filters}
         ORDER BY c.dept{order}, {course_expr}{order}, {section_expr}{order}
         LIMIT ?{limit_ix}",
        filters = filters
            .iter()
            .map(|f| format!("AND {f}"))
            .collect::<Vec<_>>()
            .join(" "),
    );

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| StoreError::query("courses", "page", e))?;
    let mut rows = stmt
        .query_map(params_from_iter(binds), |row| {
            Ok(CourseRow {
                id: row.get(0)?,
                dept: row.get(1)?,
                course: row.get(2)?,
                section: row.get(3)?,
                title: row.get(4)?,
                prof: row.get(5)?,
                est_enrl: row.get(6)?,
                act_enrl: row.get(7)?,
                no_text: row.get(8)?,
                adopted: row.get(9)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| StoreError::query("courses", "page", e))?;

    if backward {
        rows.reverse();
    }

    let total: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM courses WHERE term = ?1 AND year = ?2 AND unit = ?3",
            params![q.term, q.year, q.unit],
            |r| r.get(0),
        )
        .map_err(|e| StoreError::query("courses", "count", e))?;

    Ok((rows, total))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesHistoryRow {
    /// Term letter and year concatenated, e.g. "F23".
    pub term: String,
    pub isbn: String,
    pub title: String,
    pub est_enrl: i64,
    pub act_enrl: i64,
    pub sales: i64,
}

/// Multi-year sales trend for one book: per prior year of the same term
/// letter, total section enrollment and that year's unit sales.
pub fn prev_sales_by_book(
    conn: &Connection,
    isbn: &str,
    title: &str,
    term: &str,
    exclude_year: &str,
    unit: &str,
) -> Result<Vec<SalesHistoryRow>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT s.term || s.year AS term, b.isbn, b.title,
                    SUM(c.est_enrl) AS est_enrl,
                    SUM(c.act_enrl) AS act_enrl,
                    s.used_sales + s.new_sales AS sales
             FROM courses c
             JOIN course_books cb ON cb.course_id = c.id
             JOIN books b ON cb.book_id = b.id
             JOIN sales s ON b.id = s.book_id
                  AND s.term = c.term AND s.year = c.year AND s.unit = ?5
             WHERE b.isbn = ?1 AND b.title = ?2
               AND c.unit = ?5
               AND c.term = ?3 AND c.year != ?4
               AND c.dept NOT IN ('SPEC', 'CANC')
             GROUP BY s.year
             ORDER BY s.term, s.year",
        )
        .map_err(|e| StoreError::query("sales", "history", e))?;

    stmt.query_map(params![isbn, title, term, exclude_year, unit], |row| {
        Ok(SalesHistoryRow {
            term: row.get(0)?,
            isbn: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            title: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            est_enrl: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
            act_enrl: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
            sales: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| StoreError::query("sales", "history", e))
}

/// Everything the decision calculator needs to know about one book.
#[derive(Debug, Clone)]
pub struct DecisionInput {
    pub isbn: String,
    pub title: String,
    pub prev_est_enrl: i64,
    pub prev_act_enrl: i64,
    pub curr_est_enrl: i64,
    pub curr_act_enrl: i64,
    pub curr_est_sales: i64,
    /// Prior-year unit sales for the same term letter; None when the
    /// book has no sales history at all.
    pub total_sales: Option<i64>,
}

enum InputScope<'a> {
    /// Books with a sales row in the current (term, year): the term
    /// decision listing.
    CurrentSales,
    /// An explicit (isbn, title) list: uploaded override files.
    Books(&'a [(String, String)]),
}

/// Aggregated enrollment and sales figures per (isbn, title) adopted in
/// a term: current-year enrollment over that year's sections, prior
/// enrollment and sales over the same term letter in other years.
pub fn decision_inputs_for_term(
    conn: &Connection,
    term: &str,
    year: &str,
    unit: &str,
) -> Result<Vec<DecisionInput>, StoreError> {
    decision_inputs(conn, term, year, unit, InputScope::CurrentSales)
}

pub fn decision_inputs_for_books(
    conn: &Connection,
    term: &str,
    year: &str,
    unit: &str,
    books: &[(String, String)],
) -> Result<Vec<DecisionInput>, StoreError> {
    decision_inputs(conn, term, year, unit, InputScope::Books(books))
}

fn decision_inputs(
    conn: &Connection,
    term: &str,
    year: &str,
    unit: &str,
    scope: InputScope<'_>,
) -> Result<Vec<DecisionInput>, StoreError> {
    use rusqlite::types::Value;

    let mut binds: Vec<Value> = vec![
        Value::from(term.to_string()),
        Value::from(year.to_string()),
        Value::from(unit.to_string()),
    ];
    let scope_filter = match scope {
        InputScope::CurrentSales => "AND (b.isbn, b.title) IN (
                SELECT b2.isbn, b2.title FROM books b2
                JOIN sales s2 ON s2.book_id = b2.id
                WHERE s2.term = ?1 AND s2.year = ?2 AND s2.unit = ?3)"
            .to_string(),
        InputScope::Books(books) => {
            let mut pairs = Vec::with_capacity(books.len());
            for (isbn, title) in books {
                binds.push(Value::from(isbn.clone()));
                let i = binds.len();
                binds.push(Value::from(title.clone()));
                pairs.push(format!("(?{i}, ?{})", binds.len()));
            }
            if pairs.is_empty() {
                return Ok(Vec::new());
            }
            format!("AND (b.isbn, b.title) IN (VALUES {})", pairs.join(", "))
        }
    };

    let sql = format!(
        "SELECT b.isbn, b.title,
                SUM(CASE WHEN c.year != ?2 THEN c.est_enrl ELSE 0 END) AS prev_est_enrl,
                SUM(CASE WHEN c.year != ?2 THEN c.act_enrl ELSE 0 END) AS prev_act_enrl,
                SUM(CASE WHEN c.year = ?2 THEN c.est_enrl ELSE 0 END) AS curr_est_enrl,
                SUM(CASE WHEN c.year = ?2 THEN c.act_enrl ELSE 0 END) AS curr_act_enrl,
                (SELECT SUM(s3.est_sales) FROM sales s3
                 JOIN books b3 ON s3.book_id = b3.id
                 WHERE b3.isbn IS b.isbn AND b3.title IS b.title
                   AND s3.term = ?1 AND s3.year = ?2 AND s3.unit = ?3) AS curr_est_sales,
                (SELECT SUM(s4.used_sales + s4.new_sales) FROM sales s4
                 JOIN books b4 ON s4.book_id = b4.id
                 WHERE b4.isbn IS b.isbn AND b4.title IS b.title
                   AND s4.term = ?1 AND s4.year != ?2 AND s4.unit = ?3) AS total_sales
         FROM books b
         JOIN course_books cb ON cb.book_id = b.id
         JOIN courses c ON cb.course_id = c.id
         JOIN sales s ON b.id = s.book_id
              AND s.term = c.term AND s.year = c.year AND s.unit = ?3
         WHERE c.term = ?1 AND c.unit = ?3
           AND c.dept NOT IN ('SPEC', 'CANC')
           {scope_filter}
         GROUP BY b.isbn, b.title
         ORDER BY b.title"
    );

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| StoreError::query("sales", "decision_inputs", e))?;
    stmt.query_map(params_from_iter(binds), |row| {
        Ok(DecisionInput {
            isbn: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
            title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            prev_est_enrl: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
            prev_act_enrl: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
            curr_est_enrl: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
            curr_act_enrl: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
            curr_est_sales: row.get::<_, Option<i64>>(6)?.unwrap_or(0),
            total_sales: row.get(7)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| StoreError::query("sales", "decision_inputs", e))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureRow {
    pub id: i64,
    pub isbn: String,
    pub title: String,
    pub est_sales: i64,
    pub term: String,
    pub year: String,
    pub publisher: String,
    pub dept: String,
    pub course: String,
    pub est_enrl: i64,
    pub act_enrl: i64,
    /// Selling price after the store margin: list price discounted by
    /// (discount - 30) percent.
    pub price: f64,
}

/// Model-feature extraction per (book, term, year). Supply publishers,
/// special and cancelled course codes, zero prices, and zero course
/// counts are all excluded.
pub fn term_features(
    conn: &Connection,
    term: &str,
    year: &str,
    unit: &str,
) -> Result<Vec<FeatureRow>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT b.id, b.isbn, b.title, s.est_sales, s.term, s.year, b.publisher,
                    c.dept, c.course, s.est_enrl, s.act_enrl,
                    (p.unit_price * (1 - (p.discount - 30) / 100.0)) AS price
             FROM sales s
             JOIN books b ON s.book_id = b.id
             JOIN prices p ON b.id = p.book_id
                  AND p.term = s.term AND p.year = s.year AND p.unit = s.unit
             JOIN course_books cb ON b.id = cb.book_id
             JOIN courses c ON cb.course_id = c.id
             WHERE s.term = ?1 AND s.year = ?2 AND s.unit = ?3
               AND c.term = s.term AND c.year = s.year
               AND s.num_courses > 0
               AND b.publisher NOT IN ('VST', 'XX SUPPLY')
               AND c.dept NOT IN ('CANC', 'SPEC')
               AND c.course NOT IN ('CANC', 'SPEC')
               AND p.unit_price > 0
             GROUP BY s.term, s.year, s.book_id
             ORDER BY s.book_id",
        )
        .map_err(|e| StoreError::query("sales", "features", e))?;

    stmt.query_map(params![term, year, unit], |row| {
        Ok(FeatureRow {
            id: row.get(0)?,
            isbn: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            title: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            est_sales: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
            term: row.get(4)?,
            year: row.get(5)?,
            publisher: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
            dept: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
            course: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
            est_enrl: row.get::<_, Option<i64>>(9)?.unwrap_or(0),
            act_enrl: row.get::<_, Option<i64>>(10)?.unwrap_or(0),
            price: row.get(11)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| StoreError::query("sales", "features", e))
}

/// Distinct term+year codes present in the catalog, e.g. ["F23", "F24",
/// "W24"].
pub fn all_terms(conn: &Connection) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT term || year AS term FROM courses
             WHERE term IS NOT NULL AND term != ''
             ORDER BY term, year",
        )
        .map_err(|e| StoreError::query("courses", "terms", e))?;
    stmt.query_map([], |row| row.get(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| StoreError::query("courses", "terms", e))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookRef {
    pub isbn: String,
    pub title: String,
}

/// Books with a sales presence in one (term, year).
pub fn books_for_term(
    conn: &Connection,
    term: &str,
    year: &str,
    unit: &str,
) -> Result<Vec<BookRef>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT b.isbn, b.title FROM books b
             JOIN sales s ON b.id = s.book_id
             WHERE s.unit = ?3 AND s.term = ?1 AND s.year = ?2",
        )
        .map_err(|e| StoreError::query("books", "for_term", e))?;
    stmt.query_map(params![term, year, unit], |row| {
        Ok(BookRef {
            isbn: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
            title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| StoreError::query("books", "for_term", e))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSaleRow {
    pub id: i64,
    pub isbn: String,
    pub title: String,
    pub author: Option<String>,
    pub edition: Option<String>,
    pub publisher: Option<String>,
    pub term: String,
    pub year: String,
    pub est_enrl: i64,
    pub act_enrl: i64,
    pub est_sales: i64,
    pub used_sales: i64,
    pub new_sales: i64,
    pub reorders: i64,
}

/// ISBN fragment search with per-term sales lines, newest first.
/// Intersession and quarter terms stay out of the listing.
pub fn search_books_by_isbn(
    conn: &Connection,
    fragment: &str,
    unit: &str,
) -> Result<Vec<BookSaleRow>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT b.id, b.isbn, b.title, b.author, b.edition, b.publisher,
                    s.term, s.year, s.est_enrl, s.act_enrl, s.est_sales,
                    s.used_sales, s.new_sales, s.reorders
             FROM books b
             JOIN sales s ON b.id = s.book_id
             WHERE b.isbn LIKE ?1
               AND s.term NOT IN ('I', 'Q')
               AND s.unit = ?2
             ORDER BY s.year DESC, s.term",
        )
        .map_err(|e| StoreError::query("books", "search", e))?;
    stmt.query_map(params![format!("%{fragment}%"), unit], |row| {
        Ok(BookSaleRow {
            id: row.get(0)?,
            isbn: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            title: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            author: row.get(3)?,
            edition: row.get(4)?,
            publisher: row.get(5)?,
            term: row.get(6)?,
            year: row.get(7)?,
            est_enrl: row.get::<_, Option<i64>>(8)?.unwrap_or(0),
            act_enrl: row.get::<_, Option<i64>>(9)?.unwrap_or(0),
            est_sales: row.get::<_, Option<i64>>(10)?.unwrap_or(0),
            used_sales: row.get::<_, Option<i64>>(11)?.unwrap_or(0),
            new_sales: row.get::<_, Option<i64>>(12)?.unwrap_or(0),
            reorders: row.get::<_, Option<i64>>(13)?.unwrap_or(0),
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| StoreError::query("books", "search", e))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdoptedBook {
    pub isbn: String,
    pub title: String,
    pub edition: Option<String>,
    pub author: Option<String>,
    pub publisher: Option<String>,
}

/// Books adopted by one course, plus the "DEPT 101 001" display label.
/// Unresolved adoptions (book still unknown) are not listed.
pub fn books_for_course(
    conn: &Connection,
    course_id: i64,
) -> Result<Option<(Vec<AdoptedBook>, String)>, StoreError> {
    let label: Option<String> = conn
        .query_row(
            &format!(
                "SELECT dept || ' ' || {} || ' ' || {} FROM courses WHERE id = ?1",
                pad3_sql("course"),
                pad3_sql("section")
            ),
            params![course_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| StoreError::query("courses", "label", e))?;
    let Some(label) = label else {
        return Ok(None);
    };

    let mut stmt = conn
        .prepare(
            "SELECT b.isbn, b.title, b.edition, b.author, b.publisher
             FROM books b
             JOIN course_books cb ON b.id = cb.book_id
             WHERE cb.course_id = ?1
             ORDER BY b.title",
        )
        .map_err(|e| StoreError::query("books", "for_course", e))?;
    let books = stmt
        .query_map(params![course_id], |row| {
            Ok(AdoptedBook {
                isbn: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                edition: row.get(2)?,
                author: row.get(3)?,
                publisher: row.get(4)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| StoreError::query("books", "for_course", e))?;

    Ok(Some((books, label)))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseAdoptionRow {
    pub course: String,
    pub est_enrl: i64,
    pub act_enrl: i64,
}

/// Sections that adopted one book in a (term, year), in catalog order.
pub fn courses_for_book(
    conn: &Connection,
    isbn: &str,
    title: &str,
    term: &str,
    year: &str,
) -> Result<Vec<CourseAdoptionRow>, StoreError> {
    let sql = format!(
        "SELECT c.dept || ' ' || {course} || ' ' || {section} AS course,
                c.est_enrl, c.act_enrl
         FROM courses c
         JOIN course_books cb ON c.id = cb.course_id
         JOIN books b ON cb.book_id = b.id
         WHERE b.isbn = ?1 AND b.title = ?2 AND c.term = ?3 AND c.year = ?4
         ORDER BY c.dept, {course}, {section}",
        course = pad3_sql("c.course"),
        section = pad3_sql("c.section"),
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| StoreError::query("courses", "for_book", e))?;
    stmt.query_map(params![isbn, title, term, year], |row| {
        Ok(CourseAdoptionRow {
            course: row.get(0)?,
            est_enrl: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
            act_enrl: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| StoreError::query("courses", "for_book", e))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionRef {
    pub section: String,
    pub crn: Option<String>,
}

/// CRN to padded section map for a term, used when matching enrollment
/// reports that arrive without an offering number.
pub fn sections_for_term(
    conn: &Connection,
    term: &str,
    year: &str,
) -> Result<Vec<SectionRef>, StoreError> {
    let sql = format!(
        "SELECT {} AS section, crn FROM courses WHERE term = ?1 AND year = ?2",
        pad3_sql("section")
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| StoreError::query("courses", "sections", e))?;
    stmt.query_map(params![term, year], |row| {
        Ok(SectionRef {
            section: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
            crn: row.get(1)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| StoreError::query("courses", "sections", e))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStatus {
    pub table: String,
    pub rows: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_ingest: Option<IngestInfo>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestInfo {
    pub run_id: String,
    pub finished_at: String,
    pub staged: i64,
    pub skipped: i64,
    pub merged: i64,
}

/// Row counts and last-ingest bookkeeping for every registry table.
pub fn table_status(
    conn: &Connection,
    registry: &Registry,
) -> Result<Vec<TableStatus>, StoreError> {
    let mut out = Vec::new();
    for spec in registry.tables() {
        let rows: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", spec.name), [], |r| {
                r.get(0)
            })
            .map_err(|e| StoreError::query(spec.name, "status", e))?;
        let last_ingest = conn
            .query_row(
                "SELECT run_id, finished_at, staged, skipped, merged
                 FROM ingest_log WHERE table_name = ?1",
                params![spec.name],
                |r| {
                    Ok(IngestInfo {
                        run_id: r.get(0)?,
                        finished_at: r.get(1)?,
                        staged: r.get(2)?,
                        skipped: r.get(3)?,
                        merged: r.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(|e| StoreError::query(spec.name, "status", e))?;
        out.push(TableStatus {
            table: spec.name.to_string(),
            rows,
            last_ingest,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    fn seed() -> (Registry, Connection) {
        let reg = Registry::load().unwrap();
        let conn = Connection::open_in_memory().unwrap();
        schema::create_all(&conn, &reg).unwrap();

        conn.execute_batch(
            "INSERT INTO books (id, isbn, title, author, edition, publisher) VALUES
               (1, '9780000000001', 'Calculus', 'Wu', '2', 'Wiley'),
               (2, '9780000000002', 'Linear Algebra', 'Ng', '1', 'Pearson'),
               (3, '9780000000003', 'Lab Kit', 'n/a', '1', 'XX SUPPLY');
             INSERT INTO courses (id, term, year, dept, course, section, crn, title, prof,
                                  est_enrl, act_enrl, no_text, unit) VALUES
               (10, 'F', '24', 'BIOL', '120', '1',  '30010', 'Cells',    'ORR',  30, 28, 'N', '1'),
               (11, 'F', '24', 'MATH', '5',   '1',  '30011', 'Precalc',  'NG',   25, 20, 'N', '1'),
               (12, 'F', '24', 'MATH', '101', '1',  '30012', 'Calc I',   'NG',   40, 35, 'N', '1'),
               (13, 'F', '24', 'MATH', '101', '2',  '30013', 'Calc I',   'WU',   40, 38, 'N', '1'),
               (14, 'F', '24', 'PHYS', '201', '1',  '30014', 'Mechanics','DIAZ', 35, 30, 'N', '1'),
               (15, 'F', '23', 'MATH', '101', '1',  '20012', 'Calc I',   'NG',   45, 41, 'N', '1'),
               (16, 'F', '24', 'SPEC', '1',   '1',  '30016', 'Placeholder', '',   0,  0, 'Y', '1'),
               (17, 'F', '24', 'CHEM', '110', '1',  '30017', 'Gen Chem', 'LIN',  20, 18, 'N', '2');
             INSERT INTO course_books (course_id, book_id) VALUES
               (12, 1), (13, 1), (15, 1), (10, 2), (14, NULL);
             INSERT INTO sales (book_id, term, year, unit, est_enrl, act_enrl, est_sales,
                                used_sales, new_sales, reorders, num_courses) VALUES
               (1, 'F', '24', '1', 80, 73, 60, 0, 0, 0, 2),
               (1, 'F', '23', '1', 45, 41, 38, 14, 26, 0, 1),
               (2, 'F', '24', '1', 30, 28, 22, 0, 0, 0, 1),
               (3, 'F', '24', '1', 10, 10, 10, 0, 0, 0, 1);
             INSERT INTO prices (book_id, term, year, unit, unit_price, discount) VALUES
               (1, 'F', '24', '1', 100.0, 30.0),
               (2, 'F', '24', '1', 80.0, 40.0),
               (3, 'F', '24', '1', 15.0, 30.0);",
        )
        .unwrap();
        (reg, conn)
    }

    fn page(conn: &Connection, q: &CoursePageQuery) -> Vec<CourseRow> {
        courses_page(conn, q).unwrap().0
    }

    fn base_query(limit: i64) -> CoursePageQuery {
        CoursePageQuery {
            term: "F".into(),
            year: "24".into(),
            unit: DEFAULT_UNIT.into(),
            limit,
            direction: Direction::Next,
            cursor: CourseCursor::default(),
            seek: false,
        }
    }

    fn key(row: &CourseRow) -> (String, String, String) {
        (
            row.dept.clone().unwrap_or_default(),
            row.course.clone().unwrap_or_default(),
            row.section.clone().unwrap_or_default(),
        )
    }

    fn cursor_of(row: &CourseRow) -> CourseCursor {
        CourseCursor {
            dept: row.dept.clone(),
            course: row.course.clone(),
            section: row.section.clone(),
        }
    }

    #[test]
    fn forward_pages_cover_the_term_exactly_once() {
        let (_reg, conn) = seed();
        let full = page(&conn, &base_query(100));
        // Unit 2 course is out of scope; SPEC row is in (dept filters
        // apply to joins, not the listing).
        assert_eq!(full.len(), 6);

        let mut q = base_query(2);
        let mut walked = Vec::new();
        loop {
            let rows = page(&conn, &q);
            if rows.is_empty() {
                break;
            }
            q.cursor = cursor_of(rows.last().unwrap());
            walked.extend(rows);
        }
        assert_eq!(
            walked.iter().map(key).collect::<Vec<_>>(),
            full.iter().map(key).collect::<Vec<_>>()
        );
    }

    #[test]
    fn ordering_pads_course_and_section_numbers() {
        let (_reg, conn) = seed();
        let rows = page(&conn, &base_query(100));
        let math: Vec<_> = rows
            .iter()
            .filter(|r| r.dept.as_deref() == Some("MATH"))
            .map(|r| r.course.clone().unwrap())
            .collect();
        // "005" sorts before "101"; raw text comparison would reverse them.
        assert_eq!(math, vec!["005", "101", "101"]);
        assert_eq!(rows[0].dept.as_deref(), Some("BIOL"));
    }

    #[test]
    fn backward_page_reproduces_the_previous_page() {
        let (_reg, conn) = seed();
        let mut q = base_query(2);
        let first = page(&conn, &q);
        q.cursor = cursor_of(first.last().unwrap());
        let second = page(&conn, &q);

        let mut back = base_query(2);
        back.direction = Direction::Prev;
        back.cursor = cursor_of(second.first().unwrap());
        let prior = page(&conn, &back);

        assert_eq!(
            prior.iter().map(key).collect::<Vec<_>>(),
            first.iter().map(key).collect::<Vec<_>>()
        );
    }

    #[test]
    fn seek_by_dept_prefix_relaxes_missing_components() {
        let (_reg, conn) = seed();
        let mut q = base_query(100);
        q.seek = true;
        q.cursor.dept = Some("MATH".into());
        let rows = page(&conn, &q);
        assert!(!rows.is_empty());
        assert!(rows
            .iter()
            .all(|r| r.dept.as_deref().unwrap_or_default() >= "MATH"));
        // BIOL and CHEM rows are gone, PHYS and SPEC remain.
        assert!(rows.iter().any(|r| r.dept.as_deref() == Some("PHYS")));
    }

    #[test]
    fn total_ignores_the_cursor() {
        let (_reg, conn) = seed();
        let mut q = base_query(2);
        let (rows, total) = courses_page(&conn, &q).unwrap();
        q.cursor = cursor_of(rows.last().unwrap());
        let (_, total_again) = courses_page(&conn, &q).unwrap();
        assert_eq!(total, 6);
        assert_eq!(total, total_again);
    }

    #[test]
    fn partial_cursor_outside_seek_mode_is_rejected() {
        let (_reg, conn) = seed();
        let mut q = base_query(2);
        q.cursor.dept = Some("MATH".into());
        assert!(courses_page(&conn, &q).is_err());
    }

    #[test]
    fn adopted_flag_tracks_course_books_rows() {
        let (_reg, conn) = seed();
        let rows = page(&conn, &base_query(100));
        let by_id = |id: i64| rows.iter().find(|r| r.id == id).unwrap();
        assert_eq!(by_id(12).adopted, "Y");
        assert_eq!(by_id(11).adopted, "N");
        // Unresolved adoption still counts as adopted.
        assert_eq!(by_id(14).adopted, "Y");
    }

    #[test]
    fn table_page_validates_the_name_first() {
        let (reg, conn) = seed();
        let err = table_page(&conn, &reg, "sqlite_master", 0, 10).unwrap_err();
        assert!(matches!(err, StoreError::UnknownTable(_)));

        let (rows, total) = table_page(&conn, &reg, "books", 0, 2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(total, 3);
        assert_eq!(rows[0]["title"], "Calculus");
    }

    #[test]
    fn sales_history_groups_prior_years() {
        let (_reg, conn) = seed();
        let rows =
            prev_sales_by_book(&conn, "9780000000001", "Calculus", "F", "24", "1").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].term, "F23");
        assert_eq!(rows[0].est_enrl, 45);
        assert_eq!(rows[0].act_enrl, 41);
        assert_eq!(rows[0].sales, 40);
    }

    #[test]
    fn decision_inputs_aggregate_current_and_prior_figures() {
        let (_reg, conn) = seed();
        let inputs = decision_inputs_for_term(&conn, "F", "24", "1").unwrap();
        let calc = inputs.iter().find(|i| i.title == "Calculus").unwrap();
        assert_eq!(calc.curr_est_enrl, 80);
        assert_eq!(calc.curr_act_enrl, 73);
        assert_eq!(calc.prev_est_enrl, 45);
        assert_eq!(calc.prev_act_enrl, 41);
        assert_eq!(calc.curr_est_sales, 60);
        assert_eq!(calc.total_sales, Some(40));

        let lin = inputs.iter().find(|i| i.title == "Linear Algebra").unwrap();
        assert_eq!(lin.total_sales, None);
        assert_eq!(lin.curr_act_enrl, 28);
    }

    #[test]
    fn decision_inputs_for_books_filters_to_the_given_pairs() {
        let (_reg, conn) = seed();
        let books = vec![("9780000000001".to_string(), "Calculus".to_string())];
        let inputs = decision_inputs_for_books(&conn, "F", "24", "1", &books).unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].title, "Calculus");
        assert!(decision_inputs_for_books(&conn, "F", "24", "1", &[])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn term_features_apply_the_exclusion_filters() {
        let (_reg, conn) = seed();
        let rows = term_features(&conn, "F", "24", "1").unwrap();
        // Lab Kit (supply publisher) excluded; Calculus and Linear
        // Algebra survive.
        assert_eq!(rows.len(), 2);
        let calc = rows.iter().find(|r| r.title == "Calculus").unwrap();
        assert!((calc.price - 100.0).abs() < 1e-9);
        let lin = rows.iter().find(|r| r.title == "Linear Algebra").unwrap();
        // 80 * (1 - (40 - 30)/100) = 72.
        assert!((lin.price - 72.0).abs() < 1e-9);
    }

    #[test]
    fn lookups_cover_terms_books_and_sections() {
        let (_reg, conn) = seed();
        assert_eq!(all_terms(&conn).unwrap(), vec!["F23", "F24"]);

        let books = books_for_term(&conn, "F", "24", "1").unwrap();
        assert_eq!(books.len(), 3);

        let found = search_books_by_isbn(&conn, "0000001", "1").unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].year, "24");

        let sections = sections_for_term(&conn, "F", "24").unwrap();
        assert!(sections
            .iter()
            .any(|s| s.crn.as_deref() == Some("30012") && s.section == "001"));
    }

    #[test]
    fn course_and_book_adoption_views_format_labels() {
        let (_reg, conn) = seed();
        let (books, label) = books_for_course(&conn, 12).unwrap().unwrap();
        assert_eq!(label, "MATH 101 001");
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].title, "Calculus");
        assert!(books_for_course(&conn, 999).unwrap().is_none());

        let rows = courses_for_book(&conn, "9780000000001", "Calculus", "F", "24").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].course, "MATH 101 001");
        assert_eq!(rows[1].course, "MATH 101 002");
    }

    #[test]
    fn table_status_reports_counts_without_ingest_runs() {
        let (reg, conn) = seed();
        let status = table_status(&conn, &reg).unwrap();
        let books = status.iter().find(|s| s.table == "books").unwrap();
        assert_eq!(books.rows, 3);
        assert!(books.last_ingest.is_none());
    }
}
