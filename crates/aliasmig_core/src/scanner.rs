use anyhow::{Context, Result};
use rusqlite::{Connection, Row, params};

use crate::error::MigrationError;
use crate::schema::validate_identifier;
use crate::services::{Location, ROOT_LOCATION_ID};

/// Paginated read cursor over one table with a stable ordering.
///
/// Pages are fetched with `LIMIT page_size OFFSET pass * page_size`. Callers
/// loop over exactly [`BulkScanner::page_count`] passes starting at pass 0;
/// there is no resumption across runs.
#[derive(Debug, Clone)]
pub struct BulkScanner {
    table: String,
    columns: String,
    filter: Option<String>,
    order_by: String,
    page_size: usize,
}

impl BulkScanner {
    pub fn new(table: &str, columns: &str, order_by: &str, page_size: usize) -> Result<Self> {
        validate_identifier(table)?;
        if page_size == 0 {
            return Err(
                MigrationError::InvalidArgument("page size must be positive".to_string()).into(),
            );
        }
        Ok(Self {
            table: table.to_string(),
            columns: columns.to_string(),
            filter: None,
            order_by: order_by.to_string(),
            page_size,
        })
    }

    /// Restrict the scan with a static SQL predicate.
    pub fn with_filter(mut self, filter: &str) -> Self {
        self.filter = Some(filter.to_string());
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn total_rows(&self, connection: &Connection) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}{}", self.table, self.where_clause());
        let count: i64 = connection
            .query_row(&sql, [], |row| row.get(0))
            .with_context(|| format!("failed to count rows in {}", self.table))?;
        usize::try_from(count).context("row count does not fit into usize")
    }

    pub fn page_count(&self, total_rows: usize) -> usize {
        total_rows.div_ceil(self.page_size)
    }

    pub fn fetch_page<T, F>(&self, connection: &Connection, pass: usize, map: F) -> Result<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let sql = format!(
            "SELECT {} FROM {}{} ORDER BY {} LIMIT ?1 OFFSET ?2",
            self.columns,
            self.table,
            self.where_clause(),
            self.order_by
        );
        let limit = i64::try_from(self.page_size).context("page size does not fit into i64")?;
        let offset = pass
            .checked_mul(self.page_size)
            .and_then(|value| i64::try_from(value).ok())
            .context("page offset does not fit into i64")?;

        let mut statement = connection
            .prepare(&sql)
            .with_context(|| format!("failed to prepare page query for {}", self.table))?;
        let rows = statement
            .query_map(params![limit, offset], map)
            .with_context(|| format!("failed to read page {pass} of {}", self.table))?;

        let mut out = Vec::with_capacity(self.page_size);
        for row in rows {
            out.push(row.with_context(|| format!("failed to decode row of {}", self.table))?);
        }
        Ok(out)
    }

    fn where_clause(&self) -> String {
        match &self.filter {
            Some(filter) => format!(" WHERE {filter}"),
            None => String::new(),
        }
    }
}

/// Scanner over every non-root location, parents before children.
pub fn location_scanner(page_size: usize) -> Result<BulkScanner> {
    Ok(BulkScanner::new(
        "location",
        "node_id, parent_node_id, content_id, depth",
        "depth ASC, node_id ASC",
        page_size,
    )?
    .with_filter(&format!("node_id != {ROOT_LOCATION_ID}")))
}

pub fn read_location(row: &Row<'_>) -> rusqlite::Result<Location> {
    Ok(Location {
        node_id: row.get(0)?,
        parent_node_id: row.get(1)?,
        content_id: row.get(2)?,
        depth: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::{BulkScanner, location_scanner, read_location};
    use crate::schema::CONTENT_SCHEMA_SQL;

    fn connection_with_rows(count: i64) -> Connection {
        let connection = Connection::open_in_memory().expect("open");
        connection
            .execute_batch("CREATE TABLE numbers (id INTEGER PRIMARY KEY, label TEXT NOT NULL);")
            .expect("create");
        for id in 1..=count {
            connection
                .execute(
                    "INSERT INTO numbers (id, label) VALUES (?1, ?2)",
                    rusqlite::params![id, format!("n{id}")],
                )
                .expect("insert");
        }
        connection
    }

    fn scan_all(connection: &Connection, page_size: usize) -> (usize, Vec<i64>) {
        let scanner = BulkScanner::new("numbers", "id", "id ASC", page_size).expect("scanner");
        let total = scanner.total_rows(connection).expect("count");
        let pages = scanner.page_count(total);
        let mut seen = Vec::new();
        for pass in 0..pages {
            let page = scanner
                .fetch_page(connection, pass, |row| row.get::<_, i64>(0))
                .expect("page");
            assert!(!page.is_empty(), "pass {pass} returned an empty page");
            seen.extend(page);
        }
        (pages, seen)
    }

    #[test]
    fn empty_table_has_no_pages() {
        let connection = connection_with_rows(0);
        let (pages, seen) = scan_all(&connection, 5);
        assert_eq!(pages, 0);
        assert!(seen.is_empty());
    }

    #[test]
    fn exact_multiple_fills_every_page() {
        let connection = connection_with_rows(5);
        let (pages, seen) = scan_all(&connection, 5);
        assert_eq!(pages, 1);
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn one_past_multiple_adds_a_short_page() {
        let connection = connection_with_rows(6);
        let (pages, seen) = scan_all(&connection, 5);
        assert_eq!(pages, 2);
        assert_eq!(seen, (1..=6).collect::<Vec<_>>());
    }

    #[test]
    fn out_of_range_pass_is_empty() {
        let connection = connection_with_rows(3);
        let scanner = BulkScanner::new("numbers", "id", "id ASC", 2).expect("scanner");
        let page = scanner
            .fetch_page(&connection, 7, |row| row.get::<_, i64>(0))
            .expect("page");
        assert!(page.is_empty());
    }

    #[test]
    fn zero_page_size_is_rejected() {
        assert!(BulkScanner::new("numbers", "id", "id ASC", 0).is_err());
    }

    #[test]
    fn location_scanner_skips_root_and_orders_by_depth() {
        let connection = Connection::open_in_memory().expect("open");
        connection.execute_batch(CONTENT_SCHEMA_SQL).expect("schema");
        connection
            .execute_batch(
                "INSERT INTO content (id, main_language_code, always_available) VALUES (1, 'eng-GB', 1);
                 INSERT INTO location (node_id, parent_node_id, content_id, depth) VALUES
                    (1, 0, 1, 0), (9, 4, 1, 2), (4, 1, 1, 1), (3, 1, 1, 1);",
            )
            .expect("seed");

        let scanner = location_scanner(2).expect("scanner");
        let total = scanner.total_rows(&connection).expect("count");
        assert_eq!(total, 3);

        let mut ids = Vec::new();
        for pass in 0..scanner.page_count(total) {
            for location in scanner
                .fetch_page(&connection, pass, read_location)
                .expect("page")
            {
                ids.push(location.node_id);
            }
        }
        assert_eq!(ids, vec![3, 4, 9]);
    }
}
