//! The raw → bronze → silver ETL pipeline.
//!
//! Raw lands uploaded CSVs verbatim as all-text tables, bronze reshapes the
//! composite text columns into typed trip rows, and silver aggregates trips
//! per calendar week.

pub mod bronze;
pub mod raw;
pub mod silver;

// PostgreSQL caps a statement at 65535 bind parameters; stay well under it
// so header width never pushes a batch over.
const MAX_BIND_PARAMS: usize = 8192;

/// How many rows fit in one multi-row INSERT for a table of `columns` width.
pub(crate) fn rows_per_batch(columns: usize) -> usize {
    (MAX_BIND_PARAMS / columns.max(1)).max(1)
}

/// `($1, $2, ...), ($3, $4, ...), ...` placeholder groups for a multi-row
/// INSERT of `rows` rows by `columns` columns.
pub(crate) fn placeholder_groups(rows: usize, columns: usize) -> String {
    let mut groups = Vec::with_capacity(rows);
    let mut next = 1;
    for _ in 0..rows {
        let group: Vec<String> = (0..columns)
            .map(|_| {
                let p = format!("${next}");
                next += 1;
                p
            })
            .collect();
        groups.push(format!("({})", group.join(", ")));
    }
    groups.join(", ")
}
