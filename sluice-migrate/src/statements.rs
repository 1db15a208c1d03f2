//! Splitting generated migration SQL into executable statements.

/// Generated SQL separates statements with this marker on its own line.
pub const QUERY_DELIMITER: &str = "-- QUERY DELIMITER";

/// Split on the delimiter and trim each fragment; empty and
/// whitespace-only fragments are dropped.
pub fn split_statements(sql: &str) -> Vec<String> {
    sql.split(QUERY_DELIMITER)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_delimiter_lines() {
        let sql = "CREATE TABLE a (id INTEGER);\n-- QUERY DELIMITER\nCREATE TABLE b (id INTEGER);\n-- QUERY DELIMITER\n";
        let statements = split_statements(sql);
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "CREATE TABLE a (id INTEGER);");
        assert_eq!(statements[1], "CREATE TABLE b (id INTEGER);");
    }

    #[test]
    fn single_statement_without_delimiter() {
        let statements = split_statements("SELECT 1");
        assert_eq!(statements, vec!["SELECT 1".to_string()]);
    }

    #[test]
    fn whitespace_only_fragments_dropped() {
        let sql = "-- QUERY DELIMITER\n   \n-- QUERY DELIMITER\nSELECT 1\n-- QUERY DELIMITER";
        assert_eq!(split_statements(sql), vec!["SELECT 1".to_string()]);
        assert!(split_statements("").is_empty());
        assert!(split_statements("  \n ").is_empty());
    }
}
