//! PostgreSQL to SQLite data type mapping.
//!
//! SQLite has a handful of storage classes, so the mapping is lossy by
//! design: autoincrementing integers collapse to INTEGER, uuids and
//! timestamps become TEXT, bytea becomes BLOB.

use once_cell::sync::Lazy;
use regex::Regex;

pub struct TypeMapper;

impl TypeMapper {
    /// Rewrite every PostgreSQL type name in a statement body to the
    /// closest SQLite type.
    pub fn convert(stmt: &str) -> String {
        let mut result = stmt.to_string();

        // Autoincrement-capable integers. SQLite auto-increments
        // INTEGER PRIMARY KEY, so the SERIAL family collapses.
        result = RE_BIGSERIAL.replace_all(&result, "INTEGER").to_string();
        result = RE_SMALLSERIAL.replace_all(&result, "INTEGER").to_string();
        result = RE_SERIAL.replace_all(&result, "INTEGER").to_string();
        result = RE_BIGINT.replace_all(&result, "INTEGER").to_string();
        result = RE_SMALLINT.replace_all(&result, "INTEGER").to_string();

        // Floats and binary.
        result = RE_DOUBLE_PRECISION.replace_all(&result, "REAL").to_string();
        result = RE_NUMERIC.replace_all(&result, "REAL").to_string();
        result = RE_BYTEA.replace_all(&result, "BLOB").to_string();

        // Timestamps are stored as ISO-8601 text.
        result = RE_TIMESTAMP_WITH_TZ.replace_all(&result, "TEXT").to_string();
        result = RE_TIMESTAMP_NO_TZ.replace_all(&result, "TEXT").to_string();
        result = RE_TIMESTAMPTZ.replace_all(&result, "TEXT").to_string();

        // Character types, including the identifier-quoted "char".
        result = RE_CHARACTER_VARYING.replace_all(&result, "TEXT").to_string();
        result = RE_VARCHAR.replace_all(&result, "TEXT").to_string();
        result = RE_QUOTED_CHAR.replace_all(&result, "TEXT").to_string();

        result = RE_UUID.replace_all(&result, "TEXT").to_string();
        result = RE_JSONB.replace_all(&result, "TEXT").to_string();
        result = RE_JSON.replace_all(&result, "TEXT").to_string();
        result = RE_BOOLEAN_TYPE.replace_all(&result, "INTEGER").to_string();

        result
    }

    /// Rewrite bare boolean literals to SQLite's 0/1.
    pub fn convert_boolean_literals(stmt: &str) -> String {
        let result = RE_TRUE.replace_all(stmt, "1").to_string();
        RE_FALSE.replace_all(&result, "0").to_string()
    }
}

static RE_SERIAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bSERIAL\b").unwrap());
static RE_BIGSERIAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bBIGSERIAL\b").unwrap());
static RE_SMALLSERIAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bSMALLSERIAL\b").unwrap());
static RE_BIGINT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bBIGINT\b").unwrap());
static RE_SMALLINT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bSMALLINT\b").unwrap());
static RE_DOUBLE_PRECISION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bDOUBLE\s+PRECISION\b").unwrap());
static RE_NUMERIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bNUMERIC\s*(\(\s*\d+\s*(,\s*\d+\s*)?\))?").unwrap());
static RE_BYTEA: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bBYTEA\b").unwrap());
static RE_TIMESTAMPTZ: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bTIMESTAMPTZ\b").unwrap());
static RE_TIMESTAMP_WITH_TZ: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bTIMESTAMP\s+WITH\s+TIME\s+ZONE\b").unwrap());
static RE_TIMESTAMP_NO_TZ: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bTIMESTAMP\s+WITHOUT\s+TIME\s+ZONE\b").unwrap());
static RE_CHARACTER_VARYING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bCHARACTER\s+VARYING\s*(\(\s*\d+\s*\))?").unwrap());
static RE_VARCHAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bVARCHAR\s*(\(\s*\d+\s*\))?").unwrap());
static RE_QUOTED_CHAR: Lazy<Regex> = Lazy::new(|| Regex::new(r#""char""#).unwrap());
static RE_UUID: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bUUID\b").unwrap());
static RE_JSONB: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bJSONB\b").unwrap());
static RE_JSON: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bJSON\b").unwrap());
static RE_BOOLEAN_TYPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bBOOLEAN\b").unwrap());
static RE_TRUE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\btrue\b").unwrap());
static RE_FALSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bfalse\b").unwrap());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_family_becomes_integer() {
        let input = "CREATE TABLE t (id SERIAL, big_id BIGSERIAL, small_id SMALLSERIAL);";
        let output = TypeMapper::convert(input);

        assert!(output.contains("INTEGER"));
        assert!(!output.to_uppercase().contains("SERIAL"));
    }

    #[test]
    fn bytea_and_double_precision() {
        let input = "CREATE TABLE t (payload bytea, price double precision);";
        let output = TypeMapper::convert(input);

        assert!(output.contains("BLOB"));
        assert!(output.contains("REAL"));
        assert!(!output.to_lowercase().contains("bytea"));
        assert!(!output.to_lowercase().contains("precision"));
    }

    #[test]
    fn timestamps_become_text() {
        let input =
            "CREATE TABLE t (a timestamp with time zone, b timestamp without time zone);";
        let output = TypeMapper::convert(input);

        assert_eq!(output.matches("TEXT").count(), 2);
        assert!(!output.to_lowercase().contains("time zone"));
    }

    #[test]
    fn quoted_char_and_varying() {
        let input = r#"CREATE TABLE t (flag "char", name character varying(120));"#;
        let output = TypeMapper::convert(input);

        assert!(!output.contains("\"char\""));
        assert!(!output.to_lowercase().contains("varying"));
        assert!(output.contains("TEXT"));
    }

    #[test]
    fn uuid_and_boolean() {
        let input = "CREATE TABLE t (id uuid, active boolean);";
        let output = TypeMapper::convert(input);

        assert!(output.contains("TEXT"));
        assert!(output.contains("INTEGER"));
    }

    #[test]
    fn boolean_literals_become_ints() {
        let output = TypeMapper::convert_boolean_literals("INSERT INTO t VALUES (true, false);");
        assert_eq!(output, "INSERT INTO t VALUES (1, 0);");
    }
}
