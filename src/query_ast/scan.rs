//! Driver column type name -> scan kind. Every driver decodes through this one
//! table so that an `INT` means the same thing regardless of where it came from.

pub use crate::models::enums::ScanKind;

impl ScanKind {
    /// Maps a database type name (`"BIGINT"`, `"varchar(255)"`, `"INT4"`,
    /// `"TINYINT UNSIGNED"`) to the kind of value it scans into.
    pub fn from_type_name(name: &str) -> ScanKind {
        let upper = name.trim().to_ascii_uppercase();
        let base = upper.split('(').next().unwrap_or("").trim();
        let base = base.trim_end_matches(" UNSIGNED").trim();

        match base {
            "" | "NULL" => ScanKind::Null,
            "BOOL" | "BOOLEAN" => ScanKind::Bool,
            "INT" | "INTEGER" | "INT2" | "INT4" | "INT8" | "TINYINT" | "SMALLINT" | "MEDIUMINT"
            | "BIGINT" | "SERIAL" | "BIGSERIAL" | "SMALLSERIAL" | "YEAR" | "OID" => ScanKind::Int,
            "REAL" | "FLOAT" | "FLOAT4" | "FLOAT8" | "DOUBLE" | "DOUBLE PRECISION" => ScanKind::Float,
            "NUMERIC" | "DECIMAL" | "MONEY" => ScanKind::Decimal,
            "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BYTEA" | "BINARY" | "VARBINARY" | "BIT" => {
                ScanKind::Bytes
            }
            "DATE" | "TIME" | "DATETIME" | "TIMESTAMP" | "TIMESTAMPTZ" | "TIMETZ" | "INTERVAL" => {
                ScanKind::DateTime
            }
            "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" | "TINYTEXT" | "MEDIUMTEXT"
            | "LONGTEXT" | "CLOB" | "JSON" | "JSONB" | "UUID" | "ENUM" | "SET" => ScanKind::Text,
            other => affinity(other),
        }
    }
}

// SQLite-style affinity rules for declared types the table above doesn't list.
fn affinity(decl: &str) -> ScanKind {
    if decl.contains("INT") {
        ScanKind::Int
    } else if decl.contains("CHAR") || decl.contains("CLOB") || decl.contains("TEXT") {
        ScanKind::Text
    } else if decl.contains("BLOB") {
        ScanKind::Bytes
    } else if decl.contains("REAL") || decl.contains("FLOA") || decl.contains("DOUB") {
        ScanKind::Float
    } else if decl.contains("BOOL") {
        ScanKind::Bool
    } else if decl.contains("DATE") || decl.contains("TIME") {
        ScanKind::DateTime
    } else {
        ScanKind::Text
    }
}
