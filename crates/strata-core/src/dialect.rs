//! SQL dialects and the text-level helpers every generator shares.
//!
//! A [`Dialect`] knows how to delimit identifiers, render string literals,
//! terminate statements, open and commit script transactions, and render bound
//! parameter placeholders. Generators never hard-code these details.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them (`"` → `""`).
///
/// # Examples
///
/// ```
/// use strata_core::quote_ident;
///
/// assert_eq!(quote_ident("users"), "\"users\"");
/// assert_eq!(quote_ident("user\"name"), "\"user\"\"name\"");
/// ```
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a SQL identifier using MySQL backtick quoting.
///
/// # Examples
///
/// ```
/// use strata_core::quote_ident_mysql;
///
/// assert_eq!(quote_ident_mysql("users"), "`users`");
/// assert_eq!(quote_ident_mysql("user`name"), "`user``name`");
/// ```
#[inline]
pub fn quote_ident_mysql(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// SQLite
    Sqlite,
    /// MySQL / MariaDB
    Mysql,
    /// PostgreSQL
    #[default]
    Postgres,
}

impl Dialect {
    /// Lowercase dialect name used in logs and configuration.
    pub const fn name(self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Mysql => "mysql",
            Dialect::Postgres => "postgres",
        }
    }

    /// Delimit a single identifier.
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Dialect::Mysql => quote_ident_mysql(name),
            Dialect::Sqlite | Dialect::Postgres => quote_ident(name),
        }
    }

    /// Delimit a possibly schema-qualified object name.
    ///
    /// SQLite has no schemas in the migrations sense, so the schema is dropped.
    pub fn delimit_name(self, name: &str, schema: Option<&str>) -> String {
        match (self, schema) {
            (Dialect::Sqlite, _) | (_, None) => self.quote_identifier(name),
            (_, Some(schema)) => format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(name)
            ),
        }
    }

    /// Terminator appended to every statement.
    pub const fn statement_terminator(self) -> &'static str {
        ";"
    }

    /// Separator placed between commands of a generated script.
    pub const fn batch_terminator(self) -> &'static str {
        "\n"
    }

    /// Statement that opens a transaction inside a generated script.
    pub const fn start_transaction_statement(self) -> &'static str {
        match self {
            Dialect::Sqlite => "BEGIN TRANSACTION;",
            Dialect::Mysql | Dialect::Postgres => "START TRANSACTION;",
        }
    }

    /// Statement that commits a transaction inside a generated script.
    pub const fn commit_transaction_statement(self) -> &'static str {
        "COMMIT;"
    }

    /// Render a string literal, escaping quotes (and backslashes for MySQL).
    pub fn string_literal(self, text: &str) -> String {
        let escaped = match self {
            Dialect::Mysql => text.replace('\\', "\\\\").replace('\'', "''"),
            Dialect::Sqlite | Dialect::Postgres => text.replace('\'', "''"),
        };
        format!("'{}'", escaped)
    }

    /// Placeholder for the parameter at 1-based `position` in the bound list.
    ///
    /// MySQL placeholders are positional by occurrence, so callers must bind a
    /// value for every rendered placeholder.
    pub fn placeholder(self, position: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", position),
            Dialect::Sqlite => format!("?{}", position),
            Dialect::Mysql => "?".to_string(),
        }
    }

    /// Does a placeholder refer to its bound value by number (reusable)?
    pub const fn numbered_placeholders(self) -> bool {
        !matches!(self, Dialect::Mysql)
    }

    /// Can INSERT/UPDATE/DELETE return rows through a RETURNING clause?
    pub const fn supports_returning(self) -> bool {
        !matches!(self, Dialect::Mysql)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Dialect::Sqlite),
            "mysql" | "mariadb" => Ok(Dialect::Mysql),
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            other => Err(crate::Error::config(format!("unknown SQL dialect '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Identifier Tests ====================

    #[test]
    fn test_quote_ident_sql_injection_attempt() {
        let malicious = "users\"; DROP TABLE secrets; --";
        assert_eq!(
            quote_ident(malicious),
            "\"users\"\"; DROP TABLE secrets; --\""
        );
    }

    #[test]
    fn test_quote_ident_mysql_embedded_backtick() {
        assert_eq!(quote_ident_mysql("a`b`c"), "`a``b``c`");
    }

    #[test]
    fn test_delimit_name_with_schema() {
        assert_eq!(
            Dialect::Postgres.delimit_name("Blogs", Some("blog")),
            "\"blog\".\"Blogs\""
        );
        assert_eq!(
            Dialect::Mysql.delimit_name("Blogs", Some("blog")),
            "`blog`.`Blogs`"
        );
        assert_eq!(
            Dialect::Sqlite.delimit_name("Blogs", Some("blog")),
            "\"Blogs\""
        );
    }

    // ==================== Literal and Placeholder Tests ====================

    #[test]
    fn test_string_literal_escaping() {
        assert_eq!(Dialect::Postgres.string_literal("O'Brien"), "'O''Brien'");
        assert_eq!(Dialect::Mysql.string_literal("a\\b"), "'a\\\\b'");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(Dialect::Postgres.placeholder(3), "$3");
        assert_eq!(Dialect::Sqlite.placeholder(1), "?1");
        assert_eq!(Dialect::Mysql.placeholder(7), "?");
        assert!(!Dialect::Mysql.numbered_placeholders());
    }

    #[test]
    fn test_from_str() {
        assert_eq!("PostgreSQL".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert_eq!("sqlite".parse::<Dialect>().unwrap(), Dialect::Sqlite);
        assert!("oracle".parse::<Dialect>().is_err());
    }
}
