//! SQL statements and parameter binding.
//!
//! A [`Statement`] is SQL text plus its bound parameters. Parameters are
//! either positional (`?`, `?NNN`) or named (`:name`, `@name`, `$name`);
//! a statement carries one kind or the other, never both. Binding errors are
//! reported immediately, before anything is sent.
//!
//! # Example
//!
//! ```
//! use hrana_client::Statement;
//!
//! # fn main() -> Result<(), hrana_client::BindingError> {
//! let stmt = Statement::new("INSERT INTO users (id, name) VALUES (?, ?)")
//!     .bind(1)?
//!     .bind("alice")?;
//! assert_eq!(stmt.parameter_count(), 2);
//!
//! let stmt = Statement::new("SELECT * FROM users WHERE name = :name")
//!     .bind_named("name", "alice")?;
//! assert!(stmt.bind(2).is_err());
//! # Ok(())
//! # }
//! ```

use crate::error::BindingError;
use crate::types::Value;

/// Type of SQL statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementType {
    /// SELECT query (also `WITH`, `VALUES`, `PRAGMA`, `EXPLAIN`)
    Select,
    /// INSERT statement (also `REPLACE`)
    Insert,
    /// UPDATE statement
    Update,
    /// DELETE statement
    Delete,
    /// DDL statement (CREATE, ALTER, DROP)
    Ddl,
    /// Transaction control (BEGIN, COMMIT, ROLLBACK, SAVEPOINT, ...)
    Transaction,
    /// Unknown or other statement type
    Other,
}

impl StatementType {
    /// Detect statement type from SQL text.
    pub fn from_sql(sql: &str) -> Self {
        let keyword: String = skip_preamble(sql)
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_ascii_uppercase();

        match keyword.as_str() {
            "SELECT" | "WITH" | "VALUES" | "PRAGMA" | "EXPLAIN" => Self::Select,
            "INSERT" | "REPLACE" => Self::Insert,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "CREATE" | "ALTER" | "DROP" => Self::Ddl,
            "BEGIN" | "COMMIT" | "END" | "ROLLBACK" | "SAVEPOINT" | "RELEASE" => {
                Self::Transaction
            }
            _ => Self::Other,
        }
    }
}

/// Skip whitespace, opening parentheses and comments before the first keyword.
fn skip_preamble(mut sql: &str) -> &str {
    loop {
        sql = sql.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        if let Some(rest) = sql.strip_prefix("--") {
            sql = rest.find('\n').map_or("", |end| &rest[end + 1..]);
        } else if let Some(rest) = sql.strip_prefix("/*") {
            sql = rest.find("*/").map_or("", |end| &rest[end + 2..]);
        } else {
            return sql;
        }
    }
}

/// Parameters bound to a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Parameters {
    #[default]
    None,
    /// Values for `?` placeholders, in order
    Positional(Vec<Value>),
    /// Values for named placeholders, names including their prefix
    Named(Vec<(String, Value)>),
}

impl Parameters {
    pub fn len(&self) -> usize {
        match self {
            Parameters::None => 0,
            Parameters::Positional(values) => values.len(),
            Parameters::Named(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// SQL text with its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// SQL text (may contain parameter placeholders)
    sql: String,
    parameters: Parameters,
    statement_type: StatementType,
    /// Explicit override of whether rows are requested
    want_rows: Option<bool>,
}

impl Statement {
    /// Create a new statement without parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        let sql = sql.into();
        let statement_type = StatementType::from_sql(&sql);
        Self {
            sql,
            parameters: Parameters::None,
            statement_type,
            want_rows: None,
        }
    }

    /// Create a statement with positional parameters.
    pub fn with_params<I, V>(sql: impl Into<String>, params: I) -> Result<Self, BindingError>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        params
            .into_iter()
            .try_fold(Self::new(sql), |stmt, value| stmt.bind(value))
    }

    /// Create a statement with named parameters.
    pub fn with_named_params<I, N, V>(sql: impl Into<String>, params: I) -> Result<Self, BindingError>
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: Into<Value>,
    {
        params
            .into_iter()
            .try_fold(Self::new(sql), |stmt, (name, value)| {
                stmt.bind_named(name.as_ref(), value)
            })
    }

    /// Bind the next positional parameter.
    ///
    /// # Errors
    /// `MixedBindings` if named parameters are already bound;
    /// `NonFiniteFloat` for NaN or infinite values.
    pub fn bind(mut self, value: impl Into<Value>) -> Result<Self, BindingError> {
        let value = value.into();
        match &mut self.parameters {
            Parameters::Named(_) => return Err(BindingError::MixedBindings),
            Parameters::None => {
                check_finite("?1".to_string(), &value)?;
                self.parameters = Parameters::Positional(vec![value]);
            }
            Parameters::Positional(values) => {
                check_finite(format!("?{}", values.len() + 1), &value)?;
                values.push(value);
            }
        }
        Ok(self)
    }

    /// Bind a named parameter.
    ///
    /// A bare name is given the `:` prefix; names already starting with `:`,
    /// `@` or `$` are kept as they are. Binding a name twice replaces the
    /// earlier value.
    pub fn bind_named(mut self, name: &str, value: impl Into<Value>) -> Result<Self, BindingError> {
        let name = normalize_name(name)?;
        let value = value.into();
        check_finite(name.clone(), &value)?;

        match &mut self.parameters {
            Parameters::Positional(_) => return Err(BindingError::MixedBindings),
            Parameters::None => self.parameters = Parameters::Named(vec![(name, value)]),
            Parameters::Named(values) => match values.iter_mut().find(|(n, _)| *n == name) {
                Some(slot) => slot.1 = value,
                None => values.push((name, value)),
            },
        }
        Ok(self)
    }

    /// Override whether the server should return rows.
    pub fn with_want_rows(mut self, want_rows: bool) -> Self {
        self.want_rows = Some(want_rows);
        self
    }

    /// Get the SQL text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    /// Get the statement type.
    pub fn statement_type(&self) -> StatementType {
        self.statement_type
    }

    /// Whether rows are requested from the server.
    ///
    /// Defaults to `true` except for DDL and transaction control, so that
    /// `INSERT ... RETURNING` and `PRAGMA` results are not dropped.
    pub fn want_rows(&self) -> bool {
        self.want_rows.unwrap_or(!matches!(
            self.statement_type,
            StatementType::Ddl | StatementType::Transaction
        ))
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Statement::new(sql)
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Statement::new(sql)
    }
}

fn normalize_name(name: &str) -> Result<String, BindingError> {
    let bare = name.trim_start_matches([':', '@', '$']);
    if bare.is_empty() {
        return Err(BindingError::EmptyName);
    }
    if name.starts_with([':', '@', '$']) {
        Ok(name.to_string())
    } else {
        Ok(format!(":{}", name))
    }
}

fn check_finite(parameter: String, value: &Value) -> Result<(), BindingError> {
    match value {
        Value::Float(f) if !f.is_finite() => Err(BindingError::NonFiniteFloat {
            parameter,
            value: *f,
        }),
        _ => Ok(()),
    }
}
