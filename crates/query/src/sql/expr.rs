//! Relational query model and its PostgreSQL rendering.
//!
//! Literals never appear in the SQL text: every value becomes a `$n`
//! placeholder and is collected, in order, into [`RenderedQuery::params`].

use core::fmt::Write as _;

use quarry_core::Value;

use crate::spec::Direction;

/// Comparison operators.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "<>",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
        }
    }
}

/// Qualified column reference `alias."column"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub alias: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(alias: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            column: column.into(),
        }
    }
}

/// Boolean SQL expression.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpr {
    Bool(bool),
    Compare {
        column: ColumnRef,
        op: ComparisonOp,
        value: Value,
    },
    /// Column-to-column equality, used for correlation and join conditions.
    ColumnsEqual(ColumnRef, ColumnRef),
    IsNull {
        column: ColumnRef,
        negated: bool,
    },
    /// `LIKE` with `\` as escape character.
    Like {
        column: ColumnRef,
        pattern: String,
        negated: bool,
    },
    In {
        column: ColumnRef,
        values: Vec<Value>,
        negated: bool,
    },
    /// Inclusive on both bounds.
    Between {
        column: ColumnRef,
        low: Value,
        high: Value,
    },
    And(Vec<SqlExpr>),
    Or(Vec<SqlExpr>),
    /// Rendered as `NOT COALESCE(expr, FALSE)` so that an unknown operand
    /// negates to true, as it does in-process.
    Not(Box<SqlExpr>),
    /// Correlated `EXISTS (SELECT 1 FROM table AS alias WHERE condition)`.
    Exists {
        table: String,
        alias: String,
        condition: Box<SqlExpr>,
    },
}

/// `LEFT JOIN table AS alias ON on`.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub table: String,
    pub alias: String,
    pub on: SqlExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderTerm {
    pub column: ColumnRef,
    pub direction: Direction,
}

/// A `SELECT` over one entity table.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub table: String,
    pub alias: String,
    pub joins: Vec<Join>,
    pub filter: Option<SqlExpr>,
    pub order_by: Vec<OrderTerm>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

/// SQL text plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Alias of the queried table.
pub const ROOT_ALIAS: &str = "t0";

impl SelectQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: ROOT_ALIAS.to_string(),
            joins: Vec::new(),
            filter: None,
            order_by: Vec::new(),
            offset: None,
            limit: None,
        }
    }

    /// `SELECT t0.* ...` with joins, filter, order and window.
    pub fn render(&self) -> RenderedQuery {
        let mut out = Renderer::default();
        let _ = write!(out.sql, "SELECT {}.* FROM {} AS {}", self.alias, quote(&self.table), self.alias);
        for join in &self.joins {
            let _ = write!(out.sql, " LEFT JOIN {} AS {} ON ", quote(&join.table), join.alias);
            out.expr(&join.on);
        }
        if let Some(filter) = &self.filter {
            out.sql.push_str(" WHERE ");
            out.expr(filter);
        }
        if !self.order_by.is_empty() {
            out.sql.push_str(" ORDER BY ");
            for (idx, term) in self.order_by.iter().enumerate() {
                if idx > 0 {
                    out.sql.push_str(", ");
                }
                out.column(&term.column);
                out.sql.push_str(match term.direction {
                    Direction::Asc => " ASC NULLS FIRST",
                    Direction::Desc => " DESC NULLS LAST",
                });
            }
        }
        if let Some(limit) = self.limit {
            let _ = write!(out.sql, " LIMIT {limit}");
        }
        if let Some(offset) = self.offset {
            let _ = write!(out.sql, " OFFSET {offset}");
        }
        out.finish()
    }

    /// `SELECT COUNT(*)` over the filtered, unordered and unsliced rows.
    pub fn render_count(&self) -> RenderedQuery {
        let mut out = Renderer::default();
        let _ = write!(out.sql, "SELECT COUNT(*) FROM {} AS {}", quote(&self.table), self.alias);
        if let Some(filter) = &self.filter {
            out.sql.push_str(" WHERE ");
            out.expr(filter);
        }
        out.finish()
    }
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Escape `LIKE` metacharacters in a literal fragment.
pub fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[derive(Default)]
struct Renderer {
    sql: String,
    params: Vec<Value>,
}

impl Renderer {
    fn finish(self) -> RenderedQuery {
        RenderedQuery {
            sql: self.sql,
            params: self.params,
        }
    }

    fn param(&mut self, value: &Value) {
        self.params.push(value.clone());
        let _ = write!(self.sql, "${}", self.params.len());
    }

    fn column(&mut self, column: &ColumnRef) {
        let _ = write!(self.sql, "{}.{}", column.alias, quote(&column.column));
    }

    fn join(&mut self, children: &[SqlExpr], separator: &str, empty: &str) {
        if children.is_empty() {
            self.sql.push_str(empty);
            return;
        }
        self.sql.push('(');
        for (idx, child) in children.iter().enumerate() {
            if idx > 0 {
                self.sql.push_str(separator);
            }
            self.expr(child);
        }
        self.sql.push(')');
    }

    fn expr(&mut self, expr: &SqlExpr) {
        match expr {
            SqlExpr::Bool(true) => self.sql.push_str("TRUE"),
            SqlExpr::Bool(false) => self.sql.push_str("FALSE"),
            SqlExpr::Compare { column, op, value } => {
                self.column(column);
                let _ = write!(self.sql, " {} ", op.symbol());
                self.param(value);
            }
            SqlExpr::ColumnsEqual(left, right) => {
                self.column(left);
                self.sql.push_str(" = ");
                self.column(right);
            }
            SqlExpr::IsNull { column, negated } => {
                self.column(column);
                self.sql.push_str(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            SqlExpr::Like {
                column,
                pattern,
                negated,
            } => {
                self.column(column);
                self.sql.push_str(if *negated { " NOT LIKE " } else { " LIKE " });
                self.param(&Value::String(pattern.clone()));
                self.sql.push_str(" ESCAPE '\\'");
            }
            SqlExpr::In {
                column,
                values,
                negated,
            } => {
                self.column(column);
                self.sql.push_str(if *negated { " NOT IN (" } else { " IN (" });
                for (idx, value) in values.iter().enumerate() {
                    if idx > 0 {
                        self.sql.push_str(", ");
                    }
                    self.param(value);
                }
                self.sql.push(')');
            }
            SqlExpr::Between { column, low, high } => {
                self.column(column);
                self.sql.push_str(" BETWEEN ");
                self.param(low);
                self.sql.push_str(" AND ");
                self.param(high);
            }
            SqlExpr::And(children) => self.join(children, " AND ", "TRUE"),
            SqlExpr::Or(children) => self.join(children, " OR ", "FALSE"),
            SqlExpr::Not(child) => {
                self.sql.push_str("NOT COALESCE(");
                self.expr(child);
                self.sql.push_str(", FALSE)");
            }
            SqlExpr::Exists {
                table,
                alias,
                condition,
            } => {
                let _ = write!(self.sql, "EXISTS (SELECT 1 FROM {} AS {} WHERE ", quote(table), alias);
                self.expr(condition);
                self.sql.push(')');
            }
        }
    }
}
