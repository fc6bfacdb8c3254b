//! The restricted analytical SQL front door.
//!
//! Accepts a single SELECT over the virtual `mimir.metrics` table and
//! translates it into inquiry parameters. Projections wrapped in the
//! `AGG(...)` marker (matched case-insensitively) are metrics; everything
//! else is a dimension. The caller's projection list survives as
//! `client_sql` with every `AGG(x)` collapsed to `x`, preserving column
//! order and aliases in the final output.

use sqlparser::ast::{
    Expr, FunctionArg, FunctionArgExpr, FunctionArguments, Query, SelectItem, Statement,
    TableFactor,
};

use super::ast;
use crate::error::{MimirError, MimirResult};
use crate::planner::InquiryRequest;

/// The aggregate marker recognized in restricted SQL.
const AGG_MARKER: &str = "AGG";

/// A parsed restricted-SQL statement.
pub struct RestrictedSql {
    statement_count: usize,
    query: Box<Query>,
}

impl RestrictedSql {
    pub fn parse(sql: &str) -> MimirResult<Self> {
        let mut statements = ast::parse_statements(sql)?;
        let statement_count = statements.len();
        if statement_count == 0 {
            return Err(MimirError::NotImplemented(
                "empty statements are not supported".to_string(),
            ));
        }
        let query = match statements.remove(0) {
            Statement::Query(query) => query,
            _ => {
                return Err(MimirError::NotImplemented(
                    "only SELECT queries are supported".to_string(),
                ))
            }
        };
        Ok(RestrictedSql {
            statement_count,
            query,
        })
    }

    /// Reject surface the translator does not cover.
    pub fn validate(&self) -> MimirResult<()> {
        if self.statement_count > 1 {
            return Err(MimirError::NotImplemented(
                "multiple queries are not yet supported".to_string(),
            ));
        }

        let nested = "derived tables, CTEs and subqueries are not yet supported";
        if self.query.with.is_some() {
            return Err(MimirError::NotImplemented(nested.to_string()));
        }

        let select = ast::select_of(&self.query)?;
        for table in &select.from {
            let mut relations = vec![&table.relation];
            relations.extend(table.joins.iter().map(|join| &join.relation));
            for relation in relations {
                if !matches!(relation, TableFactor::Table { .. }) {
                    return Err(MimirError::NotImplemented(nested.to_string()));
                }
            }
        }

        let mut exprs: Vec<&Expr> = Vec::new();
        for item in &select.projection {
            match item {
                SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                    exprs.push(expr)
                }
                _ => {}
            }
        }
        if let Some(selection) = &select.selection {
            exprs.push(selection);
        }
        if let Some(order_by) = &self.query.order_by {
            exprs.extend(order_by.exprs.iter().map(|sorting| &sorting.expr));
        }
        for expr in exprs {
            let mut found_subquery = false;
            ast::walk_expr(expr, &mut |node| {
                if matches!(
                    node,
                    Expr::Subquery(_) | Expr::InSubquery { .. } | Expr::Exists { .. }
                ) {
                    found_subquery = true;
                }
            });
            if found_subquery {
                return Err(MimirError::NotImplemented(nested.to_string()));
            }
        }
        Ok(())
    }

    /// The `(database, table)` of the first FROM relation, if any.
    pub fn table(&self) -> Option<(Option<String>, String)> {
        let select = ast::select_of(&self.query).ok()?;
        let relation = &select.from.first()?.relation;
        let TableFactor::Table { name, .. } = relation else {
            return None;
        };
        let mut parts: Vec<String> = name.0.iter().map(|ident| ident.value.clone()).collect();
        let table = parts.pop()?;
        Some((parts.pop(), table))
    }

    /// Whether the statement targets the virtual `mimir.metrics` table.
    pub fn targets_metrics_table(&self) -> bool {
        matches!(
            self.table(),
            Some((Some(db), table)) if db == "mimir" && table == "metrics"
        )
    }

    /// Translate the statement into inquiry parameters.
    pub fn parse_inquiry(&self) -> MimirResult<InquiryRequest> {
        self.validate()?;
        let select = ast::select_of(&self.query)?;

        let mut dimensions: Vec<String> = Vec::new();
        let mut metrics: Vec<String> = Vec::new();
        for item in &select.projection {
            let expr = match item {
                SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => expr,
                _ => continue,
            };
            match find_agg(expr) {
                Some(agg) => {
                    if let Some(name) = agg_argument_column(agg) {
                        if !metrics.contains(&name) {
                            metrics.push(name);
                        }
                    }
                }
                None => {
                    if let Some(name) = ast::first_column_name(expr) {
                        if !dimensions.contains(&name) {
                            dimensions.push(name);
                        }
                    }
                }
            }
        }

        let global_filter = select.selection.as_ref().map(|expr| expr.to_string());
        let order_by = self
            .query
            .order_by
            .as_ref()
            .and_then(|order_by| order_by.exprs.first())
            .map(|sorting| sorting.to_string());

        let mut client_items = select.projection.clone();
        for item in &mut client_items {
            match item {
                SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                    strip_agg(expr)
                }
                _ => {}
            }
        }
        let mut client_query = ast::parse_select("SELECT 1")?;
        ast::set_projections(&mut client_query, client_items)?;
        let client_sql = client_query.to_string();

        Ok(InquiryRequest {
            metrics,
            dimensions,
            global_filter,
            order_by,
            client_sql: Some(client_sql),
            ..InquiryRequest::default()
        })
    }
}

fn is_agg(expr: &Expr) -> bool {
    ast::function_name(expr)
        .map(|name| name.eq_ignore_ascii_case(AGG_MARKER))
        .unwrap_or(false)
}

/// First `AGG(...)` call anywhere in the expression tree.
fn find_agg(expr: &Expr) -> Option<&Expr> {
    if is_agg(expr) {
        return Some(expr);
    }
    match expr {
        Expr::BinaryOp { left, right, .. } => find_agg(left).or_else(|| find_agg(right)),
        Expr::UnaryOp { expr, .. } | Expr::Nested(expr) | Expr::Cast { expr, .. } => find_agg(expr),
        _ => None,
    }
}

/// The column named inside an `AGG(...)` call.
fn agg_argument_column(agg: &Expr) -> Option<String> {
    let Expr::Function(function) = agg else {
        return None;
    };
    let FunctionArguments::List(list) = &function.args else {
        return None;
    };
    list.args.iter().find_map(|arg| match arg {
        FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => ast::first_column_name(expr),
        FunctionArg::Named {
            arg: FunctionArgExpr::Expr(expr),
            ..
        } => ast::first_column_name(expr),
        _ => None,
    })
}

fn agg_argument_expr(agg: &Expr) -> Option<Expr> {
    let Expr::Function(function) = agg else {
        return None;
    };
    let FunctionArguments::List(list) = &function.args else {
        return None;
    };
    list.args.iter().find_map(|arg| match arg {
        FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => Some(expr.clone()),
        FunctionArg::Named {
            arg: FunctionArgExpr::Expr(expr),
            ..
        } => Some(expr.clone()),
        _ => None,
    })
}

/// Replace every `AGG(x)` in the tree with `x`.
fn strip_agg(expr: &mut Expr) {
    if is_agg(expr) {
        if let Some(inner) = agg_argument_expr(expr) {
            *expr = inner;
        }
        return;
    }
    match expr {
        Expr::BinaryOp { left, right, .. } => {
            strip_agg(left);
            strip_agg(right);
        }
        Expr::UnaryOp { expr, .. } | Expr::Nested(expr) | Expr::Cast { expr, .. } => {
            strip_agg(expr)
        }
        Expr::Function(function) => {
            if let FunctionArguments::List(list) = &mut function.args {
                for arg in &mut list.args {
                    match arg {
                        FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => strip_agg(expr),
                        FunctionArg::Named {
                            arg: FunctionArgExpr::Expr(expr),
                            ..
                        } => strip_agg(expr),
                        _ => {}
                    }
                }
            }
        }
        _ => {}
    }
}
