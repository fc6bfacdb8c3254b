//! AST-level helpers over `sqlparser`.
//!
//! The planner never concatenates SQL text. Fragments are obtained by
//! parsing small templates (or user-supplied SQL) into the `sqlparser` AST
//! and mutating the fields that matter; emission is the AST's `Display`.
//! All parsing uses `GenericDialect` since the target backend is not known
//! at composition time.

use sqlparser::ast::{
    Expr, FunctionArg, FunctionArgExpr, FunctionArguments, GroupByExpr, Ident, Join,
    JoinConstraint, JoinOperator, ObjectName, OrderByExpr, Query, Select, SelectItem, SetExpr,
    Statement, TableFactor, TableWithJoins, Value,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::error::{MimirError, MimirResult};

/// Parse a SQL string into statements.
pub fn parse_statements(sql: &str) -> MimirResult<Vec<Statement>> {
    Ok(Parser::parse_sql(&GenericDialect {}, sql)?)
}

/// Parse a SQL string that must be exactly one query statement.
pub fn parse_query(sql: &str) -> MimirResult<Box<Query>> {
    let mut statements = parse_statements(sql)?;
    if statements.len() != 1 {
        return Err(MimirError::query(format!(
            "expected a single statement, got {}",
            statements.len()
        )));
    }
    match statements.remove(0) {
        Statement::Query(query) => Ok(query),
        other => Err(MimirError::query(format!(
            "expected a query statement, got: {other}"
        ))),
    }
}

/// Parse a SQL string that must be a single SELECT.
pub fn parse_select(sql: &str) -> MimirResult<Box<Query>> {
    let query = parse_query(sql)?;
    select_of(&query)?;
    Ok(query)
}

fn build_failure(detail: &str) -> MimirError {
    MimirError::query(format!("internal SQL build failure: {detail}"))
}

/// Borrow the SELECT body of a query.
pub fn select_of(query: &Query) -> MimirResult<&Select> {
    match query.body.as_ref() {
        SetExpr::Select(select) => Ok(select),
        other => Err(MimirError::query(format!("expected a SELECT, got: {other}"))),
    }
}

/// Mutably borrow the SELECT body of a query.
pub fn select_mut(query: &mut Query) -> MimirResult<&mut Select> {
    match query.body.as_mut() {
        SetExpr::Select(select) => Ok(select),
        other => Err(MimirError::query(format!("expected a SELECT, got: {other}"))),
    }
}

/// The projection list of a SELECT query.
pub fn projections(query: &Query) -> MimirResult<&[SelectItem]> {
    Ok(&select_of(query)?.projection)
}

/// The output column name of a projection: its alias if present, otherwise
/// the column name, otherwise the emitted expression.
pub fn projection_name(item: &SelectItem) -> String {
    match item {
        SelectItem::ExprWithAlias { alias, .. } => alias.value.clone(),
        SelectItem::UnnamedExpr(expr) => expr_name(expr),
        other => other.to_string(),
    }
}

fn expr_name(expr: &Expr) -> String {
    match expr {
        Expr::Identifier(ident) => ident.value.clone(),
        Expr::CompoundIdentifier(parts) => parts
            .last()
            .map(|ident| ident.value.clone())
            .unwrap_or_default(),
        other => other.to_string(),
    }
}

/// Append projection items to a SELECT, preserving the existing ones.
pub fn append_projections(query: &mut Query, items: Vec<SelectItem>) -> MimirResult<()> {
    select_mut(query)?.projection.extend(items);
    Ok(())
}

/// Replace the projection list of a SELECT.
pub fn set_projections(query: &mut Query, items: Vec<SelectItem>) -> MimirResult<()> {
    select_mut(query)?.projection = items;
    Ok(())
}

/// A bare projection item referencing a column by name.
pub fn column_item(name: &str) -> SelectItem {
    SelectItem::UnnamedExpr(Expr::Identifier(Ident::new(name)))
}

/// AND-conjoin a predicate onto a SELECT's WHERE clause.
pub fn push_where(query: &mut Query, predicate: Expr) -> MimirResult<()> {
    let select = select_mut(query)?;
    select.selection = Some(match select.selection.take() {
        Some(existing) => Expr::BinaryOp {
            left: Box::new(existing),
            op: sqlparser::ast::BinaryOperator::And,
            right: Box::new(predicate),
        },
        None => predicate,
    });
    Ok(())
}

/// Parse the body of a WHERE clause (everything after the keyword).
pub fn parse_where_body(body: &str) -> MimirResult<Expr> {
    let mut query = parse_select(&format!("SELECT * FROM _t WHERE {body}"))?;
    select_mut(&mut query)?
        .selection
        .take()
        .ok_or_else(|| build_failure("WHERE template lost its predicate"))
}

/// Parse the body of an ORDER BY clause into its expressions.
pub fn parse_order_body(body: &str) -> MimirResult<Vec<OrderByExpr>> {
    let query = parse_select(&format!("SELECT * FROM _t ORDER BY {body}"))?;
    Ok(query
        .order_by
        .ok_or_else(|| build_failure("ORDER BY template lost its clause"))?
        .exprs)
}

/// Attach an ORDER BY clause to a query.
pub fn set_order_by(query: &mut Query, exprs: Vec<OrderByExpr>) -> MimirResult<()> {
    let template = parse_query("SELECT 1 ORDER BY 1")?;
    let mut order_by = template
        .order_by
        .ok_or_else(|| build_failure("ORDER BY template missing clause"))?;
    order_by.exprs = exprs;
    query.order_by = Some(order_by);
    Ok(())
}

fn table_with_joins(name: &str) -> MimirResult<TableWithJoins> {
    let query = parse_select("SELECT * FROM _t")?;
    let select = select_of(&query)?;
    let mut twj = select
        .from
        .first()
        .cloned()
        .ok_or_else(|| build_failure("FROM template missing relation"))?;
    match &mut twj.relation {
        TableFactor::Table { name: object, .. } => {
            *object = ObjectName(vec![Ident::new(name)]);
        }
        _ => return Err(build_failure("FROM template is not a plain table")),
    }
    Ok(twj)
}

/// Point a SELECT's FROM clause at a single named table.
pub fn set_from_table(query: &mut Query, name: &str) -> MimirResult<()> {
    let twj = table_with_joins(name)?;
    select_mut(query)?.from = vec![twj];
    Ok(())
}

/// Append `FULL JOIN <table> USING (<columns>)` to the first FROM relation.
pub fn push_full_join_using(query: &mut Query, table: &str, columns: &[String]) -> MimirResult<()> {
    let relation = table_with_joins(table)?.relation;
    let join = Join {
        relation,
        global: false,
        join_operator: JoinOperator::FullOuter(JoinConstraint::Using(
            columns.iter().map(|c| Ident::new(c.as_str())).collect(),
        )),
    };
    push_join(query, join)
}

/// Append `CROSS JOIN <table>` to the first FROM relation.
pub fn push_cross_join(query: &mut Query, table: &str) -> MimirResult<()> {
    let relation = table_with_joins(table)?.relation;
    let join = Join {
        relation,
        global: false,
        join_operator: JoinOperator::CrossJoin,
    };
    push_join(query, join)
}

fn push_join(query: &mut Query, join: Join) -> MimirResult<()> {
    select_mut(query)?
        .from
        .first_mut()
        .ok_or_else(|| build_failure("cannot join onto a SELECT without FROM"))?
        .joins
        .push(join);
    Ok(())
}

/// Replace the GROUP BY clause with positional indices `1..=count`.
pub fn group_by_positions(query: &mut Query, count: usize) -> MimirResult<()> {
    let positions = (1..=count)
        .map(|i| Expr::Value(Value::Number(i.to_string(), false)))
        .collect();
    select_mut(query)?.group_by = GroupByExpr::Expressions(positions, vec![]);
    Ok(())
}

/// Wrap a query body in a single-CTE WITH clause: `WITH <name> AS (<cte>) <body>`.
pub fn with_cte(mut body: Box<Query>, name: &str, cte: Box<Query>) -> MimirResult<Box<Query>> {
    let template = parse_query("WITH _t AS (SELECT 1) SELECT 1")?;
    let mut with = template
        .with
        .ok_or_else(|| build_failure("CTE template missing WITH"))?;
    let slot = with
        .cte_tables
        .first_mut()
        .ok_or_else(|| build_failure("CTE template missing table"))?;
    slot.alias.name = Ident::new(name);
    slot.query = cte;
    body.with = Some(with);
    Ok(body)
}

/// Return a copy of the query with `LIMIT 0`, used to fetch schema only.
pub fn with_limit_zero(query: &Query) -> Box<Query> {
    let mut limited = Box::new(query.clone());
    limited.limit = Some(Expr::Value(Value::Number("0".to_string(), false)));
    limited
}

/// Pre-order walk over an expression tree.
pub fn walk_expr(expr: &Expr, visit: &mut dyn FnMut(&Expr)) {
    visit(expr);
    match expr {
        Expr::BinaryOp { left, right, .. } => {
            walk_expr(left, visit);
            walk_expr(right, visit);
        }
        Expr::UnaryOp { expr, .. } => walk_expr(expr, visit),
        Expr::Nested(inner) => walk_expr(inner, visit),
        Expr::IsNull(inner) | Expr::IsNotNull(inner) => walk_expr(inner, visit),
        Expr::Cast { expr, .. } => walk_expr(expr, visit),
        Expr::Between {
            expr, low, high, ..
        } => {
            walk_expr(expr, visit);
            walk_expr(low, visit);
            walk_expr(high, visit);
        }
        Expr::InList { expr, list, .. } => {
            walk_expr(expr, visit);
            for item in list {
                walk_expr(item, visit);
            }
        }
        Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
            walk_expr(expr, visit);
            walk_expr(pattern, visit);
        }
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            if let Some(operand) = operand {
                walk_expr(operand, visit);
            }
            for condition in conditions {
                walk_expr(condition, visit);
            }
            for result in results {
                walk_expr(result, visit);
            }
            if let Some(else_result) = else_result {
                walk_expr(else_result, visit);
            }
        }
        Expr::Function(function) => {
            if let FunctionArguments::List(list) = &function.args {
                for arg in &list.args {
                    match arg {
                        FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => walk_expr(e, visit),
                        FunctionArg::Named {
                            arg: FunctionArgExpr::Expr(e),
                            ..
                        } => walk_expr(e, visit),
                        _ => {}
                    }
                }
            }
        }
        _ => {}
    }
}

/// Collect every identifier appearing in an expression tree.
///
/// Compound identifiers contribute each of their parts, matching how column
/// validation treats `table.column` references.
pub fn collect_identifiers(expr: &Expr) -> Vec<String> {
    let mut found = Vec::new();
    walk_expr(expr, &mut |node| match node {
        Expr::Identifier(ident) => found.push(ident.value.clone()),
        Expr::CompoundIdentifier(parts) => {
            found.extend(parts.iter().map(|ident| ident.value.clone()));
        }
        _ => {}
    });
    found
}

/// The unqualified name of a function expression, if the node is one.
pub fn function_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Function(function) => function
            .name
            .0
            .last()
            .map(|ident| ident.value.clone()),
        _ => None,
    }
}

/// First column-like identifier in an expression tree, in source order.
pub fn first_column_name(expr: &Expr) -> Option<String> {
    let mut found = None;
    walk_expr(expr, &mut |node| {
        if found.is_some() {
            return;
        }
        match node {
            Expr::Identifier(ident) => found = Some(ident.value.clone()),
            Expr::CompoundIdentifier(parts) => {
                found = parts.last().map(|ident| ident.value.clone());
            }
            _ => {}
        }
    });
    found
}
