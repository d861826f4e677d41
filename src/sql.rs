use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertUser {
        id: Ulid,
        role: Role,
    },
    /// Multi-row INSERT into slots; ids are minted server-side.
    InsertSlots {
        spans: Vec<(Ms, Ms)>,
    },
    DeleteSlot {
        id: Ulid,
    },
    InsertBooking {
        slot_id: Ulid,
        kind: Option<SessionKind>,
        title: Option<String>,
        description: Option<String>,
    },
    InsertSession {
        expert: Ulid,
        student: Ulid,
        start: Ms,
        end: Ms,
        kind: Option<SessionKind>,
        title: Option<String>,
        description: Option<String>,
    },
    StartSession {
        id: Ulid,
    },
    EndSession {
        id: Ulid,
    },
    CancelSession {
        id: Ulid,
        reason: String,
    },
    SubmitFeedback {
        id: Ulid,
        feedback: Feedback,
    },
    AddNotes {
        id: Ulid,
        notes: String,
    },
    AdvanceSection {
        id: Ulid,
        index: usize,
    },
    SelectAvailability {
        expert: Ulid,
        start: Ms,
        end: Ms,
        only_available: bool,
    },
    SelectSession {
        id: Ulid,
    },
    SelectSessions {
        status: Option<SessionStatus>,
    },
    SelectNotifications,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;

    match table.as_str() {
        "users" => {
            let values = extract_insert_values(insert)?;
            if values.len() < 2 {
                return Err(SqlError::WrongArity("users", 2, values.len()));
            }
            Ok(Command::InsertUser {
                id: parse_ulid_expr(&values[0])?,
                role: parse_role(&values[1])?,
            })
        }
        "slots" => {
            let all_rows = extract_all_insert_rows(insert)?;
            let mut spans = Vec::with_capacity(all_rows.len());
            for (i, row) in all_rows.iter().enumerate() {
                if row.len() < 2 {
                    return Err(SqlError::WrongArity("slots row", 2, row.len()));
                }
                let start = parse_i64_expr(&row[0])
                    .map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?;
                let end = parse_i64_expr(&row[1])
                    .map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?;
                spans.push((start, end));
            }
            Ok(Command::InsertSlots { spans })
        }
        "bookings" => {
            let values = extract_insert_values(insert)?;
            if values.is_empty() {
                return Err(SqlError::WrongArity("bookings", 1, 0));
            }
            let slot_id = parse_ulid_expr(&values[0])?;
            let kind = if values.len() >= 2 {
                parse_kind_or_null(&values[1])?
            } else {
                None
            };
            let title = if values.len() >= 3 {
                parse_string_or_null(&values[2])?
            } else {
                None
            };
            let description = if values.len() >= 4 {
                parse_string_or_null(&values[3])?
            } else {
                None
            };
            Ok(Command::InsertBooking {
                slot_id,
                kind,
                title,
                description,
            })
        }
        "sessions" => {
            let values = extract_insert_values(insert)?;
            if values.len() < 4 {
                return Err(SqlError::WrongArity("sessions", 4, values.len()));
            }
            let kind = if values.len() >= 5 {
                parse_kind_or_null(&values[4])?
            } else {
                None
            };
            let title = if values.len() >= 6 {
                parse_string_or_null(&values[5])?
            } else {
                None
            };
            let description = if values.len() >= 7 {
                parse_string_or_null(&values[6])?
            } else {
                None
            };
            Ok(Command::InsertSession {
                expert: parse_ulid_expr(&values[0])?,
                student: parse_ulid_expr(&values[1])?,
                start: parse_i64_expr(&values[2])?,
                end: parse_i64_expr(&values[3])?,
                kind,
                title,
                description,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "slots" => Ok(Command::DeleteSlot { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    if table != "sessions" {
        return Err(SqlError::UnknownTable(table));
    }
    let id = extract_where_id(selection)?;

    let mut status: Option<String> = None;
    let mut reason: Option<String> = None;
    let mut notes: Option<String> = None;
    let mut feedback: Option<Feedback> = None;
    let mut current_section: Option<usize> = None;

    for assignment in assignments {
        let col = assignment_column(assignment)
            .ok_or_else(|| SqlError::Parse("unsupported assignment target".into()))?;
        match col.as_str() {
            "status" => status = Some(parse_string(&assignment.value)?),
            "reason" => reason = Some(parse_string(&assignment.value)?),
            "notes" => notes = Some(parse_string(&assignment.value)?),
            "feedback" => {
                let raw = parse_string(&assignment.value)?;
                feedback = Some(
                    serde_json::from_str(&raw)
                        .map_err(|e| SqlError::Parse(format!("bad feedback JSON: {e}")))?,
                );
            }
            "current_section" => {
                let v = parse_i64_expr(&assignment.value)?;
                current_section = Some(
                    usize::try_from(v)
                        .map_err(|_| SqlError::Parse(format!("{v} out of range")))?,
                );
            }
            other => return Err(SqlError::Parse(format!("unknown column: {other}"))),
        }
    }

    if let Some(feedback) = feedback {
        return Ok(Command::SubmitFeedback { id, feedback });
    }
    if let Some(notes) = notes {
        return Ok(Command::AddNotes { id, notes });
    }
    if let Some(index) = current_section {
        return Ok(Command::AdvanceSection { id, index });
    }
    match status.as_deref() {
        Some("in_progress") => Ok(Command::StartSession { id }),
        Some("completed") => Ok(Command::EndSession { id }),
        Some("cancelled") => Ok(Command::CancelSession {
            id,
            reason: reason.unwrap_or_default(),
        }),
        Some(other) => Err(SqlError::Parse(format!("cannot set status to {other}"))),
        None => Err(SqlError::MissingFilter("status")),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    match table.as_str() {
        "availability" => {
            let (mut expert, mut start, mut end, mut only_available) = (None, None, None, false);
            if let Some(selection) = &select.selection {
                extract_availability_filters(
                    selection,
                    &mut expert,
                    &mut start,
                    &mut end,
                    &mut only_available,
                )?;
            }
            Ok(Command::SelectAvailability {
                expert: expert.ok_or(SqlError::MissingFilter("expert"))?,
                start: start.ok_or(SqlError::MissingFilter("start"))?,
                end: end.ok_or(SqlError::MissingFilter("end"))?,
                only_available,
            })
        }
        "sessions" => match &select.selection {
            Some(expr) => parse_session_filter(expr),
            None => Ok(Command::SelectSessions { status: None }),
        },
        "notifications" => Ok(Command::SelectNotifications),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// WHERE over sessions selects either one row by id or filters by status.
fn parse_session_filter(expr: &Expr) -> Result<Command, SqlError> {
    if let Expr::BinaryOp {
        left,
        op: ast::BinaryOperator::Eq,
        right,
    } = expr
    {
        match expr_column_name(left).as_deref() {
            Some("id") => {
                return Ok(Command::SelectSession {
                    id: parse_ulid_expr(right)?,
                });
            }
            Some("status") => {
                let s = parse_string(right)?;
                let status = SessionStatus::parse(&s)
                    .ok_or_else(|| SqlError::Parse(format!("bad status: {s}")))?;
                return Ok(Command::SelectSessions {
                    status: Some(status),
                });
            }
            _ => {}
        }
    }
    Err(SqlError::MissingFilter("id"))
}

fn extract_availability_filters(
    expr: &Expr,
    expert: &mut Option<Ulid>,
    start: &mut Option<Ms>,
    end: &mut Option<Ms>,
    only_available: &mut bool,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_availability_filters(left, expert, start, end, only_available)?;
                extract_availability_filters(right, expert, start, end, only_available)?;
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left);
                if col.as_deref() == Some("expert") {
                    *expert = Some(parse_ulid_expr(right)?);
                } else if col.as_deref() == Some("status") {
                    let status = parse_string(right)?;
                    if status != "available" {
                        return Err(SqlError::Parse(format!("cannot filter status {status}")));
                    }
                    *only_available = true;
                }
            }
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("start") {
                    *start = Some(parse_i64_expr(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("end") {
                    *end = Some(parse_i64_expr(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn assignment_column(assignment: &ast::Assignment) -> Option<String> {
    match &assignment.target {
        ast::AssignmentTarget::ColumnName(name) => object_name_last(name),
        _ => None,
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid_expr(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_role(expr: &Expr) -> Result<Role, SqlError> {
    let s = parse_string(expr)?;
    Role::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad role: {s}")))
}

fn parse_kind_or_null(expr: &Expr) -> Result<Option<SessionKind>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    let s = parse_string(expr)?;
    SessionKind::parse(&s)
        .map(Some)
        .ok_or_else(|| SqlError::Parse(format!("bad session kind: {s}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const U: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    #[test]
    fn parse_insert_user() {
        let sql = format!("INSERT INTO users (id, role) VALUES ('{U}', 'expert')");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertUser { id, role } => {
                assert_eq!(id.to_string(), U);
                assert_eq!(role, Role::Expert);
            }
            _ => panic!("expected InsertUser, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_user_bad_role() {
        let sql = format!("INSERT INTO users (id, role) VALUES ('{U}', 'admin')");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_insert_single_slot() {
        let sql = r#"INSERT INTO slots (start, "end") VALUES (1000, 2000)"#;
        let cmd = parse_sql(sql).unwrap();
        assert_eq!(
            cmd,
            Command::InsertSlots {
                spans: vec![(1000, 2000)]
            }
        );
    }

    #[test]
    fn parse_insert_slot_batch() {
        let sql = r#"INSERT INTO slots (start, "end") VALUES (1000, 2000), (3000, 4000)"#;
        let cmd = parse_sql(sql).unwrap();
        assert_eq!(
            cmd,
            Command::InsertSlots {
                spans: vec![(1000, 2000), (3000, 4000)]
            }
        );
    }

    #[test]
    fn parse_delete_slot() {
        let sql = format!("DELETE FROM slots WHERE id = '{U}'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::DeleteSlot { id } => assert_eq!(id.to_string(), U),
            _ => panic!("expected DeleteSlot, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_minimal() {
        let sql = format!("INSERT INTO bookings (slot_id) VALUES ('{U}')");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertBooking {
                slot_id,
                kind,
                title,
                description,
            } => {
                assert_eq!(slot_id.to_string(), U);
                assert_eq!(kind, None);
                assert_eq!(title, None);
                assert_eq!(description, None);
            }
            _ => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_full() {
        let sql = format!(
            "INSERT INTO bookings (slot_id, kind, title, description) \
             VALUES ('{U}', 'technical', 'Rust deep dive', NULL)"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertBooking {
                kind,
                title,
                description,
                ..
            } => {
                assert_eq!(kind, Some(SessionKind::Technical));
                assert_eq!(title.as_deref(), Some("Rust deep dive"));
                assert_eq!(description, None);
            }
            _ => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_session() {
        let sql = format!(
            "INSERT INTO sessions (expert, student, start, \"end\", kind) \
             VALUES ('{U}', '{U}', 1000, 2000, 'behavioral')"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertSession {
                start, end, kind, ..
            } => {
                assert_eq!(start, 1000);
                assert_eq!(end, 2000);
                assert_eq!(kind, Some(SessionKind::Behavioral));
            }
            _ => panic!("expected InsertSession, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_status_transitions() {
        let start = format!("UPDATE sessions SET status = 'in_progress' WHERE id = '{U}'");
        assert!(matches!(
            parse_sql(&start).unwrap(),
            Command::StartSession { .. }
        ));

        let end = format!("UPDATE sessions SET status = 'completed' WHERE id = '{U}'");
        assert!(matches!(parse_sql(&end).unwrap(), Command::EndSession { .. }));

        let cancel = format!(
            "UPDATE sessions SET status = 'cancelled', reason = 'sick' WHERE id = '{U}'"
        );
        match parse_sql(&cancel).unwrap() {
            Command::CancelSession { reason, .. } => assert_eq!(reason, "sick"),
            cmd => panic!("expected CancelSession, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_status_scheduled_rejected() {
        let sql = format!("UPDATE sessions SET status = 'scheduled' WHERE id = '{U}'");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_update_feedback() {
        let sql = format!(
            "UPDATE sessions SET feedback = '{{\"rating\": 4, \"strengths\": [\"apis\"]}}' \
             WHERE id = '{U}'"
        );
        match parse_sql(&sql).unwrap() {
            Command::SubmitFeedback { feedback, .. } => {
                assert_eq!(feedback.rating, 4);
                assert_eq!(feedback.strengths, vec!["apis".to_string()]);
                assert!(feedback.improvements.is_empty());
            }
            cmd => panic!("expected SubmitFeedback, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_feedback_bad_json() {
        let sql = format!("UPDATE sessions SET feedback = 'not json' WHERE id = '{U}'");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_update_notes_and_section() {
        let notes = format!("UPDATE sessions SET notes = 'solid' WHERE id = '{U}'");
        match parse_sql(&notes).unwrap() {
            Command::AddNotes { notes, .. } => assert_eq!(notes, "solid"),
            cmd => panic!("expected AddNotes, got {cmd:?}"),
        }

        let section = format!("UPDATE sessions SET current_section = 2 WHERE id = '{U}'");
        match parse_sql(&section).unwrap() {
            Command::AdvanceSection { index, .. } => assert_eq!(index, 2),
            cmd => panic!("expected AdvanceSection, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_without_id_rejected() {
        let sql = "UPDATE sessions SET status = 'completed'";
        assert!(matches!(
            parse_sql(sql),
            Err(SqlError::MissingFilter("id"))
        ));
    }

    #[test]
    fn parse_select_availability() {
        let sql = format!(
            "SELECT * FROM availability WHERE expert = '{U}' AND start >= 1000 AND \"end\" <= 2000"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectAvailability {
                expert,
                start,
                end,
                only_available,
            } => {
                assert_eq!(expert.to_string(), U);
                assert_eq!(start, 1000);
                assert_eq!(end, 2000);
                assert!(!only_available);
            }
            cmd => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability_status_filter() {
        let sql = format!(
            "SELECT * FROM availability WHERE expert = '{U}' AND start >= 1000 \
             AND \"end\" <= 2000 AND status = 'available'"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectAvailability { only_available, .. } => assert!(only_available),
            cmd => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability_missing_filters() {
        let sql = format!("SELECT * FROM availability WHERE expert = '{U}'");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingFilter("start"))
        ));
    }

    #[test]
    fn parse_select_sessions() {
        assert_eq!(
            parse_sql("SELECT * FROM sessions").unwrap(),
            Command::SelectSessions { status: None }
        );
        let one = format!("SELECT * FROM sessions WHERE id = '{U}'");
        assert!(matches!(
            parse_sql(&one).unwrap(),
            Command::SelectSession { .. }
        ));
        assert_eq!(
            parse_sql("SELECT * FROM sessions WHERE status = 'scheduled'").unwrap(),
            Command::SelectSessions {
                status: Some(SessionStatus::Scheduled)
            }
        );
        assert!(parse_sql("SELECT * FROM sessions WHERE status = 'pending'").is_err());
    }

    #[test]
    fn parse_select_notifications() {
        assert_eq!(
            parse_sql("SELECT * FROM notifications").unwrap(),
            Command::SelectNotifications
        );
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{U}')");
        assert!(parse_sql(&sql).is_err());
        assert!(parse_sql("SELECT * FROM foobar").is_err());
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
