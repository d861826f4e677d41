use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::SlotdAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct SlotdHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<SlotdQueryParser>,
}

impl SlotdHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(SlotdQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// The login username is the acting user's ULID.
    fn login_id<C: ClientInfo>(client: &C) -> PgWireResult<Ulid> {
        let user = client.metadata().get("user").cloned().unwrap_or_default();
        Ulid::from_string(&user).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "28000".into(),
                format!("login username must be a ULID: {e}"),
            )))
        })
    }

    /// Resolve the login ULID to a registered user with a role.
    fn resolve_actor(engine: &Engine, id: Ulid) -> PgWireResult<Actor> {
        let role = engine.role_of(&id).ok_or_else(|| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "42501".into(),
                format!("unknown user: {id}"),
            )))
        })?;
        Ok(Actor { id, role })
    }

    async fn run_command(
        &self,
        engine: &Engine,
        uid: Ulid,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, uid, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        uid: Ulid,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            // Self-service registration; no role lookup yet.
            Command::InsertUser { id, role } => {
                engine.register_user(id, role).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertSlots { spans } => {
                let actor = Self::resolve_actor(engine, uid)?;
                let ids = engine
                    .create_slots(actor, spans)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(
                    Tag::new("INSERT").with_rows(ids.len()),
                )])
            }
            Command::DeleteSlot { id } => {
                let actor = Self::resolve_actor(engine, uid)?;
                engine.delete_slot(actor, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertBooking {
                slot_id,
                kind,
                title,
                description,
            } => {
                let actor = Self::resolve_actor(engine, uid)?;
                engine
                    .book_slot(
                        actor,
                        slot_id,
                        kind.unwrap_or(SessionKind::Technical),
                        title,
                        description,
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertSession {
                expert,
                student,
                start,
                end,
                kind,
                title,
                description,
            } => {
                let actor = Self::resolve_actor(engine, uid)?;
                engine
                    .create_session(
                        actor,
                        expert,
                        student,
                        start,
                        end,
                        kind.unwrap_or(SessionKind::Technical),
                        title,
                        description,
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::StartSession { id } => {
                let actor = Self::resolve_actor(engine, uid)?;
                engine.start_session(actor, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::EndSession { id } => {
                let actor = Self::resolve_actor(engine, uid)?;
                engine.end_session(actor, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::CancelSession { id, reason } => {
                let actor = Self::resolve_actor(engine, uid)?;
                engine
                    .cancel_session(actor, id, reason)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SubmitFeedback { id, feedback } => {
                let actor = Self::resolve_actor(engine, uid)?;
                engine
                    .submit_feedback(actor, id, feedback)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::AddNotes { id, notes } => {
                let actor = Self::resolve_actor(engine, uid)?;
                engine
                    .add_notes(actor, id, notes)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::AdvanceSection { id, index } => {
                let actor = Self::resolve_actor(engine, uid)?;
                engine
                    .advance_section(actor, id, index)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectAvailability {
                expert,
                start,
                end,
                only_available,
            } => {
                let slots = engine
                    .query_availability(expert, start, end, only_available)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(availability_schema());
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&slot.owner.to_string())?;
                        encoder.encode_field(&slot.id.to_string())?;
                        encoder.encode_field(&slot.start)?;
                        encoder.encode_field(&slot.end)?;
                        encoder.encode_field(&slot.status.as_str())?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectSession { id } => {
                let actor = Self::resolve_actor(engine, uid)?;
                let (info, detail) = engine
                    .get_session_detail(actor, id)
                    .await
                    .map_err(engine_err)?;
                let detail_json = serde_json::to_string(&detail).map_err(|e| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "XX000".into(),
                        format!("detail encoding failed: {e}"),
                    )))
                })?;

                let schema = Arc::new(sessions_schema());
                let rows = vec![encode_session_row(&schema, &info, Some(detail_json))];
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectSessions { status } => {
                let actor = Self::resolve_actor(engine, uid)?;
                let sessions = engine.list_sessions(actor, status).await;

                let schema = Arc::new(sessions_schema());
                let rows: Vec<PgWireResult<_>> = sessions
                    .iter()
                    .map(|info| encode_session_row(&schema, info, None))
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectNotifications => {
                // Draining is destructive; require a registered user.
                Self::resolve_actor(engine, uid)?;
                let notifications = engine.notify.drain_inbox(&uid);

                let schema = Arc::new(notifications_schema());
                let rows: Vec<PgWireResult<_>> = notifications
                    .into_iter()
                    .map(|n| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&n.id.to_string())?;
                        encoder.encode_field(&n.kind.as_str())?;
                        encoder.encode_field(&n.session_id.to_string())?;
                        encoder.encode_field(&n.message)?;
                        encoder.encode_field(&n.at)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
        }
    }
}

fn encode_session_row(
    schema: &Arc<Vec<FieldInfo>>,
    info: &SessionInfo,
    detail_json: Option<String>,
) -> PgWireResult<pgwire::messages::data::DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&info.id.to_string())?;
    encoder.encode_field(&info.slot_id.map(|s| s.to_string()))?;
    encoder.encode_field(&info.expert.to_string())?;
    encoder.encode_field(&info.student.to_string())?;
    encoder.encode_field(&info.start)?;
    encoder.encode_field(&info.end)?;
    encoder.encode_field(&info.status.as_str())?;
    encoder.encode_field(&info.kind.as_str())?;
    encoder.encode_field(&info.title)?;
    encoder.encode_field(&info.duration_minutes)?;
    encoder.encode_field(&detail_json)?;
    Ok(encoder.take_row())
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("expert".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("start".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("end".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("status".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

fn sessions_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new(
            "slot_id".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new("expert".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new(
            "student".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new("start".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("end".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("status".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("kind".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("title".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new(
            "duration_minutes".into(),
            None,
            None,
            Type::INT8,
            FieldFormat::Text,
        ),
        FieldInfo::new("detail".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

fn notifications_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("kind".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new(
            "session_id".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new(
            "message".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new("at".into(), None, None, Type::INT8, FieldFormat::Text),
    ]
}

#[async_trait]
impl SimpleQueryHandler for SlotdHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let uid = Self::login_id(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.run_command(&engine, uid, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotdQueryParser;

#[async_trait]
impl QueryParser for SlotdQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(select_schema(stmt).unwrap_or_default())
    }
}

/// Result schema for SELECTs, keyed on the table name in the statement.
fn select_schema(stmt: &str) -> Option<Vec<FieldInfo>> {
    let upper = stmt.to_uppercase();
    if !upper.contains("SELECT") {
        return None;
    }
    if upper.contains("AVAILABILITY") {
        Some(availability_schema())
    } else if upper.contains("SESSIONS") {
        Some(sessions_schema())
    } else if upper.contains("NOTIFICATIONS") {
        Some(notifications_schema())
    } else {
        None
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotdHandler {
    type Statement = String;
    type QueryParser = SlotdQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let uid = Self::login_id(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.run_command(&engine, uid, cmd).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            select_schema(&target.statement).unwrap_or_default(),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(
            select_schema(&target.statement.statement).unwrap_or_default(),
        ))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SlotdFactory {
    handler: Arc<SlotdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SlotdAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SlotdFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = SlotdAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SlotdHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotdFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Drive one client connection through the pgwire state machine.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> Result<(), std::io::Error> {
    let factory = Arc::new(SlotdFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    let code = match &e {
        EngineError::InvalidInterval { .. } => "22023",
        EngineError::Overlap { .. } => "23P01",
        EngineError::NotAuthorized(_) => "42501",
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::SlotUnavailable(_) => "55P03",
        EngineError::SlotBooked(_) => "55006",
        EngineError::SelfBooking(_) => "23514",
        EngineError::InvalidTransition { .. } => "55000",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
