use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Transaction, TransactionBehavior};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use treeflow_core::error::{Result, TreeFlowError};
use treeflow_core::types::{
    ConnectionId, ExampleId, FewShotType, InputId, OutputId, QuestionId, StepId, TreeFlowId,
};
use treeflow_graph::connection::check_connection;
use treeflow_graph::{
    validate_with, Step, StepConnection, StepFewShotExample, StepInput, StepOutput, StepQuestion,
    TreeFlow, ValidationReport,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS tree_flows (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        version TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 0,
        organization TEXT,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS steps (
        id TEXT PRIMARY KEY,
        flow_id TEXT NOT NULL REFERENCES tree_flows(id) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        is_first INTEGER NOT NULL DEFAULT 0,
        name TEXT NOT NULL,
        slug TEXT NOT NULL,
        objective TEXT,
        prompt TEXT
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_steps_one_first
        ON steps(flow_id) WHERE is_first = 1;

    CREATE TABLE IF NOT EXISTS step_questions (
        id TEXT PRIMARY KEY,
        step_id TEXT NOT NULL REFERENCES steps(id) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        name TEXT NOT NULL,
        slug TEXT NOT NULL,
        prompt TEXT,
        objective TEXT,
        importance INTEGER NOT NULL CHECK (importance BETWEEN 1 AND 10),
        view_order INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS step_examples (
        id TEXT PRIMARY KEY,
        question_id TEXT NOT NULL REFERENCES step_questions(id) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        type TEXT NOT NULL CHECK (type IN ('POSITIVE', 'NEGATIVE')),
        name TEXT NOT NULL,
        slug TEXT NOT NULL,
        prompt TEXT,
        description TEXT
    );

    CREATE TABLE IF NOT EXISTS step_outputs (
        id TEXT PRIMARY KEY,
        step_id TEXT NOT NULL REFERENCES steps(id) ON DELETE CASCADE,
        destination_step TEXT REFERENCES steps(id) ON DELETE SET NULL,
        name TEXT NOT NULL,
        description TEXT,
        conditional TEXT,
        ord INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS step_inputs (
        id TEXT PRIMARY KEY,
        step_id TEXT NOT NULL REFERENCES steps(id) ON DELETE CASCADE,
        source_step TEXT REFERENCES steps(id) ON DELETE SET NULL,
        type TEXT NOT NULL DEFAULT 'ANY'
            CHECK (type IN ('ANY', 'FULLY_COMPLETED', 'FAILED')),
        name TEXT NOT NULL,
        prompt TEXT,
        position INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS step_connections (
        id TEXT PRIMARY KEY,
        source_output TEXT NOT NULL REFERENCES step_outputs(id) ON DELETE CASCADE,
        target_input TEXT NOT NULL REFERENCES step_inputs(id) ON DELETE CASCADE,
        created_at TEXT NOT NULL,
        UNIQUE (source_output, target_input),
        UNIQUE (source_output)
    );

    CREATE INDEX IF NOT EXISTS idx_steps_flow ON steps(flow_id, position);
    CREATE INDEX IF NOT EXISTS idx_connections_input ON step_connections(target_input);";

/// A row of [`SqliteStore::list_flows`].
#[derive(Debug, Clone, Serialize)]
pub struct FlowSummary {
    pub id: TreeFlowId,
    pub name: String,
    pub version: String,
    pub active: bool,
    pub organization: Option<String>,
    pub created_at: DateTime<Utc>,
    pub step_count: usize,
}

/// SQLite-backed TreeFlow store.
///
/// Foreign keys carry the cascade rules: deleting a flow removes its steps,
/// deleting a step removes its questions, outputs, inputs and their
/// connections, and other steps' references to it are set to NULL.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn db(e: rusqlite::Error) -> TreeFlowError {
    TreeFlowError::Database(e.to_string())
}

fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn is_constraint(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation)
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TreeFlowError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db)?;
        let store = Self::init(conn)?;
        debug!(path = %path.display(), "SQLite store opened");
        Ok(store)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().map_err(db)?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;").map_err(db)?;
        conn.execute_batch(SCHEMA).map_err(db)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| TreeFlowError::Database(e.to_string()))
    }

    /// Validate a flow, treating hints to steps stored under other flows as
    /// cross-flow references.
    pub fn check_flow(&self, flow: &TreeFlow) -> Result<ValidationReport> {
        let conn = self.lock()?;
        let foreign = foreign_steps(&conn, flow)?;
        Ok(validate_with(flow, |id| foreign.contains(id)))
    }

    /// Insert or replace a whole flow.
    ///
    /// Hints naming a step stored under another flow are rejected with
    /// `CrossFlowReference`. Hints naming no known step are stored as NULL.
    pub fn save_flow(&self, flow: &TreeFlow) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db)?;

        if let Some(referenced) = foreign_steps(&tx, flow)?.into_iter().next() {
            return Err(TreeFlowError::CrossFlowReference {
                flow: flow.id().to_string(),
                referenced: referenced.to_string(),
            });
        }

        tx.execute("DELETE FROM tree_flows WHERE id = ?1", params![flow.id().as_str()])
            .map_err(db)?;
        tx.execute(
            "INSERT INTO tree_flows (id, name, version, active, organization, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                flow.id().as_str(),
                flow.name,
                flow.version(),
                flow.is_active(),
                flow.organization,
                flow.created_at.to_rfc3339(),
            ],
        )
        .map_err(db)?;

        // Steps first: outputs and inputs may reference any of them.
        for (position, step) in flow.steps().iter().enumerate() {
            tx.execute(
                "INSERT INTO steps (id, flow_id, position, is_first, name, slug, objective, prompt)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    step.id().as_str(),
                    flow.id().as_str(),
                    position as i64,
                    step.is_first(),
                    step.name,
                    step.slug,
                    step.objective,
                    step.prompt,
                ],
            )
            .map_err(db)?;
        }

        for step in flow.steps() {
            insert_questions(&tx, step)?;
            insert_edges(&tx, flow, step)?;
        }

        for connection in flow.connections() {
            tx.execute(
                "INSERT INTO step_connections (id, source_output, target_input, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    connection.id.as_str(),
                    connection.source_output.as_str(),
                    connection.target_input.as_str(),
                    connection.created_at.to_rfc3339(),
                ],
            )
            .map_err(db)?;
        }

        tx.commit().map_err(db)?;
        info!(flow = %flow.name, steps = flow.steps().len(), "TreeFlow saved");
        Ok(())
    }

    /// Load a flow with all of its steps and wiring, in one transaction.
    pub fn load_flow(&self, id: &TreeFlowId) -> Result<TreeFlow> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db)?;
        let flow = read_flow(&tx, id)?;
        tx.commit().map_err(db)?;
        Ok(flow)
    }

    /// All stored flows, newest first.
    pub fn list_flows(&self) -> Result<Vec<FlowSummary>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT f.id, f.name, f.version, f.active, f.organization, f.created_at,
                        (SELECT COUNT(*) FROM steps s WHERE s.flow_id = f.id)
                 FROM tree_flows f
                 ORDER BY f.created_at DESC, f.name",
            )
            .map_err(db)?;

        let rows = stmt
            .query_map([], |row| {
                let created_at: String = row.get(5)?;
                let step_count: i64 = row.get(6)?;
                Ok(FlowSummary {
                    id: TreeFlowId(row.get(0)?),
                    name: row.get(1)?,
                    version: row.get(2)?,
                    active: row.get(3)?,
                    organization: row.get(4)?,
                    created_at: parse_time(&created_at),
                    step_count: step_count as usize,
                })
            })
            .map_err(db)?;

        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db)
    }

    /// Delete a flow and, through the cascade, everything it owns.
    pub fn delete_flow(&self, id: &TreeFlowId) -> Result<()> {
        let conn = self.lock()?;
        let deleted = conn
            .execute("DELETE FROM tree_flows WHERE id = ?1", params![id.as_str()])
            .map_err(db)?;
        if deleted == 0 {
            return Err(TreeFlowError::FlowNotFound(id.to_string()));
        }
        info!(flow = %id, "TreeFlow deleted");
        Ok(())
    }

    /// Delete a step. The flow's first step may only go when it is the last
    /// step left.
    pub fn delete_step(&self, id: &StepId) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db)?;

        let (flow_id, first): (String, bool) = tx
            .query_row(
                "SELECT flow_id, is_first FROM steps WHERE id = ?1",
                params![id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db)?
            .ok_or_else(|| TreeFlowError::StepNotFound(id.to_string()))?;

        if first {
            let siblings: i64 = tx
                .query_row(
                    "SELECT COUNT(*) FROM steps WHERE flow_id = ?1 AND id != ?2",
                    params![flow_id, id.as_str()],
                    |row| row.get(0),
                )
                .map_err(db)?;
            if siblings > 0 {
                return Err(TreeFlowError::EntryPointRequired(id.to_string()));
            }
        }

        tx.execute("DELETE FROM steps WHERE id = ?1", params![id.as_str()])
            .map_err(db)?;
        tx.commit().map_err(db)?;
        debug!(step = %id, "Step deleted");
        Ok(())
    }

    /// Wire a stored output to a stored input.
    ///
    /// Runs the same checks as `TreeFlow::connect` inside one write
    /// transaction. A UNIQUE violation from a concurrent writer maps to the
    /// same typed error.
    pub fn connect(&self, output: &OutputId, input: &InputId) -> Result<ConnectionId> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db)?;

        let (output_step, output_flow) = step_of(&tx, "step_outputs", output.as_str())?
            .ok_or_else(|| TreeFlowError::OutputNotFound(output.to_string()))?;
        let (input_step, input_flow) = step_of(&tx, "step_inputs", input.as_str())?
            .ok_or_else(|| TreeFlowError::InputNotFound(input.to_string()))?;
        if output_flow != input_flow {
            return Err(TreeFlowError::CrossFlowReference {
                flow: output_flow,
                referenced: input_step.to_string(),
            });
        }

        let existing = tx
            .query_row(
                "SELECT id, source_output, target_input, created_at
                 FROM step_connections WHERE source_output = ?1",
                params![output.as_str()],
                read_connection,
            )
            .optional()
            .map_err(db)?;
        check_connection(existing.as_ref(), output, &output_step, input, &input_step)?;

        let connection = StepConnection::new(output.clone(), input.clone());
        tx.execute(
            "INSERT INTO step_connections (id, source_output, target_input, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                connection.id.as_str(),
                output.as_str(),
                input.as_str(),
                connection.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| {
            if is_constraint(&e) {
                TreeFlowError::OutputAlreadyWired {
                    output: output.to_string(),
                    connection: "concurrent".to_string(),
                }
            } else {
                db(e)
            }
        })?;
        tx.execute(
            "UPDATE step_outputs SET destination_step = ?1 WHERE id = ?2",
            params![input_step.as_str(), output.as_str()],
        )
        .map_err(db)?;

        tx.commit().map_err(db)?;
        info!(connection = %connection.id, output = %output, input = %input, "Steps connected");
        Ok(connection.id)
    }

    pub fn disconnect(&self, id: &ConnectionId) -> Result<()> {
        let conn = self.lock()?;
        let deleted = conn
            .execute("DELETE FROM step_connections WHERE id = ?1", params![id.as_str()])
            .map_err(db)?;
        if deleted == 0 {
            return Err(TreeFlowError::ConnectionNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Number of connections across the steps of a flow.
    pub fn connection_count(&self, flow: &TreeFlowId) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM step_connections c
                 JOIN step_outputs o ON o.id = c.source_output
                 JOIN steps s ON s.id = o.step_id
                 WHERE s.flow_id = ?1",
                params![flow.as_str()],
                |row| row.get(0),
            )
            .map_err(db)?;
        Ok(count as usize)
    }
}

fn insert_questions(tx: &Transaction<'_>, step: &Step) -> Result<()> {
    for (position, q) in step.questions().iter().enumerate() {
        tx.execute(
            "INSERT INTO step_questions
                (id, step_id, position, name, slug, prompt, objective, importance, view_order)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                q.id.as_str(),
                step.id().as_str(),
                position as i64,
                q.name,
                q.slug,
                q.prompt,
                q.objective,
                q.importance(),
                q.view_order,
            ],
        )
        .map_err(db)?;

        for (position, ex) in q.examples().iter().enumerate() {
            tx.execute(
                "INSERT INTO step_examples
                    (id, question_id, position, type, name, slug, prompt, description)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    ex.id.as_str(),
                    q.id.as_str(),
                    position as i64,
                    ex.kind.as_str(),
                    ex.name,
                    ex.slug,
                    ex.prompt,
                    ex.description,
                ],
            )
            .map_err(db)?;
        }
    }
    Ok(())
}

/// Hint ids of `flow` that name a step stored under a different flow.
fn foreign_steps(conn: &Connection, flow: &TreeFlow) -> Result<HashSet<StepId>> {
    let hints = flow.steps().iter().flat_map(|s| {
        s.outputs()
            .iter()
            .filter_map(|o| o.destination_step.as_ref())
            .chain(s.inputs().iter().filter_map(|i| i.source_step.as_ref()))
    });

    let mut stmt = conn
        .prepare("SELECT flow_id FROM steps WHERE id = ?1")
        .map_err(db)?;
    let mut foreign = HashSet::new();
    for hint in hints {
        if flow.step(hint).is_some() || foreign.contains(hint) {
            continue;
        }
        let owner: Option<String> = stmt
            .query_row(params![hint.as_str()], |row| row.get(0))
            .optional()
            .map_err(db)?;
        if owner.is_some_and(|owner| owner != flow.id().as_str()) {
            foreign.insert(hint.clone());
        }
    }
    Ok(foreign)
}

/// A hint as stored: NULL unless it names a step of the same flow.
fn stored_hint<'a>(flow: &TreeFlow, hint: Option<&'a StepId>) -> Option<&'a str> {
    hint.filter(|id| flow.step(id).is_some()).map(|id| id.as_str())
}

fn insert_edges(tx: &Transaction<'_>, flow: &TreeFlow, step: &Step) -> Result<()> {
    for output in step.outputs() {
        tx.execute(
            "INSERT INTO step_outputs
                (id, step_id, destination_step, name, description, conditional, ord)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                output.id.as_str(),
                step.id().as_str(),
                stored_hint(flow, output.destination_step.as_ref()),
                output.name,
                output.description,
                output.conditional,
                output.order,
            ],
        )
        .map_err(db)?;
    }
    for (position, input) in step.inputs().iter().enumerate() {
        tx.execute(
            "INSERT INTO step_inputs (id, step_id, source_step, type, name, prompt, position)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                input.id.as_str(),
                step.id().as_str(),
                stored_hint(flow, input.source_step.as_ref()),
                input.input_type.as_str(),
                input.name,
                input.prompt,
                position as i64,
            ],
        )
        .map_err(db)?;
    }
    Ok(())
}

/// Owning step and flow of an output or input row.
fn step_of(tx: &Transaction<'_>, table: &str, id: &str) -> Result<Option<(StepId, String)>> {
    let sql = format!(
        "SELECT s.id, s.flow_id FROM {table} e JOIN steps s ON s.id = e.step_id WHERE e.id = ?1"
    );
    tx.query_row(&sql, params![id], |row| {
        Ok((StepId(row.get(0)?), row.get(1)?))
    })
    .optional()
    .map_err(db)
}

fn read_connection(row: &rusqlite::Row<'_>) -> rusqlite::Result<StepConnection> {
    let created_at: String = row.get(3)?;
    Ok(StepConnection {
        id: ConnectionId(row.get(0)?),
        source_output: OutputId(row.get(1)?),
        target_input: InputId(row.get(2)?),
        created_at: parse_time(&created_at),
    })
}

/// Rebuild a flow through the aggregate API so that every invariant is
/// re-checked on the way in.
fn read_flow(tx: &Transaction<'_>, id: &TreeFlowId) -> Result<TreeFlow> {
    let (name, version, active, organization, created_at): (
        String,
        String,
        bool,
        Option<String>,
        String,
    ) = tx
        .query_row(
            "SELECT name, version, active, organization, created_at
             FROM tree_flows WHERE id = ?1",
            params![id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )
        .optional()
        .map_err(db)?
        .ok_or_else(|| TreeFlowError::FlowNotFound(id.to_string()))?;

    let mut flow = TreeFlow::new(name, version)?.with_id(id.clone());
    flow.organization = organization;
    flow.created_at = parse_time(&created_at);

    // Steps
    let mut entry = None;
    {
        let mut stmt = tx
            .prepare(
                "SELECT id, is_first, name, slug, objective, prompt
                 FROM steps WHERE flow_id = ?1 ORDER BY position",
            )
            .map_err(db)?;
        let rows = stmt
            .query_map(params![id.as_str()], |row| {
                let mut step = Step::new(row.get::<_, String>(2)?)
                    .with_id(StepId(row.get(0)?))
                    .with_slug(row.get::<_, String>(3)?);
                step.objective = row.get(4)?;
                step.prompt = row.get(5)?;
                Ok((step, row.get::<_, bool>(1)?))
            })
            .map_err(db)?;
        let steps = rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db)?;

        for (mut step, first) in steps {
            for question in read_questions(tx, step.id())? {
                step.add_question(question);
            }
            if first {
                entry = Some(step.id().clone());
            }
            flow.add_step(step)?;
        }
    }
    if let Some(entry) = &entry {
        flow.set_first(entry)?;
    }

    // Outputs
    {
        let mut stmt = tx
            .prepare(
                "SELECT o.id, o.step_id, o.destination_step, o.name, o.description,
                        o.conditional, o.ord
                 FROM step_outputs o JOIN steps s ON s.id = o.step_id
                 WHERE s.flow_id = ?1
                 ORDER BY s.position, o.ord, o.rowid",
            )
            .map_err(db)?;
        let rows = stmt
            .query_map(params![id.as_str()], |row| {
                let mut output = StepOutput::new(row.get::<_, String>(3)?);
                output.id = OutputId(row.get(0)?);
                output.destination_step = row.get::<_, Option<String>>(2)?.map(StepId);
                output.description = row.get(4)?;
                output.conditional = row.get(5)?;
                Ok((StepId(row.get(1)?), output, row.get::<_, u32>(6)?))
            })
            .map_err(db)?;
        let outputs = rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db)?;
        for (step_id, mut output, order) in outputs {
            drop_foreign_hint(&flow, &mut output.destination_step);
            let output_id = flow.add_output(&step_id, output)?;
            flow.reorder_output(&output_id, order)?;
        }
    }

    // Inputs
    {
        let mut stmt = tx
            .prepare(
                "SELECT i.id, i.step_id, i.source_step, i.type, i.name, i.prompt
                 FROM step_inputs i JOIN steps s ON s.id = i.step_id
                 WHERE s.flow_id = ?1
                 ORDER BY s.position, i.position",
            )
            .map_err(db)?;
        let rows = stmt
            .query_map(params![id.as_str()], |row| {
                let mut input = StepInput::new(row.get::<_, String>(4)?);
                input.id = InputId(row.get(0)?);
                input.source_step = row.get::<_, Option<String>>(2)?.map(StepId);
                input.prompt = row.get(5)?;
                Ok((StepId(row.get(1)?), input, row.get::<_, String>(3)?))
            })
            .map_err(db)?;
        let inputs = rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db)?;
        for (step_id, mut input, input_type) in inputs {
            input.input_type = input_type.parse()?;
            drop_foreign_hint(&flow, &mut input.source_step);
            flow.add_input(&step_id, input)?;
        }
    }

    // Connections
    {
        let mut stmt = tx
            .prepare(
                "SELECT c.id, c.source_output, c.target_input, c.created_at
                 FROM step_connections c
                 JOIN step_outputs o ON o.id = c.source_output
                 JOIN steps s ON s.id = o.step_id
                 WHERE s.flow_id = ?1
                 ORDER BY c.created_at, c.rowid",
            )
            .map_err(db)?;
        let rows = stmt
            .query_map(params![id.as_str()], read_connection)
            .map_err(db)?;
        let connections = rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db)?;
        for connection in connections {
            flow.restore_connection(connection)?;
        }
    }

    if active {
        if let Err(e) = flow.activate() {
            warn!(flow = %flow.name, error = %e, "Stored flow marked active no longer validates");
        }
    }
    Ok(flow)
}

/// Rows written before cross-flow hints were rejected on save may still
/// point outside the flow. Such a hint loads as unset.
fn drop_foreign_hint(flow: &TreeFlow, hint: &mut Option<StepId>) {
    if !hint.as_ref().is_some_and(|id| flow.step(id).is_none()) {
        return;
    }
    if let Some(id) = hint.take() {
        warn!(flow = %flow.name, step = %id, "Ignoring stored hint to a step outside the flow");
    }
}

fn read_questions(tx: &Transaction<'_>, step: &StepId) -> Result<Vec<StepQuestion>> {
    let mut stmt = tx
        .prepare(
            "SELECT id, name, slug, prompt, objective, importance, view_order
             FROM step_questions WHERE step_id = ?1 ORDER BY position",
        )
        .map_err(db)?;
    let rows = stmt
        .query_map(params![step.as_str()], |row| {
            let mut q = StepQuestion::new(row.get::<_, String>(1)?)
                .with_importance(row.get(5)?)
                .with_view_order(row.get(6)?);
            q.id = QuestionId(row.get(0)?);
            q.slug = row.get(2)?;
            q.prompt = row.get(3)?;
            q.objective = row.get(4)?;
            Ok(q)
        })
        .map_err(db)?;
    let mut questions = rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db)?;

    let mut stmt = tx
        .prepare(
            "SELECT id, type, name, slug, prompt, description
             FROM step_examples WHERE question_id = ?1 ORDER BY position",
        )
        .map_err(db)?;
    for q in &mut questions {
        let rows = stmt
            .query_map(params![q.id.as_str()], |row| {
                Ok((
                    ExampleId(row.get(0)?),
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })
            .map_err(db)?;
        for row in rows {
            let (id, kind, name, slug, prompt, description) = row.map_err(db)?;
            let kind: FewShotType = kind.parse()?;
            let mut example = StepFewShotExample::new(kind, name);
            example.id = id;
            example.slug = slug;
            example.prompt = prompt;
            example.description = description;
            q.add_example(example);
        }
    }
    Ok(questions)
}
