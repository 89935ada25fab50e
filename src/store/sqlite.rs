//! SQLite implementation of the repository gateway.
//!
//! rusqlite is synchronous, so every operation opens a connection and runs
//! inside `tokio::task::spawn_blocking`. Writes are short single-statement
//! transactions except round commits and artifact upserts, which group their
//! statements into one explicit transaction.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::{
    Agent, AgendaStrategy, ChatRole, CodeArtifact, Meeting, MeetingMessage, MeetingStatus,
    MeetingType, OutputType, RoundPlan, Team, WebhookConfig,
};

use super::{MeetingStore, NewArtifact, StoreError};

/// File-backed SQLite store.
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path` and ensure the
    /// schema exists.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref().to_path_buf();
        let store = Self { db_path };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<(), StoreError> {
        let conn = self.connect()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS teams (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                language TEXT,
                is_public INTEGER NOT NULL DEFAULT 0,
                owner_id TEXT,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                expertise TEXT NOT NULL DEFAULT '',
                goal TEXT NOT NULL DEFAULT '',
                role TEXT NOT NULL DEFAULT '',
                model TEXT NOT NULL,
                model_params TEXT NOT NULL DEFAULT '{}',
                system_prompt TEXT NOT NULL DEFAULT '',
                is_mirror INTEGER NOT NULL DEFAULT 0,
                primary_agent_id TEXT,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS meetings (
                id TEXT PRIMARY KEY,
                team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                agenda TEXT NOT NULL DEFAULT '',
                agenda_questions TEXT NOT NULL DEFAULT '[]',
                agenda_rules TEXT NOT NULL DEFAULT '[]',
                output_type TEXT NOT NULL DEFAULT 'code',
                meeting_type TEXT NOT NULL DEFAULT 'team',
                status TEXT NOT NULL DEFAULT 'pending',
                max_rounds INTEGER NOT NULL DEFAULT 5,
                current_round INTEGER NOT NULL DEFAULT 0,
                participant_agent_ids TEXT NOT NULL DEFAULT '[]',
                individual_agent_id TEXT,
                source_meeting_ids TEXT NOT NULL DEFAULT '[]',
                context_meeting_ids TEXT NOT NULL DEFAULT '[]',
                parent_meeting_id TEXT,
                rewrite_feedback TEXT,
                agenda_strategy TEXT NOT NULL DEFAULT 'manual',
                round_plans TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS meeting_messages (
                id TEXT PRIMARY KEY,
                meeting_id TEXT NOT NULL REFERENCES meetings(id) ON DELETE CASCADE,
                agent_id TEXT,
                agent_name TEXT,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                round_number INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_meeting
                ON meeting_messages(meeting_id, round_number, created_at);
            CREATE TABLE IF NOT EXISTS code_artifacts (
                id TEXT PRIMARY KEY,
                meeting_id TEXT NOT NULL REFERENCES meetings(id) ON DELETE CASCADE,
                filename TEXT NOT NULL,
                language TEXT NOT NULL,
                content TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                version INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                UNIQUE(meeting_id, filename)
            );
            CREATE TABLE IF NOT EXISTS webhooks (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                events TEXT NOT NULL DEFAULT '[]',
                active INTEGER NOT NULL DEFAULT 1,
                secret TEXT
            );",
        )?;
        Ok(())
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    /// Run a closure against a fresh connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&db_path)?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn json_vec(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}

fn row_to_team(row: &Row<'_>) -> rusqlite::Result<Team> {
    Ok(Team {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        language: row.get("language")?,
        is_public: row.get::<_, i64>("is_public")? != 0,
        owner_id: row.get("owner_id")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?),
    })
}

fn row_to_agent(row: &Row<'_>) -> rusqlite::Result<Agent> {
    let params_json: String = row.get("model_params")?;
    Ok(Agent {
        id: row.get("id")?,
        team_id: row.get("team_id")?,
        name: row.get("name")?,
        title: row.get("title")?,
        expertise: row.get("expertise")?,
        goal: row.get("goal")?,
        role: row.get("role")?,
        model: row.get("model")?,
        model_params: serde_json::from_str(&params_json).unwrap_or_default(),
        system_prompt: row.get("system_prompt")?,
        is_mirror: row.get::<_, i64>("is_mirror")? != 0,
        primary_agent_id: row.get("primary_agent_id")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?),
    })
}

fn row_to_meeting(row: &Row<'_>) -> rusqlite::Result<Meeting> {
    let status: String = row.get("status")?;
    let output_type: String = row.get("output_type")?;
    let meeting_type: String = row.get("meeting_type")?;
    let strategy: String = row.get("agenda_strategy")?;
    let plans_json: String = row.get("round_plans")?;
    Ok(Meeting {
        id: row.get("id")?,
        team_id: row.get("team_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        agenda: row.get("agenda")?,
        agenda_questions: json_vec(&row.get::<_, String>("agenda_questions")?),
        agenda_rules: json_vec(&row.get::<_, String>("agenda_rules")?),
        output_type: OutputType::parse(&output_type),
        meeting_type: MeetingType::parse(&meeting_type),
        status: MeetingStatus::parse(&status).unwrap_or(MeetingStatus::Pending),
        max_rounds: row.get::<_, i64>("max_rounds")? as u32,
        current_round: row.get::<_, i64>("current_round")? as u32,
        participant_agent_ids: json_vec(&row.get::<_, String>("participant_agent_ids")?),
        individual_agent_id: row.get("individual_agent_id")?,
        source_meeting_ids: json_vec(&row.get::<_, String>("source_meeting_ids")?),
        context_meeting_ids: json_vec(&row.get::<_, String>("context_meeting_ids")?),
        parent_meeting_id: row.get("parent_meeting_id")?,
        rewrite_feedback: row.get("rewrite_feedback")?,
        agenda_strategy: AgendaStrategy::parse(&strategy),
        round_plans: serde_json::from_str::<Vec<RoundPlan>>(&plans_json).unwrap_or_default(),
        created_at: parse_ts(&row.get::<_, String>("created_at")?),
        updated_at: parse_ts(&row.get::<_, String>("updated_at")?),
    })
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<MeetingMessage> {
    let role: String = row.get("role")?;
    Ok(MeetingMessage {
        id: row.get("id")?,
        meeting_id: row.get("meeting_id")?,
        agent_id: row.get("agent_id")?,
        agent_name: row.get("agent_name")?,
        role: match role.as_str() {
            "assistant" => ChatRole::Assistant,
            "system" => ChatRole::System,
            _ => ChatRole::User,
        },
        content: row.get("content")?,
        round_number: row.get::<_, i64>("round_number")? as u32,
        created_at: parse_ts(&row.get::<_, String>("created_at")?),
    })
}

fn row_to_artifact(row: &Row<'_>) -> rusqlite::Result<CodeArtifact> {
    Ok(CodeArtifact {
        id: row.get("id")?,
        meeting_id: row.get("meeting_id")?,
        filename: row.get("filename")?,
        language: row.get("language")?,
        content: row.get("content")?,
        description: row.get("description")?,
        version: row.get::<_, i64>("version")? as u32,
        created_at: parse_ts(&row.get::<_, String>("created_at")?),
    })
}

fn row_to_webhook(row: &Row<'_>) -> rusqlite::Result<WebhookConfig> {
    Ok(WebhookConfig {
        id: row.get("id")?,
        url: row.get("url")?,
        events: json_vec(&row.get::<_, String>("events")?),
        active: row.get::<_, i64>("active")? != 0,
        secret: row.get("secret")?,
    })
}

#[async_trait]
impl MeetingStore for SqliteStore {
    async fn create_team(&self, team: &Team) -> Result<(), StoreError> {
        let team = team.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO teams (id, name, description, language, is_public, owner_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    team.id,
                    team.name,
                    team.description,
                    team.language,
                    team.is_public as i64,
                    team.owner_id,
                    ts(&team.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_team(&self, id: &str) -> Result<Option<Team>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let team = conn
                .query_row("SELECT * FROM teams WHERE id = ?1", params![id], |row| {
                    row_to_team(row)
                })
                .optional()?;
            Ok(team)
        })
        .await
    }

    async fn create_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        let agent = agent.clone();
        let model_params = serde_json::to_string(&agent.model_params)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO agents (id, team_id, name, title, expertise, goal, role, model,
                                     model_params, system_prompt, is_mirror, primary_agent_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    agent.id,
                    agent.team_id,
                    agent.name,
                    agent.title,
                    agent.expertise,
                    agent.goal,
                    agent.role,
                    agent.model,
                    model_params,
                    agent.system_prompt,
                    agent.is_mirror as i64,
                    agent.primary_agent_id,
                    ts(&agent.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        let agent = agent.clone();
        let model_params = serde_json::to_string(&agent.model_params)?;
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE agents SET name = ?2, title = ?3, expertise = ?4, goal = ?5, role = ?6,
                        model = ?7, model_params = ?8, system_prompt = ?9, is_mirror = ?10,
                        primary_agent_id = ?11
                 WHERE id = ?1",
                params![
                    agent.id,
                    agent.name,
                    agent.title,
                    agent.expertise,
                    agent.goal,
                    agent.role,
                    agent.model,
                    model_params,
                    agent.system_prompt,
                    agent.is_mirror as i64,
                    agent.primary_agent_id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_agent(&self, id: &str) -> Result<Option<Agent>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let agent = conn
                .query_row("SELECT * FROM agents WHERE id = ?1", params![id], |row| {
                    row_to_agent(row)
                })
                .optional()?;
            Ok(agent)
        })
        .await
    }

    async fn list_team_agents(
        &self,
        team_id: &str,
        include_mirrors: bool,
    ) -> Result<Vec<Agent>, StoreError> {
        let team_id = team_id.to_string();
        self.with_conn(move |conn| {
            let sql = if include_mirrors {
                "SELECT * FROM agents WHERE team_id = ?1 ORDER BY created_at, rowid"
            } else {
                "SELECT * FROM agents WHERE team_id = ?1 AND is_mirror = 0 ORDER BY created_at, rowid"
            };
            let mut stmt = conn.prepare(sql)?;
            let agents = stmt
                .query_map(params![team_id], row_to_agent)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(agents)
        })
        .await
    }

    async fn delete_agent(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            // Messages keep their content; only the attribution id is cleared.
            tx.execute(
                "UPDATE meeting_messages SET agent_id = NULL WHERE agent_id = ?1",
                params![id],
            )?;
            // Mirror back-references are weak: null them, never cascade.
            tx.execute(
                "UPDATE agents SET primary_agent_id = NULL WHERE primary_agent_id = ?1",
                params![id],
            )?;
            tx.execute("DELETE FROM agents WHERE id = ?1", params![id])?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn create_meeting(&self, meeting: &Meeting) -> Result<(), StoreError> {
        let m = meeting.clone();
        let questions = serde_json::to_string(&m.agenda_questions)?;
        let rules = serde_json::to_string(&m.agenda_rules)?;
        let participants = serde_json::to_string(&m.participant_agent_ids)?;
        let sources = serde_json::to_string(&m.source_meeting_ids)?;
        let contexts = serde_json::to_string(&m.context_meeting_ids)?;
        let plans = serde_json::to_string(&m.round_plans)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO meetings (id, team_id, title, description, agenda, agenda_questions,
                        agenda_rules, output_type, meeting_type, status, max_rounds, current_round,
                        participant_agent_ids, individual_agent_id, source_meeting_ids,
                        context_meeting_ids, parent_meeting_id, rewrite_feedback, agenda_strategy,
                        round_plans, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                         ?17, ?18, ?19, ?20, ?21, ?22)",
                params![
                    m.id,
                    m.team_id,
                    m.title,
                    m.description,
                    m.agenda,
                    questions,
                    rules,
                    m.output_type.as_str(),
                    m.meeting_type.as_str(),
                    m.status.as_str(),
                    m.max_rounds as i64,
                    m.current_round as i64,
                    participants,
                    m.individual_agent_id,
                    sources,
                    contexts,
                    m.parent_meeting_id,
                    m.rewrite_feedback,
                    m.agenda_strategy.as_str(),
                    plans,
                    ts(&m.created_at),
                    ts(&m.updated_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_meeting(&self, id: &str) -> Result<Option<Meeting>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let meeting = conn
                .query_row("SELECT * FROM meetings WHERE id = ?1", params![id], |row| {
                    row_to_meeting(row)
                })
                .optional()?;
            Ok(meeting)
        })
        .await
    }

    async fn update_meeting_status(&self, id: &str, status: MeetingStatus) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE meetings SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, status.as_str(), ts(&Utc::now())],
            )?;
            Ok(())
        })
        .await
    }

    async fn complete_round(
        &self,
        id: &str,
        current_round: u32,
        status: MeetingStatus,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE meetings SET current_round = ?2, status = ?3, updated_at = ?4 WHERE id = ?1",
                params![id, current_round as i64, status.as_str(), ts(&Utc::now())],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_meeting_agenda(
        &self,
        id: &str,
        agenda: &str,
        questions: &[String],
        rules: &[String],
        max_rounds: u32,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        let agenda = agenda.to_string();
        let questions = serde_json::to_string(questions)?;
        let rules = serde_json::to_string(rules)?;
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE meetings SET agenda = ?2, agenda_questions = ?3, agenda_rules = ?4,
                        max_rounds = ?5, agenda_strategy = 'ai_auto', updated_at = ?6
                 WHERE id = ?1",
                params![id, agenda, questions, rules, max_rounds as i64, ts(&Utc::now())],
            )?;
            Ok(())
        })
        .await
    }

    async fn append_description_note(&self, id: &str, note: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        let note = note.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE meetings SET description = description || ?2, updated_at = ?3 WHERE id = ?1",
                params![id, format!("\n{note}"), ts(&Utc::now())],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_meeting(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM meetings WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }

    async fn list_meetings_by_status(
        &self,
        status: MeetingStatus,
    ) -> Result<Vec<Meeting>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM meetings WHERE status = ?1 ORDER BY created_at")?;
            let meetings = stmt
                .query_map(params![status.as_str()], row_to_meeting)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(meetings)
        })
        .await
    }

    async fn insert_message(&self, message: &MeetingMessage) -> Result<(), StoreError> {
        let m = message.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO meeting_messages (id, meeting_id, agent_id, agent_name, role,
                        content, round_number, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    m.id,
                    m.meeting_id,
                    m.agent_id,
                    m.agent_name,
                    m.role.as_str(),
                    m.content,
                    m.round_number as i64,
                    ts(&m.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_messages(&self, meeting_id: &str) -> Result<Vec<MeetingMessage>, StoreError> {
        let meeting_id = meeting_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM meeting_messages WHERE meeting_id = ?1
                 ORDER BY round_number, created_at, rowid",
            )?;
            let messages = stmt
                .query_map(params![meeting_id], row_to_message)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(messages)
        })
        .await
    }

    async fn list_assistant_messages(
        &self,
        meeting_id: &str,
    ) -> Result<Vec<MeetingMessage>, StoreError> {
        let meeting_id = meeting_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM meeting_messages WHERE meeting_id = ?1 AND role = 'assistant'
                 ORDER BY round_number, created_at, rowid",
            )?;
            let messages = stmt
                .query_map(params![meeting_id], row_to_message)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(messages)
        })
        .await
    }

    async fn count_messages(&self, meeting_id: &str) -> Result<u64, StoreError> {
        let meeting_id = meeting_id.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM meeting_messages WHERE meeting_id = ?1",
                params![meeting_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    async fn upsert_artifacts(
        &self,
        meeting_id: &str,
        artifacts: Vec<NewArtifact>,
    ) -> Result<(), StoreError> {
        let meeting_id = meeting_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for artifact in &artifacts {
                let existing: Option<(String, String, i64)> = tx
                    .query_row(
                        "SELECT id, content, version FROM code_artifacts
                         WHERE meeting_id = ?1 AND filename = ?2",
                        params![meeting_id, artifact.filename],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?;

                match existing {
                    Some((_, ref content, _)) if *content == artifact.content => {
                        // Unchanged content keeps its version.
                    }
                    Some((id, _, version)) => {
                        tx.execute(
                            "UPDATE code_artifacts SET content = ?2, language = ?3,
                                    description = ?4, version = ?5
                             WHERE id = ?1",
                            params![
                                id,
                                artifact.content,
                                artifact.language,
                                artifact.description,
                                version + 1,
                            ],
                        )?;
                    }
                    None => {
                        tx.execute(
                            "INSERT INTO code_artifacts (id, meeting_id, filename, language,
                                    content, description, version, created_at)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)",
                            params![
                                uuid::Uuid::new_v4().to_string(),
                                meeting_id,
                                artifact.filename,
                                artifact.language,
                                artifact.content,
                                artifact.description,
                                ts(&Utc::now()),
                            ],
                        )?;
                    }
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn list_artifacts(&self, meeting_id: &str) -> Result<Vec<CodeArtifact>, StoreError> {
        let meeting_id = meeting_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM code_artifacts WHERE meeting_id = ?1 ORDER BY filename",
            )?;
            let artifacts = stmt
                .query_map(params![meeting_id], row_to_artifact)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(artifacts)
        })
        .await
    }

    async fn create_webhook(&self, webhook: &WebhookConfig) -> Result<(), StoreError> {
        let w = webhook.clone();
        let events = serde_json::to_string(&w.events)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO webhooks (id, url, events, active, secret)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![w.id, w.url, events, w.active as i64, w.secret],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_active_webhooks(&self) -> Result<Vec<WebhookConfig>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT * FROM webhooks WHERE active = 1")?;
            let webhooks = stmt
                .query_map([], row_to_webhook)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(webhooks)
        })
        .await
    }
}
