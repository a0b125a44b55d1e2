//! The agent turn loop.
//!
//! One turn walks `Received → Planning → (ToolDispatch)* → Responding →
//! Done`, with `Failed` reachable from any non-terminal phase. The model
//! proposes tool calls; arguments are schema-validated before dispatch,
//! read-only retrieval runs before calculators and CRM-affecting tools go
//! last. CRM effects are staged during the turn and committed only after
//! the final reply exists, so a failed or timed-out turn never
//! half-writes the CRM or the session history.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use renta_core::calc::availability::StockTable;
use renta_core::calc::pricing::RatePolicy;
use renta_core::calc::schedule::{delivery_date, rental_window};
use renta_core::domain::conversation::{TurnRole, UsageStats};
use renta_core::errors::{ToolError, TurnError};
use renta_core::profile::Profile;
use renta_db::repositories::{ConversationLogRepository, CustomerRepository, InterestRepository};
use renta_retrieval::Retriever;

use crate::llm::{ChatMessage, ChatModel, TokenUsage};
use crate::session::{ActiveCustomer, Session, SessionStore};
use crate::tools::ToolInvocation;

const FIRST_CONTACT_INSTRUCTION: &str = "INSTRUCCIÓN IMPORTANTE: Antes de ayudar al cliente, \
     pregúntale su nombre de forma amable y natural.";
const ITERATION_LIMIT_REPLY: &str =
    "Se alcanzó el límite de iteraciones para esta consulta. ¿Podrías reformular tu solicitud?";
const MALFORMED_TOOLS_REPLY: &str = "Lo siento, tuve un problema procesando tu solicitud con las \
     herramientas disponibles. ¿Podrías reformularla?";
const CRM_WARNING: &str =
    "CRM write failed; the reply was produced but this interaction was not recorded.";

/// Phase of a chat turn, recorded on the outcome and in structured logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Received,
    Planning,
    ToolDispatch,
    Responding,
    Done,
    Failed,
}

impl TurnPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Planning => "planning",
            Self::ToolDispatch => "tool_dispatch",
            Self::Responding => "responding",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// Everything the turn loop talks to, injected at bootstrap. Repositories
/// and the retriever are shared across sessions; calculators are plain
/// values.
pub struct Dependencies {
    pub chat_model: Arc<dyn ChatModel>,
    pub retriever: Arc<Retriever>,
    pub rate_policy: RatePolicy,
    pub stock: StockTable,
    pub customers: Arc<dyn CustomerRepository>,
    pub interests: Arc<dyn InterestRepository>,
    pub conversation_log: Arc<dyn ConversationLogRepository>,
}

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub profile: Profile,
    pub max_planning_rounds: u32,
    pub max_tool_retries: u32,
    pub tool_timeout: Duration,
    pub turn_timeout: Duration,
    pub prompt_price_per_1k: f64,
    pub completion_price_per_1k: f64,
    pub default_lead_time_days: u32,
    pub business_days_only: bool,
    pub holidays: Vec<NaiveDate>,
}

/// Result of one committed chat turn.
#[derive(Clone, Debug)]
pub struct TurnOutcome {
    pub session_id: String,
    pub reply: String,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub tools_invoked: Vec<&'static str>,
    pub customer_name: Option<String>,
    pub stats: UsageStats,
    pub warning: Option<String>,
    pub phase: TurnPhase,
}

#[derive(Clone, Debug, Default)]
struct StagedInterest {
    product: String,
    quoted_price: Option<Decimal>,
    quoted_days: Option<u32>,
}

/// CRM effects proposed during the turn. Nothing here touches the store
/// until the final reply has been computed.
#[derive(Debug, Default)]
struct StagedCrm {
    customer_name: Option<String>,
    interests: Vec<StagedInterest>,
}

#[derive(Debug)]
struct DraftReply {
    reply: String,
    usage: TokenUsage,
    tools_invoked: Vec<&'static str>,
    staged: StagedCrm,
}

pub struct Orchestrator {
    deps: Dependencies,
    config: OrchestratorConfig,
    sessions: Arc<SessionStore>,
}

impl Orchestrator {
    pub fn new(deps: Dependencies, config: OrchestratorConfig, sessions: Arc<SessionStore>) -> Self {
        Self { deps, config, sessions }
    }

    pub fn sessions(&self) -> Arc<SessionStore> {
        Arc::clone(&self.sessions)
    }

    pub fn profile(&self) -> Profile {
        self.config.profile
    }

    pub fn model_name(&self) -> &str {
        self.deps.chat_model.model()
    }

    /// Runs one chat turn for `session_id`. The session handle's lock is
    /// held for the whole turn, which is what serializes same-session
    /// turns in arrival order; other sessions are untouched. On timeout
    /// or model failure nothing is appended and nothing hits the CRM.
    pub async fn run_turn(
        &self,
        session_id: &str,
        message: &str,
        timeout_override: Option<Duration>,
    ) -> Result<TurnOutcome, TurnError> {
        let started = Instant::now();
        let deadline = timeout_override.unwrap_or(self.config.turn_timeout);

        let handle = self.sessions.get_or_create(session_id).await;
        let mut session = handle.lock().await;

        info!(
            event_name = "agent.turn.received",
            session_id = %session_id,
            phase = TurnPhase::Received.as_str(),
            "chat turn accepted"
        );

        let draft = match tokio::time::timeout(deadline, self.plan(&session, message)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    event_name = "agent.turn.timeout",
                    session_id = %session_id,
                    phase = TurnPhase::Failed.as_str(),
                    budget_secs = deadline.as_secs(),
                    "turn aborted at its deadline, session left untouched"
                );
                return Err(TurnError::Timeout { elapsed_secs: deadline.as_secs() });
            }
        };

        // Responding: CRM commit first (effects were staged), then the
        // history append and stats update as one block under the session
        // lock.
        let warning = self.commit_crm(&mut session, message, &draft).await;

        session.append(TurnRole::User, message);
        session.append(TurnRole::Assistant, draft.reply.clone());
        session.truncate_oldest(self.sessions.max_messages());

        let cost_usd = self.estimate_cost(draft.usage);
        session.stats.total_messages += 1;
        session.stats.prompt_tokens += draft.usage.prompt_tokens;
        session.stats.completion_tokens += draft.usage.completion_tokens;
        session.stats.estimated_cost_usd += cost_usd;
        session.stats.tools_used += draft.tools_invoked.len() as u64;
        session.stats.elapsed_secs += started.elapsed().as_secs_f64();

        info!(
            event_name = "agent.turn.done",
            session_id = %session_id,
            phase = TurnPhase::Done.as_str(),
            tools = draft.tools_invoked.len(),
            tokens = draft.usage.prompt_tokens + draft.usage.completion_tokens,
            "chat turn committed"
        );

        Ok(TurnOutcome {
            session_id: session_id.to_string(),
            reply: draft.reply,
            tokens_used: draft.usage.prompt_tokens + draft.usage.completion_tokens,
            cost_usd,
            tools_invoked: draft.tools_invoked,
            customer_name: session.customer_name(),
            stats: session.stats.clone(),
            warning,
            phase: TurnPhase::Done,
        })
    }

    /// Planning loop: ask the model, validate and dispatch the tools it
    /// proposes, feed results back, repeat until it answers in prose or
    /// the round budget runs out.
    async fn plan(&self, session: &Session, message: &str) -> Result<DraftReply, TurnError> {
        let mut messages = Vec::with_capacity(session.messages.len() + 3);
        messages.push(ChatMessage::System {
            content: self.config.profile.system_prompt().to_string(),
        });
        if session.customer.is_none() {
            messages.push(ChatMessage::System { content: FIRST_CONTACT_INSTRUCTION.to_string() });
        }
        for turn in &session.messages {
            match turn.role {
                TurnRole::User => {
                    messages.push(ChatMessage::User { content: turn.content.clone() });
                }
                TurnRole::Assistant => {
                    messages.push(ChatMessage::Assistant {
                        content: Some(turn.content.clone()),
                        tool_calls: Vec::new(),
                    });
                }
                TurnRole::System | TurnRole::Tool => {}
            }
        }
        messages.push(ChatMessage::User { content: message.to_string() });

        let specs = ToolInvocation::specs();
        let mut usage = TokenUsage::default();
        let mut tools_invoked: Vec<&'static str> = Vec::new();
        let mut staged = StagedCrm::default();
        let mut rejected_rounds: u32 = 0;

        for round in 0..self.config.max_planning_rounds {
            info!(
                event_name = "agent.turn.planning_round",
                session_id = %session.session_id,
                phase = TurnPhase::Planning.as_str(),
                round,
                "asking the model for the next action"
            );

            let model_turn = self
                .deps
                .chat_model
                .complete(&messages, &specs)
                .await
                .map_err(|error| TurnError::ModelUnavailable(error.to_string()))?;
            usage.prompt_tokens += model_turn.usage.prompt_tokens;
            usage.completion_tokens += model_turn.usage.completion_tokens;

            if model_turn.tool_calls.is_empty() {
                let reply = model_turn.content.unwrap_or_default();
                return Ok(DraftReply { reply, usage, tools_invoked, staged });
            }

            messages.push(ChatMessage::Assistant {
                content: model_turn.content.clone(),
                tool_calls: model_turn.tool_calls.clone(),
            });

            // Validate every proposed call before dispatching any of them.
            let mut valid = Vec::with_capacity(model_turn.tool_calls.len());
            let mut round_rejected = false;
            for call in &model_turn.tool_calls {
                match ToolInvocation::parse(call) {
                    Ok(invocation) => valid.push((call.id.clone(), invocation)),
                    Err(error) => {
                        round_rejected = true;
                        warn!(
                            event_name = "agent.tool.rejected",
                            session_id = %session.session_id,
                            tool = %call.name,
                            error = %error,
                            "tool call failed schema validation, re-prompting"
                        );
                        messages.push(ChatMessage::ToolResult {
                            tool_call_id: call.id.clone(),
                            content: error.to_model_payload(),
                        });
                    }
                }
            }
            if round_rejected {
                rejected_rounds += 1;
                if rejected_rounds > self.config.max_tool_retries {
                    return Ok(DraftReply {
                        reply: MALFORMED_TOOLS_REPLY.to_string(),
                        usage,
                        tools_invoked,
                        staged,
                    });
                }
            }

            valid.sort_by_key(|(_, invocation)| invocation.dispatch_rank());
            for (call_id, invocation) in valid {
                let name = invocation.name();
                tools_invoked.push(name);
                info!(
                    event_name = "agent.tool.dispatched",
                    session_id = %session.session_id,
                    phase = TurnPhase::ToolDispatch.as_str(),
                    tool = name,
                    "dispatching validated tool call"
                );

                let content = match tokio::time::timeout(
                    self.config.tool_timeout,
                    self.dispatch(&invocation, &mut staged, session),
                )
                .await
                {
                    Ok(Ok(payload)) => payload.to_string(),
                    Ok(Err(error)) => {
                        warn!(
                            event_name = "agent.tool.failed",
                            session_id = %session.session_id,
                            tool = name,
                            error = %error,
                            "tool failed, surfacing the error into planning context"
                        );
                        json!({ "error": error.kind(), "detail": error.to_string() }).to_string()
                    }
                    Err(_) => {
                        warn!(
                            event_name = "agent.tool.timeout",
                            session_id = %session.session_id,
                            tool = name,
                            budget_secs = self.config.tool_timeout.as_secs(),
                            "tool exceeded its per-call budget"
                        );
                        json!({
                            "error": "timeout",
                            "detail": format!(
                                "tool `{name}` exceeded its {}s budget",
                                self.config.tool_timeout.as_secs()
                            ),
                        })
                        .to_string()
                    }
                };
                messages.push(ChatMessage::ToolResult { tool_call_id: call_id, content });
            }
        }

        Ok(DraftReply { reply: ITERATION_LIMIT_REPLY.to_string(), usage, tools_invoked, staged })
    }

    async fn dispatch(
        &self,
        invocation: &ToolInvocation,
        staged: &mut StagedCrm,
        session: &Session,
    ) -> Result<Value, ToolError> {
        match invocation {
            ToolInvocation::SearchCatalog { query } => {
                let results = self
                    .deps
                    .retriever
                    .search(query, None)
                    .await
                    .map_err(|error| ToolError::RetrievalUnavailable(error.to_string()))?;
                if results.is_empty() {
                    return Ok(json!({ "resultado": "No se encontró información del producto" }));
                }
                let fragments: Vec<Value> = results
                    .into_iter()
                    .map(|scored| json!({ "texto": scored.chunk.text, "relevancia": scored.score }))
                    .collect();
                Ok(json!({ "fragmentos": fragments }))
            }
            ToolInvocation::QuoteRental { base_rate, duration_days } => {
                let quote = self.deps.rate_policy.quote(*base_rate, *duration_days)?;
                Ok(json!({
                    "tarifa_diaria": quote.base_rate,
                    "dias": quote.duration_days,
                    "total_sin_descuento": quote.subtotal,
                    "descuento_porcentaje": quote.discount_percent,
                    "ahorro": quote.discount_amount,
                    "total_con_descuento": quote.total,
                }))
            }
            ToolInvocation::CheckAvailability { product } => {
                let availability = self.deps.stock.check(product, None)?;
                Ok(json!({
                    "equipo": availability.product,
                    "disponible": availability.available,
                    "unidades": availability.units_on_hand,
                    "proxima_disponibilidad": availability.next_available,
                }))
            }
            ToolInvocation::DeliveryDate { lead_time_days, business_days_only, rental_days } => {
                let order_date = Utc::now().date_naive();
                let lead = lead_time_days.unwrap_or(self.config.default_lead_time_days);
                let business = business_days_only.unwrap_or(self.config.business_days_only);
                let delivered = delivery_date(order_date, lead, business, &self.config.holidays);
                let mut payload = json!({
                    "fecha_pedido": order_date,
                    "dias_anticipacion": lead,
                    "fecha_entrega": delivered,
                    "solo_dias_habiles": business,
                });
                if let Some(days) = rental_days {
                    let window = rental_window(delivered, *days)?;
                    payload["inicio_renta"] = json!(window.start);
                    payload["fecha_devolucion"] = json!(window.end);
                    payload["total_dias"] = json!(window.duration_days);
                }
                Ok(payload)
            }
            ToolInvocation::SaveCustomerName { name } => {
                staged.customer_name = Some(name.clone());
                Ok(json!({
                    "mensaje": format!("Perfecto {name}, te damos la bienvenida a CONCESA.")
                }))
            }
            ToolInvocation::RecordInterest { product, quoted_price, quoted_days } => {
                if staged.customer_name.is_none() && session.customer.is_none() {
                    return Err(ToolError::InvalidArgument(
                        "se necesita el nombre del cliente antes de registrar interés".to_string(),
                    ));
                }
                staged.interests.push(StagedInterest {
                    product: product.clone(),
                    quoted_price: *quoted_price,
                    quoted_days: *quoted_days,
                });
                Ok(json!({ "mensaje": format!("Interés registrado en {product}.") }))
            }
        }
    }

    /// Commits staged CRM effects after the reply exists. Failures are
    /// reported as a warning on the response; the conversational value was
    /// already produced, so the reply still goes out.
    async fn commit_crm(
        &self,
        session: &mut Session,
        user_message: &str,
        draft: &DraftReply,
    ) -> Option<String> {
        if let Some(name) = &draft.staged.customer_name {
            match self.deps.customers.upsert_by_name(name).await {
                Ok(customer) => {
                    session.customer =
                        Some(ActiveCustomer { id: customer.id, name: customer.name });
                }
                Err(error) => {
                    warn!(
                        event_name = "agent.crm.commit_failed",
                        session_id = %session.session_id,
                        error = %error,
                        "customer upsert failed"
                    );
                    return Some(CRM_WARNING.to_string());
                }
            }
        }

        let Some(customer) = session.customer.clone() else {
            return None;
        };

        let mut interests = draft.staged.interests.clone();
        // Passive capture: a catalog product named in the message counts
        // as interest even when the model never called the tool.
        if interests.is_empty() {
            let lowered = user_message.to_lowercase();
            if let Some(product) =
                self.deps.stock.products().find(|product| lowered.contains(&product.to_lowercase()))
            {
                interests.push(StagedInterest {
                    product: product.to_string(),
                    quoted_price: None,
                    quoted_days: None,
                });
            }
        }

        let mut failed = false;
        for interest in &interests {
            if let Err(error) = self
                .deps
                .interests
                .record(customer.id, &interest.product, interest.quoted_price, interest.quoted_days)
                .await
            {
                warn!(
                    event_name = "agent.crm.commit_failed",
                    session_id = %session.session_id,
                    product = %interest.product,
                    error = %error,
                    "interest event write failed"
                );
                failed = true;
            }
        }

        let tokens = (draft.usage.prompt_tokens + draft.usage.completion_tokens) as i64;
        if let Err(error) = self
            .deps
            .conversation_log
            .append(customer.id, user_message, &draft.reply, tokens, self.estimate_cost(draft.usage))
            .await
        {
            warn!(
                event_name = "agent.crm.commit_failed",
                session_id = %session.session_id,
                error = %error,
                "conversation log write failed"
            );
            failed = true;
        }

        failed.then(|| CRM_WARNING.to_string())
    }

    fn estimate_cost(&self, usage: TokenUsage) -> f64 {
        usage.prompt_tokens as f64 / 1000.0 * self.config.prompt_price_per_1k
            + usage.completion_tokens as f64 / 1000.0 * self.config.completion_price_per_1k
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tempfile::TempDir;

    use renta_core::calc::availability::StockTable;
    use renta_core::calc::pricing::RatePolicy;
    use renta_core::domain::conversation::TurnRole;
    use renta_core::errors::TurnError;
    use renta_core::profile::Profile;
    use renta_db::repositories::{InMemoryCrm, InterestRepository};
    use renta_retrieval::{build_or_load, ChunkSettings, DeterministicEmbeddingClient, Retriever};

    use super::{Dependencies, Orchestrator, OrchestratorConfig, TurnPhase};
    use crate::llm::{ChatMessage, ChatModel, ModelTurn, ScriptedChatModel};
    use crate::session::SessionStore;

    const CATALOG: &str = "\
ROTOMARTILLO TE-500: renta diaria L500, perforacion en concreto.
DEMOLEDOR TE-2000: renta diaria L800, demolicion pesada.
BAILARINA: compactadora de suelos, renta diaria L350.";

    fn test_config() -> OrchestratorConfig {
        OrchestratorConfig {
            profile: Profile::Balanced,
            max_planning_rounds: 5,
            max_tool_retries: 2,
            tool_timeout: Duration::from_secs(2),
            turn_timeout: Duration::from_secs(5),
            prompt_price_per_1k: 0.001,
            completion_price_per_1k: 0.002,
            default_lead_time_days: 1,
            business_days_only: true,
            holidays: Vec::new(),
        }
    }

    async fn retriever_fixture(dir: &TempDir) -> Arc<Retriever> {
        let source = dir.path().join("catalogo.md");
        tokio::fs::write(&source, CATALOG).await.expect("write catalog");

        let embedder = Arc::new(DeterministicEmbeddingClient::default());
        let index = build_or_load(
            &source,
            &dir.path().join("vectorstore"),
            ChunkSettings { chunk_size: 70, chunk_overlap: 15 },
            embedder.as_ref(),
        )
        .await
        .expect("build index");

        Arc::new(Retriever::new(index, embedder, 3, 5))
    }

    async fn orchestrator_with(
        dir: &TempDir,
        model: Arc<dyn ChatModel>,
        config: OrchestratorConfig,
    ) -> (Orchestrator, Arc<InMemoryCrm>) {
        let crm = Arc::new(InMemoryCrm::new());
        let deps = Dependencies {
            chat_model: model,
            retriever: retriever_fixture(dir).await,
            rate_policy: RatePolicy::standard(),
            stock: StockTable::standard(),
            customers: crm.clone(),
            interests: crm.clone(),
            conversation_log: crm.clone(),
        };
        let orchestrator = Orchestrator::new(deps, config, Arc::new(SessionStore::new(40)));
        (orchestrator, crm)
    }

    async fn orchestrator_fixture(
        dir: &TempDir,
        turns: Vec<ModelTurn>,
    ) -> (Orchestrator, Arc<InMemoryCrm>) {
        orchestrator_with(dir, Arc::new(ScriptedChatModel::new(turns)), test_config()).await
    }

    fn tool_results_of(request: &[ChatMessage]) -> Vec<&str> {
        request
            .iter()
            .filter_map(|message| match message {
                ChatMessage::ToolResult { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn name_disclosure_creates_customer_without_retrieval() {
        let dir = TempDir::new().expect("tempdir");
        let (orchestrator, crm) = orchestrator_fixture(
            &dir,
            vec![
                ScriptedChatModel::tool_calls(vec![(
                    "guardar_nombre_cliente",
                    json!({ "nombre": "Juan" }),
                )]),
                ScriptedChatModel::reply("¡Mucho gusto, Juan! ¿En qué puedo ayudarte hoy?"),
            ],
        )
        .await;

        let outcome = orchestrator
            .run_turn("s-1", "Hola, mi nombre es Juan", None)
            .await
            .expect("turn succeeds");

        assert!(outcome.reply.contains("Juan"));
        assert_eq!(outcome.tools_invoked, vec!["guardar_nombre_cliente"]);
        assert_eq!(outcome.customer_name.as_deref(), Some("Juan"));
        assert_eq!(outcome.phase, TurnPhase::Done);
        assert!(outcome.warning.is_none());

        assert_eq!(crm.customer_count().await, 1);
        assert!(crm.find_customer_by_name("Juan").await.is_some());
        // No product in the message, so no interest event.
        assert_eq!(crm.event_count().await, 0);
        assert_eq!(crm.logged_turn_count().await, 1);
    }

    #[tokio::test]
    async fn pricing_question_grounds_quotes_and_records_interest() {
        let dir = TempDir::new().expect("tempdir");
        let model = Arc::new(ScriptedChatModel::new(vec![
            ScriptedChatModel::tool_calls(vec![(
                "guardar_nombre_cliente",
                json!({ "nombre": "Juan" }),
            )]),
            ScriptedChatModel::reply("¡Mucho gusto, Juan!"),
            ScriptedChatModel::tool_calls(vec![
                ("buscar_info_producto", json!({ "producto": "rotomartillo" })),
                ("calcular_descuento", json!({ "precio": 500, "dias": 10 })),
            ]),
            ScriptedChatModel::reply(
                "El rotomartillo por 10 días cuesta L4,500.00 con 10% de descuento.",
            ),
        ]));
        let (orchestrator, crm) =
            orchestrator_with(&dir, model.clone(), test_config()).await;

        orchestrator.run_turn("s-1", "Hola, mi nombre es Juan", None).await.expect("first turn");
        let outcome = orchestrator
            .run_turn("s-1", "¿Cuánto cuesta rentar un rotomartillo por 10 días?", None)
            .await
            .expect("second turn");

        assert_eq!(outcome.tools_invoked, vec!["buscar_info_producto", "calcular_descuento"]);
        assert!(outcome.reply.contains("4,500"));

        // The quote fed back to the model matches the discount policy:
        // 500 * 10 days at the 10 % tier.
        let requests = model.recorded_requests().await;
        let final_request = requests.last().expect("final planning request");
        let results = tool_results_of(final_request);
        assert!(results.iter().any(|content| content.contains("rotomartillo")));
        assert!(results.iter().any(|content| {
            content.contains("\"total_con_descuento\":\"4500\"")
                && content.contains("\"descuento_porcentaje\":\"10\"")
        }));

        let customer = crm.find_customer_by_name("Juan").await.expect("customer exists");
        let events = crm.list_for_customer(customer.id).await.expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].product, "rotomartillo");
        assert_eq!(crm.logged_turn_count().await, 2);
    }

    #[tokio::test]
    async fn malformed_arguments_are_fed_back_for_a_reprompt() {
        let dir = TempDir::new().expect("tempdir");
        let model = Arc::new(ScriptedChatModel::new(vec![
            ScriptedChatModel::tool_calls(vec![(
                "calcular_descuento",
                json!({ "precio": "mucho", "dias": 10 }),
            )]),
            ScriptedChatModel::reply("¿Me confirmas la tarifa diaria del equipo?"),
        ]));
        let (orchestrator, crm) = orchestrator_with(&dir, model.clone(), test_config()).await;

        let outcome =
            orchestrator.run_turn("s-1", "cotiza algo", None).await.expect("turn succeeds");

        assert_eq!(outcome.reply, "¿Me confirmas la tarifa diaria del equipo?");
        assert!(outcome.tools_invoked.is_empty(), "rejected call must not dispatch");
        assert_eq!(crm.event_count().await, 0);

        let requests = model.recorded_requests().await;
        let results = tool_results_of(requests.last().expect("re-prompt request"));
        assert!(results.iter().any(|content| content.contains("invalid_arguments")));
    }

    #[tokio::test]
    async fn unknown_tool_names_are_rejected_not_dispatched() {
        let dir = TempDir::new().expect("tempdir");
        let model = Arc::new(ScriptedChatModel::new(vec![
            ScriptedChatModel::tool_calls(vec![("formatear_disco", json!({}))]),
            ScriptedChatModel::reply("Disculpa, intentemos de otra forma."),
        ]));
        let (orchestrator, _crm) = orchestrator_with(&dir, model.clone(), test_config()).await;

        let outcome = orchestrator.run_turn("s-1", "hola", None).await.expect("turn succeeds");

        assert!(outcome.tools_invoked.is_empty());
        let requests = model.recorded_requests().await;
        let results = tool_results_of(requests.last().expect("re-prompt request"));
        assert!(results.iter().any(|content| content.contains("unknown_tool")));
    }

    #[tokio::test]
    async fn reprompt_budget_is_bounded() {
        let dir = TempDir::new().expect("tempdir");
        let bad_round = || {
            ScriptedChatModel::tool_calls(vec![(
                "calcular_descuento",
                json!({ "precio": "mucho", "dias": 10 }),
            )])
        };
        let (orchestrator, _crm) =
            orchestrator_fixture(&dir, vec![bad_round(), bad_round(), bad_round()]).await;

        let outcome = orchestrator.run_turn("s-1", "cotiza", None).await.expect("turn succeeds");

        assert!(outcome.reply.contains("herramientas"));
        assert!(outcome.tools_invoked.is_empty());
    }

    #[tokio::test]
    async fn tool_failure_is_surfaced_into_planning_not_fatal() {
        let dir = TempDir::new().expect("tempdir");
        let model = Arc::new(ScriptedChatModel::new(vec![
            ScriptedChatModel::tool_calls(vec![(
                "verificar_disponibilidad",
                json!({ "equipo": "excavadora" }),
            )]),
            ScriptedChatModel::reply("Lo siento, no manejamos excavadoras en el catálogo."),
        ]));
        let (orchestrator, _crm) = orchestrator_with(&dir, model.clone(), test_config()).await;

        let outcome = orchestrator.run_turn("s-1", "¿tienen excavadoras?", None).await.expect("turn");

        assert_eq!(outcome.tools_invoked, vec!["verificar_disponibilidad"]);
        assert!(outcome.reply.contains("excavadoras"));

        let requests = model.recorded_requests().await;
        let results = tool_results_of(requests.last().expect("follow-up request"));
        assert!(results.iter().any(|content| content.contains("product_not_found")));
    }

    #[tokio::test]
    async fn retrieval_outage_degrades_to_an_ungrounded_reply() {
        use renta_retrieval::{EmbeddingClient, EmbeddingError};

        struct OfflineEmbedder;

        #[async_trait::async_trait]
        impl EmbeddingClient for OfflineEmbedder {
            async fn embed_documents(
                &self,
                _texts: &[String],
            ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
                Err(EmbeddingError::RetryExhausted {
                    attempts: 3,
                    last_error: "connection refused".to_string(),
                })
            }

            async fn embed_query(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
                Err(EmbeddingError::RetryExhausted {
                    attempts: 3,
                    last_error: "connection refused".to_string(),
                })
            }

            fn model(&self) -> &str {
                "deterministic-hash"
            }
        }

        let dir = TempDir::new().expect("tempdir");
        let source = dir.path().join("catalogo.md");
        tokio::fs::write(&source, CATALOG).await.expect("write catalog");
        let index = build_or_load(
            &source,
            &dir.path().join("vectorstore"),
            ChunkSettings { chunk_size: 70, chunk_overlap: 15 },
            &DeterministicEmbeddingClient::default(),
        )
        .await
        .expect("build index");

        let model = Arc::new(ScriptedChatModel::new(vec![
            ScriptedChatModel::tool_calls(vec![(
                "buscar_info_producto",
                json!({ "producto": "rotomartillo" }),
            )]),
            ScriptedChatModel::reply(
                "Ahora mismo no puedo consultar el catálogo, pero con gusto te oriento.",
            ),
        ]));
        let crm = Arc::new(InMemoryCrm::new());
        let deps = Dependencies {
            chat_model: model.clone(),
            retriever: Arc::new(Retriever::new(index, Arc::new(OfflineEmbedder), 3, 5)),
            rate_policy: RatePolicy::standard(),
            stock: StockTable::standard(),
            customers: crm.clone(),
            interests: crm.clone(),
            conversation_log: crm.clone(),
        };
        let orchestrator =
            Orchestrator::new(deps, test_config(), Arc::new(SessionStore::new(40)));

        let outcome = orchestrator
            .run_turn("s-1", "¿qué rotomartillos tienen?", None)
            .await
            .expect("turn still succeeds without grounding");

        assert!(outcome.reply.contains("catálogo"));
        let requests = model.recorded_requests().await;
        let results = tool_results_of(requests.last().expect("follow-up request"));
        assert!(results.iter().any(|content| content.contains("retrieval_unavailable")));
    }

    #[tokio::test]
    async fn delivery_tool_defaults_to_the_configured_lead_time() {
        let dir = TempDir::new().expect("tempdir");
        let model = Arc::new(ScriptedChatModel::new(vec![
            ScriptedChatModel::tool_calls(vec![(
                "calcular_fecha_entrega",
                json!({ "dias_renta": 7 }),
            )]),
            ScriptedChatModel::reply("Tu equipo llega el próximo día hábil."),
        ]));
        let (orchestrator, _crm) = orchestrator_with(&dir, model.clone(), test_config()).await;

        let outcome =
            orchestrator.run_turn("s-1", "¿cuándo me lo entregan?", None).await.expect("turn");

        assert_eq!(outcome.tools_invoked, vec!["calcular_fecha_entrega"]);
        let requests = model.recorded_requests().await;
        let results = tool_results_of(requests.last().expect("follow-up request"));
        // test_config sets a one-day standard lead time and business days.
        assert!(results.iter().any(|content| {
            content.contains("\"dias_anticipacion\":1")
                && content.contains("\"fecha_entrega\"")
                && content.contains("\"fecha_devolucion\"")
        }));
    }

    #[tokio::test]
    async fn crm_tools_dispatch_after_retrieval_within_a_round() {
        let dir = TempDir::new().expect("tempdir");
        let (orchestrator, _crm) = orchestrator_fixture(
            &dir,
            vec![
                // Model proposes the CRM write first; dispatch order must
                // still put retrieval ahead of it.
                ScriptedChatModel::tool_calls(vec![
                    ("registrar_interes", json!({ "producto": "rotomartillo" })),
                    ("buscar_info_producto", json!({ "producto": "rotomartillo" })),
                ]),
                ScriptedChatModel::reply("Listo."),
            ],
        )
        .await;

        let outcome = orchestrator.run_turn("s-1", "me interesa", None).await.expect("turn");

        assert_eq!(outcome.tools_invoked, vec!["buscar_info_producto", "registrar_interes"]);
    }

    #[tokio::test]
    async fn planning_round_budget_yields_limit_reply() {
        let dir = TempDir::new().expect("tempdir");
        let search_round = || {
            ScriptedChatModel::tool_calls(vec![(
                "buscar_info_producto",
                json!({ "producto": "rotomartillo" }),
            )])
        };
        let mut config = test_config();
        config.max_planning_rounds = 2;
        let (orchestrator, _crm) = orchestrator_with(
            &dir,
            Arc::new(ScriptedChatModel::new(vec![search_round(), search_round()])),
            config,
        )
        .await;

        let outcome = orchestrator.run_turn("s-1", "dame todo", None).await.expect("turn");

        assert!(outcome.reply.contains("límite de iteraciones"));
        assert_eq!(outcome.tools_invoked.len(), 2);
    }

    #[tokio::test]
    async fn turn_timeout_leaves_session_and_crm_untouched() {
        let dir = TempDir::new().expect("tempdir");
        let model = Arc::new(
            ScriptedChatModel::new(vec![ScriptedChatModel::reply("tarde")])
                .with_delay(Duration::from_millis(250)),
        );
        let (orchestrator, crm) = orchestrator_with(&dir, model, test_config()).await;

        let result = orchestrator
            .run_turn("s-1", "hola", Some(Duration::from_millis(20)))
            .await;

        assert!(matches!(result, Err(TurnError::Timeout { .. })));
        assert_eq!(crm.customer_count().await, 0);

        let handle = orchestrator.sessions().get_or_create("s-1").await;
        let session = handle.lock().await;
        assert!(session.messages.is_empty(), "no partial history on timeout");
        assert_eq!(session.stats.total_messages, 0);
    }

    #[tokio::test]
    async fn model_failure_before_reply_means_no_crm_writes() {
        let dir = TempDir::new().expect("tempdir");
        // The script ends after the tool round, so the follow-up model
        // call fails before any reply exists.
        let (orchestrator, crm) = orchestrator_fixture(
            &dir,
            vec![ScriptedChatModel::tool_calls(vec![(
                "guardar_nombre_cliente",
                json!({ "nombre": "Ana" }),
            )])],
        )
        .await;

        let result = orchestrator.run_turn("s-1", "soy Ana", None).await;

        assert!(matches!(result, Err(TurnError::ModelUnavailable(_))));
        assert_eq!(crm.customer_count().await, 0, "staged write must not commit");

        let handle = orchestrator.sessions().get_or_create("s-1").await;
        assert!(handle.lock().await.messages.is_empty());
    }

    #[tokio::test]
    async fn persistence_failure_still_returns_the_reply_with_a_warning() {
        let dir = TempDir::new().expect("tempdir");
        let (orchestrator, crm) = orchestrator_fixture(
            &dir,
            vec![
                ScriptedChatModel::tool_calls(vec![(
                    "guardar_nombre_cliente",
                    json!({ "nombre": "Ana" }),
                )]),
                ScriptedChatModel::reply("¡Bienvenida, Ana!"),
            ],
        )
        .await;
        crm.set_fail_writes(true);

        let outcome = orchestrator.run_turn("s-1", "soy Ana", None).await.expect("turn succeeds");

        assert_eq!(outcome.reply, "¡Bienvenida, Ana!");
        assert!(outcome.warning.is_some());
        assert_eq!(crm.customer_count().await, 0);

        // The reply is still committed to the session history.
        let handle = orchestrator.sessions().get_or_create("s-1").await;
        assert_eq!(handle.lock().await.messages.len(), 2);
    }

    #[tokio::test]
    async fn usage_and_cost_accumulate_on_the_session() {
        let dir = TempDir::new().expect("tempdir");
        let (orchestrator, _crm) = orchestrator_fixture(
            &dir,
            vec![
                ScriptedChatModel::tool_calls(vec![(
                    "buscar_info_producto",
                    json!({ "producto": "bailarina" }),
                )]),
                ScriptedChatModel::reply("La bailarina renta a L350 por día."),
            ],
        )
        .await;

        let outcome = orchestrator.run_turn("s-1", "¿y la bailarina?", None).await.expect("turn");

        // One tool round (120/18) plus the final reply (100/25).
        assert_eq!(outcome.tokens_used, 263);
        let expected_cost = 220.0 / 1000.0 * 0.001 + 43.0 / 1000.0 * 0.002;
        assert!((outcome.cost_usd - expected_cost).abs() < 1e-12);
        assert_eq!(outcome.stats.total_messages, 1);
        assert_eq!(outcome.stats.tools_used, 1);
        assert!(outcome.stats.elapsed_secs > 0.0);
    }

    #[tokio::test]
    async fn first_contact_instruction_disappears_once_identified() {
        let dir = TempDir::new().expect("tempdir");
        let model = Arc::new(ScriptedChatModel::new(vec![
            ScriptedChatModel::tool_calls(vec![(
                "guardar_nombre_cliente",
                json!({ "nombre": "Juan" }),
            )]),
            ScriptedChatModel::reply("¡Mucho gusto, Juan!"),
            ScriptedChatModel::reply("Claro, tenemos varios equipos."),
        ]));
        let (orchestrator, _crm) = orchestrator_with(&dir, model.clone(), test_config()).await;

        orchestrator.run_turn("s-1", "Hola, soy Juan", None).await.expect("first turn");
        orchestrator.run_turn("s-1", "¿qué equipos tienen?", None).await.expect("second turn");

        let requests = model.recorded_requests().await;
        let system_count = |request: &[ChatMessage]| {
            request
                .iter()
                .filter(|message| matches!(message, ChatMessage::System { .. }))
                .count()
        };

        assert_eq!(system_count(&requests[0]), 2, "ask-for-name instruction present");
        assert_eq!(system_count(requests.last().expect("last request")), 1);
    }

    #[tokio::test]
    async fn concurrent_turns_for_one_session_serialize_in_order() {
        let dir = TempDir::new().expect("tempdir");
        let model = Arc::new(
            ScriptedChatModel::new(vec![
                ScriptedChatModel::reply("primera respuesta"),
                ScriptedChatModel::reply("segunda respuesta"),
            ])
            .with_delay(Duration::from_millis(30)),
        );
        let (orchestrator, _crm) = orchestrator_with(&dir, model, test_config()).await;
        let orchestrator = Arc::new(orchestrator);

        let first = {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.run_turn("s-1", "uno", None).await })
        };
        let second = {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.run_turn("s-1", "dos", None).await })
        };
        first.await.expect("join").expect("turn one");
        second.await.expect("join").expect("turn two");

        let handle = orchestrator.sessions().get_or_create("s-1").await;
        let session = handle.lock().await;
        assert_eq!(session.messages.len(), 4);
        let roles: Vec<TurnRole> = session.messages.iter().map(|message| message.role).collect();
        assert_eq!(
            roles,
            vec![TurnRole::User, TurnRole::Assistant, TurnRole::User, TurnRole::Assistant]
        );
        assert_eq!(session.stats.total_messages, 2);
    }
}
