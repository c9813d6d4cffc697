//! The Ask DAF question-answering loop
//!
//! A question goes through intent classification, optional document
//! retrieval, a bounded LLM tool-calling loop over the finance tools, and
//! response validation. Greetings, help requests and out-of-scope questions
//! are answered without calling the model.

pub mod conversation;
pub mod prompts;

pub use conversation::ConversationStore;
pub use prompts::{build_system_prompt, canned_answer, PromptContext};

use crate::ask_span;
use crate::config::AssistantConfig;
use crate::error::{AssistantError, AssistantResult};
use crate::intent::{Intent, IntentClassification, IntentClassifier};
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, LlmProvider, Message, TokenUsage, ToolCall, ToolChoice,
};
use crate::observability::metrics::metrics;
use crate::rag::{extract_citations, Citation, RagAnswerContext, RagPipeline, Source};
use crate::tools::ToolSystem;
use crate::validation::{Evidence, ResponseValidator, ValidationPolicy, ValidationReport};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

const DOCUMENT_SEARCH_TOOL: &str = "search_documents";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    pub question: String,
    /// Continue an existing conversation; a new id is generated when absent
    #[serde(default)]
    pub conversation_id: Option<String>,
}

impl AskRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            conversation_id: None,
        }
    }

    pub fn in_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }
}

/// One tool call made while answering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: Value,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub intent: IntentClassification,
    pub citations: Vec<Citation>,
    pub sources: Vec<Source>,
    pub tool_invocations: Vec<ToolInvocation>,
    /// Absent for canned answers
    pub validation: Option<ValidationReport>,
    pub usage: TokenUsage,
    pub conversation_id: String,
    pub retried: bool,
}

/// State accumulated across the LLM round trips of one question
struct Turn {
    evidence: Evidence,
    invocations: Vec<ToolInvocation>,
    usage: TokenUsage,
    tool_calls_made: u32,
    /// LLM round trips, validation retries included
    iterations: u32,
}

impl Turn {
    fn new(classification: &IntentClassification, question: &str, rag: Option<&RagAnswerContext>) -> Self {
        let mut evidence = Evidence::new(question, classification.intent);
        if let Some(rag) = rag {
            evidence.sources = rag.sources.clone();
        }
        Self {
            evidence,
            invocations: Vec::new(),
            usage: TokenUsage::default(),
            tool_calls_made: 0,
            iterations: 0,
        }
    }
}

pub struct AskDaf {
    config: Arc<AssistantConfig>,
    llm: Arc<dyn LlmProvider>,
    tools: Arc<ToolSystem>,
    rag: Option<Arc<RagPipeline>>,
    classifier: IntentClassifier,
    validator: ResponseValidator,
    policy: ValidationPolicy,
    conversations: ConversationStore,
}

impl AskDaf {
    pub fn new(
        config: Arc<AssistantConfig>,
        llm: Arc<dyn LlmProvider>,
        tools: Arc<ToolSystem>,
        rag: Option<Arc<RagPipeline>>,
    ) -> Self {
        let policy = ValidationPolicy::for_language(&config.assistant.language);
        let conversations = ConversationStore::new(config.assistant.history_messages);
        Self {
            config,
            llm,
            tools,
            rag,
            classifier: IntentClassifier::new(),
            validator: ResponseValidator::new(),
            policy,
            conversations,
        }
    }

    pub fn with_policy(mut self, policy: ValidationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn llm(&self) -> &Arc<dyn LlmProvider> {
        &self.llm
    }

    pub fn tools(&self) -> &Arc<ToolSystem> {
        &self.tools
    }

    pub fn rag(&self) -> Option<&Arc<RagPipeline>> {
        self.rag.as_ref()
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    pub async fn ask(&self, request: AskRequest) -> AssistantResult<AskResponse> {
        metrics().question_received();
        let question = request.question.trim().to_string();

        if let Err(e) = self.check_question(&question) {
            metrics().question_rejected();
            return Err(e);
        }

        let conversation_id = request
            .conversation_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let span = ask_span!(conversation_id = %conversation_id);
        let start = Instant::now();
        let result = self
            .answer(&question, &conversation_id)
            .instrument(span)
            .await;

        match &result {
            Ok(response) => {
                metrics().question_answered(start.elapsed());
                metrics().tokens_consumed(response.usage.total_tokens);
            }
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "Question failed");
                metrics().question_failed(start.elapsed());
            }
        }
        result
    }

    fn check_question(&self, question: &str) -> AssistantResult<()> {
        if question.is_empty() {
            return Err(AssistantError::invalid_input("Question must not be empty"));
        }
        let max_chars = self.config.assistant.max_question_chars;
        let chars = question.chars().count();
        if chars > max_chars {
            return Err(AssistantError::invalid_input(format!(
                "Question is too long ({chars} characters, maximum {max_chars})"
            )));
        }
        Ok(())
    }

    async fn answer(&self, question: &str, conversation_id: &str) -> AssistantResult<AskResponse> {
        let classification = self.classifier.classify(question);
        metrics().intent_classified(classification.intent.as_str());
        info!(
            intent = %classification.intent,
            confidence = classification.confidence,
            "Question classified"
        );

        if let Some(answer) = canned_answer(classification.intent, &self.config.assistant.language) {
            metrics().canned_answer();
            self.conversations
                .record_exchange(conversation_id, question, answer)
                .await;
            return Ok(AskResponse {
                answer: answer.to_string(),
                intent: classification,
                citations: Vec::new(),
                sources: Vec::new(),
                tool_invocations: Vec::new(),
                validation: None,
                usage: TokenUsage::default(),
                conversation_id: conversation_id.to_string(),
                retried: false,
            });
        }

        let rag_context = self.retrieve_context(question, classification.intent).await;
        let system_prompt = build_system_prompt(&PromptContext {
            persona: self.config.llm.system_prompt.as_deref(),
            organization: self.config.assistant.organization.as_deref(),
            language: &self.config.assistant.language,
            currency: &self.config.assistant.currency,
            today: self.tools.context().as_of(),
            classification: &classification,
            rag: rag_context.as_ref(),
        });

        let mut messages = vec![Message::system(system_prompt)];
        messages.extend(self.conversations.history(conversation_id).await);
        messages.push(Message::user(question));

        let mut turn = Turn::new(&classification, question, rag_context.as_ref());
        let mut answer = self.run_tool_loop(&mut messages, &mut turn).await?;
        let mut report = self.validator.validate(&answer, &turn.evidence);
        let mut retries = 0;

        let max_iterations = self.config.budget.max_iterations.max(1);
        while turn.iterations < max_iterations && self.policy.should_retry(&report, retries) {
            retries += 1;
            metrics().validation_retry();
            info!(issues = report.issues.len(), "Answer failed validation, retrying");

            messages.push(Message::assistant(answer.clone()));
            messages.push(Message::user(self.policy.corrective_message(&report)));
            match self.run_tool_loop(&mut messages, &mut turn).await {
                Ok(retried) => {
                    answer = retried;
                    report = self.validator.validate(&answer, &turn.evidence);
                }
                Err(e) => {
                    warn!(error = %e, "Retry failed, keeping the first answer");
                    break;
                }
            }
        }

        let citations = extract_citations(&answer, &turn.evidence.sources).citations;
        if !report.is_valid {
            metrics().disclaimer_added();
            answer = self.policy.with_disclaimer(&answer);
        }

        self.conversations
            .record_exchange(conversation_id, question, &answer)
            .await;

        info!(
            tool_calls = turn.tool_calls_made,
            valid = report.is_valid,
            confidence = report.confidence,
            total_tokens = turn.usage.total_tokens,
            "Question answered"
        );

        Ok(AskResponse {
            answer,
            intent: classification,
            citations,
            sources: turn.evidence.sources,
            tool_invocations: turn.invocations,
            validation: Some(report),
            usage: turn.usage,
            conversation_id: conversation_id.to_string(),
            retried: retries > 0,
        })
    }

    /// Document context for document questions, and for data questions
    /// when documents exist. Retrieval failures degrade to no context.
    async fn retrieve_context(&self, question: &str, intent: Intent) -> Option<RagAnswerContext> {
        let rag = self.rag.as_ref()?;

        let wanted = match intent {
            Intent::DocumentQuestion => true,
            intent if intent.is_data_intent() || intent == Intent::Unknown => {
                rag.has_documents().await.unwrap_or(false)
            }
            _ => false,
        };
        if !wanted {
            return None;
        }

        match rag.query(question, rag.default_options()).await {
            Ok(context) if !context.is_empty() => {
                debug!(sources = context.sources.len(), "Retrieved document context");
                Some(context)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Document retrieval failed, answering without context");
                None
            }
        }
    }

    fn completion_request(&self, messages: &[Message], final_round: bool) -> CompletionRequest {
        let mut request = CompletionRequest::new(self.config.llm.model.clone(), messages.to_vec());
        request.max_tokens = self.config.llm.max_tokens;
        request.temperature = self.config.llm.temperature;

        // Tool traffic already in the history needs the tools declared
        let tools = self.tools.descriptions();
        if !tools.is_empty() {
            request.tools = Some(tools);
            request.tool_choice = Some(if final_round {
                ToolChoice::None
            } else {
                ToolChoice::Auto
            });
        }
        request
    }

    /// Run LLM round trips until the model answers in text.
    ///
    /// On the last allowed iteration, and once the tool call budget is
    /// spent, tools stay declared with `tool_choice` none so the model
    /// answers from the evidence gathered so far. Iterations are counted on
    /// the turn, so a validation retry shares the budget.
    async fn run_tool_loop(&self, messages: &mut Vec<Message>, turn: &mut Turn) -> AssistantResult<String> {
        let budget = &self.config.budget;
        let max_iterations = budget.max_iterations.max(1);

        loop {
            if turn.iterations >= max_iterations {
                return Err(AssistantError::budget_exceeded("iteration", max_iterations));
            }
            turn.iterations += 1;
            let final_round =
                turn.iterations >= max_iterations || turn.tool_calls_made >= budget.max_tool_calls;

            let request = self.completion_request(messages, final_round);
            let response: CompletionResponse = self
                .llm
                .complete(request)
                .await
                .map_err(|e| AssistantError::llm_error(e.to_string()))?;
            turn.usage.accumulate(&response.usage);

            let content = response.content.unwrap_or_default();
            let tool_calls = match response.tool_calls {
                Some(calls) if !calls.is_empty() => calls,
                _ => return Ok(content.trim().to_string()),
            };

            if final_round {
                // Calls past the budget are ignored; keep any text that came with them
                if !content.trim().is_empty() {
                    warn!(ignored = tool_calls.len(), "Tool calls past the budget ignored");
                    return Ok(content.trim().to_string());
                }
                return Err(if turn.iterations >= max_iterations {
                    AssistantError::budget_exceeded("iteration", max_iterations)
                } else {
                    AssistantError::budget_exceeded("tool call", budget.max_tool_calls)
                });
            }

            debug!(iteration = turn.iterations, tool_count = tool_calls.len(), "Processing tool calls");
            messages.push(Message::assistant_with_tool_calls(content, tool_calls.clone()));
            for call in &tool_calls {
                let content = self.execute_tool_call(call, turn).await;
                messages.push(Message::tool_result(call.id.clone(), content));
            }
        }
    }

    /// Execute one call and render its result for the model; failures are
    /// returned to the model as an error object
    async fn execute_tool_call(&self, call: &ToolCall, turn: &mut Turn) -> String {
        if turn.tool_calls_made >= self.config.budget.max_tool_calls {
            return json!({
                "error": format!(
                    "tool call budget of {} exhausted, answer with the data already available",
                    self.config.budget.max_tool_calls
                )
            })
            .to_string();
        }
        turn.tool_calls_made += 1;
        turn.evidence.tools_called += 1;

        let start = Instant::now();
        let result = self.tools.execute_tool(&call.name, &call.arguments).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(mut output) => {
                if call.name == DOCUMENT_SEARCH_TOOL {
                    number_document_results(&mut output, &mut turn.evidence.sources);
                }
                turn.invocations.push(ToolInvocation {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    success: true,
                    error: None,
                    duration_ms,
                });
                let content = output.to_string();
                turn.evidence.tool_results.push(output);
                content
            }
            Err(e) => {
                turn.invocations.push(ToolInvocation {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    success: false,
                    error: Some(e.to_string()),
                    duration_ms,
                });
                json!({ "error": e.to_string() }).to_string()
            }
        }
    }
}

/// Give each `search_documents` passage the next source number and record
/// it as a citable source
fn number_document_results(output: &mut Value, sources: &mut Vec<Source>) {
    let Some(results) = output.get_mut("results").and_then(Value::as_array_mut) else {
        return;
    };

    for result in results.iter_mut() {
        let number = sources.len() + 1;
        let text = |key: &str| result.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
        let source = Source {
            number,
            document_id: text("document_id"),
            document_title: text("document_title"),
            chunk_index: result.get("chunk_index").and_then(Value::as_u64).unwrap_or_default() as usize,
            content: text("content"),
            score: result.get("score").and_then(Value::as_f64).unwrap_or_default() as f32,
        };
        sources.push(source);
        result["source"] = json!(number);
    }
}
