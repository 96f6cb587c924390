//! 意图路由与编排
//!
//! 每轮对话先识别意图，再分派到需求生成、文档问答、深度调研或普通对话；
//! 组合意图按顺序执行，前一步的结果作为后一步的上下文。

pub mod chart;
pub mod intent;
pub mod roles;

use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::llm::{LlmGateway, TextStream};
use crate::memory::ConversationMemory;
use crate::rag::chain::SourceRef;
use crate::rag::{HybridRetrievalChain, RagResponse, RagStatus};
use crate::requirements::{
    GenerationStatus, RequirementsGenerator, RequirementsResult, extract_entities_for_storage,
};
use crate::research::types::ReportPaths;
use crate::research::{DeepResearchWorkflow, ResearchState, ResearchStatus};
use crate::utils::{preview, truncate_chars};

pub use chart::{DiagramType, MermaidChartTool, detect_diagram_type, should_generate_chart};
pub use intent::{Intent, IntentPlan};
pub use roles::Role;

const INTENT_PROMPT: &str = r#"You are an intent classifier for a Requirements Analysis Agent Assistant.

Analyze the user's input and determine which intents it involves. Available intents:
1. rag_qa - questions about uploaded documents or document-based answers
2. deep_research - in-depth research on a specific domain or topic
3. requirements_generation - generate, refine, or discuss software requirements
4. general_chat - general conversation, greetings, or unclear intent

Multiple intents are combined with '+' in execution order, for example:
- "Based on the uploaded specs, generate requirements for the login module" -> rag_qa+requirements_generation
- "Research authentication best practices and create requirements" -> deep_research+requirements_generation
- "What does the document say about user roles?" -> rag_qa
- "Generate requirements for a payment system" -> requirements_generation

Respond with ONLY the intent pattern. No explanation."#;

const GENERAL_CHAT_PROMPT: &str = r#"You are a helpful Requirements Analysis Agent Assistant.

You help project managers with:
- Software requirements generation (ISO 29148, IEEE-830)
- Document-based Q&A
- Deep domain research

Respond helpfully to the user's message. If they seem unclear about what you can do, explain your capabilities."#;

const RESEARCH_PREVIEW_CHARS: usize = 2000;

/// 一轮对话的处理结果
#[derive(Debug, Clone, Serialize)]
pub struct TurnResult {
    pub response: String,
    pub intent: String,
    pub chain_of_thought: Vec<String>,
    pub report_paths: ReportPaths,
    pub mermaid_chart: Option<String>,
}

/// 单轮处理过程中的可变上下文
struct Turn<'a> {
    input: &'a str,
    role: Role,
    focus: String,
    history: String,
    thoughts: Vec<String>,
    report_paths: ReportPaths,
    mermaid_chart: Option<String>,
}

impl Turn<'_> {
    fn think(&mut self, thought: String) {
        info!("💭 {}", thought);
        self.thoughts.push(thought);
    }
}

enum RagStep {
    NoDocuments,
    Answered {
        answer: String,
        sources: Vec<SourceRef>,
    },
}

#[derive(Default)]
struct MixedResults {
    rag: Option<RagStep>,
    research: Option<ResearchState>,
    requirements: Option<String>,
    errors: Vec<(Intent, String)>,
}

pub struct Orchestrator {
    llm: Arc<dyn LlmGateway>,
    memory: Arc<Mutex<ConversationMemory>>,
    chain: Arc<HybridRetrievalChain>,
    research: Arc<DeepResearchWorkflow>,
    requirements: Arc<RequirementsGenerator>,
    charts: MermaidChartTool,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmGateway>,
        memory: ConversationMemory,
        chain: Arc<HybridRetrievalChain>,
        research: Arc<DeepResearchWorkflow>,
        requirements: Arc<RequirementsGenerator>,
    ) -> Self {
        Self {
            charts: MermaidChartTool::new(llm.clone()),
            llm,
            memory: Arc::new(Mutex::new(memory)),
            chain,
            research,
            requirements,
        }
    }

    pub fn memory(&self) -> &Arc<Mutex<ConversationMemory>> {
        &self.memory
    }

    pub fn chain(&self) -> &Arc<HybridRetrievalChain> {
        &self.chain
    }

    pub async fn clear_memory(&self) {
        self.memory.lock().await.clear();
    }

    /// 只做意图识别，供调用方决定是否走流式对话
    ///
    /// 分类失败或输出无法识别时返回`general_chat`。
    pub async fn detect_intent(&self, user_input: &str, role: Role, has_files: bool) -> IntentPlan {
        let user_prompt = format!(
            "User role: {}\nUser input: {}\nHas uploaded files: {}",
            role,
            user_input,
            if has_files { "yes" } else { "no" }
        );
        match self.llm.complete(INTENT_PROMPT, &user_prompt, Some(0.0)).await {
            Ok(raw) => IntentPlan::parse(&raw),
            Err(e) => {
                warn!("⚠️ 意图识别失败，按普通对话处理: {}", e);
                IntentPlan::Single(Intent::GeneralChat)
            }
        }
    }

    /// 处理一轮对话，分支内的错误转为`**[Error]**`响应
    pub async fn process(
        &self,
        user_input: &str,
        role: Role,
        has_files: bool,
        focus: Option<&str>,
    ) -> TurnResult {
        let plan = self.detect_intent(user_input, role, has_files).await;
        self.process_plan(&plan, user_input, role, focus).await
    }

    /// 按已识别的意图执行一轮对话
    pub async fn process_plan(
        &self,
        plan: &IntentPlan,
        user_input: &str,
        role: Role,
        focus: Option<&str>,
    ) -> TurnResult {
        let history = self.memory.lock().await.conversation_context();
        let mut turn = Turn {
            input: user_input,
            role,
            focus: focus
                .filter(|f| !f.trim().is_empty())
                .unwrap_or(user_input)
                .to_string(),
            history,
            thoughts: Vec::new(),
            report_paths: ReportPaths::default(),
            mermaid_chart: None,
        };

        let response = match plan {
            IntentPlan::Mixed(steps) => {
                turn.think(format!(
                    "Detected MIXED intent '{}' -> workflow: {}",
                    plan,
                    join_steps(steps, " -> ")
                ));
                self.run_mixed(&mut turn, steps).await
            }
            IntentPlan::Single(intent) => {
                turn.think(format!(
                    "Detected single intent '{}' for input '{}'",
                    intent,
                    preview(user_input, 50)
                ));
                self.run_single(&mut turn, *intent).await
            }
        };

        TurnResult {
            response,
            intent: plan.to_string(),
            chain_of_thought: turn.thoughts,
            report_paths: turn.report_paths,
            mermaid_chart: turn.mermaid_chart,
        }
    }

    async fn run_single(&self, turn: &mut Turn<'_>, intent: Intent) -> String {
        let outcome = match intent {
            Intent::RequirementsGeneration => self.handle_requirements(turn).await,
            Intent::RagQa => self.handle_rag(turn).await,
            Intent::DeepResearch => self.handle_research(turn).await,
            Intent::GeneralChat => self.handle_general_chat(turn).await,
        };

        outcome.unwrap_or_else(|e| {
            error!("❌ {} 处理失败: {}", intent, e);
            turn.think(format!("Error in {}: {}", intent, e));
            let action = match intent {
                Intent::RequirementsGeneration => "generate requirements",
                Intent::RagQa => "answer from documents",
                Intent::DeepResearch => "conduct research",
                Intent::GeneralChat => "process request",
            };
            format!("**[Error]** Failed to {}: {}", action, e)
        })
    }

    async fn handle_requirements(&self, turn: &mut Turn<'_>) -> Result<String> {
        turn.think(format!(
            "Generating requirements as {} for focus '{}'",
            turn.role,
            preview(&turn.focus, 50)
        ));
        let focus = turn.focus.clone();
        let content = self.draft_requirements(turn, &focus).await?;

        let mut response = format!(
            "**[Requirements Generation Mode - {}]**\n\n{}",
            turn.role, content
        );
        if let Some((diagram_type, code)) = self.chart_if_requested(turn, &content).await {
            response.push_str(&format!(
                "\n\n---\n\n**📊 Generated {} Diagram:**\n\n{}",
                diagram_type.title(),
                code
            ));
        }

        self.memory.lock().await.save_turn(turn.input, &content).await;
        turn.think(format!(
            "Requirements generated successfully, {} chars",
            content.chars().count()
        ));
        Ok(response)
    }

    async fn handle_rag(&self, turn: &mut Turn<'_>) -> Result<String> {
        turn.think(format!(
            "Processing RAG Q&A for query '{}'",
            preview(turn.input, 50)
        ));
        let result = self.chain.query(turn.input, &turn.history).await;

        match result.status {
            RagStatus::NoIndex => {
                turn.think("No documents indexed, returning early".to_string());
                return Ok(
                    "**[RAG Q&A Mode]**\n\n⚠️ No documents have been indexed yet. Please index documents first."
                        .to_string(),
                );
            }
            RagStatus::Error => {
                anyhow::bail!(result.error.unwrap_or_else(|| result.answer.clone()))
            }
            RagStatus::Success => {}
        }

        let response = format_rag_response(&result);
        self.memory
            .lock()
            .await
            .save_turn(turn.input, &result.answer)
            .await;
        turn.think(format!(
            "RAG Q&A completed, found {} sources via {}",
            result.sources.len(),
            result.search_methods.join(", ")
        ));
        Ok(response)
    }

    async fn handle_research(&self, turn: &mut Turn<'_>) -> Result<String> {
        turn.think(format!(
            "Starting deep research for '{}'",
            preview(turn.input, 50)
        ));
        let state = self.research.run(turn.input).await;

        let response = match state.status {
            ResearchStatus::Complete => {
                turn.think(format!(
                    "Deep research completed, {} tasks executed",
                    state.tasks.len()
                ));
                turn.report_paths = state.paths.clone();
                format_research_response(&state)
            }
            ResearchStatus::Error => {
                // 失败的调研不写入对话记忆
                turn.think(format!("Research failed - {}", state.error));
                return Ok(format!(
                    "**[Deep Research Mode]**\n\n❌ Research failed: {}",
                    state.error
                ));
            }
            other => format!(
                "**[Deep Research Mode]**\n\n⚠️ Research completed with status: {:?}",
                other
            ),
        };

        self.memory.lock().await.save_turn(turn.input, &response).await;
        Ok(response)
    }

    async fn handle_general_chat(&self, turn: &mut Turn<'_>) -> Result<String> {
        turn.think(format!(
            "Processing general chat for '{}'",
            preview(turn.input, 50)
        ));
        let content = self
            .llm
            .complete(GENERAL_CHAT_PROMPT, turn.input, None)
            .await?;
        self.memory.lock().await.save_turn(turn.input, &content).await;
        turn.think(format!(
            "General chat completed, {} chars response",
            content.chars().count()
        ));
        Ok(content)
    }

    /// 组合意图：逐步执行，单步失败记录后继续，最后汇总一次响应
    async fn run_mixed(&self, turn: &mut Turn<'_>, steps: &[Intent]) -> String {
        let mut results = MixedResults::default();
        let total = steps.len();

        for (i, step) in steps.iter().enumerate() {
            turn.think(format!(
                "Mixed intent step {}/{}: Executing '{}'",
                i + 1,
                total,
                step
            ));
            let outcome = match step {
                Intent::RagQa => self.mixed_rag_step(turn, &mut results).await,
                Intent::DeepResearch => self.mixed_research_step(turn, &mut results).await,
                Intent::RequirementsGeneration => {
                    self.mixed_requirements_step(turn, &mut results).await
                }
                Intent::GeneralChat => Ok(()),
            };
            match outcome {
                Ok(()) => turn.think(format!("Completed step {}/{}", i + 1, total)),
                Err(e) => {
                    error!("❌ 组合意图步骤 {} 失败: {}", step, e);
                    turn.think(format!("Error in mixed intent step '{}': {}", step, e));
                    results.errors.push((*step, e.to_string()));
                }
            }
        }

        let response = finalize_mixed(turn, steps, &results);
        self.memory.lock().await.save_turn(turn.input, &response).await;
        turn.think("Mixed intent workflow completed".to_string());
        response
    }

    async fn mixed_rag_step(&self, turn: &mut Turn<'_>, results: &mut MixedResults) -> Result<()> {
        let result = self
            .chain
            .query_documents_only(turn.input, &turn.history)
            .await;
        match result.status {
            RagStatus::NoIndex => {
                results.rag = Some(RagStep::NoDocuments);
            }
            RagStatus::Error => {
                anyhow::bail!(result.error.unwrap_or(result.answer))
            }
            RagStatus::Success => {
                turn.think(format!("[RAG Step] Found {} sources", result.sources.len()));
                results.rag = Some(RagStep::Answered {
                    answer: result.answer,
                    sources: result.sources,
                });
            }
        }
        Ok(())
    }

    async fn mixed_research_step(
        &self,
        turn: &mut Turn<'_>,
        results: &mut MixedResults,
    ) -> Result<()> {
        let query = match &results.rag {
            Some(RagStep::Answered { answer, .. }) if !answer.is_empty() => format!(
                "{}\n\nContext from documents:\n{}",
                turn.input,
                truncate_chars(answer, 1000)
            ),
            _ => turn.input.to_string(),
        };

        let state = self.research.run(&query).await;
        turn.think(format!(
            "[Research Step] Research finished with status {:?}, {} tasks",
            state.status,
            state.tasks.len()
        ));
        if state.status == ResearchStatus::Error {
            let error = state.error.clone();
            results.research = Some(state);
            anyhow::bail!(error);
        }
        turn.report_paths = state.paths.clone();
        results.research = Some(state);
        Ok(())
    }

    async fn mixed_requirements_step(
        &self,
        turn: &mut Turn<'_>,
        results: &mut MixedResults,
    ) -> Result<()> {
        let mut context_parts = Vec::new();
        if let Some(RagStep::Answered { answer, sources }) = &results.rag {
            if !answer.is_empty() {
                context_parts.push(format!(
                    "**Document Analysis:**\n{}",
                    truncate_chars(answer, 2000)
                ));
            }
            if !sources.is_empty() {
                let names: Vec<&str> = sources.iter().take(5).map(|s| s.filename.as_str()).collect();
                context_parts.push(format!("**Referenced Documents:** {}", names.join(", ")));
            }
        }
        if let Some(state) = &results.research {
            if !state.report.is_empty() {
                context_parts.push(format!(
                    "**Research Findings:**\n{}",
                    truncate_chars(&state.report, 2000)
                ));
            }
        }

        let focus = if context_parts.is_empty() {
            turn.focus.clone()
        } else {
            format!(
                "{}\n\n---\n**Gathered Context:**\n{}",
                turn.focus,
                context_parts.join("\n\n")
            )
        };

        let content = self.draft_requirements(turn, &focus).await?;
        let mut section = String::new();
        if !context_parts.is_empty() {
            section.push_str("*Requirements generated based on document analysis and research*\n");
        }
        section.push_str(&format!("\n{}\n", content));
        if let Some((_, code)) = self.chart_if_requested(turn, &content).await {
            section.push_str(&format!("\n---\n**📊 Generated Diagram:**\n\n{}", code));
        }

        turn.think(format!(
            "[Requirements Step] Generated {} chars of requirements",
            content.chars().count()
        ));
        results.requirements = Some(section);
        Ok(())
    }

    async fn draft_requirements(&self, turn: &Turn<'_>, focus: &str) -> Result<String> {
        let role_prompt = turn.role.prompt(focus, &turn.history);
        self.llm.complete(&role_prompt, turn.input, None).await
    }

    /// 仅在用户明确要求时生成图表
    async fn chart_if_requested(
        &self,
        turn: &mut Turn<'_>,
        content: &str,
    ) -> Option<(DiagramType, String)> {
        if !should_generate_chart(turn.input) {
            return None;
        }
        let diagram_type = detect_diagram_type(turn.input);
        turn.think(format!(
            "User explicitly requested a diagram, generating {} Mermaid chart",
            diagram_type.as_str()
        ));
        let code = self.charts.generate(content, diagram_type).await;
        turn.mermaid_chart = Some(code.clone());
        Some((diagram_type, code))
    }

    /// 普通对话的流式版本
    ///
    /// 流正常结束后才把整轮对话写入记忆；中途出错或调用方提前丢弃都不会写入。
    pub fn stream_general_chat(&self, user_input: &str) -> TextStream {
        let llm = self.llm.clone();
        let memory = self.memory.clone();
        let input = user_input.to_string();

        Box::pin(async_stream::try_stream! {
            let mut upstream = llm.stream(GENERAL_CHAT_PROMPT, &input).await?;
            let mut full_response = String::new();
            while let Some(fragment) = upstream.next().await {
                let fragment = fragment?;
                if fragment.is_empty() {
                    continue;
                }
                full_response.push_str(&fragment);
                yield fragment;
            }
            memory.lock().await.save_turn(&input, &full_response).await;
        })
    }

    /// 结构化需求生成，成功后把需求条目存入记忆的实体表
    pub async fn generate_structured_requirements(&self, role: Role, focus: &str) -> RequirementsResult {
        let history = self.memory.lock().await.conversation_context();
        let role_prompt = role.prompt(focus, &history);
        let result = self
            .requirements
            .generate(&role_prompt, &history, focus)
            .await;

        if result.status == GenerationStatus::Success {
            let entities = extract_entities_for_storage(&result);
            let mut memory = self.memory.lock().await;
            let mut embedded = 0;
            for (text, metadata) in &entities {
                if memory.store_entity(text, metadata.clone()).await {
                    embedded += 1;
                }
            }
            info!(
                "🧠 已保存 {} 条需求实体（{} 条带向量）",
                entities.len(),
                embedded
            );
        }
        result
    }
}

fn join_steps(steps: &[Intent], separator: &str) -> String {
    steps
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(separator)
}

fn format_rag_response(result: &RagResponse) -> String {
    let mut parts = vec!["**[RAG Q&A Mode]**\n".to_string(), result.answer.clone()];

    if !result.sources.is_empty() {
        parts.push("\n\n---\n**📄 Document Sources:**".to_string());
        for (i, source) in result.sources.iter().take(3).enumerate() {
            parts.push(format!(
                "\n{}. **{}** (chunk {})",
                i + 1,
                source.filename,
                source.chunk_index
            ));
            parts.push(format!("\n   > {}", preview(&source.preview, 150)));
        }
    }
    if !result.graph_entities.is_empty() {
        let entities: Vec<&str> = result
            .graph_entities
            .iter()
            .take(5)
            .map(String::as_str)
            .collect();
        parts.push(format!("\n\n**🔗 Related Entities:** {}", entities.join(", ")));
    }
    if result.web_search_triggered && !result.web_sources.is_empty() {
        parts.push("\n\n**🌐 Web Search Results:**".to_string());
        for source in result.web_sources.iter().take(2) {
            parts.push(format!("\n- [{}]({})", source.title, source.url));
        }
    }
    if result.query_rewritten {
        parts.push("\n\n*Query was optimized for better retrieval.*".to_string());
    }
    parts.concat()
}

fn format_report_files(paths: &ReportPaths) -> String {
    [
        ("📄 **Markdown Report:**", &paths.markdown_path),
        ("🌐 **HTML Report:**", &paths.html_path),
        ("📄 **PDF Report:**", &paths.pdf_path),
        ("📝 **Word Report:**", &paths.docx_path),
    ]
    .iter()
    .filter(|(_, path)| !path.is_empty())
    .map(|(label, path)| format!("{} `{}`", label, path))
    .collect::<Vec<_>>()
    .join("\n")
}

fn format_research_response(state: &ResearchState) -> String {
    let tasks = state
        .tasks
        .iter()
        .enumerate()
        .map(|(i, t)| format!("  {}. {}", i + 1, t.task))
        .collect::<Vec<_>>()
        .join("\n");
    let ellipsis = if state.report.chars().count() > RESEARCH_PREVIEW_CHARS {
        "..."
    } else {
        ""
    };

    let mut response = format!(
        "**[Deep Research Mode]**\n\n✅ Research completed successfully!\n\n**Research Query:** {}\n\n**Research Tasks Completed:**\n{}\n\n---\n\n{}{}\n",
        state.query,
        tasks,
        truncate_chars(&state.report, RESEARCH_PREVIEW_CHARS),
        ellipsis
    );
    let files = format_report_files(&state.paths);
    if !files.is_empty() {
        response.push_str(&format!("\n---\n\n{}", files));
    }
    response
}

fn finalize_mixed(turn: &mut Turn<'_>, steps: &[Intent], results: &MixedResults) -> String {
    turn.think(format!(
        "Finalizing mixed intent response for workflow: {}",
        join_steps(steps, " -> ")
    ));
    let has_requirements = steps.contains(&Intent::RequirementsGeneration);
    let mut parts = vec![format!(
        "**[Mixed Intent Workflow: {}]**\n",
        join_steps(steps, " → ")
    )];

    match &results.rag {
        Some(RagStep::Answered { answer, sources }) => {
            parts.push("\n---\n### 📄 Document Analysis\n".to_string());
            if !sources.is_empty() {
                parts.push(format!(
                    "*Found {} relevant document sections*\n",
                    sources.len()
                ));
            }
            // 后续有需求生成时，文档答案只作为上下文
            if !has_requirements {
                parts.push(format!("\n{}\n", answer));
            }
        }
        Some(RagStep::NoDocuments) => {
            parts.push("\n⚠️ *No documents indexed - proceeding with query only*\n".to_string());
        }
        None => {}
    }

    if let Some(state) = &results.research {
        if state.status == ResearchStatus::Complete {
            parts.push("\n---\n### 🔬 Research Findings\n".to_string());
            if !state.tasks.is_empty() {
                parts.push(format!(
                    "*Completed {} research tasks*\n",
                    state.completed_tasks()
                ));
            }
            let limit = if has_requirements { 1500 } else { 3000 };
            let ellipsis = if state.report.chars().count() > limit {
                "..."
            } else {
                ""
            };
            parts.push(format!(
                "\n{}{}\n",
                truncate_chars(&state.report, limit),
                ellipsis
            ));
            let files = format_report_files(&state.paths);
            if !files.is_empty() {
                parts.push(format!("\n{}\n", files));
            }
        }
    }

    if let Some(section) = &results.requirements {
        parts.push(format!(
            "\n---\n### 📋 Generated Requirements ({})\n",
            turn.role
        ));
        parts.push(section.clone());
    }

    for (step, error) in &results.errors {
        parts.push(format!("\n**[Error]** Step '{}' failed: {}\n", step, error));
    }

    parts.concat()
}
