//! 应用上下文：按配置组装各个组件
//!
//! 文档索引、检索链、调研工作流和需求生成器在会话之间共享；
//! 对话记忆属于单个会话，每个会话各自创建一个[`Orchestrator`]。

use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::config::Config;
use crate::llm::{LLMClient, LlmGateway};
use crate::memory::ConversationMemory;
use crate::orchestrator::{Orchestrator, Role};
use crate::rag::web_search::{WebSearch, build_web_search};
use crate::rag::{DocumentIndex, HybridRetrievalChain};
use crate::requirements::RequirementsGenerator;
use crate::research::{DeepResearchWorkflow, MarkdownReportRenderer, ResearchState, ResearchStatus};
use crate::session::SessionStore;
use crate::tasks::TaskRegistry;

pub struct AppContext {
    pub config: Config,
    pub llm: Arc<dyn LlmGateway>,
    pub index: Arc<DocumentIndex>,
    pub chain: Arc<HybridRetrievalChain>,
    pub research: Arc<DeepResearchWorkflow>,
    pub requirements: Arc<RequirementsGenerator>,
    pub sessions: SessionStore,
    pub tasks: TaskRegistry<ResearchState>,
}

impl AppContext {
    /// 使用真实的LLM客户端和配置中的搜索服务
    pub async fn new(config: Config) -> Result<Self> {
        let llm: Arc<dyn LlmGateway> = Arc::new(LLMClient::new(config.clone())?);
        let web = build_web_search(&config.web_search);
        Self::with_services(config, llm, web).await
    }

    /// 注入外部服务，持久化的索引会在这里加载
    pub async fn with_services(
        config: Config,
        llm: Arc<dyn LlmGateway>,
        web: Arc<dyn WebSearch>,
    ) -> Result<Self> {
        let index = Arc::new(
            DocumentIndex::new(llm.clone(), config.rag.clone()).with_storage(config.data_dir.clone()),
        );
        match index.load().await {
            Ok(true) => info!("📂 已加载持久化索引: {} 个文本块", index.chunk_count().await),
            Ok(false) => {}
            Err(e) => warn!("⚠️ 持久化索引加载失败，使用空索引: {}", e),
        }

        let chain = Arc::new(HybridRetrievalChain::new(
            llm.clone(),
            index.clone(),
            web.clone(),
            config.rag.clone(),
            config.web_search.max_results,
        ));
        let renderer = Arc::new(MarkdownReportRenderer::new(config.output_dir.clone()));
        let research = Arc::new(DeepResearchWorkflow::new(
            llm.clone(),
            web,
            renderer,
            config.research.clone(),
        ));
        let requirements = Arc::new(RequirementsGenerator::new(
            llm.clone(),
            config.requirements.clone(),
        ));
        let sessions = SessionStore::new(
            config.session.timeout_minutes,
            Role::from_name_or_default(&config.default_role),
        );

        Ok(Self {
            config,
            llm,
            index,
            chain,
            research,
            requirements,
            sessions,
            tasks: TaskRegistry::new(),
        })
    }

    pub fn default_role(&self) -> Role {
        Role::from_name_or_default(&self.config.default_role)
    }

    /// 为一个会话创建编排器，记忆从空开始
    pub fn new_orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            self.llm.clone(),
            ConversationMemory::new(self.llm.clone(), self.config.memory.clone()),
            self.chain.clone(),
            self.research.clone(),
            self.requirements.clone(),
        )
    }

    /// 在后台运行深度调研，立即返回任务id
    pub fn start_research(&self, query: &str) -> String {
        let workflow = self.research.clone();
        let owned_query = query.to_string();
        self.tasks.start(query, async move {
            let state = workflow.run(&owned_query).await;
            if state.status == ResearchStatus::Error {
                bail!("{}", state.error);
            }
            Ok(state)
        })
    }
}
