//! 子命令执行

use std::io::Write;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

use super::{Command, expand_paths};
use crate::context::AppContext;
use crate::llm::LLMClient;
use crate::memory::MessageRole;
use crate::orchestrator::{Intent, IntentPlan, Orchestrator, Role};
use crate::rag::RagStatus;
use crate::requirements::{GenerationStatus, to_markdown};
use crate::research::ResearchStatus;
use crate::tasks::TaskStatus;
use crate::utils::preview;

pub async fn run(ctx: &AppContext, command: Command) -> Result<()> {
    match command {
        Command::Chat { role } => chat(ctx, role.as_deref()).await,
        Command::Ask {
            question,
            documents_only,
        } => ask(ctx, &question, documents_only).await,
        Command::Index { paths, build_graph } => index(ctx, &paths, build_graph).await,
        Command::Research { query, .. } => research(ctx, &query).await,
        Command::Requirements {
            description,
            role,
            focus,
            json,
        } => requirements(ctx, &description, role.as_deref(), focus.as_deref(), json).await,
        Command::Stats => stats(ctx).await,
        Command::Export { output } => {
            let json = ctx.index.export().await?;
            std::fs::write(&output, json).with_context(|| format!("写入 {:?} 失败", output))?;
            println!("✅ 索引已导出到 {}", output.display());
            Ok(())
        }
        Command::Import { input } => {
            let json = std::fs::read_to_string(&input)
                .with_context(|| format!("读取 {:?} 失败", input))?;
            let report = ctx.index.import(&json).await?;
            println!(
                "✅ 导入完成: {} 个文件, {} 个文本块, {} 个实体",
                report.imported_files.len(),
                report.imported_chunks,
                report.imported_entities
            );
            for skipped in &report.skipped_files {
                println!("   ⏭️ 已存在，跳过: {}", skipped);
            }
            Ok(())
        }
        Command::Clear => {
            ctx.index.clear().await?;
            println!("🗑️ 索引已清空");
            Ok(())
        }
        Command::Check => {
            LLMClient::new(ctx.config.clone())?.check_connection().await?;
            println!("✅ 模型连接正常 ({})", ctx.config.llm.provider);
            Ok(())
        }
    }
}

fn resolve_role(ctx: &AppContext, name: Option<&str>) -> Role {
    name.map(Role::from_name_or_default)
        .unwrap_or_else(|| ctx.default_role())
}

async fn ask(ctx: &AppContext, question: &str, documents_only: bool) -> Result<()> {
    let response = if documents_only {
        ctx.chain.query_documents_only(question, "").await
    } else {
        ctx.chain.query(question, "").await
    };

    match response.status {
        RagStatus::NoIndex => {
            println!("⚠️ 还没有索引任何文档，请先运行 `reqpilot index <paths>`");
            return Ok(());
        }
        RagStatus::Error => {
            bail!(response.error.unwrap_or_else(|| "retrieval failed".to_string()))
        }
        _ => {}
    }

    println!("{}\n", response.answer);
    if response.query_rewritten {
        println!("🔄 改写后的查询: {}", response.rewritten_query);
    }
    for source in &response.sources {
        println!("📄 {} #{}: {}", source.filename, source.chunk_index, source.preview);
    }
    for web in &response.web_sources {
        println!("🌐 {} ({})", web.title, web.url);
    }
    println!("🔍 检索方式: {}", response.search_methods.join(", "));
    Ok(())
}

async fn index(ctx: &AppContext, patterns: &[String], build_graph: bool) -> Result<()> {
    let paths = expand_paths(patterns)?;
    println!("📚 准备索引 {} 个文件", paths.len());
    let start = Instant::now();
    let report = ctx.index.index(&paths).await?;

    for file in &report.success {
        println!("   ✅ {}", file);
    }
    for file in &report.skipped {
        println!("   ⏭️ 已索引，跳过: {}", file);
    }
    for failed in &report.failed {
        println!("   ❌ {}: {}", failed.file_path, failed.error);
    }
    if let Some(error) = &report.index_error {
        println!("⚠️ 向量化失败，文本块以无向量形式保存: {}", error);
    }
    println!(
        "🎉 索引完成: {} 个文本块，耗时 {:.2?}",
        report.total_chunks,
        start.elapsed()
    );

    if build_graph {
        println!("🕸️ 正在构建知识图谱...");
        if ctx.index.build_graph_index(true).await? {
            let stats = ctx.index.stats().await?;
            println!(
                "✅ 知识图谱: {} 个实体, {} 条关系",
                stats.graph_entities, stats.graph_relationships
            );
        } else {
            println!("⚠️ 知识图谱未更新");
        }
    }
    Ok(())
}

async fn research(ctx: &AppContext, query: &str) -> Result<()> {
    println!("🔬 开始深度调研: {}", query);
    let start = Instant::now();
    let state = ctx.research.run(query).await;
    if state.status == ResearchStatus::Error {
        bail!("Research failed: {}", state.error);
    }

    println!("📋 调研任务:");
    for (i, task) in state.tasks.iter().enumerate() {
        let mark = if task.completed { "✅" } else { "❌" };
        println!("   {} {}. [{}] {}", mark, i + 1, task.category, task.task);
    }
    if state.paths.markdown_path.is_empty() {
        println!("\n{}", state.report);
    } else {
        println!("📄 Markdown: {}", state.paths.markdown_path);
        println!("🌐 HTML: {}", state.paths.html_path);
    }
    println!("🎉 调研完成，耗时 {:.2?}", start.elapsed());
    Ok(())
}

async fn requirements(
    ctx: &AppContext,
    description: &str,
    role: Option<&str>,
    focus: Option<&str>,
    json: bool,
) -> Result<()> {
    let role = resolve_role(ctx, role);
    let orchestrator = ctx.new_orchestrator();
    orchestrator
        .memory()
        .lock()
        .await
        .add_message(MessageRole::User, description)
        .await;

    println!("📝 以 {} 的视角生成需求...", role);
    let result = orchestrator
        .generate_structured_requirements(role, focus.unwrap_or(description))
        .await;
    if result.status == GenerationStatus::Error {
        bail!(
            "Requirements generation failed: {}",
            result.error.unwrap_or_default()
        );
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", to_markdown(&result));
    }
    Ok(())
}

async fn stats(ctx: &AppContext) -> Result<()> {
    let stats = ctx.index.stats().await?;
    println!("📊 索引统计");
    println!("   文件: {}", stats.total_files);
    println!("   文本块: {}", stats.total_chunks);
    println!(
        "   知识图谱 ({}): {} 个实体, {} 条关系",
        stats.graph_backend, stats.graph_entities, stats.graph_relationships
    );
    println!(
        "   向量检索: {}",
        if stats.embedding_available { "可用" } else { "不可用" }
    );
    if stats.needs_graph_update {
        println!("   ⚠️ 知识图谱需要重建，运行 `reqpilot index <paths> --build-graph`");
    }
    for file in &stats.files {
        println!(
            "   📄 {} ({} 块, {}, {})",
            file.filename,
            file.chunk_count,
            file.parser,
            file.indexed_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

const CHAT_HELP: &str = "命令: /role <name>  /focus <text>  /structured  /research <query>  /status <task_id>  /clear  /exit";

async fn chat(ctx: &AppContext, role: Option<&str>) -> Result<()> {
    let session_id = Uuid::new_v4().to_string();
    ctx.sessions.create_session(&session_id);
    let initial_role = resolve_role(ctx, role);
    ctx.sessions
        .update(&session_id, |s| s.selected_role = initial_role)?;
    let orchestrator = ctx.new_orchestrator();
    let mut focus: Option<String> = None;

    println!("💬 ReqPilot 会话 {} ({})", session_id, initial_role);
    println!("{}", CHAT_HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let session = ctx.sessions.get_or_create_session(&session_id);
        if let Some(command) = input.strip_prefix('/') {
            let (name, arg) = command
                .split_once(' ')
                .map(|(n, a)| (n, a.trim()))
                .unwrap_or((command, ""));
            match name {
                "exit" | "quit" => break,
                "help" => println!("{}", CHAT_HELP),
                "role" => match Role::from_name(arg) {
                    Some(role) => {
                        ctx.sessions.update(&session_id, |s| s.selected_role = role)?;
                        println!("✅ 当前角色: {}", role);
                    }
                    None => println!("⚠️ 未知角色: {}", arg),
                },
                "focus" => {
                    focus = (!arg.is_empty()).then(|| arg.to_string());
                    println!("✅ 关注点: {}", focus.as_deref().unwrap_or("(跟随输入)"));
                }
                "structured" => {
                    let result = orchestrator
                        .generate_structured_requirements(
                            session.selected_role,
                            focus.as_deref().unwrap_or("all requirements"),
                        )
                        .await;
                    println!("{}", to_markdown(&result));
                }
                "research" if !arg.is_empty() => {
                    let task_id = ctx.start_research(arg);
                    println!("🚀 后台调研已启动，任务id: {}", task_id);
                }
                "status" => print_task_status(ctx, arg),
                "clear" => {
                    orchestrator.clear_memory().await;
                    ctx.sessions.update(&session_id, |s| s.messages.clear())?;
                    println!("🧹 对话记忆已清空");
                }
                _ => println!("{}", CHAT_HELP),
            }
            continue;
        }

        let has_files = !ctx.index.is_empty().await;
        let response = chat_turn(
            &orchestrator,
            input,
            session.selected_role,
            has_files,
            focus.as_deref(),
        )
        .await?;

        ctx.sessions.update(&session_id, |s| {
            s.push_message(MessageRole::User, input);
            s.push_message(MessageRole::Assistant, response);
        })?;
    }

    ctx.sessions.delete_session(&session_id);
    println!("👋 再见");
    Ok(())
}

/// 普通对话走流式输出，其余意图一次性输出完整响应
async fn chat_turn(
    orchestrator: &Orchestrator,
    input: &str,
    role: Role,
    has_files: bool,
    focus: Option<&str>,
) -> Result<String> {
    let plan = orchestrator.detect_intent(input, role, has_files).await;
    if plan == IntentPlan::Single(Intent::GeneralChat) {
        let mut stream = orchestrator.stream_general_chat(input);
        let mut full = String::new();
        while let Some(fragment) = stream.next().await {
            match fragment {
                Ok(text) => {
                    print!("{}", text);
                    std::io::stdout().flush()?;
                    full.push_str(&text);
                }
                Err(e) => {
                    let message = format!("**[Error]** Failed to process general chat: {}", e);
                    println!("\n{}", message);
                    return Ok(message);
                }
            }
        }
        println!();
        return Ok(full);
    }

    let result = orchestrator.process_plan(&plan, input, role, focus).await;
    println!("{}", result.response);
    for thought in &result.chain_of_thought {
        tracing::debug!("💭 {}", thought);
    }
    Ok(result.response)
}

fn print_task_status(ctx: &AppContext, task_id: &str) {
    let Some(record) = ctx.tasks.record(task_id) else {
        println!("❓ 任务不存在: {}", task_id);
        return;
    };
    match record.status {
        TaskStatus::Running => println!("⏳ 调研进行中: {}", record.label),
        TaskStatus::Completed => {
            println!("✅ 调研完成: {}", record.label);
            if let Some(state) = record.result {
                if state.paths.markdown_path.is_empty() {
                    println!("{}", preview(&state.report, 2000));
                } else {
                    println!("📄 {}", state.paths.markdown_path);
                }
            }
        }
        TaskStatus::Error => println!(
            "❌ 调研失败: {}",
            record.error.unwrap_or_default()
        ),
        TaskStatus::NotFound => println!("❓ 任务不存在: {}", task_id),
    }
}
