#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::config::RagConfig;
    use crate::llm::LlmGateway;
    use crate::llm::testing::ScriptedGateway;
    use crate::rag::chain::{NO_WEB_SEARCH, complete_permutation, dedup_chunks};
    use crate::rag::index::GraphExtraction;
    use crate::rag::parser::{DocumentParser, PlainTextParser};
    use crate::rag::splitter::TextSplitter;
    use crate::rag::web_search::{
        DisabledWebSearch, WebSearch, WebSearchResult, parse_image_results, parse_search_results,
    };
    use crate::rag::{
        DocumentChunk, DocumentIndex, EntityType, HybridRetrievalChain, IndexError, RagStatus,
        extract_requirement_ids,
    };

    const THREE_PARAGRAPHS: &str = "The login module must support SSO users.\n\nPayment flow handles refunds within days.\n\nReporting exports monthly CSV summaries.";

    const GRAPH_REPLY: &str = r#"{"entities": ["REQ-001", "Login Service"], "relationships": [["REQ-001", "implemented by", "Login Service"]]}"#;

    fn small_config() -> RagConfig {
        RagConfig {
            chunk_size: 50,
            chunk_overlap: 10,
            ..RagConfig::default()
        }
    }

    fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn new_index(llm: Arc<ScriptedGateway>) -> DocumentIndex {
        DocumentIndex::new(llm, small_config())
    }

    fn chunk(text: &str, index: usize) -> DocumentChunk {
        DocumentChunk {
            text: text.to_string(),
            source_file: "doc.txt".to_string(),
            filename: "doc.txt".to_string(),
            chunk_index: index,
            total_chunks: 0,
            embedding: None,
        }
    }

    struct FakeWeb {
        results: Vec<WebSearchResult>,
        calls: AtomicUsize,
    }

    impl FakeWeb {
        fn new(results: Vec<WebSearchResult>) -> Self {
            Self {
                results,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl WebSearch for FakeWeb {
        fn is_available(&self) -> bool {
            true
        }

        async fn search(&self, _query: &str, max_results: usize) -> Result<Vec<WebSearchResult>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.results.iter().take(max_results).cloned().collect())
        }
    }

    #[test]
    fn test_splitter_keeps_short_text_whole() {
        let splitter = TextSplitter::new(100, 20);
        let chunks = splitter.split_text("A short requirement.");
        assert_eq!(chunks, vec!["A short requirement.".to_string()]);
    }

    #[test]
    fn test_splitter_respects_chunk_size() {
        let splitter = TextSplitter::new(40, 10);
        let text = "word ".repeat(100);
        let chunks = splitter.split_text(&text);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 40));
    }

    #[test]
    fn test_splitter_overlaps_adjacent_chunks() {
        let splitter = TextSplitter::new(30, 10);
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda";
        let chunks = splitter.split_text(text);
        assert!(chunks.len() >= 2);
        let first_tail = chunks[0].split(' ').next_back().unwrap();
        assert!(chunks[1].starts_with(first_tail));
    }

    #[test]
    fn test_splitter_paragraphs_become_chunks() {
        let splitter = TextSplitter::new(50, 10);
        assert_eq!(splitter.split_text(THREE_PARAGRAPHS).len(), 3);
    }

    #[test]
    fn test_extract_requirement_ids() {
        let ids = extract_requirement_ids("See req-001, FR-12 and REQ-001 again");
        assert_eq!(ids, vec!["REQ-001".to_string(), "FR-12".to_string()]);
    }

    #[test]
    fn test_entity_type_detection() {
        assert_eq!(EntityType::detect("REQ-001"), EntityType::Requirement);
        assert_eq!(EntityType::detect("users table"), EntityType::Table);
        assert_eq!(EntityType::detect("订单表"), EntityType::Table);
        assert_eq!(EntityType::detect("Payment API"), EntityType::Technology);
        assert_eq!(EntityType::detect("refund policy"), EntityType::Concept);
    }

    #[tokio::test]
    async fn test_plain_text_parser_placeholder_for_binary_formats() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "spec.pdf", "%PDF");
        let parsed = PlainTextParser.parse(&path).await.unwrap();
        assert!(parsed.metadata.placeholder);
        assert_eq!(parsed.metadata.parser_name, "placeholder");
        assert!(parsed.text.contains(".pdf"));

        let csv = write_file(&dir, "data.csv", "a,b\n1,2");
        let parsed = PlainTextParser.parse(&csv).await.unwrap();
        assert!(!parsed.metadata.placeholder);
        assert_eq!(parsed.metadata.tables, 1);
    }

    #[tokio::test]
    async fn test_index_empty_file_list_is_an_error() {
        let index = new_index(Arc::new(ScriptedGateway::fixed("")));
        let err = index.index(&[]).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<IndexError>(),
            Some(&IndexError::EmptyFileList)
        );
    }

    #[tokio::test]
    async fn test_index_is_idempotent_across_calls() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", THREE_PARAGRAPHS);
        let index = new_index(Arc::new(ScriptedGateway::fixed("")));

        let first = index.index(std::slice::from_ref(&path)).await.unwrap();
        assert_eq!(first.success.len(), 1);
        assert_eq!(first.total_chunks, 3);

        let second = index.index(std::slice::from_ref(&path)).await.unwrap();
        assert!(second.success.is_empty());
        assert_eq!(second.skipped, vec![path.to_string_lossy().to_string()]);
        assert_eq!(second.total_chunks, 0);
        assert_eq!(index.chunk_count().await, 3);
    }

    #[tokio::test]
    async fn test_same_path_twice_in_one_batch() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", THREE_PARAGRAPHS);
        let index = new_index(Arc::new(ScriptedGateway::fixed("")));

        let report = index.index(&[path.clone(), path.clone()]).await.unwrap();
        let key = path.to_string_lossy().to_string();
        assert_eq!(report.success, vec![key.clone()]);
        assert_eq!(report.skipped, vec![key]);
        assert_eq!(report.total_chunks, 3);
        assert_eq!(index.indexed_files().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_files_do_not_abort_batch() {
        let dir = TempDir::new().unwrap();
        let good = write_file(&dir, "good.md", THREE_PARAGRAPHS);
        let tiny = write_file(&dir, "tiny.txt", "hi");
        let binary = write_file(&dir, "deck.pptx", "binary");
        let missing = dir.path().join("missing.txt");
        let index = new_index(Arc::new(ScriptedGateway::fixed("")));

        let report = index
            .index(&[tiny.clone(), binary.clone(), missing, good.clone()])
            .await
            .unwrap();
        assert_eq!(report.success, vec![good.to_string_lossy().to_string()]);
        assert_eq!(report.failed.len(), 3);
        assert_eq!(report.failed[0].error, "No content extracted");
        assert!(report.failed[1].error.contains("Unsupported document format"));
    }

    #[tokio::test]
    async fn test_similarity_search_returns_at_most_corpus_size() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", THREE_PARAGRAPHS);
        let index = new_index(Arc::new(ScriptedGateway::fixed("")));
        index.index(&[path]).await.unwrap();

        let results = index.similarity_search("topic", 5).await.unwrap();
        assert_eq!(results.len(), 3);

        let best = index.similarity_search("refunds payment flow", 1).await.unwrap();
        assert!(best[0].text.contains("refunds"));
    }

    #[tokio::test]
    async fn test_similarity_search_on_empty_index() {
        let index = new_index(Arc::new(ScriptedGateway::fixed("")));
        assert!(index.similarity_search("anything", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_index_without_embeddings_still_supports_keywords() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", THREE_PARAGRAPHS);
        let index = new_index(Arc::new(ScriptedGateway::fixed("").without_embeddings()));

        let report = index.index(&[path]).await.unwrap();
        assert!(report.index_error.is_none());
        assert!(!index.embedding_available());
        assert!(index.similarity_search("login", 5).await.unwrap().is_empty());

        let hits = index.keyword_search("monthly reporting", 5).await;
        assert_eq!(hits.len(), 1);
        assert!(hits[0].text.starts_with("Reporting"));
    }

    #[tokio::test]
    async fn test_keyword_search_prefers_requirement_ids() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "reqs.txt",
            "Login must be fast and login must be safe.\n\nREQ-042 defines the login timeout rule.",
        );
        let index = new_index(Arc::new(ScriptedGateway::fixed("")));
        index.index(&[path]).await.unwrap();

        let hits = index.keyword_search("login timeout REQ-042", 8).await;
        assert_eq!(hits.len(), 2);
        assert!(hits[0].text.contains("REQ-042"));
        assert!(index.keyword_search("zz", 8).await.is_empty());
    }

    #[tokio::test]
    async fn test_keyword_search_matches_whole_requirement_ids() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "reqs.txt",
            "REQ-12 exports the order history.\n\nREQ-1 lets registered users sign in.",
        );
        let index = new_index(Arc::new(ScriptedGateway::fixed("")));
        index.index(&[path]).await.unwrap();

        let hits = index.keyword_search("REQ-1", 8).await;
        assert_eq!(hits.len(), 1);
        assert!(hits[0].text.starts_with("REQ-1 lets"));
        assert!(index.keyword_search("REQ-7", 8).await.is_empty());
    }

    #[test]
    fn test_graph_extraction_parsing_is_lenient() {
        let text = "Sure!\n```json\n{\"entities\": [\"A\", {\"name\": \"B\"}, 3], \"relationships\": [[\"A\", \"uses\", \"B\"], [\"bad\"]]}\n```";
        let extraction = GraphExtraction::from_model_output(text).unwrap();
        assert_eq!(extraction.entities, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(extraction.relationships.len(), 1);

        assert!(GraphExtraction::from_model_output("no json here").is_err());
    }

    #[tokio::test]
    async fn test_build_graph_index_and_search() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", THREE_PARAGRAPHS);
        let llm = Arc::new(ScriptedGateway::fixed(GRAPH_REPLY));
        let index = new_index(llm.clone());

        assert!(!index.build_graph_index(false).await.unwrap());

        index.index(&[path]).await.unwrap();
        assert!(index.needs_graph_update().await);
        assert!(index.build_graph_index(false).await.unwrap());
        assert!(!index.needs_graph_update().await);
        assert_eq!(llm.call_count(), 3);

        // 没有新块时不再调用模型
        assert!(index.build_graph_index(false).await.unwrap());
        assert_eq!(llm.call_count(), 3);

        let stats = index.stats().await.unwrap();
        assert_eq!(stats.graph_entities, 2);
        assert_eq!(stats.graph_relationships, 1);

        let result = index.graph_search("What does REQ-001 require?").await.unwrap();
        assert!(result.found);
        assert_eq!(result.entities, vec!["REQ-001".to_string()]);
        assert!(result.context_text.starts_with("Related entities: REQ-001"));
        assert!(
            result
                .context_text
                .contains("Relationships: REQ-001 implemented by Login Service")
        );

        let miss = index.graph_search("xyz").await.unwrap();
        assert!(!miss.found);
        assert!(miss.context_text.is_empty());
    }

    #[tokio::test]
    async fn test_graph_extraction_failures_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", THREE_PARAGRAPHS);
        let llm = Arc::new(ScriptedGateway::new(|_, user| {
            if user.contains("Payment") {
                bail!("model unavailable")
            }
            Ok(GRAPH_REPLY.to_string())
        }));
        let index = new_index(llm);
        index.index(&[path]).await.unwrap();

        assert!(index.build_graph_index(false).await.unwrap());

        let failing = Arc::new(ScriptedGateway::fixed("not json"));
        let other = new_index(failing);
        let dir2 = TempDir::new().unwrap();
        other
            .index(&[write_file(&dir2, "b.txt", THREE_PARAGRAPHS)])
            .await
            .unwrap();
        assert!(!other.build_graph_index(false).await.unwrap());
        assert!(other.needs_graph_update().await);
    }

    #[tokio::test]
    async fn test_clear_wipes_everything() {
        let dir = TempDir::new().unwrap();
        let storage = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", THREE_PARAGRAPHS);
        let index = new_index(Arc::new(ScriptedGateway::fixed(GRAPH_REPLY)))
            .with_storage(storage.path());
        index.index(std::slice::from_ref(&path)).await.unwrap();
        index.build_graph_index(false).await.unwrap();
        assert!(storage.path().join("index.json").exists());

        index.clear().await.unwrap();
        let stats = index.stats().await.unwrap();
        assert_eq!(stats.total_files, 0);
        assert_eq!(stats.total_chunks, 0);
        assert_eq!(stats.graph_entities, 0);
        assert!(index.is_empty().await);
        assert!(!storage.path().join("index.json").exists());

        // 清空后同一路径可以重新索引
        let report = index.index(&[path]).await.unwrap();
        assert_eq!(report.success.len(), 1);
    }

    #[tokio::test]
    async fn test_export_import_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", THREE_PARAGRAPHS);
        let source = new_index(Arc::new(ScriptedGateway::fixed(GRAPH_REPLY)));
        source.index(&[path]).await.unwrap();
        source.build_graph_index(false).await.unwrap();
        let exported = source.export().await.unwrap();
        assert!(exported.contains("\"version\": \"1.0\""));

        let llm = Arc::new(ScriptedGateway::fixed(""));
        let target = new_index(llm.clone());
        let report = target.import(&exported).await.unwrap();
        assert_eq!(report.imported_files.len(), 1);
        assert_eq!(report.imported_chunks, 3);
        assert_eq!(report.imported_entities, 2);
        // 导出中已带向量，不需要重新向量化
        assert_eq!(llm.call_count(), 0);
        assert_eq!(
            target.similarity_search("refunds", 1).await.unwrap().len(),
            1
        );

        let again = target.import(&exported).await.unwrap();
        assert!(again.imported_files.is_empty());
        assert_eq!(again.skipped_files.len(), 1);
        assert_eq!(target.chunk_count().await, 3);

        let err = target.import("{not json").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::InvalidImport(_))
        ));
    }

    #[tokio::test]
    async fn test_index_persists_and_loads() {
        let dir = TempDir::new().unwrap();
        let storage = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", THREE_PARAGRAPHS);

        let index = new_index(Arc::new(ScriptedGateway::fixed(GRAPH_REPLY)))
            .with_storage(storage.path());
        index.index(&[path.clone()]).await.unwrap();
        index.build_graph_index(false).await.unwrap();

        let reloaded = new_index(Arc::new(ScriptedGateway::fixed("")))
            .with_storage(storage.path());
        assert!(reloaded.load().await.unwrap());
        let stats = reloaded.stats().await.unwrap();
        assert_eq!(stats.total_chunks, 3);
        assert_eq!(stats.graph_entities, 2);
        assert!(!stats.needs_graph_update);

        let report = reloaded.index(&[path]).await.unwrap();
        assert_eq!(report.skipped.len(), 1);
    }

    #[test]
    fn test_dedup_by_content_prefix() {
        let shared = "x".repeat(200);
        let chunks = vec![
            chunk(&format!("{}tail one", shared), 0),
            chunk(&format!("{}tail two", shared), 1),
            chunk("different", 2),
            chunk("different", 3),
        ];
        let unique = dedup_chunks(chunks, 200);
        let indices: Vec<usize> = unique.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 2]);

        // 前缀之后不同的块在更长的前缀下会被保留
        let chunks = vec![
            chunk(&format!("{}tail one", shared), 0),
            chunk(&format!("{}tail two", shared), 1),
        ];
        assert_eq!(dedup_chunks(chunks, 300).len(), 2);
    }

    #[test]
    fn test_complete_permutation_is_total() {
        assert_eq!(complete_permutation("[2, 2, 7, 0]", 4), vec![2, 0, 1, 3]);
        assert_eq!(complete_permutation("3, 1", 4), vec![3, 1, 0, 2]);
        assert_eq!(
            complete_permutation("Most relevant: 1 then 0", 3),
            vec![1, 0, 2]
        );
        assert_eq!(complete_permutation("no idea", 3), vec![0, 1, 2]);
        assert_eq!(complete_permutation("2,-1,0", 3), vec![2, 0, 1]);
        assert_eq!(complete_permutation("[1, -2, 0]", 3), vec![1, 0, 2]);
        assert!(complete_permutation("1,2", 0).is_empty());

        for raw in ["", "9,9,9", "[\"1\", \"0\"]", "0,0,0,0,5,4"] {
            let mut order = complete_permutation(raw, 5);
            order.sort_unstable();
            assert_eq!(order, vec![0, 1, 2, 3, 4]);
        }
    }

    #[test]
    fn test_parse_searxng_payloads() {
        let body = serde_json::json!({
            "results": [
                {"title": "Tokio", "content": "An async runtime", "url": "https://tokio.rs", "img_src": "https://tokio.rs/logo.png"},
                {"title": "No url"},
                {"title": "Rust", "content": "Language", "url": "https://rust-lang.org"}
            ]
        });
        let results = parse_search_results(&body, 5);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].snippet, "An async runtime");
        assert_eq!(parse_search_results(&body, 1).len(), 1);

        let images = parse_image_results(&body, 5);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].source_url, "https://tokio.rs");
    }

    fn chain_responder(system: &str, _user: &str) -> Result<String> {
        if system.contains("rewrite search queries") {
            return Ok("login SSO users authentication".to_string());
        }
        if system.contains("rank document excerpts") {
            return Ok("4,3".to_string());
        }
        if system.contains("NEEDS_WEBSEARCH") {
            return Ok("NEEDS_WEBSEARCH: rust async runtimes".to_string());
        }
        Ok("Synthesised answer".to_string())
    }

    fn offline_rewrite(system: &str, user: &str) -> Result<String> {
        if system.contains("rewrite search queries") {
            bail!("rewrite offline")
        }
        chain_responder(system, user)
    }

    async fn chain_with(
        llm: Arc<ScriptedGateway>,
        web: Arc<dyn WebSearch>,
        files: &[(&str, &str)],
    ) -> (HybridRetrievalChain, TempDir) {
        let dir = TempDir::new().unwrap();
        let index = Arc::new(new_index(llm.clone()));
        if !files.is_empty() {
            let paths: Vec<PathBuf> = files
                .iter()
                .map(|(name, content)| write_file(&dir, name, content))
                .collect();
            index.index(&paths).await.unwrap();
        }
        let gateway: Arc<dyn LlmGateway> = llm;
        let chain = HybridRetrievalChain::new(gateway, index, web, small_config(), 3);
        (chain, dir)
    }

    #[tokio::test]
    async fn test_chain_reports_no_index() {
        let llm = Arc::new(ScriptedGateway::new(chain_responder));
        let (chain, _dir) = chain_with(llm.clone(), Arc::new(DisabledWebSearch), &[]).await;

        let response = chain.query("anything?", "").await;
        assert_eq!(response.status, RagStatus::NoIndex);
        assert!(response.answer.contains("No documents have been indexed yet"));
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_chain_answers_with_sources() {
        let llm = Arc::new(ScriptedGateway::new(chain_responder));
        let (chain, _dir) = chain_with(
            llm.clone(),
            Arc::new(DisabledWebSearch),
            &[("a.txt", THREE_PARAGRAPHS)],
        )
        .await;

        let response = chain.query("How do SSO users log in?", "user: hi").await;
        assert_eq!(response.status, RagStatus::Success);
        assert_eq!(response.answer, "Synthesised answer");
        assert!(response.query_rewritten);
        assert_eq!(response.rewritten_query, "login SSO users authentication");
        assert!(!response.sources.is_empty() && response.sources.len() <= 3);
        assert!(response.search_methods.contains(&"vector".to_string()));
        assert!(response.search_methods.contains(&"original_query".to_string()));
        assert!(!response.web_search_triggered);

        let synthesis = llm.user_prompts().pop().unwrap();
        assert!(synthesis.contains("[Source: a.txt]"));
        assert!(synthesis.contains("user: hi"));
        assert!(synthesis.contains("No graph context available."));
        assert!(synthesis.contains(NO_WEB_SEARCH));
    }

    #[tokio::test]
    async fn test_chain_ranks_candidates() {
        let paragraphs = "The system stores audit logs for a year.\n\nThe system exports data as CSV files.\n\nThe system sends alerts by email daily.\n\nThe system supports two factor logins.\n\nThe system archives old tickets weekly.";
        let llm = Arc::new(
            ScriptedGateway::new(offline_rewrite).without_embeddings(),
        );
        let (chain, _dir) = chain_with(
            llm.clone(),
            Arc::new(DisabledWebSearch),
            &[("sys.txt", paragraphs)],
        )
        .await;

        let response = chain.query("system", "").await;
        assert_eq!(response.status, RagStatus::Success);
        assert!(!response.query_rewritten);
        let order: Vec<usize> = response.sources.iter().map(|s| s.chunk_index).collect();
        assert_eq!(order, vec![4, 3, 0]);
    }

    #[tokio::test]
    async fn test_chain_survives_embedding_failure_at_query_time() {
        let llm = Arc::new(ScriptedGateway::new(chain_responder));
        let (chain, _dir) = chain_with(
            llm.clone(),
            Arc::new(DisabledWebSearch),
            &[("a.txt", THREE_PARAGRAPHS)],
        )
        .await;
        llm.break_embeddings();

        let response = chain.query("How do SSO users log in?", "").await;
        assert_eq!(response.status, RagStatus::Success);
        assert_eq!(response.answer, "Synthesised answer");
        assert!(!response.sources.is_empty());
        assert!(response.sources[0].preview.contains("SSO"));
        assert!(response.search_methods.contains(&"keyword".to_string()));
        assert!(!response.web_search_triggered);
    }

    #[tokio::test]
    async fn test_chain_keeps_retrieval_order_when_ranking_fails() {
        let paragraphs = "The system stores audit logs for a year.\n\nThe system exports data as CSV files.\n\nThe system sends alerts by email daily.\n\nThe system supports two factor logins.\n\nThe system archives old tickets weekly.";
        let llm = Arc::new(
            ScriptedGateway::new(|system, user| {
                if system.contains("rank document excerpts") {
                    bail!("rate limited")
                }
                offline_rewrite(system, user)
            })
            .without_embeddings(),
        );
        let (chain, _dir) = chain_with(
            llm,
            Arc::new(DisabledWebSearch),
            &[("sys.txt", paragraphs)],
        )
        .await;

        let response = chain.query("system", "").await;
        assert_eq!(response.status, RagStatus::Success);
        assert_eq!(response.answer, "Synthesised answer");
        let order: Vec<usize> = response.sources.iter().map(|s| s.chunk_index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_chain_synthesis_failure_is_reported() {
        let llm = Arc::new(ScriptedGateway::new(|system, user| {
            if system.contains("requirements analysis assistant") {
                bail!("quota exceeded")
            }
            chain_responder(system, user)
        }));
        let (chain, _dir) = chain_with(
            llm,
            Arc::new(DisabledWebSearch),
            &[("a.txt", THREE_PARAGRAPHS)],
        )
        .await;

        let response = chain.query("login", "").await;
        assert_eq!(response.status, RagStatus::Error);
        assert!(response.answer.starts_with("❌ Error processing query:"));
        assert!(response.error.unwrap().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_chain_escalates_to_web_when_nothing_found() {
        let llm = Arc::new(ScriptedGateway::new(offline_rewrite).without_embeddings());
        let web = Arc::new(FakeWeb::new(vec![WebSearchResult {
            title: "Tokio".to_string(),
            snippet: "An async runtime".to_string(),
            url: "https://tokio.rs".to_string(),
        }]));
        let (chain, _dir) =
            chain_with(llm.clone(), web.clone(), &[("a.txt", THREE_PARAGRAPHS)]).await;

        let response = chain.query("qqq zzz", "").await;
        assert_eq!(response.status, RagStatus::Success);
        assert!(response.web_search_triggered);
        assert_eq!(response.web_sources.len(), 1);
        assert!(response.sources.is_empty());
        assert_eq!(web.calls.load(Ordering::SeqCst), 1);

        let synthesis = llm.user_prompts().pop().unwrap();
        assert!(synthesis.contains("[Web: Tokio]\nAn async runtime\nSource: https://tokio.rs"));
        assert!(synthesis.contains("No relevant documents found."));
    }

    #[tokio::test]
    async fn test_chain_web_escalation_fails_closed() {
        let llm = Arc::new(
            ScriptedGateway::new(|system, user| {
                if system.contains("NEEDS_WEBSEARCH") {
                    return Ok("NO_WEBSEARCH".to_string());
                }
                offline_rewrite(system, user)
            })
            .without_embeddings(),
        );
        let web = Arc::new(FakeWeb::new(Vec::new()));
        let (chain, _dir) = chain_with(llm, web.clone(), &[("a.txt", THREE_PARAGRAPHS)]).await;

        let response = chain.query("qqq zzz", "").await;
        assert_eq!(response.status, RagStatus::Success);
        assert!(!response.web_search_triggered);
        assert_eq!(web.calls.load(Ordering::SeqCst), 0);
    }
}
