#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use anyhow::bail;

    use crate::config::MemoryConfig;
    use crate::llm::testing::ScriptedGateway;
    use crate::memory::{ConversationMemory, EMPTY_HISTORY, MessageRole};

    fn memory_with(llm: Arc<ScriptedGateway>) -> ConversationMemory {
        ConversationMemory::new(llm, MemoryConfig::default())
    }

    fn meta(kind: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("type".to_string(), kind.to_string())])
    }

    #[tokio::test]
    async fn test_empty_memory_history() {
        let memory = memory_with(Arc::new(ScriptedGateway::fixed("summary")));
        assert_eq!(memory.history_text(), EMPTY_HISTORY);
        assert_eq!(memory.conversation_context(), EMPTY_HISTORY);
    }

    #[tokio::test]
    async fn test_history_lists_recent_messages() {
        let mut memory = memory_with(Arc::new(ScriptedGateway::fixed("summary")));
        memory.save_turn("hello", "hi there").await;
        let history = memory.history_text();
        assert!(history.starts_with("Recent conversation:\n"));
        assert!(history.contains("user: hello\nassistant: hi there"));
        assert_eq!(memory.metadata().total_turns, 1);
    }

    #[tokio::test]
    async fn test_summarizes_when_buffer_overflows() {
        let llm = Arc::new(ScriptedGateway::fixed("they discussed login"));
        let mut memory = memory_with(llm.clone());

        for i in 0..5 {
            memory
                .save_turn(&format!("question {i}"), &format!("answer {i}"))
                .await;
        }
        // 10条消息尚未超过上限
        assert_eq!(llm.call_count(), 0);

        memory.add_message(MessageRole::User, "question 5").await;
        assert_eq!(llm.call_count(), 1);
        assert_eq!(memory.messages().len(), 5);
        assert_eq!(memory.summary(), "they discussed login");
        assert!(llm.user_prompts()[0].starts_with("user: question 0"));

        for i in 6..9 {
            memory
                .save_turn(&format!("question {i}"), &format!("answer {i}"))
                .await;
        }
        assert_eq!(llm.call_count(), 2);
        assert_eq!(
            memory.summary(),
            "they discussed login\n\nAdditional context: they discussed login"
        );
        assert!(
            memory
                .history_text()
                .starts_with("Previous context: they discussed login")
        );
        assert_eq!(memory.metadata().summarizations, 2);
    }

    #[tokio::test]
    async fn test_summary_failure_keeps_messages() {
        let llm = Arc::new(ScriptedGateway::new(|_, _| bail!("offline")));
        let mut memory = memory_with(llm);
        for i in 0..6 {
            memory.save_turn(&format!("q{i}"), &format!("a{i}")).await;
        }
        assert_eq!(memory.messages().len(), 12);
        assert!(memory.summary().is_empty());
    }

    #[tokio::test]
    async fn test_token_limit_triggers_summary() {
        let llm = Arc::new(ScriptedGateway::fixed("long talk"));
        let config = MemoryConfig {
            token_limit: 50,
            ..MemoryConfig::default()
        };
        let mut memory = ConversationMemory::new(llm.clone(), config);
        let long = "word ".repeat(60);
        for _ in 0..3 {
            memory.save_turn(&long, "ok").await;
        }
        assert!(llm.call_count() >= 1);
        assert!(memory.messages().len() <= 5);
    }

    #[tokio::test]
    async fn test_context_lists_last_entities() {
        let mut memory = memory_with(Arc::new(ScriptedGateway::fixed("")));
        for i in 1..=7 {
            assert!(
                memory
                    .store_entity(&format!("FR-00{i}: requirement {i}"), meta("functional_requirement"))
                    .await
            );
        }
        let context = memory.conversation_context();
        assert!(context.contains("\n\nKey Entities:\n- FR-003: requirement 3"));
        assert!(context.contains("- FR-007: requirement 7"));
        assert!(!context.contains("FR-002"));
    }

    #[tokio::test]
    async fn test_retrieve_entities_by_similarity() {
        let mut memory = memory_with(Arc::new(ScriptedGateway::fixed("")));
        memory.store_entity("users reset passwords by email", meta("fr")).await;
        memory.store_entity("reports export to csv", meta("fr")).await;

        let found = memory.retrieve_entities("export csv reports", 1).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].text, "reports export to csv");
        assert!(found[0].embedding.is_some());
    }

    #[tokio::test]
    async fn test_retrieve_entities_without_embeddings() {
        let mut memory =
            memory_with(Arc::new(ScriptedGateway::fixed("").without_embeddings()));
        assert!(!memory.store_entity("first entity", meta("fr")).await);
        memory.store_entity("reports export to csv", meta("fr")).await;
        memory.store_entity("third entity", meta("fr")).await;
        assert_eq!(memory.entities().len(), 3);
        assert!(memory.entities().iter().all(|e| e.embedding.is_none()));

        let found = memory.retrieve_entities("csv export", 2).await;
        assert_eq!(found[0].text, "reports export to csv");

        let fallback = memory.retrieve_entities("nothing matches", 2).await;
        assert_eq!(fallback.len(), 2);
        assert_eq!(fallback[0].text, "first entity");
    }

    #[tokio::test]
    async fn test_entity_kept_as_text_when_embedding_fails() {
        let llm = Arc::new(ScriptedGateway::fixed(""));
        let mut memory = memory_with(llm.clone());
        assert!(memory.store_entity("users sign in", meta("fr")).await);
        llm.break_embeddings();
        assert!(!memory.store_entity("reports export to csv", meta("fr")).await);

        assert_eq!(memory.entities().len(), 2);
        assert!(memory.entities()[0].embedding.is_some());
        assert!(memory.entities()[1].embedding.is_none());
    }

    #[tokio::test]
    async fn test_clear() {
        let mut memory = memory_with(Arc::new(ScriptedGateway::fixed("")));
        memory.save_turn("a", "b").await;
        memory.store_entity("x", BTreeMap::new()).await;
        memory.clear();
        assert!(memory.messages().is_empty());
        assert!(memory.entities().is_empty());
        assert_eq!(memory.history_text(), EMPTY_HISTORY);
    }
}
