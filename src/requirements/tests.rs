#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::bail;

    use crate::config::RequirementsConfig;
    use crate::llm::testing::ScriptedGateway;
    use crate::requirements::{
        GenerationStatus, QualityScores, RequirementsDocument, RequirementsGenerator,
        RequirementsResult, ValidationReport, extract_entities_for_storage, to_markdown,
    };

    const DRAFT: &str = r#"```json
{"functional_requirements": ["Users log in with SSO"], "non_functional_requirements": ["Login completes in 2s"], "business_rules": ["Accounts lock after 5 failures"], "use_cases": ["Employee signs in"], "assumptions": ["IdP is available"]}
```"#;

    fn validation_reply(score: f64) -> String {
        format!(
            r#"{{"scores": {{"ambiguity": {score}, "completeness": {score}, "consistency": {score}, "clarity": {score}}}, "suggestions": ["be specific"], "overall_score": {score}}}"#
        )
    }

    /// 评审依次返回给定分数，最后一个分数重复使用
    fn scripted(scores: Vec<f64>) -> (Arc<ScriptedGateway>, Arc<AtomicUsize>) {
        let validations = Arc::new(AtomicUsize::new(0));
        let counter = validations.clone();
        let llm = ScriptedGateway::new(move |system, _| {
            if system.contains("quality control expert") {
                let i = counter.fetch_add(1, Ordering::SeqCst);
                let score = scores[i.min(scores.len() - 1)];
                return Ok(validation_reply(score));
            }
            Ok(DRAFT.to_string())
        });
        (Arc::new(llm), validations)
    }

    fn generator(llm: Arc<ScriptedGateway>) -> RequirementsGenerator {
        RequirementsGenerator::new(llm, RequirementsConfig::default())
    }

    #[tokio::test]
    async fn test_good_draft_is_not_refined() {
        let (llm, validations) = scripted(vec![8.5]);
        let result = generator(llm.clone())
            .generate("Requirements Analyst", "No history", "login")
            .await;

        assert_eq!(result.status, GenerationStatus::Success);
        assert_eq!(result.refinement_iterations, 0);
        assert_eq!(validations.load(Ordering::SeqCst), 1);
        assert_eq!(llm.call_count(), 2);
        assert_eq!(
            result.requirements.functional_requirements,
            vec!["Users log in with SSO".to_string()]
        );
        assert!(llm.user_prompts()[0].contains("Focus Area:\nlogin"));
    }

    #[tokio::test]
    async fn test_refines_until_threshold() {
        let (llm, validations) = scripted(vec![5.0, 7.5]);
        let result = generator(llm.clone()).generate("r", "h", "f").await;

        assert_eq!(result.status, GenerationStatus::Success);
        assert_eq!(result.refinement_iterations, 1);
        assert_eq!(validations.load(Ordering::SeqCst), 2);
        assert_eq!(result.validation.overall_score, 7.5);
        let refinement = &llm.user_prompts()[2];
        assert!(refinement.starts_with("Original Requirements:"));
        assert!(refinement.contains("be specific"));
    }

    #[tokio::test]
    async fn test_refinement_loop_is_bounded() {
        for max in 0..4u32 {
            let (llm, validations) = scripted(vec![1.0]);
            let config = RequirementsConfig {
                max_refinement_iterations: max,
                quality_threshold: 7.0,
            };
            let result = RequirementsGenerator::new(llm, config)
                .generate("r", "h", "f")
                .await;
            assert_eq!(result.refinement_iterations, max);
            assert_eq!(validations.load(Ordering::SeqCst), max as usize + 1);
        }
    }

    #[tokio::test]
    async fn test_missing_overall_score_counts_as_passing() {
        let llm = Arc::new(ScriptedGateway::new(|system, _| {
            if system.contains("quality control expert") {
                return Ok(r#"{"suggestions": []}"#.to_string());
            }
            Ok(DRAFT.to_string())
        }));
        let result = generator(llm).generate("r", "h", "f").await;
        assert_eq!(result.validation.overall_score, 10.0);
        assert_eq!(result.refinement_iterations, 0);
    }

    #[tokio::test]
    async fn test_failure_returns_error_result() {
        let llm = Arc::new(ScriptedGateway::new(|system, _| {
            if system.contains("quality control expert") {
                bail!("validator down")
            }
            Ok(DRAFT.to_string())
        }));
        let result = generator(llm).generate("r", "h", "f").await;
        assert_eq!(result.status, GenerationStatus::Error);
        assert!(result.requirements.is_empty());
        assert_eq!(result.validation.overall_score, 0.0);
        assert_eq!(result.validation.suggestions, vec!["validator down".to_string()]);

        let unparseable = Arc::new(ScriptedGateway::fixed("I cannot help with that"));
        let result = generator(unparseable).generate("r", "h", "f").await;
        assert_eq!(result.status, GenerationStatus::Error);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_loose_draft_and_partial_scores_are_accepted() {
        let llm = Arc::new(ScriptedGateway::new(|system, _| {
            if system.contains("quality control expert") {
                return Ok(r#"{"scores": {"ambiguity": 8, "completeness": 8, "consistency": 8}, "overall_score": 8}"#.to_string());
            }
            Ok(r#"{"functional_requirements": ["Export orders as CSV", 42],
                   "use_cases": [{"name": "Export", "steps": ["open orders", "click export"]}],
                   "assumptions": "Single tenant"}"#
                .to_string())
        }));
        let result = generator(llm).generate("r", "h", "f").await;

        assert_eq!(result.status, GenerationStatus::Success);
        let scores = result.validation.scores.unwrap();
        assert_eq!(scores.completeness, 8.0);
        assert_eq!(scores.clarity, 0.0);
        assert_eq!(
            result.requirements.functional_requirements,
            vec!["Export orders as CSV".to_string(), "42".to_string()]
        );
        assert_eq!(result.requirements.use_cases.len(), 1);
        assert!(result.requirements.use_cases[0].contains("\"name\":\"Export\""));
        assert_eq!(result.requirements.assumptions, vec!["Single tenant".to_string()]);
    }

    fn sample_result() -> RequirementsResult {
        RequirementsResult {
            requirements: RequirementsDocument {
                functional_requirements: vec!["Login".to_string(), "Logout".to_string()],
                non_functional_requirements: vec!["Fast".to_string()],
                business_rules: vec!["Lock after 5".to_string()],
                use_cases: vec![],
                assumptions: vec!["IdP up".to_string()],
            },
            validation: ValidationReport {
                scores: Some(QualityScores {
                    ambiguity: 8.0,
                    completeness: 7.0,
                    consistency: 9.0,
                    clarity: 8.0,
                }),
                suggestions: vec!["Quantify fast".to_string()],
                overall_score: 8.0,
            },
            refinement_iterations: 1,
            status: GenerationStatus::Success,
            error: None,
        }
    }

    #[test]
    fn test_to_markdown_numbers_sections() {
        let markdown = to_markdown(&sample_result());
        assert!(markdown.starts_with("# Software Requirements Specification (SRS)"));
        assert!(markdown.contains("- **Generation Status**: success"));
        assert!(markdown.contains("- **Overall Score**: 8/10"));
        assert!(markdown.contains("### FR-001\nLogin"));
        assert!(markdown.contains("### FR-002\nLogout"));
        assert!(markdown.contains("### NFR-001\nFast"));
        assert!(markdown.contains("### BR-001\nLock after 5"));
        assert!(!markdown.contains("## 4. Use Cases"));
        assert!(markdown.contains("## 5. Assumptions\n\n- IdP up"));
        assert!(markdown.contains("## Quality Improvement Suggestions\n\n- Quantify fast"));
        assert_eq!(markdown, to_markdown(&sample_result()));
    }

    #[test]
    fn test_to_markdown_for_failed_result() {
        let failed = RequirementsResult::failed(&anyhow::anyhow!("boom"));
        let markdown = to_markdown(&failed);
        assert!(markdown.contains("- **Generation Status**: error"));
        assert!(!markdown.contains("## Quality Assessment"));
        assert!(markdown.contains("- boom"));
    }

    #[test]
    fn test_extract_entities_for_storage() {
        let entities = extract_entities_for_storage(&sample_result());
        let texts: Vec<&str> = entities.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(
            texts,
            vec!["FR-001: Login", "FR-002: Logout", "NFR-001: Fast", "BR-001: Lock after 5"]
        );
        assert_eq!(entities[2].1["type"], "non_functional_requirement");
        assert_eq!(entities[3].1["id"], "BR-001");
    }
}
