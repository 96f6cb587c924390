#[cfg(test)]
mod tests {
    use crate::utils::json_extract::{ParseFailure, extract_json, extract_json_value};
    use crate::utils::threads::do_parallel_with_limit;
    use crate::utils::token_estimator::TokenEstimator;
    use crate::utils::{hash_text, preview, truncate_chars};
    use serde::Deserialize;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Task {
        task: String,
        priority: u32,
    }

    #[test]
    fn test_extract_json_from_fenced_block() {
        let text = "好的，下面是计划：\n```json\n[{\"task\": \"a\", \"priority\": 2}]\n```\n希望有帮助";
        let tasks: Vec<Task> = extract_json(text).unwrap();
        assert_eq!(
            tasks,
            vec![Task {
                task: "a".to_string(),
                priority: 2
            }]
        );
    }

    #[test]
    fn test_extract_json_from_plain_fence() {
        let text = "```\n{\"entities\": [\"REQ-001\"]}\n```";
        let value = extract_json_value(text).unwrap();
        assert_eq!(value["entities"][0], "REQ-001");
    }

    #[test]
    fn test_extract_json_with_surrounding_prose() {
        let text = "Here you go: {\"a\": {\"b\": [1, 2]}} and some trailing words }";
        let value = extract_json_value(text).unwrap();
        assert_eq!(value["a"]["b"][1], 2);
    }

    #[test]
    fn test_extract_json_skips_unbalanced_prefix() {
        let text = "see [note] then {\"ok\": true}";
        let value = extract_json_value(text).unwrap();
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn test_extract_json_braces_inside_strings() {
        let text = "{\"text\": \"a } tricky { string\", \"n\": 1}";
        let value = extract_json_value(text).unwrap();
        assert_eq!(value["n"], 1);
    }

    #[test]
    fn test_extract_json_not_found() {
        assert_eq!(
            extract_json_value("no json here at all"),
            Err(ParseFailure::NotFound)
        );
    }

    #[test]
    fn test_extract_json_type_mismatch() {
        let result: Result<Vec<Task>, _> = extract_json("{\"unexpected\": 1}");
        assert!(matches!(result, Err(ParseFailure::Mismatch(_))));
    }

    #[tokio::test]
    async fn test_parallel_preserves_order_and_bounds_concurrency() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let futures: Vec<_> = (0..8)
            .map(|i| {
                let active = active.clone();
                let peak = peak.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    // 让后面的任务先完成，检验结果仍按下标排列
                    tokio::time::sleep(Duration::from_millis(40 - i * 4)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    i
                }
            })
            .collect();

        let results = do_parallel_with_limit(futures, 3).await;
        assert_eq!(results, (0..8).collect::<Vec<u64>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_parallel_zero_limit_still_runs() {
        let futures: Vec<_> = (0..3).map(|i| async move { i * 2 }).collect();
        assert_eq!(do_parallel_with_limit(futures, 0).await, vec![0, 2, 4]);
    }

    #[test]
    fn test_token_estimator() {
        let estimator = TokenEstimator::new();
        assert_eq!(estimator.estimate(""), 0);
        assert_eq!(estimator.estimate("abcdefgh"), 2);
        assert_eq!(estimator.estimate("需求分析"), 3);
        assert!(estimator.exceeds_limit(&"word ".repeat(100), 50));
        assert_eq!(estimator.estimate_all(["abcd", "efgh"]), 2);
    }

    #[test]
    fn test_text_helpers() {
        assert_eq!(truncate_chars("需求分析助手", 2), "需求");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(preview("abcdef", 3), "abc...");
        assert_eq!(preview("abc", 3), "abc");
        assert_eq!(hash_text("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }
}
