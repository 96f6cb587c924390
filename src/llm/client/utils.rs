use std::sync::LazyLock;

use crate::{config::LLMConfig, utils::token_estimator::TokenEstimator};

static TOKEN_ESTIMATOR: LazyLock<TokenEstimator> = LazyLock::new(TokenEstimator::new);

/// 长上下文直接使用高质量模型
const EFFICIENT_MODEL_TOKEN_BUDGET: usize = 8 * 1024;

/// 根据prompt规模选择模型，返回(首选模型, 失败时的备选模型)
pub fn evaluate_befitting_model(
    llm_config: &LLMConfig,
    system_prompt: &str,
    user_prompt: &str,
) -> (String, Option<String>) {
    let estimated = TOKEN_ESTIMATOR.estimate_all([system_prompt, user_prompt]);
    if estimated <= EFFICIENT_MODEL_TOKEN_BUDGET {
        let fallover = (llm_config.model_powerful != llm_config.model_efficient)
            .then(|| llm_config.model_powerful.clone());
        return (llm_config.model_efficient.clone(), fallover);
    }
    (llm_config.model_powerful.clone(), None)
}
