/// Token估算器
///
/// 不依赖具体模型的分词器，按字符类别粗略折算：英文约4字符一个token，
/// 中日韩文字约1.5字符一个token。用于记忆压缩和模型选择这类只需要量级的场景。
#[derive(Debug, Clone)]
pub struct TokenEstimator {
    ascii_chars_per_token: f64,
    cjk_chars_per_token: f64,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenEstimator {
    pub fn new() -> Self {
        Self {
            ascii_chars_per_token: 4.0,
            cjk_chars_per_token: 1.5,
        }
    }

    /// 估算单段文本的token数量
    pub fn estimate(&self, text: &str) -> usize {
        let (cjk, other) = text.chars().fold((0usize, 0usize), |(cjk, other), c| {
            if is_cjk(c) {
                (cjk + 1, other)
            } else {
                (cjk, other + 1)
            }
        });

        (cjk as f64 / self.cjk_chars_per_token).ceil() as usize
            + (other as f64 / self.ascii_chars_per_token).ceil() as usize
    }

    /// 估算多段文本的总token数量
    pub fn estimate_all<'a, I>(&self, texts: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        texts.into_iter().map(|text| self.estimate(text)).sum()
    }

    /// 检查文本是否超过token限制
    pub fn exceeds_limit(&self, text: &str, limit: usize) -> bool {
        self.estimate(text) > limit
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x4E00..=0x9FFF |   // CJK统一汉字
        0x3400..=0x4DBF |   // 扩展A
        0x3040..=0x30FF |   // 平假名/片假名
        0xAC00..=0xD7AF |   // 韩文音节
        0x20000..=0x2A6DF   // 扩展B
    )
}
