//! Built-in prompt prose used when no stored template matches.

use crate::model::{ContentType, TargetLength};

use super::classify::OptimizationBand;

/// Writer persona per content type.
pub fn role_definition(content_type: ContentType) -> &'static str {
    match content_type {
        ContentType::Technical => {
            "一位资深的技术内容创作者，具有丰富的技术写作经验和深厚的行业背景"
        }
        ContentType::News => "一位经验丰富的新闻编辑，擅长将信息转化为引人入胜的新闻报道",
        ContentType::Tutorial => "一位专业的教育内容创作者，善于将复杂概念转化为易懂的教程",
        ContentType::General => "一位专业的内容创作专家，具有多年的写作和编辑经验",
    }
}

/// Optimization objective for a band, with a stronger note from round two.
pub fn optimization_objective(band: OptimizationBand, round: u32) -> String {
    let base = match band {
        OptimizationBand::Light => "对内容进行轻度优化，提升自然度和可读性",
        OptimizationBand::Standard => "对内容进行中度改写，显著降低AI痕迹",
        OptimizationBand::Heavy => "对内容进行深度重构，彻底消除AI生成特征",
    };

    if round > 1 {
        format!("{base}（第{round}轮优化，需要更加彻底的改写）")
    } else {
        base.to_string()
    }
}

fn band_requirements(band: OptimizationBand) -> &'static [&'static str] {
    match band {
        OptimizationBand::Light => &[
            "调整部分句式结构，增加表达的自然性",
            "适当添加一些个人化的表达方式",
            "保持原文的整体风格和语调",
        ],
        OptimizationBand::Standard => &[
            "显著改变句式结构和表达方式",
            "增加更多个人化的见解和评论",
            "调整段落组织，使其更符合人类写作习惯",
            "添加适当的口语化表达和语气词",
        ],
        OptimizationBand::Heavy => &[
            "彻底重构文章的表达方式和语言风格",
            "大量增加个人化的观点、经验和感受",
            "完全改变句式模式，避免AI写作的规整性",
            "添加丰富的情感色彩和主观判断",
            "模拟真实的人类思维过程和表达习惯",
            "增加不规则的语言特征和个性化表达",
        ],
    }
}

fn content_type_requirements(content_type: ContentType) -> &'static [&'static str] {
    match content_type {
        ContentType::Technical => &[
            "保持技术术语的准确性和专业性",
            "添加个人的技术见解和实践经验",
            "适当分享相关的技术背景和应用场景",
        ],
        ContentType::News => &[
            "增加新闻评论和个人观点",
            "添加对事件的分析和预测",
            "融入时事背景和相关联想",
        ],
        ContentType::Tutorial => &[
            "增加个人的学习心得和实践建议",
            "添加常见问题和解决方案的分享",
            "融入教学经验和学习技巧",
        ],
        ContentType::General => &[
            "增加个人的生活感悟和经验分享",
            "添加相关的联想和思考过程",
        ],
    }
}

fn platform_requirements(platform: &str) -> &'static [&'static str] {
    match platform {
        "toutiao" => &[
            "标题要有吸引力，内容要有话题性",
            "适合大众阅读，语言通俗易懂",
            "增加互动性和争议性元素",
        ],
        "weixin" => &[
            "内容要有价值，适合分享传播",
            "语言要精准，逻辑要清晰",
            "增加实用性和可操作性",
        ],
        "zhihu" => &[
            "内容要专业深入，有知识价值",
            "逻辑要严密，论证要充分",
            "增加专业性和权威性",
        ],
        _ => &[],
    }
}

/// Banded requirement list joined for the `{level_requirements}` slot.
pub fn level_requirements_text(band: OptimizationBand) -> String {
    band_requirements(band).join("; ")
}

/// Dynamic optimization prompt used when no stored template applies.
pub fn build_optimization_prompt(
    content: &str,
    band: OptimizationBand,
    round: u32,
    content_type: ContentType,
    detection_feedback: &str,
    platform: &str,
) -> String {
    let mut parts: Vec<String> = vec![
        format!("你是{}。", role_definition(content_type)),
        String::new(),
        format!("优化目标：{}", optimization_objective(band, round)),
        String::new(),
        "具体要求：".to_string(),
    ];

    let requirements = ["保持原文的核心观点和关键信息完整性", "确保内容的逻辑结构清晰合理"]
        .into_iter()
        .chain(band_requirements(band).iter().copied())
        .chain(content_type_requirements(content_type).iter().copied())
        .chain(platform_requirements(platform).iter().copied());
    for (i, req) in requirements.enumerate() {
        parts.push(format!("{}. {req}", i + 1));
    }

    if !detection_feedback.is_empty() {
        parts.push(String::new());
        parts.push(format!("检测反馈：{detection_feedback}"));
    }

    parts.push(String::new());
    parts.push("原文内容：".to_string());
    parts.push(content.to_string());
    parts.push(String::new());
    parts.push("请直接输出优化后的内容，不要添加任何解释或说明。".to_string());

    parts.join("\n")
}

/// Translation prompt with humanisation requirements built in.
pub fn build_translation_prompt(content: &str, title: &str, content_type: ContentType) -> String {
    let mut parts: Vec<String> = vec![
        format!(
            "你是{}，同时也是一位专业的翻译专家。",
            role_definition(content_type)
        ),
        String::new(),
        "请将以下英文内容翻译成中文，要求：".to_string(),
        String::new(),
        "1. 保持原文的核心观点和信息完整性".to_string(),
        "2. 使用自然流畅的中文表达，避免翻译腔".to_string(),
        "3. 适当调整句式以符合中文阅读习惯".to_string(),
        "4. 保留专业术语的准确性".to_string(),
        "5. 增加适当的本土化表达，使其更符合中文语境".to_string(),
        "6. 保持段落结构，但可以适当调整句子组织".to_string(),
        String::new(),
    ];

    if !title.is_empty() {
        parts.push(format!("文章标题：{title}"));
        parts.push(String::new());
    }

    parts.push("原文内容：".to_string());
    parts.push(content.to_string());
    parts.push(String::new());
    parts.push("请直接输出翻译结果，不要添加任何解释或说明。".to_string());

    parts.join("\n")
}

/// Creation prompt for topic-based articles.
pub fn build_creation_prompt(
    topic: &str,
    keywords: &[String],
    requirements: &str,
    target_length: TargetLength,
) -> String {
    let mut parts: Vec<String> = vec![
        "你是一位专业的内容创作专家。请根据以下要求创作一篇高质量的文章：".to_string(),
        String::new(),
        format!("主题：{topic}"),
    ];

    if !keywords.is_empty() {
        parts.push(format!("关键词：{}", keywords.join(", ")));
    }
    if !requirements.is_empty() {
        parts.push(format!("创作要求：{requirements}"));
    }

    parts.push(String::new());
    parts.push("请确保文章：".to_string());
    parts.push("1. 内容原创且有深度".to_string());
    parts.push("2. 结构清晰，逻辑性强".to_string());
    parts.push("3. 语言流畅，符合中文表达习惯".to_string());
    parts.push("4. 包含实用价值和见解".to_string());
    parts.push(format!("5. 字数严格控制在 {} 字之间", target_length.char_range()));
    parts.push(String::new());
    parts.push("请直接输出文章内容，不需要额外的说明。".to_string());

    parts.join("\n")
}

/// Re-entry prompt aimed at detector-surface features rather than
/// surface polish. Used when previously accepted content re-detected
/// above threshold.
pub fn build_ai_reduction_prompt(
    content: &str,
    content_type: ContentType,
    round: u32,
) -> String {
    let mut parts: Vec<String> = vec![
        format!("你是{}。", role_definition(content_type)),
        String::new(),
        "这篇文章之前已经通过了AI检测，但复检时又被判定为机器生成。".to_string(),
        "请针对检测器关注的文本特征做一次专项改写，而不是简单润色：".to_string(),
        String::new(),
        "1. 打破均匀的句长分布，长短句交错，允许偶尔的不完整句".to_string(),
        "2. 打乱过于规整的段落节奏，段落长度不要一致".to_string(),
        "3. 替换高频书面连接词（因此、总之、此外），改用口语化的过渡".to_string(),
        "4. 在关键论点处加入第一人称的犹豫、转折和自我修正".to_string(),
        "5. 保留原文的全部事实、数据和核心观点，不得增删信息".to_string(),
    ];

    if round > 1 {
        parts.push(format!(
            "6. 这是第{round}轮专项改写，上一轮的改动仍不够，请做更大幅度的句式变换"
        ));
    }

    parts.push(String::new());
    parts.push("原文内容：".to_string());
    parts.push(content.to_string());
    parts.push(String::new());
    parts.push("请直接输出改写后的内容，不要添加任何解释或说明。".to_string());

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimization_prompt_contains_band_requirements() {
        let prompt = build_optimization_prompt(
            "正文",
            OptimizationBand::Heavy,
            1,
            ContentType::Technical,
            "",
            "toutiao",
        );
        assert!(prompt.contains("深度重构"));
        assert!(prompt.contains("保持技术术语的准确性和专业性"));
        assert!(prompt.contains("标题要有吸引力"));
        assert!(prompt.contains("正文"));
        assert!(!prompt.contains("检测反馈"));
    }

    #[test]
    fn test_round_two_objective_marked() {
        let objective = optimization_objective(OptimizationBand::Standard, 3);
        assert!(objective.contains("第3轮优化"));
        assert!(!optimization_objective(OptimizationBand::Standard, 1).contains("轮优化"));
    }

    #[test]
    fn test_feedback_included_when_present() {
        let prompt = build_optimization_prompt(
            "正文",
            OptimizationBand::Standard,
            2,
            ContentType::General,
            "当前AI概率为60%，需要降低到25%以下",
            "toutiao",
        );
        assert!(prompt.contains("检测反馈：当前AI概率为60%"));
    }

    #[test]
    fn test_translation_prompt_title_optional() {
        let with_title = build_translation_prompt("text", "My Title", ContentType::General);
        assert!(with_title.contains("文章标题：My Title"));

        let without = build_translation_prompt("text", "", ContentType::General);
        assert!(!without.contains("文章标题"));
    }

    #[test]
    fn test_creation_prompt_uses_target_length() {
        let prompt = build_creation_prompt(
            "分布式一致性算法",
            &["raft".into(), "paxos".into()],
            "",
            TargetLength::Medium,
        );
        assert!(prompt.contains("主题：分布式一致性算法"));
        assert!(prompt.contains("关键词：raft, paxos"));
        assert!(prompt.contains("800-1500"));
        assert!(!prompt.contains("创作要求"));
    }

    #[test]
    fn test_ai_reduction_prompt_targets_detector_features() {
        let prompt = build_ai_reduction_prompt("正文", ContentType::General, 1);
        assert!(prompt.contains("句长分布"));
        assert!(prompt.contains("复检"));
        assert!(!prompt.contains("第1轮专项改写"));

        let round2 = build_ai_reduction_prompt("正文", ContentType::General, 2);
        assert!(round2.contains("第2轮专项改写"));
    }
}
