use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// 用户角色，决定需求生成时的视角
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Role {
    #[default]
    RequirementsAnalyst,
    SoftwareArchitect,
    SoftwareDeveloper,
    TestEngineer,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::RequirementsAnalyst,
        Role::SoftwareArchitect,
        Role::SoftwareDeveloper,
        Role::TestEngineer,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Role::RequirementsAnalyst => "Requirements Analyst",
            Role::SoftwareArchitect => "Software Architect",
            Role::SoftwareDeveloper => "Software Developer",
            Role::TestEngineer => "Test Engineer",
        }
    }

    /// 按名称查找，忽略大小写以及空格/下划线/连字符的差异
    pub fn from_name(name: &str) -> Option<Role> {
        let key = normalize(name);
        Role::ALL.into_iter().find(|role| normalize(role.name()) == key)
    }

    /// 未知角色退回默认的需求分析师
    pub fn from_name_or_default(name: &str) -> Role {
        Role::from_name(name).unwrap_or_default()
    }

    fn persona(&self) -> (&'static str, &'static str, &'static str) {
        match self {
            Role::RequirementsAnalyst => (
                "You are an experienced business analyst focused on identifying business objectives, user processes, stakeholder needs, and potential risks.",
                "analyze and generate or refine software requirements to ensure coverage of both functional and non-functional aspects",
                "Please provide clear, structured requirements that conform to ISO 29148 and IEEE-830 standards.",
            ),
            Role::SoftwareArchitect => (
                "You are a senior software architect focused on system design, architecture patterns, scalability, maintainability, and technical decisions.",
                "analyze the requirements and provide architectural recommendations, design patterns, and technical specifications",
                "Please provide comprehensive architectural guidance that ensures system quality and long-term maintainability.",
            ),
            Role::SoftwareDeveloper => (
                "You are an experienced software developer focused on implementation details, code structure, APIs, data models, and development best practices.",
                "analyze the requirements and provide implementation guidance, technical specifications, and development recommendations",
                "Please provide practical development guidance that ensures code quality and efficient implementation.",
            ),
            Role::TestEngineer => (
                "You are a senior test engineer focused on test scenarios, boundary conditions, error handling, and quality assurance.",
                "generate test cases and verify the consistency of requirements",
                "Please provide comprehensive test cases, quality metrics, and validation strategies to ensure software quality.",
            ),
        }
    }

    /// 渲染角色提示词
    pub fn prompt(&self, focus: &str, history: &str) -> String {
        let (intro, task, closing) = self.persona();
        format!(
            "{}\n\nBased on the following conversation history and focus {}, {}.\n\nHistory: {}\n\n{}",
            intro, focus, task, history, closing
        )
    }
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .flat_map(|c| c.to_lowercase())
        .collect()
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
