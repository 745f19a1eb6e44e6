//! 系统提示词与任务提示词
//!
//! 系统提示词优先读取配置的文件，其次 `config/prompts/system.txt`，都不存在时由工具描述生成内置版本。

use std::path::Path;

use crate::case::Case;
use crate::memory::Message;
use crate::tools::ToolRegistry;

const PROMPT_CANDIDATES: &[&str] = &["config/prompts/system.txt", "../config/prompts/system.txt"];

/// 持有系统提示词，按案例生成初始对话
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    system_prompt: String,
}

impl PromptBuilder {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
        }
    }

    /// 依次尝试 `path` 与默认位置，失败则用内置提示词
    pub fn load(path: Option<&Path>, registry: &ToolRegistry, mapping_param: &str) -> Self {
        let from_file = path
            .and_then(|p| match std::fs::read_to_string(p) {
                Ok(text) => Some(text),
                Err(e) => {
                    tracing::warn!(path = %p.display(), error = %e, "system prompt file unreadable, using default");
                    None
                }
            })
            .or_else(|| {
                PROMPT_CANDIDATES
                    .iter()
                    .find_map(|p| std::fs::read_to_string(p).ok())
            });
        match from_file {
            Some(text) if !text.trim().is_empty() => Self::new(text),
            _ => Self::new(default_system_prompt(registry, mapping_param)),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn task_prompt(&self, case: &Case, available_data: &str) -> String {
        format!(
            "<fault_case>\n\
             Please analyze the following fault case and perform root cause localization:\n\n\
             Fault Case UUID: {}\n\
             Anomaly Description: {}\n\
             </fault_case>\n\n\
             <available_data>\n{}\n</available_data>\n\n\
             <analysis_requirements>\n\
             You need to complete the following analysis tasks:\n\
             1. Analyze the time window when the fault occurred\n\
             2. Systematically analyze relevant monitoring data (logs, metrics, traces)\n\
             3. Identify the root cause component\n\
             4. Determine the fault reason\n\
             5. Provide a complete reasoning trace\n\
             </analysis_requirements>\n\n\
             <output_requirements>\n\
             - Each reasoning step must include a specific action and observation\n\
             - Keep each observation under 100 characters, highlighting key information\n\
             - Collect evidence across metrics, logs and traces\n\
             - Finally use attempt_completion to submit the result\n\
             </output_requirements>\n\n\
             <instructions>\nPlease start the analysis.\n</instructions>",
            case.id, case.description, available_data
        )
    }

    /// [system, 任务] 两条起始消息
    pub fn initial_messages(&self, case: &Case, available_data: &str) -> Vec<Message> {
        vec![
            Message::system(self.system_prompt.clone()),
            Message::user(self.task_prompt(case, available_data)),
        ]
    }
}

/// 内置系统提示词：工具调用格式 + 各工具描述
pub fn default_system_prompt(registry: &ToolRegistry, mapping_param: &str) -> String {
    let mut prompt = String::from(
        "You are an expert microservice fault diagnosis assistant. You work autonomously: \
         inspect monitoring data (logs, metrics, traces) with the tools below, identify the root \
         cause component, the fault reason and the time it occurred, then submit the result.\n\n\
         # Tool use\n\
         Use exactly one tool per step. The tool name is the tag name and each parameter is \
         enclosed in its own tag:\n\n\
         <tool_name>\n<parameter1_name>value1</parameter1_name>\n</tool_name>\n\n",
    );
    prompt.push_str(&format!(
        "The `{}` parameter is a literal mapping such as {{'nrows': 100, 'columns': ['@timestamp'], \
         'filters': [('level', '==', 'ERROR')]}}.\n\n# Tools\n",
        mapping_param
    ));
    for (name, desc) in registry.tool_descriptions() {
        prompt.push_str(&format!("\n## {}\n{}\n", name, desc));
    }
    prompt.push_str(
        "\n# Rules\n\
         - Preview a file before querying it and only use files listed in the task.\n\
         - Keep queries small: filter by time window, service or level and select key columns.\n\
         - Every response must contain a tool call; finish with attempt_completion.\n",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::CompletionTool;

    #[test]
    fn test_default_prompt_lists_tools() {
        let mut reg = ToolRegistry::new();
        reg.register(CompletionTool::new());
        let prompt = default_system_prompt(&reg, "read_options");
        assert!(prompt.contains("## attempt_completion"));
        assert!(prompt.contains("`read_options`"));
    }

    #[test]
    fn test_load_prefers_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("system.txt");
        std::fs::write(&path, "custom prompt").unwrap();
        let builder = PromptBuilder::load(Some(&path), &ToolRegistry::new(), "read_options");
        assert_eq!(builder.system_prompt(), "custom prompt");
    }

    #[test]
    fn test_initial_messages_embed_case() {
        let builder = PromptBuilder::new("sys");
        let msgs = builder.initial_messages(&Case::new("c-9", "latency spike"), "no files");
        assert_eq!(msgs.len(), 2);
        assert!(msgs[1].content.contains("Fault Case UUID: c-9"));
        assert!(msgs[1].content.contains("<available_data>\nno files\n</available_data>"));
    }
}
