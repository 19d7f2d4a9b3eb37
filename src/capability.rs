use std::collections::HashSet;

use crate::config::Settings;
use crate::error::{GatewayError, Result};

/// 从模型输出中提取推理内容的策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    /// 通过注入的 `<analysis>`/`<final>` 标签切分流式输出。
    TagBoundary,
    /// 上游在 delta 中携带独立 reasoning 字段。
    NativeReasoning,
}

/// 单个模型的解析能力描述，请求开始时解析一次，之后不再变化。
#[derive(Debug, Clone)]
pub struct ModelCapability {
    pub model: String,
    pub parse_strategy: ParseStrategy,
    /// 原生 reasoning 字段出现时是否优先于标签解析。
    pub native_field_preempts: bool,
    pub summary_model_default: Option<String>,
}

/// 模型能力注册表：进程启动时由配置快照构建，生命周期内不可变。
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    allow: Option<HashSet<String>>,
    native_reasoning_models: HashSet<String>,
    native_field_preempts: bool,
    summary_model_default: Option<String>,
}

impl CapabilityRegistry {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            allow: settings
                .models
                .allow
                .as_ref()
                .map(|models| models.iter().cloned().collect()),
            native_reasoning_models: settings
                .models
                .native_reasoning_models
                .iter()
                .cloned()
                .collect(),
            native_field_preempts: settings.pipeline.enable_parse_reasoning,
            summary_model_default: settings.models.summary_model_default.clone(),
        }
    }

    /// 纯查询，无副作用；白名单存在且未命中时返回 `UnknownModel`。
    pub fn resolve(&self, model_id: &str) -> Result<ModelCapability> {
        if let Some(allow) = &self.allow
            && !allow.contains(model_id)
        {
            return Err(GatewayError::UnknownModel(model_id.to_string()));
        }

        let parse_strategy = if self.native_reasoning_models.contains(model_id) {
            ParseStrategy::NativeReasoning
        } else {
            ParseStrategy::TagBoundary
        };

        Ok(ModelCapability {
            model: model_id.to_string(),
            parse_strategy,
            native_field_preempts: self.native_field_preempts,
            summary_model_default: self.summary_model_default.clone(),
        })
    }
}
