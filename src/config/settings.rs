use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 网关配置：支持 TOML 文件（custom-config.toml / config.toml）加载，
/// 环境变量可覆盖关键字段；缺省时使用内置默认值。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub models: ModelsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub path: String,
    pub api_key: Option<String>,
    /// Call B 初始连接与非流式调用的整体超时（秒）。
    pub request_timeout_secs: f64,
    /// 摘要调用（Call A/C）单次尝试超时（秒）。
    pub summary_timeout_secs: f64,
    /// 首次尝试之外的重试次数（默认 2，即最多 3 次尝试）。
    pub max_retries: u32,
    /// 指数退避基准延迟（秒），按尝试序号翻倍。
    pub retry_backoff_secs: f64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            path: "/chat/completions".to_string(),
            api_key: None,
            request_timeout_secs: 60.0,
            summary_timeout_secs: 10.0,
            max_retries: 2,
            retry_backoff_secs: 1.0,
        }
    }
}

impl UpstreamConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_secs)
    }

    pub fn summary_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.summary_timeout_secs)
    }

    pub fn completions_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 送入推理摘要调用前，推理文本保留的最大字符数。
    pub max_reasoning_chars: usize,
    /// 上游原生 reasoning 字段是否优先于标签解析。
    pub enable_parse_reasoning: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_reasoning_chars: 8000,
            enable_parse_reasoning: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// 模型白名单；None 表示不限制。
    pub allow: Option<Vec<String>>,
    pub summary_model_default: Option<String>,
    /// 通过原生 reasoning 字段输出思考内容的模型。
    #[serde(default)]
    pub native_reasoning_models: Vec<String>,
}

impl Settings {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let mut settings = match Self::find_config_file() {
            Some(path) => {
                let config_content = std::fs::read_to_string(&path)?;
                toml::from_str(&config_content)?
            }
            None => Settings::default(),
        };
        settings.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(settings)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let config_content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&config_content)?)
    }

    fn find_config_file() -> Option<String> {
        let possible_names = ["custom-config.toml", "config.toml"];
        possible_names
            .iter()
            .find(|name| Path::new(name).exists())
            .map(|name| name.to_string())
    }

    /// 环境变量覆盖（变量名沿用部署惯例）。lookup 注入便于测试。
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("GATEWAY_HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("GATEWAY_PORT")
            && let Ok(port) = v.parse()
        {
            self.server.port = port;
        }
        if let Some(v) = lookup("UPSTREAM_BASE_URL") {
            self.upstream.base_url = v;
        }
        if let Some(v) = lookup("UPSTREAM_PATH") {
            self.upstream.path = v;
        }
        if let Some(v) = lookup("UPSTREAM_API_KEY")
            && !v.trim().is_empty()
        {
            self.upstream.api_key = Some(v);
        }
        if let Some(v) = lookup("REQUEST_TIMEOUT")
            && let Ok(secs) = v.parse()
        {
            self.upstream.request_timeout_secs = secs;
        }
        if let Some(v) = lookup("SUMMARY_TIMEOUT")
            && let Ok(secs) = v.parse()
        {
            self.upstream.summary_timeout_secs = secs;
        }
        if let Some(v) = lookup("UPSTREAM_MAX_RETRIES")
            && let Ok(n) = v.parse()
        {
            self.upstream.max_retries = n;
        }
        if let Some(v) = lookup("UPSTREAM_RETRY_BACKOFF")
            && let Ok(secs) = v.parse()
        {
            self.upstream.retry_backoff_secs = secs;
        }
        if let Some(v) = lookup("MAX_REASONING_CHARS")
            && let Ok(n) = v.parse()
        {
            self.pipeline.max_reasoning_chars = n;
        }
        if let Some(v) = lookup("ENABLE_PARSE_REASONING") {
            self.pipeline.enable_parse_reasoning =
                matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = lookup("ALLOW_MODELS") {
            let models: Vec<String> = v
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
            self.models.allow = if models.is_empty() {
                None
            } else {
                Some(models)
            };
        }
        if let Some(v) = lookup("SUMMARY_MODEL_DEFAULT")
            && !v.trim().is_empty()
        {
            self.models.summary_model_default = Some(v);
        }
    }
}
