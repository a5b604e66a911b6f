//! Descriptor table for every shipped HTTP provider.
//!
//! A descriptor names the endpoint, the wire family, the auth header
//! shape, the key's environment variable, and a default model. The
//! [`super::adapter::HttpAdapter`] template does the rest, so a new
//! provider is one entry here.

use crate::auth::AuthHeader;
use crate::providers::wire::WireFamily;

/// Static description of one HTTP provider.
#[derive(Debug, Clone, Copy)]
pub struct ProviderDescriptor {
    pub name: &'static str,
    /// API-key environment variable consulted by auto-discovery
    pub env_key: &'static str,
    pub default_base_url: &'static str,
    /// Path of the chat/messages endpoint relative to the base URL
    pub chat_path: &'static str,
    /// GET path for health probes; `None` falls back to a one-token
    /// completion
    pub models_path: Option<&'static str>,
    pub wire: WireFamily,
    pub auth: AuthHeader,
    pub default_model: &'static str,
    /// Headers this provider requires on every request
    pub extra_headers: &'static [(&'static str, &'static str)],
    pub vision: bool,
    pub reasoning: bool,
    pub models: &'static [&'static str],
}

impl ProviderDescriptor {
    /// Environment variable that overrides the base URL, derived from
    /// the provider name (`ANTHROPIC_BASE_URL`, `GROQ_BASE_URL`, ...).
    pub fn base_url_env(&self) -> String {
        format!("{}_BASE_URL", self.name.to_uppercase())
    }
}

/// Every shipped provider. Ordering is cosmetic; the registry orders by
/// verifier score at dispatch time.
pub static CATALOG: &[ProviderDescriptor] = &[
    ProviderDescriptor {
        name: "anthropic",
        env_key: "ANTHROPIC_API_KEY",
        default_base_url: "https://api.anthropic.com",
        chat_path: "/v1/messages",
        models_path: None,
        wire: WireFamily::Anthropic,
        auth: AuthHeader::Header("x-api-key"),
        default_model: "claude-sonnet-4-20250514",
        extra_headers: &[("anthropic-version", super::wire_anthropic::API_VERSION)],
        vision: true,
        reasoning: true,
        models: &[
            "claude-opus-4-20250514",
            "claude-sonnet-4-20250514",
            "claude-3-7-sonnet-20250219",
            "claude-3-5-haiku-20241022",
        ],
    },
    ProviderDescriptor {
        name: "openai",
        env_key: "OPENAI_API_KEY",
        default_base_url: "https://api.openai.com/v1",
        chat_path: "/chat/completions",
        models_path: Some("/models"),
        wire: WireFamily::OpenAi,
        auth: AuthHeader::Bearer,
        default_model: "gpt-4o",
        extra_headers: &[],
        vision: true,
        reasoning: true,
        models: &["gpt-4o", "gpt-4o-mini", "gpt-4.1", "o3-mini"],
    },
    ProviderDescriptor {
        name: "azure",
        env_key: "AZURE_OPENAI_API_KEY",
        default_base_url: "https://example.openai.azure.com/openai/deployments/gpt-4o",
        chat_path: "/chat/completions",
        models_path: None,
        wire: WireFamily::OpenAi,
        auth: AuthHeader::Header("api-key"),
        default_model: "gpt-4o",
        extra_headers: &[],
        vision: true,
        reasoning: false,
        models: &["gpt-4o", "gpt-4o-mini", "gpt-35-turbo"],
    },
    ProviderDescriptor {
        name: "gemini",
        env_key: "GEMINI_API_KEY",
        default_base_url: "https://generativelanguage.googleapis.com/v1beta/openai",
        chat_path: "/chat/completions",
        models_path: Some("/models"),
        wire: WireFamily::OpenAi,
        auth: AuthHeader::Bearer,
        default_model: "gemini-2.0-flash",
        extra_headers: &[],
        vision: true,
        reasoning: true,
        models: &["gemini-2.0-flash", "gemini-2.0-pro", "gemini-1.5-pro"],
    },
    ProviderDescriptor {
        name: "groq",
        env_key: "GROQ_API_KEY",
        default_base_url: "https://api.groq.com/openai/v1",
        chat_path: "/chat/completions",
        models_path: Some("/models"),
        wire: WireFamily::OpenAi,
        auth: AuthHeader::Bearer,
        default_model: "llama-3.3-70b-versatile",
        extra_headers: &[],
        vision: false,
        reasoning: false,
        models: &["llama-3.3-70b-versatile", "llama-3.1-8b-instant", "mixtral-8x7b-32768"],
    },
    ProviderDescriptor {
        name: "mistral",
        env_key: "MISTRAL_API_KEY",
        default_base_url: "https://api.mistral.ai/v1",
        chat_path: "/chat/completions",
        models_path: Some("/models"),
        wire: WireFamily::OpenAi,
        auth: AuthHeader::Bearer,
        default_model: "mistral-large-latest",
        extra_headers: &[],
        vision: false,
        reasoning: false,
        models: &["mistral-large-latest", "mistral-small-latest", "codestral-latest"],
    },
    ProviderDescriptor {
        name: "cohere",
        env_key: "COHERE_API_KEY",
        default_base_url: "https://api.cohere.ai/compatibility/v1",
        chat_path: "/chat/completions",
        models_path: Some("/models"),
        wire: WireFamily::OpenAi,
        auth: AuthHeader::Bearer,
        default_model: "command-r-plus",
        extra_headers: &[],
        vision: false,
        reasoning: false,
        models: &["command-r-plus", "command-r", "command-light"],
    },
    ProviderDescriptor {
        name: "perplexity",
        env_key: "PERPLEXITY_API_KEY",
        default_base_url: "https://api.perplexity.ai",
        chat_path: "/chat/completions",
        models_path: None,
        wire: WireFamily::OpenAi,
        auth: AuthHeader::Bearer,
        default_model: "sonar-pro",
        extra_headers: &[],
        vision: false,
        reasoning: true,
        models: &["sonar-pro", "sonar", "sonar-reasoning"],
    },
    ProviderDescriptor {
        name: "openrouter",
        env_key: "OPENROUTER_API_KEY",
        default_base_url: "https://openrouter.ai/api/v1",
        chat_path: "/chat/completions",
        models_path: Some("/models"),
        wire: WireFamily::OpenAi,
        auth: AuthHeader::Bearer,
        default_model: "openrouter/auto",
        extra_headers: &[("x-title", "hivemind")],
        vision: true,
        reasoning: true,
        models: &["openrouter/auto"],
    },
    ProviderDescriptor {
        name: "ollama",
        // No key; discovery triggers on an explicit host instead.
        env_key: "OLLAMA_BASE_URL",
        default_base_url: "http://localhost:11434/v1",
        chat_path: "/chat/completions",
        models_path: Some("/models"),
        wire: WireFamily::OpenAi,
        auth: AuthHeader::None,
        default_model: "llama3.1",
        extra_headers: &[],
        vision: false,
        reasoning: false,
        models: &["llama3.1", "llama3.2", "mistral", "qwen2.5"],
    },
    ProviderDescriptor {
        name: "deepseek",
        env_key: "DEEPSEEK_API_KEY",
        default_base_url: "https://api.deepseek.com/v1",
        chat_path: "/chat/completions",
        models_path: Some("/models"),
        wire: WireFamily::OpenAi,
        auth: AuthHeader::Bearer,
        default_model: "deepseek-chat",
        extra_headers: &[],
        vision: false,
        reasoning: true,
        models: &["deepseek-chat", "deepseek-reasoner"],
    },
    ProviderDescriptor {
        name: "together",
        env_key: "TOGETHER_API_KEY",
        default_base_url: "https://api.together.xyz/v1",
        chat_path: "/chat/completions",
        models_path: Some("/models"),
        wire: WireFamily::OpenAi,
        auth: AuthHeader::Bearer,
        default_model: "meta-llama/Llama-3.3-70B-Instruct-Turbo",
        extra_headers: &[],
        vision: false,
        reasoning: false,
        models: &["meta-llama/Llama-3.3-70B-Instruct-Turbo"],
    },
    ProviderDescriptor {
        name: "fireworks",
        env_key: "FIREWORKS_API_KEY",
        default_base_url: "https://api.fireworks.ai/inference/v1",
        chat_path: "/chat/completions",
        models_path: Some("/models"),
        wire: WireFamily::OpenAi,
        auth: AuthHeader::Bearer,
        default_model: "accounts/fireworks/models/llama-v3p3-70b-instruct",
        extra_headers: &[],
        vision: false,
        reasoning: false,
        models: &["accounts/fireworks/models/llama-v3p3-70b-instruct"],
    },
    ProviderDescriptor {
        name: "xai",
        env_key: "XAI_API_KEY",
        default_base_url: "https://api.x.ai/v1",
        chat_path: "/chat/completions",
        models_path: Some("/models"),
        wire: WireFamily::OpenAi,
        auth: AuthHeader::Bearer,
        default_model: "grok-2-latest",
        extra_headers: &[],
        vision: true,
        reasoning: true,
        models: &["grok-2-latest", "grok-2-vision-latest"],
    },
    ProviderDescriptor {
        name: "moonshot",
        env_key: "MOONSHOT_API_KEY",
        default_base_url: "https://api.moonshot.cn/v1",
        chat_path: "/chat/completions",
        models_path: Some("/models"),
        wire: WireFamily::OpenAi,
        auth: AuthHeader::Bearer,
        default_model: "moonshot-v1-8k",
        extra_headers: &[],
        vision: false,
        reasoning: false,
        models: &["moonshot-v1-8k", "moonshot-v1-32k", "moonshot-v1-128k"],
    },
    ProviderDescriptor {
        name: "zhipu",
        env_key: "ZHIPU_API_KEY",
        default_base_url: "https://open.bigmodel.cn/api/paas/v4",
        chat_path: "/chat/completions",
        models_path: None,
        wire: WireFamily::OpenAi,
        auth: AuthHeader::Bearer,
        default_model: "glm-4-plus",
        extra_headers: &[],
        vision: true,
        reasoning: false,
        models: &["glm-4-plus", "glm-4-flash", "glm-4v-plus"],
    },
    ProviderDescriptor {
        name: "qwen",
        env_key: "DASHSCOPE_API_KEY",
        default_base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1",
        chat_path: "/chat/completions",
        models_path: Some("/models"),
        wire: WireFamily::OpenAi,
        auth: AuthHeader::Bearer,
        default_model: "qwen-plus",
        extra_headers: &[],
        vision: true,
        reasoning: true,
        models: &["qwen-plus", "qwen-turbo", "qwen-max", "qwq-32b"],
    },
    ProviderDescriptor {
        name: "minimax",
        env_key: "MINIMAX_API_KEY",
        default_base_url: "https://api.minimax.chat/v1",
        chat_path: "/chat/completions",
        models_path: None,
        wire: WireFamily::OpenAi,
        auth: AuthHeader::Bearer,
        default_model: "abab6.5s-chat",
        extra_headers: &[],
        vision: false,
        reasoning: false,
        models: &["abab6.5s-chat", "abab6.5g-chat"],
    },
    ProviderDescriptor {
        name: "cerebras",
        env_key: "CEREBRAS_API_KEY",
        default_base_url: "https://api.cerebras.ai/v1",
        chat_path: "/chat/completions",
        models_path: Some("/models"),
        wire: WireFamily::OpenAi,
        auth: AuthHeader::Bearer,
        default_model: "llama-3.3-70b",
        extra_headers: &[],
        vision: false,
        reasoning: false,
        models: &["llama-3.3-70b", "llama-3.1-8b"],
    },
    ProviderDescriptor {
        name: "sambanova",
        env_key: "SAMBANOVA_API_KEY",
        default_base_url: "https://api.sambanova.ai/v1",
        chat_path: "/chat/completions",
        models_path: Some("/models"),
        wire: WireFamily::OpenAi,
        auth: AuthHeader::Bearer,
        default_model: "Meta-Llama-3.3-70B-Instruct",
        extra_headers: &[],
        vision: false,
        reasoning: false,
        models: &["Meta-Llama-3.3-70B-Instruct", "Meta-Llama-3.1-405B-Instruct"],
    },
    ProviderDescriptor {
        name: "nvidia",
        env_key: "NVIDIA_API_KEY",
        default_base_url: "https://integrate.api.nvidia.com/v1",
        chat_path: "/chat/completions",
        models_path: Some("/models"),
        wire: WireFamily::OpenAi,
        auth: AuthHeader::Bearer,
        default_model: "meta/llama-3.3-70b-instruct",
        extra_headers: &[],
        vision: false,
        reasoning: false,
        models: &["meta/llama-3.3-70b-instruct", "deepseek-ai/deepseek-r1"],
    },
    ProviderDescriptor {
        name: "deepinfra",
        env_key: "DEEPINFRA_API_KEY",
        default_base_url: "https://api.deepinfra.com/v1/openai",
        chat_path: "/chat/completions",
        models_path: Some("/models"),
        wire: WireFamily::OpenAi,
        auth: AuthHeader::Bearer,
        default_model: "meta-llama/Llama-3.3-70B-Instruct",
        extra_headers: &[],
        vision: false,
        reasoning: false,
        models: &["meta-llama/Llama-3.3-70B-Instruct"],
    },
    ProviderDescriptor {
        name: "hyperbolic",
        env_key: "HYPERBOLIC_API_KEY",
        default_base_url: "https://api.hyperbolic.xyz/v1",
        chat_path: "/chat/completions",
        models_path: Some("/models"),
        wire: WireFamily::OpenAi,
        auth: AuthHeader::Bearer,
        default_model: "meta-llama/Llama-3.3-70B-Instruct",
        extra_headers: &[],
        vision: false,
        reasoning: false,
        models: &["meta-llama/Llama-3.3-70B-Instruct", "Qwen/Qwen2.5-72B-Instruct"],
    },
];

/// Look up a descriptor by provider name.
pub fn descriptor(name: &str) -> Option<&'static ProviderDescriptor> {
    CATALOG.iter().find(|d| d.name == name)
}
