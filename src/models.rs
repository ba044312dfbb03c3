//! # Model metadata
//!
//! Static lookup table of supported chat models. Each entry maps a short
//! alias (what users type) to the canonical model identifier, the company
//! that trained it, and the runtime that executes it. The provider and the
//! runtime differ for models served locally: `gemma3` is a Google model but
//! runs through Ollama.
//!
//! Resolution accepts either the alias or the canonical name, case
//! insensitively, and an unknown name fails with an error naming the valid
//! alternatives.

use std::fmt;
use thiserror::Error;

/// Who executes the model. This is the closed set the backend dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Runtime {
    OpenAi,
    Anthropic,
    Google,
    XAi,
    /// Local models served by an Ollama daemon.
    Ollama,
}

impl Runtime {
    pub fn is_local(self) -> bool {
        matches!(self, Runtime::Ollama)
    }
}

/// Metadata for one supported model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelInfo {
    /// Short name users type, e.g. `claude-3.5`.
    pub alias: &'static str,
    /// Canonical identifier sent to the backend, e.g. `claude-3-5-haiku-latest`.
    pub full_name: &'static str,
    pub display_name: &'static str,
    /// Company that trained the model.
    pub provider: &'static str,
    pub runtime: Runtime,
    pub context_window: u32,
}

/// The supported-model table. Order is the display order.
pub static SUPPORTED_MODELS: &[ModelInfo] = &[
    ModelInfo {
        alias: "gpt-4o-mini",
        full_name: "gpt-4o-mini",
        display_name: "GPT-4o Mini",
        provider: "OpenAI",
        runtime: Runtime::OpenAi,
        context_window: 128_000,
    },
    ModelInfo {
        alias: "gpt-4.1",
        full_name: "gpt-4.1",
        display_name: "GPT-4.1",
        provider: "OpenAI",
        runtime: Runtime::OpenAi,
        context_window: 1_047_576,
    },
    ModelInfo {
        alias: "o4-mini",
        full_name: "o4-mini",
        display_name: "o4 Mini",
        provider: "OpenAI",
        runtime: Runtime::OpenAi,
        context_window: 200_000,
    },
    ModelInfo {
        alias: "claude-3.7",
        full_name: "claude-3-7-sonnet-latest",
        display_name: "Claude 3.7 Sonnet",
        provider: "Anthropic",
        runtime: Runtime::Anthropic,
        context_window: 200_000,
    },
    ModelInfo {
        alias: "claude-3.5",
        full_name: "claude-3-5-haiku-latest",
        display_name: "Claude 3.5 Haiku",
        provider: "Anthropic",
        runtime: Runtime::Anthropic,
        context_window: 200_000,
    },
    ModelInfo {
        alias: "gemini-2.5-flash",
        full_name: "gemini-2.5-flash-preview-04-17",
        display_name: "Gemini 2.5 Flash",
        provider: "Google",
        runtime: Runtime::Google,
        context_window: 1_048_576,
    },
    ModelInfo {
        alias: "grok-3",
        full_name: "grok-3-mini-beta",
        display_name: "Grok 3",
        provider: "xAI",
        runtime: Runtime::XAi,
        context_window: 131_072,
    },
    ModelInfo {
        alias: "llama-3.3",
        full_name: "llama3.3",
        display_name: "Llama 3.3",
        provider: "Meta",
        runtime: Runtime::Ollama,
        context_window: 128_000,
    },
    ModelInfo {
        alias: "gemma3",
        full_name: "gemma3",
        display_name: "Gemma 3",
        provider: "Google",
        runtime: Runtime::Ollama,
        context_window: 128_000,
    },
    ModelInfo {
        alias: "deepseek-r1",
        full_name: "deepseek-r1",
        display_name: "DeepSeek R1",
        provider: "DeepSeek",
        runtime: Runtime::Ollama,
        context_window: 128_000,
    },
    ModelInfo {
        alias: "phi-4-mini",
        full_name: "phi4-mini",
        display_name: "Phi-4 Mini",
        provider: "Microsoft",
        runtime: Runtime::Ollama,
        context_window: 128_000,
    },
];

/// Raised when a name matches neither an alias nor a canonical identifier.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("model '{0}' is not a supported model")]
pub struct UnsupportedModel(pub String);

/// Resolve an alias or canonical name into its metadata entry.
pub fn resolve(name_or_alias: &str) -> Result<&'static ModelInfo, UnsupportedModel> {
    let wanted = name_or_alias.to_lowercase();
    SUPPORTED_MODELS
        .iter()
        .find(|info| info.alias == wanted || info.full_name.to_lowercase() == wanted)
        .ok_or_else(|| UnsupportedModel(name_or_alias.to_string()))
}

/// Pretty list of supported models, grouped into hosted and local sections.
pub fn list_supported() -> String {
    let mut out = String::from("Hosted models:\n");
    for info in SUPPORTED_MODELS.iter().filter(|m| !m.runtime.is_local()) {
        write_entry(&mut out, info);
    }
    out.push_str("\nLocal models (require Ollama):\n");
    for info in SUPPORTED_MODELS.iter().filter(|m| m.runtime.is_local()) {
        write_entry(&mut out, info);
    }
    out
}

fn write_entry(out: &mut String, info: &ModelInfo) {
    use fmt::Write;
    let _ = writeln!(
        out,
        "  {} -> {} ({}, {} ctx)",
        info.alias, info.display_name, info.provider, info.context_window
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_alias_and_canonical_name() {
        let by_alias = resolve("claude-3.5").unwrap();
        assert_eq!(by_alias.full_name, "claude-3-5-haiku-latest");

        let by_full = resolve("CLAUDE-3-5-HAIKU-LATEST").unwrap();
        assert_eq!(by_full.alias, "claude-3.5");
    }

    #[test]
    fn unknown_model_is_rejected() {
        let err = resolve("gpt-9000").unwrap_err();
        assert_eq!(err, UnsupportedModel("gpt-9000".to_string()));
    }

    #[test]
    fn listing_mentions_every_alias() {
        let listing = list_supported();
        for info in SUPPORTED_MODELS {
            assert!(listing.contains(info.alias), "missing {}", info.alias);
        }
    }
}
