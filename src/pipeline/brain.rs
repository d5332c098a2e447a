//! Brain stage: consumes commands, produces reply text via a local GGUF
//! language model. Uses `llama-cpp-2`'s raw tokenize/decode/sampler-chain
//! API rather than a high-level chat wrapper, because every turn is
//! stateless (no conversational history survives across turns) and the
//! sampler chain itself — temperature, then top-k, then top-p, then a
//! seeded distribution sample — is part of the observable behavior under
//! test.

use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, OnceLock};

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;

use crate::config::LlmConfig;
use crate::error::{EdnaError, Result};
use crate::pipeline::messages::{Command, Reply};

/// Markers stripped from the tail of a reply, in case the model continues
/// past its turn into a simulated multi-turn chat transcript.
const STOP_MARKERS: &[&str] = &[
    "<|endoftext|>",
    "<|im_end|>",
    "\nHuman:",
    "\nUSER:",
    "\nUser:",
    "\n### Human:",
    "\n### Instruction:",
];

/// Opaque language model: maps user text to reply text.
pub trait Chatter: Send {
    fn reply(&mut self, command: &Command) -> Result<Reply>;
}

/// Process-wide native engine initialization, modeled as a shared
/// acquisition count: `init` on first acquire, `teardown` on last release,
/// guarded by a mutex.
struct BackendHandle {
    backend: Arc<LlamaBackend>,
    refcount: usize,
}

static BACKEND: OnceLock<Mutex<Option<BackendHandle>>> = OnceLock::new();

fn acquire_backend() -> Result<Arc<LlamaBackend>> {
    let cell = BACKEND.get_or_init(|| Mutex::new(None));
    let mut guard = cell.lock().expect("llama backend mutex poisoned");
    match guard.as_mut() {
        Some(handle) => {
            handle.refcount += 1;
            Ok(Arc::clone(&handle.backend))
        }
        None => {
            let backend = LlamaBackend::init()
                .map_err(|e| EdnaError::Llm(format!("failed to init llama backend: {e}")))?;
            let backend = Arc::new(backend);
            *guard = Some(BackendHandle {
                backend: Arc::clone(&backend),
                refcount: 1,
            });
            Ok(backend)
        }
    }
}

fn release_backend() {
    let Some(cell) = BACKEND.get() else { return };
    let mut guard = cell.lock().expect("llama backend mutex poisoned");
    if let Some(handle) = guard.as_mut() {
        handle.refcount -= 1;
        if handle.refcount == 0 {
            *guard = None;
        }
    }
}

/// `llama-cpp-2` binding against a local GGUF model. The model is loaded
/// exactly once at startup; every turn re-creates only the context and
/// sampler, all guarded by a single exclusive mutex since the underlying
/// engine is not thread-safe.
pub struct LlamaChatter {
    backend: Arc<LlamaBackend>,
    model: Arc<LlamaModel>,
    config: LlmConfig,
    lock: Mutex<()>,
}

impl LlamaChatter {
    /// # Errors
    ///
    /// Returns [`EdnaError::ModelNotFound`] if the GGUF file does not exist,
    /// or [`EdnaError::Llm`] if loading it fails.
    pub fn load(config: LlmConfig) -> Result<Self> {
        let model_path = std::path::Path::new(&config.model_path);
        if !model_path.exists() {
            return Err(EdnaError::ModelNotFound(model_path.to_path_buf()));
        }

        let backend = acquire_backend()?;
        let model_params = LlamaModelParams::default();
        let model = LlamaModel::load_from_file(&backend, model_path, &model_params)
            .map_err(|e| EdnaError::Llm(format!("failed to load model: {e}")))?;

        Ok(Self {
            backend,
            model: Arc::new(model),
            config,
            lock: Mutex::new(()),
        })
    }

    fn build_prompt(&self, command: &Command) -> String {
        format!(
            "{}\nUser: {}\nEdna:",
            self.config.system_prompt, command.0
        )
    }

    fn sampler_chain(&self) -> LlamaSampler {
        LlamaSampler::chain_simple([
            LlamaSampler::temp(self.config.temperature),
            LlamaSampler::top_k(self.config.top_k),
            LlamaSampler::top_p(self.config.top_p, 1),
            LlamaSampler::dist(self.config.seed),
        ])
    }

    fn generate(&self, ctx: &mut LlamaContext<'_>, prompt: &str) -> Result<String> {
        let tokens_list = self
            .model
            .str_to_token(prompt, AddBos::Always)
            .map_err(|e| EdnaError::Llm(format!("tokenization failed: {e}")))?;

        let max_prompt_tokens = self.config.max_prompt_tokens;
        let tokens_list = if tokens_list.len() > max_prompt_tokens {
            // Keep the tail, re-prepend BOS.
            let bos = tokens_list[0];
            let tail_start = tokens_list.len() - (max_prompt_tokens - 1);
            let mut truncated = Vec::with_capacity(max_prompt_tokens);
            truncated.push(bos);
            truncated.extend_from_slice(&tokens_list[tail_start..]);
            truncated
        } else {
            tokens_list
        };

        let n_ctx = ctx.n_ctx() as usize;
        let mut batch = LlamaBatch::new(n_ctx.max(512), 1);

        let last_index = tokens_list.len() - 1;
        for (i, token) in tokens_list.iter().enumerate() {
            let is_last = i == last_index;
            batch
                .add(*token, i as i32, &[0], is_last)
                .map_err(|e| EdnaError::Llm(format!("batch add failed: {e}")))?;
        }

        ctx.decode(&mut batch)
            .map_err(|e| EdnaError::Llm(format!("prompt decode failed: {e}")))?;

        let mut sampler = self.sampler_chain();
        let mut n_cur = batch.n_tokens();
        let mut reply = String::new();

        for _ in 0..self.config.max_new_tokens {
            let token = sampler.sample(ctx, batch.n_tokens() - 1);
            sampler.accept(token);

            if self.model.is_eog_token(token) {
                break;
            }

            let piece = self
                .model
                .token_to_str(token, Special::Tokenize)
                .unwrap_or_default();

            if self.config.stop_on_newline && piece.contains('\n') {
                break;
            }
            reply.push_str(&piece);

            batch.clear();
            batch
                .add(token, n_cur, &[0], true)
                .map_err(|e| EdnaError::Llm(format!("batch add failed: {e}")))?;
            n_cur += 1;

            ctx.decode(&mut batch)
                .map_err(|e| EdnaError::Llm(format!("decode failed: {e}")))?;
        }

        Ok(reply)
    }
}

impl Drop for LlamaChatter {
    fn drop(&mut self) {
        release_backend();
    }
}

impl Chatter for LlamaChatter {
    fn reply(&mut self, command: &Command) -> Result<Reply> {
        let _guard = self.lock.lock().expect("llama context mutex poisoned");

        let prompt = self.build_prompt(command);

        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(2048));
        let mut ctx = self
            .model
            .new_context(&self.backend, ctx_params)
            .map_err(|e| EdnaError::Llm(format!("failed to create context: {e}")))?;

        let raw = self.generate(&mut ctx, &prompt).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "LLM decode failure, returning marker reply");
            "[LLM_DECODE_FAILED]".to_string()
        });

        Ok(Reply(strip_stop_markers(&raw)))
    }
}

/// Trim, strip everything from the first occurrence of any stop marker,
/// trim again. Pure function, unit-tested directly.
fn strip_stop_markers(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut cut = trimmed.len();
    for marker in STOP_MARKERS {
        if let Some(pos) = trimmed.find(marker) {
            cut = cut.min(pos);
        }
    }
    trimmed[..cut].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_endoftext_marker() {
        assert_eq!(
            strip_stop_markers("The sky is blue.<|endoftext|>ignored"),
            "The sky is blue."
        );
    }

    #[test]
    fn strips_human_turn_marker() {
        assert_eq!(
            strip_stop_markers("Paris is the capital.\nHuman: and then?"),
            "Paris is the capital."
        );
    }

    #[test]
    fn no_marker_present_returns_trimmed_input() {
        assert_eq!(strip_stop_markers("  Hello there.  "), "Hello there.");
    }

    #[test]
    fn picks_earliest_of_multiple_markers() {
        let input = "A.\n### Instruction: B\n### Human: C";
        assert_eq!(strip_stop_markers(input), "A.");
    }
}
