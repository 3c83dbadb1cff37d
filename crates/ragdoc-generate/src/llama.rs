use anyhow::{anyhow, Context};
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use candle_core::quantized::gguf_file;
use candle_core::{Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::quantized_llama::ModelWeights;
use tokenizers::Tokenizer;

use ragdoc_core::config::GenerationSettings;
use ragdoc_core::traits::{GenerationRequest, Generator};
use ragdoc_core::{Error, Result};

use crate::device::select_device;

const EOS_TOKEN: &str = "</s>";
const CONTEXT_LENGTH_KEY: &str = "llama.context_length";
const FALLBACK_CONTEXT_WINDOW: usize = 2048;

/// Quantized llama model read from a GGUF file, with `tokenizer.json`
/// expected in the same directory.
pub struct LlamaGenerator {
    // forward() mutates the KV cache
    model: Mutex<ModelWeights>,
    tokenizer: Tokenizer,
    device: Device,
    id: String,
    context_window: usize,
    eos_token: Option<u32>,
    temperature: f64,
    seed: u64,
}

impl LlamaGenerator {
    pub fn load(model_path: &Path, settings: &GenerationSettings) -> Result<Self> {
        Self::load_inner(model_path, settings).map_err(Error::Backend)
    }

    fn load_inner(model_path: &Path, settings: &GenerationSettings) -> anyhow::Result<Self> {
        let start = Instant::now();
        let device = select_device();
        let mut file = File::open(model_path).with_context(|| format!("opening {}", model_path.display()))?;
        let content = gguf_file::Content::read(&mut file)
            .map_err(|e| e.with_path(model_path))?;

        let reported = content
            .metadata
            .get(CONTEXT_LENGTH_KEY)
            .and_then(|v| v.to_u32().ok())
            .map(|v| v as usize);
        let context_window = settings.context_window.or(reported).unwrap_or(FALLBACK_CONTEXT_WINDOW);

        let model = ModelWeights::from_gguf(content, &mut file, &device)?;

        let dir = model_path.parent().unwrap_or_else(|| Path::new("."));
        let tokenizer_path = dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
        let eos_token = tokenizer.token_to_id(EOS_TOKEN);

        let id = model_path.to_string_lossy().to_string();
        tracing::info!(
            model = %id,
            context_window,
            ms = start.elapsed().as_millis() as u64,
            "generation model loaded"
        );
        Ok(Self {
            model: Mutex::new(model),
            tokenizer,
            device,
            id,
            context_window,
            eos_token,
            temperature: settings.temperature,
            seed: settings.seed,
        })
    }

    fn encode(&self, text: &str) -> anyhow::Result<Vec<u32>> {
        let enc = self.tokenizer.encode(text, true).map_err(|e| anyhow!("Tokenization failed: {}", e))?;
        Ok(enc.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> anyhow::Result<String> {
        self.tokenizer.decode(ids, true).map_err(|e| anyhow!("Detokenization failed: {}", e))
    }

    fn complete(&self, request: &GenerationRequest) -> anyhow::Result<String> {
        let prompt_ids = self.encode(&request.prompt)?;
        let temperature = if self.temperature > 0.0 { Some(self.temperature) } else { None };
        let mut sampler = LogitsProcessor::new(self.seed, temperature, None);
        let mut model = self.model.lock().map_err(|_| anyhow!("generation model lock poisoned"))?;

        let start = Instant::now();
        let input = Tensor::new(prompt_ids.as_slice(), &self.device)?.unsqueeze(0)?;
        let logits = model.forward(&input, 0)?.squeeze(0)?;
        let mut next = sampler.sample(&logits)?;

        let mut generated: Vec<u32> = Vec::new();
        let mut completion = String::new();
        for step in 0..request.max_output_tokens {
            if Some(next) == self.eos_token {
                break;
            }
            generated.push(next);
            completion = self.decode(&generated)?;
            if let Some(cut) = first_stop(&completion, &request.stop) {
                completion.truncate(cut);
                break;
            }
            if step + 1 == request.max_output_tokens {
                break;
            }
            let input = Tensor::new(&[next], &self.device)?.unsqueeze(0)?;
            let logits = model.forward(&input, prompt_ids.len() + step)?.squeeze(0)?;
            next = sampler.sample(&logits)?;
        }
        tracing::debug!(
            prompt_tokens = prompt_ids.len(),
            completion_tokens = generated.len(),
            ms = start.elapsed().as_millis() as u64,
            "generation finished"
        );
        Ok(completion)
    }
}

fn first_stop(text: &str, stop: &[String]) -> Option<usize> {
    stop.iter().filter(|s| !s.is_empty()).filter_map(|s| text.find(s.as_str())).min()
}

impl Generator for LlamaGenerator {
    fn model_id(&self) -> &str { &self.id }
    fn context_window(&self) -> usize { self.context_window }

    fn count_tokens(&self, text: &str) -> Result<usize> {
        Ok(self.encode(text)?.len())
    }

    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let completion = self.complete(request)?;
        Ok(format!("{}{}", request.prompt, completion))
    }
}
