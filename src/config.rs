use candle_core::{DType, Device};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::chat::prompt::{ChatTemplate, ConversationTurn, PromptBuilder};
use crate::error::PromptResult;
use crate::quantization::QuantizationConfig;
use crate::utils::{is_ampere_or_newer, select_device};

/// How an image processor expects its inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageProcessorConfig {
    pub prompt_is_list: bool,
    pub image_is_list: bool,
    pub image_is_first: bool,
}

impl Default for ImageProcessorConfig {
    fn default() -> Self {
        Self {
            prompt_is_list: true,
            image_is_list: false,
            image_is_first: false,
        }
    }
}

/// Everything the loader and the generate call need to know about a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Forwarded to the model loader (`device_map`, `torch_dtype`, `quantization_config`, ...).
    pub model_kwargs: Map<String, Value>,
    /// Name of the generation entry point.
    pub model_generate_name: String,
    pub tokenizer_kwargs: Map<String, Value>,
    pub image_processor_kwargs: Map<String, Value>,
    pub tokenizer_input_kwargs: Map<String, Value>,
    pub image_processor_input_kwargs: Map<String, Value>,
    pub tokenizer_decode_kwargs: Map<String, Value>,
    pub output_text_only: bool,
    pub require_tokenization: bool,
    pub multimodal_image: bool,
    pub image_processor: ImageProcessorConfig,
    pub enable_rag_text: bool,
    pub system_message: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_kwargs: Map::new(),
            model_generate_name: "generate".to_string(),
            tokenizer_kwargs: Map::new(),
            image_processor_kwargs: Map::new(),
            tokenizer_input_kwargs: Map::new(),
            image_processor_input_kwargs: Map::new(),
            tokenizer_decode_kwargs: Map::new(),
            output_text_only: true,
            require_tokenization: true,
            multimodal_image: false,
            image_processor: ImageProcessorConfig::default(),
            enable_rag_text: false,
            system_message: None,
        }
    }
}

/// Pad / eos / bos ids of a tokenizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SpecialTokenIds {
    pub pad: Option<u32>,
    pub eos: Option<u32>,
    pub bos: Option<u32>,
}

impl ModelConfig {
    pub fn from_json_str(content: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Forces CPU execution in `float32`.
    pub fn cpu_execution(&mut self, enabled: bool) {
        if enabled {
            self.model_kwargs.insert("device_map".into(), Value::from("cpu"));
            self.model_kwargs.insert("torch_dtype".into(), Value::from("float32"));
        }
    }

    pub fn with_quantization(mut self, quantization: &QuantizationConfig) -> serde_json::Result<Self> {
        self.model_kwargs
            .insert("quantization_config".into(), quantization.to_value()?);
        Ok(self)
    }

    /// Device and dtype implied by `model_kwargs`.
    ///
    /// `device_map = "cpu"` pins the CPU; anything else picks the best
    /// available accelerator. Without an explicit `torch_dtype` the dtype
    /// comes from [`default_dtype`].
    pub fn device_and_dtype(&self) -> anyhow::Result<(Device, DType)> {
        let force_cpu = self
            .model_kwargs
            .get("device_map")
            .and_then(Value::as_str)
            .is_some_and(|d| d == "cpu");
        let device = select_device(force_cpu)?;
        let dtype = match self.model_kwargs.get("torch_dtype").and_then(Value::as_str) {
            Some(name) => parse_dtype(name)?,
            None => default_dtype(&device),
        };
        Ok((device, dtype))
    }

    /// Builds the prompt for `history`, prefixed by [`Self::system_message`].
    #[tracing::instrument(level = "info", name = "create_chat_prompt", skip_all, ret)]
    pub fn create_chat_prompt(
        &self,
        history: &[ConversationTurn],
        template: &dyn ChatTemplate,
        check_assistant: bool,
        remove_bos_token: bool,
    ) -> PromptResult<String> {
        PromptBuilder::new(check_assistant, remove_bos_token).build(
            template,
            self.system_message.as_deref(),
            history,
        )
    }

    /// Strips the echoed prompt from a decoded generation.
    pub fn retrieve_output_text(&self, input_text: &str, output_text: &str) -> String {
        output_text
            .strip_prefix(input_text)
            .unwrap_or(output_text)
            .trim()
            .to_string()
    }

    /// Keyword arguments for the generate call.
    ///
    /// Sampling is on by default and the pad id falls back to the eos id;
    /// entries of `params` override these defaults.
    pub fn generate_kwargs(&self, tokens: &SpecialTokenIds, params: &Map<String, Value>) -> Map<String, Value> {
        let mut kwargs = Map::new();
        kwargs.insert("do_sample".into(), Value::Bool(true));
        kwargs.insert("pad_token_id".into(), id_value(tokens.pad.or(tokens.eos)));
        kwargs.insert("bos_token_id".into(), id_value(tokens.bos));
        kwargs.insert("eos_token_id".into(), id_value(tokens.eos));
        kwargs.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
        kwargs
    }
}

/// `f32` on the CPU, `bf16` on Ampere or newer CUDA GPUs, `f16` elsewhere.
pub fn default_dtype(device: &Device) -> DType {
    if device.is_cpu() {
        DType::F32
    } else if is_ampere_or_newer(device) {
        DType::BF16
    } else {
        DType::F16
    }
}

fn id_value(id: Option<u32>) -> Value {
    id.map_or(Value::Null, Value::from)
}

/// Parses torch-style (`float16`, `bfloat16`, ...) and candle-style (`f16`, ...) dtype names.
pub fn parse_dtype(name: &str) -> anyhow::Result<DType> {
    let dtype = match name.trim_start_matches("torch.") {
        "float32" | "float" | "f32" => DType::F32,
        "float16" | "half" | "f16" => DType::F16,
        "bfloat16" | "bf16" => DType::BF16,
        "float64" | "double" | "f64" => DType::F64,
        "uint8" | "u8" => DType::U8,
        "uint32" | "u32" => DType::U32,
        "int64" | "long" | "i64" => DType::I64,
        other => anyhow::bail!("Unsupported dtype: {other}"),
    };
    Ok(dtype)
}
