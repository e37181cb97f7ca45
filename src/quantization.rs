//! bitsandbytes-style quantization settings handed to the model loader.
//!
//! Only the configuration lives here; the kernels belong to the loader.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantType {
    Nf4,
    Fp4,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizationConfig {
    pub bnb_4bit_compute_dtype: String,
    pub bnb_4bit_quant_storage: String,
    pub bnb_4bit_quant_type: QuantType,
    pub bnb_4bit_use_double_quant: bool,
    pub llm_int8_enable_fp32_cpu_offload: bool,
    pub llm_int8_has_fp16_weight: bool,
    pub llm_int8_skip_modules: Vec<String>,
    pub llm_int8_threshold: f32,
    pub load_in_4bit: bool,
    pub load_in_8bit: bool,
}

impl QuantizationConfig {
    fn base() -> Self {
        Self {
            bnb_4bit_compute_dtype: "float16".into(),
            bnb_4bit_quant_storage: "uint8".into(),
            bnb_4bit_quant_type: QuantType::Nf4,
            bnb_4bit_use_double_quant: true,
            llm_int8_enable_fp32_cpu_offload: false,
            llm_int8_has_fp16_weight: false,
            llm_int8_skip_modules: vec!["out_proj".into(), "kv_proj".into(), "lm_head".into()],
            llm_int8_threshold: 6.0,
            load_in_4bit: false,
            load_in_8bit: false,
        }
    }

    /// NF4 weights with double quantization, fp16 compute.
    pub fn four_bit() -> Self {
        Self {
            load_in_4bit: true,
            ..Self::base()
        }
    }

    /// LLM.int8() with outlier threshold 6.0.
    pub fn eight_bit() -> Self {
        Self {
            load_in_8bit: true,
            ..Self::base()
        }
    }

    /// Preset for a bit width, `None` for anything but 4 and 8.
    pub fn for_bits(bits: u8) -> Option<Self> {
        match bits {
            4 => Some(Self::four_bit()),
            8 => Some(Self::eight_bit()),
            _ => None,
        }
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}
