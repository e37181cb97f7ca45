//! # ollm-core
//!
//! Glue between a chat front-end and a [Candle](https://github.com/huggingface/candle)
//! model stack: prompt construction through chat templates, Markdown/HTML
//! code-block handling for chat display, tensor relocation across devices and
//! dtypes, and the configuration objects handed to the model loader.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |---|---|
//! | [`relocate`] | Move / cast every tensor in a nested container |
//! | [`chat`] | Prompt building, Jinja chat templates, Markdown code transcoding |
//! | [`config`] | Model-loading config, special token ids, generate kwargs |
//! | [`quantization`] | 4-bit / 8-bit quantization presets |
//! | [`utils`] | Device selection |
//!
//! ## Feature flags
//!
//! | Flag | Effect |
//! |---|---|
//! | `cuda` | Enable the CUDA device (requires CUDA toolkit) |

pub mod chat;
pub mod config;
pub mod error;
pub mod quantization;
pub mod relocate;
pub mod utils;

pub use candle_core;
pub use candle_core::{DType, Device, Tensor};

pub use error::{PromptError, RelocateError, TemplateError};
pub use relocate::{ensure_tensor_dtype, ensure_tensor_on_device, relocate, Nested, Target};
