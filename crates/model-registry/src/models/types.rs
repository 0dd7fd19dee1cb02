//! Classification enums carried by every model config.
//!
//! Parsing is case-insensitive and accepts the spellings other tools commonly
//! emit, but serialization always produces the canonical string.

use crate::error::RegistryError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Base architecture family a model was trained against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BaseModelType {
    /// Usable with any base (e.g. some VAEs and CLIP vision encoders)
    Any,
    /// Stable Diffusion 1.x
    StableDiffusion1,
    /// Stable Diffusion 2.x
    StableDiffusion2,
    /// Stable Diffusion XL
    StableDiffusionXL,
    /// Stable Diffusion XL refiner
    StableDiffusionXLRefiner,
}

impl BaseModelType {
    pub const ALL: [BaseModelType; 5] = [
        BaseModelType::Any,
        BaseModelType::StableDiffusion1,
        BaseModelType::StableDiffusion2,
        BaseModelType::StableDiffusionXL,
        BaseModelType::StableDiffusionXLRefiner,
    ];

    /// Return the canonical string for this base model.
    pub fn as_str(&self) -> &'static str {
        match self {
            BaseModelType::Any => "any",
            BaseModelType::StableDiffusion1 => "sd-1",
            BaseModelType::StableDiffusion2 => "sd-2",
            BaseModelType::StableDiffusionXL => "sdxl",
            BaseModelType::StableDiffusionXLRefiner => "sdxl-refiner",
        }
    }
}

impl FromStr for BaseModelType {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "any" => Ok(BaseModelType::Any),
            "sd-1" | "sd1" | "sd-1.5" | "sd1.5" | "sd15" | "sd-1.x" => {
                Ok(BaseModelType::StableDiffusion1)
            }
            "sd-2" | "sd2" | "sd-2.1" | "sd2.1" | "sd21" | "sd-2.x" => {
                Ok(BaseModelType::StableDiffusion2)
            }
            "sdxl" | "sd-xl" => Ok(BaseModelType::StableDiffusionXL),
            "sdxl-refiner" | "sd-xl-refiner" => Ok(BaseModelType::StableDiffusionXLRefiner),
            _ => Err(RegistryError::invalid(
                "base_model",
                format!("unknown base model '{}'", s),
            )),
        }
    }
}

impl TryFrom<String> for BaseModelType {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BaseModelType> for String {
    fn from(value: BaseModelType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for BaseModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of artifact a config describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ModelType {
    /// Full pipeline checkpoint
    Main,
    Vae,
    Lora,
    ControlNet,
    /// Textual inversion embedding
    Embedding,
    IpAdapter,
    ClipVision,
    T2IAdapter,
    Onnx,
}

impl ModelType {
    pub const ALL: [ModelType; 9] = [
        ModelType::Main,
        ModelType::Vae,
        ModelType::Lora,
        ModelType::ControlNet,
        ModelType::Embedding,
        ModelType::IpAdapter,
        ModelType::ClipVision,
        ModelType::T2IAdapter,
        ModelType::Onnx,
    ];

    /// Return the canonical string for this model type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Main => "main",
            ModelType::Vae => "vae",
            ModelType::Lora => "lora",
            ModelType::ControlNet => "controlnet",
            ModelType::Embedding => "embedding",
            ModelType::IpAdapter => "ip_adapter",
            ModelType::ClipVision => "clip_vision",
            ModelType::T2IAdapter => "t2i_adapter",
            ModelType::Onnx => "onnx",
        }
    }
}

impl FromStr for ModelType {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "main" | "checkpoint" | "pipeline" => Ok(ModelType::Main),
            "vae" => Ok(ModelType::Vae),
            "lora" => Ok(ModelType::Lora),
            "controlnet" | "control_net" => Ok(ModelType::ControlNet),
            "embedding" | "textual_inversion" => Ok(ModelType::Embedding),
            "ip_adapter" | "ipadapter" => Ok(ModelType::IpAdapter),
            "clip_vision" => Ok(ModelType::ClipVision),
            "t2i_adapter" => Ok(ModelType::T2IAdapter),
            "onnx" => Ok(ModelType::Onnx),
            _ => Err(RegistryError::invalid(
                "model_type",
                format!("unknown model type '{}'", s),
            )),
        }
    }
}

impl TryFrom<String> for ModelType {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ModelType> for String {
    fn from(value: ModelType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// On-disk layout of the model weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFormat {
    Checkpoint,
    Diffusers,
    Lycoris,
    Onnx,
    Olive,
    EmbeddingFile,
    EmbeddingFolder,
    #[serde(rename = "invokeai")]
    InvokeAi,
}
