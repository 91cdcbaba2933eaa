//! Generation parameters for each workflow family.

use serde::{Deserialize, Serialize};

/// Default output prefix for classic workflows
pub const CLASSIC_FILENAME_PREFIX: &str = "Easel_Generated";

/// Default output prefix for flux workflows
pub const FLUX_FILENAME_PREFIX: &str = "Easel_Flux";

/// Graph topology a request is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowFamily {
    /// Checkpoint + LoRA chain + KSampler
    Classic,
    /// Separate UNet/CLIP/VAE loaders with guider, noise and scheduler nodes
    Flux,
}

impl WorkflowFamily {
    /// First node id assigned when building this family's graph
    pub const fn base_node_id(self) -> u32 {
        match self {
            Self::Classic => 1,
            Self::Flux => 10,
        }
    }
}

/// A style adapter applied on top of the checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoraSpec {
    pub name: String,
    #[serde(default = "default_strength")]
    pub strength: f32,
}

fn default_strength() -> f32 {
    1.0
}

impl LoraSpec {
    pub fn new(name: impl Into<String>, strength: f32) -> Self {
        Self {
            name: name.into(),
            strength,
        }
    }
}

/// Parameters for the classic checkpoint workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassicWorkflowParams {
    pub positive_prompt: String,
    pub negative_prompt: String,
    pub checkpoint: String,
    pub loras: Vec<LoraSpec>,
    pub steps: u32,
    pub cfg_scale: f32,
    pub width: u32,
    pub height: u32,
    /// Negative values request a random seed at build time
    pub seed: i64,
    pub sampler: String,
    pub scheduler: String,
    pub filename_prefix: String,
}

impl Default for ClassicWorkflowParams {
    fn default() -> Self {
        Self {
            positive_prompt: String::new(),
            negative_prompt: String::new(),
            checkpoint: String::new(),
            loras: Vec::new(),
            steps: 25,
            cfg_scale: 7.0,
            width: 512,
            height: 512,
            seed: -1,
            sampler: "euler".to_string(),
            scheduler: "normal".to_string(),
            filename_prefix: CLASSIC_FILENAME_PREFIX.to_string(),
        }
    }
}

/// Parameters for the guided-flow (Flux 2) workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FluxWorkflowParams {
    pub positive_prompt: String,
    pub negative_prompt: String,
    pub unet_name: String,
    pub clip_name: String,
    pub vae_name: String,
    pub steps: u32,
    pub cfg_scale: f32,
    pub width: u32,
    pub height: u32,
    /// Negative values request a random seed at build time
    pub seed: i64,
    pub sampler: String,
    pub filename_prefix: String,
}

impl Default for FluxWorkflowParams {
    fn default() -> Self {
        Self {
            positive_prompt: String::new(),
            negative_prompt: String::new(),
            unet_name: "flux-2-klein-4b.safetensors".to_string(),
            clip_name: "qwen_3_4b.safetensors".to_string(),
            vae_name: "flux2-vae.safetensors".to_string(),
            steps: 4,
            cfg_scale: 1.0,
            width: 1024,
            height: 1024,
            seed: -1,
            sampler: "euler".to_string(),
            filename_prefix: FLUX_FILENAME_PREFIX.to_string(),
        }
    }
}

/// A generation request for either workflow family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum WorkflowRequest {
    Classic(ClassicWorkflowParams),
    Flux(FluxWorkflowParams),
}

impl WorkflowRequest {
    pub fn family(&self) -> WorkflowFamily {
        match self {
            Self::Classic(_) => WorkflowFamily::Classic,
            Self::Flux(_) => WorkflowFamily::Flux,
        }
    }

    /// Prefix the server uses when naming output files
    pub fn filename_prefix(&self) -> &str {
        match self {
            Self::Classic(params) => &params.filename_prefix,
            Self::Flux(params) => &params.filename_prefix,
        }
    }

    pub fn positive_prompt(&self) -> &str {
        match self {
            Self::Classic(params) => &params.positive_prompt,
            Self::Flux(params) => &params.positive_prompt,
        }
    }
}

impl From<ClassicWorkflowParams> for WorkflowRequest {
    fn from(params: ClassicWorkflowParams) -> Self {
        Self::Classic(params)
    }
}

impl From<FluxWorkflowParams> for WorkflowRequest {
    fn from(params: FluxWorkflowParams) -> Self {
        Self::Flux(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_base_ids() {
        assert_eq!(WorkflowFamily::Classic.base_node_id(), 1);
        assert_eq!(WorkflowFamily::Flux.base_node_id(), 10);
    }

    #[test]
    fn test_request_tagged_by_family() {
        let request: WorkflowRequest = serde_json::from_str(
            r#"{"family":"flux","positive_prompt":"moss covered stone","width":768}"#,
        )
        .unwrap();

        let WorkflowRequest::Flux(params) = &request else {
            panic!("expected flux request");
        };
        assert_eq!(params.width, 768);
        assert_eq!(params.height, 1024);
        assert_eq!(params.steps, 4);
        assert_eq!(request.filename_prefix(), FLUX_FILENAME_PREFIX);
    }

    #[test]
    fn test_lora_strength_defaults_to_one() {
        let lora: LoraSpec = serde_json::from_str(r#"{"name":"ink.safetensors"}"#).unwrap();
        assert_eq!(lora.strength, 1.0);
    }
}
