//! Workflow parameters from command-line flags

use clap::{Args, ValueEnum};
use easel_ipc::{ClassicWorkflowParams, FluxWorkflowParams, LoraSpec, WorkflowRequest};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Family {
    /// Checkpoint + KSampler graph
    Classic,
    /// Flux 2 guided-flow graph
    Flux,
}

/// Flags shared by `build` and `generate`. Unset flags keep the family defaults.
#[derive(Debug, Args)]
pub struct WorkflowArgs {
    #[arg(value_enum)]
    pub family: Family,

    /// Positive prompt
    #[arg(short, long)]
    pub prompt: String,

    /// Negative prompt
    #[arg(short, long, default_value = "")]
    pub negative: String,

    /// Checkpoint file (classic)
    #[arg(long)]
    pub checkpoint: Option<String>,

    /// LoRA as NAME or NAME:STRENGTH, repeatable (classic)
    #[arg(long = "lora", value_parser = parse_lora)]
    pub loras: Vec<LoraSpec>,

    /// Diffusion model file (flux)
    #[arg(long)]
    pub unet: Option<String>,

    /// Text encoder file (flux)
    #[arg(long)]
    pub clip: Option<String>,

    /// VAE file (flux)
    #[arg(long)]
    pub vae: Option<String>,

    #[arg(long)]
    pub steps: Option<u32>,

    #[arg(long)]
    pub cfg: Option<f32>,

    #[arg(long)]
    pub width: Option<u32>,

    #[arg(long)]
    pub height: Option<u32>,

    /// Negative for a random seed
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub seed: i64,

    #[arg(long)]
    pub sampler: Option<String>,

    /// Scheduler (classic)
    #[arg(long)]
    pub scheduler: Option<String>,

    /// Output filename prefix
    #[arg(long)]
    pub prefix: Option<String>,
}

impl WorkflowArgs {
    pub fn into_request(self) -> WorkflowRequest {
        match self.family {
            Family::Classic => {
                let mut params = ClassicWorkflowParams {
                    positive_prompt: self.prompt,
                    negative_prompt: self.negative,
                    checkpoint: self.checkpoint.unwrap_or_default(),
                    loras: self.loras,
                    seed: self.seed,
                    ..Default::default()
                };
                set(&mut params.steps, self.steps);
                set(&mut params.cfg_scale, self.cfg);
                set(&mut params.width, self.width);
                set(&mut params.height, self.height);
                set(&mut params.sampler, self.sampler);
                set(&mut params.scheduler, self.scheduler);
                set(&mut params.filename_prefix, self.prefix);
                params.into()
            }
            Family::Flux => {
                if !self.loras.is_empty() {
                    warn!("LoRAs are not supported by the flux workflow, ignoring {}", self.loras.len());
                }
                if self.scheduler.is_some() {
                    warn!("The flux workflow has no scheduler choice, ignoring --scheduler");
                }

                let mut params = FluxWorkflowParams {
                    positive_prompt: self.prompt,
                    negative_prompt: self.negative,
                    seed: self.seed,
                    ..Default::default()
                };
                set(&mut params.unet_name, self.unet);
                set(&mut params.clip_name, self.clip);
                set(&mut params.vae_name, self.vae);
                set(&mut params.steps, self.steps);
                set(&mut params.cfg_scale, self.cfg);
                set(&mut params.width, self.width);
                set(&mut params.height, self.height);
                set(&mut params.sampler, self.sampler);
                set(&mut params.filename_prefix, self.prefix);
                params.into()
            }
        }
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn parse_lora(value: &str) -> Result<LoraSpec, String> {
    match value.rsplit_once(':') {
        Some((name, strength)) if !name.is_empty() => strength
            .parse::<f32>()
            .map(|strength| LoraSpec::new(name, strength))
            .map_err(|_| format!("invalid LoRA strength '{strength}'")),
        Some(_) => Err(format!("missing LoRA name in '{value}'")),
        None => Ok(LoraSpec::new(value, 1.0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        workflow: WorkflowArgs,
    }

    fn parse(args: &[&str]) -> WorkflowRequest {
        let mut argv = vec!["easel"];
        argv.extend_from_slice(args);
        Harness::try_parse_from(argv).unwrap().workflow.into_request()
    }

    #[test]
    fn test_classic_flags() {
        let request = parse(&[
            "classic",
            "-p",
            "a castle",
            "--checkpoint",
            "sd15.safetensors",
            "--lora",
            "detail.safetensors:0.6",
            "--lora",
            "style.safetensors",
            "--steps",
            "30",
            "--seed",
            "-1",
        ]);

        let WorkflowRequest::Classic(params) = request else {
            panic!("expected classic request");
        };
        assert_eq!(params.positive_prompt, "a castle");
        assert_eq!(params.checkpoint, "sd15.safetensors");
        assert_eq!(params.loras.len(), 2);
        assert_eq!(params.loras[0].strength, 0.6);
        assert_eq!(params.loras[1].strength, 1.0);
        assert_eq!(params.steps, 30);
        assert_eq!(params.seed, -1);
        assert_eq!(params.cfg_scale, 7.0);
    }

    #[test]
    fn test_flux_keeps_defaults() {
        let request = parse(&["flux", "--prompt", "a fox", "--width", "768"]);

        let WorkflowRequest::Flux(params) = request else {
            panic!("expected flux request");
        };
        assert_eq!(params.width, 768);
        assert_eq!(params.height, 1024);
        assert_eq!(params.steps, 4);
        assert_eq!(params.unet_name, FluxWorkflowParams::default().unet_name);
    }

    #[test]
    fn test_parse_lora() {
        assert_eq!(parse_lora("a.safetensors").unwrap().strength, 1.0);
        assert_eq!(parse_lora("a.safetensors:0.25").unwrap().name, "a.safetensors");
        assert!(parse_lora("a.safetensors:strong").is_err());
        assert!(parse_lora(":0.5").is_err());
    }
}
