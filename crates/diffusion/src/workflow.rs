//! Graph builders for each workflow family.
//!
//! Node ids are handed out in construction order starting at the family's
//! base id, and every link targets a node that was already added, so the
//! serialized graph is in topological order and byte-identical across builds
//! with the same parameters (a negative seed is replaced at build time).

use easel_config::ServerSettings;
use easel_ipc::{
    ClassicWorkflowParams, FluxWorkflowParams, Link, Node, NodeGraph, NodeId, WorkflowFamily,
    WorkflowRequest,
};
use rand::Rng;

use crate::DiffusionError;

/// A parameter set that can be turned into a node graph.
pub trait Workflow {
    /// Topology this workflow builds
    fn family(&self) -> WorkflowFamily;

    /// Build the node graph
    fn build(&self) -> NodeGraph;

    /// Build and serialize the node graph
    fn build_json(&self) -> Result<String, DiffusionError> {
        Ok(self.build().to_json()?)
    }
}

/// Replace a negative seed with a random non-negative 32-bit value.
pub fn resolve_seed(seed: i64) -> i64 {
    if seed >= 0 {
        seed
    } else {
        rand::thread_rng().gen_range(0..=i64::from(i32::MAX))
    }
}

/// Widen an `f32` without picking up binary noise (0.8 stays 0.8).
fn widen(value: f32) -> f64 {
    value.to_string().parse().unwrap_or(f64::from(value))
}

struct GraphBuilder {
    graph: NodeGraph,
    next_id: u32,
}

impl GraphBuilder {
    fn new(family: WorkflowFamily) -> Self {
        Self {
            graph: NodeGraph::new(),
            next_id: family.base_node_id(),
        }
    }

    fn add(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.graph.insert(id, node);
        id
    }

    fn finish(self) -> NodeGraph {
        self.graph
    }
}

impl Workflow for ClassicWorkflowParams {
    fn family(&self) -> WorkflowFamily {
        WorkflowFamily::Classic
    }

    fn build(&self) -> NodeGraph {
        let mut graph = GraphBuilder::new(self.family());

        let checkpoint =
            graph.add(Node::new("CheckpointLoaderSimple").text("ckpt_name", &self.checkpoint));

        // CheckpointLoaderSimple and LoraLoader both emit (MODEL, CLIP) on slots 0 and 1
        let mut model = Link::new(checkpoint, 0);
        let mut clip = Link::new(checkpoint, 1);

        for lora in &self.loras {
            let strength = widen(lora.strength);
            let id = graph.add(
                Node::new("LoraLoader")
                    .text("lora_name", &lora.name)
                    .float("strength_model", strength)
                    .float("strength_clip", strength)
                    .link_to("model", model)
                    .link_to("clip", clip),
            );
            model = Link::new(id, 0);
            clip = Link::new(id, 1);
        }

        let positive = graph.add(
            Node::new("CLIPTextEncode")
                .text("text", &self.positive_prompt)
                .link_to("clip", clip),
        );
        let negative = graph.add(
            Node::new("CLIPTextEncode")
                .text("text", &self.negative_prompt)
                .link_to("clip", clip),
        );

        let latent = graph.add(
            Node::new("EmptyLatentImage")
                .int("width", i64::from(self.width))
                .int("height", i64::from(self.height))
                .int("batch_size", 1),
        );

        let sampler = graph.add(
            Node::new("KSampler")
                .link_to("model", model)
                .link("positive", positive, 0)
                .link("negative", negative, 0)
                .link("latent_image", latent, 0)
                .int("seed", resolve_seed(self.seed))
                .int("steps", i64::from(self.steps))
                .float("cfg", widen(self.cfg_scale))
                .text("sampler_name", &self.sampler)
                .text("scheduler", &self.scheduler)
                .float("denoise", 1.0),
        );

        let decode = graph.add(
            Node::new("VAEDecode")
                .link("samples", sampler, 0)
                .link("vae", checkpoint, 2),
        );

        graph.add(
            Node::new("SaveImage")
                .link("images", decode, 0)
                .text("filename_prefix", &self.filename_prefix),
        );

        graph.finish()
    }
}

impl Workflow for FluxWorkflowParams {
    fn family(&self) -> WorkflowFamily {
        WorkflowFamily::Flux
    }

    fn build(&self) -> NodeGraph {
        let mut graph = GraphBuilder::new(self.family());

        let unet = graph.add(
            Node::new("UNETLoader")
                .text("unet_name", &self.unet_name)
                .text("weight_dtype", "default"),
        );
        let clip = graph.add(
            Node::new("CLIPLoader")
                .text("clip_name", &self.clip_name)
                .text("type", "flux"),
        );
        let vae = graph.add(Node::new("VAELoader").text("vae_name", &self.vae_name));

        let positive = graph.add(
            Node::new("CLIPTextEncode")
                .text("text", &self.positive_prompt)
                .link("clip", clip, 0),
        );
        let negative = graph.add(
            Node::new("CLIPTextEncode")
                .text("text", &self.negative_prompt)
                .link("clip", clip, 0),
        );

        let guider = graph.add(
            Node::new("CFGGuider")
                .link("model", unet, 0)
                .link("positive", positive, 0)
                .link("negative", negative, 0)
                .float("cfg", widen(self.cfg_scale)),
        );

        let latent = graph.add(
            Node::new("EmptyFlux2LatentImage")
                .int("width", i64::from(self.width))
                .int("height", i64::from(self.height))
                .int("batch_size", 1),
        );

        let noise = graph.add(Node::new("RandomNoise").int("noise_seed", resolve_seed(self.seed)));

        let scheduler = graph.add(
            Node::new("Flux2Scheduler")
                .link("model", unet, 0)
                .int("steps", i64::from(self.steps))
                .int("width", i64::from(self.width))
                .int("height", i64::from(self.height)),
        );

        let sampler_select =
            graph.add(Node::new("KSamplerSelect").text("sampler_name", &self.sampler));

        let sampler = graph.add(
            Node::new("SamplerCustomAdvanced")
                .link("noise", noise, 0)
                .link("guider", guider, 0)
                .link("sampler", sampler_select, 0)
                .link("sigmas", scheduler, 0)
                .link("latent_image", latent, 0),
        );

        let decode = graph.add(
            Node::new("VAEDecode")
                .link("samples", sampler, 0)
                .link("vae", vae, 0),
        );

        graph.add(
            Node::new("SaveImage")
                .link("images", decode, 0)
                .text("filename_prefix", &self.filename_prefix),
        );

        graph.finish()
    }
}

impl Workflow for WorkflowRequest {
    fn family(&self) -> WorkflowFamily {
        WorkflowRequest::family(self)
    }

    fn build(&self) -> NodeGraph {
        match self {
            Self::Classic(params) => params.build(),
            Self::Flux(params) => params.build(),
        }
    }
}

/// Fill model selections from settings.
///
/// An empty checkpoint takes the configured default. Flux loader names take
/// the configured default unless the caller changed them from the built-in one.
pub fn apply_defaults(request: &mut WorkflowRequest, settings: &ServerSettings) {
    match request {
        WorkflowRequest::Classic(params) => {
            if params.checkpoint.is_empty() {
                if let Some(checkpoint) = &settings.default_checkpoint {
                    params.checkpoint = checkpoint.clone();
                }
            }
        }
        WorkflowRequest::Flux(params) => {
            let builtin = FluxWorkflowParams::default();
            override_default(&mut params.unet_name, &builtin.unet_name, &settings.default_unet);
            override_default(&mut params.clip_name, &builtin.clip_name, &settings.default_clip);
            override_default(&mut params.vae_name, &builtin.vae_name, &settings.default_vae);
        }
    }
}

fn override_default(field: &mut String, builtin: &str, configured: &Option<String>) {
    if let Some(configured) = configured {
        if field.is_empty() || field == builtin {
            *field = configured.clone();
        }
    }
}
