pub mod pipeline;

pub use pipeline::MutationPipeline;
