pub mod chroma_masker;
pub mod clahe;
pub mod color_metrics;
pub mod fields;
pub mod instance;
pub mod instance_filter;
pub mod kmeans;
pub mod labelling;
pub mod luminance_masker;
pub mod mask_fuser;
pub mod pixel;
pub mod region_grower;
pub mod seed_generator;
pub mod utils;
