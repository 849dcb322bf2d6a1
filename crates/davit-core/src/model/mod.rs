//! データモデル

mod environment;
mod image;
mod intent;
mod service;

pub use environment::Environment;
pub use image::{ImageCandidate, ImageReference, find_tag, short_digest, sort_newest_first};
pub use intent::DeploymentIntent;
pub use service::Service;
