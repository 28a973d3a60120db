pub mod pluggy;
pub mod provider;
