//! Domain core of the urban proposal comparison: indicator catalogue, proposal
//! values, weights, the weighted scoring, the wizard state store and the
//! OpenAI client used for weight suggestions. The HTTP service in
//! `services/comparison-api` is a thin layer over this crate.

pub mod config;
pub mod error;
pub mod export;
pub mod indicator;
pub mod json_relaxed;
pub mod openai_client;
pub mod proposal;
pub mod ranking;
pub mod scoring;
pub mod state;
pub mod weight_advisor;
pub mod weights;
