#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub(crate) mod api;
pub mod app;
pub mod classification;
pub mod config;
pub mod customization;
pub mod embedding;
pub mod learning;
pub mod observability;
pub mod predictor;
pub mod similarity;
pub mod util;

pub use predictor::{Prediction, PredictionDetails, TagPredictor, TagPredictorBuilder};
