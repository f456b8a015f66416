//! Process edge of the inference operator: health and metrics HTTP API

pub mod api;
