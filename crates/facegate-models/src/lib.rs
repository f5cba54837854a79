//! ONNX Runtime backend for [`facegate_core::FaceInference`].
//!
//! Runs three exported networks: a face detector with suppression baked into
//! the graph, a 68-point landmark regressor and a 128-d descriptor network.

pub mod onnx;
mod tensor;

pub use onnx::{OnnxError, OnnxInference};
