use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use ort::Environment;
use rust_bert::pipelines::hf_tokenizers::HFTokenizer;
use rust_bert::pipelines::onnx::{config::ONNXEnvironmentConfig, ONNXEncoder};
use tch::{Kind, Tensor};

use crate::query::Label;

/// Boundary contract of the sentiment model. The API layer and its tests
/// depend on this alone, never on the concrete model.
pub(crate) trait Classify: Send + Sync {
    /// Returns the predicted label and the model's confidence in it.
    fn classify(&self, text: &str) -> Result<(Label, f64)>;
}

pub(crate) struct Classifier {
    encoder: ONNXEncoder,
    tokenizer: HFTokenizer,
}

impl Classifier {
    /// Loads the ONNX export and its tokenizer from `model_dir`, which must
    /// contain `model.onnx`, `tokenizer.json` and `special_tokens_map.json`.
    pub(crate) fn load_model(
        model_dir: impl AsRef<Path>,
        environment: &Arc<Environment>,
    ) -> Result<Self> {
        let model_file = PathBuf::from(model_dir.as_ref()).join("model.onnx");
        let onnx_config = ONNXEnvironmentConfig::default();
        let encoder = ONNXEncoder::new(model_file, environment, &onnx_config)
            .map_err(|e| anyhow::anyhow!("model loading failed: {e}"))?;

        let tokenizer = HFTokenizer::from_file(
            PathBuf::from(model_dir.as_ref()).join("tokenizer.json"),
            PathBuf::from(model_dir.as_ref()).join("special_tokens_map.json"),
        )
        .map_err(|e| anyhow::anyhow!(e))?;

        Ok(Self { encoder, tokenizer })
    }

    pub(crate) fn create_environment() -> Result<Arc<Environment>> {
        Ok(Arc::new(
            Environment::builder().with_name("classifier").build()?,
        ))
    }

    fn logits(&self, text: &str) -> Result<Tensor> {
        let encoding = self
            .tokenizer
            .encode_list(&[text])
            .map_err(|e| anyhow::anyhow!("tokenization failed: {e}"))?;

        let input_ids: Vec<_> = encoding.iter().map(|enc| enc.token_ids.clone()).collect();

        let attention_masks: Vec<_> = encoding
            .iter()
            .map(|enc| {
                enc.special_tokens_mask
                    .iter()
                    .map(|&m| i64::from(m))
                    .collect::<Vec<_>>()
            })
            .collect();

        let batch_size = i64::try_from(input_ids.len())
            .map_err(|_| anyhow::anyhow!("input_ids length exceeds i64 limits"))?;

        let input_tensor = Tensor::from_slice(&input_ids.concat())
            .view([batch_size, -1])
            .to_kind(Kind::Int64);

        let attention_mask = Tensor::from_slice(&attention_masks.concat())
            .view([batch_size, -1])
            .to_kind(Kind::Int64);

        let output =
            self.encoder
                .forward(Some(&input_tensor), Some(&attention_mask), None, None, None)?;

        output
            .logits
            .ok_or_else(|| anyhow::anyhow!("model produced no logits"))
    }
}

impl Classify for Classifier {
    fn classify(&self, text: &str) -> Result<(Label, f64)> {
        let logits = self.logits(text)?;
        let probabilities = logits.softmax(-1, Kind::Float);
        let (confidence, prediction) = probabilities.max_dim(-1, false);

        let code = prediction.int64_value(&[0]);
        let confidence = confidence.double_value(&[0]);
        // A head emitting codes outside the label set counts as a failed
        // classification rather than an error.
        let label = Label::from_code(code).unwrap_or(Label::ClassificationError);
        Ok((label, confidence))
    }
}
