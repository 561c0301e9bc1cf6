//! Run identifiers
//!
//! A parameter string is a flat `key_value_key_value...` token list. It names
//! every artifact a run writes (checkpoint, history, predictions, logs) and is
//! parsed back into hyperparameters when results are aggregated.
//!
//! Encoding is strict: values must be non-empty and restricted to
//! `[A-Za-z0-9.-]`, which keeps the result filename-safe and free of the
//! separator. Decoding is permissive: tokens that are not recognized keys are
//! skipped, so prefixes such as `training_history_` do no harm.

use std::collections::BTreeMap;
use std::fmt;

use crate::utils::error::{ExperimentError, Result};

const SEPARATOR: char = '_';

/// Recognized keys, declared in canonical encoding order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamKey {
    Data,
    Backbone,
    Pretrain,
    Clf,
    Structure,
    Lr,
    BatchSize,
    DropProb,
    FcSizeRatio,
    NumFilters,
    KernelSize,
    Epochs,
    ImageSize,
    LrDecay,
    LrBeta,
    Fold,
}

impl ParamKey {
    pub const ALL: [ParamKey; 16] = [
        ParamKey::Data,
        ParamKey::Backbone,
        ParamKey::Pretrain,
        ParamKey::Clf,
        ParamKey::Structure,
        ParamKey::Lr,
        ParamKey::BatchSize,
        ParamKey::DropProb,
        ParamKey::FcSizeRatio,
        ParamKey::NumFilters,
        ParamKey::KernelSize,
        ParamKey::Epochs,
        ParamKey::ImageSize,
        ParamKey::LrDecay,
        ParamKey::LrBeta,
        ParamKey::Fold,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKey::Data => "data",
            ParamKey::Backbone => "backbone",
            ParamKey::Pretrain => "pretrain",
            ParamKey::Clf => "clf",
            ParamKey::Structure => "structure",
            ParamKey::Lr => "lr",
            ParamKey::BatchSize => "batchsize",
            ParamKey::DropProb => "dropprob",
            ParamKey::FcSizeRatio => "fcsizeratio",
            ParamKey::NumFilters => "numfilters",
            ParamKey::KernelSize => "kernelsize",
            ParamKey::Epochs => "epochs",
            ParamKey::ImageSize => "imagesize",
            ParamKey::LrDecay => "lrdecay",
            ParamKey::LrBeta => "lrbeta",
            ParamKey::Fold => "fold",
        }
    }

    pub fn from_token(token: &str) -> Option<ParamKey> {
        ParamKey::ALL.into_iter().find(|key| key.as_str() == token)
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered hyperparameter map. Iteration order is the canonical key order,
/// regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSet {
    values: BTreeMap<ParamKey, String>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: ParamKey, value: impl Into<String>) -> Option<String> {
        self.values.insert(key, value.into())
    }

    pub fn get(&self, key: ParamKey) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParamKey, &str)> {
        self.values.iter().map(|(key, value)| (*key, value.as_str()))
    }

    /// Encode into the canonical parameter string.
    pub fn encode(&self) -> Result<String> {
        let mut tokens = Vec::with_capacity(self.values.len() * 2);
        for (key, value) in &self.values {
            validate_value(*key, value)?;
            tokens.push(key.as_str());
            tokens.push(value.as_str());
        }
        Ok(tokens.join(&SEPARATOR.to_string()))
    }

    /// Permissive decode: a recognized key followed by another token forms a
    /// pair, everything else is skipped. Never fails.
    pub fn decode(s: &str) -> ParamSet {
        let tokens: Vec<&str> = s.split(SEPARATOR).collect();
        let mut set = ParamSet::new();
        let mut i = 0;
        while i < tokens.len() {
            match ParamKey::from_token(tokens[i]) {
                Some(key) if i + 1 < tokens.len() => {
                    set.insert(key, tokens[i + 1]);
                    i += 2;
                }
                _ => {
                    tracing::debug!("skipping token '{}' in '{}'", tokens[i], s);
                    i += 1;
                }
            }
        }
        set
    }

    /// Strict decode: every token must belong to a `key_value` pair, keys must
    /// be recognized and appear at most once, and values must be encodable.
    pub fn decode_strict(s: &str) -> Result<ParamSet> {
        let tokens: Vec<&str> = s.split(SEPARATOR).collect();
        if tokens.len() % 2 != 0 {
            return Err(ExperimentError::Config(format!(
                "parameter string '{s}' has a key without a value"
            )));
        }

        let mut set = ParamSet::new();
        for pair in tokens.chunks(2) {
            let key = ParamKey::from_token(pair[0]).ok_or_else(|| {
                ExperimentError::Config(format!("unknown key '{}' in '{s}'", pair[0]))
            })?;
            validate_value(key, pair[1])?;
            if set.insert(key, pair[1]).is_some() {
                return Err(ExperimentError::Config(format!("duplicate key '{key}' in '{s}'")));
            }
        }
        Ok(set)
    }
}

impl FromIterator<(ParamKey, String)> for ParamSet {
    fn from_iter<I: IntoIterator<Item = (ParamKey, String)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

fn validate_value(key: ParamKey, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(ExperimentError::invalid_param(key.as_str(), "empty value"));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '.' || *c == '-'))
    {
        return Err(ExperimentError::invalid_param(
            key.as_str(),
            format!("value '{value}' contains '{bad}'"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ParamSet {
        [
            (ParamKey::Backbone, "ResNet50".to_string()),
            (ParamKey::Clf, "Linear".to_string()),
            (ParamKey::Lr, "0.0001".to_string()),
            (ParamKey::Fold, "0".to_string()),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_round_trip() {
        let set = sample();
        let encoded = set.encode().unwrap();
        assert_eq!(encoded, "backbone_ResNet50_clf_Linear_lr_0.0001_fold_0");
        assert_eq!(ParamSet::decode(&encoded), set);
    }

    #[test]
    fn test_encoding_ignores_insertion_order() {
        let mut reversed = ParamSet::new();
        reversed.insert(ParamKey::Fold, "0");
        reversed.insert(ParamKey::Lr, "0.0001");
        reversed.insert(ParamKey::Clf, "Linear");
        reversed.insert(ParamKey::Backbone, "ResNet50");
        assert_eq!(reversed.encode().unwrap(), sample().encode().unwrap());
    }

    #[test]
    fn test_decode_skips_stray_tokens() {
        let decoded = ParamSet::decode("training_history_backbone_ResNet50_extra_clf_Linear_lr_0.0001_fold_0");
        assert_eq!(decoded, sample());
    }

    #[test]
    fn test_decode_drops_dangling_key() {
        let decoded = ParamSet::decode("backbone_ResNet50_clf");
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.get(ParamKey::Backbone), Some("ResNet50"));
        assert_eq!(decoded.get(ParamKey::Clf), None);
    }

    #[test]
    fn test_encode_rejects_separator_in_value() {
        let mut set = ParamSet::new();
        set.insert(ParamKey::Backbone, "Res_Net");
        let err = set.encode().unwrap_err();
        assert!(matches!(err, ExperimentError::InvalidParam { key, .. } if key == "backbone"));
    }

    #[test]
    fn test_encode_rejects_empty_and_path_values() {
        let mut empty = ParamSet::new();
        empty.insert(ParamKey::Lr, "");
        assert!(empty.encode().is_err());

        let mut path = ParamSet::new();
        path.insert(ParamKey::Data, "../etc");
        assert!(path.encode().is_err());
    }

    #[test]
    fn test_decode_strict() {
        let encoded = sample().encode().unwrap();
        assert_eq!(ParamSet::decode_strict(&encoded).unwrap(), sample());

        assert!(ParamSet::decode_strict("backbone_ResNet50_extra_x").is_err());
        assert!(ParamSet::decode_strict("backbone_ResNet50_clf").is_err());
        assert!(ParamSet::decode_strict("lr_0.1_lr_0.2").is_err());
    }

    #[test]
    fn test_empty_set_encodes_to_empty_string() {
        assert_eq!(ParamSet::new().encode().unwrap(), "");
        assert!(ParamSet::decode("").is_empty());
    }
}
