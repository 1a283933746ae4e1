use muxdemux_channel::{ChannelConfig, Mode};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Multiplexer options.
///
/// Deserializes from the camelCase keys `id`, `circular`, `keepOpen`,
/// `unexpectedFinishError` and `highWaterMark`. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct MuxOptions {
    /// Instance id stamped on outgoing envelopes. Generated when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Never forward inbound chunks downstream.
    pub circular: bool,
    /// Keep the physical channel open after every substream finishes.
    pub keep_open: bool,
    /// Raise an error on open substreams when the physical channel finishes
    /// or fails underneath them.
    pub unexpected_finish_error: bool,
    /// Backpressure threshold for the physical channel and every substream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_water_mark: Option<usize>,
}

impl Default for MuxOptions {
    fn default() -> Self {
        Self {
            id: None,
            circular: false,
            keep_open: false,
            unexpected_finish_error: true,
            high_water_mark: None,
        }
    }
}

impl MuxOptions {
    /// Parse options from a JSON object.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn circular(mut self, circular: bool) -> Self {
        self.circular = circular;
        self
    }

    pub fn keep_open(mut self, keep_open: bool) -> Self {
        self.keep_open = keep_open;
        self
    }

    pub fn unexpected_finish_error(mut self, enabled: bool) -> Self {
        self.unexpected_finish_error = enabled;
        self
    }

    pub fn high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = Some(high_water_mark);
        self
    }

    /// Channel configuration for `mode` under these options.
    pub fn channel_config(&self, mode: Mode) -> ChannelConfig {
        let config = ChannelConfig::new(mode);
        match self.high_water_mark {
            Some(hwm) => config.with_high_water_mark(hwm),
            None => config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MuxError;

    #[test]
    fn defaults_escalate_unexpected_finish() {
        let options = MuxOptions::default();
        assert!(options.unexpected_finish_error);
        assert!(!options.circular);
        assert!(!options.keep_open);
        assert_eq!(options.id, None);
    }

    #[test]
    fn parses_camel_case_keys() {
        let options = MuxOptions::from_json(
            r#"{"id":"left","keepOpen":true,"unexpectedFinishError":false,"highWaterMark":4}"#,
        )
        .unwrap();
        assert_eq!(options.id.as_deref(), Some("left"));
        assert!(options.keep_open);
        assert!(!options.unexpected_finish_error);
        assert_eq!(options.high_water_mark, Some(4));
        assert!(!options.circular);
    }

    #[test]
    fn empty_object_is_default() {
        assert_eq!(MuxOptions::from_json("{}").unwrap(), MuxOptions::default());
    }

    #[test]
    fn unknown_keys_rejected() {
        let err = MuxOptions::from_json(r#"{"objectMode":true}"#).unwrap_err();
        assert!(matches!(err, MuxError::Json(_)));
    }

    #[test]
    fn high_water_mark_reaches_channel_config() {
        let options = MuxOptions::default().high_water_mark(3);
        assert_eq!(options.channel_config(Mode::Object).high_water_mark, 3);
        assert_eq!(
            MuxOptions::default()
                .channel_config(Mode::Bytes)
                .high_water_mark,
            16 * 1024
        );
    }
}
