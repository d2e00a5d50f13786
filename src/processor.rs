//! Field processors and the processor contract.
//!
//! A field processor inspects one decoded field and either produces a preview
//! (a JSON object carrying at least a `type` key) or declines. The contract
//! every implementation must honor:
//!
//! - A value of an unexpected runtime shape is *not applicable*, never an
//!   error — return `Ok(None)`.
//! - Internal failures may be returned as `Err`; the aggregator converts
//!   them to "no preview" with a logged warning. Nothing a processor does
//!   can abort a record.
//! - Textual preview fields are truncated to a bound so arbitrarily large
//!   values never produce unbounded payloads.
//! - Processors that consume binary data accept raw bytes or a
//!   base64-encoded string interchangeably.
//!
//! # Built-ins
//!
//! | Name | Input | Preview |
//! |------|-------|---------|
//! | `text` | string | bounded text preview with full content |
//! | `hex` | bytes or string | bounded hex dump |
//! | `pcm_audio` | bytes / base64 | WAV temp file + duration |
//! | `raw_image` | bytes / base64 | PNG temp file from a flat pixel buffer |

use std::io::Write;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::json;
use tracing::warn;

use crate::error::{LensError, Result};
use crate::models::FieldValue;

// ═══════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════

/// Opaque option map handed to a processor at construction time.
///
/// There is no fixed schema: each processor reads only the keys it
/// recognizes and falls back to its documented defaults for absent keys.
#[derive(Debug, Clone, Default)]
pub struct ProcessorConfig {
    options: serde_json::Map<String, serde_json::Value>,
}

impl ProcessorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON value. Non-object values behave as an empty config.
    pub fn from_value(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(options) => Self { options },
            _ => Self::default(),
        }
    }

    pub fn get_u32(&self, key: &str, default: u32) -> u32 {
        self.options
            .get(key)
            .and_then(|v| v.as_u64())
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(default)
    }

    pub fn get_usize(&self, key: &str, default: usize) -> usize {
        self.options
            .get(key)
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(default)
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.options
            .get(key)
            .and_then(|v| v.as_f64())
            .unwrap_or(default)
    }

    /// The raw option map, for handing a config through to a plugin.
    pub fn as_json(&self) -> serde_json::Value {
        serde_json::Value::Object(self.options.clone())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Contract
// ═══════════════════════════════════════════════════════════════════════

/// A preview produced by one processor invocation: a JSON object that must
/// carry a `type` key from the recognized category set. Kept loosely typed
/// so dynamically loaded processors and built-ins share one shape — the
/// aggregator validates structure centrally.
pub type Preview = serde_json::Value;

/// One unit of preview work.
pub trait FieldProcessor {
    /// Processor identity, used in warning logs.
    fn name(&self) -> &str;

    /// Inspect one field. `Ok(None)` means "no opinion" (wrong shape, below
    /// threshold, not interesting); `Err` means the processor itself failed.
    fn process(&self, field_name: &str, value: &FieldValue) -> Result<Option<Preview>>;
}

impl std::fmt::Debug for dyn FieldProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldProcessor")
            .field("name", &self.name())
            .finish()
    }
}

/// Creates processor instances from a config. Registered in the
/// [`ProcessorRegistry`](crate::registry::ProcessorRegistry) under one or
/// more names.
pub trait ProcessorFactory: Send + Sync {
    fn create(&self, config: ProcessorConfig) -> Box<dyn FieldProcessor>;
}

impl<F> ProcessorFactory for F
where
    F: Fn(ProcessorConfig) -> Box<dyn FieldProcessor> + Send + Sync,
{
    fn create(&self, config: ProcessorConfig) -> Box<dyn FieldProcessor> {
        self(config)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Shared helpers
// ═══════════════════════════════════════════════════════════════════════

/// Normalize a field value to raw bytes for binary processors.
///
/// Accepts raw bytes as-is and base64-encoded strings by decoding them.
/// Anything else — including a string that is not valid base64 — is not
/// applicable.
fn normalize_bytes(value: &FieldValue) -> Option<Vec<u8>> {
    match value {
        FieldValue::Bytes(b) => Some(b.clone()),
        FieldValue::Str(s) => STANDARD.decode(s.as_bytes()).ok(),
        _ => None,
    }
}

/// Truncate to `bound` characters, appending `...` when anything was cut.
/// Counted in characters so multi-byte text never splits a code point.
fn truncate_preview(s: &str, bound: usize) -> String {
    if s.chars().count() > bound {
        let head: String = s.chars().take(bound).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}

/// Reduce a field name to something safe for a filename suffix.
fn filename_fragment(field_name: &str) -> String {
    field_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Create a uniquely named temp file, write `data` into it, and persist it
/// past the handle. Deletion is the session's responsibility.
fn write_temp_artifact(prefix: &str, suffix: &str, data: &[u8]) -> Result<std::path::PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile()?;
    file.write_all(data)?;
    let (_, path) = file
        .keep()
        .map_err(|e| LensError::Io(e.error))?;
    Ok(path)
}

// ═══════════════════════════════════════════════════════════════════════
// Text
// ═══════════════════════════════════════════════════════════════════════

/// Previews string fields.
///
/// Config keys: `min_length` (default 20) — strings shorter than this are
/// not applicable; `max_preview` (default 200) — truncation bound for the
/// `preview` field. The full value is always carried in `content`.
pub struct TextProcessor {
    min_length: usize,
    max_preview: usize,
}

impl TextProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        Self {
            min_length: config.get_usize("min_length", 20),
            max_preview: config.get_usize("max_preview", 200),
        }
    }
}

impl FieldProcessor for TextProcessor {
    fn name(&self) -> &str {
        "text"
    }

    fn process(&self, field_name: &str, value: &FieldValue) -> Result<Option<Preview>> {
        let text = match value {
            FieldValue::Str(s) => s,
            _ => return Ok(None),
        };
        let length = text.chars().count();
        if length < self.min_length {
            return Ok(None);
        }

        Ok(Some(json!({
            "type": "text",
            "field_name": field_name,
            "content": text,
            "length": length,
            "preview": truncate_preview(text, self.max_preview),
            "is_multiline": text.contains('\n'),
        })))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Hex dump
// ═══════════════════════════════════════════════════════════════════════

/// Renders bytes (or a string's bytes) as a bounded hex dump.
///
/// Config key: `max_length` (default 200) — truncation bound for the hex
/// preview, in characters.
pub struct HexProcessor {
    max_length: usize,
}

impl HexProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        Self {
            max_length: config.get_usize("max_length", 200),
        }
    }
}

impl FieldProcessor for HexProcessor {
    fn name(&self) -> &str {
        "hex"
    }

    fn process(&self, field_name: &str, value: &FieldValue) -> Result<Option<Preview>> {
        let encoded = match value {
            FieldValue::Bytes(b) => hex::encode(b),
            FieldValue::Str(s) => hex::encode(s.as_bytes()),
            _ => return Ok(None),
        };

        Ok(Some(json!({
            "type": "text",
            "field_name": field_name,
            "content": encoded,
            "length": encoded.len(),
            "preview": format!("Hex: {}", truncate_preview(&encoded, self.max_length)),
        })))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// PCM audio
// ═══════════════════════════════════════════════════════════════════════

/// Interprets raw bytes as PCM samples and writes a playable WAV file.
///
/// Config keys: `sample_rate` (default 16000), `channels` (default 1),
/// `sample_width` (default 2, bytes per sample). The default profile is
/// 16 kHz mono 16-bit signed PCM.
pub struct PcmAudioProcessor {
    sample_rate: u32,
    channels: u32,
    sample_width: u32,
}

impl PcmAudioProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        Self {
            sample_rate: config.get_u32("sample_rate", 16_000),
            channels: config.get_u32("channels", 1),
            sample_width: config.get_u32("sample_width", 2),
        }
    }
}

impl FieldProcessor for PcmAudioProcessor {
    fn name(&self) -> &str {
        "pcm_audio"
    }

    fn process(&self, field_name: &str, value: &FieldValue) -> Result<Option<Preview>> {
        let data = match normalize_bytes(value) {
            Some(d) if !d.is_empty() => d,
            _ => return Ok(None),
        };
        if self.sample_rate == 0 || self.channels == 0 || self.sample_width == 0 {
            return Err(LensError::Processor {
                name: self.name().to_string(),
                reason: "audio config must have nonzero rate, channels, and width".into(),
            });
        }

        let wav = encode_wav(&data, self.sample_rate, self.channels, self.sample_width);
        let path = write_temp_artifact(
            "kvlens_pcm_",
            &format!("_{}.wav", filename_fragment(field_name)),
            &wav,
        )?;

        let bytes_per_second = (self.sample_rate * self.channels * self.sample_width) as f64;
        Ok(Some(json!({
            "type": "audio",
            "field_name": field_name,
            "temp_path": path.to_string_lossy(),
            "size": data.len(),
            "sample_rate": self.sample_rate,
            "channels": self.channels,
            "duration": data.len() as f64 / bytes_per_second,
        })))
    }
}

/// Wrap raw PCM data in a minimal RIFF/WAVE container.
fn encode_wav(data: &[u8], sample_rate: u32, channels: u32, sample_width: u32) -> Vec<u8> {
    let byte_rate = sample_rate * channels * sample_width;
    let block_align = (channels * sample_width) as u16;
    let bits_per_sample = (sample_width * 8) as u16;
    let data_len = data.len() as u32;

    let mut out = Vec::with_capacity(44 + data.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&(channels as u16).to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits_per_sample.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(data);
    out
}

// ═══════════════════════════════════════════════════════════════════════
// Raw image
// ═══════════════════════════════════════════════════════════════════════

/// Interprets raw bytes as a flat `width × height × channels` pixel buffer
/// and writes a PNG file.
///
/// Config keys: `width` (default 224), `height` (default 224), `channels`
/// (default 3). Supports 1-channel grayscale and 3-channel RGB layouts. A
/// buffer whose length does not match the expected size is padded or
/// truncated after a logged warning — mismatched data is rendered, not
/// rejected.
pub struct RawImageProcessor {
    width: u32,
    height: u32,
    channels: u32,
}

impl RawImageProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        Self {
            width: config.get_u32("width", 224),
            height: config.get_u32("height", 224),
            channels: config.get_u32("channels", 3),
        }
    }
}

impl FieldProcessor for RawImageProcessor {
    fn name(&self) -> &str {
        "raw_image"
    }

    fn process(&self, field_name: &str, value: &FieldValue) -> Result<Option<Preview>> {
        let mut data = match normalize_bytes(value) {
            Some(d) if !d.is_empty() => d,
            _ => return Ok(None),
        };
        let original_size = data.len();

        let expected = (self.width as usize) * (self.height as usize) * (self.channels as usize);
        if data.len() != expected {
            warn!(
                field = field_name,
                expected,
                got = data.len(),
                "image buffer size mismatch, padding/truncating"
            );
            data.resize(expected, 0);
        }

        let img = match self.channels {
            1 => image::GrayImage::from_raw(self.width, self.height, data)
                .map(image::DynamicImage::ImageLuma8),
            3 => image::RgbImage::from_raw(self.width, self.height, data)
                .map(image::DynamicImage::ImageRgb8),
            other => {
                return Err(LensError::Processor {
                    name: self.name().to_string(),
                    reason: format!("unsupported channel count: {}", other),
                })
            }
        };
        let png = encode_png(img, field_name)?;

        let path = write_temp_artifact(
            "kvlens_img_",
            &format!("_{}.png", filename_fragment(field_name)),
            &png,
        )?;

        Ok(Some(json!({
            "type": "image",
            "field_name": field_name,
            "temp_path": path.to_string_lossy(),
            "size": original_size,
            "width": self.width,
            "height": self.height,
            "channels": self.channels,
        })))
    }
}

/// Encode an image buffer as PNG bytes.
fn encode_png(buffer: Option<image::DynamicImage>, field_name: &str) -> Result<Vec<u8>> {
    let img = buffer.ok_or_else(|| LensError::Processor {
        name: "raw_image".to_string(),
        reason: format!(
            "pixel buffer for '{}' did not fill the declared dimensions",
            field_name
        ),
    })?;
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .map_err(|e| LensError::Processor {
            name: "raw_image".to_string(),
            reason: format!("PNG encoding failed for '{}': {}", field_name, e),
        })?;
    Ok(out.into_inner())
}
