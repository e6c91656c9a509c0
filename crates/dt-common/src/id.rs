//! Artifact keys and analysis identifiers.
//!
//! Persisted artifacts are addressed by structured keys rather than by
//! file names: a tensor by its [`LayerName`], a CP model by a [`ModelKey`]
//! of (layer, rank, optional run index). Storage layout is derived from the
//! key, never the other way round.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a layer name.
pub const MAX_LAYER_NAME_LEN: usize = 64;

/// Name of a traffic layer (e.g. `ipv4`, `arp`, `dns`).
///
/// Restricted to ASCII letters, digits, `_` and `-` so it is safe to use as
/// a path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LayerName(String);

impl LayerName {
    /// Parse and validate a layer name.
    pub fn parse(s: &str) -> Option<Self> {
        if s.is_empty() || s.len() > MAX_LAYER_NAME_LEN {
            return None;
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return None;
        }
        Some(LayerName(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LayerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for LayerName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LayerName::parse(s).ok_or_else(|| {
            format!(
                "invalid layer name '{s}': use 1-{MAX_LAYER_NAME_LEN} characters from [A-Za-z0-9_-]"
            )
        })
    }
}

impl TryFrom<String> for LayerName {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<LayerName> for String {
    fn from(layer: LayerName) -> Self {
        layer.0
    }
}

/// Key of a persisted CP model.
///
/// `run: None` is the accepted model for (layer, rank); `run: Some(k)` is
/// stability run `k` (1-based). The two never alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelKey {
    pub layer: LayerName,
    pub rank: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<u32>,
}

impl ModelKey {
    /// Key of the accepted model for a layer at a rank.
    pub fn accepted(layer: LayerName, rank: usize) -> Self {
        ModelKey {
            layer,
            rank,
            run: None,
        }
    }

    /// Key of one stability run.
    pub fn run(layer: LayerName, rank: usize, run: u32) -> Self {
        ModelKey {
            layer,
            rank,
            run: Some(run),
        }
    }

    pub fn is_run(&self) -> bool {
        self.run.is_some()
    }

    /// The accepted key with the same layer and rank.
    pub fn to_accepted(&self) -> Self {
        ModelKey::accepted(self.layer.clone(), self.rank)
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.run {
            Some(run) => write!(f, "{}/R{}/run{}", self.layer, self.rank, run),
            None => write!(f, "{}/R{}", self.layer, self.rank),
        }
    }
}

/// Correlation ID for one analysis invocation.
///
/// Format: `dt-YYYYMMDD-HHMMSS-XXXX`
/// Example: `dt-20260115-143022-a7xq`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisId(pub String);

impl AnalysisId {
    /// Generate a new analysis ID.
    pub fn new() -> Self {
        let now = chrono::Utc::now();
        AnalysisId(format!(
            "dt-{}-{}-{}",
            now.format("%Y%m%d"),
            now.format("%H%M%S"),
            generate_base32_suffix()
        ))
    }

    /// Parse an existing analysis ID string.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != 23 || !s.is_ascii() || !s.starts_with("dt-") {
            return None;
        }
        let bytes = s.as_bytes();
        if bytes[11] != b'-' || bytes[18] != b'-' {
            return None;
        }
        let digits_ok = s[3..11].chars().all(|c| c.is_ascii_digit())
            && s[12..18].chars().all(|c| c.is_ascii_digit());
        let suffix_ok = s[19..23]
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '2'..='7'));
        if digits_ok && suffix_ok {
            Some(AnalysisId(s.to_string()))
        } else {
            None
        }
    }
}

impl Default for AnalysisId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AnalysisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn generate_base32_suffix() -> String {
    let uuid = uuid::Uuid::new_v4();
    let bytes = uuid.as_bytes();
    let value = (((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | (bytes[2] as u32))
        & 0x000F_FFFF;
    let alphabet = b"abcdefghijklmnopqrstuvwxyz234567";
    [15_u32, 10, 5, 0]
        .iter()
        .map(|shift| alphabet[((value >> shift) & 0x1F) as usize] as char)
        .collect()
}
