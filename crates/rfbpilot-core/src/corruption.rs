//! Heuristics that spot frames decoded with the wrong pixel format.
//!
//! A mismatched format usually shows up as a screen that is almost entirely
//! black or white, or as one short byte pattern repeated over and over. The
//! checks only look at the start of the buffer and never reject a frame.

use serde::Serialize;

/// Pixels sampled for the black/white check.
const SAMPLE_PIXELS: usize = 1000;

/// Bytes scanned for repeated blocks.
const SAMPLE_BYTES: usize = 1000;

const BLOCK: usize = 16;

/// Fraction of pure black or pure white pixels that counts as suspicious.
const UNIFORM_RATIO_LIMIT: f64 = 0.9;

/// Repeats above this are likely corruption.
const REPEAT_LIMIT: usize = 50;

/// Repeats above this earn a warning.
const REPEAT_WARN: usize = 10;

/// How worried to be about a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    LikelyCorrupt,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub message: String,
}

/// Result of [`inspect`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorruptionReport {
    pub sampled_pixels: usize,
    /// Pure black or pure white pixels among the sampled ones.
    pub uniform_pixels: usize,
    /// 16-byte windows identical to the first one.
    pub repeated_blocks: usize,
    pub findings: Vec<Finding>,
}

impl CorruptionReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn is_likely_corrupt(&self) -> bool {
        self.findings
            .iter()
            .any(|f| f.severity == Severity::LikelyCorrupt)
    }

    pub fn uniform_ratio(&self) -> f64 {
        if self.sampled_pixels == 0 {
            0.0
        } else {
            self.uniform_pixels as f64 / self.sampled_pixels as f64
        }
    }
}

/// Scan the start of a canonical RGBA buffer.
pub fn inspect(rgba: &[u8]) -> CorruptionReport {
    let mut findings = Vec::new();

    let mut sampled_pixels = 0;
    let mut uniform_pixels = 0;
    for pixel in rgba.chunks_exact(4).take(SAMPLE_PIXELS) {
        sampled_pixels += 1;
        let rgb = &pixel[..3];
        if rgb == [0, 0, 0] || rgb == [255, 255, 255] {
            uniform_pixels += 1;
        }
    }

    if sampled_pixels > 0 {
        let ratio = uniform_pixels as f64 / sampled_pixels as f64;
        if ratio > UNIFORM_RATIO_LIMIT {
            findings.push(Finding {
                severity: Severity::LikelyCorrupt,
                message: format!(
                    "{:.1}% of the first {} pixels are pure black or white",
                    ratio * 100.0,
                    sampled_pixels
                ),
            });
        }
    }

    let repeated_blocks = count_repeated_blocks(rgba);
    if repeated_blocks > REPEAT_LIMIT {
        findings.push(Finding {
            severity: Severity::LikelyCorrupt,
            message: format!(
                "leading {}-byte block repeats {} times",
                BLOCK, repeated_blocks
            ),
        });
    } else if repeated_blocks > REPEAT_WARN {
        findings.push(Finding {
            severity: Severity::Warning,
            message: format!(
                "leading {}-byte block repeats {} times",
                BLOCK, repeated_blocks
            ),
        });
    }

    CorruptionReport {
        sampled_pixels,
        uniform_pixels,
        repeated_blocks,
        findings,
    }
}

fn count_repeated_blocks(bytes: &[u8]) -> usize {
    let end = bytes.len().min(SAMPLE_BYTES);
    if end < BLOCK {
        return 0;
    }
    let first = &bytes[..BLOCK];
    (BLOCK..)
        .step_by(BLOCK)
        .take_while(|&offset| offset + BLOCK <= end)
        .filter(|&offset| &bytes[offset..offset + BLOCK] == first)
        .count()
}
