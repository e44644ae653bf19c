#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum CaptureRaw {
    None,
    #[default]
    Line,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct IngestLimits {
    pub max_line_bytes: usize,
    /// Total raw text kept for failing lines in one pass. `None` keeps every failing line.
    pub max_raw_bytes_total: Option<usize>,
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            max_line_bytes: 64 * 1024,
            max_raw_bytes_total: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IngestConfig {
    pub limits: IngestLimits,
    pub capture_raw: CaptureRaw,
}
