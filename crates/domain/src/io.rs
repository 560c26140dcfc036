use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::clock::StreamHeader;
use crate::error::DomainError;
use crate::events::{EncodedTrack, Frame, Onset, RawNoteDetection, SegmentNote};

/// Everything the external detector reported for one input.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorCapture {
    pub sample_rate: Option<u32>,
    pub hop_size: Option<u32>,
    pub frames: Vec<Frame>,
    pub onsets: Vec<Onset>,
    pub detections: Vec<RawNoteDetection>,
}

impl DetectorCapture {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DomainError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|err| DomainError::Io(format!("read capture {:?}: {}", path, err)))?;
        let format = ExportFormat::from_path(path).unwrap_or(ExportFormat::Json);
        Self::parse(&text, format)
    }

    pub fn parse(text: &str, format: ExportFormat) -> Result<Self, DomainError> {
        match format {
            ExportFormat::Json => serde_json::from_str(text)
                .map_err(|err| DomainError::Serialization(err.to_string())),
            ExportFormat::Yaml => serde_yaml::from_str(text)
                .map_err(|err| DomainError::Serialization(err.to_string())),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty() && self.onsets.is_empty() && self.detections.is_empty()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TranscriptionReport {
    pub header: StreamHeader,
    pub segments: Vec<SegmentNote>,
    pub segment_track: Option<EncodedTrack>,
    pub frame_track: Option<EncodedTrack>,
    pub detection_track: Option<EncodedTrack>,
}

impl TranscriptionReport {
    pub fn new(header: StreamHeader) -> Self {
        Self {
            header,
            segments: Vec::new(),
            segment_track: None,
            frame_track: None,
            detection_track: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Json,
    Yaml,
}

impl ExportFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Some(ExportFormat::Json),
            Some("yaml") | Some("yml") => Some(ExportFormat::Yaml),
            _ => None,
        }
    }
}

pub trait ReportExporter {
    fn export(
        &self,
        report: &TranscriptionReport,
        format: ExportFormat,
    ) -> Result<Vec<u8>, DomainError>;
}

pub struct JsonExporter;

impl ReportExporter for JsonExporter {
    fn export(
        &self,
        report: &TranscriptionReport,
        format: ExportFormat,
    ) -> Result<Vec<u8>, DomainError> {
        match format {
            ExportFormat::Json => serde_json::to_vec_pretty(report)
                .map_err(|err| DomainError::Serialization(err.to_string())),
            other => Err(DomainError::validation(format!(
                "JsonExporter cannot handle {:?}",
                other
            ))),
        }
    }
}

pub struct YamlExporter;

impl ReportExporter for YamlExporter {
    fn export(
        &self,
        report: &TranscriptionReport,
        format: ExportFormat,
    ) -> Result<Vec<u8>, DomainError> {
        match format {
            ExportFormat::Yaml => serde_yaml::to_string(report)
                .map(String::into_bytes)
                .map_err(|err| DomainError::Serialization(err.to_string())),
            other => Err(DomainError::validation(format!(
                "YamlExporter cannot handle {:?}",
                other
            ))),
        }
    }
}

/// Picks the exporter matching `format`.
pub fn exporter_for(format: ExportFormat) -> Box<dyn ReportExporter> {
    match format {
        ExportFormat::Json => Box::new(JsonExporter),
        ExportFormat::Yaml => Box::new(YamlExporter),
    }
}
