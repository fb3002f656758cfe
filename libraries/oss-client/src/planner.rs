//! Upload planning.
//!
//! The backend decides between a single pre-signed PUT and a multipart
//! upload. Its plan is validated here, before any byte is transferred.

use crate::error::{ClientError, Result};
use crate::pipeline::AuthenticatedClient;
use crate::transport::HttpRequest;
use crate::types::{FileMetadata, PartDescriptor, PlanResponse};
use std::ops::Range;
use tracing::{debug, info, warn};

/// How a file will be transferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadPlan {
    Single {
        upload_url: String,
        object_key: String,
        file_id: Option<i64>,
    },
    Multipart {
        upload_id: String,
        part_size: u64,
        /// Sorted by part number
        parts: Vec<PartDescriptor>,
        object_key: String,
        file_id: Option<i64>,
    },
}

impl UploadPlan {
    pub fn is_multipart(&self) -> bool {
        matches!(self, UploadPlan::Multipart { .. })
    }

    pub fn upload_id(&self) -> Option<&str> {
        match self {
            UploadPlan::Multipart { upload_id, .. } => Some(upload_id),
            UploadPlan::Single { .. } => None,
        }
    }

    pub fn object_key(&self) -> &str {
        match self {
            UploadPlan::Single { object_key, .. } | UploadPlan::Multipart { object_key, .. } => {
                object_key
            }
        }
    }

    pub fn total_parts(&self) -> u32 {
        match self {
            UploadPlan::Single { .. } => 1,
            UploadPlan::Multipart { parts, .. } => parts.len() as u32,
        }
    }
}

/// Number of parts a file of `file_size` bytes splits into.
pub fn part_count(file_size: u64, part_size: u64) -> u64 {
    if part_size == 0 {
        return 0;
    }
    file_size.div_ceil(part_size)
}

/// Byte range covered by 1-based `part_number`.
pub fn part_range(part_number: u32, part_size: u64, file_size: u64) -> Range<u64> {
    let start = (u64::from(part_number).saturating_sub(1) * part_size).min(file_size);
    let end = (u64::from(part_number) * part_size).min(file_size);
    start..end
}

/// Obtains upload plans from the backend.
pub struct UploadPlanner<'a> {
    pipeline: &'a AuthenticatedClient,
    multipart_threshold_bytes: u64,
}

impl<'a> UploadPlanner<'a> {
    pub(crate) fn new(pipeline: &'a AuthenticatedClient, multipart_threshold_bytes: u64) -> Self {
        Self {
            pipeline,
            multipart_threshold_bytes,
        }
    }

    /// Ask the backend how to upload `metadata` and validate the answer.
    pub async fn plan(&self, metadata: &FileMetadata) -> Result<UploadPlan> {
        let url = self.pipeline.endpoint("/files/smart-upload");
        debug!(
            url = %url,
            file = %metadata.filename,
            size = metadata.file_size,
            "Requesting upload plan"
        );

        let request = HttpRequest::post(url).with_json(metadata)?;
        let response: PlanResponse = self.pipeline.execute_json(request, "upload plan").await?;
        let plan = validate_plan(response, metadata.file_size)?;

        let expected_multipart = metadata.file_size >= self.multipart_threshold_bytes;
        if plan.is_multipart() != expected_multipart {
            warn!(
                size = metadata.file_size,
                threshold = self.multipart_threshold_bytes,
                multipart = plan.is_multipart(),
                "Backend chose a different upload mode than expected, following the backend"
            );
        }

        info!(
            file = %metadata.filename,
            object_key = %plan.object_key(),
            multipart = plan.is_multipart(),
            parts = plan.total_parts(),
            "Upload planned"
        );
        Ok(plan)
    }
}

/// Turn a raw planning response into an [`UploadPlan`], rejecting anything
/// incomplete for its declared mode.
pub fn validate_plan(response: PlanResponse, file_size: u64) -> Result<UploadPlan> {
    let mode = response
        .mode
        .as_deref()
        .ok_or_else(|| ClientError::PlanningError("missing mode".into()))?;

    let object_key = match (&response.oss_key, response.file_id) {
        (Some(key), _) if !key.is_empty() => key.clone(),
        (_, Some(id)) => id.to_string(),
        _ => {
            return Err(ClientError::PlanningError(
                "missing oss_key and file_id".into(),
            ))
        }
    };

    match mode {
        "single" => {
            let upload_url = non_empty(response.upload_url)
                .ok_or_else(|| ClientError::PlanningError("single plan without upload_url".into()))?;
            Ok(UploadPlan::Single {
                upload_url,
                object_key,
                file_id: response.file_id,
            })
        }
        "multipart" => {
            let upload_id = non_empty(response.upload_id).ok_or_else(|| {
                ClientError::PlanningError("multipart plan without upload_id".into())
            })?;
            let part_size = response
                .part_size
                .filter(|size| *size > 0)
                .ok_or_else(|| {
                    ClientError::PlanningError("multipart plan without a positive part_size".into())
                })?;

            let mut planned = response.parts;
            if planned.is_empty() {
                return Err(ClientError::PlanningError(
                    "multipart plan without parts".into(),
                ));
            }
            planned.sort_by_key(|p| p.part_number);

            let expected = part_count(file_size, part_size);
            if planned.len() as u64 != expected {
                return Err(ClientError::PlanningError(format!(
                    "plan has {} parts, file of {} bytes needs {} parts of {} bytes",
                    planned.len(),
                    file_size,
                    expected,
                    part_size
                )));
            }

            let mut parts = Vec::with_capacity(planned.len());
            for (index, part) in planned.into_iter().enumerate() {
                let expected_number = index as u32 + 1;
                if part.part_number != expected_number {
                    return Err(ClientError::PlanningError(format!(
                        "part numbers must run 1..={} without gaps, found {} at position {}",
                        expected, part.part_number, expected_number
                    )));
                }
                let upload_url = non_empty(part.upload_url).ok_or_else(|| {
                    ClientError::PlanningError(format!(
                        "part {} has no upload_url",
                        part.part_number
                    ))
                })?;
                let range = part_range(part.part_number, part_size, file_size);
                parts.push(PartDescriptor {
                    part_number: part.part_number,
                    upload_url,
                    size: range.end - range.start,
                });
            }

            Ok(UploadPlan::Multipart {
                upload_id,
                part_size,
                parts,
                object_key,
                file_id: response.file_id,
            })
        }
        other => Err(ClientError::PlanningError(format!(
            "unknown upload mode '{}'",
            other
        ))),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PlannedPart;

    const MB: u64 = 1024 * 1024;

    fn multipart_response(parts: &[u32], part_size: u64) -> PlanResponse {
        PlanResponse {
            mode: Some("multipart".into()),
            oss_key: Some("uploads/big.bin".into()),
            file_id: Some(7),
            upload_id: Some("upload-1".into()),
            part_size: Some(part_size),
            parts: parts
                .iter()
                .map(|n| PlannedPart {
                    part_number: *n,
                    upload_url: Some(format!("https://store/part/{}", n)),
                })
                .collect(),
            ..PlanResponse::default()
        }
    }

    #[test]
    fn test_part_ranges_tile_the_file() {
        for (size, part) in [(500 * MB, 50 * MB), (10, 3), (1, 1), (7, 10), (1_000_001, 4096)] {
            let count = part_count(size, part);
            assert_eq!(count, (size + part - 1) / part);

            let mut cursor = 0;
            for k in 1..=count as u32 {
                let range = part_range(k, part, size);
                assert_eq!(range.start, cursor, "gap or overlap at part {}", k);
                assert_eq!(range.start, u64::from(k - 1) * part);
                assert_eq!(range.end, (u64::from(k) * part).min(size));
                assert!(range.end > range.start);
                cursor = range.end;
            }
            assert_eq!(cursor, size);
        }
    }

    #[test]
    fn test_single_plan() {
        let plan = validate_plan(
            PlanResponse {
                mode: Some("single".into()),
                upload_url: Some("https://store/obj?sig=1".into()),
                oss_key: Some("uploads/a.txt".into()),
                ..PlanResponse::default()
            },
            10 * MB,
        )
        .unwrap();

        assert_eq!(
            plan,
            UploadPlan::Single {
                upload_url: "https://store/obj?sig=1".into(),
                object_key: "uploads/a.txt".into(),
                file_id: None,
            }
        );
        assert_eq!(plan.total_parts(), 1);
        assert!(plan.upload_id().is_none());
    }

    #[test]
    fn test_single_plan_without_url_is_rejected() {
        let result = validate_plan(
            PlanResponse {
                mode: Some("single".into()),
                oss_key: Some("uploads/a.txt".into()),
                ..PlanResponse::default()
            },
            10,
        );
        assert!(matches!(result, Err(ClientError::PlanningError(_))));
    }

    #[test]
    fn test_multipart_plan_sorts_parts_and_sizes_them() {
        let plan = validate_plan(multipart_response(&[3, 1, 2], 4), 10).unwrap();
        match plan {
            UploadPlan::Multipart { parts, upload_id, .. } => {
                assert_eq!(upload_id, "upload-1");
                let numbers: Vec<_> = parts.iter().map(|p| p.part_number).collect();
                assert_eq!(numbers, vec![1, 2, 3]);
                let sizes: Vec<_> = parts.iter().map(|p| p.size).collect();
                assert_eq!(sizes, vec![4, 4, 2]);
            }
            other => panic!("Expected multipart plan, got {:?}", other),
        }
    }

    #[test]
    fn test_multipart_plan_with_gap_is_rejected() {
        let result = validate_plan(multipart_response(&[1, 2, 4], 4), 10);
        assert!(matches!(result, Err(ClientError::PlanningError(_))));
    }

    #[test]
    fn test_multipart_plan_with_wrong_part_count_is_rejected() {
        let result = validate_plan(multipart_response(&[1, 2], 4), 10);
        assert!(matches!(result, Err(ClientError::PlanningError(_))));
    }

    #[test]
    fn test_multipart_plan_with_missing_url_is_rejected() {
        let mut response = multipart_response(&[1, 2, 3], 4);
        response.parts[1].upload_url = None;
        match validate_plan(response, 10) {
            Err(ClientError::PlanningError(msg)) => assert!(msg.contains("part 2")),
            other => panic!("Expected PlanningError, got {:?}", other),
        }
    }

    #[test]
    fn test_multipart_plan_missing_fields_is_rejected() {
        let mut response = multipart_response(&[1], 4);
        response.upload_id = None;
        assert!(validate_plan(response, 4).is_err());

        let mut response = multipart_response(&[1], 4);
        response.part_size = Some(0);
        assert!(validate_plan(response, 4).is_err());
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let response = PlanResponse {
            mode: Some("resumable".into()),
            oss_key: Some("k".into()),
            ..PlanResponse::default()
        };
        assert!(matches!(
            validate_plan(response, 1),
            Err(ClientError::PlanningError(_))
        ));
    }

    #[test]
    fn test_file_id_stands_in_for_missing_key() {
        let plan = validate_plan(
            PlanResponse {
                mode: Some("single".into()),
                upload_url: Some("https://store/obj".into()),
                file_id: Some(42),
                ..PlanResponse::default()
            },
            1,
        )
        .unwrap();
        assert_eq!(plan.object_key(), "42");
    }
}
