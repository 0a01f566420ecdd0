// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Persisted lifecycle of every inference attempt.
//!
//! A record is written `pending` before the upstream call and moves to
//! `completed` or `error` exactly once. Records live in the `inference_request`
//! bucket keyed by request id. Sorted secondary indexes, scored by creation
//! time in milliseconds, make listing and filtering independent of the size of
//! the key space:
//!
//! | index | members |
//! |---|---|
//! | `all` | every record |
//! | `type:{type}` | records of one kind (`LLM`, `ASR`, ...) |
//! | `request_type:{request_type}` | records of one request type |
//! | `status:{status}` | records in one status, moved on each transition |
//! | `nim:{nim_id}` | records sent to one NIM |
//! | `stream:{true,false}` | streaming and non-streaming records |
//! | `nims` | NIM ids that have records, scored by their latest record |

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use nimkit_runtime::storage::key_value_store::{Key, KeyValueBucket, Manager, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

pub const LEDGER_BUCKET: &str = "inference_request";

const INDEX_ALL: &str = "all";
const INDEX_NIMS: &str = "nims";

#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    #[error("Inference request not found")]
    NotFound(String),

    #[error("Inference request {0} already reached a terminal status")]
    AlreadyTerminal(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Completed,
    Error,
}

impl RecordStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RecordStatus::Pending)
    }
}

/// Coarse kind of a record, the `type` field
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordKind {
    Llm,
    ImageGeneration,
    Asr,
    SpeechEnhancement,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RequestType {
    Chat,
    Completion,
    ImageGeneration,
    Asr,
    SpeechEnhancement,
}

/// One inference attempt. Input, output and error are kept as JSON text so
/// that records stay readable by anything that reads the store directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRecord {
    pub request_id: String,
    pub input_json: String,
    #[serde(default)]
    pub output_json: Option<String>,
    #[serde(default)]
    pub error_json: Option<String>,
    #[serde(rename = "type")]
    pub kind: RecordKind,
    pub request_type: RequestType,
    pub nim_id: String,
    pub model: String,
    pub stream: bool,
    pub status: RecordStatus,
    pub date_created: DateTime<Utc>,
    pub date_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_audio_path: Option<String>,
}

fn decode_blob(blob: Option<&str>) -> Value {
    blob.filter(|s| !s.is_empty())
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_else(|| json!({}))
}

fn encode_blob(value: &Value) -> String {
    // a Value always serializes
    serde_json::to_string(value).unwrap_or_default()
}

impl InferenceRecord {
    /// A fresh pending record with a random id
    pub fn new(
        kind: RecordKind,
        request_type: RequestType,
        nim_id: impl Into<String>,
        model: impl Into<String>,
        stream: bool,
    ) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), kind, request_type, nim_id, model, stream)
    }

    /// Pending record under a caller-chosen id, for when media files are named after it
    pub fn with_id(
        request_id: String,
        kind: RecordKind,
        request_type: RequestType,
        nim_id: impl Into<String>,
        model: impl Into<String>,
        stream: bool,
    ) -> Self {
        let now = Utc::now();
        InferenceRecord {
            request_id,
            input_json: String::new(),
            output_json: None,
            error_json: None,
            kind,
            request_type,
            nim_id: nim_id.into(),
            model: model.into(),
            stream,
            status: RecordStatus::Pending,
            date_created: now,
            date_updated: now,
            audio_file_path: None,
            output_audio_path: None,
        }
    }

    pub fn set_input(&mut self, input: &Value) {
        self.input_json = encode_blob(input);
    }

    pub fn get_input(&self) -> Value {
        decode_blob(Some(&self.input_json))
    }

    pub fn set_output(&mut self, output: &Value) {
        self.output_json = Some(encode_blob(output));
    }

    pub fn get_output(&self) -> Value {
        decode_blob(self.output_json.as_deref())
    }

    pub fn set_error(&mut self, error: &Value) {
        self.error_json = Some(encode_blob(error));
    }

    pub fn get_error(&self) -> Value {
        decode_blob(self.error_json.as_deref())
    }

    /// The error object, or `None` when none was written
    pub fn error(&self) -> Option<Value> {
        self.error_json.as_ref().map(|_| self.get_error())
    }

    fn touch(&mut self) {
        self.date_updated = Utc::now();
    }

    fn score(&self) -> f64 {
        self.date_created.timestamp_millis() as f64
    }

    /// Shape returned by the LLM request endpoints
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.request_id,
            "request_id": self.request_id,
            "type": self.kind,
            "request_type": self.request_type,
            "nim_id": self.nim_id,
            "model": self.model,
            "stream": self.stream,
            "status": self.status,
            "date_created": self.date_created,
            "date_updated": self.date_updated,
            "input": self.get_input(),
            "output": self.get_output(),
            "error": self.get_error(),
        })
    }

    /// Shape returned by the gallery
    pub fn to_gallery_json(&self) -> Value {
        let mut value = json!({
            "request_id": self.request_id,
            "type": self.kind,
            "request_type": self.request_type,
            "nim_id": self.nim_id,
            "model": self.model,
            "stream": self.stream,
            "status": self.status,
            "date_created": self.date_created,
            "date_updated": self.date_updated,
            "input_data": self.get_input(),
            "output_data": self.get_output(),
            "error_data": self.get_error(),
        });
        if let Some(path) = &self.audio_file_path {
            value["audio_file_path"] = json!(path);
        }
        if let Some(path) = &self.output_audio_path {
            value["output_audio_path"] = json!(path);
        }
        value
    }

    fn matches_search(&self, needle_lower: &str) -> bool {
        self.input_json.to_lowercase().contains(needle_lower)
            || self
                .output_json
                .as_deref()
                .is_some_and(|o| o.to_lowercase().contains(needle_lower))
    }
}

/// Conjunctive filter over the indexes. `nim_ids` matches any of the listed NIMs.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub kind: Option<String>,
    pub request_type: Option<String>,
    pub status: Option<String>,
    pub nim_ids: Vec<String>,
    /// Case-insensitive substring of the input or output JSON
    pub search: Option<String>,
}

/// One page of records, newest first
#[derive(Debug, Clone)]
pub struct RecordPage {
    pub records: Vec<InferenceRecord>,
    /// Matches before paging
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamingCounts {
    pub streaming: usize,
    pub non_streaming: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerStats {
    pub total_requests: usize,
    /// Keyed by request type
    pub by_type: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
    pub by_nim: BTreeMap<String, usize>,
    pub streaming_vs_non_streaming: StreamingCounts,
}

/// Persistence and querying of [`InferenceRecord`]s
#[derive(Clone)]
pub struct Ledger {
    manager: Manager,
}

impl Ledger {
    pub fn new(manager: Manager) -> Self {
        Ledger { manager }
    }

    async fn bucket(&self) -> Result<Box<dyn KeyValueBucket>, LedgerError> {
        Ok(self.manager.get_or_create_bucket(LEDGER_BUCKET).await?)
    }

    async fn save(&self, record: &InferenceRecord) -> Result<(), LedgerError> {
        self.manager
            .save(LEDGER_BUCKET, &Key::new(record.request_id.clone()), record)
            .await?;
        Ok(())
    }

    /// Persists a new pending record and indexes it
    pub async fn create(&self, record: &InferenceRecord) -> Result<(), LedgerError> {
        self.save(record).await?;
        let bucket = self.bucket().await?;
        let id = record.request_id.as_str();
        let score = record.score();
        for index in index_names(record) {
            bucket.index_add(&index, id, score).await?;
        }
        bucket.index_add(INDEX_NIMS, &record.nim_id, score).await?;
        tracing::debug!(request_id = %id, nim_id = %record.nim_id, "created inference record");
        Ok(())
    }

    /// Loads a record, or [`LedgerError::NotFound`]
    pub async fn get(&self, request_id: &str) -> Result<InferenceRecord, LedgerError> {
        self.manager
            .load(LEDGER_BUCKET, &Key::from(request_id))
            .await?
            .ok_or_else(|| LedgerError::NotFound(request_id.to_string()))
    }

    /// Writes the output without ending the lifecycle, for post-processing that may still fail
    pub async fn store_output(
        &self,
        record: &mut InferenceRecord,
        output: &Value,
    ) -> Result<(), LedgerError> {
        if record.status.is_terminal() {
            return Err(LedgerError::AlreadyTerminal(record.request_id.clone()));
        }
        record.set_output(output);
        record.touch();
        self.save(record).await
    }

    /// pending → completed
    pub async fn complete(
        &self,
        record: &mut InferenceRecord,
        output: &Value,
    ) -> Result<(), LedgerError> {
        if record.status.is_terminal() {
            return Err(LedgerError::AlreadyTerminal(record.request_id.clone()));
        }
        record.set_output(output);
        self.transition(record, RecordStatus::Completed).await
    }

    /// pending → error
    pub async fn fail(&self, record: &mut InferenceRecord, error: &Value) -> Result<(), LedgerError> {
        if record.status.is_terminal() {
            return Err(LedgerError::AlreadyTerminal(record.request_id.clone()));
        }
        record.set_error(error);
        self.transition(record, RecordStatus::Error).await
    }

    async fn transition(
        &self,
        record: &mut InferenceRecord,
        status: RecordStatus,
    ) -> Result<(), LedgerError> {
        let previous = record.status;
        record.status = status;
        record.touch();
        self.save(record).await?;

        // the record itself is saved, index drift only affects listing
        if let Err(err) = self.move_status(record, previous).await {
            tracing::warn!(request_id = %record.request_id, %err, "failed to move status index");
        }
        tracing::info!(request_id = %record.request_id, nim_id = %record.nim_id, %status, "inference finished");
        Ok(())
    }

    async fn move_status(
        &self,
        record: &InferenceRecord,
        previous: RecordStatus,
    ) -> Result<(), LedgerError> {
        let bucket = self.bucket().await?;
        bucket
            .index_remove(&status_index(previous.as_ref()), &record.request_id)
            .await?;
        bucket
            .index_add(
                &status_index(record.status.as_ref()),
                &record.request_id,
                record.score(),
            )
            .await?;
        Ok(())
    }

    /// Removes a record and its index entries. Returns whether it existed.
    pub async fn delete(&self, request_id: &str) -> Result<bool, LedgerError> {
        let record = match self.get(request_id).await {
            Ok(record) => record,
            Err(LedgerError::NotFound(_)) => return Ok(false),
            Err(err) => return Err(err),
        };
        let bucket = self.bucket().await?;
        let existed = bucket.delete(&Key::from(request_id)).await?;
        for index in index_names(&record) {
            bucket.index_remove(&index, request_id).await?;
        }
        if bucket.index_len(&nim_index(&record.nim_id)).await? == 0 {
            bucket.index_remove(INDEX_NIMS, &record.nim_id).await?;
        }
        Ok(existed)
    }

    /// Records matching `filter`, newest first, skipping `offset` and returning at most `limit`
    pub async fn list(
        &self,
        filter: &RecordFilter,
        offset: usize,
        limit: usize,
    ) -> Result<RecordPage, LedgerError> {
        let bucket = self.bucket().await?;
        let ids = self.candidate_ids(bucket.as_ref(), filter).await?;

        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let Some(needle) = search else {
            let total = ids.len();
            let mut records = Vec::new();
            for id in ids.iter().skip(offset).take(limit) {
                if let Some(record) = self.load_indexed(id).await? {
                    records.push(record);
                }
            }
            return Ok(RecordPage { records, total });
        };

        // search is the one filter that has to read the records
        let mut matched = Vec::new();
        for id in &ids {
            if let Some(record) = self.load_indexed(id).await?
                && record.matches_search(&needle)
            {
                matched.push(record);
            }
        }
        let total = matched.len();
        let records = matched.into_iter().skip(offset).take(limit).collect();
        Ok(RecordPage { records, total })
    }

    async fn load_indexed(&self, request_id: &str) -> Result<Option<InferenceRecord>, LedgerError> {
        match self.get(request_id).await {
            Ok(record) => Ok(Some(record)),
            Err(LedgerError::NotFound(_)) => {
                tracing::warn!(%request_id, "index references a missing record");
                Ok(None)
            }
            Err(LedgerError::Store(StoreError::JSONDecodeError(err))) => {
                tracing::warn!(%request_id, %err, "skipping undecodable record");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Ordered ids satisfying every index constraint of `filter`.
    ///
    /// The smallest constraining index drives the ordering, the rest are applied
    /// as membership tests.
    async fn candidate_ids(
        &self,
        bucket: &dyn KeyValueBucket,
        filter: &RecordFilter,
    ) -> Result<Vec<String>, LedgerError> {
        let mut constraints: Vec<String> = Vec::new();
        if let Some(kind) = non_empty(&filter.kind) {
            constraints.push(type_index(kind));
        }
        if let Some(request_type) = non_empty(&filter.request_type) {
            constraints.push(request_type_index(request_type));
        }
        if let Some(status) = non_empty(&filter.status) {
            constraints.push(status_index(status));
        }
        let nim_ids: Vec<&str> = filter
            .nim_ids
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();
        if nim_ids.len() == 1 {
            constraints.push(nim_index(nim_ids[0]));
        }

        let mut driver = INDEX_ALL.to_string();
        let mut driver_len = usize::MAX;
        for index in &constraints {
            let len = bucket.index_len(index).await?;
            if len == 0 {
                return Ok(vec![]);
            }
            if len < driver_len {
                driver_len = len;
                driver = index.clone();
            }
        }

        let mut sets: Vec<HashSet<String>> = Vec::new();
        for index in constraints.iter().filter(|i| **i != driver) {
            sets.push(bucket.index_range(index, 0, None).await?.into_iter().collect());
        }
        if nim_ids.len() > 1 {
            let mut any_of = HashSet::new();
            for nim_id in &nim_ids {
                any_of.extend(bucket.index_range(&nim_index(nim_id), 0, None).await?);
            }
            sets.push(any_of);
        }

        let ordered = bucket.index_range(&driver, 0, None).await?;
        Ok(ordered
            .into_iter()
            .filter(|id| sets.iter().all(|set| set.contains(id)))
            .collect())
    }

    /// Counts answered from index cardinalities
    pub async fn stats(&self) -> Result<LedgerStats, LedgerError> {
        use strum::IntoEnumIterator;

        let bucket = self.bucket().await?;
        let mut by_type = BTreeMap::new();
        for request_type in RequestType::iter() {
            let len = bucket
                .index_len(&request_type_index(request_type.as_ref()))
                .await?;
            by_type.insert(request_type.to_string(), len);
        }
        let mut by_status = BTreeMap::new();
        for status in RecordStatus::iter() {
            let len = bucket.index_len(&status_index(status.as_ref())).await?;
            by_status.insert(status.to_string(), len);
        }
        let mut by_nim = BTreeMap::new();
        for nim_id in bucket.index_range(INDEX_NIMS, 0, None).await? {
            let len = bucket.index_len(&nim_index(&nim_id)).await?;
            if len > 0 {
                by_nim.insert(nim_id, len);
            }
        }
        Ok(LedgerStats {
            total_requests: bucket.index_len(INDEX_ALL).await?,
            by_type,
            by_status,
            by_nim,
            streaming_vs_non_streaming: StreamingCounts {
                streaming: bucket.index_len(&stream_index(true)).await?,
                non_streaming: bucket.index_len(&stream_index(false)).await?,
            },
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn type_index(kind: &str) -> String {
    format!("type:{kind}")
}

fn request_type_index(request_type: &str) -> String {
    format!("request_type:{request_type}")
}

fn status_index(status: &str) -> String {
    format!("status:{status}")
}

fn nim_index(nim_id: &str) -> String {
    format!("nim:{nim_id}")
}

fn stream_index(stream: bool) -> String {
    format!("stream:{stream}")
}

fn index_names(record: &InferenceRecord) -> Vec<String> {
    vec![
        INDEX_ALL.to_string(),
        type_index(record.kind.as_ref()),
        request_type_index(record.request_type.as_ref()),
        status_index(record.status.as_ref()),
        nim_index(&record.nim_id),
        stream_index(record.stream),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rstest::rstest;

    fn record_at(
        offset_ms: i64,
        kind: RecordKind,
        request_type: RequestType,
        nim_id: &str,
        input: Value,
    ) -> InferenceRecord {
        let mut record = InferenceRecord::new(kind, request_type, nim_id, "model", false);
        record.date_created = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000).unwrap()
            + Duration::milliseconds(offset_ms);
        record.date_updated = record.date_created;
        record.set_input(&input);
        record
    }

    async fn seeded() -> anyhow::Result<(Ledger, Vec<InferenceRecord>)> {
        let ledger = Ledger::new(Manager::memory());
        let records = vec![
            record_at(0, RecordKind::Llm, RequestType::Chat, "meta/llama", json!({"prompt": "hello cat"})),
            record_at(10, RecordKind::ImageGeneration, RequestType::ImageGeneration, "bfl/flux", json!({"prompt": "a dog"})),
            record_at(20, RecordKind::Llm, RequestType::Completion, "meta/llama", json!({"prompt": "a Cat again"})),
            record_at(30, RecordKind::Asr, RequestType::Asr, "nvidia/parakeet", json!({"mode": "offline"})),
        ];
        for record in &records {
            ledger.create(record).await?;
        }
        Ok((ledger, records))
    }

    fn ids(page: &RecordPage) -> Vec<String> {
        page.records.iter().map(|r| r.request_id.clone()).collect()
    }

    #[rstest]
    #[case(json!({}))]
    #[case(json!({"messages": [{"role": "user", "content": "hi"}], "temperature": 0.2, "n": null}))]
    #[case(json!([1, "two", {"three": [3.5]}]))]
    #[case(json!("just a string"))]
    fn test_blob_round_trip(#[case] value: Value) {
        let mut record = InferenceRecord::new(RecordKind::Llm, RequestType::Chat, "a/b", "m", false);
        record.set_input(&value);
        record.set_output(&value);
        record.set_error(&value);
        assert_eq!(record.get_input(), value);
        assert_eq!(record.get_output(), value);
        assert_eq!(record.get_error(), value);
    }

    #[test]
    fn test_unset_blobs_are_empty_objects() {
        let record = InferenceRecord::new(RecordKind::Llm, RequestType::Chat, "a/b", "m", false);
        assert_eq!(record.get_input(), json!({}));
        assert_eq!(record.get_output(), json!({}));
        assert_eq!(record.error(), None);
    }

    #[tokio::test]
    async fn test_single_terminal_transition() -> anyhow::Result<()> {
        let ledger = Ledger::new(Manager::memory());
        let mut record = InferenceRecord::new(RecordKind::Llm, RequestType::Chat, "a/b", "m", false);
        record.set_input(&json!({"q": 1}));
        ledger.create(&record).await?;

        ledger.complete(&mut record, &json!({"answer": 42})).await?;
        let err = ledger.fail(&mut record, &json!({"error": "late"})).await;
        assert!(matches!(err, Err(LedgerError::AlreadyTerminal(_))));
        let err = ledger.complete(&mut record, &json!({})).await;
        assert!(matches!(err, Err(LedgerError::AlreadyTerminal(_))));

        let stored = ledger.get(&record.request_id).await?;
        assert_eq!(stored.status, RecordStatus::Completed);
        assert_eq!(stored.get_output(), json!({"answer": 42}));
        assert_eq!(stored.error(), None);

        let stats = ledger.stats().await?;
        assert_eq!(stats.by_status["completed"], 1);
        assert_eq!(stats.by_status["pending"], 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_store_output_then_fail() -> anyhow::Result<()> {
        let ledger = Ledger::new(Manager::memory());
        let mut record = InferenceRecord::new(RecordKind::ImageGeneration, RequestType::ImageGeneration, "a/b", "m", false);
        ledger.create(&record).await?;
        ledger.store_output(&mut record, &json!({"artifacts": []})).await?;
        ledger.fail(&mut record, &json!({"error": "disk full"})).await?;

        let stored = ledger.get(&record.request_id).await?;
        assert_eq!(stored.status, RecordStatus::Error);
        assert_eq!(stored.get_output(), json!({"artifacts": []}));
        assert_eq!(stored.get_error(), json!({"error": "disk full"}));
        Ok(())
    }

    #[tokio::test]
    async fn test_list_newest_first_with_filters() -> anyhow::Result<()> {
        let (ledger, records) = seeded().await?;

        let all = ledger.list(&RecordFilter::default(), 0, 100).await?;
        assert_eq!(all.total, 4);
        assert_eq!(ids(&all)[0], records[3].request_id);
        assert_eq!(ids(&all)[3], records[0].request_id);

        let llm = RecordFilter {
            kind: Some("LLM".into()),
            ..Default::default()
        };
        let page = ledger.list(&llm, 0, 100).await?;
        assert_eq!(ids(&page), vec![records[2].request_id.clone(), records[0].request_id.clone()]);

        let chat_llama = RecordFilter {
            request_type: Some("chat".into()),
            nim_ids: vec!["meta/llama".into()],
            ..Default::default()
        };
        let page = ledger.list(&chat_llama, 0, 100).await?;
        assert_eq!(ids(&page), vec![records[0].request_id.clone()]);

        let several = RecordFilter {
            nim_ids: vec!["bfl/flux".into(), " nvidia/parakeet ".into(), "".into()],
            ..Default::default()
        };
        let page = ledger.list(&several, 0, 100).await?;
        assert_eq!(page.total, 2);
        assert_eq!(ids(&page), vec![records[3].request_id.clone(), records[1].request_id.clone()]);

        let nothing = RecordFilter {
            status: Some("error".into()),
            ..Default::default()
        };
        assert_eq!(ledger.list(&nothing, 0, 100).await?.total, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_search_and_paging() -> anyhow::Result<()> {
        let (ledger, records) = seeded().await?;
        let cats = RecordFilter {
            search: Some("CAT".into()),
            ..Default::default()
        };
        let page = ledger.list(&cats, 0, 1).await?;
        assert_eq!(page.total, 2);
        assert_eq!(ids(&page), vec![records[2].request_id.clone()]);
        let page = ledger.list(&cats, 1, 1).await?;
        assert_eq!(ids(&page), vec![records[0].request_id.clone()]);

        let page = ledger.list(&RecordFilter::default(), 3, 10).await?;
        assert_eq!(page.total, 4);
        assert_eq!(page.records.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_cleans_indexes() -> anyhow::Result<()> {
        let (ledger, records) = seeded().await?;
        assert!(ledger.delete(&records[1].request_id).await?);
        assert!(!ledger.delete(&records[1].request_id).await?);
        assert!(matches!(
            ledger.get(&records[1].request_id).await,
            Err(LedgerError::NotFound(_))
        ));

        let stats = ledger.stats().await?;
        assert_eq!(stats.total_requests, 3);
        assert!(!stats.by_nim.contains_key("bfl/flux"));
        assert_eq!(stats.by_nim["meta/llama"], 2);
        assert_eq!(stats.by_type["chat"], 1);
        assert_eq!(stats.by_type["completion"], 1);
        assert_eq!(stats.by_type["image_generation"], 0);
        assert_eq!(stats.streaming_vs_non_streaming.non_streaming, 3);
        assert_eq!(stats.streaming_vs_non_streaming.streaming, 0);
        Ok(())
    }

    #[test]
    fn test_record_json_shape() {
        let mut record = InferenceRecord::new(RecordKind::SpeechEnhancement, RequestType::SpeechEnhancement, "nvidia/studiovoice", "studiovoice", false);
        record.audio_file_path = Some("media/studiovoice/input/x.wav".into());
        let value = record.to_json();
        assert_eq!(value["type"], "SPEECH_ENHANCEMENT");
        assert_eq!(value["request_type"], "speech_enhancement");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["id"], value["request_id"]);
        let gallery = record.to_gallery_json();
        assert_eq!(gallery["audio_file_path"], "media/studiovoice/input/x.wav");
        assert!(gallery.get("output_audio_path").is_none());
    }
}
