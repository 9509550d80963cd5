//! Wire/serialized forms: V1 inbound compat, V2 primary, and
//! the per-op payloads carried over the wire. These are the only types that
//! cross a serialization boundary; everything else in the crate works with
//! live `Interval`/`PositionReference` values.

use serde::{Deserialize, Serialize};

use crate::interval::{IntervalId, IntervalType, Stickiness};
use crate::local_collection::INTERVAL_ID_KEY;
use crate::position::{PropertyBag, RANGE_LABELS_KEY};
use crate::sequence::SeqNum;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedIntervalV1 {
    #[serde(rename = "sequenceNumber")]
    pub sequence_number: SeqNum,
    pub start: i64,
    pub end: i64,
    #[serde(rename = "intervalType")]
    pub interval_type: IntervalType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<PropertyBag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stickiness: Option<Stickiness>,
}

pub type SerializedCollectionV1 = Vec<SerializedIntervalV1>;

/// `[start, end, sequenceNumber, intervalType, properties, stickiness?]`.
/// Modeled as a plain tuple rather than a struct with a
/// custom visitor: `serde_json` already serializes a 6-tuple as a JSON
/// array, and an absent trailing `stickiness` is just `null` on the wire —
/// equivalent information to "omitted", simpler to get right.
pub type SerializedIntervalV2 = (i64, i64, SeqNum, IntervalType, PropertyBag, Option<Stickiness>);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedCollectionV2 {
    pub label: String,
    pub version: u8,
    pub intervals: Vec<SerializedIntervalV2>,
}

impl SerializedCollectionV2 {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into(), version: 2, intervals: Vec::new() }
    }
}

/// Strips the reserved `rangeLabels` property (it is represented once, in
/// `label`, at the collection level) before writing an interval's
/// properties onto the wire.
pub fn strip_range_label(mut properties: PropertyBag) -> PropertyBag {
    properties.remove(RANGE_LABELS_KEY);
    properties
}

/// Re-injects `rangeLabels = [label]` on load, undoing `strip_range_label`.
pub fn inject_range_label(properties: &mut PropertyBag, label: &str) {
    properties.insert(
        RANGE_LABELS_KEY.into(),
        serde_json::Value::Array(vec![serde_json::Value::String(label.to_string())]),
    );
}

/// Omits `stickiness` from the wire tuple when it is the default (`End`),
/// per the V2 compression rule.
pub fn compress_stickiness(stickiness: Stickiness) -> Option<Stickiness> {
    if stickiness == Stickiness::default() {
        None
    } else {
        Some(stickiness)
    }
}

pub fn decompress_stickiness(stickiness: Option<Stickiness>) -> Stickiness {
    stickiness.unwrap_or_default()
}

// ---- op payloads --------------------------

/// An `"add"` op carries the full serialized interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddOpPayload {
    pub start: i64,
    pub end: i64,
    #[serde(rename = "sequenceNumber")]
    pub sequence_number: SeqNum,
    #[serde(rename = "intervalType")]
    pub interval_type: IntervalType,
    pub properties: PropertyBag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stickiness: Option<Stickiness>,
}

/// A `"change"` op: `start`/`end` being absent means "unchanged"; any
/// property beyond `intervalId` means a property change accompanies it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeOpPayload {
    #[serde(rename = "intervalType")]
    pub interval_type: IntervalType,
    #[serde(rename = "sequenceNumber")]
    pub sequence_number: SeqNum,
    pub properties: PropertyBag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

impl ChangeOpPayload {
    pub fn interval_id(&self) -> Option<IntervalId> {
        self.properties.get(INTERVAL_ID_KEY).and_then(|v| v.as_str()).map(IntervalId::from)
    }

    /// Every property in the payload besides the reserved `intervalId`
    /// marker — these represent an actual `changeProperties` delta.
    pub fn property_delta(&self) -> PropertyBag {
        let mut delta = self.properties.clone();
        delta.remove(INTERVAL_ID_KEY);
        delta
    }
}

/// A `"delete"` op carries only the id of the interval to remove.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteOpPayload {
    pub properties: PropertyBag,
}

impl DeleteOpPayload {
    pub fn interval_id(&self) -> IntervalId {
        self.properties
            .get(INTERVAL_ID_KEY)
            .and_then(|v| v.as_str())
            .map(IntervalId::from)
            .unwrap_or_else(|| panic!("delete op payload is missing intervalId"))
    }
}
