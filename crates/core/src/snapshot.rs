//! Applied-snapshot record: a ConfigMap carrying the last applied spec as JSON.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::{Map, Value as Json};

use crate::error::ObjectError;
use crate::names::{APPLIED_DATA_KEY, APPLIED_NAMESPACE, APPLIED_PREFIX};
use crate::object::{Gvk, ObjectBody, RenderedObject};
use crate::spec::{AppliedSnapshot, DesiredSpec};

pub fn record_name(config_name: &str) -> String {
    format!("{APPLIED_PREFIX}{config_name}")
}

/// Build the record object. `resource_version` is the version the previous record was read
/// at; carrying it makes the write fail with a conflict if someone else wrote in between.
pub fn record_object(config_name: &str, spec: &DesiredSpec, resource_version: Option<&str>) -> Result<RenderedObject, ObjectError> {
    let applied = serde_json::to_string(spec)?;
    let mut fields = Map::new();
    let mut data = Map::new();
    data.insert(APPLIED_DATA_KEY.to_string(), Json::String(applied));
    fields.insert("data".into(), Json::Object(data));
    Ok(RenderedObject {
        metadata: ObjectMeta {
            name: Some(record_name(config_name)),
            namespace: Some(APPLIED_NAMESPACE.to_string()),
            resource_version: resource_version.map(str::to_string),
            ..Default::default()
        },
        body: ObjectBody::Generic { gvk: Gvk::new("", "v1", "ConfigMap"), fields },
    })
}

/// Decode a record's `data` map. A record without the data key decodes to `None`.
pub fn decode_record(data: &BTreeMap<String, String>, resource_version: Option<String>) -> Result<Option<AppliedSnapshot>, ObjectError> {
    let Some(raw) = data.get(APPLIED_DATA_KEY) else {
        return Ok(None);
    };
    let spec: DesiredSpec = serde_json::from_str(raw)?;
    Ok(Some(AppliedSnapshot { spec, resource_version }))
}

/// Decode the record from its JSON object form.
pub fn decode_record_json(obj: &Json) -> Result<Option<AppliedSnapshot>, ObjectError> {
    let data: BTreeMap<String, String> = match obj.get("data") {
        Some(d) => serde_json::from_value(d.clone())?,
        None => return Ok(None),
    };
    let rv = obj
        .get("metadata")
        .and_then(|m| m.get("resourceVersion"))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    decode_record(&data, rv)
}
