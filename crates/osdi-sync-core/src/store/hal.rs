//! Translation between OSDI HAL+JSON resources and flat documents.

use serde_json::{json, Map, Value};
use url::Url;

use crate::error::StoreError;
use crate::model::ResourceType;

const ID_PREFIX: &str = "action_network:";

/// Items embedded in one collection page, e.g. `_embedded["osdi:people"]`.
pub fn embedded_items(page: &Value, resource: ResourceType) -> Vec<Value> {
    page.get("_embedded")
        .and_then(|e| e.get(format!("osdi:{}", resource.as_str())))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

pub fn next_link(page: &Value) -> Option<String> {
    page.pointer("/_links/next/href")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// The system id from `identifiers`, preferring the `action_network:` one.
pub fn osdi_id(resource: &Value) -> Option<String> {
    let identifiers = resource.get("identifiers")?.as_array()?;
    let ids: Vec<&str> = identifiers.iter().filter_map(Value::as_str).collect();
    ids.iter()
        .find_map(|id| id.strip_prefix(ID_PREFIX))
        .or_else(|| ids.first().and_then(|id| id.split_once(':').map(|(_, rest)| rest)))
        .map(str::to_string)
}

/// Last path segment of `_links[rel].href`.
pub fn link_id(resource: &Value, rel: &str) -> Option<String> {
    resource
        .get("_links")?
        .get(rel)?
        .get("href")?
        .as_str()?
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// The primary entry of an OSDI array field, else its first entry.
fn primary<'a>(resource: &'a Value, key: &str) -> Option<&'a Value> {
    let items = resource.get(key)?.as_array()?;
    items
        .iter()
        .find(|item| item.get("primary").and_then(Value::as_bool) == Some(true))
        .or_else(|| items.first())
}

fn text(value: Option<&Value>) -> Value {
    match value {
        Some(Value::String(s)) => Value::String(s.clone()),
        Some(Value::Number(n)) => Value::String(n.to_string()),
        _ => Value::Null,
    }
}

fn require_id(resource: &Value, kind: ResourceType) -> Result<String, StoreError> {
    osdi_id(resource).ok_or_else(|| StoreError::Invalid(format!("{kind} resource has no identifier")))
}

/// Flatten one OSDI resource.
///
/// Tagging ids are returned path-style (`tags/<tag>/taggings/<id>`) since
/// taggings are only addressable under their tag.
pub fn to_flat(kind: ResourceType, resource: &Value) -> Result<Value, StoreError> {
    let mut flat = Map::new();
    flat.insert("modified_date".into(), text(resource.get("modified_date")));

    match kind {
        ResourceType::People => {
            flat.insert("id".into(), Value::String(require_id(resource, kind)?));
            flat.insert("given_name".into(), text(resource.get("given_name")));
            flat.insert("family_name".into(), text(resource.get("family_name")));
            let email = primary(resource, "email_addresses");
            flat.insert("email_address".into(), text(email.and_then(|e| e.get("address"))));
            flat.insert("email_status".into(), text(email.and_then(|e| e.get("status"))));
            let phone = primary(resource, "phone_numbers");
            flat.insert("phone_number".into(), text(phone.and_then(|p| p.get("number"))));
            let address = primary(resource, "postal_addresses");
            flat.insert(
                "address_line".into(),
                text(address.and_then(|a| a.get("address_lines")).and_then(|l| l.get(0))),
            );
            for key in ["locality", "region", "postal_code", "country"] {
                flat.insert(key.into(), text(address.and_then(|a| a.get(key))));
            }
        }
        ResourceType::Tags => {
            flat.insert("id".into(), Value::String(require_id(resource, kind)?));
            flat.insert("name".into(), text(resource.get("name")));
        }
        ResourceType::Taggings => {
            let tagging = require_id(resource, kind)?;
            let tag = link_id(resource, "osdi:tag")
                .ok_or_else(|| StoreError::Invalid("tagging has no osdi:tag link".into()))?;
            let person = link_id(resource, "osdi:person")
                .ok_or_else(|| StoreError::Invalid("tagging has no osdi:person link".into()))?;
            flat.insert("id".into(), Value::String(tagging_path(&tag, &tagging)));
            flat.insert("tag_id".into(), Value::String(tag));
            flat.insert("person_id".into(), Value::String(person));
        }
        ResourceType::Donations => {
            flat.insert("id".into(), Value::String(require_id(resource, kind)?));
            flat.insert("amount".into(), text(resource.get("amount")));
            flat.insert("currency".into(), text(resource.get("currency")));
            flat.insert("created_date".into(), text(resource.get("created_date")));
            flat.insert(
                "person_id".into(),
                link_id(resource, "osdi:person").map(Value::String).unwrap_or(Value::Null),
            );
        }
    }

    Ok(Value::Object(flat))
}

pub fn tagging_path(tag_id: &str, tagging_id: &str) -> String {
    format!("tags/{tag_id}/taggings/{tagging_id}")
}

/// Split a path-style tagging id into `(tag_id, tagging_id)`.
pub fn split_tagging_path(id: &str) -> Option<(&str, &str)> {
    let rest = id.strip_prefix("tags/")?;
    let (tag, tagging) = rest.split_once("/taggings/")?;
    if tag.is_empty() || tagging.is_empty() {
        None
    } else {
        Some((tag, tagging))
    }
}

fn person_link(base: &Url, person_id: &str) -> Result<Value, StoreError> {
    let href = base
        .join(&format!("people/{person_id}"))
        .map_err(|e| StoreError::Invalid(e.to_string()))?;
    Ok(json!({ "href": href.as_str() }))
}

fn non_null(map: &mut Map<String, Value>, key: &str, value: Option<&Value>) {
    if let Some(v) = value.filter(|v| !v.is_null()) {
        map.insert(key.to_string(), v.clone());
    }
}

/// Build the OSDI request body for a flat document.
pub fn to_wire(kind: ResourceType, flat: &Value, base: &Url) -> Result<Value, StoreError> {
    let mut wire = Map::new();
    match kind {
        ResourceType::People => {
            non_null(&mut wire, "given_name", flat.get("given_name"));
            non_null(&mut wire, "family_name", flat.get("family_name"));

            let mut email = Map::new();
            non_null(&mut email, "address", flat.get("email_address"));
            non_null(&mut email, "status", flat.get("email_status"));
            if email.contains_key("address") {
                email.insert("primary".into(), Value::Bool(true));
                wire.insert("email_addresses".into(), json!([email]));
            }

            if let Some(number) = flat.get("phone_number").filter(|v| !v.is_null()) {
                wire.insert(
                    "phone_numbers".into(),
                    json!([{ "number": number, "primary": true }]),
                );
            }

            let mut address = Map::new();
            if let Some(line) = flat.get("address_line").filter(|v| !v.is_null()) {
                address.insert("address_lines".into(), json!([line]));
            }
            for key in ["locality", "region", "postal_code", "country"] {
                non_null(&mut address, key, flat.get(key));
            }
            if !address.is_empty() {
                address.insert("primary".into(), Value::Bool(true));
                wire.insert("postal_addresses".into(), json!([address]));
            }
        }
        ResourceType::Tags => {
            non_null(&mut wire, "name", flat.get("name"));
        }
        ResourceType::Taggings => {
            let person = flat
                .get("person_id")
                .and_then(Value::as_str)
                .ok_or_else(|| StoreError::Invalid("tagging without person_id".into()))?;
            wire.insert("_links".into(), json!({ "osdi:person": person_link(base, person)? }));
        }
        ResourceType::Donations => {
            non_null(&mut wire, "amount", flat.get("amount"));
            non_null(&mut wire, "currency", flat.get("currency"));
            non_null(&mut wire, "created_date", flat.get("created_date"));
            if let Some(person) = flat.get("person_id").and_then(Value::as_str) {
                wire.insert("_links".into(), json!({ "osdi:person": person_link(base, person)? }));
            }
        }
    }
    Ok(Value::Object(wire))
}
