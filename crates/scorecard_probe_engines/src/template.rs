#![forbid(unsafe_code)]

use scorecard_probe_contracts::{CriterionNameMap, Deadline};
use scorecard_probe_storage::RelStoreRepo;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateParseError {
    #[error("template is not valid JSON: {0}")]
    Json(String),
    #[error("template root must be an object or array")]
    Shape,
}

/// Criterion names plus the reason they could not be resolved, if any.
/// An empty map with a warning is the degraded-but-usable outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedNames {
    pub names: CriterionNameMap,
    pub warning: Option<String>,
}

pub struct TemplateResolver<'a> {
    rel: &'a dyn RelStoreRepo,
}

impl<'a> TemplateResolver<'a> {
    pub fn new(rel: &'a dyn RelStoreRepo) -> Self {
        Self { rel }
    }

    /// Never fails: read and parse problems degrade to an empty map.
    pub async fn resolve(
        &self,
        deadline: Deadline,
        customer: &str,
        profile: &str,
        template_id: &str,
        rev: &str,
    ) -> ResolvedNames {
        let document = match self
            .rel
            .read_template_document(deadline, customer, profile, template_id, rev)
            .await
        {
            Ok(doc) => doc,
            Err(err) => return degraded(format!("query template: {err}")),
        };
        match parse_criterion_names(&document) {
            Ok(names) => ResolvedNames {
                names,
                warning: None,
            },
            Err(err) => degraded(format!("parse template: {err}")),
        }
    }
}

fn degraded(reason: String) -> ResolvedNames {
    tracing::warn!(reason = %reason, "could not fetch criterion names");
    ResolvedNames {
        names: CriterionNameMap::new(),
        warning: Some(reason),
    }
}

const ID_KEYS: [&str; 3] = ["identifier", "id", "criterionId"];
const NAME_KEYS: [&str; 3] = ["displayName", "display_name", "name"];

/// Walks chapters and criteria of a template document. Arrays are visited in
/// order and object keys in sorted order, so the result is deterministic.
///
/// An object is a criterion when it carries an identifier and either sits in
/// a `criteria` array or declares a `type` mentioning "criterion". Chapters
/// (objects declaring a chapter type or owning `criteria`/`chapters`) are
/// descended into but never recorded themselves. A repeated identifier keeps
/// the first display name visited.
pub fn parse_criterion_names(document: &str) -> Result<CriterionNameMap, TemplateParseError> {
    let root: Value =
        serde_json::from_str(document).map_err(|e| TemplateParseError::Json(e.to_string()))?;
    if !(root.is_object() || root.is_array()) {
        return Err(TemplateParseError::Shape);
    }
    let mut found: Vec<(String, String)> = Vec::new();
    walk(&root, false, &mut found);

    let mut names = CriterionNameMap::new();
    let mut seen = std::collections::BTreeSet::new();
    for (id, name) in found {
        if seen.insert(id.clone()) {
            names.insert(id, name);
        }
    }
    Ok(names)
}

fn walk(value: &Value, in_criteria: bool, found: &mut Vec<(String, String)>) {
    match value {
        Value::Array(items) => {
            for item in items {
                walk(item, in_criteria, found);
            }
        }
        Value::Object(obj) => {
            if is_criterion(obj, in_criteria) {
                if let Some(id) = first_str(obj, &ID_KEYS) {
                    let name = first_str(obj, &NAME_KEYS).unwrap_or_default();
                    found.push((id.to_string(), name.to_string()));
                }
            }
            for (key, child) in obj {
                walk(child, key == "criteria", found);
            }
        }
        _ => {}
    }
}

fn is_criterion(obj: &Map<String, Value>, in_criteria: bool) -> bool {
    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_ascii_lowercase();
    let is_chapter = kind.contains("chapter")
        || obj.contains_key("criteria")
        || obj.contains_key("chapters");
    !is_chapter && (in_criteria || kind.contains("criterion"))
}

fn first_str<'v>(obj: &'v Map<String, Value>, keys: &[&str]) -> Option<&'v str> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}
