// C-CDA Section Filters
//
// Sections live at `ClinicalDocument.component.structuredBody.component[].section`.
// Any step on that path may be a single object or a list, so every step goes
// through `Value::to_sequence`.

use super::{arg_string, FilterContext, FilterRegistry};
use crate::errors::Result;
use crate::model::{ObjectMap, Value};
use crate::parsers::ccda::TEXT_KEY;
use once_cell::sync::Lazy;
use regex::Regex;

static NON_ALPHANUMERIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9]").expect("static regex is valid"));

pub fn register(registry: &mut FilterRegistry) {
    registry.register("get_first_ccda_sections", get_first_ccda_sections);
    registry.register("get_ccda_section_lists", get_ccda_section_lists);
    registry.register(
        "get_first_ccda_sections_by_template_id",
        get_first_ccda_sections_by_template_id,
    );
    registry.register(
        "get_ccda_section_lists_by_template_id",
        get_ccda_section_lists_by_template_id,
    );
}

/// Every section of the document body, in document order
pub fn sections(msg: &Value) -> Vec<Value> {
    let path = ["ClinicalDocument", "component", "structuredBody", "component", "section"];
    path.iter().fold(vec![msg.clone()], |nodes, step| {
        nodes
            .iter()
            .flat_map(|node| node.get_property(step).to_sequence())
            .collect()
    })
}

/// Result key for a query: non-alphanumerics become `_`
pub fn normalize_key(query: &str) -> String {
    NON_ALPHANUMERIC.replace_all(query, "_").into_owned()
}

fn title_of(section: &Value) -> String {
    match section.get_property("title") {
        Value::Object(_) => section.get_property("title").get_property(TEXT_KEY).to_output_string(),
        Value::Nil => String::new(),
        title => title.to_output_string(),
    }
}

fn matches_title(section: &Value, query: &str) -> bool {
    title_of(section)
        .to_lowercase()
        .contains(&query.to_lowercase())
}

fn matches_template_id(section: &Value, query: &str) -> bool {
    let template_id = section.get_property("templateId");
    !template_id.is_nil() && template_id.to_json().to_string().contains(query)
}

fn queries(names: &str) -> Vec<&str> {
    names.split('|')
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .collect()
}

fn collect(
    msg: &Value,
    names: &str,
    first_only: bool,
    matcher: fn(&Value, &str) -> bool,
) -> ObjectMap {
    let all = sections(msg);
    let mut result = ObjectMap::new();
    for query in queries(names) {
        let mut matched = all.iter().filter(|section| matcher(section, query));
        if first_only {
            if let Some(section) = matched.next() {
                result.insert(normalize_key(query), section.clone());
            }
        } else {
            let list: Vec<Value> = matched.cloned().collect();
            if !list.is_empty() {
                result.insert(normalize_key(query), Value::array(list));
            }
        }
    }
    result
}

fn get_first_ccda_sections(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    Ok(Value::object(collect(input, &arg_string(args, 0, ""), true, matches_title)))
}

fn get_ccda_section_lists(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    Ok(Value::object(collect(input, &arg_string(args, 0, ""), false, matches_title)))
}

fn get_first_ccda_sections_by_template_id(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    Ok(Value::object(collect(input, &arg_string(args, 0, ""), true, matches_template_id)))
}

fn get_ccda_section_lists_by_template_id(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    Ok(Value::object(collect(input, &arg_string(args, 0, ""), false, matches_template_id)))
}
