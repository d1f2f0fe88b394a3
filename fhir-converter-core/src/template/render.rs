// Template Renderer
//
// This module walks a parsed template against a `Scope` and writes the output
// text. Besides the usual control flow it implements the composition blocks:
// `include` and `evaluate` render other templates in a child frame, `validate`
// keeps its body only when it matches a JSON schema, and `mergeDiff` merges its
// body into an accumulator document.
//
// Nested renders share one depth counter so that self-referencing templates
// fail with `StackLevelExceeded` instead of exhausting the call stack. The
// timeout is checked before every node.

use crate::code_mapping::CodeMapping;
use crate::errors::{FhirConverterError, FhirConverterErrorCode, Result};
use crate::filters::{FilterContext, FilterRegistry};
use crate::merge::merge_diff;
use crate::model::{ObjectMap, Value};
use crate::provider::{candidate_names, parent_path, TemplateProvider};
use crate::settings::ProcessorSettings;
use crate::template::parser::{
    Accessor, ComparisonOperator, Condition, Expression, FilteredExpression, Node, Template,
};
use crate::template::scope::{FrameKind, Scope};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

#[cfg(feature = "trace")]
use log::{debug, trace};

/// Hooks called around every rendered node
pub trait RenderVisitor {
    /// Called before rendering a node
    fn before_node(&self, node: &Node, depth: usize);

    /// Called after rendering a node
    fn after_node(&self, node: &Node, depth: usize, result: std::result::Result<(), &FhirConverterError>);
}

/// A visitor that logs every node at `trace` level
pub struct LoggingVisitor {
    nesting: std::cell::Cell<usize>,
}

impl Default for LoggingVisitor {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingVisitor {
    pub fn new() -> Self {
        Self {
            nesting: std::cell::Cell::new(0),
        }
    }

    fn indent(&self) -> String {
        "  ".repeat(self.nesting.get())
    }
}

impl RenderVisitor for LoggingVisitor {
    fn before_node(&self, _node: &Node, _depth: usize) {
        #[cfg(feature = "trace")]
        {
            trace!("{}[{}] Rendering: {}", self.indent(), _depth, describe(_node));
            self.nesting.set(self.nesting.get() + 1);
        }
    }

    fn after_node(&self, _node: &Node, _depth: usize, _result: std::result::Result<(), &FhirConverterError>) {
        #[cfg(feature = "trace")]
        {
            self.nesting.set(self.nesting.get().saturating_sub(1));
            match _result {
                Ok(()) => trace!("{}[{}] Done: {}", self.indent(), _depth, describe(_node)),
                Err(err) => debug!("{}[{}] Failed {}: {}", self.indent(), _depth, describe(_node), err),
            }
        }
    }
}

/// A visitor that does nothing
pub struct NoopVisitor;

impl Default for NoopVisitor {
    fn default() -> Self {
        Self::new()
    }
}

impl NoopVisitor {
    pub fn new() -> Self {
        Self
    }
}

impl RenderVisitor for NoopVisitor {
    fn before_node(&self, _node: &Node, _depth: usize) {}

    fn after_node(&self, _node: &Node, _depth: usize, _result: std::result::Result<(), &FhirConverterError>) {}
}

/// Short node label for trace output
#[cfg(feature = "trace")]
fn describe(node: &Node) -> &'static str {
    match node {
        Node::Text(_) => "text",
        Node::Output(_) => "output",
        Node::If { .. } => "if",
        Node::Unless { .. } => "unless",
        Node::Case { .. } => "case",
        Node::For { .. } => "for",
        Node::Break => "break",
        Node::Continue => "continue",
        Node::Assign { .. } => "assign",
        Node::Capture { .. } => "capture",
        Node::Include { .. } => "include",
        Node::Evaluate { .. } => "evaluate",
        Node::Validate { .. } => "validate",
        Node::MergeDiff { .. } => "mergeDiff",
    }
}

/// How a block finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Break,
    Continue,
}

/// State of one render call
pub struct RenderContext<'a> {
    provider: Option<&'a dyn TemplateProvider>,
    filters: &'a FilterRegistry,
    settings: &'a ProcessorSettings,
    code_mapping: Option<&'a CodeMapping>,
    visitor: &'a dyn RenderVisitor,
    root_parent_path: String,
    deadline: Option<Instant>,
    depth: usize,
    validated_schemas: Vec<String>,
}

impl<'a> RenderContext<'a> {
    /// A context using the standard filter table and no template provider
    pub fn new(settings: &'a ProcessorSettings) -> Self {
        static NOOP: NoopVisitor = NoopVisitor;
        Self {
            provider: None,
            filters: FilterRegistry::standard(),
            settings,
            code_mapping: None,
            visitor: &NOOP,
            root_parent_path: String::new(),
            deadline: None,
            depth: 0,
            validated_schemas: Vec::new(),
        }
    }

    pub fn with_provider(mut self, provider: &'a dyn TemplateProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_filters(mut self, filters: &'a FilterRegistry) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_code_mapping(mut self, code_mapping: Option<&'a CodeMapping>) -> Self {
        self.code_mapping = code_mapping;
        self
    }

    pub fn with_visitor(mut self, visitor: &'a dyn RenderVisitor) -> Self {
        self.visitor = visitor;
        self
    }

    /// Names referenced from the root template resolve relative to its folder
    /// first
    pub fn with_root_template(mut self, root_template: &str) -> Self {
        self.root_parent_path = parent_path(root_template);
        self
    }

    /// Schemas exercised by `validate` blocks, in first-use order
    pub fn validated_schemas(&self) -> &[String] {
        &self.validated_schemas
    }

    pub fn into_validated_schemas(self) -> Vec<String> {
        self.validated_schemas
    }

    /// Renders `template` with `globals` bound in the root frame
    pub fn render(&mut self, template: &Template, globals: HashMap<String, Value>) -> Result<String> {
        self.deadline = self.settings.timeout().map(|timeout| Instant::now() + timeout);
        self.depth = 0;
        let mut scope = Scope::new(globals);
        let mut out = String::new();
        self.render_nodes(&template.nodes, &mut scope, &mut out)?;
        Ok(out)
    }

    fn check_deadline(&self) -> Result<()> {
        match self.deadline {
            Some(deadline) if Instant::now() > deadline => Err(FhirConverterError::render(
                FhirConverterErrorCode::TimeoutError,
                format!("Rendering exceeded {} ms", self.settings.timeout_ms),
            )),
            _ => Ok(()),
        }
    }

    fn render_nodes(&mut self, nodes: &[Node], scope: &mut Scope, out: &mut String) -> Result<Flow> {
        for node in nodes {
            self.check_deadline()?;
            self.visitor.before_node(node, self.depth);
            let result = self.render_node(node, scope, out);
            self.visitor.after_node(node, self.depth, result.as_ref().map(|_| ()));
            match result? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn render_node(&mut self, node: &Node, scope: &mut Scope, out: &mut String) -> Result<Flow> {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Output(output) => {
                let value = self.eval_filtered(output, scope)?;
                out.push_str(&value.to_output_string());
            }
            Node::If { branches, else_body } => {
                for (condition, body) in branches {
                    if self.eval_condition(condition, scope)? {
                        return self.render_nodes(body, scope, out);
                    }
                }
                if let Some(body) = else_body {
                    return self.render_nodes(body, scope, out);
                }
            }
            Node::Unless {
                condition,
                body,
                else_body,
            } => {
                if !self.eval_condition(condition, scope)? {
                    return self.render_nodes(body, scope, out);
                }
                if let Some(body) = else_body {
                    return self.render_nodes(body, scope, out);
                }
            }
            Node::Case {
                subject,
                whens,
                else_body,
            } => {
                let subject = self.eval(subject, scope)?;
                for (values, body) in whens {
                    for value in values {
                        if subject.loose_eq(&self.eval(value, scope)?) {
                            return self.render_nodes(body, scope, out);
                        }
                    }
                }
                if let Some(body) = else_body {
                    return self.render_nodes(body, scope, out);
                }
            }
            Node::For {
                variable,
                collection,
                limit,
                offset,
                reversed,
                body,
                else_body,
            } => {
                let items = self.loop_items(collection, limit.as_ref(), offset.as_ref(), *reversed, scope)?;
                if items.is_empty() {
                    if let Some(body) = else_body {
                        return self.render_nodes(body, scope, out);
                    }
                    return Ok(Flow::Normal);
                }
                scope.push(FrameKind::Loop, HashMap::new());
                let result = self.render_loop(variable, items, body, scope, out);
                scope.pop();
                result?;
            }
            Node::Break => return Ok(Flow::Break),
            Node::Continue => return Ok(Flow::Continue),
            Node::Assign { name, value } => {
                let value = self.eval_filtered(value, scope)?;
                scope.assign(name, value);
            }
            Node::Capture { name, body } => {
                let mut captured = String::new();
                let flow = self.render_nodes(body, scope, &mut captured)?;
                scope.assign(name, Value::String(captured));
                return Ok(flow);
            }
            Node::Include { template, arguments } => {
                self.render_child(template, arguments, scope, out)?;
            }
            Node::Evaluate {
                variable,
                template,
                arguments,
            } => {
                let mut rendered = String::new();
                self.render_child(template, arguments, scope, &mut rendered)?;
                scope.assign(variable, Value::String(rendered));
            }
            Node::Validate { schema, body } => {
                let schema_name = self.eval(schema, scope)?.to_output_string();
                let mut rendered = String::new();
                self.render_nodes(body, scope, &mut rendered)?;
                if self.validate(&schema_name, &rendered)? {
                    out.push_str(&rendered);
                }
            }
            Node::MergeDiff { variable, body } => {
                let mut rendered = String::new();
                self.render_nodes(body, scope, &mut rendered)?;
                let accumulator = scope.get(variable).cloned().unwrap_or_default();
                out.push_str(&self.merge(variable, &accumulator, &rendered)?);
            }
        }
        Ok(Flow::Normal)
    }

    fn render_loop(
        &mut self,
        variable: &str,
        items: Vec<Value>,
        body: &[Node],
        scope: &mut Scope,
        out: &mut String,
    ) -> Result<()> {
        let length = items.len();
        for (index, item) in items.into_iter().enumerate() {
            scope.set_local(variable, item);
            scope.set_local("forloop", forloop(index, length));
            if self.render_nodes(body, scope, out)? == Flow::Break {
                break;
            }
        }
        Ok(())
    }

    fn loop_items(
        &self,
        collection: &Expression,
        limit: Option<&Expression>,
        offset: Option<&Expression>,
        reversed: bool,
        scope: &Scope,
    ) -> Result<Vec<Value>> {
        let mut items = match self.eval(collection, scope)? {
            Value::Hl7Data(data) => data.data.iter().cloned().map(Value::Segment).collect(),
            Value::Object(map) => map
                .iter()
                .map(|(key, value)| Value::array(vec![Value::String(key.clone()), value.clone()]))
                .collect(),
            other => other.to_sequence(),
        };

        if let Some(offset) = offset {
            let offset = self.eval(offset, scope)?.as_i64().unwrap_or(0).max(0) as usize;
            items = items.into_iter().skip(offset).collect();
        }
        if let Some(limit) = limit {
            let limit = self.eval(limit, scope)?.as_i64().unwrap_or(0).max(0) as usize;
            items.truncate(limit);
        }
        if reversed {
            items.reverse();
        }
        Ok(items)
    }

    /// Shared body of `include` and `evaluate`
    fn render_child(
        &mut self,
        template: &Expression,
        arguments: &[(String, Expression)],
        scope: &mut Scope,
        out: &mut String,
    ) -> Result<()> {
        let name = self.eval(template, scope)?.to_output_string();
        let template = self.resolve_template(&name)?;

        let mut variables = HashMap::with_capacity(arguments.len());
        for (key, expression) in arguments {
            variables.insert(key.clone(), self.eval(expression, scope)?);
        }

        if self.depth >= self.settings.max_recursion_depth {
            return Err(FhirConverterError::render(
                FhirConverterErrorCode::StackLevelExceeded,
                format!(
                    "Nesting too deep: more than {} levels rendering '{}'",
                    self.settings.max_recursion_depth, name
                ),
            ));
        }

        self.depth += 1;
        scope.push(FrameKind::Template, variables);
        let result = self.render_nodes(&template.nodes, scope, out);
        scope.pop();
        self.depth -= 1;
        result.map(|_| ())
    }

    fn resolve_template(&self, name: &str) -> Result<Arc<Template>> {
        self.provider
            .and_then(|provider| {
                candidate_names(&self.root_parent_path, name)
                    .iter()
                    .find_map(|candidate| provider.get_template(candidate))
            })
            .ok_or_else(|| {
                FhirConverterError::render(
                    FhirConverterErrorCode::ReferencedTemplateNotFound,
                    format!("Referenced template '{}' not found", name),
                )
            })
    }

    /// Records the schema and reports whether `rendered` is JSON matching it.
    /// A missing or broken schema is an error; a mismatch is not.
    fn validate(&mut self, schema_name: &str, rendered: &str) -> Result<bool> {
        let schema = self
            .provider
            .and_then(|provider| {
                candidate_names(&self.root_parent_path, schema_name)
                    .iter()
                    .find_map(|candidate| provider.get_schema(candidate))
            })
            .ok_or_else(|| {
                FhirConverterError::template_load(
                    FhirConverterErrorCode::TemplateNotFound,
                    format!("Schema '{}' not found", schema_name),
                )
            })?;

        let validator = jsonschema::validator_for(&schema).map_err(|e| {
            FhirConverterError::template_load(
                FhirConverterErrorCode::InvalidJsonSchema,
                format!("Invalid JSON schema '{}': {}", schema_name, e),
            )
        })?;

        if !self.validated_schemas.iter().any(|s| s == schema_name) {
            self.validated_schemas.push(schema_name.to_string());
        }

        match serde_json::from_str::<serde_json::Value>(rendered) {
            Ok(instance) if validator.is_valid(&instance) => Ok(true),
            Ok(_) => {
                log::debug!("Content does not match schema '{}'", schema_name);
                Ok(false)
            }
            Err(e) => {
                log::debug!("Content for schema '{}' is not JSON: {}", schema_name, e);
                Ok(false)
            }
        }
    }

    fn merge(&self, variable: &str, accumulator: &Value, rendered: &str) -> Result<String> {
        let diff: serde_json::Value = serde_json::from_str(rendered).map_err(|e| {
            FhirConverterError::post_process(
                FhirConverterErrorCode::JsonParsingError,
                format!("mergeDiff content is not JSON: {}", e),
            )
        })?;

        let mut merged = match accumulator {
            Value::Nil => serde_json::Value::Object(serde_json::Map::new()),
            Value::String(text) if text.trim().is_empty() => {
                serde_json::Value::Object(serde_json::Map::new())
            }
            Value::String(text) => serde_json::from_str(text).map_err(|e| {
                FhirConverterError::post_process(
                    FhirConverterErrorCode::JsonParsingError,
                    format!("mergeDiff accumulator '{}' is not JSON: {}", variable, e),
                )
            })?,
            other => other.to_json(),
        };

        merge_diff(&mut merged, &diff, self.settings.max_merge_depth)?;
        Ok(merged.to_string())
    }

    fn eval_filtered(&self, filtered: &FilteredExpression, scope: &Scope) -> Result<Value> {
        let mut value = self.eval(&filtered.expression, scope)?;
        let context = FilterContext {
            code_mapping: self.code_mapping,
        };

        for call in &filtered.filters {
            let filter = self.filters.get(&call.name).ok_or_else(|| {
                FhirConverterError::render(
                    FhirConverterErrorCode::TemplateRenderingError,
                    format!("Unknown filter '{}'", call.name),
                )
            })?;
            let arguments = call
                .arguments
                .iter()
                .map(|argument| self.eval(argument, scope))
                .collect::<Result<Vec<_>>>()?;
            value = filter(&context, &value, &arguments).map_err(|e| {
                FhirConverterError::wrap_render(&format!("Filter '{}' failed", call.name), e)
            })?;
        }
        Ok(value)
    }

    fn eval(&self, expression: &Expression, scope: &Scope) -> Result<Value> {
        match expression {
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Empty | Expression::Blank => Ok(Value::String(String::new())),
            Expression::Variable { name, path } => {
                let mut value = match scope.get(name) {
                    Some(value) => value.clone(),
                    None if self.settings.strict_variables => {
                        return Err(FhirConverterError::render(
                            FhirConverterErrorCode::PropertyNotFound,
                            format!("Undefined variable '{}'", name),
                        ))
                    }
                    None => Value::Nil,
                };
                for accessor in path {
                    value = match accessor {
                        Accessor::Property(property) => value.get_property(property),
                        Accessor::Index(index) => value.get_index(&self.eval(index, scope)?),
                    };
                }
                Ok(value)
            }
            Expression::Range(start, end) => {
                let start = self.eval(start, scope)?.as_i64().unwrap_or(0);
                let end = self.eval(end, scope)?.as_i64().unwrap_or(0);
                Ok(Value::array((start..=end).map(Value::Integer).collect()))
            }
        }
    }

    fn eval_condition(&self, condition: &Condition, scope: &Scope) -> Result<bool> {
        match condition {
            Condition::Single(expression) => Ok(self.eval(expression, scope)?.is_truthy()),
            Condition::And(left, right) => {
                Ok(self.eval_condition(left, scope)? && self.eval_condition(right, scope)?)
            }
            Condition::Or(left, right) => {
                Ok(self.eval_condition(left, scope)? || self.eval_condition(right, scope)?)
            }
            Condition::Compare { left, op, right } => self.compare(left, *op, right, scope),
        }
    }

    fn compare(
        &self,
        left: &Expression,
        op: ComparisonOperator,
        right: &Expression,
        scope: &Scope,
    ) -> Result<bool> {
        // `x == empty`, `blank != x`
        let special = match (left, right) {
            (Expression::Empty, other) | (other, Expression::Empty) => {
                Some(self.eval(other, scope)?.is_empty())
            }
            (Expression::Blank, other) | (other, Expression::Blank) => {
                Some(self.eval(other, scope)?.is_blank())
            }
            _ => None,
        };
        if let Some(matches) = special {
            return Ok(match op {
                ComparisonOperator::Equals => matches,
                ComparisonOperator::NotEquals => !matches,
                _ => false,
            });
        }

        let left = self.eval(left, scope)?;
        let right = self.eval(right, scope)?;
        Ok(match op {
            ComparisonOperator::Equals => left.loose_eq(&right),
            ComparisonOperator::NotEquals => !left.loose_eq(&right),
            ComparisonOperator::Contains => contains(&left, &right),
            ordering => match order(&left, &right) {
                Some(found) => match ordering {
                    ComparisonOperator::LessThan => found == Ordering::Less,
                    ComparisonOperator::LessOrEqual => found != Ordering::Greater,
                    ComparisonOperator::GreaterThan => found == Ordering::Greater,
                    _ => found != Ordering::Less,
                },
                None => false,
            },
        })
    }
}

fn forloop(index: usize, length: usize) -> Value {
    let mut map = ObjectMap::new();
    map.insert("index".to_string(), Value::Integer(index as i64 + 1));
    map.insert("index0".to_string(), Value::Integer(index as i64));
    map.insert("rindex".to_string(), Value::Integer((length - index) as i64));
    map.insert("first".to_string(), Value::Bool(index == 0));
    map.insert("last".to_string(), Value::Bool(index + 1 == length));
    map.insert("length".to_string(), Value::Integer(length as i64));
    Value::object(map)
}

/// Numbers compare numerically, strings lexically, anything else not at all
fn order(left: &Value, right: &Value) -> Option<Ordering> {
    let numeric = Value::is_number;
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Nil, _) | (_, Value::Nil) => None,
        (a, b) if numeric(a) || numeric(b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (a, b) => Some(a.to_output_string().cmp(&b.to_output_string())),
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Nil => false,
        Value::Array(items) => items.iter().any(|item| item.loose_eq(needle)),
        Value::Object(map) => map.contains_key(&needle.to_output_string()),
        Value::Hl7Data(data) => {
            let needle = needle.to_output_string();
            data.meta.iter().any(|segment_type| *segment_type == needle)
        }
        other => other.to_output_string().contains(&needle.to_output_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(source: &str, globals: HashMap<String, Value>) -> Result<String> {
        let template = Template::parse("test", source)?;
        let settings = ProcessorSettings::default();
        RenderContext::new(&settings).render(&template, globals)
    }

    #[test]
    fn loops_expose_forloop() {
        let out = render(
            "{% for i in (1..3) %}{{ i }}{% unless forloop.last %},{% endunless %}{% endfor %}",
            HashMap::new(),
        )
        .unwrap();
        assert_eq!(out, "1,2,3");
    }

    #[test]
    fn break_and_continue() {
        let out = render(
            "{% for i in (1..6) %}{% if i == 2 %}{% continue %}{% endif %}{% if i > 4 %}{% break %}{% endif %}{{ i }}{% endfor %}",
            HashMap::new(),
        )
        .unwrap();
        assert_eq!(out, "134");
    }

    #[test]
    fn empty_and_blank_comparisons() {
        let globals = HashMap::from([
            ("list".to_string(), Value::array(Vec::new())),
            ("text".to_string(), Value::from("  ")),
        ]);
        let out = render(
            "{% if list == empty %}e{% endif %}{% if text == blank %}b{% endif %}{% if text != empty %}n{% endif %}",
            globals,
        )
        .unwrap();
        assert_eq!(out, "ebn");
    }

    #[test]
    fn unknown_filter_is_a_render_error() {
        let err = render("{{ 'a' | shout }}", HashMap::new()).unwrap_err();
        assert_eq!(err.code(), FhirConverterErrorCode::TemplateRenderingError);
    }

    #[test]
    fn include_without_provider_reports_missing_template() {
        let err = render("{% include 'Other' %}", HashMap::new()).unwrap_err();
        assert_eq!(err.code(), FhirConverterErrorCode::ReferencedTemplateNotFound);
    }

    #[test]
    fn merge_diff_outputs_merged_document() {
        let globals = HashMap::from([("acc".to_string(), Value::from(r#"{"a":1,"b":{"c":2}}"#))]);
        let out = render(
            r#"{% mergeDiff acc %}{"b":{"d":3},"a":null}{% endmergeDiff %}"#,
            globals,
        )
        .unwrap();
        let merged: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(merged, serde_json::json!({"b": {"c": 2, "d": 3}}));
    }
}
