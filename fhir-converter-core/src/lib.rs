// FHIR Converter Core Implementation
//
// This crate provides the core of a template-driven converter from HL7v2,
// C-CDA and JSON to FHIR, and from FHIR back to HL7v2.

pub mod code_mapping;
pub mod date_time;
pub mod errors;
pub mod filters;
pub mod hl7v2;
pub mod merge;
pub mod model;
pub mod parsers;
pub mod post_process;
pub mod processors;
pub mod provider;
pub mod settings;
pub mod template;
pub mod trace;

pub use errors::{ErrorFamily, FhirConverterError, FhirConverterErrorCode, Result};
pub use model::Value;
pub use processors::{
    CancellationToken, CcdaProcessor, DataType, FhirProcessor, FhirToHl7v2Processor,
    Hl7v2Processor, JsonProcessor, Processor,
};
pub use provider::{TemplateCollection, TemplateLayer, TemplateProvider};
pub use settings::ProcessorSettings;
pub use template::{LoggingVisitor, NoopVisitor, RenderVisitor, Template};
pub use trace::TraceInfo;

use std::collections::HashMap;

/// Converts `data` with the default settings of the processor for `data_type`
pub fn convert(
    data_type: DataType,
    data: &str,
    root_template: &str,
    provider: &dyn TemplateProvider,
) -> Result<String> {
    let settings = ProcessorSettings::default();
    match data_type {
        DataType::Hl7v2 => Hl7v2Processor::new(settings).convert(data, root_template, Some(provider), None),
        DataType::Ccda => CcdaProcessor::new(settings).convert(data, root_template, Some(provider), None),
        DataType::Json => JsonProcessor::new(settings).convert(data, root_template, Some(provider), None),
        DataType::Fhir => FhirProcessor::new(settings).convert(data, root_template, Some(provider), None),
    }
}

/// Renders a standalone template against JSON input bound as `msg`
///
/// No template provider is involved, so `include` and `evaluate` fail with
/// `ReferencedTemplateNotFound`. Useful for trying out filters.
pub fn render_template(source: &str, input: serde_json::Value) -> Result<String> {
    render_template_with_visitor(source, input, &NoopVisitor::new())
}

/// Renders a standalone template with a custom visitor
pub fn render_template_with_visitor(
    source: &str,
    input: serde_json::Value,
    visitor: &dyn RenderVisitor,
) -> Result<String> {
    let template = Template::parse("inline", source)?;
    let settings = ProcessorSettings::default();
    let globals = HashMap::from([("msg".to_string(), Value::from_json(input))]);
    template::RenderContext::new(&settings)
        .with_visitor(visitor)
        .render(&template, globals)
}
